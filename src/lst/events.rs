//! Event definitions for the liquid staking contracts
use odra::prelude::*;
use odra::casper_types::U256;

/// Event emitted when the pool denomination is staked
#[odra::event]
pub struct Staked {
    /// Address of the staker
    pub staker: Address,
    /// Amount attached to the call
    pub amount: U256,
    /// Deposit fee sent to the fee address
    pub fee: U256,
    /// Receipt tokens minted
    pub minted: U256,
    /// C-value after the stake (scaled by 1e18)
    pub c_value: U256,
    /// Timestamp of the stake
    pub timestamp: u64,
}

/// Event emitted when receipt tokens are redeemed
#[odra::event]
pub struct Unstaked {
    /// Address of the delegator
    pub delegator: Address,
    /// Receipt tokens burned
    pub burned: U256,
    /// Unstake fee re-minted to the fee address
    pub fee: U256,
    /// Amount claimable once the epoch completes
    pub claimable: U256,
    /// Epoch the redemption was queued into
    pub epoch_number: u64,
    /// Timestamp of the unstake
    pub timestamp: u64,
}

/// Event emitted when receipt tokens are redeemed at once against idle deposits
#[odra::event]
pub struct Redeemed {
    pub delegator: Address,
    /// Receipt tokens burned
    pub burned: U256,
    /// Redeem fee re-minted to the fee address
    pub fee: U256,
    /// Amount paid out
    pub amount: U256,
    pub timestamp: u64,
}

/// Event emitted when completed unbondings are paid out
#[odra::event]
pub struct Claimed {
    pub delegator: Address,
    pub amount: U256,
    /// Number of user unbondings paid
    pub entries: u32,
    pub timestamp: u64,
}

/// Event emitted when confirmed rewards move the C-value
#[odra::event]
pub struct CValueUpdated {
    pub old_c_value: U256,
    pub new_c_value: U256,
    /// Rewards confirmed on the host chain
    pub rewards: U256,
    /// Restake fee minted to the fee address, in receipt tokens
    pub fee_shares: U256,
    pub timestamp: u64,
}

/// Event emitted when the host chain reports less stake than recorded
#[odra::event]
pub struct Slashed {
    pub validator: Address,
    pub amount: U256,
    /// Part of the slash the staked pool could not absorb
    pub uncovered: U256,
    pub new_c_value: U256,
    pub timestamp: u64,
}

/// Event emitted when a validator joins the allow-list
#[odra::event]
pub struct ValidatorAdded {
    pub validator: Address,
    pub target_weight: u32,
    pub added_by: Address,
}

/// Event emitted when a validator's weight changes
#[odra::event]
pub struct ValidatorWeightUpdated {
    pub validator: Address,
    pub old_weight: u32,
    pub new_weight: u32,
}

/// Event emitted when a validator still holding stake is delisted
#[odra::event]
pub struct ValidatorDeactivated {
    pub validator: Address,
    /// Stake still to be moved away
    pub remaining: U256,
    pub timestamp: u64,
}

/// Event emitted when a validator record is deleted
#[odra::event]
pub struct ValidatorRemoved {
    pub validator: Address,
    pub timestamp: u64,
}

/// Event emitted when an interchain transaction is submitted
#[odra::event]
pub struct DispatchSubmitted {
    pub dispatch_id: u64,
    /// 0 delegation, 1 redelegation, 2 undelegation
    pub purpose: u8,
    pub amount: U256,
    pub deadline: u64,
}

/// Event emitted when an interchain transaction is confirmed
#[odra::event]
pub struct DispatchAcknowledged {
    pub dispatch_id: u64,
    pub purpose: u8,
    pub timestamp: u64,
}

/// Event emitted when an interchain transaction errors or times out
#[odra::event]
pub struct DispatchFailed {
    pub dispatch_id: u64,
    pub purpose: u8,
    /// 1 error, 2 timeout
    pub outcome: u8,
    pub timestamp: u64,
}

/// Event emitted for callbacks of unknown or already resolved dispatches
#[odra::event]
pub struct AckIgnored {
    pub dispatch_id: u64,
    pub timestamp: u64,
}

/// Event emitted when a failed undelegation is scheduled for another attempt
#[odra::event]
pub struct UnbondingRetryScheduled {
    pub epoch_number: u64,
    pub validator: Address,
    pub retry_count: u32,
    pub next_retry_at: u64,
}

/// Event emitted when an undelegation runs out of retries
#[odra::event]
pub struct UnbondingExhausted {
    pub epoch_number: u64,
    pub validator: Address,
    pub amount: U256,
    pub retry_count: u32,
    pub timestamp: u64,
}

/// Event emitted when an epoch is closed and its undelegations dispatched
#[odra::event]
pub struct EpochSubmitted {
    pub epoch_number: u64,
    pub total_unbonding_amount: U256,
    pub validators: u32,
    pub timestamp: u64,
}

/// Event emitted when a boundary is reached but confirmed stake cannot yet
/// cover the open epoch; it stays open until it can
#[odra::event]
pub struct EpochDeferred {
    pub epoch_number: u64,
    pub required: U256,
    pub available: U256,
    pub timestamp: u64,
}

/// Event emitted when an epoch's unbondings become claimable
#[odra::event]
pub struct EpochCompleted {
    pub epoch_number: u64,
    pub completion_time: u64,
}

/// Event emitted when an epoch is left with an exhausted undelegation
#[odra::event]
pub struct EpochFailed {
    pub epoch_number: u64,
    pub timestamp: u64,
}

/// Event emitted when a redelegation batch is dispatched
#[odra::event]
pub struct Rebalanced {
    pub dispatch_id: u64,
    pub redelegations: u32,
    pub amount: U256,
    pub timestamp: u64,
}

/// Event emitted when a lifecycle step fails; the block proceeds
#[odra::event]
pub struct LifecycleStepFailed {
    pub step: String,
    pub error_code: u16,
    pub timestamp: u64,
}

/// Event emitted when parameters are updated
#[odra::event]
pub struct ParamsUpdated {
    pub updated_by: Address,
    pub timestamp: u64,
}

/// Event emitted when the contract is paused
#[odra::event]
pub struct ContractPaused {
    /// Paused by (admin address)
    pub paused_by: Address,
    /// Timestamp
    pub timestamp: u64,
}

/// Event emitted when the contract is unpaused
#[odra::event]
pub struct ContractUnpaused {
    /// Unpaused by (admin address)
    pub unpaused_by: Address,
    /// Timestamp
    pub timestamp: u64,
}
