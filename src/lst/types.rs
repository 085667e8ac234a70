//! Storage and wire types of the liquid staking contracts
use odra::prelude::*;
use odra::casper_types::U256;

/// Protocol parameters (fees, thresholds and retry policy)
#[odra::odra_type]
pub struct Params {
    /// Fee taken from every deposit, in basis points of the pool denomination
    pub deposit_fee_bps: u32,
    /// Fee taken from confirmed rewards before they are restaked
    pub restake_fee_bps: u32,
    /// Fee taken from unstaked receipt tokens
    pub unstake_fee_bps: u32,
    /// Fee taken from receipt tokens redeemed at once against idle deposits
    pub redeem_fee_bps: u32,
    /// Smallest accepted deposit
    pub min_deposit: U256,
    /// Deviation from the ideal share (basis points of the pool) that triggers a redelegation
    pub rebalance_threshold_bps: u32,
    /// Failed undelegation attempts allowed before the failure becomes terminal
    pub max_retries: u32,
    /// Base delay of the exponential retry policy (milliseconds)
    pub retry_backoff: u64,
    /// Time an interchain dispatch may stay unacknowledged (milliseconds)
    pub ack_timeout: u64,
    /// Receiver of protocol fees
    pub fee_address: Address,
}

/// Remote (host) chain configuration
#[odra::odra_type]
pub struct HostChain {
    /// Chain id of the host chain
    pub chain_id: String,
    /// Connection used by the interchain-account controller
    pub connection_id: String,
    /// Transfer channel towards the host chain
    pub transfer_channel: String,
    /// Staking denomination on the host chain
    pub host_denom: String,
    /// Identifier understood by the epoch source
    pub epoch_identifier: String,
    /// Interchain account that holds the delegations
    pub delegation_account: String,
    /// Interchain account that collects rewards
    pub rewards_account: String,
}

/// Interchain accounts registered on the host chain
#[odra::odra_type]
pub struct HostAccounts {
    pub delegation_account: String,
    pub rewards_account: String,
}

/// Validator status on the allow-list
#[odra::odra_type]
pub enum ValidatorStatus {
    Active = 0,
    Inactive = 1,
}

/// A validator eligible to receive pooled delegations
#[odra::odra_type]
pub struct LiquidValidator {
    /// Operator address
    pub operator: Address,
    /// Active validators receive new stake
    pub status: ValidatorStatus,
    /// Delegation confirmed by the host chain
    pub delegated_amount: U256,
    /// Delegations submitted but not yet acknowledged
    pub pending_delegation: U256,
    /// Undelegations and outgoing redelegations not yet acknowledged
    pub pending_undelegation: U256,
    /// Relative allocation weight
    pub target_weight: u32,
    /// Delete the record once it holds nothing
    pub removal_scheduled: bool,
}

/// Unbonding epoch status
#[odra::odra_type]
pub enum EpochStatus {
    Open = 0,
    Submitted = 1,
    Completed = 2,
    Failed = 3,
}

/// Redemptions batched within one epoch
#[odra::odra_type]
pub struct UnbondingEpoch {
    pub epoch_number: u64,
    /// Pool denomination owed to the epoch's delegators
    pub total_unbonding_amount: U256,
    /// Receipt tokens burned by the epoch's delegators
    pub total_receipt_burned: U256,
    /// Latest completion time reported by the host chain (milliseconds)
    pub completion_time: u64,
    pub status: EpochStatus,
}

/// Acknowledgement state of a validator-scoped undelegation
#[odra::odra_type]
pub enum AckStatus {
    /// Dispatched, waiting for the host chain
    Pending = 0,
    /// Confirmed by the host chain
    Acknowledged = 1,
    /// Errored or timed out, waiting for a retry
    Failed = 2,
    /// Retry budget used up; needs an operator
    Exhausted = 3,
}

/// Undelegation of one validator within one epoch
#[odra::odra_type]
pub struct ValidatorUnbonding {
    pub epoch_number: u64,
    pub validator: Address,
    pub amount: U256,
    pub ack_status: AckStatus,
    /// Dispatch of the latest attempt
    pub dispatch_id: u64,
    /// Completion time reported with the acknowledgement (milliseconds)
    pub completion_time: u64,
}

/// Redemption of one delegator within one epoch
#[odra::odra_type]
pub struct UserUnbonding {
    pub epoch_number: u64,
    pub delegator: Address,
    pub receipt_token_burned: U256,
    /// Fixed when the tokens are burned, never recomputed
    pub claimable_amount: U256,
    pub claimed: bool,
}

/// Host-chain staking action
#[odra::odra_type]
pub enum HostAction {
    Delegate = 0,
    Undelegate = 1,
    Redelegate = 2,
}

/// One message of an interchain transaction
#[odra::odra_type]
pub struct HostInstruction {
    pub action: HostAction,
    pub validator: Address,
    /// Destination of a redelegation
    pub destination: Option<Address>,
    pub amount: U256,
}

/// Why a batch of instructions was dispatched
#[odra::odra_type]
pub enum DispatchPurpose {
    Delegation = 0,
    Redelegation = 1,
    Undelegation = 2,
}

/// Dispatch record lifecycle
#[odra::odra_type]
pub enum DispatchStatus {
    Pending = 0,
    Resolved = 1,
}

/// An interchain transaction waiting for its acknowledgement
#[odra::odra_type]
pub struct PendingDispatch {
    pub dispatch_id: u64,
    pub purpose: DispatchPurpose,
    pub instructions: Vec<HostInstruction>,
    /// Unbonding epoch for undelegations, zero otherwise
    pub epoch_number: u64,
    pub submitted_at: u64,
    /// Past this block time the dispatch is treated as timed out
    pub deadline: u64,
    pub status: DispatchStatus,
}

/// Result reported by the interchain-account controller
#[odra::odra_type]
pub enum AckOutcome {
    Success = 0,
    Error = 1,
    Timeout = 2,
}

/// Reason recorded on a failed undelegation
#[odra::odra_type]
pub enum FailureReason {
    RemoteRejected = 0,
    Timeout = 1,
}

/// State of a failed undelegation
#[odra::odra_type]
pub enum FailureState {
    /// Waiting for its backoff to elapse
    AwaitingRetry = 0,
    /// Resubmitted, pending again
    Retrying = 1,
    /// Terminal; surfaced to operators
    Exhausted = 2,
}

/// Bookkeeping of an undelegation that errored or timed out
#[odra::odra_type]
pub struct FailedUnbonding {
    pub epoch_number: u64,
    pub validator: Address,
    pub amount: U256,
    pub retry_count: u32,
    pub reason: FailureReason,
    pub failed_at: u64,
    pub next_retry_at: u64,
    pub state: FailureState,
}

/// Epoch information returned by the epoch source
#[odra::odra_type]
pub struct EpochInfo {
    pub current_epoch: u64,
    pub current_epoch_start: u64,
    pub duration: u64,
}

/// Delegation of the host account to one validator, as seen on the host chain
#[odra::odra_type]
pub struct RemoteDelegation {
    pub validator: Address,
    pub amount: U256,
}

/// Aggregate module state
#[odra::odra_type]
pub struct ModuleState {
    pub total_staked: U256,
    pub total_supply: U256,
    pub c_value: U256,
    pub idle_deposits: U256,
    pub queued_unbonding: U256,
    /// Slashing the staked pool could not absorb
    pub slash_deficit: U256,
    pub in_transit: U256,
    pub open_epoch: u64,
    pub paused: bool,
}

/// Delegation state summed over the allow-list
#[odra::odra_type]
pub struct DelegationState {
    pub total_delegated: U256,
    pub total_pending_delegation: U256,
    pub total_pending_undelegation: U256,
    pub validators: Vec<LiquidValidator>,
}
