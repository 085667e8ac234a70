//! Liquid staking contract
//!
//! Custodies the pool denomination, mints the receipt token against it and
//! delegates the pool to the allow-listed validators of the host chain
//! through the interchain-account controller. Redemptions are batched into
//! host epochs and paid out once the host chain has completed the
//! undelegations.
//!
//! Synchronous entry points (`stake`, `unstake`, `claim_unbonded`, admin
//! calls) either apply completely or revert. Cross-chain work is reconciled
//! through `on_ack` and the permissionless `tick` crank, which runs once per
//! block and reports failing steps as events instead of reverting.

use odra::prelude::*;
use odra::casper_types::{U256, U512};
use odra::ContractRef;
use super::adapter::{failure_reason, EpochSourceContractRef, IcaAdapter, ValidatorQuerierContractRef};
use super::delegation::{DelegationTracker, Delisting, Movement};
use super::errors::LstError;
use super::events::*;
use super::ledger::ExchangeRateLedger;
use super::stake_token::StakeTokenContractRef;
use super::types::*;
use super::unbonding::UnbondingEngine;
use crate::math::{plan_redelegations, Motes, SafeMath, StakeMath, BPS_DENOMINATOR};

#[odra::module(events = [
    Staked, Unstaked, Redeemed, Claimed, CValueUpdated, Slashed,
    ValidatorAdded, ValidatorWeightUpdated, ValidatorDeactivated, ValidatorRemoved,
    DispatchSubmitted, DispatchAcknowledged, DispatchFailed, AckIgnored,
    UnbondingRetryScheduled, UnbondingExhausted,
    EpochSubmitted, EpochDeferred, EpochCompleted, EpochFailed, Rebalanced,
    LifecycleStepFailed, ParamsUpdated, ContractPaused, ContractUnpaused
])]
pub struct LiquidStaking {
    /// Pool accounting and C-value
    ledger: SubModule<ExchangeRateLedger>,
    /// Allow-list and per-validator delegation state
    tracker: SubModule<DelegationTracker>,
    /// Epoch batching of redemptions
    engine: SubModule<UnbondingEngine>,
    /// Dispatches to the interchain-account controller
    adapter: SubModule<IcaAdapter>,
    /// Receipt token contract
    token: Var<Address>,
    /// Host epoch clock
    epoch_source: Var<Address>,
    /// Host delegation querier used for slashing reconciliation
    validator_querier: Var<Address>,
    /// Protocol parameters
    params: Var<Params>,
    /// Host chain configuration
    host_chain: Var<HostChain>,
    /// Contract admin
    admin: Var<Address>,
    /// Whether staking and unstaking are paused
    paused: Var<bool>,
    /// Block time of the last lifecycle run
    last_tick: Var<u64>,
}

#[odra::module]
impl LiquidStaking {
    /// Initialize the pool; the open unbonding epoch is the host's current one
    pub fn init(
        &mut self,
        token: Address,
        ica_controller: Address,
        epoch_source: Address,
        validator_querier: Address,
        host_chain: HostChain,
        params: Params,
    ) {
        if let Err(error) = Self::validate_params(&params) {
            self.env().revert(error);
        }
        let caller = self.env().caller();

        let source = EpochSourceContractRef::new(self.env(), epoch_source);
        let info = source.epoch_info(host_chain.epoch_identifier.clone());
        self.engine.set_open_epoch(info.current_epoch);

        self.token.set(token);
        self.adapter.set_controller(ica_controller);
        self.epoch_source.set(epoch_source);
        self.validator_querier.set(validator_querier);
        self.host_chain.set(host_chain);
        self.params.set(params);
        self.admin.set(caller);
        self.paused.set(false);
    }

    // ========================================
    // User entry points
    // ========================================

    /// Stake the attached amount and receive receipt tokens
    ///
    /// The deposit fee is taken in the pool denomination before minting. The
    /// net amount is split across Active validators and dispatched for
    /// delegation in one batch.
    ///
    /// # Returns
    /// Receipt tokens minted to the caller
    #[odra(payable)]
    pub fn stake(&mut self) -> U256 {
        self.ensure_not_paused();
        let caller = self.env().caller();
        let amount = Motes::to_amount(self.env().attached_value()).unwrap_or_revert(&self.env());
        let params = self.params();

        if amount.is_zero() {
            self.env().revert(LstError::InvalidAmount);
        }
        if amount < params.min_deposit {
            self.env().revert(LstError::BelowMinimumDeposit);
        }
        if !self.tracker.has_active() {
            self.env().revert(LstError::ValidatorSetEmpty);
        }

        let (fee, minted) = self.process_stake(amount, &params).unwrap_or_revert(&self.env());

        let mut token = StakeTokenContractRef::new(self.env(), self.token_address());
        token.mint(caller, minted);
        if !fee.is_zero() {
            let fee_motes = Motes::from_amount(fee).unwrap_or_revert(&self.env());
            self.env().transfer_tokens(&params.fee_address, &fee_motes);
        }
        self.ensure_consistent();

        self.env().emit_event(Staked {
            staker: caller,
            amount,
            fee,
            minted,
            c_value: self.ledger.c_value(),
            timestamp: self.env().get_block_time(),
        });
        minted
    }

    /// Redeem receipt tokens into the open unbonding epoch
    ///
    /// The unstake fee is kept in receipt tokens and re-minted to the fee
    /// address. The claimable amount is fixed here and paid once the epoch
    /// completes.
    ///
    /// # Returns
    /// Amount claimable once the epoch completes
    pub fn unstake(&mut self, receipt_amount: U256) -> U256 {
        self.ensure_not_paused();
        let caller = self.env().caller();
        let params = self.params();

        if receipt_amount.is_zero() {
            self.env().revert(LstError::InvalidAmount);
        }
        let mut token = StakeTokenContractRef::new(self.env(), self.token_address());
        if token.balance_of(caller) < receipt_amount {
            self.env().revert(LstError::InsufficientReceiptTokens);
        }

        let (fee, claimable, epoch_number) = self
            .process_unstake(caller, receipt_amount, &params)
            .unwrap_or_revert(&self.env());

        token.burn(caller, receipt_amount);
        if !fee.is_zero() {
            token.mint(params.fee_address, fee);
        }
        self.ensure_consistent();

        self.env().emit_event(Unstaked {
            delegator: caller,
            burned: receipt_amount,
            fee,
            claimable,
            epoch_number,
            timestamp: self.env().get_block_time(),
        });
        claimable
    }

    /// Redeem receipt tokens at once against idle deposits
    ///
    /// Only deposits not yet delegated can back an instant redemption. The
    /// redeem fee is kept in receipt tokens and re-minted to the fee address.
    ///
    /// # Arguments
    /// * `receipt_amount` - Receipt tokens to redeem
    ///
    /// # Returns
    /// Amount paid to the caller
    pub fn redeem(&mut self, receipt_amount: U256) -> U256 {
        self.ensure_not_paused();
        let caller = self.env().caller();
        let params = self.params();

        if receipt_amount.is_zero() {
            self.env().revert(LstError::InvalidAmount);
        }
        let mut token = StakeTokenContractRef::new(self.env(), self.token_address());
        if token.balance_of(caller) < receipt_amount {
            self.env().revert(LstError::InsufficientReceiptTokens);
        }

        let (fee, payout) = self
            .process_redeem(receipt_amount, &params)
            .unwrap_or_revert(&self.env());
        let payout_motes = Motes::from_amount(payout).unwrap_or_revert(&self.env());
        if self.env().self_balance() < payout_motes {
            self.env().revert(LstError::InsufficientModuleBalance);
        }

        token.burn(caller, receipt_amount);
        if !fee.is_zero() {
            token.mint(params.fee_address, fee);
        }
        self.env().transfer_tokens(&caller, &payout_motes);
        self.ensure_consistent();

        self.env().emit_event(Redeemed {
            delegator: caller,
            burned: receipt_amount,
            fee,
            amount: payout,
            timestamp: self.env().get_block_time(),
        });
        payout
    }

    /// Pay out every unclaimed redemption of the caller in a completed epoch
    ///
    /// # Returns
    /// Amount transferred to the caller
    pub fn claim_unbonded(&mut self) -> U256 {
        let caller = self.env().caller();
        let (amount, entries) = self.engine.claim(caller).unwrap_or_revert(&self.env());

        let payout = Motes::from_amount(amount).unwrap_or_revert(&self.env());
        if self.env().self_balance() < payout {
            self.env().revert(LstError::InsufficientModuleBalance);
        }
        self.env().transfer_tokens(&caller, &payout);

        self.env().emit_event(Claimed {
            delegator: caller,
            amount,
            entries,
            timestamp: self.env().get_block_time(),
        });
        amount
    }

    // ========================================
    // Cross-chain callbacks
    // ========================================

    /// Acknowledgement of a dispatch (controller only)
    ///
    /// Each dispatch id is consumed once; unknown, duplicate and late
    /// acknowledgements are ignored.
    pub fn on_ack(&mut self, dispatch_id: u64, outcome: AckOutcome, completion_time: u64) {
        self.only_controller();
        let now = self.env().get_block_time();

        let Some(record) = self.adapter.pending(dispatch_id) else {
            self.env().emit_event(AckIgnored {
                dispatch_id,
                timestamp: now,
            });
            return;
        };
        self.settle_dispatch(record, outcome, completion_time, now)
            .unwrap_or_revert(&self.env());
        self.ensure_consistent();
    }

    /// Restake rewards collected on the host chain (controller or admin)
    ///
    /// The attached amount is the confirmed reward. The restake fee is minted
    /// to the fee address as receipt tokens; the reward itself is delegated.
    #[odra(payable)]
    pub fn on_rewards_confirmed(&mut self) {
        let caller = self.env().caller();
        let controller = self.adapter.controller();
        if Some(caller) != controller && caller != self.get_admin() {
            self.env().revert(LstError::Unauthorized);
        }
        let rewards = Motes::to_amount(self.env().attached_value()).unwrap_or_revert(&self.env());
        if rewards.is_zero() {
            self.env().revert(LstError::InvalidAmount);
        }
        if self.ledger.total_supply().is_zero() {
            self.env().revert(LstError::ExchangeRateError);
        }

        let params = self.params();
        let old_c_value = self.ledger.c_value();
        let fee_shares = self.process_rewards(rewards, &params).unwrap_or_revert(&self.env());
        let new_c_value = self.ledger.c_value();
        if new_c_value < old_c_value {
            self.env().revert(LstError::InvariantViolation);
        }

        if !fee_shares.is_zero() {
            let mut token = StakeTokenContractRef::new(self.env(), self.token_address());
            token.mint(params.fee_address, fee_shares);
        }
        self.ensure_consistent();

        self.env().emit_event(CValueUpdated {
            old_c_value,
            new_c_value,
            rewards,
            fee_shares,
            timestamp: self.env().get_block_time(),
        });
    }

    /// Apply slashing reported by the host chain
    ///
    /// Only validators without operations in flight are compared; a remote
    /// delegation below the local record is the slashed amount. A slash larger
    /// than the staked pool is recorded as a deficit instead of reverting.
    ///
    /// # Returns
    /// Total amount slashed
    pub fn reconcile_validator_set(&mut self) -> U256 {
        let slashed = self.process_reconcile().unwrap_or_revert(&self.env());
        self.ensure_consistent();
        slashed
    }

    /// Per-block lifecycle crank (permissionless)
    ///
    /// Runs at most once per block time. Every step is isolated: a failing
    /// step emits `LifecycleStepFailed` and the next one still runs.
    pub fn tick(&mut self) {
        let now = self.env().get_block_time();
        if self.last_tick.get() == Some(now) {
            return;
        }
        self.last_tick.set(now);

        let result = self.rebalance_step(now);
        self.report("rebalance", result, now);
        let result = self.close_epoch_step(now);
        self.report("close_epoch", result, now);
        let result = self.mature_epochs_step(now);
        self.report("mature_epochs", result, now);
        let result = self.expire_dispatches_step(now);
        self.report("expire_dispatches", result, now);
        let result = self.retry_unbondings_step(now);
        self.report("retry_unbondings", result, now);
        let result = self.accounting_check();
        self.report("accounting", result, now);
    }

    // ========================================
    // Admin functions
    // ========================================

    /// Add a validator to the allow-list, or reactivate a delisted one
    pub fn add_validator(&mut self, validator: Address, target_weight: u32) {
        self.only_admin();
        self.tracker
            .add(validator, target_weight)
            .unwrap_or_revert(&self.env());

        self.env().emit_event(ValidatorAdded {
            validator,
            target_weight,
            added_by: self.env().caller(),
        });
    }

    /// Change the target weight of a listed validator
    ///
    /// # Arguments
    /// * `validator` - Operator address
    /// * `weight` - New relative weight, positive
    pub fn set_validator_weight(&mut self, validator: Address, weight: u32) {
        self.only_admin();
        let old_weight = self
            .tracker
            .set_weight(validator, weight)
            .unwrap_or_revert(&self.env());

        self.env().emit_event(ValidatorWeightUpdated {
            validator,
            old_weight,
            new_weight: weight,
        });
    }

    /// Delist a validator; one still holding stake is drained first
    pub fn remove_validator(&mut self, validator: Address) {
        self.only_admin();
        let timestamp = self.env().get_block_time();
        match self.tracker.delist(validator).unwrap_or_revert(&self.env()) {
            Delisting::Removed => self.env().emit_event(ValidatorRemoved {
                validator,
                timestamp,
            }),
            Delisting::Deactivated(remaining) => self.env().emit_event(ValidatorDeactivated {
                validator,
                remaining,
                timestamp,
            }),
        }
    }

    /// Replace the protocol parameters after validating them
    pub fn update_params(&mut self, params: Params) {
        self.only_admin();
        if let Err(error) = Self::validate_params(&params) {
            self.env().revert(error);
        }
        self.params.set(params);

        self.env().emit_event(ParamsUpdated {
            updated_by: self.env().caller(),
            timestamp: self.env().get_block_time(),
        });
    }

    /// Replace the host chain configuration
    pub fn update_host_chain(&mut self, host_chain: HostChain) {
        self.only_admin();
        if host_chain.connection_id.is_empty() || host_chain.epoch_identifier.is_empty() {
            self.env().revert(LstError::InvalidParams);
        }
        self.host_chain.set(host_chain);
    }

    /// Give an exhausted undelegation a fresh retry budget and dispatch it again
    ///
    /// # Returns
    /// Dispatch id of the new attempt
    pub fn resubmit_exhausted_unbonding(&mut self, epoch_number: u64, validator: Address) -> u64 {
        self.only_admin();
        let dispatch_id = self
            .process_resubmit(epoch_number, validator)
            .unwrap_or_revert(&self.env());
        self.ensure_consistent();
        dispatch_id
    }

    /// Pause staking and unstaking
    pub fn pause(&mut self) {
        self.only_admin();
        self.paused.set(true);

        let admin = self.get_admin();
        let timestamp = self.env().get_block_time();
        self.env().emit_event(ContractPaused {
            paused_by: admin,
            timestamp,
        });
    }

    /// Resume staking and unstaking
    pub fn unpause(&mut self) {
        self.only_admin();
        self.paused.set(false);

        let admin = self.get_admin();
        let timestamp = self.env().get_block_time();
        self.env().emit_event(ContractUnpaused {
            unpaused_by: admin,
            timestamp,
        });
    }

    /// Transfer admin rights
    pub fn transfer_admin(&mut self, new_admin: Address) {
        self.only_admin();
        self.admin.set(new_admin);
    }

    // ========================================
    // Queries
    // ========================================

    /// Staked units per receipt token, scaled by 1e18
    pub fn c_value(&self) -> U256 {
        self.ledger.c_value()
    }

    /// Get the aggregate pool state
    pub fn module_state(&self) -> ModuleState {
        ModuleState {
            total_staked: self.ledger.total_staked(),
            total_supply: self.ledger.total_supply(),
            c_value: self.ledger.c_value(),
            idle_deposits: self.ledger.idle_deposits(),
            queued_unbonding: self.ledger.queued_unbonding(),
            slash_deficit: self.ledger.slash_deficit(),
            in_transit: self.in_transit_amount(),
            open_epoch: self.engine.open_epoch(),
            paused: self.is_paused(),
        }
    }

    /// Get the protocol parameters
    pub fn params(&self) -> Params {
        self.params.get_or_revert_with(LstError::InvalidParams)
    }

    /// Get the host chain configuration
    pub fn host_chain(&self) -> HostChain {
        self.host_chain.get_or_revert_with(LstError::InvalidParams)
    }

    /// Get the interchain accounts on the host chain
    pub fn host_accounts(&self) -> HostAccounts {
        let host_chain = self.host_chain();
        HostAccounts {
            delegation_account: host_chain.delegation_account,
            rewards_account: host_chain.rewards_account,
        }
    }

    /// Get every listed validator, Inactive ones included
    pub fn allow_listed_validators(&self) -> Vec<LiquidValidator> {
        self.tracker.validators()
    }

    /// Get the record of a listed validator
    pub fn validator(&self, validator: Address) -> Option<LiquidValidator> {
        self.tracker.validator(validator)
    }

    /// Get delegation totals with the per-validator records
    pub fn delegation_state(&self) -> DelegationState {
        let (total_delegated, total_pending_delegation, total_pending_undelegation) =
            self.tracker.totals().unwrap_or_revert(&self.env());
        DelegationState {
            total_delegated,
            total_pending_delegation,
            total_pending_undelegation,
            validators: self.tracker.validators(),
        }
    }

    /// Stake on its way to the host chain, not yet confirmed as delegated
    pub fn in_transit_amount(&self) -> U256 {
        let (_, pending_delegation, _) = self.tracker.totals().unwrap_or_revert(&self.env());
        pending_delegation
    }

    /// Native balance held by the pool
    pub fn deposit_account_balance(&self) -> U512 {
        self.env().self_balance()
    }

    /// Get the epoch currently collecting redemptions
    pub fn open_epoch(&self) -> u64 {
        self.engine.open_epoch()
    }

    /// Get an unbonding epoch record
    pub fn unbonding_epoch(&self, epoch_number: u64) -> Option<UnbondingEpoch> {
        self.engine.epoch(epoch_number)
    }

    /// Undelegations performed by the host account for an epoch
    pub fn host_account_undelegation(&self, epoch_number: u64) -> Vec<ValidatorUnbonding> {
        self.engine.validator_unbondings(epoch_number)
    }

    /// Get the redemption of a delegator in one epoch
    ///
    /// # Arguments
    /// * `delegator` - Address that unstaked
    /// * `epoch_number` - Epoch the redemption was queued into
    pub fn delegator_unbonding_epoch_entry(
        &self,
        delegator: Address,
        epoch_number: u64,
    ) -> Option<UserUnbonding> {
        self.engine.user_unbonding(epoch_number, delegator)
    }

    /// Get every redemption of a delegator, claimed ones included
    pub fn delegator_unbonding_epoch_entries(&self, delegator: Address) -> Vec<UserUnbonding> {
        self.engine.user_unbondings(delegator)
    }

    /// Redemptions ready to be claimed
    pub fn unclaimed(&self, delegator: Address) -> Vec<UserUnbonding> {
        self.engine
            .entries_with_status(delegator, &[EpochStatus::Completed])
    }

    /// Redemptions whose epoch is still open or unbonding
    pub fn pending_unbondings(&self, delegator: Address) -> Vec<UserUnbonding> {
        self.engine
            .entries_with_status(delegator, &[EpochStatus::Open, EpochStatus::Submitted])
    }

    /// Redemptions stuck in a failed epoch
    pub fn failed_unbondings(&self, delegator: Address) -> Vec<UserUnbonding> {
        self.engine
            .entries_with_status(delegator, &[EpochStatus::Failed])
    }

    /// Get undelegations awaiting a retry or an operator
    pub fn failed_validator_unbondings(&self) -> Vec<FailedUnbonding> {
        self.adapter.failures()
    }

    /// Get a dispatch still awaiting its acknowledgement
    pub fn pending_dispatch(&self, dispatch_id: u64) -> Option<PendingDispatch> {
        self.adapter.pending(dispatch_id)
    }

    /// Get every dispatch awaiting an acknowledgement
    pub fn pending_dispatches(&self) -> Vec<PendingDispatch> {
        self.adapter.pending_dispatches()
    }

    /// Receipt tokens `amount` would mint right now, after the deposit fee
    pub fn preview_stake(&self, amount: U256) -> U256 {
        let params = self.params();
        let fee = StakeMath::fee_of(amount, params.deposit_fee_bps).unwrap_or_revert(&self.env());
        self.ledger
            .preview_mint(amount - fee)
            .unwrap_or_revert(&self.env())
    }

    /// Amount `receipt_amount` would make claimable right now, after the unstake fee
    pub fn preview_unstake(&self, receipt_amount: U256) -> U256 {
        let params = self.params();
        let fee = StakeMath::fee_of(receipt_amount, params.unstake_fee_bps)
            .unwrap_or_revert(&self.env());
        self.ledger
            .preview_payout(receipt_amount - fee)
            .unwrap_or_revert(&self.env())
    }

    /// Amount `receipt_amount` would pay out of idle deposits right now, after the redeem fee
    pub fn preview_redeem(&self, receipt_amount: U256) -> U256 {
        let params = self.params();
        let fee = StakeMath::fee_of(receipt_amount, params.redeem_fee_bps)
            .unwrap_or_revert(&self.env());
        self.ledger
            .preview_payout(receipt_amount - fee)
            .unwrap_or_revert(&self.env())
    }

    /// Slashed stake not yet repaid by rewards
    pub fn slash_deficit(&self) -> U256 {
        self.ledger.slash_deficit()
    }

    /// Whether pool accounting matches the delegation state
    pub fn accounting_consistent(&self) -> bool {
        self.accounting_check().is_ok()
    }

    /// Get the receipt token address
    pub fn token_address(&self) -> Address {
        self.token.get_or_revert_with(LstError::InvalidParams)
    }

    /// Get the admin address
    pub fn get_admin(&self) -> Address {
        self.admin.get_or_revert_with(LstError::Unauthorized)
    }

    /// Check if staking and unstaking are paused
    pub fn is_paused(&self) -> bool {
        self.paused.get_or_default()
    }
}

impl LiquidStaking {
    fn process_stake(&mut self, amount: U256, params: &Params) -> Result<(U256, U256), LstError> {
        let fee = StakeMath::fee_of(amount, params.deposit_fee_bps)?;
        let net = SafeMath::sub(amount, fee)?;
        let minted = self.ledger.preview_mint(net)?;
        if minted.is_zero() {
            return Err(LstError::InvalidAmount);
        }
        self.ledger.record_stake(net, minted)?;
        self.delegate(net)?;
        Ok((fee, minted))
    }

    fn process_unstake(
        &mut self,
        delegator: Address,
        receipt_amount: U256,
        params: &Params,
    ) -> Result<(U256, U256, u64), LstError> {
        let fee = StakeMath::fee_of(receipt_amount, params.unstake_fee_bps)?;
        let net = SafeMath::sub(receipt_amount, fee)?;
        let claimable = self.ledger.preview_payout(net)?;
        if claimable.is_zero() {
            return Err(LstError::InvalidAmount);
        }
        self.ledger.record_unstake(net, claimable)?;
        let epoch_number = self.engine.enqueue(delegator, net, claimable)?;
        Ok((fee, claimable, epoch_number))
    }

    fn process_redeem(&mut self, receipt_amount: U256, params: &Params) -> Result<(U256, U256), LstError> {
        let fee = StakeMath::fee_of(receipt_amount, params.redeem_fee_bps)?;
        let net = SafeMath::sub(receipt_amount, fee)?;
        let payout = self.ledger.preview_payout(net)?;
        if payout.is_zero() {
            return Err(LstError::InvalidAmount);
        }
        self.ledger.record_redeem(net, payout)?;
        Ok((fee, payout))
    }

    /// Rewards repay the slash deficit first; only the rest raises the C-value
    fn process_rewards(&mut self, rewards: U256, params: &Params) -> Result<U256, LstError> {
        let repaid = self.ledger.repay_deficit(rewards);
        let restaked = SafeMath::sub(rewards, repaid)?;
        let fee_shares = if restaked.is_zero() {
            U256::zero()
        } else {
            let fee = StakeMath::fee_of(restaked, params.restake_fee_bps)?;
            self.ledger.record_rewards(restaked, fee)?
        };
        if self.tracker.has_active() {
            self.delegate(rewards)?;
        } else {
            self.ledger.add_idle(rewards)?;
        }
        Ok(fee_shares)
    }

    fn process_reconcile(&mut self) -> Result<U256, LstError> {
        let querier = self.validator_querier.get().ok_or(LstError::InvalidParams)?;
        let host_chain = self.host_chain();
        let remote = ValidatorQuerierContractRef::new(self.env(), querier)
            .host_delegations(host_chain.connection_id);
        let now = self.env().get_block_time();

        let mut total_slashed = U256::zero();
        for record in self.tracker.validators() {
            if !record.pending_delegation.is_zero() || !record.pending_undelegation.is_zero() {
                continue;
            }
            let reported = remote
                .iter()
                .find(|delegation| delegation.validator == record.operator)
                .map(|delegation| delegation.amount)
                .unwrap_or_default();
            if reported >= record.delegated_amount {
                continue;
            }
            let slashed = record.delegated_amount - reported;
            self.tracker.apply(record.operator, Movement::Slashed, slashed)?;
            let uncovered = self.ledger.record_slash(slashed)?;
            total_slashed = SafeMath::add(total_slashed, slashed)?;

            self.env().emit_event(Slashed {
                validator: record.operator,
                amount: slashed,
                uncovered,
                new_c_value: self.ledger.c_value(),
                timestamp: now,
            });
        }
        Ok(total_slashed)
    }

    fn process_resubmit(&mut self, epoch_number: u64, validator: Address) -> Result<u64, LstError> {
        self.engine
            .validator_unbonding(epoch_number, validator)
            .ok_or(LstError::UnbondingNotFound)?;
        let failure = self.adapter.reset_exhausted(epoch_number, validator)?;
        let dispatch_id = self.dispatch_undelegation(epoch_number, validator, failure.amount)?;
        self.engine.mark_dispatched(epoch_number, validator, dispatch_id)?;
        Ok(dispatch_id)
    }

    /// Validates an acknowledgement, then consumes the dispatch and applies
    /// it. An acknowledgement that cannot be applied leaves the dispatch
    /// pending and writes nothing.
    fn settle_dispatch(
        &mut self,
        record: PendingDispatch,
        outcome: AckOutcome,
        completion_time: u64,
        now: u64,
    ) -> Result<(), LstError> {
        let movements = Self::movements(&record, outcome == AckOutcome::Success)?;
        self.tracker.check(&movements)?;
        if record.purpose == DispatchPurpose::Undelegation {
            for instruction in record.instructions.iter() {
                self.engine
                    .validator_unbonding(record.epoch_number, instruction.validator)
                    .ok_or(LstError::UnbondingNotFound)?;
            }
        }
        if self.adapter.resolve(record.dispatch_id).is_none() {
            return Err(LstError::InvariantViolation);
        }
        self.apply_ack(record, &movements, outcome, completion_time, now)
    }

    /// Tracker movements that settle a dispatch. A failed undelegation keeps
    /// its marks for the retry.
    fn movements(
        record: &PendingDispatch,
        success: bool,
    ) -> Result<Vec<(Address, Movement, U256)>, LstError> {
        let mut movements = Vec::new();
        for instruction in record.instructions.iter() {
            let (validator, amount) = (instruction.validator, instruction.amount);
            match record.purpose {
                DispatchPurpose::Delegation => {
                    let movement = if success {
                        Movement::Delegated
                    } else {
                        Movement::DelegationCancelled
                    };
                    movements.push((validator, movement, amount));
                }
                DispatchPurpose::Redelegation => {
                    let destination = instruction.destination.ok_or(LstError::InvariantViolation)?;
                    if success {
                        movements.push((validator, Movement::Undelegated, amount));
                        movements.push((destination, Movement::Delegated, amount));
                    } else {
                        movements.push((validator, Movement::UndelegationCancelled, amount));
                        movements.push((destination, Movement::DelegationCancelled, amount));
                    }
                }
                DispatchPurpose::Undelegation => {
                    if success {
                        movements.push((validator, Movement::Undelegated, amount));
                    }
                }
            }
        }
        Ok(movements)
    }

    /// Applies the outcome of a consumed dispatch
    fn apply_ack(
        &mut self,
        record: PendingDispatch,
        movements: &[(Address, Movement, U256)],
        outcome: AckOutcome,
        completion_time: u64,
        now: u64,
    ) -> Result<(), LstError> {
        let purpose_code = record.purpose.clone() as u8;
        self.tracker.settle(movements)?;

        if outcome == AckOutcome::Success {
            match record.purpose {
                DispatchPurpose::Delegation => {}
                DispatchPurpose::Redelegation => self.tracker.set_rebalance_in_flight(false),
                DispatchPurpose::Undelegation => {
                    for instruction in record.instructions.iter() {
                        self.engine
                            .acknowledge(record.epoch_number, instruction.validator, completion_time)?;
                        self.adapter
                            .clear_failure(record.epoch_number, instruction.validator);
                    }
                }
            }
            self.env().emit_event(DispatchAcknowledged {
                dispatch_id: record.dispatch_id,
                purpose: purpose_code,
                timestamp: now,
            });
            return Ok(());
        }

        match record.purpose {
            DispatchPurpose::Delegation => {
                let returned = SafeMath::sum(record.instructions.iter().map(|instruction| instruction.amount))?;
                self.ledger.add_idle(returned)?;
            }
            DispatchPurpose::Redelegation => self.tracker.set_rebalance_in_flight(false),
            DispatchPurpose::Undelegation => {
                let params = self.params();
                for instruction in record.instructions.iter() {
                    let failure = self.adapter.record_failure(
                        record.epoch_number,
                        instruction.validator,
                        instruction.amount,
                        failure_reason(&outcome),
                        params.max_retries,
                        params.retry_backoff,
                    );
                    if failure.state == FailureState::Exhausted {
                        self.engine.set_ack_status(
                            record.epoch_number,
                            instruction.validator,
                            AckStatus::Exhausted,
                        )?;
                        self.env().emit_event(UnbondingExhausted {
                            epoch_number: record.epoch_number,
                            validator: instruction.validator,
                            amount: instruction.amount,
                            retry_count: failure.retry_count,
                            timestamp: now,
                        });
                    } else {
                        self.engine.set_ack_status(
                            record.epoch_number,
                            instruction.validator,
                            AckStatus::Failed,
                        )?;
                        self.env().emit_event(UnbondingRetryScheduled {
                            epoch_number: record.epoch_number,
                            validator: instruction.validator,
                            retry_count: failure.retry_count,
                            next_retry_at: failure.next_retry_at,
                        });
                    }
                }
            }
        }
        self.env().emit_event(DispatchFailed {
            dispatch_id: record.dispatch_id,
            purpose: purpose_code,
            outcome: outcome as u8,
            timestamp: now,
        });
        Ok(())
    }

    /// Splits `amount` over Active validators and dispatches one delegation batch
    fn delegate(&mut self, amount: U256) -> Result<(), LstError> {
        let allocation = self.tracker.allocate(amount)?;
        let mut movements = Vec::with_capacity(allocation.len());
        let mut instructions = Vec::with_capacity(allocation.len());
        for (validator, share) in allocation {
            movements.push((validator, Movement::Delegating, share));
            instructions.push(HostInstruction {
                action: HostAction::Delegate,
                validator,
                destination: None,
                amount: share,
            });
        }
        self.tracker.check(&movements)?;
        self.dispatch(DispatchPurpose::Delegation, instructions, 0)?;
        self.tracker.settle(&movements)
    }

    fn dispatch_undelegation(
        &mut self,
        epoch_number: u64,
        validator: Address,
        amount: U256,
    ) -> Result<u64, LstError> {
        let instruction = HostInstruction {
            action: HostAction::Undelegate,
            validator,
            destination: None,
            amount,
        };
        let record = self.dispatch(DispatchPurpose::Undelegation, vec![instruction], epoch_number)?;
        Ok(record.dispatch_id)
    }

    fn dispatch(
        &mut self,
        purpose: DispatchPurpose,
        instructions: Vec<HostInstruction>,
        epoch_number: u64,
    ) -> Result<PendingDispatch, LstError> {
        let params = self.params();
        let host_chain = self.host_chain();
        let amount = SafeMath::sum(instructions.iter().map(|instruction| instruction.amount))?;
        let purpose_code = purpose.clone() as u8;
        let record = self.adapter.dispatch(
            purpose,
            instructions,
            epoch_number,
            host_chain.connection_id,
            params.ack_timeout,
        )?;

        self.env().emit_event(DispatchSubmitted {
            dispatch_id: record.dispatch_id,
            purpose: purpose_code,
            amount,
            deadline: record.deadline,
        });
        Ok(record)
    }

    /// Delegates idle deposits, deletes drained validators and dispatches a
    /// redelegation batch when no other one is in flight.
    fn rebalance_step(&mut self, now: u64) -> Result<(), LstError> {
        let idle = self.ledger.idle_deposits();
        if !idle.is_zero() && self.tracker.has_active() {
            self.delegate(idle)?;
            self.ledger.take_idle();
        }

        for validator in self.tracker.finalize_removals() {
            self.env().emit_event(ValidatorRemoved {
                validator,
                timestamp: now,
            });
        }

        if self.tracker.rebalance_in_flight() {
            return Ok(());
        }
        let params = self.params();
        let entries = self.tracker.rebalance_entries()?;
        let plan = plan_redelegations(&entries, params.rebalance_threshold_bps)?;
        if plan.is_empty() {
            return Ok(());
        }

        let mut movements = Vec::with_capacity(plan.len() * 2);
        let mut instructions = Vec::with_capacity(plan.len());
        for redelegation in plan.iter() {
            movements.push((redelegation.source, Movement::Undelegating, redelegation.amount));
            movements.push((redelegation.destination, Movement::Delegating, redelegation.amount));
            instructions.push(HostInstruction {
                action: HostAction::Redelegate,
                validator: redelegation.source,
                destination: Some(redelegation.destination),
                amount: redelegation.amount,
            });
        }
        self.tracker.check(&movements)?;
        let record = self.dispatch(DispatchPurpose::Redelegation, instructions, 0)?;
        self.tracker.settle(&movements)?;
        self.tracker.set_rebalance_in_flight(true);

        let amount = SafeMath::sum(plan.iter().map(|redelegation| redelegation.amount))?;
        self.env().emit_event(Rebalanced {
            dispatch_id: record.dispatch_id,
            redelegations: plan.len() as u32,
            amount,
            timestamp: now,
        });
        Ok(())
    }

    /// On a host epoch boundary, splits the open epoch across validators and
    /// dispatches one undelegation per validator. While confirmed stake
    /// cannot cover the epoch it stays open and collects further redemptions.
    fn close_epoch_step(&mut self, now: u64) -> Result<(), LstError> {
        let source = self.epoch_source.get().ok_or(LstError::InvalidParams)?;
        let identifier = self.host_chain().epoch_identifier;
        let info = EpochSourceContractRef::new(self.env(), source).epoch_info(identifier);
        if !self.engine.boundary_reached(info.current_epoch)? {
            return Ok(());
        }

        let closing = self.engine.open_epoch();
        let Some(open) = self.engine.epoch(closing) else {
            self.engine.close(info.current_epoch);
            return Ok(());
        };
        let required = open.total_unbonding_amount;
        let Some(split) = self.tracker.undelegation_split(required)? else {
            self.env().emit_event(EpochDeferred {
                epoch_number: closing,
                required,
                available: self.tracker.undelegable_total()?,
                timestamp: now,
            });
            return Ok(());
        };
        if self.ledger.queued_unbonding() < required {
            return Err(LstError::InvariantViolation);
        }
        let movements: Vec<(Address, Movement, U256)> = split
            .iter()
            .map(|(validator, amount)| (*validator, Movement::Undelegating, *amount))
            .collect();
        self.tracker.check(&movements)?;

        let Some(closed) = self.engine.close(info.current_epoch) else {
            return Ok(());
        };
        self.ledger.release_queued_unbonding(closed.total_unbonding_amount)?;
        self.tracker.settle(&movements)?;

        for (validator, amount) in split.iter() {
            self.engine.assign(closing, *validator, *amount);
            let dispatch_id = self.dispatch_undelegation(closing, *validator, *amount)?;
            self.engine.mark_dispatched(closing, *validator, dispatch_id)?;
        }

        self.env().emit_event(EpochSubmitted {
            epoch_number: closing,
            total_unbonding_amount: closed.total_unbonding_amount,
            validators: split.len() as u32,
            timestamp: now,
        });
        Ok(())
    }

    fn mature_epochs_step(&mut self, now: u64) -> Result<(), LstError> {
        for record in self.engine.mature(now)? {
            match record.status {
                EpochStatus::Completed => self.env().emit_event(EpochCompleted {
                    epoch_number: record.epoch_number,
                    completion_time: record.completion_time,
                }),
                EpochStatus::Failed => self.env().emit_event(EpochFailed {
                    epoch_number: record.epoch_number,
                    timestamp: now,
                }),
                _ => {}
            }
        }
        Ok(())
    }

    /// Dispatches past their deadline take the timeout path. One that cannot
    /// be settled stays pending and does not hold back the others.
    fn expire_dispatches_step(&mut self, now: u64) -> Result<(), LstError> {
        let mut first_error = None;
        for dispatch_id in self.adapter.expired(now) {
            let Some(record) = self.adapter.pending(dispatch_id) else {
                continue;
            };
            if let Err(error) = self.settle_dispatch(record, AckOutcome::Timeout, 0, now) {
                first_error.get_or_insert(error);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    fn retry_unbondings_step(&mut self, now: u64) -> Result<(), LstError> {
        let mut first_error = None;
        for failure in self.adapter.due_retries(now) {
            if let Err(error) = self.retry_unbonding(&failure) {
                first_error.get_or_insert(error);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    fn retry_unbonding(&mut self, failure: &FailedUnbonding) -> Result<(), LstError> {
        self.engine
            .validator_unbonding(failure.epoch_number, failure.validator)
            .ok_or(LstError::UnbondingNotFound)?;
        let dispatch_id =
            self.dispatch_undelegation(failure.epoch_number, failure.validator, failure.amount)?;
        self.engine
            .mark_dispatched(failure.epoch_number, failure.validator, dispatch_id)?;
        self.adapter
            .mark_retrying(failure.epoch_number, failure.validator)
    }

    /// `Σ(delegated + pending delegation) + idle + deficit == staked + queued + Σ pending undelegation`
    fn accounting_check(&self) -> Result<(), LstError> {
        let (delegated, pending_delegation, pending_undelegation) = self.tracker.totals()?;
        let held = SafeMath::sum([
            delegated,
            pending_delegation,
            self.ledger.idle_deposits(),
            self.ledger.slash_deficit(),
        ])?;
        let owed = SafeMath::sum([
            self.ledger.total_staked(),
            self.ledger.queued_unbonding(),
            pending_undelegation,
        ])?;
        if held != owed {
            return Err(LstError::InvariantViolation);
        }
        Ok(())
    }

    fn report(&self, step: &str, result: Result<(), LstError>, now: u64) {
        if let Err(error) = result {
            self.env().emit_event(LifecycleStepFailed {
                step: String::from(step),
                error_code: error as u16,
                timestamp: now,
            });
        }
    }

    fn validate_params(params: &Params) -> Result<(), LstError> {
        let fees = [
            params.deposit_fee_bps,
            params.restake_fee_bps,
            params.unstake_fee_bps,
            params.redeem_fee_bps,
            params.rebalance_threshold_bps,
        ];
        if fees.iter().any(|bps| *bps > BPS_DENOMINATOR) {
            return Err(LstError::InvalidParams);
        }
        if params.max_retries == 0 || params.ack_timeout == 0 {
            return Err(LstError::InvalidParams);
        }
        Ok(())
    }

    fn ensure_consistent(&self) {
        if let Err(error) = self.accounting_check() {
            self.env().revert(error);
        }
    }

    fn only_admin(&self) {
        let caller = self.env().caller();
        if caller != self.get_admin() {
            self.env().revert(LstError::Unauthorized);
        }
    }

    fn only_controller(&self) {
        let caller = self.env().caller();
        if Some(caller) != self.adapter.controller() {
            self.env().revert(LstError::Unauthorized);
        }
    }

    fn ensure_not_paused(&self) {
        if self.paused.get_or_default() {
            self.env().revert(LstError::ContractPaused);
        }
    }
}
