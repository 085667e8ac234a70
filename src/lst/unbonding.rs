//! Unbonding epoch engine
//!
//! Redemptions are batched per host epoch. The open epoch collects user
//! unbondings; on the next boundary it is split into one undelegation per
//! validator and moves to Submitted. Its status afterwards is derived from the
//! validator unbondings it owns.

use odra::prelude::*;
use odra::casper_types::U256;
use super::errors::LstError;
use super::types::{AckStatus, EpochStatus, UnbondingEpoch, UserUnbonding, ValidatorUnbonding};
use crate::math::SafeMath;

#[odra::module]
pub struct UnbondingEngine {
    /// Epoch currently collecting redemptions
    open_epoch: Var<u64>,
    /// Epoch records: epoch -> record
    epochs: Mapping<u64, UnbondingEpoch>,
    /// Validator unbondings: (epoch, validator) -> record
    validator_unbondings: Mapping<(u64, Address), ValidatorUnbonding>,
    /// Validators of a submitted epoch
    epoch_validators: Mapping<u64, Vec<Address>>,
    /// User unbondings: (epoch, delegator) -> record
    user_unbondings: Mapping<(u64, Address), UserUnbonding>,
    /// Epochs a delegator has redeemed in
    delegator_epochs: Mapping<Address, Vec<u64>>,
    /// Submitted or failed epochs not yet completed
    active_epochs: Var<Vec<u64>>,
}

#[odra::module]
impl UnbondingEngine {
    pub fn open_epoch(&self) -> u64 {
        self.open_epoch.get_or_default()
    }

    pub fn epoch(&self, epoch_number: u64) -> Option<UnbondingEpoch> {
        self.epochs.get(&epoch_number)
    }

    pub fn active_epochs(&self) -> Vec<u64> {
        self.active_epochs.get_or_default()
    }

    /// Undelegation of one validator within a submitted epoch
    pub fn validator_unbonding(&self, epoch_number: u64, validator: Address) -> Option<ValidatorUnbonding> {
        self.validator_unbondings.get(&(epoch_number, validator))
    }

    /// Undelegations the host account performs for an epoch
    pub fn validator_unbondings(&self, epoch_number: u64) -> Vec<ValidatorUnbonding> {
        self.epoch_validators
            .get(&epoch_number)
            .unwrap_or_default()
            .into_iter()
            .filter_map(|validator| self.validator_unbondings.get(&(epoch_number, validator)))
            .collect()
    }

    pub fn user_unbonding(&self, epoch_number: u64, delegator: Address) -> Option<UserUnbonding> {
        self.user_unbondings.get(&(epoch_number, delegator))
    }

    /// Every redemption of a delegator, oldest epoch first
    pub fn user_unbondings(&self, delegator: Address) -> Vec<UserUnbonding> {
        self.delegator_epochs
            .get(&delegator)
            .unwrap_or_default()
            .into_iter()
            .filter_map(|epoch_number| self.user_unbondings.get(&(epoch_number, delegator)))
            .collect()
    }
}

impl UnbondingEngine {
    pub fn set_open_epoch(&mut self, epoch_number: u64) {
        self.open_epoch.set(epoch_number);
    }

    /// Adds a redemption to the open epoch and returns its number
    pub fn enqueue(
        &mut self,
        delegator: Address,
        receipt_burned: U256,
        claimable: U256,
    ) -> Result<u64, LstError> {
        let epoch_number = self.open_epoch();
        let mut record = self.epochs.get(&epoch_number).unwrap_or(UnbondingEpoch {
            epoch_number,
            total_unbonding_amount: U256::zero(),
            total_receipt_burned: U256::zero(),
            completion_time: 0,
            status: EpochStatus::Open,
        });
        record.total_unbonding_amount = SafeMath::add(record.total_unbonding_amount, claimable)?;
        record.total_receipt_burned = SafeMath::add(record.total_receipt_burned, receipt_burned)?;

        let entry = match self.user_unbondings.get(&(epoch_number, delegator)) {
            Some(mut entry) => {
                entry.receipt_token_burned = SafeMath::add(entry.receipt_token_burned, receipt_burned)?;
                entry.claimable_amount = SafeMath::add(entry.claimable_amount, claimable)?;
                entry
            }
            None => {
                let mut epochs = self.delegator_epochs.get(&delegator).unwrap_or_default();
                epochs.push(epoch_number);
                self.delegator_epochs.set(&delegator, epochs);
                UserUnbonding {
                    epoch_number,
                    delegator,
                    receipt_token_burned: receipt_burned,
                    claimable_amount: claimable,
                    claimed: false,
                }
            }
        };

        self.epochs.set(&epoch_number, record);
        self.user_unbondings.set(&(epoch_number, delegator), entry);
        Ok(epoch_number)
    }

    /// Whether the host epoch moved past the open one
    pub fn boundary_reached(&self, host_epoch: u64) -> Result<bool, LstError> {
        let open = self.open_epoch();
        if host_epoch < open {
            return Err(LstError::EpochRegression);
        }
        Ok(host_epoch > open)
    }

    /// Closes the open epoch and opens `next_epoch`. Returns the closed record
    /// when it holds redemptions; an empty epoch just rolls over.
    pub fn close(&mut self, next_epoch: u64) -> Option<UnbondingEpoch> {
        let closing = self.open_epoch();
        self.open_epoch.set(next_epoch);

        let mut record = self.epochs.get(&closing)?;
        record.status = EpochStatus::Submitted;
        self.epochs.set(&closing, record.clone());

        let mut active = self.active_epochs();
        active.push(closing);
        self.active_epochs.set(active);
        Some(record)
    }

    /// Registers the share of a submitted epoch undelegated from `validator`
    pub fn assign(&mut self, epoch_number: u64, validator: Address, amount: U256) {
        self.validator_unbondings.set(
            &(epoch_number, validator),
            ValidatorUnbonding {
                epoch_number,
                validator,
                amount,
                ack_status: AckStatus::Pending,
                dispatch_id: 0,
                completion_time: 0,
            },
        );
        let mut validators = self.epoch_validators.get(&epoch_number).unwrap_or_default();
        validators.push(validator);
        self.epoch_validators.set(&epoch_number, validators);
    }

    /// Links an attempt to its dispatch; a resubmitted failed epoch is back in flight
    pub fn mark_dispatched(
        &mut self,
        epoch_number: u64,
        validator: Address,
        dispatch_id: u64,
    ) -> Result<(), LstError> {
        let mut unbonding = self.require(epoch_number, validator)?;
        unbonding.ack_status = AckStatus::Pending;
        unbonding.dispatch_id = dispatch_id;
        self.validator_unbondings.set(&(epoch_number, validator), unbonding);

        let mut record = self.epochs.get(&epoch_number).ok_or(LstError::EpochNotFound)?;
        if record.status == EpochStatus::Failed {
            record.status = EpochStatus::Submitted;
            self.epochs.set(&epoch_number, record);
        }
        Ok(())
    }

    /// The epoch completes no earlier than the latest completion time reported
    pub fn acknowledge(
        &mut self,
        epoch_number: u64,
        validator: Address,
        completion_time: u64,
    ) -> Result<(), LstError> {
        let mut unbonding = self.require(epoch_number, validator)?;
        unbonding.ack_status = AckStatus::Acknowledged;
        unbonding.completion_time = completion_time;
        self.validator_unbondings.set(&(epoch_number, validator), unbonding);

        let mut record = self.epochs.get(&epoch_number).ok_or(LstError::EpochNotFound)?;
        record.completion_time = record.completion_time.max(completion_time);
        self.epochs.set(&epoch_number, record);
        Ok(())
    }

    pub fn set_ack_status(
        &mut self,
        epoch_number: u64,
        validator: Address,
        status: AckStatus,
    ) -> Result<(), LstError> {
        let mut unbonding = self.require(epoch_number, validator)?;
        unbonding.ack_status = status;
        self.validator_unbondings.set(&(epoch_number, validator), unbonding);
        Ok(())
    }

    /// Re-derives the status of every active epoch and returns the transitions
    pub fn mature(&mut self, now: u64) -> Result<Vec<UnbondingEpoch>, LstError> {
        let mut transitions = Vec::new();
        let mut still_active = Vec::new();
        for epoch_number in self.active_epochs() {
            let mut record = self.epochs.get(&epoch_number).ok_or(LstError::EpochNotFound)?;
            let status = self.derive_status(&record, now);
            if status != EpochStatus::Completed {
                still_active.push(epoch_number);
            }
            if status != record.status {
                record.status = status;
                self.epochs.set(&epoch_number, record.clone());
                transitions.push(record);
            }
        }
        self.active_epochs.set(still_active);
        Ok(transitions)
    }

    /// Flags every unclaimed entry of a completed epoch as claimed and returns
    /// the amount owed with the number of entries.
    pub fn claim(&mut self, delegator: Address) -> Result<(U256, u32), LstError> {
        let mut total = U256::zero();
        let mut entries = 0u32;
        for epoch_number in self.delegator_epochs.get(&delegator).unwrap_or_default() {
            let completed = self
                .epochs
                .get(&epoch_number)
                .map(|record| record.status == EpochStatus::Completed)
                .unwrap_or(false);
            if !completed {
                continue;
            }
            let key = (epoch_number, delegator);
            let Some(mut entry) = self.user_unbondings.get(&key) else {
                continue;
            };
            if entry.claimed {
                continue;
            }
            entry.claimed = true;
            total = SafeMath::add(total, entry.claimable_amount)?;
            entries += 1;
            self.user_unbondings.set(&key, entry);
        }
        if entries == 0 {
            return Err(LstError::NothingToClaim);
        }
        Ok((total, entries))
    }

    /// Unclaimed entries of a delegator whose epoch has the given status
    pub fn entries_with_status(&self, delegator: Address, statuses: &[EpochStatus]) -> Vec<UserUnbonding> {
        self.user_unbondings(delegator)
            .into_iter()
            .filter(|entry| !entry.claimed)
            .filter(|entry| {
                self.epochs
                    .get(&entry.epoch_number)
                    .map(|record| statuses.contains(&record.status))
                    .unwrap_or(false)
            })
            .collect()
    }

    /// Pending or awaiting retry keeps the epoch Submitted; otherwise an
    /// exhausted child fails it, and a fully acknowledged epoch completes
    /// once its completion time has passed.
    fn derive_status(&self, record: &UnbondingEpoch, now: u64) -> EpochStatus {
        let children = self.validator_unbondings(record.epoch_number);
        let in_flight = children
            .iter()
            .any(|child| matches!(child.ack_status, AckStatus::Pending | AckStatus::Failed));
        if in_flight {
            return EpochStatus::Submitted;
        }
        if children.iter().any(|child| child.ack_status == AckStatus::Exhausted) {
            return EpochStatus::Failed;
        }
        if now >= record.completion_time {
            EpochStatus::Completed
        } else {
            EpochStatus::Submitted
        }
    }

    fn require(&self, epoch_number: u64, validator: Address) -> Result<ValidatorUnbonding, LstError> {
        self.validator_unbondings
            .get(&(epoch_number, validator))
            .ok_or(LstError::UnbondingNotFound)
    }
}
