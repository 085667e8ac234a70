//! Delegation state tracker
//!
//! Keeps the validator allow-list and, per validator, the delegation confirmed
//! by the host chain plus the amounts still in flight in either direction.
//! Allocation of new stake, the split of an epoch's undelegation and the
//! rebalance plan are all derived from these records.

use odra::prelude::*;
use odra::casper_types::U256;
use super::errors::LstError;
use super::types::{LiquidValidator, ValidatorStatus};
use crate::math::{largest_remainder, RebalanceEntry, SafeMath};

/// Outcome of delisting a validator
pub enum Delisting {
    /// Nothing was delegated or in flight; the record is gone
    Removed,
    /// Marked Inactive; removed once the remaining stake has moved away
    Deactivated(U256),
}

/// Bookkeeping change on one validator record
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Movement {
    /// Delegation submitted to the host
    Delegating,
    /// Host confirmed a delegation
    Delegated,
    /// Delegation failed; nothing reached the validator
    DelegationCancelled,
    /// Undelegation or outgoing redelegation submitted
    Undelegating,
    /// Host confirmed the stake left the validator
    Undelegated,
    /// Undelegation or outgoing redelegation failed
    UndelegationCancelled,
    /// Host reports less stake than recorded
    Slashed,
}

impl Movement {
    fn apply(self, record: &mut LiquidValidator, amount: U256) -> Result<(), LstError> {
        match self {
            Movement::Delegating => {
                record.pending_delegation = SafeMath::add(record.pending_delegation, amount)?;
            }
            Movement::Delegated => {
                record.pending_delegation = SafeMath::sub(record.pending_delegation, amount)?;
                record.delegated_amount = SafeMath::add(record.delegated_amount, amount)?;
            }
            Movement::DelegationCancelled => {
                record.pending_delegation = SafeMath::sub(record.pending_delegation, amount)?;
            }
            Movement::Undelegating => {
                // only confirmed stake can leave
                if amount > DelegationTracker::undelegable(record) {
                    return Err(LstError::InvariantViolation);
                }
                record.pending_undelegation = SafeMath::add(record.pending_undelegation, amount)?;
            }
            Movement::Undelegated => {
                record.pending_undelegation = SafeMath::sub(record.pending_undelegation, amount)?;
                record.delegated_amount = SafeMath::sub(record.delegated_amount, amount)?;
            }
            Movement::UndelegationCancelled => {
                record.pending_undelegation = SafeMath::sub(record.pending_undelegation, amount)?;
            }
            Movement::Slashed => {
                record.delegated_amount = SafeMath::sub(record.delegated_amount, amount)?;
            }
        }
        Ok(())
    }
}

#[odra::module]
pub struct DelegationTracker {
    /// Validator records: operator -> record
    validators: Mapping<Address, LiquidValidator>,
    /// Listed operators, in insertion order
    validator_list: Var<Vec<Address>>,
    /// A redelegation batch awaits its acknowledgement
    rebalance_in_flight: Var<bool>,
}

#[odra::module]
impl DelegationTracker {
    /// Record of a listed validator
    pub fn validator(&self, operator: Address) -> Option<LiquidValidator> {
        if !self.is_listed(operator) {
            return None;
        }
        self.validators.get(&operator)
    }

    /// All listed validators
    pub fn validators(&self) -> Vec<LiquidValidator> {
        self.validator_list
            .get_or_default()
            .iter()
            .filter_map(|operator| self.validators.get(operator))
            .collect()
    }

    pub fn is_listed(&self, operator: Address) -> bool {
        self.validator_list.get_or_default().contains(&operator)
    }

    pub fn rebalance_in_flight(&self) -> bool {
        self.rebalance_in_flight.get_or_default()
    }
}

impl DelegationTracker {
    /// Lists a validator or reactivates a delisted one
    pub fn add(&mut self, operator: Address, weight: u32) -> Result<(), LstError> {
        if weight == 0 {
            return Err(LstError::InvalidWeight);
        }
        if let Some(mut record) = self.validator(operator) {
            if record.status == ValidatorStatus::Active {
                return Err(LstError::ValidatorAlreadyListed);
            }
            record.status = ValidatorStatus::Active;
            record.target_weight = weight;
            record.removal_scheduled = false;
            self.validators.set(&operator, record);
            return Ok(());
        }

        self.validators.set(
            &operator,
            LiquidValidator {
                operator,
                status: ValidatorStatus::Active,
                delegated_amount: U256::zero(),
                pending_delegation: U256::zero(),
                pending_undelegation: U256::zero(),
                target_weight: weight,
                removal_scheduled: false,
            },
        );
        let mut list = self.validator_list.get_or_default();
        list.push(operator);
        self.validator_list.set(list);
        Ok(())
    }

    /// Returns the previous weight
    pub fn set_weight(&mut self, operator: Address, weight: u32) -> Result<u32, LstError> {
        if weight == 0 {
            return Err(LstError::InvalidWeight);
        }
        let mut record = self.require(operator)?;
        let old_weight = record.target_weight;
        record.target_weight = weight;
        self.validators.set(&operator, record);
        Ok(old_weight)
    }

    /// First phase of a removal. In-flight delegations cannot be abandoned, so
    /// a validator holding anything is only deactivated here.
    pub fn delist(&mut self, operator: Address) -> Result<Delisting, LstError> {
        let mut record = self.require(operator)?;
        if Self::is_empty(&record) {
            self.unlist(operator);
            return Ok(Delisting::Removed);
        }
        let remaining = Self::effective(&record)?;
        record.status = ValidatorStatus::Inactive;
        record.removal_scheduled = true;
        self.validators.set(&operator, record);
        Ok(Delisting::Deactivated(remaining))
    }

    /// Second phase: deletes scheduled validators that have been drained
    pub fn finalize_removals(&mut self) -> Vec<Address> {
        let removable: Vec<Address> = self
            .validators()
            .into_iter()
            .filter(|record| record.removal_scheduled && Self::is_empty(record))
            .map(|record| record.operator)
            .collect();
        for operator in removable.iter() {
            self.unlist(*operator);
        }
        removable
    }

    /// Largest-remainder split of `amount` over Active validators by target weight
    pub fn allocate(&self, amount: U256) -> Result<Vec<(Address, U256)>, LstError> {
        let weights: Vec<(Address, U256)> = self
            .validators()
            .into_iter()
            .filter(|record| record.status == ValidatorStatus::Active && record.target_weight > 0)
            .map(|record| (record.operator, U256::from(record.target_weight)))
            .collect();
        if weights.is_empty() {
            return Err(LstError::ValidatorSetEmpty);
        }
        Ok(largest_remainder(amount, &weights)?
            .into_iter()
            .filter(|(_, share)| !share.is_zero())
            .collect())
    }

    /// Split of an epoch's redemptions over the stake each validator has
    /// confirmed and not yet committed to another undelegation. Stake still in
    /// transit is never undelegated. Returns None while the confirmed stake
    /// cannot cover `total`.
    pub fn undelegation_split(&self, total: U256) -> Result<Option<Vec<(Address, U256)>>, LstError> {
        let weights: Vec<(Address, U256)> = self
            .validators()
            .iter()
            .map(|record| (record.operator, Self::undelegable(record)))
            .filter(|(_, amount)| !amount.is_zero())
            .collect();
        if self.undelegable_total()? < total {
            return Ok(None);
        }
        Ok(Some(
            largest_remainder(total, &weights)?
                .into_iter()
                .filter(|(_, share)| !share.is_zero())
                .collect(),
        ))
    }

    /// Confirmed stake over the allow-list that no undelegation claims yet
    pub fn undelegable_total(&self) -> Result<U256, LstError> {
        SafeMath::sum(self.validators().iter().map(Self::undelegable))
    }

    /// Planner input; Inactive validators get weight zero so they are drained
    pub fn rebalance_entries(&self) -> Result<Vec<RebalanceEntry>, LstError> {
        let mut entries = Vec::new();
        for record in self.validators() {
            let weight = if record.status == ValidatorStatus::Active {
                U256::from(record.target_weight)
            } else {
                U256::zero()
            };
            entries.push(RebalanceEntry {
                operator: record.operator,
                weight,
                effective: Self::effective(&record)?,
                movable: Self::undelegable(&record),
            });
        }
        Ok(entries)
    }

    /// Applies one movement to a listed validator
    pub fn apply(&mut self, operator: Address, movement: Movement, amount: U256) -> Result<(), LstError> {
        let mut record = self.require(operator)?;
        movement.apply(&mut record, amount)?;
        self.validators.set(&operator, record);
        Ok(())
    }

    /// Applies a batch of movements, or none of them if any would fail
    pub fn settle(&mut self, movements: &[(Address, Movement, U256)]) -> Result<(), LstError> {
        self.check(movements)?;
        for (operator, movement, amount) in movements.iter() {
            self.apply(*operator, *movement, *amount)?;
        }
        Ok(())
    }

    /// Runs a batch of movements on copies of the records
    pub fn check(&self, movements: &[(Address, Movement, U256)]) -> Result<(), LstError> {
        let mut records: Vec<LiquidValidator> = Vec::new();
        for (operator, movement, amount) in movements.iter() {
            let position = match records.iter().position(|record| record.operator == *operator) {
                Some(position) => position,
                None => {
                    records.push(self.require(*operator)?);
                    records.len() - 1
                }
            };
            movement.apply(&mut records[position], *amount)?;
        }
        Ok(())
    }

    pub fn set_rebalance_in_flight(&mut self, in_flight: bool) {
        self.rebalance_in_flight.set(in_flight);
    }

    /// Active validators able to receive stake
    pub fn has_active(&self) -> bool {
        self.validators()
            .iter()
            .any(|record| record.status == ValidatorStatus::Active && record.target_weight > 0)
    }

    /// (delegated, pending delegation, pending undelegation) over the allow-list
    pub fn totals(&self) -> Result<(U256, U256, U256), LstError> {
        let records = self.validators();
        Ok((
            SafeMath::sum(records.iter().map(|r| r.delegated_amount))?,
            SafeMath::sum(records.iter().map(|r| r.pending_delegation))?,
            SafeMath::sum(records.iter().map(|r| r.pending_undelegation))?,
        ))
    }

    /// Delegation counted towards a validator once everything in flight lands
    pub fn effective(record: &LiquidValidator) -> Result<U256, LstError> {
        let gross = SafeMath::add(record.delegated_amount, record.pending_delegation)?;
        gross
            .checked_sub(record.pending_undelegation)
            .ok_or(LstError::InvariantViolation)
    }

    /// Confirmed delegation not already leaving the validator
    pub fn undelegable(record: &LiquidValidator) -> U256 {
        record.delegated_amount.saturating_sub(record.pending_undelegation)
    }

    fn is_empty(record: &LiquidValidator) -> bool {
        record.delegated_amount.is_zero()
            && record.pending_delegation.is_zero()
            && record.pending_undelegation.is_zero()
    }

    fn require(&self, operator: Address) -> Result<LiquidValidator, LstError> {
        self.validator(operator).ok_or(LstError::ValidatorNotFound)
    }

    fn unlist(&mut self, operator: Address) {
        let mut list = self.validator_list.get_or_default();
        list.retain(|listed| *listed != operator);
        self.validator_list.set(list);
    }
}
