//! Cross-chain reconciliation adapter
//!
//! Submits staking instructions to the interchain-account controller and
//! remembers every dispatch until it is acknowledged or expires. A dispatch id
//! is consumed exactly once. Failed undelegations are kept here with their
//! retry budget and backoff schedule.

use odra::prelude::*;
use odra::casper_types::U256;
use odra::ContractRef;
use super::errors::LstError;
use super::types::{
    AckOutcome, DispatchPurpose, DispatchStatus, EpochInfo, FailedUnbonding, FailureReason,
    FailureState, HostInstruction, PendingDispatch, RemoteDelegation,
};
use crate::math::retry_backoff;

/// Interchain-account controller; acknowledges through [`IcaCallback`]
#[odra::external_contract]
pub trait IcaController {
    fn submit_tx(&mut self, connection_id: String, instructions: Vec<HostInstruction>, timeout: u64) -> u64;
}

/// Entry point the controller calls once a dispatch settles
#[odra::external_contract]
pub trait IcaCallback {
    fn on_ack(&mut self, dispatch_id: u64, outcome: AckOutcome, completion_time: u64);
}

/// Host epoch clock
#[odra::external_contract]
pub trait EpochSource {
    fn epoch_info(&self, identifier: String) -> EpochInfo;
}

/// Delegations of the host account as recorded by the host chain
#[odra::external_contract]
pub trait ValidatorQuerier {
    fn host_delegations(&self, connection_id: String) -> Vec<RemoteDelegation>;
}

#[odra::module]
pub struct IcaAdapter {
    /// Interchain-account controller contract
    controller: Var<Address>,
    /// Dispatch records: dispatch id -> record
    dispatches: Mapping<u64, PendingDispatch>,
    /// Dispatches awaiting an acknowledgement
    pending_ids: Var<Vec<u64>>,
    /// Failed undelegations: (epoch, validator) -> record
    failures: Mapping<(u64, Address), FailedUnbonding>,
    /// Keys of unresolved failures
    failure_keys: Var<Vec<(u64, Address)>>,
}

#[odra::module]
impl IcaAdapter {
    pub fn controller(&self) -> Option<Address> {
        self.controller.get()
    }

    pub fn dispatch_record(&self, dispatch_id: u64) -> Option<PendingDispatch> {
        self.dispatches.get(&dispatch_id)
    }

    /// Dispatch still awaiting its acknowledgement
    pub fn pending(&self, dispatch_id: u64) -> Option<PendingDispatch> {
        self.dispatches
            .get(&dispatch_id)
            .filter(|record| record.status == DispatchStatus::Pending)
    }

    pub fn pending_dispatches(&self) -> Vec<PendingDispatch> {
        self.pending_ids
            .get_or_default()
            .into_iter()
            .filter_map(|id| self.dispatches.get(&id))
            .collect()
    }

    pub fn failure(&self, epoch_number: u64, validator: Address) -> Option<FailedUnbonding> {
        if !self.failure_keys.get_or_default().contains(&(epoch_number, validator)) {
            return None;
        }
        self.failures.get(&(epoch_number, validator))
    }

    pub fn failures(&self) -> Vec<FailedUnbonding> {
        self.failure_keys
            .get_or_default()
            .into_iter()
            .filter_map(|key| self.failures.get(&key))
            .collect()
    }
}

impl IcaAdapter {
    pub fn set_controller(&mut self, controller: Address) {
        self.controller.set(controller);
    }

    /// Submits a batch and records it with a deadline of `now + ack_timeout`
    pub fn dispatch(
        &mut self,
        purpose: DispatchPurpose,
        instructions: Vec<HostInstruction>,
        epoch_number: u64,
        connection_id: String,
        ack_timeout: u64,
    ) -> Result<PendingDispatch, LstError> {
        let controller = self.controller.get().ok_or(LstError::InvalidParams)?;
        let now = self.env().get_block_time();
        let mut ica = IcaControllerContractRef::new(self.env(), controller);
        let dispatch_id = ica.submit_tx(connection_id, instructions.clone(), ack_timeout);
        if self.dispatches.get(&dispatch_id).is_some() {
            return Err(LstError::DuplicateDispatch);
        }

        let record = PendingDispatch {
            dispatch_id,
            purpose,
            instructions,
            epoch_number,
            submitted_at: now,
            deadline: now.saturating_add(ack_timeout),
            status: DispatchStatus::Pending,
        };
        self.dispatches.set(&dispatch_id, record.clone());
        let mut pending = self.pending_ids.get_or_default();
        pending.push(dispatch_id);
        self.pending_ids.set(pending);
        Ok(record)
    }

    /// Consumes a pending dispatch. Unknown and already resolved ids yield None.
    pub fn resolve(&mut self, dispatch_id: u64) -> Option<PendingDispatch> {
        let mut record = self.pending(dispatch_id)?;
        record.status = DispatchStatus::Resolved;
        self.dispatches.set(&dispatch_id, record.clone());
        let mut pending = self.pending_ids.get_or_default();
        pending.retain(|id| *id != dispatch_id);
        self.pending_ids.set(pending);
        Some(record)
    }

    /// Pending dispatches whose deadline has passed
    pub fn expired(&self, now: u64) -> Vec<u64> {
        self.pending_dispatches()
            .into_iter()
            .filter(|record| now > record.deadline)
            .map(|record| record.dispatch_id)
            .collect()
    }

    /// Counts a failed attempt. Reaching `max_retries` makes the failure
    /// terminal; otherwise the next attempt waits out the backoff.
    pub fn record_failure(
        &mut self,
        epoch_number: u64,
        validator: Address,
        amount: U256,
        reason: FailureReason,
        max_retries: u32,
        backoff: u64,
    ) -> FailedUnbonding {
        let now = self.env().get_block_time();
        let key = (epoch_number, validator);
        let retry_count = self
            .failure(epoch_number, validator)
            .map(|failure| failure.retry_count)
            .unwrap_or_default()
            .saturating_add(1);

        let (state, next_retry_at) = if retry_count >= max_retries {
            (FailureState::Exhausted, 0)
        } else {
            (
                FailureState::AwaitingRetry,
                now.saturating_add(retry_backoff(backoff, retry_count)),
            )
        };
        let failure = FailedUnbonding {
            epoch_number,
            validator,
            amount,
            retry_count,
            reason,
            failed_at: now,
            next_retry_at,
            state,
        };
        self.failures.set(&key, failure.clone());

        let mut keys = self.failure_keys.get_or_default();
        if !keys.contains(&key) {
            keys.push(key);
            self.failure_keys.set(keys);
        }
        failure
    }

    /// Failures whose backoff has elapsed
    pub fn due_retries(&self, now: u64) -> Vec<FailedUnbonding> {
        self.failures()
            .into_iter()
            .filter(|failure| failure.state == FailureState::AwaitingRetry && failure.next_retry_at <= now)
            .collect()
    }

    pub fn mark_retrying(&mut self, epoch_number: u64, validator: Address) -> Result<(), LstError> {
        let mut failure = self
            .failure(epoch_number, validator)
            .ok_or(LstError::UnbondingNotFound)?;
        failure.state = FailureState::Retrying;
        self.failures.set(&(epoch_number, validator), failure);
        Ok(())
    }

    /// Operator override: a fresh retry budget for an exhausted undelegation
    pub fn reset_exhausted(&mut self, epoch_number: u64, validator: Address) -> Result<FailedUnbonding, LstError> {
        let mut failure = self
            .failure(epoch_number, validator)
            .ok_or(LstError::UnbondingNotFound)?;
        if failure.state != FailureState::Exhausted {
            return Err(LstError::UnbondingNotExhausted);
        }
        failure.retry_count = 0;
        failure.state = FailureState::Retrying;
        self.failures.set(&(epoch_number, validator), failure.clone());
        Ok(failure)
    }

    /// Drops the failure record once the undelegation is acknowledged
    pub fn clear_failure(&mut self, epoch_number: u64, validator: Address) {
        let mut keys = self.failure_keys.get_or_default();
        let before = keys.len();
        keys.retain(|key| *key != (epoch_number, validator));
        if keys.len() != before {
            self.failure_keys.set(keys);
        }
    }
}

/// Failure reason recorded for an unsuccessful acknowledgement
pub fn failure_reason(outcome: &AckOutcome) -> FailureReason {
    match outcome {
        AckOutcome::Timeout => FailureReason::Timeout,
        _ => FailureReason::RemoteRejected,
    }
}
