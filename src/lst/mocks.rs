//! Stand-ins for the host-chain collaborators used by the contract tests
use odra::prelude::*;
use odra::casper_types::U256;
use odra::ContractRef;
use super::adapter::IcaCallbackContractRef;
use super::types::{AckOutcome, EpochInfo, HostInstruction, RemoteDelegation};

/// Records submitted batches and relays acknowledgements on demand
#[odra::module]
pub struct MockIcaController {
    last_dispatch_id: Var<u64>,
    batches: Mapping<u64, Vec<HostInstruction>>,
    connections: Mapping<u64, String>,
    timeouts: Mapping<u64, u64>,
}

#[odra::module]
impl MockIcaController {
    pub fn submit_tx(&mut self, connection_id: String, instructions: Vec<HostInstruction>, timeout: u64) -> u64 {
        let dispatch_id = self.last_dispatch_id.get_or_default() + 1;
        self.last_dispatch_id.set(dispatch_id);
        self.batches.set(&dispatch_id, instructions);
        self.connections.set(&dispatch_id, connection_id);
        self.timeouts.set(&dispatch_id, timeout);
        dispatch_id
    }

    /// Zero until the first submission
    pub fn last_dispatch_id(&self) -> u64 {
        self.last_dispatch_id.get_or_default()
    }

    pub fn instructions(&self, dispatch_id: u64) -> Vec<HostInstruction> {
        self.batches.get(&dispatch_id).unwrap_or_default()
    }

    pub fn connection(&self, dispatch_id: u64) -> Option<String> {
        self.connections.get(&dispatch_id)
    }

    pub fn relay_ack(&mut self, target: Address, dispatch_id: u64, outcome: AckOutcome, completion_time: u64) {
        let mut callback = IcaCallbackContractRef::new(self.env(), target);
        callback.on_ack(dispatch_id, outcome, completion_time);
    }
}

#[odra::module]
pub struct MockEpochSource {
    epochs: Mapping<String, EpochInfo>,
}

#[odra::module]
impl MockEpochSource {
    pub fn set_epoch(&mut self, identifier: String, current_epoch: u64) {
        let start = self.env().get_block_time();
        self.epochs.set(
            &identifier,
            EpochInfo {
                current_epoch,
                current_epoch_start: start,
                duration: 86_400_000,
            },
        );
    }

    pub fn epoch_info(&self, identifier: String) -> EpochInfo {
        self.epochs.get(&identifier).unwrap_or(EpochInfo {
            current_epoch: 0,
            current_epoch_start: 0,
            duration: 86_400_000,
        })
    }
}

#[odra::module]
pub struct MockValidatorQuerier {
    delegations: Mapping<String, Vec<RemoteDelegation>>,
}

#[odra::module]
impl MockValidatorQuerier {
    pub fn set_delegation(&mut self, connection_id: String, validator: Address, amount: U256) {
        let mut delegations = self.delegations.get(&connection_id).unwrap_or_default();
        delegations.retain(|delegation| delegation.validator != validator);
        delegations.push(RemoteDelegation { validator, amount });
        self.delegations.set(&connection_id, delegations);
    }

    pub fn host_delegations(&self, connection_id: String) -> Vec<RemoteDelegation> {
        self.delegations.get(&connection_id).unwrap_or_default()
    }
}
