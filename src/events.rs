//! Event definitions shared by the token contracts
use odra::prelude::*;
use odra::casper_types::U256;

/// Event emitted when tokens are transferred, minted or burned
#[odra::event]
pub struct Transfer {
    /// From address
    pub from: Address,
    /// To address
    pub to: Address,
    /// Amount transferred
    pub value: U256,
}

/// Event emitted when approval is granted
#[odra::event]
pub struct Approval {
    /// Owner address
    pub owner: Address,
    /// Spender address
    pub spender: Address,
    /// Amount approved
    pub value: U256,
}

/// Event emitted when the minter of a token changes
#[odra::event]
pub struct MinterUpdated {
    /// Previous minter, if any
    pub old_minter: Option<Address>,
    /// New minter
    pub new_minter: Address,
}
