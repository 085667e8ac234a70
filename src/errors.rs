//! Error definitions shared by the token contracts
use odra::prelude::*;

/// Custom errors for the receipt token contract
#[odra::odra_error]
pub enum TokenError {
    /// Insufficient allowance for transfer
    InsufficientAllowance = 100,

    /// Insufficient balance for operation
    InsufficientBalance = 101,

    /// Caller is neither the minter nor the admin
    Unauthorized = 102,

    /// Minter has not been configured yet
    MinterNotSet = 103,
}
