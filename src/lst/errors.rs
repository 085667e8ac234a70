//! Error definitions for the liquid staking contracts
use odra::prelude::*;

/// Custom errors for the liquid staking contracts
#[odra::odra_error]
pub enum LstError {
    /// Zero or otherwise unusable amount
    InvalidAmount = 200,

    /// Deposit below the configured minimum
    BelowMinimumDeposit = 201,

    /// Caller holds fewer receipt tokens than requested
    InsufficientReceiptTokens = 202,

    /// No Active validator can receive stake
    ValidatorSetEmpty = 203,

    /// Validator is not on the allow-list
    ValidatorNotFound = 204,

    /// Validator is already on the allow-list and active
    ValidatorAlreadyListed = 205,

    /// Target weight must be positive
    InvalidWeight = 206,

    /// Parameter set failed validation
    InvalidParams = 207,

    /// No completed, unclaimed unbonding for the delegator
    NothingToClaim = 208,

    /// Contract holds less of the pool denomination than the payout
    InsufficientModuleBalance = 209,

    /// Exchange rate cannot be computed (staked pool is empty while supply exists)
    ExchangeRateError = 210,

    /// Contract is paused
    ContractPaused = 211,

    /// Unauthorized access
    Unauthorized = 212,

    /// Arithmetic overflow
    Overflow = 213,

    /// Arithmetic underflow
    Underflow = 214,

    /// Division by zero
    DivisionByZero = 215,

    /// Controller returned a dispatch id that is already tracked
    DuplicateDispatch = 216,

    /// Unknown unbonding epoch
    EpochNotFound = 217,

    /// Unknown validator unbonding
    UnbondingNotFound = 218,

    /// Validator unbonding is not in the exhausted state
    UnbondingNotExhausted = 219,

    /// Accounting invariant broken; indicates a bug
    InvariantViolation = 220,

    /// Epoch source reported an epoch number lower than the open epoch
    EpochRegression = 221,

    /// Idle deposits cannot cover an instant redemption
    InsufficientIdleDeposits = 222,
}
