//! Liquid staking module
//!
//! Pools the native token, delegates it to allow-listed validators of a host
//! chain over an interchain-account controller and issues a receipt token
//! whose value tracks the pooled stake plus restaked rewards. Redemptions are
//! batched per host epoch and paid out after the host completes unbonding.

pub mod adapter;
pub mod delegation;
pub mod errors;
pub mod events;
pub mod ledger;
pub mod liquid_staking;
pub mod stake_token;
pub mod types;
pub mod unbonding;

#[cfg(test)]
pub mod mocks;


pub use liquid_staking::LiquidStaking;
pub use stake_token::StakeToken;
pub use errors::LstError;
pub use events::*;
