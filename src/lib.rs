#![cfg_attr(not(test), no_std)]
#![cfg_attr(not(test), no_main)]
extern crate alloc;

// Shared token errors and events
pub mod errors;
pub mod events;
pub mod math;

// Liquid staking contracts
pub mod lst;
