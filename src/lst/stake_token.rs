//! Receipt token of the liquid staking pool
//!
//! Minted when the pool denomination is staked and burned on redemption. Its
//! value in the pool denomination only grows as rewards are restaked (the
//! C-value), except when the host chain slashes the pool.

use odra::prelude::*;
use odra::casper_types::U256;
use crate::events::{Approval, MinterUpdated, Transfer};
use crate::errors::TokenError;

/// CEP-18 style receipt token; only the minter may mint and burn
#[odra::module(events = [Transfer, Approval, MinterUpdated])]
pub struct StakeToken {
    /// Token name
    name: Var<String>,
    /// Token symbol
    symbol: Var<String>,
    /// Token decimals (matches the pool denomination)
    decimals: Var<u8>,
    /// Total supply
    total_supply: Var<U256>,
    /// Balance mapping: owner -> balance
    balances: Mapping<Address, U256>,
    /// Allowance mapping: owner -> spender -> amount
    allowances: Mapping<(Address, Address), U256>,
    /// Liquid staking contract allowed to mint and burn
    minter: Var<Address>,
    /// Contract admin
    admin: Var<Address>,
}

#[odra::module]
impl StakeToken {
    /// Initialize the receipt token; the minter is wired after the pool is deployed
    pub fn init(&mut self, name: String, symbol: String, decimals: u8) {
        let caller = self.env().caller();
        self.name.set(name);
        self.symbol.set(symbol);
        self.decimals.set(decimals);
        self.total_supply.set(U256::zero());
        self.admin.set(caller);
    }

    pub fn name(&self) -> String {
        self.name.get_or_default()
    }

    pub fn symbol(&self) -> String {
        self.symbol.get_or_default()
    }

    pub fn decimals(&self) -> u8 {
        self.decimals.get_or_default()
    }

    pub fn total_supply(&self) -> U256 {
        self.total_supply.get_or_default()
    }

    pub fn balance_of(&self, owner: Address) -> U256 {
        self.balances.get(&owner).unwrap_or_default()
    }

    pub fn allowance(&self, owner: Address, spender: Address) -> U256 {
        self.allowances.get(&(owner, spender)).unwrap_or_default()
    }

    /// Transfer tokens to another address
    pub fn transfer(&mut self, to: Address, amount: U256) -> bool {
        let caller = self.env().caller();
        self.transfer_internal(caller, to, amount);
        true
    }

    /// Approve a spender to spend tokens
    pub fn approve(&mut self, spender: Address, amount: U256) -> bool {
        let caller = self.env().caller();
        self.approve_internal(caller, spender, amount);
        true
    }

    /// Transfer tokens from one address to another (requires approval)
    pub fn transfer_from(&mut self, from: Address, to: Address, amount: U256) -> bool {
        let caller = self.env().caller();
        let current_allowance = self.allowance(from, caller);
        if current_allowance < amount {
            self.env().revert(TokenError::InsufficientAllowance);
        }

        self.approve_internal(from, caller, current_allowance - amount);
        self.transfer_internal(from, to, amount);
        true
    }

    /// Mint receipt tokens (minter only)
    pub fn mint(&mut self, to: Address, amount: U256) {
        self.only_minter();

        self.total_supply.set(self.total_supply() + amount);
        let current_balance = self.balance_of(to);
        self.balances.set(&to, current_balance + amount);

        self.env().emit_event(Transfer {
            from: self.env().self_address(),
            to,
            value: amount,
        });
    }

    /// Burn receipt tokens (minter only)
    pub fn burn(&mut self, from: Address, amount: U256) {
        self.only_minter();

        let current_balance = self.balance_of(from);
        if current_balance < amount {
            self.env().revert(TokenError::InsufficientBalance);
        }
        self.balances.set(&from, current_balance - amount);
        self.total_supply.set(self.total_supply() - amount);

        self.env().emit_event(Transfer {
            from,
            to: self.env().self_address(),
            value: amount,
        });
    }

    pub fn minter(&self) -> Option<Address> {
        self.minter.get()
    }

    /// Point minting rights at the liquid staking contract (admin only)
    pub fn set_minter(&mut self, new_minter: Address) {
        self.only_admin();
        let old_minter = self.minter.get();
        self.minter.set(new_minter);
        self.env().emit_event(MinterUpdated {
            old_minter,
            new_minter,
        });
    }

    pub fn get_admin(&self) -> Address {
        self.admin.get_or_revert_with(TokenError::Unauthorized)
    }

    /// Transfer admin rights (admin only)
    pub fn transfer_admin(&mut self, new_admin: Address) {
        self.only_admin();
        self.admin.set(new_admin);
    }

    fn transfer_internal(&mut self, from: Address, to: Address, amount: U256) {
        let from_balance = self.balance_of(from);
        if from_balance < amount {
            self.env().revert(TokenError::InsufficientBalance);
        }

        self.balances.set(&from, from_balance - amount);
        let to_balance = self.balance_of(to);
        self.balances.set(&to, to_balance + amount);

        self.env().emit_event(Transfer {
            from,
            to,
            value: amount,
        });
    }

    fn approve_internal(&mut self, owner: Address, spender: Address, amount: U256) {
        self.allowances.set(&(owner, spender), amount);
        self.env().emit_event(Approval {
            owner,
            spender,
            value: amount,
        });
    }

    fn only_minter(&self) {
        let caller = self.env().caller();
        let minter = self.minter.get_or_revert_with(TokenError::MinterNotSet);
        if caller != minter {
            self.env().revert(TokenError::Unauthorized);
        }
    }

    fn only_admin(&self) {
        let caller = self.env().caller();
        let admin = self.admin.get_or_revert_with(TokenError::Unauthorized);
        if caller != admin {
            self.env().revert(TokenError::Unauthorized);
        }
    }
}
