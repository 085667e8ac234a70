//! Exchange-rate ledger
//!
//! Pool-level accounting behind the C-value: the pool denomination owned by
//! receipt-token holders, the receipt supply, deposits not yet assigned to a
//! validator and redemptions of the open epoch not yet split across
//! validators. Slashing the staked pool cannot absorb is kept as a deficit
//! that confirmed rewards repay first.

use odra::prelude::*;
use odra::casper_types::U256;
use super::errors::LstError;
use crate::math::{SafeMath, StakeMath};

#[odra::module]
pub struct ExchangeRateLedger {
    /// Pool denomination backing the receipt supply (rewards included)
    total_staked: Var<U256>,
    /// Receipt tokens in circulation
    total_supply: Var<U256>,
    /// Staked funds not assigned to any validator
    idle_deposits: Var<U256>,
    /// Redemptions of the open epoch, still delegated
    queued_unbonding: Var<U256>,
    /// Slashed stake beyond `total_staked`, owed to queued redemptions
    slash_deficit: Var<U256>,
}

#[odra::module]
impl ExchangeRateLedger {
    pub fn total_staked(&self) -> U256 {
        self.total_staked.get_or_default()
    }

    pub fn total_supply(&self) -> U256 {
        self.total_supply.get_or_default()
    }

    pub fn idle_deposits(&self) -> U256 {
        self.idle_deposits.get_or_default()
    }

    pub fn queued_unbonding(&self) -> U256 {
        self.queued_unbonding.get_or_default()
    }

    pub fn slash_deficit(&self) -> U256 {
        self.slash_deficit.get_or_default()
    }

    /// Current C-value (staked units per receipt token, scaled by 1e18)
    pub fn c_value(&self) -> U256 {
        StakeMath::c_value(self.total_staked(), self.total_supply())
            .unwrap_or_revert(&self.env())
    }
}

impl ExchangeRateLedger {
    /// Receipt tokens a deposit of `net` would mint right now
    pub fn preview_mint(&self, net: U256) -> Result<U256, LstError> {
        StakeMath::receipt_for_stake(net, self.total_staked(), self.total_supply())
    }

    /// Pool denomination owed for `receipt` tokens right now
    pub fn preview_payout(&self, receipt: U256) -> Result<U256, LstError> {
        StakeMath::stake_for_receipt(receipt, self.total_staked(), self.total_supply())
    }

    pub fn record_stake(&mut self, net: U256, minted: U256) -> Result<(), LstError> {
        let staked = SafeMath::add(self.total_staked(), net)?;
        let supply = SafeMath::add(self.total_supply(), minted)?;
        self.total_staked.set(staked);
        self.total_supply.set(supply);
        Ok(())
    }

    /// Burned tokens leave the supply at once; the owed amount leaves the pool
    /// and waits in the queue until the epoch is split across validators.
    pub fn record_unstake(&mut self, burned: U256, claimable: U256) -> Result<(), LstError> {
        let supply = SafeMath::sub(self.total_supply(), burned)?;
        let staked = SafeMath::sub(self.total_staked(), claimable)?;
        let queued = SafeMath::add(self.queued_unbonding(), claimable)?;
        self.total_supply.set(supply);
        self.total_staked.set(staked);
        self.queued_unbonding.set(queued);
        Ok(())
    }

    /// Instant redemption paid out of idle deposits
    pub fn record_redeem(&mut self, burned: U256, payout: U256) -> Result<(), LstError> {
        if payout > self.idle_deposits() {
            return Err(LstError::InsufficientIdleDeposits);
        }
        let supply = SafeMath::sub(self.total_supply(), burned)?;
        let staked = SafeMath::sub(self.total_staked(), payout)?;
        let idle = SafeMath::sub(self.idle_deposits(), payout)?;
        self.total_supply.set(supply);
        self.total_staked.set(staked);
        self.idle_deposits.set(idle);
        Ok(())
    }

    /// Puts `amount` of confirmed rewards towards the slash deficit and
    /// returns the part repaid.
    pub fn repay_deficit(&mut self, amount: U256) -> U256 {
        let deficit = self.slash_deficit();
        let repaid = amount.min(deficit);
        if !repaid.is_zero() {
            self.slash_deficit.set(deficit - repaid);
        }
        repaid
    }

    /// Adds confirmed rewards to the pool and returns the receipt tokens owed
    /// to the fee address for `fee`.
    pub fn record_rewards(&mut self, rewards: U256, fee: U256) -> Result<U256, LstError> {
        let staked_after = SafeMath::add(self.total_staked(), rewards)?;
        let fee_shares = StakeMath::restake_fee_shares(fee, staked_after, self.total_supply())?;
        let supply_after = SafeMath::add(self.total_supply(), fee_shares)?;
        self.total_staked.set(staked_after);
        self.total_supply.set(supply_after);
        Ok(fee_shares)
    }

    /// Takes a slash out of the staked pool. Whatever exceeds it belongs to
    /// redemptions already queued and is returned as uncovered.
    pub fn record_slash(&mut self, amount: U256) -> Result<U256, LstError> {
        let staked = self.total_staked();
        let absorbed = amount.min(staked);
        let uncovered = amount - absorbed;
        let deficit = SafeMath::add(self.slash_deficit(), uncovered)?;
        self.total_staked.set(staked - absorbed);
        self.slash_deficit.set(deficit);
        Ok(uncovered)
    }

    pub fn release_queued_unbonding(&mut self, amount: U256) -> Result<(), LstError> {
        let queued = SafeMath::sub(self.queued_unbonding(), amount)?;
        self.queued_unbonding.set(queued);
        Ok(())
    }

    pub fn add_idle(&mut self, amount: U256) -> Result<(), LstError> {
        let idle = SafeMath::add(self.idle_deposits(), amount)?;
        self.idle_deposits.set(idle);
        Ok(())
    }

    /// Empties the idle bucket and returns what it held
    pub fn take_idle(&mut self) -> U256 {
        let idle = self.idle_deposits();
        self.idle_deposits.set(U256::zero());
        idle
    }
}
