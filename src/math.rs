//! Mathematical utilities for the liquid staking contracts
//! Implements checked integer math, the C-value conversions and the
//! allocation/rebalance planners. Every division floors, which keeps rounding
//! in the pool's favour.
use odra::casper_types::{U256, U512};
use odra::prelude::*;
use crate::lst::errors::LstError;

/// Basis points denominator (100% = 10_000)
pub const BPS_DENOMINATOR: u32 = 10_000;

/// Fixed-point scale of the C-value (1e18)
pub const C_VALUE_SCALE: u128 = 1_000_000_000_000_000_000;

/// Largest exponent used by the retry backoff
pub const MAX_BACKOFF_SHIFT: u32 = 16;

/// Safe math operations for U256
pub struct SafeMath;

impl SafeMath {
    /// Safe addition with overflow check
    pub fn add(a: U256, b: U256) -> Result<U256, LstError> {
        a.checked_add(b).ok_or(LstError::Overflow)
    }

    /// Safe subtraction with underflow check
    pub fn sub(a: U256, b: U256) -> Result<U256, LstError> {
        a.checked_sub(b).ok_or(LstError::Underflow)
    }

    /// Safe multiplication with overflow check
    pub fn mul(a: U256, b: U256) -> Result<U256, LstError> {
        a.checked_mul(b).ok_or(LstError::Overflow)
    }

    /// Safe division with zero check
    pub fn div(a: U256, b: U256) -> Result<U256, LstError> {
        if b.is_zero() {
            return Err(LstError::DivisionByZero);
        }
        Ok(a / b)
    }

    /// `floor(a * b / c)`
    pub fn mul_div(a: U256, b: U256, c: U256) -> Result<U256, LstError> {
        Self::div(Self::mul(a, b)?, c)
    }

    /// Returns the minimum of two U256 values
    pub fn min(a: U256, b: U256) -> U256 {
        if a < b { a } else { b }
    }

    /// Sum of a sequence of amounts
    pub fn sum<I: IntoIterator<Item = U256>>(values: I) -> Result<U256, LstError> {
        values
            .into_iter()
            .try_fold(U256::zero(), |acc, value| Self::add(acc, value))
    }
}

/// Conversion between the native motes representation and accounting units
pub struct Motes;

impl Motes {
    /// Converts an attached native amount into accounting units
    pub fn to_amount(motes: U512) -> Result<U256, LstError> {
        if motes > U512::from(u128::MAX) {
            return Err(LstError::Overflow);
        }
        Ok(U256::from(motes.as_u128()))
    }

    /// Converts an accounting amount into native motes for a transfer
    pub fn from_amount(amount: U256) -> Result<U512, LstError> {
        if amount > U256::from(u128::MAX) {
            return Err(LstError::Overflow);
        }
        Ok(U512::from(amount.as_u128()))
    }
}

/// Exchange-rate (C-value) arithmetic
pub struct StakeMath;

impl StakeMath {
    /// `floor(amount * bps / 10_000)`
    pub fn fee_of(amount: U256, bps: u32) -> Result<U256, LstError> {
        SafeMath::mul_div(amount, U256::from(bps), U256::from(BPS_DENOMINATOR))
    }

    /// Staked units per receipt token, scaled by 1e18.
    /// An empty pool has a C-value of exactly one.
    pub fn c_value(total_staked: U256, total_supply: U256) -> Result<U256, LstError> {
        if total_supply.is_zero() {
            return Ok(U256::from(C_VALUE_SCALE));
        }
        SafeMath::mul_div(total_staked, U256::from(C_VALUE_SCALE), total_supply)
    }

    /// Receipt tokens minted for `net` staked units.
    /// Uses the exact supply/staked ratio rather than the rounded C-value so
    /// that flooring can only under-mint.
    pub fn receipt_for_stake(
        net: U256,
        total_staked: U256,
        total_supply: U256,
    ) -> Result<U256, LstError> {
        if total_supply.is_zero() {
            return Ok(net);
        }
        if total_staked.is_zero() {
            return Err(LstError::ExchangeRateError);
        }
        SafeMath::mul_div(net, total_supply, total_staked)
    }

    /// Staked units owed for burning `receipt` tokens
    pub fn stake_for_receipt(
        receipt: U256,
        total_staked: U256,
        total_supply: U256,
    ) -> Result<U256, LstError> {
        if total_supply.is_zero() {
            return Err(LstError::ExchangeRateError);
        }
        SafeMath::mul_div(receipt, total_staked, total_supply)
    }

    /// Receipt tokens minted to the fee address so that it owns `fee` worth
    /// of a pool that already includes the full reward:
    /// `floor(fee * supply / (staked_after - fee))`.
    pub fn restake_fee_shares(
        fee: U256,
        staked_after: U256,
        total_supply: U256,
    ) -> Result<U256, LstError> {
        if fee.is_zero() || total_supply.is_zero() {
            return Ok(U256::zero());
        }
        let denominator = SafeMath::sub(staked_after, fee)?;
        if denominator.is_zero() {
            return Ok(U256::zero());
        }
        SafeMath::mul_div(fee, total_supply, denominator)
    }
}

/// Splits `total` across `weights` proportionally using the largest-remainder
/// method. The result has the same order as the input and sums exactly to
/// `total`. Equal remainders go to the lower address first.
pub fn largest_remainder(
    total: U256,
    weights: &[(Address, U256)],
) -> Result<Vec<(Address, U256)>, LstError> {
    let weight_sum = SafeMath::sum(weights.iter().map(|(_, weight)| *weight))?;
    if weight_sum.is_zero() {
        return Err(LstError::ValidatorSetEmpty);
    }

    let mut shares = Vec::with_capacity(weights.len());
    let mut remainders = Vec::with_capacity(weights.len());
    let mut assigned = U256::zero();
    for (index, (operator, weight)) in weights.iter().enumerate() {
        let product = SafeMath::mul(total, *weight)?;
        let quota = product / weight_sum;
        assigned = SafeMath::add(assigned, quota)?;
        shares.push((*operator, quota));
        if !weight.is_zero() {
            remainders.push((index, product % weight_sum));
        }
    }

    remainders.sort_by(|a, b| {
        b.1.cmp(&a.1)
            .then_with(|| weights[a.0].0.cmp(&weights[b.0].0))
    });

    let mut leftover = SafeMath::sub(total, assigned)?;
    for (index, _) in remainders {
        if leftover.is_zero() {
            break;
        }
        shares[index].1 = SafeMath::add(shares[index].1, U256::one())?;
        leftover = leftover - U256::one();
    }

    if !leftover.is_zero() {
        return Err(LstError::InvariantViolation);
    }
    Ok(shares)
}

/// Input row of the rebalance planner
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RebalanceEntry {
    /// Validator operator address
    pub operator: Address,
    /// Target weight; zero for validators being drained
    pub weight: U256,
    /// Delegation counted towards the validator, including in-flight amounts
    pub effective: U256,
    /// Confirmed stake that can be redelegated away right now
    pub movable: U256,
}

/// One planned redelegation
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Redelegation {
    pub source: Address,
    pub destination: Address,
    pub amount: U256,
}

/// Plans redelegations that move stake from validators above their ideal
/// share to validators below it. A validator is a source only when its
/// surplus exceeds `threshold_bps` of the total, or when its weight is zero.
pub fn plan_redelegations(
    entries: &[RebalanceEntry],
    threshold_bps: u32,
) -> Result<Vec<Redelegation>, LstError> {
    let total = SafeMath::sum(entries.iter().map(|entry| entry.effective))?;
    if total.is_zero() || entries.iter().all(|entry| entry.weight.is_zero()) {
        return Ok(Vec::new());
    }

    let weights: Vec<(Address, U256)> = entries
        .iter()
        .map(|entry| (entry.operator, entry.weight))
        .collect();
    let ideals = largest_remainder(total, &weights)?;
    let threshold = StakeMath::fee_of(total, threshold_bps)?;

    let mut sources: Vec<(Address, U256)> = Vec::new();
    let mut receivers: Vec<(Address, U256)> = Vec::new();
    for (entry, (_, ideal)) in entries.iter().zip(ideals.iter()) {
        if entry.effective > *ideal {
            let surplus = entry.effective - *ideal;
            if entry.weight.is_zero() || surplus > threshold {
                let give = SafeMath::min(surplus, entry.movable);
                if !give.is_zero() {
                    sources.push((entry.operator, give));
                }
            }
        } else if *ideal > entry.effective {
            receivers.push((entry.operator, *ideal - entry.effective));
        }
    }

    let by_amount_then_address =
        |a: &(Address, U256), b: &(Address, U256)| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0));
    sources.sort_by(by_amount_then_address);
    receivers.sort_by(by_amount_then_address);

    let mut plan = Vec::new();
    let (mut s, mut r) = (0usize, 0usize);
    while s < sources.len() && r < receivers.len() {
        let amount = SafeMath::min(sources[s].1, receivers[r].1);
        plan.push(Redelegation {
            source: sources[s].0,
            destination: receivers[r].0,
            amount,
        });
        sources[s].1 = sources[s].1 - amount;
        receivers[r].1 = receivers[r].1 - amount;
        if sources[s].1.is_zero() {
            s += 1;
        }
        if receivers[r].1.is_zero() {
            r += 1;
        }
    }
    Ok(plan)
}

/// Delay before the next retry of a failed dispatch:
/// `base * 2^(retry_count - 1)`, exponent capped at [`MAX_BACKOFF_SHIFT`].
pub fn retry_backoff(base: u64, retry_count: u32) -> u64 {
    let shift = retry_count.saturating_sub(1).min(MAX_BACKOFF_SHIFT);
    base.saturating_mul(1u64 << shift)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn accounts(n: usize) -> Vec<Address> {
        let env = odra_test::env();
        let mut accounts: Vec<Address> = (0..n).map(|i| env.get_account(i)).collect();
        accounts.sort();
        accounts
    }

    #[test]
    fn test_c_value_defaults_to_one() {
        let one = U256::from(C_VALUE_SCALE);
        assert_eq!(StakeMath::c_value(U256::zero(), U256::zero()).unwrap(), one);
        assert_eq!(StakeMath::c_value(U256::from(1000), U256::from(1000)).unwrap(), one);
        // 1100 staked backing 1000 receipt tokens
        assert_eq!(
            StakeMath::c_value(U256::from(1100), U256::from(1000)).unwrap(),
            U256::from(1_100_000_000_000_000_000u128)
        );
    }

    #[test]
    fn test_mint_and_payout_floor() {
        let staked = U256::from(1100);
        let supply = U256::from(1000);
        // 100 * 1000 / 1100 = 90.9
        assert_eq!(
            StakeMath::receipt_for_stake(U256::from(100), staked, supply).unwrap(),
            U256::from(90)
        );
        // 90 * 1100 / 1000 = 99
        assert_eq!(
            StakeMath::stake_for_receipt(U256::from(90), staked, supply).unwrap(),
            U256::from(99)
        );
    }

    #[test]
    fn test_mint_rejects_wiped_out_pool() {
        let result = StakeMath::receipt_for_stake(U256::from(10), U256::zero(), U256::from(5));
        assert!(matches!(result, Err(LstError::ExchangeRateError)));
    }

    #[test]
    fn test_round_trip_never_inflates() {
        let pools = [(1_000u64, 1_000u64), (1_337, 1_000), (10_007, 9_973), (5, 3)];
        for (staked, supply) in pools {
            for amount in [1u64, 7, 99, 1_000, 12_345] {
                let (staked, supply) = (U256::from(staked), U256::from(supply));
                let minted = StakeMath::receipt_for_stake(U256::from(amount), staked, supply).unwrap();
                let staked_after = staked + U256::from(amount);
                let supply_after = supply + minted;
                let paid = StakeMath::stake_for_receipt(minted, staked_after, supply_after).unwrap();
                assert!(paid <= U256::from(amount));
                // supply * c_value never claims more than the pool holds
                let c_value = StakeMath::c_value(staked_after, supply_after).unwrap();
                assert!(supply_after * c_value / U256::from(C_VALUE_SCALE) <= staked_after);
            }
        }
    }

    #[test]
    fn test_restake_fee_shares_keep_c_value_monotonic() {
        let staked = U256::from(1_000_000u64);
        let supply = U256::from(900_000u64);
        let before = StakeMath::c_value(staked, supply).unwrap();

        let reward = U256::from(10_000u64);
        let fee = StakeMath::fee_of(reward, 500).unwrap();
        assert_eq!(fee, U256::from(500));

        let staked_after = staked + reward;
        let shares = StakeMath::restake_fee_shares(fee, staked_after, supply).unwrap();
        let after = StakeMath::c_value(staked_after, supply + shares).unwrap();
        assert!(after >= before);
    }

    #[test]
    fn test_largest_remainder_breaks_ties_by_address() {
        let accounts = accounts(2);
        let (low, high) = (accounts[0], accounts[1]);
        // input deliberately in descending address order
        let weights = vec![(high, U256::from(1)), (low, U256::from(1))];
        let shares = largest_remainder(U256::from(101), &weights).unwrap();
        assert_eq!(shares, vec![(high, U256::from(50)), (low, U256::from(51))]);
    }

    #[test]
    fn test_largest_remainder_sums_exactly() {
        let accounts = accounts(3);
        let weights = vec![
            (accounts[0], U256::from(3)),
            (accounts[1], U256::from(3)),
            (accounts[2], U256::from(1)),
        ];
        for total in [0u64, 1, 2, 10, 999, 1_000_003] {
            let shares = largest_remainder(U256::from(total), &weights).unwrap();
            let sum = SafeMath::sum(shares.iter().map(|(_, s)| *s)).unwrap();
            assert_eq!(sum, U256::from(total));
        }
    }

    #[test]
    fn test_largest_remainder_skips_zero_weights() {
        let accounts = accounts(2);
        let weights = vec![(accounts[0], U256::zero()), (accounts[1], U256::from(2))];
        let shares = largest_remainder(U256::from(7), &weights).unwrap();
        assert_eq!(shares[0].1, U256::zero());
        assert_eq!(shares[1].1, U256::from(7));

        let empty = vec![(accounts[0], U256::zero())];
        assert!(matches!(
            largest_remainder(U256::from(7), &empty),
            Err(LstError::ValidatorSetEmpty)
        ));
    }

    #[test]
    fn test_plan_moves_surplus_above_threshold() {
        let accounts = accounts(2);
        let entries = vec![
            RebalanceEntry {
                operator: accounts[0],
                weight: U256::one(),
                effective: U256::from(900),
                movable: U256::from(900),
            },
            RebalanceEntry {
                operator: accounts[1],
                weight: U256::one(),
                effective: U256::from(100),
                movable: U256::from(100),
            },
        ];
        let plan = plan_redelegations(&entries, 1_000).unwrap();
        assert_eq!(
            plan,
            vec![Redelegation {
                source: accounts[0],
                destination: accounts[1],
                amount: U256::from(400),
            }]
        );

        // a 50% threshold tolerates the same deviation
        assert!(plan_redelegations(&entries, 5_000).unwrap().is_empty());
    }

    #[test]
    fn test_plan_drains_zero_weight_validator() {
        let accounts = accounts(3);
        let entries = vec![
            RebalanceEntry {
                operator: accounts[0],
                weight: U256::zero(),
                effective: U256::from(10),
                movable: U256::from(10),
            },
            RebalanceEntry {
                operator: accounts[1],
                weight: U256::one(),
                effective: U256::from(500),
                movable: U256::from(500),
            },
            RebalanceEntry {
                operator: accounts[2],
                weight: U256::one(),
                effective: U256::from(500),
                movable: U256::from(500),
            },
        ];
        // 10 is 1% of the total, below a 5% threshold, but weight zero always drains
        let plan = plan_redelegations(&entries, 500).unwrap();
        let moved = SafeMath::sum(plan.iter().map(|r| r.amount)).unwrap();
        assert_eq!(moved, U256::from(10));
        assert!(plan.iter().all(|r| r.source == accounts[0]));
    }

    #[test]
    fn test_plan_respects_movable_amount() {
        let accounts = accounts(2);
        let entries = vec![
            RebalanceEntry {
                operator: accounts[0],
                weight: U256::one(),
                effective: U256::from(1000),
                movable: U256::from(100),
            },
            RebalanceEntry {
                operator: accounts[1],
                weight: U256::one(),
                effective: U256::zero(),
                movable: U256::zero(),
            },
        ];
        let plan = plan_redelegations(&entries, 0).unwrap();
        assert_eq!(plan.len(), 1);
        assert_eq!(plan[0].amount, U256::from(100));
    }

    #[test]
    fn test_retry_backoff_doubles_and_caps() {
        assert_eq!(retry_backoff(1_000, 1), 1_000);
        assert_eq!(retry_backoff(1_000, 2), 2_000);
        assert_eq!(retry_backoff(1_000, 3), 4_000);
        assert_eq!(retry_backoff(1_000, 100), 1_000 << MAX_BACKOFF_SHIFT);
        assert_eq!(retry_backoff(u64::MAX, 5), u64::MAX);
    }

    #[test]
    fn test_motes_conversion_bounds() {
        assert_eq!(Motes::to_amount(U512::from(42u64)).unwrap(), U256::from(42));
        assert_eq!(Motes::from_amount(U256::from(42)).unwrap(), U512::from(42u64));
        assert!(matches!(Motes::from_amount(U256::MAX), Err(LstError::Overflow)));
    }
}
