//! Time-based unlock math shared by unit grants and vesting schedules.
//!
//! Unit grants unlock in equal steps after a lock period; general vesting
//! schedules release continuously. Both measure from the genesis time and
//! return nothing while it is unset.

use crate::params::LedgerParams;
use serde::{Deserialize, Serialize};
use unitvault_types::{Amount, Timestamp};

/// `numerator / denominator`, with `numerator <= denominator`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fraction {
    pub numerator: u64,
    pub denominator: u64,
}

impl Fraction {
    pub const ZERO: Fraction = Fraction {
        numerator: 0,
        denominator: 1,
    };

    /// `amount * numerator / denominator`, rounded down and capped at `amount`.
    pub fn apply(&self, amount: Amount) -> Amount {
        if self.denominator == 0 || self.numerator == 0 {
            return 0;
        }
        if self.numerator >= self.denominator {
            return amount;
        }
        // amount / d * n + (amount % d) * n / d avoids overflowing the product.
        let n = self.numerator as Amount;
        let d = self.denominator as Amount;
        (amount / d) * n + (amount % d) * n / d
    }

    pub fn is_complete(&self) -> bool {
        self.denominator > 0 && self.numerator >= self.denominator
    }
}

/// Stepped unlock fraction.
///
/// Zero before `genesis + lock_period` (or while genesis is unset), then one
/// `1/period_count` step per elapsed `period_length`, saturating at one.
pub fn unlocked_fraction(
    now: Timestamp,
    genesis: Option<Timestamp>,
    lock_period: Timestamp,
    period_count: u32,
    period_length: Timestamp,
) -> Fraction {
    let Some(genesis) = genesis else {
        return Fraction::ZERO;
    };
    if period_count == 0 || period_length == 0 {
        return Fraction::ZERO;
    }
    let unlock_start = genesis.saturating_add(lock_period);
    if now < unlock_start {
        return Fraction::ZERO;
    }

    let elapsed_periods = (now - unlock_start) / period_length;
    Fraction {
        numerator: elapsed_periods.min(period_count as u64),
        denominator: period_count as u64,
    }
}

/// Amount of `total` vested under continuous release from `start` over `duration`.
pub fn linear_release(total: Amount, now: Timestamp, start: Timestamp, duration: Timestamp) -> Amount {
    if now < start {
        return 0;
    }
    let elapsed = now - start;
    if duration == 0 || elapsed >= duration {
        return total;
    }
    Fraction {
        numerator: elapsed,
        denominator: duration,
    }
    .apply(total)
}

/// Per-unit grant unlock parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnlockSchedule {
    pub lock_period: Timestamp,
    pub periods: u32,
    pub interval: Timestamp,
}

impl UnlockSchedule {
    pub fn from_params(params: &LedgerParams) -> Self {
        Self {
            lock_period: params.lock_period,
            periods: params.unlock_periods,
            interval: params.unlock_interval,
        }
    }

    pub fn fraction(&self, now: Timestamp, genesis: Option<Timestamp>) -> Fraction {
        unlocked_fraction(now, genesis, self.lock_period, self.periods, self.interval)
    }

    /// Absolute unlocked amount of `total_locked`, never above it.
    pub fn unlocked(&self, total_locked: Amount, now: Timestamp, genesis: Option<Timestamp>) -> Amount {
        self.fraction(now, genesis).apply(total_locked)
    }

    /// Time at which the whole grant is unlocked.
    pub fn fully_unlocked_at(&self, genesis: Timestamp) -> Timestamp {
        genesis
            .saturating_add(self.lock_period)
            .saturating_add(self.interval.saturating_mul(self.periods as u64))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use unitvault_types::{days, tokens};

    const GENESIS: Timestamp = 1_700_000_000;

    #[test]
    fn test_nothing_without_genesis() {
        let schedule = UnlockSchedule::from_params(&LedgerParams::default());
        assert_eq!(schedule.unlocked(tokens(2_000), u64::MAX, None), 0);
    }

    #[test]
    fn test_two_periods_after_lock() {
        let schedule = UnlockSchedule::from_params(&LedgerParams::default());
        let now = GENESIS + days(365) + 2 * days(30);
        assert_eq!(
            schedule.fraction(now, Some(GENESIS)),
            Fraction {
                numerator: 2,
                denominator: 25
            }
        );
        assert_eq!(
            schedule.unlocked(tokens(2_000), now, Some(GENESIS)),
            tokens(2_000) * 2 / 25
        );
        // One second short of the second step.
        assert_eq!(
            schedule.unlocked(tokens(2_000), now - 1, Some(GENESIS)),
            tokens(2_000) / 25
        );
    }

    #[test]
    fn test_unlock_caps_at_total() {
        let schedule = UnlockSchedule::from_params(&LedgerParams::default());
        let end = schedule.fully_unlocked_at(GENESIS);
        assert_eq!(schedule.unlocked(tokens(2_000), end, Some(GENESIS)), tokens(2_000));
        assert_eq!(
            schedule.unlocked(tokens(2_000), end + days(10_000), Some(GENESIS)),
            tokens(2_000)
        );
    }

    #[test]
    fn test_linear_release_bounds() {
        assert_eq!(linear_release(1_000, 99, 100, 50), 0);
        assert_eq!(linear_release(1_000, 100, 100, 50), 0);
        assert_eq!(linear_release(1_000, 125, 100, 50), 500);
        assert_eq!(linear_release(1_000, 150, 100, 50), 1_000);
        assert_eq!(linear_release(1_000, 151, 100, 0), 1_000);
    }

    #[test]
    fn test_fraction_apply_does_not_overflow() {
        let f = Fraction {
            numerator: u64::MAX - 1,
            denominator: u64::MAX,
        };
        assert!(f.apply(u128::MAX) < u128::MAX);
        assert_eq!(Fraction { numerator: 1, denominator: 4 }.apply(1_000), 250);
    }
}
