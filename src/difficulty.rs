//! Difficulty adjustment state machine
//!
//! Pure functions computing the required difficulty of a child block from
//! its parent, dispatched by active fork. All arithmetic runs on `U256` —
//! difficulty outgrows 64 bits within a normal chain lifetime, so nothing
//! here may silently wrap.
//!
//! Callers must reject `time <= parent.time` before calling in; the
//! formulas assume a positive timestamp delta.

use crate::types::{ForkSchedule, Header};
use primitive_types::U256;

/// Lowest difficulty a block may ever declare.
pub const MINIMUM_DIFFICULTY: u64 = 131_072;
/// Right-shift divisor of the per-block adjustment step.
pub const DIFFICULTY_BOUND_DIVISOR: u64 = 2048;
/// Block span of one ice-age bomb period.
pub const EXP_DIFF_PERIOD: u64 = 100_000;
/// Frontier's "fast block" threshold in seconds.
pub const DURATION_LIMIT: u64 = 13;

/// Bomb delay applied from Byzantium onward.
const BYZANTIUM_BOMB_DELAY: u64 = 3_000_000;
/// Bomb delay applied from Constantinople onward.
const CONSTANTINOPLE_BOMB_DELAY: u64 = 5_000_000;

/// Required difficulty for a block created at `time` on top of `parent`,
/// under the given fork schedule.
pub fn calc_difficulty(forks: &ForkSchedule, time: u64, parent: &Header) -> U256 {
    if forks.era_difficulty {
        return calc_difficulty_era(time, parent);
    }
    let next = parent.number + 1;
    if forks.is_constantinople(next) {
        calc_difficulty_bomb_delayed(time, parent, CONSTANTINOPLE_BOMB_DELAY)
    } else if forks.is_byzantium(next) {
        calc_difficulty_bomb_delayed(time, parent, BYZANTIUM_BOMB_DELAY)
    } else if forks.is_homestead(next) {
        calc_difficulty_homestead(time, parent)
    } else {
        calc_difficulty_frontier(time, parent)
    }
}

fn minimum() -> U256 {
    U256::from(MINIMUM_DIFFICULTY)
}

/// `parent.difficulty / 2048`, the unit step all variants scale.
fn adjustment(parent: &Header) -> U256 {
    parent.difficulty / DIFFICULTY_BOUND_DIVISOR
}

/// Apply a signed multiple of the adjustment step, clamped to the floor.
fn step_by(parent: &Header, steps: u64, increase: bool) -> U256 {
    let delta = adjustment(parent) * steps;
    let diff = if increase {
        parent.difficulty + delta
    } else {
        parent.difficulty.saturating_sub(delta)
    };
    diff.max(minimum())
}

/// Exponential ice-age term: `2^(period - 2)` once `period > 1`, where the
/// period counts 100k-block spans of `effective_number`.
fn bomb(effective_number: u64) -> U256 {
    let period = effective_number / EXP_DIFF_PERIOD;
    if period > 1 {
        U256::one() << (period - 2)
    } else {
        U256::zero()
    }
}

/// Frontier rules: fixed one-step moves around the 13-second duration
/// limit, plus the undelayed bomb.
pub fn calc_difficulty_frontier(time: u64, parent: &Header) -> U256 {
    let diff = step_by(parent, 1, time - parent.time < DURATION_LIMIT);
    (diff + bomb(parent.number + 1)).max(minimum())
}

/// Homestead rules: `max(1 - Δt/10, -99)` steps, plus the undelayed bomb.
pub fn calc_difficulty_homestead(time: u64, parent: &Header) -> U256 {
    let quotient = (time - parent.time) / 10;
    let diff = if quotient <= 1 {
        step_by(parent, 1 - quotient, true)
    } else {
        step_by(parent, (quotient - 1).min(99), false)
    };
    (diff + bomb(parent.number + 1)).max(minimum())
}

/// Byzantium-family rules: uncle-aware `max((2 if uncles else 1) - Δt/9,
/// -99)` steps and a bomb shifted back by `bomb_delay` blocks.
pub fn calc_difficulty_bomb_delayed(time: u64, parent: &Header, bomb_delay: u64) -> U256 {
    let quotient = (time - parent.time) / 9;
    let base = if parent.uncles_empty() { 1u64 } else { 2 };
    let diff = if quotient <= base {
        step_by(parent, base - quotient, true)
    } else {
        step_by(parent, (quotient - base).min(99), false)
    };

    let effective = parent.number.saturating_sub(bomb_delay - 1);
    (diff + bomb(effective)).max(minimum())
}

/// Era-chain legacy rules: `max(1 - Δt/88, -99)` steps and no bomb.
pub fn calc_difficulty_era(time: u64, parent: &Header) -> U256 {
    let quotient = (time - parent.time) / 88;
    let diff = if quotient <= 1 {
        step_by(parent, 1 - quotient, true)
    } else {
        step_by(parent, (quotient - 1).min(99), false)
    };
    diff.max(minimum())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::EMPTY_UNCLE_HASH;
    use primitive_types::H256;

    fn parent(number: u64, time: u64, difficulty: u64) -> Header {
        Header {
            number,
            time,
            difficulty: U256::from(difficulty),
            uncle_hash: EMPTY_UNCLE_HASH,
            ..Default::default()
        }
    }

    fn frontier_only() -> ForkSchedule {
        ForkSchedule::default()
    }

    #[test]
    fn frontier_fast_block_raises() {
        // 131072 / 2048 = 64
        let p = parent(100, 0, 131_072);
        assert_eq!(
            calc_difficulty(&frontier_only(), 5, &p),
            U256::from(131_136)
        );
    }

    #[test]
    fn frontier_slow_block_clamps_to_minimum() {
        let p = parent(100, 0, 131_072);
        assert_eq!(
            calc_difficulty(&frontier_only(), 20, &p),
            U256::from(MINIMUM_DIFFICULTY)
        );
    }

    #[test]
    fn frontier_slow_block_lowers() {
        let p = parent(100, 0, 1_000_000);
        // 1_000_000 / 2048 = 488
        assert_eq!(
            calc_difficulty(&frontier_only(), 13, &p),
            U256::from(999_512)
        );
    }

    #[test]
    fn homestead_step_table() {
        let forks = ForkSchedule {
            homestead_block: Some(0),
            ..Default::default()
        };
        let p = parent(100, 0, 1_000_000);
        // Δt in [0,10) → +1 step, [10,20) → 0 steps, [20,30) → -1 step.
        assert_eq!(calc_difficulty(&forks, 5, &p), U256::from(1_000_488));
        assert_eq!(calc_difficulty(&forks, 15, &p), U256::from(1_000_000));
        assert_eq!(calc_difficulty(&forks, 25, &p), U256::from(999_512));
    }

    #[test]
    fn homestead_step_floor_is_minus_99() {
        let forks = ForkSchedule {
            homestead_block: Some(0),
            ..Default::default()
        };
        let p = parent(100, 0, 1_000_000);
        // Huge Δt: 488 * 99 = 48312 shaved off, not more.
        assert_eq!(
            calc_difficulty(&forks, 1_000_000, &p),
            U256::from(1_000_000 - 488 * 99)
        );
    }

    #[test]
    fn byzantium_counts_uncles() {
        let forks = ForkSchedule {
            homestead_block: Some(0),
            byzantium_block: Some(0),
            ..Default::default()
        };
        let mut p = parent(100, 0, 1_000_000);
        // Δt = 9 → quotient 1: no uncles means +0 steps, uncles mean +1.
        assert_eq!(calc_difficulty(&forks, 9, &p), U256::from(1_000_000));
        p.uncle_hash = H256::repeat_byte(0x11);
        assert_eq!(calc_difficulty(&forks, 9, &p), U256::from(1_000_488));
    }

    #[test]
    fn bomb_zero_before_delay_then_powers_of_two() {
        let forks = ForkSchedule {
            homestead_block: Some(0),
            byzantium_block: Some(0),
            ..Default::default()
        };
        // Δt = 20 is a one-step slowdown (20/9 = 2 against the uncle-free
        // base of 1). Pre-delay parent: no bomb term at all.
        let p = parent(1_000_000, 0, 1_000_000);
        assert_eq!(calc_difficulty(&forks, 20, &p), U256::from(999_512));

        // Parent far enough past the delay: effective number 200_000 gives
        // period 2, so 2^0 lands on top.
        let p = parent(3_000_000 - 1 + 200_000, 0, 1_000_000);
        assert_eq!(
            calc_difficulty(&forks, 20, &p),
            U256::from(999_512 + 1)
        );
        // One period further doubles the term.
        let p = parent(3_000_000 - 1 + 300_000, 0, 1_000_000);
        assert_eq!(
            calc_difficulty(&forks, 20, &p),
            U256::from(999_512 + 2)
        );
    }

    #[test]
    fn frontier_bomb_applies_undelayed() {
        let p = parent(299_999, 0, 1_000_000);
        // (parent.number + 1) / 100_000 = 3 → bomb 2^1.
        assert_eq!(
            calc_difficulty(&frontier_only(), 20, &p),
            U256::from(999_512 + 2)
        );
    }

    #[test]
    fn era_variant_uses_88s_threshold_without_bomb() {
        let forks = ForkSchedule {
            era_difficulty: true,
            ..Default::default()
        };
        let p = parent(5_000_000, 0, 1_000_000);
        // Δt < 88 → +1 step even at a block number where the bomb would
        // dominate under mainline rules.
        assert_eq!(calc_difficulty(&forks, 50, &p), U256::from(1_000_488));
        // Δt in [88, 176) → no change.
        assert_eq!(calc_difficulty(&forks, 100, &p), U256::from(1_000_000));
        // Δt in [176, 264) → -1 step.
        assert_eq!(calc_difficulty(&forks, 200, &p), U256::from(999_512));
    }

    #[test]
    fn difficulty_never_below_minimum() {
        let forks = ForkSchedule::mainline();
        let p = parent(10, 0, MINIMUM_DIFFICULTY);
        for dt in 1..200u64 {
            assert!(calc_difficulty(&forks, dt, &p) >= U256::from(MINIMUM_DIFFICULTY));
        }
    }
}
