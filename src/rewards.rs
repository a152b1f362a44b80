//! Block and uncle reward accumulation
//!
//! Two selectable policies behind one entry point: the classic
//! fork-constant schedule and the era chain's step-down schedule with its
//! dev-fund payout. Rewards only ever add balances on the external state
//! database; there is no error path.

use crate::types::{Address, ForkSchedule, Header, StateDb};
use primitive_types::{H160, U256};

/// Frontier base block reward in wei.
const FRONTIER_BLOCK_REWARD: u128 = 5_000_000_000_000_000_000;
/// Base block reward from Byzantium.
const BYZANTIUM_BLOCK_REWARD: u128 = 3_000_000_000_000_000_000;
/// Base block reward from Constantinople.
const CONSTANTINOPLE_BLOCK_REWARD: u128 = 2_000_000_000_000_000_000;

/// Base block reward of the era schedule's first step; uncle rewards under
/// the era policy are computed against this value for every era.
const ERA_BASE_REWARD: u128 = 8_000_000_000_000_000_000;

/// Era step-down schedule: blocks strictly above a threshold pay the listed
/// miner reward and dev-fund reward.
const ERA_SCHEDULE: &[(u64, u128, u128)] = &[
    (2_508_545, 1_000_000_000_000_000_000, 100_000_000_000_000_000),
    (2_150_181, 2_000_000_000_000_000_000, 200_000_000_000_000_000),
    (1_791_818, 3_000_000_000_000_000_000, 300_000_000_000_000_000),
    (1_433_454, 4_000_000_000_000_000_000, 400_000_000_000_000_000),
    (1_075_090, 5_000_000_000_000_000_000, 500_000_000_000_000_000),
    (716_727, 6_000_000_000_000_000_000, 600_000_000_000_000_000),
    (358_363, 7_000_000_000_000_000_000, 700_000_000_000_000_000),
    (0, ERA_BASE_REWARD, 800_000_000_000_000_000),
];

/// Address credited with the dev-fund share under the era policy.
pub const DEV_FUND_ADDRESS: Address = H160(crate::types::hex_literal_20(
    b"3e2eb354ab9bcd0a4f0d80aed37544cb4573b0bd",
));

/// Reward schedule in effect for the chain.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RewardPolicy {
    /// Fork-constant base reward with the standard `/8` uncle formula.
    Classic,
    /// Step-down era schedule with a per-era dev-fund payout.
    Era,
}

/// Credit the miner, every uncle coinbase and (for the era policy) the dev
/// fund with the rewards owed by `header` and `uncles`.
pub fn accumulate_rewards(
    policy: RewardPolicy,
    forks: &ForkSchedule,
    state: &mut dyn StateDb,
    header: &Header,
    uncles: &[Header],
) {
    match policy {
        RewardPolicy::Classic => accumulate_classic(forks, state, header, uncles),
        RewardPolicy::Era => accumulate_era(state, header, uncles),
    }
}

fn accumulate_classic(
    forks: &ForkSchedule,
    state: &mut dyn StateDb,
    header: &Header,
    uncles: &[Header],
) {
    let base = if forks.is_constantinople(header.number) {
        CONSTANTINOPLE_BLOCK_REWARD
    } else if forks.is_byzantium(header.number) {
        BYZANTIUM_BLOCK_REWARD
    } else {
        FRONTIER_BLOCK_REWARD
    };
    let base = U256::from(base);

    let mut reward = base;
    for uncle in uncles {
        // (uncle.number + 8 - header.number) * base / 8. Validated uncles sit
        // at most 7 generations back so the factor stays in 1..=7; anything
        // deeper floors at zero instead of wrapping.
        let depth_factor = U256::from((uncle.number + 8).saturating_sub(header.number));
        state.add_balance(uncle.coinbase, depth_factor * base / 8);
        reward += base / 32;
    }
    state.add_balance(header.coinbase, reward);
}

fn accumulate_era(state: &mut dyn StateDb, header: &Header, uncles: &[Header]) {
    let (base, dev_fund) = era_rewards(header.number);
    let era_base = U256::from(ERA_BASE_REWARD);

    let mut reward = U256::from(base);
    for uncle in uncles {
        // (uncle.number + 2 - header.number) * ERA_BASE / 2, floored at
        // zero: only uncles one generation back earn anything.
        let numerator = (uncle.number as i128) + 2 - header.number as i128;
        let uncle_reward = if numerator > 0 {
            U256::from(numerator as u128) * era_base / 2
        } else {
            U256::zero()
        };
        state.add_balance(uncle.coinbase, uncle_reward);
        reward += era_base / 32;
    }
    state.add_balance(header.coinbase, reward);
    state.add_balance(DEV_FUND_ADDRESS, U256::from(dev_fund));
}

/// Miner and dev-fund reward constants for a block number under the era
/// schedule.
fn era_rewards(number: u64) -> (u128, u128) {
    for &(threshold, miner, dev) in ERA_SCHEDULE {
        if number > threshold || threshold == 0 {
            return (miner, dev);
        }
    }
    (ERA_BASE_REWARD, 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Header;
    use std::collections::HashMap;

    #[derive(Default)]
    struct MockState {
        balances: HashMap<Address, U256>,
    }

    impl StateDb for MockState {
        fn add_balance(&mut self, address: Address, amount: U256) {
            *self.balances.entry(address).or_default() += amount;
        }
    }

    fn header(number: u64, coinbase_byte: u8) -> Header {
        Header {
            number,
            coinbase: Address::repeat_byte(coinbase_byte),
            ..Default::default()
        }
    }

    #[test]
    fn classic_no_uncles_pays_fork_constant() {
        let forks = ForkSchedule::mainline();
        let mut state = MockState::default();

        accumulate_rewards(RewardPolicy::Classic, &forks, &mut state, &header(100, 1), &[]);
        accumulate_rewards(
            RewardPolicy::Classic,
            &forks,
            &mut state,
            &header(4_370_000, 2),
            &[],
        );
        accumulate_rewards(
            RewardPolicy::Classic,
            &forks,
            &mut state,
            &header(7_280_000, 3),
            &[],
        );

        assert_eq!(
            state.balances[&Address::repeat_byte(1)],
            U256::from(FRONTIER_BLOCK_REWARD)
        );
        assert_eq!(
            state.balances[&Address::repeat_byte(2)],
            U256::from(BYZANTIUM_BLOCK_REWARD)
        );
        assert_eq!(
            state.balances[&Address::repeat_byte(3)],
            U256::from(CONSTANTINOPLE_BLOCK_REWARD)
        );
    }

    #[test]
    fn classic_uncle_depth_formula() {
        let forks = ForkSchedule::default();
        let mut state = MockState::default();
        let h = header(10, 1);
        // Uncle at number 8 under a block at 10: (8 + 8 - 10) / 8 = 6/8 of
        // the base reward.
        let uncle = header(8, 2);

        accumulate_rewards(RewardPolicy::Classic, &forks, &mut state, &h, &[uncle]);

        let base = U256::from(FRONTIER_BLOCK_REWARD);
        assert_eq!(state.balances[&Address::repeat_byte(2)], base * 6 / 8);
        assert_eq!(state.balances[&Address::repeat_byte(1)], base + base / 32);
    }

    #[test]
    fn classic_uncle_beyond_window_earns_nothing() {
        let forks = ForkSchedule::default();
        let mut state = MockState::default();
        let h = header(100, 1);
        // Nine generations back: validation never lets this through, but the
        // formula must still floor at zero rather than wrap.
        let deep = header(91, 2);

        accumulate_rewards(RewardPolicy::Classic, &forks, &mut state, &h, &[deep]);

        let base = U256::from(FRONTIER_BLOCK_REWARD);
        assert_eq!(state.balances[&Address::repeat_byte(2)], U256::zero());
        assert_eq!(state.balances[&Address::repeat_byte(1)], base + base / 32);
    }

    #[test]
    fn dev_fund_address_decodes() {
        assert_eq!(
            DEV_FUND_ADDRESS,
            H160::from_slice(&hex::decode("3e2eb354ab9bcd0a4f0d80aed37544cb4573b0bd").unwrap())
        );
    }

    #[test]
    fn era_schedule_steps_down_at_thresholds() {
        for (number, want) in [
            (1u64, 8_000_000_000_000_000_000u128),
            (358_363, 8_000_000_000_000_000_000),
            (358_364, 7_000_000_000_000_000_000),
            (716_728, 6_000_000_000_000_000_000),
            (1_075_091, 5_000_000_000_000_000_000),
            (1_433_455, 4_000_000_000_000_000_000),
            (1_791_819, 3_000_000_000_000_000_000),
            (2_150_182, 2_000_000_000_000_000_000),
            (2_508_546, 1_000_000_000_000_000_000),
            (10_000_000, 1_000_000_000_000_000_000),
        ] {
            let mut state = MockState::default();
            accumulate_rewards(
                RewardPolicy::Era,
                &ForkSchedule::default(),
                &mut state,
                &header(number, 1),
                &[],
            );
            assert_eq!(
                state.balances[&Address::repeat_byte(1)],
                U256::from(want),
                "block {number}"
            );
            // Dev fund tracks at a tenth of the base for every era.
            assert_eq!(
                state.balances[&DEV_FUND_ADDRESS],
                U256::from(want / 10),
                "block {number}"
            );
        }
    }

    #[test]
    fn era_uncle_rewards_floor_at_zero() {
        let mut state = MockState::default();
        let h = header(1_000_000, 1);
        // Direct child uncle earns half the base; anything deeper earns 0.
        let near = header(999_999, 2);
        let deep = header(999_997, 3);

        accumulate_rewards(
            RewardPolicy::Era,
            &ForkSchedule::default(),
            &mut state,
            &h,
            &[near, deep],
        );

        let era_base = U256::from(ERA_BASE_REWARD);
        assert_eq!(state.balances[&Address::repeat_byte(2)], era_base / 2);
        assert_eq!(state.balances[&Address::repeat_byte(3)], U256::zero());
        // Miner: era reward for this height plus base/32 per included uncle.
        assert_eq!(
            state.balances[&Address::repeat_byte(1)],
            U256::from(6_000_000_000_000_000_000u128) + era_base / 32 * 2
        );
    }
}
