//! Header, seal and uncle validation
//!
//! Per-header checks walk a fixed ladder (structure, timestamps,
//! difficulty, gas, number, seal) and stop at the first failure. Batch
//! verification fans headers out over a worker pool and hands results back
//! strictly in input order, with a shared abort flag for cancellation.

use crate::config::{Config, Mode};
use crate::difficulty::calc_difficulty;
use crate::error::ConsensusError;
use crate::hash::{dataset_size, ethash::hashimoto_light};
use crate::store::BufferStore;
use crate::types::{
    Block, ChainContext, ForkSchedule, Header, GAS_LIMIT_BOUND_DIVISOR, MAXIMUM_EXTRA_DATA_SIZE,
    MIN_GAS_LIMIT,
};
use primitive_types::{H256, U256};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::debug;

const TARGET: &str = "emberhash::validate";

/// Uncles may reference ancestors at most this many generations back.
const UNCLE_WINDOW: usize = 7;
/// Maximum uncles in one block.
const MAX_UNCLES: usize = 2;
/// Clock drift tolerated before a header counts as a future block.
const ALLOWED_FUTURE_SECONDS: u64 = 15;

/// Dataset byte size fed to `hashimoto_light` in test mode.
const TEST_DATASET_BYTES: u64 = 32 * 1024;

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Header validation rules bound to a fork schedule, an operating mode and
/// the buffer store supplying verification caches. Cheap to clone; batch
/// workers each carry one.
#[derive(Clone)]
pub struct Validator {
    forks: ForkSchedule,
    config: Config,
    store: Arc<BufferStore>,
}

impl Validator {
    pub fn new(forks: ForkSchedule, config: Config, store: Arc<BufferStore>) -> Self {
        Self {
            forks,
            config,
            store,
        }
    }

    /// Check a single header against its stored parent. Known headers are
    /// accepted without rechecking.
    pub fn verify_header(
        &self,
        chain: &dyn ChainContext,
        header: &Header,
        seal: bool,
    ) -> Result<(), ConsensusError> {
        if self.config.mode == Mode::FullFake {
            return Ok(());
        }
        if chain.get_header(header.hash(), header.number).is_some() {
            return Ok(());
        }
        let parent_number = header
            .number
            .checked_sub(1)
            .ok_or(ConsensusError::UnknownAncestor)?;
        let parent = chain
            .get_header(header.parent_hash, parent_number)
            .ok_or(ConsensusError::UnknownAncestor)?;
        self.verify_against_parent(header, &parent, false, seal)
    }

    /// The full check ladder for a header with a known parent.
    fn verify_against_parent(
        &self,
        header: &Header,
        parent: &Header,
        uncle: bool,
        seal: bool,
    ) -> Result<(), ConsensusError> {
        if header.extra_data.len() > MAXIMUM_EXTRA_DATA_SIZE {
            return Err(ConsensusError::ExtraDataTooLong {
                have: header.extra_data.len(),
                max: MAXIMUM_EXTRA_DATA_SIZE,
            });
        }
        // Uncles may sit anywhere in the recent past, so the wall-clock
        // bound only applies to canonical headers.
        if !uncle && header.time > unix_now() + ALLOWED_FUTURE_SECONDS {
            return Err(ConsensusError::FutureBlock);
        }
        if header.time <= parent.time {
            return Err(ConsensusError::InvalidTimestamp);
        }

        let expected = calc_difficulty(&self.forks, header.time, parent);
        if expected != header.difficulty {
            return Err(ConsensusError::InvalidDifficulty {
                have: header.difficulty,
                want: expected,
            });
        }

        if header.gas_limit > i64::MAX as u64 {
            return Err(ConsensusError::InvalidGasLimit {
                have: header.gas_limit,
                parent: parent.gas_limit,
            });
        }
        if header.gas_used > header.gas_limit {
            return Err(ConsensusError::InvalidGasUsed {
                have: header.gas_used,
                limit: header.gas_limit,
            });
        }
        let delta = header.gas_limit.abs_diff(parent.gas_limit);
        if delta >= parent.gas_limit / GAS_LIMIT_BOUND_DIVISOR || header.gas_limit < MIN_GAS_LIMIT {
            return Err(ConsensusError::InvalidGasLimit {
                have: header.gas_limit,
                parent: parent.gas_limit,
            });
        }

        if header.number != parent.number + 1 {
            return Err(ConsensusError::InvalidNumber);
        }

        if seal {
            self.verify_seal(header)?;
        }
        Ok(())
    }

    /// Recompute the proof-of-work and compare it against the header's seal
    /// fields. Fake modes accept anything, modulo the test hooks.
    pub fn verify_seal(&self, header: &Header) -> Result<(), ConsensusError> {
        if matches!(self.config.mode, Mode::Fake | Mode::FullFake) {
            if !self.config.fake_delay.is_zero() {
                thread::sleep(self.config.fake_delay);
            }
            if self.config.fake_fail != 0 && self.config.fake_fail == header.number {
                return Err(ConsensusError::InvalidProofOfWork);
            }
            return Ok(());
        }

        if header.difficulty.is_zero() {
            return Err(ConsensusError::InvalidDifficulty {
                have: U256::zero(),
                want: U256::one(),
            });
        }

        let cache = self.store.cache(header.number);
        let size = if self.config.mode == Mode::Test {
            TEST_DATASET_BYTES
        } else {
            dataset_size(header.number)
        };

        let (digest, result) =
            hashimoto_light(size, cache.data(), &header.seal_hash().0, header.nonce);
        if H256(digest) != header.mix_digest {
            return Err(ConsensusError::InvalidMixDigest);
        }
        let target = U256::MAX / header.difficulty;
        if U256::from_big_endian(&result) > target {
            return Err(ConsensusError::InvalidProofOfWork);
        }
        Ok(())
    }

    /// Check a block's uncles: bounded count, unrewarded, recent but not
    /// ancestral, and individually valid headers.
    pub fn verify_uncles(
        &self,
        chain: &dyn ChainContext,
        block: &Block,
    ) -> Result<(), ConsensusError> {
        if self.config.mode == Mode::FullFake {
            return Ok(());
        }
        if block.uncles.len() > MAX_UNCLES {
            return Err(ConsensusError::TooManyUncles);
        }

        // Collect the ancestor window and every uncle already rewarded in
        // it.
        let mut ancestors: HashMap<H256, Header> = HashMap::new();
        let mut seen: HashSet<H256> = HashSet::new();

        let mut parent = block.header.parent_hash;
        let mut number = block.number().wrapping_sub(1);
        for _ in 0..UNCLE_WINDOW {
            let Some(ancestor) = chain.get_block(parent, number) else {
                break;
            };
            for uncle in &ancestor.uncles {
                seen.insert(uncle.hash());
            }
            parent = ancestor.header.parent_hash;
            number = number.wrapping_sub(1);
            ancestors.insert(ancestor.hash(), ancestor.header);
        }
        ancestors.insert(block.hash(), block.header.clone());
        seen.insert(block.hash());

        for uncle in &block.uncles {
            let hash = uncle.hash();
            if !seen.insert(hash) {
                return Err(ConsensusError::DuplicateUncle);
            }
            if ancestors.contains_key(&hash) {
                return Err(ConsensusError::UncleIsAncestor);
            }
            let Some(uncle_parent) = ancestors.get(&uncle.parent_hash) else {
                return Err(ConsensusError::DanglingUncle);
            };
            if uncle.parent_hash == block.header.parent_hash {
                return Err(ConsensusError::DanglingUncle);
            }
            self.verify_against_parent(uncle, uncle_parent, true, true)?;
        }
        Ok(())
    }

    /// Verify a contiguous batch of headers concurrently. Results arrive on
    /// the handle in input order regardless of completion order; aborting
    /// stops dispatch and abandons whatever is still pending.
    pub fn verify_headers(
        &self,
        chain: Arc<dyn ChainContext>,
        headers: Vec<Header>,
        seals: Vec<bool>,
    ) -> VerifyHandle {
        let abort = Arc::new(AtomicBool::new(false));
        let (out_tx, out_rx) = mpsc::channel();

        if self.config.mode == Mode::FullFake || headers.is_empty() {
            for _ in 0..headers.len() {
                let _ = out_tx.send(Ok(()));
            }
            return VerifyHandle {
                abort,
                results: out_rx,
            };
        }

        let headers = Arc::new(headers);
        let seals = Arc::new(seals);
        let next = Arc::new(AtomicUsize::new(0));
        let workers = num_cpus::get().min(headers.len()).max(1);
        let (done_tx, done_rx) = mpsc::channel::<(usize, Result<(), ConsensusError>)>();

        for _ in 0..workers {
            let validator = self.clone();
            let chain = chain.clone();
            let headers = headers.clone();
            let seals = seals.clone();
            let next = next.clone();
            let abort = abort.clone();
            let done_tx = done_tx.clone();
            thread::spawn(move || loop {
                if abort.load(Ordering::Relaxed) {
                    break;
                }
                let index = next.fetch_add(1, Ordering::Relaxed);
                if index >= headers.len() {
                    break;
                }
                let result = validator.verify_batch_entry(&*chain, &headers, &seals, index);
                if done_tx.send((index, result)).is_err() {
                    break;
                }
            });
        }
        drop(done_tx);

        let total = headers.len();
        thread::spawn(move || {
            let mut pending: Vec<Option<Result<(), ConsensusError>>> = vec![None; total];
            let mut out = 0;
            while let Ok((index, result)) = done_rx.recv() {
                pending[index] = Some(result);
                while out < total {
                    let Some(result) = pending[out].take() else {
                        break;
                    };
                    if out_tx.send(result).is_err() {
                        return;
                    }
                    out += 1;
                }
                if out == total {
                    return;
                }
            }
            debug!(target: TARGET, delivered = out, total, "batch verification abandoned");
        });

        VerifyHandle {
            abort,
            results: out_rx,
        }
    }

    /// One batch slot: the parent is either chain-resolved (first entry) or
    /// the preceding batch entry when the hashes chain up.
    fn verify_batch_entry(
        &self,
        chain: &dyn ChainContext,
        headers: &[Header],
        seals: &[bool],
        index: usize,
    ) -> Result<(), ConsensusError> {
        let header = &headers[index];
        let parent = if index == 0 {
            header
                .number
                .checked_sub(1)
                .and_then(|n| chain.get_header(header.parent_hash, n))
        } else if headers[index - 1].hash() == header.parent_hash {
            Some(headers[index - 1].clone())
        } else {
            None
        };
        let Some(parent) = parent else {
            return Err(ConsensusError::UnknownAncestor);
        };
        if chain.get_header(header.hash(), header.number).is_some() {
            return Ok(());
        }
        self.verify_against_parent(header, &parent, false, seals[index])
    }
}

/// Live batch verification: per-header results in input order plus an abort
/// switch. Dropping the handle abandons the batch.
pub struct VerifyHandle {
    abort: Arc<AtomicBool>,
    results: mpsc::Receiver<Result<(), ConsensusError>>,
}

impl VerifyHandle {
    /// Stop dispatching further headers; undelivered results are dropped.
    pub fn abort(&self) {
        self.abort.store(true, Ordering::Relaxed);
    }

    /// Next result in input order, `None` once the batch is exhausted or
    /// aborted.
    pub fn next_result(&self) -> Option<Result<(), ConsensusError>> {
        self.results.recv().ok()
    }
}
