//! Local mining workers and hashrate accounting
//!
//! Sealing spawns one OS thread per configured worker, each scanning
//! linearly upward from a random disjoint start nonce with `hashimoto_full`.
//! The first worker to find a valid seal wins; a shared stop flag pulls the
//! rest down. The remote-sealer actor for external miners lives in
//! [`remote`].

pub mod remote;

use crate::config::{Config, Mode};
use crate::hash::ethash::hashimoto_full;
use crate::store::BufferStore;
use crate::types::Block;
use parking_lot::Mutex;
use primitive_types::{H256, U256};
use rand::Rng;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};

const TARGET: &str = "emberhash::sealer";

/// Attempts between hashrate reports from a worker.
const REPORT_INTERVAL: u64 = 1 << 15;

/// Rolling-window hashrate meter shared by local workers; remote miner
/// samples are tracked separately by the actor and summed on demand.
pub struct HashrateMeter {
    inner: Mutex<MeterInner>,
}

struct MeterInner {
    samples: VecDeque<(Instant, u64)>,
    window: Duration,
    total_hashes: u64,
}

impl HashrateMeter {
    pub fn new() -> Self {
        Self::with_window(Duration::from_secs(30))
    }

    pub fn with_window(window: Duration) -> Self {
        Self {
            inner: Mutex::new(MeterInner {
                samples: VecDeque::with_capacity(120),
                window,
                total_hashes: 0,
            }),
        }
    }

    /// Record a batch of attempts and drop samples past the window.
    pub fn record(&self, hashes: u64) {
        let now = Instant::now();
        let mut inner = self.inner.lock();
        inner.total_hashes += hashes;
        inner.samples.push_back((now, hashes));

        let cutoff = now - inner.window;
        while let Some(&(ts, _)) = inner.samples.front() {
            if ts < cutoff {
                inner.samples.pop_front();
            } else {
                break;
            }
        }
    }

    /// Current rate in hashes per second over the rolling window.
    pub fn hashrate(&self) -> f64 {
        let inner = self.inner.lock();
        if inner.samples.len() < 2 {
            return 0.0;
        }
        let first = inner.samples.front().unwrap().0;
        let last = inner.samples.back().unwrap().0;
        let elapsed = last.duration_since(first).as_secs_f64();
        if elapsed < 0.001 {
            return 0.0;
        }
        let total: u64 = inner.samples.iter().map(|&(_, h)| h).sum();
        total as f64 / elapsed
    }

    pub fn total_hashes(&self) -> u64 {
        self.inner.lock().total_hashes
    }
}

impl Default for HashrateMeter {
    fn default() -> Self {
        Self::new()
    }
}

/// Control handle for one sealing round. Aborting (or dropping) the handle
/// stops every worker promptly; finished workers exit on their own.
pub struct SealHandle {
    stop: Arc<AtomicBool>,
}

impl SealHandle {
    pub fn abort(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }
}

impl Drop for SealHandle {
    fn drop(&mut self) {
        self.abort();
    }
}

/// Start searching for a seal on `block`, delivering at most one sealed
/// block through `results`. Fake modes short-circuit to a zero seal.
pub fn seal(
    store: &BufferStore,
    config: &Config,
    meter: &Arc<HashrateMeter>,
    block: &Block,
    results: mpsc::Sender<Block>,
) -> SealHandle {
    let stop = Arc::new(AtomicBool::new(false));
    let handle = SealHandle { stop: stop.clone() };

    if matches!(config.mode, Mode::Fake | Mode::FullFake) {
        if !config.fake_delay.is_zero() {
            thread::sleep(config.fake_delay);
        }
        let sealed = block.with_seal(0, H256::zero());
        if results.try_send(sealed).is_err() {
            warn!(target: TARGET, number = block.number(), "fake seal not read by result sink");
        }
        return handle;
    }

    let threads = match config.miner_threads {
        t if t < 0 => {
            // Local mining disabled, remote miners only.
            return handle;
        }
        0 => num_cpus::get(),
        t => t as usize,
    };

    let dataset = store.dataset(block.number(), false);
    info!(
        target: TARGET,
        number = block.number(),
        threads,
        "starting local seal search"
    );

    let mut rng = rand::thread_rng();
    for id in 0..threads {
        let start_nonce: u64 = rng.gen();
        let worker = Worker {
            id,
            block: block.clone(),
            dataset: dataset.clone(),
            meter: meter.clone(),
            stop: stop.clone(),
            results: results.clone(),
        };
        let spawned = thread::Builder::new()
            .name(format!("emberhash-miner-{id}"))
            .spawn(move || worker.mine(start_nonce));
        if let Err(err) = spawned {
            warn!(target: TARGET, error = %err, "failed to spawn mining worker");
        }
    }
    handle
}

struct Worker {
    id: usize,
    block: Block,
    dataset: Arc<crate::store::DatasetEntry>,
    meter: Arc<HashrateMeter>,
    stop: Arc<AtomicBool>,
    results: mpsc::Sender<Block>,
}

impl Worker {
    fn mine(self, start_nonce: u64) {
        let header = &self.block.header;
        let seal_hash = header.seal_hash();
        let difficulty = if header.difficulty.is_zero() {
            U256::one()
        } else {
            header.difficulty
        };
        let target = U256::MAX / difficulty;
        let dataset = self.dataset.data();
        if dataset.is_empty() {
            // Spawner hands workers generated datasets; an empty slice means
            // generation was skipped and hashing over it would divide by zero.
            warn!(target: TARGET, worker = self.id, "dataset not generated, worker exiting");
            return;
        }

        trace!(
            target: TARGET,
            worker = self.id,
            start_nonce,
            "seal search started"
        );

        let mut nonce = start_nonce;
        let mut attempts = 0u64;
        loop {
            if self.stop.load(Ordering::Relaxed) {
                break;
            }
            if attempts == REPORT_INTERVAL {
                self.meter.record(attempts);
                attempts = 0;
            }
            attempts += 1;

            let (digest, result) = hashimoto_full(dataset, &seal_hash.0, nonce);
            if U256::from_big_endian(&result) <= target {
                // First solution wins; everyone else sees the flag flip.
                if !self.stop.swap(true, Ordering::SeqCst) {
                    let sealed = self.block.with_seal(nonce, H256(digest));
                    debug!(
                        target: TARGET,
                        worker = self.id,
                        number = sealed.number(),
                        nonce,
                        "seal found"
                    );
                    if self.results.try_send(sealed).is_err() {
                        warn!(target: TARGET, worker = self.id, "seal not read by result sink");
                    }
                }
                break;
            }
            nonce = nonce.wrapping_add(1);
        }
        self.meter.record(attempts);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Header;

    #[test]
    fn meter_tracks_rate_and_total() {
        let meter = HashrateMeter::new();
        meter.record(1000);
        thread::sleep(Duration::from_millis(50));
        meter.record(1000);
        assert!(meter.hashrate() > 0.0);
        assert_eq!(meter.total_hashes(), 2000);
    }

    #[test]
    fn meter_expires_old_samples() {
        let meter = HashrateMeter::with_window(Duration::from_millis(20));
        meter.record(500);
        thread::sleep(Duration::from_millis(50));
        meter.record(500);
        // Only the latest sample survives the window, so no rate yet.
        assert_eq!(meter.hashrate(), 0.0);
        assert_eq!(meter.total_hashes(), 1000);
    }

    #[tokio::test]
    async fn finds_seal_at_low_difficulty() {
        let config = Config::test();
        let store = BufferStore::new(&config);
        let meter = Arc::new(HashrateMeter::new());

        // Difficulty one: the first nonce tried wins.
        let block = Block::new(Header {
            number: 1,
            time: 1,
            difficulty: U256::one(),
            ..Default::default()
        });

        let (tx, mut rx) = mpsc::channel(1);
        let _handle = seal(&store, &config, &meter, &block, tx);

        let sealed = rx.recv().await.expect("a seal must arrive");
        assert_eq!(sealed.number(), 1);
        let cache = store.cache(1);
        let (digest, _) = crate::hash::ethash::hashimoto_light(
            32 * 1024,
            cache.data(),
            &sealed.header.seal_hash().0,
            sealed.header.nonce,
        );
        assert_eq!(H256(digest), sealed.header.mix_digest);
    }

    #[tokio::test]
    async fn abort_stops_workers_without_result() {
        let mut config = Config::test();
        config.miner_threads = 2;
        let store = BufferStore::new(&config);
        let meter = Arc::new(HashrateMeter::new());

        // An unreachable target keeps workers spinning until aborted.
        let block = Block::new(Header {
            number: 1,
            time: 1,
            difficulty: U256::MAX,
            ..Default::default()
        });

        let (tx, mut rx) = mpsc::channel(1);
        let handle = seal(&store, &config, &meter, &block, tx);
        handle.abort();

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn fake_mode_seals_immediately() {
        let config = Config::full_fake();
        let store = BufferStore::new(&config);
        let meter = Arc::new(HashrateMeter::new());
        let block = Block::new(Header {
            number: 5,
            ..Default::default()
        });

        let (tx, mut rx) = mpsc::channel(1);
        let _handle = seal(&store, &config, &meter, &block, tx);
        let sealed = rx.recv().await.unwrap();
        assert_eq!(sealed.header.nonce, 0);
        assert_eq!(sealed.header.mix_digest, H256::zero());
    }
}
