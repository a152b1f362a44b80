//! Engine configuration
//!
//! Covers the buffer store (directories, in-memory and on-disk retention),
//! the proof-of-work mode, local miner threads and the remote-notify surface.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Proof-of-work operating mode.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Mode {
    /// Full production behavior.
    Normal,
    /// Engine handle backed by a store shared with other engine instances.
    Shared,
    /// Real algorithm over tiny test-sized buffers.
    Test,
    /// Seals are accepted without running the PoW (optional delay and a
    /// single force-failing block number for tests).
    Fake,
    /// Everything short-circuits to success, including header checks.
    FullFake,
}

impl Default for Mode {
    fn default() -> Self {
        Mode::Normal
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Config {
    /// Directory for persisted verification caches; `None` keeps them
    /// memory-only.
    pub cache_dir: Option<PathBuf>,
    /// Verification caches kept in memory (minimum 1 enforced).
    pub caches_in_mem: usize,
    /// Cache files retained on disk beyond the current epoch.
    pub caches_on_disk: usize,

    /// Directory for persisted mining datasets; `None` keeps them
    /// memory-only.
    pub dataset_dir: Option<PathBuf>,
    /// Mining datasets kept in memory (minimum 1 enforced).
    pub datasets_in_mem: usize,
    /// Dataset files retained on disk beyond the current epoch.
    pub datasets_on_disk: usize,

    pub mode: Mode,
    /// Block number `verify_seal` force-fails in `Fake` mode (0 = never).
    pub fake_fail: u64,
    /// Sleep applied per fake seal verification.
    #[serde(skip)]
    pub fake_delay: Duration,

    /// Local mining threads: 0 = all logical CPUs, negative = local mining
    /// disabled.
    pub miner_threads: i32,
    /// Remote miner endpoints notified of new work (fire-and-forget).
    pub notify_urls: Vec<String>,
    /// Push the full header JSON instead of the 4-tuple work package.
    pub notify_full: bool,
    /// Skip seal re-verification of remote submissions (trusted miners).
    pub noverify: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            cache_dir: None,
            caches_in_mem: 2,
            caches_on_disk: 3,
            dataset_dir: None,
            datasets_in_mem: 1,
            datasets_on_disk: 2,
            mode: Mode::Normal,
            fake_fail: 0,
            fake_delay: Duration::ZERO,
            miner_threads: 0,
            notify_urls: Vec::new(),
            notify_full: false,
            noverify: false,
        }
    }
}

impl Config {
    /// Test-mode config: tiny buffers, no disk, no remote notifications.
    pub fn test() -> Self {
        Self {
            mode: Mode::Test,
            caches_in_mem: 1,
            datasets_in_mem: 1,
            ..Default::default()
        }
    }

    /// Fully-faked config for harnesses that never touch real PoW.
    pub fn full_fake() -> Self {
        Self {
            mode: Mode::FullFake,
            ..Default::default()
        }
    }
}
