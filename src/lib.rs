//! Proof-of-work consensus engine
//!
//! Implements the Ethash memory-hard sealing scheme (with a Progpow
//! variant), the epoch cache/dataset lifecycle behind it, fork-aware
//! difficulty adjustment, header and uncle validation, block reward
//! accumulation and a mining coordinator for local and remote miners.
//!
//! The [`Engine`] facade is the integration surface; everything underneath
//! is usable on its own:
//!
//! - [`hash`] — pure Keccak/hashimoto/Progpow functions and size schedules
//! - [`store`] — epoch-keyed LRU of caches and datasets with mmap dumps
//! - [`difficulty`] — fork-dispatched difficulty formulas
//! - [`validate`] — per-header and batched validation
//! - [`rewards`] — classic and era reward policies
//! - [`sealer`] — local nonce-search workers and the remote-sealer actor

pub mod config;
pub mod difficulty;
pub mod engine;
pub mod error;
pub mod hash;
pub mod rewards;
pub mod sealer;
pub mod store;
pub mod types;
pub mod validate;

pub use config::{Config, Mode};
pub use engine::Engine;
pub use error::{ConsensusError, SealerError};
pub use rewards::RewardPolicy;
pub use sealer::remote::{RemoteHandle, StakeWorkPackage, WorkPackage};
pub use sealer::{HashrateMeter, SealHandle};
pub use store::BufferStore;
pub use types::{Address, Block, ChainContext, ForkSchedule, Header, StateDb};
pub use validate::{Validator, VerifyHandle};
