//! Consensus engine facade
//!
//! Ties the pieces together behind the surface a blockchain integrates
//! against: header preparation and verification, reward finalization,
//! sealing and hashrate reporting. Engines sharing one [`BufferStore`]
//! share generated caches and datasets without any process-wide state.

use crate::config::{Config, Mode};
use crate::difficulty::calc_difficulty;
use crate::error::ConsensusError;
use crate::rewards::{accumulate_rewards, RewardPolicy};
use crate::sealer::remote::{BlsVerifier, RemoteHandle};
use crate::sealer::{self, HashrateMeter, SealHandle};
use crate::store::BufferStore;
use crate::types::{Address, Block, ChainContext, ForkSchedule, Header, StateDb};
use crate::validate::{Validator, VerifyHandle};
use once_cell::sync::OnceCell;
use primitive_types::H256;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::info;

pub struct Engine {
    forks: ForkSchedule,
    policy: RewardPolicy,
    config: Config,
    store: Arc<BufferStore>,
    validator: Validator,
    meter: Arc<HashrateMeter>,
    remote: OnceCell<RemoteHandle>,
}

impl Engine {
    /// Engine with its own private buffer store.
    pub fn new(config: Config, forks: ForkSchedule, policy: RewardPolicy) -> Self {
        let store = Arc::new(BufferStore::new(&config));
        Self::with_shared_store(config, forks, policy, store)
    }

    /// Engine backed by an explicitly shared store; several engine handles
    /// built over the same `Arc` reuse each other's generated buffers.
    pub fn with_shared_store(
        mut config: Config,
        forks: ForkSchedule,
        policy: RewardPolicy,
        store: Arc<BufferStore>,
    ) -> Self {
        if Arc::strong_count(&store) > 1 && config.mode == Mode::Normal {
            config.mode = Mode::Shared;
        }
        info!(
            target: "emberhash::engine",
            mode = ?config.mode,
            "consensus engine initialized"
        );
        let validator = Validator::new(forks.clone(), config.clone(), store.clone());
        Self {
            forks,
            policy,
            config,
            store,
            validator,
            meter: Arc::new(HashrateMeter::new()),
            remote: OnceCell::new(),
        }
    }

    /// The store backing this engine, for sharing with further handles.
    pub fn store(&self) -> Arc<BufferStore> {
        self.store.clone()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Start the remote-sealer actor. Must be called on a tokio runtime;
    /// idempotent, later calls return the existing handle.
    pub fn start_remote(&self, bls: Option<BlsVerifier>) -> &RemoteHandle {
        self.remote.get_or_init(|| {
            RemoteHandle::spawn(&self.config, self.validator.clone(), self.meter.clone(), bls)
        })
    }

    /// Actor handle if `start_remote` has run.
    pub fn remote(&self) -> Option<&RemoteHandle> {
        self.remote.get()
    }

    /// The account that will receive this block's rewards.
    pub fn author(&self, header: &Header) -> Address {
        header.coinbase
    }

    /// Hash miners grind against for `header`.
    pub fn seal_hash(&self, header: &Header) -> H256 {
        header.seal_hash()
    }

    /// Fill in the difficulty a new header must carry over its parent.
    pub fn prepare(
        &self,
        chain: &dyn ChainContext,
        header: &mut Header,
    ) -> Result<(), ConsensusError> {
        let parent_number = header
            .number
            .checked_sub(1)
            .ok_or(ConsensusError::UnknownAncestor)?;
        let parent = chain
            .get_header(header.parent_hash, parent_number)
            .ok_or(ConsensusError::UnknownAncestor)?;
        header.difficulty = calc_difficulty(&self.forks, header.time, &parent);
        Ok(())
    }

    /// Credit block and uncle rewards under the configured policy.
    pub fn finalize(&self, state: &mut dyn StateDb, header: &Header, uncles: &[Header]) {
        accumulate_rewards(self.policy, &self.forks, state, header, uncles);
    }

    pub fn verify_header(
        &self,
        chain: &dyn ChainContext,
        header: &Header,
        seal: bool,
    ) -> Result<(), ConsensusError> {
        self.validator.verify_header(chain, header, seal)
    }

    pub fn verify_headers(
        &self,
        chain: Arc<dyn ChainContext>,
        headers: Vec<Header>,
        seals: Vec<bool>,
    ) -> VerifyHandle {
        self.validator.verify_headers(chain, headers, seals)
    }

    pub fn verify_uncles(
        &self,
        chain: &dyn ChainContext,
        block: &Block,
    ) -> Result<(), ConsensusError> {
        self.validator.verify_uncles(chain, block)
    }

    pub fn verify_seal(&self, header: &Header) -> Result<(), ConsensusError> {
        self.validator.verify_seal(header)
    }

    /// Start sealing `block`: local workers search nonces and, when the
    /// remote actor is running, external miners get the work too. At most
    /// one sealed block arrives on `results`.
    pub fn seal(&self, block: &Block, results: mpsc::Sender<Block>) -> SealHandle {
        if let Some(remote) = self.remote.get() {
            remote.notify_work(block.clone(), results.clone());
        }
        sealer::seal(&self.store, &self.config, &self.meter, block, results)
    }

    /// Local worker hashrate. The total including remote miners lives on
    /// the actor handle (`remote().total_hashrate()`).
    pub fn hashrate(&self) -> f64 {
        self.meter.hashrate()
    }
}
