//! End-to-end engine flows over an in-memory chain.

use emberhash::difficulty::calc_difficulty;
use emberhash::{
    Address, Block, ChainContext, Config, ConsensusError, Engine, ForkSchedule, Header, Mode,
    RewardPolicy, StateDb,
};
use parking_lot::RwLock;
use primitive_types::{H256, U256};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;

fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

#[derive(Default)]
struct MemChain {
    blocks: RwLock<HashMap<H256, Block>>,
}

impl MemChain {
    fn insert(&self, block: Block) {
        self.blocks.write().insert(block.hash(), block);
    }
}

impl ChainContext for MemChain {
    fn get_header(&self, hash: H256, _number: u64) -> Option<Header> {
        self.blocks.read().get(&hash).map(|b| b.header.clone())
    }

    fn get_block(&self, hash: H256, _number: u64) -> Option<Block> {
        self.blocks.read().get(&hash).cloned()
    }
}

#[derive(Default)]
struct MemState {
    balances: HashMap<Address, U256>,
}

impl StateDb for MemState {
    fn add_balance(&mut self, address: Address, amount: U256) {
        *self.balances.entry(address).or_default() += amount;
    }
}

fn genesis() -> Header {
    Header {
        number: 0,
        time: 1_000_000,
        difficulty: U256::from(131_072u64),
        gas_limit: 1_000_000,
        ..Default::default()
    }
}

/// Grow a short chain under the fake sealer: prepare, seal, verify, then
/// finalize rewards for every block.
#[tokio::test]
async fn fake_mode_block_lifecycle() {
    init_tracing();
    let mut config = Config::default();
    config.mode = Mode::Fake;
    let engine = Engine::new(config, ForkSchedule::default(), RewardPolicy::Classic);
    let chain = MemChain::default();
    let mut state = MemState::default();

    let coinbase = Address::repeat_byte(0x42);
    let mut parent = genesis();
    chain.insert(Block::new(parent.clone()));

    for _ in 0..5 {
        let mut header = Header {
            parent_hash: parent.hash(),
            number: parent.number + 1,
            time: parent.time + 10,
            gas_limit: parent.gas_limit,
            coinbase,
            ..Default::default()
        };
        engine.prepare(&chain, &mut header).unwrap();

        let (tx, mut rx) = mpsc::channel(1);
        let _seal = engine.seal(&Block::new(header), tx);
        let sealed = rx.recv().await.expect("fake seal");

        engine
            .verify_header(&chain, &sealed.header, true)
            .expect("sealed block must validate");
        engine.verify_uncles(&chain, &sealed).unwrap();
        engine.finalize(&mut state, &sealed.header, &sealed.uncles);

        parent = sealed.header.clone();
        chain.insert(sealed);
    }

    // Five blocks at five coins each under the pre-Byzantium schedule.
    assert_eq!(
        state.balances[&coinbase],
        U256::from(5u64) * U256::from(5_000_000_000_000_000_000u128)
    );
}

/// Real proof-of-work in test mode: mine a block locally at a low
/// difficulty and feed the exact same solution in through the remote
/// submission path.
#[tokio::test]
async fn mined_seal_accepted_locally_and_remotely() {
    init_tracing();
    let engine = Engine::new(Config::test(), ForkSchedule::default(), RewardPolicy::Classic);
    let block = Block::new(Header {
        number: 1,
        time: 1,
        difficulty: U256::from(16u64),
        ..Default::default()
    });

    let remote = engine.start_remote(None).clone();
    let (tx, mut rx) = mpsc::channel(4);
    let _seal = engine.seal(&block, tx);

    let sealed = rx.recv().await.expect("local miner finds a seal");
    assert_eq!(engine.verify_seal(&sealed.header), Ok(()));

    let package = remote.fetch_work().await.unwrap();
    assert_eq!(package.pow_hash, engine.seal_hash(&block.header));
    assert!(
        remote
            .submit_work(sealed.header.nonce, package.pow_hash, sealed.header.mix_digest)
            .await
    );
    let resubmitted = rx.recv().await.expect("remote path delivers the block");
    assert_eq!(resubmitted.header.nonce, sealed.header.nonce);
}

/// Batch verification keeps input order and pinpoints the broken header.
#[test]
fn batch_verification_orders_results() {
    init_tracing();
    let mut config = Config::default();
    config.mode = Mode::Fake;
    let engine = Engine::new(config, ForkSchedule::default(), RewardPolicy::Classic);
    let chain = MemChain::default();
    let forks = ForkSchedule::default();

    let mut parent = genesis();
    chain.insert(Block::new(parent.clone()));

    let mut headers = Vec::new();
    for _ in 0..12 {
        let time = parent.time + 10;
        let header = Header {
            parent_hash: parent.hash(),
            number: parent.number + 1,
            time,
            difficulty: calc_difficulty(&forks, time, &parent),
            gas_limit: parent.gas_limit,
            ..Default::default()
        };
        headers.push(header.clone());
        parent = header;
    }
    headers[6].time = headers[5].time; // timestamp must move forward

    let handle = engine.verify_headers(
        Arc::new(chain) as Arc<dyn ChainContext>,
        headers,
        vec![true; 12],
    );
    for i in 0..6 {
        assert_eq!(handle.next_result(), Some(Ok(())), "header {i}");
    }
    assert_eq!(
        handle.next_result(),
        Some(Err(ConsensusError::InvalidTimestamp))
    );
}
