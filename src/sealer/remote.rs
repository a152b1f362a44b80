//! Remote-sealer actor for external miners
//!
//! All mutable coordinator state (current work, pending-work table, remote
//! hashrate samples) is owned by a single tokio task and touched only
//! there; callers talk to it through typed messages with oneshot replies.
//! Closing the actor drops the queue, which surfaces as `Stopped` to every
//! blocked caller instead of a hang.

use crate::config::Config;
use crate::error::SealerError;
use crate::hash::{keccak256, seed_hash};
use crate::sealer::HashrateMeter;
use crate::types::{Block, Header};
use crate::validate::Validator;
use primitive_types::{H256, U256};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

const TARGET: &str = "emberhash::remote";

/// Submitted solutions for blocks this far behind the current work are
/// rejected as stale.
const STALE_THRESHOLD: u64 = 7;
/// Tick driving staleness and hashrate expiry.
const PRUNE_INTERVAL: Duration = Duration::from_secs(5);
/// Remote hashrate samples older than this drop out of the total.
const HASHRATE_WINDOW: Duration = Duration::from_secs(10);
/// Per-endpoint budget for work notifications.
const NOTIFY_TIMEOUT: Duration = Duration::from_secs(1);

/// Work package handed to external proof-of-work miners.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WorkPackage {
    pub pow_hash: H256,
    pub seed_hash: H256,
    pub target: H256,
    pub number: u64,
}

impl WorkPackage {
    /// Wire form: `[powHash, seedHash, target, blockNumber]` as 0x-hex.
    pub fn to_rpc(&self) -> [String; 4] {
        [
            format!("0x{}", hex::encode(self.pow_hash)),
            format!("0x{}", hex::encode(self.seed_hash)),
            format!("0x{}", hex::encode(self.target)),
            format!("0x{:x}", self.number),
        ]
    }
}

/// Work package for the proof-of-stake sealing variant: the mix-digest slot
/// of a submission carries an opaque signature instead of an Ethash mix.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StakeWorkPackage {
    pub pow_hash: H256,
    pub receipt_hash: H256,
    pub rlp_header: Vec<u8>,
    pub number: u64,
}

impl StakeWorkPackage {
    /// Wire form: `[powHash, receiptHash, rlpHeaderHex, blockNumberHex]`.
    pub fn to_rpc(&self) -> [String; 4] {
        [
            format!("0x{}", hex::encode(self.pow_hash)),
            format!("0x{}", hex::encode(self.receipt_hash)),
            format!("0x{}", hex::encode(&self.rlp_header)),
            format!("0x{:x}", self.number),
        ]
    }
}

/// Signature check hook for stake-variant submissions. The engine treats
/// signatures as opaque bytes; real verification lives with the caller.
pub type BlsVerifier = Arc<dyn Fn(&Header, &[u8]) -> bool + Send + Sync>;

enum Message {
    NewWork {
        block: Block,
        results: mpsc::Sender<Block>,
    },
    NewStakeWork {
        header: Header,
        receipt_hash: H256,
        rlp_header: Vec<u8>,
        results: mpsc::Sender<Block>,
    },
    FetchWork {
        reply: oneshot::Sender<Result<WorkPackage, SealerError>>,
    },
    FetchStakeWork {
        reply: oneshot::Sender<Result<StakeWorkPackage, SealerError>>,
    },
    SubmitWork {
        nonce: u64,
        pow_hash: H256,
        mix_digest: H256,
        reply: oneshot::Sender<bool>,
    },
    SubmitWorkBls {
        nonce: u64,
        pow_hash: H256,
        signature: Vec<u8>,
        reply: oneshot::Sender<bool>,
    },
    SubmitHashrate {
        id: H256,
        rate: u64,
        reply: oneshot::Sender<bool>,
    },
    FetchHashrate {
        reply: oneshot::Sender<u64>,
    },
    Close,
}

/// Cloneable handle to the actor. All methods are safe to call after
/// close; they report `Stopped` (or `false`) instead of blocking.
#[derive(Clone)]
pub struct RemoteHandle {
    tx: mpsc::UnboundedSender<Message>,
}

impl RemoteHandle {
    /// Start the actor on the current tokio runtime.
    pub fn spawn(
        config: &Config,
        validator: Validator,
        meter: Arc<HashrateMeter>,
        bls: Option<BlsVerifier>,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let actor = Actor {
            validator,
            meter,
            bls,
            noverify: config.noverify,
            notify_urls: config.notify_urls.clone(),
            notify_full: config.notify_full,
            http: reqwest::Client::builder()
                .timeout(NOTIFY_TIMEOUT)
                .build()
                .unwrap_or_default(),
            current: None,
            current_stake: None,
            results: None,
            works: HashMap::new(),
            rates: HashMap::new(),
            notify_tasks: JoinSet::new(),
        };
        tokio::spawn(actor.run(rx));
        Self { tx }
    }

    /// Record a new sealing round: future fetches serve this work and
    /// configured endpoints get notified.
    pub fn notify_work(&self, block: Block, results: mpsc::Sender<Block>) {
        let _ = self.tx.send(Message::NewWork { block, results });
    }

    /// Record a stake-variant sealing round.
    pub fn notify_stake_work(
        &self,
        header: Header,
        receipt_hash: H256,
        rlp_header: Vec<u8>,
        results: mpsc::Sender<Block>,
    ) {
        let _ = self.tx.send(Message::NewStakeWork {
            header,
            receipt_hash,
            rlp_header,
            results,
        });
    }

    pub async fn fetch_work(&self) -> Result<WorkPackage, SealerError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Message::FetchWork { reply })
            .map_err(|_| SealerError::Stopped)?;
        rx.await.map_err(|_| SealerError::Stopped)?
    }

    pub async fn fetch_stake_work(&self) -> Result<StakeWorkPackage, SealerError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Message::FetchStakeWork { reply })
            .map_err(|_| SealerError::Stopped)?;
        rx.await.map_err(|_| SealerError::Stopped)?
    }

    /// Hand in a mined solution. Unknown work, stale work and a failed
    /// proof all collapse to `false` on the wire; the distinction is
    /// logged.
    pub async fn submit_work(&self, nonce: u64, pow_hash: H256, mix_digest: H256) -> bool {
        let (reply, rx) = oneshot::channel();
        if self
            .tx
            .send(Message::SubmitWork {
                nonce,
                pow_hash,
                mix_digest,
                reply,
            })
            .is_err()
        {
            return false;
        }
        rx.await.unwrap_or(false)
    }

    /// Stake-variant submission carrying a signature in place of the mix.
    pub async fn submit_work_bls(&self, nonce: u64, pow_hash: H256, signature: Vec<u8>) -> bool {
        let (reply, rx) = oneshot::channel();
        if self
            .tx
            .send(Message::SubmitWorkBls {
                nonce,
                pow_hash,
                signature,
                reply,
            })
            .is_err()
        {
            return false;
        }
        rx.await.unwrap_or(false)
    }

    /// Record a remote miner's self-reported rate; resolves once the sample
    /// is durably recorded.
    pub async fn submit_hashrate(&self, id: H256, rate: u64) -> bool {
        let (reply, rx) = oneshot::channel();
        if self
            .tx
            .send(Message::SubmitHashrate { id, rate, reply })
            .is_err()
        {
            return false;
        }
        rx.await.unwrap_or(false)
    }

    /// Local meter plus all live remote samples.
    pub async fn total_hashrate(&self) -> u64 {
        let (reply, rx) = oneshot::channel();
        if self.tx.send(Message::FetchHashrate { reply }).is_err() {
            return 0;
        }
        rx.await.unwrap_or(0)
    }

    /// Shut the actor down. Queued and future callers observe `Stopped`.
    pub fn close(&self) {
        let _ = self.tx.send(Message::Close);
    }
}

struct Actor {
    validator: Validator,
    meter: Arc<HashrateMeter>,
    bls: Option<BlsVerifier>,
    noverify: bool,
    notify_urls: Vec<String>,
    notify_full: bool,
    http: reqwest::Client,

    current: Option<WorkPackage>,
    current_stake: Option<StakeWorkPackage>,
    results: Option<mpsc::Sender<Block>>,
    // seal hash -> candidate block, pruned by staleness
    works: HashMap<H256, Block>,
    rates: HashMap<H256, (u64, Instant)>,
    // in-flight notification posts, cancelled and drained on shutdown
    notify_tasks: JoinSet<()>,
}

impl Actor {
    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<Message>) {
        let mut tick = tokio::time::interval(PRUNE_INTERVAL);
        loop {
            tokio::select! {
                msg = rx.recv() => match msg {
                    Some(Message::Close) | None => break,
                    Some(msg) => self.handle(msg).await,
                },
                _ = tick.tick() => self.prune(),
            }
        }
        rx.close();
        // Cancel in-flight notification posts and wait them out before
        // reporting the shutdown as complete.
        self.notify_tasks.shutdown().await;
        info!(target: TARGET, "remote sealer shut down");
    }

    async fn handle(&mut self, msg: Message) {
        match msg {
            Message::NewWork { block, results } => self.new_work(block, results),
            Message::NewStakeWork {
                header,
                receipt_hash,
                rlp_header,
                results,
            } => self.new_stake_work(header, receipt_hash, rlp_header, results),
            Message::FetchWork { reply } => {
                let _ = reply.send(self.current.clone().ok_or(SealerError::NoWork));
            }
            Message::FetchStakeWork { reply } => {
                let _ = reply.send(self.current_stake.clone().ok_or(SealerError::NoWork));
            }
            Message::SubmitWork {
                nonce,
                pow_hash,
                mix_digest,
                reply,
            } => {
                let accepted = self.submit_work(nonce, pow_hash, mix_digest).await;
                let _ = reply.send(accepted);
            }
            Message::SubmitWorkBls {
                nonce,
                pow_hash,
                signature,
                reply,
            } => {
                let _ = reply.send(self.submit_work_bls(nonce, pow_hash, &signature));
            }
            Message::SubmitHashrate { id, rate, reply } => {
                self.rates.insert(id, (rate, Instant::now()));
                let _ = reply.send(true);
            }
            Message::FetchHashrate { reply } => {
                let remote: u64 = self.rates.values().map(|&(rate, _)| rate).sum();
                let _ = reply.send(remote + self.meter.hashrate() as u64);
            }
            Message::Close => unreachable!("handled in run"),
        }
    }

    fn new_work(&mut self, block: Block, results: mpsc::Sender<Block>) {
        let pow_hash = block.header.seal_hash();
        let difficulty = if block.header.difficulty.is_zero() {
            U256::one()
        } else {
            block.header.difficulty
        };
        let mut target = [0u8; 32];
        (U256::MAX / difficulty).to_big_endian(&mut target);

        let package = WorkPackage {
            pow_hash,
            seed_hash: H256(seed_hash(block.number())),
            target: H256(target),
            number: block.number(),
        };
        debug!(
            target: TARGET,
            number = package.number,
            pow_hash = %package.pow_hash,
            "new remote work"
        );

        let body = if self.notify_full {
            json!(block.header)
        } else {
            json!(package.to_rpc())
        };
        for url in &self.notify_urls {
            let http = self.http.clone();
            let url = url.clone();
            let body = body.clone();
            self.notify_tasks.spawn(async move {
                match http.post(&url).json(&body).send().await {
                    Ok(resp) => debug!(target: TARGET, url = %url, status = %resp.status(), "notified remote miner"),
                    Err(err) => warn!(target: TARGET, url = %url, error = %err, "failed to notify remote miner"),
                }
            });
        }

        self.works.insert(pow_hash, block);
        self.current = Some(package);
        self.results = Some(results);
    }

    fn new_stake_work(
        &mut self,
        header: Header,
        receipt_hash: H256,
        rlp_header: Vec<u8>,
        results: mpsc::Sender<Block>,
    ) {
        let pow_hash = header.seal_hash();
        let package = StakeWorkPackage {
            pow_hash,
            receipt_hash,
            rlp_header,
            number: header.number,
        };
        debug!(target: TARGET, number = package.number, "new stake work");
        self.works.insert(pow_hash, Block::new(header));
        self.current_stake = Some(package);
        self.results = Some(results);
    }

    fn current_number(&self) -> u64 {
        let pow = self.current.as_ref().map(|w| w.number).unwrap_or(0);
        let stake = self.current_stake.as_ref().map(|w| w.number).unwrap_or(0);
        pow.max(stake)
    }

    async fn submit_work(&mut self, nonce: u64, pow_hash: H256, mix_digest: H256) -> bool {
        if self.current.is_none() && self.current_stake.is_none() {
            warn!(target: TARGET, pow_hash = %pow_hash, "work submitted but no pending work");
            return false;
        }
        let Some(block) = self.works.get(&pow_hash).cloned() else {
            warn!(target: TARGET, pow_hash = %pow_hash, "work submitted for unknown or stale work");
            return false;
        };

        if !self.noverify {
            let mut header = block.header.clone();
            header.nonce = nonce;
            header.mix_digest = mix_digest;
            // Seal verification can regenerate a cache, which takes seconds;
            // keep it off the actor's runtime thread.
            let validator = self.validator.clone();
            let verdict =
                tokio::task::spawn_blocking(move || validator.verify_seal(&header)).await;
            match verdict {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    warn!(target: TARGET, pow_hash = %pow_hash, error = %err, "invalid remote proof-of-work");
                    return false;
                }
                Err(err) => {
                    warn!(target: TARGET, pow_hash = %pow_hash, error = %err, "seal verification task failed");
                    return false;
                }
            }
        }

        let sealed = block.with_seal(nonce, mix_digest);
        self.deliver(sealed)
    }

    fn submit_work_bls(&mut self, nonce: u64, pow_hash: H256, signature: &[u8]) -> bool {
        let Some(verify) = self.bls.clone() else {
            warn!(target: TARGET, "signature submission but no verifier configured");
            return false;
        };
        let Some(block) = self.works.get(&pow_hash) else {
            warn!(target: TARGET, pow_hash = %pow_hash, "signature submitted for unknown or stale work");
            return false;
        };

        // The mix-digest slot carries a commitment to the signature blob.
        let mix_digest = H256(keccak256(signature));
        let mut header = block.header.clone();
        header.nonce = nonce;
        header.mix_digest = mix_digest;
        if !verify(&header, signature) {
            warn!(target: TARGET, pow_hash = %pow_hash, "signature verification failed");
            return false;
        }

        let sealed = block.with_seal(nonce, mix_digest);
        self.deliver(sealed)
    }

    fn deliver(&mut self, sealed: Block) -> bool {
        let current = self.current_number();
        if sealed.number() + STALE_THRESHOLD <= current {
            warn!(
                target: TARGET,
                number = sealed.number(),
                current,
                "stale solution rejected"
            );
            return false;
        }
        let Some(results) = &self.results else {
            return false;
        };
        match results.try_send(sealed) {
            Ok(()) => true,
            Err(_) => {
                warn!(target: TARGET, "solution not read by result sink");
                false
            }
        }
    }

    fn prune(&mut self) {
        let current = self.current_number();
        self.works
            .retain(|_, block| block.number() + STALE_THRESHOLD > current);
        self.rates
            .retain(|_, &mut (_, seen)| seen.elapsed() <= HASHRATE_WINDOW);
        // Reap finished notification tasks so the set stays bounded.
        while self.notify_tasks.try_join_next().is_some() {}
    }
}
