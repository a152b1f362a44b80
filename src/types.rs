//! Boundary types shared with the surrounding blockchain
//!
//! The engine consumes headers and blocks produced elsewhere and only ever
//! fills in `difficulty`, `mix_digest` and `nonce`. Chain access and the
//! state database are narrow collaborator traits; real implementations live
//! outside this crate.

use primitive_types::{H160, H256, U256};
use serde::{Deserialize, Serialize};
use sha3::{Digest, Keccak256};

pub type Address = H160;

/// Keccak-256 hash of an RLP-encoded empty uncle list. Headers carrying this
/// value have no uncles, which feeds into the difficulty calculation.
pub const EMPTY_UNCLE_HASH: H256 = H256(hex_literal(
    b"1dcc4de8dec75d7aab85b567b6ccd41ad312451b948a7413f0a142fd40d49347",
));

/// Maximum number of bytes a header's extra-data section may carry.
pub const MAXIMUM_EXTRA_DATA_SIZE: usize = 32;

/// Divisor bounding per-block gas limit movement.
pub const GAS_LIMIT_BOUND_DIVISOR: u64 = 1024;

/// Minimum gas limit a block may declare.
pub const MIN_GAS_LIMIT: u64 = 5000;

const fn hex_val(c: u8) -> u8 {
    match c {
        b'0'..=b'9' => c - b'0',
        b'a'..=b'f' => c - b'a' + 10,
        _ => 0,
    }
}

const fn hex_literal(s: &[u8; 64]) -> [u8; 32] {
    let mut out = [0u8; 32];
    let mut i = 0;
    while i < 32 {
        out[i] = hex_val(s[2 * i]) << 4 | hex_val(s[2 * i + 1]);
        i += 1;
    }
    out
}

pub(crate) const fn hex_literal_20(s: &[u8; 40]) -> [u8; 20] {
    let mut out = [0u8; 20];
    let mut i = 0;
    while i < 20 {
        out[i] = hex_val(s[2 * i]) << 4 | hex_val(s[2 * i + 1]);
        i += 1;
    }
    out
}

/// Block header as consumed by the engine. All fields are read-only except
/// `difficulty` (set by `prepare`) and `mix_digest`/`nonce` (set by sealing).
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Header {
    pub parent_hash: H256,
    pub uncle_hash: H256,
    pub coinbase: Address,
    pub number: u64,
    pub time: u64,
    pub difficulty: U256,
    pub gas_limit: u64,
    pub gas_used: u64,
    pub extra_data: Vec<u8>,
    pub mix_digest: H256,
    pub nonce: u64,
}

impl Header {
    /// Hash of the header with `mix_digest` and `nonce` zeroed out; the value
    /// miners grind against. RLP lives outside this crate, so the encoding
    /// here is a fixed-layout byte concatenation of the remaining fields.
    pub fn seal_hash(&self) -> H256 {
        let mut hasher = Keccak256::new();
        hasher.update(self.parent_hash.as_bytes());
        hasher.update(self.uncle_hash.as_bytes());
        hasher.update(self.coinbase.as_bytes());
        hasher.update(self.number.to_be_bytes());
        hasher.update(self.time.to_be_bytes());
        let mut diff = [0u8; 32];
        self.difficulty.to_big_endian(&mut diff);
        hasher.update(diff);
        hasher.update(self.gas_limit.to_be_bytes());
        hasher.update(self.gas_used.to_be_bytes());
        hasher.update((self.extra_data.len() as u64).to_be_bytes());
        hasher.update(&self.extra_data);
        H256(hasher.finalize().into())
    }

    /// Full header hash including the seal fields.
    pub fn hash(&self) -> H256 {
        let mut hasher = Keccak256::new();
        hasher.update(self.seal_hash().as_bytes());
        hasher.update(self.mix_digest.as_bytes());
        hasher.update(self.nonce.to_be_bytes());
        H256(hasher.finalize().into())
    }

    /// True when the header carries no uncles.
    pub fn uncles_empty(&self) -> bool {
        self.uncle_hash == EMPTY_UNCLE_HASH || self.uncle_hash == H256::zero()
    }
}

/// Block as consumed by verification and sealing: a header plus its uncles.
/// Transactions and receipts never enter the engine.
#[derive(Clone, Debug, Default)]
pub struct Block {
    pub header: Header,
    pub uncles: Vec<Header>,
}

impl Block {
    pub fn new(header: Header) -> Self {
        Self {
            header,
            uncles: Vec::new(),
        }
    }

    pub fn number(&self) -> u64 {
        self.header.number
    }

    pub fn hash(&self) -> H256 {
        self.header.hash()
    }

    /// Block with the sealing result folded into its header.
    pub fn with_seal(&self, nonce: u64, mix_digest: H256) -> Block {
        let mut sealed = self.clone();
        sealed.header.nonce = nonce;
        sealed.header.mix_digest = mix_digest;
        sealed
    }
}

/// Read access to already-stored chain data, used for parent and ancestor
/// lookups during validation.
pub trait ChainContext: Send + Sync {
    fn get_header(&self, hash: H256, number: u64) -> Option<Header>;
    fn get_block(&self, hash: H256, number: u64) -> Option<Block>;
}

/// Balance mutation surface of the external state database. Reward
/// accumulation is the only thing the engine ever does to state.
pub trait StateDb {
    fn add_balance(&mut self, address: Address, amount: U256);
}

/// Fork activation schedule. `None` means the fork never activates.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ForkSchedule {
    pub homestead_block: Option<u64>,
    pub byzantium_block: Option<u64>,
    pub constantinople_block: Option<u64>,
    /// Use the era chain's legacy 88-second adjustment step (no ice-age
    /// bomb) instead of the fork ladder.
    pub era_difficulty: bool,
}

impl ForkSchedule {
    /// Mainnet-shaped schedule used throughout the tests.
    pub fn mainline() -> Self {
        Self {
            homestead_block: Some(1_150_000),
            byzantium_block: Some(4_370_000),
            constantinople_block: Some(7_280_000),
            era_difficulty: false,
        }
    }

    pub fn is_homestead(&self, number: u64) -> bool {
        self.homestead_block.map_or(false, |b| number >= b)
    }

    pub fn is_byzantium(&self, number: u64) -> bool {
        self.byzantium_block.map_or(false, |b| number >= b)
    }

    pub fn is_constantinople(&self, number: u64) -> bool {
        self.constantinople_block.map_or(false, |b| number >= b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_uncle_hash_decodes() {
        assert_eq!(
            EMPTY_UNCLE_HASH,
            H256::from_slice(
                &hex::decode("1dcc4de8dec75d7aab85b567b6ccd41ad312451b948a7413f0a142fd40d49347")
                    .unwrap()
            )
        );
    }

    #[test]
    fn seal_hash_ignores_seal_fields() {
        let mut header = Header {
            number: 7,
            time: 1000,
            difficulty: U256::from(131072),
            ..Default::default()
        };
        let before = header.seal_hash();
        header.nonce = 42;
        header.mix_digest = H256::repeat_byte(0xaa);
        assert_eq!(before, header.seal_hash());
        assert_ne!(header.hash(), before);
    }

    #[test]
    fn fork_schedule_activation() {
        let forks = ForkSchedule::mainline();
        assert!(!forks.is_homestead(0));
        assert!(forks.is_homestead(1_150_000));
        assert!(forks.is_byzantium(4_370_000));
        assert!(!forks.is_constantinople(4_370_000));
    }
}
