//! Memory-hard hashing core
//!
//! Pure, deterministic functions: Keccak helpers, the epoch seed chain, the
//! prime-bounded cache/dataset size schedules and the FNV combine shared by
//! the Ethash and Progpow mixers. Nothing here touches I/O or shared state;
//! all of it is safe to call concurrently on distinct inputs.

pub mod ethash;
pub mod progpow;

use sha3::{Digest, Keccak256, Keccak512};

/// Blocks per cache/dataset epoch.
pub const EPOCH_LENGTH: u64 = 30_000;

/// Bytes in a single hash row (Keccak-512 output).
pub const HASH_BYTES: usize = 64;
/// 32-bit words per hash row.
pub const HASH_WORDS: usize = HASH_BYTES / 4;
/// Width of the hashimoto mix in bytes.
pub const MIX_BYTES: usize = 128;
/// 32-bit words in the hashimoto mix.
pub const MIX_WORDS: usize = MIX_BYTES / 4;
/// Passes over the cache during generation.
pub const CACHE_ROUNDS: usize = 3;
/// Pseudo-random cache parents mixed into each dataset item.
pub const DATASET_PARENTS: u32 = 256;
/// Dataset accesses per hashimoto run.
pub const ACCESSES: usize = 64;

const CACHE_INIT_BYTES: u64 = 1 << 24;
const CACHE_GROWTH_BYTES: u64 = 1 << 17;
const DATASET_INIT_BYTES: u64 = 1 << 30;
const DATASET_GROWTH_BYTES: u64 = 1 << 23;

const FNV_PRIME: u32 = 0x01000193;

#[inline]
pub fn keccak256(data: &[u8]) -> [u8; 32] {
    Keccak256::digest(data).into()
}

#[inline]
pub fn keccak512(data: &[u8]) -> [u8; 64] {
    Keccak512::digest(data).into()
}

/// FNV-ish combine used throughout Ethash: `(x * prime) ^ y`.
#[inline]
pub fn fnv(x: u32, y: u32) -> u32 {
    x.wrapping_mul(FNV_PRIME) ^ y
}

/// Epoch index a block number falls into.
#[inline]
pub fn epoch(block_number: u64) -> u64 {
    block_number / EPOCH_LENGTH
}

/// Seed for the epoch a block belongs to: Keccak-256 applied to the zero
/// seed once per elapsed epoch. Pure function of the epoch index.
pub fn seed_hash(block_number: u64) -> [u8; 32] {
    let mut seed = [0u8; 32];
    for _ in 0..epoch(block_number) {
        seed = keccak256(&seed);
    }
    seed
}

/// Deterministic primality check, fast enough for the size schedule where
/// candidates stay under 2^32.
fn is_prime(n: u64) -> bool {
    if n < 2 {
        return false;
    }
    if n % 2 == 0 {
        return n == 2;
    }
    let mut i = 3u64;
    while i * i <= n {
        if n % i == 0 {
            return false;
        }
        i += 2;
    }
    true
}

/// Verification cache size in bytes for the given block number. Grows
/// linearly per epoch, backed off to the nearest size whose row count is
/// prime so the buffer cannot be cheaply compressed.
pub fn cache_size(block_number: u64) -> u64 {
    cache_size_by_epoch(epoch(block_number))
}

pub fn cache_size_by_epoch(epoch: u64) -> u64 {
    let mut size = CACHE_INIT_BYTES + CACHE_GROWTH_BYTES * epoch - HASH_BYTES as u64;
    while !is_prime(size / HASH_BYTES as u64) {
        size -= 2 * HASH_BYTES as u64;
    }
    size
}

/// Mining dataset size in bytes for the given block number; same prime-row
/// schedule as the cache but against the 128-byte mix width.
pub fn dataset_size(block_number: u64) -> u64 {
    dataset_size_by_epoch(epoch(block_number))
}

pub fn dataset_size_by_epoch(epoch: u64) -> u64 {
    let mut size = DATASET_INIT_BYTES + DATASET_GROWTH_BYTES * epoch - MIX_BYTES as u64;
    while !is_prime(size / MIX_BYTES as u64) {
        size -= 2 * MIX_BYTES as u64;
    }
    size
}
