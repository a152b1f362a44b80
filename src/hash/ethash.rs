//! Ethash cache/dataset generation and the hashimoto mixer
//!
//! Word-exact port of the consensus algorithm: buffers are `u32` slices in
//! host order, converted to little-endian bytes at every Keccak boundary so
//! results are identical across host endianness.

use super::{
    fnv, keccak256, keccak512, ACCESSES, CACHE_ROUNDS, DATASET_PARENTS, HASH_BYTES, HASH_WORDS,
    MIX_BYTES, MIX_WORDS,
};
use rayon::prelude::*;
use std::time::Instant;
use tracing::info;

#[inline]
fn row_to_bytes(words: &[u32]) -> [u8; HASH_BYTES] {
    let mut out = [0u8; HASH_BYTES];
    for (i, w) in words.iter().enumerate() {
        out[i * 4..i * 4 + 4].copy_from_slice(&w.to_le_bytes());
    }
    out
}

#[inline]
fn bytes_to_row(bytes: &[u8; HASH_BYTES]) -> [u32; HASH_WORDS] {
    let mut out = [0u32; HASH_WORDS];
    for (i, w) in out.iter_mut().enumerate() {
        *w = u32::from_le_bytes([
            bytes[i * 4],
            bytes[i * 4 + 1],
            bytes[i * 4 + 2],
            bytes[i * 4 + 3],
        ]);
    }
    out
}

/// Fill `dest` with the verification cache for an epoch: a sequential
/// Keccak-512 chain over the seed, then `CACHE_ROUNDS` RandMemoHash passes
/// where every row is rebuilt from its predecessor XOR a pseudo-randomly
/// addressed row.
pub fn generate_cache(dest: &mut [u32], epoch: u64, seed: &[u8; 32]) {
    let start = Instant::now();
    let rows = dest.len() / HASH_WORDS;

    let mut row = keccak512(seed);
    dest[..HASH_WORDS].copy_from_slice(&bytes_to_row(&row));
    for i in 1..rows {
        row = keccak512(&row);
        dest[i * HASH_WORDS..(i + 1) * HASH_WORDS].copy_from_slice(&bytes_to_row(&row));
    }

    let mut temp = [0u8; HASH_BYTES];
    for _ in 0..CACHE_ROUNDS {
        for i in 0..rows {
            let src = (i + rows - 1) % rows;
            let xor = dest[i * HASH_WORDS] as usize % rows;
            for j in 0..HASH_WORDS {
                let word = dest[src * HASH_WORDS + j] ^ dest[xor * HASH_WORDS + j];
                temp[j * 4..j * 4 + 4].copy_from_slice(&word.to_le_bytes());
            }
            let hashed = keccak512(&temp);
            dest[i * HASH_WORDS..(i + 1) * HASH_WORDS].copy_from_slice(&bytes_to_row(&hashed));
        }
    }

    info!(
        target: "emberhash::hash",
        epoch,
        bytes = dest.len() * 4,
        elapsed_ms = start.elapsed().as_millis() as u64,
        "generated verification cache"
    );
}

/// Derive one 64-byte dataset item from the cache: seed a 16-word mix from
/// the cache row at `index`, fold in `DATASET_PARENTS` pseudo-randomly
/// selected rows via the FNV combine, squeeze through Keccak-512.
pub fn generate_dataset_item(cache: &[u32], index: u32) -> [u32; HASH_WORDS] {
    let rows = (cache.len() / HASH_WORDS) as u32;

    let offset = (index % rows) as usize * HASH_WORDS;
    let mut mix: [u32; HASH_WORDS] = cache[offset..offset + HASH_WORDS].try_into().unwrap();
    mix[0] ^= index;
    mix = bytes_to_row(&keccak512(&row_to_bytes(&mix)));

    for i in 0..DATASET_PARENTS {
        let parent = (fnv(index ^ i, mix[i as usize % HASH_WORDS]) % rows) as usize * HASH_WORDS;
        for j in 0..HASH_WORDS {
            mix[j] = fnv(mix[j], cache[parent + j]);
        }
    }

    bytes_to_row(&keccak512(&row_to_bytes(&mix)))
}

/// Fill `dest` with the full mining dataset, fanning the per-item derivation
/// out across all available CPUs. Each item is a pure function of the cache
/// and its index, so chunks generate independently.
pub fn generate_dataset(dest: &mut [u32], epoch: u64, cache: &[u32]) {
    let start = Instant::now();
    let bytes = dest.len() * 4;

    dest.par_chunks_mut(HASH_WORDS)
        .enumerate()
        .for_each(|(index, chunk)| {
            let item = generate_dataset_item(cache, index as u32);
            chunk.copy_from_slice(&item[..chunk.len()]);
        });

    info!(
        target: "emberhash::hash",
        epoch,
        bytes,
        elapsed_ms = start.elapsed().as_millis() as u64,
        "generated mining dataset"
    );
}

/// The Ethash aggregation loop shared by the light and full variants:
/// `lookup` yields 64-byte dataset items by index.
fn hashimoto(
    header_hash: &[u8; 32],
    nonce: u64,
    dataset_size: u64,
    lookup: impl Fn(u32) -> [u32; HASH_WORDS],
) -> ([u8; 32], [u8; 32]) {
    let rows = (dataset_size / MIX_BYTES as u64) as u32;

    // 40-byte seed: header hash followed by the little-endian nonce.
    let mut seed_input = [0u8; 40];
    seed_input[..32].copy_from_slice(header_hash);
    seed_input[32..].copy_from_slice(&nonce.to_le_bytes());
    let seed = keccak512(&seed_input);
    let seed_head = u32::from_le_bytes([seed[0], seed[1], seed[2], seed[3]]);

    // 128-byte mix: the seed replicated twice, as words.
    let seed_words = bytes_to_row(&seed);
    let mut mix = [0u32; MIX_WORDS];
    for (i, w) in mix.iter_mut().enumerate() {
        *w = seed_words[i % HASH_WORDS];
    }

    let mut temp = [0u32; MIX_WORDS];
    for i in 0..ACCESSES {
        let parent = fnv(i as u32 ^ seed_head, mix[i % MIX_WORDS]) % rows;
        for j in 0..MIX_BYTES / HASH_BYTES {
            let item = lookup(2 * parent + j as u32);
            temp[j * HASH_WORDS..(j + 1) * HASH_WORDS].copy_from_slice(&item);
        }
        for j in 0..MIX_WORDS {
            mix[j] = fnv(mix[j], temp[j]);
        }
    }

    // Fold the 32-word mix down to the 8-word digest.
    let mut digest = [0u8; 32];
    for i in 0..MIX_WORDS / 4 {
        let folded = fnv(fnv(fnv(mix[i * 4], mix[i * 4 + 1]), mix[i * 4 + 2]), mix[i * 4 + 3]);
        digest[i * 4..i * 4 + 4].copy_from_slice(&folded.to_le_bytes());
    }

    let mut result_input = [0u8; 96];
    result_input[..64].copy_from_slice(&seed);
    result_input[64..].copy_from_slice(&digest);
    (digest, keccak256(&result_input))
}

/// Verification-grade hashimoto: dataset items are recomputed from the cache
/// on the fly. Slow per call, no dataset required.
pub fn hashimoto_light(
    dataset_size: u64,
    cache: &[u32],
    header_hash: &[u8; 32],
    nonce: u64,
) -> ([u8; 32], [u8; 32]) {
    hashimoto(header_hash, nonce, dataset_size, |index| {
        generate_dataset_item(cache, index)
    })
}

/// Mining-grade hashimoto against a pregenerated dataset.
pub fn hashimoto_full(
    dataset: &[u32],
    header_hash: &[u8; 32],
    nonce: u64,
) -> ([u8; 32], [u8; 32]) {
    hashimoto(header_hash, nonce, (dataset.len() * 4) as u64, |index| {
        let offset = index as usize * HASH_WORDS;
        dataset[offset..offset + HASH_WORDS].try_into().unwrap()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    // Test-mode sizes: 1 KiB cache, 32 KiB dataset.
    const TEST_CACHE_WORDS: usize = 1024 / 4;
    const TEST_DATASET_WORDS: usize = 32 * 1024 / 4;

    fn test_cache() -> Vec<u32> {
        let mut cache = vec![0u32; TEST_CACHE_WORDS];
        generate_cache(&mut cache, 0, &[0u8; 32]);
        cache
    }

    #[test]
    fn cache_generation_deterministic() {
        let a = test_cache();
        let b = test_cache();
        assert_eq!(a, b);
        assert!(a.iter().any(|&w| w != 0));
    }

    #[test]
    fn hashimoto_known_vector() {
        // Published epoch-0 test vector: zero seed, 1 KiB cache, 32 KiB
        // dataset. Any deviation here is a consensus break.
        let cache = test_cache();
        let hash: [u8; 32] =
            hex::decode("c9149cc0386e689d789a1c2f3d5d169a61a6218ed30e74414dc736e442ef3d1f")
                .unwrap()
                .try_into()
                .unwrap();

        let (digest, result) = hashimoto_light((TEST_DATASET_WORDS * 4) as u64, &cache, &hash, 0);

        assert_eq!(
            hex::encode(digest),
            "e4073cffaef931d37117cefd9afd27ea0f1cad6a981dd2605c4a1ac97c519800"
        );
        assert_eq!(
            hex::encode(result),
            "d3539235ee2e6f8db665c0a72169f55b7f6c605712330b778ec3944f0eb5a557"
        );
    }

    #[test]
    fn light_and_full_agree() {
        let cache = test_cache();
        let mut dataset = vec![0u32; TEST_DATASET_WORDS];
        generate_dataset(&mut dataset, 0, &cache);

        let hash = [0x5au8; 32];
        for nonce in [0u64, 1, 0xdeadbeef, u64::MAX] {
            let light = hashimoto_light((dataset.len() * 4) as u64, &cache, &hash, nonce);
            let full = hashimoto_full(&dataset, &hash, nonce);
            assert_eq!(light, full, "nonce {nonce}");
        }
    }

    #[test]
    fn dataset_items_match_dataset() {
        let cache = test_cache();
        let mut dataset = vec![0u32; TEST_DATASET_WORDS];
        generate_dataset(&mut dataset, 0, &cache);

        for index in [0u32, 1, 17, (TEST_DATASET_WORDS / HASH_WORDS - 1) as u32] {
            let item = generate_dataset_item(&cache, index);
            let offset = index as usize * HASH_WORDS;
            assert_eq!(&dataset[offset..offset + HASH_WORDS], &item[..]);
        }
    }
}
