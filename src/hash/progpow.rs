//! Progpow variant of the hashing core
//!
//! Keccak-f[800] sponge, KISS99-driven per-lane register mixes and a
//! period-seeded random program of cache/math rounds over the cDAG (a small
//! per-epoch slice of the dataset). Every operation is 32-bit wraparound
//! arithmetic; the selectors and rotate constants are consensus-critical.
//!
//! Two parameter revisions exist in the wild; both are carried as named
//! constant tables and selected explicitly, never baked in.

use super::ethash::generate_dataset_item;
use super::HASH_WORDS;

/// Progpow tuning constants, versioned because deployed chains drifted
/// between revisions.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ProgpowParams {
    /// Blocks sharing one random program.
    pub period: u64,
    /// Parallel mix lanes.
    pub lanes: usize,
    /// 32-bit registers per lane.
    pub regs: usize,
    /// Sequential words loaded from the dataset per lane per loop.
    pub dag_loads: usize,
    /// Bytes of the dataset mirrored into the cDAG.
    pub cache_bytes: usize,
    /// Dataset-access loops per hash.
    pub cnt_dag: usize,
    /// cDAG accesses per loop.
    pub cnt_cache: usize,
    /// Random math ops per loop.
    pub cnt_math: usize,
}

impl ProgpowParams {
    pub const REV_0_9_2: ProgpowParams = ProgpowParams {
        period: 50,
        lanes: 16,
        regs: 32,
        dag_loads: 4,
        cache_bytes: 16 * 1024,
        cnt_dag: 64,
        cnt_cache: 11,
        cnt_math: 18,
    };

    pub const REV_0_9_3: ProgpowParams = ProgpowParams {
        period: 10,
        lanes: 16,
        regs: 32,
        dag_loads: 4,
        cache_bytes: 16 * 1024,
        cnt_dag: 64,
        cnt_cache: 11,
        cnt_math: 18,
    };

    /// 32-bit words in the cDAG.
    pub fn cache_words(&self) -> usize {
        self.cache_bytes / 4
    }
}

const FNV_OFFSET_BASIS: u32 = 0x811c9dc5;

#[inline]
fn fnv1a(h: u32, d: u32) -> u32 {
    (h ^ d).wrapping_mul(0x01000193)
}

#[derive(Clone, Copy)]
struct Kiss99 {
    z: u32,
    w: u32,
    jsr: u32,
    jcong: u32,
}

impl Kiss99 {
    fn next(&mut self) -> u32 {
        self.z = 36969u32
            .wrapping_mul(self.z & 0xffff)
            .wrapping_add(self.z >> 16);
        self.w = 18000u32
            .wrapping_mul(self.w & 0xffff)
            .wrapping_add(self.w >> 16);
        let mwc = (self.z << 16).wrapping_add(self.w);
        self.jsr ^= self.jsr << 17;
        self.jsr ^= self.jsr >> 13;
        self.jsr ^= self.jsr << 5;
        self.jcong = 69069u32.wrapping_mul(self.jcong).wrapping_add(1234567);
        (mwc ^ self.jcong).wrapping_add(self.jsr)
    }
}

// Keccak-f[800] tables: 32-bit truncations of the 64-bit round constants,
// rotation offsets reduced mod 32.
const KECCAKF_RNDC: [u32; 22] = [
    0x00000001, 0x00008082, 0x0000808a, 0x80008000, 0x0000808b, 0x80000001, 0x80008081, 0x00008009,
    0x0000008a, 0x00000088, 0x80008009, 0x8000000a, 0x8000808b, 0x0000008b, 0x00008089, 0x00008003,
    0x00008002, 0x00000080, 0x0000800a, 0x8000000a, 0x80008081, 0x00008080,
];
const KECCAKF_ROTC: [u32; 24] = [
    1, 3, 6, 10, 15, 21, 28, 36, 45, 55, 2, 14, 27, 41, 56, 8, 25, 43, 62, 18, 39, 61, 20, 44,
];
const KECCAKF_PILN: [usize; 24] = [
    10, 7, 11, 17, 18, 3, 5, 16, 8, 21, 24, 4, 15, 23, 19, 13, 12, 2, 20, 14, 22, 9, 6, 1,
];

fn keccak_f800_round(st: &mut [u32; 25], round: usize) {
    let mut bc = [0u32; 5];

    // Theta
    for i in 0..5 {
        bc[i] = st[i] ^ st[i + 5] ^ st[i + 10] ^ st[i + 15] ^ st[i + 20];
    }
    for i in 0..5 {
        let t = bc[(i + 4) % 5] ^ bc[(i + 1) % 5].rotate_left(1);
        for j in (0..25).step_by(5) {
            st[j + i] ^= t;
        }
    }

    // Rho Pi
    let mut t = st[1];
    for i in 0..24 {
        let j = KECCAKF_PILN[i];
        bc[0] = st[j];
        st[j] = t.rotate_left(KECCAKF_ROTC[i] % 32);
        t = bc[0];
    }

    // Chi
    for j in (0..25).step_by(5) {
        for i in 0..5 {
            bc[i] = st[j + i];
        }
        for i in 0..5 {
            st[j + i] = bc[i] ^ (!bc[(i + 1) % 5] & bc[(i + 2) % 5]);
        }
    }

    // Iota
    st[0] ^= KECCAKF_RNDC[round];
}

fn keccak_f800_init(header_hash: &[u8; 32], nonce: u64, result: &[u32; 8]) -> [u32; 25] {
    let mut st = [0u32; 25];
    for i in 0..8 {
        st[i] = u32::from_le_bytes([
            header_hash[4 * i],
            header_hash[4 * i + 1],
            header_hash[4 * i + 2],
            header_hash[4 * i + 3],
        ]);
    }
    st[8] = nonce as u32;
    st[9] = (nonce >> 32) as u32;
    st[10..18].copy_from_slice(result);
    st
}

/// Short sponge: 21 permutation rounds, squeezing a 64-bit seed.
pub fn keccak_f800_short(header_hash: &[u8; 32], nonce: u64, result: &[u32; 8]) -> u64 {
    let mut st = keccak_f800_init(header_hash, nonce, result);
    for r in 0..21 {
        keccak_f800_round(&mut st, r);
    }
    (st[0] as u64) << 32 | st[1] as u64
}

/// Long sponge: 22 permutation rounds, squeezing the final 32-byte hash.
pub fn keccak_f800_long(header_hash: &[u8; 32], nonce: u64, result: &[u32; 8]) -> [u8; 32] {
    let mut st = keccak_f800_init(header_hash, nonce, result);
    for r in 0..22 {
        keccak_f800_round(&mut st, r);
    }
    let mut out = [0u8; 32];
    for i in 0..8 {
        out[i * 4..i * 4 + 4].copy_from_slice(&st[i].to_le_bytes());
    }
    out
}

/// Per-lane register mix seeded from the hash seed and lane id.
fn fill_mix(seed: u64, lane_id: u32, regs: usize) -> Vec<u32> {
    let z = fnv1a(FNV_OFFSET_BASIS, seed as u32);
    let w = fnv1a(z, (seed >> 32) as u32);
    let jsr = fnv1a(w, lane_id);
    let jcong = fnv1a(jsr, lane_id);
    let mut rnd = Kiss99 { z, w, jsr, jcong };
    (0..regs).map(|_| rnd.next()).collect()
}

/// Program PRNG plus shuffled destination/source register sequences for one
/// period's random program.
fn progpow_init(prog_seed: u64, regs: usize) -> (Kiss99, Vec<usize>, Vec<usize>) {
    let z = fnv1a(FNV_OFFSET_BASIS, prog_seed as u32);
    let w = fnv1a(z, (prog_seed >> 32) as u32);
    let jsr = fnv1a(w, prog_seed as u32);
    let jcong = fnv1a(jsr, (prog_seed >> 32) as u32);
    let mut rnd = Kiss99 { z, w, jsr, jcong };

    let mut dst: Vec<usize> = (0..regs).collect();
    let mut src: Vec<usize> = (0..regs).collect();
    for i in (1..regs).rev() {
        let j = rnd.next() as usize % (i + 1);
        dst.swap(i, j);
        let j = rnd.next() as usize % (i + 1);
        src.swap(i, j);
    }
    (rnd, dst, src)
}

/// Merge `b` into `a` preserving entropy of both; selector picks one of the
/// four merge shapes.
#[inline]
fn merge(a: u32, b: u32, sel: u32) -> u32 {
    match sel % 4 {
        0 => a.wrapping_mul(33).wrapping_add(b),
        1 => (a ^ b).wrapping_mul(33),
        2 => a.rotate_left(((sel >> 16) % 31) + 1) ^ b,
        _ => a.rotate_right(((sel >> 16) % 31) + 1) ^ b,
    }
}

/// Random math op; selector picks one of eleven 32-bit operations.
#[inline]
fn math(a: u32, b: u32, sel: u32) -> u32 {
    match sel % 11 {
        0 => a.wrapping_add(b),
        1 => a.wrapping_mul(b),
        2 => ((a as u64 * b as u64) >> 32) as u32,
        3 => a.min(b),
        4 => a.rotate_left(b),
        5 => a.rotate_right(b),
        6 => a & b,
        7 => a | b,
        8 => a ^ b,
        9 => a.leading_zeros() + b.leading_zeros(),
        _ => a.count_ones() + b.count_ones(),
    }
}

/// One dataset-access loop: a 256-byte DAG entry load spread over the lanes,
/// a random program of cDAG and math rounds, then the DAG words merged in
/// last (always feeding lane register 0 so the next loop's address depends
/// on this load).
fn progpow_loop(
    params: &ProgpowParams,
    prog_seed: u64,
    loop_idx: u32,
    mix: &mut [Vec<u32>],
    c_dag: &[u32],
    dataset_size: u64,
    lookup: &impl Fn(u32) -> [u32; HASH_WORDS],
) {
    let lanes = params.lanes;
    let entry_words = lanes * params.dag_loads;
    let entries = (dataset_size / (entry_words as u64 * 4)) as u32;

    // Global load: each lane grabs dag_loads sequential words from a shared
    // 256-byte entry, the lane<->slot mapping rotated by the loop counter.
    let base = mix[loop_idx as usize % lanes][0] % entries;
    let mut dag_entry = vec![vec![0u32; params.dag_loads]; lanes];
    for (l, entry) in dag_entry.iter_mut().enumerate() {
        let word = base as u64 * entry_words as u64
            + ((l ^ loop_idx as usize) % lanes * params.dag_loads) as u64;
        let item = lookup((word / HASH_WORDS as u64) as u32);
        let in_item = word as usize % HASH_WORDS;
        for (i, slot) in entry.iter_mut().enumerate() {
            *slot = item[in_item + i];
        }
    }

    let (mut rnd, seq_dst, seq_src) = progpow_init(prog_seed, params.regs);
    let mut dst_cnt = 0usize;
    let mut src_cnt = 0usize;

    for i in 0..params.cnt_cache.max(params.cnt_math) {
        if i < params.cnt_cache {
            let src = seq_src[src_cnt % params.regs];
            let dst = seq_dst[dst_cnt % params.regs];
            src_cnt += 1;
            dst_cnt += 1;
            let sel = rnd.next();
            for lane in mix.iter_mut() {
                let offset = lane[src] as usize % params.cache_words();
                lane[dst] = merge(lane[dst], c_dag[offset], sel);
            }
        }
        if i < params.cnt_math {
            let src_rnd = rnd.next() as usize % (params.regs * (params.regs - 1));
            let src1 = src_rnd % params.regs;
            let mut src2 = src_rnd / params.regs;
            if src2 >= src1 {
                src2 += 1;
            }
            let sel1 = rnd.next();
            let dst = seq_dst[dst_cnt % params.regs];
            dst_cnt += 1;
            let sel2 = rnd.next();
            for lane in mix.iter_mut() {
                let data = math(lane[src1], lane[src2], sel1);
                lane[dst] = merge(lane[dst], data, sel2);
            }
        }
    }

    for i in 0..params.dag_loads {
        let dst = if i == 0 {
            0
        } else {
            let d = seq_dst[dst_cnt % params.regs];
            dst_cnt += 1;
            d
        };
        let sel = rnd.next();
        for (l, lane) in mix.iter_mut().enumerate() {
            lane[dst] = merge(lane[dst], dag_entry[l][i], sel);
        }
    }
}

/// Full Progpow hash. `lookup` yields 64-byte dataset items; `c_dag` is the
/// per-epoch cDAG produced by [`generate_cdag`]. Returns (mix digest, final
/// hash).
pub fn progpow(
    params: &ProgpowParams,
    header_hash: &[u8; 32],
    nonce: u64,
    dataset_size: u64,
    block_number: u64,
    c_dag: &[u32],
    lookup: impl Fn(u32) -> [u32; HASH_WORDS],
) -> ([u8; 32], [u8; 32]) {
    let seed = keccak_f800_short(header_hash, nonce, &[0u32; 8]);

    let mut mix: Vec<Vec<u32>> = (0..params.lanes)
        .map(|lane| fill_mix(seed, lane as u32, params.regs))
        .collect();

    let prog_seed = block_number / params.period;
    for l in 0..params.cnt_dag {
        progpow_loop(
            params,
            prog_seed,
            l as u32,
            &mut mix,
            c_dag,
            dataset_size,
            &lookup,
        );
    }

    // Reduce lanes to the 8-word digest.
    let mut lane_results = vec![0u32; params.lanes];
    for (l, lane) in mix.iter().enumerate() {
        let mut acc = FNV_OFFSET_BASIS;
        for &reg in lane.iter() {
            acc = fnv1a(acc, reg);
        }
        lane_results[l] = acc;
    }
    let mut result = [FNV_OFFSET_BASIS; 8];
    for (l, &lane_result) in lane_results.iter().enumerate() {
        result[l % 8] = fnv1a(result[l % 8], lane_result);
    }

    let mut digest = [0u8; 32];
    for i in 0..8 {
        digest[i * 4..i * 4 + 4].copy_from_slice(&result[i].to_le_bytes());
    }
    let final_hash = keccak_f800_long(header_hash, seed, &result);
    (digest, final_hash)
}

/// Cache-backed Progpow for verification.
pub fn progpow_light(
    params: &ProgpowParams,
    dataset_size: u64,
    cache: &[u32],
    header_hash: &[u8; 32],
    nonce: u64,
    block_number: u64,
    c_dag: &[u32],
) -> ([u8; 32], [u8; 32]) {
    progpow(
        params,
        header_hash,
        nonce,
        dataset_size,
        block_number,
        c_dag,
        |index| generate_dataset_item(cache, index),
    )
}

/// Dataset-backed Progpow for mining speed.
pub fn progpow_full(
    params: &ProgpowParams,
    dataset: &[u32],
    header_hash: &[u8; 32],
    nonce: u64,
    block_number: u64,
    c_dag: &[u32],
) -> ([u8; 32], [u8; 32]) {
    progpow(
        params,
        header_hash,
        nonce,
        (dataset.len() * 4) as u64,
        block_number,
        c_dag,
        |index| {
            let offset = index as usize * HASH_WORDS;
            dataset[offset..offset + HASH_WORDS].try_into().unwrap()
        },
    )
}

/// Precompute the cDAG for an epoch: the first `cache_bytes` of the dataset
/// as words, derived straight from the verification cache.
pub fn generate_cdag(params: &ProgpowParams, cache: &[u32]) -> Vec<u32> {
    let items = params.cache_words() / HASH_WORDS;
    let mut c_dag = Vec::with_capacity(params.cache_words());
    for index in 0..items as u32 {
        c_dag.extend_from_slice(&generate_dataset_item(cache, index));
    }
    c_dag
}

/// A period identifier used to tag work packages so miners know when the
/// random program changes.
pub fn program_period(params: &ProgpowParams, block_number: u64) -> u64 {
    block_number / params.period
}
