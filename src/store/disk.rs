//! On-disk buffer persistence
//!
//! Caches and datasets are stored as an 8-byte magic header followed by the
//! raw little-endian word array, memory-mapped for zero-copy reuse across
//! restarts. Files are named from the algorithm revision, the epoch seed
//! prefix and the host endianness, and written via a temp file plus atomic
//! rename so a crash never leaves a half-written file under the real name.

use memmap2::Mmap;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

/// Bumped whenever the generated buffer layout changes; part of the file
/// name so stale-format files are simply never matched.
pub const ALGORITHM_REVISION: u32 = 23;

/// Sanity words at the head of every dump file.
const MAGIC: [u32; 2] = [0xbadd_cafe, 0xfee1_dead];
/// Byte length of the magic header. Keeps the word payload 4-byte aligned
/// within the page-aligned mapping.
const MAGIC_BYTES: usize = 8;

#[cfg(target_endian = "little")]
const ENDIAN_SUFFIX: &str = "";
#[cfg(target_endian = "big")]
const ENDIAN_SUFFIX: &str = ".be";

/// Deterministic dump-file name for a buffer kind and epoch seed.
pub fn file_name(kind: &str, seed: &[u8; 32]) -> String {
    format!(
        "{kind}-R{ALGORITHM_REVISION}-{}{ENDIAN_SUFFIX}",
        hex::encode(&seed[..8])
    )
}

/// A generated word buffer, either heap-owned or a read-only view into a
/// dump file. The mapping and file handle are released when the value is
/// dropped, which happens deterministically on LRU eviction.
pub enum Words {
    Owned(Vec<u32>),
    Mapped { map: Mmap, path: PathBuf },
}

impl Words {
    pub fn as_slice(&self) -> &[u32] {
        match self {
            Words::Owned(v) => v,
            Words::Mapped { map, .. } => {
                // The mapping was validated at load/save time: its length is
                // exactly MAGIC_BYTES + 4n and page alignment keeps the
                // payload aligned for u32 access.
                let payload = &map[MAGIC_BYTES..];
                unsafe {
                    std::slice::from_raw_parts(payload.as_ptr() as *const u32, payload.len() / 4)
                }
            }
        }
    }

    pub fn len(&self) -> usize {
        self.as_slice().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Debug for Words {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Words::Owned(v) => write!(f, "Words::Owned({} words)", v.len()),
            Words::Mapped { path, .. } => write!(f, "Words::Mapped({})", path.display()),
        }
    }
}

fn map_checked(path: &Path, words: usize) -> io::Result<Words> {
    let file = File::open(path)?;
    let map = unsafe { Mmap::map(&file)? };
    if map.len() != MAGIC_BYTES + words * 4 {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("dump is {} bytes, want {}", map.len(), MAGIC_BYTES + words * 4),
        ));
    }
    for (i, want) in MAGIC.iter().enumerate() {
        let have = u32::from_le_bytes(map[i * 4..i * 4 + 4].try_into().unwrap());
        if have != *want {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("bad magic word {i}: {have:#010x}"),
            ));
        }
    }
    Ok(Words::Mapped {
        map,
        path: path.to_path_buf(),
    })
}

/// Memory-map an existing dump of exactly `words` payload words. Missing
/// file, wrong size and wrong magic all surface as errors; the caller
/// treats anything but success as a miss.
pub fn load(path: &Path, words: usize) -> io::Result<Words> {
    map_checked(path, words)
}

/// Persist a freshly generated buffer: write magic plus payload to a temp
/// file, atomically rename over the final name and hand back a mapping of
/// the result.
pub fn save(path: &Path, words: &[u32]) -> io::Result<Words> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("tmp");
    {
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&tmp)?;
        let mut buf = Vec::with_capacity(MAGIC_BYTES + words.len() * 4);
        for m in MAGIC {
            buf.extend_from_slice(&m.to_le_bytes());
        }
        for w in words {
            buf.extend_from_slice(&w.to_le_bytes());
        }
        file.write_all(&buf)?;
        file.sync_all()?;
    }
    fs::rename(&tmp, path)?;
    map_checked(path, words.len())
}

/// Delete dump files for epochs at or below `epoch`, given the per-epoch
/// file namer. Missing files are fine; the walk covers every epoch down to
/// zero so retention shrinks still converge.
pub fn prune_below(dir: &Path, epoch: u64, name_for: impl Fn(u64) -> String) {
    let mut ep = epoch as i64;
    while ep >= 0 {
        let _ = fs::remove_file(dir.join(name_for(ep as u64)));
        ep -= 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn save_then_load_is_bit_identical() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(file_name("cache", &[7u8; 32]));
        let words: Vec<u32> = (0..256u32).map(|i| i.wrapping_mul(0x9e37_79b9)).collect();

        let saved = save(&path, &words).unwrap();
        assert_eq!(saved.as_slice(), &words[..]);

        let loaded = load(&path, words.len()).unwrap();
        assert_eq!(loaded.as_slice(), &words[..]);
    }

    #[test]
    fn corrupt_magic_is_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("cache-test");
        let words = vec![1u32; 64];
        save(&path, &words).unwrap();

        let mut raw = fs::read(&path).unwrap();
        raw[3] ^= 0xff;
        fs::write(&path, &raw).unwrap();

        let err = load(&path, words.len()).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn wrong_length_is_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("cache-test");
        save(&path, &vec![1u32; 64]).unwrap();
        assert!(load(&path, 65).is_err());
    }

    #[test]
    fn prune_removes_old_epochs() {
        let dir = tempdir().unwrap();
        for ep in 0..5u64 {
            save(&dir.path().join(format!("cache-{ep}")), &[ep as u32]).unwrap();
        }
        prune_below(dir.path(), 2, |ep| format!("cache-{ep}"));
        for ep in 0..5u64 {
            assert_eq!(dir.path().join(format!("cache-{ep}")).exists(), ep > 2);
        }
    }
}
