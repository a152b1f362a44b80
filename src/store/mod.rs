//! Epoch-keyed cache and dataset lifecycle
//!
//! The store hides where a buffer comes from: an in-memory LRU, a
//! memory-mapped dump on disk, or fresh generation. Whenever a new highest
//! epoch is touched, the following epoch starts generating in the
//! background so the rollover never stalls verification or mining.

pub mod disk;

use crate::config::{Config, Mode};
use crate::hash::{
    cache_size_by_epoch, dataset_size_by_epoch, epoch as epoch_of, ethash, seed_hash, EPOCH_LENGTH,
};
use disk::Words;
use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use tracing::{debug, warn};

const TARGET: &str = "emberhash::store";

/// Buffer sizes under `Mode::Test`: same algorithm, tiny schedule.
const TEST_CACHE_BYTES: u64 = 1024;
const TEST_DATASET_BYTES: u64 = 32 * 1024;

/// Disk and sizing knobs shared by every generation site, extracted from
/// the engine [`Config`] at store construction.
#[derive(Clone, Debug)]
struct Settings {
    cache_dir: Option<PathBuf>,
    caches_on_disk: usize,
    dataset_dir: Option<PathBuf>,
    datasets_on_disk: usize,
    test_sizes: bool,
}

fn epoch_seed(epoch: u64) -> [u8; 32] {
    seed_hash(epoch * EPOCH_LENGTH + 1)
}

/// A verification cache for one epoch. Generated exactly once; concurrent
/// requesters block on the same generation and then share the buffer.
pub struct CacheEntry {
    epoch: u64,
    words: OnceCell<Words>,
}

impl CacheEntry {
    fn new(epoch: u64) -> Self {
        Self {
            epoch,
            words: OnceCell::new(),
        }
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn is_generated(&self) -> bool {
        self.words.get().is_some()
    }

    /// Generated buffer as words; empty until generation finishes. The
    /// store's `cache` call only returns generated entries, so this cannot
    /// miss for handles obtained there.
    pub fn data(&self) -> &[u32] {
        self.words
            .get()
            .map(Words::as_slice)
            .unwrap_or(&[])
    }

    fn generate(&self, settings: &Settings) -> &Words {
        self.words.get_or_init(|| {
            let size = if settings.test_sizes {
                TEST_CACHE_BYTES
            } else {
                cache_size_by_epoch(self.epoch)
            };
            let words = (size / 4) as usize;
            let seed = epoch_seed(self.epoch);

            let Some(dir) = settings.cache_dir.as_deref() else {
                let mut buf = vec![0u32; words];
                ethash::generate_cache(&mut buf, self.epoch, &seed);
                return Words::Owned(buf);
            };

            let path = dir.join(disk::file_name("cache", &seed));
            match disk::load(&path, words) {
                Ok(w) => {
                    debug!(target: TARGET, epoch = self.epoch, path = %path.display(), "loaded cache dump");
                    return w;
                }
                Err(err) if err.kind() == io::ErrorKind::NotFound => {}
                Err(err) => {
                    warn!(target: TARGET, epoch = self.epoch, error = %err, "unusable cache dump, regenerating");
                }
            }

            let mut buf = vec![0u32; words];
            ethash::generate_cache(&mut buf, self.epoch, &seed);
            match disk::save(&path, &buf) {
                Ok(w) => {
                    if settings.caches_on_disk > 0 {
                        if let Some(cut) = self.epoch.checked_sub(settings.caches_on_disk as u64) {
                            disk::prune_below(dir, cut, |ep| {
                                disk::file_name("cache", &epoch_seed(ep))
                            });
                        }
                    }
                    w
                }
                Err(err) => {
                    warn!(target: TARGET, epoch = self.epoch, error = %err, "failed to persist cache, keeping it in memory");
                    Words::Owned(buf)
                }
            }
        })
    }
}

/// A mining dataset for one epoch. Same once-only discipline as
/// [`CacheEntry`]; generation derives its own throwaway cache so dataset
/// entries never depend on the cache LRU.
pub struct DatasetEntry {
    epoch: u64,
    words: OnceCell<Words>,
}

impl DatasetEntry {
    fn new(epoch: u64) -> Self {
        Self {
            epoch,
            words: OnceCell::new(),
        }
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// True once the dataset is ready for `hashimoto_full`. Callers using
    /// the async path poll this instead of blocking.
    pub fn is_generated(&self) -> bool {
        self.words.get().is_some()
    }

    /// Generated buffer as words; empty until generation finishes. Handles
    /// from `dataset(_, true)` may still be generating, so gate any use on
    /// `is_generated` first.
    pub fn data(&self) -> &[u32] {
        self.words
            .get()
            .map(Words::as_slice)
            .unwrap_or(&[])
    }

    fn generate(&self, settings: &Settings) -> &Words {
        self.words.get_or_init(|| {
            let (cache_bytes, dataset_bytes) = if settings.test_sizes {
                (TEST_CACHE_BYTES, TEST_DATASET_BYTES)
            } else {
                (
                    cache_size_by_epoch(self.epoch),
                    dataset_size_by_epoch(self.epoch),
                )
            };
            let words = (dataset_bytes / 4) as usize;
            let seed = epoch_seed(self.epoch);

            let build = || {
                let mut cache = vec![0u32; (cache_bytes / 4) as usize];
                ethash::generate_cache(&mut cache, self.epoch, &seed);
                let mut buf = vec![0u32; words];
                ethash::generate_dataset(&mut buf, self.epoch, &cache);
                buf
            };

            let Some(dir) = settings.dataset_dir.as_deref() else {
                return Words::Owned(build());
            };

            let path = dir.join(disk::file_name("full", &seed));
            match disk::load(&path, words) {
                Ok(w) => {
                    debug!(target: TARGET, epoch = self.epoch, path = %path.display(), "loaded dataset dump");
                    return w;
                }
                Err(err) if err.kind() == io::ErrorKind::NotFound => {}
                Err(err) => {
                    warn!(target: TARGET, epoch = self.epoch, error = %err, "unusable dataset dump, regenerating");
                }
            }

            let buf = build();
            match disk::save(&path, &buf) {
                Ok(w) => {
                    if settings.datasets_on_disk > 0 {
                        if let Some(cut) = self.epoch.checked_sub(settings.datasets_on_disk as u64)
                        {
                            disk::prune_below(dir, cut, |ep| {
                                disk::file_name("full", &epoch_seed(ep))
                            });
                        }
                    }
                    w
                }
                Err(err) => {
                    warn!(target: TARGET, epoch = self.epoch, error = %err, "failed to persist dataset, keeping it in memory");
                    Words::Owned(buf)
                }
            }
        })
    }
}

/// Bounded epoch-keyed LRU with a pinned slot for the next epoch above the
/// highest one seen, so rollover buffers can generate ahead of demand.
struct EpochLru<T> {
    kind: &'static str,
    cap: usize,
    entries: HashMap<u64, Arc<T>>,
    // least recently used at the front
    order: VecDeque<u64>,
    future: u64,
    future_item: Option<Arc<T>>,
}

impl<T> EpochLru<T> {
    fn new(kind: &'static str, cap: usize) -> Self {
        Self {
            kind,
            cap: cap.max(1),
            entries: HashMap::new(),
            order: VecDeque::new(),
            future: 0,
            future_item: None,
        }
    }

    fn touch(&mut self, epoch: u64) {
        if let Some(pos) = self.order.iter().position(|&e| e == epoch) {
            self.order.remove(pos);
        }
        self.order.push_back(epoch);
    }

    fn evict_one(&mut self) -> bool {
        // The pinned future epoch is never an eviction candidate.
        let Some(pos) = self.order.iter().position(|&e| e != self.future) else {
            return false;
        };
        let epoch = self.order.remove(pos).unwrap();
        self.entries.remove(&epoch);
        debug!(target: TARGET, kind = self.kind, epoch, "evicted old entry");
        true
    }

    /// Entry for `epoch`, creating it if needed, plus a freshly created
    /// future entry whenever this raised the highest epoch seen. The caller
    /// is responsible for generating both.
    fn get(&mut self, epoch: u64, make: impl Fn(u64) -> T) -> (Arc<T>, Option<Arc<T>>) {
        let item = match self.entries.get(&epoch) {
            Some(it) => {
                let it = it.clone();
                self.touch(epoch);
                it
            }
            None => {
                // Reuse the pre-created future entry when demand caught up
                // with it; its generation may already be underway.
                let it = if self.future == epoch {
                    self.future_item
                        .clone()
                        .unwrap_or_else(|| Arc::new(make(epoch)))
                } else {
                    Arc::new(make(epoch))
                };
                while self.entries.len() >= self.cap {
                    if !self.evict_one() {
                        break;
                    }
                }
                self.entries.insert(epoch, it.clone());
                self.order.push_back(epoch);
                it
            }
        };

        let mut future = None;
        if self.future < epoch + 1 {
            let it = Arc::new(make(epoch + 1));
            self.future = epoch + 1;
            self.future_item = Some(it.clone());
            future = Some(it);
        }
        (item, future)
    }
}

/// Shared cache/dataset store. One instance may back any number of engine
/// handles; cloning the `Arc` it lives in is how sharing happens, there is
/// no process-wide instance.
pub struct BufferStore {
    settings: Settings,
    caches: Mutex<EpochLru<CacheEntry>>,
    datasets: Mutex<EpochLru<DatasetEntry>>,
}

impl BufferStore {
    pub fn new(config: &Config) -> Self {
        Self {
            settings: Settings {
                cache_dir: config.cache_dir.clone(),
                caches_on_disk: config.caches_on_disk,
                dataset_dir: config.dataset_dir.clone(),
                datasets_on_disk: config.datasets_on_disk,
                test_sizes: config.mode == Mode::Test,
            },
            caches: Mutex::new(EpochLru::new("cache", config.caches_in_mem)),
            datasets: Mutex::new(EpochLru::new("dataset", config.datasets_in_mem)),
        }
    }

    /// Verification cache covering `block_number`, generated if needed.
    /// Blocks until ready; kicks off background generation for the next
    /// epoch when a new highest epoch is touched.
    pub fn cache(&self, block_number: u64) -> Arc<CacheEntry> {
        let epoch = epoch_of(block_number);
        let (entry, future) = self.caches.lock().get(epoch, CacheEntry::new);

        if let Some(fut) = future {
            let settings = self.settings.clone();
            let spawned = thread::Builder::new()
                .name("emberhash-cache-gen".into())
                .spawn(move || {
                    fut.generate(&settings);
                });
            if let Err(err) = spawned {
                warn!(target: TARGET, error = %err, "failed to spawn cache pregeneration");
            }
        }

        entry.generate(&self.settings);
        entry
    }

    /// Mining dataset covering `block_number`. With `async_gen` the call
    /// returns immediately and the caller polls `is_generated`; otherwise
    /// it blocks until the dataset is ready.
    pub fn dataset(&self, block_number: u64, async_gen: bool) -> Arc<DatasetEntry> {
        let epoch = epoch_of(block_number);
        let (entry, future) = self.datasets.lock().get(epoch, DatasetEntry::new);

        if let Some(fut) = future {
            let settings = self.settings.clone();
            let spawned = thread::Builder::new()
                .name("emberhash-dataset-gen".into())
                .spawn(move || {
                    fut.generate(&settings);
                });
            if let Err(err) = spawned {
                warn!(target: TARGET, error = %err, "failed to spawn dataset pregeneration");
            }
        }

        if async_gen && !entry.is_generated() {
            let settings = self.settings.clone();
            let to_generate = entry.clone();
            let spawned = thread::Builder::new()
                .name("emberhash-dataset-gen".into())
                .spawn(move || {
                    to_generate.generate(&settings);
                });
            if let Err(err) = spawned {
                warn!(target: TARGET, error = %err, "failed to spawn dataset generation");
            }
        } else {
            entry.generate(&self.settings);
        }
        entry
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::ethash::{hashimoto_full, hashimoto_light};
    use std::fs;
    use tempfile::tempdir;

    fn test_config() -> Config {
        Config::test()
    }

    #[test]
    fn lru_reuses_and_evicts_in_order() {
        use std::cell::RefCell;
        let made = RefCell::new(Vec::new());
        let make = |ep: u64| {
            made.borrow_mut().push(ep);
            ep
        };

        let mut lru = EpochLru::new("test", 2);
        lru.get(0, make); // creates 0, pre-creates future 1
        assert_eq!(*made.borrow(), vec![0, 1]);

        lru.get(0, make); // pure hit
        assert_eq!(*made.borrow(), vec![0, 1]);

        lru.get(1, make); // consumes the future entry, pre-creates 2
        assert_eq!(*made.borrow(), vec![0, 1, 2]);

        lru.get(2, make); // evicts 0, pre-creates 3
        assert_eq!(*made.borrow(), vec![0, 1, 2, 3]);

        lru.get(0, make); // 0 was evicted, made again
        assert_eq!(*made.borrow(), vec![0, 1, 2, 3, 0]);
    }

    #[test]
    fn lru_never_evicts_pinned_future() {
        let mut lru = EpochLru::new("test", 1);
        lru.get(5, |ep| ep); // entries {5}, future 6 pinned aside
        let (six, fresh) = lru.get(6, |ep| ep);
        // The slot pre-created for epoch 6 is handed back, not remade.
        assert_eq!(*six, 6);
        assert_eq!(fresh.as_deref(), Some(&7));
    }

    #[test]
    fn concurrent_cache_requests_share_one_generation() {
        let mut config = test_config();
        // Fewer slots than live epochs keeps evictions happening under load.
        config.caches_in_mem = 2;
        let store = Arc::new(BufferStore::new(&config));

        let reference: Vec<Vec<u32>> = (0..4u64)
            .map(|ep| {
                let mut buf = vec![0u32; (TEST_CACHE_BYTES / 4) as usize];
                ethash::generate_cache(&mut buf, ep, &epoch_seed(ep));
                buf
            })
            .collect();

        let workers: Vec<_> = (0..8u64)
            .map(|t| {
                let store = store.clone();
                let reference = reference.clone();
                thread::spawn(move || {
                    for round in 0..3u64 {
                        for i in 0..4u64 {
                            let ep = (i + t + round) % 4;
                            let entry = store.cache(ep * EPOCH_LENGTH);
                            assert!(entry.is_generated());
                            assert_eq!(entry.epoch(), ep);
                            assert_eq!(entry.data(), &reference[ep as usize][..]);
                        }
                    }
                })
            })
            .collect();
        for w in workers {
            w.join().unwrap();
        }
    }

    #[test]
    fn cache_persists_and_reloads() {
        let dir = tempdir().unwrap();
        let mut config = test_config();
        config.cache_dir = Some(dir.path().to_path_buf());

        let first = BufferStore::new(&config).cache(0);
        let words = first.data().to_vec();
        assert_eq!(words.len(), (TEST_CACHE_BYTES / 4) as usize);

        // A fresh store must pick the dump up from disk bit-identically.
        let second = BufferStore::new(&config).cache(0);
        assert_eq!(second.data(), &words[..]);
    }

    #[test]
    fn corrupt_dump_regenerates() {
        let dir = tempdir().unwrap();
        let mut config = test_config();
        config.cache_dir = Some(dir.path().to_path_buf());

        let words = BufferStore::new(&config).cache(0).data().to_vec();

        let path = dir
            .path()
            .join(disk::file_name("cache", &epoch_seed(0)));
        let mut raw = fs::read(&path).unwrap();
        raw[5] ^= 0xff;
        fs::write(&path, &raw).unwrap();

        let again = BufferStore::new(&config).cache(0);
        assert_eq!(again.data(), &words[..]);
    }

    #[test]
    fn unwritable_dir_falls_back_to_memory() {
        let mut config = test_config();
        config.cache_dir = Some(PathBuf::from("/proc/definitely/not/writable"));
        let entry = BufferStore::new(&config).cache(0);
        assert!(entry.is_generated());
        assert_eq!(entry.data().len(), (TEST_CACHE_BYTES / 4) as usize);
    }

    #[test]
    fn store_cache_and_dataset_agree() {
        let store = BufferStore::new(&test_config());
        let cache = store.cache(0);
        let dataset = store.dataset(0, false);
        assert!(dataset.is_generated());

        let hash = [0x13u8; 32];
        let light = hashimoto_light(
            (dataset.data().len() * 4) as u64,
            cache.data(),
            &hash,
            99,
        );
        let full = hashimoto_full(dataset.data(), &hash, 99);
        assert_eq!(light, full);
    }
}
