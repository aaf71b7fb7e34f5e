//! Block cache.
//!
//! Decompressed data blocks are shared across readers through an S3-FIFO
//! flavored cache: new entries enter a small probationary queue, entries
//! re-referenced while there graduate to the main queue, and keys evicted
//! from the probationary queue linger in a ghost list so that a quick
//! comeback promotes them straight to main. Entries are keyed by
//! `(file number, column, block offset)`; column 0 is the main file.
//!
//! The cache is a plain data structure behind a single mutex. Lookups and
//! inserts are short; a reader that misses performs its file I/O outside
//! the lock, so duplicate loads under concurrency are possible and benign.

use std::collections::{HashMap, VecDeque};
use std::fmt::Debug;
use std::hash::Hash;
use std::sync::{Arc, Mutex};

use crate::sstable::block::Block;

/// Maximum frequency limit for an entry in the cache.
const MAX_FREQUENCY_LIMIT: u8 = 3;

struct CacheEntry<V> {
    value: V,
    freq: u8,
}

/// S3-FIFO core, generic over key and value.
pub struct Cache<K, V>
where
    K: PartialEq + Eq + Hash + Clone + Debug,
    V: Clone,
{
    max_cache_size: usize,
    max_main_size: usize,
    /// New entries are queued here first.
    small: VecDeque<K>,
    /// Entries referenced at least twice graduate here.
    main: VecDeque<K>,
    /// Keys recently evicted from `small`, values already dropped.
    ghost: VecDeque<K>,
    entries: HashMap<K, CacheEntry<V>>,
    stats: Stats,
}

impl<K, V> Cache<K, V>
where
    K: PartialEq + Eq + Hash + Clone + Debug,
    V: Clone,
{
    pub fn new(max_cache_size: usize) -> Self {
        let max_small_size = max_cache_size / 10;
        Cache {
            max_cache_size,
            max_main_size: max_cache_size - max_small_size,
            small: VecDeque::new(),
            main: VecDeque::new(),
            ghost: VecDeque::new(),
            entries: HashMap::new(),
            stats: Stats::default(),
        }
    }

    pub fn get(&mut self, key: &K) -> Option<V> {
        match self.entries.get_mut(key) {
            Some(entry) => {
                entry.freq = (entry.freq + 1).min(MAX_FREQUENCY_LIMIT);
                self.stats.hits += 1;
                Some(entry.value.clone())
            }
            None => {
                self.stats.misses += 1;
                None
            }
        }
    }

    pub fn insert(&mut self, key: K, value: V) {
        if let Some(entry) = self.entries.get_mut(&key) {
            entry.value = value;
            return;
        }
        self.evict();
        if let Some(at) = self.ghost.iter().position(|k| k == &key) {
            // A quick comeback: skip probation.
            self.ghost.remove(at);
            self.main.push_back(key.clone());
        } else {
            self.small.push_back(key.clone());
        }
        self.entries.insert(key, CacheEntry { value, freq: 0 });
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// `(hits, misses)` since creation.
    pub fn stats(&self) -> (usize, usize) {
        (self.stats.hits, self.stats.misses)
    }

    fn evict(&mut self) {
        while self.entries.len() >= self.max_cache_size {
            if self.main.len() >= self.max_main_size || self.small.is_empty() {
                self.evict_main();
            } else {
                self.evict_small();
            }
        }
    }

    fn evict_main(&mut self) {
        while let Some(key) = self.main.pop_front() {
            let Some(entry) = self.entries.get_mut(&key) else {
                continue;
            };
            if entry.freq > 0 {
                // Second chance.
                entry.freq -= 1;
                self.main.push_back(key);
            } else {
                self.entries.remove(&key);
                return;
            }
        }
    }

    fn evict_small(&mut self) {
        while let Some(key) = self.small.pop_front() {
            let Some(entry) = self.entries.get(&key) else {
                continue;
            };
            if entry.freq > 1 {
                self.main.push_back(key);
            } else {
                self.entries.remove(&key);
                if self.ghost.len() >= self.max_cache_size {
                    self.ghost.pop_front();
                }
                self.ghost.push_back(key);
                return;
            }
        }
    }
}

#[derive(Default)]
struct Stats {
    hits: usize,
    misses: usize,
}

/// Locates a cached block: `column` is 0 for the main file, the 1-based
/// column id for subcolumn files.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub file_number: u64,
    pub column: u32,
    pub offset: u64,
}

/// The shared, thread-safe block cache handed to table readers.
pub struct BlockCache {
    inner: Mutex<Cache<CacheKey, Arc<Block>>>,
}

impl BlockCache {
    /// `capacity` counts blocks, not bytes.
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(Cache::new(capacity)),
        }
    }

    pub fn get(&self, key: &CacheKey) -> Option<Arc<Block>> {
        // A poisoned lock degrades to a miss rather than failing the read.
        let Ok(mut cache) = self.inner.lock() else {
            return None;
        };
        cache.get(key)
    }

    pub fn insert(&self, key: CacheKey, block: Arc<Block>) {
        if let Ok(mut cache) = self.inner.lock() {
            cache.insert(key, block);
        }
    }

    pub fn stats(&self) -> (usize, usize) {
        self.inner
            .lock()
            .map(|cache| cache.stats())
            .unwrap_or((0, 0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_opt_eq<V: PartialEq + Debug>(opt: Option<V>, v: V) {
        assert!(opt.is_some());
        assert_eq!(opt.unwrap(), v);
    }

    #[test]
    fn test_push_and_read() {
        let mut cache = Cache::new(4);
        cache.insert("apple", "red");
        cache.insert("banana", "yellow");

        assert_opt_eq(cache.get(&"apple"), "red");
        assert_opt_eq(cache.get(&"banana"), "yellow");
    }

    #[test]
    fn test_capacity_is_respected() {
        let mut cache = Cache::new(4);
        for i in 0..100 {
            cache.insert(i, i);
        }
        assert!(cache.len() <= 4);
        assert_opt_eq(cache.get(&99), 99);
    }

    #[test]
    fn test_hot_entries_survive_eviction() {
        let mut cache = Cache::new(8);
        cache.insert("hot", 1);
        for _ in 0..4 {
            cache.get(&"hot");
        }
        for i in 0..32 {
            cache.insert(i.to_string().leak(), i);
        }
        assert!(cache.get(&"hot").is_some());
    }

    #[test]
    fn test_ghost_comeback_promotes_to_main() {
        let mut cache = Cache::new(4);
        cache.insert("victim", 1);
        // Push enough cold traffic to evict "victim" from small.
        for i in 0..8 {
            cache.insert(format!("cold{i}").leak(), i);
        }
        assert!(cache.get(&"victim").is_none());
        // Its ghost entry promotes the reinsert straight into main.
        cache.insert("victim", 2);
        assert_opt_eq(cache.get(&"victim"), 2);
    }

    #[test]
    fn test_insert_existing_key_updates_value() {
        let mut cache = Cache::new(4);
        cache.insert("key", 1);
        cache.insert("key", 2);
        assert_opt_eq(cache.get(&"key"), 2);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_hit_ratio() {
        let cap = 10;
        let mut cache = Cache::new(cap);
        for i in 0..cap {
            cache.insert(i, i);
        }
        for i in 0..cap {
            assert_eq!(cache.get(&i), Some(i));
        }
        let (hits, misses) = cache.stats();
        assert_eq!(hits, cap);
        assert_eq!(misses, 0);
    }

    #[test]
    fn test_block_cache_shares_blocks() {
        use crate::sstable::block::BlockBuilder;

        let mut builder = BlockBuilder::new(16);
        builder.add(b"key", b"value");
        let block = Arc::new(Block::new(builder.finish().to_vec()).unwrap());

        let cache = BlockCache::new(16);
        let key = CacheKey {
            file_number: 7,
            column: 0,
            offset: 0,
        };
        assert!(cache.get(&key).is_none());
        cache.insert(key, Arc::clone(&block));
        let cached = cache.get(&key).unwrap();
        assert!(Arc::ptr_eq(&cached, &block));

        let (hits, misses) = cache.stats();
        assert_eq!((hits, misses), (1, 1));
    }
}
