//! Sharded Map Implementation
//!
//! Concurrent string-keyed map split across independently locked shards.
//!
//! # Design
//!
//! - Each shard has its own RwLock, so writers to different keys rarely contend
//! - Keys are routed with FxHash, so shard placement is stable across runs
//! - Per-shard size accounting uses each value's own [`Weighted::weight`]

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use super::entry::fx_hash;

/// Values that know their own accounted size
pub trait Weighted {
    fn weight(&self) -> u64;
}

/// Single shard containing a hashmap and statistics
pub struct Shard<V> {
    map: RwLock<HashMap<String, V>>,
    count: AtomicU64,
    size_bytes: AtomicU64,
    reads: AtomicU64,
    writes: AtomicU64,
}

impl<V> Default for Shard<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V> Shard<V> {
    /// Create a new empty shard
    pub fn new() -> Self {
        Self {
            map: RwLock::new(HashMap::new()),
            count: AtomicU64::new(0),
            size_bytes: AtomicU64::new(0),
            reads: AtomicU64::new(0),
            writes: AtomicU64::new(0),
        }
    }

    pub fn len(&self) -> usize {
        self.count.load(Ordering::Relaxed) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn size_bytes(&self) -> u64 {
        self.size_bytes.load(Ordering::Relaxed)
    }

    pub fn read_count(&self) -> u64 {
        self.reads.load(Ordering::Relaxed)
    }

    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::Relaxed)
    }
}

impl<V: Weighted> Shard<V> {
    /// Get a clone of a value
    pub fn get(&self, key: &str) -> Option<V>
    where
        V: Clone,
    {
        self.reads.fetch_add(1, Ordering::Relaxed);
        self.map.read().get(key).cloned()
    }

    /// Check if a key exists
    pub fn contains_key(&self, key: &str) -> bool {
        self.reads.fetch_add(1, Ordering::Relaxed);
        self.map.read().contains_key(key)
    }

    /// Insert a value unless `keep_existing` says the current one wins
    ///
    /// Returns `true` if the value was stored.
    pub fn insert_unless<F>(&self, key: String, value: V, keep_existing: F) -> bool
    where
        F: FnOnce(&V, &V) -> bool,
    {
        self.writes.fetch_add(1, Ordering::Relaxed);
        let mut guard = self.map.write();

        if let Some(current) = guard.get(&key) {
            if keep_existing(current, &value) {
                return false;
            }
        }

        let added = value.weight();
        match guard.insert(key, value) {
            Some(old) => {
                self.size_bytes.fetch_sub(old.weight(), Ordering::Relaxed);
            }
            None => {
                self.count.fetch_add(1, Ordering::Relaxed);
            }
        }
        self.size_bytes.fetch_add(added, Ordering::Relaxed);
        true
    }

    /// Remove a value, returning it if present
    pub fn remove(&self, key: &str) -> Option<V> {
        self.writes.fetch_add(1, Ordering::Relaxed);
        let removed = self.map.write().remove(key);

        if let Some(ref old) = removed {
            self.count.fetch_sub(1, Ordering::Relaxed);
            self.size_bytes.fetch_sub(old.weight(), Ordering::Relaxed);
        }

        removed
    }

    /// Remove a value if `pred` holds for it, checked under the write lock
    pub fn remove_if<F>(&self, key: &str, pred: F) -> Option<V>
    where
        F: FnOnce(&V) -> bool,
    {
        let mut guard = self.map.write();
        if !guard.get(key).is_some_and(pred) {
            return None;
        }
        self.writes.fetch_add(1, Ordering::Relaxed);
        let removed = guard.remove(key);

        if let Some(ref old) = removed {
            self.count.fetch_sub(1, Ordering::Relaxed);
            self.size_bytes.fetch_sub(old.weight(), Ordering::Relaxed);
        }
        removed
    }

    /// Apply `f` to a value in place, returning its result
    ///
    /// `f` must not change the value's weight.
    pub fn update<R, F>(&self, key: &str, f: F) -> Option<R>
    where
        F: FnOnce(&mut V) -> R,
    {
        self.reads.fetch_add(1, Ordering::Relaxed);
        self.map.write().get_mut(key).map(f)
    }

    /// Clear all entries
    pub fn clear(&self) {
        let mut guard = self.map.write();
        guard.clear();
        self.count.store(0, Ordering::Relaxed);
        self.size_bytes.store(0, Ordering::Relaxed);
    }

    /// Project every value through `f`
    pub fn collect<T, F>(&self, mut f: F) -> Vec<T>
    where
        F: FnMut(&V) -> T,
    {
        self.map.read().values().map(&mut f).collect()
    }
}

/// Sharded map with a fixed shard count
pub struct ShardedMap<V, const N: usize = 64> {
    shards: Box<[Shard<V>]>,
}

impl<V, const N: usize> Default for ShardedMap<V, N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V, const N: usize> ShardedMap<V, N> {
    /// Create a new sharded map
    pub fn new() -> Self {
        let shards: Vec<Shard<V>> = (0..N).map(|_| Shard::new()).collect();
        Self {
            shards: shards.into_boxed_slice(),
        }
    }

    #[inline]
    pub const fn shard_count(&self) -> usize {
        N
    }

    /// Total number of entries across all shards
    pub fn len(&self) -> usize {
        self.shards.iter().map(|s| s.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.shards.iter().all(|s| s.is_empty())
    }

    /// Total accounted size across all shards
    pub fn size_bytes(&self) -> u64 {
        self.shards.iter().map(|s| s.size_bytes()).sum()
    }

    pub fn total_reads(&self) -> u64 {
        self.shards.iter().map(|s| s.read_count()).sum()
    }

    pub fn total_writes(&self) -> u64 {
        self.shards.iter().map(|s| s.write_count()).sum()
    }

    #[inline]
    fn shard_for(&self, key: &str) -> &Shard<V> {
        &self.shards[(fx_hash(key.as_bytes()) as usize) % N]
    }
}

impl<V: Weighted, const N: usize> ShardedMap<V, N> {
    pub fn get(&self, key: &str) -> Option<V>
    where
        V: Clone,
    {
        self.shard_for(key).get(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.shard_for(key).contains_key(key)
    }

    /// Insert unconditionally
    pub fn insert(&self, key: String, value: V) {
        self.insert_unless(key, value, |_, _| false);
    }

    /// Insert unless `keep_existing(current, incoming)` returns true
    pub fn insert_unless<F>(&self, key: String, value: V, keep_existing: F) -> bool
    where
        F: FnOnce(&V, &V) -> bool,
    {
        self.shard_for(&key).insert_unless(key, value, keep_existing)
    }

    pub fn remove(&self, key: &str) -> Option<V> {
        self.shard_for(key).remove(key)
    }

    /// Remove a value if `pred` holds for it
    pub fn remove_if<F>(&self, key: &str, pred: F) -> Option<V>
    where
        F: FnOnce(&V) -> bool,
    {
        self.shard_for(key).remove_if(key, pred)
    }

    /// Update a value in place
    pub fn update<R, F>(&self, key: &str, f: F) -> Option<R>
    where
        F: FnOnce(&mut V) -> R,
    {
        self.shard_for(key).update(key, f)
    }

    pub fn clear(&self) {
        for shard in self.shards.iter() {
            shard.clear();
        }
    }

    /// Project every value through `f`, shard by shard
    pub fn collect<T, F>(&self, mut f: F) -> Vec<T>
    where
        F: FnMut(&V) -> T,
    {
        let mut out = Vec::with_capacity(self.len());
        for shard in self.shards.iter() {
            out.extend(shard.collect(&mut f));
        }
        out
    }

    /// Detailed statistics
    pub fn stats(&self) -> ShardedMapStats {
        let shard_entry_counts: Vec<usize> = self.shards.iter().map(|s| s.len()).collect();

        ShardedMapStats {
            total_entries: shard_entry_counts.iter().sum(),
            total_size_bytes: self.size_bytes(),
            total_reads: self.total_reads(),
            total_writes: self.total_writes(),
            shard_entry_counts,
        }
    }
}

/// Statistics for a sharded map
#[derive(Debug, Clone)]
pub struct ShardedMapStats {
    pub total_entries: usize,
    pub total_size_bytes: u64,
    pub total_reads: u64,
    pub total_writes: u64,
    /// Per-shard entry counts
    pub shard_entry_counts: Vec<usize>,
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    impl Weighted for Vec<u8> {
        fn weight(&self) -> u64 {
            self.len() as u64
        }
    }

    fn bytes(n: usize) -> Vec<u8> {
        vec![0u8; n]
    }

    #[test]
    fn test_shard_insert_get() {
        let shard: Shard<Vec<u8>> = Shard::new();
        assert!(shard.is_empty());

        assert!(shard.insert_unless("key1".to_string(), bytes(4), |_, _| false));
        assert_eq!(shard.len(), 1);
        assert_eq!(shard.size_bytes(), 4);
        assert_eq!(shard.get("key1"), Some(bytes(4)));
    }

    #[test]
    fn test_shard_replace_adjusts_size() {
        let shard: Shard<Vec<u8>> = Shard::new();
        shard.insert_unless("key1".to_string(), bytes(10), |_, _| false);
        shard.insert_unless("key1".to_string(), bytes(3), |_, _| false);

        assert_eq!(shard.len(), 1);
        assert_eq!(shard.size_bytes(), 3);
    }

    #[test]
    fn test_shard_keep_existing() {
        let shard: Shard<Vec<u8>> = Shard::new();
        shard.insert_unless("key1".to_string(), bytes(10), |_, _| false);

        let stored = shard.insert_unless("key1".to_string(), bytes(3), |cur, new| cur.len() > new.len());
        assert!(!stored);
        assert_eq!(shard.size_bytes(), 10);
    }

    #[test]
    fn test_shard_remove_and_clear() {
        let shard: Shard<Vec<u8>> = Shard::new();
        shard.insert_unless("key1".to_string(), bytes(4), |_, _| false);
        shard.insert_unless("key2".to_string(), bytes(4), |_, _| false);

        assert_eq!(shard.remove("key1"), Some(bytes(4)));
        assert_eq!(shard.remove("key1"), None);
        assert_eq!(shard.size_bytes(), 4);

        shard.clear();
        assert!(shard.is_empty());
        assert_eq!(shard.size_bytes(), 0);
    }

    #[test]
    fn test_shard_remove_if() {
        let shard: Shard<Vec<u8>> = Shard::new();
        shard.insert_unless("key".to_string(), bytes(4), |_, _| false);

        assert_eq!(shard.remove_if("key", |v| v.len() == 8), None);
        assert_eq!(shard.len(), 1);
        assert_eq!(shard.remove_if("key", |v| v.len() == 4), Some(bytes(4)));
        assert_eq!(shard.remove_if("missing", |_| true), None);
        assert!(shard.is_empty());
        assert_eq!(shard.size_bytes(), 0);
    }

    #[test]
    fn test_sharded_map_update() {
        let map: ShardedMap<Vec<u8>, 16> = ShardedMap::new();
        map.insert("key1".to_string(), vec![1, 2]);

        let first = map.update("key1", |v| {
            v[0] = 9;
            v[0]
        });
        assert_eq!(first, Some(9));
        assert_eq!(map.get("key1"), Some(vec![9, 2]));
        assert_eq!(map.update("missing", |v| v.len()), None);
    }

    #[test]
    fn test_sharded_map_statistics() {
        let map: ShardedMap<Vec<u8>, 16> = ShardedMap::new();

        for i in 0..100 {
            map.insert(format!("key{}", i), bytes(4));
        }
        for i in 0..50 {
            map.get(&format!("key{}", i));
        }

        let stats = map.stats();
        assert_eq!(stats.total_entries, 100);
        assert_eq!(stats.total_size_bytes, 400);
        assert_eq!(stats.total_writes, 100);
        assert_eq!(stats.total_reads, 50);
        assert_eq!(map.collect(|v| v.len()).len(), 100);
    }

    #[test]
    fn test_sharded_map_distribution() {
        let map: ShardedMap<Vec<u8>, 16> = ShardedMap::new();
        for i in 0..1000 {
            map.insert(format!("key{}", i), bytes(1));
        }

        let stats = map.stats();
        let max_count = stats.shard_entry_counts.iter().max().copied().unwrap_or(0);
        assert!(max_count < 200, "Uneven distribution: max shard has {} entries", max_count);
    }

    #[test]
    fn test_concurrent_access() {
        use std::sync::Arc;
        use std::thread;

        let map: Arc<ShardedMap<Vec<u8>, 16>> = Arc::new(ShardedMap::new());

        let handles: Vec<_> = (0..8)
            .map(|t| {
                let map = Arc::clone(&map);
                thread::spawn(move || {
                    for i in 0..1000 {
                        let key = format!("key-{}-{}", t, i);
                        map.insert(key.clone(), bytes(2));
                        map.get(&key);
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(map.len(), 8000);
        assert_eq!(map.size_bytes(), 16_000);
    }
}
