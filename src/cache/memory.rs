//! L1 Memory Tier
//!
//! Volatile in-process tier. Always written synchronously on the caller's
//! path, so a successful `set` is visible to the next `get` immediately.

use async_trait::async_trait;

use super::entry::{CacheEntry, EntrySummary};
use super::shard::{ShardedMap, Weighted};
use super::tier::{Tier, TierKind};
use crate::error::Result;

impl Weighted for CacheEntry {
    fn weight(&self) -> u64 {
        self.size()
    }
}

/// Sharded in-memory tier
#[derive(Default)]
pub struct MemoryTier {
    entries: ShardedMap<CacheEntry>,
}

impl MemoryTier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total reads served by the shards
    pub fn total_reads(&self) -> u64 {
        self.entries.total_reads()
    }
}

#[async_trait]
impl Tier for MemoryTier {
    fn kind(&self) -> TierKind {
        TierKind::Memory
    }

    async fn get(&self, key: &str) -> Result<Option<CacheEntry>> {
        Ok(self.entries.update(key, |entry| {
            entry.record_access();
            entry.clone()
        }))
    }

    async fn peek(&self, key: &str) -> Result<Option<CacheEntry>> {
        Ok(self.entries.get(key))
    }

    async fn set(&self, entry: CacheEntry) -> Result<bool> {
        let key = entry.key().to_string();
        Ok(self
            .entries
            .insert_unless(key, entry, |current, incoming| {
                current.sequence() > incoming.sequence()
            }))
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        Ok(self.entries.remove(key).is_some())
    }

    async fn delete_if_unchanged(&self, key: &str, sequence: u64) -> Result<bool> {
        Ok(self
            .entries
            .remove_if(key, |entry| entry.sequence() == sequence)
            .is_some())
    }

    async fn contains(&self, key: &str) -> Result<bool> {
        Ok(self.entries.contains_key(key))
    }

    async fn scan(&self) -> Result<Vec<EntrySummary>> {
        Ok(self.entries.collect(CacheEntry::summary))
    }

    async fn clear(&self) -> Result<()> {
        self.entries.clear();
        Ok(())
    }

    fn len(&self) -> usize {
        self.entries.len()
    }

    fn size_bytes(&self) -> u64 {
        self.entries.size_bytes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn make_entry(key: &str, data: &[u8]) -> CacheEntry {
        CacheEntry::new(key, Bytes::copy_from_slice(data), 60_000)
    }

    #[tokio::test]
    async fn test_set_get() {
        let tier = MemoryTier::new();
        assert!(tier.set(make_entry("k", b"value")).await.unwrap());

        let entry = tier.get("k").await.unwrap().unwrap();
        assert_eq!(entry.payload().as_ref(), b"value");
        assert_eq!(entry.access_count(), 1);
        assert_eq!(tier.len(), 1);
        assert_eq!(tier.size_bytes(), 5);
        assert!(tier.get("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_peek_does_not_record_access() {
        let tier = MemoryTier::new();
        tier.set(make_entry("k", b"v")).await.unwrap();

        tier.peek("k").await.unwrap();
        tier.peek("k").await.unwrap();
        assert_eq!(tier.peek("k").await.unwrap().unwrap().access_count(), 0);

        tier.get("k").await.unwrap();
        assert_eq!(tier.peek("k").await.unwrap().unwrap().access_count(), 1);
    }

    #[tokio::test]
    async fn test_overwrite_replaces_entry() {
        let tier = MemoryTier::new();
        tier.set(make_entry("k", b"first-value")).await.unwrap();
        tier.get("k").await.unwrap();

        tier.set(make_entry("k", b"v2")).await.unwrap();
        let entry = tier.peek("k").await.unwrap().unwrap();
        assert_eq!(entry.payload().as_ref(), b"v2");
        assert_eq!(entry.access_count(), 0);
        assert_eq!(tier.len(), 1);
        assert_eq!(tier.size_bytes(), 2);
    }

    #[tokio::test]
    async fn test_older_write_is_ignored() {
        let tier = MemoryTier::new();
        let older = make_entry("k", b"old");
        let newer = make_entry("k", b"new");

        assert!(tier.set(newer).await.unwrap());
        assert!(!tier.set(older).await.unwrap());
        assert_eq!(tier.peek("k").await.unwrap().unwrap().payload().as_ref(), b"new");
    }

    #[tokio::test]
    async fn test_delete_if_unchanged_spares_newer_write() {
        let tier = MemoryTier::new();
        tier.set(make_entry("k", b"old")).await.unwrap();
        let scanned = tier.scan().await.unwrap().remove(0);

        tier.set(make_entry("k", b"new")).await.unwrap();
        assert!(!tier.delete_if_unchanged("k", scanned.sequence).await.unwrap());
        assert_eq!(tier.peek("k").await.unwrap().unwrap().payload().as_ref(), b"new");
        assert_eq!(tier.size_bytes(), 3);

        let current = tier.scan().await.unwrap().remove(0);
        assert!(tier.delete_if_unchanged("k", current.sequence).await.unwrap());
        assert!(tier.is_empty());
        assert_eq!(tier.size_bytes(), 0);
    }

    #[tokio::test]
    async fn test_delete_scan_clear() {
        let tier = MemoryTier::new();
        for i in 0..10 {
            tier.set(make_entry(&format!("k{}", i), b"xx")).await.unwrap();
        }

        assert!(tier.delete("k3").await.unwrap());
        assert!(!tier.delete("k3").await.unwrap());
        assert!(!tier.contains("k3").await.unwrap());

        let summaries = tier.scan().await.unwrap();
        assert_eq!(summaries.len(), 9);
        assert!(summaries.iter().all(|s| s.size_bytes == 2));

        tier.clear().await.unwrap();
        assert!(tier.is_empty());
        assert_eq!(tier.size_bytes(), 0);
    }
}
