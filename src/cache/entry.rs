//! Cache Entry Types
//!
//! The unit of cached state and the metadata that eviction, refresh and tag
//! invalidation decide on. Timestamps are Unix epoch milliseconds.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Insertion sequence shared by every cache in the process
static SEQUENCE: AtomicU64 = AtomicU64::new(1);

/// Access tick shared by every cache in the process
static RECENCY: AtomicU64 = AtomicU64::new(1);

/// Current wall-clock time in epoch milliseconds
#[inline]
pub fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Next insertion sequence number (strictly increasing)
#[inline]
pub(crate) fn next_sequence() -> u64 {
    SEQUENCE.fetch_add(1, Ordering::Relaxed)
}

/// Raise the insertion sequence past `seen`
///
/// Called for every record loaded from a persistent tier, so writes made by
/// this process always supersede entries written by an earlier one.
#[inline]
pub(crate) fn observe_sequence(seen: u64) {
    SEQUENCE.fetch_max(seen.saturating_add(1), Ordering::Relaxed);
}

/// Next access tick (strictly increasing)
#[inline]
pub(crate) fn next_recency() -> u64 {
    RECENCY.fetch_add(1, Ordering::Relaxed)
}

/// Fast non-cryptographic hash (FxHash algorithm)
#[inline]
pub(crate) fn fx_hash(bytes: &[u8]) -> u64 {
    const SEED: u64 = 0x517cc1b727220a95;
    let mut hash = SEED;
    for &byte in bytes {
        hash = hash.rotate_left(5) ^ (byte as u64);
        hash = hash.wrapping_mul(SEED);
    }
    hash
}

// =============================================================================
// Priority
// =============================================================================

/// Caller-assigned importance of an entry
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
    Critical,
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Priority::Low => write!(f, "low"),
            Priority::Medium => write!(f, "medium"),
            Priority::High => write!(f, "high"),
            Priority::Critical => write!(f, "critical"),
        }
    }
}

// =============================================================================
// Metadata
// =============================================================================

/// Metadata carried with every entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryMetadata {
    /// Cache format version the entry was written under
    pub version: u32,
    /// Byte length of the stored (possibly compressed) payload
    pub size_bytes: u64,
    /// Invalidation tags
    pub tags: BTreeSet<String>,
    /// Entry priority
    pub priority: Priority,
    /// Whether the payload is LZ4-compressed
    pub compressed: bool,
}

/// Freshness of an entry relative to its TTL
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    /// Plenty of TTL left
    Fresh,
    /// Still live, but inside the refresh window
    Stale,
    /// Past `expires_at`, never served
    Expired,
}

// =============================================================================
// Cache Entry
// =============================================================================

/// A cached payload with its lifecycle and access bookkeeping
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    key: String,
    payload: Bytes,
    created_at: u64,
    expires_at: u64,
    access_count: u64,
    last_accessed_at: u64,
    recency: u64,
    sequence: u64,
    /// Entry metadata
    pub metadata: EntryMetadata,
}

impl CacheEntry {
    /// Create a new entry that lives for `ttl_ms` from now
    pub fn new(key: impl Into<String>, payload: Bytes, ttl_ms: u64) -> Self {
        Self::new_at(key, payload, now_millis(), ttl_ms)
    }

    /// Create a new entry with an explicit creation time
    pub fn new_at(key: impl Into<String>, payload: Bytes, created_at: u64, ttl_ms: u64) -> Self {
        let size_bytes = payload.len() as u64;
        Self {
            key: key.into(),
            payload,
            created_at,
            expires_at: created_at.saturating_add(ttl_ms),
            access_count: 0,
            last_accessed_at: created_at,
            recency: next_recency(),
            sequence: next_sequence(),
            metadata: EntryMetadata {
                version: 1,
                size_bytes,
                tags: BTreeSet::new(),
                priority: Priority::default(),
                compressed: false,
            },
        }
    }

    /// Attach invalidation tags
    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.metadata.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    /// Set the priority
    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.metadata.priority = priority;
        self
    }

    /// Set the format version
    pub fn with_version(mut self, version: u32) -> Self {
        self.metadata.version = version;
        self
    }

    /// Flag whether the payload is compressed
    pub fn with_compressed(mut self, compressed: bool) -> Self {
        self.metadata.compressed = compressed;
        self
    }

    #[cfg(test)]
    pub(crate) fn with_sequence(mut self, sequence: u64) -> Self {
        self.sequence = sequence;
        self
    }

    #[inline]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Stored payload (compressed if `metadata.compressed`)
    #[inline]
    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    #[inline]
    pub fn created_at(&self) -> u64 {
        self.created_at
    }

    #[inline]
    pub fn expires_at(&self) -> u64 {
        self.expires_at
    }

    #[inline]
    pub fn access_count(&self) -> u64 {
        self.access_count
    }

    #[inline]
    pub fn last_accessed_at(&self) -> u64 {
        self.last_accessed_at
    }

    /// Access tick of the most recent read or write
    #[inline]
    pub fn recency(&self) -> u64 {
        self.recency
    }

    /// Insertion sequence of the write that produced this entry
    #[inline]
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Stored size in bytes
    #[inline]
    pub fn size(&self) -> u64 {
        self.metadata.size_bytes
    }

    /// Total time-to-live in milliseconds
    #[inline]
    pub fn ttl_ms(&self) -> u64 {
        self.expires_at.saturating_sub(self.created_at)
    }

    #[inline]
    pub fn tags(&self) -> &BTreeSet<String> {
        &self.metadata.tags
    }

    #[inline]
    pub fn is_compressed(&self) -> bool {
        self.metadata.compressed
    }

    /// Check if expired at the given instant
    #[inline]
    pub fn is_expired_at(&self, now: u64) -> bool {
        now >= self.expires_at
    }

    /// Check if expired now
    #[inline]
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(now_millis())
    }

    /// Share of the TTL still remaining (0.0 once expired)
    pub fn remaining_fraction(&self, now: u64) -> f64 {
        let ttl = self.ttl_ms();
        if ttl == 0 || now >= self.expires_at {
            return 0.0;
        }
        (self.expires_at - now) as f64 / ttl as f64
    }

    /// Classify the entry for stale-while-revalidate
    pub fn freshness(&self, now: u64, refresh_threshold: f64) -> Freshness {
        if self.is_expired_at(now) {
            Freshness::Expired
        } else if self.remaining_fraction(now) < refresh_threshold {
            Freshness::Stale
        } else {
            Freshness::Fresh
        }
    }

    /// Record a read and return the new access count
    pub fn record_access(&mut self) -> u64 {
        self.last_accessed_at = now_millis();
        self.recency = next_recency();
        self.access_count += 1;
        self.access_count
    }

    /// Overlay access bookkeeping kept outside the stored record
    pub(crate) fn apply_access(&mut self, summary: &EntrySummary) {
        self.access_count = summary.access_count;
        self.last_accessed_at = summary.last_accessed_at;
        self.recency = summary.recency;
    }

    /// Payload-free view used by eviction and index rebuilds
    pub fn summary(&self) -> EntrySummary {
        EntrySummary {
            key: self.key.clone(),
            size_bytes: self.metadata.size_bytes,
            created_at: self.created_at,
            expires_at: self.expires_at,
            last_accessed_at: self.last_accessed_at,
            recency: self.recency,
            access_count: self.access_count,
            sequence: self.sequence,
            tags: self.metadata.tags.clone(),
        }
    }
}

/// Lightweight description of a stored entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntrySummary {
    pub key: String,
    pub size_bytes: u64,
    pub created_at: u64,
    pub expires_at: u64,
    pub last_accessed_at: u64,
    pub recency: u64,
    pub access_count: u64,
    pub sequence: u64,
    pub tags: BTreeSet<String>,
}

impl EntrySummary {
    /// Record a read on the summary and return the new access count
    pub(crate) fn record_access(&mut self) -> u64 {
        self.last_accessed_at = now_millis();
        self.recency = next_recency();
        self.access_count += 1;
        self.access_count
    }

    #[inline]
    pub fn is_expired_at(&self, now: u64) -> bool {
        now >= self.expires_at
    }
}

// =============================================================================
// Tests
// =============================================================================
