//! Storage Tier Abstraction
//!
//! Every backend the cache writes to implements [`Tier`]. The facade and the
//! eviction manager only ever talk to this trait, never to a concrete backend.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::entry::{CacheEntry, EntrySummary};
use crate::error::Result;

/// Storage tier classes in probe order (fastest first)
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum TierKind {
    /// Volatile in-process memory
    Memory,
    /// Fast persistent store (small, append-only segment)
    Fast,
    /// Durable persistent store (large, one file per entry)
    Durable,
}

impl TierKind {
    /// All tiers in probe order
    pub const ALL: [TierKind; 3] = [TierKind::Memory, TierKind::Fast, TierKind::Durable];

    /// Short lowercase name used in config and metric labels
    pub fn name(&self) -> &'static str {
        match self {
            TierKind::Memory => "memory",
            TierKind::Fast => "fast",
            TierKind::Durable => "durable",
        }
    }

    /// Position in the probe order
    #[inline]
    pub fn index(&self) -> usize {
        match self {
            TierKind::Memory => 0,
            TierKind::Fast => 1,
            TierKind::Durable => 2,
        }
    }

    /// Whether writes to this tier go through the write-back queue
    #[inline]
    pub fn is_persistent(&self) -> bool {
        !matches!(self, TierKind::Memory)
    }
}

impl std::fmt::Display for TierKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TierKind::Memory => write!(f, "L1 (Memory)"),
            TierKind::Fast => write!(f, "L2 (Segment)"),
            TierKind::Durable => write!(f, "L3 (Disk)"),
        }
    }
}

/// Capacity budget of a single tier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TierLimits {
    /// Maximum total payload bytes
    pub max_size_bytes: u64,
    /// Optional maximum entry count
    pub max_entries: Option<u64>,
}

impl TierLimits {
    /// Whether a tier holding `entries` entries of `size_bytes` total is over budget
    #[inline]
    pub fn exceeded(&self, entries: u64, size_bytes: u64) -> bool {
        size_bytes > self.max_size_bytes || self.max_entries.is_some_and(|max| entries > max)
    }
}

/// A storage backend participating in the cache
///
/// Implementations store entries verbatim. Expiry, versioning and tag
/// bookkeeping are the facade's job.
#[async_trait]
pub trait Tier: Send + Sync {
    /// Tier class
    fn kind(&self) -> TierKind;

    /// Get an entry and record the access
    async fn get(&self, key: &str) -> Result<Option<CacheEntry>>;

    /// Get an entry without touching access statistics
    async fn peek(&self, key: &str) -> Result<Option<CacheEntry>>;

    /// Store an entry, replacing any existing one for the key
    ///
    /// Returns `false` when the tier already holds a newer write for the key
    /// and the entry was ignored.
    async fn set(&self, entry: CacheEntry) -> Result<bool>;

    /// Delete an entry, returning whether it was present
    async fn delete(&self, key: &str) -> Result<bool>;

    /// Delete an entry only if it is still the write numbered `sequence`
    ///
    /// Used by expiry and eviction, which decide from a [`scan`](Tier::scan)
    /// snapshot that a concurrent `set` may already have replaced. The
    /// default is a peek followed by a delete; backends that can check and
    /// remove under one lock should override it.
    async fn delete_if_unchanged(&self, key: &str, sequence: u64) -> Result<bool> {
        match self.peek(key).await? {
            Some(entry) if entry.sequence() == sequence => self.delete(key).await,
            _ => Ok(false),
        }
    }

    /// Check if a key is stored
    async fn contains(&self, key: &str) -> Result<bool>;

    /// Summaries of every stored entry
    async fn scan(&self) -> Result<Vec<EntrySummary>>;

    /// Remove every entry
    async fn clear(&self) -> Result<()>;

    /// Number of stored entries
    fn len(&self) -> usize;

    /// Total stored payload bytes
    fn size_bytes(&self) -> u64;

    /// Check if the tier is empty
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Per-tier statistics
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TierStats {
    pub kind: TierKind,
    pub enabled: bool,
    pub entries: u64,
    pub size_bytes: u64,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub write_failures: u64,
}
