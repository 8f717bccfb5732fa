//! Tiered Cache System
//!
//! Caches expensive results (remote scraping calls, model inference) across
//! three storage tiers of increasing durability and decreasing speed.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────────┐
//! │                               Cache                                      │
//! ├──────────────────────────────────────────────────────────────────────────┤
//! │  L1 Memory            │ L2 Segment            │ L3 Disk                  │
//! │  ┌────────────────┐   │ ┌──────────────────┐  │ ┌────────────────────┐   │
//! │  │ ShardedMap     │   │ │ Append-only log  │  │ │ File per entry     │   │
//! │  │ (64-way)       │   │ │ + index          │  │ │ + DashMap index    │   │
//! │  │ synchronous    │   │ │ write-back queue │  │ │ write-back queue   │   │
//! │  └────────────────┘   │ └──────────────────┘  │ └────────────────────┘   │
//! │         │             │          │            │           │              │
//! │         └─────────────┴──────────┴────────────┴───────────┘              │
//! │                                  │                                       │
//! │   Eviction (LRU/LFU/FIFO/TTL) · Tag Index · Refresh Coordinator · Stats  │
//! └──────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Guarantees
//!
//! - A successful `set` is visible to the next `get` on the same cache
//! - An entry past its expiry is never returned
//! - At most one fetch per key is in flight at any time
//! - Persistent tier failures are recorded in stats and never fail a call

pub mod compression;
mod config;
mod disk;
mod entry;
mod eviction;
mod manager;
mod memory;
mod metrics;
mod refresh;
mod segment;
mod shard;
mod strategy;
mod sweeper;
mod tags;
mod tier;
mod writeback;

pub use compression::{
    CompressionAlgorithm, CompressionCodec, CompressionConfig, Compressor, Encoded, Lz4Compressor,
};
pub use config::{CacheConfig, ConfigUpdate, TierConfig, TierUpdate};
pub use disk::DiskTier;
pub use entry::{now_millis, CacheEntry, EntryMetadata, EntrySummary, Freshness, Priority};
pub use eviction::{EvictionManager, EvictionPolicy};
pub use manager::{Cache, CacheBuilder, CleanupReport};
pub use memory::MemoryTier;
pub use metrics::{CacheMetrics, CacheStats, TierWriteOutcome};
pub use refresh::RefreshCoordinator;
pub use segment::SegmentTier;
pub use shard::{ShardedMap, Weighted};
pub use strategy::{CacheStrategy, ResolvedStrategy};
pub use sweeper::SweeperHandle;
pub use tags::TagIndex;
pub use tier::{Tier, TierKind, TierLimits, TierStats};

/// Default entry lifetime (5 minutes)
pub const DEFAULT_TTL_MS: u64 = 5 * 60 * 1000;

/// Default remaining-TTL fraction below which an entry is stale
pub const DEFAULT_REFRESH_THRESHOLD: f64 = 0.2;

/// Default cleanup sweep interval
pub const DEFAULT_CLEANUP_INTERVAL_MS: u64 = 60 * 1000;

/// Default memory tier capacity (64MB)
pub const DEFAULT_MEMORY_CAPACITY: u64 = 64 * 1024 * 1024;

/// Default fast persistent tier capacity (16MB)
pub const DEFAULT_FAST_CAPACITY: u64 = 16 * 1024 * 1024;

/// Default durable tier capacity (256MB)
pub const DEFAULT_DURABLE_CAPACITY: u64 = 256 * 1024 * 1024;

/// Payloads larger than this are compressed by default
pub const DEFAULT_COMPRESSION_THRESHOLD: u64 = 1024;

// =============================================================================
// Tests
// =============================================================================
