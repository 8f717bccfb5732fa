//! SiteLens - Tiered Cache for Website and Analysis Data
//!
//! Remote scraping calls and model inference are expensive to repeat. SiteLens
//! decides what to keep, where, for how long, and how to keep it fresh without
//! blocking callers or duplicating work.
//!
//! # Architecture
//!
//! ```text
//! caller ──▶ Cache ──▶ L1 Memory ──▶ L2 Segment ──▶ L3 Disk
//!              │
//!              ├── Refresh Coordinator (stale-while-revalidate, single-flight)
//!              ├── Tag Index (bulk invalidation)
//!              ├── Eviction Manager (LRU / LFU / FIFO / TTL)
//!              └── Stats ──▶ Prometheus exporter
//! ```
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//! use sitelens::{Cache, CacheConfig};
//!
//! # async fn demo() -> sitelens::Result<()> {
//! let cache = Cache::open(CacheConfig::default().with_data_dir("/var/lib/sitelens")).await?;
//!
//! let score: u32 = cache
//!     .cache_api_call("seo:example.com", || async { Ok(82) }, Duration::from_secs(600))
//!     .await?;
//! # let _ = score;
//! # Ok(())
//! # }
//! ```
//!
//! # Modules
//!
//! - [`cache`] - Tiers, eviction, refresh and the [`Cache`] facade
//! - [`error`] - Error types
//! - [`exporter`] - Prometheus exposition and health probes

pub mod cache;
pub mod error;
pub mod exporter;

pub use cache::{
    Cache, CacheBuilder, CacheConfig, CacheStats, CacheStrategy, ConfigUpdate, EvictionPolicy,
    Priority, SweeperHandle, Tier, TierKind,
};
pub use error::{Error, Result};
pub use exporter::CacheExporter;

/// Crate version
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
