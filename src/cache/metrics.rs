//! Cache Metrics Collection
//!
//! Counters and statistics for monitoring cache health. Per-tier write
//! outcomes are recorded here instead of being swallowed, so a degraded
//! persistent tier shows up in [`CacheStats`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use chrono::{DateTime, TimeZone, Utc};
use serde::Serialize;

use super::tier::{TierKind, TierStats};

/// Result of one write-back operation against a tier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TierWriteOutcome {
    /// Applied to the tier
    Written,
    /// Ignored because the tier already held a newer write
    Superseded,
    /// The tier returned an error
    Failed,
}

#[derive(Debug, Default)]
struct TierCounters {
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    writes: AtomicU64,
    write_failures: AtomicU64,
}

/// Cache metrics collector
#[derive(Debug, Default)]
pub struct CacheMetrics {
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    expirations: AtomicU64,
    promotions: AtomicU64,
    corrupt_purges: AtomicU64,

    refreshes_started: AtomicU64,
    refreshes_failed: AtomicU64,
    fetch_errors: AtomicU64,

    compressed_writes: AtomicU64,
    bytes_saved: AtomicU64,

    // Exponential moving average, microseconds
    read_latency_us: AtomicU64,

    // Epoch millis of the last sweep, 0 if none yet
    last_cleanup_ms: AtomicU64,

    tiers: [TierCounters; 3],
}

impl CacheMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    fn tier(&self, kind: TierKind) -> &TierCounters {
        &self.tiers[kind.index()]
    }

    /// A read served by `kind`
    pub fn record_hit(&self, kind: TierKind) {
        self.hits.fetch_add(1, Ordering::Relaxed);
        self.tier(kind).hits.fetch_add(1, Ordering::Relaxed);
    }

    /// A read that `kind` could not serve
    pub fn record_tier_miss(&self, kind: TierKind) {
        self.tier(kind).misses.fetch_add(1, Ordering::Relaxed);
    }

    /// A read no tier could serve
    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_evictions(&self, kind: TierKind, count: u64) {
        self.evictions.fetch_add(count, Ordering::Relaxed);
        self.tier(kind).evictions.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_expirations(&self, count: u64) {
        self.expirations.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_promotion(&self) {
        self.promotions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_corrupt_purge(&self) {
        self.corrupt_purges.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_refresh_started(&self) {
        self.refreshes_started.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_refresh_failed(&self) {
        self.refreshes_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_fetch_error(&self) {
        self.fetch_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_compressed_write(&self, bytes_saved: u64) {
        self.compressed_writes.fetch_add(1, Ordering::Relaxed);
        self.bytes_saved.fetch_add(bytes_saved, Ordering::Relaxed);
    }

    pub fn record_write(&self, kind: TierKind, outcome: TierWriteOutcome) {
        let counters = self.tier(kind);
        match outcome {
            TierWriteOutcome::Written | TierWriteOutcome::Superseded => {
                counters.writes.fetch_add(1, Ordering::Relaxed);
            }
            TierWriteOutcome::Failed => {
                counters.write_failures.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    pub fn record_cleanup(&self, at_millis: u64) {
        self.last_cleanup_ms.store(at_millis, Ordering::Relaxed);
    }

    pub fn record_read_latency(&self, duration: Duration) {
        let new_us = duration.as_micros() as u64;
        let alpha = 0.1; // EMA smoothing factor

        let _ = self
            .read_latency_us
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |current| {
                Some(if current == 0 {
                    new_us
                } else {
                    ((1.0 - alpha) * current as f64 + alpha * new_us as f64) as u64
                })
            });
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    pub fn evictions(&self) -> u64 {
        self.evictions.load(Ordering::Relaxed)
    }

    pub fn write_failures(&self, kind: TierKind) -> u64 {
        self.tier(kind).write_failures.load(Ordering::Relaxed)
    }

    pub fn tier_writes(&self, kind: TierKind) -> u64 {
        self.tier(kind).writes.load(Ordering::Relaxed)
    }

    pub fn hit_rate(&self) -> f64 {
        let hits = self.hits() as f64;
        let total = hits + self.misses() as f64;
        if total == 0.0 {
            0.0
        } else {
            hits / total
        }
    }

    pub fn last_cleanup_at(&self) -> Option<DateTime<Utc>> {
        match self.last_cleanup_ms.load(Ordering::Relaxed) {
            0 => None,
            ms => Utc.timestamp_millis_opt(ms as i64).single(),
        }
    }

    /// Build a stats snapshot
    ///
    /// `tiers` lists every tier slot with its current occupancy. Entry count
    /// and memory usage describe the first enabled one.
    pub fn snapshot(&self, tiers: &[TierOccupancy]) -> CacheStats {
        let tier_stats: Vec<TierStats> = tiers
            .iter()
            .map(|t| {
                let counters = self.tier(t.kind);
                TierStats {
                    kind: t.kind,
                    enabled: t.enabled,
                    entries: t.entries,
                    size_bytes: t.size_bytes,
                    hits: counters.hits.load(Ordering::Relaxed),
                    misses: counters.misses.load(Ordering::Relaxed),
                    evictions: counters.evictions.load(Ordering::Relaxed),
                    write_failures: counters.write_failures.load(Ordering::Relaxed),
                }
            })
            .collect();

        let (entry_count, memory_usage_bytes) = tiers
            .iter()
            .find(|t| t.enabled)
            .map(|t| (t.entries, t.size_bytes))
            .unwrap_or((0, 0));

        let hits = self.hits();
        let misses = self.misses();

        CacheStats {
            hits,
            misses,
            total_requests: hits + misses,
            hit_rate: self.hit_rate(),
            entry_count,
            memory_usage_bytes,
            average_entry_size: if entry_count == 0 {
                0
            } else {
                memory_usage_bytes / entry_count
            },
            evictions: self.evictions(),
            expirations: self.expirations.load(Ordering::Relaxed),
            promotions: self.promotions.load(Ordering::Relaxed),
            corrupt_purges: self.corrupt_purges.load(Ordering::Relaxed),
            refreshes_started: self.refreshes_started.load(Ordering::Relaxed),
            refreshes_failed: self.refreshes_failed.load(Ordering::Relaxed),
            fetch_errors: self.fetch_errors.load(Ordering::Relaxed),
            compressed_writes: self.compressed_writes.load(Ordering::Relaxed),
            bytes_saved: self.bytes_saved.load(Ordering::Relaxed),
            last_cleanup_at: self.last_cleanup_at(),
            avg_read_latency_us: self.read_latency_us.load(Ordering::Relaxed),
            tiers: tier_stats,
        }
    }
}

/// Occupancy of one tier slot at snapshot time
#[derive(Debug, Clone, Copy)]
pub struct TierOccupancy {
    pub kind: TierKind,
    pub enabled: bool,
    pub entries: u64,
    pub size_bytes: u64,
}

/// Snapshot of cache statistics
#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub total_requests: u64,
    pub hit_rate: f64,
    pub entry_count: u64,
    pub memory_usage_bytes: u64,
    pub average_entry_size: u64,
    pub evictions: u64,
    pub expirations: u64,
    pub promotions: u64,
    pub corrupt_purges: u64,
    pub refreshes_started: u64,
    pub refreshes_failed: u64,
    pub fetch_errors: u64,
    pub compressed_writes: u64,
    pub bytes_saved: u64,
    pub last_cleanup_at: Option<DateTime<Utc>>,
    pub avg_read_latency_us: u64,
    pub tiers: Vec<TierStats>,
}

impl CacheStats {
    /// Stats for one tier, if present
    pub fn tier(&self, kind: TierKind) -> Option<&TierStats> {
        self.tiers.iter().find(|t| t.kind == kind)
    }
}

/// Latency tracker helper
pub struct LatencyTracker {
    start: Instant,
}

impl LatencyTracker {
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn occupancy(kind: TierKind, enabled: bool, entries: u64, size_bytes: u64) -> TierOccupancy {
        TierOccupancy {
            kind,
            enabled,
            entries,
            size_bytes,
        }
    }

    #[test]
    fn test_hit_tracking() {
        let metrics = CacheMetrics::new();

        metrics.record_hit(TierKind::Memory);
        metrics.record_hit(TierKind::Durable);
        metrics.record_miss();

        assert_eq!(metrics.hits(), 2);
        assert_eq!(metrics.misses(), 1);
        assert!((metrics.hit_rate() - 0.666).abs() < 0.01);
    }

    #[test]
    fn test_empty_hit_rate() {
        let metrics = CacheMetrics::new();
        assert_eq!(metrics.hit_rate(), 0.0);

        let stats = metrics.snapshot(&[]);
        assert_eq!(stats.total_requests, 0);
        assert_eq!(stats.average_entry_size, 0);
        assert!(stats.last_cleanup_at.is_none());
    }

    #[test]
    fn test_latency_ema() {
        let metrics = CacheMetrics::new();

        metrics.record_read_latency(Duration::from_micros(100));
        assert_eq!(metrics.snapshot(&[]).avg_read_latency_us, 100);

        metrics.record_read_latency(Duration::from_micros(200));
        let latency = metrics.snapshot(&[]).avg_read_latency_us;
        assert!(latency > 100 && latency < 200);
    }

    #[test]
    fn test_write_outcomes_per_tier() {
        let metrics = CacheMetrics::new();

        metrics.record_write(TierKind::Fast, TierWriteOutcome::Written);
        metrics.record_write(TierKind::Fast, TierWriteOutcome::Failed);
        metrics.record_write(TierKind::Durable, TierWriteOutcome::Superseded);

        assert_eq!(metrics.write_failures(TierKind::Fast), 1);
        assert_eq!(metrics.tier_writes(TierKind::Fast), 1);
        assert_eq!(metrics.write_failures(TierKind::Durable), 0);
        assert_eq!(metrics.tier_writes(TierKind::Durable), 1);
    }

    #[test]
    fn test_snapshot_uses_first_enabled_tier() {
        let metrics = CacheMetrics::new();
        metrics.record_evictions(TierKind::Fast, 3);
        metrics.record_compressed_write(400);
        metrics.record_cleanup(1_700_000_000_000);

        let stats = metrics.snapshot(&[
            occupancy(TierKind::Memory, false, 0, 0),
            occupancy(TierKind::Fast, true, 4, 1_000),
            occupancy(TierKind::Durable, true, 9, 9_000),
        ]);

        assert_eq!(stats.entry_count, 4);
        assert_eq!(stats.memory_usage_bytes, 1_000);
        assert_eq!(stats.average_entry_size, 250);
        assert_eq!(stats.evictions, 3);
        assert_eq!(stats.tier(TierKind::Fast).unwrap().evictions, 3);
        assert_eq!(stats.bytes_saved, 400);
        assert_eq!(
            stats.last_cleanup_at.unwrap().timestamp_millis(),
            1_700_000_000_000
        );
    }

    #[test]
    fn test_stats_serialize() {
        let metrics = CacheMetrics::new();
        metrics.record_hit(TierKind::Memory);

        let stats = metrics.snapshot(&[occupancy(TierKind::Memory, true, 1, 10)]);
        let json = serde_json::to_value(&stats).unwrap();
        assert_eq!(json["hits"], 1);
        assert_eq!(json["tiers"][0]["kind"], "memory");
    }

    #[test]
    fn test_latency_tracker() {
        let tracker = LatencyTracker::start();
        std::thread::sleep(Duration::from_millis(10));
        assert!(tracker.elapsed() >= Duration::from_millis(10));
    }
}
