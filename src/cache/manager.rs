//! Tiered Cache Manager
//!
//! The public facade. Coordinates lookups across tiers, promotion of hits,
//! write-back to persistent tiers, tag invalidation, refresh and capacity
//! enforcement.
//!
//! # Read path
//!
//! ```text
//! get(key) ──▶ L1 Memory ──miss──▶ L2 Segment ──miss──▶ L3 Disk ──miss──▶ fallback / fetch
//!                 │                    │                   │                  │
//!                hit                  hit                 hit            single-flight
//!                 │                    │                   │                  │
//!                 ◀──── promote ───────┴───────────────────┘           store across tiers
//! ```
//!
//! # Write path
//!
//! The fastest enabled tier is written before `set` returns. Every other
//! tier is written through its write-back queue and never blocks the caller.

use std::collections::BTreeSet;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use bytes::Bytes;
use futures::FutureExt;
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use super::compression::{CompressionCodec, Compressor};
use super::config::{CacheConfig, ConfigUpdate, TierConfig};
use super::disk::DiskTier;
use super::entry::{now_millis, observe_sequence, CacheEntry, Freshness};
use super::eviction::EvictionManager;
use super::memory::MemoryTier;
use super::metrics::{CacheMetrics, CacheStats, LatencyTracker, TierOccupancy, TierWriteOutcome};
use super::refresh::{Flight, FlightResult, RefreshCoordinator};
use super::segment::SegmentTier;
use super::strategy::CacheStrategy;
use super::sweeper::{self, SweeperHandle};
use super::tags::TagIndex;
use super::tier::{Tier, TierKind};
use super::writeback::{EnforceFn, WriteBack};
use crate::error::{Error, Result};

// =============================================================================
// Builder
// =============================================================================

/// Builder for [`Cache`]
pub struct CacheBuilder {
    config: CacheConfig,
    tiers: Vec<Arc<dyn Tier>>,
    compressor: Option<Arc<dyn Compressor>>,
}

impl CacheBuilder {
    /// Use `tier` instead of the built-in backend for its kind
    pub fn with_tier(mut self, tier: Arc<dyn Tier>) -> Self {
        self.tiers.retain(|t| t.kind() != tier.kind());
        self.tiers.push(tier);
        self
    }

    /// Use a custom compressor
    pub fn with_compressor(mut self, compressor: Arc<dyn Compressor>) -> Self {
        self.compressor = Some(compressor);
        self
    }

    /// Open the tiers and start the write-back workers
    ///
    /// A persistent tier that fails to open is logged and left disabled.
    /// Must be called from within a tokio runtime.
    pub async fn build(self) -> Result<Cache> {
        let mut config = self.config;
        config.validate()?;

        let mut opened: Vec<(TierKind, Arc<dyn Tier>)> = Vec::new();
        for kind in TierKind::ALL {
            if let Some(tier) = self.tiers.iter().find(|t| t.kind() == kind) {
                opened.push((kind, Arc::clone(tier)));
                continue;
            }
            if kind.is_persistent() && !config.tier(kind).enabled {
                continue;
            }
            match open_tier(kind, config.tier(kind)).await {
                Ok(tier) => {
                    info!(tier = %kind, "Opened cache tier");
                    opened.push((kind, tier));
                }
                Err(e) => {
                    warn!(tier = %kind, error = %e, "Cache tier unavailable, continuing without it");
                    config.tier_mut(kind).enabled = false;
                }
            }
        }

        let codec = match self.compressor {
            Some(compressor) => CompressionCodec::with_compressor(config.compression.clone(), compressor),
            None => CompressionCodec::with_config(config.compression.clone()),
        };
        let metrics = Arc::new(CacheMetrics::new());

        let inner = Arc::new_cyclic(|weak: &Weak<Inner>| {
            let slots = opened
                .into_iter()
                .map(|(kind, tier)| {
                    let writeback = kind.is_persistent().then(|| {
                        WriteBack::spawn(
                            Arc::clone(&tier),
                            Arc::clone(&metrics),
                            Some(enforce_hook(weak.clone())),
                        )
                    });
                    TierSlot {
                        kind,
                        tier,
                        writeback,
                    }
                })
                .collect();

            Inner {
                config: RwLock::new(config),
                slots,
                codec,
                tags: TagIndex::new(),
                refresh: RefreshCoordinator::new(),
                metrics,
                cleanup_lock: tokio::sync::Mutex::new(()),
                generation: AtomicU64::new(0),
            }
        });

        inner.rebuild_tag_index().await;

        Ok(Cache { inner })
    }
}

async fn open_tier(kind: TierKind, config: &TierConfig) -> Result<Arc<dyn Tier>> {
    let path = || {
        config
            .path
            .clone()
            .ok_or_else(|| Error::unavailable(kind, "no path configured"))
    };
    let tier: Arc<dyn Tier> = match kind {
        TierKind::Memory => Arc::new(MemoryTier::new()),
        TierKind::Fast => Arc::new(SegmentTier::open(path()?).await?),
        TierKind::Durable => Arc::new(DiskTier::open(path()?).await?),
    };
    Ok(tier)
}

fn enforce_hook(weak: Weak<Inner>) -> EnforceFn {
    Arc::new(move |kind| {
        let weak = weak.clone();
        async move {
            if let Some(inner) = weak.upgrade() {
                inner.enforce(kind, None).await;
            }
        }
        .boxed()
    })
}

// =============================================================================
// Internal State
// =============================================================================

struct TierSlot {
    kind: TierKind,
    tier: Arc<dyn Tier>,
    /// Present for persistent tiers
    writeback: Option<WriteBack>,
}

/// A live entry found by a lookup, with its decoded payload
struct Found {
    entry: CacheEntry,
    payload: Bytes,
    tier: TierKind,
}

/// Outcome of one cleanup sweep
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanupReport {
    /// Expired keys removed
    pub expired: u64,
    /// Keys dropped from the tag index because no tier holds them
    pub untagged: u64,
    pub duration: Duration,
}

pub(crate) struct Inner {
    config: RwLock<CacheConfig>,
    /// Opened tiers in probe order
    slots: Vec<TierSlot>,
    codec: CompressionCodec,
    tags: TagIndex,
    refresh: RefreshCoordinator,
    metrics: Arc<CacheMetrics>,
    cleanup_lock: tokio::sync::Mutex<()>,
    /// Bumped by every removal so a racing lookup does not promote a removed key
    generation: AtomicU64,
}

impl Inner {
    fn slot(&self, kind: TierKind) -> Option<&TierSlot> {
        self.slots.iter().find(|s| s.kind == kind)
    }

    fn enabled_slots(&self) -> Vec<&TierSlot> {
        let config = self.config.read();
        self.slots
            .iter()
            .filter(|s| config.tier(s.kind).enabled)
            .collect()
    }

    pub(crate) fn cleanup_interval(&self) -> Duration {
        Duration::from_millis(self.config.read().cleanup_interval_ms)
    }

    /// Index tags of every live persisted entry and move the insertion
    /// sequence past every stored write
    async fn rebuild_tag_index(&self) {
        let now = now_millis();
        for slot in &self.slots {
            match slot.tier.scan().await {
                Ok(summaries) => {
                    for summary in summaries {
                        observe_sequence(summary.sequence);
                        if !summary.tags.is_empty() && !summary.is_expired_at(now) {
                            self.tags.replace(&summary.key, &summary.tags);
                        }
                    }
                }
                Err(e) => warn!(tier = %slot.kind, error = %e, "Cannot scan tier for tags"),
            }
        }
        if self.tags.key_count() > 0 {
            info!(
                "Rebuilt tag index: {} keys under {} tags",
                self.tags.key_count(),
                self.tags.tag_count()
            );
        }
    }

    // -------------------------------------------------------------------------
    // Reads
    // -------------------------------------------------------------------------

    /// Probe enabled tiers fastest first, promoting a hit into the faster
    /// tiers that missed
    async fn lookup(&self, key: &str) -> Option<Found> {
        let version = self.config.read().version;
        let generation = self.generation.load(Ordering::Acquire);
        let now = now_millis();

        let mut missed: Vec<&TierSlot> = Vec::new();
        for slot in self.enabled_slots() {
            match slot.tier.get(key).await {
                Ok(Some(entry)) => {
                    if entry.is_expired_at(now) {
                        debug!(key, tier = %slot.kind, "Expired entry found on read");
                        self.metrics.record_expirations(1);
                        self.purge(key).await;
                        return None;
                    }
                    if entry.metadata.version != version {
                        debug!(
                            key,
                            stored = entry.metadata.version,
                            current = version,
                            "Entry written under another version"
                        );
                        self.purge(key).await;
                        return None;
                    }

                    let payload = match self.codec.decode(entry.payload(), entry.is_compressed()) {
                        Ok(payload) => payload,
                        Err(e) => {
                            warn!(key, tier = %slot.kind, error = %e, "Undecodable payload, purging");
                            self.metrics.record_corrupt_purge();
                            self.purge(key).await;
                            return None;
                        }
                    };

                    self.promote(&missed, &entry, generation).await;
                    return Some(Found {
                        entry,
                        payload,
                        tier: slot.kind,
                    });
                }
                Ok(None) => {
                    self.metrics.record_tier_miss(slot.kind);
                    missed.push(slot);
                }
                Err(e) if e.is_corruption() => {
                    warn!(key, tier = %slot.kind, error = %e, "Corrupt record, purging");
                    self.metrics.record_corrupt_purge();
                    self.purge(key).await;
                    return None;
                }
                Err(e) => {
                    warn!(key, tier = %slot.kind, error = %e, "Tier read failed");
                    self.metrics.record_tier_miss(slot.kind);
                }
            }
        }
        None
    }

    async fn promote(&self, missed: &[&TierSlot], entry: &CacheEntry, generation: u64) {
        if missed.is_empty() || self.generation.load(Ordering::Acquire) != generation {
            return;
        }
        for slot in missed {
            debug!(key = entry.key(), tier = %slot.kind, "Promoting entry");
            self.write_to(slot, entry.clone(), false).await;
            self.metrics.record_promotion();
        }
    }

    /// Look up and decode `key`; a payload that does not decode as `T` is purged
    async fn read_value<T: DeserializeOwned>(&self, key: &str) -> Option<(T, CacheEntry, TierKind)> {
        let tracker = LatencyTracker::start();
        let found = self.lookup(key).await;
        self.metrics.record_read_latency(tracker.elapsed());

        let found = found?;
        match serde_json::from_slice::<T>(&found.payload) {
            Ok(value) => Some((value, found.entry, found.tier)),
            Err(e) => {
                warn!(key, error = %e, "Cached value does not decode, purging");
                self.metrics.record_corrupt_purge();
                self.purge(key).await;
                None
            }
        }
    }

    // -------------------------------------------------------------------------
    // Writes
    // -------------------------------------------------------------------------

    async fn store(&self, key: &str, payload: &[u8], strategy: &CacheStrategy) {
        let (resolved, version) = {
            let config = self.config.read();
            (strategy.resolve(&config), config.version)
        };

        let encoded = self.codec.encode(payload, resolved.compression);
        if encoded.compressed {
            self.metrics.record_compressed_write(encoded.bytes_saved());
        }

        let entry = CacheEntry::new(key, encoded.payload, resolved.ttl_ms)
            .with_tags(resolved.tags.unwrap_or_default())
            .with_priority(resolved.priority)
            .with_version(version)
            .with_compressed(encoded.compressed);

        self.write_entry(entry).await;
    }

    /// Write to the fastest enabled tier and wait, queue the rest
    async fn write_entry(&self, entry: CacheEntry) {
        let slots = self.enabled_slots();
        if slots.is_empty() {
            warn!(key = entry.key(), "No cache tier enabled, value not stored");
            return;
        }

        self.tags.replace(entry.key(), entry.tags());

        let mut first = true;
        for slot in slots {
            self.write_to(slot, entry.clone(), first).await;
            first = false;
        }
    }

    async fn write_to(&self, slot: &TierSlot, entry: CacheEntry, wait: bool) {
        match slot.writeback {
            Some(ref wb) if wait => {
                wb.write(entry).await;
            }
            Some(ref wb) => {
                wb.set(entry);
            }
            None => {
                let key = entry.key().to_string();
                let outcome = match slot.tier.set(entry).await {
                    Ok(true) => TierWriteOutcome::Written,
                    Ok(false) => TierWriteOutcome::Superseded,
                    Err(e) => {
                        warn!(key = %key, tier = %slot.kind, error = %e, "Tier write failed");
                        TierWriteOutcome::Failed
                    }
                };
                self.metrics.record_write(slot.kind, outcome);
                if outcome == TierWriteOutcome::Written {
                    self.enforce(slot.kind, Some(&key)).await;
                }
            }
        }
    }

    // -------------------------------------------------------------------------
    // Fetch
    // -------------------------------------------------------------------------

    /// Join the in-flight fetch for `key` or start one
    fn start_fetch<T, F, Fut>(
        self: &Arc<Self>,
        key: &str,
        fetch: F,
        strategy: CacheStrategy,
        refresh: bool,
    ) -> Flight
    where
        T: Serialize + Send + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<Option<T>>> + Send + 'static,
    {
        let inner = Arc::clone(self);
        let owned_key = key.to_string();
        let (flight, started) = self.refresh.join_or_start(key, async move {
            inner.run_fetch(owned_key, fetch, strategy, refresh).await
        });

        if started {
            if refresh {
                self.metrics.record_refresh_started();
            }
            debug!(key, refresh, "Started fetch");
        } else {
            debug!(key, "Joined in-flight fetch");
        }
        flight
    }

    #[instrument(skip(self, fetch, strategy))]
    async fn run_fetch<T, F, Fut>(
        self: Arc<Self>,
        key: String,
        fetch: F,
        mut strategy: CacheStrategy,
        refresh: bool,
    ) -> FlightResult
    where
        T: Serialize + Send + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<Option<T>>> + Send + 'static,
    {
        let value = match fetch().await {
            Ok(Some(value)) => value,
            Ok(None) => return Ok(None),
            Err(e) => {
                self.metrics.record_fetch_error();
                if refresh {
                    self.metrics.record_refresh_failed();
                }
                warn!(error = %e, "Fetch failed, previous value kept");
                return Err(format!("{:#}", e));
            }
        };

        let payload = serde_json::to_vec(&value).map_err(|e| {
            warn!(error = %e, "Fetched value cannot be serialized");
            e.to_string()
        })?;

        if strategy.tags.is_none() {
            let existing = self.tags.tags_of(&key);
            if !existing.is_empty() {
                strategy.tags = Some(existing.into_iter().collect());
            }
        }

        self.store(&key, &payload, &strategy).await;
        Ok(Some(Bytes::from(payload)))
    }

    // -------------------------------------------------------------------------
    // Removal
    // -------------------------------------------------------------------------

    /// Drop `key` everywhere without waiting on persistent tiers
    async fn purge(&self, key: &str) {
        for slot in &self.slots {
            match slot.writeback {
                Some(ref wb) => wb.delete_later(key),
                None => {
                    if let Err(e) = slot.tier.delete(key).await {
                        warn!(key, tier = %slot.kind, error = %e, "Tier delete failed");
                    }
                }
            }
        }
        self.tags.remove_key(key);
    }

    /// Drop `key` everywhere, returning once every tier has applied it
    async fn remove(&self, key: &str) -> bool {
        self.generation.fetch_add(1, Ordering::AcqRel);

        let mut removed = false;
        for slot in &self.slots {
            let deleted = match slot.writeback {
                Some(ref wb) => wb.delete(key).await,
                None => match slot.tier.delete(key).await {
                    Ok(deleted) => deleted,
                    Err(e) => {
                        warn!(key, tier = %slot.kind, error = %e, "Tier delete failed");
                        false
                    }
                },
            };
            removed |= deleted;
        }
        removed |= self.tags.remove_key(key);
        removed
    }

    async fn held_elsewhere(&self, key: &str, except: TierKind) -> bool {
        for slot in self.slots.iter().filter(|s| s.kind != except) {
            if matches!(slot.tier.contains(key).await, Ok(true)) {
                return true;
            }
        }
        false
    }

    // -------------------------------------------------------------------------
    // Capacity
    // -------------------------------------------------------------------------

    /// Evict from `kind` until it fits its budget
    ///
    /// Keys being refreshed, and `protected` (the key just written), are
    /// never chosen.
    async fn enforce(&self, kind: TierKind, protected: Option<&str>) {
        let Some(slot) = self.slot(kind) else {
            return;
        };
        let (limits, policy) = {
            let config = self.config.read();
            let tier = config.tier(kind);
            if !tier.enabled {
                return;
            }
            (tier.limits(), config.eviction_policy)
        };

        if !limits.exceeded(slot.tier.len() as u64, slot.tier.size_bytes()) {
            return;
        }
        debug!(
            tier = %kind,
            entries = slot.tier.len(),
            size_bytes = slot.tier.size_bytes(),
            "Capacity exceeded"
        );

        let summaries = match slot.tier.scan().await {
            Ok(summaries) => summaries,
            Err(e) => {
                warn!(tier = %kind, error = %e, "Cannot scan tier for eviction");
                return;
            }
        };

        let victims = EvictionManager::new(policy).select_victims(summaries, limits, |key| {
            protected == Some(key) || self.refresh.is_refreshing(key)
        });

        let mut evicted = 0;
        for victim in victims {
            match slot.tier.delete_if_unchanged(&victim.key, victim.sequence).await {
                Ok(true) => {
                    evicted += 1;
                    if !self.held_elsewhere(&victim.key, kind).await {
                        self.tags.remove_key(&victim.key);
                    }
                }
                Ok(false) => {}
                Err(e) => warn!(key = %victim.key, tier = %kind, error = %e, "Eviction delete failed"),
            }
        }

        if evicted > 0 {
            self.metrics.record_evictions(kind, evicted);
            debug!(tier = %kind, evicted, policy = %policy, "Evicted entries");
        }
    }

    fn enforce_all(&self) -> Vec<TierKind> {
        let mut inline = Vec::new();
        for slot in self.enabled_slots() {
            match slot.writeback {
                Some(ref wb) => wb.enforce(),
                None => inline.push(slot.kind),
            }
        }
        inline
    }

    async fn flush(&self) {
        for slot in &self.slots {
            if let Some(ref wb) = slot.writeback {
                wb.flush().await;
            }
        }
    }

    // -------------------------------------------------------------------------
    // Cleanup
    // -------------------------------------------------------------------------

    /// Sweep expired entries and re-enforce capacity
    ///
    /// Returns `None` if another sweep is already running.
    pub(crate) async fn cleanup(&self) -> Option<CleanupReport> {
        let Ok(_guard) = self.cleanup_lock.try_lock() else {
            debug!("Cleanup already running, skipping");
            return None;
        };

        let started = Instant::now();
        let now = now_millis();
        let mut expired: BTreeSet<String> = BTreeSet::new();

        for slot in self.enabled_slots() {
            let summaries = match slot.tier.scan().await {
                Ok(summaries) => summaries,
                Err(e) => {
                    warn!(tier = %slot.kind, error = %e, "Cannot scan tier for cleanup");
                    continue;
                }
            };
            for summary in summaries.into_iter().filter(|s| s.is_expired_at(now)) {
                if self.refresh.is_refreshing(&summary.key) {
                    continue;
                }
                match slot.tier.delete_if_unchanged(&summary.key, summary.sequence).await {
                    Ok(true) => {
                        expired.insert(summary.key);
                    }
                    Ok(false) => {}
                    Err(e) => warn!(key = %summary.key, tier = %slot.kind, error = %e, "Expiry delete failed"),
                }
            }
        }

        for key in &expired {
            if !self.held_anywhere(key).await {
                self.tags.remove_key(key);
            }
        }
        self.metrics.record_expirations(expired.len() as u64);

        // Pending writes must land before the index is compared with the tiers
        self.flush().await;
        let mut untagged = 0;
        for key in self.tags.keys() {
            if !self.held_anywhere(&key).await && self.tags.remove_key(&key) {
                untagged += 1;
            }
        }

        for kind in self.enforce_all() {
            self.enforce(kind, None).await;
        }

        self.metrics.record_cleanup(now_millis());
        let report = CleanupReport {
            expired: expired.len() as u64,
            untagged,
            duration: started.elapsed(),
        };
        if report.expired > 0 || report.untagged > 0 {
            info!(
                "Cleanup removed {} expired entries, untagged {} keys in {:?}",
                report.expired, report.untagged, report.duration
            );
        } else {
            debug!(duration = ?report.duration, "Cleanup found nothing to remove");
        }
        Some(report)
    }

    async fn held_anywhere(&self, key: &str) -> bool {
        for slot in &self.slots {
            if matches!(slot.tier.contains(key).await, Ok(true)) {
                return true;
            }
        }
        false
    }

    fn stats(&self) -> CacheStats {
        let config = self.config.read();
        let occupancy: Vec<TierOccupancy> = TierKind::ALL
            .iter()
            .map(|&kind| match self.slot(kind) {
                Some(slot) => TierOccupancy {
                    kind,
                    enabled: config.tier(kind).enabled,
                    entries: slot.tier.len() as u64,
                    size_bytes: slot.tier.size_bytes(),
                },
                None => TierOccupancy {
                    kind,
                    enabled: false,
                    entries: 0,
                    size_bytes: 0,
                },
            })
            .collect();
        self.metrics.snapshot(&occupancy)
    }
}

// =============================================================================
// Cache Facade
// =============================================================================

/// Multi-tier cache with stale-while-revalidate refresh
///
/// Cheap to clone; clones share the same tiers and state.
///
/// ```no_run
/// use std::time::Duration;
/// use sitelens::{Cache, CacheConfig, CacheStrategy};
///
/// # async fn demo() -> sitelens::Result<()> {
/// let cache = Cache::open(CacheConfig::default()).await?;
/// cache
///     .set_with("seo:example.com", &82u32, &CacheStrategy::ttl(Duration::from_secs(600)))
///     .await?;
/// let score: Option<u32> = cache.get("seo:example.com").await;
/// assert_eq!(score, Some(82));
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Cache {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for Cache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cache")
            .field("tiers", &self.inner.slots.iter().map(|s| s.kind).collect::<Vec<_>>())
            .field("tagged_keys", &self.inner.tags.key_count())
            .finish()
    }
}

impl Cache {
    pub fn builder(config: CacheConfig) -> CacheBuilder {
        CacheBuilder {
            config,
            tiers: Vec::new(),
            compressor: None,
        }
    }

    /// Open a cache with the built-in tier backends
    pub async fn open(config: CacheConfig) -> Result<Self> {
        Self::builder(config).build().await
    }

    /// Current configuration
    pub fn config(&self) -> CacheConfig {
        self.inner.config.read().clone()
    }

    /// Get a value, or `None` on a miss
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        match self.inner.read_value::<T>(key).await {
            Some((value, _, tier)) => {
                self.inner.metrics.record_hit(tier);
                Some(value)
            }
            None => {
                self.inner.metrics.record_miss();
                None
            }
        }
    }

    /// Get a value, calling `fallback` on a miss
    ///
    /// A `Some` result from the fallback is stored with the default strategy.
    /// Concurrent misses for the same key share one fallback call, which runs
    /// to completion even if every caller stops waiting.
    pub async fn get_or_fetch<T, F, Fut>(&self, key: &str, fallback: F) -> Result<Option<T>>
    where
        T: Serialize + DeserializeOwned + Send + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<Option<T>>> + Send + 'static,
    {
        if let Some((value, _, tier)) = self.inner.read_value::<T>(key).await {
            self.inner.metrics.record_hit(tier);
            return Ok(Some(value));
        }
        self.inner.metrics.record_miss();

        let flight = self
            .inner
            .start_fetch(key, fallback, CacheStrategy::default(), false);
        match flight.await {
            Ok(Some(payload)) => Ok(Some(serde_json::from_slice(&payload)?)),
            Ok(None) => Ok(None),
            Err(reason) => Err(Error::Fetch {
                key: key.to_string(),
                reason,
            }),
        }
    }

    /// Store a value with the default strategy
    pub async fn set<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<()> {
        self.set_with(key, value, &CacheStrategy::default()).await
    }

    /// Store a value
    ///
    /// Fails only when `value` cannot be serialized, in which case nothing is
    /// stored. Persistent tier failures are recorded in stats.
    pub async fn set_with<T: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &T,
        strategy: &CacheStrategy,
    ) -> Result<()> {
        let payload = serde_json::to_vec(value)?;
        self.inner.store(key, &payload, strategy).await;
        Ok(())
    }

    /// Refresh-ahead read
    ///
    /// A fresh hit is returned as is. A stale hit is returned immediately
    /// with a background refresh when stale-while-revalidate is on; otherwise
    /// the caller waits for `fetch`. Concurrent callers share a single fetch.
    /// A failed fetch is reported only to callers that waited for it.
    pub async fn get_with_refresh<T, F, Fut>(
        &self,
        key: &str,
        fetch: F,
        strategy: CacheStrategy,
    ) -> Result<T>
    where
        T: Serialize + DeserializeOwned + Send + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        let resolved = strategy.resolve(&self.inner.config.read());
        let fetch = move || async move { fetch().await.map(Some) };

        if let Some((value, entry, tier)) = self.inner.read_value::<T>(key).await {
            match entry.freshness(now_millis(), resolved.refresh_threshold) {
                Freshness::Fresh => {
                    self.inner.metrics.record_hit(tier);
                    return Ok(value);
                }
                Freshness::Stale if resolved.stale_while_revalidate => {
                    self.inner.metrics.record_hit(tier);
                    debug!(key, "Serving stale value while revalidating");
                    let _background = self.inner.start_fetch(key, fetch, strategy, true);
                    return Ok(value);
                }
                _ => {}
            }
        }

        self.inner.metrics.record_miss();
        let flight = self.inner.start_fetch(key, fetch, strategy, true);
        match flight.await {
            Ok(Some(payload)) => Ok(serde_json::from_slice(&payload)?),
            Ok(None) => Err(Error::Fetch {
                key: key.to_string(),
                reason: "fetch produced no value".to_string(),
            }),
            Err(reason) => Err(Error::Fetch {
                key: key.to_string(),
                reason,
            }),
        }
    }

    /// Remove a key from every tier and the tag index
    pub async fn remove(&self, key: &str) -> bool {
        self.inner.remove(key).await
    }

    /// Remove every key carrying any of `tags`, returning how many were found
    pub async fn invalidate_by_tags<S: AsRef<str>>(&self, tags: &[S]) -> usize {
        let keys = self.inner.tags.keys_for(tags);
        for key in &keys {
            self.inner.remove(key).await;
        }
        if !keys.is_empty() {
            info!(
                tags = ?tags.iter().map(|t| t.as_ref()).collect::<Vec<_>>(),
                "Invalidated {} keys",
                keys.len()
            );
        }
        keys.len()
    }

    /// Remove everything
    pub async fn clear(&self) {
        self.inner.generation.fetch_add(1, Ordering::AcqRel);
        for slot in &self.inner.slots {
            match slot.writeback {
                Some(ref wb) => wb.clear().await,
                None => {
                    if let Err(e) = slot.tier.clear().await {
                        warn!(tier = %slot.kind, error = %e, "Tier clear failed");
                    }
                }
            }
        }
        self.inner.tags.clear();
        info!("Cache cleared");
    }

    /// Statistics snapshot
    pub fn stats(&self) -> CacheStats {
        self.inner.stats()
    }

    /// Apply a runtime configuration change and re-enforce capacity
    ///
    /// A tier that was not opened at startup cannot be enabled; the request
    /// is logged and the tier stays disabled.
    pub async fn update_config(&self, update: ConfigUpdate) -> Result<()> {
        let mut next = self.inner.config.read().merged(&update)?;
        for kind in TierKind::ALL {
            if next.tier(kind).enabled && self.inner.slot(kind).is_none() {
                let e = Error::unavailable(kind, "tier was not opened at startup");
                warn!(error = %e, "Ignoring request to enable tier");
                next.tier_mut(kind).enabled = false;
            }
        }

        self.inner.codec.set_config(next.compression.clone());
        *self.inner.config.write() = next;
        info!("Cache configuration updated");

        for kind in self.inner.enforce_all() {
            self.inner.enforce(kind, None).await;
        }
        Ok(())
    }

    /// Run a cleanup sweep now
    ///
    /// Returns `None` if a sweep is already running.
    pub async fn cleanup(&self) -> Option<CleanupReport> {
        self.inner.cleanup().await
    }

    /// Whether a live entry exists for `key`, without recording an access
    pub async fn contains(&self, key: &str) -> bool {
        let (version, now) = (self.inner.config.read().version, now_millis());
        for slot in self.inner.enabled_slots() {
            if let Ok(Some(entry)) = slot.tier.peek(key).await {
                return !entry.is_expired_at(now) && entry.metadata.version == version;
            }
        }
        false
    }

    /// Tags currently recorded for `key`
    pub fn tags_of(&self, key: &str) -> BTreeSet<String> {
        self.inner.tags.tags_of(key)
    }

    /// Whether a fetch for `key` is in flight
    pub fn is_refreshing(&self, key: &str) -> bool {
        self.inner.refresh.is_refreshing(key)
    }

    /// Start the periodic cleanup task
    pub fn start_sweeper(&self) -> SweeperHandle {
        sweeper::spawn(Arc::downgrade(&self.inner))
    }

    /// Wait until every queued persistent write has been applied
    pub async fn flush(&self) {
        self.inner.flush().await;
    }

    /// Cache a remote API call: stale-while-revalidate, high priority
    pub async fn cache_api_call<T, F, Fut>(&self, key: &str, api_fn: F, ttl: Duration) -> Result<T>
    where
        T: Serialize + DeserializeOwned + Send + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        self.get_with_refresh(key, api_fn, CacheStrategy::api_call(ttl))
            .await
    }

    /// Cache an expensive computation: compressed, medium priority, blocking refresh
    pub async fn cache_computation<T, F, Fut>(
        &self,
        key: &str,
        compute_fn: F,
        ttl: Duration,
    ) -> Result<T>
    where
        T: Serialize + DeserializeOwned + Send + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        self.get_with_refresh(key, compute_fn, CacheStrategy::computation(ttl))
            .await
    }
}

// =============================================================================
// Tests
// =============================================================================
