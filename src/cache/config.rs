//! Cache Configuration
//!
//! Static configuration loaded from YAML or JSON, and the partial update
//! applied at runtime through `Cache::update_config`.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::compression::CompressionConfig;
use super::eviction::EvictionPolicy;
use super::tier::{TierKind, TierLimits};
use super::{
    DEFAULT_CLEANUP_INTERVAL_MS, DEFAULT_DURABLE_CAPACITY, DEFAULT_FAST_CAPACITY,
    DEFAULT_MEMORY_CAPACITY, DEFAULT_REFRESH_THRESHOLD, DEFAULT_TTL_MS,
};
use crate::error::{Error, Result};

// =============================================================================
// Tier Configuration
// =============================================================================

/// Configuration of one storage tier
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TierConfig {
    pub enabled: bool,
    /// Maximum total payload bytes
    pub max_size_bytes: u64,
    /// Optional maximum entry count
    pub max_entries: Option<u64>,
    /// Storage directory (persistent tiers only)
    pub path: Option<PathBuf>,
}

impl Default for TierConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            max_size_bytes: DEFAULT_MEMORY_CAPACITY,
            max_entries: None,
            path: None,
        }
    }
}

impl TierConfig {
    /// Enabled memory tier
    pub fn memory(max_size_bytes: u64) -> Self {
        Self {
            enabled: true,
            max_size_bytes,
            ..Default::default()
        }
    }

    /// Enabled persistent tier stored under `path`
    pub fn persistent(path: impl Into<PathBuf>, max_size_bytes: u64) -> Self {
        Self {
            enabled: true,
            max_size_bytes,
            max_entries: None,
            path: Some(path.into()),
        }
    }

    pub fn with_max_entries(mut self, max_entries: u64) -> Self {
        self.max_entries = Some(max_entries);
        self
    }

    pub fn limits(&self) -> TierLimits {
        TierLimits {
            max_size_bytes: self.max_size_bytes,
            max_entries: self.max_entries,
        }
    }
}

// =============================================================================
// Cache Configuration
// =============================================================================

/// Cache configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub memory: TierConfig,
    pub fast: TierConfig,
    pub durable: TierConfig,
    pub default_ttl_ms: u64,
    /// Remaining-TTL fraction below which an entry is stale
    pub refresh_threshold: f64,
    pub stale_while_revalidate: bool,
    pub eviction_policy: EvictionPolicy,
    pub compression: CompressionConfig,
    pub cleanup_interval_ms: u64,
    /// Entries written under another version are treated as misses
    pub version: u32,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            memory: TierConfig::memory(DEFAULT_MEMORY_CAPACITY),
            fast: TierConfig {
                max_size_bytes: DEFAULT_FAST_CAPACITY,
                ..Default::default()
            },
            durable: TierConfig {
                max_size_bytes: DEFAULT_DURABLE_CAPACITY,
                ..Default::default()
            },
            default_ttl_ms: DEFAULT_TTL_MS,
            refresh_threshold: DEFAULT_REFRESH_THRESHOLD,
            stale_while_revalidate: true,
            eviction_policy: EvictionPolicy::default(),
            compression: CompressionConfig::default(),
            cleanup_interval_ms: DEFAULT_CLEANUP_INTERVAL_MS,
            version: 1,
        }
    }
}

impl CacheConfig {
    /// Memory-only configuration
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Enable both persistent tiers under `data_dir`
    pub fn with_data_dir(mut self, data_dir: impl AsRef<Path>) -> Self {
        let data_dir = data_dir.as_ref();
        self.fast.enabled = true;
        self.fast.path = Some(data_dir.join("fast"));
        self.durable.enabled = true;
        self.durable.path = Some(data_dir.join("durable"));
        self
    }

    pub fn tier(&self, kind: TierKind) -> &TierConfig {
        match kind {
            TierKind::Memory => &self.memory,
            TierKind::Fast => &self.fast,
            TierKind::Durable => &self.durable,
        }
    }

    pub fn tier_mut(&mut self, kind: TierKind) -> &mut TierConfig {
        match kind {
            TierKind::Memory => &mut self.memory,
            TierKind::Fast => &mut self.fast,
            TierKind::Durable => &mut self.durable,
        }
    }

    /// Load from a `.yaml`/`.yml` or `.json` file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("cannot read {}: {}", path.display(), e)))?;

        let config: Self = match path.extension().and_then(|ext| ext.to_str()) {
            Some("yaml") | Some("yml") => serde_yaml::from_str(&raw)
                .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?,
            Some("json") => serde_json::from_str(&raw)
                .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?,
            _ => {
                return Err(Error::Config(format!(
                    "unsupported config format: {}",
                    path.display()
                )))
            }
        };

        config.validate()?;
        Ok(config)
    }

    /// Check invariants
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.refresh_threshold) {
            return Err(Error::Config(format!(
                "refresh_threshold must be within 0..=1, got {}",
                self.refresh_threshold
            )));
        }
        if self.default_ttl_ms == 0 {
            return Err(Error::Config("default_ttl_ms must be positive".into()));
        }
        if self.cleanup_interval_ms == 0 {
            return Err(Error::Config("cleanup_interval_ms must be positive".into()));
        }

        for kind in TierKind::ALL {
            let tier = self.tier(kind);
            if !tier.enabled {
                continue;
            }
            if tier.max_size_bytes == 0 {
                return Err(Error::Config(format!("{} tier has zero capacity", kind.name())));
            }
            if kind.is_persistent() && tier.path.is_none() {
                return Err(Error::Config(format!("{} tier is enabled without a path", kind.name())));
            }
        }
        Ok(())
    }

    /// Apply a partial update, returning the validated result
    pub fn merged(&self, update: &ConfigUpdate) -> Result<Self> {
        let mut next = self.clone();

        if let Some(ref tier) = update.memory {
            tier.apply(&mut next.memory);
        }
        if let Some(ref tier) = update.fast {
            tier.apply(&mut next.fast);
        }
        if let Some(ref tier) = update.durable {
            tier.apply(&mut next.durable);
        }
        if let Some(ttl) = update.default_ttl_ms {
            next.default_ttl_ms = ttl;
        }
        if let Some(threshold) = update.refresh_threshold {
            next.refresh_threshold = threshold;
        }
        if let Some(swr) = update.stale_while_revalidate {
            next.stale_while_revalidate = swr;
        }
        if let Some(policy) = update.eviction_policy {
            next.eviction_policy = policy;
        }
        if let Some(ref compression) = update.compression {
            next.compression = compression.clone();
        }
        if let Some(interval) = update.cleanup_interval_ms {
            next.cleanup_interval_ms = interval;
        }

        next.validate()?;
        Ok(next)
    }
}

// =============================================================================
// Runtime Updates
// =============================================================================

/// Partial update of one tier (its path cannot change at runtime)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TierUpdate {
    pub enabled: Option<bool>,
    pub max_size_bytes: Option<u64>,
    pub max_entries: Option<u64>,
}

impl TierUpdate {
    fn apply(&self, tier: &mut TierConfig) {
        if let Some(enabled) = self.enabled {
            tier.enabled = enabled;
        }
        if let Some(max) = self.max_size_bytes {
            tier.max_size_bytes = max;
        }
        if let Some(max) = self.max_entries {
            tier.max_entries = Some(max);
        }
    }
}

/// Partial configuration update; unset fields are left alone
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfigUpdate {
    pub memory: Option<TierUpdate>,
    pub fast: Option<TierUpdate>,
    pub durable: Option<TierUpdate>,
    pub default_ttl_ms: Option<u64>,
    pub refresh_threshold: Option<f64>,
    pub stale_while_revalidate: Option<bool>,
    pub eviction_policy: Option<EvictionPolicy>,
    pub compression: Option<CompressionConfig>,
    pub cleanup_interval_ms: Option<u64>,
}

impl ConfigUpdate {
    pub fn tier(&self, kind: TierKind) -> Option<&TierUpdate> {
        match kind {
            TierKind::Memory => self.memory.as_ref(),
            TierKind::Fast => self.fast.as_ref(),
            TierKind::Durable => self.durable.as_ref(),
        }
    }
}
