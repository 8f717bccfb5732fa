//! Per-call caching strategy
//!
//! Every field is optional. Unset fields fall back to the cache's
//! configured defaults when the strategy is resolved.

use std::collections::BTreeSet;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::config::CacheConfig;
use super::entry::Priority;

/// How a value should be cached
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheStrategy {
    pub ttl_ms: Option<u64>,
    /// Remaining-TTL fraction below which an entry is stale (0.0..=1.0)
    pub refresh_threshold: Option<f64>,
    pub stale_while_revalidate: Option<bool>,
    /// `None` keeps a refreshed entry's existing tags
    pub tags: Option<Vec<String>>,
    pub priority: Option<Priority>,
    /// Override the configured compression default
    pub compression: Option<bool>,
}

impl CacheStrategy {
    /// Strategy with an explicit TTL
    pub fn ttl(ttl: Duration) -> Self {
        Self {
            ttl_ms: Some(ttl.as_millis() as u64),
            ..Default::default()
        }
    }

    /// Tuned for remote API calls: stale-while-revalidate, high priority
    pub fn api_call(ttl: Duration) -> Self {
        Self::ttl(ttl)
            .with_stale_while_revalidate(true)
            .with_priority(Priority::High)
    }

    /// Tuned for expensive computations: compressed, medium priority, blocking refresh
    pub fn computation(ttl: Duration) -> Self {
        Self::ttl(ttl)
            .with_stale_while_revalidate(false)
            .with_priority(Priority::Medium)
            .with_compression(true)
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = Some(tags.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn with_refresh_threshold(mut self, threshold: f64) -> Self {
        self.refresh_threshold = Some(threshold);
        self
    }

    pub fn with_stale_while_revalidate(mut self, enabled: bool) -> Self {
        self.stale_while_revalidate = Some(enabled);
        self
    }

    pub fn with_compression(mut self, enabled: bool) -> Self {
        self.compression = Some(enabled);
        self
    }

    /// Fill unset fields from `config`
    pub fn resolve(&self, config: &CacheConfig) -> ResolvedStrategy {
        ResolvedStrategy {
            ttl_ms: self.ttl_ms.unwrap_or(config.default_ttl_ms),
            refresh_threshold: self
                .refresh_threshold
                .unwrap_or(config.refresh_threshold)
                .clamp(0.0, 1.0),
            stale_while_revalidate: self
                .stale_while_revalidate
                .unwrap_or(config.stale_while_revalidate),
            tags: self.tags.as_ref().map(|tags| tags.iter().cloned().collect()),
            priority: self.priority.unwrap_or_default(),
            compression: self.compression,
        }
    }
}

/// A strategy with every default applied
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedStrategy {
    pub ttl_ms: u64,
    pub refresh_threshold: f64,
    pub stale_while_revalidate: bool,
    pub tags: Option<BTreeSet<String>>,
    pub priority: Priority,
    pub compression: Option<bool>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_uses_config_defaults() {
        let config = CacheConfig::default();
        let resolved = CacheStrategy::default().resolve(&config);

        assert_eq!(resolved.ttl_ms, config.default_ttl_ms);
        assert_eq!(resolved.refresh_threshold, 0.2);
        assert!(resolved.stale_while_revalidate);
        assert!(resolved.tags.is_none());
        assert_eq!(resolved.priority, Priority::Medium);
        assert!(resolved.compression.is_none());
    }

    #[test]
    fn test_explicit_fields_win() {
        let config = CacheConfig::default();
        let resolved = CacheStrategy::ttl(Duration::from_millis(100))
            .with_tags(["api", "seo"])
            .with_refresh_threshold(1.5)
            .with_stale_while_revalidate(false)
            .resolve(&config);

        assert_eq!(resolved.ttl_ms, 100);
        assert_eq!(resolved.refresh_threshold, 1.0);
        assert!(!resolved.stale_while_revalidate);
        assert_eq!(resolved.tags.unwrap().len(), 2);
    }

    #[test]
    fn test_presets() {
        let api = CacheStrategy::api_call(Duration::from_secs(60));
        assert_eq!(api.ttl_ms, Some(60_000));
        assert_eq!(api.stale_while_revalidate, Some(true));
        assert_eq!(api.priority, Some(Priority::High));

        let compute = CacheStrategy::computation(Duration::from_secs(60));
        assert_eq!(compute.stale_while_revalidate, Some(false));
        assert_eq!(compute.compression, Some(true));
        assert_eq!(compute.priority, Some(Priority::Medium));
    }

    #[test]
    fn test_strategy_deserialize() {
        let strategy: CacheStrategy =
            serde_json::from_str(r#"{"ttl_ms": 600000, "tags": ["api"], "priority": "critical"}"#).unwrap();
        assert_eq!(strategy.ttl_ms, Some(600_000));
        assert_eq!(strategy.priority, Some(Priority::Critical));
        assert!(strategy.compression.is_none());
    }
}
