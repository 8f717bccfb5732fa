//! SiteLens Integration Tests
//!
//! End-to-end behavior of the tiered cache through its public API:
//! - Set/get, expiry and overwrite
//! - Tag invalidation and capacity eviction
//! - Refresh coordination (single-flight, stale-while-revalidate)
//! - Persistence across reopen

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::json;

use sitelens::cache::TierConfig;
use sitelens::{Cache, CacheConfig, CacheStrategy, EvictionPolicy, TierKind};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct SeoReport {
    score: u32,
}

// =============================================================================
// Basic Operations
// =============================================================================

mod basic_tests {
    use super::*;

    #[tokio::test]
    async fn test_set_then_get() {
        let cache = Cache::open(CacheConfig::default()).await.unwrap();
        let strategy = CacheStrategy::ttl(Duration::from_millis(600_000));

        cache
            .set_with("seo:example.com", &SeoReport { score: 82 }, &strategy)
            .await
            .unwrap();

        let report: Option<SeoReport> = cache.get("seo:example.com").await;
        assert_eq!(report, Some(SeoReport { score: 82 }));

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.entry_count, 1);
    }

    #[tokio::test]
    async fn test_expired_entry_is_absent() {
        let cache = Cache::open(CacheConfig::default()).await.unwrap();
        let strategy = CacheStrategy::ttl(Duration::from_millis(100));

        cache.set_with("k", &json!({"v": 1}), &strategy).await.unwrap();
        tokio::time::sleep(Duration::from_millis(150)).await;

        let value: Option<serde_json::Value> = cache.get("k").await;
        assert!(value.is_none());
        assert_eq!(cache.stats().misses, 1);
    }

    #[tokio::test]
    async fn test_overwrite_replaces_value() {
        let cache = Cache::open(CacheConfig::default()).await.unwrap();

        cache.set("k", &SeoReport { score: 1 }).await.unwrap();
        cache.set("k", &SeoReport { score: 2 }).await.unwrap();

        let report: Option<SeoReport> = cache.get("k").await;
        assert_eq!(report, Some(SeoReport { score: 2 }));
        assert_eq!(cache.stats().entry_count, 1);
    }

    #[tokio::test]
    async fn test_remove_then_get_misses() {
        let cache = Cache::open(CacheConfig::default()).await.unwrap();
        cache.set("k", "v").await.unwrap();

        assert!(cache.remove("k").await);
        assert!(!cache.remove("k").await);
        assert!(cache.get::<String>("k").await.is_none());
    }
}

// =============================================================================
// Tags and Eviction
// =============================================================================

mod invalidation_tests {
    use super::*;

    #[tokio::test]
    async fn test_invalidate_by_tag() {
        let cache = Cache::open(CacheConfig::default()).await.unwrap();

        let api = CacheStrategy::default().with_tags(["api"]);
        let other = CacheStrategy::default().with_tags(["ml"]);
        cache.set_with("a", &1, &api).await.unwrap();
        cache.set_with("b", &2, &api).await.unwrap();
        cache.set_with("c", &3, &other).await.unwrap();

        assert_eq!(cache.invalidate_by_tags(&["api"]).await, 2);

        assert!(cache.get::<u32>("a").await.is_none());
        assert!(cache.get::<u32>("b").await.is_none());
        assert_eq!(cache.get::<u32>("c").await, Some(3));
        assert!(cache.tags_of("a").is_empty());
    }

    #[tokio::test]
    async fn test_invalidate_unknown_tag_is_noop() {
        let cache = Cache::open(CacheConfig::default()).await.unwrap();
        cache
            .set_with("a", &1, &CacheStrategy::default().with_tags(["api"]))
            .await
            .unwrap();

        assert_eq!(cache.invalidate_by_tags(&["nope"]).await, 0);
        assert_eq!(cache.get::<u32>("a").await, Some(1));
    }

    #[tokio::test]
    async fn test_lru_capacity_eviction() {
        let mut config = CacheConfig::default();
        config.eviction_policy = EvictionPolicy::Lru;
        config.memory = TierConfig::memory(1024 * 1024).with_max_entries(3);
        let cache = Cache::open(config).await.unwrap();

        for key in ["a", "b", "c"] {
            cache.set(key, key).await.unwrap();
        }
        for key in ["a", "b", "c"] {
            assert!(cache.get::<String>(key).await.is_some());
        }

        cache.set("d", "d").await.unwrap();

        assert!(!cache.contains("a").await);
        assert!(cache.contains("b").await);
        assert!(cache.contains("c").await);
        assert!(cache.contains("d").await);
        assert_eq!(cache.stats().evictions, 1);
    }

    #[tokio::test]
    async fn test_clear_empties_every_tier() {
        let dir = tempfile::tempdir().unwrap();
        let cache = Cache::open(CacheConfig::default().with_data_dir(dir.path()))
            .await
            .unwrap();

        cache
            .set_with("a", &1, &CacheStrategy::default().with_tags(["t"]))
            .await
            .unwrap();
        cache.flush().await;
        cache.clear().await;

        let stats = cache.stats();
        assert_eq!(stats.entry_count, 0);
        for kind in [TierKind::Fast, TierKind::Durable] {
            assert_eq!(stats.tier(kind).unwrap().entries, 0);
        }
        assert!(cache.tags_of("a").is_empty());
    }
}

// =============================================================================
// Refresh Coordination
// =============================================================================

mod refresh_tests {
    use super::*;

    #[tokio::test]
    async fn test_concurrent_misses_fetch_once() {
        let cache = Cache::open(CacheConfig::default()).await.unwrap();
        let calls = Arc::new(AtomicUsize::new(0));
        let strategy = CacheStrategy::ttl(Duration::from_secs(60)).with_stale_while_revalidate(false);

        let fetch = |calls: Arc<AtomicUsize>| {
            move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(50)).await;
                Ok(SeoReport { score: 82 })
            }
        };

        let (first, second) = tokio::join!(
            cache.get_with_refresh("k", fetch(Arc::clone(&calls)), strategy.clone()),
            cache.get_with_refresh("k", fetch(Arc::clone(&calls)), strategy.clone()),
        );

        assert_eq!(first.unwrap(), SeoReport { score: 82 });
        assert_eq!(second.unwrap(), SeoReport { score: 82 });
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(!cache.is_refreshing("k"));
    }

    #[tokio::test]
    async fn test_stale_value_served_while_revalidating() {
        let cache = Cache::open(CacheConfig::default()).await.unwrap();
        let strategy = CacheStrategy::ttl(Duration::from_millis(1_000))
            .with_refresh_threshold(0.9)
            .with_stale_while_revalidate(true);

        let first: u32 = cache
            .get_with_refresh("k", || async { Ok(1) }, strategy.clone())
            .await
            .unwrap();
        assert_eq!(first, 1);

        // Past 10% of the lifetime the entry is stale but not expired
        tokio::time::sleep(Duration::from_millis(200)).await;

        let stale: u32 = cache
            .get_with_refresh(
                "k",
                || async {
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    Ok(2)
                },
                strategy.clone(),
            )
            .await
            .unwrap();
        assert_eq!(stale, 1);

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(cache.get::<u32>("k").await, Some(2));
        assert_eq!(cache.stats().refreshes_started, 2);
    }

    #[tokio::test]
    async fn test_concurrent_stale_reads_share_failed_refresh() {
        let cache = Cache::open(CacheConfig::default()).await.unwrap();
        let strategy = CacheStrategy::ttl(Duration::from_millis(1_000))
            .with_refresh_threshold(0.9)
            .with_stale_while_revalidate(true);

        let first: u32 = cache
            .get_with_refresh("k", || async { Ok(1) }, strategy.clone())
            .await
            .unwrap();
        assert_eq!(first, 1);
        tokio::time::sleep(Duration::from_millis(200)).await;

        let calls = Arc::new(AtomicUsize::new(0));
        let readers = (0..8).map(|_| {
            let calls = Arc::clone(&calls);
            cache.get_with_refresh(
                "k",
                move || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    Err::<u32, _>(anyhow::anyhow!("upstream down"))
                },
                strategy.clone(),
            )
        });
        let values: Vec<u32> = futures::future::join_all(readers)
            .await
            .into_iter()
            .map(|r| r.unwrap())
            .collect();

        assert_eq!(values, vec![1; 8]);

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(!cache.is_refreshing("k"));
        assert_eq!(cache.get::<u32>("k").await, Some(1));

        let stats = cache.stats();
        assert_eq!(stats.refreshes_failed, 1);
        assert_eq!(stats.fetch_errors, 1);
    }

    #[tokio::test]
    async fn test_fetch_failure_surfaces_error() {
        let cache = Cache::open(CacheConfig::default()).await.unwrap();

        let result: sitelens::Result<u32> = cache
            .get_with_refresh(
                "k",
                || async { Err(anyhow::anyhow!("upstream down")) },
                CacheStrategy::default(),
            )
            .await;

        assert!(result.is_err());
        assert_eq!(cache.stats().fetch_errors, 1);
        assert!(!cache.contains("k").await);
    }

    #[tokio::test]
    async fn test_get_or_fetch_fallback() {
        let cache = Cache::open(CacheConfig::default()).await.unwrap();

        let value: Option<u32> = cache
            .get_or_fetch("k", || async { Ok(Some(7)) })
            .await
            .unwrap();
        assert_eq!(value, Some(7));
        assert_eq!(cache.get::<u32>("k").await, Some(7));

        let missing: Option<u32> = cache
            .get_or_fetch("absent", || async { Ok(None) })
            .await
            .unwrap();
        assert!(missing.is_none());
        assert!(!cache.contains("absent").await);
    }

    #[tokio::test]
    async fn test_convenience_wrappers() {
        let cache = Cache::open(CacheConfig::default()).await.unwrap();
        let calls = Arc::new(AtomicUsize::new(0));

        for _ in 0..3 {
            let calls = Arc::clone(&calls);
            let report: SeoReport = cache
                .cache_api_call(
                    "seo:example.com",
                    move || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        Ok(SeoReport { score: 82 })
                    },
                    Duration::from_secs(600),
                )
                .await
                .unwrap();
            assert_eq!(report.score, 82);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let words: Vec<String> = cache
            .cache_computation(
                "keywords:example.com",
                || async { Ok(vec!["rust".to_string(); 400]) },
                Duration::from_secs(600),
            )
            .await
            .unwrap();
        assert_eq!(words.len(), 400);
        assert!(cache.stats().compressed_writes >= 1);
    }
}

// =============================================================================
// Persistence
// =============================================================================

mod persistence_tests {
    use super::*;

    #[tokio::test]
    async fn test_entries_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let config = CacheConfig::default().with_data_dir(dir.path());

        {
            let cache = Cache::open(config.clone()).await.unwrap();
            cache
                .set_with(
                    "seo:example.com",
                    &SeoReport { score: 82 },
                    &CacheStrategy::ttl(Duration::from_secs(600)).with_tags(["seo"]),
                )
                .await
                .unwrap();
            cache.flush().await;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;

        let cache = Cache::open(config).await.unwrap();
        let report: Option<SeoReport> = cache.get("seo:example.com").await;
        assert_eq!(report, Some(SeoReport { score: 82 }));

        // Promoted back into memory and the tag index rebuilt from disk
        assert!(cache.stats().promotions >= 1);
        assert!(cache.tags_of("seo:example.com").contains("seo"));
    }

    #[tokio::test]
    async fn test_missing_data_dir_parent_falls_back() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("file");
        std::fs::write(&blocker, b"not a directory").unwrap();

        let cache = Cache::open(CacheConfig::default().with_data_dir(&blocker))
            .await
            .unwrap();
        cache.set("k", "v").await.unwrap();
        assert_eq!(cache.get::<String>("k").await.as_deref(), Some("v"));
    }
}

// =============================================================================
// Properties
// =============================================================================

mod property_tests {
    use super::*;
    use proptest::prelude::*;

    const TAGS: [&str; 3] = ["api", "ml", "seo"];

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn prop_invalidation_removes_exactly_tagged_keys(
            assignments in proptest::collection::vec(proptest::collection::vec(0usize..3, 0..3), 1..12),
            target in 0usize..3,
        ) {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .unwrap();

            runtime.block_on(async {
                let cache = Cache::open(CacheConfig::default()).await.unwrap();
                for (i, tags) in assignments.iter().enumerate() {
                    let strategy = CacheStrategy::default()
                        .with_tags(tags.iter().map(|t| TAGS[*t]));
                    cache.set_with(&format!("k{}", i), &i, &strategy).await.unwrap();
                }

                let expected = assignments.iter().filter(|tags| tags.contains(&target)).count();
                let removed = cache.invalidate_by_tags(&[TAGS[target]]).await;
                assert_eq!(removed, expected);

                for (i, tags) in assignments.iter().enumerate() {
                    let present = cache.contains(&format!("k{}", i)).await;
                    assert_eq!(present, !tags.contains(&target));
                }
            });
        }
    }
}
