//! Cleanup Sweeper
//!
//! Background task that runs [`Cache::cleanup`](super::Cache::cleanup) on a
//! timer. The interval is re-read from the configuration before every sleep,
//! so `update_config` takes effect on the next tick. The task holds only a
//! weak reference and exits on its own once the cache is dropped.

use std::sync::Weak;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::manager::Inner;

/// Handle to a running sweeper
#[derive(Debug)]
pub struct SweeperHandle {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

impl SweeperHandle {
    /// Ask the sweeper to stop after its current sweep
    pub fn stop(&self) {
        self.token.cancel();
    }

    /// Stop the sweeper and wait for it to exit
    pub async fn shutdown(self) {
        self.token.cancel();
        let _ = self.handle.await;
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

pub(crate) fn spawn(inner: Weak<Inner>) -> SweeperHandle {
    let token = CancellationToken::new();
    let handle = tokio::spawn(run(inner, token.clone()));
    SweeperHandle { token, handle }
}

async fn run(inner: Weak<Inner>, token: CancellationToken) {
    info!("Cleanup sweeper started");

    loop {
        let interval = match inner.upgrade() {
            Some(inner) => inner.cleanup_interval(),
            None => break,
        };

        tokio::select! {
            _ = token.cancelled() => break,
            _ = tokio::time::sleep(interval) => {}
        }

        let Some(inner) = inner.upgrade() else {
            break;
        };
        if let Some(report) = inner.cleanup().await {
            debug!(
                expired = report.expired,
                untagged = report.untagged,
                "Sweep finished"
            );
        }
    }

    info!("Cleanup sweeper stopped");
}

#[cfg(test)]
mod tests {
    use crate::cache::{Cache, CacheConfig, CacheStrategy};
    use std::time::Duration;

    #[tokio::test]
    async fn test_sweeper_expires_entries() {
        let mut config = CacheConfig::default();
        config.cleanup_interval_ms = 20;
        let cache = Cache::open(config).await.unwrap();

        let strategy = CacheStrategy::ttl(Duration::from_millis(10));
        cache.set_with("k", "v", &strategy).await.unwrap();

        let sweeper = cache.start_sweeper();
        tokio::time::sleep(Duration::from_millis(120)).await;

        let stats = cache.stats();
        assert_eq!(stats.entry_count, 0);
        assert_eq!(stats.expirations, 1);
        assert!(stats.last_cleanup_at.is_some());

        sweeper.shutdown().await;
    }

    #[tokio::test]
    async fn test_sweeper_exits_when_cache_dropped() {
        let mut config = CacheConfig::default();
        config.cleanup_interval_ms = 10;
        let cache = Cache::open(config).await.unwrap();

        let sweeper = cache.start_sweeper();
        drop(cache);
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(sweeper.is_finished());
    }

    #[tokio::test]
    async fn test_stop() {
        let cache = Cache::open(CacheConfig::default()).await.unwrap();
        let sweeper = cache.start_sweeper();
        sweeper.stop();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(sweeper.is_finished());
    }
}
