//! Refresh Coordinator
//!
//! Single-flight de-duplication of fetches per key, and the `Refreshing`
//! marker that protects a key from eviction while its value is being replaced.
//!
//! Every fetch runs in its own spawned task, so a caller that stops waiting
//! never cancels it. The marker is set before the task starts and cleared by
//! a drop guard when it ends, whether it succeeded, failed or panicked.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use bytes::Bytes;
use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;

/// Outcome of a fetch: the stored JSON payload (`None` if the fetch produced
/// nothing to store), or the failure reason
pub type FlightResult = std::result::Result<Option<Bytes>, String>;

/// Handle to an in-flight fetch that any number of callers can await
pub type Flight = Shared<BoxFuture<'static, FlightResult>>;

type InflightMap = Arc<Mutex<HashMap<String, Flight>>>;

/// Clears the in-flight marker for a key when dropped
struct InflightGuard {
    inflight: InflightMap,
    key: String,
}

impl Drop for InflightGuard {
    fn drop(&mut self) {
        self.inflight.lock().remove(&self.key);
    }
}

/// Per-key single-flight registry
#[derive(Default)]
pub struct RefreshCoordinator {
    inflight: InflightMap,
}

impl RefreshCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a fetch for `key` is currently running
    pub fn is_refreshing(&self, key: &str) -> bool {
        self.inflight.lock().contains_key(key)
    }

    /// Number of fetches currently running
    pub fn in_flight(&self) -> usize {
        self.inflight.lock().len()
    }

    /// Join the running fetch for `key`, or spawn `task` as the new one
    ///
    /// Returns the shared flight and whether this call started it. `task`
    /// must leave the cache updated before it resolves, since the marker is
    /// cleared as soon as it does.
    pub fn join_or_start<F>(&self, key: &str, task: F) -> (Flight, bool)
    where
        F: Future<Output = FlightResult> + Send + 'static,
    {
        let mut inflight = self.inflight.lock();
        if let Some(flight) = inflight.get(key) {
            return (flight.clone(), false);
        }

        let guard = InflightGuard {
            inflight: Arc::clone(&self.inflight),
            key: key.to_string(),
        };
        let handle = tokio::spawn(async move {
            let _guard = guard;
            task.await
        });

        let flight = async move {
            match handle.await {
                Ok(result) => result,
                Err(e) => Err(format!("refresh task did not complete: {}", e)),
            }
        }
        .boxed()
        .shared();

        inflight.insert(key.to_string(), flight.clone());
        (flight, true)
    }
}
