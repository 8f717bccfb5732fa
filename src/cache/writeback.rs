//! Write-Back Queue
//!
//! Persistent tiers are written off the caller's path. Each tier gets one
//! worker task draining an unbounded FIFO of operations, so writes for a key
//! are applied in the order they were issued.
//!
//! ```text
//!   set() ──▶ Set ──┐
//!   remove() ▶ Delete ─┼──▶ [ mpsc FIFO ] ──▶ worker ──▶ Tier
//!   sweep ──▶ Enforce ┘                         │
//!                                               └──▶ CacheMetrics (outcome per op)
//! ```
//!
//! The worker exits once every sender is gone and the queue is drained.

use std::sync::Arc;

use futures::future::BoxFuture;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use super::entry::CacheEntry;
use super::metrics::{CacheMetrics, TierWriteOutcome};
use super::tier::{Tier, TierKind};

/// Capacity check run by the worker after a write lands
pub(crate) type EnforceFn = Arc<dyn Fn(TierKind) -> BoxFuture<'static, ()> + Send + Sync>;

enum WriteOp {
    Set {
        entry: CacheEntry,
        ack: Option<oneshot::Sender<TierWriteOutcome>>,
    },
    Delete {
        key: String,
        ack: Option<oneshot::Sender<bool>>,
    },
    Clear {
        ack: oneshot::Sender<()>,
    },
    Enforce,
    Flush {
        ack: oneshot::Sender<()>,
    },
}

/// Handle to a persistent tier's write-back worker
pub struct WriteBack {
    kind: TierKind,
    tx: mpsc::UnboundedSender<WriteOp>,
}

impl WriteBack {
    /// Spawn the worker for `tier`
    pub(crate) fn spawn(
        tier: Arc<dyn Tier>,
        metrics: Arc<CacheMetrics>,
        enforce: Option<EnforceFn>,
    ) -> Self {
        let kind = tier.kind();
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(run(tier, rx, metrics, enforce));
        Self { kind, tx }
    }

    pub fn kind(&self) -> TierKind {
        self.kind
    }

    fn send(&self, op: WriteOp) -> bool {
        if self.tx.send(op).is_err() {
            warn!(tier = %self.kind, "Write-back worker is gone, dropping operation");
            return false;
        }
        true
    }

    /// Queue a write and return immediately
    pub fn set(&self, entry: CacheEntry) -> bool {
        self.send(WriteOp::Set { entry, ack: None })
    }

    /// Queue a write and wait until the worker has applied it
    pub async fn write(&self, entry: CacheEntry) -> TierWriteOutcome {
        let (ack, done) = oneshot::channel();
        if !self.send(WriteOp::Set {
            entry,
            ack: Some(ack),
        }) {
            return TierWriteOutcome::Failed;
        }
        done.await.unwrap_or(TierWriteOutcome::Failed)
    }

    /// Queue a delete without waiting for it
    pub fn delete_later(&self, key: &str) {
        self.send(WriteOp::Delete {
            key: key.to_string(),
            ack: None,
        });
    }

    /// Queue a delete and wait until every earlier operation and the delete
    /// itself have been applied
    pub async fn delete(&self, key: &str) -> bool {
        let (ack, done) = oneshot::channel();
        if !self.send(WriteOp::Delete {
            key: key.to_string(),
            ack: Some(ack),
        }) {
            return false;
        }
        done.await.unwrap_or(false)
    }

    /// Clear the tier after every earlier operation has been applied
    pub async fn clear(&self) {
        let (ack, done) = oneshot::channel();
        if self.send(WriteOp::Clear { ack }) {
            let _ = done.await;
        }
    }

    /// Queue a capacity check
    pub fn enforce(&self) {
        self.send(WriteOp::Enforce);
    }

    /// Wait until every queued operation has been applied
    pub async fn flush(&self) {
        let (ack, done) = oneshot::channel();
        if self.send(WriteOp::Flush { ack }) {
            let _ = done.await;
        }
    }
}

async fn run(
    tier: Arc<dyn Tier>,
    mut rx: mpsc::UnboundedReceiver<WriteOp>,
    metrics: Arc<CacheMetrics>,
    enforce: Option<EnforceFn>,
) {
    let kind = tier.kind();
    debug!(tier = %kind, "Write-back worker started");

    while let Some(op) = rx.recv().await {
        match op {
            WriteOp::Set { entry, ack } => {
                let key = entry.key().to_string();
                let outcome = match tier.set(entry).await {
                    Ok(true) => TierWriteOutcome::Written,
                    Ok(false) => TierWriteOutcome::Superseded,
                    Err(e) => {
                        warn!(tier = %kind, key = %key, error = %e, "Tier write failed");
                        TierWriteOutcome::Failed
                    }
                };
                metrics.record_write(kind, outcome);

                if outcome == TierWriteOutcome::Written {
                    if let Some(ref enforce) = enforce {
                        enforce(kind).await;
                    }
                }
                if let Some(ack) = ack {
                    let _ = ack.send(outcome);
                }
            }
            WriteOp::Delete { key, ack } => {
                let removed = match tier.delete(&key).await {
                    Ok(removed) => removed,
                    Err(e) => {
                        warn!(tier = %kind, key = %key, error = %e, "Tier delete failed");
                        metrics.record_write(kind, TierWriteOutcome::Failed);
                        false
                    }
                };
                if let Some(ack) = ack {
                    let _ = ack.send(removed);
                }
            }
            WriteOp::Clear { ack } => {
                if let Err(e) = tier.clear().await {
                    warn!(tier = %kind, error = %e, "Tier clear failed");
                    metrics.record_write(kind, TierWriteOutcome::Failed);
                }
                let _ = ack.send(());
            }
            WriteOp::Enforce => {
                if let Some(ref enforce) = enforce {
                    enforce(kind).await;
                }
            }
            WriteOp::Flush { ack } => {
                let _ = ack.send(());
            }
        }
    }

    debug!(tier = %kind, "Write-back worker stopped");
}

// =============================================================================
// Tests
// =============================================================================
