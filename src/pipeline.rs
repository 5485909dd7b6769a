//! Write-back persistence pipeline.
//!
//! One background task owns the receiving end of the dirty queue and the
//! store. While [`PipelineState::Draining`] it folds incoming names into a
//! pending set (duplicates collapse) and, every `interval`, runs a flush
//! cycle: each pending set is marshaled and written under its name, sets
//! deleted since they were marked have their stored key removed, and the
//! pending set is cleared. The timer restarts after every cycle.
//!
//! When the shutdown token fires (or every producer is gone) the pipeline
//! moves to [`PipelineState::Terminating`]: it takes whatever names are
//! already buffered, runs exactly one final flush, syncs the store and
//! returns. A failed store sync is logged and does not discard the final
//! report. There is no way back to `Draining`.
//!
//! Failure policy inside a cycle:
//! - a marshal failure is an invariant violation and ends the task with `Err`;
//! - a failed store write is logged and the name stays pending for the next cycle.

use crate::bucket::Bucket;
use crate::dirty::DirtyReceiver;
use crate::error::{RankError, RankResult};
use crate::registry::Registry;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Lifecycle of the pipeline task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    /// Receiving dirty names and flushing on the timer.
    Draining,
    /// Final flush in progress; no more names are received afterwards.
    Terminating,
}

/// Outcome of one flush cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlushReport {
    /// Snapshots written.
    pub written: usize,
    /// Stored keys removed because their set was deleted.
    pub removed: usize,
    /// Names whose store operation failed; they are retried next cycle.
    pub failed: Vec<String>,
}

impl FlushReport {
    /// Whether the cycle touched nothing.
    pub fn is_empty(&self) -> bool {
        self.written == 0 && self.removed == 0 && self.failed.is_empty()
    }
}

/// Persist every name in `names` once.
///
/// Runs on the calling thread; the pipeline calls it from `spawn_blocking`.
pub fn flush_cycle(
    registry: &Registry,
    bucket: &Bucket,
    names: impl IntoIterator<Item = String>,
) -> RankResult<FlushReport> {
    let mut report = FlushReport::default();
    for name in names {
        let Some(set) = registry.get(&name) else {
            match bucket.delete(&name) {
                Ok(true) => {
                    report.removed += 1;
                    tracing::debug!(name = %name, "removed snapshot of deleted rank set");
                }
                Ok(false) => tracing::debug!(name = %name, "rank set gone before flush"),
                Err(e) => {
                    tracing::warn!(name = %name, error = %e, "cannot remove snapshot, will retry");
                    report.failed.push(name);
                }
            }
            continue;
        };

        let bytes = match set.marshal() {
            Ok(b) => b,
            Err(e) => {
                tracing::error!(name = %name, error = %e, "cannot marshal rank set");
                return Err(e);
            }
        };
        match bucket.put(&name, &bytes) {
            Ok(()) => {
                report.written += 1;
                tracing::debug!(name = %name, bytes = bytes.len(), "persisted rank set");
            }
            Err(e) => {
                tracing::warn!(name = %name, error = %e, "cannot persist rank set, will retry");
                report.failed.push(name);
            }
        }
    }
    Ok(report)
}

type FlushRequest = oneshot::Sender<FlushReport>;

/// Requests an immediate flush cycle from a running pipeline.
#[derive(Debug, Clone)]
pub struct FlushHandle {
    tx: mpsc::Sender<FlushRequest>,
}

impl FlushHandle {
    /// Flush everything marked dirty so far and wait for the cycle's report.
    pub async fn flush_now(&self) -> RankResult<FlushReport> {
        let (tx, rx) = oneshot::channel();
        self.tx.send(tx).await.map_err(|_| stopped())?;
        rx.await.map_err(|_| stopped())
    }
}

fn stopped() -> RankError {
    RankError::InvalidState("persistence pipeline has stopped".into())
}

/// The background flusher. Build with [`Pipeline::new`], drive with [`Pipeline::run`].
#[derive(Debug)]
pub struct Pipeline {
    registry: Arc<Registry>,
    bucket: Arc<Bucket>,
    dirty: DirtyReceiver,
    interval: Duration,
    flush_rx: mpsc::Receiver<FlushRequest>,
}

impl Pipeline {
    /// Create a pipeline flushing `registry` into `bucket` every `interval`.
    pub fn new(
        registry: Arc<Registry>,
        bucket: Bucket,
        dirty: DirtyReceiver,
        interval: Duration,
    ) -> (Self, FlushHandle) {
        let (tx, flush_rx) = mpsc::channel(16);
        let pipeline = Self {
            registry,
            bucket: Arc::new(bucket),
            dirty,
            interval,
            flush_rx,
        };
        (pipeline, FlushHandle { tx })
    }

    /// Run until `shutdown` fires or the dirty queue closes, then flush once more.
    ///
    /// Returns the report of the final flush. An `Err` is fatal for the
    /// process: the in-memory state can no longer be persisted faithfully.
    pub async fn run(mut self, shutdown: CancellationToken) -> RankResult<FlushReport> {
        let mut pending: BTreeSet<String> = BTreeSet::new();
        let mut state = PipelineState::Draining;
        let timer = tokio::time::sleep(self.interval);
        tokio::pin!(timer);

        tracing::info!(
            bucket = self.bucket.name(),
            interval_ms = self.interval.as_millis() as u64,
            "persistence pipeline started"
        );

        while state == PipelineState::Draining {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => {
                    tracing::info!("termination requested");
                    state = PipelineState::Terminating;
                }
                _ = &mut timer => {
                    self.flush(&mut pending).await?;
                    timer.as_mut().reset(Instant::now() + self.interval);
                }
                Some(reply) = self.flush_rx.recv() => {
                    self.dirty.drain_into(&mut pending);
                    let report = self.flush(&mut pending).await?;
                    let _ = reply.send(report);
                }
                name = self.dirty.recv() => match name {
                    Some(name) => {
                        pending.insert(name);
                    }
                    None => {
                        tracing::info!("dirty queue closed");
                        state = PipelineState::Terminating;
                    }
                },
            }
        }

        let buffered = self.dirty.drain_into(&mut pending);
        tracing::debug!(buffered, pending = pending.len(), "final flush");
        let report = self.flush(&mut pending).await?;
        if let Err(e) = self.bucket.close() {
            tracing::warn!(bucket = self.bucket.name(), error = %e, "cannot sync bucket on close");
        }
        tracing::info!(
            written = report.written,
            removed = report.removed,
            failed = report.failed.len(),
            "persistence pipeline stopped"
        );
        Ok(report)
    }

    async fn flush(&self, pending: &mut BTreeSet<String>) -> RankResult<FlushReport> {
        if pending.is_empty() {
            tracing::trace!("nothing to persist");
            return Ok(FlushReport::default());
        }
        let names = std::mem::take(pending);
        let registry = Arc::clone(&self.registry);
        let bucket = Arc::clone(&self.bucket);
        let report = tokio::task::spawn_blocking(move || flush_cycle(&registry, &bucket, names))
            .await
            .map_err(|e| RankError::InvalidState(format!("flush task failed: {e}")))??;

        pending.extend(report.failed.iter().cloned());
        tracing::info!(
            written = report.written,
            removed = report.removed,
            failed = report.failed.len(),
            "persisted rank sets"
        );
        Ok(report)
    }
}
