//! Bounded queue of dirty set names.
//!
//! Producers are the mutating service operations; the single consumer is the
//! persistence pipeline. A full queue makes producers wait: sustained writes
//! that outpace flushing are throttled instead of growing memory, and no dirty
//! name is ever dropped.

use crate::error::{RankError, RankResult};
use tokio::sync::mpsc;

/// Default queue capacity.
pub const DEFAULT_QUEUE_CAPACITY: usize = 65_536;

/// Largest accepted queue capacity.
pub const MAX_QUEUE_CAPACITY: usize = 1 << 24;

/// Create a dirty-name queue holding at most `capacity` names.
///
/// `capacity` is clamped to `1..=MAX_QUEUE_CAPACITY`; out-of-range values are
/// rejected earlier by [`crate::config::ServiceConfig::validate`].
pub fn dirty_queue(capacity: usize) -> (DirtySender, DirtyReceiver) {
    let (tx, rx) = mpsc::channel(capacity.clamp(1, MAX_QUEUE_CAPACITY));
    (DirtySender { tx }, DirtyReceiver { rx })
}

/// Producer side; cheap to clone.
#[derive(Debug, Clone)]
pub struct DirtySender {
    tx: mpsc::Sender<String>,
}

impl DirtySender {
    /// Mark `name` dirty, waiting while the queue is full.
    ///
    /// Fails only once the pipeline has stopped consuming.
    pub async fn mark(&self, name: &str) -> RankResult<()> {
        self.tx
            .send(name.to_owned())
            .await
            .map_err(|_| RankError::InvalidState("persistence pipeline has stopped".into()))
    }

    /// Number of free slots right now.
    pub fn available(&self) -> usize {
        self.tx.capacity()
    }
}

/// Consumer side, owned by the pipeline.
#[derive(Debug)]
pub struct DirtyReceiver {
    rx: mpsc::Receiver<String>,
}

impl DirtyReceiver {
    /// Next dirty name; `None` once every sender is gone and the queue is empty.
    pub async fn recv(&mut self) -> Option<String> {
        self.rx.recv().await
    }

    /// Move every name already buffered into `out` without waiting.
    ///
    /// Returns how many names were taken.
    pub fn drain_into(&mut self, out: &mut impl Extend<String>) -> usize {
        let mut n = 0;
        while let Ok(name) = self.rx.try_recv() {
            out.extend(std::iter::once(name));
            n += 1;
        }
        n
    }
}
