//! Service configuration.

use crate::dirty::{DEFAULT_QUEUE_CAPACITY, MAX_QUEUE_CAPACITY};
use crate::error::{RankError, RankResult};
use crate::formats::DEFAULT_BUCKET;
use std::path::PathBuf;
use std::time::Duration;

/// Default interval between flush cycles.
pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_secs(10);

/// Settings for the store, the dirty queue and the persistence pipeline.
///
/// The flush interval and queue capacity together bound how long a slow flush
/// can stall writers: producers wait once `queue_capacity` names are buffered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceConfig {
    /// Root directory of the durable store.
    pub data_dir: PathBuf,
    /// Bucket (namespace directory) holding the snapshots.
    pub bucket: String,
    /// Time between flush cycles.
    pub flush_interval: Duration,
    /// Capacity of the dirty-name queue.
    pub queue_capacity: usize,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            bucket: DEFAULT_BUCKET.to_string(),
            flush_interval: DEFAULT_FLUSH_INTERVAL,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }
}

impl ServiceConfig {
    /// Config rooted at `data_dir` with every other setting at its default.
    pub fn with_data_dir(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            ..Self::default()
        }
    }

    /// Reject settings the service cannot run with.
    pub fn validate(&self) -> RankResult<()> {
        if self.queue_capacity == 0 || self.queue_capacity > MAX_QUEUE_CAPACITY {
            return Err(RankError::InvalidConfig(format!(
                "queue_capacity must be in 1..={MAX_QUEUE_CAPACITY}, got {}",
                self.queue_capacity
            )));
        }
        if self.flush_interval.is_zero() {
            return Err(RankError::InvalidConfig(
                "flush_interval must be non-zero".into(),
            ));
        }
        if self.bucket.is_empty() || self.bucket.contains(['/', '\\']) {
            return Err(RankError::InvalidConfig(format!(
                "bucket must be a single path component: {:?}",
                self.bucket
            )));
        }
        if self.data_dir.as_os_str().is_empty() {
            return Err(RankError::InvalidConfig("data_dir is empty".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let cfg = ServiceConfig::default();
        cfg.validate().unwrap();
        assert_eq!(cfg.queue_capacity, 65_536);
        assert_eq!(cfg.flush_interval, Duration::from_secs(10));
        assert_eq!(cfg.bucket, "RANKING");
    }

    #[test]
    fn rejects_degenerate_settings() {
        let bad = [
            ServiceConfig {
                queue_capacity: 0,
                ..ServiceConfig::default()
            },
            ServiceConfig {
                queue_capacity: MAX_QUEUE_CAPACITY + 1,
                ..ServiceConfig::default()
            },
            ServiceConfig {
                queue_capacity: usize::MAX,
                ..ServiceConfig::default()
            },
            ServiceConfig {
                flush_interval: Duration::ZERO,
                ..ServiceConfig::default()
            },
            ServiceConfig {
                bucket: "a/b".into(),
                ..ServiceConfig::default()
            },
            ServiceConfig::with_data_dir(""),
        ];
        ServiceConfig {
            queue_capacity: MAX_QUEUE_CAPACITY,
            ..ServiceConfig::default()
        }
        .validate()
        .unwrap();
        for cfg in bad {
            assert!(matches!(cfg.validate(), Err(RankError::InvalidConfig(_))));
        }
    }
}
