//! Startup restore: rebuild every ranking set from the store.
//!
//! Restore is strict: a snapshot that fails to decode aborts the whole
//! restore.

use crate::bucket::Bucket;
use crate::error::RankResult;
use crate::rankset::RankSet;
use crate::registry::Registry;
use std::sync::Arc;

/// Summary of a completed restore.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RestoreReport {
    /// Number of named sets loaded.
    pub sets: usize,
    /// Total entries across all loaded sets.
    pub entries: usize,
}

/// Scan `bucket` in key order and install one rebuilt set per key into `registry`.
pub fn restore(bucket: &Bucket, registry: &Registry) -> RankResult<RestoreReport> {
    let mut entries = 0;
    let sets = bucket.scan(|name, bytes| {
        let set = RankSet::new();
        if let Err(e) = set.unmarshal(&bytes) {
            tracing::error!(name = %name, error = %e, "rank data corrupted");
            return Err(e);
        }
        entries += set.len();
        tracing::debug!(name = %name, entries = set.len(), "restored rank set");
        registry.insert_restored(name, Arc::new(set));
        Ok(())
    })?;
    let report = RestoreReport { sets, entries };
    tracing::info!(
        bucket = bucket.name(),
        sets = report.sets,
        entries = report.entries,
        "restore complete"
    );
    Ok(report)
}
