//! Wiring: store → restore → registry → service + pipeline.

use crate::bucket::Bucket;
use crate::config::ServiceConfig;
use crate::dirty::dirty_queue;
use crate::error::RankResult;
use crate::pipeline::{FlushHandle, Pipeline};
use crate::registry::Registry;
use crate::restore::{restore, RestoreReport};
use crate::service::RankService;
use crate::storage::{Directory, FsDirectory};
use std::sync::Arc;

/// A restored, ready-to-serve instance.
///
/// The caller spawns [`Server::pipeline`] (exactly once) and hands
/// [`Server::service`] to its transport. Nothing is served until `open` has
/// returned, so restore always completes before the first request.
#[derive(Debug)]
pub struct Server {
    /// Request-facing operations.
    pub service: RankService,
    /// Background flusher, not yet running.
    pub pipeline: Pipeline,
    /// Forces a flush cycle on the running pipeline.
    pub flush: FlushHandle,
    /// What restore loaded.
    pub restored: RestoreReport,
}

impl Server {
    /// Open the filesystem store at `config.data_dir` and restore from it.
    pub fn open(config: &ServiceConfig) -> RankResult<Self> {
        config.validate()?;
        let dir: Arc<dyn Directory> = Arc::new(FsDirectory::new(&config.data_dir)?);
        Self::open_in(dir, config)
    }

    /// Like [`Server::open`] over any `Directory` backend.
    pub fn open_in(dir: Arc<dyn Directory>, config: &ServiceConfig) -> RankResult<Self> {
        config.validate()?;
        let bucket = Bucket::open_or_create(dir, &config.bucket)?;
        let registry = Arc::new(Registry::new());
        let restored = restore(&bucket, &registry)?;

        let (tx, rx) = dirty_queue(config.queue_capacity);
        let (pipeline, flush) = Pipeline::new(registry.clone(), bucket, rx, config.flush_interval);
        Ok(Self {
            service: RankService::new(registry, tx),
            pipeline,
            flush,
            restored,
        })
    }
}
