//! `rankd`: leaderboard ranking engine with write-back snapshot persistence.
//!
//! Scope:
//! - order-statistics ranking sets (`rankset`)
//! - the name → set registry and the request-facing service (`registry`, `service`)
//! - the bounded dirty-name queue and the flush pipeline (`dirty`, `pipeline`)
//! - snapshot framing, storage backends and the key/value bucket (`snapshot`, `storage`, `bucket`)
//! - startup restore (`restore`)
//!
//! Non-goal: network transport. Callers embed [`RankService`] behind whatever
//! RPC layer they use.
//!
//! ## Contract (what you can rely on)
//!
//! - **Ordering**: a set orders users by score descending, ties by ascending
//!   user id. Rank is 1-based; `0` means "not present".
//! - **Concurrency**: every operation takes `&self`. The registry lock covers
//!   only name lookup/creation/removal; each set has its own lock.
//! - **Durability**: a mutation is durable once a flush cycle that started
//!   after it has completed. Flush cycles run every `flush_interval` and once
//!   more on shutdown, so a crash loses at most one interval of updates.
//! - **Restore is strict**: a corrupt snapshot fails startup instead of
//!   serving partial state.
//! - **Deleted sets stay deleted**: deleting a set removes its stored snapshot
//!   on the next flush.

pub mod bucket;
pub mod config;
pub mod dirty;
pub mod error;
pub mod formats;
pub mod pipeline;
pub mod rankset;
pub mod registry;
pub mod restore;
pub mod server;
pub mod service;
pub mod snapshot;
pub mod storage;

pub use bucket::Bucket;
pub use config::ServiceConfig;
pub use error::{RankError, RankResult};
pub use pipeline::{FlushHandle, FlushReport, Pipeline};
pub use rankset::{Entry, RankSet};
pub use registry::Registry;
pub use server::Server;
pub use service::RankService;
pub use storage::{Directory, DurableDirectory, FsDirectory, MemoryDirectory};
