//! Ranking operations exposed to callers.
//!
//! Transport-agnostic: each operation takes a request value and returns a
//! response value, and every type here derives serde so a transport layer can
//! carry it directly. Unknown names surface as [`RankError::NameNotFound`].

use crate::bucket::check_key_len;
use crate::dirty::DirtySender;
use crate::error::{RankError, RankResult};
use crate::rankset::{Rank, Score, UserId};
use crate::registry::Registry;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Set or replace one user's score.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RankChange {
    /// Target set.
    pub name: String,
    /// User to update.
    pub user_id: UserId,
    /// New score.
    pub score: Score,
}

/// Ask for the users at ranks `[a, b]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RankRange {
    /// Target set.
    pub name: String,
    /// First rank (1-based, inclusive).
    pub a: Rank,
    /// Last rank (inclusive).
    pub b: Rank,
}

/// Users in rank order with their scores (parallel vectors).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RankList {
    /// User ids, best first.
    pub user_ids: Vec<UserId>,
    /// Scores, parallel to `user_ids`.
    pub scores: Vec<Score>,
}

/// Ask for the standing of specific users.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserQuery {
    /// Target set.
    pub name: String,
    /// Users to look up.
    pub user_ids: Vec<UserId>,
}

/// Ranks and scores parallel to a [`UserQuery`]'s ids; absent users get rank 0.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserList {
    /// Ranks (`0` = not in the set).
    pub ranks: Vec<Rank>,
    /// Scores (`0` for absent users).
    pub scores: Vec<Score>,
}

/// Names one set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetName {
    /// Target set.
    pub name: String,
}

/// Names one user within a set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRef {
    /// Target set.
    pub name: String,
    /// Target user.
    pub user_id: UserId,
}

/// The ranking service: registry access plus dirty tracking.
///
/// Mutations mark the set dirty after applying the change; marking waits when
/// the dirty queue is full, which throttles writers to the flush rate.
#[derive(Debug, Clone)]
pub struct RankService {
    registry: Arc<Registry>,
    dirty: DirtySender,
}

impl RankService {
    /// Build a service over `registry`, reporting mutations to `dirty`.
    pub fn new(registry: Arc<Registry>, dirty: DirtySender) -> Self {
        Self { registry, dirty }
    }

    /// The underlying registry.
    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Set `user_id`'s score in `name`, creating the set on first use.
    ///
    /// Names the store cannot persist are refused with
    /// [`RankError::NameTooLong`] before anything changes.
    pub async fn apply_change(&self, name: &str, user_id: UserId, score: Score) -> RankResult<()> {
        check_key_len(name)?;
        let set = self.registry.get_or_create(name);
        set.update(user_id, score);
        self.dirty.mark(name).await
    }

    /// Users at ranks `[a, b]` of `name`.
    pub fn query_rank_range(&self, name: &str, a: Rank, b: Rank) -> RankResult<RankList> {
        let set = self.lookup(name)?;
        let (user_ids, scores) = set.get_list(a, b);
        Ok(RankList { user_ids, scores })
    }

    /// Rank and score of each of `user_ids` in `name`, in input order.
    pub fn query_users(&self, name: &str, user_ids: &[UserId]) -> RankResult<UserList> {
        let set = self.lookup(name)?;
        let (ranks, scores) = user_ids.iter().map(|&id| set.rank(id)).unzip();
        Ok(UserList { ranks, scores })
    }

    /// Drop the whole set `name`. Unknown names are acknowledged too.
    ///
    /// The name is still marked dirty so the next flush removes its stored
    /// snapshot and the set does not come back after a restart.
    pub async fn delete_set(&self, name: &str) -> RankResult<()> {
        if self.registry.remove(name).is_some() {
            tracing::debug!(name = %name, "rank set deleted");
        }
        self.dirty.mark(name).await
    }

    /// Remove `user_id` from `name`; an absent user is a no-op.
    pub async fn delete_user(&self, name: &str, user_id: UserId) -> RankResult<()> {
        let set = self.lookup(name)?;
        if set.delete(user_id) {
            self.dirty.mark(name).await?;
        }
        Ok(())
    }

    /// `RankChange` request.
    pub async fn rank_change(&self, req: &RankChange) -> RankResult<()> {
        self.apply_change(&req.name, req.user_id, req.score).await
    }

    /// `QueryRankRange` request.
    pub fn rank_range(&self, req: &RankRange) -> RankResult<RankList> {
        self.query_rank_range(&req.name, req.a, req.b)
    }

    /// `QueryUsers` request.
    pub fn users(&self, req: &UserQuery) -> RankResult<UserList> {
        self.query_users(&req.name, &req.user_ids)
    }

    /// `DeleteSet` request.
    pub async fn delete_set_request(&self, req: &SetName) -> RankResult<()> {
        self.delete_set(&req.name).await
    }

    /// `DeleteUser` request.
    pub async fn delete_user_request(&self, req: &UserRef) -> RankResult<()> {
        self.delete_user(&req.name, req.user_id).await
    }

    fn lookup(&self, name: &str) -> RankResult<Arc<crate::rankset::RankSet>> {
        self.registry
            .get(name)
            .ok_or_else(|| RankError::NameNotFound(name.to_owned()))
    }
}
