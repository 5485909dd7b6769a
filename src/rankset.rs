//! Order-statistics ranking set.
//!
//! A [`RankSet`] maps user ids to scores and keeps every user in a derived order:
//! **score descending, ties broken by ascending user id**. Rank is the 1-based
//! position in that order.
//!
//! Internally the order lives in an arena-backed AVL tree whose nodes carry
//! their subtree size, so both "rank of a user" and "users at ranks `[a, b]`"
//! are answered by walking one root-to-leaf path. A hash index maps each user
//! to its current score, which is enough to rebuild its tree key.
//!
//! All operations take `&self`: the set owns its lock and callers never
//! synchronize externally.

use crate::error::{RankError, RankResult};
use crate::snapshot;
use parking_lot::RwLock;
use std::cmp::{Ordering, Reverse};
use std::collections::HashMap;

/// User identifier.
pub type UserId = i32;
/// Score value; higher ranks first.
pub type Score = i32;
/// 1-based rank. `0` means "not present".
pub type Rank = i32;

/// Rank reported for users that are not in the set.
pub const ABSENT_RANK: Rank = 0;

/// One `(user, score)` pair, as stored in snapshots and returned by [`RankSet::entries`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct Entry {
    /// User identifier.
    pub user_id: UserId,
    /// Current score.
    pub score: Score,
}

impl Entry {
    /// Construct an entry.
    pub const fn new(user_id: UserId, score: Score) -> Self {
        Self { user_id, score }
    }
}

/// Tree key. Field order gives the derived ranking order through `Ord`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct RankKey {
    score: Reverse<Score>,
    user_id: UserId,
}

impl RankKey {
    fn new(user_id: UserId, score: Score) -> Self {
        Self {
            score: Reverse(score),
            user_id,
        }
    }

    fn entry(&self) -> Entry {
        Entry::new(self.user_id, self.score.0)
    }
}

#[derive(Debug, Clone)]
struct Node {
    key: RankKey,
    left: Option<usize>,
    right: Option<usize>,
    height: u32,
    size: usize,
}

/// Size-augmented AVL tree stored in a `Vec` arena.
#[derive(Debug, Default)]
struct RankTree {
    nodes: Vec<Node>,
    free: Vec<usize>,
    root: Option<usize>,
}

impl RankTree {
    fn len(&self) -> usize {
        self.size(self.root)
    }

    fn size(&self, n: Option<usize>) -> usize {
        n.map_or(0, |i| self.nodes[i].size)
    }

    fn height(&self, n: Option<usize>) -> u32 {
        n.map_or(0, |i| self.nodes[i].height)
    }

    fn alloc(&mut self, key: RankKey) -> usize {
        let node = Node {
            key,
            left: None,
            right: None,
            height: 1,
            size: 1,
        };
        match self.free.pop() {
            Some(i) => {
                self.nodes[i] = node;
                i
            }
            None => {
                self.nodes.push(node);
                self.nodes.len() - 1
            }
        }
    }

    fn fix(&mut self, i: usize) {
        let (l, r) = (self.nodes[i].left, self.nodes[i].right);
        let height = 1 + self.height(l).max(self.height(r));
        let size = 1 + self.size(l) + self.size(r);
        let n = &mut self.nodes[i];
        n.height = height;
        n.size = size;
    }

    fn balance_factor(&self, i: usize) -> i64 {
        i64::from(self.height(self.nodes[i].left)) - i64::from(self.height(self.nodes[i].right))
    }

    fn rotate_right(&mut self, i: usize) -> usize {
        let Some(l) = self.nodes[i].left else {
            return i;
        };
        self.nodes[i].left = self.nodes[l].right;
        self.nodes[l].right = Some(i);
        self.fix(i);
        self.fix(l);
        l
    }

    fn rotate_left(&mut self, i: usize) -> usize {
        let Some(r) = self.nodes[i].right else {
            return i;
        };
        self.nodes[i].right = self.nodes[r].left;
        self.nodes[r].left = Some(i);
        self.fix(i);
        self.fix(r);
        r
    }

    /// Recompute `i` and restore the AVL height bound; returns the new subtree root.
    fn rebalance(&mut self, i: usize) -> usize {
        self.fix(i);
        let bf = self.balance_factor(i);
        if bf > 1 {
            if let Some(l) = self.nodes[i].left {
                if self.balance_factor(l) < 0 {
                    let nl = self.rotate_left(l);
                    self.nodes[i].left = Some(nl);
                }
            }
            return self.rotate_right(i);
        }
        if bf < -1 {
            if let Some(r) = self.nodes[i].right {
                if self.balance_factor(r) > 0 {
                    let nr = self.rotate_right(r);
                    self.nodes[i].right = Some(nr);
                }
            }
            return self.rotate_left(i);
        }
        i
    }

    fn insert(&mut self, key: RankKey) {
        let root = self.root;
        self.root = Some(self.insert_at(root, key));
    }

    fn insert_at(&mut self, node: Option<usize>, key: RankKey) -> usize {
        let Some(i) = node else {
            return self.alloc(key);
        };
        match key.cmp(&self.nodes[i].key) {
            Ordering::Less => {
                let left = self.nodes[i].left;
                let nl = self.insert_at(left, key);
                self.nodes[i].left = Some(nl);
            }
            Ordering::Greater => {
                let right = self.nodes[i].right;
                let nr = self.insert_at(right, key);
                self.nodes[i].right = Some(nr);
            }
            Ordering::Equal => return i,
        }
        self.rebalance(i)
    }

    fn remove(&mut self, key: &RankKey) -> bool {
        let root = self.root;
        let (root, removed) = self.remove_at(root, key);
        self.root = root;
        removed
    }

    fn remove_at(&mut self, node: Option<usize>, key: &RankKey) -> (Option<usize>, bool) {
        let Some(i) = node else {
            return (None, false);
        };
        match key.cmp(&self.nodes[i].key) {
            Ordering::Less => {
                let left = self.nodes[i].left;
                let (nl, removed) = self.remove_at(left, key);
                self.nodes[i].left = nl;
                (Some(self.rebalance(i)), removed)
            }
            Ordering::Greater => {
                let right = self.nodes[i].right;
                let (nr, removed) = self.remove_at(right, key);
                self.nodes[i].right = nr;
                (Some(self.rebalance(i)), removed)
            }
            Ordering::Equal => {
                let (l, r) = (self.nodes[i].left, self.nodes[i].right);
                self.free.push(i);
                let replacement = match (l, r) {
                    (None, None) => None,
                    (Some(c), None) | (None, Some(c)) => Some(c),
                    (Some(l), Some(r)) => {
                        // Successor takes the removed node's place.
                        let (rest, min) = self.take_min(r);
                        self.nodes[min].left = Some(l);
                        self.nodes[min].right = rest;
                        Some(self.rebalance(min))
                    }
                };
                (replacement, true)
            }
        }
    }

    /// Detach the minimum of subtree `i`; returns `(new subtree root, detached node)`.
    fn take_min(&mut self, i: usize) -> (Option<usize>, usize) {
        match self.nodes[i].left {
            None => (self.nodes[i].right, i),
            Some(l) => {
                let (rest, min) = self.take_min(l);
                self.nodes[i].left = rest;
                (Some(self.rebalance(i)), min)
            }
        }
    }

    /// 1-based rank of `key`, if present.
    fn rank_of(&self, key: &RankKey) -> Option<usize> {
        let mut before = 0;
        let mut cur = self.root;
        while let Some(i) = cur {
            let n = &self.nodes[i];
            match key.cmp(&n.key) {
                Ordering::Less => cur = n.left,
                Ordering::Greater => {
                    before += self.size(n.left) + 1;
                    cur = n.right;
                }
                Ordering::Equal => return Some(before + self.size(n.left) + 1),
            }
        }
        None
    }

    /// Visit up to `count` keys in order, starting at 1-based rank `first`.
    fn visit_from(&self, first: usize, count: usize, mut visit: impl FnMut(&RankKey)) {
        // Descend to `first`, keeping every node whose left subtree we enter:
        // those are exactly the in-order successors still to come.
        let mut stack = Vec::with_capacity(self.height(self.root) as usize);
        let mut k = first;
        let mut cur = self.root;
        while let Some(i) = cur {
            let left_size = self.size(self.nodes[i].left);
            match k.cmp(&(left_size + 1)) {
                Ordering::Less => {
                    stack.push(i);
                    cur = self.nodes[i].left;
                }
                Ordering::Equal => {
                    stack.push(i);
                    break;
                }
                Ordering::Greater => {
                    k -= left_size + 1;
                    cur = self.nodes[i].right;
                }
            }
        }

        let mut remaining = count;
        while remaining > 0 {
            let Some(i) = stack.pop() else {
                break;
            };
            visit(&self.nodes[i].key);
            remaining -= 1;
            let mut c = self.nodes[i].right;
            while let Some(j) = c {
                stack.push(j);
                c = self.nodes[j].left;
            }
        }
    }
}

#[derive(Debug, Default)]
struct Inner {
    tree: RankTree,
    scores: HashMap<UserId, Score>,
}

impl Inner {
    fn update(&mut self, user_id: UserId, score: Score) {
        if let Some(old) = self.scores.insert(user_id, score) {
            if old == score {
                return;
            }
            self.tree.remove(&RankKey::new(user_id, old));
        }
        self.tree.insert(RankKey::new(user_id, score));
    }

    fn entries(&self) -> Vec<Entry> {
        let mut out = Vec::with_capacity(self.tree.len());
        self.tree
            .visit_from(1, self.tree.len(), |k| out.push(k.entry()));
        out
    }
}

/// A named leaderboard's contents: users, scores, and their derived ranks.
#[derive(Debug, Default)]
pub struct RankSet {
    inner: RwLock<Inner>,
}

impl RankSet {
    /// Create an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of users in the set.
    pub fn len(&self) -> usize {
        self.inner.read().scores.len()
    }

    /// Whether the set has no users.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Insert `user_id` with `score`, or move it if its score changed.
    pub fn update(&self, user_id: UserId, score: Score) {
        self.inner.write().update(user_id, score);
    }

    /// Remove `user_id`. Returns whether the user was present; absence is not an error.
    pub fn delete(&self, user_id: UserId) -> bool {
        let mut inner = self.inner.write();
        match inner.scores.remove(&user_id) {
            Some(old) => inner.tree.remove(&RankKey::new(user_id, old)),
            None => false,
        }
    }

    /// Current score of `user_id`.
    pub fn score(&self, user_id: UserId) -> Option<Score> {
        self.inner.read().scores.get(&user_id).copied()
    }

    /// `(rank, score)` of `user_id`; `(ABSENT_RANK, 0)` when absent.
    pub fn rank(&self, user_id: UserId) -> (Rank, Score) {
        let inner = self.inner.read();
        let Some(&score) = inner.scores.get(&user_id) else {
            return (ABSENT_RANK, 0);
        };
        match inner.tree.rank_of(&RankKey::new(user_id, score)) {
            Some(r) => (Rank::try_from(r).unwrap_or(Rank::MAX), score),
            None => (ABSENT_RANK, 0),
        }
    }

    /// Users at ranks `[a, b]` (1-based, inclusive), as parallel id/score vectors.
    ///
    /// Bounds are clamped to `[1, len]`. An inverted range or an empty set
    /// yields empty vectors.
    pub fn get_list(&self, a: Rank, b: Rank) -> (Vec<UserId>, Vec<Score>) {
        let inner = self.inner.read();
        let len = inner.tree.len();
        let first = usize::try_from(a.max(1)).unwrap_or(1);
        let last = usize::try_from(b).unwrap_or(0).min(len);
        if len == 0 || first > last {
            return (Vec::new(), Vec::new());
        }

        let count = last - first + 1;
        let mut ids = Vec::with_capacity(count);
        let mut scores = Vec::with_capacity(count);
        inner.tree.visit_from(first, count, |k| {
            ids.push(k.user_id);
            scores.push(k.score.0);
        });
        (ids, scores)
    }

    /// Every entry, in rank order.
    pub fn entries(&self) -> Vec<Entry> {
        self.inner.read().entries()
    }

    /// Encode the full contents as a snapshot.
    pub fn marshal(&self) -> RankResult<Vec<u8>> {
        let entries = self.entries();
        snapshot::encode(&entries)
    }

    /// Load a snapshot produced by [`RankSet::marshal`] into this (empty) set.
    pub fn unmarshal(&self, bytes: &[u8]) -> RankResult<()> {
        let entries = snapshot::decode(bytes)?;
        let mut inner = self.inner.write();
        if !inner.scores.is_empty() {
            return Err(RankError::InvalidState(
                "unmarshal into a non-empty rank set".into(),
            ));
        }
        inner.scores.reserve(entries.len());
        for e in entries {
            inner.update(e.user_id, e.score);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn check_tree(t: &RankTree, n: Option<usize>) -> (u32, usize) {
        let Some(i) = n else {
            return (0, 0);
        };
        let node = &t.nodes[i];
        if let Some(l) = node.left {
            assert!(t.nodes[l].key < node.key);
        }
        if let Some(r) = node.right {
            assert!(t.nodes[r].key > node.key);
        }
        let (lh, ls) = check_tree(t, node.left);
        let (rh, rs) = check_tree(t, node.right);
        assert!(lh.abs_diff(rh) <= 1, "unbalanced at {:?}", node.key);
        assert_eq!(node.height, 1 + lh.max(rh));
        assert_eq!(node.size, 1 + ls + rs);
        (node.height, node.size)
    }

    fn assert_well_formed(set: &RankSet) {
        let inner = set.inner.read();
        let (_, size) = check_tree(&inner.tree, inner.tree.root);
        assert_eq!(size, inner.scores.len());
    }

    #[test]
    fn scenario_ranges_and_ranks() {
        let set = RankSet::new();
        set.update(1, 100);
        set.update(2, 200);
        set.update(3, 150);

        assert_eq!(set.get_list(1, 3), (vec![2, 3, 1], vec![200, 150, 100]));
        assert_eq!(set.rank(3), (2, 150));
        assert_eq!(set.rank(1), (3, 100));
        assert_eq!(set.rank(99), (ABSENT_RANK, 0));
    }

    #[test]
    fn ties_rank_by_ascending_user_id() {
        let set = RankSet::new();
        set.update(9, 50);
        set.update(4, 50);
        set.update(7, 50);
        set.update(1, 10);
        assert_eq!(set.get_list(1, 4).0, vec![4, 7, 9, 1]);
        assert_eq!(set.rank(7).0, 2);
    }

    #[test]
    fn update_moves_existing_user() {
        let set = RankSet::new();
        set.update(1, 10);
        set.update(2, 20);
        set.update(1, 30);
        assert_eq!(set.len(), 2);
        assert_eq!(set.rank(1), (1, 30));
        assert_eq!(set.rank(2), (2, 20));
        set.update(1, 30);
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn delete_is_idempotent() {
        let set = RankSet::new();
        set.update(1, 10);
        assert!(set.delete(1));
        assert!(!set.delete(1));
        assert!(!set.delete(42));
        assert_eq!(set.rank(1), (ABSENT_RANK, 0));
        assert!(set.is_empty());
    }

    #[test]
    fn get_list_clamps_bounds() {
        let set = RankSet::new();
        for u in 1..=5 {
            set.update(u, u * 10);
        }
        assert_eq!(set.get_list(-3, 2).0, vec![5, 4]);
        assert_eq!(set.get_list(4, 100).0, vec![2, 1]);
        assert_eq!(set.get_list(3, 3).0, vec![3]);
        assert!(set.get_list(4, 2).0.is_empty());
        assert!(set.get_list(6, 9).0.is_empty());
        assert!(set.get_list(0, 0).0.is_empty());
        assert!(RankSet::new().get_list(1, 10).0.is_empty());
    }

    #[test]
    fn extreme_scores_order_correctly() {
        let set = RankSet::new();
        set.update(1, i32::MIN);
        set.update(2, i32::MAX);
        set.update(3, 0);
        assert_eq!(set.get_list(1, 3).1, vec![i32::MAX, 0, i32::MIN]);
    }

    #[test]
    fn tree_stays_balanced_under_churn() {
        let set = RankSet::new();
        for u in 0..2_000 {
            set.update(u, u % 97);
        }
        assert_well_formed(&set);
        for u in (0..2_000).step_by(3) {
            set.delete(u);
        }
        for u in (0..2_000).step_by(5) {
            set.update(u, -u);
        }
        assert_well_formed(&set);

        let entries = set.entries();
        assert_eq!(entries.len(), set.len());
        for w in entries.windows(2) {
            let (a, b) = (w[0], w[1]);
            assert!(a.score > b.score || (a.score == b.score && a.user_id < b.user_id));
        }
        for (i, e) in entries.iter().enumerate() {
            assert_eq!(set.rank(e.user_id), (i as Rank + 1, e.score));
        }
    }

    #[test]
    fn freed_slots_are_reused() {
        let set = RankSet::new();
        for u in 0..100 {
            set.update(u, u);
        }
        for u in 0..100 {
            set.update(u, u + 1_000);
        }
        assert_eq!(set.inner.read().tree.nodes.len(), 100);
    }

    #[test]
    fn marshal_unmarshal_round_trip() {
        let set = RankSet::new();
        for u in 0..50 {
            set.update(u, (u * 37) % 11);
        }
        let bytes = set.marshal().unwrap();

        let restored = RankSet::new();
        restored.unmarshal(&bytes).unwrap();
        assert_eq!(restored.entries(), set.entries());
        assert_well_formed(&restored);
    }

    #[test]
    fn marshal_is_deterministic_across_insert_order() {
        let a = RankSet::new();
        let b = RankSet::new();
        for u in 0..20 {
            a.update(u, u % 4);
        }
        for u in (0..20).rev() {
            b.update(u, u % 4);
        }
        assert_eq!(a.marshal().unwrap(), b.marshal().unwrap());
    }

    #[test]
    fn unmarshal_rejects_non_empty_target() {
        let src = RankSet::new();
        src.update(1, 1);
        let bytes = src.marshal().unwrap();
        let err = src.unmarshal(&bytes).unwrap_err();
        assert!(matches!(err, RankError::InvalidState(_)));
    }

    #[test]
    fn unmarshal_rejects_garbage() {
        let set = RankSet::new();
        assert!(set.unmarshal(b"not a snapshot").unwrap_err().is_corruption());
        assert!(set.is_empty());
    }
}
