//! Name → [`RankSet`] directory.
//!
//! One readers-writer lock guards only the map. It is held for the lookup or
//! the insertion/removal and released before any set operation runs; each
//! set synchronizes its own contents.

use crate::rankset::RankSet;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

/// Shared directory of named ranking sets.
#[derive(Debug, Default)]
pub struct Registry {
    sets: RwLock<HashMap<String, Arc<RankSet>>>,
}

impl Registry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up `name` under the shared lock.
    pub fn get(&self, name: &str) -> Option<Arc<RankSet>> {
        self.sets.read().get(name).cloned()
    }

    /// Look up `name`, creating an empty set under the exclusive lock if absent.
    pub fn get_or_create(&self, name: &str) -> Arc<RankSet> {
        if let Some(set) = self.get(name) {
            return set;
        }
        self.sets
            .write()
            .entry(name.to_owned())
            .or_insert_with(|| Arc::new(RankSet::new()))
            .clone()
    }

    /// Install a set rebuilt from storage, replacing any existing one.
    pub fn insert_restored(&self, name: &str, set: Arc<RankSet>) {
        self.sets.write().insert(name.to_owned(), set);
    }

    /// Remove `name`. Returns the detached set, if there was one.
    pub fn remove(&self, name: &str) -> Option<Arc<RankSet>> {
        self.sets.write().remove(name)
    }

    /// Number of named sets.
    pub fn len(&self) -> usize {
        self.sets.read().len()
    }

    /// Whether no sets exist.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All set names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.sets.read().keys().cloned().collect();
        names.sort();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_or_create_returns_the_same_instance() {
        let reg = Registry::new();
        let a = reg.get_or_create("global");
        a.update(1, 10);
        let b = reg.get_or_create("global");
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn remove_detaches_but_keeps_outstanding_handles_usable() {
        let reg = Registry::new();
        let set = reg.get_or_create("weekly");
        assert!(reg.remove("weekly").is_some());
        assert!(reg.get("weekly").is_none());
        set.update(1, 1);
        assert_eq!(set.len(), 1);
        assert!(reg.remove("weekly").is_none());
    }

    #[test]
    fn concurrent_creators_share_one_set() {
        let reg = Arc::new(Registry::new());
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let reg = reg.clone();
                std::thread::spawn(move || {
                    for u in 0..100 {
                        reg.get_or_create("global").update(t * 1_000 + u, u);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(reg.len(), 1);
        assert_eq!(reg.get("global").unwrap().len(), 800);
    }

    #[test]
    fn names_are_sorted() {
        let reg = Registry::new();
        for n in ["b", "a", "c"] {
            reg.get_or_create(n);
        }
        assert_eq!(reg.names(), vec!["a", "b", "c"]);
    }
}
