//! Keyed, last-write-wins collection shared by the tool, resource and prompt
//! registries of a server.

use std::collections::BTreeMap;
use std::sync::RwLock;

/// Thread-safe name → entry map. Entries are cloned out on read so no lock
/// is ever held by a caller.
#[derive(Debug)]
pub struct Registry<T> {
    entries: RwLock<BTreeMap<String, T>>,
}

impl<T> Default for Registry<T> {
    fn default() -> Self {
        Self {
            entries: RwLock::new(BTreeMap::new()),
        }
    }
}

impl<T: Clone> Registry<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace. Returns true if an entry was replaced.
    pub fn register(&self, key: impl Into<String>, entry: T) -> bool {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        entries.insert(key.into(), entry).is_some()
    }

    pub fn get(&self, key: &str) -> Option<T> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        entries.get(key).cloned()
    }

    pub fn remove(&self, key: &str) -> Option<T> {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        entries.remove(key)
    }

    /// Snapshot of all entries, ordered by key.
    pub fn list(&self) -> Vec<T> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        entries.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_is_last_write_wins() {
        let r: Registry<u32> = Registry::new();
        assert!(!r.register("a", 1));
        assert!(r.register("a", 2));
        assert_eq!(r.get("a"), Some(2));
        assert_eq!(r.len(), 1);
    }

    #[test]
    fn list_is_a_snapshot() {
        let r: Registry<&'static str> = Registry::new();
        r.register("b", "beta");
        r.register("a", "alpha");
        let snap = r.list();
        r.remove("a");
        assert_eq!(snap, vec!["alpha", "beta"]);
        assert_eq!(r.list(), vec!["beta"]);
        assert!(r.get("a").is_none());
        assert!(!r.is_empty());
    }
}
