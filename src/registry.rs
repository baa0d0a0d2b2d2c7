use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::Serialize;
use tracing::info;

/// Display name used until a source's title has been resolved
pub const UNKNOWN_NAME: &str = "Unknown";

/// A monitored source as shown to operators
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Source {
    pub id: i64,
    pub name: String,
}

/// Set of monitored source ids.
///
/// Writers build a fresh set and swap it in, so readers holding a
/// [`snapshot`](SourceRegistry::snapshot) never see a half-applied replace.
#[derive(Debug, Default)]
pub struct SourceRegistry {
    ids: RwLock<Arc<BTreeSet<i64>>>,
    names: RwLock<HashMap<i64, String>>,
}

impl SourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_ids(ids: impl IntoIterator<Item = i64>) -> Self {
        let registry = Self::new();
        registry.replace(ids);
        registry
    }

    /// Current membership; cheap to clone and safe to hold across a replace.
    pub fn snapshot(&self) -> Arc<BTreeSet<i64>> {
        Arc::clone(&read(&self.ids))
    }

    pub fn contains(&self, id: i64) -> bool {
        read(&self.ids).contains(&id)
    }

    /// Returns false if the id was already monitored.
    pub fn add(&self, id: i64) -> bool {
        let mut guard = write(&self.ids);
        if guard.contains(&id) {
            return false;
        }
        let mut next = BTreeSet::clone(&guard);
        next.insert(id);
        *guard = Arc::new(next);
        info!(source_id = id, "Source added to registry");
        true
    }

    /// Returns false if the id was not monitored.
    pub fn remove(&self, id: i64) -> bool {
        let mut guard = write(&self.ids);
        if !guard.contains(&id) {
            return false;
        }
        let mut next = BTreeSet::clone(&guard);
        next.remove(&id);
        *guard = Arc::new(next);
        info!(source_id = id, "Source removed from registry");
        true
    }

    pub fn replace(&self, ids: impl IntoIterator<Item = i64>) {
        let next: BTreeSet<i64> = ids.into_iter().collect();
        let count = next.len();
        *write(&self.ids) = Arc::new(next);
        info!(count, "Source registry replaced");
    }

    /// Monitored sources in ascending id order.
    pub fn list(&self) -> Vec<Source> {
        let ids = self.snapshot();
        let names = read(&self.names);
        ids.iter()
            .map(|id| Source {
                id: *id,
                name: names
                    .get(id)
                    .cloned()
                    .unwrap_or_else(|| UNKNOWN_NAME.to_string()),
            })
            .collect()
    }

    pub fn ids(&self) -> Vec<i64> {
        self.snapshot().iter().copied().collect()
    }

    pub fn len(&self) -> usize {
        read(&self.ids).len()
    }

    pub fn is_empty(&self) -> bool {
        read(&self.ids).is_empty()
    }

    /// Cache a resolved display name. Names outlive membership changes.
    pub fn set_name(&self, id: i64, name: impl Into<String>) {
        write(&self.names).insert(id, name.into());
    }

    pub fn name(&self, id: i64) -> String {
        read(&self.names)
            .get(&id)
            .cloned()
            .unwrap_or_else(|| UNKNOWN_NAME.to_string())
    }
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_and_remove() {
        let registry = SourceRegistry::new();
        assert!(registry.add(-100111));
        assert!(!registry.add(-100111));
        assert!(registry.contains(-100111));
        assert_eq!(registry.len(), 1);

        assert!(registry.remove(-100111));
        assert!(!registry.remove(-100111));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_list_is_ordered() {
        let registry = SourceRegistry::with_ids([-100222, -100333, -100111]);
        assert_eq!(registry.ids(), vec![-100333, -100222, -100111]);
    }

    #[test]
    fn test_snapshot_survives_replace() {
        let registry = SourceRegistry::with_ids([1, 2]);
        let before = registry.snapshot();

        registry.replace([3]);

        assert!(before.contains(&1));
        assert!(!registry.contains(1));
        assert!(registry.contains(3));
    }

    #[test]
    fn test_replace_deduplicates() {
        let registry = SourceRegistry::new();
        registry.replace([5, 5, 6]);
        assert_eq!(registry.ids(), vec![5, 6]);
    }

    #[test]
    fn test_names_default_and_persist() {
        let registry = SourceRegistry::with_ids([1, 2]);
        registry.set_name(1, "News");

        let listed = registry.list();
        assert_eq!(
            listed,
            vec![
                Source {
                    id: 1,
                    name: "News".to_string()
                },
                Source {
                    id: 2,
                    name: UNKNOWN_NAME.to_string()
                },
            ]
        );

        registry.replace([1]);
        assert_eq!(registry.name(1), "News");
    }

    #[test]
    fn test_concurrent_readers_during_replace() {
        let registry = Arc::new(SourceRegistry::with_ids(0..100));
        let handles: Vec<_> = (0..4)
            .map(|i| {
                let registry = Arc::clone(&registry);
                std::thread::spawn(move || {
                    for round in 0..200 {
                        if i == 0 {
                            registry.replace((round % 7)..(round % 7 + 100));
                        } else {
                            let snap = registry.snapshot();
                            assert_eq!(snap.len(), 100);
                        }
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
    }
}
