// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Mutex;

/// Uncommitted mutation of one resource: the materialized view before the
/// first tracked event and after the most recent one. An absent side means
/// the resource did not exist (creation) or no longer exists (deletion).
#[derive(Clone, Debug)]
struct Change<V> {
    previous: Option<V>,
    current: Option<V>,
}

/// A lock-protected delta buffer keyed by resource identity.
///
/// Writers (watch callbacks) call [`ChangeTracker::update`] concurrently;
/// the single reader (the reconciler) drains the buffer into an
/// authoritative map with [`ChangeTracker::apply`]. Folding is commutative
/// with respect to event order: for each key only the oldest `previous` and
/// the newest `current` are retained, and a key whose sides become equal is
/// dropped (no-op suppression).
#[derive(Debug)]
pub struct ChangeTracker<K, V> {
    items: Mutex<HashMap<K, Change<V>>>,
}

impl<K, V> Default for ChangeTracker<K, V> {
    fn default() -> Self {
        Self {
            items: Mutex::new(HashMap::new()),
        }
    }
}

impl<K, V> ChangeTracker<K, V>
where
    K: Eq + Hash + Clone,
    V: PartialEq,
{
    #[must_use]
    pub fn new() -> Self {
        Self {
            items: Mutex::new(HashMap::new()),
        }
    }

    /// Records one observed mutation of `key`. `previous`/`current` are the
    /// materialized views before and after the event; either side may be
    /// absent for creations and deletions.
    pub fn update(&self, key: K, previous: Option<V>, current: Option<V>) {
        let mut items = self.items.lock().expect("tracker lock poisoned");
        match items.entry(key) {
            Entry::Occupied(mut entry) => {
                entry.get_mut().current = current;
                if entry.get().previous == entry.get().current {
                    entry.remove();
                }
            }
            Entry::Vacant(entry) => {
                if previous != current {
                    entry.insert(Change { previous, current });
                }
            }
        }
    }

    /// Applies every tracked change into `map` (unmerge `previous`, merge
    /// `current`) and empties the tracker. The tracker lock is held across
    /// all entries, so producers never observe a partial apply.
    pub fn apply(&self, map: &mut HashMap<K, V>) {
        let mut items = self.items.lock().expect("tracker lock poisoned");
        for (key, change) in items.drain() {
            if change.previous.is_some() {
                map.remove(&key);
            }
            if let Some(current) = change.current {
                map.insert(key, current);
            }
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.items.lock().expect("tracker lock poisoned").len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
