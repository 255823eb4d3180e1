//! Tracked Map - identity-keyed snapshot diffing
//!
//! Every discovery source produces full snapshots. `TrackedMap::update_set`
//! partitions the new snapshot against the previous one:
//!
//! ```text
//! old ∩ new, value differs  → Changed { old, new }
//! new \ old                 → Added
//! old \ new                 → Removed
//! ```
//!
//! "Differs" means value inequality (`PartialEq`), never identity.
//! Subscribers see the granular events first, then one aggregate `Updated`.

use parking_lot::RwLock;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use tokio::sync::broadcast;

/// A value with a stable identity across snapshots
pub trait Tracked: Clone + PartialEq + Send + Sync + 'static {
    type Id: Clone + Eq + Hash + fmt::Debug + Send + Sync;

    fn tracking_id(&self) -> Self::Id;
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Change<T> {
    pub old: T,
    pub new: T,
}

/// Result of one `update_set` call
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrackedDiff<T> {
    pub added: Vec<T>,
    pub changed: Vec<Change<T>>,
    pub removed: Vec<T>,
}

impl<T> TrackedDiff<T> {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.changed.is_empty() && self.removed.is_empty()
    }
}

impl<T> Default for TrackedDiff<T> {
    fn default() -> Self {
        Self {
            added: Vec::new(),
            changed: Vec::new(),
            removed: Vec::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub enum TrackedEvent<T> {
    Added(T),
    Changed { old: T, new: T },
    Removed(T),
    Updated(TrackedDiff<T>),
}

struct Snapshot<T: Tracked> {
    items: HashMap<T::Id, T>,
    /// Insertion order, so removals are reported deterministically
    order: Vec<T::Id>,
}

impl<T: Tracked> Snapshot<T> {
    fn empty() -> Self {
        Self {
            items: HashMap::new(),
            order: Vec::new(),
        }
    }
}

pub struct TrackedMap<T: Tracked> {
    current: RwLock<Snapshot<T>>,
    tx: broadcast::Sender<TrackedEvent<T>>,
}

impl<T: Tracked> TrackedMap<T> {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(1024);
        Self {
            current: RwLock::new(Snapshot::empty()),
            tx,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TrackedEvent<T>> {
        self.tx.subscribe()
    }

    /// Replace the stored snapshot with `items` and report what moved.
    ///
    /// Duplicate identities within `items` collapse to the last occurrence.
    pub fn update_set(&self, items: impl IntoIterator<Item = T>) -> TrackedDiff<T> {
        let mut next = Snapshot::empty();
        for item in items {
            let id = item.tracking_id();
            if next.items.insert(id.clone(), item).is_none() {
                next.order.push(id);
            }
        }

        let mut diff = TrackedDiff::default();
        // Granular events in processing order: new items first, then removals
        let mut events = Vec::new();
        {
            let mut current = self.current.write();

            for id in &next.order {
                let new = &next.items[id];
                match current.items.get(id) {
                    Some(old) if old != new => {
                        events.push(TrackedEvent::Changed {
                            old: old.clone(),
                            new: new.clone(),
                        });
                        diff.changed.push(Change {
                            old: old.clone(),
                            new: new.clone(),
                        });
                    }
                    Some(_) => {}
                    None => {
                        events.push(TrackedEvent::Added(new.clone()));
                        diff.added.push(new.clone());
                    }
                }
            }

            for id in &current.order {
                if next.items.contains_key(id) {
                    continue;
                }
                if let Some(old) = current.items.get(id) {
                    events.push(TrackedEvent::Removed(old.clone()));
                    diff.removed.push(old.clone());
                }
            }

            *current = next;
        }

        // Ignore send errors: no subscribers is fine
        for event in events {
            let _ = self.tx.send(event);
        }
        let _ = self.tx.send(TrackedEvent::Updated(diff.clone()));
        diff
    }

    pub fn get(&self, id: &T::Id) -> Option<T> {
        self.current.read().items.get(id).cloned()
    }

    /// Current values in insertion order
    pub fn values(&self) -> Vec<T> {
        let current = self.current.read();
        current
            .order
            .iter()
            .filter_map(|id| current.items.get(id).cloned())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.current.read().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop everything, reporting it as removed
    pub fn clear(&self) -> TrackedDiff<T> {
        self.update_set(Vec::new())
    }
}

impl<T: Tracked> Default for TrackedMap<T> {
    fn default() -> Self {
        Self::new()
    }
}
