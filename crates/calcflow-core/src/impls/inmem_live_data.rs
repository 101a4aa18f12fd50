//! InMemoryLkvSnapshotProvider - last known value store for live data
//!
//! # 実装詳細
//! - current values live behind an `Arc`, so a snapshot is a pointer copy;
//!   the next write clones the map (`Arc::make_mut`)
//! - listeners are held weakly and pruned when they are gone
//! - listeners are notified after the lock is released

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::trace;

use crate::domain::ValueRequirement;
use crate::ports::{
    LiveDataAvailabilityProvider, LiveDataInjector, LiveDataListener, LiveDataSnapshotProvider,
    SnapshotId,
};

type Values = Arc<HashMap<ValueRequirement, serde_json::Value>>;

#[derive(Default)]
struct LkvState {
    current: Values,
    snapshots: HashMap<SnapshotId, Values>,
    next_snapshot: u64,
}

pub struct InMemoryLkvSnapshotProvider {
    state: Mutex<LkvState>,
    listeners: Mutex<Vec<Weak<dyn LiveDataListener>>>,
    notify: bool,
}

impl InMemoryLkvSnapshotProvider {
    /// A provider that tells its listeners about every change.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(LkvState::default()),
            listeners: Mutex::new(Vec::new()),
            notify: true,
        }
    }

    /// A provider that never notifies; cycles only run when triggered
    /// explicitly.
    pub fn without_notifications() -> Self {
        Self {
            notify: false,
            ..Self::new()
        }
    }

    /// Snapshots taken and not yet released.
    pub fn open_snapshots(&self) -> usize {
        self.state.lock().snapshots.len()
    }

    fn value_changed(&self) {
        if !self.notify {
            return;
        }
        let listeners: Vec<Arc<dyn LiveDataListener>> = {
            let mut listeners = self.listeners.lock();
            listeners.retain(|listener| listener.strong_count() > 0);
            listeners.iter().filter_map(Weak::upgrade).collect()
        };
        trace!(listeners = listeners.len(), "live data changed");
        for listener in listeners {
            listener.live_data_changed();
        }
    }
}

impl Default for InMemoryLkvSnapshotProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl LiveDataSnapshotProvider for InMemoryLkvSnapshotProvider {
    fn snapshot(&self) -> SnapshotId {
        let mut state = self.state.lock();
        state.next_snapshot += 1;
        let id = SnapshotId(state.next_snapshot);
        let frozen = Arc::clone(&state.current);
        state.snapshots.insert(id, frozen);
        id
    }

    fn query_snapshot(&self, snapshot: SnapshotId, requirement: &ValueRequirement) -> Option<serde_json::Value> {
        self.state
            .lock()
            .snapshots
            .get(&snapshot)
            .and_then(|values| values.get(requirement).cloned())
    }

    fn release_snapshot(&self, snapshot: SnapshotId) {
        self.state.lock().snapshots.remove(&snapshot);
    }

    fn add_listener(&self, listener: Weak<dyn LiveDataListener>) {
        self.listeners.lock().push(listener);
    }
}

impl LiveDataInjector for InMemoryLkvSnapshotProvider {
    fn add_value(&self, requirement: ValueRequirement, value: serde_json::Value) {
        {
            let mut state = self.state.lock();
            Arc::make_mut(&mut state.current).insert(requirement, value);
        }
        self.value_changed();
    }

    fn remove_value(&self, requirement: &ValueRequirement) {
        let removed = {
            let mut state = self.state.lock();
            Arc::make_mut(&mut state.current).remove(requirement).is_some()
        };
        if removed {
            self.value_changed();
        }
    }
}

impl LiveDataAvailabilityProvider for InMemoryLkvSnapshotProvider {
    fn is_available(&self, requirement: &ValueRequirement) -> bool {
        self.state.lock().current.contains_key(requirement)
    }
}
