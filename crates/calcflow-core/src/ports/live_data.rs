//! Live data ports - 市場データの取得・注入・変更通知
//!
//! Snapshots are point in time: values injected after `snapshot()` returns
//! are not visible through `query_snapshot` for that snapshot.

use std::sync::Weak;

use serde::{Deserialize, Serialize};

use crate::domain::ValueRequirement;

/// Handle of one point-in-time snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SnapshotId(pub u64);

pub trait LiveDataSnapshotProvider: Send + Sync {
    /// Freeze the current values and return a handle to them.
    fn snapshot(&self) -> SnapshotId;

    fn query_snapshot(&self, snapshot: SnapshotId, requirement: &ValueRequirement) -> Option<serde_json::Value>;

    fn release_snapshot(&self, snapshot: SnapshotId);

    /// Register for change notifications. Providers that never notify may
    /// ignore the listener; dead listeners are dropped lazily.
    fn add_listener(&self, listener: Weak<dyn LiveDataListener>);
}

pub trait LiveDataInjector: Send + Sync {
    fn add_value(&self, requirement: ValueRequirement, value: serde_json::Value);

    fn remove_value(&self, requirement: &ValueRequirement);
}

pub trait LiveDataAvailabilityProvider: Send + Sync {
    fn is_available(&self, requirement: &ValueRequirement) -> bool;
}

/// Notified when live data changes.
pub trait LiveDataListener: Send + Sync {
    fn live_data_changed(&self);
}
