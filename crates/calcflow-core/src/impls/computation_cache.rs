//! Per-cycle value caches shared between the cycle loop and compute nodes.

use std::sync::Arc;

use dashmap::DashMap;

use crate::domain::{CycleId, ValueRequirement, ValueSpecification};

/// Values of one calculation configuration within one cycle.
///
/// Live data is copied in from the snapshot before jobs are dispatched;
/// shared values are written by compute nodes as items complete.
#[derive(Debug)]
pub struct ViewComputationCache {
    cycle_id: CycleId,
    calc_config_name: String,
    live_data: DashMap<ValueRequirement, serde_json::Value>,
    shared: DashMap<ValueSpecification, serde_json::Value>,
}

impl ViewComputationCache {
    pub fn new(cycle_id: CycleId, calc_config_name: impl Into<String>) -> Self {
        Self {
            cycle_id,
            calc_config_name: calc_config_name.into(),
            live_data: DashMap::new(),
            shared: DashMap::new(),
        }
    }

    pub fn cycle_id(&self) -> CycleId {
        self.cycle_id
    }

    pub fn calc_config_name(&self) -> &str {
        &self.calc_config_name
    }

    pub fn put_live_data(&self, requirement: ValueRequirement, value: serde_json::Value) {
        self.live_data.insert(requirement, value);
    }

    pub fn live_data(&self, requirement: &ValueRequirement) -> Option<serde_json::Value> {
        self.live_data.get(requirement).map(|value| value.value().clone())
    }

    pub fn put_shared_value(&self, specification: ValueSpecification, value: serde_json::Value) {
        self.shared.insert(specification, value);
    }

    pub fn shared_value(&self, specification: &ValueSpecification) -> Option<serde_json::Value> {
        self.shared.get(specification).map(|value| value.value().clone())
    }

    pub fn shared_len(&self) -> usize {
        self.shared.len()
    }
}

/// Looks up the cache of a (cycle, calc config) pair.
#[derive(Debug, Default)]
pub struct ViewComputationCacheSource {
    caches: DashMap<(CycleId, String), Arc<ViewComputationCache>>,
}

impl ViewComputationCacheSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_create(&self, cycle_id: CycleId, calc_config_name: &str) -> Arc<ViewComputationCache> {
        self.caches
            .entry((cycle_id, calc_config_name.to_string()))
            .or_insert_with(|| Arc::new(ViewComputationCache::new(cycle_id, calc_config_name)))
            .value()
            .clone()
    }

    pub fn find(&self, cycle_id: CycleId, calc_config_name: &str) -> Option<Arc<ViewComputationCache>> {
        self.caches
            .get(&(cycle_id, calc_config_name.to_string()))
            .map(|cache| cache.value().clone())
    }

    /// Drop every cache of `cycle_id`. Jobs still running keep their own
    /// reference until they finish.
    pub fn release_caches(&self, cycle_id: CycleId) {
        self.caches.retain(|(cycle, _), _| *cycle != cycle_id);
    }

    pub fn len(&self) -> usize {
        self.caches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.caches.is_empty()
    }
}
