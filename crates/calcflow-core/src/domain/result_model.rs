//! View-level result models: what listeners receive after each cycle.
//!
//! Both models map calc configuration name → target → value name → value.
//! A full model holds every value of the cycle; a delta model only the values
//! that changed since the previous cycle.

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

use crate::domain::ids::{CycleId, ViewProcessId};
use crate::domain::value::{ComputationTarget, ComputedValue};

/// Values of one calc configuration, grouped by target.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ViewCalculationResultModel {
    values: BTreeMap<ComputationTarget, BTreeMap<String, ComputedValue>>,
}

impl ViewCalculationResultModel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, value: ComputedValue) {
        let target = value.specification.target.clone();
        let name = value.specification.value_name.clone();
        self.values.entry(target).or_default().insert(name, value);
    }

    pub fn all_targets(&self) -> impl Iterator<Item = &ComputationTarget> {
        self.values.keys()
    }

    pub fn values(&self, target: &ComputationTarget) -> Option<&BTreeMap<String, ComputedValue>> {
        self.values.get(target)
    }

    pub fn get(&self, target: &ComputationTarget, value_name: &str) -> Option<&ComputedValue> {
        self.values.get(target).and_then(|values| values.get(value_name))
    }

    pub fn iter(&self) -> impl Iterator<Item = &ComputedValue> {
        self.values.values().flat_map(|values| values.values())
    }

    pub fn len(&self) -> usize {
        self.values.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Overlay `other` on top of this model; the later value wins.
    fn overlay(&mut self, other: &ViewCalculationResultModel) {
        for value in other.iter() {
            self.insert(value.clone());
        }
    }
}

/// Every value computed in one cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct ViewComputationResultModel {
    pub view_process_id: ViewProcessId,
    pub cycle_id: CycleId,
    pub valuation_time: DateTime<Utc>,
    pub result_timestamp: DateTime<Utc>,
    calc_results: BTreeMap<String, ViewCalculationResultModel>,
}

impl ViewComputationResultModel {
    pub fn new(
        view_process_id: ViewProcessId,
        cycle_id: CycleId,
        valuation_time: DateTime<Utc>,
        result_timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            view_process_id,
            cycle_id,
            valuation_time,
            result_timestamp,
            calc_results: BTreeMap::new(),
        }
    }

    pub fn add_value(&mut self, calc_config_name: &str, value: ComputedValue) {
        self.calc_results
            .entry(calc_config_name.to_string())
            .or_default()
            .insert(value);
    }

    pub fn calculation_configuration_names(&self) -> impl Iterator<Item = &str> {
        self.calc_results.keys().map(String::as_str)
    }

    pub fn calculation_result(&self, calc_config_name: &str) -> Option<&ViewCalculationResultModel> {
        self.calc_results.get(calc_config_name)
    }

    /// Values that differ from `previous` (or all of them if there is none).
    pub fn delta_from(&self, previous: Option<&ViewComputationResultModel>) -> ViewDeltaResultModel {
        let mut delta = ViewDeltaResultModel {
            view_process_id: self.view_process_id,
            cycle_id: self.cycle_id,
            valuation_time: self.valuation_time,
            result_timestamp: self.result_timestamp,
            previous_result_timestamp: previous.map(|p| p.result_timestamp),
            calc_results: BTreeMap::new(),
        };
        for (name, calc) in &self.calc_results {
            let before = previous.and_then(|p| p.calculation_result(name));
            for value in calc.iter() {
                let unchanged = before
                    .and_then(|b| b.get(&value.specification.target, &value.specification.value_name))
                    .is_some_and(|old| old.value == value.value);
                if !unchanged {
                    delta.add_value(name, value.clone());
                }
            }
        }
        delta
    }
}

/// Values that changed in one cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct ViewDeltaResultModel {
    pub view_process_id: ViewProcessId,
    pub cycle_id: CycleId,
    pub valuation_time: DateTime<Utc>,
    pub result_timestamp: DateTime<Utc>,
    pub previous_result_timestamp: Option<DateTime<Utc>>,
    calc_results: BTreeMap<String, ViewCalculationResultModel>,
}

impl ViewDeltaResultModel {
    pub fn add_value(&mut self, calc_config_name: &str, value: ComputedValue) {
        self.calc_results
            .entry(calc_config_name.to_string())
            .or_default()
            .insert(value);
    }

    pub fn calculation_configuration_names(&self) -> impl Iterator<Item = &str> {
        self.calc_results.keys().map(String::as_str)
    }

    pub fn calculation_result(&self, calc_config_name: &str) -> Option<&ViewCalculationResultModel> {
        self.calc_results.get(calc_config_name)
    }

    pub fn is_empty(&self) -> bool {
        self.calc_results.values().all(ViewCalculationResultModel::is_empty)
    }

    /// Fold a later delta into this one. The merged delta spans from this
    /// delta's previous timestamp to the later one's result.
    pub fn merge(&mut self, later: &ViewDeltaResultModel) {
        self.cycle_id = later.cycle_id;
        self.valuation_time = later.valuation_time;
        self.result_timestamp = later.result_timestamp;
        for (name, calc) in &later.calc_results {
            self.calc_results.entry(name.clone()).or_default().overlay(calc);
        }
    }
}
