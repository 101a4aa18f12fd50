//! InMemoryFunctionBlacklist - 失敗した (function, target) の記録
//!
//! Every report is counted; reporting the same item twice counts twice.

use dashmap::DashMap;
use tracing::info;

use crate::domain::{CalculationJobItem, ComputationTarget};
use crate::ports::{FunctionBlacklistMaintainer, FunctionBlacklistQuery};

#[derive(Debug, Default)]
pub struct InMemoryFunctionBlacklist {
    failures: DashMap<(String, ComputationTarget), u32>,
}

impl InMemoryFunctionBlacklist {
    pub fn new() -> Self {
        Self::default()
    }

    /// How often the pair has been reported.
    pub fn failure_count(&self, function_id: &str, target: &ComputationTarget) -> u32 {
        self.failures
            .get(&(function_id.to_string(), target.clone()))
            .map_or(0, |count| *count)
    }

    pub fn len(&self) -> usize {
        self.failures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.failures.is_empty()
    }

    /// Forget every entry.
    pub fn clear(&self) {
        self.failures.clear();
    }
}

impl FunctionBlacklistMaintainer for InMemoryFunctionBlacklist {
    fn failed_job_item(&self, item: &CalculationJobItem) {
        let mut count = self
            .failures
            .entry((item.function_id.clone(), item.target.clone()))
            .or_insert(0);
        *count += 1;
        info!(
            function_id = %item.function_id,
            target = %item.target,
            reports = *count,
            "function blacklisted for target"
        );
    }
}

impl FunctionBlacklistQuery for InMemoryFunctionBlacklist {
    fn is_blacklisted(&self, function_id: &str, target: &ComputationTarget) -> bool {
        self.failure_count(function_id, target) > 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(function: &str, target: &str) -> CalculationJobItem {
        CalculationJobItem::new(function, ComputationTarget::primitive(target), Vec::new(), Vec::new())
    }

    #[test]
    fn reported_pairs_are_blacklisted() {
        let blacklist = InMemoryFunctionBlacklist::new();
        blacklist.failed_job_item(&item("pv", "SWAP-1"));

        assert!(blacklist.is_blacklisted("pv", &ComputationTarget::primitive("SWAP-1")));
        assert!(!blacklist.is_blacklisted("pv", &ComputationTarget::primitive("SWAP-2")));
        assert!(!blacklist.is_blacklisted("delta", &ComputationTarget::primitive("SWAP-1")));
    }

    #[test]
    fn double_reports_are_counted_not_merged() {
        let blacklist = InMemoryFunctionBlacklist::new();
        blacklist.failed_job_item(&item("pv", "SWAP-1"));
        blacklist.failed_job_item(&item("pv", "SWAP-1"));

        assert_eq!(blacklist.failure_count("pv", &ComputationTarget::primitive("SWAP-1")), 2);
        assert_eq!(blacklist.len(), 1);

        blacklist.clear();
        assert!(blacklist.is_empty());
    }
}
