//! Function blacklist ports
//!
//! Items that fail on their own (a single-item job that still fails) are
//! reported so later cycles can skip them.

use crate::domain::{CalculationJobItem, ComputationTarget};

/// Receives items that failed and cannot be split any further.
pub trait FunctionBlacklistMaintainer: Send + Sync {
    fn failed_job_item(&self, item: &CalculationJobItem);
}

/// Answers whether a function may still be applied to a target.
pub trait FunctionBlacklistQuery: Send + Sync {
    fn is_blacklisted(&self, function_id: &str, target: &ComputationTarget) -> bool;
}
