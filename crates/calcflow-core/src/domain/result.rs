//! Results reported by compute nodes.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::domain::ids::JobId;
use crate::domain::job::CalculationJobSpecification;

/// Outcome of one job item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "outcome")]
pub enum CalculationJobResultItem {
    Success,
    Failure { step_id: String, message: String },
}

impl CalculationJobResultItem {
    pub fn failure(step_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Failure {
            step_id: step_id.into(),
            message: message.into(),
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failure { .. })
    }
}

/// Per-item outcomes of one job, in item order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalculationJobResult {
    pub specification: CalculationJobSpecification,
    pub duration: Duration,
    pub items: Vec<CalculationJobResultItem>,
    pub compute_node_id: String,
}

impl CalculationJobResult {
    pub fn new(
        specification: CalculationJobSpecification,
        duration: Duration,
        items: Vec<CalculationJobResultItem>,
        compute_node_id: impl Into<String>,
    ) -> Self {
        Self {
            specification,
            duration,
            items,
            compute_node_id: compute_node_id.into(),
        }
    }

    /// A result in which every one of `item_count` items failed with `message`.
    pub fn all_failed(
        specification: CalculationJobSpecification,
        item_count: usize,
        compute_node_id: impl Into<String>,
        message: &str,
    ) -> Self {
        let step_id = specification.job_id.to_string();
        let items = (0..item_count)
            .map(|_| CalculationJobResultItem::failure(step_id.clone(), message))
            .collect();
        Self::new(specification, Duration::ZERO, items, compute_node_id)
    }

    pub fn job_id(&self) -> JobId {
        self.specification.job_id
    }

    /// Index of the first failed item.
    pub fn first_failure(&self) -> Option<usize> {
        self.items.iter().position(CalculationJobResultItem::is_failed)
    }

    pub fn is_success(&self) -> bool {
        self.first_failure().is_none()
    }

    pub fn failure_count(&self) -> usize {
        self.items.iter().filter(|item| item.is_failed()).count()
    }
}
