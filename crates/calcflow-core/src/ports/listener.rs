//! Result listener ports

use crate::domain::{CalculationJobResult, ViewComputationResultModel, ViewDeltaResultModel};

/// Receives the full result of each cycle.
pub trait ComputationResultListener: Send + Sync {
    fn result_received(&self, result: &ViewComputationResultModel);
}

/// Receives the changes of each cycle.
pub trait DeltaResultListener: Send + Sync {
    fn delta_result_received(&self, delta: &ViewDeltaResultModel);
}

/// Receives the result of a dispatched job.
///
/// Called once per job, from whichever task completed it.
pub trait JobResultReceiver: Send + Sync {
    fn result_received(&self, result: CalculationJobResult);
}
