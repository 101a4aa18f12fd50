//! JobInvoker port - 計算ノードへのジョブ実行依頼
//!
//! Node selection, serialization and transport live behind this trait.
//! The dispatcher only requires that every invocation ends in exactly one
//! result or one error.

use async_trait::async_trait;

use crate::domain::{CalculationJob, CalculationJobResult};
use crate::error::InvocationError;

/// Runs a job on some compute node.
///
/// - `Ok(result)`: per-item outcomes, possibly containing step failures
/// - `Err(_)`: no outcome at all (node lost, timeout); the dispatcher bisects
#[async_trait]
pub trait JobInvoker: Send + Sync {
    async fn invoke(&self, job: CalculationJob) -> Result<CalculationJobResult, InvocationError>;
}
