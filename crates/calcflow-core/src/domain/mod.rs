//! Domain model (ids, values, jobs, results, views).

pub mod cache_hint;
pub mod ids;
pub mod job;
pub mod result;
pub mod result_model;
pub mod state;
pub mod value;
pub mod view;

pub use cache_hint::CacheSelectHint;
pub use ids::{CycleId, JobId, ViewClientId, ViewProcessId};
pub use job::{CalculationJob, CalculationJobItem, CalculationJobSpecification};
pub use result::{CalculationJobResult, CalculationJobResultItem};
pub use result_model::{ViewCalculationResultModel, ViewComputationResultModel, ViewDeltaResultModel};
pub use state::ViewProcessState;
pub use value::{ComputationTarget, ComputedValue, TargetKind, ValueRequirement, ValueSpecification};
pub use view::{
    DerivedValue, ExecutionMode, ExecutionOptions, ViewCalculationConfiguration, ViewDefinition,
    LIVE_DATA_SOURCING_FUNCTION,
};
