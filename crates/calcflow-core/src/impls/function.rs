//! Calculation functions and the repository compute nodes look them up in.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::{CalculationJobItem, ComputationTarget, ComputedValue, ValueRequirement, LIVE_DATA_SOURCING_FUNCTION};
use crate::error::FunctionError;
use crate::impls::computation_cache::ViewComputationCache;

/// What a function sees while running one item.
pub struct FunctionExecutionContext<'a> {
    pub valuation_time: DateTime<Utc>,
    pub item: &'a CalculationJobItem,
    /// Resolved inputs, in `item.inputs` order.
    pub inputs: Vec<ComputedValue>,
    cache: &'a ViewComputationCache,
}

impl<'a> FunctionExecutionContext<'a> {
    pub fn new(
        valuation_time: DateTime<Utc>,
        item: &'a CalculationJobItem,
        inputs: Vec<ComputedValue>,
        cache: &'a ViewComputationCache,
    ) -> Self {
        Self {
            valuation_time,
            item,
            inputs,
            cache,
        }
    }

    pub fn target(&self) -> &ComputationTarget {
        &self.item.target
    }

    pub fn parameters(&self) -> &serde_json::Value {
        &self.item.parameters
    }

    /// First input named `value_name`.
    pub fn input(&self, value_name: &str) -> Option<&serde_json::Value> {
        self.inputs
            .iter()
            .find(|input| input.specification.value_name == value_name)
            .map(|input| &input.value)
    }

    /// Like `input`, but as a number.
    pub fn input_f64(&self, value_name: &str) -> Result<f64, FunctionError> {
        self.input(value_name)
            .and_then(serde_json::Value::as_f64)
            .ok_or_else(|| FunctionError::MissingInput(value_name.to_string()))
    }

    /// Live data of the cycle this item belongs to.
    pub fn live_data(&self, requirement: &ValueRequirement) -> Option<serde_json::Value> {
        self.cache.live_data(requirement)
    }
}

/// A function that computes the outputs of one job item.
///
/// Returns one value per entry of `ctx.item.outputs`, in order.
#[async_trait]
pub trait CalculationFunction: Send + Sync {
    async fn execute(&self, ctx: &FunctionExecutionContext<'_>) -> Result<Vec<serde_json::Value>, FunctionError>;
}

/// Copies the cycle's live data into the item's outputs.
pub struct LiveDataSourcingFunction;

#[async_trait]
impl CalculationFunction for LiveDataSourcingFunction {
    async fn execute(&self, ctx: &FunctionExecutionContext<'_>) -> Result<Vec<serde_json::Value>, FunctionError> {
        ctx.item
            .outputs
            .iter()
            .map(|output| {
                let requirement = output.requirement();
                ctx.live_data(&requirement)
                    .ok_or_else(|| FunctionError::MissingInput(requirement.to_string()))
            })
            .collect()
    }
}

type ExecuteFn = dyn Fn(&FunctionExecutionContext<'_>) -> Result<Vec<serde_json::Value>, FunctionError> + Send + Sync;

/// A function backed by a closure.
pub struct ExecutionFunction {
    execute: Box<ExecuteFn>,
}

impl ExecutionFunction {
    pub fn new<F>(execute: F) -> Self
    where
        F: Fn(&FunctionExecutionContext<'_>) -> Result<Vec<serde_json::Value>, FunctionError> + Send + Sync + 'static,
    {
        Self {
            execute: Box::new(execute),
        }
    }

    /// A single-output function computing from numeric inputs.
    pub fn numeric<F>(compute: F) -> Self
    where
        F: Fn(&FunctionExecutionContext<'_>) -> Result<f64, FunctionError> + Send + Sync + 'static,
    {
        Self::new(move |ctx| Ok(vec![serde_json::Value::from(compute(ctx)?)]))
    }

    /// Always fails with `message`.
    pub fn failing(message: impl Into<String>) -> Self {
        let message = message.into();
        Self::new(move |_| Err(FunctionError::Execution(message.clone())))
    }
}

#[async_trait]
impl CalculationFunction for ExecutionFunction {
    async fn execute(&self, ctx: &FunctionExecutionContext<'_>) -> Result<Vec<serde_json::Value>, FunctionError> {
        (self.execute)(ctx)
    }
}

/// Registry of functions (function id -> function).
///
/// Built during initialization, then shared read-only by compute nodes.
#[derive(Default)]
pub struct FunctionRepository {
    functions: HashMap<String, Arc<dyn CalculationFunction>>,
}

impl FunctionRepository {
    pub fn new() -> Self {
        Self {
            functions: HashMap::new(),
        }
    }

    /// A repository that already knows how to source live data.
    pub fn with_live_data_sourcing() -> Self {
        let mut functions = HashMap::new();
        functions.insert(
            LIVE_DATA_SOURCING_FUNCTION.to_string(),
            Arc::new(LiveDataSourcingFunction) as Arc<dyn CalculationFunction>,
        );
        Self { functions }
    }

    pub fn register(
        &mut self,
        function_id: impl Into<String>,
        function: Arc<dyn CalculationFunction>,
    ) -> Result<(), FunctionError> {
        let function_id = function_id.into();
        if self.functions.contains_key(&function_id) {
            return Err(FunctionError::DuplicateFunction(function_id));
        }
        self.functions.insert(function_id, function);
        Ok(())
    }

    pub fn get(&self, function_id: &str) -> Result<&Arc<dyn CalculationFunction>, FunctionError> {
        self.functions
            .get(function_id)
            .ok_or_else(|| FunctionError::FunctionNotFound(function_id.to_string()))
    }

    pub fn len(&self) -> usize {
        self.functions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{CycleId, ValueSpecification};
    use serde_json::json;

    fn spot_item() -> CalculationJobItem {
        let target = ComputationTarget::primitive("EURUSD");
        CalculationJobItem::new(
            LIVE_DATA_SOURCING_FUNCTION,
            target.clone(),
            Vec::new(),
            vec![ValueSpecification::new("Spot", target, LIVE_DATA_SOURCING_FUNCTION)],
        )
    }

    #[tokio::test]
    async fn live_data_sourcing_copies_the_snapshot_value() {
        let cache = ViewComputationCache::new(CycleId::generate(), "Default");
        let item = spot_item();
        cache.put_live_data(item.outputs[0].requirement(), json!(1.25));
        let ctx = FunctionExecutionContext::new(Utc::now(), &item, Vec::new(), &cache);

        let values = LiveDataSourcingFunction.execute(&ctx).await.unwrap();
        assert_eq!(values, vec![json!(1.25)]);
    }

    #[tokio::test]
    async fn live_data_sourcing_fails_without_a_value() {
        let cache = ViewComputationCache::new(CycleId::generate(), "Default");
        let item = spot_item();
        let ctx = FunctionExecutionContext::new(Utc::now(), &item, Vec::new(), &cache);

        let err = LiveDataSourcingFunction.execute(&ctx).await.unwrap_err();
        assert!(matches!(err, FunctionError::MissingInput(_)));
    }

    #[test]
    fn repository_rejects_duplicates() {
        let mut repository = FunctionRepository::with_live_data_sourcing();
        let err = repository
            .register(LIVE_DATA_SOURCING_FUNCTION, Arc::new(ExecutionFunction::failing("x")))
            .unwrap_err();
        assert_eq!(err, FunctionError::DuplicateFunction(LIVE_DATA_SOURCING_FUNCTION.to_string()));
        assert_eq!(repository.len(), 1);
    }

    #[test]
    fn missing_function_is_reported_by_id() {
        let repository = FunctionRepository::new();
        let err = repository.get("pv").err();
        assert_eq!(err, Some(FunctionError::FunctionNotFound("pv".to_string())));
    }

    #[tokio::test]
    async fn numeric_function_reads_named_inputs() {
        let cache = ViewComputationCache::new(CycleId::generate(), "Default");
        let target = ComputationTarget::primitive("EURUSD");
        let spot = ValueSpecification::new("Spot", target.clone(), LIVE_DATA_SOURCING_FUNCTION);
        let item = CalculationJobItem::new(
            "double",
            target.clone(),
            vec![spot.clone()],
            vec![ValueSpecification::new("Double", target, "double")],
        );
        let ctx = FunctionExecutionContext::new(Utc::now(), &item, vec![ComputedValue::new(spot, json!(2.5))], &cache);
        let double = ExecutionFunction::numeric(|ctx| Ok(ctx.input_f64("Spot")? * 2.0));

        assert_eq!(double.execute(&ctx).await.unwrap(), vec![json!(5.0)]);
    }
}
