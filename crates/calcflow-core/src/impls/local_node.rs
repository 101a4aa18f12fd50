//! LocalNodeJobInvoker - runs jobs in-process.
//!
//! # 実行モデル
//! - items run in order; a failed item does not stop the job
//! - private outputs stay in a map local to the job, shared outputs go to the
//!   cycle's computation cache
//! - an item whose input is missing fails with `MissingInput`
//! - a job whose cycle caches are already released is `Abandoned`

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use tracing::{debug, trace};

use crate::domain::{
    CacheSelectHint, CalculationJob, CalculationJobItem, CalculationJobResult, CalculationJobResultItem,
    ComputedValue, ValueSpecification,
};
use crate::error::{FunctionError, InvocationError};
use crate::impls::computation_cache::{ViewComputationCache, ViewComputationCacheSource};
use crate::impls::function::{FunctionExecutionContext, FunctionRepository};
use crate::ports::JobInvoker;

pub struct LocalNodeJobInvoker {
    node_id: String,
    functions: Arc<FunctionRepository>,
    caches: Arc<ViewComputationCacheSource>,
}

impl LocalNodeJobInvoker {
    pub fn new(
        node_id: impl Into<String>,
        functions: Arc<FunctionRepository>,
        caches: Arc<ViewComputationCacheSource>,
    ) -> Self {
        Self {
            node_id: node_id.into(),
            functions,
            caches,
        }
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    async fn execute_item(
        &self,
        job: &CalculationJob,
        item: &CalculationJobItem,
        cache: &ViewComputationCache,
        private: &mut HashMap<ValueSpecification, serde_json::Value>,
    ) -> Result<(), FunctionError> {
        let function = self.functions.get(&item.function_id)?;

        let mut inputs = Vec::with_capacity(item.inputs.len());
        for input in &item.inputs {
            let value = private
                .get(input)
                .cloned()
                .or_else(|| cache.shared_value(input))
                .ok_or_else(|| FunctionError::MissingInput(input.to_string()))?;
            inputs.push(ComputedValue::new(input.clone(), value));
        }

        let ctx = FunctionExecutionContext::new(job.specification().valuation_time, item, inputs, cache);
        let values = function.execute(&ctx).await?;
        if values.len() != item.outputs.len() {
            return Err(FunctionError::Execution(format!(
                "{} returned {} values for {} outputs",
                item.function_id,
                values.len(),
                item.outputs.len()
            )));
        }

        store_outputs(job.cache_hint(), cache, private, item, values);
        Ok(())
    }
}

fn store_outputs(
    hint: &CacheSelectHint,
    cache: &ViewComputationCache,
    private: &mut HashMap<ValueSpecification, serde_json::Value>,
    item: &CalculationJobItem,
    values: Vec<serde_json::Value>,
) {
    for (output, value) in item.outputs.iter().zip(values) {
        if hint.is_private_value(output) {
            private.insert(output.clone(), value);
        } else {
            cache.put_shared_value(output.clone(), value);
        }
    }
}

#[async_trait]
impl JobInvoker for LocalNodeJobInvoker {
    async fn invoke(&self, job: CalculationJob) -> Result<CalculationJobResult, InvocationError> {
        let specification = job.specification();
        let Some(cache) = self
            .caches
            .find(specification.cycle_id, &specification.calc_config_name)
        else {
            debug!(
                job_id = %job.job_id(),
                cycle_id = %specification.cycle_id,
                calc_config = %specification.calc_config_name,
                "no computation cache, cycle already released"
            );
            return Err(InvocationError::Abandoned { job_id: job.job_id() });
        };

        let started = Instant::now();
        let mut private = HashMap::new();
        let mut outcomes = Vec::with_capacity(job.items().len());
        for item in job.items() {
            let outcome = match self.execute_item(&job, item, &cache, &mut private).await {
                Ok(()) => CalculationJobResultItem::Success,
                Err(err) => {
                    debug!(
                        job_id = %job.job_id(),
                        function_id = %item.function_id,
                        target = %item.target,
                        error = %err,
                        "item failed"
                    );
                    CalculationJobResultItem::failure(item.function_id.clone(), err.to_string())
                }
            };
            outcomes.push(outcome);
        }
        trace!(job_id = %job.job_id(), private = private.len(), "job finished");

        Ok(CalculationJobResult::new(
            specification.clone(),
            started.elapsed(),
            outcomes,
            self.node_id.clone(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{
        CalculationJobSpecification, ComputationTarget, CycleId, JobId, LIVE_DATA_SOURCING_FUNCTION,
    };
    use crate::impls::function::ExecutionFunction;
    use chrono::Utc;
    use serde_json::json;

    fn target() -> ComputationTarget {
        ComputationTarget::primitive("EURUSD")
    }

    fn spec(name: &str, function: &str) -> ValueSpecification {
        ValueSpecification::new(name, target(), function)
    }

    struct Node {
        invoker: LocalNodeJobInvoker,
        caches: Arc<ViewComputationCacheSource>,
        cycle_id: CycleId,
    }

    fn node() -> Node {
        let mut functions = FunctionRepository::with_live_data_sourcing();
        functions
            .register("double", Arc::new(ExecutionFunction::numeric(|ctx| Ok(ctx.input_f64("Spot")? * 2.0))))
            .unwrap();
        functions
            .register("broken", Arc::new(ExecutionFunction::failing("boom")))
            .unwrap();
        let caches = Arc::new(ViewComputationCacheSource::new());
        Node {
            invoker: LocalNodeJobInvoker::new("node-1", Arc::new(functions), caches.clone()),
            caches,
            cycle_id: CycleId::generate(),
        }
    }

    fn job(node: &Node, items: Vec<CalculationJobItem>, hint: CacheSelectHint) -> CalculationJob {
        let specification = CalculationJobSpecification::new(node.cycle_id, "Default", Utc::now(), JobId::new(1));
        CalculationJob::new(specification, items, hint).unwrap()
    }

    fn sourcing() -> CalculationJobItem {
        CalculationJobItem::new(
            LIVE_DATA_SOURCING_FUNCTION,
            target(),
            Vec::new(),
            vec![spec("Spot", LIVE_DATA_SOURCING_FUNCTION)],
        )
    }

    fn doubling() -> CalculationJobItem {
        CalculationJobItem::new(
            "double",
            target(),
            vec![spec("Spot", LIVE_DATA_SOURCING_FUNCTION)],
            vec![spec("Double", "double")],
        )
    }

    #[tokio::test]
    async fn runs_items_in_order_through_the_cache() {
        let node = node();
        let cache = node.caches.get_or_create(node.cycle_id, "Default");
        cache.put_live_data(sourcing().outputs[0].requirement(), json!(1.5));

        let result = node
            .invoker
            .invoke(job(&node, vec![sourcing(), doubling()], CacheSelectHint::all_shared()))
            .await
            .unwrap();

        assert!(result.is_success());
        assert_eq!(result.compute_node_id, "node-1");
        assert_eq!(cache.shared_value(&spec("Double", "double")), Some(json!(3.0)));
    }

    #[tokio::test]
    async fn private_values_never_reach_the_cache() {
        let node = node();
        let cache = node.caches.get_or_create(node.cycle_id, "Default");
        cache.put_live_data(sourcing().outputs[0].requirement(), json!(1.5));
        let hint = CacheSelectHint::private_values([spec("Spot", LIVE_DATA_SOURCING_FUNCTION)]);

        let result = node
            .invoker
            .invoke(job(&node, vec![sourcing(), doubling()], hint))
            .await
            .unwrap();

        assert!(result.is_success());
        assert_eq!(cache.shared_value(&spec("Spot", LIVE_DATA_SOURCING_FUNCTION)), None);
        assert_eq!(cache.shared_value(&spec("Double", "double")), Some(json!(3.0)));
    }

    #[tokio::test]
    async fn failures_are_reported_per_item() {
        let node = node();
        node.caches.get_or_create(node.cycle_id, "Default");
        let broken = CalculationJobItem::new("broken", target(), Vec::new(), vec![spec("X", "broken")]);
        let unknown = CalculationJobItem::new("unknown", target(), Vec::new(), vec![spec("Y", "unknown")]);

        let result = node
            .invoker
            .invoke(job(&node, vec![broken, doubling(), unknown], CacheSelectHint::all_shared()))
            .await
            .unwrap();

        assert_eq!(result.failure_count(), 3);
        assert_eq!(
            result.items[0],
            CalculationJobResultItem::failure("broken", "boom")
        );
        assert!(matches!(
            &result.items[1],
            CalculationJobResultItem::Failure { message, .. } if message.starts_with("missing input")
        ));
    }

    #[tokio::test]
    async fn released_cycle_abandons_the_invocation() {
        let node = node();
        let err = node
            .invoker
            .invoke(job(&node, vec![sourcing()], CacheSelectHint::all_shared()))
            .await
            .unwrap_err();
        assert_eq!(err, InvocationError::Abandoned { job_id: JobId::new(1) });
    }
}
