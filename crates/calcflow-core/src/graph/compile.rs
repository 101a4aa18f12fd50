//! Turns a view calculation configuration into a job tree for one cycle.
//!
//! # ジョブ構成
//! - root: one `live-data-sourcing` item per live data requirement that is
//!   available this cycle; missing live data is left out, not blacklisted
//! - one tail per derived value, in dependency order, waiting for the jobs
//!   that produce its inputs
//!
//! A tail hangs off the most recently built of its predecessors, so by the
//! time it is waiting to be released every earlier predecessor is already
//! in flight or done.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::domain::{
    CacheSelectHint, CalculationJob, CalculationJobItem, CalculationJobSpecification, CycleId,
    DerivedValue, JobId, ValueRequirement, ValueSpecification, ViewCalculationConfiguration,
    ViewDefinition, LIVE_DATA_SOURCING_FUNCTION,
};
use crate::error::ViewProcessorError;
use crate::graph::dependency::DependencyGraph;
use crate::ports::{FunctionBlacklistQuery, JobIdSource, LiveDataAvailabilityProvider};

/// The job tree of one calculation configuration, plus what to report.
#[derive(Debug, Clone)]
pub struct CompiledCalcConfig {
    pub calc_config_name: String,
    pub job: CalculationJob,
    /// Values that appear in view results, in definition order.
    pub terminal_outputs: Vec<ValueSpecification>,
}

/// Shared inputs of one compilation.
pub struct CompileContext<'a> {
    pub cycle_id: CycleId,
    pub valuation_time: DateTime<Utc>,
    pub job_ids: &'a JobIdSource,
    pub blacklist: &'a dyn FunctionBlacklistQuery,
    /// Live data present in the cycle's snapshot.
    pub live_data: &'a dyn LiveDataAvailabilityProvider,
}

/// Check that no calculation configuration of `definition` is cyclic.
pub fn validate_view_definition(definition: &ViewDefinition) -> Result<(), ViewProcessorError> {
    for config in &definition.calc_configs {
        value_graph(config)
            .topological_order()
            .map_err(|values| cycle_error(definition, values))?;
    }
    Ok(())
}

/// Compile every calculation configuration of `definition`. Configurations
/// with nothing left to compute are omitted.
pub fn compile_view(
    definition: &ViewDefinition,
    ctx: &CompileContext<'_>,
) -> Result<Vec<CompiledCalcConfig>, ViewProcessorError> {
    let mut compiled = Vec::with_capacity(definition.calc_configs.len());
    for config in &definition.calc_configs {
        if let Some(config) = compile_calc_config(definition, config, ctx)? {
            compiled.push(config);
        }
    }
    Ok(compiled)
}

pub fn compile_calc_config(
    definition: &ViewDefinition,
    config: &ViewCalculationConfiguration,
    ctx: &CompileContext<'_>,
) -> Result<Option<CompiledCalcConfig>, ViewProcessorError> {
    let graph = value_graph(config);
    let order = graph
        .topological_order()
        .map_err(|values| cycle_error(definition, values))?;

    let derived: HashMap<ValueRequirement, &DerivedValue> = config
        .derived
        .iter()
        .map(|value| (value.requirement(), value))
        .collect();

    let mut planner = Planner::new(config, ctx);
    let mut terminal_outputs = Vec::new();

    for requirement in &config.live_data {
        if ctx.blacklist.is_blacklisted(LIVE_DATA_SOURCING_FUNCTION, &requirement.target) {
            warn!(requirement = %requirement, "live data sourcing is blacklisted, skipping");
            continue;
        }
        if !ctx.live_data.is_available(requirement) {
            debug!(requirement = %requirement, "live data not available this cycle, skipping");
            continue;
        }
        let specification = ViewCalculationConfiguration::live_data_specification(requirement);
        planner.add_live_data(requirement, specification.clone());
        terminal_outputs.push(specification);
    }

    for requirement in order {
        let Some(value) = derived.get(&requirement) else {
            continue;
        };
        if ctx.blacklist.is_blacklisted(&value.function_id, &value.target) {
            warn!(
                value = %requirement,
                function_id = %value.function_id,
                "function is blacklisted for target, skipping"
            );
            continue;
        }
        // values read by another job must reach the shared cache
        let private = !value.output && graph.dependents(&requirement).is_empty();
        if planner.add_derived(value, private)? && value.output {
            terminal_outputs.push(value.specification());
        }
    }

    let Some(job) = planner.finish()? else {
        debug!(calc_config = %config.name, "nothing to compute");
        return Ok(None);
    };
    debug!(
        calc_config = %config.name,
        job_id = %job.job_id(),
        jobs = job.job_count(),
        "compiled calculation configuration"
    );
    Ok(Some(CompiledCalcConfig {
        calc_config_name: config.name.clone(),
        job,
        terminal_outputs,
    }))
}

fn value_graph(config: &ViewCalculationConfiguration) -> DependencyGraph<ValueRequirement> {
    let mut graph = DependencyGraph::new();
    for requirement in &config.live_data {
        graph.add_node(requirement.clone());
    }
    for value in &config.derived {
        let requirement = value.requirement();
        graph.add_node(requirement.clone());
        for input in &value.inputs {
            graph.add_dependency(requirement.clone(), input.clone());
        }
    }
    graph
}

fn cycle_error(definition: &ViewDefinition, values: Vec<ValueRequirement>) -> ViewProcessorError {
    ViewProcessorError::DependencyCycle {
        definition: definition.name.clone(),
        values: values.iter().map(ToString::to_string).collect(),
    }
}

struct PlannedJob {
    job: CalculationJob,
    parent: Option<usize>,
}

/// Builds the job arena; jobs only ever point at earlier jobs.
struct Planner<'a> {
    config: &'a ViewCalculationConfiguration,
    ctx: &'a CompileContext<'a>,
    live_items: Vec<CalculationJobItem>,
    jobs: Vec<PlannedJob>,
    /// Where each available value comes from. `None` marks live data, which
    /// the root job sources.
    producers: BTreeMap<ValueRequirement, (ValueSpecification, Option<usize>)>,
}

impl<'a> Planner<'a> {
    fn new(config: &'a ViewCalculationConfiguration, ctx: &'a CompileContext<'a>) -> Self {
        Self {
            config,
            ctx,
            live_items: Vec::new(),
            jobs: Vec::new(),
            producers: BTreeMap::new(),
        }
    }

    fn specification(&self) -> CalculationJobSpecification {
        CalculationJobSpecification::new(
            self.ctx.cycle_id,
            self.config.name.clone(),
            self.ctx.valuation_time,
            self.ctx.job_ids.next_id(),
        )
    }

    fn add_live_data(&mut self, requirement: &ValueRequirement, specification: ValueSpecification) {
        let item = CalculationJobItem::new(
            LIVE_DATA_SOURCING_FUNCTION,
            requirement.target.clone(),
            Vec::new(),
            vec![specification.clone()],
        );
        self.live_items.push(item);
        self.producers.insert(requirement.clone(), (specification, None));
    }

    /// The root job is built on first use so its id precedes every tail.
    fn root(&mut self) -> Result<Option<usize>, ViewProcessorError> {
        if !self.jobs.is_empty() {
            return Ok(Some(0));
        }
        if self.live_items.is_empty() {
            return Ok(None);
        }
        let items = std::mem::take(&mut self.live_items);
        let job = CalculationJob::new(self.specification(), items, CacheSelectHint::all_shared())?;
        self.jobs.push(PlannedJob { job, parent: None });
        Ok(Some(0))
    }

    /// Schedule `value`. Returns false when one of its inputs is not
    /// available this cycle.
    fn add_derived(&mut self, value: &DerivedValue, private: bool) -> Result<bool, ViewProcessorError> {
        let mut inputs = Vec::with_capacity(value.inputs.len());
        let mut predecessors: Vec<usize> = Vec::new();
        for input in &value.inputs {
            let Some((specification, producer)) = self.producers.get(input).cloned() else {
                debug!(
                    value = %value.requirement(),
                    input = %input,
                    "input not available, skipping"
                );
                return Ok(false);
            };
            let producer = match producer {
                Some(index) => index,
                None => self.root()?.unwrap_or_default(),
            };
            predecessors.push(producer);
            inputs.push(specification);
        }

        let parent = match predecessors.iter().max().copied() {
            Some(parent) => Some(parent),
            None => self.root()?,
        };
        let specification = value.specification();
        let item = CalculationJobItem::new(
            value.function_id.clone(),
            value.target.clone(),
            inputs,
            vec![specification.clone()],
        )
        .with_parameters(value.parameters.clone());
        let hint = if private {
            CacheSelectHint::private_values([specification.clone()])
        } else {
            CacheSelectHint::all_shared()
        };
        let mut job = CalculationJob::new(self.specification(), vec![item], hint)?;

        if let Some(parent) = parent {
            let parent_id = self.jobs[parent].job.job_id();
            let mut required: Vec<JobId> = predecessors
                .iter()
                .map(|&index| self.jobs[index].job.job_id())
                .collect();
            if required.is_empty() {
                required.push(parent_id);
            }
            required.sort();
            required.dedup();
            job = job.with_required_job_ids(required);
        }

        self.jobs.push(PlannedJob { job, parent });
        self.producers
            .insert(value.requirement(), (specification, Some(self.jobs.len() - 1)));
        Ok(true)
    }

    /// Fold the arena into one tree, children before parents.
    fn finish(mut self) -> Result<Option<CalculationJob>, ViewProcessorError> {
        self.root()?;
        while self.jobs.len() > 1 {
            let Some(PlannedJob { job, parent }) = self.jobs.pop() else {
                break;
            };
            let parent = parent.unwrap_or_default();
            self.jobs[parent].job.add_tail(job)?;
        }
        Ok(self.jobs.pop().map(|planned| planned.job))
    }
}
