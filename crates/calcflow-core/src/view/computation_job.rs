//! ViewComputationJob - the cycle loop of one view process.
//!
//! One spawned task per process:
//! - the initial cycle runs immediately
//! - after that the task waits for a trigger; triggers arriving while a cycle
//!   runs collapse into a single re-run (`Notify` keeps at most one permit)
//! - cancellation stops the loop between or in the middle of cycles
//!
//! A cycle: snapshot live data → fill the caches → compile what the
//! snapshot can feed → dispatch →
//! collect every job result → build the full and delta results → hand both
//! to the process.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::dispatch::JobDispatcher;
use crate::domain::{
    CalculationJobResult, ComputedValue, CycleId, ExecutionMode, ExecutionOptions, ValueRequirement,
    ValueSpecification, ViewComputationResultModel, ViewDefinition, ViewProcessId,
};
use crate::graph::{compile_view, CompileContext, CompiledCalcConfig};
use crate::impls::ViewComputationCacheSource;
use crate::ports::{
    Clock, FunctionBlacklistQuery, IdGenerator, JobResultReceiver, LiveDataAvailabilityProvider,
    LiveDataListener, LiveDataSnapshotProvider,
};
use crate::view::process::ViewProcess;

/// Collaborators shared by every process of one processor.
#[derive(Clone)]
pub(crate) struct ComputationEnv {
    pub live_data: Arc<dyn LiveDataSnapshotProvider>,
    pub dispatcher: JobDispatcher,
    pub blacklist: Arc<dyn FunctionBlacklistQuery>,
    pub caches: Arc<ViewComputationCacheSource>,
    pub clock: Arc<dyn Clock>,
    pub ids: Arc<dyn IdGenerator>,
    pub cycle_timeout: Duration,
}

pub struct ViewComputationJob {
    process_id: ViewProcessId,
    definition: Arc<ViewDefinition>,
    options: ExecutionOptions,
    env: ComputationEnv,
    trigger: Notify,
    cycles_completed: AtomicU64,
    process: Weak<ViewProcess>,
}

impl ViewComputationJob {
    pub(crate) fn new(
        process_id: ViewProcessId,
        definition: Arc<ViewDefinition>,
        options: ExecutionOptions,
        env: ComputationEnv,
        process: Weak<ViewProcess>,
    ) -> Self {
        Self {
            process_id,
            definition,
            options,
            env,
            trigger: Notify::new(),
            cycles_completed: AtomicU64::new(0),
            process,
        }
    }

    pub fn process_id(&self) -> ViewProcessId {
        self.process_id
    }

    pub fn definition(&self) -> &ViewDefinition {
        &self.definition
    }

    pub fn options(&self) -> ExecutionOptions {
        self.options
    }

    /// Ask for another cycle. Requests made before the next cycle starts
    /// are coalesced.
    pub fn trigger_cycle(&self) {
        self.trigger.notify_one();
    }

    /// Cycles that produced a result.
    pub fn cycles_completed(&self) -> u64 {
        self.cycles_completed.load(Ordering::SeqCst)
    }

    pub(crate) fn spawn(self: &Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        if self.options.mode == ExecutionMode::RealTime {
            let listener: Arc<dyn LiveDataListener> = self.clone();
            self.env.live_data.add_listener(Arc::downgrade(&listener));
        }
        let job = Arc::clone(self);
        tokio::spawn(async move { job.run(cancel).await })
    }

    async fn run(self: Arc<Self>, cancel: CancellationToken) {
        info!(
            view_process_id = %self.process_id,
            view = %self.definition.name,
            mode = ?self.options.mode,
            "computation job started"
        );
        let mut previous: Option<ViewComputationResultModel> = None;
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = self.run_cycle(&mut previous) => {}
            }
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = self.trigger.notified() => {}
            }
        }
        info!(view_process_id = %self.process_id, "computation job stopped");
    }

    async fn run_cycle(&self, previous: &mut Option<ViewComputationResultModel>) {
        let cycle_id = self.env.ids.generate_cycle_id();
        let valuation_time = self.env.clock.now();
        let guard = CycleGuard {
            dispatcher: &self.env.dispatcher,
            caches: &self.env.caches,
            cycle_id,
        };

        let live_data = self.populate_live_data(cycle_id);
        let compiled = {
            let ctx = CompileContext {
                cycle_id,
                valuation_time,
                job_ids: self.env.dispatcher.job_ids(),
                blacklist: self.env.blacklist.as_ref(),
                live_data: &live_data,
            };
            match compile_view(&self.definition, &ctx) {
                Ok(compiled) => compiled,
                Err(err) => {
                    error!(view_process_id = %self.process_id, cycle_id = %cycle_id, error = %err, "cannot compile view");
                    return;
                }
            }
        };

        let (tx, mut rx) = mpsc::unbounded_channel();
        let collector: Arc<dyn JobResultReceiver> = Arc::new(CycleResultCollector { tx });
        let mut expected = 0;
        let mut reports: Vec<(String, Vec<ValueSpecification>)> = Vec::with_capacity(compiled.len());
        for CompiledCalcConfig {
            calc_config_name,
            job,
            terminal_outputs,
        } in compiled
        {
            let jobs = job.job_count();
            match self.env.dispatcher.dispatch(job, Arc::clone(&collector)) {
                Ok(()) => expected += jobs,
                Err(err) => error!(cycle_id = %cycle_id, calc_config = %calc_config_name, error = %err, "dispatch refused"),
            }
            reports.push((calc_config_name, terminal_outputs));
        }
        drop(collector);
        debug!(cycle_id = %cycle_id, jobs = expected, "cycle dispatched");

        let mut failures = 0;
        let collected = timeout(self.env.cycle_timeout, async {
            let mut received = 0;
            while received < expected {
                let Some(result) = rx.recv().await else {
                    break;
                };
                received += 1;
                failures += result.failure_count();
            }
            received
        })
        .await;
        match collected {
            Ok(received) if received == expected => {}
            Ok(received) => {
                warn!(cycle_id = %cycle_id, received, expected, "job results stopped arriving, abandoning cycle");
                return;
            }
            Err(_) => {
                warn!(
                    cycle_id = %cycle_id,
                    timeout_ms = self.env.cycle_timeout.as_millis() as u64,
                    "cycle timed out, abandoning it"
                );
                return;
            }
        }

        let mut full =
            ViewComputationResultModel::new(self.process_id, cycle_id, valuation_time, self.env.clock.now());
        for (calc_config_name, outputs) in &reports {
            let Some(cache) = self.env.caches.find(cycle_id, calc_config_name) else {
                continue;
            };
            for specification in outputs {
                if let Some(value) = cache.shared_value(specification) {
                    full.add_value(calc_config_name, ComputedValue::new(specification.clone(), value));
                }
            }
        }
        drop(guard);

        let delta = full.delta_from(previous.as_ref());
        info!(
            view_process_id = %self.process_id,
            cycle_id = %cycle_id,
            jobs = expected,
            failed_items = failures,
            "cycle completed"
        );
        if let Some(process) = self.process.upgrade() {
            process.cycle_completed(&full, &delta);
        }
        *previous = Some(full);
        self.cycles_completed.fetch_add(1, Ordering::SeqCst);
    }

    /// Copy one snapshot into the cycle's caches and return what it held.
    fn populate_live_data(&self, cycle_id: CycleId) -> CycleLiveData {
        let snapshot = self.env.live_data.snapshot();
        let mut present = CycleLiveData::default();
        for config in &self.definition.calc_configs {
            let cache = self.env.caches.get_or_create(cycle_id, &config.name);
            for requirement in &config.live_data {
                match self.env.live_data.query_snapshot(snapshot, requirement) {
                    Some(value) => {
                        cache.put_live_data(requirement.clone(), value);
                        present.0.insert(requirement.clone());
                    }
                    None => debug!(cycle_id = %cycle_id, requirement = %requirement, "no live data"),
                }
            }
        }
        self.env.live_data.release_snapshot(snapshot);
        present
    }
}

impl LiveDataListener for ViewComputationJob {
    fn live_data_changed(&self) {
        self.trigger_cycle();
    }
}

/// Ends a cycle however it ends: jobs still in flight are cancelled before
/// the caches they would read are released.
struct CycleGuard<'a> {
    dispatcher: &'a JobDispatcher,
    caches: &'a ViewComputationCacheSource,
    cycle_id: CycleId,
}

impl Drop for CycleGuard<'_> {
    fn drop(&mut self) {
        self.dispatcher.cancel_cycle(self.cycle_id);
        self.caches.release_caches(self.cycle_id);
    }
}

/// Live data captured for one cycle.
#[derive(Default)]
struct CycleLiveData(HashSet<ValueRequirement>);

impl LiveDataAvailabilityProvider for CycleLiveData {
    fn is_available(&self, requirement: &ValueRequirement) -> bool {
        self.0.contains(requirement)
    }
}

struct CycleResultCollector {
    tx: mpsc::UnboundedSender<CalculationJobResult>,
}

impl JobResultReceiver for CycleResultCollector {
    fn result_received(&self, result: CalculationJobResult) {
        // the cycle may have been abandoned already
        let _ = self.tx.send(result);
    }
}
