//! ViewProcessor - owns view definitions, processes and clients.
//!
//! # 学習ポイント
//! - Builder パターン（起動時検証 / Fail-fast）
//! - one process per definition name, shared by every attached client
//! - lock order: processor state → process delivery → client delivery

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::info;

use crate::config::EngineConfig;
use crate::dispatch::{DispatcherStats, JobDispatcher, RetryPolicy};
use crate::domain::{ExecutionOptions, ViewClientId, ViewDefinition};
use crate::error::ViewProcessorError;
use crate::graph::validate_view_definition;
use crate::impls::{FunctionRepository, InMemoryFunctionBlacklist, LocalNodeJobInvoker, ViewComputationCacheSource};
use crate::ports::{
    Clock, FunctionBlacklistMaintainer, FunctionBlacklistQuery, IdGenerator, JobIdSource, JobInvoker,
    LiveDataSnapshotProvider, SystemClock, UlidGenerator,
};
use crate::view::client::{ClientEndpoint, ViewClient};
use crate::view::computation_job::ComputationEnv;
use crate::view::process::ViewProcess;

/// Builds a `ViewProcessor`.
///
/// # Example
/// ```ignore
/// let processor = ViewProcessorBuilder::new()
///     .live_data_provider(live_data)
///     .local_node(functions)
///     .view_definition(definition)
///     .build()?;
/// processor.start();
/// ```
///
/// # Fail-fast
/// - a live data provider and a job invoker (or local node) are required
/// - definition names are unique and no definition is cyclic
pub struct ViewProcessorBuilder {
    config: EngineConfig,
    definitions: Vec<ViewDefinition>,
    live_data: Option<Arc<dyn LiveDataSnapshotProvider>>,
    invoker: Option<Arc<dyn JobInvoker>>,
    functions: Option<FunctionRepository>,
    blacklist: Option<(Arc<dyn FunctionBlacklistMaintainer>, Arc<dyn FunctionBlacklistQuery>)>,
    clock: Option<Arc<dyn Clock>>,
    ids: Option<Arc<dyn IdGenerator>>,
    caches: Arc<ViewComputationCacheSource>,
    job_ids: Arc<JobIdSource>,
}

impl ViewProcessorBuilder {
    pub fn new() -> Self {
        Self {
            config: EngineConfig::default(),
            definitions: Vec::new(),
            live_data: None,
            invoker: None,
            functions: None,
            blacklist: None,
            clock: None,
            ids: None,
            caches: Arc::new(ViewComputationCacheSource::new()),
            job_ids: Arc::new(JobIdSource::new()),
        }
    }

    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn view_definition(mut self, definition: ViewDefinition) -> Self {
        self.definitions.push(definition);
        self
    }

    pub fn live_data_provider(mut self, provider: Arc<dyn LiveDataSnapshotProvider>) -> Self {
        self.live_data = Some(provider);
        self
    }

    /// Send jobs to an external invoker. It should read and write values
    /// through `cache_source()`.
    pub fn job_invoker(mut self, invoker: Arc<dyn JobInvoker>) -> Self {
        self.invoker = Some(invoker);
        self
    }

    /// Run jobs in-process with `functions`.
    pub fn local_node(mut self, functions: FunctionRepository) -> Self {
        self.functions = Some(functions);
        self
    }

    pub fn blacklist<B>(mut self, blacklist: Arc<B>) -> Self
    where
        B: FunctionBlacklistMaintainer + FunctionBlacklistQuery + 'static,
    {
        let maintainer: Arc<dyn FunctionBlacklistMaintainer> = blacklist.clone();
        let query: Arc<dyn FunctionBlacklistQuery> = blacklist;
        self.blacklist = Some((maintainer, query));
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn id_generator(mut self, ids: Arc<dyn IdGenerator>) -> Self {
        self.ids = Some(ids);
        self
    }

    /// The caches cycles are computed in.
    pub fn cache_source(&self) -> Arc<ViewComputationCacheSource> {
        Arc::clone(&self.caches)
    }

    pub fn build(self) -> Result<ViewProcessor, ViewProcessorError> {
        let live_data = self
            .live_data
            .ok_or(ViewProcessorError::MissingComponent("live data provider"))?;
        let invoker: Arc<dyn JobInvoker> = match (self.invoker, self.functions) {
            (Some(invoker), _) => invoker,
            (None, Some(functions)) => Arc::new(LocalNodeJobInvoker::new(
                self.config.node.node_id.clone(),
                Arc::new(functions),
                Arc::clone(&self.caches),
            )),
            (None, None) => return Err(ViewProcessorError::MissingComponent("job invoker")),
        };

        let mut definitions = HashMap::with_capacity(self.definitions.len());
        for definition in self.definitions {
            validate_view_definition(&definition)?;
            if definitions.contains_key(&definition.name) {
                return Err(ViewProcessorError::DuplicateViewDefinition(definition.name));
            }
            definitions.insert(definition.name.clone(), Arc::new(definition));
        }

        let (maintainer, query) = self.blacklist.unwrap_or_else(|| {
            let blacklist = Arc::new(InMemoryFunctionBlacklist::new());
            (blacklist.clone() as Arc<dyn FunctionBlacklistMaintainer>, blacklist as Arc<dyn FunctionBlacklistQuery>)
        });
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let ids = self
            .ids
            .unwrap_or_else(|| Arc::new(UlidGenerator::new(SystemClock)));

        let dispatcher = JobDispatcher::new(
            invoker,
            maintainer,
            self.job_ids,
            RetryPolicy::from_config(&self.config.dispatcher),
        );
        let env = ComputationEnv {
            live_data,
            dispatcher,
            blacklist: query,
            caches: self.caches,
            clock,
            ids,
            cycle_timeout: self.config.view.cycle_timeout(),
        };

        Ok(ViewProcessor {
            inner: Arc::new(ProcessorInner {
                definitions,
                env,
                state: Mutex::new(ProcessorState::default()),
            }),
        })
    }
}

impl Default for ViewProcessorBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Default)]
struct ProcessorState {
    running: bool,
    processes: HashMap<String, Arc<ViewProcess>>,
    attachments: HashMap<ViewClientId, Arc<ViewProcess>>,
    clients: HashMap<ViewClientId, Weak<ClientEndpoint>>,
    /// Terminated processes whose task may still be running.
    retired: Vec<Arc<ViewProcess>>,
}

pub(crate) struct ProcessorInner {
    definitions: HashMap<String, Arc<ViewDefinition>>,
    env: ComputationEnv,
    state: Mutex<ProcessorState>,
}

impl ProcessorInner {
    pub(crate) fn attach_client(
        &self,
        client: &Arc<ClientEndpoint>,
        definition_name: &str,
        options: ExecutionOptions,
    ) -> Result<(), ViewProcessorError> {
        let mut state = self.state.lock();
        if !state.running {
            return Err(ViewProcessorError::NotRunning);
        }
        let definition = self
            .definitions
            .get(definition_name)
            .ok_or_else(|| ViewProcessorError::UnknownViewDefinition(definition_name.to_string()))?;

        Self::detach_locked(&mut state, client.id());

        let process = match state.processes.get(definition_name) {
            Some(process) if process.is_running() => Arc::clone(process),
            _ => {
                let process = ViewProcess::start(
                    self.env.ids.generate_view_process_id(),
                    Arc::clone(definition),
                    options,
                    self.env.clone(),
                );
                state
                    .processes
                    .insert(definition_name.to_string(), Arc::clone(&process));
                process
            }
        };
        process.attach(client);
        state.attachments.insert(client.id(), process);
        Ok(())
    }

    pub(crate) fn detach_client(&self, client_id: ViewClientId) {
        let mut state = self.state.lock();
        Self::detach_locked(&mut state, client_id);
    }

    fn detach_locked(state: &mut ProcessorState, client_id: ViewClientId) {
        let Some(process) = state.attachments.remove(&client_id) else {
            return;
        };
        if process.detach(client_id) > 0 {
            return;
        }
        process.terminate();
        let name = process.definition().name.as_str();
        if state
            .processes
            .get(name)
            .is_some_and(|current| Arc::ptr_eq(current, &process))
        {
            state.processes.remove(name);
        }
        state.retired.retain(|retired| retired.is_computation_alive());
        state.retired.push(process);
    }

    pub(crate) fn forget_client(&self, client_id: ViewClientId) {
        self.state.lock().clients.remove(&client_id);
    }

    pub(crate) fn process_for_client(&self, client_id: ViewClientId) -> Option<Arc<ViewProcess>> {
        self.state.lock().attachments.get(&client_id).cloned()
    }
}

/// Entry point: create clients, attach them to views, stop everything.
#[derive(Clone)]
pub struct ViewProcessor {
    inner: Arc<ProcessorInner>,
}

impl ViewProcessor {
    pub fn builder() -> ViewProcessorBuilder {
        ViewProcessorBuilder::new()
    }

    pub fn start(&self) {
        let mut state = self.inner.state.lock();
        if !state.running {
            state.running = true;
            info!(definitions = self.inner.definitions.len(), "view processor started");
        }
    }

    /// Terminate every process, detach every client and wait for the
    /// computation tasks to end.
    pub async fn stop(&self) {
        let processes: Vec<Arc<ViewProcess>> = {
            let mut state = self.inner.state.lock();
            if !state.running {
                return;
            }
            state.running = false;
            state.attachments.clear();
            let mut processes: Vec<_> = state.processes.drain().map(|(_, process)| process).collect();
            processes.append(&mut state.retired);
            processes
        };
        for process in &processes {
            process.terminate();
        }
        for process in &processes {
            process.join_computation().await;
        }
        info!(processes = processes.len(), "view processor stopped");
    }

    pub fn is_running(&self) -> bool {
        self.inner.state.lock().running
    }

    pub fn create_view_client(&self) -> ViewClient {
        let id = self.inner.env.ids.generate_view_client_id();
        let client = ViewClient::new(id, Arc::clone(&self.inner));
        self.inner
            .state
            .lock()
            .clients
            .insert(id, Arc::downgrade(client.endpoint()));
        client
    }

    pub fn view_process_for_client(&self, client_id: ViewClientId) -> Option<Arc<ViewProcess>> {
        self.inner.process_for_client(client_id)
    }

    pub fn view_process_for_definition(&self, definition_name: &str) -> Option<Arc<ViewProcess>> {
        self.inner.state.lock().processes.get(definition_name).cloned()
    }

    pub fn view_definition(&self, name: &str) -> Option<&ViewDefinition> {
        self.inner.definitions.get(name).map(|definition| definition.as_ref())
    }

    /// Clients created and not shut down (or dropped).
    pub fn client_count(&self) -> usize {
        let mut state = self.inner.state.lock();
        state.clients.retain(|_, client| client.strong_count() > 0);
        state.clients.len()
    }

    pub fn dispatcher_stats(&self) -> DispatcherStats {
        self.inner.env.dispatcher.stats()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ComputationTarget, DerivedValue, ValueRequirement, ViewCalculationConfiguration};
    use crate::impls::InMemoryLkvSnapshotProvider;

    fn definition(name: &str) -> ViewDefinition {
        ViewDefinition::new(name).with_calc_config(
            ViewCalculationConfiguration::new("Default")
                .add_live_data(ValueRequirement::new("Spot", ComputationTarget::primitive("EURUSD"))),
        )
    }

    fn builder() -> ViewProcessorBuilder {
        ViewProcessorBuilder::new()
            .live_data_provider(Arc::new(InMemoryLkvSnapshotProvider::without_notifications()))
            .local_node(FunctionRepository::with_live_data_sourcing())
    }

    #[test]
    fn build_requires_live_data() {
        let result = ViewProcessorBuilder::new()
            .local_node(FunctionRepository::with_live_data_sourcing())
            .build();
        assert!(matches!(result, Err(ViewProcessorError::MissingComponent("live data provider"))));
    }

    #[test]
    fn build_requires_an_invoker() {
        let result = ViewProcessorBuilder::new()
            .live_data_provider(Arc::new(InMemoryLkvSnapshotProvider::new()))
            .build();
        assert!(matches!(result, Err(ViewProcessorError::MissingComponent("job invoker"))));
    }

    #[test]
    fn build_rejects_duplicate_definitions() {
        let result = builder()
            .view_definition(definition("FX"))
            .view_definition(definition("FX"))
            .build();
        assert!(matches!(result, Err(ViewProcessorError::DuplicateViewDefinition(name)) if name == "FX"));
    }

    #[test]
    fn build_rejects_cyclic_definitions() {
        let target = ComputationTarget::primitive("X");
        let cyclic = ViewDefinition::new("Cyclic").with_calc_config(
            ViewCalculationConfiguration::new("Default")
                .add_derived(DerivedValue::new("f", "A", target.clone(), vec![ValueRequirement::new("B", target.clone())]))
                .add_derived(DerivedValue::new("g", "B", target.clone(), vec![ValueRequirement::new("A", target)])),
        );
        let result = builder().view_definition(cyclic).build();
        assert!(matches!(result, Err(ViewProcessorError::DependencyCycle { .. })));
    }

    #[tokio::test]
    async fn attach_requires_a_running_processor() {
        let processor = builder().view_definition(definition("FX")).build().unwrap();
        let client = processor.create_view_client();

        let err = client
            .attach_to_view_process("FX", ExecutionOptions::manual())
            .unwrap_err();
        assert_eq!(err.to_string(), ViewProcessorError::NotRunning.to_string());
    }

    #[tokio::test]
    async fn unknown_definition_is_rejected() {
        let processor = builder().view_definition(definition("FX")).build().unwrap();
        processor.start();
        let client = processor.create_view_client();

        let err = client
            .attach_to_view_process("Rates", ExecutionOptions::manual())
            .unwrap_err();
        assert!(err.to_string().contains("Rates"));
        assert!(!client.is_attached());
        processor.stop().await;
    }

    #[tokio::test]
    async fn clients_share_one_process_per_definition() {
        let processor = builder().view_definition(definition("FX")).build().unwrap();
        processor.start();
        let first = processor.create_view_client();
        let second = processor.create_view_client();

        first.attach_to_view_process("FX", ExecutionOptions::manual()).unwrap();
        second.attach_to_view_process("FX", ExecutionOptions::manual()).unwrap();

        let process = processor.view_process_for_definition("FX").unwrap();
        assert!(Arc::ptr_eq(&process, &processor.view_process_for_client(first.unique_id()).unwrap()));
        assert!(Arc::ptr_eq(&process, &processor.view_process_for_client(second.unique_id()).unwrap()));
        assert_eq!(process.client_count(), 2);
        assert_eq!(processor.client_count(), 2);

        processor.stop().await;
        assert!(!process.is_running());
        assert!(!process.is_computation_alive());
        assert!(!first.is_attached());
    }
}
