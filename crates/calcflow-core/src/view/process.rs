//! ViewProcess - one running computation of a view definition.
//!
//! # 状態遷移
//! - running → terminated（不可逆）
//!
//! Every cycle result is delivered to all attached clients, in cycle order,
//! while the delivery lock is held. Detaching takes the same lock, so once
//! `detach` returns the client gets no further callbacks.

use std::collections::BTreeMap;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::domain::{
    ExecutionOptions, ViewClientId, ViewComputationResultModel, ViewDefinition, ViewDeltaResultModel,
    ViewProcessId, ViewProcessState,
};
use crate::view::client::ClientEndpoint;
use crate::view::computation_job::{ComputationEnv, ViewComputationJob};

pub struct ViewProcess {
    id: ViewProcessId,
    definition: Arc<ViewDefinition>,
    state: Mutex<ViewProcessState>,
    delivery: Mutex<ProcessDelivery>,
    computation_job: Arc<ViewComputationJob>,
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

#[derive(Default)]
struct ProcessDelivery {
    clients: BTreeMap<ViewClientId, Weak<ClientEndpoint>>,
    latest: Option<ViewComputationResultModel>,
}

impl ViewProcess {
    /// Create the process and spawn its computation task.
    pub(crate) fn start(
        id: ViewProcessId,
        definition: Arc<ViewDefinition>,
        options: ExecutionOptions,
        env: ComputationEnv,
    ) -> Arc<Self> {
        let process = Arc::new_cyclic(|this: &Weak<ViewProcess>| Self {
            id,
            definition: Arc::clone(&definition),
            state: Mutex::new(ViewProcessState::Running),
            delivery: Mutex::new(ProcessDelivery::default()),
            computation_job: Arc::new(ViewComputationJob::new(id, definition, options, env, this.clone())),
            cancel: CancellationToken::new(),
            task: Mutex::new(None),
        });
        let handle = process.computation_job.spawn(process.cancel.clone());
        *process.task.lock() = Some(handle);
        info!(view_process_id = %id, view = %process.definition.name, "view process started");
        process
    }

    pub fn id(&self) -> ViewProcessId {
        self.id
    }

    pub fn definition(&self) -> &ViewDefinition {
        &self.definition
    }

    pub fn state(&self) -> ViewProcessState {
        *self.state.lock()
    }

    pub fn is_running(&self) -> bool {
        !self.state().is_terminal()
    }

    pub fn computation_job(&self) -> &Arc<ViewComputationJob> {
        &self.computation_job
    }

    /// Whether the computation task is still running. False once it has
    /// finished or been joined.
    pub fn is_computation_alive(&self) -> bool {
        self.task
            .lock()
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Wait for the computation task to end. Only the first caller waits.
    pub async fn join_computation(&self) {
        let handle = self.task.lock().take();
        if let Some(handle) = handle {
            if let Err(err) = handle.await {
                warn!(view_process_id = %self.id, error = %err, "computation task ended abnormally");
            }
        }
    }

    /// Stop computing and drop every client. Does not wait for the task.
    pub fn terminate(&self) {
        {
            let mut state = self.state.lock();
            if state.is_terminal() {
                return;
            }
            *state = ViewProcessState::Terminated;
        }
        self.cancel.cancel();
        self.delivery.lock().clients.clear();
        info!(view_process_id = %self.id, view = %self.definition.name, "view process terminated");
    }

    /// Full result of the most recent cycle.
    pub fn latest_result(&self) -> Option<ViewComputationResultModel> {
        self.delivery.lock().latest.clone()
    }

    pub fn client_count(&self) -> usize {
        self.delivery.lock().clients.len()
    }

    /// Add a client and prime it with the latest result, if any.
    pub(crate) fn attach(&self, client: &Arc<ClientEndpoint>) {
        let mut delivery = self.delivery.lock();
        delivery.clients.insert(client.id(), Arc::downgrade(client));
        if let Some(latest) = &delivery.latest {
            client.deliver(latest, &latest.delta_from(None));
        }
        debug!(view_process_id = %self.id, view_client_id = %client.id(), "client attached");
    }

    /// Remove a client. Returns how many remain.
    pub(crate) fn detach(&self, client_id: ViewClientId) -> usize {
        let mut delivery = self.delivery.lock();
        delivery.clients.remove(&client_id);
        debug!(view_process_id = %self.id, view_client_id = %client_id, "client detached");
        delivery.clients.len()
    }

    pub(crate) fn cycle_completed(&self, full: &ViewComputationResultModel, delta: &ViewDeltaResultModel) {
        let mut delivery = self.delivery.lock();
        if !self.is_running() {
            debug!(view_process_id = %self.id, cycle_id = %full.cycle_id, "terminated, dropping cycle result");
            return;
        }
        delivery.latest = Some(full.clone());
        delivery.clients.retain(|_, client| client.strong_count() > 0);
        for client in delivery.clients.values().filter_map(Weak::upgrade) {
            client.deliver(full, delta);
        }
    }
}

impl Drop for ViewProcess {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
