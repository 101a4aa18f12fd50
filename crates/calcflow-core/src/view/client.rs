//! ViewClient - a subscriber to one view process at a time.
//!
//! # 配信
//! - delivery to one client is serialized by its delivery lock, which is also
//!   held while the listeners run
//! - while paused, only the latest full result is kept and deltas are
//!   merged (latest value wins); `resume` flushes the pair once
//! - listeners are read once per delivery; swapping them affects the next
//!   delivery only
//!
//! Listeners run with delivery locks held and must not call back into the
//! client.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info};

use crate::domain::{ExecutionOptions, ViewClientId, ViewComputationResultModel, ViewDeltaResultModel};
use crate::error::ViewClientError;
use crate::ports::{ComputationResultListener, DeltaResultListener};
use crate::view::process::ViewProcess;
use crate::view::processor::ProcessorInner;

#[derive(Default)]
struct Listeners {
    result: Option<Arc<dyn ComputationResultListener>>,
    delta: Option<Arc<dyn DeltaResultListener>>,
}

#[derive(Default)]
struct ClientDelivery {
    paused: bool,
    pending_full: Option<ViewComputationResultModel>,
    merged_delta: Option<ViewDeltaResultModel>,
    latest: Option<Arc<ViewComputationResultModel>>,
}

/// The part of a client that processes deliver to.
pub(crate) struct ClientEndpoint {
    id: ViewClientId,
    listeners: Mutex<Listeners>,
    delivery: Mutex<ClientDelivery>,
}

impl ClientEndpoint {
    fn new(id: ViewClientId) -> Self {
        Self {
            id,
            listeners: Mutex::new(Listeners::default()),
            delivery: Mutex::new(ClientDelivery::default()),
        }
    }

    pub(crate) fn id(&self) -> ViewClientId {
        self.id
    }

    pub(crate) fn deliver(&self, full: &ViewComputationResultModel, delta: &ViewDeltaResultModel) {
        let mut guard = self.delivery.lock();
        let state = &mut *guard;
        state.latest = Some(Arc::new(full.clone()));
        if state.paused {
            state.pending_full = Some(full.clone());
            match &mut state.merged_delta {
                Some(merged) => merged.merge(delta),
                None => state.merged_delta = Some(delta.clone()),
            }
            debug!(view_client_id = %self.id, cycle_id = %full.cycle_id, "paused, result merged");
            return;
        }
        self.notify_listeners(full, delta);
    }

    fn notify_listeners(&self, full: &ViewComputationResultModel, delta: &ViewDeltaResultModel) {
        let (result_listener, delta_listener) = {
            let listeners = self.listeners.lock();
            (listeners.result.clone(), listeners.delta.clone())
        };
        if let Some(listener) = result_listener {
            listener.result_received(full);
        }
        if let Some(listener) = delta_listener {
            listener.delta_result_received(delta);
        }
    }

    fn pause(&self) {
        self.delivery.lock().paused = true;
    }

    fn resume(&self) {
        let mut state = self.delivery.lock();
        state.paused = false;
        let full = state.pending_full.take();
        let delta = state.merged_delta.take();
        if let (Some(full), Some(delta)) = (full, delta) {
            debug!(view_client_id = %self.id, cycle_id = %full.cycle_id, "flushing merged result");
            self.notify_listeners(&full, &delta);
        }
    }

    fn latest(&self) -> Option<Arc<ViewComputationResultModel>> {
        self.delivery.lock().latest.clone()
    }

    fn clear(&self) {
        *self.listeners.lock() = Listeners::default();
        *self.delivery.lock() = ClientDelivery::default();
    }
}

/// Handle through which a subscriber attaches to views and receives results.
pub struct ViewClient {
    endpoint: Arc<ClientEndpoint>,
    processor: Arc<ProcessorInner>,
    terminated: AtomicBool,
}

impl ViewClient {
    pub(crate) fn new(id: ViewClientId, processor: Arc<ProcessorInner>) -> Self {
        Self {
            endpoint: Arc::new(ClientEndpoint::new(id)),
            processor,
            terminated: AtomicBool::new(false),
        }
    }

    pub(crate) fn endpoint(&self) -> &Arc<ClientEndpoint> {
        &self.endpoint
    }

    pub fn unique_id(&self) -> ViewClientId {
        self.endpoint.id
    }

    fn ensure_live(&self) -> Result<(), ViewClientError> {
        if self.terminated.load(Ordering::SeqCst) {
            return Err(ViewClientError::Terminated(self.endpoint.id));
        }
        Ok(())
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated.load(Ordering::SeqCst)
    }

    /// Attach to the process of `definition_name`, creating it if none is
    /// running. Any current attachment is dropped first.
    pub fn attach_to_view_process(
        &self,
        definition_name: &str,
        options: ExecutionOptions,
    ) -> Result<(), ViewClientError> {
        self.ensure_live()?;
        self.processor.attach_client(&self.endpoint, definition_name, options)?;
        Ok(())
    }

    /// Detach immediately. A process losing its last client is terminated.
    pub fn detach_from_view_process(&self) -> Result<(), ViewClientError> {
        self.ensure_live()?;
        self.processor.detach_client(self.endpoint.id);
        Ok(())
    }

    pub fn is_attached(&self) -> bool {
        self.view_process().is_some()
    }

    pub fn view_process(&self) -> Option<Arc<ViewProcess>> {
        self.processor.process_for_client(self.endpoint.id)
    }

    pub fn pause(&self) -> Result<(), ViewClientError> {
        self.ensure_live()?;
        self.endpoint.pause();
        Ok(())
    }

    /// Flush whatever arrived while paused, then deliver immediately again.
    pub fn resume(&self) -> Result<(), ViewClientError> {
        self.ensure_live()?;
        self.endpoint.resume();
        Ok(())
    }

    pub fn set_result_listener(
        &self,
        listener: Option<Arc<dyn ComputationResultListener>>,
    ) -> Result<(), ViewClientError> {
        self.ensure_live()?;
        self.endpoint.listeners.lock().result = listener;
        Ok(())
    }

    pub fn set_delta_result_listener(
        &self,
        listener: Option<Arc<dyn DeltaResultListener>>,
    ) -> Result<(), ViewClientError> {
        self.ensure_live()?;
        self.endpoint.listeners.lock().delta = listener;
        Ok(())
    }

    pub fn is_result_available(&self) -> Result<bool, ViewClientError> {
        Ok(self.latest_result()?.is_some())
    }

    /// The latest full result that reached this client, paused or not.
    pub fn latest_result(&self) -> Result<Option<Arc<ViewComputationResultModel>>, ViewClientError> {
        self.ensure_live()?;
        Ok(self.endpoint.latest())
    }

    /// Detach and release the client. Every later call fails with
    /// `ViewClientError::Terminated`.
    pub fn shutdown(&self) {
        if self.terminated.swap(true, Ordering::SeqCst) {
            return;
        }
        self.processor.detach_client(self.endpoint.id);
        self.processor.forget_client(self.endpoint.id);
        self.endpoint.clear();
        info!(view_client_id = %self.endpoint.id, "view client shut down");
    }
}
