//! JobDispatcher - sends jobs to compute nodes and drives retries.
//!
//! Design:
//! - Registry: job id of the fragment on the wire -> its watched shape. A
//!   split replaces the original entry, so a result is always routed to the
//!   fragment currently in flight.
//! - Each send runs on its own spawned task; results come back through
//!   `result_received` / `job_failed`, from the transport or that task.
//! - No registry guard is held while calling a receiver: receivers may
//!   submit more jobs (released tails, remainders).
//! - Cancelling a cycle drops its fragments from the registry. Late results
//!   for them are ignored, and their tails and remainders are never sent.

use std::sync::{Arc, Weak};
use std::time::Duration;

use dashmap::DashMap;
use tracing::{debug, info, warn};

use crate::dispatch::retry::RetryPolicy;
use crate::dispatch::stats::{Counters, DispatcherStats};
use crate::dispatch::watched::{
    DispatchableJob, JobContext, JobSubmitter, StandardJob, WholeWatchedJob,
};
use crate::domain::{CalculationJob, CalculationJobResult, CycleId, JobId};
use crate::error::{InvocationError, JobError};
use crate::ports::{FunctionBlacklistMaintainer, JobIdSource, JobInvoker, JobResultReceiver};

/// Label of results synthesized by the dispatcher itself.
const DISPATCHER_NODE_ID: &str = "dispatcher";

/// Entry point for dispatching calculation jobs.
///
/// Must be used from within a tokio runtime.
#[derive(Clone)]
pub struct JobDispatcher {
    inner: Arc<DispatcherInner>,
}

struct DispatcherInner {
    invoker: Arc<dyn JobInvoker>,
    policy: RetryPolicy,
    ctx: JobContext,
    registry: DashMap<JobId, InFlight>,
    counters: Counters,
    this: Weak<DispatcherInner>,
}

/// Shapes that can be on the wire. A split is always started before sending.
enum Watch {
    Standard(StandardJob),
    Whole(WholeWatchedJob),
}

impl Watch {
    fn job(&self) -> &CalculationJob {
        match self {
            Self::Standard(standard) => standard.job(),
            Self::Whole(whole) => whole.job(),
        }
    }

    fn receiver(&self) -> &Arc<dyn JobResultReceiver> {
        match self {
            Self::Standard(standard) => standard.receiver(),
            Self::Whole(whole) => whole.receiver(),
        }
    }
}

struct InFlight {
    watch: Watch,
    attempts: u32,
}

impl JobDispatcher {
    pub fn new(
        invoker: Arc<dyn JobInvoker>,
        blacklist: Arc<dyn FunctionBlacklistMaintainer>,
        job_ids: Arc<JobIdSource>,
        policy: RetryPolicy,
    ) -> Self {
        let inner = Arc::new_cyclic(|this: &Weak<DispatcherInner>| {
            let submitter: Weak<dyn JobSubmitter> = this.clone();
            DispatcherInner {
                invoker,
                policy,
                ctx: JobContext::new(submitter, blacklist, job_ids),
                registry: DashMap::new(),
                counters: Counters::default(),
                this: this.clone(),
            }
        });
        Self { inner }
    }

    /// Dispatch a job (and its tails) and report every job's result to
    /// `receiver`, exactly once per job.
    pub fn dispatch(
        &self,
        job: CalculationJob,
        receiver: Arc<dyn JobResultReceiver>,
    ) -> Result<(), JobError> {
        let shaped = if job.has_tails() {
            DispatchableJob::Whole(WholeWatchedJob::watch(job, receiver, &self.inner.ctx))
        } else {
            DispatchableJob::Standard(StandardJob::new(job, receiver)?)
        };
        self.inner.submit(shaped);
        Ok(())
    }

    /// Result callback from the transport.
    pub fn result_received(&self, result: CalculationJobResult) {
        self.inner.result_received(result);
    }

    /// Failure callback from the transport: the job produced no result.
    pub fn job_failed(&self, job_id: JobId, error: InvocationError) {
        self.inner.job_failed(job_id, error);
    }

    /// Stop watching every fragment of `cycle_id`. Nothing of the cycle is
    /// retried, split or blacklisted afterwards. Returns the number dropped.
    pub fn cancel_cycle(&self, cycle_id: CycleId) -> usize {
        let before = self.inner.registry.len();
        self.inner
            .registry
            .retain(|_, in_flight| in_flight.watch.job().specification().cycle_id != cycle_id);
        let dropped = before.saturating_sub(self.inner.registry.len());
        if dropped > 0 {
            Counters::add(&self.inner.counters.abandoned, dropped as u64);
            debug!(cycle_id = %cycle_id, dropped, "cancelled cycle jobs");
        }
        dropped
    }

    pub fn job_ids(&self) -> &JobIdSource {
        self.inner.ctx.job_ids()
    }

    pub fn stats(&self) -> DispatcherStats {
        self.inner.counters.snapshot(self.inner.registry.len())
    }
}

impl JobSubmitter for DispatcherInner {
    fn submit(&self, job: DispatchableJob) {
        let watch = match job {
            DispatchableJob::Standard(standard) => Watch::Standard(standard),
            DispatchableJob::Whole(whole) => Watch::Whole(whole),
            DispatchableJob::Split(split) => Watch::Whole(split.start(&self.ctx)),
        };
        Counters::bump(&self.counters.dispatched);
        self.send(InFlight { watch, attempts: 1 }, Duration::ZERO);
    }
}

impl DispatcherInner {
    fn send(&self, in_flight: InFlight, delay: Duration) {
        let Some(this) = self.this.upgrade() else {
            return;
        };
        let job = in_flight.watch.job().clone();
        let job_id = job.job_id();
        debug!(
            job_id = %job_id,
            items = job.items().len(),
            attempt = in_flight.attempts,
            "sending job"
        );
        if self.registry.insert(job_id, in_flight).is_some() {
            warn!(job_id = %job_id, "replaced a job that was still in flight");
        }

        tokio::spawn(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            match this.invoker.invoke(job).await {
                Ok(result) => this.result_received(result),
                Err(error) => this.job_failed(job_id, error),
            }
        });
    }

    fn result_received(&self, result: CalculationJobResult) {
        let job_id = result.job_id();
        let Some((_, in_flight)) = self.registry.remove(&job_id) else {
            debug!(job_id = %job_id, "result for unknown job ignored");
            return;
        };

        if result.is_success() {
            self.deliver(in_flight.watch.receiver(), result);
            return;
        }

        debug!(
            job_id = %job_id,
            failures = result.failure_count(),
            attempt = in_flight.attempts,
            "job reported step failures"
        );
        if self.policy.can_retry(in_flight.attempts) {
            self.resend(in_flight);
        } else {
            self.split_or_give_up(in_flight.watch, Some(result), "step failed");
        }
    }

    fn job_failed(&self, job_id: JobId, error: InvocationError) {
        let Some((_, in_flight)) = self.registry.remove(&job_id) else {
            debug!(job_id = %job_id, %error, "failure for unknown job ignored");
            return;
        };
        if let InvocationError::Abandoned { .. } = error {
            debug!(job_id = %job_id, "job abandoned with its cycle");
            Counters::bump(&self.counters.abandoned);
            return;
        }
        Counters::bump(&self.counters.invocation_failures);
        warn!(job_id = %job_id, %error, attempt = in_flight.attempts, "job invocation failed");

        if self.policy.can_retry(in_flight.attempts) {
            self.resend(in_flight);
        } else {
            self.split_or_give_up(in_flight.watch, None, &error.to_string());
        }
    }

    fn resend(&self, in_flight: InFlight) {
        let delay = self.policy.next_delay(in_flight.attempts);
        Counters::bump(&self.counters.resent);
        let in_flight = InFlight {
            attempts: in_flight.attempts + 1,
            ..in_flight
        };
        self.send(in_flight, delay);
    }

    /// Retry budget of the fragment is spent: split it, or deliver the
    /// failure in-band when it cannot be split.
    fn split_or_give_up(&self, watch: Watch, failure: Option<CalculationJobResult>, reason: &str) {
        let receiver = watch.receiver().clone();
        let specification = watch.job().specification().clone();
        let item_count = watch.job().items().len();
        let give_up = |failure: Option<CalculationJobResult>| {
            let result = failure.unwrap_or_else(|| {
                CalculationJobResult::all_failed(specification.clone(), item_count, DISPATCHER_NODE_ID, reason)
            });
            info!(job_id = %result.job_id(), failures = result.failure_count(), "giving up on job");
            Counters::bump(&self.counters.gave_up);
            self.deliver(&receiver, result);
        };

        let whole = match watch {
            Watch::Whole(whole) => whole,
            Watch::Standard(standard) => match standard.create_watched_job(&self.ctx) {
                Some(whole) => whole,
                None => return give_up(failure),
            },
        };
        match whole.prepare_retry_job(failure.as_ref(), &self.ctx) {
            Some(split) => {
                Counters::bump(&self.counters.split);
                self.submit(DispatchableJob::Split(split));
            }
            None => give_up(failure),
        }
    }

    fn deliver(&self, receiver: &Arc<dyn JobResultReceiver>, result: CalculationJobResult) {
        Counters::bump(&self.counters.delivered);
        receiver.result_received(result);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::testing::{item, vs, Harness};
    use crate::domain::{CacheSelectHint, CalculationJobResultItem};
    use crate::error::FunctionError;
    use crate::impls::{ExecutionFunction, FunctionRepository, LocalNodeJobInvoker, ViewComputationCacheSource};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use serde_json::json;
    use std::sync::atomic::{AtomicBool, Ordering};
    use tokio::sync::{Semaphore, mpsc};
    use tokio::time::{sleep, timeout};

    type Behaviour = Box<dyn Fn(&CalculationJob) -> Result<CalculationJobResult, InvocationError> + Send + Sync>;

    struct ScriptedInvoker {
        behaviour: Behaviour,
        invoked: Mutex<Vec<Vec<String>>>,
    }

    impl ScriptedInvoker {
        fn new(behaviour: Behaviour) -> Arc<Self> {
            Arc::new(Self {
                behaviour,
                invoked: Mutex::new(Vec::new()),
            })
        }

        /// Fails every item run by `function`.
        fn failing(function: &'static str) -> Arc<Self> {
            Self::new(Box::new(move |job| {
                let items = job
                    .items()
                    .iter()
                    .map(|item| {
                        if item.function_id == function {
                            CalculationJobResultItem::failure(function, "scripted failure")
                        } else {
                            CalculationJobResultItem::Success
                        }
                    })
                    .collect();
                Ok(CalculationJobResult::new(
                    job.specification().clone(),
                    Duration::from_millis(1),
                    items,
                    "scripted",
                ))
            }))
        }

        fn invocations(&self) -> Vec<Vec<String>> {
            self.invoked.lock().clone()
        }
    }

    #[async_trait]
    impl JobInvoker for ScriptedInvoker {
        async fn invoke(&self, job: CalculationJob) -> Result<CalculationJobResult, InvocationError> {
            self.invoked
                .lock()
                .push(job.items().iter().map(|item| item.function_id.clone()).collect());
            (self.behaviour)(&job)
        }
    }

    struct ChannelReceiver(mpsc::UnboundedSender<CalculationJobResult>);

    impl JobResultReceiver for ChannelReceiver {
        fn result_received(&self, result: CalculationJobResult) {
            let _ = self.0.send(result);
        }
    }

    fn receiver() -> (Arc<ChannelReceiver>, mpsc::UnboundedReceiver<CalculationJobResult>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Arc::new(ChannelReceiver(tx)), rx)
    }

    async fn next(rx: &mut mpsc::UnboundedReceiver<CalculationJobResult>) -> CalculationJobResult {
        timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("timed out waiting for a result")
            .expect("channel closed")
    }

    fn dispatcher(invoker: Arc<ScriptedInvoker>, h: &Harness, policy: RetryPolicy) -> JobDispatcher {
        JobDispatcher::new(invoker, h.blacklist.clone(), h.job_ids.clone(), policy)
    }

    #[tokio::test]
    async fn clean_job_is_delivered_once() {
        let h = Harness::new();
        let invoker = ScriptedInvoker::failing("none");
        let dispatcher = dispatcher(invoker.clone(), &h, RetryPolicy::default());
        let job = h.job(vec![item("A", &[]), item("B", &["A"])], CacheSelectHint::all_shared());
        let job_id = job.job_id();
        let (rx_receiver, mut rx) = receiver();

        dispatcher.dispatch(job, rx_receiver).unwrap();
        let result = next(&mut rx).await;

        assert_eq!(result.job_id(), job_id);
        assert!(result.is_success());
        assert_eq!(invoker.invocations().len(), 1);
        let stats = dispatcher.stats();
        assert_eq!(stats.dispatched, 1);
        assert_eq!(stats.delivered, 1);
        assert_eq!(stats.in_flight, 0);
    }

    #[tokio::test]
    async fn step_failure_is_isolated_and_blacklisted() {
        let h = Harness::new();
        let invoker = ScriptedInvoker::failing("B");
        let dispatcher = dispatcher(invoker.clone(), &h, RetryPolicy::default());
        let job = h.job(
            vec![item("A", &[]), item("B", &[]), item("C", &[])],
            CacheSelectHint::all_shared(),
        );
        let job_id = job.job_id();
        let (rx_receiver, mut rx) = receiver();

        dispatcher.dispatch(job, rx_receiver).unwrap();
        let result = next(&mut rx).await;

        assert_eq!(result.job_id(), job_id);
        assert_eq!(result.items.len(), 3);
        assert_eq!(result.items[0], CalculationJobResultItem::Success);
        assert!(result.items[1].is_failed());
        assert_eq!(result.items[2], CalculationJobResultItem::Success);
        assert_eq!(h.blacklist.items(), vec![item("B", &[])]);

        // the frozen prefix [A] is never sent again
        let resent_a = invoker
            .invocations()
            .iter()
            .filter(|functions| functions.as_slice() == ["A"])
            .count();
        assert_eq!(resent_a, 0);
        assert!(rx.try_recv().is_err());
        assert_eq!(dispatcher.stats().in_flight, 0);
    }

    #[tokio::test]
    async fn lost_jobs_are_bisected_until_they_fit() {
        let h = Harness::new();
        // a node that can only cope with single-item jobs
        let invoker = ScriptedInvoker::new(Box::new(|job| {
            if job.items().len() > 1 {
                Err(InvocationError::NodeLost(job.job_id()))
            } else {
                Ok(CalculationJobResult::new(
                    job.specification().clone(),
                    Duration::ZERO,
                    vec![CalculationJobResultItem::Success],
                    "n",
                ))
            }
        }));
        let dispatcher = dispatcher(invoker.clone(), &h, RetryPolicy::split_immediately());
        let job = h.job(
            vec![item("A", &[]), item("B", &[]), item("C", &[]), item("D", &[])],
            CacheSelectHint::all_shared(),
        );
        let job_id = job.job_id();
        let (rx_receiver, mut rx) = receiver();

        dispatcher.dispatch(job, rx_receiver).unwrap();
        let result = next(&mut rx).await;

        assert_eq!(result.job_id(), job_id);
        assert_eq!(result.items.len(), 4);
        assert!(result.is_success());
        assert!(h.blacklist.items().is_empty());
        // A and B ran before C and D
        let singles: Vec<String> = invoker
            .invocations()
            .into_iter()
            .filter(|functions| functions.len() == 1)
            .map(|mut functions| functions.remove(0))
            .collect();
        assert_eq!(singles, vec!["A", "B", "C", "D"]);
    }

    #[tokio::test]
    async fn unrecoverable_single_item_gets_a_synthesized_failure() {
        let h = Harness::new();
        let invoker = ScriptedInvoker::new(Box::new(|job| Err(InvocationError::NodeLost(job.job_id()))));
        let dispatcher = dispatcher(invoker.clone(), &h, RetryPolicy::default());
        let job = h.job(vec![item("A", &[])], CacheSelectHint::all_shared());
        let (rx_receiver, mut rx) = receiver();

        dispatcher.dispatch(job, rx_receiver).unwrap();
        let result = next(&mut rx).await;

        assert_eq!(result.failure_count(), 1);
        assert_eq!(result.compute_node_id, DISPATCHER_NODE_ID);
        assert_eq!(invoker.invocations().len(), 2);
        assert_eq!(h.blacklist.items(), vec![item("A", &[])]);
        let stats = dispatcher.stats();
        assert_eq!(stats.resent, 1);
        assert_eq!(stats.gave_up, 1);
        assert_eq!(stats.invocation_failures, 2);
    }

    #[tokio::test]
    async fn tails_run_after_their_predecessor() {
        let h = Harness::new();
        let invoker = ScriptedInvoker::failing("none");
        let dispatcher = dispatcher(invoker.clone(), &h, RetryPolicy::default());
        let mut root = h.job(vec![item("A", &[])], CacheSelectHint::all_shared());
        let tail = h.job_after(&[root.job_id()], vec![item("B", &["A"])], CacheSelectHint::all_shared());
        let (root_id, tail_id) = (root.job_id(), tail.job_id());
        root.add_tail(tail).unwrap();
        let (rx_receiver, mut rx) = receiver();

        dispatcher.dispatch(root, rx_receiver).unwrap();
        let first = next(&mut rx).await;
        let second = next(&mut rx).await;

        assert_eq!((first.job_id(), second.job_id()), (root_id, tail_id));
        assert_eq!(invoker.invocations(), vec![vec!["A".to_string()], vec!["B".to_string()]]);
    }

    #[tokio::test]
    async fn unknown_results_are_ignored() {
        let h = Harness::new();
        let dispatcher = dispatcher(ScriptedInvoker::failing("none"), &h, RetryPolicy::default());
        let stray = h.job(vec![item("A", &[])], CacheSelectHint::all_shared());

        dispatcher.result_received(CalculationJobResult::all_failed(
            stray.specification().clone(),
            1,
            "n",
            "late",
        ));
        dispatcher.job_failed(JobId::new(999), InvocationError::NodeLost(JobId::new(999)));

        assert_eq!(dispatcher.stats(), DispatcherStats::default());
        assert!(h.blacklist.items().is_empty());
    }

    async fn settled(dispatcher: &JobDispatcher) {
        timeout(Duration::from_secs(5), async {
            while dispatcher.stats().in_flight > 0 {
                sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("jobs still in flight");
    }

    #[tokio::test]
    async fn abandoned_jobs_are_dropped_without_retry_or_blacklist() {
        let h = Harness::new();
        let invoker = ScriptedInvoker::new(Box::new(|job| Err(InvocationError::Abandoned { job_id: job.job_id() })));
        let dispatcher = dispatcher(invoker.clone(), &h, RetryPolicy::default());
        let job = h.job(vec![item("A", &[])], CacheSelectHint::all_shared());
        let (rx_receiver, mut rx) = receiver();

        dispatcher.dispatch(job, rx_receiver).unwrap();
        settled(&dispatcher).await;

        assert_eq!(invoker.invocations().len(), 1);
        assert!(h.blacklist.items().is_empty());
        assert!(rx.try_recv().is_err());
        let stats = dispatcher.stats();
        assert_eq!(stats.abandoned, 1);
        assert_eq!((stats.resent, stats.gave_up, stats.invocation_failures), (0, 0, 0));
    }

    /// Holds every invocation until the test hands out a permit.
    struct GatedInvoker {
        gate: Semaphore,
        inner: Arc<ScriptedInvoker>,
    }

    #[async_trait]
    impl JobInvoker for GatedInvoker {
        async fn invoke(&self, job: CalculationJob) -> Result<CalculationJobResult, InvocationError> {
            let _permit = self.gate.acquire().await;
            self.inner.invoke(job).await
        }
    }

    #[tokio::test]
    async fn cancelled_cycle_ignores_late_failures() {
        let h = Harness::new();
        let scripted = ScriptedInvoker::failing("B");
        let invoker = Arc::new(GatedInvoker {
            gate: Semaphore::new(0),
            inner: scripted.clone(),
        });
        let dispatcher = JobDispatcher::new(
            invoker.clone(),
            h.blacklist.clone(),
            h.job_ids.clone(),
            RetryPolicy::split_immediately(),
        );
        let job = h.job(vec![item("A", &[]), item("B", &["A"])], CacheSelectHint::all_shared());
        let (rx_receiver, mut rx) = receiver();

        dispatcher.dispatch(job, rx_receiver).unwrap();
        assert_eq!(dispatcher.cancel_cycle(h.cycle_id), 1);
        assert_eq!(dispatcher.stats().in_flight, 0);

        invoker.gate.add_permits(8);
        timeout(Duration::from_secs(5), async {
            while scripted.invocations().is_empty() {
                sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("job never ran");
        sleep(Duration::from_millis(50)).await;

        assert_eq!(scripted.invocations().len(), 1);
        assert!(h.blacklist.items().is_empty());
        assert!(rx.try_recv().is_err());
        let stats = dispatcher.stats();
        assert_eq!(stats.abandoned, 1);
        assert_eq!((stats.split, stats.gave_up, stats.delivered), (0, 0, 0));
    }

    #[tokio::test]
    async fn split_after_a_private_value_recomputes_it_for_the_remainder() {
        let h = Harness::new();
        let caches = Arc::new(ViewComputationCacheSource::new());
        let cache = caches.get_or_create(h.cycle_id, "Default");
        let failed_once = AtomicBool::new(false);
        let mut functions = FunctionRepository::new();
        functions
            .register("A", Arc::new(ExecutionFunction::new(|_| Ok(vec![json!(1.5)]))))
            .unwrap();
        functions
            .register(
                "B",
                Arc::new(ExecutionFunction::new(move |ctx| {
                    if !failed_once.swap(true, Ordering::SeqCst) {
                        return Err(FunctionError::Execution("transient".to_string()));
                    }
                    Ok(vec![json!(ctx.input_f64("A")? * 2.0)])
                })),
            )
            .unwrap();
        let invoker = Arc::new(LocalNodeJobInvoker::new("local", Arc::new(functions), caches));
        let dispatcher = JobDispatcher::new(
            invoker,
            h.blacklist.clone(),
            h.job_ids.clone(),
            RetryPolicy::split_immediately(),
        );
        let job = h.job(
            vec![item("A", &[]), item("B", &["A"])],
            CacheSelectHint::private_values([vs("A")]),
        );
        let job_id = job.job_id();
        let (rx_receiver, mut rx) = receiver();

        dispatcher.dispatch(job, rx_receiver).unwrap();
        let result = next(&mut rx).await;

        assert_eq!(result.job_id(), job_id);
        assert!(result.is_success());
        assert!(h.blacklist.items().is_empty());
        assert_eq!(cache.shared_value(&vs("B")), Some(json!(3.0)));
        assert_eq!(dispatcher.stats().split, 1);
    }
}
