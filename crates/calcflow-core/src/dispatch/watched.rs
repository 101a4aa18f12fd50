//! Watched jobs: the dispatch-time shape of a job and its retry transitions.
//!
//! # 状態
//! - `Standard`: no tails, no bookkeeping. Promoted to `Whole` once it fails.
//! - `Whole`: dispatched as one unit. Its receiver may be a tail watch that
//!   releases tails when their predecessors have all reported.
//! - `Split`: a failed `Whole` cut in two. The prefix gets a fresh job id, the
//!   remainder keeps the original one. A frozen prefix already succeeded and is
//!   never re-sent; a pending prefix is sent first.
//!
//! Whichever way a job is split, upstream sees exactly one result for the
//! original job id, with item outcomes in the original order.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::domain::{
    CalculationJob, CalculationJobItem, CalculationJobResult, JobId, ValueSpecification,
};
use crate::error::JobError;
use crate::ports::{FunctionBlacklistMaintainer, JobIdSource, JobResultReceiver};

/// Accepts jobs for dispatch. Implemented by the dispatcher.
pub trait JobSubmitter: Send + Sync {
    fn submit(&self, job: DispatchableJob);
}

/// Collaborators a watched job needs for its transitions.
#[derive(Clone)]
pub struct JobContext {
    submitter: Weak<dyn JobSubmitter>,
    blacklist: Arc<dyn FunctionBlacklistMaintainer>,
    job_ids: Arc<JobIdSource>,
}

impl JobContext {
    pub fn new(
        submitter: Weak<dyn JobSubmitter>,
        blacklist: Arc<dyn FunctionBlacklistMaintainer>,
        job_ids: Arc<JobIdSource>,
    ) -> Self {
        Self {
            submitter,
            blacklist,
            job_ids,
        }
    }

    pub fn job_ids(&self) -> &JobIdSource {
        &self.job_ids
    }

    pub(crate) fn submit(&self, job: DispatchableJob) {
        match self.submitter.upgrade() {
            Some(submitter) => submitter.submit(job),
            None => warn!(job_id = %job.job().job_id(), "dispatcher dropped, discarding job"),
        }
    }

    fn report_failed_item(&self, job_id: JobId, item: &CalculationJobItem) {
        warn!(
            job_id = %job_id,
            function_id = %item.function_id,
            target = %item.target,
            "item failed on its own, blacklisting"
        );
        self.blacklist.failed_job_item(item);
    }
}

/// A job in one of its dispatch shapes.
pub enum DispatchableJob {
    Standard(StandardJob),
    Whole(WholeWatchedJob),
    Split(SplitWatchedJob),
}

impl DispatchableJob {
    /// The job that goes to a compute node first.
    pub fn job(&self) -> &CalculationJob {
        match self {
            Self::Standard(standard) => standard.job(),
            Self::Whole(whole) => whole.job(),
            Self::Split(split) => split.first_job(),
        }
    }

    pub fn shape(&self) -> &'static str {
        match self {
            Self::Standard(_) => "standard",
            Self::Whole(_) => "whole",
            Self::Split(_) => "split",
        }
    }
}

/// A job without tails, dispatched without watching.
pub struct StandardJob {
    job: CalculationJob,
    receiver: Arc<dyn JobResultReceiver>,
}

impl StandardJob {
    pub fn new(job: CalculationJob, receiver: Arc<dyn JobResultReceiver>) -> Result<Self, JobError> {
        if job.has_tails() {
            return Err(JobError::TailsNotWatched(job.job_id()));
        }
        Ok(Self { job, receiver })
    }

    pub fn job(&self) -> &CalculationJob {
        &self.job
    }

    pub fn receiver(&self) -> &Arc<dyn JobResultReceiver> {
        &self.receiver
    }

    pub fn into_parts(self) -> (CalculationJob, Arc<dyn JobResultReceiver>) {
        (self.job, self.receiver)
    }

    /// Promote after a failure. `None` when the job has a single item, which
    /// is reported to the blacklist instead.
    pub fn create_watched_job(self, ctx: &JobContext) -> Option<WholeWatchedJob> {
        create_watched_job(self.job, self.receiver, ctx)
    }
}

/// Wrap `job` for watched dispatch.
///
/// A job with tails always becomes a `Whole` with adjusted cache hints and
/// its tails moved into a tail watch. A job without tails and with a single
/// item is reported to the blacklist and `None` is returned.
pub fn create_watched_job(
    job: CalculationJob,
    receiver: Arc<dyn JobResultReceiver>,
    ctx: &JobContext,
) -> Option<WholeWatchedJob> {
    if !job.has_tails() {
        if let [item] = job.items() {
            ctx.report_failed_item(job.job_id(), item);
            return None;
        }
    }
    Some(WholeWatchedJob::watch(job, receiver, ctx))
}

/// Demote to shared every value produced by one job of the tree and consumed
/// by another, in both jobs' hints.
pub fn adjust_cache_hints(root: &mut CalculationJob) {
    let mut producers: HashMap<ValueSpecification, JobId> = HashMap::new();
    root.for_each_job(&mut |job| {
        for output in job.outputs() {
            producers.insert(output.clone(), job.job_id());
        }
    });

    let mut shared: HashMap<JobId, HashSet<ValueSpecification>> = HashMap::new();
    root.for_each_job(&mut |job| {
        for input in job.inputs() {
            if let Some(&producer) = producers.get(input) {
                if producer != job.job_id() {
                    shared.entry(producer).or_default().insert(input.clone());
                    shared.entry(job.job_id()).or_default().insert(input.clone());
                }
            }
        }
    });

    root.for_each_job_mut(&mut |job| {
        if let Some(values) = shared.get(&job.job_id()) {
            let hint = job.cache_hint().with_shared(values);
            job.set_cache_hint(hint);
        }
    });
}

/// A job dispatched as one unit.
pub struct WholeWatchedJob {
    job: CalculationJob,
    receiver: Arc<dyn JobResultReceiver>,
}

impl WholeWatchedJob {
    /// Watch a job that carries no tails.
    pub(crate) fn new(job: CalculationJob, receiver: Arc<dyn JobResultReceiver>) -> Self {
        debug_assert!(!job.has_tails());
        Self { job, receiver }
    }

    /// Watch a job tree. Tails are detached and released by a tail watch as
    /// their predecessors report.
    pub fn watch(mut job: CalculationJob, upstream: Arc<dyn JobResultReceiver>, ctx: &JobContext) -> Self {
        if !job.has_tails() {
            return Self::new(job, upstream);
        }
        adjust_cache_hints(&mut job);
        let tails = job.take_tails();
        debug!(job_id = %job.job_id(), tails = tails.len(), "watching job tree");
        let watch: Arc<dyn JobResultReceiver> = TailWatch::new(tails, upstream, ctx.clone());
        Self::new(job, watch)
    }

    pub fn job(&self) -> &CalculationJob {
        &self.job
    }

    pub fn receiver(&self) -> &Arc<dyn JobResultReceiver> {
        &self.receiver
    }

    pub fn into_parts(self) -> (CalculationJob, Arc<dyn JobResultReceiver>) {
        (self.job, self.receiver)
    }

    /// Cut the job for a retry after `failure` (or after losing the job with
    /// no result at all).
    ///
    /// - single item: blacklisted, `None`
    /// - first failure at item k > 0: frozen prefix `[0, k)`, remainder `[k, n)`;
    ///   the prefix is sent again instead when the remainder reads one of its
    ///   private values
    /// - otherwise: prefix `[0, n/2)` sent first, then the remainder
    pub fn prepare_retry_job(
        self,
        failure: Option<&CalculationJobResult>,
        ctx: &JobContext,
    ) -> Option<SplitWatchedJob> {
        let Self { job, receiver } = self;
        let n = job.items().len();
        if let [item] = job.items() {
            ctx.report_failed_item(job.job_id(), item);
            return None;
        }

        let failed_at = failure
            .filter(|result| result.items.len() == n)
            .and_then(|result| result.first_failure().filter(|&k| k > 0));
        let split_at = failed_at.unwrap_or(n / 2);

        let (specification, mut items, hint, required) = job.into_parts();
        let remainder_items = items.split_off(split_at);

        let produced: HashSet<&ValueSpecification> =
            items.iter().flat_map(|item| item.outputs.iter()).collect();
        let crossing: HashSet<ValueSpecification> = remainder_items
            .iter()
            .flat_map(|item| item.inputs.iter())
            .filter(|value| produced.contains(value))
            .cloned()
            .collect();
        // a private value the remainder reads died with the failed attempt,
        // so the prefix must run again and publish it to the shared cache
        let prefix_published = !crossing.iter().any(|value| hint.is_private_value(value));

        let prefix_spec = specification.with_job_id(ctx.job_ids().next_id());
        let prefix = CalculationJob::fragment(prefix_spec, items, hint.with_shared(&crossing), required.clone());
        let remainder = CalculationJob::fragment(specification, remainder_items, hint.with_shared(&crossing), required);

        let prefix_result = failed_at
            .filter(|_| prefix_published)
            .zip(failure)
            .map(|(k, result)| {
                CalculationJobResult::new(
                    prefix.specification().clone(),
                    result.duration,
                    result.items[..k].to_vec(),
                    result.compute_node_id.clone(),
                )
            });

        debug!(
            job_id = %remainder.job_id(),
            prefix_job_id = %prefix.job_id(),
            split_at,
            frozen = prefix_result.is_some(),
            "split job for retry"
        );

        Some(SplitWatchedJob {
            prefix,
            remainder,
            prefix_result,
            receiver,
        })
    }
}

/// A failed job cut into a prefix and a remainder.
pub struct SplitWatchedJob {
    prefix: CalculationJob,
    remainder: CalculationJob,
    prefix_result: Option<CalculationJobResult>,
    receiver: Arc<dyn JobResultReceiver>,
}

impl SplitWatchedJob {
    pub fn prefix(&self) -> &CalculationJob {
        &self.prefix
    }

    pub fn remainder(&self) -> &CalculationJob {
        &self.remainder
    }

    /// Outcomes kept from the failed attempt, when the prefix is frozen.
    pub fn prefix_result(&self) -> Option<&CalculationJobResult> {
        self.prefix_result.as_ref()
    }

    pub fn is_prefix_frozen(&self) -> bool {
        self.prefix_result.is_some()
    }

    pub fn first_job(&self) -> &CalculationJob {
        if self.is_prefix_frozen() {
            &self.remainder
        } else {
            &self.prefix
        }
    }

    /// The first fragment to send. A frozen prefix skips straight to the
    /// remainder; a pending one is sent first and its success dispatches the
    /// remainder instead of reaching upstream.
    pub fn start(self, ctx: &JobContext) -> WholeWatchedJob {
        match self.prefix_result {
            Some(prefix_result) => WholeWatchedJob::new(
                self.remainder,
                Arc::new(AssembledResultReceiver::new(prefix_result, self.receiver)),
            ),
            None => WholeWatchedJob::new(
                self.prefix,
                Arc::new(RunRemainder {
                    remainder: Mutex::new(Some(self.remainder)),
                    upstream: self.receiver,
                    ctx: ctx.clone(),
                }),
            ),
        }
    }
}

/// Receives the prefix result and sends the remainder.
struct RunRemainder {
    remainder: Mutex<Option<CalculationJob>>,
    upstream: Arc<dyn JobResultReceiver>,
    ctx: JobContext,
}

impl JobResultReceiver for RunRemainder {
    fn result_received(&self, result: CalculationJobResult) {
        let Some(remainder) = self.remainder.lock().take() else {
            warn!(job_id = %result.job_id(), "duplicate prefix result ignored");
            return;
        };
        debug!(
            prefix_job_id = %result.job_id(),
            job_id = %remainder.job_id(),
            "prefix finished, sending remainder"
        );
        let assembled = Arc::new(AssembledResultReceiver::new(result, self.upstream.clone()));
        self.ctx
            .submit(DispatchableJob::Whole(WholeWatchedJob::new(remainder, assembled)));
    }
}

/// Joins the prefix outcomes with the remainder result into one result for
/// the original job.
pub(crate) struct AssembledResultReceiver {
    prefix: CalculationJobResult,
    upstream: Arc<dyn JobResultReceiver>,
}

impl AssembledResultReceiver {
    pub(crate) fn new(prefix: CalculationJobResult, upstream: Arc<dyn JobResultReceiver>) -> Self {
        Self { prefix, upstream }
    }
}

impl JobResultReceiver for AssembledResultReceiver {
    fn result_received(&self, result: CalculationJobResult) {
        let mut items = self.prefix.items.clone();
        items.extend(result.items);
        let compute_node_id = if self.prefix.compute_node_id == result.compute_node_id {
            result.compute_node_id
        } else {
            format!("{}, {}", self.prefix.compute_node_id, result.compute_node_id)
        };
        let assembled = CalculationJobResult::new(
            result.specification,
            self.prefix.duration + result.duration,
            items,
            compute_node_id,
        );
        self.upstream.result_received(assembled);
    }
}

/// Join bookkeeping for one job tree.
///
/// Every result is forwarded upstream, then each waiting tail whose
/// predecessors have all reported is released exactly once.
struct TailWatch {
    upstream: Arc<dyn JobResultReceiver>,
    ctx: JobContext,
    state: Mutex<JoinState>,
    this: Weak<TailWatch>,
}

struct JoinState {
    completed: HashSet<JobId>,
    waiting: BTreeMap<JobId, CalculationJob>,
}

impl TailWatch {
    fn new(tails: Vec<CalculationJob>, upstream: Arc<dyn JobResultReceiver>, ctx: JobContext) -> Arc<Self> {
        let waiting = tails.into_iter().map(|tail| (tail.job_id(), tail)).collect();
        Arc::new_cyclic(|this| Self {
            upstream,
            ctx,
            state: Mutex::new(JoinState {
                completed: HashSet::new(),
                waiting,
            }),
            this: this.clone(),
        })
    }
}

impl JoinState {
    fn complete(&mut self, job_id: JobId) -> Vec<CalculationJob> {
        if !self.completed.insert(job_id) {
            warn!(job_id = %job_id, "job reported twice; tails already considered");
            return Vec::new();
        }
        let ready: Vec<JobId> = self
            .waiting
            .values()
            .filter(|tail| {
                tail.required_job_ids()
                    .iter()
                    .all(|required| self.completed.contains(required))
            })
            .map(CalculationJob::job_id)
            .collect();

        let mut released = Vec::with_capacity(ready.len());
        for id in ready {
            if let Some(mut tail) = self.waiting.remove(&id) {
                for next in tail.take_tails() {
                    self.waiting.insert(next.job_id(), next);
                }
                released.push(tail);
            }
        }
        released
    }
}

impl JobResultReceiver for TailWatch {
    fn result_received(&self, result: CalculationJobResult) {
        let job_id = result.job_id();
        self.upstream.result_received(result);

        let released = self.state.lock().complete(job_id);
        if released.is_empty() {
            return;
        }
        let Some(this) = self.this.upgrade() else {
            return;
        };
        for tail in released {
            debug!(job_id = %tail.job_id(), after = %job_id, "releasing tail");
            let receiver: Arc<dyn JobResultReceiver> = this.clone();
            self.ctx
                .submit(DispatchableJob::Whole(WholeWatchedJob::new(tail, receiver)));
        }
    }
}
