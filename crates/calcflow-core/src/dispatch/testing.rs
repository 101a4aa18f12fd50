//! Test doubles shared by the dispatch tests.

use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;

use crate::dispatch::watched::{DispatchableJob, JobContext, JobSubmitter};
use crate::domain::{
    CacheSelectHint, CalculationJob, CalculationJobItem, CalculationJobResult, CalculationJobResultItem,
    CalculationJobSpecification, ComputationTarget, CycleId, JobId, ValueSpecification,
};
use crate::ports::{FunctionBlacklistMaintainer, JobIdSource, JobResultReceiver};

#[derive(Default)]
pub struct RecordingSubmitter {
    submitted: Mutex<Vec<DispatchableJob>>,
}

impl RecordingSubmitter {
    pub fn take(&self) -> Vec<DispatchableJob> {
        std::mem::take(&mut *self.submitted.lock())
    }
}

impl JobSubmitter for RecordingSubmitter {
    fn submit(&self, job: DispatchableJob) {
        self.submitted.lock().push(job);
    }
}

#[derive(Default)]
pub struct RecordingReceiver {
    results: Mutex<Vec<CalculationJobResult>>,
}

impl RecordingReceiver {
    pub fn take(&self) -> Vec<CalculationJobResult> {
        std::mem::take(&mut *self.results.lock())
    }
}

impl JobResultReceiver for RecordingReceiver {
    fn result_received(&self, result: CalculationJobResult) {
        self.results.lock().push(result);
    }
}

#[derive(Default)]
pub struct RecordingBlacklist {
    items: Mutex<Vec<CalculationJobItem>>,
}

impl RecordingBlacklist {
    pub fn items(&self) -> Vec<CalculationJobItem> {
        self.items.lock().clone()
    }
}

impl FunctionBlacklistMaintainer for RecordingBlacklist {
    fn failed_job_item(&self, item: &CalculationJobItem) {
        self.items.lock().push(item.clone());
    }
}

/// A context wired to recording doubles.
pub struct Harness {
    pub submitter: Arc<RecordingSubmitter>,
    pub blacklist: Arc<RecordingBlacklist>,
    pub job_ids: Arc<JobIdSource>,
    pub ctx: JobContext,
    pub cycle_id: CycleId,
}

impl Harness {
    pub fn new() -> Self {
        let submitter = Arc::new(RecordingSubmitter::default());
        let blacklist = Arc::new(RecordingBlacklist::default());
        let job_ids = Arc::new(JobIdSource::new());
        let as_submitter: Arc<dyn JobSubmitter> = submitter.clone();
        let ctx = JobContext::new(Arc::downgrade(&as_submitter), blacklist.clone(), job_ids.clone());
        Self {
            submitter,
            blacklist,
            job_ids,
            ctx,
            cycle_id: CycleId::generate(),
        }
    }

    pub fn spec(&self) -> CalculationJobSpecification {
        CalculationJobSpecification::new(self.cycle_id, "Default", Utc::now(), self.job_ids.next_id())
    }

    pub fn job(&self, items: Vec<CalculationJobItem>, hint: CacheSelectHint) -> CalculationJob {
        CalculationJob::new(self.spec(), items, hint).unwrap()
    }

    pub fn job_after(
        &self,
        required: &[JobId],
        items: Vec<CalculationJobItem>,
        hint: CacheSelectHint,
    ) -> CalculationJob {
        self.job(items, hint).with_required_job_ids(required.to_vec())
    }
}

pub fn target() -> ComputationTarget {
    ComputationTarget::primitive("Foo")
}

/// Value `name` produced by function `name` on the shared target.
pub fn vs(name: &str) -> ValueSpecification {
    ValueSpecification::new(name, target(), name)
}

/// Item run by function `function`, reading `inputs` and producing `function`.
pub fn item(function: &str, inputs: &[&str]) -> CalculationJobItem {
    CalculationJobItem::new(
        function,
        target(),
        inputs.iter().map(|name| vs(name)).collect(),
        vec![vs(function)],
    )
}

pub fn succeeded(job: &CalculationJob, node: &str) -> CalculationJobResult {
    outcome(job, node, &vec![true; job.items().len()])
}

pub fn outcome(job: &CalculationJob, node: &str, ok: &[bool]) -> CalculationJobResult {
    let items = ok
        .iter()
        .map(|&ok| {
            if ok {
                CalculationJobResultItem::Success
            } else {
                CalculationJobResultItem::failure("Foo", "Bar")
            }
        })
        .collect();
    CalculationJobResult::new(job.specification().clone(), std::time::Duration::ZERO, items, node)
}
