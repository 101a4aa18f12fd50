//! Calculation jobs: the unit of work sent to a compute node.
//!
//! Design:
//! - Items run in order; later items may read the outputs of earlier ones.
//! - Tails are owned by their parent, so a job tree has no back-pointers.
//! - Extra join edges (a tail waiting on several jobs) are expressed only as
//!   predecessor job ids in `required_job_ids`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::cache_hint::CacheSelectHint;
use crate::domain::ids::{CycleId, JobId};
use crate::domain::value::{ComputationTarget, ValueSpecification};
use crate::error::JobError;

/// Identity of a job: which cycle and calc config it belongs to, and its id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CalculationJobSpecification {
    pub cycle_id: CycleId,
    pub calc_config_name: String,
    pub valuation_time: DateTime<Utc>,
    pub job_id: JobId,
}

impl CalculationJobSpecification {
    pub fn new(
        cycle_id: CycleId,
        calc_config_name: impl Into<String>,
        valuation_time: DateTime<Utc>,
        job_id: JobId,
    ) -> Self {
        Self {
            cycle_id,
            calc_config_name: calc_config_name.into(),
            valuation_time,
            job_id,
        }
    }

    /// Same cycle and configuration, different job id.
    pub fn with_job_id(&self, job_id: JobId) -> Self {
        Self {
            job_id,
            ..self.clone()
        }
    }
}

/// One function invocation on one target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalculationJobItem {
    pub function_id: String,
    pub parameters: serde_json::Value,
    pub target: ComputationTarget,
    pub inputs: Vec<ValueSpecification>,
    pub outputs: Vec<ValueSpecification>,
}

impl CalculationJobItem {
    pub fn new(
        function_id: impl Into<String>,
        target: ComputationTarget,
        inputs: Vec<ValueSpecification>,
        outputs: Vec<ValueSpecification>,
    ) -> Self {
        Self {
            function_id: function_id.into(),
            parameters: serde_json::Value::Null,
            target,
            inputs,
            outputs,
        }
    }

    pub fn with_parameters(mut self, parameters: serde_json::Value) -> Self {
        self.parameters = parameters;
        self
    }
}

/// A non-empty ordered list of items plus the jobs that run after it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalculationJob {
    specification: CalculationJobSpecification,
    items: Vec<CalculationJobItem>,
    cache_hint: CacheSelectHint,
    required_job_ids: Option<Vec<JobId>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    tails: Vec<CalculationJob>,
}

impl CalculationJob {
    pub fn new(
        specification: CalculationJobSpecification,
        items: Vec<CalculationJobItem>,
        cache_hint: CacheSelectHint,
    ) -> Result<Self, JobError> {
        if items.is_empty() {
            return Err(JobError::EmptyJob(specification.job_id));
        }
        Ok(Self {
            specification,
            items,
            cache_hint,
            required_job_ids: None,
            tails: Vec::new(),
        })
    }

    /// Declare the jobs that must finish before this one may start.
    pub fn with_required_job_ids(mut self, required: Vec<JobId>) -> Self {
        self.required_job_ids = Some(required);
        self
    }

    pub fn job_id(&self) -> JobId {
        self.specification.job_id
    }

    pub fn specification(&self) -> &CalculationJobSpecification {
        &self.specification
    }

    pub fn items(&self) -> &[CalculationJobItem] {
        &self.items
    }

    pub fn cache_hint(&self) -> &CacheSelectHint {
        &self.cache_hint
    }

    pub fn set_cache_hint(&mut self, cache_hint: CacheSelectHint) {
        self.cache_hint = cache_hint;
    }

    /// Predecessors of this job; empty for a root.
    pub fn required_job_ids(&self) -> &[JobId] {
        self.required_job_ids.as_deref().unwrap_or(&[])
    }

    pub fn tails(&self) -> &[CalculationJob] {
        &self.tails
    }

    pub fn has_tails(&self) -> bool {
        !self.tails.is_empty()
    }

    /// Attach a job to run after this one.
    ///
    /// A tail that declares no predecessors waits for this job only. A tail
    /// that declares predecessors must list this job among them.
    pub fn add_tail(&mut self, mut tail: CalculationJob) -> Result<(), JobError> {
        let parent = self.job_id();
        if tail.job_id() == parent {
            return Err(JobError::SelfTail(parent));
        }
        match &tail.required_job_ids {
            None => tail.required_job_ids = Some(vec![parent]),
            Some(required) if !required.contains(&parent) => {
                return Err(JobError::UnrelatedTail {
                    tail: tail.job_id(),
                    parent,
                });
            }
            Some(_) => {}
        }
        self.tails.push(tail);
        Ok(())
    }

    /// Detach and return the tails, leaving this job without any.
    pub fn take_tails(&mut self) -> Vec<CalculationJob> {
        std::mem::take(&mut self.tails)
    }

    /// This job plus every transitive tail.
    pub fn job_count(&self) -> usize {
        1 + self.tails.iter().map(CalculationJob::job_count).sum::<usize>()
    }

    pub fn outputs(&self) -> impl Iterator<Item = &ValueSpecification> {
        self.items.iter().flat_map(|item| item.outputs.iter())
    }

    pub fn inputs(&self) -> impl Iterator<Item = &ValueSpecification> {
        self.items.iter().flat_map(|item| item.inputs.iter())
    }

    /// Visit this job and every transitive tail, parents first.
    pub fn for_each_job<'a>(&'a self, f: &mut impl FnMut(&'a CalculationJob)) {
        f(self);
        for tail in &self.tails {
            tail.for_each_job(f);
        }
    }

    pub(crate) fn for_each_job_mut(&mut self, f: &mut impl FnMut(&mut CalculationJob)) {
        f(self);
        for tail in &mut self.tails {
            tail.for_each_job_mut(f);
        }
    }

    /// Fragment of an already validated job. `items` must not be empty.
    pub(crate) fn fragment(
        specification: CalculationJobSpecification,
        items: Vec<CalculationJobItem>,
        cache_hint: CacheSelectHint,
        required_job_ids: Option<Vec<JobId>>,
    ) -> Self {
        debug_assert!(!items.is_empty());
        Self {
            specification,
            items,
            cache_hint,
            required_job_ids,
            tails: Vec::new(),
        }
    }

    pub(crate) fn into_parts(
        self,
    ) -> (
        CalculationJobSpecification,
        Vec<CalculationJobItem>,
        CacheSelectHint,
        Option<Vec<JobId>>,
    ) {
        (self.specification, self.items, self.cache_hint, self.required_job_ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job(id: u64, names: &[&str]) -> CalculationJob {
        let spec = CalculationJobSpecification::new(
            CycleId::generate(),
            "Default",
            Utc::now(),
            JobId::new(id),
        );
        let items = names
            .iter()
            .map(|name| {
                CalculationJobItem::new(
                    "f",
                    ComputationTarget::primitive(*name),
                    vec![],
                    vec![ValueSpecification::new(*name, ComputationTarget::primitive(*name), "f")],
                )
            })
            .collect();
        CalculationJob::new(spec, items, CacheSelectHint::all_shared()).unwrap()
    }

    #[test]
    fn empty_job_is_rejected() {
        let spec = CalculationJobSpecification::new(
            CycleId::generate(),
            "Default",
            Utc::now(),
            JobId::new(1),
        );
        let err = CalculationJob::new(spec, vec![], CacheSelectHint::all_shared()).unwrap_err();
        assert!(matches!(err, JobError::EmptyJob(id) if id == JobId::new(1)));
    }

    #[test]
    fn tail_without_predecessors_waits_for_parent() {
        let mut parent = job(1, &["A"]);
        parent.add_tail(job(2, &["B"])).unwrap();

        assert_eq!(parent.tails()[0].required_job_ids(), &[JobId::new(1)]);
        assert_eq!(parent.job_count(), 2);
    }

    #[test]
    fn tail_with_own_id_is_rejected() {
        let mut parent = job(1, &["A"]);
        let err = parent.add_tail(job(1, &["B"])).unwrap_err();
        assert!(matches!(err, JobError::SelfTail(_)));
    }

    #[test]
    fn tail_must_list_parent_as_predecessor() {
        let mut parent = job(1, &["A"]);
        let tail = job(3, &["C"]).with_required_job_ids(vec![JobId::new(2)]);
        let err = parent.add_tail(tail).unwrap_err();
        assert!(matches!(
            err,
            JobError::UnrelatedTail { tail, parent } if tail == JobId::new(3) && parent == JobId::new(1)
        ));
    }

    #[test]
    fn take_tails_detaches_the_tree() {
        let mut parent = job(1, &["A"]);
        let mut middle = job(2, &["B"]);
        middle.add_tail(job(3, &["C"])).unwrap();
        parent.add_tail(middle).unwrap();
        assert_eq!(parent.job_count(), 3);

        let tails = parent.take_tails();
        assert_eq!(tails.len(), 1);
        assert!(!parent.has_tails());
        assert_eq!(tails[0].job_count(), 2);
    }

    #[test]
    fn for_each_job_visits_parents_first() {
        let mut parent = job(1, &["A"]);
        let mut middle = job(2, &["B"]);
        middle.add_tail(job(3, &["C"])).unwrap();
        parent.add_tail(middle).unwrap();

        let mut seen = Vec::new();
        parent.for_each_job(&mut |j| seen.push(j.job_id().value()));
        assert_eq!(seen, vec![1, 2, 3]);
    }
}
