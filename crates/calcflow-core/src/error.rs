//! Error types.
//!
//! Step failures are not errors: they travel in-band as failed result items
//! and drive the retry machinery. The types here cover illegal use of the API
//! and failures at the boundaries (worker transport, configuration, function
//! lookup).

use thiserror::Error;

use crate::domain::ids::{JobId, ViewClientId};

/// Illegal construction or shaping of a calculation job.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum JobError {
    #[error("job {0} has no items")]
    EmptyJob(JobId),

    #[error("job {0} cannot be its own tail")]
    SelfTail(JobId),

    #[error("tail {tail} does not list {parent} among its predecessors")]
    UnrelatedTail { tail: JobId, parent: JobId },

    #[error("job {0} has tails and must be dispatched watched")]
    TailsNotWatched(JobId),
}

/// A job could not be executed at all (no per-item outcome available).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum InvocationError {
    #[error("compute node lost while running job {0}")]
    NodeLost(JobId),

    #[error("job {job_id} timed out")]
    Timeout { job_id: JobId },

    #[error("invocation of job {job_id} failed: {reason}")]
    Failed { job_id: JobId, reason: String },

    /// The job's cycle is gone; nobody waits for the result.
    #[error("job {job_id} abandoned with its cycle")]
    Abandoned { job_id: JobId },
}

/// Errors raised by a calculation function for one item.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FunctionError {
    #[error("no function registered for id={0}")]
    FunctionNotFound(String),

    #[error("duplicate function for id={0}")]
    DuplicateFunction(String),

    #[error("missing input {0}")]
    MissingInput(String),

    #[error("{0}")]
    Execution(String),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ViewClientError {
    #[error("view client {0} has been shut down")]
    Terminated(ViewClientId),

    #[error("view client {0} is not attached to a view process")]
    NotAttached(ViewClientId),

    #[error(transparent)]
    Processor(#[from] ViewProcessorError),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ViewProcessorError {
    #[error("view processor is not running")]
    NotRunning,

    #[error("unknown view definition: {0}")]
    UnknownViewDefinition(String),

    #[error("duplicate view definition: {0}")]
    DuplicateViewDefinition(String),

    #[error("view processor is missing a {0}")]
    MissingComponent(&'static str),

    #[error("view definition {definition} has a dependency cycle through {values:?}")]
    DependencyCycle {
        definition: String,
        values: Vec<String>,
    },

    #[error(transparent)]
    InvalidJob(#[from] JobError),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config value for {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}

/// Umbrella error for callers that do not care which area failed.
#[derive(Debug, Error)]
pub enum CalcflowError {
    #[error(transparent)]
    Job(#[from] JobError),

    #[error(transparent)]
    Invocation(#[from] InvocationError),

    #[error(transparent)]
    Function(#[from] FunctionError),

    #[error(transparent)]
    ViewClient(#[from] ViewClientError),

    #[error(transparent)]
    ViewProcessor(#[from] ViewProcessorError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

pub type Result<T, E = CalcflowError> = std::result::Result<T, E>;
