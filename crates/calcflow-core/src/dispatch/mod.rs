//! Job dispatch: watched jobs, retries and the dispatcher itself.

pub mod dispatcher;
pub mod retry;
pub mod stats;
pub mod watched;

#[cfg(test)]
pub(crate) mod testing;

pub use dispatcher::JobDispatcher;
pub use retry::RetryPolicy;
pub use stats::DispatcherStats;
pub use watched::{
    adjust_cache_hints, create_watched_job, DispatchableJob, JobContext, JobSubmitter, SplitWatchedJob,
    StandardJob, WholeWatchedJob,
};
