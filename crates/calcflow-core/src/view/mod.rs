//! View layer - processor, processes, computation jobs and clients.
//!
//! # 所有関係
//! - `ViewProcessor` owns the processes, keyed by definition name
//! - a `ViewProcess` owns its `ViewComputationJob` and the spawned task
//! - a `ViewClient` is attached to at most one process at a time

pub mod client;
pub mod computation_job;
pub mod process;
pub mod processor;

pub use client::ViewClient;
pub use computation_job::ViewComputationJob;
pub use process::ViewProcess;
pub use processor::{ViewProcessor, ViewProcessorBuilder};
