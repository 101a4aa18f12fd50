//! calcflow-core
//!
//! A continuous, multi-subscriber computation engine.
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（ids, values, jobs, results, view definitions）
//! - **ports**: 抽象化レイヤー（JobInvoker, live data, blacklist, listeners, Clock, IdGenerator）
//! - **dispatch**: job dispatch with watched retry (re-send, split, blacklist)
//! - **graph**: dependency graph and view compilation into job trees
//! - **view**: ViewProcessor / ViewProcess / ViewComputationJob / ViewClient
//! - **impls**: in-process implementations (local node, caches, live data, blacklist)
//! - **config** / **logging** / **error**

pub mod config;
pub mod dispatch;
pub mod domain;
pub mod error;
pub mod graph;
pub mod impls;
pub mod logging;
pub mod ports;
pub mod view;

pub use config::EngineConfig;
pub use error::{CalcflowError, Result};
pub use view::{ViewClient, ViewProcess, ViewProcessor, ViewProcessorBuilder};
