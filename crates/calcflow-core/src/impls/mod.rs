//! Impls - ports の実装（インプロセス用・テスト用）
//!
//! # 含まれる実装
//! - **InMemoryLkvSnapshotProvider**: last known value のライブデータ
//! - **InMemoryFunctionBlacklist**: 失敗した関数/ターゲットの記録
//! - **ViewComputationCacheSource**: サイクルごとの値キャッシュ
//! - **LocalNodeJobInvoker**: プロセス内で動く計算ノード

pub mod computation_cache;
pub mod function;
pub mod inmem_blacklist;
pub mod inmem_live_data;
pub mod local_node;

pub use self::computation_cache::{ViewComputationCache, ViewComputationCacheSource};
pub use self::function::{
    CalculationFunction, ExecutionFunction, FunctionExecutionContext, FunctionRepository, LiveDataSourcingFunction,
};
pub use self::inmem_blacklist::InMemoryFunctionBlacklist;
pub use self::inmem_live_data::InMemoryLkvSnapshotProvider;
pub use self::local_node::LocalNodeJobInvoker;
