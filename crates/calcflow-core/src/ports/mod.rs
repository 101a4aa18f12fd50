//! Ports - 抽象化レイヤー
//!
//! 計算エンジンの外側（計算ノード、市場データ、ブラックリスト、結果の購読者）
//! とのインターフェースを trait として定義します。

pub mod blacklist;
pub mod clock;
pub mod id_generator;
pub mod invoker;
pub mod listener;
pub mod live_data;

pub use self::blacklist::{FunctionBlacklistMaintainer, FunctionBlacklistQuery};
pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::id_generator::{IdGenerator, JobIdSource, UlidGenerator};
pub use self::invoker::JobInvoker;
pub use self::listener::{ComputationResultListener, DeltaResultListener, JobResultReceiver};
pub use self::live_data::{
    LiveDataAvailabilityProvider, LiveDataInjector, LiveDataListener, LiveDataSnapshotProvider,
    SnapshotId,
};
