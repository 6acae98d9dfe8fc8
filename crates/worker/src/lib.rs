//! 实验执行层：工作池服务、超时监视器与条件门控

pub mod gate;
pub mod pool;
pub mod task;
pub mod watcher;

pub use gate::ConditionGate;
pub use pool::{
    Job, PoolShape, QueuedWorkerPool, ShutdownMode, WorkerPool, WorkerPoolFactory,
};
pub use task::{TaskHandle, TaskOutcome};
pub use watcher::{TimeoutWatcher, WatchOutcome};
