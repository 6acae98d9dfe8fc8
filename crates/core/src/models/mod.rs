//! # 数据模型
//!
//! 实验调度引擎的核心数据结构：实验、实验状态以及三值逻辑结果。
//!
//! ## 核心模型
//!
//! ### Experiment - 实验
//! 带生命周期状态和超时配置的工作单元，由外部实现，引擎只读写其状态并调用执行入口。
//!
//! ### ExperimentState - 生命周期记录
//! 供具体实验嵌入的线程安全状态记录，实现"就绪 → 运行中 → 完成/失败"的标准流转。
//!
//! ### Troolean - 三值逻辑
//! 条件门控使用的 `TRUE`/`FALSE`/`INCONCLUSIVE` 结果。

pub mod experiment;
pub mod sleep;
pub mod status;
pub mod troolean;

pub use experiment::{
    Experiment, ExperimentId, ExperimentRef, ExperimentSnapshot, ExperimentState,
};
pub use sleep::SleepExperiment;
pub use status::ExperimentStatus;
pub use troolean::Troolean;
