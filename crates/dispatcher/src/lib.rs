//! 实验派发层：调度策略、运行批次派发器与实验助手

pub mod assistant;
pub mod balance;
pub mod run;
pub mod strategies;


pub use assistant::{Assistant, AssistantBuilder};
pub use balance::{BalanceObjects, CoverageSubsample};
pub use run::{AssistantRun, RunDispatcher, RunId, RunState, RunSummary};
pub use strategies::*;
