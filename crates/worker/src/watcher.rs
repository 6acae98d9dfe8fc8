use tokio::task::JoinHandle;
use tracing::{debug, warn};

use lab_core::{ExperimentRef, ExperimentStatus};

use crate::task::{TaskHandle, TaskOutcome};

/// 超时监视结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchOutcome {
    /// 任务正常结束，实验自行设置了终止状态
    Completed,
    /// 任务未开始即被丢弃，实验状态保持不变
    Discarded,
    /// 任务被中止或异常结束
    Interrupted,
    /// 超过实验配置的超时时长
    TimedOut,
}

/// 单个实验的超时监视器
///
/// 超时窗口从任务开始执行时计算，零超时表示无限等待。
/// 超时后实验被标记为中断，调用其超时钩子，并中止仍在运行的任务。
pub struct TimeoutWatcher;

impl TimeoutWatcher {
    /// 在独立的后台任务中监视
    pub fn spawn(experiment: ExperimentRef, handle: TaskHandle) -> JoinHandle<WatchOutcome> {
        tokio::spawn(Self::watch(experiment, handle))
    }

    pub async fn watch(experiment: ExperimentRef, handle: TaskHandle) -> WatchOutcome {
        if !handle.wait_started().await {
            debug!("实验 {} 未开始即被丢弃", experiment.id());
            return WatchOutcome::Discarded;
        }

        let timeout = experiment.timeout();
        let outcome = if timeout.is_zero() {
            Some(handle.wait().await)
        } else {
            tokio::time::timeout(timeout, handle.wait()).await.ok()
        };

        match outcome {
            Some(TaskOutcome::Completed) => WatchOutcome::Completed,
            Some(TaskOutcome::Discarded) => WatchOutcome::Discarded,
            Some(TaskOutcome::Cancelled) | Some(TaskOutcome::Panicked) => {
                debug!("实验 {} 被中断", experiment.id());
                experiment.set_status(ExperimentStatus::Interrupted);
                WatchOutcome::Interrupted
            }
            None => {
                warn!(
                    "实验 {} 执行超时 ({:?})，中止任务",
                    experiment.id(),
                    timeout
                );
                experiment.set_status(ExperimentStatus::Interrupted);
                experiment.declare_timeout();
                handle.cancel();
                metrics::counter!("lab_experiments_timed_out_total").increment(1);
                WatchOutcome::TimedOut
            }
        }
    }
}
