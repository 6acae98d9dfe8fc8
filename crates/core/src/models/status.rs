use serde::{Deserialize, Serialize};
use std::fmt;

/// 实验生命周期状态
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum ExperimentStatus {
    #[serde(rename = "NOT_STARTED")]
    NotStarted,
    #[serde(rename = "READY")]
    Ready,
    #[serde(rename = "RUNNING")]
    Running,
    #[serde(rename = "DONE")]
    Done,
    #[serde(rename = "FAILED")]
    Failed,
    #[serde(rename = "INTERRUPTED")]
    Interrupted,
}

impl ExperimentStatus {
    /// 是否已处于终止状态（完成、失败或被中断）
    pub fn is_finished(&self) -> bool {
        matches!(
            self,
            ExperimentStatus::Done | ExperimentStatus::Failed | ExperimentStatus::Interrupted
        )
    }

    /// 是否仍在等待执行
    pub fn is_pending(&self) -> bool {
        matches!(self, ExperimentStatus::NotStarted | ExperimentStatus::Ready)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ExperimentStatus::NotStarted => "NOT_STARTED",
            ExperimentStatus::Ready => "READY",
            ExperimentStatus::Running => "RUNNING",
            ExperimentStatus::Done => "DONE",
            ExperimentStatus::Failed => "FAILED",
            ExperimentStatus::Interrupted => "INTERRUPTED",
        }
    }

    fn rank(&self) -> u8 {
        match self {
            ExperimentStatus::Failed | ExperimentStatus::Interrupted => 0,
            ExperimentStatus::Running => 1,
            ExperimentStatus::NotStarted => 2,
            ExperimentStatus::Ready => 3,
            ExperimentStatus::Done => 4,
        }
    }

    /// 聚合一组状态，返回其中"最差"的一个
    ///
    /// 排序为 失败/中断 < 运行中 < 未开始 < 就绪 < 完成，空集合视为完成。
    pub fn lowest<I>(statuses: I) -> ExperimentStatus
    where
        I: IntoIterator<Item = ExperimentStatus>,
    {
        statuses
            .into_iter()
            .min_by_key(|status| status.rank())
            .unwrap_or(ExperimentStatus::Done)
    }
}

impl fmt::Display for ExperimentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
