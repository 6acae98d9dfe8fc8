use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::status::ExperimentStatus;
use crate::errors::ExperimentError;

pub type ExperimentId = i64;

/// 引擎调度的实验单元
///
/// 引擎从不构造实验，只读写其状态并调用 `execute`。
/// 队列去重以 `id` 作为实验身份。
#[async_trait]
pub trait Experiment: Send + Sync {
    fn id(&self) -> ExperimentId;

    fn name(&self) -> String {
        format!("experiment-{}", self.id())
    }

    fn status(&self) -> ExperimentStatus;

    fn set_status(&self, status: ExperimentStatus);

    /// 超时时长，零表示不限时
    fn timeout(&self) -> Duration {
        Duration::ZERO
    }

    /// 超时监视器在超时发生时调用
    fn declare_timeout(&self);

    fn has_timed_out(&self) -> bool;

    /// 执行进度，取值范围 [0, 1]
    fn progression(&self) -> f64 {
        if self.status() == ExperimentStatus::Done {
            1.0
        } else {
            0.0
        }
    }

    async fn execute(&self);
}

pub type ExperimentRef = Arc<dyn Experiment>;

/// 实验状态快照，供报告和序列化使用
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExperimentSnapshot {
    pub id: ExperimentId,
    pub name: String,
    pub status: ExperimentStatus,
    pub timed_out: bool,
    pub progression: f64,
}

impl ExperimentSnapshot {
    pub fn of(experiment: &dyn Experiment) -> Self {
        Self {
            id: experiment.id(),
            name: experiment.name(),
            status: experiment.status(),
            timed_out: experiment.has_timed_out(),
            progression: experiment.progression(),
        }
    }
}

#[derive(Debug)]
struct StateInner {
    status: ExperimentStatus,
    started_at: Option<DateTime<Utc>>,
    ended_at: Option<DateTime<Utc>>,
    timeout_count: u32,
    error_message: Option<String>,
}

/// 线程安全的实验生命周期记录，具体实验类型嵌入使用
#[derive(Debug)]
pub struct ExperimentState {
    inner: Mutex<StateInner>,
}

impl ExperimentState {
    pub fn new(status: ExperimentStatus) -> Self {
        Self {
            inner: Mutex::new(StateInner {
                status,
                started_at: None,
                ended_at: None,
                timeout_count: 0,
                error_message: None,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, StateInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn status(&self) -> ExperimentStatus {
        self.lock().status
    }

    pub fn set_status(&self, status: ExperimentStatus) {
        self.lock().status = status;
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.lock().started_at
    }

    pub fn ended_at(&self) -> Option<DateTime<Utc>> {
        self.lock().ended_at
    }

    pub fn error_message(&self) -> Option<String> {
        self.lock().error_message.clone()
    }

    pub fn declare_timeout(&self) {
        let mut inner = self.lock();
        inner.timeout_count += 1;
        inner.ended_at = Some(Utc::now());
    }

    pub fn has_timed_out(&self) -> bool {
        self.lock().timeout_count > 0
    }

    pub fn timeout_count(&self) -> u32 {
        self.lock().timeout_count
    }

    /// 已运行时长：结束则为 结束-开始，否则为 当前-开始
    pub fn elapsed(&self) -> Option<chrono::Duration> {
        let inner = self.lock();
        let start = inner.started_at?;
        Some(inner.ended_at.unwrap_or_else(Utc::now) - start)
    }

    /// 按标准生命周期执行实验主体
    ///
    /// 已终止的实验不会再次执行。主体成功时仅当状态仍为运行中才置为完成，
    /// 因为超时监视器可能已将其标记为中断。任务被中止时也会记录结束时间。
    pub async fn run<F>(&self, body: F)
    where
        F: Future<Output = Result<(), ExperimentError>>,
    {
        {
            let mut inner = self.lock();
            if inner.status.is_finished() {
                debug!("实验已处于终止状态 {}，跳过执行", inner.status);
                return;
            }
            inner.status = ExperimentStatus::Running;
            inner.started_at = Some(Utc::now());
            inner.ended_at = None;
        }

        let _end = EndGuard { state: self };

        match body.await {
            Ok(()) => {
                let mut inner = self.lock();
                if inner.status == ExperimentStatus::Running {
                    inner.status = ExperimentStatus::Done;
                }
            }
            Err(err) => {
                warn!("实验执行失败: {err}");
                let mut inner = self.lock();
                if inner.status == ExperimentStatus::Running {
                    inner.status = ExperimentStatus::Failed;
                }
                inner.error_message = Some(err.to_string());
            }
        }
    }
}

impl Default for ExperimentState {
    fn default() -> Self {
        Self::new(ExperimentStatus::Ready)
    }
}

struct EndGuard<'a> {
    state: &'a ExperimentState,
}

impl Drop for EndGuard<'_> {
    fn drop(&mut self) {
        let mut inner = self.state.lock();
        if inner.ended_at.is_none() {
            inner.ended_at = Some(Utc::now());
        }
    }
}
