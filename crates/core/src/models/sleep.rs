use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;

use super::experiment::{Experiment, ExperimentId, ExperimentState};
use super::status::ExperimentStatus;

/// 休眠指定时长的实验，用于演示和测试
#[derive(Debug)]
pub struct SleepExperiment {
    id: ExperimentId,
    name: String,
    duration: Duration,
    timeout: Duration,
    failure: Option<String>,
    state: ExperimentState,
    executions: AtomicUsize,
    body_completed: AtomicBool,
}

impl SleepExperiment {
    pub fn new(id: ExperimentId, duration: Duration) -> Self {
        Self {
            id,
            name: format!("sleep-{id}"),
            duration,
            timeout: Duration::ZERO,
            failure: None,
            state: ExperimentState::new(ExperimentStatus::Ready),
            executions: AtomicUsize::new(0),
            body_completed: AtomicBool::new(false),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_status(self, status: ExperimentStatus) -> Self {
        self.state.set_status(status);
        self
    }

    /// 休眠结束后以给定信息失败
    pub fn failing(mut self, message: impl Into<String>) -> Self {
        self.failure = Some(message.into());
        self
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }

    pub fn state(&self) -> &ExperimentState {
        &self.state
    }

    /// `execute` 被调用的次数
    pub fn executions(&self) -> usize {
        self.executions.load(Ordering::SeqCst)
    }

    /// 休眠是否完整结束（被中止的任务不会走到这里）
    pub fn body_completed(&self) -> bool {
        self.body_completed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Experiment for SleepExperiment {
    fn id(&self) -> ExperimentId {
        self.id
    }

    fn name(&self) -> String {
        self.name.clone()
    }

    fn status(&self) -> ExperimentStatus {
        self.state.status()
    }

    fn set_status(&self, status: ExperimentStatus) {
        self.state.set_status(status);
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    fn declare_timeout(&self) {
        self.state.declare_timeout();
    }

    fn has_timed_out(&self) -> bool {
        self.state.has_timed_out()
    }

    fn progression(&self) -> f64 {
        match self.state.status() {
            ExperimentStatus::Done => 1.0,
            ExperimentStatus::Running => {
                let Some(started) = self.state.started_at() else {
                    return 0.0;
                };
                if self.duration.is_zero() {
                    return 0.0;
                }
                let elapsed = (Utc::now() - started).to_std().unwrap_or_default();
                (elapsed.as_secs_f64() / self.duration.as_secs_f64()).min(0.99)
            }
            _ => 0.0,
        }
    }

    async fn execute(&self) {
        self.executions.fetch_add(1, Ordering::SeqCst);
        self.state
            .run(async {
                tokio::time::sleep(self.duration).await;
                self.body_completed.store(true, Ordering::SeqCst);
                match &self.failure {
                    Some(message) => Err(message.clone().into()),
                    None => Ok(()),
                }
            })
            .await;
    }
}
