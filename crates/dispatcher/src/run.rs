//! 运行批次：派发器主体与对外句柄

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use lab_core::{Experiment, ExperimentId, ExperimentRef, ExperimentSnapshot, ExperimentStatus};
use lab_worker::{
    ConditionGate, Job, ShutdownMode, TaskHandle, TimeoutWatcher, WatchOutcome, WorkerPool,
};

pub type RunId = u64;

/// 运行批次状态：已创建 → 运行中 → 已终止
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunState {
    #[serde(rename = "CREATED")]
    Created,
    #[serde(rename = "RUNNING")]
    Running,
    #[serde(rename = "TERMINATED")]
    Terminated,
}

#[derive(Debug, Default)]
struct RunTimes {
    started_at: Option<DateTime<Utc>>,
    ended_at: Option<DateTime<Utc>>,
}

/// 派发器与句柄共享的运行批次数据；实验列表创建后只读
pub(crate) struct RunShared {
    id: RunId,
    experiments: Vec<ExperimentRef>,
    pool: Arc<dyn WorkerPool>,
    times: Mutex<RunTimes>,
    /// 按提交序号登记，同一实验在批次中出现多次时互不覆盖
    running: Mutex<BTreeMap<usize, ExperimentRef>>,
    state: watch::Sender<RunState>,
}

impl RunShared {
    pub(crate) fn new(
        id: RunId,
        experiments: Vec<ExperimentRef>,
        pool: Arc<dyn WorkerPool>,
    ) -> Arc<Self> {
        let (state, _) = watch::channel(RunState::Created);
        Arc::new(Self {
            id,
            experiments,
            pool,
            times: Mutex::new(RunTimes::default()),
            running: Mutex::new(BTreeMap::new()),
            state,
        })
    }

    fn times(&self) -> MutexGuard<'_, RunTimes> {
        self.times.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn running(&self) -> MutexGuard<'_, BTreeMap<usize, ExperimentRef>> {
        self.running.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn mark_started(&self) {
        self.times().started_at = Some(Utc::now());
        self.state.send_replace(RunState::Running);
    }

    fn mark_ended(&self) -> Duration {
        let elapsed = {
            let mut times = self.times();
            let now = Utc::now();
            if times.ended_at.is_none() {
                times.ended_at = Some(now);
            }
            times
                .started_at
                .map(|start| (now - start).to_std().unwrap_or_default())
                .unwrap_or_default()
        };
        self.state.send_replace(RunState::Terminated);
        elapsed
    }
}

/// 实验执行期间登记在运行集合中，结束或被中止时移除
struct RunningGuard {
    shared: Arc<RunShared>,
    slot: usize,
}

impl RunningGuard {
    fn enter(shared: &Arc<RunShared>, slot: usize, experiment: &ExperimentRef) -> Self {
        shared.running().insert(slot, experiment.clone());
        Self {
            shared: shared.clone(),
            slot,
        }
    }
}

impl Drop for RunningGuard {
    fn drop(&mut self) {
        self.shared.running().remove(&self.slot);
    }
}

/// 运行批次主体
///
/// 按策略给出的顺序逐个提交实验，为每次提交启动超时监视器，
/// 然后以"执行完毕"模式关闭工作池并等待其终止。
pub struct RunDispatcher {
    shared: Arc<RunShared>,
    gate: ConditionGate,
}

impl RunDispatcher {
    pub(crate) fn new(shared: Arc<RunShared>, gate: ConditionGate) -> Self {
        Self { shared, gate }
    }

    fn job(&self, slot: usize, experiment: ExperimentRef) -> Job {
        let shared = self.shared.clone();
        let gate = self.gate.clone();
        Box::pin(async move {
            let id = experiment.id();
            let executed = gate
                .run(async {
                    let _running = RunningGuard::enter(&shared, slot, &experiment);
                    experiment.execute().await;
                })
                .await;
            if executed.is_none() {
                debug!("运行批次 {} 跳过实验 {}: 条件已确定", shared.id, id);
                metrics::counter!("lab_experiments_skipped_total").increment(1);
            }
        })
    }

    pub async fn run(self) {
        let shared = self.shared.clone();
        shared.mark_started();
        info!(
            "运行批次 {} 开始，共 {} 个实验，工作池: {}",
            shared.id,
            shared.experiments.len(),
            shared.pool.name()
        );

        let mut watchers = Vec::with_capacity(shared.experiments.len());
        for (slot, experiment) in shared.experiments.iter().enumerate() {
            match shared.pool.submit(self.job(slot, experiment.clone())) {
                Ok(handle) => {
                    debug!("运行批次 {} 提交实验 {}", shared.id, experiment.id());
                    metrics::counter!("lab_experiments_submitted_total").increment(1);
                    watchers.push(TimeoutWatcher::spawn(experiment.clone(), handle));
                }
                Err(e) => {
                    warn!(
                        "运行批次 {} 提交实验 {} 被拒绝: {e}",
                        shared.id,
                        experiment.id()
                    );
                    metrics::counter!("lab_experiments_rejected_total").increment(1);
                }
            }
        }

        shared.pool.shutdown(ShutdownMode::FinishGracefully);
        shared.pool.await_termination(None).await;

        let mut timed_out = 0;
        for result in join_all(watchers).await {
            match result {
                Ok(WatchOutcome::TimedOut) => timed_out += 1,
                Ok(_) => {}
                Err(e) => warn!("运行批次 {} 的超时监视器异常结束: {e}", shared.id),
            }
        }

        let elapsed = shared.mark_ended();
        metrics::histogram!("lab_run_duration_seconds").record(elapsed.as_secs_f64());
        info!(
            "运行批次 {} 结束，耗时 {:?}，超时实验 {} 个",
            shared.id, elapsed, timed_out
        );
    }
}

/// 运行批次摘要，供报告层序列化输出
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    pub id: RunId,
    pub state: RunState,
    pub status: ExperimentStatus,
    pub pool: String,
    pub progression: f64,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub elapsed_ms: u128,
    pub running: Vec<ExperimentId>,
    pub experiments: Vec<ExperimentSnapshot>,
}

/// 一个已派发批次的对外句柄
#[derive(Clone)]
pub struct AssistantRun {
    shared: Arc<RunShared>,
    handle: TaskHandle,
}

impl AssistantRun {
    pub(crate) fn new(shared: Arc<RunShared>, handle: TaskHandle) -> Self {
        Self { shared, handle }
    }

    pub fn id(&self) -> RunId {
        self.shared.id
    }

    pub fn experiments(&self) -> &[ExperimentRef] {
        &self.shared.experiments
    }

    pub fn pool_name(&self) -> String {
        self.shared.pool.name()
    }

    pub fn state(&self) -> RunState {
        *self.shared.state.borrow()
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.shared.times().started_at
    }

    pub fn ended_at(&self) -> Option<DateTime<Utc>> {
        self.shared.times().ended_at
    }

    /// 停止运行批次
    ///
    /// `immediate` 为真时中止运行中的实验并丢弃排队实验，几乎不等待；
    /// 否则让运行中的实验执行完毕，丢弃尚未开始的实验，并无限等待。
    pub async fn stop(&self, immediate: bool) {
        info!("停止运行批次 {} (立即: {})", self.shared.id, immediate);
        if immediate {
            self.shared.pool.shutdown(ShutdownMode::StopNow);
            self.shared
                .pool
                .await_termination(Some(Duration::ZERO))
                .await;
        } else {
            self.shared.pool.shutdown(ShutdownMode::FinishRunningOnly);
            self.shared.pool.await_termination(None).await;
        }
    }

    /// 批次仍在序列器中排队时将其移除，已开始的批次不受影响
    pub(crate) fn discard_pending(&self) -> bool {
        self.handle.discard()
    }

    /// 派发任务尚未完成且未被取消
    pub fn is_running(&self) -> bool {
        !(self.handle.is_cancelled() || self.handle.is_finished())
    }

    /// 等待派发任务结束；失败只通过实验状态体现
    pub async fn join(&self) {
        let outcome = self.handle.wait().await;
        debug!("运行批次 {} 的派发任务结束: {:?}", self.shared.id, outcome);
    }

    /// 已运行时长：结束则为 结束-开始，否则为 当前-开始；尚未开始为零
    pub fn elapsed(&self) -> Duration {
        let times = self.shared.times();
        match times.started_at {
            Some(start) => (times.ended_at.unwrap_or_else(Utc::now) - start)
                .to_std()
                .unwrap_or_default(),
            None => Duration::ZERO,
        }
    }

    /// 当前正在执行的实验
    pub fn running_experiments(&self) -> Vec<ExperimentRef> {
        self.shared.running().values().cloned().collect()
    }

    /// 该批次包含此实验且其仍处于就绪或未开始状态
    pub fn is_queued(&self, experiment: &dyn Experiment) -> bool {
        self.shared
            .experiments
            .iter()
            .any(|e| e.id() == experiment.id() && e.status().is_pending())
    }

    /// 各实验进度的平均值，空批次为 1
    pub fn progression(&self) -> f64 {
        let experiments = &self.shared.experiments;
        if experiments.is_empty() {
            return 1.0;
        }
        experiments.iter().map(|e| e.progression()).sum::<f64>() / experiments.len() as f64
    }

    /// 批次中"最差"的实验状态
    pub fn status(&self) -> ExperimentStatus {
        ExperimentStatus::lowest(self.shared.experiments.iter().map(|e| e.status()))
    }

    pub fn summary(&self) -> RunSummary {
        RunSummary {
            id: self.id(),
            state: self.state(),
            status: self.status(),
            pool: self.pool_name(),
            progression: self.progression(),
            started_at: self.started_at(),
            ended_at: self.ended_at(),
            elapsed_ms: self.elapsed().as_millis(),
            running: self
                .running_experiments()
                .iter()
                .map(|e| e.id())
                .collect(),
            experiments: self
                .shared
                .experiments
                .iter()
                .map(|e| ExperimentSnapshot::of(e.as_ref()))
                .collect(),
        }
    }
}

impl fmt::Debug for AssistantRun {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AssistantRun")
            .field("id", &self.shared.id)
            .field("experiments", &self.shared.experiments.len())
            .field("state", &self.state())
            .finish()
    }
}
