//! 实验助手：待执行队列、单通道运行序列器与运行批次管理

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::Duration;

use tracing::{debug, info, warn};

use lab_core::{
    AppConfig, Condition, Experiment, ExperimentId, ExperimentRef, ExperimentSelector, LabError,
    LabResult,
};
use lab_worker::{
    ConditionGate, PoolShape, QueuedWorkerPool, ShutdownMode, WorkerPool, WorkerPoolFactory,
};

use crate::run::{AssistantRun, RunDispatcher, RunId, RunShared};
use crate::strategies::{IdentityStrategy, SchedulingStrategy, StrategyKind};

/// 顶层编排器
///
/// 持有去重的待执行队列，按提交顺序在单通道序列器上依次执行运行批次，
/// 批次之间从不并发。
pub struct Assistant {
    name: String,
    queue: Mutex<Vec<ExperimentRef>>,
    runs: Mutex<Vec<AssistantRun>>,
    strategy: RwLock<Option<Arc<dyn SchedulingStrategy>>>,
    pool_factory: RwLock<Option<Arc<dyn WorkerPoolFactory>>>,
    condition: RwLock<Option<Arc<dyn Condition>>>,
    lane: QueuedWorkerPool,
    next_run_id: AtomicU64,
}

fn read<T: Clone>(lock: &RwLock<T>) -> T {
    lock.read().unwrap_or_else(PoisonError::into_inner).clone()
}

fn write<T>(lock: &RwLock<T>, value: T) {
    *lock.write().unwrap_or_else(PoisonError::into_inner) = value;
}

impl Assistant {
    pub fn new() -> Self {
        AssistantBuilder::new().build()
    }

    pub fn builder() -> AssistantBuilder {
        AssistantBuilder::new()
    }

    /// 按应用配置创建助手：工作池形态与调度策略
    pub fn from_config(config: &AppConfig) -> LabResult<Self> {
        let shape = PoolShape::from_config(&config.assistant)?;
        let strategy = StrategyKind::from_config(&config.scheduler)?;
        Ok(AssistantBuilder::new()
            .pool_factory(Arc::new(shape))
            .strategy(strategy)
            .build())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn queue(&self) -> MutexGuard<'_, Vec<ExperimentRef>> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn runs(&self) -> MutexGuard<'_, Vec<AssistantRun>> {
        self.runs.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// 将实验加入队列，跳过已在队列中的实验，返回实际加入的数量
    pub fn enqueue<I>(&self, experiments: I) -> usize
    where
        I: IntoIterator<Item = ExperimentRef>,
    {
        let mut queue = self.queue();
        let mut present: HashSet<ExperimentId> = queue.iter().map(|e| e.id()).collect();
        let mut added = 0;
        for experiment in experiments {
            if present.insert(experiment.id()) {
                queue.push(experiment);
                added += 1;
            }
        }
        debug!("加入队列 {} 个实验，队列长度 {}", added, queue.len());
        added
    }

    /// 将选择器选出的实验加入队列
    pub fn enqueue_selected(&self, selectors: &[&dyn ExperimentSelector]) -> usize {
        selectors
            .iter()
            .map(|selector| self.enqueue(selector.select()))
            .sum()
    }

    /// 从队列中移除实验，返回实际移除的数量
    pub fn remove_from_queue(&self, ids: &[ExperimentId]) -> usize {
        let ids: HashSet<ExperimentId> = ids.iter().copied().collect();
        let mut queue = self.queue();
        let before = queue.len();
        queue.retain(|experiment| !ids.contains(&experiment.id()));
        before - queue.len()
    }

    /// 队列快照
    pub fn queued_experiments(&self) -> Vec<ExperimentRef> {
        self.queue().clone()
    }

    pub fn queue_len(&self) -> usize {
        self.queue().len()
    }

    /// 用策略就地重排队列，返回被策略丢弃的实验数量
    pub fn apply(&self, strategy: &dyn SchedulingStrategy) -> usize {
        let mut queue = self.queue();
        let scheduled = strategy.schedule(&queue);
        let dropped = queue.len().saturating_sub(scheduled.len());
        *queue = scheduled;
        debug!("策略 {} 重排队列，丢弃 {} 个实验", strategy.name(), dropped);
        dropped
    }

    pub fn set_scheduler(&self, strategy: Option<Arc<dyn SchedulingStrategy>>) {
        write(&self.strategy, strategy);
    }

    pub fn set_pool_factory(&self, factory: Option<Arc<dyn WorkerPoolFactory>>) {
        write(&self.pool_factory, factory);
    }

    pub fn set_condition(&self, condition: Option<Arc<dyn Condition>>) {
        write(&self.condition, condition);
    }

    /// 取出并清空整个队列，派发为一个新的运行批次
    pub fn dispatch(&self) -> LabResult<AssistantRun> {
        self.ensure_open()?;
        let batch = std::mem::take(&mut *self.queue());
        match self.start_run(&batch) {
            Ok(run) => Ok(run),
            Err(e) => {
                warn!("派发失败，{} 个实验放回队列: {e}", batch.len());
                self.requeue_front(batch);
                Err(e)
            }
        }
    }

    /// 将批次放回队列头部，期间新加入的重复实验被去掉
    fn requeue_front(&self, batch: Vec<ExperimentRef>) {
        let mut queue = self.queue();
        let ids: HashSet<ExperimentId> = batch.iter().map(|e| e.id()).collect();
        let newer = std::mem::replace(&mut *queue, batch);
        queue.extend(newer.into_iter().filter(|e| !ids.contains(&e.id())));
    }

    /// 派发给定的实验，队列保持不变
    pub fn dispatch_experiments(&self, experiments: &[ExperimentRef]) -> LabResult<AssistantRun> {
        self.ensure_open()?;
        self.start_run(experiments)
    }

    fn ensure_open(&self) -> LabResult<()> {
        if self.lane.is_shutdown() {
            return Err(LabError::PoolShutdown {
                pool: format!("{}-runs", self.name),
            });
        }
        Ok(())
    }

    fn start_run(&self, batch: &[ExperimentRef]) -> LabResult<AssistantRun> {
        let strategy = read(&self.strategy)
            .unwrap_or_else(|| Arc::new(IdentityStrategy) as Arc<dyn SchedulingStrategy>);
        let scheduled = strategy.schedule(batch);

        let pool = match read(&self.pool_factory) {
            Some(factory) => factory.create(),
            None => PoolShape::Single.create(),
        };

        let id: RunId = self.next_run_id.fetch_add(1, Ordering::SeqCst);
        let shared = RunShared::new(id, scheduled, pool);
        let gate = ConditionGate::new(read(&self.condition));
        let dispatcher = RunDispatcher::new(shared.clone(), gate);

        let handle = self.lane.submit(Box::pin(dispatcher.run()))?;
        let run = AssistantRun::new(shared, handle);
        self.runs().push(run.clone());

        metrics::counter!("lab_runs_dispatched_total").increment(1);
        info!(
            "派发运行批次 {}: 策略 {}，{} 个实验中选出 {} 个",
            id,
            strategy.name(),
            batch.len(),
            run.experiments().len()
        );
        Ok(run)
    }

    /// 所有运行批次的快照，修改返回值不影响助手状态
    pub fn list_runs(&self) -> Vec<AssistantRun> {
        self.runs().clone()
    }

    pub fn get_run(&self, id: RunId) -> Option<AssistantRun> {
        self.runs().iter().find(|run| run.id() == id).cloned()
    }

    /// 立即停止并删除运行批次
    pub async fn delete_run(&self, id: RunId) -> LabResult<()> {
        let run = self.get_run(id).ok_or(LabError::RunNotFound { id })?;
        if run.discard_pending() {
            debug!("运行批次 {} 尚未开始，从序列器中移除", id);
        }
        run.stop(true).await;
        self.runs().retain(|run| run.id() != id);
        info!("删除运行批次 {}", id);
        Ok(())
    }

    /// 所有运行批次的墙钟时间总和，未结束的批次计为 当前-开始
    pub fn cumulative_execution_time(&self) -> Duration {
        self.runs().iter().map(|run| run.elapsed()).sum()
    }

    /// 是否有运行批次仍将该实验列为就绪或未开始
    pub fn is_queued(&self, experiment: &dyn Experiment) -> bool {
        self.runs().iter().any(|run| run.is_queued(experiment))
    }

    /// 停止所有运行批次并关闭序列器，之后的派发将被拒绝
    pub async fn shutdown(&self, immediate: bool) {
        info!("关闭助手 {} (立即: {})", self.name, immediate);
        let runs = self.list_runs();
        self.lane.shutdown(ShutdownMode::FinishGracefully);
        for run in &runs {
            if run.is_running() {
                run.stop(immediate).await;
            }
        }
        if !self.lane.await_termination(None).await {
            warn!("助手 {} 的运行序列器未能终止", self.name);
        }
    }
}

impl Default for Assistant {
    fn default() -> Self {
        Self::new()
    }
}

/// 助手构建器
pub struct AssistantBuilder {
    name: String,
    strategy: Option<Arc<dyn SchedulingStrategy>>,
    pool_factory: Option<Arc<dyn WorkerPoolFactory>>,
    condition: Option<Arc<dyn Condition>>,
}

impl AssistantBuilder {
    pub fn new() -> Self {
        Self {
            name: "Assistant".to_string(),
            strategy: None,
            pool_factory: None,
            condition: None,
        }
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn strategy(mut self, strategy: Arc<dyn SchedulingStrategy>) -> Self {
        self.strategy = Some(strategy);
        self
    }

    pub fn pool_factory(mut self, factory: Arc<dyn WorkerPoolFactory>) -> Self {
        self.pool_factory = Some(factory);
        self
    }

    pub fn condition(mut self, condition: Arc<dyn Condition>) -> Self {
        self.condition = Some(condition);
        self
    }

    pub fn build(self) -> Assistant {
        Assistant {
            name: self.name,
            queue: Mutex::new(Vec::new()),
            runs: Mutex::new(Vec::new()),
            strategy: RwLock::new(self.strategy),
            pool_factory: RwLock::new(self.pool_factory),
            condition: RwLock::new(self.condition),
            lane: QueuedWorkerPool::single(),
            next_run_id: AtomicU64::new(1),
        }
    }
}

impl Default for AssistantBuilder {
    fn default() -> Self {
        Self::new()
    }
}
