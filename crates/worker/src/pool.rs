//! 工作池服务
//!
//! 提供三种关闭模式的并发任务执行池。积压队列对外可见且可清空，
//! 入队、出队、清空与关闭标志由同一把锁保护，因此"清空积压后关闭"是原子的。

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use futures::future::BoxFuture;
use tokio::sync::{watch, Notify};
use tracing::{debug, info, warn};

use lab_core::{AssistantConfig, LabError, LabResult};

use crate::task::{TaskCell, TaskHandle, TaskOutcome};

/// 提交到工作池的任务
pub type Job = BoxFuture<'static, ()>;

/// 工作池关闭模式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownMode {
    /// 执行完所有已提交的任务（排队中和运行中），拒绝新提交
    FinishGracefully,
    /// 立即中止运行中的任务，丢弃排队任务，拒绝新提交
    StopNow,
    /// 让运行中的任务执行完，丢弃尚未开始的排队任务
    FinishRunningOnly,
}

/// 工作池服务接口
///
/// 每个工作池只能使用一次，`new_instance` 复制配置但不复用内部状态。
#[async_trait]
pub trait WorkerPool: Send + Sync {
    fn name(&self) -> String;

    /// 提交任务，工作池已关闭时返回 `LabError::PoolShutdown`
    fn submit(&self, job: Job) -> LabResult<TaskHandle>;

    /// 按给定模式关闭，返回被丢弃的排队任务数
    fn shutdown(&self, mode: ShutdownMode) -> usize;

    fn is_shutdown(&self) -> bool;

    /// 已请求关闭且所有任务都已结束
    fn is_terminated(&self) -> bool;

    /// 等待工作池终止，`None` 表示无限等待；返回是否已终止
    async fn await_termination(&self, timeout: Option<Duration>) -> bool;

    fn new_instance(&self) -> Arc<dyn WorkerPool>;
}

/// 工作池工厂
pub trait WorkerPoolFactory: Send + Sync {
    fn create(&self) -> Arc<dyn WorkerPool>;
}

/// 两种具体的工作池形态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PoolShape {
    /// 单工作者，严格顺序执行
    #[default]
    Single,
    /// 固定 N 个工作者并行执行
    Fixed(NonZeroUsize),
}

impl PoolShape {
    pub fn fixed(workers: usize) -> LabResult<Self> {
        NonZeroUsize::new(workers)
            .map(PoolShape::Fixed)
            .ok_or_else(|| LabError::InvalidConfiguration("工作者数量必须大于0".to_string()))
    }

    pub fn from_config(config: &AssistantConfig) -> LabResult<Self> {
        match config.pool.as_str() {
            "single" => Ok(PoolShape::Single),
            "fixed" => PoolShape::fixed(config.workers),
            other => Err(LabError::InvalidConfiguration(format!(
                "不支持的工作池类型: {other}"
            ))),
        }
    }

    pub fn workers(&self) -> usize {
        match self {
            PoolShape::Single => 1,
            PoolShape::Fixed(n) => n.get(),
        }
    }
}

impl fmt::Display for PoolShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PoolShape::Single => f.write_str("single"),
            PoolShape::Fixed(n) => write!(f, "fixed-{n}"),
        }
    }
}

impl WorkerPoolFactory for PoolShape {
    fn create(&self) -> Arc<dyn WorkerPool> {
        Arc::new(QueuedWorkerPool::new(*self))
    }
}

struct QueuedTask {
    cell: Arc<TaskCell>,
    job: Job,
}

#[derive(Default)]
struct PoolState {
    backlog: VecDeque<QueuedTask>,
    running: HashMap<u64, Arc<TaskCell>>,
    shutdown: bool,
    live_workers: usize,
}

enum Next {
    Task(QueuedTask),
    Wait,
    Exit,
}

struct PoolShared {
    name: String,
    max_workers: usize,
    state: Mutex<PoolState>,
    available: Notify,
    terminated: watch::Sender<bool>,
    next_task_id: AtomicU64,
}

impl PoolShared {
    fn lock(&self) -> MutexGuard<'_, PoolState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn mark_terminated(&self) {
        self.terminated.send_replace(true);
        debug!("工作池 {} 已终止", self.name);
    }

    /// 取下一个任务；排队 → 运行中的转换在锁内完成
    fn take_next(&self) -> Next {
        let mut state = self.lock();
        while let Some(task) = state.backlog.pop_front() {
            if task.cell.try_start() {
                state.running.insert(task.cell.id(), task.cell.clone());
                return Next::Task(task);
            }
        }

        if state.shutdown {
            state.live_workers -= 1;
            if state.live_workers == 0 {
                drop(state);
                self.mark_terminated();
            }
            Next::Exit
        } else {
            Next::Wait
        }
    }

    fn shutdown(&self, mode: ShutdownMode, drain: bool) -> usize {
        let (discarded, running, terminated_now) = {
            let mut state = self.lock();
            let discarded: Vec<QueuedTask> = if drain {
                state.backlog.drain(..).collect()
            } else {
                Vec::new()
            };
            state.shutdown = true;
            let running: Vec<Arc<TaskCell>> = if mode == ShutdownMode::StopNow {
                state.running.values().cloned().collect()
            } else {
                Vec::new()
            };
            let terminated_now = state.live_workers == 0 && state.backlog.is_empty();
            (discarded, running, terminated_now)
        };

        let count = discarded.iter().filter(|task| task.cell.discard()).count();
        for cell in &running {
            cell.interrupt();
        }

        info!(
            "工作池 {} 关闭: 模式 {:?}, 丢弃排队任务 {} 个, 中止运行任务 {} 个",
            self.name,
            mode,
            count,
            running.len()
        );

        self.available.notify_waiters();
        if terminated_now {
            self.mark_terminated();
        }
        count
    }
}

async fn worker_loop(shared: Arc<PoolShared>, worker_index: usize) {
    debug!("工作池 {} 的工作者 {} 启动", shared.name, worker_index);
    loop {
        let notified = shared.available.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();

        match shared.take_next() {
            Next::Task(task) => {
                let cell = task.cell;
                let join = tokio::spawn(task.job);
                cell.attach(join.abort_handle());

                let outcome = match join.await {
                    Ok(()) => TaskOutcome::Completed,
                    Err(err) if err.is_cancelled() => TaskOutcome::Cancelled,
                    Err(err) => {
                        warn!("工作池 {} 中的任务 {} 发生panic: {err}", shared.name, cell.id());
                        TaskOutcome::Panicked
                    }
                };

                shared.lock().running.remove(&cell.id());
                cell.finish(outcome);
            }
            Next::Wait => notified.await,
            Next::Exit => break,
        }
    }
    debug!("工作池 {} 的工作者 {} 退出", shared.name, worker_index);
}

/// 带可见积压队列的工作池，工作者在首次提交时按需启动
pub struct QueuedWorkerPool {
    shape: PoolShape,
    shared: Arc<PoolShared>,
}

impl QueuedWorkerPool {
    pub fn new(shape: PoolShape) -> Self {
        let (terminated, _) = watch::channel(false);
        Self {
            shape,
            shared: Arc::new(PoolShared {
                name: shape.to_string(),
                max_workers: shape.workers(),
                state: Mutex::new(PoolState::default()),
                available: Notify::new(),
                terminated,
                next_task_id: AtomicU64::new(1),
            }),
        }
    }

    pub fn single() -> Self {
        Self::new(PoolShape::Single)
    }

    pub fn fixed(workers: usize) -> LabResult<Self> {
        Ok(Self::new(PoolShape::fixed(workers)?))
    }

    pub fn shape(&self) -> PoolShape {
        self.shape
    }

    /// 当前排队等待的任务数
    pub fn queued(&self) -> usize {
        self.shared.lock().backlog.len()
    }

    /// 当前正在执行的任务数
    pub fn active(&self) -> usize {
        self.shared.lock().running.len()
    }
}

#[async_trait]
impl WorkerPool for QueuedWorkerPool {
    fn name(&self) -> String {
        self.shared.name.clone()
    }

    fn submit(&self, job: Job) -> LabResult<TaskHandle> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|err| LabError::Internal(format!("未找到Tokio运行时: {err}")))?;

        let mut state = self.shared.lock();
        if state.shutdown {
            return Err(LabError::PoolShutdown {
                pool: self.shared.name.clone(),
            });
        }

        let id = self.shared.next_task_id.fetch_add(1, Ordering::Relaxed);
        let cell = TaskCell::new(id);
        state.backlog.push_back(QueuedTask {
            cell: cell.clone(),
            job,
        });

        if state.live_workers < self.shared.max_workers {
            state.live_workers += 1;
            let worker_index = state.live_workers;
            runtime.spawn(worker_loop(self.shared.clone(), worker_index));
        }
        drop(state);

        self.shared.available.notify_one();
        Ok(TaskHandle::new(cell))
    }

    fn shutdown(&self, mode: ShutdownMode) -> usize {
        // 单工作者池不清空积压，模式三与模式一等价
        let drain = match mode {
            ShutdownMode::FinishGracefully => false,
            ShutdownMode::StopNow => true,
            ShutdownMode::FinishRunningOnly => self.shape != PoolShape::Single,
        };
        self.shared.shutdown(mode, drain)
    }

    fn is_shutdown(&self) -> bool {
        self.shared.lock().shutdown
    }

    fn is_terminated(&self) -> bool {
        *self.shared.terminated.borrow()
    }

    async fn await_termination(&self, timeout: Option<Duration>) -> bool {
        let mut rx = self.shared.terminated.subscribe();
        let wait = async move { rx.wait_for(|terminated| *terminated).await.is_ok() };
        match timeout {
            Some(limit) => tokio::time::timeout(limit, wait).await.unwrap_or(false),
            None => wait.await,
        }
    }

    fn new_instance(&self) -> Arc<dyn WorkerPool> {
        Arc::new(QueuedWorkerPool::new(self.shape))
    }
}

impl Drop for QueuedWorkerPool {
    fn drop(&mut self) {
        if !self.shared.lock().shutdown {
            self.shared.shutdown(ShutdownMode::FinishGracefully, false);
        }
    }
}

impl fmt::Debug for QueuedWorkerPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueuedWorkerPool")
            .field("shape", &self.shape)
            .field("shutdown", &self.is_shutdown())
            .field("terminated", &self.is_terminated())
            .finish()
    }
}
