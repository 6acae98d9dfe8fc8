use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::watch;
use tokio::task::AbortHandle;
use tracing::debug;

/// 已提交任务的最终结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskOutcome {
    /// 正常执行完毕
    Completed,
    /// 运行中被中止
    Cancelled,
    /// 执行过程中发生panic
    Panicked,
    /// 尚未开始即被丢弃
    Discarded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TaskPhase {
    Queued,
    Running,
    Finished(TaskOutcome),
}

pub(crate) struct TaskCell {
    id: u64,
    phase: watch::Sender<TaskPhase>,
    abort: Mutex<Option<AbortHandle>>,
    cancel_requested: AtomicBool,
}

impl TaskCell {
    pub(crate) fn new(id: u64) -> Arc<Self> {
        let (phase, _) = watch::channel(TaskPhase::Queued);
        Arc::new(Self {
            id,
            phase,
            abort: Mutex::new(None),
            cancel_requested: AtomicBool::new(false),
        })
    }

    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    pub(crate) fn phase(&self) -> TaskPhase {
        *self.phase.borrow()
    }

    /// 排队 → 运行中；任务已被取消时返回 false
    pub(crate) fn try_start(&self) -> bool {
        self.phase.send_if_modified(|phase| {
            if *phase == TaskPhase::Queued {
                *phase = TaskPhase::Running;
                true
            } else {
                false
            }
        })
    }

    /// 排队 → 已丢弃；任务已开始时返回 false
    pub(crate) fn discard(&self) -> bool {
        self.phase.send_if_modified(|phase| {
            if *phase == TaskPhase::Queued {
                *phase = TaskPhase::Finished(TaskOutcome::Discarded);
                true
            } else {
                false
            }
        })
    }

    pub(crate) fn finish(&self, outcome: TaskOutcome) {
        self.phase.send_if_modified(|phase| {
            if matches!(phase, TaskPhase::Finished(_)) {
                false
            } else {
                *phase = TaskPhase::Finished(outcome);
                true
            }
        });
    }

    /// 保存中止句柄，若此前已请求取消则立即中止
    pub(crate) fn attach(&self, handle: AbortHandle) {
        let mut abort = self.abort.lock().unwrap_or_else(PoisonError::into_inner);
        if self.cancel_requested.load(Ordering::SeqCst) {
            handle.abort();
        }
        *abort = Some(handle);
    }

    /// 请求中止运行中的任务
    pub(crate) fn interrupt(&self) {
        let abort = self.abort.lock().unwrap_or_else(PoisonError::into_inner);
        self.cancel_requested.store(true, Ordering::SeqCst);
        if let Some(handle) = abort.as_ref() {
            handle.abort();
        }
    }
}

/// 单个提交任务的挂起句柄
#[derive(Clone)]
pub struct TaskHandle {
    cell: Arc<TaskCell>,
}

impl TaskHandle {
    pub(crate) fn new(cell: Arc<TaskCell>) -> Self {
        Self { cell }
    }

    pub fn id(&self) -> u64 {
        self.cell.id()
    }

    /// 等待任务结束并返回结果
    pub async fn wait(&self) -> TaskOutcome {
        let mut rx = self.cell.phase.subscribe();
        let result = rx
            .wait_for(|phase| matches!(phase, TaskPhase::Finished(_)))
            .await
            .map(|phase| *phase);
        match result {
            Ok(TaskPhase::Finished(outcome)) => outcome,
            _ => TaskOutcome::Cancelled,
        }
    }

    /// 等待任务离开排队状态
    ///
    /// 任务真正开始执行时返回 true，未开始即被丢弃时返回 false。
    pub async fn wait_started(&self) -> bool {
        let mut rx = self.cell.phase.subscribe();
        let result = rx
            .wait_for(|phase| *phase != TaskPhase::Queued)
            .await
            .map(|phase| *phase);
        !matches!(
            result,
            Ok(TaskPhase::Finished(TaskOutcome::Discarded)) | Err(_)
        )
    }

    /// 取消任务：排队中的任务被丢弃，运行中的任务被中止
    pub fn cancel(&self) {
        if self.cell.discard() {
            debug!("任务 {} 在开始前被取消", self.cell.id());
            return;
        }
        if self.cell.phase() == TaskPhase::Running {
            debug!("中止运行中的任务 {}", self.cell.id());
            self.cell.interrupt();
        }
    }

    /// 只丢弃尚未开始的任务，任务已开始时不做任何事并返回 false
    pub fn discard(&self) -> bool {
        let discarded = self.cell.discard();
        if discarded {
            debug!("任务 {} 在开始前被丢弃", self.cell.id());
        }
        discarded
    }

    pub fn is_started(&self) -> bool {
        !matches!(
            self.cell.phase(),
            TaskPhase::Queued | TaskPhase::Finished(TaskOutcome::Discarded)
        )
    }

    pub fn is_finished(&self) -> bool {
        matches!(self.cell.phase(), TaskPhase::Finished(_))
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(
            self.cell.phase(),
            TaskPhase::Finished(TaskOutcome::Cancelled | TaskOutcome::Discarded)
        )
    }

    pub fn outcome(&self) -> Option<TaskOutcome> {
        match self.cell.phase() {
            TaskPhase::Finished(outcome) => Some(outcome),
            _ => None,
        }
    }
}

impl std::fmt::Debug for TaskHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskHandle")
            .field("id", &self.cell.id())
            .field("phase", &self.cell.phase())
            .finish()
    }
}
