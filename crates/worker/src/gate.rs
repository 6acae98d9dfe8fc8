use std::future::Future;
use std::sync::Arc;

use tracing::debug;

use lab_core::{Condition, Troolean};

use crate::pool::Job;

/// 条件门控
///
/// 只有在断言结果仍为 `Inconclusive` 时才放行工作，没有断言时无条件放行。
#[derive(Clone, Default)]
pub struct ConditionGate {
    condition: Option<Arc<dyn Condition>>,
}

impl ConditionGate {
    pub fn new(condition: Option<Arc<dyn Condition>>) -> Self {
        Self { condition }
    }

    /// 无条件放行的门控
    pub fn unconditional() -> Self {
        Self { condition: None }
    }

    pub fn is_conditional(&self) -> bool {
        self.condition.is_some()
    }

    pub fn evaluate(&self) -> Troolean {
        self.condition
            .as_ref()
            .map_or(Troolean::Inconclusive, |condition| condition.evaluate())
    }

    pub fn is_open(&self) -> bool {
        self.evaluate().is_inconclusive()
    }

    /// 门控打开时执行工作并返回结果，否则跳过
    pub async fn run<F, T>(&self, work: F) -> Option<T>
    where
        F: Future<Output = T>,
    {
        let verdict = self.evaluate();
        if verdict.is_inconclusive() {
            Some(work.await)
        } else {
            debug!("条件已确定为 {verdict}，跳过执行");
            None
        }
    }

    /// 包装一个待提交的任务，在执行时重新检查条件
    pub fn wrap(&self, job: Job) -> Job {
        let gate = self.clone();
        Box::pin(async move {
            gate.run(job).await;
        })
    }
}

impl std::fmt::Debug for ConditionGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConditionGate")
            .field("conditional", &self.is_conditional())
            .finish()
    }
}
