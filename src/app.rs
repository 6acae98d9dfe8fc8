use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::broadcast;
use tracing::{info, warn};

use lab_core::{AppConfig, ExperimentRef, SleepExperiment};
use lab_dispatcher::{Assistant, RunSummary};

use crate::shutdown::ShutdownSignal;

/// 演示批次的参数：实验数量、每个实验的耗时与超时
#[derive(Debug, Clone)]
pub struct ExperimentPlan {
    pub count: usize,
    pub duration: Duration,
    pub timeout: Duration,
}

impl Default for ExperimentPlan {
    fn default() -> Self {
        Self {
            count: 10,
            duration: Duration::from_millis(100),
            timeout: Duration::ZERO,
        }
    }
}

impl ExperimentPlan {
    fn experiments(&self) -> Vec<ExperimentRef> {
        (0..self.count as i64)
            .map(|id| {
                Arc::new(SleepExperiment::new(id, self.duration).with_timeout(self.timeout))
                    as ExperimentRef
            })
            .collect()
    }
}

/// 命令行应用：按配置创建助手，派发一个合成实验批次并等待其结束
pub struct Application {
    assistant: Assistant,
    plan: ExperimentPlan,
}

impl Application {
    pub fn new(config: &AppConfig, plan: ExperimentPlan) -> Result<Self> {
        config.validate().context("配置验证失败")?;
        let assistant = Assistant::from_config(config).context("创建实验助手失败")?;
        info!(
            "初始化应用程序: 工作池 {}，策略 {}，{} 个实验",
            config.assistant.pool, config.scheduler.strategy, plan.count
        );
        Ok(Self { assistant, plan })
    }

    pub fn assistant(&self) -> &Assistant {
        &self.assistant
    }

    /// 运行批次直至结束或收到关闭信号，返回批次摘要
    pub async fn run(
        &self,
        mut shutdown_rx: broadcast::Receiver<ShutdownSignal>,
    ) -> Result<RunSummary> {
        let added = self.assistant.enqueue(self.plan.experiments());
        let run = self.assistant.dispatch().context("派发运行批次失败")?;
        info!("已派发运行批次 {}，入队 {} 个实验", run.id(), added);

        tokio::select! {
            _ = run.join() => {
                info!("运行批次 {} 执行完毕", run.id());
            }
            signal = shutdown_rx.recv() => {
                let immediate = match signal {
                    Ok(signal) => signal.is_immediate(),
                    Err(e) => {
                        warn!("关闭信号通道异常: {e}，按立即停止处理");
                        true
                    }
                };
                run.stop(immediate).await;
                run.join().await;
                info!("运行批次 {} 已停止", run.id());
            }
        }

        self.assistant.shutdown(false).await;
        Ok(run.summary())
    }
}
