use serde::{Deserialize, Serialize};

pub const POOL_KINDS: [&str; 2] = ["single", "fixed"];
pub const STRATEGY_KINDS: [&str; 4] = ["identity", "subsample", "shuffle", "random_decimate"];

/// 助手与工作池配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssistantConfig {
    pub pool: String, // "single", "fixed"
    pub workers: usize,
}

impl Default for AssistantConfig {
    fn default() -> Self {
        Self {
            pool: "single".to_string(),
            workers: 1,
        }
    }
}

impl AssistantConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if !POOL_KINDS.contains(&self.pool.as_str()) {
            return Err(anyhow::anyhow!(
                "无效的工作池类型: {}，支持的类型: {:?}",
                self.pool,
                POOL_KINDS
            ));
        }

        if self.workers == 0 {
            return Err(anyhow::anyhow!("工作线程数必须大于0"));
        }

        Ok(())
    }
}

/// 调度策略配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    pub strategy: String, // "identity", "subsample", "shuffle", "random_decimate"
    pub seed: Option<u64>,
    pub subsample_stride: usize,
    pub decimate_probability: f64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            strategy: "identity".to_string(),
            seed: None,
            subsample_stride: 2,
            decimate_probability: 0.5,
        }
    }
}

impl SchedulerConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if !STRATEGY_KINDS.contains(&self.strategy.as_str()) {
            return Err(anyhow::anyhow!(
                "无效的调度策略: {}，支持的策略: {:?}",
                self.strategy,
                STRATEGY_KINDS
            ));
        }

        if self.subsample_stride == 0 {
            return Err(anyhow::anyhow!("子采样步长必须大于0"));
        }

        if !(0.0..=1.0).contains(&self.decimate_probability) {
            return Err(anyhow::anyhow!(
                "随机抽取概率必须在0到1之间: {}",
                self.decimate_probability
            ));
        }

        Ok(())
    }
}
