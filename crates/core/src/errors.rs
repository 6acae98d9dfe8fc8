use thiserror::Error;

/// 实验调度引擎错误类型定义
#[derive(Debug, Error)]
pub enum LabError {
    #[error("工作池已关闭，拒绝提交: {pool}")]
    PoolShutdown { pool: String },

    #[error("无效的配置: {0}")]
    InvalidConfiguration(String),

    #[error("运行批次未找到: {id}")]
    RunNotFound { id: u64 },

    #[error("序列化错误: {0}")]
    Serialization(String),

    #[error("内部错误: {0}")]
    Internal(String),
}

impl From<serde_json::Error> for LabError {
    fn from(err: serde_json::Error) -> Self {
        LabError::Serialization(err.to_string())
    }
}

/// 实验自身执行失败时返回的错误，引擎只记录信息，不解释原因
pub type ExperimentError = Box<dyn std::error::Error + Send + Sync>;
