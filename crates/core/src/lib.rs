pub mod config;
pub mod errors;
pub mod logging;
pub mod models;
pub mod traits;

pub use config::{AppConfig, AssistantConfig, ObservabilityConfig, SchedulerConfig};
pub use errors::*;
pub use logging::{init_from_config, init_logging};
pub use models::*;
pub use traits::*;

/// 统一的Result类型
pub type LabResult<T> = std::result::Result<T, LabError>;
