pub mod app_config;
pub mod assistant_scheduler;
pub mod observability;

// Re-export main types for easier imports
pub use app_config::AppConfig;
pub use assistant_scheduler::{AssistantConfig, SchedulerConfig, POOL_KINDS, STRATEGY_KINDS};
pub use observability::ObservabilityConfig;
