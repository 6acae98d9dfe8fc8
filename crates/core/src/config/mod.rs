//! # 配置管理
//!
//! 配置按以下顺序加载，后者覆盖前者：
//!
//! 1. 内置默认值
//! 2. TOML 配置文件
//! 3. `LAB_` 前缀的环境变量，层级以 `__` 分隔，例如 `LAB_ASSISTANT__WORKERS=4`

pub mod models;


pub use models::*;
