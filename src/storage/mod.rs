//! 本地持久化
//!
//! - `local_store` - 按键读写 JSON 文件
//! - `config_store` - 已保存的 API 配置
//! - `grading_store` - 历史评分记录与标准答案

pub mod config_store;
pub mod grading_store;
pub mod local_store;

pub use config_store::ConfigStore;
pub use grading_store::{GradingStore, MAX_HISTORY};
pub use local_store::LocalStore;
