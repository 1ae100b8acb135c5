//! # AI Grader
//!
//! AI 批改助手的客户端核心：结果缓存、异步任务处理器，以及驱动
//! "分析标准答案 → 批量评分"流程的命令行应用
//!
//! ## 架构设计
//!
//! 本系统采用分层架构：
//!
//! ### ① 模型层（Models）
//! - `models/` - 请求 / 响应结构、任务、历史记录
//!
//! ### ② 基础能力层（Cache / Clients / Storage）
//! - `cache/` - `ResultCache`，带 TTL 和 LRU 淘汰的请求去重缓存
//! - `clients/` - `GradingBackend` 接口与基于 HTTP 的 `GraderClient`
//! - `storage/` - 本地 JSON 存储：API 配置、历史记录、标准答案
//!
//! ### ③ 业务能力层（Services）
//! - `services/` - 输入校验、带统一响应结构的直连调用、图片加载、结果导出
//!
//! ### ④ 编排层（Orchestration）
//! - `orchestrator/` - `TaskProcessor`，FIFO 队列 + 并发上限 + 缓存短路；
//!   `GradingRun`，拆批提交、失败重试与结果汇总
//! - `app` - 命令行流程
//!
//! ## 模块结构

pub mod app;
pub mod cache;
pub mod clients;
pub mod config;
pub mod error;
pub mod models;
pub mod orchestrator;
pub mod services;
pub mod storage;
pub mod utils;

// 重新导出常用类型
pub use app::App;
pub use cache::{CacheOptions, ResultCache};
pub use clients::{GraderClient, GradingBackend};
pub use config::Config;
pub use error::{AppError, AppResult};
pub use models::{ApiConfig, Task, TaskId, TaskKind, TaskStats, TaskStatus};
pub use orchestrator::{GradingRun, ProcessorOptions, TaskProcessor};
pub use services::{ApiResponse, ApiService, InputValidator};
