//! 编排层（Orchestration Layer）
//!
//! ## 职责
//!
//! 本层负责任务排队和并发调度，是整个系统的"指挥中心"。
//!
//! ## 模块划分
//!
//! ### `task_processor` - 异步任务处理器
//! - 接收分析 / 评分任务（FIFO 队列）
//! - 控制同时执行的任务数量
//! - 执行前查询结果缓存，执行后写回
//! - 分析任务按批调用后端
//! - 维护任务生命周期和统计信息
//!
//! ### `grading_run` - 一轮批量评分
//! - 按批次大小拆分学生作答并提交评分任务
//! - 失败学生重试一次
//! - 汇总每个学生的最终结果
//!
//! ## 层次关系
//!
//! ```text
//! app (加载图片、写出评语、导出结果)
//!     ↓
//! grading_run (拆批、重试、汇总)
//!     ↓
//! task_processor (处理 Task)
//!     ↓
//! cache (去重)  +  clients::GradingBackend (外部调用)
//! ```
//!
//! ## 设计原则
//!
//! 1. **单一职责**：处理器只做调度，不关心请求如何发送
//! 2. **错误收口**：任务错误只写入任务本身，不向外传播
//! 3. **向下依赖**：编排层 → cache / clients → models

pub mod grading_run;
pub mod task_processor;

pub use grading_run::{GradedFeedback, GradingRun, StudentOutcome};
pub use task_processor::{ProcessorOptions, TaskProcessor, CANCELLED_MESSAGE};
