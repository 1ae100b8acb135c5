//! 外部评分后端
//!
//! `GradingBackend` 是处理器依赖的唯一接口，`GraderClient` 是基于 HTTP 的实现。
//! 测试中可以替换为内存实现。

pub mod grader_client;

pub use grader_client::GraderClient;

use futures::future::BoxFuture;

use crate::error::AppResult;
use crate::models::{
    AnalyzeImage, ApiConfig, BatchGradeRequest, BatchGradeResponse, MultiAnalyzeResponse,
};

/// 处理器调用的评分后端
pub trait GradingBackend: Send + Sync {
    /// 分析一批标准答案图片
    fn analyze_multi_answer<'a>(
        &'a self,
        images: &'a [AnalyzeImage],
        config: &'a ApiConfig,
    ) -> BoxFuture<'a, AppResult<MultiAnalyzeResponse>>;

    /// 批量评分学生作答
    fn batch_grade<'a>(
        &'a self,
        request: &'a BatchGradeRequest,
        config: &'a ApiConfig,
    ) -> BoxFuture<'a, AppResult<BatchGradeResponse>>;
}
