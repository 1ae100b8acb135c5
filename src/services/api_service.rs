//! 直接调用评分后端的服务
//!
//! 所有方法都先做输入校验，再发请求，结果统一包装成 [`ApiResponse`]，
//! 永远不返回 `Err`。校验失败时不会发出网络请求。

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, info};

use crate::cache::ResultCache;
use crate::clients::grader_client::GRADE_ENDPOINT;
use crate::clients::GraderClient;
use crate::error::{AppError, AppResult};
use crate::models::{
    AnalyzeImage, ApiConfig, BatchGradeRequest, BatchGradeResponse, MultiAnalyzeResponse,
    SingleGradeRequest, SingleGradeResponse,
};
use crate::services::validator::{InputValidator, ValidationResult};

/// 单图评分结果缓存时间
const SINGLE_GRADE_TTL: Duration = Duration::from_secs(60 * 60);

/// 统一响应结构
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// RFC 3339 时间戳
    pub timestamp: String,
}

impl<T> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            timestamp: Utc::now().to_rfc3339(),
        }
    }

    pub fn fail(message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message.into()),
            timestamp: Utc::now().to_rfc3339(),
        }
    }

    pub fn from_error(error: &AppError) -> Self {
        Self::fail(error.user_message())
    }

    pub fn from_result(result: AppResult<T>) -> Self {
        match result {
            Ok(data) => Self::ok(data),
            Err(e) => Self::from_error(&e),
        }
    }

    /// 转回 `AppResult`，便于在需要 `?` 的地方继续使用
    pub fn into_result(self) -> AppResult<T> {
        match (self.success, self.data) {
            (true, Some(data)) => Ok(data),
            _ => Err(AppError::other(
                self.error.unwrap_or_else(|| "未知错误".to_string()),
            )),
        }
    }
}

/// 合并多项校验，全部通过时返回 `Ok`
fn validate_all<const N: usize>(results: [ValidationResult; N]) -> AppResult<()> {
    let errors: Vec<_> = results.into_iter().flat_map(|r| r.errors).collect();
    if errors.is_empty() {
        Ok(())
    } else {
        Err(AppError::Validation(errors))
    }
}

/// 评分后端服务
#[derive(Debug, Clone)]
pub struct ApiService {
    client: GraderClient,
    cache: ResultCache,
}

impl ApiService {
    pub fn new(client: GraderClient, cache: ResultCache) -> Self {
        Self { client, cache }
    }

    pub fn client(&self) -> &GraderClient {
        &self.client
    }

    /// 把模型配置同步给后端
    pub async fn configure_api(&self, config: &ApiConfig) -> ApiResponse<Value> {
        ApiResponse::from_result(self.try_configure_api(config).await)
    }

    async fn try_configure_api(&self, config: &ApiConfig) -> AppResult<Value> {
        validate_all([InputValidator::validate_api_config(config)])?;
        let config = InputValidator::sanitize_config(config);
        self.client.configure(&config).await
    }

    /// 测试模型连接
    pub async fn test_connection(&self, config: &ApiConfig) -> ApiResponse<Value> {
        ApiResponse::from_result(self.try_test_connection(config).await)
    }

    async fn try_test_connection(&self, config: &ApiConfig) -> AppResult<Value> {
        validate_all([InputValidator::validate_api_config(config)])?;
        let config = InputValidator::sanitize_config(config);
        let result = self.client.test_connection(&config).await?;
        info!("🔌 连接测试通过: {}", config.model_name);
        Ok(result)
    }

    /// 健康检查，等同于连接测试
    pub async fn health_check(&self, config: &ApiConfig) -> ApiResponse<Value> {
        self.test_connection(config).await
    }

    /// 分析多图标准答案（单次请求，不分批）
    pub async fn analyze_multi_answer(
        &self,
        images: &[AnalyzeImage],
        config: &ApiConfig,
    ) -> ApiResponse<MultiAnalyzeResponse> {
        ApiResponse::from_result(self.try_analyze_multi_answer(images, config).await)
    }

    async fn try_analyze_multi_answer(
        &self,
        images: &[AnalyzeImage],
        config: &ApiConfig,
    ) -> AppResult<MultiAnalyzeResponse> {
        validate_all([
            InputValidator::validate_api_config(config),
            InputValidator::validate_analyze_images(images),
        ])?;
        self.client.analyze_multi_answer(images, config).await
    }

    /// 批量评分（单次请求）
    pub async fn batch_grade(
        &self,
        request: &BatchGradeRequest,
        config: &ApiConfig,
    ) -> ApiResponse<BatchGradeResponse> {
        ApiResponse::from_result(self.try_batch_grade(request, config).await)
    }

    async fn try_batch_grade(
        &self,
        request: &BatchGradeRequest,
        config: &ApiConfig,
    ) -> AppResult<BatchGradeResponse> {
        validate_all([
            InputValidator::validate_api_config(config),
            InputValidator::validate_batch_grade_request(request),
        ])?;
        self.client.batch_grade(request, config).await
    }

    /// 单图评分，结果按请求内容缓存
    pub async fn grade_single_answer(
        &self,
        student_image: &str,
        rubric: &str,
        standard_answer: &str,
        config: &ApiConfig,
    ) -> ApiResponse<SingleGradeResponse> {
        let request = SingleGradeRequest {
            student_image: student_image.to_string(),
            rubric: rubric.to_string(),
            standard_answer: standard_answer.to_string(),
        };
        ApiResponse::from_result(self.try_grade_single_answer(&request, config).await)
    }

    async fn try_grade_single_answer(
        &self,
        request: &SingleGradeRequest,
        config: &ApiConfig,
    ) -> AppResult<SingleGradeResponse> {
        validate_all([
            InputValidator::validate_api_config(config),
            InputValidator::validate_images(&[request.student_image.as_str()]),
        ])?;

        if let Some(cached) = self.cache.get_api_response(GRADE_ENDPOINT, request)? {
            if let Ok(response) = serde_json::from_value(cached) {
                debug!("单图评分命中缓存");
                return Ok(response);
            }
        }

        let response = self.client.grade_single(request, config).await?;
        if let Ok(value) = serde_json::to_value(&response) {
            self.cache
                .cache_api_response(GRADE_ENDPOINT, request, value, Some(SINGLE_GRADE_TTL))?;
        }
        Ok(response)
    }

    /// 查询批次状态
    pub async fn get_batch_status(&self, batch_id: &str, config: &ApiConfig) -> ApiResponse<Value> {
        ApiResponse::from_result(self.try_get_batch_status(batch_id, config).await)
    }

    async fn try_get_batch_status(&self, batch_id: &str, config: &ApiConfig) -> AppResult<Value> {
        validate_all([InputValidator::validate_api_config(config)])?;
        if batch_id.trim().is_empty() {
            return Err(AppError::other("批次 ID 不能为空"));
        }
        self.client.batch_status(batch_id.trim(), config).await
    }
}
