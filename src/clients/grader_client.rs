/// 评分后端 HTTP 客户端
///
/// 封装所有与评分后端相关的调用。每个请求体都是业务数据与
/// `apiUrl` / `apiKey` / `modelName` 平铺合并后的 JSON。
use futures::future::BoxFuture;
use futures::FutureExt;
use reqwest::{Client, Response};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, warn};

use crate::clients::GradingBackend;
use crate::error::{ApiError, AppError, AppResult};
use crate::models::{
    AnalyzeImage, ApiConfig, BatchGradeRequest, BatchGradeResponse, MultiAnalyzeRequest,
    MultiAnalyzeResponse, SingleGradeRequest, SingleGradeResponse,
};

pub const ANALYZE_MULTI_ENDPOINT: &str = "/api/analyze_multi_answer";
pub const BATCH_GRADE_ENDPOINT: &str = "/api/batch_grade";
pub const GRADE_ENDPOINT: &str = "/api/grade";
pub const TEST_CONNECTION_ENDPOINT: &str = "/api/test_connection";
pub const CONFIGURE_ENDPOINT: &str = "/api/configure";
pub const BATCH_STATUS_ENDPOINT: &str = "/api/batch_status";

/// 请求体：业务数据 + 模型配置
#[derive(Serialize)]
struct WithCredentials<'a, T: Serialize> {
    #[serde(flatten)]
    request: &'a T,
    #[serde(rename = "apiUrl")]
    api_url: &'a str,
    #[serde(rename = "apiKey")]
    api_key: &'a str,
    #[serde(rename = "modelName")]
    model_name: &'a str,
}

impl<'a, T: Serialize> WithCredentials<'a, T> {
    fn new(request: &'a T, config: &'a ApiConfig) -> Self {
        Self {
            request,
            api_url: &config.api_url,
            api_key: &config.api_key,
            model_name: &config.model_name,
        }
    }
}

/// 评分后端客户端
#[derive(Debug, Clone)]
pub struct GraderClient {
    http: Client,
    base_url: String,
    timeout: Option<Duration>,
}

impl GraderClient {
    /// 创建新的客户端
    ///
    /// # 参数
    /// - `base_url`: 评分后端地址，例如 `http://127.0.0.1:5000`
    /// - `timeout`: 默认请求超时，`None` 表示不限时
    pub fn new(base_url: impl Into<String>, timeout: Option<Duration>) -> AppResult<Self> {
        let http = Client::builder()
            .build()
            .map_err(|e| AppError::Api(ApiError::ClientBuild(e)))?;

        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            timeout,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, endpoint: &str) -> String {
        format!("{}{}", self.base_url, endpoint)
    }

    /// API 配置里的超时优先于客户端默认值
    fn timeout_for(&self, config: Option<&ApiConfig>) -> Option<Duration> {
        config
            .and_then(|c| c.timeout)
            .map(Duration::from_secs)
            .or(self.timeout)
    }

    /// 分析多图标准答案
    pub async fn analyze_multi_answer(
        &self,
        images: &[AnalyzeImage],
        config: &ApiConfig,
    ) -> AppResult<MultiAnalyzeResponse> {
        debug!("分析标准答案，图片数: {}", images.len());
        let request = MultiAnalyzeRequest {
            images: images.to_vec(),
        };
        self.post_with_credentials(ANALYZE_MULTI_ENDPOINT, &request, config, "标准答案分析失败")
            .await
    }

    /// 批量评分
    pub async fn batch_grade(
        &self,
        request: &BatchGradeRequest,
        config: &ApiConfig,
    ) -> AppResult<BatchGradeResponse> {
        debug!("批量评分，学生数: {}", request.student_submissions.len());
        self.post_with_credentials(BATCH_GRADE_ENDPOINT, request, config, "批量评分失败")
            .await
    }

    /// 单图评分（旧接口）
    pub async fn grade_single(
        &self,
        request: &SingleGradeRequest,
        config: &ApiConfig,
    ) -> AppResult<SingleGradeResponse> {
        self.post_with_credentials(GRADE_ENDPOINT, request, config, "评分失败")
            .await
    }

    /// 测试模型连接
    pub async fn test_connection(&self, config: &ApiConfig) -> AppResult<Value> {
        let body = WithCredentials::new(&EmptyBody {}, config);
        self.post_json(TEST_CONNECTION_ENDPOINT, &body, Some(config), "连接测试失败")
            .await
    }

    /// 把配置同步给后端
    pub async fn configure(&self, config: &ApiConfig) -> AppResult<Value> {
        self.post_json(CONFIGURE_ENDPOINT, config, Some(config), "配置同步失败")
            .await
    }

    /// 查询批次状态，配置通过查询参数传递
    pub async fn batch_status(&self, batch_id: &str, config: &ApiConfig) -> AppResult<Value> {
        let endpoint = format!("{}/{}", BATCH_STATUS_ENDPOINT, batch_id);
        let mut builder = self.http.get(self.url(&endpoint)).query(&[
            ("apiUrl", config.api_url.as_str()),
            ("apiKey", config.api_key.as_str()),
            ("modelName", config.model_name.as_str()),
        ]);
        if let Some(timeout) = self.timeout_for(Some(config)) {
            builder = builder.timeout(timeout);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| AppError::api_request_failed(&endpoint, e))?;

        Self::parse_response(&endpoint, response, "获取批次状态失败").await
    }

    async fn post_with_credentials<T, R>(
        &self,
        endpoint: &str,
        request: &T,
        config: &ApiConfig,
        fallback_error: &str,
    ) -> AppResult<R>
    where
        T: Serialize,
        R: DeserializeOwned,
    {
        let body = WithCredentials::new(request, config);
        self.post_json(endpoint, &body, Some(config), fallback_error)
            .await
    }

    async fn post_json<B, R>(
        &self,
        endpoint: &str,
        body: &B,
        config: Option<&ApiConfig>,
        fallback_error: &str,
    ) -> AppResult<R>
    where
        B: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let mut builder = self.http.post(self.url(endpoint)).json(body);
        if let Some(timeout) = self.timeout_for(config) {
            builder = builder.timeout(timeout);
        }

        let response = builder.send().await.map_err(|e| {
            warn!("请求 {} 失败: {}", endpoint, e);
            AppError::api_request_failed(endpoint, e)
        })?;

        Self::parse_response(endpoint, response, fallback_error).await
    }

    /// 非 2xx 时取响应体中的 `error` 字段作为错误信息
    async fn parse_response<R: DeserializeOwned>(
        endpoint: &str,
        response: Response,
        fallback_error: &str,
    ) -> AppResult<R> {
        let status = response.status();

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = extract_error_message(&body).unwrap_or_else(|| fallback_error.to_string());
            warn!("{} 返回 HTTP {}: {}", endpoint, status.as_u16(), message);
            return Err(AppError::api_bad_response(endpoint, status.as_u16(), message));
        }

        response.json::<R>().await.map_err(|source| {
            AppError::Api(ApiError::DecodeFailed {
                endpoint: endpoint.to_string(),
                source,
            })
        })
    }
}

#[derive(Serialize)]
struct EmptyBody {}

/// 从错误响应体中提取 `error` 字段
pub fn extract_error_message(body: &str) -> Option<String> {
    let value: Value = serde_json::from_str(body).ok()?;
    value
        .get("error")
        .and_then(|e| e.as_str())
        .map(str::trim)
        .filter(|e| !e.is_empty())
        .map(str::to_string)
}

impl GradingBackend for GraderClient {
    fn analyze_multi_answer<'a>(
        &'a self,
        images: &'a [AnalyzeImage],
        config: &'a ApiConfig,
    ) -> BoxFuture<'a, AppResult<MultiAnalyzeResponse>> {
        GraderClient::analyze_multi_answer(self, images, config).boxed()
    }

    fn batch_grade<'a>(
        &'a self,
        request: &'a BatchGradeRequest,
        config: &'a ApiConfig,
    ) -> BoxFuture<'a, AppResult<BatchGradeResponse>> {
        GraderClient::batch_grade(self, request, config).boxed()
    }
}
