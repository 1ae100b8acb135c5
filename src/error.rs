use thiserror::Error;

use crate::services::validator::ValidationError;

/// 应用程序错误类型
#[derive(Debug, Error)]
pub enum AppError {
    /// 输入校验失败（在任何网络请求之前）
    #[error("参数校验失败: {}", join_validation_messages(.0))]
    Validation(Vec<ValidationError>),
    /// API 调用错误
    #[error("API错误: {0}")]
    Api(#[from] ApiError),
    /// 缓存错误
    #[error("缓存错误: {0}")]
    Cache(#[from] CacheError),
    /// 本地存储错误
    #[error("存储错误: {0}")]
    Storage(#[from] StorageError),
    /// 配置错误
    #[error("配置错误: {0}")]
    Config(#[from] ConfigError),
    /// 其他错误
    #[error("错误: {0}")]
    Other(String),
}

/// API 调用错误
#[derive(Debug, Error)]
pub enum ApiError {
    /// 网络请求失败（连接、超时等）
    #[error("API请求失败 ({endpoint}): {source}")]
    RequestFailed {
        endpoint: String,
        #[source]
        source: reqwest::Error,
    },
    /// 后端返回非 2xx 状态码
    #[error("API返回错误响应 ({endpoint}, HTTP {status}): {message}")]
    BadResponse {
        endpoint: String,
        status: u16,
        message: String,
    },
    /// 响应体无法解析
    #[error("API响应解析失败 ({endpoint}): {source}")]
    DecodeFailed {
        endpoint: String,
        #[source]
        source: reqwest::Error,
    },
    /// HTTP 客户端构建失败
    #[error("HTTP客户端初始化失败: {0}")]
    ClientBuild(#[source] reqwest::Error),
}

/// 缓存错误
#[derive(Debug, Error)]
pub enum CacheError {
    /// 请求数据无法序列化为缓存键
    #[error("无法序列化缓存键数据 (前缀: {prefix}): {source}")]
    Serialization {
        prefix: String,
        #[source]
        source: serde_json::Error,
    },
}

/// 本地存储错误
#[derive(Debug, Error)]
pub enum StorageError {
    /// 文件读写失败
    #[error("文件操作失败 ({path}): {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    /// 数据无法编码为 JSON
    #[error("数据编码失败 ({key}): {source}")]
    Encode {
        key: String,
        #[source]
        source: serde_json::Error,
    },
}

/// 配置错误
#[derive(Debug, Error)]
pub enum ConfigError {
    /// 配置文件读取失败
    #[error("无法读取配置文件 {path}: {source}")]
    FileRead {
        path: String,
        #[source]
        source: std::io::Error,
    },
    /// TOML 解析失败
    #[error("TOML解析失败 ({path}): {source}")]
    TomlParse {
        path: String,
        #[source]
        source: toml::de::Error,
    },
    /// 没有可用的 API 配置
    #[error("没有可用的 API 配置")]
    MissingApiConfig,
}

fn join_validation_messages(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(|e| format!("{}: {}", e.field, e.message))
        .collect::<Vec<_>>()
        .join("; ")
}

// ========== 便捷构造函数 ==========

impl AppError {
    /// 创建网络请求失败错误
    pub fn api_request_failed(endpoint: impl Into<String>, source: reqwest::Error) -> Self {
        AppError::Api(ApiError::RequestFailed {
            endpoint: endpoint.into(),
            source,
        })
    }

    /// 创建后端错误响应
    pub fn api_bad_response(
        endpoint: impl Into<String>,
        status: u16,
        message: impl Into<String>,
    ) -> Self {
        AppError::Api(ApiError::BadResponse {
            endpoint: endpoint.into(),
            status,
            message: message.into(),
        })
    }

    /// 创建文件读写错误
    pub fn storage_io(path: impl Into<String>, source: std::io::Error) -> Self {
        AppError::Storage(StorageError::Io {
            path: path.into(),
            source,
        })
    }

    /// 创建通用错误
    pub fn other(message: impl Into<String>) -> Self {
        AppError::Other(message.into())
    }

    /// 面向用户的单条可读错误信息
    ///
    /// 后端返回的 `error` 字段原样透传，不附带内部错误链。
    pub fn user_message(&self) -> String {
        match self {
            AppError::Api(ApiError::BadResponse { message, .. }) => message.clone(),
            AppError::Validation(errors) => join_validation_messages(errors),
            AppError::Other(message) => message.clone(),
            other => other.to_string(),
        }
    }
}

// ========== Result 类型别名 ==========

/// 应用程序结果类型
pub type AppResult<T> = Result<T, AppError>;
