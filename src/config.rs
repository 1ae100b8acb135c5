use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use crate::cache::CacheOptions;
use crate::error::{AppResult, ConfigError};
use crate::models::ApiConfig;
use crate::orchestrator::ProcessorOptions;

/// 默认配置文件
pub const DEFAULT_CONFIG_FILE: &str = "grader.toml";

/// 程序配置
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Config {
    /// 同时执行的任务数量
    pub max_concurrent_tasks: usize,
    /// 缓存最大条目数
    pub cache_capacity: usize,
    /// 缓存默认 TTL（秒）
    pub cache_default_ttl_secs: u64,
    /// 分析结果缓存时间（秒）
    pub analysis_cache_ttl_secs: u64,
    /// 评分结果缓存时间（秒）
    pub grading_cache_ttl_secs: u64,
    /// 每次分析请求携带的图片数
    pub analysis_chunk_size: usize,
    /// 每个评分任务包含的学生数
    pub grading_batch_size: usize,
    /// 评分失败的学生是否重试一次
    pub retry_failed_submissions: bool,
    /// 评分后端地址
    pub backend_base_url: String,
    /// HTTP 请求超时（秒），不设置则不限时
    pub request_timeout_secs: Option<u64>,
    /// 本地数据目录
    pub storage_dir: String,
    /// 标准答案图片目录
    pub standard_answer_dir: String,
    /// 学生作答图片目录
    pub submissions_dir: String,
    /// 评语输出目录
    pub output_dir: String,
    /// 是否显示详细日志
    pub verbose_logging: bool,
    // --- 模型配置（没有已保存的配置时使用） ---
    pub llm_api_url: String,
    pub llm_api_key: String,
    pub llm_model_name: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_concurrent_tasks: 3,
            cache_capacity: 100,
            cache_default_ttl_secs: 30 * 60,
            analysis_cache_ttl_secs: 2 * 60 * 60,
            grading_cache_ttl_secs: 60 * 60,
            analysis_chunk_size: 5,
            grading_batch_size: 10,
            retry_failed_submissions: true,
            backend_base_url: "http://127.0.0.1:5000".to_string(),
            request_timeout_secs: Some(120),
            storage_dir: "grader_data".to_string(),
            standard_answer_dir: "standard_answer".to_string(),
            submissions_dir: "submissions".to_string(),
            output_dir: "feedback".to_string(),
            verbose_logging: false,
            llm_api_url: "https://api.openai.com/v1".to_string(),
            llm_api_key: String::new(),
            llm_model_name: "gpt-4o".to_string(),
        }
    }
}

impl Config {
    /// 加载配置：默认值 → 配置文件 → 环境变量
    ///
    /// `GRADER_CONFIG` 指定的文件必须存在；未指定时读取当前目录下的
    /// `grader.toml`（不存在则跳过）。
    pub fn load() -> AppResult<Self> {
        let base = match std::env::var("GRADER_CONFIG") {
            Ok(path) => Self::from_file(&path)?,
            Err(_) if Path::new(DEFAULT_CONFIG_FILE).exists() => {
                Self::from_file(DEFAULT_CONFIG_FILE)?
            }
            Err(_) => Self::default(),
        };
        Ok(base.with_env_overrides())
    }

    /// 从 TOML 文件读取，缺省字段取默认值
    pub fn from_file(path: impl AsRef<Path>) -> AppResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::FileRead {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&content, &path.display().to_string())
    }

    pub fn from_toml_str(content: &str, origin: &str) -> AppResult<Self> {
        let config = toml::from_str(content).map_err(|source| ConfigError::TomlParse {
            path: origin.to_string(),
            source,
        })?;
        Ok(config)
    }

    /// 只使用默认值和环境变量
    pub fn from_env() -> Self {
        Self::default().with_env_overrides()
    }

    /// 用环境变量覆盖已有值，无法解析的值保持不变
    pub fn with_env_overrides(self) -> Self {
        fn parsed<T: std::str::FromStr>(name: &str, current: T) -> T {
            std::env::var(name).ok().and_then(|v| v.parse().ok()).unwrap_or(current)
        }
        fn text(name: &str, current: String) -> String {
            std::env::var(name).unwrap_or(current)
        }

        Self {
            max_concurrent_tasks: parsed("MAX_CONCURRENT_TASKS", self.max_concurrent_tasks),
            cache_capacity: parsed("CACHE_CAPACITY", self.cache_capacity),
            cache_default_ttl_secs: parsed("CACHE_DEFAULT_TTL_SECS", self.cache_default_ttl_secs),
            analysis_cache_ttl_secs: parsed("ANALYSIS_CACHE_TTL_SECS", self.analysis_cache_ttl_secs),
            grading_cache_ttl_secs: parsed("GRADING_CACHE_TTL_SECS", self.grading_cache_ttl_secs),
            analysis_chunk_size: parsed("ANALYSIS_CHUNK_SIZE", self.analysis_chunk_size),
            grading_batch_size: parsed("GRADING_BATCH_SIZE", self.grading_batch_size),
            retry_failed_submissions: parsed(
                "RETRY_FAILED_SUBMISSIONS",
                self.retry_failed_submissions,
            ),
            backend_base_url: text("BACKEND_BASE_URL", self.backend_base_url),
            request_timeout_secs: std::env::var("REQUEST_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .or(self.request_timeout_secs),
            storage_dir: text("STORAGE_DIR", self.storage_dir),
            standard_answer_dir: text("STANDARD_ANSWER_DIR", self.standard_answer_dir),
            submissions_dir: text("SUBMISSIONS_DIR", self.submissions_dir),
            output_dir: text("OUTPUT_DIR", self.output_dir),
            verbose_logging: parsed("VERBOSE_LOGGING", self.verbose_logging),
            llm_api_url: text("LLM_API_URL", self.llm_api_url),
            llm_api_key: text("LLM_API_KEY", self.llm_api_key),
            llm_model_name: text("LLM_MODEL_NAME", self.llm_model_name),
        }
    }

    pub fn cache_options(&self) -> CacheOptions {
        CacheOptions {
            capacity: self.cache_capacity,
            default_ttl: Duration::from_secs(self.cache_default_ttl_secs),
        }
    }

    pub fn processor_options(&self) -> ProcessorOptions {
        ProcessorOptions {
            max_concurrent_tasks: self.max_concurrent_tasks,
            analysis_chunk_size: self.analysis_chunk_size,
            analysis_ttl: Duration::from_secs(self.analysis_cache_ttl_secs),
            grading_ttl: Duration::from_secs(self.grading_cache_ttl_secs),
        }
    }

    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout_secs.map(Duration::from_secs)
    }

    /// 配置文件中的默认模型配置
    pub fn default_api_config(&self) -> ApiConfig {
        ApiConfig::new(&self.llm_api_url, &self.llm_api_key, &self.llm_model_name)
    }
}
