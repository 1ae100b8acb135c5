//! 输入校验 - 业务能力层
//!
//! 在发出任何网络请求之前校验配置、图片和批量评分请求。
//! 校验结果是一组 `{field, message, kind}`，调用方可以逐条展示。

use regex::Regex;
use reqwest::Url;
use serde::Serialize;
use std::sync::OnceLock;

use crate::error::{AppError, AppResult};
use crate::models::{AnalyzeImage, ApiConfig, BatchGradeRequest};

/// 单张图片大小上限（10MB）
pub const MAX_IMAGE_BYTES: usize = 10 * 1024 * 1024;
/// 一次最多上传的标准答案图片数
pub const MAX_IMAGES: usize = 50;
/// 一次批量评分最多的学生数
pub const MAX_SUBMISSIONS: usize = 100;
pub const MAX_ANALYSIS_CHARS: usize = 5000;
pub const MAX_RUBRIC_CHARS: usize = 2000;
pub const MAX_STUDENT_NAME_CHARS: usize = 100;
pub const MAX_FILENAME_CHARS: usize = 255;
const MIN_API_KEY_CHARS: usize = 10;

/// 允许上传的图片类型
static ALLOWED_IMAGE_TYPES: phf::Set<&'static str> = phf::phf_set! {
    "image/jpeg",
    "image/png",
    "image/gif",
    "image/webp",
};

/// 校验错误类别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ValidationErrorKind {
    Required,
    Format,
    Size,
    Type,
    Security,
}

/// 单条校验错误
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationError {
    pub field: String,
    pub message: String,
    #[serde(rename = "type")]
    pub kind: ValidationErrorKind,
}

impl ValidationError {
    pub fn new(
        field: impl Into<String>,
        message: impl Into<String>,
        kind: ValidationErrorKind,
    ) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
            kind,
        }
    }
}

/// 校验结果
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationResult {
    pub is_valid: bool,
    pub errors: Vec<ValidationError>,
}

impl ValidationResult {
    fn from_errors(errors: Vec<ValidationError>) -> Self {
        Self {
            is_valid: errors.is_empty(),
            errors,
        }
    }

    /// 转换为 `AppResult`，有错误时返回 `AppError::Validation`
    pub fn into_result(self) -> AppResult<()> {
        if self.is_valid {
            Ok(())
        } else {
            Err(AppError::Validation(self.errors))
        }
    }
}

/// 输入校验器
pub struct InputValidator;

impl InputValidator {
    /// 校验 API 配置
    pub fn validate_api_config(config: &ApiConfig) -> ValidationResult {
        let mut errors = Vec::new();

        let api_url = config.api_url.trim();
        if api_url.is_empty() {
            errors.push(ValidationError::new(
                "apiUrl",
                "API 地址不能为空",
                ValidationErrorKind::Required,
            ));
        } else if Url::parse(api_url).is_err() {
            errors.push(ValidationError::new(
                "apiUrl",
                "API 地址格式不正确",
                ValidationErrorKind::Format,
            ));
        }

        let api_key = config.api_key.trim();
        if api_key.is_empty() {
            errors.push(ValidationError::new(
                "apiKey",
                "API 密钥不能为空",
                ValidationErrorKind::Required,
            ));
        } else if api_key.chars().count() < MIN_API_KEY_CHARS {
            errors.push(ValidationError::new(
                "apiKey",
                "API 密钥看起来无效",
                ValidationErrorKind::Format,
            ));
        }

        if config.model_name.trim().is_empty() {
            errors.push(ValidationError::new(
                "modelName",
                "模型名称不能为空",
                ValidationErrorKind::Required,
            ));
        }

        ValidationResult::from_errors(errors)
    }

    /// 校验一组 data URL 图片
    pub fn validate_images<S: AsRef<str>>(images: &[S]) -> ValidationResult {
        let mut errors = Vec::new();

        if images.is_empty() {
            errors.push(ValidationError::new(
                "images",
                "至少需要一张图片",
                ValidationErrorKind::Required,
            ));
            return ValidationResult::from_errors(errors);
        }

        if images.len() > MAX_IMAGES {
            errors.push(ValidationError::new(
                "images",
                format!("最多允许 {} 张图片", MAX_IMAGES),
                ValidationErrorKind::Size,
            ));
        }

        for (index, image) in images.iter().enumerate() {
            let field = format!("images[{}]", index);
            errors.extend(Self::check_data_url(&field, image.as_ref()));
        }

        ValidationResult::from_errors(errors)
    }

    /// 校验标准答案分析请求中的图片
    pub fn validate_analyze_images(images: &[AnalyzeImage]) -> ValidationResult {
        let data: Vec<&str> = images.iter().map(|img| img.data.as_str()).collect();
        Self::validate_images(&data)
    }

    /// 校验标准答案分析和评分细则
    ///
    /// 每个评分批次都携带同一份分析和细则，提交前只需校验一次。
    pub fn validate_standard_answer(analysis: &str, rubric: &str) -> ValidationResult {
        let mut errors = Vec::new();

        if analysis.trim().is_empty() {
            errors.push(ValidationError::new(
                "standardAnalysis",
                "标准答案分析不能为空",
                ValidationErrorKind::Required,
            ));
        } else if analysis.chars().count() > MAX_ANALYSIS_CHARS {
            errors.push(ValidationError::new(
                "standardAnalysis",
                format!("标准答案分析过长（最多 {} 字）", MAX_ANALYSIS_CHARS),
                ValidationErrorKind::Size,
            ));
        }

        if rubric.trim().is_empty() {
            errors.push(ValidationError::new(
                "rubric",
                "评分细则不能为空",
                ValidationErrorKind::Required,
            ));
        } else if rubric.chars().count() > MAX_RUBRIC_CHARS {
            errors.push(ValidationError::new(
                "rubric",
                format!("评分细则过长（最多 {} 字）", MAX_RUBRIC_CHARS),
                ValidationErrorKind::Size,
            ));
        }

        ValidationResult::from_errors(errors)
    }

    /// 校验批量评分请求
    pub fn validate_batch_grade_request(request: &BatchGradeRequest) -> ValidationResult {
        let mut errors =
            Self::validate_standard_answer(&request.standard_analysis, &request.rubric).errors;

        let submissions = &request.student_submissions;
        if submissions.is_empty() {
            errors.push(ValidationError::new(
                "studentSubmissions",
                "至少需要一份学生作答",
                ValidationErrorKind::Required,
            ));
        } else if submissions.len() > MAX_SUBMISSIONS {
            errors.push(ValidationError::new(
                "studentSubmissions",
                format!("最多允许 {} 份学生作答", MAX_SUBMISSIONS),
                ValidationErrorKind::Size,
            ));
        }

        for (index, submission) in submissions.iter().enumerate() {
            let prefix = format!("studentSubmissions[{}]", index);

            if submission.image_data.trim().is_empty() {
                errors.push(ValidationError::new(
                    format!("{}.imageData", prefix),
                    "学生作答图片不能为空",
                    ValidationErrorKind::Required,
                ));
            } else {
                errors.extend(Self::check_data_url(
                    &format!("{}.imageData", prefix),
                    &submission.image_data,
                ));
            }

            if submission.name.chars().count() > MAX_STUDENT_NAME_CHARS {
                errors.push(ValidationError::new(
                    format!("{}.name", prefix),
                    format!("学生姓名过长（最多 {} 字）", MAX_STUDENT_NAME_CHARS),
                    ValidationErrorKind::Size,
                ));
            }
        }

        ValidationResult::from_errors(errors)
    }

    /// 校验上传文件的元信息
    pub fn validate_file_upload(file_name: &str, mime_type: &str, size: u64) -> ValidationResult {
        let mut errors = Vec::new();

        if file_name.is_empty() {
            errors.push(ValidationError::new(
                "file",
                "文件不能为空",
                ValidationErrorKind::Required,
            ));
            return ValidationResult::from_errors(errors);
        }

        if !ALLOWED_IMAGE_TYPES.contains(mime_type) {
            errors.push(ValidationError::new(
                "file",
                "只支持 JPEG、PNG、GIF 和 WebP 图片",
                ValidationErrorKind::Type,
            ));
        }

        if size > MAX_IMAGE_BYTES as u64 {
            errors.push(ValidationError::new(
                "file",
                "文件大小超过 10MB 限制",
                ValidationErrorKind::Size,
            ));
        }

        if file_name.chars().count() > MAX_FILENAME_CHARS {
            errors.push(ValidationError::new(
                "file",
                "文件名过长",
                ValidationErrorKind::Size,
            ));
        }

        if invalid_filename_chars().is_match(file_name) {
            errors.push(ValidationError::new(
                "file",
                "文件名包含非法字符",
                ValidationErrorKind::Security,
            ));
        }

        ValidationResult::from_errors(errors)
    }

    /// 转义 HTML 特殊字符
    pub fn sanitize_input(input: &str) -> String {
        let mut out = String::with_capacity(input.len());
        for c in input.chars() {
            match c {
                '<' => out.push_str("&lt;"),
                '>' => out.push_str("&gt;"),
                '"' => out.push_str("&quot;"),
                '\'' => out.push_str("&#x27;"),
                '/' => out.push_str("&#x2F;"),
                other => out.push(other),
            }
        }
        out
    }

    /// 清理配置：去掉首尾空白，模型名做转义
    pub fn sanitize_config(config: &ApiConfig) -> ApiConfig {
        ApiConfig {
            api_url: config.api_url.trim().to_string(),
            api_key: config.api_key.trim().to_string(),
            model_name: Self::sanitize_input(config.model_name.trim()),
            max_tokens: config.max_tokens,
            timeout: config.timeout,
        }
    }

    /// 格式化文件大小，例如 `1.5 MB`
    pub fn format_file_size(bytes: u64) -> String {
        if bytes == 0 {
            return "0 Bytes".to_string();
        }
        const UNITS: [&str; 4] = ["Bytes", "KB", "MB", "GB"];
        let exponent = ((bytes as f64).ln() / 1024f64.ln()).floor() as usize;
        let exponent = exponent.min(UNITS.len() - 1);
        let value = bytes as f64 / 1024f64.powi(exponent as i32);
        let rounded = (value * 100.0).round() / 100.0;
        format!("{} {}", rounded, UNITS[exponent])
    }

    fn check_data_url(field: &str, image: &str) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        if !image.starts_with("data:image/") {
            errors.push(ValidationError::new(
                field,
                "图片格式不正确",
                ValidationErrorKind::Format,
            ));
        }

        if estimated_data_url_bytes(image) > MAX_IMAGE_BYTES {
            errors.push(ValidationError::new(
                field,
                "图片大小超过 10MB 限制",
                ValidationErrorKind::Size,
            ));
        }

        errors
    }
}

/// 按 base64 长度估算 data URL 解码后的字节数
pub fn estimated_data_url_bytes(data_url: &str) -> usize {
    let payload = match data_url.find(',') {
        Some(idx) => &data_url[idx + 1..],
        None => data_url,
    };
    payload.len() / 4 * 3
}

fn invalid_filename_chars() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        // 字面量正则，编译不会失败
        Regex::new(r#"[\x00-\x1F\x7F<>:*?"|]"#).expect("valid filename regex")
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{StandardAnswerImageData, StudentSubmissionData};

    const PNG: &str = "data:image/png;base64,iVBORw0KGgo=";

    fn grade_request(submissions: Vec<StudentSubmissionData>) -> BatchGradeRequest {
        BatchGradeRequest {
            standard_answer_images: vec![StandardAnswerImageData {
                data: PNG.to_string(),
                order: 0,
            }],
            standard_analysis: "第一步：列方程".to_string(),
            rubric: "列方程 3 分，求解 2 分".to_string(),
            student_submissions: submissions,
        }
    }

    fn submission(name: &str, image: &str) -> StudentSubmissionData {
        StudentSubmissionData {
            id: format!("id-{}", name),
            name: name.to_string(),
            image_data: image.to_string(),
        }
    }

    fn fields(result: &ValidationResult) -> Vec<&str> {
        result.errors.iter().map(|e| e.field.as_str()).collect()
    }

    #[test]
    fn test_valid_api_config() {
        let config = ApiConfig::new("https://api.openai.com/v1", "sk-abcdefghijkl", "gpt-4o");
        let result = InputValidator::validate_api_config(&config);
        assert!(result.is_valid);
        assert!(result.into_result().is_ok());
    }

    #[test]
    fn test_api_config_reports_every_field() {
        let config = ApiConfig::new("not a url", "short", "");
        let result = InputValidator::validate_api_config(&config);
        assert!(!result.is_valid);
        assert_eq!(fields(&result), vec!["apiUrl", "apiKey", "modelName"]);
        assert_eq!(result.errors[0].kind, ValidationErrorKind::Format);
        assert_eq!(result.errors[2].kind, ValidationErrorKind::Required);
    }

    #[test]
    fn test_images_require_data_url() {
        let result = InputValidator::validate_images(&[PNG, "https://example.com/a.png"]);
        assert_eq!(fields(&result), vec!["images[1]"]);

        let empty: [&str; 0] = [];
        let result = InputValidator::validate_images(&empty);
        assert_eq!(result.errors[0].kind, ValidationErrorKind::Required);
    }

    #[test]
    fn test_images_limit_count() {
        let images = vec![PNG; MAX_IMAGES + 1];
        let result = InputValidator::validate_images(&images);
        assert_eq!(fields(&result), vec!["images"]);
        assert_eq!(result.errors[0].kind, ValidationErrorKind::Size);
    }

    #[test]
    fn test_oversized_image_rejected() {
        let big = format!("data:image/png;base64,{}", "A".repeat(MAX_IMAGE_BYTES / 3 * 4 + 8));
        let result = InputValidator::validate_images(&[big]);
        assert_eq!(result.errors.len(), 1);
        assert_eq!(result.errors[0].kind, ValidationErrorKind::Size);
    }

    #[test]
    fn test_batch_request_ok() {
        let request = grade_request(vec![submission("张三", PNG)]);
        assert!(InputValidator::validate_batch_grade_request(&request).is_valid);
    }

    #[test]
    fn test_batch_request_errors() {
        let mut request = grade_request(vec![
            submission("李四", ""),
            submission(&"王".repeat(MAX_STUDENT_NAME_CHARS + 1), PNG),
        ]);
        request.rubric = "细".repeat(MAX_RUBRIC_CHARS + 1);

        let result = InputValidator::validate_batch_grade_request(&request);
        assert_eq!(
            fields(&result),
            vec![
                "rubric",
                "studentSubmissions[0].imageData",
                "studentSubmissions[1].name"
            ]
        );
    }

    #[test]
    fn test_standard_answer_checked_once() {
        // 两段各 2600 字的分批分析合并后超过上限
        let merged = format!("{}\n\n{}", "析".repeat(2600), "析".repeat(2600));
        let result = InputValidator::validate_standard_answer(&merged, "");
        assert_eq!(fields(&result), vec!["standardAnalysis", "rubric"]);
        assert_eq!(result.errors[0].kind, ValidationErrorKind::Size);
        assert_eq!(result.errors[1].kind, ValidationErrorKind::Required);

        assert!(InputValidator::validate_standard_answer("分析", "{\"total\": 10}").is_valid);
    }

    #[test]
    fn test_batch_request_needs_submissions() {
        let request = grade_request(vec![]);
        let err = InputValidator::validate_batch_grade_request(&request)
            .into_result()
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(ref errors) if errors.len() == 1));
    }

    #[test]
    fn test_file_upload_rules() {
        assert!(InputValidator::validate_file_upload("answer.png", "image/png", 1024).is_valid);

        let result = InputValidator::validate_file_upload("a<b>.bmp", "image/bmp", 11 * 1024 * 1024);
        let kinds: Vec<ValidationErrorKind> = result.errors.iter().map(|e| e.kind).collect();
        assert_eq!(
            kinds,
            vec![
                ValidationErrorKind::Type,
                ValidationErrorKind::Size,
                ValidationErrorKind::Security
            ]
        );
    }

    #[test]
    fn test_sanitize() {
        assert_eq!(
            InputValidator::sanitize_input("<b>\"x\"/'y'"),
            "&lt;b&gt;&quot;x&quot;&#x2F;&#x27;y&#x27;"
        );

        let config = ApiConfig::new("  https://a.com  ", " key-1234567890 ", " gpt<4> ");
        let clean = InputValidator::sanitize_config(&config);
        assert_eq!(clean.api_url, "https://a.com");
        assert_eq!(clean.api_key, "key-1234567890");
        assert_eq!(clean.model_name, "gpt&lt;4&gt;");
    }

    #[test]
    fn test_format_file_size() {
        assert_eq!(InputValidator::format_file_size(0), "0 Bytes");
        assert_eq!(InputValidator::format_file_size(512), "512 Bytes");
        assert_eq!(InputValidator::format_file_size(1536), "1.5 KB");
        assert_eq!(InputValidator::format_file_size(10 * 1024 * 1024), "10 MB");
    }
}
