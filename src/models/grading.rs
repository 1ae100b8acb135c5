//! 评分后端的请求 / 响应结构
//!
//! 字段名与后端 JSON 保持一致（camelCase）。

use serde::{Deserialize, Serialize};

/// 标准答案分析请求中的单张图片
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyzeImage {
    /// base64 data URL
    pub data: String,
    pub order: u32,
    pub name: String,
}

/// 多图标准答案分析请求
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MultiAnalyzeRequest {
    pub images: Vec<AnalyzeImage>,
}

/// 单张图片的分析结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageAnalysis {
    pub order: u32,
    pub analysis: String,
    #[serde(default)]
    pub key_points: Vec<String>,
}

/// 多图标准答案分析响应
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MultiAnalyzeResponse {
    pub analyzed_text: String,
    #[serde(default)]
    pub suggested_rubric_json: String,
    #[serde(default)]
    pub image_analyses: Vec<ImageAnalysis>,
}

impl MultiAnalyzeResponse {
    /// 合并分批分析的结果
    ///
    /// 分析文本按批次顺序拼接，评分细则取第一个非空的建议。
    pub fn merge(parts: &[MultiAnalyzeResponse]) -> MultiAnalyzeResponse {
        let analyzed_text = parts
            .iter()
            .map(|p| p.analyzed_text.trim())
            .filter(|t| !t.is_empty())
            .collect::<Vec<_>>()
            .join("\n\n");

        let suggested_rubric_json = parts
            .iter()
            .map(|p| p.suggested_rubric_json.as_str())
            .find(|r| !r.trim().is_empty())
            .unwrap_or_default()
            .to_string();

        let image_analyses = parts
            .iter()
            .flat_map(|p| p.image_analyses.iter().cloned())
            .collect();

        MultiAnalyzeResponse {
            analyzed_text,
            suggested_rubric_json,
            image_analyses,
        }
    }
}

/// 批量评分请求中的标准答案图片
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StandardAnswerImageData {
    pub data: String,
    pub order: u32,
}

/// 批量评分请求中的一份学生作答
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentSubmissionData {
    pub id: String,
    pub name: String,
    pub image_data: String,
}

/// 批量评分请求
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchGradeRequest {
    pub standard_answer_images: Vec<StandardAnswerImageData>,
    pub standard_analysis: String,
    pub rubric: String,
    pub student_submissions: Vec<StudentSubmissionData>,
}

/// 单个学生的评分状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StudentGradeStatus {
    Completed,
    Error,
}

/// 单个学生的评分结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentGradeResult {
    pub student_id: String,
    pub status: StudentGradeStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feedback_markdown: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// 批量评分汇总
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchGradeSummary {
    pub total: usize,
    pub completed: usize,
    pub errors: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub average_score: Option<f64>,
}

/// 批量评分响应
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchGradeResponse {
    pub batch_id: String,
    pub results: Vec<StudentGradeResult>,
    pub summary: BatchGradeSummary,
}

/// 单图评分请求（旧接口，字段为 snake_case）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SingleGradeRequest {
    pub student_image: String,
    pub rubric: String,
    pub standard_answer: String,
}

/// 单图评分响应
///
/// 不同后端版本分别返回 `feedback` 或 `feedbackMarkdown`。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SingleGradeResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feedback: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feedback_markdown: Option<String>,
}

impl SingleGradeResponse {
    pub fn text(&self) -> Option<&str> {
        self.feedback_markdown
            .as_deref()
            .or(self.feedback.as_deref())
    }
}
