//! 历史评分记录与已保存的标准答案

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 历史记录状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HistoryStatus {
    Completed,
    Failed,
}

impl HistoryStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            HistoryStatus::Completed => "completed",
            HistoryStatus::Failed => "failed",
        }
    }
}

/// 一条历史评分记录
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoricalResult {
    pub id: String,
    pub student_id: String,
    pub student_name: String,
    pub standard_answer_id: String,
    pub standard_answer_title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
    #[serde(default)]
    pub feedback: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub status: HistoryStatus,
    pub timestamp: DateTime<Utc>,
    /// 所在评分任务的耗时（毫秒）
    #[serde(default)]
    pub processing_time: u64,
}

/// 已保存的标准答案
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StandardAnswer {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    /// 图片文件名，按顺序
    #[serde(default)]
    pub image_names: Vec<String>,
    pub analysis: String,
    pub rubric: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
