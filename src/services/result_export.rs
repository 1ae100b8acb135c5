//! 评分结果导出
//!
//! 一次运行结束后，把所有学生的评分记录汇总为 CSV 和 JSON 两个文件写入输出目录。
//! CSV 只保留评语的前 100 个字符，JSON 保留完整内容。

use anyhow::{Context, Result};
use csv::Writer;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::info;

use crate::models::{HistoricalResult, HistoryStatus};
use crate::utils::truncate_text;

/// CSV 表头
pub const CSV_HEADERS: [&str; 4] = ["Student Name", "Status", "Score", "Feedback"];
const FEEDBACK_PREVIEW_CHARS: usize = 100;

/// 导出的一行
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportRow {
    pub student_id: String,
    pub student_name: String,
    pub status: HistoryStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
    pub feedback: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<&HistoricalResult> for ExportRow {
    fn from(record: &HistoricalResult) -> Self {
        Self {
            student_id: record.student_id.clone(),
            student_name: record.student_name.clone(),
            status: record.status,
            score: record.score,
            feedback: record.feedback.clone(),
            error: record.error.clone(),
        }
    }
}

impl ExportRow {
    /// CSV 中的评语列：失败时填错误信息，多行压成一行并截断
    fn feedback_preview(&self) -> String {
        let text = match (&self.status, &self.error) {
            (HistoryStatus::Failed, Some(error)) => error.as_str(),
            _ => self.feedback.as_str(),
        };
        let flat = text.split_whitespace().collect::<Vec<_>>().join(" ");
        truncate_text(&flat, FEEDBACK_PREVIEW_CHARS)
    }
}

/// 生成 CSV 文本
pub fn to_csv(rows: &[ExportRow]) -> Result<String> {
    let mut writer = Writer::from_writer(Vec::new());
    writer
        .write_record(CSV_HEADERS)
        .context("写入 CSV 表头失败")?;

    for row in rows {
        let score = row.score.map(|s| s.to_string()).unwrap_or_default();
        writer
            .write_record([
                row.student_name.as_str(),
                row.status.as_str(),
                score.as_str(),
                row.feedback_preview().as_str(),
            ])
            .with_context(|| format!("写入 CSV 行失败: {}", row.student_name))?;
    }

    let bytes = writer
        .into_inner()
        .map_err(|e| anyhow::anyhow!("CSV 输出失败: {}", e.error()))?;
    String::from_utf8(bytes).context("CSV 不是有效的 UTF-8")
}

/// 写出 `batch_results_<batch_id>.csv` 和 `.json`，返回两个文件路径
pub async fn export_results(
    output_dir: &Path,
    batch_id: &str,
    rows: &[ExportRow],
) -> Result<(PathBuf, PathBuf)> {
    fs::create_dir_all(output_dir)
        .await
        .with_context(|| format!("无法创建输出目录: {}", output_dir.display()))?;

    let csv_path = output_dir.join(format!("batch_results_{}.csv", batch_id));
    fs::write(&csv_path, to_csv(rows)?)
        .await
        .with_context(|| format!("无法写入: {}", csv_path.display()))?;

    let json_path = output_dir.join(format!("batch_results_{}.json", batch_id));
    let json = serde_json::to_string_pretty(rows).context("结果序列化失败")?;
    fs::write(&json_path, json)
        .await
        .with_context(|| format!("无法写入: {}", json_path.display()))?;

    info!("📤 已导出 {} 条评分结果: {}", rows.len(), csv_path.display());
    Ok((csv_path, json_path))
}
