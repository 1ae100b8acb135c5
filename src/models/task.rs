//! 异步任务模型
//!
//! 任务一旦提交就归处理器所有，调用方只能拿到快照。

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::time::Duration;

use crate::models::api_config::ApiConfig;
use crate::models::grading::{BatchGradeRequest, MultiAnalyzeRequest};

/// 任务 ID，按提交顺序单调递增
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct TaskId(u64);

impl TaskId {
    pub(crate) fn new(seq: u64) -> Self {
        Self(seq)
    }

    pub fn seq(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task_{:06}", self.0)
    }
}

/// 任务类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskKind {
    /// 标准答案分析
    Analysis,
    /// 学生作答批量评分
    Grading,
}

impl TaskKind {
    /// 缓存键前缀
    pub fn cache_prefix(self) -> &'static str {
        match self {
            TaskKind::Analysis => "analysis",
            TaskKind::Grading => "grading",
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            TaskKind::Analysis => "分析",
            TaskKind::Grading => "评分",
        }
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// 任务状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }

    /// 尚未结束（排队中或执行中）
    pub fn is_active(self) -> bool {
        matches!(self, TaskStatus::Pending | TaskStatus::Processing)
    }
}

/// 任务请求数据
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskRequest {
    Analysis(MultiAnalyzeRequest),
    Grading(BatchGradeRequest),
}

impl TaskRequest {
    pub fn kind(&self) -> TaskKind {
        match self {
            TaskRequest::Analysis(_) => TaskKind::Analysis,
            TaskRequest::Grading(_) => TaskKind::Grading,
        }
    }
}

/// 任务载荷：请求数据 + 执行所需的 API 配置
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskPayload {
    pub request: TaskRequest,
    pub api_config: ApiConfig,
}

impl TaskPayload {
    pub fn analysis(request: MultiAnalyzeRequest, api_config: ApiConfig) -> Self {
        Self {
            request: TaskRequest::Analysis(request),
            api_config,
        }
    }

    pub fn grading(request: BatchGradeRequest, api_config: ApiConfig) -> Self {
        Self {
            request: TaskRequest::Grading(request),
            api_config,
        }
    }

    pub fn kind(&self) -> TaskKind {
        self.request.kind()
    }
}

/// 任务快照
#[derive(Debug, Clone)]
pub struct Task {
    pub id: TaskId,
    pub kind: TaskKind,
    pub payload: TaskPayload,
    pub status: TaskStatus,
    /// 百分比进度，执行期间只增不减
    pub progress: u8,
    pub result: Option<serde_json::Value>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Task {
    pub(crate) fn new(id: TaskId, payload: TaskPayload) -> Self {
        Self {
            id,
            kind: payload.kind(),
            payload,
            status: TaskStatus::Pending,
            progress: 0,
            result: None,
            error: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }

    /// 把结果反序列化为具体类型
    pub fn result_as<T: serde::de::DeserializeOwned>(&self) -> Option<serde_json::Result<T>> {
        self.result
            .as_ref()
            .map(|value| serde_json::from_value(value.clone()))
    }

    /// 从开始执行到结束的耗时
    pub fn elapsed(&self) -> Option<Duration> {
        let started = self.started_at?;
        let completed = self.completed_at?;
        (completed - started).to_std().ok()
    }
}

/// 处理器统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskStats {
    pub total: usize,
    pub pending: usize,
    pub processing: usize,
    pub completed: usize,
    pub failed: usize,
    pub queue_size: usize,
}
