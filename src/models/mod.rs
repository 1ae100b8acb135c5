pub mod api_config;
pub mod grading;
pub mod history;
pub mod task;

pub use api_config::{ApiConfig, SavedApiConfig};
pub use grading::{
    AnalyzeImage, BatchGradeRequest, BatchGradeResponse, BatchGradeSummary, ImageAnalysis,
    MultiAnalyzeRequest, MultiAnalyzeResponse, SingleGradeRequest, SingleGradeResponse,
    StandardAnswerImageData, StudentGradeResult, StudentGradeStatus, StudentSubmissionData,
};
pub use history::{HistoricalResult, HistoryStatus, StandardAnswer};
pub use task::{Task, TaskId, TaskKind, TaskPayload, TaskRequest, TaskStats, TaskStatus};
