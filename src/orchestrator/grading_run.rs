//! 一次批量评分
//!
//! ## 职责
//!
//! 把学生作答按批次大小拆分后交给 `TaskProcessor`，结束后汇总每个学生的最终结果：
//!
//! 1. **提交前校验**：标准答案分析和评分细则只校验一次，不合格时整轮不提交
//! 2. **批次校验**：未通过校验的批次不提交，其中的学生直接记为失败
//! 3. **失败重试**：评分失败的学生重新组批提交一次，重试前清掉对应的缓存
//! 4. **结果汇总**：每个学生以最后一次尝试为准，按提交顺序返回

use std::collections::HashMap;
use tracing::{error, info, warn};

use crate::error::AppResult;
use crate::models::{
    ApiConfig, BatchGradeRequest, BatchGradeResponse, StandardAnswerImageData,
    StudentGradeStatus, StudentSubmissionData, TaskId, TaskStatus,
};
use crate::orchestrator::TaskProcessor;
use crate::services::InputValidator;

enum BatchState {
    Submitted(TaskId),
    /// 未通过校验，没有提交
    Skipped(String),
}

struct GradingBatch {
    request: BatchGradeRequest,
    state: BatchState,
    attempt: usize,
}

/// 评分成功的内容
#[derive(Debug, Clone, PartialEq)]
pub struct GradedFeedback {
    pub feedback: String,
    pub score: Option<f64>,
}

/// 单个学生的评分结果
#[derive(Debug, Clone, PartialEq)]
pub struct StudentOutcome {
    pub student: StudentSubmissionData,
    /// 产生该结果的任务，未提交的批次为 `None`
    pub task_id: Option<TaskId>,
    pub result: Result<GradedFeedback, String>,
    /// 所在任务的耗时（毫秒）
    pub processing_time: u64,
    /// 第几次尝试，从 1 开始
    pub attempt: usize,
}

impl StudentOutcome {
    pub fn is_graded(&self) -> bool {
        self.result.is_ok()
    }
}

/// 一轮批量评分
pub struct GradingRun {
    processor: TaskProcessor,
    api_config: ApiConfig,
    /// 除学生作答外的请求内容
    template: BatchGradeRequest,
    batch_size: usize,
    students: Vec<StudentSubmissionData>,
    batches: Vec<GradingBatch>,
}

impl GradingRun {
    /// 创建一轮评分，标准答案分析或评分细则不合格时返回校验错误
    pub fn new(
        processor: TaskProcessor,
        api_config: ApiConfig,
        standard_answer_images: Vec<StandardAnswerImageData>,
        standard_analysis: String,
        rubric: String,
        batch_size: usize,
    ) -> AppResult<Self> {
        InputValidator::validate_standard_answer(&standard_analysis, &rubric).into_result()?;

        Ok(Self {
            processor,
            api_config,
            template: BatchGradeRequest {
                standard_answer_images,
                standard_analysis,
                rubric,
                student_submissions: Vec::new(),
            },
            batch_size: batch_size.max(1),
            students: Vec::new(),
            batches: Vec::new(),
        })
    }

    /// 拆批提交，返回提交的任务数
    pub fn submit(&mut self, students: &[StudentSubmissionData]) -> usize {
        self.students.extend(students.iter().cloned());
        let submitted = self.submit_batches(students, 1);
        info!("📋 共提交 {} 个评分任务", submitted);
        submitted
    }

    /// 等待所有任务结束
    pub async fn wait(&self) {
        self.processor.wait_idle().await;
    }

    /// 评分失败的学生重新提交一次并等待结束，返回重试的学生数
    ///
    /// 只重试第一次尝试失败且批次已提交过的学生；未通过校验的批次重试也不会通过。
    pub async fn retry_failed(&mut self) -> usize {
        let failed: Vec<StudentSubmissionData> = self
            .outcomes()
            .into_iter()
            .filter(|o| o.attempt == 1 && o.task_id.is_some() && !o.is_graded())
            .map(|o| o.student)
            .collect();

        if failed.is_empty() {
            return 0;
        }

        info!("🔁 重试 {} 名评分失败的学生", failed.len());
        self.submit_batches(&failed, 2);
        self.wait().await;
        failed.len()
    }

    /// 学生总数
    pub fn student_count(&self) -> usize {
        self.students.len()
    }

    /// 每个学生的最终结果，按提交顺序
    pub fn outcomes(&self) -> Vec<StudentOutcome> {
        let mut latest: HashMap<String, StudentOutcome> = HashMap::new();
        for batch in &self.batches {
            for outcome in self.batch_outcomes(batch) {
                latest.insert(outcome.student.id.clone(), outcome);
            }
        }

        self.students
            .iter()
            .filter_map(|s| latest.remove(&s.id))
            .collect()
    }

    fn submit_batches(&mut self, students: &[StudentSubmissionData], attempt: usize) -> usize {
        let mut submitted = 0;

        for (index, chunk) in students.chunks(self.batch_size).enumerate() {
            let request = BatchGradeRequest {
                student_submissions: chunk.to_vec(),
                ..self.template.clone()
            };

            if let Err(e) = InputValidator::validate_batch_grade_request(&request).into_result() {
                let message = e.user_message();
                error!("❌ 第 {} 批学生未通过校验，跳过: {}", index + 1, message);
                self.batches.push(GradingBatch {
                    request,
                    state: BatchState::Skipped(message),
                    attempt,
                });
                continue;
            }

            if attempt > 1 {
                // 批次成功但个别学生出错的结果在缓存里，不清掉会原样命中
                if let Err(e) = self.processor.cache().invalidate_grading_result(&request) {
                    warn!("⚠️ 清除评分缓存失败: {}", e);
                }
            }

            let task_id = self
                .processor
                .submit_grading(request.clone(), self.api_config.clone());
            self.batches.push(GradingBatch {
                request,
                state: BatchState::Submitted(task_id),
                attempt,
            });
            submitted += 1;
        }

        submitted
    }

    fn batch_outcomes(&self, batch: &GradingBatch) -> Vec<StudentOutcome> {
        let students = &batch.request.student_submissions;
        let fail_all = |task_id: Option<TaskId>, message: &str, processing_time: u64| {
            students
                .iter()
                .map(|student| StudentOutcome {
                    student: student.clone(),
                    task_id,
                    result: Err(message.to_string()),
                    processing_time,
                    attempt: batch.attempt,
                })
                .collect::<Vec<_>>()
        };

        let task_id = match &batch.state {
            BatchState::Skipped(message) => return fail_all(None, message.as_str(), 0),
            BatchState::Submitted(id) => *id,
        };
        let Some(task) = self.processor.get_task(task_id) else {
            return fail_all(Some(task_id), "评分任务已被清理", 0);
        };
        let processing_time = task.elapsed().map(|d| d.as_millis() as u64).unwrap_or(0);

        let response = match task.status {
            TaskStatus::Completed => task.result_as::<BatchGradeResponse>(),
            TaskStatus::Failed => None,
            _ => return fail_all(Some(task_id), "评分任务尚未结束", processing_time),
        };
        let response = match response {
            Some(Ok(response)) => response,
            Some(Err(e)) => {
                let message = format!("评分结果格式不正确: {}", e);
                return fail_all(Some(task_id), message.as_str(), processing_time);
            }
            None => {
                let message = task.error.as_deref().unwrap_or("评分失败");
                return fail_all(Some(task_id), message, processing_time);
            }
        };

        students
            .iter()
            .map(|student| {
                let result = match response.results.iter().find(|r| r.student_id == student.id) {
                    Some(r) if r.status == StudentGradeStatus::Completed => Ok(GradedFeedback {
                        feedback: r.feedback_markdown.clone().unwrap_or_default(),
                        score: r.score,
                    }),
                    Some(r) => Err(r.error.clone().unwrap_or_else(|| "评分失败".to_string())),
                    None => Err("后端未返回该学生的结果".to_string()),
                };
                StudentOutcome {
                    student: student.clone(),
                    task_id: Some(task_id),
                    result,
                    processing_time,
                    attempt: batch.attempt,
                }
            })
            .collect()
    }
}
