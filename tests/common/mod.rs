//! 测试用的内存评分后端

#![allow(dead_code)]

use ai_grader::models::{
    AnalyzeImage, ApiConfig, BatchGradeRequest, BatchGradeResponse, BatchGradeSummary,
    ImageAnalysis, MultiAnalyzeRequest, MultiAnalyzeResponse, StandardAnswerImageData,
    StudentGradeResult, StudentGradeStatus, StudentSubmissionData,
};
use ai_grader::{AppError, AppResult, GradingBackend};
use futures::future::BoxFuture;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::Semaphore;

pub const QUOTA_ERROR: &str = "模型额度不足";
pub const GRADING_ERROR: &str = "评分服务暂不可用";
pub const STUDENT_ERROR: &str = "图片无法识别";

/// 按脚本返回结果的后端
///
/// 每次调用先占用一个 `gate` 许可，测试通过 `release` 控制调用何时返回。
pub struct ScriptedBackend {
    gate: Semaphore,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
    fail_analysis_call: Option<usize>,
    fail_rubric: Option<String>,
    fail_first_calls: usize,
    student_error_once: Option<String>,
    student_error_sent: AtomicBool,
}

impl ScriptedBackend {
    fn with_permits(permits: usize) -> Self {
        Self {
            gate: Semaphore::new(permits),
            calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            fail_analysis_call: None,
            fail_rubric: None,
            fail_first_calls: 0,
            student_error_once: None,
            student_error_sent: AtomicBool::new(false),
        }
    }

    /// 调用立即返回
    pub fn open() -> Self {
        Self::with_permits(Semaphore::MAX_PERMITS)
    }

    /// 调用阻塞，直到 `release`
    pub fn gated() -> Self {
        Self::with_permits(0)
    }

    /// 第 `call` 次分析调用（从 1 开始）返回错误
    pub fn failing_analysis_call(mut self, call: usize) -> Self {
        self.fail_analysis_call = Some(call);
        self
    }

    /// 评分细则等于 `rubric` 的评分请求返回错误
    pub fn failing_rubric(mut self, rubric: &str) -> Self {
        self.fail_rubric = Some(rubric.to_string());
        self
    }

    /// 前 `count` 次调用返回错误
    pub fn failing_first_calls(mut self, count: usize) -> Self {
        self.fail_first_calls = count;
        self
    }

    /// 学生 `id` 第一次出现时返回该学生的评分错误，批次本身成功
    pub fn student_error_once(mut self, id: &str) -> Self {
        self.student_error_once = Some(id.to_string());
        self
    }

    pub fn release(&self, permits: usize) {
        self.gate.add_permits(permits);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    /// 等待正在执行的调用数达到 `count`
    pub async fn wait_in_flight(&self, count: usize) {
        for _ in 0..400 {
            if self.in_flight() >= count {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!(
            "in-flight calls never reached {} (now {})",
            count,
            self.in_flight()
        );
    }

    async fn enter(&self) -> usize {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);

        self.gate.acquire().await.unwrap().forget();

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        call
    }
}

impl GradingBackend for ScriptedBackend {
    fn analyze_multi_answer<'a>(
        &'a self,
        images: &'a [AnalyzeImage],
        _config: &'a ApiConfig,
    ) -> BoxFuture<'a, AppResult<MultiAnalyzeResponse>> {
        Box::pin(async move {
            let call = self.enter().await;
            if self.fail_analysis_call == Some(call) {
                return Err(AppError::api_bad_response(
                    "/api/analyze_multi_answer",
                    500,
                    QUOTA_ERROR,
                ));
            }

            Ok(MultiAnalyzeResponse {
                analyzed_text: format!("第 {} 批分析", call),
                suggested_rubric_json: if call == 1 {
                    r#"{"total": 100}"#.to_string()
                } else {
                    String::new()
                },
                image_analyses: images
                    .iter()
                    .map(|img| ImageAnalysis {
                        order: img.order,
                        analysis: img.name.clone(),
                        key_points: vec![],
                    })
                    .collect(),
            })
        })
    }

    fn batch_grade<'a>(
        &'a self,
        request: &'a BatchGradeRequest,
        _config: &'a ApiConfig,
    ) -> BoxFuture<'a, AppResult<BatchGradeResponse>> {
        Box::pin(async move {
            let call = self.enter().await;
            if call <= self.fail_first_calls
                || self.fail_rubric.as_deref() == Some(request.rubric.as_str())
            {
                return Err(AppError::api_bad_response(
                    "/api/batch_grade",
                    502,
                    GRADING_ERROR,
                ));
            }

            let results: Vec<_> = request
                .student_submissions
                .iter()
                .map(|s| {
                    let erroring = self.student_error_once.as_deref() == Some(s.id.as_str())
                        && !self.student_error_sent.swap(true, Ordering::SeqCst);
                    if erroring {
                        return StudentGradeResult {
                            student_id: s.id.clone(),
                            status: StudentGradeStatus::Error,
                            score: None,
                            feedback_markdown: None,
                            error: Some(STUDENT_ERROR.to_string()),
                        };
                    }
                    StudentGradeResult {
                        student_id: s.id.clone(),
                        status: StudentGradeStatus::Completed,
                        score: Some(90.0),
                        feedback_markdown: Some(format!("# {}\n\n得分: 90", s.name)),
                        error: None,
                    }
                })
                .collect();

            let completed = results
                .iter()
                .filter(|r| r.status == StudentGradeStatus::Completed)
                .count();
            Ok(BatchGradeResponse {
                batch_id: format!("batch_{}", call),
                summary: BatchGradeSummary {
                    total: results.len(),
                    completed,
                    errors: results.len() - completed,
                    average_score: Some(90.0),
                },
                results,
            })
        })
    }
}

pub fn api_config() -> ApiConfig {
    ApiConfig::new("https://api.example.com/v1", "sk-test-1234567890", "gpt-4o")
}

fn data_url(tag: &str) -> String {
    format!("data:image/png;base64,{}", tag)
}

/// `count` 张图片的分析请求
pub fn analysis_request(count: usize) -> MultiAnalyzeRequest {
    MultiAnalyzeRequest {
        images: (0..count)
            .map(|i| AnalyzeImage {
                data: data_url(&format!("QUFB{}", i)),
                order: i as u32,
                name: format!("page_{}.png", i + 1),
            })
            .collect(),
    }
}

/// 一名学生的作答
pub fn student(id: &str, name: &str) -> StudentSubmissionData {
    StudentSubmissionData {
        id: id.to_string(),
        name: name.to_string(),
        image_data: data_url(&format!("{}AA==", id)),
    }
}

/// 以 `rubric` 区分的评分请求
pub fn grading_request(rubric: &str) -> BatchGradeRequest {
    BatchGradeRequest {
        standard_answer_images: vec![StandardAnswerImageData {
            data: data_url("U1RE"),
            order: 0,
        }],
        standard_analysis: "标准答案分析".to_string(),
        rubric: rubric.to_string(),
        student_submissions: vec![
            StudentSubmissionData {
                id: "s1".to_string(),
                name: "张三".to_string(),
                image_data: data_url("UzE="),
            },
            StudentSubmissionData {
                id: "s2".to_string(),
                name: "李四".to_string(),
                image_data: data_url("UzI="),
            },
        ],
    }
}
