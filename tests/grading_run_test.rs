mod common;

use ai_grader::models::StandardAnswerImageData;
use ai_grader::orchestrator::GradingRun;
use ai_grader::{AppError, ProcessorOptions, ResultCache, TaskProcessor};
use common::{api_config, student, ScriptedBackend};
use std::sync::Arc;

const RUBRIC: &str = r#"{"total": 100}"#;

fn processor(backend: &Arc<ScriptedBackend>) -> TaskProcessor {
    // 单并发，保证批次按提交顺序调用后端
    TaskProcessor::new(
        backend.clone(),
        ResultCache::default(),
        ProcessorOptions {
            max_concurrent_tasks: 1,
            ..ProcessorOptions::default()
        },
    )
}

fn run(backend: &Arc<ScriptedBackend>, batch_size: usize) -> GradingRun {
    GradingRun::new(
        processor(backend),
        api_config(),
        vec![StandardAnswerImageData {
            data: "data:image/png;base64,U1RE".to_string(),
            order: 0,
        }],
        "标准答案分析".to_string(),
        RUBRIC.to_string(),
        batch_size,
    )
    .unwrap()
}

#[tokio::test]
async fn test_oversized_analysis_rejected_before_submit() {
    let backend = Arc::new(ScriptedBackend::open());
    let merged = format!("{}\n\n{}", "析".repeat(2600), "析".repeat(2600));

    let Err(err) = GradingRun::new(
        processor(&backend),
        api_config(),
        vec![],
        merged,
        String::new(),
        10,
    ) else {
        panic!("standard answer should be rejected");
    };

    assert!(matches!(err, AppError::Validation(ref errors) if errors.len() == 2));
    assert!(err.user_message().contains("标准答案分析过长"));
    assert_eq!(backend.calls(), 0);
}

#[tokio::test]
async fn test_skipped_batch_students_are_failed() {
    let backend = Arc::new(ScriptedBackend::open());
    let mut run = run(&backend, 2);

    let long_name = "王".repeat(101);
    let submitted = run.submit(&[
        student("s1", "张三"),
        student("s2", &long_name),
        student("s3", "李四"),
    ]);
    assert_eq!(submitted, 1);
    run.wait().await;

    let outcomes = run.outcomes();
    assert_eq!(run.student_count(), 3);
    assert_eq!(outcomes.len(), 3);

    for outcome in &outcomes[..2] {
        assert!(outcome.task_id.is_none());
        let message = outcome.result.as_ref().unwrap_err();
        assert!(message.contains("学生姓名过长"), "{}", message);
    }
    let graded = outcomes[2].result.as_ref().unwrap();
    assert_eq!(graded.score, Some(90.0));
    assert!(graded.feedback.contains("李四"));
    assert_eq!(backend.calls(), 1);

    // 校验失败的批次不重试
    assert_eq!(run.retry_failed().await, 0);
    assert_eq!(backend.calls(), 1);
}

#[tokio::test]
async fn test_failed_batch_retried_once() {
    let backend = Arc::new(ScriptedBackend::open().failing_first_calls(1));
    let mut run = run(&backend, 2);

    let students = [
        student("s1", "张三"),
        student("s2", "李四"),
        student("s3", "王五"),
        student("s4", "赵六"),
    ];
    assert_eq!(run.submit(&students), 2);
    run.wait().await;

    let outcomes = run.outcomes();
    let failed: Vec<_> = outcomes
        .iter()
        .filter(|o| !o.is_graded())
        .map(|o| o.student.id.as_str())
        .collect();
    assert_eq!(failed, vec!["s1", "s2"]);
    assert_eq!(
        outcomes[0].result.as_ref().unwrap_err(),
        common::GRADING_ERROR
    );

    assert_eq!(run.retry_failed().await, 2);
    assert_eq!(backend.calls(), 3);

    let outcomes = run.outcomes();
    assert!(outcomes.iter().all(|o| o.is_graded()));
    let attempts: Vec<_> = outcomes.iter().map(|o| o.attempt).collect();
    assert_eq!(attempts, vec![2, 2, 1, 1]);

    // 只重试一次
    assert_eq!(run.retry_failed().await, 0);
    assert_eq!(backend.calls(), 3);
}

#[tokio::test]
async fn test_retry_still_failing_keeps_latest_error() {
    let backend = Arc::new(ScriptedBackend::open().failing_rubric(RUBRIC));
    let mut run = run(&backend, 5);

    run.submit(&[student("s1", "张三"), student("s2", "李四")]);
    run.wait().await;
    assert_eq!(run.retry_failed().await, 2);

    // 失败结果不进缓存，重试一定会调用后端
    assert_eq!(backend.calls(), 2);
    let outcomes = run.outcomes();
    assert_eq!(outcomes.len(), 2);
    for outcome in outcomes {
        assert_eq!(outcome.attempt, 2);
        assert_eq!(outcome.result.unwrap_err(), common::GRADING_ERROR);
    }
}

#[tokio::test]
async fn test_retry_bypasses_cached_student_error() {
    let backend = Arc::new(ScriptedBackend::open().student_error_once("s1"));
    let mut run = run(&backend, 1);

    run.submit(&[student("s1", "张三"), student("s2", "李四")]);
    run.wait().await;

    let outcomes = run.outcomes();
    assert_eq!(
        outcomes[0].result.as_ref().unwrap_err(),
        common::STUDENT_ERROR
    );
    assert!(outcomes[1].is_graded());

    // 批次本身成功并已缓存，重试同样的请求仍要重新调用后端
    assert_eq!(run.retry_failed().await, 1);
    assert_eq!(backend.calls(), 3);

    let outcomes = run.outcomes();
    assert!(outcomes[0].is_graded());
    assert_eq!(outcomes[0].attempt, 2);
}
