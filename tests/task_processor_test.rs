mod common;

use ai_grader::models::{BatchGradeResponse, MultiAnalyzeResponse, TaskStats, TaskStatus};
use ai_grader::orchestrator::CANCELLED_MESSAGE;
use ai_grader::{ProcessorOptions, ResultCache, TaskProcessor};
use common::{analysis_request, api_config, grading_request, ScriptedBackend};
use std::sync::Arc;
use std::time::Duration;
use tokio_test::{assert_err, assert_ok};

fn processor_with(backend: &Arc<ScriptedBackend>, options: ProcessorOptions) -> TaskProcessor {
    TaskProcessor::new(backend.clone(), ResultCache::default(), options)
}

fn processor(backend: &Arc<ScriptedBackend>) -> TaskProcessor {
    processor_with(backend, ProcessorOptions::default())
}

#[tokio::test]
async fn test_five_tasks_with_three_slots() {
    let backend = Arc::new(ScriptedBackend::gated());
    let processor = processor(&backend);

    let ids: Vec<_> = (0..5)
        .map(|i| processor.submit_grading(grading_request(&format!("细则 {}", i)), api_config()))
        .collect();

    assert_eq!(
        processor.stats(),
        TaskStats {
            total: 5,
            pending: 2,
            processing: 3,
            completed: 0,
            failed: 0,
            queue_size: 2,
        }
    );
    // 按提交顺序开始
    for id in &ids[..3] {
        assert_eq!(processor.get_task(*id).unwrap().status, TaskStatus::Processing);
    }
    for id in &ids[3..] {
        assert_eq!(processor.get_task(*id).unwrap().status, TaskStatus::Pending);
    }

    backend.release(5);
    processor.wait_idle().await;

    assert_eq!(
        processor.stats(),
        TaskStats {
            total: 5,
            pending: 0,
            processing: 0,
            completed: 5,
            failed: 0,
            queue_size: 0,
        }
    );
    assert_eq!(backend.calls(), 5);
    assert!(backend.peak() <= 3);

    let all = processor.get_all_tasks();
    let order: Vec<_> = all.iter().map(|t| t.id).collect();
    assert_eq!(order, ids);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrency_never_exceeds_limit() {
    let backend = Arc::new(ScriptedBackend::gated());
    let processor = processor(&backend);

    for i in 0..8 {
        processor.submit_grading(grading_request(&format!("批次 {}", i)), api_config());
    }

    backend.wait_in_flight(3).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(backend.in_flight(), 3);
    assert_eq!(processor.active_count(), 3);
    assert_eq!(processor.stats().pending, 5);

    // 逐个放行，每一步都不能超过上限
    for _ in 0..8 {
        backend.release(1);
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(processor.active_count() <= 3);
        assert!(backend.in_flight() <= 3);
    }

    processor.wait_idle().await;
    assert_eq!(backend.peak(), 3);
    assert_eq!(backend.calls(), 8);
    assert_eq!(processor.stats().completed, 8);
}

#[tokio::test]
async fn test_identical_tasks_share_one_call() {
    let backend = Arc::new(ScriptedBackend::gated());
    let processor = processor(&backend);

    let first = processor.submit_grading(grading_request("同一份细则"), api_config());
    let second = processor.submit_grading(grading_request("同一份细则"), api_config());

    backend.release(1);
    let first = processor.wait_for_task(first).await.unwrap();
    let second = processor.wait_for_task(second).await.unwrap();

    assert_eq!(first.status, TaskStatus::Completed);
    assert_eq!(second.status, TaskStatus::Completed);
    assert_eq!(first.result, second.result);
    assert_eq!(backend.calls(), 1);

    // 完成后再提交，直接命中缓存
    let third = processor.submit_grading(grading_request("同一份细则"), api_config());
    let third = processor.wait_for_task(third).await.unwrap();
    assert_eq!(third.status, TaskStatus::Completed);
    assert_eq!(third.progress, 100);
    assert_eq!(third.result, first.result);
    assert_eq!(backend.calls(), 1);
}

#[tokio::test]
async fn test_prefilled_cache_short_circuits() {
    let backend = Arc::new(ScriptedBackend::open());
    let cache = ResultCache::default();
    let request = grading_request("预先缓存");
    let cached = serde_json::json!({
        "batchId": "cached",
        "results": [],
        "summary": {"total": 0, "completed": 0, "errors": 0}
    });
    assert_ok!(cache.cache_grading_result(&request, cached.clone()));

    let processor = TaskProcessor::new(backend.clone(), cache, ProcessorOptions::default());
    let id = processor.submit_grading(request, api_config());
    let task = processor.wait_for_task(id).await.unwrap();

    assert_eq!(task.status, TaskStatus::Completed);
    assert_eq!(task.result, Some(cached));
    assert_eq!(backend.calls(), 0);
}

#[tokio::test]
async fn test_cancel_only_pending_tasks() {
    let backend = Arc::new(ScriptedBackend::gated());
    let processor = processor_with(
        &backend,
        ProcessorOptions {
            max_concurrent_tasks: 1,
            ..ProcessorOptions::default()
        },
    );

    let running = processor.submit_grading(grading_request("A"), api_config());
    let queued = processor.submit_grading(grading_request("B"), api_config());

    assert!(!processor.cancel_task(running));
    assert!(processor.cancel_task(queued));
    assert!(!processor.cancel_task(queued));

    let cancelled = processor.get_task(queued).unwrap();
    assert_eq!(cancelled.status, TaskStatus::Failed);
    assert_eq!(cancelled.error.as_deref(), Some(CANCELLED_MESSAGE));
    assert!(cancelled.result.is_none());
    assert!(cancelled.started_at.is_none());
    assert!(cancelled.completed_at.is_some());
    assert_eq!(processor.stats().queue_size, 0);

    backend.release(1);
    processor.wait_idle().await;

    assert_eq!(processor.get_task(running).unwrap().status, TaskStatus::Completed);
    assert!(!processor.cancel_task(running));
    assert_eq!(backend.calls(), 1);

    // 失败的任务保留，完成的任务被清理
    assert_eq!(processor.clear_completed_tasks(), 1);
    assert!(processor.get_task(running).is_none());
    assert!(!processor.cancel_task(running));
    assert!(processor.wait_for_task(running).await.is_none());
    assert_eq!(processor.get_failed_tasks().len(), 1);
    assert_eq!(processor.stats().total, 1);
}

#[tokio::test]
async fn test_failures_are_isolated_and_recorded() {
    let backend = Arc::new(ScriptedBackend::open().failing_rubric("坏批次"));
    let processor = processor(&backend);

    for rubric in ["好 1", "坏批次", "好 2", "好 3"] {
        processor.submit_grading(grading_request(rubric), api_config());
    }
    // 与失败任务相同的请求，不会命中缓存
    processor.submit_grading(grading_request("坏批次"), api_config());
    processor.wait_idle().await;

    let stats = processor.stats();
    assert_eq!(stats.completed, 3);
    assert_eq!(stats.failed, 2);
    assert_eq!(backend.calls(), 5);

    for task in processor.get_all_tasks() {
        assert!(task.status.is_terminal());
        // 结果和错误只有一个
        assert_ne!(task.result.is_some(), task.error.is_some());

        let created = task.created_at;
        let started = task.started_at.unwrap();
        let completed = task.completed_at.unwrap();
        assert!(created <= started);
        assert!(started <= completed);

        match task.status {
            TaskStatus::Completed => {
                let response = assert_ok!(task.result_as::<BatchGradeResponse>().unwrap());
                assert_eq!(response.results.len(), 2);
            }
            _ => assert_eq!(task.error.as_deref(), Some(common::GRADING_ERROR)),
        }
    }
    assert!(processor.get_active_tasks().is_empty());
    assert_eq!(processor.get_completed_tasks().len(), 3);
}

#[tokio::test]
async fn test_analysis_split_into_chunks() {
    let backend = Arc::new(ScriptedBackend::open());
    let processor = processor(&backend);

    let id = processor.submit_analysis(analysis_request(12), api_config());
    let task = processor.wait_for_task(id).await.unwrap();

    assert_eq!(task.status, TaskStatus::Completed);
    assert_eq!(task.progress, 100);
    assert_eq!(backend.calls(), 3);

    let parts = assert_ok!(task.result_as::<Vec<MultiAnalyzeResponse>>().unwrap());
    let sizes: Vec<_> = parts.iter().map(|p| p.image_analyses.len()).collect();
    assert_eq!(sizes, vec![5, 5, 2]);

    // 分析结果是分批响应的数组
    assert_err!(task.result_as::<BatchGradeResponse>().unwrap());

    let merged = MultiAnalyzeResponse::merge(&parts);
    assert_eq!(merged.image_analyses.len(), 12);
    assert_eq!(merged.suggested_rubric_json, r#"{"total": 100}"#);
    assert!(merged.analyzed_text.starts_with("第 1 批分析"));
}

#[tokio::test]
async fn test_analysis_chunk_failure_aborts_task() {
    let backend = Arc::new(ScriptedBackend::open().failing_analysis_call(2));
    let processor = processor(&backend);

    let id = processor.submit_analysis(analysis_request(12), api_config());
    let task = processor.wait_for_task(id).await.unwrap();

    assert_eq!(task.status, TaskStatus::Failed);
    assert_eq!(task.error.as_deref(), Some(common::QUOTA_ERROR));
    assert!(task.result.is_none());
    assert!(task.progress < 100);
    // 第三批没有发出
    assert_eq!(backend.calls(), 2);
    assert!(processor.cache().is_empty());
}

#[tokio::test]
async fn test_waiter_retries_after_leader_fails() {
    let backend = Arc::new(ScriptedBackend::gated().failing_rubric("坏批次"));
    let processor = processor(&backend);

    let first = processor.submit_grading(grading_request("坏批次"), api_config());
    let second = processor.submit_grading(grading_request("坏批次"), api_config());

    // 第二个任务在等待第一个的调用，没有自己发出请求
    backend.wait_in_flight(1).await;
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(backend.calls(), 1);
    assert_eq!(processor.get_task(second).unwrap().status, TaskStatus::Processing);

    // 失败不进缓存，等待者接手重新调用
    backend.release(2);
    let first = processor.wait_for_task(first).await.unwrap();
    let second = processor.wait_for_task(second).await.unwrap();

    assert_eq!(first.status, TaskStatus::Failed);
    assert_eq!(second.status, TaskStatus::Failed);
    assert_eq!(second.error.as_deref(), Some(common::GRADING_ERROR));
    assert_eq!(backend.calls(), 2);
    assert!(processor.cache().is_empty());
}
