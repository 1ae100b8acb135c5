//! 异步任务处理器 - 编排层
//!
//! ## 职责
//!
//! 接收"分析"和"评分"任务，按提交顺序排队，最多同时执行 N 个，
//! 并向调用方暴露每个任务的生命周期（排队 → 执行中 → 完成 / 失败）。
//!
//! ## 核心功能
//!
//! 1. **并发控制**：执行中的任务数永远不超过 `max_concurrent_tasks`
//! 2. **FIFO 调度**：任务按提交顺序开始，完成顺序不保证
//! 3. **结果缓存**：执行前先查缓存，命中则不发网络请求；
//!    相同请求正在执行时，后来者等待前者的结果
//! 4. **分批分析**：图片较多时按固定大小分批顺序调用，任一批失败则整个任务失败
//! 5. **错误隔离**：任务执行中的错误只记录在任务上，不影响其他任务
//!
//! ## 设计特点
//!
//! - 状态（任务表、队列、计数）由一把互斥锁保护，锁从不跨越 await
//! - 每次提交和每次任务结束都会尝试出队
//! - 处理器是可克隆的句柄，`submit` 必须在 tokio 运行时内调用

use chrono::Utc;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::cache::{ResultCache, ANALYSIS_TTL, GRADING_TTL};
use crate::clients::GradingBackend;
use crate::error::{AppError, AppResult, CacheError};
use crate::models::{
    AnalyzeImage, ApiConfig, BatchGradeRequest, MultiAnalyzeRequest, Task, TaskId, TaskKind,
    TaskPayload, TaskRequest, TaskStats, TaskStatus,
};

/// 取消任务时记录的错误信息
pub const CANCELLED_MESSAGE: &str = "任务已被用户取消";

/// 处理器参数
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessorOptions {
    /// 同时执行的任务上限
    pub max_concurrent_tasks: usize,
    /// 每次分析请求的图片数
    pub analysis_chunk_size: usize,
    pub analysis_ttl: Duration,
    pub grading_ttl: Duration,
}

impl Default for ProcessorOptions {
    fn default() -> Self {
        Self {
            max_concurrent_tasks: 3,
            analysis_chunk_size: 5,
            analysis_ttl: ANALYSIS_TTL,
            grading_ttl: GRADING_TTL,
        }
    }
}

impl ProcessorOptions {
    fn ttl_for(&self, kind: TaskKind) -> Duration {
        match kind {
            TaskKind::Analysis => self.analysis_ttl,
            TaskKind::Grading => self.grading_ttl,
        }
    }
}

#[derive(Default)]
struct ProcessorState {
    tasks: BTreeMap<TaskId, Task>,
    queue: VecDeque<TaskId>,
    active: usize,
    next_seq: u64,
    /// 正在向后端请求的缓存键；发送端被丢弃时唤醒等待者
    in_flight: HashMap<String, watch::Sender<()>>,
}

struct Inner {
    state: Mutex<ProcessorState>,
    backend: Arc<dyn GradingBackend>,
    cache: ResultCache,
    options: ProcessorOptions,
    /// 每次任务状态变化时递增
    changes: watch::Sender<u64>,
}

/// 异步任务处理器
#[derive(Clone)]
pub struct TaskProcessor {
    inner: Arc<Inner>,
}

impl TaskProcessor {
    /// 创建处理器
    ///
    /// # 参数
    /// - `backend`: 评分后端
    /// - `cache`: 结果缓存（可与其他调用方共享）
    /// - `options`: 并发与分批参数
    pub fn new(
        backend: Arc<dyn GradingBackend>,
        cache: ResultCache,
        options: ProcessorOptions,
    ) -> Self {
        let options = ProcessorOptions {
            max_concurrent_tasks: options.max_concurrent_tasks.max(1),
            analysis_chunk_size: options.analysis_chunk_size.max(1),
            ..options
        };
        let (changes, _) = watch::channel(0);

        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(ProcessorState::default()),
                backend,
                cache,
                options,
                changes,
            }),
        }
    }

    pub fn options(&self) -> ProcessorOptions {
        self.inner.options
    }

    pub fn cache(&self) -> &ResultCache {
        &self.inner.cache
    }

    fn lock(&self) -> MutexGuard<'_, ProcessorState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn notify_change(&self) {
        self.inner.changes.send_modify(|version| *version += 1);
    }

    // ========== 提交 ==========

    /// 提交任务，立即返回任务 ID
    pub fn submit(&self, payload: TaskPayload) -> TaskId {
        let kind = payload.kind();
        let id = {
            let mut state = self.lock();
            state.next_seq += 1;
            let id = TaskId::new(state.next_seq);
            state.tasks.insert(id, Task::new(id, payload));
            state.queue.push_back(id);
            id
        };

        info!("📥 [任务 {}] 已提交{}任务", id, kind);
        self.notify_change();
        self.drain_queue();
        id
    }

    /// 提交标准答案分析任务
    pub fn submit_analysis(&self, request: MultiAnalyzeRequest, api_config: ApiConfig) -> TaskId {
        self.submit(TaskPayload::analysis(request, api_config))
    }

    /// 提交批量评分任务
    pub fn submit_grading(&self, request: BatchGradeRequest, api_config: ApiConfig) -> TaskId {
        self.submit(TaskPayload::grading(request, api_config))
    }

    // ========== 调度 ==========

    /// 在并发上限内依次启动排队中的任务
    fn drain_queue(&self) {
        let limit = self.inner.options.max_concurrent_tasks;

        let launches = {
            let mut guard = self.lock();
            let ProcessorState {
                tasks,
                queue,
                active,
                ..
            } = &mut *guard;

            let mut launches = Vec::new();
            while *active < limit {
                let Some(id) = queue.pop_front() else {
                    break;
                };
                let Some(task) = tasks.get_mut(&id) else {
                    continue;
                };
                if task.status != TaskStatus::Pending {
                    continue;
                }

                task.status = TaskStatus::Processing;
                task.started_at = Some(Utc::now());
                *active += 1;
                launches.push((id, task.payload.clone()));
            }
            launches
        };

        if launches.is_empty() {
            return;
        }
        self.notify_change();

        for (id, payload) in launches {
            debug!("▶️ [任务 {}] 开始执行", id);
            let processor = self.clone();
            tokio::spawn(async move {
                processor.execute(id, payload).await;
            });
        }
    }

    /// 执行单个任务并记录结果，所有错误都在这里收口
    async fn execute(&self, id: TaskId, payload: TaskPayload) {
        let kind = payload.kind();

        let outcome = match self.run(id, &payload).await {
            Ok(result) => {
                info!("✅ [任务 {}] {}完成", id, kind);
                Ok(result)
            }
            Err(e) => {
                let message = e.user_message();
                error!("❌ [任务 {}] {}失败: {}", id, kind, message);
                Err(message)
            }
        };

        self.finish(id, outcome);
        self.drain_queue();
    }

    async fn run(&self, id: TaskId, payload: &TaskPayload) -> AppResult<Value> {
        let kind = payload.kind();
        let key = fingerprint(&payload.request)?;

        let _flight = loop {
            if let Some(cached) = self.inner.cache.get(&key) {
                info!("⚡ [任务 {}] 命中缓存，跳过后端请求", id);
                return Ok(cached);
            }

            match self.join_or_lead(&key) {
                Ok(guard) => break guard,
                Err(mut waiter) => {
                    debug!("[任务 {}] 相同请求正在执行，等待其结果", id);
                    // 发送端被丢弃时返回 Err，两种情况都重新检查缓存
                    let _ = waiter.changed().await;
                }
            }
        };

        let result = match &payload.request {
            TaskRequest::Analysis(request) => {
                self.run_analysis(id, &request.images, &payload.api_config)
                    .await?
            }
            TaskRequest::Grading(request) => {
                let response = self
                    .inner
                    .backend
                    .batch_grade(request, &payload.api_config)
                    .await?;
                to_json(&response)?
            }
        };

        self.inner
            .cache
            .set(key, result.clone(), Some(self.inner.options.ttl_for(kind)));
        Ok(result)
    }

    /// 分批调用分析接口，任一批失败则放弃已完成的批次
    async fn run_analysis(
        &self,
        id: TaskId,
        images: &[AnalyzeImage],
        config: &ApiConfig,
    ) -> AppResult<Value> {
        let chunks: Vec<&[AnalyzeImage]> =
            images.chunks(self.inner.options.analysis_chunk_size).collect();
        let total = chunks.len();
        let mut parts = Vec::with_capacity(total);

        for (index, chunk) in chunks.into_iter().enumerate() {
            debug!(
                "[任务 {}] 分析第 {}/{} 批，图片 {} 张",
                id,
                index + 1,
                total,
                chunk.len()
            );

            match self.inner.backend.analyze_multi_answer(chunk, config).await {
                Ok(part) => parts.push(part),
                Err(e) => {
                    warn!(
                        "[任务 {}] 第 {}/{} 批分析失败，丢弃已完成的 {} 批结果",
                        id,
                        index + 1,
                        total,
                        parts.len()
                    );
                    return Err(e);
                }
            }

            self.advance_progress(id, chunk_progress(index + 1, total));
        }

        to_json(&parts)
    }

    /// 成为该缓存键的执行者，或拿到等待执行者结束的接收端
    fn join_or_lead(&self, key: &str) -> Result<InFlightGuard, watch::Receiver<()>> {
        let mut state = self.lock();
        if let Some(sender) = state.in_flight.get(key) {
            return Err(sender.subscribe());
        }
        let (sender, _) = watch::channel(());
        state.in_flight.insert(key.to_string(), sender);
        Ok(InFlightGuard {
            processor: self.clone(),
            key: key.to_string(),
        })
    }

    fn advance_progress(&self, id: TaskId, progress: u8) {
        {
            let mut state = self.lock();
            if let Some(task) = state.tasks.get_mut(&id) {
                task.progress = task.progress.max(progress);
            }
        }
        self.notify_change();
    }

    /// 终态转换：只写一次结果或错误，并释放并发名额
    fn finish(&self, id: TaskId, outcome: Result<Value, String>) {
        {
            let mut state = self.lock();
            if let Some(task) = state.tasks.get_mut(&id) {
                match outcome {
                    Ok(result) => {
                        task.status = TaskStatus::Completed;
                        task.progress = 100;
                        task.result = Some(result);
                    }
                    Err(message) => {
                        task.status = TaskStatus::Failed;
                        task.error = Some(message);
                    }
                }
                task.completed_at = Some(Utc::now());
            }
            state.active = state.active.saturating_sub(1);
        }
        self.notify_change();
    }

    // ========== 查询 ==========

    pub fn get_task(&self, id: TaskId) -> Option<Task> {
        self.lock().tasks.get(&id).cloned()
    }

    /// 所有任务，按提交顺序
    pub fn get_all_tasks(&self) -> Vec<Task> {
        self.lock().tasks.values().cloned().collect()
    }

    /// 排队中或执行中的任务
    pub fn get_active_tasks(&self) -> Vec<Task> {
        self.filter_tasks(|status| status.is_active())
    }

    pub fn get_completed_tasks(&self) -> Vec<Task> {
        self.filter_tasks(|status| status == TaskStatus::Completed)
    }

    pub fn get_failed_tasks(&self) -> Vec<Task> {
        self.filter_tasks(|status| status == TaskStatus::Failed)
    }

    fn filter_tasks(&self, keep: impl Fn(TaskStatus) -> bool) -> Vec<Task> {
        self.lock()
            .tasks
            .values()
            .filter(|task| keep(task.status))
            .cloned()
            .collect()
    }

    /// 当前执行中的任务数
    pub fn active_count(&self) -> usize {
        self.lock().active
    }

    pub fn stats(&self) -> TaskStats {
        let state = self.lock();
        let mut stats = TaskStats {
            total: state.tasks.len(),
            queue_size: state.queue.len(),
            ..TaskStats::default()
        };
        for task in state.tasks.values() {
            match task.status {
                TaskStatus::Pending => stats.pending += 1,
                TaskStatus::Processing => stats.processing += 1,
                TaskStatus::Completed => stats.completed += 1,
                TaskStatus::Failed => stats.failed += 1,
            }
        }
        stats
    }

    // ========== 管理 ==========

    /// 取消尚未开始的任务
    ///
    /// 只有排队中的任务可以取消；已开始、已结束或不存在的任务返回 `false`。
    pub fn cancel_task(&self, id: TaskId) -> bool {
        let cancelled = {
            let mut guard = self.lock();
            let ProcessorState { tasks, queue, .. } = &mut *guard;

            match tasks.get_mut(&id) {
                Some(task) if task.status == TaskStatus::Pending => {
                    task.status = TaskStatus::Failed;
                    task.error = Some(CANCELLED_MESSAGE.to_string());
                    task.completed_at = Some(Utc::now());
                    queue.retain(|queued| *queued != id);
                    true
                }
                _ => false,
            }
        };

        if cancelled {
            info!("🚫 [任务 {}] 已取消", id);
            self.notify_change();
        }
        cancelled
    }

    /// 删除所有已完成的任务（失败的任务保留），返回删除数量
    pub fn clear_completed_tasks(&self) -> usize {
        let removed = {
            let mut state = self.lock();
            let before = state.tasks.len();
            state
                .tasks
                .retain(|_, task| task.status != TaskStatus::Completed);
            before - state.tasks.len()
        };

        if removed > 0 {
            debug!("清理了 {} 个已完成任务", removed);
            self.notify_change();
        }
        removed
    }

    // ========== 等待 ==========

    /// 等待任务进入终态；任务不存在时返回 `None`
    pub async fn wait_for_task(&self, id: TaskId) -> Option<Task> {
        let mut changes = self.inner.changes.subscribe();
        loop {
            match self.get_task(id) {
                Some(task) if task.status.is_terminal() => return Some(task),
                Some(_) => {}
                None => return None,
            }
            if changes.changed().await.is_err() {
                return self.get_task(id);
            }
        }
    }

    /// 等待所有任务结束
    pub async fn wait_idle(&self) {
        let mut changes = self.inner.changes.subscribe();
        loop {
            let busy = {
                let state = self.lock();
                state.active > 0 || !state.queue.is_empty()
            };
            if !busy {
                return;
            }
            if changes.changed().await.is_err() {
                return;
            }
        }
    }
}

/// 执行者离开时移除在途记录，唤醒等待同一请求的任务
struct InFlightGuard {
    processor: TaskProcessor,
    key: String,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.processor.lock().in_flight.remove(&self.key);
    }
}

/// 任务请求的缓存指纹
fn fingerprint(request: &TaskRequest) -> Result<String, CacheError> {
    let prefix = request.kind().cache_prefix();
    match request {
        TaskRequest::Analysis(request) => ResultCache::generate_key(prefix, request),
        TaskRequest::Grading(request) => ResultCache::generate_key(prefix, request),
    }
}

fn to_json<T: serde::Serialize>(value: &T) -> AppResult<Value> {
    serde_json::to_value(value).map_err(|e| AppError::other(format!("结果序列化失败: {}", e)))
}

/// 分批进度，最后一批之前不会达到 100
fn chunk_progress(done: usize, total: usize) -> u8 {
    if total == 0 {
        return 0;
    }
    ((done * 100 / total).min(99)) as u8
}
