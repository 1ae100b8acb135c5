//! 命令行应用 - 顶层流程
//!
//! ## 职责
//!
//! 把各层组装起来，完成一次"分析标准答案 → 批量评分"的完整流程。
//!
//! ## 核心功能
//!
//! 1. **应用初始化**：创建缓存、后端客户端、任务处理器和本地存储，确定 API 配置
//! 2. **标准答案分析**：加载图片、提交分析任务、合并分批结果并保存
//! 3. **批量评分**：确认标准答案可用后按批提交学生作答，失败的学生重试一次
//! 4. **结果输出**：写出每个学生的评语，导出 CSV / JSON 汇总，追加历史记录，打印统计
//!
//! ## 设计特点
//!
//! - **只做编排**：并发、缓存、重试边界都在处理器内部
//! - **任务失败不中断**：单个评分任务失败只影响该批学生

use anyhow::{Context, Result};
use chrono::Utc;
use std::path::Path;
use std::sync::Arc;
use tokio::fs;
use tracing::{info, warn};

use crate::cache::ResultCache;
use crate::clients::GraderClient;
use crate::config::Config;
use crate::error::ConfigError;
use crate::models::{
    ApiConfig, HistoricalResult, HistoryStatus, MultiAnalyzeRequest, MultiAnalyzeResponse,
    StandardAnswer, TaskStatus,
};
use crate::orchestrator::{GradingRun, StudentOutcome, TaskProcessor};
use crate::services::{
    export_results, load_image_dir, to_submissions, ApiService, ExportRow, InputValidator,
    LoadedImage,
};
use crate::storage::{ConfigStore, GradingStore, LocalStore};
use crate::utils::logging::{log_stage, log_startup, print_final_stats};
use crate::utils::truncate_text;

/// 应用主结构
pub struct App {
    config: Config,
    api_config: ApiConfig,
    processor: TaskProcessor,
    api: ApiService,
    grading_store: GradingStore,
}

impl App {
    /// 初始化应用
    pub async fn initialize(config: Config) -> Result<Self> {
        log_startup(&config);

        let cache = ResultCache::new(config.cache_options());
        let client = GraderClient::new(&config.backend_base_url, config.request_timeout())?;
        let processor = TaskProcessor::new(
            Arc::new(client.clone()),
            cache.clone(),
            config.processor_options(),
        );
        let api = ApiService::new(client, cache);

        let store = LocalStore::new(&config.storage_dir);
        let config_store = ConfigStore::load(store.clone()).await?;
        let grading_store = GradingStore::load(store).await?;

        let api_config = resolve_api_config(&config, &config_store).await?;
        InputValidator::validate_api_config(&api_config)
            .into_result()
            .context("API 配置无效")?;
        info!(
            "🔑 使用模型 {} ({})",
            api_config.model_name,
            api_config.masked_key()
        );

        Ok(Self {
            config,
            api_config,
            processor,
            api,
            grading_store,
        })
    }

    /// 运行应用主逻辑
    pub async fn run(&mut self) -> Result<()> {
        log_stage(1, "检查模型连接");
        let connection = self.api.test_connection(&self.api_config).await;
        if !connection.success {
            warn!(
                "⚠️ 连接测试未通过，继续尝试评分: {}",
                connection.error.unwrap_or_default()
            );
        }

        log_stage(2, "分析标准答案");
        let answer_images = load_image_dir(&self.config.standard_answer_dir).await?;
        if answer_images.is_empty() {
            warn!("⚠️ 没有找到标准答案图片，程序结束");
            return Ok(());
        }
        let answer = self.analyze_standard_answer(&answer_images).await?;

        log_stage(3, "批量评分");
        let mut grading = self.start_grading(&answer_images, &answer)?;
        let student_images = load_image_dir(&self.config.submissions_dir).await?;
        if student_images.is_empty() {
            warn!("⚠️ 没有找到学生作答图片，程序结束");
            return Ok(());
        }
        grading.submit(&to_submissions(&student_images));
        grading.wait().await;

        if self.config.retry_failed_submissions {
            let retried = grading.retry_failed().await;
            if retried > 0 {
                info!("🔁 重试完成，共 {} 名学生", retried);
            }
        }

        log_stage(4, "保存评语");
        let outcomes = grading.outcomes();
        let graded = self.collect_results(&answer, &outcomes).await?;

        print_final_stats(
            &self.processor.stats(),
            graded,
            grading.student_count(),
            &self.config.output_dir,
        );
        Ok(())
    }

    /// 提交分析任务并合并分批结果
    async fn analyze_standard_answer(&mut self, images: &[LoadedImage]) -> Result<StandardAnswer> {
        let request = MultiAnalyzeRequest {
            images: images
                .iter()
                .enumerate()
                .map(|(i, img)| img.to_analyze_image(i as u32))
                .collect(),
        };
        InputValidator::validate_analyze_images(&request.images).into_result()?;

        let task_id = self
            .processor
            .submit_analysis(request, self.api_config.clone());
        let task = self
            .processor
            .wait_for_task(task_id)
            .await
            .context("分析任务丢失")?;

        if task.status == TaskStatus::Failed {
            anyhow::bail!(
                "标准答案分析失败: {}",
                task.error.unwrap_or_default()
            );
        }

        let parts: Vec<MultiAnalyzeResponse> = task
            .result_as()
            .context("分析任务没有结果")?
            .context("分析结果格式不正确")?;
        let merged = MultiAnalyzeResponse::merge(&parts);
        info!("📝 分析摘要: {}", truncate_text(&merged.analyzed_text, 80));

        let now = Utc::now();
        let title = Path::new(&self.config.standard_answer_dir)
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "标准答案".to_string());
        let answer = StandardAnswer {
            id: format!("answer_{}", now.timestamp_millis()),
            title,
            description: String::new(),
            image_names: images.iter().map(|img| img.name.clone()).collect(),
            analysis: merged.analyzed_text,
            rubric: merged.suggested_rubric_json,
            created_at: now,
            updated_at: now,
        };
        self.grading_store.save_standard_answer(answer.clone()).await?;

        Ok(answer)
    }

    /// 确认标准答案可以用于评分，创建本轮评分
    ///
    /// 分析文本或评分细则不合格时每个批次都会被拒绝，直接报错而不是提交后全部失败。
    fn start_grading(
        &self,
        answer_images: &[LoadedImage],
        answer: &StandardAnswer,
    ) -> Result<GradingRun> {
        let standard_answer_images = answer_images
            .iter()
            .enumerate()
            .map(|(i, img)| img.to_standard_answer_image(i as u32))
            .collect();

        GradingRun::new(
            self.processor.clone(),
            self.api_config.clone(),
            standard_answer_images,
            answer.analysis.clone(),
            answer.rubric.clone(),
            self.config.grading_batch_size,
        )
        .map_err(|e| anyhow::anyhow!("标准答案无法用于评分: {}", e.user_message()))
    }

    /// 写出评语、导出汇总并记录历史，返回评分成功的学生数
    async fn collect_results(
        &mut self,
        answer: &StandardAnswer,
        outcomes: &[StudentOutcome],
    ) -> Result<usize> {
        let output_dir = Path::new(&self.config.output_dir);
        fs::create_dir_all(output_dir)
            .await
            .with_context(|| format!("无法创建输出目录: {}", output_dir.display()))?;

        let mut history = Vec::with_capacity(outcomes.len());
        let mut graded = 0;

        for outcome in outcomes {
            let student = &outcome.student;
            let (status, feedback, score, error) = match &outcome.result {
                Ok(result) => {
                    let path = output_dir.join(format!("{}.md", student.id));
                    fs::write(&path, &result.feedback)
                        .await
                        .with_context(|| format!("无法写入评语: {}", path.display()))?;
                    info!("✅ {} 评分完成", student.name);
                    graded += 1;
                    (HistoryStatus::Completed, result.feedback.clone(), result.score, None)
                }
                Err(message) => {
                    warn!("❌ {} 评分失败: {}", student.name, message);
                    (HistoryStatus::Failed, String::new(), None, Some(message.clone()))
                }
            };

            let source = outcome
                .task_id
                .map(|id| id.to_string())
                .unwrap_or_else(|| "skipped".to_string());
            history.push(HistoricalResult {
                id: format!("{}_{}", source, student.id),
                student_id: student.id.clone(),
                student_name: student.name.clone(),
                standard_answer_id: answer.id.clone(),
                standard_answer_title: answer.title.clone(),
                score,
                feedback,
                error,
                status,
                timestamp: Utc::now(),
                processing_time: outcome.processing_time,
            });
        }

        let rows: Vec<ExportRow> = history.iter().map(ExportRow::from).collect();
        let batch_id = format!("batch_{}", Utc::now().timestamp_millis());
        export_results(output_dir, &batch_id, &rows).await?;

        self.grading_store.save_results(history).await?;
        Ok(graded)
    }
}

/// 确定本次使用的 API 配置
///
/// 优先级：已选中的保存配置 → 单独保存的当前配置 → 配置文件 / 环境变量
async fn resolve_api_config(config: &Config, store: &ConfigStore) -> Result<ApiConfig> {
    if let Some(saved) = store.active_config() {
        info!("使用已保存的配置: {}", saved.name);
        return Ok(saved.config.clone());
    }
    if let Some(current) = store.load_current().await? {
        return Ok(current);
    }

    let fallback = config.default_api_config();
    if fallback.api_key.trim().is_empty() {
        return Err(ConfigError::MissingApiConfig.into());
    }
    Ok(fallback)
}
