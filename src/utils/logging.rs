/// 日志工具模块
///
/// 提供日志初始化和格式化输出的辅助函数
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::config::Config;
use crate::models::TaskStats;

/// 初始化日志输出
///
/// 优先使用 `RUST_LOG`，未设置时默认 `info`（`verbose` 时为 `debug`）。
/// 重复调用不会报错。
///
/// # 参数
/// - `verbose`: 是否输出调试日志
pub fn init(verbose: bool) {
    let fallback = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}

/// 记录程序启动信息
///
/// # 参数
/// - `config`: 程序配置
pub fn log_startup(config: &Config) {
    info!("{}", "=".repeat(60));
    info!("🚀 程序启动 - 批量评分模式");
    info!("📊 最大并发任务数: {}", config.max_concurrent_tasks);
    info!("🌐 评分后端: {}", config.backend_base_url);
    info!(
        "🗂️ 缓存容量: {} 条，分析结果保留 {} 分钟",
        config.cache_capacity,
        config.analysis_cache_ttl_secs / 60
    );
    info!("{}", "=".repeat(60));
}

/// 记录阶段开始
///
/// # 参数
/// - `step`: 阶段编号
/// - `title`: 阶段名称
pub fn log_stage(step: usize, title: &str) {
    info!("\n{}", "─".repeat(60));
    info!("📦 第 {} 步: {}", step, title);
    info!("{}", "─".repeat(60));
}

/// 打印最终统计信息
///
/// # 参数
/// - `stats`: 任务统计
/// - `graded`: 评分成功的学生数
/// - `students`: 学生总数
/// - `output_dir`: 评语输出目录
pub fn print_final_stats(stats: &TaskStats, graded: usize, students: usize, output_dir: &str) {
    info!("\n{}", "=".repeat(60));
    info!("📊 全部处理完成统计");
    info!(
        "完成时间: {}",
        chrono::Local::now().format("%Y-%m-%d %H:%M:%S")
    );
    info!("{}", "=".repeat(60));
    info!("🧾 任务: 共 {} 个，完成 {}，失败 {}", stats.total, stats.completed, stats.failed);
    info!("✅ 学生评分成功: {}/{}", graded, students);
    info!("❌ 失败: {}", students.saturating_sub(graded));
    info!("{}", "=".repeat(60));
    info!("\n评语已保存至: {}", output_dir);
}

/// 截断长文本用于日志显示
///
/// # 参数
/// - `text`: 原始文本
/// - `max_len`: 最大长度
///
/// # 返回
/// 返回截断后的文本
pub fn truncate_text(text: &str, max_len: usize) -> String {
    if text.chars().count() > max_len {
        text.chars().take(max_len).collect::<String>() + "..."
    } else {
        text.to_string()
    }
}
