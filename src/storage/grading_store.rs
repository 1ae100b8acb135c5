//! 历史评分记录与标准答案

use tracing::debug;

use crate::error::AppResult;
use crate::models::{HistoricalResult, HistoryStatus, StandardAnswer};
use crate::storage::local_store::{LocalStore, HISTORY_KEY, STANDARD_ANSWERS_KEY};

/// 历史记录最多保留条数
pub const MAX_HISTORY: usize = 1000;

#[derive(Debug)]
pub struct GradingStore {
    store: LocalStore,
    /// 最新的在前
    history: Vec<HistoricalResult>,
    standard_answers: Vec<StandardAnswer>,
}

impl GradingStore {
    pub async fn load(store: LocalStore) -> AppResult<Self> {
        let history = store.load(HISTORY_KEY).await?;
        let standard_answers = store.load(STANDARD_ANSWERS_KEY).await?;
        Ok(Self {
            store,
            history,
            standard_answers,
        })
    }

    // ========== 历史记录 ==========

    pub fn history(&self) -> &[HistoricalResult] {
        &self.history
    }

    pub fn completed_history(&self) -> impl Iterator<Item = &HistoricalResult> {
        self.history
            .iter()
            .filter(|r| r.status == HistoryStatus::Completed)
    }

    pub fn failed_history(&self) -> impl Iterator<Item = &HistoricalResult> {
        self.history.iter().filter(|r| r.status == HistoryStatus::Failed)
    }

    /// 追加一批记录（插入到最前），超过上限的旧记录被丢弃
    pub async fn save_results(&mut self, results: Vec<HistoricalResult>) -> AppResult<()> {
        if results.is_empty() {
            return Ok(());
        }
        let added = results.len();
        for result in results {
            self.history.insert(0, result);
        }
        self.history.truncate(MAX_HISTORY);
        self.store.save(HISTORY_KEY, &self.history).await?;
        debug!("保存了 {} 条历史记录，共 {} 条", added, self.history.len());
        Ok(())
    }

    pub async fn delete_result(&mut self, id: &str) -> AppResult<bool> {
        let before = self.history.len();
        self.history.retain(|r| r.id != id);
        if self.history.len() == before {
            return Ok(false);
        }
        self.store.save(HISTORY_KEY, &self.history).await?;
        Ok(true)
    }

    // ========== 标准答案 ==========

    pub fn standard_answers(&self) -> &[StandardAnswer] {
        &self.standard_answers
    }

    pub fn standard_answer(&self, id: &str) -> Option<&StandardAnswer> {
        self.standard_answers.iter().find(|a| a.id == id)
    }

    /// 按 ID 覆盖已有的标准答案，否则插入到最前
    pub async fn save_standard_answer(&mut self, answer: StandardAnswer) -> AppResult<()> {
        match self.standard_answers.iter_mut().find(|a| a.id == answer.id) {
            Some(existing) => *existing = answer,
            None => self.standard_answers.insert(0, answer),
        }
        self.store
            .save(STANDARD_ANSWERS_KEY, &self.standard_answers)
            .await
    }
}
