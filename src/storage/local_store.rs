//! 键值 JSON 文件存储
//!
//! 每个键对应 `<dir>/<key>.json`。读取时文件不存在返回默认值；
//! 内容损坏时记录警告、删除文件并返回默认值。

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, warn};

use crate::error::{AppError, AppResult, StorageError};

/// 已保存的 API 配置列表
pub const CONFIGS_KEY: &str = "ai-grader-configs";
/// 选中的配置 ID
pub const ACTIVE_CONFIG_KEY: &str = "ai-grader-active-config";
/// 单独保存的当前 API 配置
pub const CURRENT_CONFIG_KEY: &str = "ai-grader-api-config";
/// 历史评分记录
pub const HISTORY_KEY: &str = "grading_historical_results";
/// 已保存的标准答案
pub const STANDARD_ANSWERS_KEY: &str = "grading_standard_answers";

#[derive(Debug, Clone)]
pub struct LocalStore {
    dir: PathBuf,
}

impl LocalStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.json", key))
    }

    /// 读取键对应的数据
    pub async fn load<T>(&self, key: &str) -> AppResult<T>
    where
        T: DeserializeOwned + Default,
    {
        let path = self.path_for(key);
        let content = match fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(T::default()),
            Err(e) => return Err(AppError::storage_io(path.display().to_string(), e)),
        };

        match serde_json::from_str(&content) {
            Ok(value) => Ok(value),
            Err(e) => {
                warn!("⚠️ 存储数据已损坏，已丢弃 ({}): {}", key, e);
                self.remove(key).await?;
                Ok(T::default())
            }
        }
    }

    /// 写入数据（先写临时文件再重命名）
    pub async fn save<T>(&self, key: &str, value: &T) -> AppResult<()>
    where
        T: Serialize + ?Sized,
    {
        let content = serde_json::to_string_pretty(value).map_err(|source| StorageError::Encode {
            key: key.to_string(),
            source,
        })?;

        fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| AppError::storage_io(self.dir.display().to_string(), e))?;

        let path = self.path_for(key);
        let tmp = self.dir.join(format!("{}.json.tmp", key));
        fs::write(&tmp, content)
            .await
            .map_err(|e| AppError::storage_io(tmp.display().to_string(), e))?;
        fs::rename(&tmp, &path)
            .await
            .map_err(|e| AppError::storage_io(path.display().to_string(), e))?;

        debug!("已保存 {}", path.display());
        Ok(())
    }

    pub async fn remove(&self, key: &str) -> AppResult<()> {
        let path = self.path_for(key);
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(AppError::storage_io(path.display().to_string(), e)),
        }
    }
}
