//! 已保存的 API 配置管理

use chrono::Utc;
use tracing::info;

use crate::error::AppResult;
use crate::models::{ApiConfig, SavedApiConfig};
use crate::storage::local_store::{
    LocalStore, ACTIVE_CONFIG_KEY, CONFIGS_KEY, CURRENT_CONFIG_KEY,
};

/// 命名配置列表，每次修改立即落盘
///
/// 配置列表和选中的 ID 分别保存在两个键下。
#[derive(Debug)]
pub struct ConfigStore {
    store: LocalStore,
    configs: Vec<SavedApiConfig>,
    active_id: Option<String>,
}

impl ConfigStore {
    /// 从存储中加载
    pub async fn load(store: LocalStore) -> AppResult<Self> {
        let configs = store.load(CONFIGS_KEY).await?;
        let active_id = store.load(ACTIVE_CONFIG_KEY).await?;
        Ok(Self {
            store,
            configs,
            active_id,
        })
    }

    async fn persist_configs(&self) -> AppResult<()> {
        self.store.save(CONFIGS_KEY, &self.configs).await
    }

    async fn persist_active(&self) -> AppResult<()> {
        match &self.active_id {
            Some(id) => self.store.save(ACTIVE_CONFIG_KEY, id).await,
            None => self.store.remove(ACTIVE_CONFIG_KEY).await,
        }
    }

    pub fn configs(&self) -> &[SavedApiConfig] {
        &self.configs
    }

    pub fn get(&self, id: &str) -> Option<&SavedApiConfig> {
        self.configs.iter().find(|c| c.id == id)
    }

    pub fn active_config(&self) -> Option<&SavedApiConfig> {
        let id = self.active_id.as_deref()?;
        self.get(id)
    }

    /// 新增配置，返回生成的记录
    pub async fn add(&mut self, name: &str, config: ApiConfig) -> AppResult<SavedApiConfig> {
        let now = Utc::now();
        let mut seq = now.timestamp_subsec_nanos();
        let id = loop {
            let id = format!("config_{}_{:09}", now.timestamp_millis(), seq);
            if self.get(&id).is_none() {
                break id;
            }
            seq += 1;
        };
        let saved = SavedApiConfig {
            id,
            name: name.to_string(),
            created_at: now,
            updated_at: now,
            config,
        };
        self.configs.push(saved.clone());
        self.persist_configs().await?;
        info!("💾 已保存配置: {}", name);
        Ok(saved)
    }

    /// 更新名称和配置内容，返回是否找到
    pub async fn update(
        &mut self,
        id: &str,
        name: Option<&str>,
        config: Option<ApiConfig>,
    ) -> AppResult<bool> {
        let Some(saved) = self.configs.iter_mut().find(|c| c.id == id) else {
            return Ok(false);
        };
        if let Some(name) = name {
            saved.name = name.to_string();
        }
        if let Some(config) = config {
            saved.config = config;
        }
        saved.updated_at = Utc::now();
        self.persist_configs().await?;
        Ok(true)
    }

    /// 删除配置；删除的是当前配置时改用剩下的第一条
    pub async fn delete(&mut self, id: &str) -> AppResult<()> {
        self.configs.retain(|c| c.id != id);
        self.persist_configs().await?;
        if self.active_id.as_deref() == Some(id) {
            self.active_id = self.configs.first().map(|c| c.id.clone());
            self.persist_active().await?;
        }
        Ok(())
    }

    /// 切换当前配置，ID 不存在时不做任何修改
    pub async fn set_active(&mut self, id: &str) -> AppResult<bool> {
        if self.get(id).is_none() {
            return Ok(false);
        }
        self.active_id = Some(id.to_string());
        self.persist_active().await?;
        Ok(true)
    }

    /// 单独保存的"当前配置"
    pub async fn load_current(&self) -> AppResult<Option<ApiConfig>> {
        self.store.load(CURRENT_CONFIG_KEY).await
    }

    pub async fn save_current(&self, config: &ApiConfig) -> AppResult<()> {
        self.store.save(CURRENT_CONFIG_KEY, config).await
    }

    pub async fn clear_current(&self) -> AppResult<()> {
        self.store.remove(CURRENT_CONFIG_KEY).await
    }
}
