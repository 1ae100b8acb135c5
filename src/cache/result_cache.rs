//! 请求结果缓存
//!
//! ## 职责
//!
//! 在有限时间窗口和有限容量内，对相同的外部请求去重：
//!
//! 1. **指纹**：请求数据规范化（字段排序）后做非加密哈希，拼上前缀作为键
//! 2. **过期**：TTL 从最后一次访问开始计算，过期条目惰性删除
//! 3. **容量**：满了以后淘汰最久未访问的条目（LRU）
//!
//! 缓存是可克隆的句柄，所有克隆共享同一份数据。

use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tracing::debug;

use crate::error::CacheError;

/// 默认 TTL：30 分钟
pub const DEFAULT_TTL: Duration = Duration::from_secs(30 * 60);
/// 默认容量：100 条
pub const DEFAULT_CAPACITY: usize = 100;
/// 分析结果 TTL：2 小时
pub const ANALYSIS_TTL: Duration = Duration::from_secs(2 * 60 * 60);
/// 评分结果 TTL：1 小时
pub const GRADING_TTL: Duration = Duration::from_secs(60 * 60);

/// 缓存参数
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheOptions {
    pub capacity: usize,
    pub default_ttl: Duration,
}

impl Default for CacheOptions {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
            default_ttl: DEFAULT_TTL,
        }
    }
}

#[derive(Debug)]
struct CacheEntry {
    data: Value,
    last_accessed: Instant,
    /// 访问序号，用于在时间戳相同的情况下确定 LRU 顺序
    access_seq: u64,
    ttl: Duration,
}

impl CacheEntry {
    fn is_expired(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.last_accessed) > self.ttl
    }
}

#[derive(Debug, Default)]
struct CacheState {
    entries: HashMap<String, CacheEntry>,
    next_seq: u64,
}

impl CacheState {
    fn tick(&mut self) -> u64 {
        self.next_seq += 1;
        self.next_seq
    }

    fn sweep_expired(&mut self, now: Instant) {
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired(now));
        let removed = before - self.entries.len();
        if removed > 0 {
            debug!("清理了 {} 条过期缓存", removed);
        }
    }

    fn evict_lru(&mut self) {
        let oldest = self
            .entries
            .iter()
            .min_by_key(|(_, entry)| entry.access_seq)
            .map(|(key, _)| key.clone());

        if let Some(key) = oldest {
            debug!("缓存已满，淘汰最久未访问的条目: {}", key);
            self.entries.remove(&key);
        }
    }
}

/// 单条缓存的诊断信息
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntryStats {
    pub key: String,
    /// 距最后一次访问的时间
    pub age: Duration,
    pub ttl: Duration,
}

/// 缓存诊断快照
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheStats {
    pub size: usize,
    pub entries: Vec<CacheEntryStats>,
}

/// 带 TTL 与 LRU 淘汰的结果缓存
#[derive(Debug, Clone)]
pub struct ResultCache {
    state: Arc<Mutex<CacheState>>,
    options: CacheOptions,
}

impl Default for ResultCache {
    fn default() -> Self {
        Self::new(CacheOptions::default())
    }
}

impl ResultCache {
    pub fn new(options: CacheOptions) -> Self {
        Self {
            state: Arc::new(Mutex::new(CacheState::default())),
            options: CacheOptions {
                capacity: options.capacity.max(1),
                default_ttl: options.default_ttl,
            },
        }
    }

    pub fn options(&self) -> CacheOptions {
        self.options
    }

    fn lock(&self) -> MutexGuard<'_, CacheState> {
        // 持锁期间不会 panic，中毒时数据仍然一致
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// 生成缓存键
    ///
    /// 数据先转换为 JSON，对象字段按键名排序后再序列化，
    /// 因此字段顺序不同但内容相同的数据得到相同的键。
    pub fn generate_key<T>(prefix: &str, payload: &T) -> Result<String, CacheError>
    where
        T: Serialize + ?Sized,
    {
        let value = serde_json::to_value(payload).map_err(|source| CacheError::Serialization {
            prefix: prefix.to_string(),
            source,
        })?;

        let serialized = serde_json::to_string(&canonicalize(value)).map_err(|source| {
            CacheError::Serialization {
                prefix: prefix.to_string(),
                source,
            }
        })?;

        Ok(format!("{}_{}", prefix, hash_code(&serialized)))
    }

    /// 写入缓存（已存在则覆盖）
    ///
    /// 写入前先清理过期条目；如果仍然满了，淘汰最久未访问的一条。
    /// `ttl` 为 `None` 或零时使用默认 TTL。
    pub fn set(&self, key: impl Into<String>, data: Value, ttl: Option<Duration>) {
        let key = key.into();
        let now = Instant::now();
        let mut state = self.lock();

        state.sweep_expired(now);

        if !state.entries.contains_key(&key) && state.entries.len() >= self.options.capacity {
            state.evict_lru();
        }

        let access_seq = state.tick();
        state.entries.insert(
            key,
            CacheEntry {
                data,
                last_accessed: now,
                access_seq,
                ttl: ttl
                    .filter(|ttl| !ttl.is_zero())
                    .unwrap_or(self.options.default_ttl),
            },
        );
    }

    /// 读取缓存，命中时刷新最后访问时间
    pub fn get(&self, key: &str) -> Option<Value> {
        let now = Instant::now();
        let mut state = self.lock();

        let expired = state.entries.get(key)?.is_expired(now);
        if expired {
            debug!("缓存已过期: {}", key);
            state.entries.remove(key);
            return None;
        }

        let access_seq = state.tick();
        let entry = state.entries.get_mut(key)?;
        entry.last_accessed = now;
        entry.access_seq = access_seq;
        Some(entry.data.clone())
    }

    pub fn has(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn delete(&self, key: &str) -> bool {
        self.lock().entries.remove(key).is_some()
    }

    pub fn clear(&self) {
        self.lock().entries.clear();
    }

    /// 当前条目数（可能包含尚未清理的过期条目）
    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        let now = Instant::now();
        let state = self.lock();

        let mut entries: Vec<CacheEntryStats> = state
            .entries
            .iter()
            .map(|(key, entry)| CacheEntryStats {
                key: key.clone(),
                age: now.saturating_duration_since(entry.last_accessed),
                ttl: entry.ttl,
            })
            .collect();
        entries.sort_by(|a, b| a.key.cmp(&b.key));

        CacheStats {
            size: state.entries.len(),
            entries,
        }
    }

    // ========== 领域相关的便捷方法 ==========

    /// 缓存批量评分结果（1 小时）
    pub fn cache_grading_result<T>(&self, request: &T, result: Value) -> Result<(), CacheError>
    where
        T: Serialize + ?Sized,
    {
        let key = Self::generate_key("grading", request)?;
        self.set(key, result, Some(GRADING_TTL));
        Ok(())
    }

    pub fn get_grading_result<T>(&self, request: &T) -> Result<Option<Value>, CacheError>
    where
        T: Serialize + ?Sized,
    {
        let key = Self::generate_key("grading", request)?;
        Ok(self.get(&key))
    }

    /// 删除批量评分结果，返回是否存在
    pub fn invalidate_grading_result<T>(&self, request: &T) -> Result<bool, CacheError>
    where
        T: Serialize + ?Sized,
    {
        let key = Self::generate_key("grading", request)?;
        Ok(self.delete(&key))
    }

    /// 缓存标准答案分析结果（2 小时）
    pub fn cache_analysis_result<T>(&self, images: &T, result: Value) -> Result<(), CacheError>
    where
        T: Serialize + ?Sized,
    {
        let key = Self::analysis_key(images)?;
        self.set(key, result, Some(ANALYSIS_TTL));
        Ok(())
    }

    pub fn get_analysis_result<T>(&self, images: &T) -> Result<Option<Value>, CacheError>
    where
        T: Serialize + ?Sized,
    {
        let key = Self::analysis_key(images)?;
        Ok(self.get(&key))
    }

    /// 按接口 + 请求数据缓存任意响应
    pub fn cache_api_response<T>(
        &self,
        endpoint: &str,
        request: &T,
        response: Value,
        ttl: Option<Duration>,
    ) -> Result<(), CacheError>
    where
        T: Serialize + ?Sized,
    {
        let key = Self::api_key(endpoint, request)?;
        self.set(key, response, ttl);
        Ok(())
    }

    pub fn get_api_response<T>(&self, endpoint: &str, request: &T) -> Result<Option<Value>, CacheError>
    where
        T: Serialize + ?Sized,
    {
        let key = Self::api_key(endpoint, request)?;
        Ok(self.get(&key))
    }

    fn analysis_key<T>(images: &T) -> Result<String, CacheError>
    where
        T: Serialize + ?Sized,
    {
        #[derive(Serialize)]
        struct AnalysisKey<'a, T: ?Sized> {
            images: &'a T,
        }
        Self::generate_key("analysis", &AnalysisKey { images })
    }

    fn api_key<T>(endpoint: &str, request: &T) -> Result<String, CacheError>
    where
        T: Serialize + ?Sized,
    {
        #[derive(Serialize)]
        struct ApiKey<'a, T: ?Sized> {
            endpoint: &'a str,
            data: &'a T,
        }
        Self::generate_key("api", &ApiKey { endpoint, data: request })
    }
}

/// 递归地按键名排序对象字段
fn canonicalize(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut fields: Vec<(String, Value)> = map.into_iter().collect();
            fields.sort_by(|a, b| a.0.cmp(&b.0));
            Value::Object(
                fields
                    .into_iter()
                    .map(|(k, v)| (k, canonicalize(v)))
                    .collect(),
            )
        }
        Value::Array(items) => Value::Array(items.into_iter().map(canonicalize).collect()),
        other => other,
    }
}

/// 31 进制滚动哈希（按 UTF-16 码元，32 位溢出回绕，取绝对值）
fn hash_code(input: &str) -> u32 {
    let mut hash: i32 = 0;
    for unit in input.encode_utf16() {
        hash = hash
            .wrapping_shl(5)
            .wrapping_sub(hash)
            .wrapping_add(i32::from(unit));
    }
    hash.unsigned_abs()
}
