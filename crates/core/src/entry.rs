//! 缓存条目
//!
//! 值 + 过期元数据。每次读取都从驱动中的文本重新构造，不在操作间共享可变状态

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use strata_common::{deadline_ms, now_micros, now_ms};
use strata_errors::{CacheError, CacheResult};

use crate::options::EntryOptions;

/// 驱动中存储的条目格式
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct StoredEntryRef<'a, T> {
    value: &'a T,
    logical_expiration: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    early_expiration: Option<i64>,
    created_at: i64,
    #[serde(skip_serializing_if = "<[String]>::is_empty")]
    tags: &'a [String],
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoredEntry<T> {
    value: T,
    logical_expiration: i64,
    #[serde(default)]
    early_expiration: Option<i64>,
    #[serde(default)]
    created_at: i64,
    #[serde(default)]
    tags: Vec<String>,
}

/// 缓存条目
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry<T> {
    key: String,
    value: T,
    /// 逻辑过期时间（Unix 毫秒），之后视为陈旧
    logical_expiration: i64,
    /// 提前过期时间（Unix 毫秒），之后仍返回旧值但触发后台刷新
    early_expiration: Option<i64>,
    /// 创建时间（Unix 微秒），用于标签失效判断
    created_at: i64,
    tags: Vec<String>,
}

impl<T> CacheEntry<T> {
    /// 按解析后的选项构造新条目
    pub fn new(key: impl Into<String>, value: T, options: &EntryOptions) -> Self {
        let now = now_ms();
        let logical_expiration = options
            .logical_ttl
            .map(|ttl| deadline_ms(now, ttl))
            .unwrap_or(i64::MAX);
        let early_expiration = options
            .early_expire_ttl
            .map(|ttl| deadline_ms(now, ttl))
            .filter(|early| *early <= logical_expiration);

        Self {
            key: key.into(),
            value,
            logical_expiration,
            early_expiration,
            created_at: now_micros(),
            tags: options.tags.clone(),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn value(&self) -> &T {
        &self.value
    }

    pub fn into_value(self) -> T {
        self.value
    }

    pub fn logical_expiration(&self) -> i64 {
        self.logical_expiration
    }

    pub fn early_expiration(&self) -> Option<i64> {
        self.early_expiration
    }

    pub fn created_at(&self) -> i64 {
        self.created_at
    }

    pub fn tags(&self) -> &[String] {
        &self.tags
    }

    pub fn is_logically_expired(&self) -> bool {
        now_ms() >= self.logical_expiration
    }

    /// 处于提前过期窗口：已过 early 但尚未逻辑过期
    pub fn is_early_expired(&self) -> bool {
        match self.early_expiration {
            Some(early) => {
                let now = now_ms();
                now >= early && now < self.logical_expiration
            }
            None => false,
        }
    }

    /// 将逻辑过期时间拉到过去，物理记录保持不变
    pub fn expire(&mut self) -> &mut Self {
        self.logical_expiration = now_ms() - 1;
        self.early_expiration = None;
        self
    }

    /// 刷新失败时延长旧值的逻辑寿命
    pub fn apply_fallback_duration(&mut self, duration: Duration) -> &mut Self {
        self.logical_expiration = deadline_ms(now_ms(), duration);
        self.early_expiration = None;
        self
    }
}

impl<T: Serialize> CacheEntry<T> {
    /// 序列化为驱动存储的文本
    pub fn serialize(&self) -> CacheResult<String> {
        let stored = StoredEntryRef {
            value: &self.value,
            logical_expiration: self.logical_expiration,
            early_expiration: self.early_expiration,
            created_at: self.created_at,
            tags: &self.tags,
        };
        Ok(serde_json::to_string(&stored)?)
    }
}

impl<T: DeserializeOwned> CacheEntry<T> {
    /// 从驱动返回的文本重建条目
    pub fn from_driver(key: impl Into<String>, raw: &str) -> CacheResult<Self> {
        let key = key.into();
        let stored: StoredEntry<T> = serde_json::from_str(raw).map_err(|e| {
            CacheError::serialization(format!("Corrupted cache entry for '{}': {}", key, e))
        })?;

        Ok(Self {
            key,
            value: stored.value,
            logical_expiration: stored.logical_expiration,
            early_expiration: stored.early_expiration,
            created_at: stored.created_at,
            tags: stored.tags,
        })
    }
}
