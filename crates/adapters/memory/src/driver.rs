//! 内存缓存驱动
//!
//! 每个条目带绝对过期时间，由 moka 的 `Expiry` 按条目淘汰；
//! 命名空间共享同一个 moka 实例，只是键带 `prefix:` 前缀

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use moka::Expiry;
use moka::future::Cache as MokaCache;
use strata_errors::CacheResult;
use strata_ports::{CacheDriver, KeyTtl, join_key};
use tracing::debug;

/// 默认最大条目数
pub const DEFAULT_MAX_CAPACITY: u64 = 10_000;

#[derive(Debug, Clone)]
struct MemoryItem {
    value: Arc<str>,
    expires_at: Option<Instant>,
}

impl MemoryItem {
    fn ttl(&self) -> KeyTtl {
        match self.expires_at {
            None => KeyTtl::Persistent,
            Some(at) => {
                let remaining = at.saturating_duration_since(Instant::now());
                if remaining.is_zero() {
                    KeyTtl::Missing
                } else {
                    KeyTtl::Expires(remaining)
                }
            }
        }
    }
}

/// 按条目自身的过期时间淘汰
struct ItemExpiry;

impl Expiry<String, MemoryItem> for ItemExpiry {
    fn expire_after_create(
        &self,
        _key: &String,
        value: &MemoryItem,
        created_at: Instant,
    ) -> Option<Duration> {
        value
            .expires_at
            .map(|at| at.saturating_duration_since(created_at))
    }

    fn expire_after_update(
        &self,
        _key: &String,
        value: &MemoryItem,
        updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        value
            .expires_at
            .map(|at| at.saturating_duration_since(updated_at))
    }
}

/// 内存缓存驱动
#[derive(Clone)]
pub struct MemoryDriver {
    cache: MokaCache<String, MemoryItem>,
    prefix: String,
}

impl MemoryDriver {
    pub fn new(max_capacity: u64) -> Self {
        let cache = MokaCache::builder()
            .max_capacity(max_capacity)
            .expire_after(ItemExpiry)
            .build();

        Self {
            cache,
            prefix: String::new(),
        }
    }

    /// 当前命名空间前缀
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// 整个 moka 实例中的条目数（包含所有命名空间）
    pub async fn entry_count(&self) -> u64 {
        self.cache.run_pending_tasks().await;
        self.cache.entry_count()
    }

    fn full_key(&self, key: &str) -> String {
        join_key(&self.prefix, key)
    }
}

impl Default for MemoryDriver {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_CAPACITY)
    }
}

#[async_trait]
impl CacheDriver for MemoryDriver {
    async fn get(&self, key: &str) -> CacheResult<Option<String>> {
        let item = self.cache.get(&self.full_key(key)).await;
        Ok(item.map(|item| item.value.to_string()))
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> CacheResult<()> {
        let item = MemoryItem {
            value: Arc::from(value),
            expires_at: ttl.and_then(|ttl| Instant::now().checked_add(ttl)),
        };
        self.cache.insert(self.full_key(key), item).await;
        Ok(())
    }

    async fn delete(&self, key: &str) -> CacheResult<bool> {
        Ok(self.cache.remove(&self.full_key(key)).await.is_some())
    }

    async fn delete_many(&self, keys: &[String]) -> CacheResult<bool> {
        let mut deleted = false;
        for key in keys {
            deleted |= self.delete(key).await?;
        }
        Ok(deleted)
    }

    async fn has(&self, key: &str) -> CacheResult<bool> {
        Ok(self.cache.contains_key(&self.full_key(key)))
    }

    async fn remaining_ttl(&self, key: &str) -> CacheResult<KeyTtl> {
        let item = self.cache.get(&self.full_key(key)).await;
        Ok(item.map(|item| item.ttl()).unwrap_or(KeyTtl::Missing))
    }

    async fn clear(&self) -> CacheResult<()> {
        if self.prefix.is_empty() {
            self.cache.invalidate_all();
            return Ok(());
        }

        let scope = format!("{}:", self.prefix);
        let keys: Vec<Arc<String>> = self
            .cache
            .iter()
            .filter(|(key, _)| key.starts_with(&scope))
            .map(|(key, _)| key)
            .collect();

        debug!(prefix = %self.prefix, count = keys.len(), "Clearing memory namespace");
        for key in keys {
            self.cache.invalidate(key.as_str()).await;
        }
        Ok(())
    }

    fn namespace(&self, prefix: &str) -> Arc<dyn CacheDriver> {
        Arc::new(Self {
            cache: self.cache.clone(),
            prefix: join_key(&self.prefix, prefix),
        })
    }

    async fn disconnect(&self) -> CacheResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_set_get_delete() {
        let driver = MemoryDriver::default();

        driver.set("key1", "value1", None).await.unwrap();
        assert_eq!(driver.get("key1").await.unwrap(), Some("value1".to_string()));
        assert!(driver.has("key1").await.unwrap());
        assert_eq!(driver.remaining_ttl("key1").await.unwrap(), KeyTtl::Persistent);

        assert!(driver.delete("key1").await.unwrap());
        assert!(!driver.delete("key1").await.unwrap());
        assert_eq!(driver.get("key1").await.unwrap(), None);
        assert_eq!(driver.remaining_ttl("key1").await.unwrap(), KeyTtl::Missing);
    }

    #[tokio::test]
    async fn test_per_entry_ttl() {
        let driver = MemoryDriver::default();

        driver
            .set("short", "v", Some(Duration::from_millis(50)))
            .await
            .unwrap();
        driver
            .set("long", "v", Some(Duration::from_secs(60)))
            .await
            .unwrap();

        let KeyTtl::Expires(remaining) = driver.remaining_ttl("long").await.unwrap() else {
            panic!("expected an expiring key");
        };
        assert!(remaining > Duration::from_secs(50));

        tokio::time::sleep(Duration::from_millis(120)).await;
        assert_eq!(driver.get("short").await.unwrap(), None);
        assert!(driver.get("long").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_namespace_isolation() {
        let root = MemoryDriver::default();
        let users = root.namespace("users");
        let posts = root.namespace("posts");

        users.set("1", "alice", None).await.unwrap();
        posts.set("1", "hello", None).await.unwrap();

        // 根命名空间通过完整键可见
        assert_eq!(root.get("users:1").await.unwrap(), Some("alice".to_string()));

        users.clear().await.unwrap();
        assert_eq!(users.get("1").await.unwrap(), None);
        assert_eq!(posts.get("1").await.unwrap(), Some("hello".to_string()));

        root.clear().await.unwrap();
        assert_eq!(posts.get("1").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_delete_many() {
        let driver = MemoryDriver::default();
        driver.set("a", "1", None).await.unwrap();
        driver.set("b", "2", None).await.unwrap();

        let keys = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        assert!(driver.delete_many(&keys).await.unwrap());
        assert_eq!(driver.entry_count().await, 0);
    }
}
