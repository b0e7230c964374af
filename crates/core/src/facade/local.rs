use std::sync::Arc;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use strata_errors::CacheResult;
use strata_ports::CacheDriver;
use tracing::{debug, trace, warn};

use crate::entry::CacheEntry;
use crate::options::EntryOptions;

/// 本地层外观，错误直接向上传递
#[derive(Clone)]
pub struct LocalCache {
    driver: Arc<dyn CacheDriver>,
    name: Arc<str>,
}

impl LocalCache {
    pub fn new(driver: Arc<dyn CacheDriver>, name: impl Into<Arc<str>>) -> Self {
        Self {
            driver,
            name: name.into(),
        }
    }

    pub fn driver(&self) -> &Arc<dyn CacheDriver> {
        &self.driver
    }

    /// 读取条目；内容损坏视为未命中
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> CacheResult<Option<CacheEntry<T>>> {
        let Some(raw) = self.driver.get(key).await? else {
            trace!(cache = %self.name, key, layer = "l1", "Cache miss");
            return Ok(None);
        };

        match CacheEntry::from_driver(key, &raw) {
            Ok(entry) => Ok(Some(entry)),
            Err(e) => {
                warn!(cache = %self.name, key, layer = "l1", error = %e, "Discarding unreadable entry");
                Ok(None)
            }
        }
    }

    /// 写入已序列化的条目；未启用宽限期且物理 TTL 为零时改为删除
    pub async fn set(&self, key: &str, raw: &str, options: &EntryOptions) -> CacheResult<()> {
        if options.is_dead_on_arrival() {
            debug!(cache = %self.name, key, op_id = %options.id, "Non-positive ttl, deleting instead of storing");
            self.driver.delete(key).await?;
            return Ok(());
        }

        trace!(cache = %self.name, key, op_id = %options.id, layer = "l1", "Writing entry");
        self.driver.set(key, raw, options.physical_ttl()).await
    }

    pub async fn delete(&self, key: &str) -> CacheResult<bool> {
        self.driver.delete(key).await
    }

    pub async fn delete_many(&self, keys: &[String]) -> CacheResult<bool> {
        self.driver.delete_many(keys).await
    }

    pub async fn has(&self, key: &str) -> CacheResult<bool> {
        self.driver.has(key).await
    }

    /// 将条目标记为逻辑过期，保留物理记录及其剩余 TTL
    pub async fn logically_expire(&self, key: &str) -> CacheResult<bool> {
        let Some(mut entry) = self.get::<Value>(key).await? else {
            return Ok(false);
        };

        entry.expire();
        let rewritten = self.rewrite_preserving_ttl(key, &entry).await?;
        if rewritten {
            debug!(cache = %self.name, key, layer = "l1", "Entry logically expired");
        }
        Ok(rewritten)
    }

    /// 重写条目内容，物理剩余 TTL 不变；记录已不存在时不写入，返回 false
    pub async fn rewrite_preserving_ttl<T: Serialize + Sync>(
        &self,
        key: &str,
        entry: &CacheEntry<T>,
    ) -> CacheResult<bool> {
        let Some(ttl) = self.driver.remaining_ttl(key).await?.rewrite_ttl() else {
            return Ok(false);
        };
        self.driver.set(key, &entry.serialize()?, ttl).await?;
        Ok(true)
    }

    pub fn namespace(&self, prefix: &str) -> Self {
        Self {
            driver: self.driver.namespace(prefix),
            name: self.name.clone(),
        }
    }

    pub async fn clear(&self) -> CacheResult<()> {
        self.driver.clear().await
    }

    pub async fn disconnect(&self) -> CacheResult<()> {
        self.driver.disconnect().await
    }
}
