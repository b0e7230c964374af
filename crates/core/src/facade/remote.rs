use std::future::Future;
use std::sync::Arc;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use strata_errors::{CacheError, CacheResult};
use strata_ports::CacheDriver;
use tracing::{debug, error, trace, warn};

use crate::circuit_breaker::CircuitBreaker;
use crate::entry::CacheEntry;
use crate::options::EntryOptions;

/// 远程层外观
///
/// 每个操作都包在错误处理里：失败时记录日志、打开断路器，
/// 按 `suppress_l2_errors` 降级为未命中或抛出 `Remote` 错误
#[derive(Clone)]
pub struct RemoteCache {
    driver: Arc<dyn CacheDriver>,
    breaker: Option<Arc<CircuitBreaker>>,
    name: Arc<str>,
}

impl RemoteCache {
    pub fn new(
        driver: Arc<dyn CacheDriver>,
        breaker: Option<Arc<CircuitBreaker>>,
        name: impl Into<Arc<str>>,
    ) -> Self {
        Self {
            driver,
            breaker,
            name: name.into(),
        }
    }

    pub fn breaker(&self) -> Option<&Arc<CircuitBreaker>> {
        self.breaker.as_ref()
    }

    async fn guarded<R, F, Fut>(
        &self,
        operation: &'static str,
        key: &str,
        suppress: bool,
        fallback: R,
        f: F,
    ) -> CacheResult<R>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = CacheResult<R>>,
    {
        if self.breaker.as_ref().is_some_and(|b| b.is_open()) {
            debug!(cache = %self.name, operation, key, "Circuit breaker open, skipping remote cache");
            return Ok(fallback);
        }

        match f().await {
            Ok(result) => Ok(result),
            Err(e) => {
                error!(cache = %self.name, operation, key, error = %e, "Remote cache operation failed");
                // 只有远程层本身的故障才打开断路器
                if let Some(breaker) = self.breaker.as_ref().filter(|_| e.is_retryable()) {
                    breaker.open();
                }
                if suppress {
                    Ok(fallback)
                } else {
                    Err(CacheError::remote(operation, key, e.to_string()))
                }
            }
        }
    }

    pub async fn get<T: DeserializeOwned>(
        &self,
        key: &str,
        options: &EntryOptions,
    ) -> CacheResult<Option<CacheEntry<T>>> {
        let raw = self
            .guarded("get", key, options.suppress_l2_errors, None, || {
                self.driver.get(key)
            })
            .await?;

        let Some(raw) = raw else {
            trace!(cache = %self.name, key, layer = "l2", "Cache miss");
            return Ok(None);
        };

        match CacheEntry::from_driver(key, &raw) {
            Ok(entry) => Ok(Some(entry)),
            Err(e) => {
                warn!(cache = %self.name, key, layer = "l2", error = %e, "Discarding unreadable entry");
                Ok(None)
            }
        }
    }

    pub async fn set(&self, key: &str, raw: &str, options: &EntryOptions) -> CacheResult<()> {
        if options.is_dead_on_arrival() {
            self.delete(key, options).await?;
            return Ok(());
        }

        trace!(cache = %self.name, key, op_id = %options.id, layer = "l2", "Writing entry");
        self.guarded("set", key, options.suppress_l2_errors, (), || {
            self.driver.set(key, raw, options.physical_ttl())
        })
        .await
    }

    pub async fn delete(&self, key: &str, options: &EntryOptions) -> CacheResult<bool> {
        self.guarded("delete", key, options.suppress_l2_errors, false, || {
            self.driver.delete(key)
        })
        .await
    }

    pub async fn delete_many(&self, keys: &[String], options: &EntryOptions) -> CacheResult<bool> {
        let label = keys.join(",");
        self.guarded("delete_many", &label, options.suppress_l2_errors, false, || {
            self.driver.delete_many(keys)
        })
        .await
    }

    pub async fn has(&self, key: &str, options: &EntryOptions) -> CacheResult<bool> {
        self.guarded("has", key, options.suppress_l2_errors, false, || {
            self.driver.has(key)
        })
        .await
    }

    pub async fn logically_expire(&self, key: &str, options: &EntryOptions) -> CacheResult<bool> {
        let Some(mut entry) = self.get::<Value>(key, options).await? else {
            return Ok(false);
        };

        entry.expire();
        self.rewrite_preserving_ttl(key, &entry, options).await
    }

    /// 重写条目内容，物理剩余 TTL 不变；记录已不存在时不写入，返回 false
    pub async fn rewrite_preserving_ttl<T: Serialize + Sync>(
        &self,
        key: &str,
        entry: &CacheEntry<T>,
        options: &EntryOptions,
    ) -> CacheResult<bool> {
        let raw = entry.serialize()?;
        self.guarded("set", key, options.suppress_l2_errors, false, || async {
            let Some(ttl) = self.driver.remaining_ttl(key).await?.rewrite_ttl() else {
                return Ok(false);
            };
            self.driver.set(key, &raw, ttl).await?;
            Ok(true)
        })
        .await
    }

    pub fn namespace(&self, prefix: &str) -> Self {
        Self {
            driver: self.driver.namespace(prefix),
            breaker: self.breaker.clone(),
            name: self.name.clone(),
        }
    }

    pub async fn clear(&self, options: &EntryOptions) -> CacheResult<()> {
        self.guarded("clear", "*", options.suppress_l2_errors, (), || {
            self.driver.clear()
        })
        .await
    }

    pub async fn disconnect(&self) -> CacheResult<()> {
        self.driver.disconnect().await
    }
}
