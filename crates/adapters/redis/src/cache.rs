//! Redis 远程层驱动

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use strata_errors::{CacheError, CacheResult};
use strata_ports::{CacheDriver, KeyTtl, join_key};
use tracing::debug;

use crate::config::RedisConfig;
use crate::connection::create_connection_manager;

/// 每批 SCAN 的建议数量
const SCAN_COUNT: usize = 500;

fn driver_error(operation: &'static str) -> impl Fn(redis::RedisError) -> CacheError {
    move |e| CacheError::driver(format!("Redis {} failed: {}", operation, e))
}

/// 转义 glob 元字符，用于 SCAN MATCH
fn escape_pattern(prefix: &str) -> String {
    let mut escaped = String::with_capacity(prefix.len());
    for c in prefix.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

/// Redis 驱动
///
/// 命名空间共享同一个 `ConnectionManager`，只是键带 `prefix:` 前缀
#[derive(Clone)]
pub struct RedisDriver {
    conn: ConnectionManager,
    prefix: String,
}

impl RedisDriver {
    pub fn new(conn: ConnectionManager, prefix: impl Into<String>) -> Self {
        Self {
            conn,
            prefix: prefix.into(),
        }
    }

    /// 按配置建连并创建驱动
    pub async fn connect(config: &RedisConfig) -> CacheResult<Self> {
        let conn = create_connection_manager(config).await?;
        Ok(Self::new(conn, config.root_prefix()))
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    fn full_key(&self, key: &str) -> String {
        join_key(&self.prefix, key)
    }

    async fn scan_and_delete(&self) -> CacheResult<u64> {
        let mut conn = self.conn.clone();
        let pattern = format!("{}:*", escape_pattern(&self.prefix));
        let mut cursor: u64 = 0;
        let mut deleted: u64 = 0;

        loop {
            let (next, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(SCAN_COUNT)
                .query_async(&mut conn)
                .await
                .map_err(driver_error("scan"))?;

            if !keys.is_empty() {
                let removed: u64 = conn.del(&keys).await.map_err(driver_error("clear"))?;
                deleted += removed;
            }

            if next == 0 {
                return Ok(deleted);
            }
            cursor = next;
        }
    }
}

#[async_trait]
impl CacheDriver for RedisDriver {
    async fn get(&self, key: &str) -> CacheResult<Option<String>> {
        let mut conn = self.conn.clone();
        conn.get(self.full_key(key))
            .await
            .map_err(driver_error("get"))
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> CacheResult<()> {
        let mut conn = self.conn.clone();
        let key = self.full_key(key);
        match ttl {
            // PX 不接受 0
            Some(ttl) => {
                let millis = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1);
                conn.pset_ex(key, value, millis)
                    .await
                    .map_err(driver_error("set"))
            }
            None => conn.set(key, value).await.map_err(driver_error("set")),
        }
    }

    async fn delete(&self, key: &str) -> CacheResult<bool> {
        let mut conn = self.conn.clone();
        let removed: u64 = conn
            .del(self.full_key(key))
            .await
            .map_err(driver_error("delete"))?;
        Ok(removed > 0)
    }

    async fn delete_many(&self, keys: &[String]) -> CacheResult<bool> {
        if keys.is_empty() {
            return Ok(false);
        }

        let mut conn = self.conn.clone();
        let full_keys: Vec<String> = keys.iter().map(|key| self.full_key(key)).collect();
        let removed: u64 = conn
            .del(full_keys)
            .await
            .map_err(driver_error("delete_many"))?;
        Ok(removed > 0)
    }

    async fn has(&self, key: &str) -> CacheResult<bool> {
        let mut conn = self.conn.clone();
        conn.exists(self.full_key(key))
            .await
            .map_err(driver_error("exists"))
    }

    async fn remaining_ttl(&self, key: &str) -> CacheResult<KeyTtl> {
        let mut conn = self.conn.clone();
        let ttl: i64 = conn
            .pttl(self.full_key(key))
            .await
            .map_err(driver_error("pttl"))?;

        // -2 表示键不存在，-1 表示没有过期时间
        match ttl {
            -1 => Ok(KeyTtl::Persistent),
            t if t > 0 => Ok(KeyTtl::Expires(Duration::from_millis(t as u64))),
            _ => Ok(KeyTtl::Missing),
        }
    }

    async fn clear(&self) -> CacheResult<()> {
        if self.prefix.is_empty() {
            let mut conn = self.conn.clone();
            redis::cmd("FLUSHDB")
                .query_async::<()>(&mut conn)
                .await
                .map_err(driver_error("flushdb"))?;
            debug!("Redis database flushed");
            return Ok(());
        }

        let deleted = self.scan_and_delete().await?;
        debug!(prefix = %self.prefix, deleted, "Cleared Redis namespace");
        Ok(())
    }

    fn namespace(&self, prefix: &str) -> Arc<dyn CacheDriver> {
        Arc::new(Self {
            conn: self.conn.clone(),
            prefix: join_key(&self.prefix, prefix),
        })
    }

    async fn disconnect(&self) -> CacheResult<()> {
        // ConnectionManager 在最后一个克隆释放时关闭
        debug!(prefix = %self.prefix, "Redis driver disconnected");
        Ok(())
    }
}
