//! Redis 连接管理

use redis::Client;
use redis::aio::ConnectionManager;
use strata_common::with_retry;
use strata_errors::{CacheError, CacheResult};
use tracing::info;

use crate::config::RedisConfig;

/// 创建 Redis 客户端
pub fn create_client(config: &RedisConfig) -> CacheResult<Client> {
    Client::open(config.url.as_str())
        .map_err(|e| CacheError::driver(format!("Failed to create Redis client: {}", e)))
}

/// 创建 Redis 连接管理器，按配置的重试策略建连
pub async fn create_connection_manager(config: &RedisConfig) -> CacheResult<ConnectionManager> {
    let client = create_client(config)?;

    let conn = with_retry(&config.retry, "redis_connect", || {
        let client = client.clone();
        async move {
            let mut conn =
                tokio::time::timeout(config.connection_timeout, ConnectionManager::new(client))
                    .await
                    .map_err(|_| {
                        CacheError::driver(format!(
                            "Redis connection timed out after {}ms",
                            config.connection_timeout.as_millis()
                        ))
                    })?
                    .map_err(|e| {
                        CacheError::driver(format!("Failed to create Redis connection manager: {}", e))
                    })?;
            check_connection(&mut conn).await?;
            Ok::<_, CacheError>(conn)
        }
    })
    .await?;

    info!(prefix = config.root_prefix(), "Redis connection established");
    Ok(conn)
}

/// 检查 Redis 连接
pub async fn check_connection(conn: &mut ConnectionManager) -> CacheResult<()> {
    redis::cmd("PING")
        .query_async::<String>(conn)
        .await
        .map_err(|e| CacheError::driver(format!("Redis health check failed: {}", e)))?;
    Ok(())
}
