//! Redis 配置模块

use std::time::Duration;

use secrecy::ExposeSecret;
use strata_common::RetryConfig;
use strata_config::RedisSettings;

/// Redis 配置
#[derive(Debug, Clone)]
pub struct RedisConfig {
    /// Redis URL
    pub url: String,
    /// 键前缀，同时作为根命名空间
    pub key_prefix: Option<String>,
    /// 建立连接的超时
    pub connection_timeout: Duration,
    /// 建连与重新订阅的重试策略
    pub retry: RetryConfig,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: "redis://127.0.0.1:6379".to_string(),
            key_prefix: None,
            connection_timeout: Duration::from_secs(10),
            retry: RetryConfig::default(),
        }
    }
}

impl RedisConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    /// 设置键前缀
    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = Some(prefix.into());
        self
    }

    /// 设置连接超时
    pub fn with_connection_timeout(mut self, timeout: Duration) -> Self {
        self.connection_timeout = timeout;
        self
    }

    /// 设置重试配置
    pub fn with_retry(
        mut self,
        max_attempts: u32,
        initial_delay: Duration,
        max_delay: Duration,
    ) -> Self {
        self.retry = RetryConfig::new(max_attempts, initial_delay, max_delay);
        self
    }

    /// 根命名空间前缀（未配置时为空）
    pub fn root_prefix(&self) -> &str {
        self.key_prefix.as_deref().unwrap_or("")
    }
}

impl From<&RedisSettings> for RedisConfig {
    fn from(settings: &RedisSettings) -> Self {
        Self {
            url: settings.url.expose_secret().clone(),
            key_prefix: settings.key_prefix.clone(),
            ..Default::default()
        }
    }
}
