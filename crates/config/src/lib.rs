//! strata-config - 配置加载库
//!
//! 分层加载：`default.toml` -> `{APP_ENV}.toml` -> `STRATA_` 前缀的环境变量

use figment::{
    Figment,
    providers::{Env, Format, Toml},
};
use serde::Deserialize;
use thiserror::Error;

use secrecy::Secret;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load config: {0}")]
    Load(#[from] figment::Error),
}

/// 宽限期配置
#[derive(Debug, Clone, Deserialize)]
pub struct GraceSettings {
    #[serde(default)]
    pub enabled: bool,
    /// 宽限期时长（毫秒），缺省表示永久保留
    pub duration_ms: Option<u64>,
    /// 刷新失败后旧值的续期时长（毫秒）
    #[serde(default = "default_fallback_duration_ms")]
    pub fallback_duration_ms: u64,
}

fn default_fallback_duration_ms() -> u64 {
    10_000
}

impl Default for GraceSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            duration_ms: None,
            fallback_duration_ms: default_fallback_duration_ms(),
        }
    }
}

/// 缓存条目的库级默认值
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CacheSettings {
    /// 逻辑 TTL（毫秒），缺省使用引擎内置默认值
    pub ttl_ms: Option<u64>,
    #[serde(default)]
    pub grace: GraceSettings,
    /// 提前过期比例，取值 (0, 1) 之外视为禁用
    pub early_expiration: Option<f64>,
    /// 软超时（毫秒）
    pub timeout_ms: Option<u64>,
    /// 硬超时（毫秒）
    pub hard_timeout_ms: Option<u64>,
    /// 获取键锁的超时（毫秒）
    pub lock_timeout_ms: Option<u64>,
    pub suppress_l2_errors: Option<bool>,
    /// 远程层断路器打开时长（毫秒），负数为配置错误
    pub l2_circuit_breaker_duration_ms: Option<i64>,
}

/// 总线消息编码
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BusEncoding {
    #[default]
    Json,
    Binary,
}

/// 重试队列配置
#[derive(Debug, Clone, Deserialize)]
pub struct RetryQueueSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_max_size")]
    pub max_size: usize,
    /// 定时重放间隔（毫秒），缺省只在重连或下次发布成功时重放
    pub retry_interval_ms: Option<u64>,
}

fn default_true() -> bool {
    true
}

fn default_max_size() -> usize {
    1_000
}

impl Default for RetryQueueSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            max_size: default_max_size(),
            retry_interval_ms: None,
        }
    }
}

/// 总线配置
#[derive(Debug, Clone, Deserialize)]
pub struct BusSettings {
    #[serde(default = "default_channel")]
    pub channel: String,
    #[serde(default)]
    pub encoding: BusEncoding,
    #[serde(default = "default_id_width")]
    pub id_width: usize,
    #[serde(default)]
    pub retry_queue: RetryQueueSettings,
}

fn default_channel() -> String {
    "strata.notifications".to_string()
}

fn default_id_width() -> usize {
    24
}

impl Default for BusSettings {
    fn default() -> Self {
        Self {
            channel: default_channel(),
            encoding: BusEncoding::default(),
            id_width: default_id_width(),
            retry_queue: RetryQueueSettings::default(),
        }
    }
}

/// 本地内存层配置
#[derive(Debug, Clone, Deserialize)]
pub struct MemorySettings {
    #[serde(default = "default_max_capacity")]
    pub max_capacity: u64,
}

fn default_max_capacity() -> u64 {
    10_000
}

impl Default for MemorySettings {
    fn default() -> Self {
        Self {
            max_capacity: default_max_capacity(),
        }
    }
}

/// Redis 配置
#[derive(Debug, Clone, Deserialize)]
pub struct RedisSettings {
    pub url: Secret<String>,
    pub key_prefix: Option<String>,
}

/// 遥测配置
#[derive(Debug, Clone, Deserialize)]
pub struct TelemetryConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub json: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            json: false,
        }
    }
}

/// 应用配置
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StrataConfig {
    #[serde(default)]
    pub cache: CacheSettings,
    #[serde(default)]
    pub bus: BusSettings,
    #[serde(default)]
    pub memory: MemorySettings,
    pub redis: Option<RedisSettings>,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

impl StrataConfig {
    /// 从配置目录和环境变量加载配置
    pub fn load(config_dir: &str) -> Result<Self, ConfigError> {
        let env = std::env::var("APP_ENV").unwrap_or_else(|_| "development".to_string());

        let config: Self = Figment::new()
            .merge(Toml::file(format!("{}/default.toml", config_dir)))
            .merge(Toml::file(format!("{}/{}.toml", config_dir, env)))
            .merge(Env::prefixed("STRATA_").split("__"))
            .extract()?;

        Ok(config)
    }

    /// 从 TOML 字符串加载（嵌入式场景与测试）
    pub fn from_toml_str(toml: &str) -> Result<Self, ConfigError> {
        let config: Self = Figment::new().merge(Toml::string(toml)).extract()?;
        Ok(config)
    }
}
