//! strata-errors - 统一错误处理
//!
//! 缓存引擎的错误分类：工厂超时/失败、锁超时、校验失败、远程层故障等

use std::time::Duration;

use thiserror::Error;

/// 工厂函数可返回的任意错误
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// 缓存错误类型
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Factory soft timeout for key '{key}' after {}ms", .timeout.as_millis())]
    FactorySoftTimeout { key: String, timeout: Duration },

    #[error("Factory hard timeout for key '{key}' after {}ms", .timeout.as_millis())]
    FactoryHardTimeout { key: String, timeout: Duration },

    #[error("Factory failed for key '{key}' (background: {background}): {source}")]
    Factory {
        key: String,
        #[source]
        source: BoxError,
        background: bool,
    },

    #[error("Lock timeout for key '{key}' after {}ms", .timeout.as_millis())]
    LockTimeout { key: String, timeout: Duration },

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Cannot cache an undefined value for key '{key}'")]
    UndefinedValue { key: String },

    #[error("Remote cache error during {operation} on '{key}': {message}")]
    Remote {
        operation: &'static str,
        key: String,
        message: String,
    },

    #[error("Driver error: {0}")]
    Driver(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Bus error: {0}")]
    Bus(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl CacheError {
    pub fn factory(key: impl Into<String>, source: impl Into<BoxError>, background: bool) -> Self {
        Self::Factory {
            key: key.into(),
            source: source.into(),
            background,
        }
    }

    pub fn soft_timeout(key: impl Into<String>, timeout: Duration) -> Self {
        Self::FactorySoftTimeout {
            key: key.into(),
            timeout,
        }
    }

    pub fn hard_timeout(key: impl Into<String>, timeout: Duration) -> Self {
        Self::FactoryHardTimeout {
            key: key.into(),
            timeout,
        }
    }

    pub fn lock_timeout(key: impl Into<String>, timeout: Duration) -> Self {
        Self::LockTimeout {
            key: key.into(),
            timeout,
        }
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn undefined_value(key: impl Into<String>) -> Self {
        Self::UndefinedValue { key: key.into() }
    }

    pub fn remote(operation: &'static str, key: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Remote {
            operation,
            key: key.into(),
            message: message.into(),
        }
    }

    pub fn driver(msg: impl Into<String>) -> Self {
        Self::Driver(msg.into())
    }

    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization(msg.into())
    }

    pub fn bus(msg: impl Into<String>) -> Self {
        Self::Bus(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// 是否为超时（工厂软/硬超时或等锁超时）
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            Self::FactorySoftTimeout { .. } | Self::FactoryHardTimeout { .. } | Self::LockTimeout { .. }
        )
    }

    /// 是否为远程层自身的故障（连接、驱动、总线），这类错误会打开断路器
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Remote { .. } | Self::Driver(_) | Self::Bus(_))
    }

    /// 是否在后台任务中产生
    pub fn is_background(&self) -> bool {
        matches!(self, Self::Factory { background: true, .. })
    }

    /// 将工厂错误标记为后台错误
    pub fn into_background(self) -> Self {
        match self {
            Self::Factory { key, source, .. } => Self::Factory {
                key,
                source,
                background: true,
            },
            other => other,
        }
    }

    /// 错误的简短分类名（用于日志和指标标签）
    pub fn kind(&self) -> &'static str {
        match self {
            Self::FactorySoftTimeout { .. } => "factory_soft_timeout",
            Self::FactoryHardTimeout { .. } => "factory_hard_timeout",
            Self::Factory { .. } => "factory",
            Self::LockTimeout { .. } => "lock_timeout",
            Self::Validation(_) => "validation",
            Self::UndefinedValue { .. } => "undefined_value",
            Self::Remote { .. } => "remote",
            Self::Driver(_) => "driver",
            Self::Serialization(_) => "serialization",
            Self::Bus(_) => "bus",
            Self::Config(_) => "config",
        }
    }
}

impl From<serde_json::Error> for CacheError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Result 类型别名
pub type CacheResult<T> = Result<T, CacheError>;
