//! 条目选项
//!
//! `RawEntryOptions` 是各层（库默认 < 管理器 < 存储 < 调用点）给出的部分覆盖，
//! 合并时越窄的一层越优先；`EntryOptions` 是解析后的只读快照

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use strata_config::CacheSettings;
use strata_errors::{CacheError, CacheResult};

/// 库级默认 TTL
pub const DEFAULT_TTL: Duration = Duration::from_secs(30 * 60);

/// 宽限期刷新失败后的默认续期时长
pub const DEFAULT_FALLBACK_DURATION: Duration = Duration::from_secs(10);

/// 写入前的值校验
pub type Validator = Arc<dyn Fn(&Value) -> Result<(), String> + Send + Sync>;

/// 工厂错误回调
pub type FactoryErrorHandler = Arc<dyn Fn(&CacheError) + Send + Sync>;

/// 生存时间
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ttl {
    After(Duration),
    Forever,
}

impl Ttl {
    pub fn as_duration(&self) -> Option<Duration> {
        match self {
            Self::After(duration) => Some(*duration),
            Self::Forever => None,
        }
    }
}

impl From<Duration> for Ttl {
    fn from(duration: Duration) -> Self {
        Self::After(duration)
    }
}

/// 宽限期开关
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GraceSetting {
    Disabled,
    Enabled(Ttl),
}

/// 部分条目选项
#[derive(Clone, Default)]
pub struct RawEntryOptions {
    pub ttl: Option<Ttl>,
    pub grace: Option<GraceSetting>,
    pub grace_backoff: Option<Duration>,
    pub early_expiration: Option<f64>,
    pub timeout: Option<Duration>,
    pub hard_timeout: Option<Duration>,
    pub lock_timeout: Option<Duration>,
    pub suppress_l2_errors: Option<bool>,
    pub tags: Option<Vec<String>>,
    pub skip_l2_write: Option<bool>,
    pub skip_bus_notify: Option<bool>,
    pub l2_circuit_breaker_duration: Option<Duration>,
    pub validator: Option<Validator>,
    pub on_factory_error: Option<FactoryErrorHandler>,
}

impl fmt::Debug for RawEntryOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RawEntryOptions")
            .field("ttl", &self.ttl)
            .field("grace", &self.grace)
            .field("grace_backoff", &self.grace_backoff)
            .field("early_expiration", &self.early_expiration)
            .field("timeout", &self.timeout)
            .field("hard_timeout", &self.hard_timeout)
            .field("lock_timeout", &self.lock_timeout)
            .field("suppress_l2_errors", &self.suppress_l2_errors)
            .field("tags", &self.tags)
            .field("skip_l2_write", &self.skip_l2_write)
            .field("skip_bus_notify", &self.skip_bus_notify)
            .field("l2_circuit_breaker_duration", &self.l2_circuit_breaker_duration)
            .field("validator", &self.validator.is_some())
            .field("on_factory_error", &self.on_factory_error.is_some())
            .finish()
    }
}

impl RawEntryOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// 库内置默认值（合并链的最底层）
    pub fn library_defaults() -> Self {
        Self {
            ttl: Some(Ttl::After(DEFAULT_TTL)),
            grace: Some(GraceSetting::Disabled),
            grace_backoff: Some(DEFAULT_FALLBACK_DURATION),
            suppress_l2_errors: Some(true),
            ..Self::default()
        }
    }

    pub fn ttl(mut self, ttl: impl Into<Ttl>) -> Self {
        self.ttl = Some(ttl.into());
        self
    }

    pub fn forever(mut self) -> Self {
        self.ttl = Some(Ttl::Forever);
        self
    }

    /// 启用宽限期
    pub fn grace(mut self, duration: impl Into<Ttl>) -> Self {
        self.grace = Some(GraceSetting::Enabled(duration.into()));
        self
    }

    pub fn no_grace(mut self) -> Self {
        self.grace = Some(GraceSetting::Disabled);
        self
    }

    /// 刷新失败时旧值的续期时长
    pub fn grace_backoff(mut self, duration: Duration) -> Self {
        self.grace_backoff = Some(duration);
        self
    }

    pub fn early_expiration(mut self, fraction: f64) -> Self {
        self.early_expiration = Some(fraction);
        self
    }

    /// 软超时：有宽限值时调用方最多等待这么久
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// 硬超时：没有宽限值时调用方最多等待这么久
    pub fn hard_timeout(mut self, timeout: Duration) -> Self {
        self.hard_timeout = Some(timeout);
        self
    }

    pub fn lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = Some(timeout);
        self
    }

    pub fn suppress_l2_errors(mut self, suppress: bool) -> Self {
        self.suppress_l2_errors = Some(suppress);
        self
    }

    pub fn tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = Some(tags.into_iter().map(Into::into).collect());
        self
    }

    pub fn skip_l2_write(mut self) -> Self {
        self.skip_l2_write = Some(true);
        self
    }

    pub fn skip_bus_notify(mut self) -> Self {
        self.skip_bus_notify = Some(true);
        self
    }

    pub fn l2_circuit_breaker_duration(mut self, duration: Duration) -> Self {
        self.l2_circuit_breaker_duration = Some(duration);
        self
    }

    pub fn validate<F>(mut self, validator: F) -> Self
    where
        F: Fn(&Value) -> Result<(), String> + Send + Sync + 'static,
    {
        self.validator = Some(Arc::new(validator));
        self
    }

    pub fn on_factory_error<F>(mut self, handler: F) -> Self
    where
        F: Fn(&CacheError) + Send + Sync + 'static,
    {
        self.on_factory_error = Some(Arc::new(handler));
        self
    }

    /// 用更窄一层的覆盖合并，`other` 中给出的字段优先
    pub fn merge(&self, other: &RawEntryOptions) -> RawEntryOptions {
        RawEntryOptions {
            ttl: other.ttl.or(self.ttl),
            grace: other.grace.or(self.grace),
            grace_backoff: other.grace_backoff.or(self.grace_backoff),
            early_expiration: other.early_expiration.or(self.early_expiration),
            timeout: other.timeout.or(self.timeout),
            hard_timeout: other.hard_timeout.or(self.hard_timeout),
            lock_timeout: other.lock_timeout.or(self.lock_timeout),
            suppress_l2_errors: other.suppress_l2_errors.or(self.suppress_l2_errors),
            tags: other.tags.clone().or_else(|| self.tags.clone()),
            skip_l2_write: other.skip_l2_write.or(self.skip_l2_write),
            skip_bus_notify: other.skip_bus_notify.or(self.skip_bus_notify),
            l2_circuit_breaker_duration: other
                .l2_circuit_breaker_duration
                .or(self.l2_circuit_breaker_duration),
            validator: other.validator.clone().or_else(|| self.validator.clone()),
            on_factory_error: other
                .on_factory_error
                .clone()
                .or_else(|| self.on_factory_error.clone()),
        }
    }
}

impl TryFrom<&CacheSettings> for RawEntryOptions {
    type Error = CacheError;

    fn try_from(settings: &CacheSettings) -> CacheResult<Self> {
        let l2_circuit_breaker_duration = match settings.l2_circuit_breaker_duration_ms {
            Some(ms) if ms < 0 => {
                return Err(CacheError::config(format!(
                    "l2_circuit_breaker_duration_ms must not be negative, got {}",
                    ms
                )));
            }
            Some(ms) => Some(Duration::from_millis(ms as u64)),
            None => None,
        };

        let grace = if settings.grace.enabled {
            let duration = settings
                .grace
                .duration_ms
                .map(|ms| Ttl::After(Duration::from_millis(ms)))
                .unwrap_or(Ttl::Forever);
            Some(GraceSetting::Enabled(duration))
        } else {
            None
        };

        Ok(Self {
            ttl: settings
                .ttl_ms
                .map(|ms| Ttl::After(Duration::from_millis(ms))),
            grace,
            grace_backoff: Some(Duration::from_millis(settings.grace.fallback_duration_ms)),
            early_expiration: settings.early_expiration,
            timeout: settings.timeout_ms.map(Duration::from_millis),
            hard_timeout: settings.hard_timeout_ms.map(Duration::from_millis),
            lock_timeout: settings.lock_timeout_ms.map(Duration::from_millis),
            suppress_l2_errors: settings.suppress_l2_errors,
            l2_circuit_breaker_duration,
            ..Self::default()
        })
    }
}

/// 解析后的宽限期
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GracePeriod {
    pub enabled: bool,
    /// None 表示永久保留
    pub duration: Option<Duration>,
    pub fallback_duration: Duration,
}

/// 解析后的条目选项
#[derive(Clone)]
pub struct EntryOptions {
    /// 操作关联 ID（日志用）
    pub id: String,
    /// None 表示永不逻辑过期
    pub logical_ttl: Option<Duration>,
    pub early_expire_ttl: Option<Duration>,
    pub timeout: Option<Duration>,
    pub hard_timeout: Option<Duration>,
    pub lock_timeout: Option<Duration>,
    pub suppress_l2_errors: bool,
    pub grace: GracePeriod,
    pub tags: Vec<String>,
    pub skip_l2_write: bool,
    pub skip_bus_notify: bool,
    pub l2_circuit_breaker_duration: Option<Duration>,
    pub validator: Option<Validator>,
    pub on_factory_error: Option<FactoryErrorHandler>,
}

impl fmt::Debug for EntryOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntryOptions")
            .field("id", &self.id)
            .field("logical_ttl", &self.logical_ttl)
            .field("early_expire_ttl", &self.early_expire_ttl)
            .field("timeout", &self.timeout)
            .field("hard_timeout", &self.hard_timeout)
            .field("lock_timeout", &self.lock_timeout)
            .field("suppress_l2_errors", &self.suppress_l2_errors)
            .field("grace", &self.grace)
            .field("tags", &self.tags)
            .field("skip_l2_write", &self.skip_l2_write)
            .field("skip_bus_notify", &self.skip_bus_notify)
            .finish_non_exhaustive()
    }
}

impl EntryOptions {
    /// 以库默认值为底解析
    pub fn resolve(raw: &RawEntryOptions) -> Self {
        let merged = RawEntryOptions::library_defaults().merge(raw);

        let logical_ttl = merged.ttl.and_then(|ttl| ttl.as_duration());
        let early_expire_ttl = match (merged.early_expiration, logical_ttl) {
            (Some(fraction), Some(ttl)) if fraction > 0.0 && fraction < 1.0 => {
                Some(ttl.mul_f64(fraction))
            }
            _ => None,
        };

        let grace = match merged.grace {
            Some(GraceSetting::Enabled(duration)) => GracePeriod {
                enabled: true,
                duration: duration.as_duration(),
                fallback_duration: merged.grace_backoff.unwrap_or(DEFAULT_FALLBACK_DURATION),
            },
            _ => GracePeriod {
                enabled: false,
                duration: None,
                fallback_duration: merged.grace_backoff.unwrap_or(DEFAULT_FALLBACK_DURATION),
            },
        };

        Self {
            id: strata_common::new_id().to_string(),
            logical_ttl,
            early_expire_ttl,
            timeout: merged.timeout,
            hard_timeout: merged.hard_timeout,
            lock_timeout: merged.lock_timeout,
            suppress_l2_errors: merged.suppress_l2_errors.unwrap_or(true),
            grace,
            tags: merged.tags.unwrap_or_default(),
            skip_l2_write: merged.skip_l2_write.unwrap_or(false),
            skip_bus_notify: merged.skip_bus_notify.unwrap_or(false),
            l2_circuit_breaker_duration: merged.l2_circuit_breaker_duration,
            validator: merged.validator,
            on_factory_error: merged.on_factory_error,
        }
    }

    /// 驱动中记录的物理 TTL
    ///
    /// 启用宽限期时取宽限期时长，让记录在逻辑过期后继续存活；None 表示永久
    pub fn physical_ttl(&self) -> Option<Duration> {
        if self.grace.enabled {
            self.grace.duration
        } else {
            self.logical_ttl
        }
    }

    /// 未启用宽限期且物理 TTL 为零：写入应改为删除
    pub fn is_dead_on_arrival(&self) -> bool {
        !self.grace.enabled && self.physical_ttl().is_some_and(|ttl| ttl.is_zero())
    }

    /// 调用方等待工厂的时长：有宽限值时用软超时（缺省退回硬超时），否则用硬超时
    pub fn factory_timeout(&self, has_fallback: bool) -> Option<Duration> {
        if has_fallback {
            self.timeout.or(self.hard_timeout)
        } else {
            self.hard_timeout
        }
    }
}

impl Default for EntryOptions {
    fn default() -> Self {
        Self::resolve(&RawEntryOptions::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_library_defaults() {
        let opts = EntryOptions::default();
        assert_eq!(opts.logical_ttl, Some(DEFAULT_TTL));
        assert_eq!(opts.physical_ttl(), Some(DEFAULT_TTL));
        assert!(!opts.grace.enabled);
        assert!(opts.suppress_l2_errors);
        assert_eq!(opts.timeout, None);
        assert_eq!(opts.early_expire_ttl, None);
    }

    #[test]
    fn test_narrowest_layer_wins() {
        let store = RawEntryOptions::new()
            .ttl(Duration::from_secs(60))
            .timeout(Duration::from_millis(100))
            .tags(["store"]);
        let call = RawEntryOptions::new().ttl(Duration::from_secs(5));

        let opts = EntryOptions::resolve(&store.merge(&call));
        assert_eq!(opts.logical_ttl, Some(Duration::from_secs(5)));
        assert_eq!(opts.timeout, Some(Duration::from_millis(100)));
        assert_eq!(opts.tags, vec!["store".to_string()]);
    }

    #[test]
    fn test_grace_diverges_physical_ttl() {
        let opts = EntryOptions::resolve(
            &RawEntryOptions::new()
                .ttl(Duration::from_secs(10))
                .grace(Duration::from_secs(3600))
                .early_expiration(0.8),
        );
        assert_eq!(opts.logical_ttl, Some(Duration::from_secs(10)));
        assert_eq!(opts.physical_ttl(), Some(Duration::from_secs(3600)));
        // 提前过期窗口相对逻辑 TTL
        assert_eq!(opts.early_expire_ttl, Some(Duration::from_secs(8)));

        let forever = EntryOptions::resolve(
            &RawEntryOptions::new()
                .ttl(Duration::from_secs(10))
                .grace(Ttl::Forever),
        );
        assert_eq!(forever.physical_ttl(), None);
    }

    #[test]
    fn test_early_expiration_fraction_bounds() {
        for fraction in [0.0, 1.0, 1.5, -0.2] {
            let opts = EntryOptions::resolve(
                &RawEntryOptions::new()
                    .ttl(Duration::from_secs(10))
                    .early_expiration(fraction),
            );
            assert_eq!(opts.early_expire_ttl, None, "fraction {}", fraction);
        }
    }

    #[test]
    fn test_dead_on_arrival() {
        let opts = EntryOptions::resolve(&RawEntryOptions::new().ttl(Duration::ZERO));
        assert!(opts.is_dead_on_arrival());

        let graced = EntryOptions::resolve(
            &RawEntryOptions::new()
                .ttl(Duration::ZERO)
                .grace(Duration::from_secs(60)),
        );
        assert!(!graced.is_dead_on_arrival());
    }

    #[test]
    fn test_factory_timeout_selection() {
        let opts = EntryOptions::resolve(
            &RawEntryOptions::new()
                .timeout(Duration::from_millis(100))
                .hard_timeout(Duration::from_millis(500)),
        );
        assert_eq!(opts.factory_timeout(true), Some(Duration::from_millis(100)));
        assert_eq!(opts.factory_timeout(false), Some(Duration::from_millis(500)));

        let hard_only =
            EntryOptions::resolve(&RawEntryOptions::new().hard_timeout(Duration::from_millis(500)));
        assert_eq!(hard_only.factory_timeout(true), Some(Duration::from_millis(500)));
    }

    #[test]
    fn test_from_settings() {
        let settings = CacheSettings {
            ttl_ms: Some(1_000),
            timeout_ms: Some(50),
            l2_circuit_breaker_duration_ms: Some(2_000),
            ..CacheSettings::default()
        };
        let raw = RawEntryOptions::try_from(&settings).unwrap();
        assert_eq!(raw.ttl, Some(Ttl::After(Duration::from_secs(1))));
        assert_eq!(raw.l2_circuit_breaker_duration, Some(Duration::from_secs(2)));

        let invalid = CacheSettings {
            l2_circuit_breaker_duration_ms: Some(-1),
            ..CacheSettings::default()
        };
        assert!(matches!(
            RawEntryOptions::try_from(&invalid),
            Err(CacheError::Config(_))
        ));
    }
}
