//! 缓存管理器
//!
//! 按名称管理多个存储（每个存储是一组 L1/L2/总线），并指定默认存储

use std::collections::HashMap;
use std::sync::Arc;

use strata_config::StrataConfig;
use strata_errors::{CacheError, CacheResult};
use strata_ports::{BusTransport, CacheDriver};
use tokio::sync::broadcast;
use tracing::info;

use crate::bus::{Bus, BusOptions};
use crate::cache::Cache;
use crate::circuit_breaker::CircuitBreaker;
use crate::events::{CacheEvent, Emitter};
use crate::facade::{LocalCache, RemoteCache};
use crate::options::{EntryOptions, RawEntryOptions};
use crate::stack::CacheStack;

/// 单个存储的构建参数
#[derive(Default)]
pub struct StoreBuilder {
    l1: Option<Arc<dyn CacheDriver>>,
    l2: Option<Arc<dyn CacheDriver>>,
    bus: Option<(Arc<dyn BusTransport>, BusOptions)>,
    options: RawEntryOptions,
}

impl StoreBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_l1(mut self, driver: Arc<dyn CacheDriver>) -> Self {
        self.l1 = Some(driver);
        self
    }

    pub fn with_l2(mut self, driver: Arc<dyn CacheDriver>) -> Self {
        self.l2 = Some(driver);
        self
    }

    pub fn with_bus(mut self, transport: Arc<dyn BusTransport>, options: BusOptions) -> Self {
        self.bus = Some((transport, options));
        self
    }

    /// 存储级默认选项
    pub fn with_options(mut self, options: RawEntryOptions) -> Self {
        self.options = options;
        self
    }

    async fn build(self, name: &str, defaults: &RawEntryOptions, emitter: &Emitter) -> CacheResult<Cache> {
        if self.l1.is_none() && self.l2.is_none() {
            return Err(CacheError::config(format!(
                "Store '{}' needs at least one cache tier",
                name
            )));
        }
        if self.bus.is_some() && self.l1.is_none() {
            return Err(CacheError::config(format!(
                "Store '{}' has a bus but no local tier to invalidate",
                name
            )));
        }

        let defaults = defaults.merge(&self.options);
        let resolved = EntryOptions::resolve(&defaults);

        let l1 = self.l1.map(|driver| LocalCache::new(driver, name));
        let l2 = self.l2.map(|driver| {
            let breaker = resolved
                .l2_circuit_breaker_duration
                .map(|duration| Arc::new(CircuitBreaker::new(duration)));
            RemoteCache::new(driver, breaker, name)
        });

        let bus = match (self.bus, &l1) {
            (Some((transport, options)), Some(local)) => {
                options.validate()?;
                let bus = Bus::new(transport, local.clone(), &options, emitter.clone());
                bus.start().await?;
                Some(bus)
            }
            _ => None,
        };

        info!(
            store = name,
            l1 = l1.is_some(),
            l2 = l2.is_some(),
            bus = bus.is_some(),
            "Cache store ready"
        );
        Ok(Cache::new(CacheStack::new(
            name,
            l1,
            l2,
            bus,
            defaults,
            emitter.clone(),
        )))
    }
}

/// 管理器构建器
#[derive(Default)]
pub struct CacheManagerBuilder {
    default_options: RawEntryOptions,
    stores: Vec<(String, StoreBuilder)>,
    default_store: Option<String>,
}

impl CacheManagerBuilder {
    /// 管理器级默认选项（所有存储共享）
    pub fn default_options(mut self, options: RawEntryOptions) -> Self {
        self.default_options = options;
        self
    }

    /// 以配置文件中的 `cache` 段作为管理器级默认选项
    pub fn with_config(mut self, config: &StrataConfig) -> CacheResult<Self> {
        self.default_options = RawEntryOptions::try_from(&config.cache)?;
        Ok(self)
    }

    pub fn store(mut self, name: impl Into<String>, store: StoreBuilder) -> Self {
        self.stores.push((name.into(), store));
        self
    }

    pub fn default_store(mut self, name: impl Into<String>) -> Self {
        self.default_store = Some(name.into());
        self
    }

    pub async fn build(self) -> CacheResult<CacheManager> {
        let Some((first, _)) = self.stores.first() else {
            return Err(CacheError::config("At least one store must be configured"));
        };
        let default_store = self.default_store.unwrap_or_else(|| first.clone());

        let emitter = Emitter::default();
        let mut stores = HashMap::with_capacity(self.stores.len());
        for (name, builder) in self.stores {
            if stores.contains_key(&name) {
                return Err(CacheError::config(format!("Duplicate store '{}'", name)));
            }
            let cache = builder
                .build(&name, &self.default_options, &emitter)
                .await?;
            stores.insert(name, cache);
        }

        if !stores.contains_key(&default_store) {
            return Err(CacheError::config(format!(
                "Default store '{}' is not configured",
                default_store
            )));
        }

        Ok(CacheManager {
            stores,
            default_store,
            emitter,
        })
    }
}

/// 缓存管理器
pub struct CacheManager {
    stores: HashMap<String, Cache>,
    default_store: String,
    emitter: Emitter,
}

impl CacheManager {
    pub fn builder() -> CacheManagerBuilder {
        CacheManagerBuilder::default()
    }

    /// 默认存储
    pub fn cache(&self) -> &Cache {
        // build 已校验默认存储存在
        &self.stores[&self.default_store]
    }

    pub fn use_store(&self, name: &str) -> CacheResult<&Cache> {
        self.stores
            .get(name)
            .ok_or_else(|| CacheError::config(format!("Unknown store '{}'", name)))
    }

    pub fn default_store_name(&self) -> &str {
        &self.default_store
    }

    pub fn store_names(&self) -> impl Iterator<Item = &str> {
        self.stores.keys().map(String::as_str)
    }

    /// 所有存储的事件
    pub fn events(&self) -> broadcast::Receiver<CacheEvent> {
        self.emitter.subscribe()
    }

    pub async fn disconnect_all(&self) -> CacheResult<()> {
        for (name, cache) in &self.stores {
            info!(store = %name, "Disconnecting cache store");
            cache.disconnect().await?;
        }
        Ok(())
    }
}
