//! strata-core - 多层缓存引擎
//!
//! 本地层 + 可选远程层 + 跨进程失效总线：
//! 按键加锁防击穿、宽限期、提前刷新、软/硬超时与远程层断路器

pub mod bus;
pub mod cache;
pub mod circuit_breaker;
pub mod entry;
pub mod events;
pub mod facade;
pub mod factory;
mod get_or_set;
pub mod locks;
pub mod manager;
pub mod options;
pub mod stack;
pub mod tags;

pub use bus::{BinaryEncoder, Bus, BusOptions, JsonEncoder, RetryQueue, RetryQueueOptions, encoder_for};
pub use cache::Cache;
pub use circuit_breaker::{BreakerState, CircuitBreaker};
pub use entry::CacheEntry;
pub use events::{CacheEvent, Emitter, Layer};
pub use factory::{CacheValue, FactoryContext, FactoryOutcome};
pub use locks::{LockHandle, Locks};
pub use manager::{CacheManager, CacheManagerBuilder, StoreBuilder};
pub use options::{EntryOptions, GracePeriod, GraceSetting, RawEntryOptions, Ttl};
pub use stack::CacheStack;

pub use strata_errors::{BoxError, CacheError, CacheResult};
