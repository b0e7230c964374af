#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use strata_adapter_memory::{MemoryBusRegistry, MemoryDriver, MemoryTransport};
use strata_core::{BusOptions, CacheError, CacheManager, CacheResult, RawEntryOptions, StoreBuilder};
use strata_ports::{CacheDriver, KeyTtl};

/// 可以随时切换为故障状态的驱动
#[derive(Clone)]
pub struct FlakyDriver {
    inner: Arc<dyn CacheDriver>,
    failing: Arc<AtomicBool>,
    calls: Arc<AtomicUsize>,
}

impl FlakyDriver {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(MemoryDriver::default()),
            failing: Arc::new(AtomicBool::new(false)),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn check(&self) -> CacheResult<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            Err(CacheError::driver("simulated outage"))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl CacheDriver for FlakyDriver {
    async fn get(&self, key: &str) -> CacheResult<Option<String>> {
        self.check()?;
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> CacheResult<()> {
        self.check()?;
        self.inner.set(key, value, ttl).await
    }

    async fn delete(&self, key: &str) -> CacheResult<bool> {
        self.check()?;
        self.inner.delete(key).await
    }

    async fn delete_many(&self, keys: &[String]) -> CacheResult<bool> {
        self.check()?;
        self.inner.delete_many(keys).await
    }

    async fn has(&self, key: &str) -> CacheResult<bool> {
        self.check()?;
        self.inner.has(key).await
    }

    async fn remaining_ttl(&self, key: &str) -> CacheResult<KeyTtl> {
        self.check()?;
        self.inner.remaining_ttl(key).await
    }

    async fn clear(&self) -> CacheResult<()> {
        self.check()?;
        self.inner.clear().await
    }

    fn namespace(&self, prefix: &str) -> Arc<dyn CacheDriver> {
        Arc::new(Self {
            inner: self.inner.namespace(prefix),
            failing: self.failing.clone(),
            calls: self.calls.clone(),
        })
    }

    async fn disconnect(&self) -> CacheResult<()> {
        Ok(())
    }
}

/// 只有本地层的缓存
pub async fn local_only(options: RawEntryOptions) -> CacheManager {
    strata_telemetry::init_test_tracing();
    CacheManager::builder()
        .store(
            "default",
            StoreBuilder::new()
                .with_l1(Arc::new(MemoryDriver::default()))
                .with_options(options),
        )
        .build()
        .await
        .unwrap()
}

/// 只有远程层的缓存
pub async fn remote_only(l2: Arc<dyn CacheDriver>, options: RawEntryOptions) -> CacheManager {
    strata_telemetry::init_test_tracing();
    CacheManager::builder()
        .store(
            "default",
            StoreBuilder::new().with_l2(l2).with_options(options),
        )
        .build()
        .await
        .unwrap()
}

/// 两层缓存
pub async fn two_tier(l2: Arc<dyn CacheDriver>, options: RawEntryOptions) -> CacheManager {
    strata_telemetry::init_test_tracing();
    CacheManager::builder()
        .store(
            "default",
            StoreBuilder::new()
                .with_l1(Arc::new(MemoryDriver::default()))
                .with_l2(l2)
                .with_options(options),
        )
        .build()
        .await
        .unwrap()
}

/// 模拟一个进程：独立的 L1，共享的 L2 与总线注册表
pub struct Node {
    pub manager: CacheManager,
    pub transport: Arc<MemoryTransport>,
}

pub async fn node(l2: &Arc<MemoryDriver>, registry: &Arc<MemoryBusRegistry>) -> Node {
    strata_telemetry::init_test_tracing();
    let transport = Arc::new(MemoryTransport::new(registry.clone()));
    let manager = CacheManager::builder()
        .default_options(RawEntryOptions::new().ttl(Duration::from_secs(60)))
        .store(
            "default",
            StoreBuilder::new()
                .with_l1(Arc::new(MemoryDriver::default()))
                .with_l2(l2.clone())
                .with_bus(transport.clone(), BusOptions::default()),
        )
        .build()
        .await
        .unwrap();

    Node { manager, transport }
}

/// 等待后台任务与总线投递
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(50)).await;
}
