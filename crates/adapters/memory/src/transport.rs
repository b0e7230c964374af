//! 进程内总线传输
//!
//! 多个 `MemoryTransport` 通过同一个 `MemoryBusRegistry` 互通，
//! 注册表由宿主（进程或测试）显式创建并持有

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use parking_lot::RwLock;
use strata_errors::{CacheError, CacheResult};
use strata_ports::{BusHandler, BusMessage, BusTransport, ReconnectCallback};
use tracing::{debug, trace};

struct Subscription {
    owner: u64,
    owner_id: Arc<RwLock<String>>,
    handler: BusHandler,
}

/// 频道订阅注册表
#[derive(Default)]
pub struct MemoryBusRegistry {
    channels: RwLock<HashMap<String, Vec<Subscription>>>,
    next_owner: AtomicU64,
}

impl MemoryBusRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// 某频道上的订阅数
    pub fn subscriber_count(&self, channel: &str) -> usize {
        self.channels
            .read()
            .get(channel)
            .map(Vec::len)
            .unwrap_or(0)
    }

    fn remove_owner(&self, owner: u64, channel: Option<&str>) {
        let mut channels = self.channels.write();
        match channel {
            Some(channel) => {
                if let Some(subs) = channels.get_mut(channel) {
                    subs.retain(|s| s.owner != owner);
                }
            }
            None => {
                for subs in channels.values_mut() {
                    subs.retain(|s| s.owner != owner);
                }
            }
        }
        channels.retain(|_, subs| !subs.is_empty());
    }
}

/// 进程内总线传输
pub struct MemoryTransport {
    registry: Arc<MemoryBusRegistry>,
    owner: u64,
    id: Arc<RwLock<String>>,
    available: AtomicBool,
    reconnect_callbacks: RwLock<Vec<ReconnectCallback>>,
}

impl MemoryTransport {
    pub fn new(registry: Arc<MemoryBusRegistry>) -> Self {
        let owner = registry.next_owner.fetch_add(1, Ordering::Relaxed);
        Self {
            registry,
            owner,
            id: Arc::new(RwLock::new(String::new())),
            available: AtomicBool::new(true),
            reconnect_callbacks: RwLock::new(Vec::new()),
        }
    }

    /// 模拟传输中断/恢复；恢复时触发重连回调
    pub fn set_available(&self, available: bool) {
        let was_available = self.available.swap(available, Ordering::SeqCst);
        if available && !was_available {
            debug!(owner = self.owner, "Memory transport reconnected");
            let callbacks = self.reconnect_callbacks.read().clone();
            for callback in callbacks {
                callback();
            }
        }
    }

    pub fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BusTransport for MemoryTransport {
    fn set_id(&self, id: &str) {
        *self.id.write() = id.to_string();
    }

    async fn publish(&self, channel: &str, message: &BusMessage) -> CacheResult<()> {
        if !self.is_available() {
            return Err(CacheError::bus("memory transport is unavailable"));
        }

        let handlers: Vec<BusHandler> = {
            let channels = self.registry.channels.read();
            channels
                .get(channel)
                .map(|subs| {
                    subs.iter()
                        .filter(|s| *s.owner_id.read() != message.bus_id)
                        .map(|s| s.handler.clone())
                        .collect()
                })
                .unwrap_or_default()
        };

        trace!(channel, receivers = handlers.len(), "Delivering bus message");
        for handler in handlers {
            tokio::spawn(handler(message.clone()));
        }
        Ok(())
    }

    async fn subscribe(&self, channel: &str, handler: BusHandler) -> CacheResult<()> {
        let mut channels = self.registry.channels.write();
        channels
            .entry(channel.to_string())
            .or_default()
            .push(Subscription {
                owner: self.owner,
                owner_id: self.id.clone(),
                handler,
            });
        Ok(())
    }

    async fn unsubscribe(&self, channel: &str) -> CacheResult<()> {
        self.registry.remove_owner(self.owner, Some(channel));
        Ok(())
    }

    fn on_reconnect(&self, callback: ReconnectCallback) {
        self.reconnect_callbacks.write().push(callback);
    }

    async fn disconnect(&self) -> CacheResult<()> {
        self.registry.remove_owner(self.owner, None);
        Ok(())
    }
}
