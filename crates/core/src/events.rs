//! 可观测事件
//!
//! 事件经 broadcast 通道分发给订阅者，同时累加 metrics 计数器

use strata_ports::BusMessage;
use strata_telemetry::{metric_names, record_bus_message, record_event, record_hit};
use tokio::sync::broadcast;
use tracing::trace;

/// 事件通道默认容量
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

/// 缓存层
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Layer {
    L1,
    L2,
}

impl Layer {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::L1 => "l1",
            Self::L2 => "l2",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum CacheEvent {
    Hit {
        cache: String,
        key: String,
        layer: Layer,
        graced: bool,
    },
    Miss {
        cache: String,
        key: String,
    },
    Written {
        cache: String,
        key: String,
    },
    Deleted {
        cache: String,
        key: String,
    },
    Cleared {
        cache: String,
    },
    Expired {
        cache: String,
        key: String,
    },
    FactoryError {
        cache: String,
        key: String,
        background: bool,
    },
    BusPublished {
        message: BusMessage,
    },
    BusReceived {
        message: BusMessage,
    },
    BusRequeued {
        message: BusMessage,
    },
}

/// 事件分发器
#[derive(Clone)]
pub struct Emitter {
    sender: broadcast::Sender<CacheEvent>,
}

impl Emitter {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CacheEvent> {
        self.sender.subscribe()
    }

    pub fn emit(&self, event: CacheEvent) {
        match &event {
            CacheEvent::Hit {
                cache,
                layer,
                graced,
                ..
            } => record_hit(cache, layer.as_str(), *graced),
            CacheEvent::Miss { cache, .. } => record_event(metric_names::CACHE_MISSES, cache),
            CacheEvent::Written { cache, .. } => record_event(metric_names::CACHE_WRITES, cache),
            CacheEvent::Deleted { cache, .. } => record_event(metric_names::CACHE_DELETES, cache),
            CacheEvent::Cleared { cache } => record_event(metric_names::CACHE_CLEARS, cache),
            CacheEvent::Expired { cache, .. } => record_event(metric_names::CACHE_EXPIRES, cache),
            CacheEvent::FactoryError { cache, .. } => {
                record_event(metric_names::FACTORY_ERRORS, cache)
            }
            CacheEvent::BusPublished { message } => {
                record_bus_message(metric_names::BUS_PUBLISHED, message.message_type.as_str())
            }
            CacheEvent::BusReceived { message } => {
                record_bus_message(metric_names::BUS_RECEIVED, message.message_type.as_str())
            }
            CacheEvent::BusRequeued { message } => {
                record_bus_message(metric_names::BUS_REQUEUED, message.message_type.as_str())
            }
        }

        trace!(?event, "Cache event");
        if self.sender.receiver_count() > 0 {
            let _ = self.sender.send(event);
        }
    }
}

impl Default for Emitter {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}
