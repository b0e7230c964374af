//! 跨进程失效总线
//!
//! 本实例写入后发布消息，其它实例收到后让各自的本地层失效；
//! 发布失败的消息进入重试队列，在重连、下一次发布成功或定时任务中重放

mod encoder;
mod retry_queue;

pub use encoder::{BinaryEncoder, JsonEncoder, encoder_for};
pub use retry_queue::{DedupKey, RetryQueue, dedup_key};

use std::sync::{Arc, Weak};
use std::time::Duration;

use futures::FutureExt;
use parking_lot::Mutex;
use strata_common::{DEFAULT_BUS_ID_WIDTH, new_bus_id};
use strata_config::{BusSettings, RetryQueueSettings};
use strata_errors::{CacheError, CacheResult};
use strata_ports::{BusHandler, BusMessage, BusMessageType, BusTransport};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::events::{CacheEvent, Emitter};
use crate::facade::LocalCache;

/// 重试队列选项
#[derive(Debug, Clone)]
pub struct RetryQueueOptions {
    pub enabled: bool,
    pub max_size: usize,
    /// 定时重放间隔，None 表示只在重连或发布成功时重放
    pub retry_interval: Option<Duration>,
}

impl Default for RetryQueueOptions {
    fn default() -> Self {
        Self::from(&RetryQueueSettings::default())
    }
}

impl From<&RetryQueueSettings> for RetryQueueOptions {
    fn from(settings: &RetryQueueSettings) -> Self {
        Self {
            enabled: settings.enabled,
            max_size: settings.max_size,
            retry_interval: settings.retry_interval_ms.map(Duration::from_millis),
        }
    }
}

/// 总线选项
#[derive(Debug, Clone)]
pub struct BusOptions {
    pub channel: String,
    pub id_width: usize,
    pub retry_queue: RetryQueueOptions,
}

impl BusOptions {
    pub fn with_channel(mut self, channel: impl Into<String>) -> Self {
        self.channel = channel.into();
        self
    }

    pub fn with_retry_queue(mut self, retry_queue: RetryQueueOptions) -> Self {
        self.retry_queue = retry_queue;
        self
    }

    /// id 由 uuid 十六进制截取，宽度只能在 1..=32
    pub fn validate(&self) -> CacheResult<()> {
        if self.id_width == 0 || self.id_width > 32 {
            return Err(CacheError::config(format!(
                "Bus id width must be between 1 and 32, got {}",
                self.id_width
            )));
        }
        if self.channel.is_empty() {
            return Err(CacheError::config("Bus channel must not be empty"));
        }
        Ok(())
    }
}

impl Default for BusOptions {
    fn default() -> Self {
        Self::from(&BusSettings::default())
    }
}

impl From<&BusSettings> for BusOptions {
    fn from(settings: &BusSettings) -> Self {
        Self {
            channel: settings.channel.clone(),
            id_width: settings.id_width,
            retry_queue: RetryQueueOptions::from(&settings.retry_queue),
        }
    }
}

/// 失效总线
pub struct Bus {
    id: String,
    channel: String,
    transport: Arc<dyn BusTransport>,
    local: LocalCache,
    queue: Mutex<RetryQueue>,
    retry_interval: Option<Duration>,
    emitter: Emitter,
    replay_task: Mutex<Option<JoinHandle<()>>>,
}

impl Bus {
    pub fn new(
        transport: Arc<dyn BusTransport>,
        local: LocalCache,
        options: &BusOptions,
        emitter: Emitter,
    ) -> Arc<Self> {
        let id = new_bus_id(if options.id_width == 0 {
            DEFAULT_BUS_ID_WIDTH
        } else {
            options.id_width
        });
        transport.set_id(&id);

        Arc::new(Self {
            id,
            channel: options.channel.clone(),
            transport,
            local,
            queue: Mutex::new(RetryQueue::new(
                options.retry_queue.enabled,
                options.retry_queue.max_size,
            )),
            retry_interval: options.retry_queue.retry_interval,
            emitter,
            replay_task: Mutex::new(None),
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    pub fn queue_size(&self) -> usize {
        self.queue.lock().size()
    }

    /// 订阅频道并挂上重连回调与定时重放任务
    pub async fn start(self: &Arc<Self>) -> CacheResult<()> {
        let weak = Arc::downgrade(self);
        let handler: BusHandler = Arc::new(move |message| {
            let weak = weak.clone();
            async move {
                if let Some(bus) = weak.upgrade() {
                    bus.on_message(message).await;
                }
            }
            .boxed()
        });
        self.transport.subscribe(&self.channel, handler).await?;

        let weak = Arc::downgrade(self);
        self.transport.on_reconnect(Arc::new(move || {
            let weak = weak.clone();
            tokio::spawn(async move {
                if let Some(bus) = weak.upgrade() {
                    info!(bus_id = %bus.id, "Bus transport reconnected, replaying queue");
                    bus.process_queue().await;
                }
            });
        }));

        if let Some(interval) = self.retry_interval {
            let task = tokio::spawn(replay_loop(Arc::downgrade(self), interval));
            *self.replay_task.lock() = Some(task);
        }

        debug!(bus_id = %self.id, channel = %self.channel, "Bus subscribed");
        Ok(())
    }

    /// 发布消息；失败时进入重试队列并返回 false
    pub async fn publish(&self, message: BusMessage) -> bool {
        let message = message.with_bus_id(self.id.clone());

        match self.transport.publish(&self.channel, &message).await {
            Ok(()) => {
                self.emitter.emit(CacheEvent::BusPublished { message });
                let pending = self.queue_size();
                if pending > 0 {
                    self.process_queue().await;
                }
                true
            }
            Err(e) => {
                warn!(
                    bus_id = %self.id,
                    message_type = message.message_type.as_str(),
                    error = %e,
                    "Failed to publish bus message, queueing for retry"
                );
                let queued = self.queue.lock().enqueue(message.clone());
                if queued {
                    self.emitter.emit(CacheEvent::BusRequeued { message });
                }
                false
            }
        }
    }

    /// 重放重试队列，遇到失败即停止
    pub async fn process_queue(&self) {
        loop {
            let next = self.queue.lock().dequeue();
            let Some(message) = next else {
                break;
            };

            if let Err(e) = self.transport.publish(&self.channel, &message).await {
                debug!(bus_id = %self.id, error = %e, "Retry publish failed, keeping message queued");
                self.queue.lock().requeue_front(message);
                break;
            }
            self.emitter.emit(CacheEvent::BusPublished { message });
        }
    }

    async fn on_message(&self, message: BusMessage) {
        if message.bus_id == self.id {
            return;
        }

        debug!(
            bus_id = %self.id,
            from = %message.bus_id,
            message_type = message.message_type.as_str(),
            keys = message.keys.len(),
            "Received bus message"
        );

        let result = match message.message_type {
            BusMessageType::Set => self.expire_keys(&message.keys).await,
            BusMessageType::Delete => self.local.delete_many(&message.keys).await.map(|_| ()),
            BusMessageType::Clear => match message.namespace() {
                "" => self.local.clear().await,
                namespace => self.local.namespace(namespace).clear().await,
            },
        };

        if let Err(e) = result {
            warn!(bus_id = %self.id, error = %e, "Failed to apply bus message to local cache");
        }
        self.emitter.emit(CacheEvent::BusReceived { message });
    }

    async fn expire_keys(&self, keys: &[String]) -> CacheResult<()> {
        for key in keys {
            self.local.logically_expire(key).await?;
        }
        Ok(())
    }

    pub async fn disconnect(&self) -> CacheResult<()> {
        if let Some(task) = self.replay_task.lock().take() {
            task.abort();
        }
        {
            let mut queue = self.queue.lock();
            if !queue.is_empty() {
                warn!(bus_id = %self.id, dropped = queue.size(), "Bus disconnected with unsent messages");
            }
            queue.clear();
        }
        self.transport.unsubscribe(&self.channel).await?;
        self.transport.disconnect().await
    }
}

impl Drop for Bus {
    fn drop(&mut self) {
        if let Some(task) = self.replay_task.get_mut().take() {
            task.abort();
        }
    }
}

async fn replay_loop(bus: Weak<Bus>, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    ticker.tick().await;
    loop {
        ticker.tick().await;
        let Some(bus) = bus.upgrade() else {
            break;
        };
        if bus.queue_size() > 0 {
            bus.process_queue().await;
        }
    }
}
