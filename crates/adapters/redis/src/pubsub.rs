//! Redis 发布/订阅总线传输
//!
//! 发布走共享的 `ConnectionManager`；每个订阅频道一个后台任务，
//! 连接断开后按重试策略重新订阅，成功后触发重连回调

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use parking_lot::{Mutex, RwLock};
use redis::aio::{ConnectionManager, PubSub};
use redis::{AsyncCommands, Client};
use strata_common::{RetryConfig, with_retry};
use strata_errors::{CacheError, CacheResult};
use strata_ports::{BusEncoder, BusHandler, BusMessage, BusTransport, ReconnectCallback};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::RedisConfig;
use crate::connection::{create_client, create_connection_manager};

/// 订阅任务共享的状态
struct Shared {
    client: Client,
    encoder: Arc<dyn BusEncoder>,
    id: RwLock<String>,
    retry: RetryConfig,
    reconnect_callbacks: RwLock<Vec<ReconnectCallback>>,
}

impl Shared {
    async fn connect_pubsub(&self, channel: &str) -> CacheResult<PubSub> {
        let mut pubsub = self
            .client
            .get_async_pubsub()
            .await
            .map_err(|e| CacheError::bus(format!("Failed to get pubsub connection: {}", e)))?;

        pubsub
            .subscribe(channel)
            .await
            .map_err(|e| CacheError::bus(format!("Failed to subscribe to {}: {}", channel, e)))?;

        Ok(pubsub)
    }

    /// 一直重试直到重新订阅成功
    async fn resubscribe(&self, channel: &str) -> PubSub {
        loop {
            match with_retry(&self.retry, "redis_bus_subscribe", || {
                self.connect_pubsub(channel)
            })
            .await
            {
                Ok(pubsub) => return pubsub,
                Err(e) => {
                    error!(channel, error = %e, "Bus resubscribe failed, backing off");
                    tokio::time::sleep(self.retry.max_delay).await;
                }
            }
        }
    }

    fn notify_reconnect(&self) {
        let callbacks = self.reconnect_callbacks.read().clone();
        for callback in callbacks {
            callback();
        }
    }

    async fn dispatch(&self, channel: &str, payload: &[u8], handler: &BusHandler) {
        let message = match self.encoder.decode(payload) {
            Ok(message) => message,
            Err(e) => {
                warn!(channel, error = %e, "Dropping undecodable bus message");
                return;
            }
        };

        let own = message.bus_id == *self.id.read();
        if own {
            return;
        }

        handler(message).await;
    }

    async fn run_subscription(self: Arc<Self>, channel: String, handler: BusHandler, mut pubsub: PubSub) {
        loop {
            let mut stream = pubsub.into_on_message();
            while let Some(msg) = stream.next().await {
                self.dispatch(&channel, msg.get_payload_bytes(), &handler)
                    .await;
            }
            drop(stream);

            warn!(channel = %channel, "Bus subscription lost, reconnecting");
            pubsub = self.resubscribe(&channel).await;
            info!(channel = %channel, "Bus subscription restored");
            self.notify_reconnect();
        }
    }
}

/// Redis 总线传输
pub struct RedisTransport {
    shared: Arc<Shared>,
    publisher: ConnectionManager,
    subscriptions: Mutex<HashMap<String, JoinHandle<()>>>,
}

impl RedisTransport {
    /// 按配置建连；编码器由宿主提供
    pub async fn connect(config: &RedisConfig, encoder: Arc<dyn BusEncoder>) -> CacheResult<Self> {
        let client = create_client(config)?;
        let publisher = create_connection_manager(config).await?;

        Ok(Self {
            shared: Arc::new(Shared {
                client,
                encoder,
                id: RwLock::new(String::new()),
                retry: config.retry.clone(),
                reconnect_callbacks: RwLock::new(Vec::new()),
            }),
            publisher,
            subscriptions: Mutex::new(HashMap::new()),
        })
    }

    /// 当前活跃的订阅数
    pub fn subscription_count(&self) -> usize {
        self.subscriptions.lock().len()
    }

    fn abort_all(&self) {
        let tasks: Vec<JoinHandle<()>> = self.subscriptions.lock().drain().map(|(_, t)| t).collect();
        for task in tasks {
            task.abort();
        }
    }
}

#[async_trait]
impl BusTransport for RedisTransport {
    fn set_id(&self, id: &str) {
        *self.shared.id.write() = id.to_string();
    }

    async fn publish(&self, channel: &str, message: &BusMessage) -> CacheResult<()> {
        let payload = self.shared.encoder.encode(message)?;
        let mut conn = self.publisher.clone();
        let subscribers: u64 = conn
            .publish(channel, payload)
            .await
            .map_err(|e| CacheError::bus(format!("Failed to publish message: {}", e)))?;

        debug!(channel, subscribers, message_type = message.message_type.as_str(), "Bus message published");
        Ok(())
    }

    async fn subscribe(&self, channel: &str, handler: BusHandler) -> CacheResult<()> {
        let pubsub = with_retry(&self.shared.retry, "redis_bus_subscribe", || {
            self.shared.connect_pubsub(channel)
        })
        .await?;

        info!(channel, "Subscribed to bus channel");
        let task = tokio::spawn(
            self.shared
                .clone()
                .run_subscription(channel.to_string(), handler, pubsub),
        );

        let previous = self.subscriptions.lock().insert(channel.to_string(), task);
        if let Some(previous) = previous {
            previous.abort();
        }
        Ok(())
    }

    async fn unsubscribe(&self, channel: &str) -> CacheResult<()> {
        let task = self.subscriptions.lock().remove(channel);
        if let Some(task) = task {
            task.abort();
            debug!(channel, "Unsubscribed from bus channel");
        }
        Ok(())
    }

    fn on_reconnect(&self, callback: ReconnectCallback) {
        self.shared.reconnect_callbacks.write().push(callback);
    }

    async fn disconnect(&self) -> CacheResult<()> {
        self.abort_all();
        info!("Redis bus transport disconnected");
        Ok(())
    }
}

impl Drop for RedisTransport {
    fn drop(&mut self) {
        self.abort_all();
    }
}
