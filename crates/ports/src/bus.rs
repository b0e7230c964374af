//! 失效总线契约
//!
//! 消息结构、编码器与传输层 trait

use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use strata_errors::CacheResult;

/// 总线消息类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BusMessageType {
    Set,
    Delete,
    Clear,
}

impl BusMessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Set => "set",
            Self::Delete => "delete",
            Self::Clear => "clear",
        }
    }
}

/// 总线消息
///
/// `Clear` 消息的 `keys` 只有一个元素：被清空的命名空间前缀（根命名空间为空列表）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BusMessage {
    pub bus_id: String,
    #[serde(rename = "type")]
    pub message_type: BusMessageType,
    pub keys: Vec<String>,
}

impl BusMessage {
    pub fn new(message_type: BusMessageType, keys: Vec<String>) -> Self {
        Self {
            bus_id: String::new(),
            message_type,
            keys,
        }
    }

    pub fn set(keys: Vec<String>) -> Self {
        Self::new(BusMessageType::Set, keys)
    }

    pub fn delete(keys: Vec<String>) -> Self {
        Self::new(BusMessageType::Delete, keys)
    }

    pub fn clear(namespace: &str) -> Self {
        let keys = if namespace.is_empty() {
            Vec::new()
        } else {
            vec![namespace.to_string()]
        };
        Self::new(BusMessageType::Clear, keys)
    }

    /// 设置发送方 ID
    pub fn with_bus_id(mut self, bus_id: impl Into<String>) -> Self {
        self.bus_id = bus_id.into();
        self
    }

    /// `Clear` 消息的命名空间前缀
    pub fn namespace(&self) -> &str {
        self.keys.first().map(String::as_str).unwrap_or("")
    }
}

/// 总线消息编码器（线上格式可插拔）
pub trait BusEncoder: Send + Sync {
    fn encode(&self, message: &BusMessage) -> CacheResult<Vec<u8>>;

    fn decode(&self, payload: &[u8]) -> CacheResult<BusMessage>;
}

/// 订阅回调
pub type BusHandler = Arc<dyn Fn(BusMessage) -> BoxFuture<'static, ()> + Send + Sync>;

/// 重连回调
pub type ReconnectCallback = Arc<dyn Fn() + Send + Sync>;

/// 总线传输层 trait
#[async_trait]
pub trait BusTransport: Send + Sync {
    /// 设置本实例 ID，传输层据此丢弃自己发出的消息
    fn set_id(&self, id: &str);

    /// 发布消息
    async fn publish(&self, channel: &str, message: &BusMessage) -> CacheResult<()>;

    /// 订阅频道
    async fn subscribe(&self, channel: &str, handler: BusHandler) -> CacheResult<()>;

    /// 取消订阅
    async fn unsubscribe(&self, channel: &str) -> CacheResult<()>;

    /// 注册重连回调（用于重放失败的消息）
    fn on_reconnect(&self, callback: ReconnectCallback);

    /// 断开连接
    async fn disconnect(&self) -> CacheResult<()>;
}
