//! Cache 驱动 trait 定义

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use strata_errors::CacheResult;

/// 键的物理存活状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyTtl {
    /// 键不存在（或已过期）
    Missing,
    /// 存在且没有过期时间
    Persistent,
    /// 存在，剩余时间
    Expires(Duration),
}

impl KeyTtl {
    pub fn exists(&self) -> bool {
        !matches!(self, Self::Missing)
    }

    /// 重写记录时使用的 TTL；键不存在时为 None
    pub fn rewrite_ttl(&self) -> Option<Option<Duration>> {
        match self {
            Self::Missing => None,
            Self::Persistent => Some(None),
            Self::Expires(remaining) => Some(Some(*remaining)),
        }
    }
}

/// 缓存驱动 trait
///
/// 本地层与远程层都通过它访问后端；值是已序列化的条目文本
#[cfg_attr(feature = "mock", mockall::automock)]
#[async_trait]
pub trait CacheDriver: Send + Sync {
    /// 获取缓存值
    async fn get(&self, key: &str) -> CacheResult<Option<String>>;

    /// 设置缓存值，`ttl` 为 None 表示永不过期
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> CacheResult<()>;

    /// 删除缓存，返回键是否存在
    async fn delete(&self, key: &str) -> CacheResult<bool>;

    /// 批量删除
    async fn delete_many(&self, keys: &[String]) -> CacheResult<bool>;

    /// 检查是否存在（物理存在，不关心逻辑过期）
    async fn has(&self, key: &str) -> CacheResult<bool>;

    /// 剩余物理 TTL
    async fn remaining_ttl(&self, key: &str) -> CacheResult<KeyTtl>;

    /// 清空当前命名空间
    async fn clear(&self) -> CacheResult<()>;

    /// 返回带前缀的子命名空间驱动
    fn namespace(&self, prefix: &str) -> Arc<dyn CacheDriver>;

    /// 断开连接
    async fn disconnect(&self) -> CacheResult<()>;
}

/// 拼接命名空间前缀与键
pub fn join_key(prefix: &str, key: &str) -> String {
    if prefix.is_empty() {
        key.to_string()
    } else {
        format!("{}:{}", prefix, key)
    }
}
