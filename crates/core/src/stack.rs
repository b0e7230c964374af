//! 缓存栈
//!
//! 一个具名缓存的本地层、远程层和总线，以及统一的写路径：
//! 本地 -> 远程 -> 总线通知 -> 事件

use std::sync::Arc;

use serde::Serialize;
use strata_errors::{CacheError, CacheResult};
use strata_ports::{BusMessage, join_key};
use tracing::debug;

use crate::bus::Bus;
use crate::entry::CacheEntry;
use crate::events::{CacheEvent, Emitter};
use crate::facade::{LocalCache, RemoteCache};
use crate::locks::Locks;
use crate::options::{EntryOptions, RawEntryOptions};

#[derive(Clone)]
pub struct CacheStack {
    name: Arc<str>,
    prefix: String,
    l1: Option<LocalCache>,
    l2: Option<RemoteCache>,
    bus: Option<Arc<Bus>>,
    defaults: RawEntryOptions,
    locks: Locks,
    emitter: Emitter,
}

impl CacheStack {
    pub fn new(
        name: impl Into<Arc<str>>,
        l1: Option<LocalCache>,
        l2: Option<RemoteCache>,
        bus: Option<Arc<Bus>>,
        defaults: RawEntryOptions,
        emitter: Emitter,
    ) -> Self {
        Self {
            name: name.into(),
            prefix: String::new(),
            l1,
            l2,
            bus,
            defaults,
            locks: Locks::new(),
            emitter,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn l1(&self) -> Option<&LocalCache> {
        self.l1.as_ref()
    }

    pub fn l2(&self) -> Option<&RemoteCache> {
        self.l2.as_ref()
    }

    pub fn bus(&self) -> Option<&Arc<Bus>> {
        self.bus.as_ref()
    }

    pub fn locks(&self) -> &Locks {
        &self.locks
    }

    pub fn emitter(&self) -> &Emitter {
        &self.emitter
    }

    /// 相对根命名空间的完整键（锁与总线消息使用）
    pub fn full_key(&self, key: &str) -> String {
        join_key(&self.prefix, key)
    }

    /// 以本栈默认值为底解析调用点选项
    pub fn resolve(&self, call: &RawEntryOptions) -> EntryOptions {
        EntryOptions::resolve(&self.defaults.merge(call))
    }

    /// 子命名空间：共享总线、锁表与事件通道
    pub fn namespace(&self, prefix: &str) -> Self {
        Self {
            name: self.name.clone(),
            prefix: join_key(&self.prefix, prefix),
            l1: self.l1.as_ref().map(|l1| l1.namespace(prefix)),
            l2: self.l2.as_ref().map(|l2| l2.namespace(prefix)),
            bus: self.bus.clone(),
            defaults: self.defaults.clone(),
            locks: self.locks.clone(),
            emitter: self.emitter.clone(),
        }
    }

    pub(crate) fn emit(&self, event: CacheEvent) {
        self.emitter.emit(event);
    }

    async fn notify(&self, message: BusMessage, options: &EntryOptions) {
        if options.skip_bus_notify {
            return;
        }
        if let Some(bus) = &self.bus {
            bus.publish(message).await;
        }
    }

    /// 写路径：校验 -> 本地 -> 远程 -> 总线 -> 事件
    pub async fn write<T: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &T,
        options: &EntryOptions,
    ) -> CacheResult<()> {
        let value = serde_json::to_value(value)?;
        if value.is_null() {
            return Err(CacheError::undefined_value(key));
        }
        if let Some(validator) = &options.validator {
            validator(&value).map_err(CacheError::validation)?;
        }

        let entry = CacheEntry::new(key, value, options);
        let raw = entry.serialize()?;

        if let Some(l1) = &self.l1 {
            l1.set(key, &raw, options).await?;
        }
        if let Some(l2) = &self.l2 {
            if !options.skip_l2_write {
                l2.set(key, &raw, options).await?;
            }
        }

        self.notify(BusMessage::set(vec![self.full_key(key)]), options)
            .await;

        debug!(cache = %self.name, key, op_id = %options.id, "Entry written");
        self.emit(CacheEvent::Written {
            cache: self.name.to_string(),
            key: self.full_key(key),
        });
        Ok(())
    }

    pub async fn delete(&self, key: &str, options: &EntryOptions) -> CacheResult<bool> {
        let mut deleted = false;
        if let Some(l1) = &self.l1 {
            deleted |= l1.delete(key).await?;
        }
        if let Some(l2) = &self.l2 {
            deleted |= l2.delete(key, options).await?;
        }

        self.notify(BusMessage::delete(vec![self.full_key(key)]), options)
            .await;
        self.emit(CacheEvent::Deleted {
            cache: self.name.to_string(),
            key: self.full_key(key),
        });
        Ok(deleted)
    }

    pub async fn delete_many(&self, keys: &[String], options: &EntryOptions) -> CacheResult<bool> {
        if keys.is_empty() {
            return Ok(false);
        }

        let mut deleted = false;
        if let Some(l1) = &self.l1 {
            deleted |= l1.delete_many(keys).await?;
        }
        if let Some(l2) = &self.l2 {
            deleted |= l2.delete_many(keys, options).await?;
        }

        let full_keys: Vec<String> = keys.iter().map(|k| self.full_key(k)).collect();
        for key in &full_keys {
            self.emit(CacheEvent::Deleted {
                cache: self.name.to_string(),
                key: key.clone(),
            });
        }
        self.notify(BusMessage::delete(full_keys), options).await;
        Ok(deleted)
    }

    /// 逻辑过期：两层保留物理记录（宽限期仍可用），并通知其它实例
    pub async fn expire(&self, key: &str, options: &EntryOptions) -> CacheResult<bool> {
        let mut expired = false;
        if let Some(l1) = &self.l1 {
            expired |= l1.logically_expire(key).await?;
        }
        if let Some(l2) = &self.l2 {
            expired |= l2.logically_expire(key, options).await?;
        }

        self.notify(BusMessage::set(vec![self.full_key(key)]), options)
            .await;
        self.emit(CacheEvent::Expired {
            cache: self.name.to_string(),
            key: self.full_key(key),
        });
        Ok(expired)
    }

    pub async fn clear(&self, options: &EntryOptions) -> CacheResult<()> {
        if let Some(l1) = &self.l1 {
            l1.clear().await?;
        }
        if let Some(l2) = &self.l2 {
            l2.clear(options).await?;
        }

        self.notify(BusMessage::clear(&self.prefix), options).await;
        self.emit(CacheEvent::Cleared {
            cache: self.name.to_string(),
        });
        Ok(())
    }

    /// 回退续期：刷新失败时把旧值的逻辑过期时间向后推，物理 TTL 不变
    pub(crate) async fn apply_fallback<T: Serialize + Sync>(
        &self,
        key: &str,
        mut entry: CacheEntry<T>,
        options: &EntryOptions,
    ) -> CacheResult<()> {
        entry.apply_fallback_duration(options.grace.fallback_duration);
        let mut rewritten = false;
        if let Some(l1) = &self.l1 {
            rewritten |= l1.rewrite_preserving_ttl(key, &entry).await?;
        }
        if let Some(l2) = &self.l2 {
            rewritten |= l2.rewrite_preserving_ttl(key, &entry, options).await?;
        }
        if !rewritten {
            return Ok(());
        }
        debug!(
            cache = %self.name,
            key,
            fallback_ms = options.grace.fallback_duration.as_millis() as u64,
            "Extended stale entry after failed refresh"
        );
        Ok(())
    }

    pub async fn disconnect(&self) -> CacheResult<()> {
        if let Some(bus) = &self.bus {
            bus.disconnect().await?;
        }
        if let Some(l1) = &self.l1 {
            l1.disconnect().await?;
        }
        if let Some(l2) = &self.l2 {
            l2.disconnect().await?;
        }
        Ok(())
    }
}
