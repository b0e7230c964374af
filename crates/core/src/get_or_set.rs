//! 读穿编排
//!
//! 有本地层时走两层流程（L1 -> 锁 -> L1 复查 -> L2 -> 工厂），
//! 只有远程层时走单层流程（L2 -> 锁 -> L2 复查 -> 工厂）

use std::future::Future;

use strata_errors::{CacheError, CacheResult};
use tracing::{debug, trace};

use crate::entry::CacheEntry;
use crate::events::{CacheEvent, Layer};
use crate::factory::{CacheValue, FactoryContext, FactoryOutcome, run_factory, spawn_factory};
use crate::locks::LockHandle;
use crate::options::EntryOptions;
use crate::stack::CacheStack;

impl CacheStack {
    /// 未逻辑过期且未被标签失效
    pub(crate) async fn is_fresh<T>(&self, entry: &CacheEntry<T>) -> CacheResult<bool> {
        if entry.is_logically_expired() {
            return Ok(false);
        }
        Ok(!self.is_tag_invalidated(entry).await?)
    }

    fn emit_hit(&self, key: &str, layer: Layer, graced: bool) {
        trace!(cache = %self.name(), key, layer = layer.as_str(), graced, "Cache hit");
        self.emit(CacheEvent::Hit {
            cache: self.name().to_string(),
            key: self.full_key(key),
            layer,
            graced,
        });
    }

    fn emit_miss(&self, key: &str) {
        self.emit(CacheEvent::Miss {
            cache: self.name().to_string(),
            key: self.full_key(key),
        });
    }

    /// 读取：L1 -> L2（回填 L1）-> 启用宽限期时的陈旧值
    pub async fn get<T: CacheValue>(&self, key: &str, options: &EntryOptions) -> CacheResult<Option<T>> {
        let local = match self.l1() {
            Some(l1) => l1.get::<T>(key).await?,
            None => None,
        };
        if let Some(entry) = &local {
            if self.is_fresh(entry).await? {
                self.emit_hit(key, Layer::L1, false);
                return Ok(Some(entry.value().clone()));
            }
        }

        let remote = match self.l2() {
            Some(l2) => l2.get::<T>(key, options).await?,
            None => None,
        };
        if let Some(entry) = &remote {
            if self.is_fresh(entry).await? {
                self.populate_l1(key, entry, options).await?;
                self.emit_hit(key, Layer::L2, false);
                return Ok(Some(entry.value().clone()));
            }
        }

        if options.grace.enabled {
            let graced = match (remote, local) {
                (Some(entry), _) => Some((entry, Layer::L2)),
                (None, Some(entry)) => Some((entry, Layer::L1)),
                (None, None) => None,
            };
            if let Some((entry, layer)) = graced {
                self.emit_hit(key, layer, true);
                return Ok(Some(entry.into_value()));
            }
        }

        self.emit_miss(key);
        Ok(None)
    }

    /// 读穿：命中返回，缺失或过期时在键锁保护下运行工厂
    pub async fn get_or_set<T, F, Fut>(
        &self,
        key: &str,
        factory: F,
        options: EntryOptions,
    ) -> CacheResult<T>
    where
        T: CacheValue,
        F: FnOnce(FactoryContext<T>) -> Fut + Send + 'static,
        Fut: Future<Output = FactoryOutcome<T>> + Send + 'static,
    {
        if self.l1().is_some() {
            self.get_or_set_two_tier(key, factory, options).await
        } else {
            self.get_or_set_one_tier(key, factory, options).await
        }
    }

    async fn get_or_set_two_tier<T, F, Fut>(
        &self,
        key: &str,
        factory: F,
        options: EntryOptions,
    ) -> CacheResult<T>
    where
        T: CacheValue,
        F: FnOnce(FactoryContext<T>) -> Fut + Send + 'static,
        Fut: Future<Output = FactoryOutcome<T>> + Send + 'static,
    {
        let Some(l1) = self.l1() else {
            return self.get_or_set_one_tier(key, factory, options).await;
        };

        let local = l1.get::<T>(key).await?;
        if let Some(entry) = &local {
            if self.is_fresh(entry).await? {
                self.emit_hit(key, Layer::L1, false);
                if entry.is_early_expired() {
                    self.refresh_early(key, factory, entry.clone(), options);
                }
                return Ok(entry.value().clone());
            }
        }

        let has_fallback = options.grace.enabled && local.is_some();
        let lock = match self.acquire_lock(key, &options, has_fallback).await {
            Ok(lock) => lock,
            Err(e) => {
                // 本地层没有陈旧值时，远程层的陈旧值同样可用
                let graced = match local {
                    Some(entry) => Some((entry, Layer::L1)),
                    None if options.grace.enabled => match self.l2() {
                        Some(l2) => l2.get::<T>(key, &options).await?.map(|entry| (entry, Layer::L2)),
                        None => None,
                    },
                    None => None,
                };
                return self.graced_or(key, graced, &options, e);
            }
        };

        // 等锁期间其它调用方可能已经写入
        let local = l1.get::<T>(key).await?;
        if let Some(entry) = &local {
            if self.is_fresh(entry).await? {
                drop(lock);
                self.emit_hit(key, Layer::L1, false);
                return Ok(entry.value().clone());
            }
        }

        let remote = match self.l2() {
            Some(l2) => l2.get::<T>(key, &options).await?,
            None => None,
        };
        if let Some(entry) = &remote {
            if self.is_fresh(entry).await? {
                self.populate_l1(key, entry, &options).await?;
                self.emit_hit(key, Layer::L2, false);
                let value = entry.value().clone();
                if entry.is_early_expired() {
                    // 持有的锁交给后台刷新
                    let _ = spawn_factory(self, key, factory, Some(entry.clone()), options, lock);
                } else {
                    drop(lock);
                }
                return Ok(value);
            }
        }

        self.emit_miss(key);
        let graced = if options.grace.enabled {
            remote.or(local)
        } else {
            None
        };
        run_factory(self, key, factory, graced, options, lock).await
    }

    async fn get_or_set_one_tier<T, F, Fut>(
        &self,
        key: &str,
        factory: F,
        options: EntryOptions,
    ) -> CacheResult<T>
    where
        T: CacheValue,
        F: FnOnce(FactoryContext<T>) -> Fut + Send + 'static,
        Fut: Future<Output = FactoryOutcome<T>> + Send + 'static,
    {
        let remote = match self.l2() {
            Some(l2) => l2.get::<T>(key, &options).await?,
            None => None,
        };
        if let Some(entry) = &remote {
            if self.is_fresh(entry).await? {
                self.emit_hit(key, Layer::L2, false);
                if entry.is_early_expired() {
                    self.refresh_early(key, factory, entry.clone(), options);
                }
                return Ok(entry.value().clone());
            }
        }

        let has_fallback = options.grace.enabled && remote.is_some();
        let lock = match self.acquire_lock(key, &options, has_fallback).await {
            Ok(lock) => lock,
            Err(e) => {
                let graced = remote.map(|entry| (entry, Layer::L2));
                return self.graced_or(key, graced, &options, e);
            }
        };

        let remote = match self.l2() {
            Some(l2) => l2.get::<T>(key, &options).await?,
            None => None,
        };
        if let Some(entry) = &remote {
            if self.is_fresh(entry).await? {
                drop(lock);
                self.emit_hit(key, Layer::L2, false);
                return Ok(entry.value().clone());
            }
        }

        self.emit_miss(key);
        let graced = if options.grace.enabled { remote } else { None };
        run_factory(self, key, factory, graced, options, lock).await
    }

    /// 提前过期：不阻塞调用方，已有刷新在进行时跳过
    fn refresh_early<T, F, Fut>(&self, key: &str, factory: F, current: CacheEntry<T>, options: EntryOptions)
    where
        T: CacheValue,
        F: FnOnce(FactoryContext<T>) -> Fut + Send + 'static,
        Fut: Future<Output = FactoryOutcome<T>> + Send + 'static,
    {
        let Some(lock) = self.locks().try_acquire(&self.full_key(key)) else {
            trace!(cache = %self.name(), key, "Early refresh already in flight");
            return;
        };

        debug!(cache = %self.name(), key, op_id = %options.id, "Entry early-expired, refreshing in background");
        let _ = spawn_factory(self, key, factory, Some(current), options, lock);
    }

    /// 等待键锁
    ///
    /// 未配置锁超时时，等待时长以本次调用的工厂超时为上限：持锁的工厂超时后仍在运行，
    /// 等待者拿到的是与持锁调用方相同的超时结果
    async fn acquire_lock(
        &self,
        key: &str,
        options: &EntryOptions,
        has_fallback: bool,
    ) -> CacheResult<LockHandle> {
        let wait = options
            .lock_timeout
            .or_else(|| options.factory_timeout(has_fallback));

        match self.locks().acquire(&self.full_key(key), wait).await {
            Err(e) if e.is_timeout() && options.lock_timeout.is_none() => {
                let waited = wait.unwrap_or_default();
                trace!(cache = %self.name(), key, waited_ms = waited.as_millis() as u64, "Gave up waiting for in-flight factory");
                if has_fallback {
                    Err(CacheError::soft_timeout(key, waited))
                } else {
                    Err(CacheError::hard_timeout(key, waited))
                }
            }
            other => other,
        }
    }

    /// 拿不到键锁时：有宽限值返回宽限值，否则返回错误
    fn graced_or<T: CacheValue>(
        &self,
        key: &str,
        graced: Option<(CacheEntry<T>, Layer)>,
        options: &EntryOptions,
        error: CacheError,
    ) -> CacheResult<T> {
        match graced {
            Some((entry, layer)) if options.grace.enabled => {
                debug!(cache = %self.name(), key, error = %error, "Lock unavailable, serving stale value");
                self.emit_hit(key, layer, true);
                Ok(entry.into_value())
            }
            _ => Err(error),
        }
    }

    /// 用远程层条目回填本地层，保留其过期元数据
    async fn populate_l1<T: CacheValue>(
        &self,
        key: &str,
        entry: &CacheEntry<T>,
        options: &EntryOptions,
    ) -> CacheResult<()> {
        if let Some(l1) = self.l1() {
            l1.set(key, &entry.serialize()?, options).await?;
        }
        Ok(())
    }
}
