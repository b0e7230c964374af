//! 具名缓存的公开 API

use std::future::Future;

use futures::FutureExt;
use serde::Serialize;
use serde_json::Value;
use strata_errors::{BoxError, CacheResult};
use tokio::sync::broadcast;

use crate::events::CacheEvent;
use crate::factory::{CacheValue, FactoryContext, FactoryOutcome};
use crate::options::RawEntryOptions;
use crate::stack::CacheStack;

/// 具名缓存
#[derive(Clone)]
pub struct Cache {
    stack: CacheStack,
}

impl Cache {
    pub fn new(stack: CacheStack) -> Self {
        Self { stack }
    }

    pub fn name(&self) -> &str {
        self.stack.name()
    }

    /// 当前命名空间前缀（根为空）
    pub fn prefix(&self) -> &str {
        self.stack.prefix()
    }

    pub fn stack(&self) -> &CacheStack {
        &self.stack
    }

    /// 获取缓存值
    pub async fn get<T: CacheValue>(&self, key: &str) -> CacheResult<Option<T>> {
        self.get_with(key, RawEntryOptions::default()).await
    }

    pub async fn get_with<T: CacheValue>(
        &self,
        key: &str,
        options: RawEntryOptions,
    ) -> CacheResult<Option<T>> {
        let options = self.stack.resolve(&options);
        self.stack.get(key, &options).await
    }

    /// 读穿，工厂返回 `Result`
    pub async fn get_or_set<T, F, Fut, E>(
        &self,
        key: &str,
        factory: F,
        options: RawEntryOptions,
    ) -> CacheResult<T>
    where
        T: CacheValue,
        F: FnOnce(FactoryContext<T>) -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        E: Into<BoxError> + 'static,
    {
        self.get_or_set_with(
            key,
            move |ctx| factory(ctx).map(FactoryOutcome::from),
            options,
        )
        .await
    }

    /// 读穿，工厂返回 `FactoryOutcome`（可跳过缓存或显式失败）
    pub async fn get_or_set_with<T, F, Fut>(
        &self,
        key: &str,
        factory: F,
        options: RawEntryOptions,
    ) -> CacheResult<T>
    where
        T: CacheValue,
        F: FnOnce(FactoryContext<T>) -> Fut + Send + 'static,
        Fut: Future<Output = FactoryOutcome<T>> + Send + 'static,
    {
        let options = self.stack.resolve(&options);
        self.stack.get_or_set(key, factory, options).await
    }

    pub async fn get_or_set_forever<T, F, Fut, E>(
        &self,
        key: &str,
        factory: F,
        options: RawEntryOptions,
    ) -> CacheResult<T>
    where
        T: CacheValue,
        F: FnOnce(FactoryContext<T>) -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        E: Into<BoxError> + 'static,
    {
        self.get_or_set(key, factory, options.forever()).await
    }

    /// 写入缓存值
    pub async fn set<T: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &T,
        options: RawEntryOptions,
    ) -> CacheResult<()> {
        let options = self.stack.resolve(&options);
        self.stack.write(key, value, &options).await
    }

    pub async fn set_forever<T: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &T,
        options: RawEntryOptions,
    ) -> CacheResult<()> {
        self.set(key, value, options.forever()).await
    }

    /// 是否存在可返回的值（遵循宽限期规则）
    pub async fn has(&self, key: &str) -> CacheResult<bool> {
        Ok(self.get::<Value>(key).await?.is_some())
    }

    pub async fn missing(&self, key: &str) -> CacheResult<bool> {
        Ok(!self.has(key).await?)
    }

    /// 读取后删除
    pub async fn pull<T: CacheValue>(&self, key: &str) -> CacheResult<Option<T>> {
        let value = self.get::<T>(key).await?;
        self.delete(key).await?;
        Ok(value)
    }

    /// 删除缓存
    pub async fn delete(&self, key: &str) -> CacheResult<bool> {
        let options = self.stack.resolve(&RawEntryOptions::default());
        self.stack.delete(key, &options).await
    }

    pub async fn delete_many<I, S>(&self, keys: I) -> CacheResult<bool>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let keys: Vec<String> = keys.into_iter().map(Into::into).collect();
        let options = self.stack.resolve(&RawEntryOptions::default());
        self.stack.delete_many(&keys, &options).await
    }

    /// 逻辑过期：值仍可作为宽限值返回
    pub async fn expire(&self, key: &str) -> CacheResult<bool> {
        let options = self.stack.resolve(&RawEntryOptions::default());
        self.stack.expire(key, &options).await
    }

    /// 清空当前命名空间
    pub async fn clear(&self) -> CacheResult<()> {
        let options = self.stack.resolve(&RawEntryOptions::default());
        self.stack.clear(&options).await
    }

    /// 让带有任一标签的条目失效
    pub async fn delete_by_tag<I, S>(&self, tags: I) -> CacheResult<()>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let tags: Vec<String> = tags.into_iter().map(Into::into).collect();
        self.stack.invalidate_tags(&tags).await
    }

    pub fn namespace(&self, prefix: &str) -> Self {
        Self {
            stack: self.stack.namespace(prefix),
        }
    }

    pub async fn disconnect(&self) -> CacheResult<()> {
        self.stack.disconnect().await
    }

    /// 订阅缓存事件
    pub fn events(&self) -> broadcast::Receiver<CacheEvent> {
        self.stack.emitter().subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::Emitter;
    use crate::facade::LocalCache;
    use std::sync::Arc;
    use std::time::Duration;
    use strata_adapter_memory::MemoryDriver;

    fn cache() -> Cache {
        Cache::new(CacheStack::new(
            "default",
            Some(LocalCache::new(Arc::new(MemoryDriver::default()), "default")),
            None,
            None,
            RawEntryOptions::new().ttl(Duration::from_secs(60)),
            Emitter::default(),
        ))
    }

    #[tokio::test]
    async fn test_basic_operations() {
        let cache = cache();
        cache.set("a", &1u32, RawEntryOptions::new()).await.unwrap();
        assert!(cache.has("a").await.unwrap());
        assert!(cache.missing("b").await.unwrap());

        assert_eq!(cache.pull::<u32>("a").await.unwrap(), Some(1));
        assert!(cache.missing("a").await.unwrap());
    }

    #[tokio::test]
    async fn test_get_or_set_with_result_factory() {
        let cache = cache();
        let value = cache
            .get_or_set("k", |ctx| async move {
                assert_eq!(ctx.key, "k");
                assert!(ctx.graced.is_none());
                Ok::<_, BoxError>("computed".to_string())
            }, RawEntryOptions::new())
            .await
            .unwrap();
        assert_eq!(value, "computed");
        assert_eq!(cache.get::<String>("k").await.unwrap().as_deref(), Some("computed"));
    }

    #[tokio::test]
    async fn test_delete_many_and_clear() {
        let cache = cache();
        for key in ["a", "b", "c"] {
            cache.set(key, &key, RawEntryOptions::new()).await.unwrap();
        }

        assert!(cache.delete_many(["a", "b"]).await.unwrap());
        assert!(cache.missing("a").await.unwrap());
        assert!(cache.has("c").await.unwrap());

        cache.clear().await.unwrap();
        assert!(cache.missing("c").await.unwrap());
    }

    #[tokio::test]
    async fn test_namespaces_are_isolated() {
        let cache = cache();
        let users = cache.namespace("users");
        let posts = cache.namespace("posts");

        users.set("1", &"alice", RawEntryOptions::new()).await.unwrap();
        posts.set("1", &"hello", RawEntryOptions::new()).await.unwrap();
        assert_eq!(users.prefix(), "users");

        users.clear().await.unwrap();
        assert!(users.missing("1").await.unwrap());
        assert_eq!(posts.get::<String>("1").await.unwrap().as_deref(), Some("hello"));
        assert_eq!(cache.get::<String>("posts:1").await.unwrap().as_deref(), Some("hello"));
    }

    #[tokio::test]
    async fn test_events_are_emitted() {
        let cache = cache();
        let mut events = cache.events();

        cache.set("k", &1u32, RawEntryOptions::new()).await.unwrap();
        let event = events.recv().await.unwrap();
        assert!(matches!(event, CacheEvent::Written { ref key, .. } if key == "k"));
    }
}
