//! 按键加锁（防击穿）
//!
//! 粗粒度锁只在创建/移除表项时持有，真正的临界区由每个键自己的 tokio Mutex 仲裁；
//! 最后一个持有者释放时删除表项，空闲的键不占内存

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use strata_errors::{CacheError, CacheResult};
use tokio::sync::{Mutex as KeyMutex, OwnedMutexGuard};

type LockMap = Arc<Mutex<HashMap<String, Arc<KeyMutex<()>>>>>;

/// 键锁管理器
#[derive(Clone, Default)]
pub struct Locks {
    inner: LockMap,
}

impl Locks {
    pub fn new() -> Self {
        Self::default()
    }

    fn entry(&self, key: &str) -> Arc<KeyMutex<()>> {
        let mut map = self.inner.lock();
        map.entry(key.to_string()).or_default().clone()
    }

    /// 获取键锁，`timeout` 到期返回 `LockTimeout`
    pub async fn acquire(&self, key: &str, timeout: Option<Duration>) -> CacheResult<LockHandle> {
        let mutex = self.entry(key);

        let guard = match timeout {
            Some(timeout) => {
                match tokio::time::timeout(timeout, mutex.clone().lock_owned()).await {
                    Ok(guard) => guard,
                    Err(_) => {
                        release_entry(&self.inner, key, mutex);
                        return Err(CacheError::lock_timeout(key, timeout));
                    }
                }
            }
            None => mutex.clone().lock_owned().await,
        };
        drop(mutex);

        Ok(LockHandle {
            key: key.to_string(),
            guard: Some(guard),
            map: self.inner.clone(),
        })
    }

    /// 非阻塞获取；已被占用返回 None
    pub fn try_acquire(&self, key: &str) -> Option<LockHandle> {
        let mutex = self.entry(key);
        match mutex.clone().try_lock_owned() {
            Ok(guard) => {
                drop(mutex);
                Some(LockHandle {
                    key: key.to_string(),
                    guard: Some(guard),
                    map: self.inner.clone(),
                })
            }
            Err(_) => {
                release_entry(&self.inner, key, mutex);
                None
            }
        }
    }

    /// 当前表中的键数
    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// 在粗粒度锁内放下本方引用，没有其它持有者时移除表项
fn release_entry(map: &LockMap, key: &str, mutex: Arc<KeyMutex<()>>) {
    let mut map = map.lock();
    drop(mutex);
    if map.get(key).is_some_and(|m| Arc::strong_count(m) == 1) {
        map.remove(key);
    }
}

/// 持有中的键锁，drop 即释放
pub struct LockHandle {
    key: String,
    guard: Option<OwnedMutexGuard<()>>,
    map: LockMap,
}

impl LockHandle {
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn release(self) {}
}

impl Drop for LockHandle {
    fn drop(&mut self) {
        let mut map = self.map.lock();
        self.guard.take();
        if map.get(&self.key).is_some_and(|m| Arc::strong_count(m) == 1) {
            map.remove(&self.key);
        }
    }
}

impl std::fmt::Debug for LockHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockHandle").field("key", &self.key).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_release_removes_entry() {
        let locks = Locks::new();
        let handle = locks.acquire("k", None).await.unwrap();
        assert_eq!(locks.len(), 1);

        handle.release();
        assert!(locks.is_empty());
    }

    #[tokio::test]
    async fn test_timeout_while_held() {
        let locks = Locks::new();
        let _held = locks.acquire("k", None).await.unwrap();

        let result = locks.acquire("k", Some(Duration::from_millis(30))).await;
        assert!(matches!(result, Err(CacheError::LockTimeout { .. })));
        // 超时方不会留下额外表项
        assert_eq!(locks.len(), 1);
    }

    #[tokio::test]
    async fn test_try_acquire() {
        let locks = Locks::new();
        let held = locks.try_acquire("k").unwrap();
        assert!(locks.try_acquire("k").is_none());

        drop(held);
        assert!(locks.is_empty());
        assert!(locks.try_acquire("k").is_some());
    }

    #[tokio::test]
    async fn test_mutual_exclusion() {
        let locks = Locks::new();
        let active = Arc::new(AtomicUsize::new(0));
        let max_active = Arc::new(AtomicUsize::new(0));

        let tasks: Vec<_> = (0..10)
            .map(|_| {
                let locks = locks.clone();
                let active = active.clone();
                let max_active = max_active.clone();
                tokio::spawn(async move {
                    let _handle = locks.acquire("shared", None).await.unwrap();
                    let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                    max_active.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(2)).await;
                    active.fetch_sub(1, Ordering::SeqCst);
                })
            })
            .collect();

        for task in tasks {
            task.await.unwrap();
        }

        assert_eq!(max_active.load(Ordering::SeqCst), 1);
        assert!(locks.is_empty());
    }

    #[tokio::test]
    async fn test_independent_keys() {
        let locks = Locks::new();
        let _a = locks.acquire("a", None).await.unwrap();
        let b = locks.acquire("b", Some(Duration::from_millis(10))).await;
        assert!(b.is_ok());
    }
}
