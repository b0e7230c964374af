mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use common::{local_only, remote_only, settle, two_tier};
use strata_adapter_memory::MemoryDriver;
use strata_core::{BoxError, CacheError, FactoryContext, FactoryOutcome, RawEntryOptions};

#[tokio::test]
async fn test_concurrent_callers_share_one_factory_run() {
    let manager = local_only(RawEntryOptions::new()).await;
    let calls = Arc::new(AtomicUsize::new(0));

    let tasks: Vec<_> = (0..10)
        .map(|_| {
            let cache = manager.cache().clone();
            let calls = calls.clone();
            tokio::spawn(async move {
                cache
                    .get_or_set(
                        "hot",
                        move |_| async move {
                            calls.fetch_add(1, Ordering::SeqCst);
                            tokio::time::sleep(Duration::from_millis(50)).await;
                            Ok::<_, BoxError>(42u32)
                        },
                        RawEntryOptions::new(),
                    )
                    .await
            })
        })
        .collect();

    for task in tasks {
        assert_eq!(task.await.unwrap().unwrap(), 42);
    }
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(manager.cache().stack().locks().is_empty());
}

#[tokio::test]
async fn test_early_expiration_refreshes_in_background() {
    let manager = local_only(
        RawEntryOptions::new()
            .ttl(Duration::from_millis(400))
            .early_expiration(0.5),
    )
    .await;
    let cache = manager.cache();
    let calls = Arc::new(AtomicUsize::new(0));

    let refresh = |calls: &Arc<AtomicUsize>| {
        let calls = calls.clone();
        move |_: FactoryContext<u32>| async move {
            calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(50)).await;
            Ok::<_, BoxError>(2u32)
        }
    };

    cache
        .get_or_set("k", |_| async { Ok::<_, BoxError>(1u32) }, RawEntryOptions::new())
        .await
        .unwrap();

    // 提前过期窗口之前：不刷新
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(cache.get_or_set("k", refresh(&calls), RawEntryOptions::new()).await.unwrap(), 1);
    settle().await;
    assert_eq!(calls.load(Ordering::SeqCst), 0);

    // 窗口之内：立即返回旧值，只触发一次后台刷新
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(cache.get_or_set("k", refresh(&calls), RawEntryOptions::new()).await.unwrap(), 1);
    assert_eq!(cache.get_or_set("k", refresh(&calls), RawEntryOptions::new()).await.unwrap(), 1);

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(cache.get::<u32>("k").await.unwrap(), Some(2));
}

#[tokio::test]
async fn test_grace_period_fallback() {
    let manager = local_only(
        RawEntryOptions::new()
            .ttl(Duration::from_millis(50))
            .grace(Duration::from_millis(400))
            .grace_backoff(Duration::from_millis(100)),
    )
    .await;
    let cache = manager.cache();
    let failures = Arc::new(AtomicUsize::new(0));

    let failing = |failures: &Arc<AtomicUsize>| {
        let failures = failures.clone();
        move |_: FactoryContext<u32>| async move {
            failures.fetch_add(1, Ordering::SeqCst);
            Err::<u32, BoxError>("database unavailable".into())
        }
    };

    cache
        .get_or_set("k", |_| async { Ok::<_, BoxError>(1u32) }, RawEntryOptions::new())
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(80)).await;

    // 刷新失败，返回旧值并续期
    assert_eq!(cache.get_or_set("k", failing(&failures), RawEntryOptions::new()).await.unwrap(), 1);
    assert_eq!(failures.load(Ordering::SeqCst), 1);

    // 续期窗口内不会再次触发工厂
    assert_eq!(cache.get_or_set("k", failing(&failures), RawEntryOptions::new()).await.unwrap(), 1);
    assert_eq!(failures.load(Ordering::SeqCst), 1);

    // 宽限期结束后物理记录消失，失败向上传递
    tokio::time::sleep(Duration::from_millis(400)).await;
    let result = cache
        .get_or_set("k", failing(&failures), RawEntryOptions::new())
        .await;
    assert!(matches!(result, Err(CacheError::Factory { background: false, .. })));
}

#[tokio::test]
async fn test_soft_timeout_returns_stale_value() {
    let manager = local_only(
        RawEntryOptions::new()
            .ttl(Duration::from_millis(50))
            .grace(Duration::from_secs(10)),
    )
    .await;
    let cache = manager.cache();

    cache.set("k", &1u32, RawEntryOptions::new()).await.unwrap();
    tokio::time::sleep(Duration::from_millis(80)).await;

    let started = Instant::now();
    let value = cache
        .get_or_set(
            "k",
            |ctx| async move {
                assert_eq!(ctx.graced, Some(1));
                tokio::time::sleep(Duration::from_millis(300)).await;
                Ok::<_, BoxError>(2u32)
            },
            RawEntryOptions::new().timeout(Duration::from_millis(100)),
        )
        .await
        .unwrap();

    assert_eq!(value, 1);
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_millis(90), "{:?}", elapsed);
    assert!(elapsed < Duration::from_millis(250), "{:?}", elapsed);

    // 后台完成后覆盖缓存
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(cache.get::<u32>("k").await.unwrap(), Some(2));
}

#[tokio::test]
async fn test_hard_timeout_without_stale_value() {
    let manager = local_only(RawEntryOptions::new()).await;
    let cache = manager.cache();

    let started = Instant::now();
    let result = cache
        .get_or_set(
            "k",
            |_| async {
                tokio::time::sleep(Duration::from_millis(300)).await;
                Ok::<_, BoxError>(2u32)
            },
            RawEntryOptions::new().hard_timeout(Duration::from_millis(100)),
        )
        .await;

    assert!(matches!(result, Err(CacheError::FactoryHardTimeout { .. })));
    assert!(started.elapsed() < Duration::from_millis(250));

    // 锁随工厂结束才释放
    assert_eq!(cache.stack().locks().len(), 1);
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(cache.stack().locks().is_empty());
    assert_eq!(cache.get::<u32>("k").await.unwrap(), Some(2));
}

#[tokio::test]
async fn test_skip_returns_value_without_caching() {
    let manager = local_only(RawEntryOptions::new()).await;
    let cache = manager.cache();
    let calls = Arc::new(AtomicUsize::new(0));

    for _ in 0..2 {
        let calls = calls.clone();
        let value = cache
            .get_or_set_with(
                "k",
                move |_| async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    FactoryOutcome::Skip("uncached".to_string())
                },
                RawEntryOptions::new(),
            )
            .await
            .unwrap();
        assert_eq!(value, "uncached");
    }

    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert!(cache.missing("k").await.unwrap());
}

#[tokio::test]
async fn test_fail_outcome_uses_grace_rules() {
    let manager = local_only(
        RawEntryOptions::new()
            .ttl(Duration::from_millis(30))
            .grace(Duration::from_secs(10)),
    )
    .await;
    let cache = manager.cache();

    cache.set("k", &"stale", RawEntryOptions::new()).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    let value = cache
        .get_or_set_with(
            "k",
            |_| async { FactoryOutcome::<String>::Fail("upstream 503".into()) },
            RawEntryOptions::new(),
        )
        .await
        .unwrap();
    assert_eq!(value, "stale");
}

#[tokio::test]
async fn test_background_factory_errors_reach_callback() {
    let manager = local_only(
        RawEntryOptions::new()
            .ttl(Duration::from_millis(200))
            .early_expiration(0.5),
    )
    .await;
    let cache = manager.cache();
    let background = Arc::new(AtomicBool::new(false));

    cache.set("k", &1u32, RawEntryOptions::new()).await.unwrap();
    tokio::time::sleep(Duration::from_millis(120)).await;

    let flag = background.clone();
    let value = cache
        .get_or_set(
            "k",
            |_| async { Err::<u32, BoxError>("refresh failed".into()) },
            RawEntryOptions::new().on_factory_error(move |e| {
                if e.is_background() {
                    flag.store(true, Ordering::SeqCst);
                }
            }),
        )
        .await
        .unwrap();
    assert_eq!(value, 1);

    settle().await;
    assert!(background.load(Ordering::SeqCst));
}

#[tokio::test]
async fn test_forever_entries() {
    let manager = local_only(RawEntryOptions::new().ttl(Duration::from_millis(30))).await;
    let cache = manager.cache();

    cache
        .get_or_set_forever("config", |_| async { Ok::<_, BoxError>(7u32) }, RawEntryOptions::new())
        .await
        .unwrap();
    cache.set_forever("flag", &true, RawEntryOptions::new()).await.unwrap();

    tokio::time::sleep(Duration::from_millis(60)).await;
    assert_eq!(cache.get::<u32>("config").await.unwrap(), Some(7));
    assert_eq!(cache.get::<bool>("flag").await.unwrap(), Some(true));
}

#[tokio::test]
async fn test_tag_invalidation() {
    let manager = local_only(RawEntryOptions::new()).await;
    let cache = manager.cache();
    let calls = Arc::new(AtomicUsize::new(0));

    let load = |calls: &Arc<AtomicUsize>| {
        let calls = calls.clone();
        move |_: FactoryContext<u32>| async move {
            let n = calls.fetch_add(1, Ordering::SeqCst) as u32;
            Ok::<_, BoxError>(n)
        }
    };

    let tagged = || RawEntryOptions::new().tags(["users"]);
    assert_eq!(cache.get_or_set("user:1", load(&calls), tagged()).await.unwrap(), 0);
    assert_eq!(cache.get_or_set("user:1", load(&calls), tagged()).await.unwrap(), 0);

    tokio::time::sleep(Duration::from_millis(2)).await;
    cache.delete_by_tag(["users"]).await.unwrap();
    assert_eq!(cache.get::<u32>("user:1").await.unwrap(), None);
    assert_eq!(cache.get_or_set("user:1", load(&calls), tagged()).await.unwrap(), 1);
}

#[tokio::test]
async fn test_one_tier_stampede_and_expire() {
    let l2 = Arc::new(MemoryDriver::default());
    let manager = remote_only(l2, RawEntryOptions::new().grace(Duration::from_secs(10))).await;
    let cache = manager.cache();

    cache.set("k", &1u32, RawEntryOptions::new()).await.unwrap();
    assert!(cache.expire("k").await.unwrap());

    // 逻辑过期后仍可作为宽限值读取
    assert_eq!(cache.get::<u32>("k").await.unwrap(), Some(1));

    let value = cache
        .get_or_set("k", |_| async { Ok::<_, BoxError>(2u32) }, RawEntryOptions::new())
        .await
        .unwrap();
    assert_eq!(value, 2);
}

#[tokio::test]
async fn test_waiter_gets_stale_value_within_soft_timeout() {
    let manager = local_only(
        RawEntryOptions::new()
            .ttl(Duration::from_millis(30))
            .grace(Duration::from_secs(10))
            .timeout(Duration::from_millis(100)),
    )
    .await;
    manager.cache().set("k", &1u32, RawEntryOptions::new()).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    let slow = |_: FactoryContext<u32>| async {
        tokio::time::sleep(Duration::from_millis(600)).await;
        Ok::<_, BoxError>(2u32)
    };

    let first = {
        let cache = manager.cache().clone();
        tokio::spawn(async move { cache.get_or_set("k", slow, RawEntryOptions::new()).await })
    };
    // 第一个调用方先拿到锁
    tokio::time::sleep(Duration::from_millis(10)).await;

    let started = Instant::now();
    let second = manager
        .cache()
        .get_or_set("k", slow, RawEntryOptions::new())
        .await
        .unwrap();
    let waited = started.elapsed();

    assert_eq!(second, 1);
    assert!(waited < Duration::from_millis(400), "{:?}", waited);
    assert_eq!(first.await.unwrap().unwrap(), 1);
}

#[tokio::test]
async fn test_waiter_times_out_without_stale_value() {
    let manager = local_only(RawEntryOptions::new().hard_timeout(Duration::from_millis(100))).await;
    let cache = manager.cache();

    let slow = |_: FactoryContext<u32>| async {
        tokio::time::sleep(Duration::from_millis(600)).await;
        Ok::<_, BoxError>(2u32)
    };

    let started = Instant::now();
    let first = cache.get_or_set("k", slow, RawEntryOptions::new()).await;
    assert!(matches!(first, Err(CacheError::FactoryHardTimeout { .. })));
    assert!(started.elapsed() < Duration::from_millis(250));

    // 被放弃的工厂仍持有锁，后来的调用方同样只等到硬超时
    let started = Instant::now();
    let second = cache.get_or_set("k", slow, RawEntryOptions::new()).await;
    let waited = started.elapsed();
    assert!(matches!(second, Err(CacheError::FactoryHardTimeout { .. })), "{:?}", second);
    assert!(waited < Duration::from_millis(250), "{:?}", waited);

    // 工厂结束后写入
    tokio::time::sleep(Duration::from_millis(600)).await;
    assert!(cache.stack().locks().is_empty());
    assert_eq!(cache.get::<u32>("k").await.unwrap(), Some(2));
}

#[tokio::test]
async fn test_two_tier_waiter_uses_remote_stale_value() {
    let l2 = Arc::new(MemoryDriver::default());
    let options = RawEntryOptions::new()
        .ttl(Duration::from_millis(30))
        .grace(Duration::from_secs(10))
        .timeout(Duration::from_millis(100));
    let writer = two_tier(l2.clone(), options.clone()).await;
    let reader = two_tier(l2.clone(), options).await;

    writer.cache().set("k", &1u32, RawEntryOptions::new()).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    let slow = |_: FactoryContext<u32>| async {
        tokio::time::sleep(Duration::from_millis(300)).await;
        Ok::<_, BoxError>(2u32)
    };

    // 读者的本地层为空，陈旧值只在远程层
    let first = {
        let cache = reader.cache().clone();
        tokio::spawn(async move { cache.get_or_set("k", slow, RawEntryOptions::new()).await })
    };
    tokio::time::sleep(Duration::from_millis(10)).await;

    let second = reader
        .cache()
        .get_or_set(
            "k",
            slow,
            RawEntryOptions::new().lock_timeout(Duration::from_millis(50)),
        )
        .await
        .unwrap();

    assert_eq!(second, 1);
    assert_eq!(first.await.unwrap().unwrap(), 1);
}

#[tokio::test]
async fn test_two_tier_grace_fallback_from_remote_only() {
    let l2 = Arc::new(MemoryDriver::default());
    let options = RawEntryOptions::new()
        .ttl(Duration::from_millis(50))
        .grace(Duration::from_millis(300));
    let writer = two_tier(l2.clone(), options.clone()).await;
    let reader = two_tier(l2.clone(), options).await;

    writer.cache().set("k", &1u32, RawEntryOptions::new()).await.unwrap();
    tokio::time::sleep(Duration::from_millis(80)).await;

    let failing = |_: FactoryContext<u32>| async {
        Err::<u32, BoxError>("database unavailable".into())
    };

    // 读者本地层没有记录：回退续期不能在本地层留下永不过期的记录
    assert_eq!(reader.cache().get_or_set("k", failing, RawEntryOptions::new()).await.unwrap(), 1);
    assert!(!reader.cache().stack().l1().unwrap().has("k").await.unwrap());

    // 宽限期结束后远程记录消失，失败向上传递
    tokio::time::sleep(Duration::from_millis(400)).await;
    let result = reader.cache().get_or_set("k", failing, RawEntryOptions::new()).await;
    assert!(matches!(result, Err(CacheError::Factory { background: false, .. })), "{:?}", result);
}
