//! 工厂执行
//!
//! 工厂在独立任务中运行，结果通过 oneshot 交回调用方。调用方只等待超时预算：
//! 超时后工厂继续在后台完成，写回与释放键锁都绑定在工厂结束时

use std::future::Future;

use serde::Serialize;
use serde::de::DeserializeOwned;
use strata_errors::{BoxError, CacheError, CacheResult};
use tokio::sync::oneshot;
use tracing::{debug, error, warn};

use crate::entry::CacheEntry;
use crate::events::{CacheEvent, Layer};
use crate::locks::LockHandle;
use crate::options::EntryOptions;
use crate::stack::CacheStack;

/// 工厂结果
#[derive(Debug)]
pub enum FactoryOutcome<T> {
    /// 写入缓存并返回
    Cache(T),
    /// 只返回给本次调用方，不写入也不通知
    Skip(T),
    /// 按失败处理（宽限期规则与抛错相同）
    Fail(BoxError),
}

impl<T, E: Into<BoxError>> From<Result<T, E>> for FactoryOutcome<T> {
    fn from(result: Result<T, E>) -> Self {
        match result {
            Ok(value) => Self::Cache(value),
            Err(e) => Self::Fail(e.into()),
        }
    }
}

/// 传给工厂的上下文
#[derive(Debug, Clone)]
pub struct FactoryContext<T> {
    pub key: String,
    /// 当前的陈旧值（启用宽限期时）
    pub graced: Option<T>,
}

/// 工厂可运行在后台任务中的约束
pub trait CacheValue: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {}

impl<T> CacheValue for T where T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {}

/// 启动工厂任务，返回结果接收端
///
/// 接收端被丢弃后任务仍会完成；此时失败按后台错误上报
pub(crate) fn spawn_factory<T, F, Fut>(
    stack: &CacheStack,
    key: &str,
    factory: F,
    graced: Option<CacheEntry<T>>,
    options: EntryOptions,
    lock: LockHandle,
) -> oneshot::Receiver<CacheResult<T>>
where
    T: CacheValue,
    F: FnOnce(FactoryContext<T>) -> Fut + Send + 'static,
    Fut: Future<Output = FactoryOutcome<T>> + Send + 'static,
{
    let (tx, rx) = oneshot::channel();
    let stack = stack.clone();
    let key = key.to_string();
    let ctx = FactoryContext {
        key: key.clone(),
        graced: graced.as_ref().map(|entry| entry.value().clone()),
    };

    tokio::spawn(async move {
        let outcome = factory(ctx).await;
        let result = settle(&stack, &key, outcome, graced, &options).await;
        lock.release();

        if let Err(Err(e)) = tx.send(result) {
            match e {
                CacheError::Factory { .. } => {
                    report_factory_error(&stack, &key, &e.into_background(), &options)
                }
                other => {
                    error!(cache = %stack.name(), key, error = %other, "Background cache write failed")
                }
            }
        }
    });

    rx
}

/// 工厂结束后的处理：写回、跳过或回退续期
async fn settle<T: CacheValue>(
    stack: &CacheStack,
    key: &str,
    outcome: FactoryOutcome<T>,
    graced: Option<CacheEntry<T>>,
    options: &EntryOptions,
) -> CacheResult<T> {
    match outcome {
        FactoryOutcome::Cache(value) => {
            stack.write(key, &value, options).await?;
            Ok(value)
        }
        FactoryOutcome::Skip(value) => {
            debug!(cache = %stack.name(), key, op_id = %options.id, "Factory asked to skip caching");
            Ok(value)
        }
        FactoryOutcome::Fail(source) => {
            if options.grace.enabled {
                if let Some(entry) = graced.filter(|entry| entry.is_logically_expired()) {
                    if let Err(e) = stack.apply_fallback(key, entry, options).await {
                        warn!(cache = %stack.name(), key, error = %e, "Failed to extend stale entry");
                    }
                }
            }
            Err(CacheError::factory(key, source, false))
        }
    }
}

fn report_factory_error(stack: &CacheStack, key: &str, error: &CacheError, options: &EntryOptions) {
    let background = error.is_background();
    if background {
        error!(cache = %stack.name(), key, op_id = %options.id, error = %error, "Background factory failed");
    } else {
        warn!(cache = %stack.name(), key, op_id = %options.id, error = %error, "Factory failed");
    }

    if let Some(handler) = &options.on_factory_error {
        handler(error);
    }
    stack.emit(CacheEvent::FactoryError {
        cache: stack.name().to_string(),
        key: stack.full_key(key),
        background,
    });
}

/// 运行工厂并在超时预算内等待结果
///
/// 有宽限值时：超时或失败都返回宽限值；没有宽限值时：超时返回硬超时错误，失败向上传递
pub(crate) async fn run_factory<T, F, Fut>(
    stack: &CacheStack,
    key: &str,
    factory: F,
    graced: Option<CacheEntry<T>>,
    options: EntryOptions,
    lock: LockHandle,
) -> CacheResult<T>
where
    T: CacheValue,
    F: FnOnce(FactoryContext<T>) -> Fut + Send + 'static,
    Fut: Future<Output = FactoryOutcome<T>> + Send + 'static,
{
    let fallback = graced.as_ref().map(|entry| entry.value().clone());
    let budget = options.factory_timeout(fallback.is_some());
    let rx = spawn_factory(stack, key, factory, graced, options.clone(), lock);

    let received = match budget {
        Some(budget) => match tokio::time::timeout(budget, rx).await {
            Ok(received) => received,
            Err(_) => {
                return match fallback {
                    Some(value) => {
                        let timeout = CacheError::soft_timeout(key, budget);
                        debug!(cache = %stack.name(), key, error = %timeout, "Returning stale value, factory continues in background");
                        emit_graced_hit(stack, key);
                        Ok(value)
                    }
                    None => Err(CacheError::hard_timeout(key, budget)),
                };
            }
        },
        None => rx.await,
    };

    let result = received
        .unwrap_or_else(|_| Err(CacheError::factory(key, "factory task panicked", false)));

    match result {
        Ok(value) => Ok(value),
        Err(e) => {
            if matches!(e, CacheError::Factory { .. }) {
                report_factory_error(stack, key, &e, &options);
            }
            match fallback {
                Some(value) if options.grace.enabled => {
                    warn!(cache = %stack.name(), key, error = %e, "Serving stale value after factory failure");
                    emit_graced_hit(stack, key);
                    Ok(value)
                }
                _ => Err(e),
            }
        }
    }
}

fn emit_graced_hit(stack: &CacheStack, key: &str) {
    let layer = if stack.l1().is_some() {
        Layer::L1
    } else {
        Layer::L2
    };
    stack.emit(CacheEvent::Hit {
        cache: stack.name().to_string(),
        key: stack.full_key(key),
        layer,
        graced: true,
    });
}
