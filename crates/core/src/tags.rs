//! 标签失效
//!
//! 每个标签存一个失效时间戳（微秒），经写路径进入远程层并通知其它实例；
//! 读取时创建时间不晚于任一标签失效时间的条目视为逻辑过期

use strata_common::now_micros;
use strata_errors::CacheResult;

use crate::entry::CacheEntry;
use crate::options::{EntryOptions, RawEntryOptions};
use crate::stack::CacheStack;

pub const TAG_KEY_PREFIX: &str = "__strata:tag:";

pub fn tag_key(tag: &str) -> String {
    format!("{}{}", TAG_KEY_PREFIX, tag)
}

fn tag_options() -> EntryOptions {
    EntryOptions::resolve(&RawEntryOptions::new().forever().no_grace())
}

impl CacheStack {
    /// 标签最近一次失效的时间戳
    pub(crate) async fn tag_invalidated_at(&self, tag: &str) -> CacheResult<Option<i64>> {
        let key = tag_key(tag);
        let options = tag_options();

        let mut stale = None;
        if let Some(l1) = self.l1() {
            if let Some(entry) = l1.get::<i64>(&key).await? {
                if !entry.is_logically_expired() {
                    return Ok(Some(*entry.value()));
                }
                // 被其它实例的写通知标记过期，远程层可能有更新的值
                stale = Some(*entry.value());
            }
        }

        if let Some(l2) = self.l2() {
            if let Some(entry) = l2.get::<i64>(&key, &options).await? {
                if let Some(l1) = self.l1() {
                    l1.set(&key, &entry.serialize()?, &options).await?;
                }
                return Ok(Some(*entry.value()));
            }
        }

        Ok(stale)
    }

    /// 条目是否被它的某个标签失效
    pub(crate) async fn is_tag_invalidated<T>(&self, entry: &CacheEntry<T>) -> CacheResult<bool> {
        for tag in entry.tags() {
            if let Some(invalidated_at) = self.tag_invalidated_at(tag).await? {
                if entry.created_at() <= invalidated_at {
                    return Ok(true);
                }
            }
        }
        Ok(false)
    }

    /// 记录标签失效时间
    pub async fn invalidate_tags(&self, tags: &[String]) -> CacheResult<()> {
        let options = tag_options();
        let now = now_micros();
        for tag in tags {
            self.write(&tag_key(tag), &now, &options).await?;
        }
        Ok(())
    }
}
