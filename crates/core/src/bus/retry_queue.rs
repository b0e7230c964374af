//! 发布失败消息的重试队列
//!
//! 有界 FIFO，按 `类型 + 排序后的键` 去重；满时丢弃最旧的消息

use std::collections::{HashSet, VecDeque};

use strata_ports::{BusMessage, BusMessageType};
use tracing::warn;

/// 去重键：消息类型加排序后的键，键的顺序不影响结果
pub type DedupKey = (BusMessageType, Vec<String>);

pub fn dedup_key(message: &BusMessage) -> DedupKey {
    let mut keys = message.keys.clone();
    keys.sort_unstable();
    (message.message_type, keys)
}

#[derive(Debug)]
pub struct RetryQueue {
    enabled: bool,
    max_size: usize,
    messages: VecDeque<(DedupKey, BusMessage)>,
    pending: HashSet<DedupKey>,
}

impl RetryQueue {
    pub fn new(enabled: bool, max_size: usize) -> Self {
        Self {
            enabled,
            max_size,
            messages: VecDeque::new(),
            pending: HashSet::new(),
        }
    }

    /// 入队，重复或队列禁用时返回 false
    pub fn enqueue(&mut self, message: BusMessage) -> bool {
        if !self.enabled || self.max_size == 0 {
            return false;
        }

        let dedup = dedup_key(&message);
        if self.pending.contains(&dedup) {
            return false;
        }

        if self.messages.len() >= self.max_size {
            if let Some((oldest, dropped)) = self.messages.pop_front() {
                self.pending.remove(&oldest);
                warn!(
                    max_size = self.max_size,
                    message_type = dropped.message_type.as_str(),
                    "Retry queue full, dropping oldest message"
                );
            }
        }

        self.pending.insert(dedup.clone());
        self.messages.push_back((dedup, message));
        true
    }

    /// 放回队首（重放失败时）
    pub fn requeue_front(&mut self, message: BusMessage) -> bool {
        if !self.enabled || self.max_size == 0 {
            return false;
        }

        let dedup = dedup_key(&message);
        if !self.pending.insert(dedup.clone()) {
            return false;
        }
        self.messages.push_front((dedup, message));

        if self.messages.len() > self.max_size {
            if let Some((newest, _)) = self.messages.pop_back() {
                self.pending.remove(&newest);
            }
        }
        true
    }

    pub fn dequeue(&mut self) -> Option<BusMessage> {
        let (dedup, message) = self.messages.pop_front()?;
        self.pending.remove(&dedup);
        Some(message)
    }

    pub fn size(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn clear(&mut self) {
        self.messages.clear();
        self.pending.clear();
    }
}
