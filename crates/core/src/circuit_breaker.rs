//! 远程层断路器
//!
//! 只有 Closed / Open 两个状态；打开后到期时在下一次状态检查时惰性关闭，没有后台定时器

use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use strata_common::{deadline_ms, now_ms};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    Open,
}

#[derive(Debug)]
pub struct CircuitBreaker {
    break_duration: Duration,
    /// 0 表示关闭
    will_close_at: AtomicI64,
}

impl CircuitBreaker {
    pub fn new(break_duration: Duration) -> Self {
        Self {
            break_duration,
            will_close_at: AtomicI64::new(0),
        }
    }

    pub fn break_duration(&self) -> Duration {
        self.break_duration
    }

    pub fn state(&self) -> BreakerState {
        let will_close_at = self.will_close_at.load(Ordering::Acquire);
        if will_close_at == 0 {
            return BreakerState::Closed;
        }
        if now_ms() >= will_close_at {
            // 只有仍是同一轮打开时才关闭
            let _ = self.will_close_at.compare_exchange(
                will_close_at,
                0,
                Ordering::AcqRel,
                Ordering::Acquire,
            );
            return BreakerState::Closed;
        }
        BreakerState::Open
    }

    pub fn is_open(&self) -> bool {
        self.state() == BreakerState::Open
    }

    pub fn is_closed(&self) -> bool {
        self.state() == BreakerState::Closed
    }

    /// 打开断路器；已打开时不重置关闭时间
    pub fn open(&self) {
        if self.is_open() {
            return;
        }
        let will_close_at = deadline_ms(now_ms(), self.break_duration).max(1);
        if self
            .will_close_at
            .compare_exchange(0, will_close_at, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            tracing::warn!(
                break_duration_ms = self.break_duration.as_millis() as u64,
                "Circuit breaker transitioned to OPEN"
            );
        }
    }

    pub fn close(&self) {
        if self.will_close_at.swap(0, Ordering::AcqRel) != 0 {
            tracing::info!("Circuit breaker transitioned to CLOSED");
        }
    }
}
