//! 时钟工具
//!
//! 缓存条目的过期时间统一使用 Unix 毫秒时间戳

use std::time::Duration;

use chrono::Utc;

/// 当前 Unix 毫秒时间戳
pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// 当前 Unix 微秒时间戳（标签失效判断需要更高精度）
pub fn now_micros() -> i64 {
    Utc::now().timestamp_micros()
}

/// 将 Duration 转换为毫秒，超出 i64 范围时饱和
pub fn duration_ms(duration: Duration) -> i64 {
    i64::try_from(duration.as_millis()).unwrap_or(i64::MAX)
}

/// 计算 `now + duration` 的毫秒时间戳，溢出时饱和
pub fn deadline_ms(now: i64, duration: Duration) -> i64 {
    now.saturating_add(duration_ms(duration))
}
