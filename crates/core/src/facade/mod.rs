//! 驱动外观
//!
//! 在驱动之上做条目序列化/反序列化与日志；远程外观额外负责断路器与错误抑制

mod local;
mod remote;

pub use local::LocalCache;
pub use remote::RemoteCache;
