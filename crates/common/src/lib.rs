//! common - 通用工具库
//!
//! 时钟、ID 生成与重试工具，被引擎与各适配器复用

pub mod clock;
pub mod id;
pub mod retry;

pub use clock::*;
pub use id::*;
pub use retry::*;
