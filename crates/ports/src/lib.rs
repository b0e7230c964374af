//! strata-ports - 驱动契约
//!
//! 引擎只通过这里的 trait 访问存储后端与消息总线

pub mod bus;
pub mod cache;

pub use bus::*;
pub use cache::*;
