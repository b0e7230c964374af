//! strata-adapter-memory - 进程内适配器
//!
//! - `MemoryDriver`: 基于 moka 的本地缓存驱动（L1）
//! - `MemoryTransport`: 进程内总线传输，用显式构造的注册表连接多个实例

mod driver;
mod transport;

pub use driver::*;
pub use transport::*;
