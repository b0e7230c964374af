//! strata-adapter-redis - Redis 适配器
//!
//! 远程层驱动（`RedisDriver`）与 pub/sub 总线传输（`RedisTransport`）

mod cache;
mod config;
mod connection;
mod pubsub;

pub use cache::*;
pub use config::*;
pub use connection::*;
pub use pubsub::*;
