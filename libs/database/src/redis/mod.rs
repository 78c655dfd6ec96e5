//! Redis connector and the Redis-backed store
//!
//! Provides connection management, health checks, and [`RedisStore`].

mod connector;
mod health;
mod store;

pub use connector::{connect, connect_with_retry};
pub use health::check_health;
pub use store::RedisStore;

// Re-export redis types for convenience
pub use redis::aio::ConnectionManager;
pub use redis::{Client, RedisResult};
