//! Store client for the coordination layer
//!
//! Connects to the shared in-memory key-value store (Redis) and exposes the
//! primitive operations the cache, session, and job-queue crates build on.
//!
//! # Features
//!
//! - `redis` (default) - Redis connector and [`redis::RedisStore`]
//! - `mock` - `mockall` mock of [`store::KeyValueStore`] for downstream tests
//!
//! # Example
//!
//! ```ignore
//! use core_config::{redis::RedisConfig, FromEnv};
//! use database::redis::RedisStore;
//! use database::store::KeyValueStore;
//!
//! let store = RedisStore::connect(&RedisConfig::from_env()?, None).await?;
//! store.set("greeting", "hello", None).await?;
//! ```

pub mod clock;
pub mod common;
pub mod store;

#[cfg(feature = "redis")]
pub mod redis;

pub use clock::{Clock, ManualClock, SharedClock, SystemClock};
pub use common::{DatabaseError, DatabaseResult};
pub use store::{escape_glob, KeyValueStore, MemoryStore, SharedStore, StoreResult};
