//! Cache Store
//!
//! JSON values with TTL under a namespace, batched reads and writes,
//! get-or-compute, tag-based group invalidation, and shared hit/miss counters.
//!
//! ```ignore
//! use cache_store::{CacheConfig, CacheStore};
//!
//! let cache = CacheStore::new(store, CacheConfig::default());
//! cache.set_with_tags("user:1", &profile, &["users"], None).await?;
//! cache.invalidate_by_tags(&["users"]).await?;
//! ```

mod config;
mod error;
mod store;

pub use config::CacheConfig;
pub use error::{CacheError, CacheResult};
pub use store::{CacheStats, CacheStore};
