//! Namespaced JSON cache.
//!
//! ```text
//! {namespace}:{key}        JSON value with TTL
//! {namespace}#tag:{tag}    set of full keys carrying the tag
//! {namespace}#stats        hash with `hits` and `misses`
//! ```
//!
//! Keys containing `#tag:` or ending in `#stats` are reserved for the
//! metadata of nested views and are not counted as entries.

use std::collections::HashSet;
use std::future::Future;
use std::time::Duration;

use database::{escape_glob, SharedStore};
use serde::{de::DeserializeOwned, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::config::CacheConfig;
use crate::error::CacheResult;

const HITS: &str = "hits";
const MISSES: &str = "misses";
const TAG_MARKER: &str = "#tag:";
const STATS_MARKER: &str = "#stats";

/// Counter snapshot returned by [`CacheStore::stats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    /// Live entries in this namespace
    pub key_count: u64,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// TTL cache over the shared store.
///
/// Cheap to clone. Counters are best-effort: they are incremented outside any
/// transaction and a failed increment is only logged.
#[derive(Clone)]
pub struct CacheStore {
    store: SharedStore,
    config: CacheConfig,
}

impl CacheStore {
    pub fn new(store: SharedStore, config: CacheConfig) -> Self {
        Self { store, config }
    }

    pub fn namespace(&self) -> &str {
        &self.config.namespace
    }

    pub fn default_ttl(&self) -> Duration {
        self.config.default_ttl
    }

    /// View whose keys, tags, and counters live under `{namespace}:{prefix}`
    pub fn with_namespace(&self, prefix: &str) -> Self {
        Self {
            store: self.store.clone(),
            config: CacheConfig {
                namespace: format!("{}:{}", self.config.namespace, prefix),
                default_ttl: self.config.default_ttl,
            },
        }
    }

    fn key(&self, key: &str) -> String {
        format!("{}:{}", self.config.namespace, key)
    }

    fn tag_key(&self, tag: &str) -> String {
        format!("{}{}{}", self.config.namespace, TAG_MARKER, tag)
    }

    fn stats_key(&self) -> String {
        format!("{}{}", self.config.namespace, STATS_MARKER)
    }

    async fn count(&self, field: &str, delta: i64) {
        if delta == 0 {
            return;
        }
        if let Err(e) = self.store.hincr(&self.stats_key(), field, delta).await {
            debug!(error = %e, field, "Failed to update cache counter");
        }
    }

    fn decode<T: DeserializeOwned>(&self, key: &str, raw: &str) -> Option<T> {
        match serde_json::from_str(raw) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(key, error = %e, "Malformed cache entry, treating as miss");
                None
            }
        }
    }

    /// Store `value` for `ttl`, or the default TTL
    #[instrument(skip(self, value), fields(namespace = %self.config.namespace))]
    pub async fn set<T: Serialize>(
        &self,
        key: &str,
        value: &T,
        ttl: Option<Duration>,
    ) -> CacheResult<()> {
        let raw = serde_json::to_string(value)?;
        let ttl = ttl.unwrap_or(self.config.default_ttl);
        self.store.set(&self.key(key), &raw, Some(ttl)).await?;
        debug!(key, ttl_secs = ttl.as_secs(), "Cache set");
        Ok(())
    }

    /// A malformed stored value is reported as a miss
    #[instrument(skip(self), fields(namespace = %self.config.namespace))]
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> CacheResult<Option<T>> {
        let raw = self.store.get(&self.key(key)).await?;
        let value = raw.and_then(|raw| self.decode(key, &raw));

        if value.is_some() {
            self.count(HITS, 1).await;
            debug!(key, "Cache hit");
        } else {
            self.count(MISSES, 1).await;
            debug!(key, "Cache miss");
        }
        Ok(value)
    }

    pub async fn delete(&self, key: &str) -> CacheResult<bool> {
        Ok(self.store.del(&[self.key(key)]).await? > 0)
    }

    pub async fn exists(&self, key: &str) -> CacheResult<bool> {
        Ok(self.store.exists(&self.key(key)).await?)
    }

    /// Return the cached value, or compute, store, and return it.
    ///
    /// Not atomic: concurrent callers that miss at the same time all compute.
    /// Only `compute` errors are returned; a failed cache read is a miss and a
    /// failed cache write is logged.
    pub async fn get_or_set<T, F, Fut, E>(
        &self,
        key: &str,
        ttl: Option<Duration>,
        compute: F,
    ) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        match self.get::<T>(key).await {
            Ok(Some(value)) => return Ok(value),
            Ok(None) => {}
            Err(e) => warn!(key, error = %e, "Cache read failed, computing value"),
        }

        let value = compute().await?;
        if let Err(e) = self.set(key, &value, ttl).await {
            warn!(key, error = %e, "Failed to cache computed value");
        }
        Ok(value)
    }

    /// Write several entries in one round trip, all with the same TTL
    #[instrument(skip(self, entries), fields(namespace = %self.config.namespace, count = entries.len()))]
    pub async fn set_multiple<T: Serialize>(
        &self,
        entries: &[(&str, T)],
        ttl: Option<Duration>,
    ) -> CacheResult<()> {
        let encoded = entries
            .iter()
            .map(|(key, value)| -> CacheResult<(String, String)> {
                Ok((self.key(key), serde_json::to_string(value)?))
            })
            .collect::<CacheResult<Vec<_>>>()?;

        self.store
            .mset(&encoded, Some(ttl.unwrap_or(self.config.default_ttl)))
            .await?;
        Ok(())
    }

    /// Read several entries in one round trip; the result is aligned with `keys`
    pub async fn get_multiple<T: DeserializeOwned>(
        &self,
        keys: &[&str],
    ) -> CacheResult<Vec<Option<T>>> {
        let full: Vec<String> = keys.iter().map(|key| self.key(key)).collect();
        let raw = self.store.mget(&full).await?;

        let values: Vec<Option<T>> = keys
            .iter()
            .zip(raw)
            .map(|(key, raw)| raw.and_then(|raw| self.decode(key, &raw)))
            .collect();

        let hits = values.iter().filter(|v| v.is_some()).count() as i64;
        self.count(HITS, hits).await;
        self.count(MISSES, values.len() as i64 - hits).await;
        Ok(values)
    }

    /// Store `value` and index it under every tag.
    ///
    /// Each tag index lives at least as long as its longest-lived entry.
    #[instrument(skip(self, value), fields(namespace = %self.config.namespace))]
    pub async fn set_with_tags<T: Serialize>(
        &self,
        key: &str,
        value: &T,
        tags: &[&str],
        ttl: Option<Duration>,
    ) -> CacheResult<()> {
        let ttl = ttl.unwrap_or(self.config.default_ttl);
        self.set(key, value, Some(ttl)).await?;

        let full = self.key(key);
        for tag in tags {
            let tag_key = self.tag_key(tag);
            self.store.sadd(&tag_key, &full).await?;

            let current = self.store.ttl(&tag_key).await?;
            if current.is_none_or(|current| current < ttl) {
                self.store.expire(&tag_key, ttl).await?;
            }
        }
        Ok(())
    }

    /// Delete every entry carrying any of `tags`, then the tag indices.
    ///
    /// Returns the number of entries removed.
    #[instrument(skip(self), fields(namespace = %self.config.namespace))]
    pub async fn invalidate_by_tags(&self, tags: &[&str]) -> CacheResult<u64> {
        let mut keys = HashSet::new();
        let mut tag_keys = Vec::with_capacity(tags.len());

        for tag in tags {
            let tag_key = self.tag_key(tag);
            keys.extend(self.store.smembers(&tag_key).await?);
            tag_keys.push(tag_key);
        }

        let keys: Vec<String> = keys.into_iter().collect();
        let removed = self.store.del(&keys).await?;
        self.store.del(&tag_keys).await?;

        info!(removed, "Invalidated cache tags");
        Ok(removed)
    }

    /// Delete every entry whose key starts with `prefix`
    #[instrument(skip(self), fields(namespace = %self.config.namespace))]
    pub async fn clear_prefix(&self, prefix: &str) -> CacheResult<u64> {
        let keys = self
            .store
            .scan_keys(&format!("{}*", escape_glob(&self.key(prefix))))
            .await?;
        let removed = self.store.del(&keys).await?;
        info!(removed, "Cleared cache prefix");
        Ok(removed)
    }

    pub async fn stats(&self) -> CacheResult<CacheStats> {
        let counters = self.store.hgetall(&self.stats_key()).await?;
        let read = |field: &str| {
            counters
                .get(field)
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(0)
        };

        let prefix = self.key("");
        let key_count = self
            .store
            .scan_keys(&format!("{}*", escape_glob(&prefix)))
            .await?
            .iter()
            .filter(|key| key.strip_prefix(&prefix).is_some_and(|rest| !is_view_metadata(rest)))
            .count() as u64;

        Ok(CacheStats {
            hits: read(HITS),
            misses: read(MISSES),
            key_count,
        })
    }

    pub async fn reset_stats(&self) -> CacheResult<()> {
        self.store.del(&[self.stats_key()]).await?;
        Ok(())
    }
}

/// Tag indices and counters that nested views keep under this namespace
fn is_view_metadata(rest: &str) -> bool {
    rest.contains(TAG_MARKER) || rest.ends_with(STATS_MARKER)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CacheError;
    use database::store::MockKeyValueStore;
    use database::{DatabaseError, KeyValueStore, ManualClock, MemoryStore};
    use serde::Deserialize;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Profile {
        name: String,
    }

    fn profile(name: &str) -> Profile {
        Profile {
            name: name.to_string(),
        }
    }

    fn cache() -> (CacheStore, Arc<MemoryStore>, ManualClock) {
        let clock = ManualClock::starting_at(1_700_000_000_000);
        let store = Arc::new(MemoryStore::with_clock(Arc::new(clock.clone())));
        (
            CacheStore::new(store.clone(), CacheConfig::default()),
            store,
            clock,
        )
    }

    #[tokio::test]
    async fn test_set_get_then_expire() {
        let (cache, _, clock) = cache();

        cache
            .set("user:1", &profile("ada"), Some(Duration::from_secs(1)))
            .await
            .unwrap();
        assert_eq!(
            cache.get::<Profile>("user:1").await.unwrap(),
            Some(profile("ada"))
        );

        clock.advance(Duration::from_millis(1001));
        assert_eq!(cache.get::<Profile>("user:1").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_default_ttl_applies() {
        let (cache, store, _) = cache();
        cache.set("k", &1u32, None).await.unwrap();

        assert_eq!(
            store.ttl("cache:k").await.unwrap(),
            Some(Duration::from_secs(3600))
        );
    }

    #[tokio::test]
    async fn test_delete_and_exists() {
        let (cache, _, _) = cache();
        cache.set("k", &"v", None).await.unwrap();

        assert!(cache.exists("k").await.unwrap());
        assert!(cache.delete("k").await.unwrap());
        assert!(!cache.exists("k").await.unwrap());
        assert!(!cache.delete("k").await.unwrap());
    }

    #[tokio::test]
    async fn test_malformed_value_is_a_miss() {
        let (cache, store, _) = cache();
        store.set("cache:broken", "{oops", None).await.unwrap();

        assert_eq!(cache.get::<Profile>("broken").await.unwrap(), None);
        assert_eq!(cache.stats().await.unwrap().misses, 1);
    }

    #[tokio::test]
    async fn test_get_or_set_computes_once_then_hits() {
        let (cache, _, _) = cache();
        let calls = AtomicU32::new(0);

        for _ in 0..2 {
            let value: Result<Profile, CacheError> = cache
                .get_or_set("user:2", None, || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(profile("grace"))
                })
                .await;
            assert_eq!(value.unwrap(), profile("grace"));
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        let stats = cache.stats().await.unwrap();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
    }

    #[tokio::test]
    async fn test_get_or_set_propagates_compute_error() {
        let (cache, _, _) = cache();

        let result: Result<Profile, String> = cache
            .get_or_set("user:3", None, || async { Err("upstream down".to_string()) })
            .await;

        assert_eq!(result.unwrap_err(), "upstream down");
        assert!(!cache.exists("user:3").await.unwrap());
    }

    #[tokio::test]
    async fn test_get_or_set_survives_unreachable_store() {
        let mut store = MockKeyValueStore::new();
        store
            .expect_get()
            .returning(|_| Err(DatabaseError::ConnectionFailed("refused".to_string())));
        store
            .expect_set()
            .returning(|_, _, _| Err(DatabaseError::ConnectionFailed("refused".to_string())));
        store
            .expect_hincr()
            .returning(|_, _, _| Err(DatabaseError::ConnectionFailed("refused".to_string())));
        let cache = CacheStore::new(Arc::new(store), CacheConfig::default());

        let value: Result<u32, CacheError> =
            cache.get_or_set("answer", None, || async { Ok(42) }).await;

        assert_eq!(value.unwrap(), 42);
    }

    #[tokio::test]
    async fn test_set_and_get_multiple() {
        let (cache, _, _) = cache();
        cache
            .set_multiple(&[("a", profile("a")), ("b", profile("b"))], None)
            .await
            .unwrap();

        let values = cache
            .get_multiple::<Profile>(&["a", "missing", "b"])
            .await
            .unwrap();

        assert_eq!(values, vec![Some(profile("a")), None, Some(profile("b"))]);
        let stats = cache.stats().await.unwrap();
        assert_eq!(stats.hits, 2);
        assert_eq!(stats.misses, 1);
    }

    #[tokio::test]
    async fn test_invalidate_by_tags_removes_entries_and_index() {
        let (cache, store, _) = cache();
        cache.set_with_tags("a", &1, &["t1"], None).await.unwrap();
        cache.set_with_tags("b", &2, &["t1", "t2"], None).await.unwrap();
        cache.set_with_tags("c", &3, &["t2"], None).await.unwrap();

        let removed = cache.invalidate_by_tags(&["t1"]).await.unwrap();

        assert_eq!(removed, 2);
        assert!(!cache.exists("a").await.unwrap());
        assert!(!cache.exists("b").await.unwrap());
        assert!(cache.exists("c").await.unwrap());
        assert!(!store.exists("cache#tag:t1").await.unwrap());
        assert!(store.exists("cache#tag:t2").await.unwrap());
    }

    #[tokio::test]
    async fn test_tag_index_outlives_longest_entry() {
        let (cache, store, _) = cache();
        cache
            .set_with_tags("long", &1, &["t"], Some(Duration::from_secs(600)))
            .await
            .unwrap();
        cache
            .set_with_tags("short", &2, &["t"], Some(Duration::from_secs(60)))
            .await
            .unwrap();

        assert_eq!(
            store.ttl("cache#tag:t").await.unwrap(),
            Some(Duration::from_secs(600))
        );
    }

    #[tokio::test]
    async fn test_clear_prefix() {
        let (cache, _, _) = cache();
        cache.set("user:1", &1, None).await.unwrap();
        cache.set("user:2", &2, None).await.unwrap();
        cache.set("order:1", &3, None).await.unwrap();

        assert_eq!(cache.clear_prefix("user:").await.unwrap(), 2);
        assert!(cache.exists("order:1").await.unwrap());
    }

    #[tokio::test]
    async fn test_clear_prefix_with_glob_characters_is_literal() {
        let (cache, _, _) = cache();
        cache.set("user?:1", &1, None).await.unwrap();
        cache.set("users:1", &2, None).await.unwrap();
        cache.set("user[1]", &3, None).await.unwrap();
        cache.set("user1", &4, None).await.unwrap();

        assert_eq!(cache.clear_prefix("user?").await.unwrap(), 1);
        assert_eq!(cache.clear_prefix("user[1").await.unwrap(), 1);
        assert!(cache.exists("users:1").await.unwrap());
        assert!(cache.exists("user1").await.unwrap());
    }

    #[tokio::test]
    async fn test_key_count_keeps_user_keys_with_hash() {
        let (cache, _, _) = cache();
        cache.set("order#12", &1, None).await.unwrap();
        cache.set("plain", &2, None).await.unwrap();
        let nested = cache.with_namespace("orders");
        nested.set_with_tags("x", &3, &["t"], None).await.unwrap();
        nested.get::<u32>("x").await.unwrap();

        // order#12, plain, and the nested entry; not its tag set or counters
        assert_eq!(cache.stats().await.unwrap().key_count, 3);
        assert_eq!(nested.stats().await.unwrap().key_count, 1);
    }

    #[tokio::test]
    async fn test_glob_namespace_counts_only_its_own_keys() {
        let clock = ManualClock::starting_at(1_700_000_000_000);
        let store = Arc::new(MemoryStore::with_clock(Arc::new(clock)));
        let wild = CacheStore::new(
            store.clone(),
            CacheConfig {
                namespace: "c*".to_string(),
                ..CacheConfig::default()
            },
        );
        let other = CacheStore::new(store, CacheConfig::default());
        wild.set("a", &1, None).await.unwrap();
        other.set("b", &2, None).await.unwrap();

        assert_eq!(wild.stats().await.unwrap().key_count, 1);
        assert_eq!(wild.clear_prefix("").await.unwrap(), 1);
        assert!(other.exists("b").await.unwrap());
    }

    #[tokio::test]
    async fn test_stats_and_reset() {
        let (cache, _, _) = cache();
        cache.set_with_tags("a", &1, &["t"], None).await.unwrap();
        cache.get::<u32>("a").await.unwrap();
        cache.get::<u32>("nope").await.unwrap();

        let stats = cache.stats().await.unwrap();
        assert_eq!(stats, CacheStats { hits: 1, misses: 1, key_count: 1 });
        assert_eq!(stats.hit_rate(), 0.5);

        cache.reset_stats().await.unwrap();
        let stats = cache.stats().await.unwrap();
        assert_eq!((stats.hits, stats.misses), (0, 0));
    }

    #[tokio::test]
    async fn test_namespace_views_are_isolated() {
        let (root, store, _) = cache();
        let notifications = root.with_namespace("notifications");

        notifications.set("n1", &1, None).await.unwrap();

        assert!(store.exists("cache:notifications:n1").await.unwrap());
        assert!(!root.exists("n1").await.unwrap());
        assert!(notifications.exists("n1").await.unwrap());
        assert_eq!(notifications.namespace(), "cache:notifications");
    }
}
