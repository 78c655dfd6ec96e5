use std::time::Duration;

/// Cache namespace and default entry lifetime
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheConfig {
    /// Prefix of every key, `{namespace}:{key}`
    pub namespace: String,
    /// TTL used when a write does not pass one
    pub default_ttl: Duration,
}

impl CacheConfig {
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            default_ttl: Duration::from_secs(3600),
        }
    }

    pub fn with_default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = ttl;
        self
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self::new("cache")
    }
}
