use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    pub namespace: String,
    pub user_index_namespace: String,
    /// Lifetime of a session unless created with its own
    pub default_ttl: Duration,
    /// Sessions seen within this window count as active
    pub active_window: Duration,
}

impl SessionConfig {
    pub fn with_default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = ttl;
        self
    }

    pub fn with_active_window(mut self, window: Duration) -> Self {
        self.active_window = window;
        self
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            namespace: "session".to_string(),
            user_index_namespace: "user_sessions".to_string(),
            default_ttl: Duration::from_secs(24 * 60 * 60),
            active_window: Duration::from_secs(15 * 60),
        }
    }
}
