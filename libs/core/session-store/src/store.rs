use std::time::Duration;

use database::{escape_glob, SharedClock, SharedStore};
use serde_json::Map;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::config::SessionConfig;
use crate::error::SessionResult;
use crate::models::{Session, SessionStats, SessionUpdate};

/// Session records with sliding expiry and a reverse index per user.
///
/// The user index TTL follows the longest-lived session at the time of the
/// last write or read. [`extend_session`](Self::extend_session) does not
/// resynchronise it.
#[derive(Clone)]
pub struct SessionStore {
    store: SharedStore,
    clock: SharedClock,
    config: SessionConfig,
}

impl SessionStore {
    pub fn new(store: SharedStore, clock: SharedClock, config: SessionConfig) -> Self {
        Self {
            store,
            clock,
            config,
        }
    }

    fn session_key(&self, session_id: &str) -> String {
        format!("{}:{}", self.config.namespace, session_id)
    }

    fn user_key(&self, user_id: &str) -> String {
        format!("{}:{}", self.config.user_index_namespace, user_id)
    }

    fn decode(&self, session_id: &str, raw: &str) -> Option<Session> {
        match serde_json::from_str(raw) {
            Ok(session) => Some(session),
            Err(e) => {
                warn!(session_id, error = %e, "Malformed session record, ignoring");
                None
            }
        }
    }

    async fn load(&self, session_id: &str) -> SessionResult<Option<Session>> {
        let raw = self.store.get(&self.session_key(session_id)).await?;
        Ok(raw.and_then(|raw| self.decode(session_id, &raw)))
    }

    async fn save(&self, session: &Session, ttl: Duration) -> SessionResult<()> {
        let raw = serde_json::to_string(session)?;
        self.store
            .set(&self.session_key(&session.session_id), &raw, Some(ttl))
            .await?;
        Ok(())
    }

    /// Write back a loaded session. Returns false, writing nothing, when the
    /// record was deleted or expired since it was read.
    async fn overwrite(&self, session: &Session, ttl: Duration) -> SessionResult<bool> {
        let raw = serde_json::to_string(session)?;
        let written = self
            .store
            .set_if_exists(&self.session_key(&session.session_id), &raw, Some(ttl))
            .await?;
        if !written {
            debug!(session_id = %session.session_id, "Session vanished before write-back");
        }
        Ok(written)
    }

    /// Stretch the user index so it outlives a session living `ttl`
    async fn cover_index(&self, user_id: &str, ttl: Duration) -> SessionResult<()> {
        let key = self.user_key(user_id);
        let current = self.store.ttl(&key).await?;
        if current.is_none_or(|current| current < ttl) {
            self.store.expire(&key, ttl).await?;
        }
        Ok(())
    }

    /// Create a session and return its id
    #[instrument(skip(self, email))]
    pub async fn create_session(
        &self,
        user_id: &str,
        role: &str,
        email: &str,
        ttl: Option<Duration>,
    ) -> SessionResult<String> {
        let ttl_secs = whole_seconds(ttl.unwrap_or(self.config.default_ttl));
        let ttl = Duration::from_secs(ttl_secs);
        let now = self.clock.now();
        let session = Session {
            session_id: Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            role: role.to_string(),
            email: email.to_string(),
            created_at: now,
            last_activity: now,
            ttl: ttl_secs,
            metadata: Map::new(),
        };

        self.save(&session, ttl).await?;
        self.store
            .sadd(&self.user_key(user_id), &session.session_id)
            .await?;
        self.cover_index(user_id, ttl).await?;

        info!(session_id = %session.session_id, ttl_secs = session.ttl, "Session created");
        Ok(session.session_id)
    }

    /// Fetch a session and slide its expiry forward
    #[instrument(skip(self))]
    pub async fn get_session(&self, session_id: &str) -> SessionResult<Option<Session>> {
        let Some(mut session) = self.load(session_id).await? else {
            debug!("Session not found");
            return Ok(None);
        };

        let ttl = Duration::from_secs(session.ttl);
        session.last_activity = self.clock.now();
        if !self.overwrite(&session, ttl).await? {
            return Ok(None);
        }
        self.cover_index(&session.user_id, ttl).await?;
        Ok(Some(session))
    }

    /// Apply a partial update, keeping the remaining lifetime.
    ///
    /// Returns false when the session does not exist.
    #[instrument(skip(self, update))]
    pub async fn update_session(
        &self,
        session_id: &str,
        update: SessionUpdate,
    ) -> SessionResult<bool> {
        let Some(mut session) = self.load(session_id).await? else {
            return Ok(false);
        };

        let remaining = self
            .store
            .ttl(&self.session_key(session_id))
            .await?
            .unwrap_or(Duration::from_secs(session.ttl));

        update.apply(&mut session);
        session.last_activity = self.clock.now();
        if !self.overwrite(&session, remaining).await? {
            return Ok(false);
        }

        debug!(user_id = %session.user_id, "Session updated");
        Ok(true)
    }

    #[instrument(skip(self))]
    pub async fn delete_session(&self, session_id: &str) -> SessionResult<bool> {
        let session = self.load(session_id).await?;
        let removed = self.store.del(&[self.session_key(session_id)]).await? > 0;

        if let Some(session) = session {
            self.store
                .srem(&self.user_key(&session.user_id), session_id)
                .await?;
        }

        if removed {
            info!("Session deleted");
        }
        Ok(removed)
    }

    /// Delete every session of a user and the user's index.
    ///
    /// Returns how many live sessions were removed.
    #[instrument(skip(self))]
    pub async fn delete_user_sessions(&self, user_id: &str) -> SessionResult<u64> {
        let index = self.user_key(user_id);
        let ids = self.store.smembers(&index).await?;

        let keys: Vec<String> = ids.iter().map(|id| self.session_key(id)).collect();
        let removed = self.store.del(&keys).await?;
        self.store.del(&[index]).await?;

        info!(removed, "User sessions deleted");
        Ok(removed)
    }

    /// Live sessions of a user, oldest first.
    ///
    /// Index entries whose records expired are pruned.
    #[instrument(skip(self))]
    pub async fn get_user_sessions(&self, user_id: &str) -> SessionResult<Vec<Session>> {
        let index = self.user_key(user_id);
        let ids = self.store.smembers(&index).await?;
        let keys: Vec<String> = ids.iter().map(|id| self.session_key(id)).collect();
        let records = self.store.mget(&keys).await?;

        let mut sessions = Vec::with_capacity(ids.len());
        for (id, raw) in ids.iter().zip(records) {
            match raw.and_then(|raw| self.decode(id, &raw)) {
                Some(session) => sessions.push(session),
                None => {
                    debug!(session_id = %id, "Pruning stale session index entry");
                    self.store.srem(&index, id).await?;
                }
            }
        }

        sessions.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(sessions)
    }

    /// Whether the session exists; a valid session has its expiry slid forward
    pub async fn is_valid_session(&self, session_id: &str) -> SessionResult<bool> {
        Ok(self.get_session(session_id).await?.is_some())
    }

    /// Set the session's remaining lifetime to `seconds`, at least one.
    ///
    /// The user index TTL is left as is.
    #[instrument(skip(self))]
    pub async fn extend_session(&self, session_id: &str, seconds: u64) -> SessionResult<bool> {
        let Some(mut session) = self.load(session_id).await? else {
            return Ok(false);
        };

        let seconds = seconds.max(1);
        session.ttl = seconds;
        if !self.overwrite(&session, Duration::from_secs(seconds)).await? {
            return Ok(false);
        }

        debug!(ttl_secs = seconds, "Session extended");
        Ok(true)
    }

    /// Count live sessions and those active within the configured window
    pub async fn get_session_stats(&self) -> SessionResult<SessionStats> {
        let keys = self
            .store
            .scan_keys(&format!("{}:*", escape_glob(&self.config.namespace)))
            .await?;
        let records = self.store.mget(&keys).await?;

        let now = self.clock.now();
        let window = chrono::Duration::from_std(self.config.active_window)
            .unwrap_or(chrono::Duration::MAX);

        let mut stats = SessionStats::default();
        for (key, raw) in keys.iter().zip(records) {
            let Some(session) = raw.and_then(|raw| self.decode(key, &raw)) else {
                continue;
            };
            stats.total_sessions += 1;
            if now.signed_duration_since(session.last_activity) <= window {
                stats.active_sessions += 1;
            }
        }
        Ok(stats)
    }
}

/// Session lifetimes are whole seconds; a fractional TTL rounds up.
fn whole_seconds(ttl: Duration) -> u64 {
    let secs = ttl.as_secs() + u64::from(ttl.subsec_nanos() > 0);
    secs.max(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use database::store::MockKeyValueStore;
    use database::{Clock, DatabaseError, KeyValueStore, ManualClock, MemoryStore};
    use std::sync::Arc;

    fn sessions() -> (SessionStore, Arc<MemoryStore>, ManualClock) {
        let clock = ManualClock::starting_at(1_700_000_000_000);
        let shared = Arc::new(clock.clone());
        let store = Arc::new(MemoryStore::with_clock(shared.clone()));
        (
            SessionStore::new(store.clone(), shared, SessionConfig::default()),
            store,
            clock,
        )
    }

    #[tokio::test]
    async fn test_create_then_get_returns_fields() {
        let (sessions, _, _) = sessions();

        let id = sessions
            .create_session("u1", "client", "u@x.com", None)
            .await
            .unwrap();
        let session = sessions.get_session(&id).await.unwrap().unwrap();

        assert_eq!(session.session_id, id);
        assert_eq!(session.user_id, "u1");
        assert_eq!(session.role, "client");
        assert_eq!(session.email, "u@x.com");
        assert_eq!(session.ttl, 86_400);
    }

    #[tokio::test]
    async fn test_missing_session_is_none() {
        let (sessions, _, _) = sessions();
        assert!(sessions.get_session("nope").await.unwrap().is_none());
        assert!(!sessions.is_valid_session("nope").await.unwrap());
        assert!(!sessions.extend_session("nope", 60).await.unwrap());
        assert!(!sessions
            .update_session("nope", SessionUpdate::default())
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_get_session_slides_expiry() {
        let (sessions, store, clock) = sessions();
        let id = sessions
            .create_session("u1", "client", "u@x.com", Some(Duration::from_secs(60)))
            .await
            .unwrap();

        clock.advance(Duration::from_secs(50));
        let session = sessions.get_session(&id).await.unwrap().unwrap();
        assert_eq!(session.last_activity, clock.now());

        clock.advance(Duration::from_secs(50));
        assert!(sessions.is_valid_session(&id).await.unwrap());
        assert_eq!(
            store.ttl(&format!("session:{}", id)).await.unwrap(),
            Some(Duration::from_secs(60))
        );

        clock.advance(Duration::from_secs(61));
        assert!(!sessions.is_valid_session(&id).await.unwrap());
    }

    #[tokio::test]
    async fn test_delete_session_removes_it_from_index() {
        let (sessions, store, _) = sessions();
        let id = sessions
            .create_session("u1", "client", "u@x.com", None)
            .await
            .unwrap();

        assert!(sessions.delete_session(&id).await.unwrap());

        assert!(!sessions.is_valid_session(&id).await.unwrap());
        assert!(store.smembers("user_sessions:u1").await.unwrap().is_empty());
        assert!(!sessions.delete_session(&id).await.unwrap());
    }

    #[tokio::test]
    async fn test_delete_user_sessions_counts_all_devices() {
        let (sessions, store, _) = sessions();
        for _ in 0..3 {
            sessions
                .create_session("u1", "client", "u@x.com", None)
                .await
                .unwrap();
        }
        let other = sessions
            .create_session("u2", "vendor", "v@x.com", None)
            .await
            .unwrap();

        assert_eq!(sessions.delete_user_sessions("u1").await.unwrap(), 3);

        assert!(!store.exists("user_sessions:u1").await.unwrap());
        assert!(sessions.is_valid_session(&other).await.unwrap());
    }

    #[tokio::test]
    async fn test_get_user_sessions_prunes_expired() {
        let (sessions, store, clock) = sessions();
        let short = sessions
            .create_session("u1", "client", "u@x.com", Some(Duration::from_secs(10)))
            .await
            .unwrap();
        clock.advance(Duration::from_secs(1));
        let long = sessions
            .create_session("u1", "client", "u@x.com", Some(Duration::from_secs(600)))
            .await
            .unwrap();

        assert_eq!(sessions.get_user_sessions("u1").await.unwrap().len(), 2);

        clock.advance(Duration::from_secs(10));
        let live = sessions.get_user_sessions("u1").await.unwrap();

        assert_eq!(live.len(), 1);
        assert_eq!(live[0].session_id, long);
        let index = store.smembers("user_sessions:u1").await.unwrap();
        assert!(!index.contains(&short));
    }

    #[tokio::test]
    async fn test_user_index_outlives_longest_session() {
        let (sessions, store, _) = sessions();
        sessions
            .create_session("u1", "client", "u@x.com", Some(Duration::from_secs(600)))
            .await
            .unwrap();
        sessions
            .create_session("u1", "client", "u@x.com", Some(Duration::from_secs(60)))
            .await
            .unwrap();

        assert_eq!(
            store.ttl("user_sessions:u1").await.unwrap(),
            Some(Duration::from_secs(600))
        );
    }

    #[tokio::test]
    async fn test_update_session_merges_metadata() {
        let (sessions, _, _) = sessions();
        let id = sessions
            .create_session("u1", "client", "u@x.com", None)
            .await
            .unwrap();

        sessions
            .update_session(&id, SessionUpdate::default().metadata("device", "ios"))
            .await
            .unwrap();
        assert!(sessions
            .update_session(
                &id,
                SessionUpdate::default().role("vendor").metadata("locale", "en")
            )
            .await
            .unwrap());

        let session = sessions.get_session(&id).await.unwrap().unwrap();
        assert_eq!(session.role, "vendor");
        assert_eq!(session.email, "u@x.com");
        assert_eq!(session.metadata["device"], "ios");
        assert_eq!(session.metadata["locale"], "en");
    }

    #[tokio::test]
    async fn test_extend_session_sets_remaining_ttl() {
        let (sessions, store, _) = sessions();
        let id = sessions
            .create_session("u1", "client", "u@x.com", Some(Duration::from_secs(60)))
            .await
            .unwrap();
        let index_ttl = store.ttl("user_sessions:u1").await.unwrap();

        assert!(sessions.extend_session(&id, 7200).await.unwrap());

        assert_eq!(
            store.ttl(&format!("session:{}", id)).await.unwrap(),
            Some(Duration::from_secs(7200))
        );
        assert_eq!(store.ttl("user_sessions:u1").await.unwrap(), index_ttl);
    }

    #[tokio::test]
    async fn test_session_stats_active_window() {
        let (sessions, _, clock) = sessions();
        let stale = sessions
            .create_session("u1", "client", "u@x.com", None)
            .await
            .unwrap();
        sessions
            .create_session("u2", "client", "v@x.com", None)
            .await
            .unwrap();

        clock.advance(Duration::from_secs(20 * 60));
        let fresh = sessions
            .create_session("u3", "vendor", "w@x.com", None)
            .await
            .unwrap();

        let stats = sessions.get_session_stats().await.unwrap();
        assert_eq!(stats, SessionStats { total_sessions: 3, active_sessions: 1 });

        sessions.get_session(&stale).await.unwrap();
        let stats = sessions.get_session_stats().await.unwrap();
        assert_eq!(stats.active_sessions, 2);
        assert!(sessions.is_valid_session(&fresh).await.unwrap());
    }

    #[tokio::test]
    async fn test_malformed_record_is_a_miss() {
        let (sessions, store, _) = sessions();
        store.set("session:bad", "not json", None).await.unwrap();

        assert!(sessions.get_session("bad").await.unwrap().is_none());
        assert_eq!(sessions.get_session_stats().await.unwrap().total_sessions, 0);
    }

    #[tokio::test]
    async fn test_sub_second_ttl_rounds_up_to_a_second() {
        let (sessions, store, clock) = sessions();
        let id = sessions
            .create_session("u1", "client", "u@x.com", Some(Duration::from_millis(500)))
            .await
            .unwrap();

        let session = sessions.get_session(&id).await.unwrap().unwrap();
        assert_eq!(session.ttl, 1);
        assert_eq!(
            store.ttl(&format!("session:{}", id)).await.unwrap(),
            Some(Duration::from_secs(1))
        );

        clock.advance(Duration::from_millis(999));
        assert!(sessions.is_valid_session(&id).await.unwrap());
    }

    #[tokio::test]
    async fn test_extend_to_zero_keeps_session_for_a_second() {
        let (sessions, store, _) = sessions();
        let id = sessions
            .create_session("u1", "client", "u@x.com", None)
            .await
            .unwrap();

        assert!(sessions.extend_session(&id, 0).await.unwrap());
        assert_eq!(
            store.ttl(&format!("session:{}", id)).await.unwrap(),
            Some(Duration::from_secs(1))
        );
    }

    #[tokio::test]
    async fn test_session_deleted_between_read_and_write_is_not_recreated() {
        let clock = ManualClock::new();
        let session = Session {
            session_id: "s1".to_string(),
            user_id: "u1".to_string(),
            role: "client".to_string(),
            email: "u@x.com".to_string(),
            created_at: clock.now(),
            last_activity: clock.now(),
            ttl: 60,
            metadata: Map::new(),
        };
        let raw = serde_json::to_string(&session).unwrap();

        let mut store = MockKeyValueStore::new();
        store
            .expect_get()
            .returning(move |_| Ok(Some(raw.clone())));
        // A concurrent delete_session removed the record after the read
        store
            .expect_set_if_exists()
            .times(3)
            .returning(|_, _, _| Ok(false));
        store.expect_ttl().returning(|_| Ok(None));
        store.expect_set().never();
        store.expect_expire().never();
        let sessions = SessionStore::new(Arc::new(store), Arc::new(clock), SessionConfig::default());

        assert!(sessions.get_session("s1").await.unwrap().is_none());
        assert!(!sessions
            .update_session("s1", SessionUpdate::default().role("vendor"))
            .await
            .unwrap());
        assert!(!sessions.extend_session("s1", 3600).await.unwrap());
    }

    #[tokio::test]
    async fn test_session_stats_namespace_is_matched_literally() {
        let clock = ManualClock::starting_at(1_700_000_000_000);
        let shared = Arc::new(clock.clone());
        let store = Arc::new(MemoryStore::with_clock(shared.clone()));
        let config = SessionConfig {
            namespace: "sess?".to_string(),
            ..SessionConfig::default()
        };
        let sessions = SessionStore::new(store.clone(), shared, config);

        let id = sessions
            .create_session("u1", "client", "u@x.com", None)
            .await
            .unwrap();
        let raw = store.get(&format!("sess?:{}", id)).await.unwrap().unwrap();
        store.set("sessX:other", &raw, None).await.unwrap();

        let keys = store.scan_keys("sess*").await.unwrap();
        assert_eq!(keys.len(), 2);
        assert_eq!(sessions.get_session_stats().await.unwrap().total_sessions, 1);
    }

    #[tokio::test]
    async fn test_store_failure_is_an_error() {
        let mut store = MockKeyValueStore::new();
        store
            .expect_get()
            .returning(|_| Err(DatabaseError::ConnectionFailed("refused".to_string())));
        let sessions = SessionStore::new(
            Arc::new(store),
            Arc::new(ManualClock::new()),
            SessionConfig::default(),
        );

        assert!(sessions.get_session("any").await.is_err());
    }
}
