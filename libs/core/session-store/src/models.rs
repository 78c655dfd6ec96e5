use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub session_id: String,
    pub user_id: String,
    pub role: String,
    pub email: String,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    /// Lifetime in seconds, reapplied on every read
    pub ttl: u64,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

/// Partial update; `None` fields are left alone and metadata keys are merged
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionUpdate {
    pub role: Option<String>,
    pub email: Option<String>,
    pub metadata: Option<Map<String, Value>>,
}

impl SessionUpdate {
    pub fn role(mut self, role: impl Into<String>) -> Self {
        self.role = Some(role.into());
        self
    }

    pub fn email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    pub fn metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata
            .get_or_insert_with(Map::new)
            .insert(key.into(), value.into());
        self
    }

    pub(crate) fn apply(self, session: &mut Session) {
        if let Some(role) = self.role {
            session.role = role;
        }
        if let Some(email) = self.email {
            session.email = email;
        }
        if let Some(metadata) = self.metadata {
            session.metadata.extend(metadata);
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SessionStats {
    pub total_sessions: u64,
    pub active_sessions: u64,
}
