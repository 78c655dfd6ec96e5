//! Session Store
//!
//! One record per session with a sliding TTL, plus a per-user index of
//! session ids for multi-device tracking.
//!
//! ```text
//! {namespace}:{session_id}              JSON session record with TTL
//! {user_index_namespace}:{user_id}      set of the user's session ids
//! ```

mod config;
mod error;
mod models;
mod store;

pub use config::SessionConfig;
pub use error::{SessionError, SessionResult};
pub use models::{Session, SessionStats, SessionUpdate};
pub use store::SessionStore;
