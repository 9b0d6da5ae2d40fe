//! Session Manager: short-lived, per-session resources behind opaque keys.
//!
//! Each session owns one backing file under a root directory. Sessions
//! expire after a sliding TTL; every successful access renews it. Expired
//! sessions are removed lazily on access and their files deleted by a
//! periodic sweep.

mod error;
mod manager;
pub mod sqlite;

pub use error::SessionError;
pub use manager::{SessionBackend, SessionInfo, SessionKey, SessionManager, SessionManagerConfig};
pub use sqlite::{SqliteBackend, run_sql};
