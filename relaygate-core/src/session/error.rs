use thiserror::Error;

/// Session lookup and storage errors.
#[derive(Debug, Error)]
pub enum SessionError {
    /// No session with this key.
    #[error("invalid session")]
    InvalidSession,

    /// The session outlived its TTL. It is gone after this error.
    #[error("session expired")]
    SessionExpired,

    #[error("session storage error: {0}")]
    Io(#[from] std::io::Error),

    #[error("sql error: {0}")]
    Database(#[from] rusqlite::Error),
}

impl SessionError {
    /// Whether the error is about the key rather than the storage.
    #[must_use]
    pub fn is_lookup_failure(&self) -> bool {
        matches!(self, Self::InvalidSession | Self::SessionExpired)
    }
}
