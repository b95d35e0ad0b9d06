//! Error types for session establishment and storage.

use thiserror::Error;

/// Errors from the session store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sled error: {0}")]
    Sled(#[from] sled::Error),

    #[error("corrupt session record: {0}")]
    Corrupt(String),
}

/// Errors from [`SessionKeyManager`](super::SessionKeyManager).
///
/// `Clone` because one establishment outcome is handed to every caller that
/// was waiting on it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    /// Network unreachable, timed out or a server-side failure. Retry later.
    #[error("transport error: {0}")]
    Transport(String),

    /// The server answered, but with something we can't use.
    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("session storage error: {0}")]
    Storage(String),

    /// A server-minted token failed its HMAC check.
    #[error("server token failed integrity check")]
    IntegrityCheckFailed,
}

impl SessionError {
    /// Worth retrying with the same inputs.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transport(_))
    }
}

impl From<StoreError> for SessionError {
    fn from(e: StoreError) -> Self {
        Self::Storage(e.to_string())
    }
}
