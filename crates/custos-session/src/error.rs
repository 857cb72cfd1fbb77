//! Error types for session operations.

use std::time::Duration;

use chrono::{DateTime, Utc};

/// Error type for session operations.
#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    /// No record exists for the requested session id.
    #[error("There is no session with id [{0}]")]
    UnknownSession(String),

    /// The session exists but was explicitly stopped (logout).
    #[error("Session with id [{0}] has been explicitly stopped; no further interaction is allowed")]
    StoppedSession(String),

    /// The session exists but exceeded its idle timeout.
    #[error("Session with id [{id}] has expired (last access {last_access}, timeout {timeout:?})")]
    ExpiredSession {
        id: String,
        last_access: DateTime<Utc>,
        timeout: Option<Duration>,
    },

    /// A create would have overwritten a live record with the same id.
    #[error("Session id [{0}] is already in use")]
    IdCollision(String),

    /// The record changed between read and write; re-read and retry.
    #[error("Session with id [{id}] was modified concurrently (read revision {expected}, stored revision {found})")]
    Conflict { id: String, expected: u64, found: u64 },

    /// The store or manager is wired incorrectly. Not recoverable at runtime.
    #[error("Session store misconfigured: {0}")]
    Misconfigured(String),

    /// The backing store failed.
    #[error("Session store error: {0}")]
    Store(String),
}

impl Error {
    /// Whether this error means the session exists but may no longer be used.
    ///
    /// Covers both explicit stops and expiration. Unknown sessions are not
    /// included; see [`Error::is_unknown_session`].
    pub fn is_invalid_session(&self) -> bool {
        matches!(self, Error::StoppedSession(_) | Error::ExpiredSession { .. })
    }

    /// Whether the session timed out, as opposed to being logged out.
    pub fn is_expired(&self) -> bool {
        matches!(self, Error::ExpiredSession { .. })
    }

    /// Whether a write lost a race with another writer.
    pub fn is_conflict(&self) -> bool {
        matches!(self, Error::Conflict { .. })
    }

    /// Whether the lookup key matched no stored record.
    pub fn is_unknown_session(&self) -> bool {
        matches!(self, Error::UnknownSession(_))
    }
}

/// Result type for session operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        let expired = Error::ExpiredSession {
            id: "abc".to_string(),
            last_access: Utc::now(),
            timeout: Some(Duration::from_secs(60)),
        };
        assert!(expired.is_invalid_session());
        assert!(expired.is_expired());

        let stopped = Error::StoppedSession("abc".to_string());
        assert!(stopped.is_invalid_session());
        assert!(!stopped.is_expired());

        let unknown = Error::UnknownSession("abc".to_string());
        assert!(!unknown.is_invalid_session());
        assert!(unknown.is_unknown_session());

        assert!(!Error::Store("down".to_string()).is_invalid_session());

        let conflict = Error::Conflict {
            id: "abc".to_string(),
            expected: 1,
            found: 2,
        };
        assert!(conflict.is_conflict());
        assert!(!conflict.is_invalid_session());
    }

    #[test]
    fn test_messages_carry_id() {
        let err = Error::UnknownSession("s-1".to_string());
        assert!(err.to_string().contains("[s-1]"));
    }
}
