//! The session record and its lifecycle state.

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::config::DEFAULT_GLOBAL_SESSION_TIMEOUT;
use crate::error::{Error, Result};
use crate::id::SessionId;

/// Attribute values are opaque to the session layer.
pub type AttributeValue = serde_json::Value;

/// Lifecycle state of a session.
///
/// `Stopped` and `Expired` are terminal. An expired session also counts as
/// stopped, see [`Session::is_stopped`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SessionState {
    /// The session may be used.
    Active,
    /// Explicitly stopped, e.g. by logout.
    Stopped { at: DateTime<Utc> },
    /// Stopped because the idle timeout elapsed.
    Expired { at: DateTime<Utc> },
}

impl SessionState {
    /// Returns true if the session allows activity.
    pub fn is_active(&self) -> bool {
        matches!(self, SessionState::Active)
    }

    /// When the session left the active state, if it has.
    pub fn stopped_at(&self) -> Option<DateTime<Utc>> {
        match self {
            SessionState::Active => None,
            SessionState::Stopped { at } | SessionState::Expired { at } => Some(*at),
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Active => write!(f, "active"),
            SessionState::Stopped { .. } => write!(f, "stopped"),
            SessionState::Expired { .. } => write!(f, "expired"),
        }
    }
}

/// One logical session.
///
/// The record validates itself: [`Session::validate`] checks the idle timeout
/// and performs the active → expired transition in place. Persisting that
/// transition is the caller's job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    id: Option<SessionId>,
    start_timestamp: DateTime<Utc>,
    last_access_time: DateTime<Utc>,
    /// Idle timeout; `None` means the session never expires.
    timeout: Option<Duration>,
    state: SessionState,
    host: Option<String>,
    #[serde(default)]
    attributes: HashMap<String, AttributeValue>,
    /// Bumped by the store on every successful update.
    #[serde(default)]
    revision: u64,
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl Session {
    /// Create an active session starting now with the default idle timeout.
    pub fn new() -> Self {
        Self::started_at(Utc::now())
    }

    /// Create an active session whose start and last access time are `at`.
    pub fn started_at(at: DateTime<Utc>) -> Self {
        Self {
            id: None,
            start_timestamp: at,
            last_access_time: at,
            timeout: Some(DEFAULT_GLOBAL_SESSION_TIMEOUT),
            state: SessionState::Active,
            host: None,
            attributes: HashMap::new(),
            revision: 0,
        }
    }

    /// Set the originating host.
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    /// Set the idle timeout.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn id(&self) -> Option<&SessionId> {
        self.id.as_ref()
    }

    /// Assign the identifier. Stores call this from `create`.
    pub fn set_id(&mut self, id: SessionId) {
        self.id = Some(id);
    }

    pub(crate) fn clear_id(&mut self) {
        self.id = None;
    }

    /// Revision of the stored record this copy was read from.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// Accept `self` as the next revision of `stored`.
    ///
    /// Fails with [`Error::Conflict`] if `stored` has changed since this copy
    /// was read. Stores call this under their per-record lock, then persist
    /// `self`.
    pub fn commit_over(&mut self, stored: &Session) -> Result<()> {
        if self.revision != stored.revision {
            return Err(Error::Conflict {
                id: self.id_label(),
                expected: self.revision,
                found: stored.revision,
            });
        }
        self.revision += 1;
        Ok(())
    }

    pub fn start_timestamp(&self) -> DateTime<Utc> {
        self.start_timestamp
    }

    pub fn last_access_time(&self) -> DateTime<Utc> {
        self.last_access_time
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    pub fn set_timeout(&mut self, timeout: Option<Duration>) {
        self.timeout = timeout;
    }

    pub fn host(&self) -> Option<&str> {
        self.host.as_deref()
    }

    pub fn set_host(&mut self, host: Option<String>) {
        self.host = host;
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// The time the session was stopped, or `None` while it is active.
    pub fn stop_timestamp(&self) -> Option<DateTime<Utc>> {
        self.state.stopped_at()
    }

    /// True for both explicitly stopped and expired sessions.
    pub fn is_stopped(&self) -> bool {
        !self.state.is_active()
    }

    pub fn is_expired(&self) -> bool {
        matches!(self.state, SessionState::Expired { .. })
    }

    pub fn is_valid(&self) -> bool {
        self.state.is_active()
    }

    /// Record an access now.
    pub fn touch(&mut self) {
        self.touch_at(Utc::now());
    }

    /// Record an access at `at`. Never moves the last access time backwards.
    pub fn touch_at(&mut self, at: DateTime<Utc>) {
        if at > self.last_access_time {
            self.last_access_time = at;
        }
    }

    /// Stop the session now. No-op if it is already stopped or expired.
    pub fn stop(&mut self) {
        self.stop_at(Utc::now());
    }

    /// Stop the session at `at`; the stop also counts as the last access.
    pub fn stop_at(&mut self, at: DateTime<Utc>) {
        if self.state.is_active() {
            self.touch_at(at);
            self.state = SessionState::Stopped {
                at: self.last_access_time,
            };
        }
    }

    /// Mark the session expired at `at`. No-op unless it is active.
    pub fn expire_at(&mut self, at: DateTime<Utc>) {
        if self.state.is_active() {
            self.state = SessionState::Expired { at };
        }
    }

    /// Whether more than the idle timeout has passed between the last access
    /// and `now`. Exactly the timeout is not yet timed out.
    pub fn is_timed_out_at(&self, now: DateTime<Utc>) -> bool {
        let Some(timeout) = self.timeout else {
            return false;
        };
        match chrono::Duration::from_std(timeout) {
            Ok(timeout) => now.signed_duration_since(self.last_access_time) > timeout,
            Err(_) => false,
        }
    }

    /// Validate against the current time.
    pub fn validate(&mut self) -> Result<()> {
        self.validate_at(Utc::now())
    }

    /// Validate against `now`, expiring the session if it has timed out.
    ///
    /// Returns [`Error::StoppedSession`] for stopped sessions and
    /// [`Error::ExpiredSession`] for expired ones, including one expired by
    /// this call.
    pub fn validate_at(&mut self, now: DateTime<Utc>) -> Result<()> {
        match self.state {
            SessionState::Stopped { .. } => Err(Error::StoppedSession(self.id_label())),
            SessionState::Expired { .. } => Err(self.expired_error()),
            SessionState::Active if self.is_timed_out_at(now) => {
                self.expire_at(now);
                trace!(
                    session_id = %self.id_label(),
                    last_access = %self.last_access_time,
                    timeout = ?self.timeout,
                    "Session timed out"
                );
                Err(self.expired_error())
            }
            SessionState::Active => Ok(()),
        }
    }

    fn expired_error(&self) -> Error {
        Error::ExpiredSession {
            id: self.id_label(),
            last_access: self.last_access_time,
            timeout: self.timeout,
        }
    }

    pub(crate) fn id_label(&self) -> String {
        match &self.id {
            Some(id) => id.to_string(),
            None => "<unassigned>".to_string(),
        }
    }

    pub fn attributes(&self) -> &HashMap<String, AttributeValue> {
        &self.attributes
    }

    pub fn attribute_keys(&self) -> Vec<String> {
        self.attributes.keys().cloned().collect()
    }

    pub fn attribute(&self, key: &str) -> Option<&AttributeValue> {
        self.attributes.get(key)
    }

    /// Set an attribute, returning the previous value.
    pub fn set_attribute(
        &mut self,
        key: impl Into<String>,
        value: AttributeValue,
    ) -> Option<AttributeValue> {
        self.attributes.insert(key.into(), value)
    }

    pub fn remove_attribute(&mut self, key: &str) -> Option<AttributeValue> {
        self.attributes.remove(key)
    }
}
