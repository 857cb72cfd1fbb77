//! Session identifiers and id generation.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::session::Session;

/// Opaque, immutable session identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    /// Wrap an existing identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether the identifier is the empty string.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for SessionId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<&str> for SessionId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// Produces identifiers for sessions that do not yet have one.
///
/// Stores own a generator and call it from `create`.
pub trait SessionIdGenerator: Send + Sync {
    /// Generate a new identifier for `session`.
    fn generate_id(&self, session: &Session) -> SessionId;
}

/// Generates random (v4) UUIDs, 122 bits of randomness.
#[derive(Debug, Clone, Copy, Default)]
pub struct UuidSessionIdGenerator;

impl SessionIdGenerator for UuidSessionIdGenerator {
    fn generate_id(&self, _session: &Session) -> SessionId {
        SessionId(uuid::Uuid::new_v4().to_string())
    }
}

/// Give `session` an id if it has none, returning the id it ends up with.
///
/// An empty generated id is a wiring defect and reported as
/// [`Error::Misconfigured`].
pub fn assign_session_id(
    generator: &dyn SessionIdGenerator,
    session: &mut Session,
) -> Result<SessionId> {
    if let Some(id) = session.id() {
        return verify_session_id(Some(id)).cloned();
    }

    let id = generator.generate_id(session);
    verify_session_id(Some(&id))?;
    session.set_id(id.clone());
    Ok(id)
}

/// Reject a missing or empty id returned from a store.
pub fn verify_session_id(id: Option<&SessionId>) -> Result<&SessionId> {
    match id {
        Some(id) if !id.is_empty() => Ok(id),
        Some(_) => Err(Error::Misconfigured(
            "session id is empty; verify the configured id generator".to_string(),
        )),
        None => Err(Error::Misconfigured(
            "session store returned no session id; verify the store implementation".to_string(),
        )),
    }
}
