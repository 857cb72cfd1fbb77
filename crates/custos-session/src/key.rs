//! Value types that address a session lookup or describe a new session.

use std::fmt;

use crate::id::SessionId;

/// Addresses one session for lookup.
///
/// Keeps "how a session is found" separate from the record itself so the
/// addressing scheme can change without touching the manager API.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionKey {
    id: SessionId,
    host: Option<String>,
}

impl SessionKey {
    pub fn new(id: impl Into<SessionId>) -> Self {
        Self {
            id: id.into(),
            host: None,
        }
    }

    /// Attach the host the request came from.
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    pub fn id(&self) -> &SessionId {
        &self.id
    }

    pub fn host(&self) -> Option<&str> {
        self.host.as_deref()
    }
}

impl From<SessionId> for SessionKey {
    fn from(id: SessionId) -> Self {
        Self::new(id)
    }
}

impl From<&SessionId> for SessionKey {
    fn from(id: &SessionId) -> Self {
        Self::new(id.clone())
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.host {
            Some(host) => write!(f, "{}@{}", self.id, host),
            None => write!(f, "{}", self.id),
        }
    }
}

/// Request information used to start a new session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionContext {
    host: Option<String>,
}

impl SessionContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Context for a request from `host`.
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        let host = host.into();
        // Blank hosts carry no information.
        self.host = if host.trim().is_empty() {
            None
        } else {
            Some(host)
        };
        self
    }

    pub fn host(&self) -> Option<&str> {
        self.host.as_deref()
    }
}
