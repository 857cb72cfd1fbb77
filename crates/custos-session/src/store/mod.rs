//! Session persistence.
//!
//! The [`SessionStore`] trait decouples the manager from any backing
//! technology. Two implementations ship with the crate:
//!
//! - [`MemorySessionStore`]: a concurrent map, for single-process deployments.
//! - [`CachingSessionStore`]: a decorator adding an active-session cache in
//!   front of any other store. Wrapped around [`CacheOnlyBackend`] the cache
//!   becomes the only system of record.

mod caching;
mod memory;

use std::sync::Arc;

use async_trait::async_trait;

use crate::config::CacheConfig;
use crate::error::Result;
use crate::id::SessionId;
use crate::session::Session;

pub use caching::{CacheOnlyBackend, CachingSessionStore};
pub use memory::MemorySessionStore;

/// How a store makes mutations durable.
///
/// Every implementation must declare one; there is no default.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    /// `update` writes the record; skipping it loses the mutation.
    Persist,
    /// Records live in the caching layer itself; the backing store is never
    /// written and `update` and `delete` on it are no-ops.
    SharedReference,
}

/// Contract every session store satisfies.
///
/// Implementations must be safe to call from many tasks at once without
/// external locking. Writes are optimistic: every record carries a
/// revision, and `update` only succeeds for a copy read from the revision
/// currently stored (see [`Session::commit_over`]).
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Persist a new record, assigning an id if the session has none.
    ///
    /// On success the session carries the returned id.
    async fn create(&self, session: &mut Session) -> Result<SessionId>;

    /// Read a record, or fail with [`Error::UnknownSession`](crate::Error::UnknownSession).
    ///
    /// Stores return stopped and expired records as-is; judging validity is
    /// the manager's job.
    async fn read_session(&self, id: &SessionId) -> Result<Session>;

    /// Persist mutations of an existing record.
    ///
    /// Fails with [`Error::Conflict`](crate::Error::Conflict) if the record
    /// changed since `session` was read, and with
    /// [`Error::UnknownSession`](crate::Error::UnknownSession) if it was
    /// deleted. On success `session` carries the new revision.
    async fn update(&self, session: &mut Session) -> Result<()>;

    /// Remove a record. Deleting an absent record is not an error.
    async fn delete(&self, session: &Session) -> Result<()>;

    /// Every record not yet deleted, as a snapshot.
    ///
    /// Used by validation sweeps; must tolerate concurrent writers.
    async fn active_sessions(&self) -> Result<Vec<Session>>;

    /// Which write discipline this store follows.
    fn write_mode(&self) -> WriteMode;
}

#[async_trait]
impl<S: SessionStore + ?Sized> SessionStore for Arc<S> {
    async fn create(&self, session: &mut Session) -> Result<SessionId> {
        (**self).create(session).await
    }

    async fn read_session(&self, id: &SessionId) -> Result<Session> {
        (**self).read_session(id).await
    }

    async fn update(&self, session: &mut Session) -> Result<()> {
        (**self).update(session).await
    }

    async fn delete(&self, session: &Session) -> Result<()> {
        (**self).delete(session).await
    }

    async fn active_sessions(&self) -> Result<Vec<Session>> {
        (**self).active_sessions().await
    }

    fn write_mode(&self) -> WriteMode {
        (**self).write_mode()
    }
}

/// Selects one of the bundled store implementations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StoreKind {
    /// [`MemorySessionStore`].
    #[default]
    Memory,
    /// [`CachingSessionStore`] over [`CacheOnlyBackend`].
    Cache,
}

impl StoreKind {
    /// Build a fresh store of this kind.
    pub fn build(self, cache: CacheConfig) -> Arc<dyn SessionStore> {
        match self {
            StoreKind::Memory => Arc::new(MemorySessionStore::new()),
            StoreKind::Cache => Arc::new(CachingSessionStore::cache_backed(cache)),
        }
    }
}

impl std::str::FromStr for StoreKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "memory" => Ok(StoreKind::Memory),
            "cache" => Ok(StoreKind::Cache),
            other => Err(format!("unknown store kind '{other}' (expected memory or cache)")),
        }
    }
}

impl std::fmt::Display for StoreKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreKind::Memory => write!(f, "memory"),
            StoreKind::Cache => write!(f, "cache"),
        }
    }
}
