//! Concurrent in-memory session store.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tracing::{debug, trace};

use crate::error::{Error, Result};
use crate::id::{SessionId, SessionIdGenerator, UuidSessionIdGenerator, assign_session_id};
use crate::session::Session;
use crate::store::{SessionStore, WriteMode};

/// Keeps sessions in a sharded concurrent map.
///
/// Suitable for a single process whose session population fits in memory.
/// Nothing is ever garbage-collected here; stopped and expired records stay
/// until the manager deletes them.
pub struct MemorySessionStore {
    sessions: DashMap<SessionId, Session>,
    id_generator: Arc<dyn SessionIdGenerator>,
}

impl Default for MemorySessionStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemorySessionStore {
    /// Create an empty store generating UUID ids.
    pub fn new() -> Self {
        Self::with_id_generator(Arc::new(UuidSessionIdGenerator))
    }

    /// Create an empty store with a custom id generator.
    pub fn with_id_generator(id_generator: Arc<dyn SessionIdGenerator>) -> Self {
        Self {
            sessions: DashMap::new(),
            id_generator,
        }
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    fn require_id(session: &Session) -> Result<&SessionId> {
        session.id().ok_or_else(|| {
            Error::Misconfigured("cannot persist a session that was never created".to_string())
        })
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn create(&self, session: &mut Session) -> Result<SessionId> {
        let had_id = session.id().is_some();
        let id = assign_session_id(self.id_generator.as_ref(), session)?;

        match self.sessions.entry(id.clone()) {
            Entry::Occupied(_) => {
                if !had_id {
                    session.clear_id();
                }
                debug!(session_id = %id, "Refusing to overwrite existing session");
                Err(Error::IdCollision(id.to_string()))
            }
            Entry::Vacant(slot) => {
                slot.insert(session.clone());
                trace!(session_id = %id, "Session created");
                Ok(id)
            }
        }
    }

    async fn read_session(&self, id: &SessionId) -> Result<Session> {
        self.sessions
            .get(id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| Error::UnknownSession(id.to_string()))
    }

    async fn update(&self, session: &mut Session) -> Result<()> {
        let id = Self::require_id(session)?.clone();
        let mut entry = self
            .sessions
            .get_mut(&id)
            .ok_or_else(|| Error::UnknownSession(id.to_string()))?;

        if let Err(e) = session.commit_over(&entry) {
            debug!(session_id = %id, stored = entry.revision(), "Refusing stale session write");
            return Err(e);
        }

        *entry = session.clone();
        Ok(())
    }

    async fn delete(&self, session: &Session) -> Result<()> {
        if let Some(id) = session.id()
            && self.sessions.remove(id).is_some()
        {
            trace!(session_id = %id, "Session deleted");
        }
        Ok(())
    }

    async fn active_sessions(&self) -> Result<Vec<Session>> {
        Ok(self
            .sessions
            .iter()
            .map(|entry| entry.value().clone())
            .collect())
    }

    fn write_mode(&self) -> WriteMode {
        WriteMode::Persist
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct FixedGenerator;

    impl SessionIdGenerator for FixedGenerator {
        fn generate_id(&self, _session: &Session) -> SessionId {
            SessionId::new("same-every-time")
        }
    }

    #[tokio::test]
    async fn test_create_and_read() {
        let store = MemorySessionStore::new();
        let mut session = Session::new().with_host("127.0.0.1");

        let id = store.create(&mut session).await.unwrap();
        assert_eq!(session.id(), Some(&id));

        let read = store.read_session(&id).await.unwrap();
        assert_eq!(read, session);
    }

    #[tokio::test]
    async fn test_read_unknown() {
        let store = MemorySessionStore::new();
        let err = store
            .read_session(&SessionId::new("nope"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::UnknownSession(_)));
    }

    #[tokio::test]
    async fn test_create_refuses_collision() {
        let store = MemorySessionStore::with_id_generator(Arc::new(FixedGenerator));

        let mut first = Session::new();
        first.set_attribute("owner", json!("first"));
        store.create(&mut first).await.unwrap();

        let mut second = Session::new();
        second.set_attribute("owner", json!("second"));
        let err = store.create(&mut second).await.unwrap_err();

        assert!(matches!(err, Error::IdCollision(_)));
        assert!(second.id().is_none());

        let stored = store
            .read_session(&SessionId::new("same-every-time"))
            .await
            .unwrap();
        assert_eq!(stored.attribute("owner"), Some(&json!("first")));
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_update_persists_mutation() {
        let store = MemorySessionStore::new();
        let mut session = Session::new();
        let id = store.create(&mut session).await.unwrap();

        session.set_attribute("k", json!("v"));
        store.update(&mut session).await.unwrap();
        assert_eq!(session.revision(), 1);

        let read = store.read_session(&id).await.unwrap();
        assert_eq!(read.attribute("k"), Some(&json!("v")));
        assert_eq!(read, session);
    }

    #[tokio::test]
    async fn test_update_never_resurrects() {
        let store = MemorySessionStore::new();
        let mut session = Session::new();
        let id = store.create(&mut session).await.unwrap();
        let mut stale = session.clone();

        session.stop();
        store.update(&mut session).await.unwrap();

        stale.touch();
        let err = store.update(&mut stale).await.unwrap_err();
        assert!(err.is_conflict());
        assert!(store.read_session(&id).await.unwrap().is_stopped());
    }

    #[tokio::test]
    async fn test_stale_expiry_cannot_overwrite_touch() {
        let store = MemorySessionStore::new();
        let t0 = chrono::Utc::now() - chrono::Duration::seconds(10);
        let mut session = Session::started_at(t0).with_timeout(Some(std::time::Duration::from_secs(5)));
        let id = store.create(&mut session).await.unwrap();
        let mut snapshot = session.clone();

        session.touch();
        store.update(&mut session).await.unwrap();

        // The snapshot still carries the old access time and looks expired.
        assert!(snapshot.validate().is_err());
        assert!(store.update(&mut snapshot).await.unwrap_err().is_conflict());

        let stored = store.read_session(&id).await.unwrap();
        assert!(stored.is_valid());
        assert_eq!(stored.last_access_time(), session.last_access_time());
    }

    #[tokio::test]
    async fn test_update_requires_create() {
        let store = MemorySessionStore::new();
        let err = store.update(&mut Session::new()).await.unwrap_err();
        assert!(matches!(err, Error::Misconfigured(_)));
    }

    #[tokio::test]
    async fn test_update_after_delete_is_unknown() {
        let store = MemorySessionStore::new();
        let mut session = Session::new();
        store.create(&mut session).await.unwrap();
        store.delete(&session).await.unwrap();

        let err = store.update(&mut session).await.unwrap_err();
        assert!(err.is_unknown_session());
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let store = MemorySessionStore::new();
        let mut session = Session::new();
        let id = store.create(&mut session).await.unwrap();

        store.delete(&session).await.unwrap();
        store.delete(&session).await.unwrap();
        store.delete(&Session::new()).await.unwrap();

        assert!(store.read_session(&id).await.is_err());
    }

    #[tokio::test]
    async fn test_active_sessions_snapshot() {
        let store = MemorySessionStore::new();
        for _ in 0..3 {
            store.create(&mut Session::new()).await.unwrap();
        }

        let snapshot = store.active_sessions().await.unwrap();
        assert_eq!(snapshot.len(), 3);

        store.create(&mut Session::new()).await.unwrap();
        assert_eq!(snapshot.len(), 3);
        assert_eq!(store.active_sessions().await.unwrap().len(), 4);
    }
}
