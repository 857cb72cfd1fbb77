//! Caching decorator over any [`SessionStore`], and the cache-only backend.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::trace;

use crate::cache::ActiveSessionCache;
use crate::config::CacheConfig;
use crate::error::{Error, Result};
use crate::id::{SessionId, SessionIdGenerator, UuidSessionIdGenerator, assign_session_id};
use crate::session::Session;
use crate::store::{SessionStore, WriteMode};

/// Adds an active-session cache in front of a backing store.
///
/// - `create` writes to the backing store, then caches.
/// - `read_session` answers from the cache and only falls through on a miss,
///   populating the cache with the result.
/// - `update` writes through, then re-caches valid sessions and uncaches
///   stopped or expired ones. Over a [`WriteMode::SharedReference`] backing
///   the cache is the record, so `update` replaces the cached copy and keeps
///   terminal records until they are deleted.
/// - `delete` deletes from the backing store, then uncaches.
///
/// Copies are only cached if no entry left the cache since they were read,
/// so a write racing a delete or an uncache never brings the id back.
pub struct CachingSessionStore<S> {
    backing: S,
    cache: ActiveSessionCache,
}

impl<S: SessionStore> CachingSessionStore<S> {
    pub fn new(backing: S, config: CacheConfig) -> Self {
        Self {
            backing,
            cache: ActiveSessionCache::new(config),
        }
    }

    /// The wrapped store.
    pub fn backing(&self) -> &S {
        &self.backing
    }

    /// The active-session cache.
    pub fn cache(&self) -> &ActiveSessionCache {
        &self.cache
    }

    fn cache_is_record(&self) -> bool {
        self.backing.write_mode() == WriteMode::SharedReference
    }

    /// Cache a copy read or written after `generation`, or drop the id so
    /// the next read goes to the backing store.
    fn recache(&self, id: &SessionId, session: &Session, generation: u64) {
        if !session.is_valid() || !self.cache.put_if_current(id.clone(), session.clone(), generation) {
            self.cache.remove(id);
        }
    }
}

impl CachingSessionStore<CacheOnlyBackend> {
    /// A store whose cache is the only system of record.
    pub fn cache_backed(config: CacheConfig) -> Self {
        Self::new(CacheOnlyBackend::new(), config)
    }
}

#[async_trait]
impl<S: SessionStore> SessionStore for CachingSessionStore<S> {
    async fn create(&self, session: &mut Session) -> Result<SessionId> {
        let id = self.backing.create(session).await?;
        if self.cache_is_record() {
            if !self.cache.put_if_absent(id.clone(), session.clone()) {
                return Err(Error::IdCollision(id.to_string()));
            }
        } else {
            self.cache.put(id.clone(), session.clone());
        }
        Ok(id)
    }

    async fn read_session(&self, id: &SessionId) -> Result<Session> {
        if let Some(session) = self.cache.get(id) {
            return Ok(session);
        }

        trace!(session_id = %id, "Session cache miss, reading backing store");
        let generation = self.cache.generation();
        let session = self.backing.read_session(id).await?;
        if session.is_valid() {
            self.cache.put_if_current(id.clone(), session.clone(), generation);
        }
        Ok(session)
    }

    async fn update(&self, session: &mut Session) -> Result<()> {
        let id = session
            .id()
            .cloned()
            .ok_or_else(|| {
                Error::Misconfigured("cannot persist a session that was never created".to_string())
            })?;

        if self.cache_is_record() {
            return self.cache.replace(&id, session);
        }

        let generation = self.cache.generation();
        if let Err(e) = self.backing.update(session).await {
            // The cached copy may be the stale one.
            self.cache.remove(&id);
            return Err(e);
        }
        self.recache(&id, session, generation);
        Ok(())
    }

    async fn delete(&self, session: &Session) -> Result<()> {
        self.backing.delete(session).await?;
        if let Some(id) = session.id() {
            self.cache.remove(id);
        }
        Ok(())
    }

    async fn active_sessions(&self) -> Result<Vec<Session>> {
        let mut sessions: HashMap<SessionId, Session> = self
            .backing
            .active_sessions()
            .await?
            .into_iter()
            .filter_map(|s| s.id().cloned().map(|id| (id, s)))
            .collect();

        // Cached copies are at least as fresh as the backing store's.
        for session in self.cache.values() {
            if let Some(id) = session.id() {
                sessions.insert(id.clone(), session);
            }
        }

        Ok(sessions.into_values().collect())
    }

    fn write_mode(&self) -> WriteMode {
        self.backing.write_mode()
    }
}

/// Backing store for a cache that is its own system of record.
///
/// Only assigns ids. Reads never find anything (a cache hit answers before
/// this is reached), and updates and deletes are no-ops because the
/// surrounding [`CachingSessionStore`] applies them to the cache.
pub struct CacheOnlyBackend {
    id_generator: Arc<dyn SessionIdGenerator>,
}

impl Default for CacheOnlyBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl CacheOnlyBackend {
    pub fn new() -> Self {
        Self::with_id_generator(Arc::new(UuidSessionIdGenerator))
    }

    pub fn with_id_generator(id_generator: Arc<dyn SessionIdGenerator>) -> Self {
        Self { id_generator }
    }
}

#[async_trait]
impl SessionStore for CacheOnlyBackend {
    async fn create(&self, session: &mut Session) -> Result<SessionId> {
        assign_session_id(self.id_generator.as_ref(), session)
    }

    async fn read_session(&self, id: &SessionId) -> Result<Session> {
        Err(Error::UnknownSession(id.to_string()))
    }

    async fn update(&self, _session: &mut Session) -> Result<()> {
        Ok(())
    }

    async fn delete(&self, _session: &Session) -> Result<()> {
        Ok(())
    }

    async fn active_sessions(&self) -> Result<Vec<Session>> {
        Ok(Vec::new())
    }

    fn write_mode(&self) -> WriteMode {
        WriteMode::SharedReference
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemorySessionStore;
    use serde_json::json;

    struct FixedIds;

    impl SessionIdGenerator for FixedIds {
        fn generate_id(&self, _session: &Session) -> SessionId {
            SessionId::new("fixed")
        }
    }

    #[tokio::test]
    async fn test_cache_backed_round_trip() {
        let store = CachingSessionStore::cache_backed(CacheConfig::new());
        let mut session = Session::new().with_host("10.0.0.2");
        session.set_attribute("role", json!("admin"));

        let id = store.create(&mut session).await.unwrap();
        let read = store.read_session(&id).await.unwrap();
        assert_eq!(read, session);
    }

    #[tokio::test]
    async fn test_cache_backed_update_recaches() {
        let store = CachingSessionStore::cache_backed(CacheConfig::new());
        let mut session = Session::new();
        let id = store.create(&mut session).await.unwrap();

        session.set_attribute("k", json!(1));
        store.update(&mut session).await.unwrap();

        assert_eq!(
            store.read_session(&id).await.unwrap().attribute("k"),
            Some(&json!(1))
        );
    }

    #[tokio::test]
    async fn test_cache_backed_stop_wins_over_stale_touch() {
        let store = CachingSessionStore::cache_backed(CacheConfig::new());
        let mut session = Session::new();
        let id = store.create(&mut session).await.unwrap();

        let mut toucher = store.read_session(&id).await.unwrap();
        let mut stopper = store.read_session(&id).await.unwrap();
        stopper.stop();
        store.update(&mut stopper).await.unwrap();

        toucher.touch();
        assert!(store.update(&mut toucher).await.unwrap_err().is_conflict());
        assert!(store.read_session(&id).await.unwrap().is_stopped());
    }

    #[tokio::test]
    async fn test_cache_backed_update_after_delete_is_unknown() {
        let store = CachingSessionStore::cache_backed(CacheConfig::new());
        let mut session = Session::new();
        let id = store.create(&mut session).await.unwrap();
        store.delete(&session).await.unwrap();

        session.touch();
        assert!(store.update(&mut session).await.unwrap_err().is_unknown_session());
        assert!(!store.cache().contains(&id));
    }

    #[tokio::test]
    async fn test_cache_backed_create_rejects_collision() {
        let generator: Arc<dyn SessionIdGenerator> = Arc::new(FixedIds);
        let store = CachingSessionStore::new(
            CacheOnlyBackend::with_id_generator(generator),
            CacheConfig::new(),
        );
        store.create(&mut Session::new()).await.unwrap();
        let err = store.create(&mut Session::new()).await.unwrap_err();
        assert!(matches!(err, Error::IdCollision(_)));
        assert_eq!(store.cache().len(), 1);
    }

    #[tokio::test]
    async fn test_invalid_session_is_uncached() {
        let store = CachingSessionStore::new(MemorySessionStore::new(), CacheConfig::new());
        let mut session = Session::new();
        let id = store.create(&mut session).await.unwrap();
        assert!(store.cache().contains(&id));

        session.stop();
        store.update(&mut session).await.unwrap();
        assert!(!store.cache().contains(&id));

        // The backing store still holds the terminal state.
        assert!(store.read_session(&id).await.unwrap().is_stopped());
        assert!(!store.cache().contains(&id));
    }

    #[tokio::test]
    async fn test_miss_populates_cache() {
        let backing = Arc::new(MemorySessionStore::new());
        let mut session = Session::new();
        let id = backing.create(&mut session).await.unwrap();

        let store = CachingSessionStore::new(Arc::clone(&backing), CacheConfig::new());
        assert!(!store.cache().contains(&id));

        store.read_session(&id).await.unwrap();
        assert!(store.cache().contains(&id));
    }

    #[tokio::test]
    async fn test_failed_update_drops_cached_copy() {
        let backing = Arc::new(MemorySessionStore::new());
        let store = CachingSessionStore::new(Arc::clone(&backing), CacheConfig::new());
        let mut session = Session::new();
        let id = store.create(&mut session).await.unwrap();

        // Another writer bypasses the cache.
        let mut direct = backing.read_session(&id).await.unwrap();
        direct.set_attribute("k", json!("direct"));
        backing.update(&mut direct).await.unwrap();

        session.touch();
        assert!(store.update(&mut session).await.unwrap_err().is_conflict());
        assert!(!store.cache().contains(&id));
        assert_eq!(
            store.read_session(&id).await.unwrap().attribute("k"),
            Some(&json!("direct"))
        );
    }

    #[tokio::test]
    async fn test_delete_uncaches_and_deletes() {
        let backing = Arc::new(MemorySessionStore::new());
        let store = CachingSessionStore::new(Arc::clone(&backing), CacheConfig::new());
        let mut session = Session::new();
        let id = store.create(&mut session).await.unwrap();

        store.delete(&session).await.unwrap();
        assert!(!store.cache().contains(&id));
        assert!(backing.is_empty());
    }

    #[tokio::test]
    async fn test_active_sessions_merges_backing_and_cache() {
        let backing = Arc::new(MemorySessionStore::new());
        let mut uncached = Session::new();
        backing.create(&mut uncached).await.unwrap();

        let store = CachingSessionStore::new(Arc::clone(&backing), CacheConfig::new());
        let mut cached = Session::new();
        store.create(&mut cached).await.unwrap();

        assert_eq!(store.active_sessions().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_cache_only_active_sessions_come_from_cache() {
        let store = CachingSessionStore::cache_backed(CacheConfig::new());
        for _ in 0..4 {
            store.create(&mut Session::new()).await.unwrap();
        }
        assert_eq!(store.active_sessions().await.unwrap().len(), 4);
        assert!(store.backing().active_sessions().await.unwrap().is_empty());
    }
}
