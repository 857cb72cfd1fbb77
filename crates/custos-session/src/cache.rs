//! In-process cache of active sessions with optional LRU eviction.

use std::num::NonZeroUsize;
use std::sync::Arc;

use lru::LruCache;
use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::config::CacheConfig;
use crate::error::{Error, Result};
use crate::id::SessionId;
use crate::session::Session;

struct CacheInner {
    lru: LruCache<SessionId, Session>,
    /// Bumped whenever an entry leaves the cache.
    generation: u64,
    hits: u64,
    misses: u64,
}

impl CacheInner {
    fn push(&mut self, id: SessionId, session: Session) -> Option<SessionId> {
        let evicted = match self.lru.push(id.clone(), session) {
            Some((old_id, _)) if old_id != id => Some(old_id),
            _ => None,
        };

        if let Some(ref evicted_id) = evicted {
            self.generation += 1;
            debug!(
                session_id = %evicted_id,
                "Evicted least recently used session to make room"
            );
        }

        trace!(
            session_id = %id,
            cache_size = self.lru.len(),
            "Session cached"
        );

        evicted
    }
}

/// Thread-safe cache of sessions keyed by id.
///
/// Clones share the same underlying cache.
pub struct ActiveSessionCache {
    inner: Arc<Mutex<CacheInner>>,
    config: CacheConfig,
}

impl ActiveSessionCache {
    pub fn new(config: CacheConfig) -> Self {
        let lru = match config.max_sessions {
            Some(max) => LruCache::new(NonZeroUsize::new(max).unwrap_or(NonZeroUsize::MIN)),
            None => LruCache::unbounded(),
        };

        let inner = CacheInner {
            lru,
            generation: 0,
            hits: 0,
            misses: 0,
        };

        Self {
            inner: Arc::new(Mutex::new(inner)),
            config,
        }
    }

    /// Get the cache configuration.
    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn len(&self) -> usize {
        self.inner.lock().lru.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().lru.is_empty()
    }

    /// Look up a session, marking it recently used.
    pub fn get(&self, id: &SessionId) -> Option<Session> {
        let mut inner = self.inner.lock();
        let found = inner.lru.get(id).cloned();
        match found {
            Some(session) => {
                inner.hits += 1;
                trace!(session_id = %id, "Session found in cache");
                Some(session)
            }
            None => {
                inner.misses += 1;
                None
            }
        }
    }

    /// Insert or replace a session. Returns the id of an evicted session, if
    /// the cache was full.
    pub fn put(&self, id: SessionId, session: Session) -> Option<SessionId> {
        self.inner.lock().push(id, session)
    }

    /// Insert a session only if the id is not cached yet.
    pub fn put_if_absent(&self, id: SessionId, session: Session) -> bool {
        let mut inner = self.inner.lock();
        if inner.lru.contains(&id) {
            return false;
        }
        inner.push(id, session);
        true
    }

    /// Current removal generation, to pass to [`put_if_current`](Self::put_if_current).
    pub fn generation(&self) -> u64 {
        self.inner.lock().generation
    }

    /// Cache a copy obtained after [`generation`](Self::generation) returned
    /// `generation`.
    ///
    /// Nothing is cached if any entry left the cache in the meantime, or if
    /// the cached copy is a later revision. Returns whether the copy was
    /// cached.
    pub fn put_if_current(&self, id: SessionId, session: Session, generation: u64) -> bool {
        let mut inner = self.inner.lock();
        if inner.generation != generation {
            trace!(session_id = %id, "Cache changed since read, not caching");
            return false;
        }
        if let Some(cached) = inner.lru.peek(&id)
            && cached.revision() > session.revision()
        {
            return false;
        }
        inner.push(id, session);
        true
    }

    /// Replace the cached record with `session`, which must have been read
    /// from it.
    ///
    /// Fails with [`Error::Conflict`] if the cached record changed since, and
    /// with [`Error::UnknownSession`] if it is gone. On success `session`
    /// carries the new revision.
    pub fn replace(&self, id: &SessionId, session: &mut Session) -> Result<()> {
        let mut inner = self.inner.lock();
        let cached = inner
            .lru
            .get_mut(id)
            .ok_or_else(|| Error::UnknownSession(id.to_string()))?;
        session.commit_over(cached)?;
        *cached = session.clone();
        Ok(())
    }

    /// Remove a session, returning it if it was cached.
    pub fn remove(&self, id: &SessionId) -> Option<Session> {
        let mut inner = self.inner.lock();
        let removed = inner.lru.pop(id);
        if removed.is_some() {
            inner.generation += 1;
            debug!(session_id = %id, "Session uncached");
        }
        removed
    }

    pub fn contains(&self, id: &SessionId) -> bool {
        self.inner.lock().lru.contains(id)
    }

    /// Snapshot of every cached session.
    pub fn values(&self) -> Vec<Session> {
        self.inner
            .lock()
            .lru
            .iter()
            .map(|(_, session)| session.clone())
            .collect()
    }

    pub fn stats(&self) -> CacheStats {
        let inner = self.inner.lock();
        CacheStats {
            size: inner.lru.len(),
            capacity: self.config.max_sessions,
            hits: inner.hits,
            misses: inner.misses,
        }
    }
}

impl Clone for ActiveSessionCache {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            config: self.config.clone(),
        }
    }
}

/// Cache statistics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheStats {
    /// Current number of cached sessions.
    pub size: usize,

    /// Maximum capacity, `None` if unbounded.
    pub capacity: Option<usize>,

    /// Lookups answered from the cache.
    pub hits: u64,

    /// Lookups that missed.
    pub misses: u64,
}
