//! The session manager: single entry point for request-handling code.
//!
//! Wraps a [`SessionStore`] and a [`SessionFactory`], validates every session
//! it hands out, and owns the background [`ValidationScheduler`].
//!
//! Every mutation is followed by a store write. Invalidating transitions
//! (stop, expire) are written before listeners hear about them and before an
//! error is returned to the caller.
//!
//! Writes are read-modify-write cycles against the store's revision check: a
//! cycle whose copy went stale is retried from a fresh read, so concurrent
//! callers never overwrite each other's changes.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::config::SessionManagerConfig;
use crate::error::{Error, Result};
use crate::factory::{SessionFactory, SimpleSessionFactory};
use crate::id::{SessionId, verify_session_id};
use crate::key::{SessionContext, SessionKey};
use crate::listener::{ListenerError, SessionListener};
use crate::session::{AttributeValue, Session};
use crate::store::{MemorySessionStore, SessionStore};
use crate::validation::{SweepReport, ValidatingSessionManager, ValidationScheduler};

/// Read-modify-write cycles attempted before a conflict is returned.
const MAX_WRITE_ATTEMPTS: usize = 16;

/// Lifecycle event delivered to listeners.
#[derive(Debug, Clone, Copy)]
enum Event {
    Start,
    Stop,
    Expiration,
}

impl Event {
    fn name(self) -> &'static str {
        match self {
            Event::Start => "start",
            Event::Stop => "stop",
            Event::Expiration => "expiration",
        }
    }
}

/// Builder for [`SessionManager`].
pub struct SessionManagerBuilder {
    store: Arc<dyn SessionStore>,
    factory: Arc<dyn SessionFactory>,
    config: SessionManagerConfig,
    listeners: Vec<Arc<dyn SessionListener>>,
}

impl SessionManagerBuilder {
    pub fn factory(mut self, factory: Arc<dyn SessionFactory>) -> Self {
        self.factory = factory;
        self
    }

    pub fn config(mut self, config: SessionManagerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn listener(mut self, listener: Arc<dyn SessionListener>) -> Self {
        self.listeners.push(listener);
        self
    }

    pub fn build(self) -> Arc<SessionManager> {
        Arc::new_cyclic(|this: &Weak<SessionManager>| {
            let target: Weak<dyn ValidatingSessionManager> = this.clone();
            SessionManager {
                store: self.store,
                factory: self.factory,
                listeners: RwLock::new(self.listeners),
                scheduler: ValidationScheduler::new(target, self.config.validation_interval),
                validation_started: AtomicBool::new(false),
                config: self.config,
            }
        })
    }
}

/// Creates, reads, mutates and validates sessions.
///
/// Always handled through an `Arc`, see [`SessionManager::builder`].
pub struct SessionManager {
    store: Arc<dyn SessionStore>,
    factory: Arc<dyn SessionFactory>,
    listeners: RwLock<Vec<Arc<dyn SessionListener>>>,
    config: SessionManagerConfig,
    scheduler: ValidationScheduler,
    validation_started: AtomicBool,
}

impl SessionManager {
    /// Start building a manager over `store`.
    pub fn builder(store: Arc<dyn SessionStore>) -> SessionManagerBuilder {
        SessionManagerBuilder {
            store,
            factory: Arc::new(SimpleSessionFactory),
            config: SessionManagerConfig::default(),
            listeners: Vec::new(),
        }
    }

    /// A manager over a fresh [`MemorySessionStore`] with default settings.
    pub fn in_memory() -> Arc<Self> {
        Self::builder(Arc::new(MemorySessionStore::new())).build()
    }

    pub fn config(&self) -> &SessionManagerConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn SessionStore> {
        &self.store
    }

    pub fn scheduler(&self) -> &ValidationScheduler {
        &self.scheduler
    }

    pub fn add_listener(&self, listener: Arc<dyn SessionListener>) {
        self.listeners.write().push(listener);
    }

    /// Remove a previously added listener. Returns whether it was registered.
    pub fn remove_listener(&self, listener: &Arc<dyn SessionListener>) -> bool {
        let mut listeners = self.listeners.write();
        let before = listeners.len();
        listeners.retain(|l| !Arc::ptr_eq(l, listener));
        listeners.len() != before
    }

    // ─────────────────────────────────────────────────────────────────────
    // Scheduler lifecycle
    // ─────────────────────────────────────────────────────────────────────

    /// Start the validation scheduler once, if it is enabled in the config.
    ///
    /// Called on every create and lookup; only the first call does anything.
    /// After [`disable_session_validation`](Self::disable_session_validation)
    /// it stays off until explicitly re-enabled.
    pub fn ensure_started(&self) {
        if !self.config.validation_scheduler_enabled {
            return;
        }
        if self
            .validation_started
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
            && !self.scheduler.enable_session_validation()
        {
            // Retry on the next call, e.g. once a runtime is available.
            self.validation_started.store(false, Ordering::Release);
        }
    }

    /// Explicitly enable background validation.
    pub fn enable_session_validation(&self) -> bool {
        self.validation_started.store(true, Ordering::Release);
        self.scheduler.enable_session_validation()
    }

    /// Disable background validation. Idempotent, never fails.
    pub fn disable_session_validation(&self) {
        self.validation_started.store(true, Ordering::Release);
        self.scheduler.disable_session_validation();
    }

    /// Disable validation and wait briefly for an in-flight sweep.
    pub async fn destroy(&self) {
        self.validation_started.store(true, Ordering::Release);
        self.scheduler.shutdown().await;
    }

    // ─────────────────────────────────────────────────────────────────────
    // Session API
    // ─────────────────────────────────────────────────────────────────────

    /// Create a session through the factory and persist it.
    pub async fn create_session(&self, context: &SessionContext) -> Result<Session> {
        self.ensure_started();

        let mut session = self.factory.create_session(context);
        session.set_timeout(self.config.global_session_timeout);

        let id = self.store.create(&mut session).await?;
        verify_session_id(Some(&id))?;
        if session.id() != Some(&id) {
            return Err(Error::Misconfigured(format!(
                "store returned id [{id}] but did not assign it to the session"
            )));
        }

        debug!(session_id = %id, host = ?session.host(), "Started session");
        self.notify(Event::Start, &session);
        Ok(session)
    }

    /// Look up and validate a session.
    ///
    /// Fails with [`Error::UnknownSession`], [`Error::StoppedSession`] or
    /// [`Error::ExpiredSession`]. Does not extend the idle timeout; use
    /// [`touch`](Self::touch) for that.
    pub async fn get_session(&self, key: &SessionKey) -> Result<Session> {
        self.ensure_started();

        trace!(session_id = %key.id(), "Attempting to retrieve session");
        self.load_valid(key.id()).await
    }

    pub async fn start_timestamp(&self, key: &SessionKey) -> Result<DateTime<Utc>> {
        Ok(self.get_session(key).await?.start_timestamp())
    }

    pub async fn last_access_time(&self, key: &SessionKey) -> Result<DateTime<Utc>> {
        Ok(self.get_session(key).await?.last_access_time())
    }

    pub async fn timeout(&self, key: &SessionKey) -> Result<Option<Duration>> {
        Ok(self.get_session(key).await?.timeout())
    }

    pub async fn set_timeout(&self, key: &SessionKey, timeout: Option<Duration>) -> Result<()> {
        self.mutate(key, |s| {
            s.set_timeout(timeout);
            true
        })
        .await
        .map(drop)
    }

    /// Record an access, extending the idle window.
    pub async fn touch(&self, key: &SessionKey) -> Result<()> {
        self.mutate(key, |s| {
            s.touch();
            true
        })
        .await
        .map(drop)
    }

    pub async fn host(&self, key: &SessionKey) -> Result<Option<String>> {
        Ok(self.get_session(key).await?.host().map(str::to_string))
    }

    /// Explicitly stop (log out) a session.
    pub async fn stop(&self, key: &SessionKey) -> Result<()> {
        debug!(session_id = %key.id(), "Stopping session");
        let session = self
            .mutate(key, |s| {
                s.stop();
                true
            })
            .await?;
        self.notify(Event::Stop, &session);
        self.after_invalidation(&session).await
    }

    pub async fn attribute_keys(&self, key: &SessionKey) -> Result<Vec<String>> {
        Ok(self.get_session(key).await?.attribute_keys())
    }

    pub async fn get_attribute(
        &self,
        key: &SessionKey,
        name: &str,
    ) -> Result<Option<AttributeValue>> {
        Ok(self.get_session(key).await?.attribute(name).cloned())
    }

    /// Set an attribute. A `None` value removes it.
    pub async fn set_attribute(
        &self,
        key: &SessionKey,
        name: &str,
        value: Option<AttributeValue>,
    ) -> Result<()> {
        match value {
            Some(value) => self
                .mutate(key, |s| {
                    s.set_attribute(name, value.clone());
                    true
                })
                .await
                .map(drop),
            None => self.remove_attribute(key, name).await.map(|_| ()),
        }
    }

    /// Remove an attribute, writing only if something was removed.
    pub async fn remove_attribute(
        &self,
        key: &SessionKey,
        name: &str,
    ) -> Result<Option<AttributeValue>> {
        let mut removed = None;
        self.mutate(key, |s| {
            removed = s.remove_attribute(name);
            removed.is_some()
        })
        .await?;
        Ok(removed)
    }

    /// Whether the session exists and is still valid.
    ///
    /// Store failures are returned; unknown, stopped and expired sessions are
    /// simply `false`.
    pub async fn is_valid(&self, key: &SessionKey) -> Result<bool> {
        match self.check_valid(key).await {
            Ok(()) => Ok(true),
            Err(e) if e.is_invalid_session() || e.is_unknown_session() => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Fail unless the session exists and is still valid.
    pub async fn check_valid(&self, key: &SessionKey) -> Result<()> {
        self.get_session(key).await.map(|_| ())
    }

    /// Validate a single session, applying any transition it needs.
    pub async fn validate_session(&self, key: &SessionKey) -> Result<()> {
        self.check_valid(key).await
    }

    /// Number of records the store currently holds.
    pub async fn active_session_count(&self) -> Result<usize> {
        Ok(self.store.active_sessions().await?.len())
    }

    // ─────────────────────────────────────────────────────────────────────
    // Validation
    // ─────────────────────────────────────────────────────────────────────

    /// Read and validate a session, re-reading if validation raced a writer.
    async fn load_valid(&self, id: &SessionId) -> Result<Session> {
        let mut attempt = 1;
        loop {
            let mut session = self.store.read_session(id).await?;
            match self.validate(&mut session).await {
                Err(e) if e.is_conflict() && attempt < MAX_WRITE_ATTEMPTS => {
                    trace!(session_id = %id, attempt, "Session changed while validating; re-reading");
                    attempt += 1;
                }
                outcome => return outcome.map(|()| session),
            }
        }
    }

    /// Apply `f` to a fresh valid copy and write it back.
    ///
    /// `f` returns whether it changed anything; if not, nothing is written.
    /// On a conflicting write `f` runs again on a new copy. Returns the copy
    /// as written.
    async fn mutate<F>(&self, key: &SessionKey, mut f: F) -> Result<Session>
    where
        F: FnMut(&mut Session) -> bool + Send,
    {
        let mut attempt = 1;
        loop {
            let mut session = self.get_session(key).await?;
            if !f(&mut session) {
                return Ok(session);
            }
            match self.store.update(&mut session).await {
                Err(e) if e.is_conflict() && attempt < MAX_WRITE_ATTEMPTS => {
                    trace!(session_id = %key.id(), attempt, "Concurrent session write; retrying");
                    attempt += 1;
                }
                outcome => return outcome.map(|()| session),
            }
        }
    }

    /// Validate `session`, writing and announcing any transition.
    ///
    /// Returns the invalid-session error on failure, or a store error if the
    /// transition could not be written.
    async fn validate(&self, session: &mut Session) -> Result<()> {
        let was_valid = session.is_valid();
        let Err(invalid) = session.validate() else {
            return Ok(());
        };

        if was_valid {
            // Timed out just now: the transition must be written before
            // anyone hears about it.
            self.store.update(session).await?;
            debug!(session_id = %session.id_label(), "Session expired");
            self.notify(Event::Expiration, session);
        } else {
            trace!(
                session_id = %session.id_label(),
                state = %session.state(),
                "Session already invalid"
            );
        }

        self.after_invalidation(session).await?;
        Err(invalid)
    }

    async fn after_invalidation(&self, session: &Session) -> Result<()> {
        if self.config.delete_invalid_sessions {
            trace!(session_id = %session.id_label(), "Deleting invalid session");
            self.store.delete(session).await?;
        }
        Ok(())
    }

    async fn sweep(&self, cancel: Option<&CancellationToken>) -> Result<SweepReport> {
        info!("Validating all active sessions");

        let snapshot = self.store.active_sessions().await?;
        let report = self.sweep_listed(snapshot, cancel).await;

        if report.invalidated() > 0 {
            info!(%report, "Finished session validation; {} sessions were stopped", report.invalidated());
        } else {
            info!(%report, "Finished session validation; no sessions were stopped");
        }

        Ok(report)
    }

    /// Validate every listed session against its current record.
    async fn sweep_listed(
        &self,
        snapshot: Vec<Session>,
        cancel: Option<&CancellationToken>,
    ) -> SweepReport {
        let mut report = SweepReport::default();

        for listed in snapshot {
            if cancel.is_some_and(CancellationToken::is_cancelled) {
                report.interrupted = true;
                break;
            }

            let Some(id) = listed.id() else {
                warn!("Store listed a session without an id; skipping");
                report.checked += 1;
                report.failed += 1;
                continue;
            };

            // The listed copy may be older than the record; judge the record.
            let outcome = self.load_valid(id).await;
            if let Err(e) = &outcome
                && e.is_unknown_session()
            {
                trace!(session_id = %id, "Session deleted since the sweep started");
                continue;
            }

            report.checked += 1;
            match outcome {
                Ok(_) => {}
                Err(e) if e.is_expired() => {
                    debug!(session_id = %id, "Invalidated session (expired)");
                    report.expired += 1;
                }
                Err(e) if e.is_invalid_session() => {
                    debug!(session_id = %id, "Invalidated session (stopped)");
                    report.stopped += 1;
                }
                Err(e) => {
                    warn!(
                        session_id = %id,
                        error = %e,
                        "Failed to invalidate session; continuing sweep"
                    );
                    report.failed += 1;
                }
            }
        }

        report
    }

    fn notify(&self, event: Event, session: &Session) {
        let listeners = self.listeners.read().clone();
        for listener in &listeners {
            let outcome: std::result::Result<(), ListenerError> = match event {
                Event::Start => listener.on_start(session),
                Event::Stop => listener.on_stop(session),
                Event::Expiration => listener.on_expiration(session),
            };
            if let Err(e) = outcome {
                warn!(
                    session_id = %session.id_label(),
                    event = event.name(),
                    error = %e,
                    "Session listener failed; ignoring"
                );
            }
        }
    }
}

#[async_trait]
impl ValidatingSessionManager for SessionManager {
    async fn validate_sessions(&self) -> Result<SweepReport> {
        self.sweep(None).await
    }

    async fn validate_sessions_until(&self, cancel: &CancellationToken) -> Result<SweepReport> {
        self.sweep(Some(cancel)).await
    }
}
