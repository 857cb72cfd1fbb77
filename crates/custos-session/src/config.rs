//! Configuration for the session manager and the active-session cache.

use std::time::Duration;

/// Default idle timeout applied to new sessions: 30 minutes.
pub const DEFAULT_GLOBAL_SESSION_TIMEOUT: Duration = Duration::from_secs(30 * 60);

/// Default interval between validation sweeps: 1 hour.
pub const DEFAULT_VALIDATION_INTERVAL: Duration = Duration::from_secs(60 * 60);

/// Configuration for [`SessionManager`](crate::SessionManager).
#[derive(Debug, Clone)]
pub struct SessionManagerConfig {
    /// Idle timeout applied to every session at start.
    /// `None` means sessions never expire.
    pub global_session_timeout: Option<Duration>,

    /// Whether the background validation scheduler is started on first use.
    pub validation_scheduler_enabled: bool,

    /// Interval between validation sweeps.
    /// A zero interval leaves the scheduler inert.
    pub validation_interval: Duration,

    /// Whether invalidated sessions are deleted from the store once their
    /// terminal state has been written.
    pub delete_invalid_sessions: bool,
}

impl Default for SessionManagerConfig {
    fn default() -> Self {
        Self {
            global_session_timeout: Some(DEFAULT_GLOBAL_SESSION_TIMEOUT),
            validation_scheduler_enabled: true,
            validation_interval: DEFAULT_VALIDATION_INTERVAL,
            delete_invalid_sessions: true,
        }
    }
}

impl SessionManagerConfig {
    /// Create a new configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the idle timeout for new sessions.
    pub fn with_global_session_timeout(mut self, timeout: Duration) -> Self {
        self.global_session_timeout = Some(timeout);
        self
    }

    /// New sessions never expire from idleness.
    pub fn without_session_timeout(mut self) -> Self {
        self.global_session_timeout = None;
        self
    }

    /// Enable or disable the background validation scheduler.
    pub fn with_validation_scheduler(mut self, enabled: bool) -> Self {
        self.validation_scheduler_enabled = enabled;
        self
    }

    /// Set the validation sweep interval.
    pub fn with_validation_interval(mut self, interval: Duration) -> Self {
        self.validation_interval = interval;
        self
    }

    /// Keep or delete sessions after they are invalidated.
    pub fn with_delete_invalid_sessions(mut self, delete: bool) -> Self {
        self.delete_invalid_sessions = delete;
        self
    }
}

/// Configuration for the active-session cache used by caching stores.
#[derive(Debug, Clone, Default)]
pub struct CacheConfig {
    /// Maximum number of cached sessions before LRU eviction.
    /// `None` means unbounded.
    pub max_sessions: Option<usize>,
}

impl CacheConfig {
    /// Create a new configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Bound the cache to `max` sessions.
    pub fn with_max_sessions(mut self, max: usize) -> Self {
        self.max_sessions = Some(max);
        self
    }

    /// Never evict.
    pub fn unbounded(mut self) -> Self {
        self.max_sessions = None;
        self
    }
}
