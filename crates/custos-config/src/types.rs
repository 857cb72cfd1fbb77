//! Configuration types mapping to the TOML schema.
//!
//! Top-level config:
//! ```toml
//! [session]                # session lifecycle and validation
//! [store]                  # which session store to run
//! ```

use std::time::Duration;

use custos_session::{CacheConfig, SessionManagerConfig, StoreKind};
use serde::{Deserialize, Serialize};

use crate::{ConfigError, Result};

// ─────────────────────────────────────────────────────────────────────────────
// Top-level Config
// ─────────────────────────────────────────────────────────────────────────────

/// Root configuration structure.
///
/// All sections are optional so that partial configs (e.g., project-local
/// overrides) can be loaded and merged.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CustosConfig {
    /// Session lifecycle configuration.
    pub session: Option<SessionSection>,

    /// Session store configuration.
    pub store: Option<StoreSection>,
}

impl CustosConfig {
    /// Create an empty config.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        Ok(toml::from_str(toml_str)?)
    }

    /// Serialize to a TOML string.
    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Merge another config on top of this one (other takes priority).
    pub fn merge(&mut self, other: CustosConfig) {
        if other.session.is_some() {
            self.session = other.session;
        }

        if other.store.is_some() {
            self.store = other.store;
        }
    }

    /// Reject values that parse but cannot be used.
    pub fn validate(&self) -> Result<()> {
        if let Some(store) = &self.store
            && store.max_cached_sessions == Some(0)
        {
            return Err(ConfigError::Invalid {
                field: "store.max_cached_sessions".to_string(),
                reason: "must be at least 1 (omit it for an unbounded cache)".to_string(),
            });
        }
        Ok(())
    }

    /// The session section, or its defaults.
    pub fn session(&self) -> SessionSection {
        self.session.clone().unwrap_or_default()
    }

    /// The store section, or its defaults.
    pub fn store(&self) -> StoreSection {
        self.store.clone().unwrap_or_default()
    }

    /// Settings for [`custos_session::SessionManager`].
    pub fn manager_config(&self) -> SessionManagerConfig {
        let session = self.session();
        let config = SessionManagerConfig::new()
            .with_validation_scheduler(session.validation_enabled)
            .with_validation_interval(session.validation_interval())
            .with_delete_invalid_sessions(session.delete_invalid);
        match session.timeout() {
            Some(timeout) => config.with_global_session_timeout(timeout),
            None => config.without_session_timeout(),
        }
    }

    /// Settings for the active-session cache.
    pub fn cache_config(&self) -> CacheConfig {
        match self.store().max_cached_sessions {
            Some(max) => CacheConfig::new().with_max_sessions(max),
            None => CacheConfig::new().unbounded(),
        }
    }

    /// Which bundled store to build.
    pub fn store_kind(&self) -> StoreKind {
        self.store().kind.into()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Session Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Session lifecycle configuration.
///
/// ```toml
/// [session]
/// timeout_secs = 1800
/// validation_enabled = true
/// validation_interval_secs = 3600
/// delete_invalid = true
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSection {
    /// Idle timeout in seconds. Zero or negative means sessions never expire.
    pub timeout_secs: i64,
    /// Whether the background validation scheduler runs.
    pub validation_enabled: bool,
    /// Seconds between validation sweeps. Zero leaves the scheduler inert.
    pub validation_interval_secs: u64,
    /// Whether invalidated sessions are deleted from the store.
    pub delete_invalid: bool,
}

impl Default for SessionSection {
    fn default() -> Self {
        let defaults = SessionManagerConfig::default();
        Self {
            timeout_secs: defaults
                .global_session_timeout
                .map_or(0, |t| t.as_secs() as i64),
            validation_enabled: defaults.validation_scheduler_enabled,
            validation_interval_secs: defaults.validation_interval.as_secs(),
            delete_invalid: defaults.delete_invalid_sessions,
        }
    }
}

/// Interpret an idle timeout given in seconds.
///
/// Zero or negative means sessions never expire, wherever the value comes
/// from.
pub fn session_timeout_from_secs(secs: i64) -> Option<Duration> {
    u64::try_from(secs)
        .ok()
        .filter(|secs| *secs > 0)
        .map(Duration::from_secs)
}

impl SessionSection {
    /// Idle timeout, or `None` if sessions never expire.
    pub fn timeout(&self) -> Option<Duration> {
        session_timeout_from_secs(self.timeout_secs)
    }

    pub fn validation_interval(&self) -> Duration {
        Duration::from_secs(self.validation_interval_secs)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Store Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Session store backends selectable from config.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// Concurrent in-memory map.
    #[default]
    Memory,
    /// LRU cache as the only system of record.
    Cache,
}

impl From<StoreBackend> for StoreKind {
    fn from(backend: StoreBackend) -> Self {
        match backend {
            StoreBackend::Memory => StoreKind::Memory,
            StoreBackend::Cache => StoreKind::Cache,
        }
    }
}

/// Session store configuration.
///
/// ```toml
/// [store]
/// kind = "cache"
/// max_cached_sessions = 10000
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreSection {
    pub kind: StoreBackend,
    /// Capacity of the active-session cache; unbounded when omitted.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_cached_sessions: Option<usize>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config() {
        let config = CustosConfig::from_toml("").unwrap();
        assert!(config.session.is_none());
        assert!(config.store.is_none());

        let manager = config.manager_config();
        assert_eq!(
            manager.global_session_timeout,
            Some(Duration::from_secs(30 * 60))
        );
        assert!(manager.validation_scheduler_enabled);
        assert_eq!(manager.validation_interval, Duration::from_secs(3600));
        assert!(manager.delete_invalid_sessions);
        assert_eq!(config.store_kind(), StoreKind::Memory);
    }

    #[test]
    fn test_parse_full_example() {
        let config = CustosConfig::from_toml(
            r#"
[session]
timeout_secs = 600
validation_enabled = false
validation_interval_secs = 120
delete_invalid = false

[store]
kind = "cache"
max_cached_sessions = 500
"#,
        )
        .unwrap();

        let manager = config.manager_config();
        assert_eq!(manager.global_session_timeout, Some(Duration::from_secs(600)));
        assert!(!manager.validation_scheduler_enabled);
        assert_eq!(manager.validation_interval, Duration::from_secs(120));
        assert!(!manager.delete_invalid_sessions);

        assert_eq!(config.store_kind(), StoreKind::Cache);
        assert_eq!(config.cache_config().max_sessions, Some(500));
    }

    #[test]
    fn test_partial_session_section_uses_defaults() {
        let config = CustosConfig::from_toml("[session]\ntimeout_secs = 60\n").unwrap();
        let session = config.session();
        assert_eq!(session.timeout(), Some(Duration::from_secs(60)));
        assert!(session.validation_enabled);
        assert!(session.delete_invalid);
    }

    #[test]
    fn test_non_positive_timeout_never_expires() {
        for raw in ["0", "-1"] {
            let config =
                CustosConfig::from_toml(&format!("[session]\ntimeout_secs = {raw}\n")).unwrap();
            assert_eq!(config.manager_config().global_session_timeout, None);
        }
    }

    #[test]
    fn test_session_timeout_from_secs() {
        assert_eq!(session_timeout_from_secs(0), None);
        assert_eq!(session_timeout_from_secs(-30), None);
        assert_eq!(session_timeout_from_secs(1), Some(Duration::from_secs(1)));
        assert_eq!(
            session_timeout_from_secs(1800),
            Some(Duration::from_secs(1800))
        );
    }

    #[test]
    fn test_unknown_store_kind_rejected() {
        let err = CustosConfig::from_toml("[store]\nkind = \"redis\"\n").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_zero_cache_capacity_invalid() {
        let config = CustosConfig::from_toml("[store]\nmax_cached_sessions = 0\n").unwrap();
        let err = config.validate().unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { .. }));
        assert!(err.to_string().contains("store.max_cached_sessions"));
    }

    #[test]
    fn test_merge_override() {
        let mut base = CustosConfig::from_toml(
            r#"
[session]
timeout_secs = 60

[store]
kind = "cache"
"#,
        )
        .unwrap();
        let project = CustosConfig::from_toml("[session]\ntimeout_secs = 120\n").unwrap();

        base.merge(project);
        assert_eq!(base.session().timeout_secs, 120);
        // Untouched sections survive.
        assert_eq!(base.store().kind, StoreBackend::Cache);
    }

    #[test]
    fn test_roundtrip_toml() {
        let config = CustosConfig {
            session: Some(SessionSection {
                timeout_secs: 900,
                ..Default::default()
            }),
            store: Some(StoreSection {
                kind: StoreBackend::Cache,
                max_cached_sessions: Some(64),
            }),
        };
        let text = config.to_toml().unwrap();
        assert!(text.contains("timeout_secs = 900"));
        assert!(text.contains("kind = \"cache\""));
        assert_eq!(CustosConfig::from_toml(&text).unwrap(), config);
    }
}
