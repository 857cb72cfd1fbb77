//! Server-side session lifecycle for Custos.
//!
//! This crate provides:
//! - A self-validating [`Session`] record with idle-timeout expiration
//! - A pluggable [`SessionStore`] contract with in-memory and cache-backed
//!   implementations, plus a caching decorator for any store
//! - A [`SessionManager`] that validates on every read and writes after every
//!   mutation
//! - A background [`ValidationScheduler`] that sweeps sessions no request
//!   ever revisits
//!
//! # Example
//!
//! ```rust,ignore
//! use custos_session::{SessionContext, SessionKey, SessionManager};
//!
//! let manager = SessionManager::in_memory();
//! let session = manager.create_session(&SessionContext::new().with_host("10.0.0.1")).await?;
//! let key = SessionKey::from(session.id().unwrap());
//! manager.touch(&key).await?;
//! ```

mod cache;
mod config;
mod error;
mod factory;
mod handle;
mod id;
mod key;
mod listener;
mod manager;
mod session;
mod store;
mod validation;

pub use cache::{ActiveSessionCache, CacheStats};
pub use config::{
    CacheConfig, DEFAULT_GLOBAL_SESSION_TIMEOUT, DEFAULT_VALIDATION_INTERVAL,
    SessionManagerConfig,
};
pub use error::{Error, Result};
pub use factory::{SessionFactory, SimpleSessionFactory};
pub use handle::DelegatingSession;
pub use id::{SessionId, SessionIdGenerator, UuidSessionIdGenerator, assign_session_id, verify_session_id};
pub use key::{SessionContext, SessionKey};
pub use listener::{ListenerError, SessionListener};
pub use manager::{SessionManager, SessionManagerBuilder};
pub use session::{AttributeValue, Session, SessionState};
pub use store::{
    CacheOnlyBackend, CachingSessionStore, MemorySessionStore, SessionStore, StoreKind, WriteMode,
};
pub use validation::{SweepReport, ValidatingSessionManager, ValidationScheduler};

/// Re-exported so stores and validators can share one cancellation type.
pub use tokio_util::sync::CancellationToken;
