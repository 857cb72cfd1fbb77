//! Notification hooks for session lifecycle transitions.

use crate::session::Session;

/// Error type listeners may return. Failures are logged by the manager and
/// never abort the transition being reported.
pub type ListenerError = Box<dyn std::error::Error + Send + Sync>;

/// Receives session lifecycle events.
///
/// Listeners are called after the transition has been written to the store
/// and only ever see an immutable view of the session.
pub trait SessionListener: Send + Sync {
    /// A session was started and persisted.
    fn on_start(&self, _session: &Session) -> Result<(), ListenerError> {
        Ok(())
    }

    /// A session was stopped explicitly or found stopped during validation.
    fn on_stop(&self, _session: &Session) -> Result<(), ListenerError> {
        Ok(())
    }

    /// A session exceeded its idle timeout.
    fn on_expiration(&self, _session: &Session) -> Result<(), ListenerError> {
        Ok(())
    }
}
