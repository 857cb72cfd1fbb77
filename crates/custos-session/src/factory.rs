//! Construction of new session records.

use crate::key::SessionContext;
use crate::session::Session;

/// Builds new, unpersisted session records.
///
/// Factories never assign ids; that happens when the store persists the
/// record.
pub trait SessionFactory: Send + Sync {
    fn create_session(&self, context: &SessionContext) -> Session;
}

/// Creates a plain [`Session`], carrying the context host when one is given.
#[derive(Debug, Clone, Copy, Default)]
pub struct SimpleSessionFactory;

impl SessionFactory for SimpleSessionFactory {
    fn create_session(&self, context: &SessionContext) -> Session {
        let session = Session::new();
        match context.host() {
            Some(host) => session.with_host(host),
            None => session,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_host_is_carried() {
        let context = SessionContext::new().with_host("192.168.0.7");
        let session = SimpleSessionFactory.create_session(&context);
        assert_eq!(session.host(), Some("192.168.0.7"));
        assert!(session.id().is_none());
        assert!(session.is_valid());
    }

    #[test]
    fn test_no_host() {
        let session = SimpleSessionFactory.create_session(&SessionContext::new());
        assert_eq!(session.host(), None);
    }
}
