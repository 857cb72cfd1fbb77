//! Client-side session handle.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::id::SessionId;
use crate::key::{SessionContext, SessionKey};
use crate::manager::SessionManager;
use crate::session::AttributeValue;

/// A session handle that routes every call through the [`SessionManager`].
///
/// Holds no session state of its own besides the key, so every access is
/// validated and every mutation persisted by the manager.
#[derive(Clone)]
pub struct DelegatingSession {
    manager: Arc<SessionManager>,
    key: SessionKey,
}

impl DelegatingSession {
    pub fn new(manager: Arc<SessionManager>, key: SessionKey) -> Self {
        Self { manager, key }
    }

    /// Create a new session and return a handle to it.
    pub async fn start(manager: Arc<SessionManager>, context: &SessionContext) -> Result<Self> {
        let session = manager.create_session(context).await?;
        let id = crate::id::verify_session_id(session.id())?.clone();
        let key = match context.host() {
            Some(host) => SessionKey::new(id).with_host(host),
            None => SessionKey::new(id),
        };
        Ok(Self::new(manager, key))
    }

    pub fn id(&self) -> &SessionId {
        self.key.id()
    }

    pub fn key(&self) -> &SessionKey {
        &self.key
    }

    pub async fn start_timestamp(&self) -> Result<DateTime<Utc>> {
        self.manager.start_timestamp(&self.key).await
    }

    pub async fn last_access_time(&self) -> Result<DateTime<Utc>> {
        self.manager.last_access_time(&self.key).await
    }

    pub async fn timeout(&self) -> Result<Option<Duration>> {
        self.manager.timeout(&self.key).await
    }

    pub async fn set_timeout(&self, timeout: Option<Duration>) -> Result<()> {
        self.manager.set_timeout(&self.key, timeout).await
    }

    pub async fn host(&self) -> Result<Option<String>> {
        self.manager.host(&self.key).await
    }

    pub async fn touch(&self) -> Result<()> {
        self.manager.touch(&self.key).await
    }

    pub async fn stop(&self) -> Result<()> {
        self.manager.stop(&self.key).await
    }

    pub async fn attribute_keys(&self) -> Result<Vec<String>> {
        self.manager.attribute_keys(&self.key).await
    }

    pub async fn attribute(&self, name: &str) -> Result<Option<AttributeValue>> {
        self.manager.get_attribute(&self.key, name).await
    }

    pub async fn set_attribute(&self, name: &str, value: Option<AttributeValue>) -> Result<()> {
        self.manager.set_attribute(&self.key, name, value).await
    }

    pub async fn remove_attribute(&self, name: &str) -> Result<Option<AttributeValue>> {
        self.manager.remove_attribute(&self.key, name).await
    }

    pub async fn is_valid(&self) -> Result<bool> {
        self.manager.is_valid(&self.key).await
    }
}

impl std::fmt::Debug for DelegatingSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DelegatingSession")
            .field("key", &self.key)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SessionManagerConfig;
    use crate::store::MemorySessionStore;
    use serde_json::json;

    fn manager() -> Arc<SessionManager> {
        SessionManager::builder(Arc::new(MemorySessionStore::new()))
            .config(SessionManagerConfig::new().with_validation_scheduler(false))
            .build()
    }

    #[tokio::test]
    async fn test_handle_round_trip() {
        let manager = manager();
        let handle = DelegatingSession::start(
            Arc::clone(&manager),
            &SessionContext::new().with_host("10.9.8.7"),
        )
        .await
        .unwrap();

        assert_eq!(handle.host().await.unwrap().as_deref(), Some("10.9.8.7"));
        assert_eq!(handle.key().host(), Some("10.9.8.7"));

        handle.set_attribute("cart", Some(json!([1, 2]))).await.unwrap();
        assert_eq!(handle.attribute("cart").await.unwrap(), Some(json!([1, 2])));
        assert_eq!(handle.attribute_keys().await.unwrap(), vec!["cart".to_string()]);

        handle.set_attribute("cart", None).await.unwrap();
        assert_eq!(handle.attribute("cart").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_handle_stop_invalidates() {
        let manager = manager();
        let handle = DelegatingSession::start(Arc::clone(&manager), &SessionContext::new())
            .await
            .unwrap();
        assert!(handle.is_valid().await.unwrap());

        handle.stop().await.unwrap();
        assert!(!handle.is_valid().await.unwrap());
        assert!(handle.touch().await.is_err());
    }
}
