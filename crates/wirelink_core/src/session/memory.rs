use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;

use crate::connection::Connection;
use crate::session::{SessionLookupResult, SessionManager};

/// A [`SessionManager`] keeping sessions in process memory.
///
/// Sessions survive connection loss but not a process restart. Every
/// successful lookup refreshes the session's last lookup time.
#[derive(Debug, Default)]
pub struct InMemorySessionManager {
    sessions: DashMap<String, SessionLookupResult, ahash::RandomState>,
}

impl InMemorySessionManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a session record directly, replacing any previous one.
    pub fn insert(&self, key: impl Into<String>, record: SessionLookupResult) {
        self.sessions.insert(key.into(), record);
    }

    pub fn contains(&self, key: &str) -> bool {
        self.sessions.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

#[async_trait]
impl SessionManager for InMemorySessionManager {
    async fn on_session_created(&self, connection: &Connection) -> anyhow::Result<()> {
        let session = connection
            .session()
            .ok_or_else(|| anyhow::anyhow!("connection {} has no session", connection.id()))?;

        self.sessions.insert(
            session.key.clone(),
            SessionLookupResult {
                creation: session.creation,
                last_lookup: session.last_lookup,
                info: session.info.as_ref().map(|info| info.to_map()),
            },
        );
        Ok(())
    }

    async fn on_session_lookup(&self, key: &str) -> anyhow::Result<Option<SessionLookupResult>> {
        Ok(self.sessions.get_mut(key).map(|mut record| {
            record.last_lookup = Utc::now();
            record.clone()
        }))
    }

    async fn on_session_closed(&self, key: &str) -> anyhow::Result<()> {
        self.sessions.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[tokio::test]
    async fn test_lookup_refreshes_last_lookup() {
        let manager = InMemorySessionManager::new();
        let long_ago = Utc::now() - Duration::hours(1);
        manager.insert(
            "k",
            SessionLookupResult {
                creation: long_ago,
                last_lookup: long_ago,
                info: None,
            },
        );

        let record = manager.on_session_lookup("k").await.unwrap().unwrap();
        assert_eq!(record.creation, long_ago);
        assert!(record.last_lookup > long_ago);
    }

    #[tokio::test]
    async fn test_lookup_missing_and_close() {
        let manager = InMemorySessionManager::new();
        assert_eq!(manager.on_session_lookup("nope").await.unwrap(), None);

        manager.insert(
            "k",
            SessionLookupResult {
                creation: Utc::now(),
                last_lookup: Utc::now(),
                info: None,
            },
        );
        manager.on_session_closed("k").await.unwrap();
        assert!(manager.is_empty());
    }
}
