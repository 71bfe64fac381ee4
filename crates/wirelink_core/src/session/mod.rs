//! Sessions: client identities that outlive a single connection.
//!
//! A session is created by the application on a connection, persisted through
//! the injected [`SessionManager`], and can later be restored on any connection
//! by key. The [`SessionRegistry`] tracks which live connections currently hold
//! which session.

mod memory;
mod registry;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, error};
use uuid::Uuid;

use crate::connection::Connection;

pub use memory::InMemorySessionManager;
pub use registry::{Deregistration, SessionRegistry};

/// Raw session info as stored by the session manager.
pub type InfoMap = serde_json::Map<String, Value>;

/// Application metadata attached to a session.
pub trait SessionInfo: fmt::Debug + Send + Sync {
    /// Names of the fields this info carries.
    fn fields(&self) -> Vec<String>;

    /// Value of a single field.
    fn value(&self, field: &str) -> Option<Value>;

    fn to_map(&self) -> InfoMap {
        self.fields()
            .into_iter()
            .filter_map(|field| self.value(&field).map(|value| (field, value)))
            .collect()
    }
}

impl SessionInfo for InfoMap {
    fn fields(&self) -> Vec<String> {
        self.keys().cloned().collect()
    }

    fn value(&self, field: &str) -> Option<Value> {
        self.get(field).cloned()
    }

    fn to_map(&self) -> InfoMap {
        self.clone()
    }
}

/// Turns stored info into the application's typed representation.
pub type SessionInfoParser = Arc<dyn Fn(&InfoMap) -> Arc<dyn SessionInfo> + Send + Sync>;

/// A session as seen by a connection.
#[derive(Debug, Clone)]
pub struct Session {
    pub key: String,
    pub creation: DateTime<Utc>,
    pub last_lookup: DateTime<Utc>,
    pub info: Option<Arc<dyn SessionInfo>>,
}

impl Session {
    /// A fresh session created now.
    pub fn new(key: impl Into<String>, info: Option<Arc<dyn SessionInfo>>) -> Self {
        let now = Utc::now();
        Self {
            key: key.into(),
            creation: now,
            last_lookup: now,
            info,
        }
    }

    pub fn to_json(&self) -> JsonSession {
        JsonSession {
            key: self.key.clone(),
            creation: self.creation,
            last_lookup: self.last_lookup,
            info: self.info.as_ref().map(|info| info.to_map()),
        }
    }

    /// Encode the session the way clients receive it.
    pub fn encode(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(&self.to_json())
    }
}

/// Wire representation of a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JsonSession {
    pub key: String,
    pub creation: DateTime<Utc>,
    pub last_lookup: DateTime<Utc>,
    pub info: Option<InfoMap>,
}

/// A session record returned by [`SessionManager::on_session_lookup`].
#[derive(Debug, Clone, PartialEq)]
pub struct SessionLookupResult {
    pub creation: DateTime<Utc>,
    pub last_lookup: DateTime<Utc>,
    pub info: Option<InfoMap>,
}

/// Persistence hooks for sessions.
///
/// Hooks are called outside of any registry lock and may perform I/O.
#[async_trait]
pub trait SessionManager: Send + Sync + 'static {
    /// A session was created and attached to `connection`.
    async fn on_session_created(&self, connection: &Connection) -> anyhow::Result<()>;

    /// Find a session by key. `Ok(None)` means it does not exist.
    async fn on_session_lookup(&self, key: &str) -> anyhow::Result<Option<SessionLookupResult>>;

    /// The last connection closed the session; it should be destroyed.
    async fn on_session_closed(&self, key: &str) -> anyhow::Result<()>;
}

/// Generates keys for new sessions.
pub trait SessionKeyGenerator: Send + Sync + 'static {
    fn generate(&self) -> String;
}

/// Random UUID v4 keys.
#[derive(Debug, Default, Clone, Copy)]
pub struct UuidKeyGenerator;

impl SessionKeyGenerator for UuidKeyGenerator {
    fn generate(&self) -> String {
        Uuid::new_v4().simple().to_string()
    }
}

/// Session state shared by the server and all of its connections.
pub(crate) struct SessionContext {
    pub registry: SessionRegistry,
    /// `None` when sessions are disabled.
    pub manager: Option<Arc<dyn SessionManager>>,
    pub key_generator: Arc<dyn SessionKeyGenerator>,
    pub info_parser: Option<SessionInfoParser>,
}

impl SessionContext {
    pub fn enabled(&self) -> bool {
        self.manager.is_some()
    }

    /// Turn stored info into the session's info.
    ///
    /// Without a configured parser the raw map is used as is.
    pub fn parse_info(&self, raw: Option<&InfoMap>) -> Option<Arc<dyn SessionInfo>> {
        let raw = raw?;
        Some(match &self.info_parser {
            Some(parser) => parser(raw),
            None => Arc::new(raw.clone()),
        })
    }

    /// Clear the connection's session and deregister the connection from it.
    /// Calls the close hook when the session was destroyed.
    ///
    /// Of concurrent calls on one connection only the one that takes the
    /// session deregisters it, so the outcome and the hook stay together.
    pub async fn detach(
        &self,
        connection: &Arc<Connection>,
        destroy_if_last: bool,
    ) -> Option<Arc<Session>> {
        let session = connection.set_session(None)?;
        let outcome = self
            .registry
            .deregister_key(&session.key, connection.id(), destroy_if_last);

        debug!(
            connection = %connection.id(),
            session = %session.key,
            ?outcome,
            "Session detached"
        );

        if outcome == Deregistration::Destroyed
            && let Some(manager) = &self.manager
            && let Err(err) = manager.on_session_closed(&session.key).await
        {
            error!(
                session = %session.key,
                error = %err,
                "Session close hook failed"
            );
        }

        Some(session)
    }
}

impl fmt::Debug for SessionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionContext")
            .field("enabled", &self.enabled())
            .field("registry", &self.registry)
            .finish()
    }
}
