use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use bon::Builder;
use bytes::Bytes;
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::error::{SessionError, SocketError};
use crate::message::build;
use crate::payload::Payload;
use crate::session::{Session, SessionContext, SessionInfo};
use crate::transport::Socket;

/// Server-assigned identity of a connection, unique for the server's lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ConnectionId(pub u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// What the transport knows about a client at accept time.
#[derive(Debug, Clone, Default, Builder)]
pub struct ConnectionInfo {
    #[builder(into)]
    pub user_agent: Option<String>,
    pub remote_addr: Option<SocketAddr>,
}

/// One live client connection.
///
/// Holds the socket and the session currently attached to it, if any.
pub struct Connection {
    id: ConnectionId,
    info: ConnectionInfo,
    socket: Arc<dyn Socket>,
    sessions: Arc<SessionContext>,
    session: Mutex<Option<Arc<Session>>>,
    active: AtomicBool,
}

impl Connection {
    pub(crate) fn new(
        id: ConnectionId,
        info: ConnectionInfo,
        socket: Arc<dyn Socket>,
        sessions: Arc<SessionContext>,
    ) -> Self {
        Self {
            id,
            info,
            socket,
            sessions,
            session: Mutex::new(None),
            active: AtomicBool::new(true),
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn info(&self) -> &ConnectionInfo {
        &self.info
    }

    /// The session currently attached to this connection.
    pub fn session(&self) -> Option<Arc<Session>> {
        self.session.lock().clone()
    }

    pub fn has_session(&self) -> bool {
        self.session.lock().is_some()
    }

    pub fn session_key(&self) -> Option<String> {
        self.session.lock().as_ref().map(|session| session.key.clone())
    }

    /// Whether the connection has not been closed yet.
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Replace the attached session, returning the previous one.
    pub(crate) fn set_session(&self, session: Option<Arc<Session>>) -> Option<Arc<Session>> {
        std::mem::replace(&mut *self.session.lock(), session)
    }

    /// Attach `session` unless one is already attached.
    pub(crate) fn attach_session(&self, session: Arc<Session>) -> Result<(), SessionError> {
        let mut slot = self.session.lock();
        if let Some(current) = slot.as_ref() {
            return Err(SessionError::AlreadyAttached(current.key.clone()));
        }
        *slot = Some(session);
        Ok(())
    }

    pub(crate) fn socket(&self) -> &Arc<dyn Socket> {
        &self.socket
    }

    pub(crate) async fn write(&self, frame: Bytes) -> Result<(), SocketError> {
        self.socket.write(frame).await
    }

    /// Create a new session and attach it to this connection.
    ///
    /// The session is registered, handed to the session manager and announced
    /// to the client with a `SessionCreated` frame. If the manager rejects it
    /// the connection is left without a session.
    pub async fn create_session(
        self: &Arc<Self>,
        info: Option<Arc<dyn SessionInfo>>,
    ) -> Result<Arc<Session>, SessionError> {
        let Some(manager) = self.sessions.manager.clone() else {
            return Err(SessionError::Disabled);
        };
        if let Some(key) = self.session_key() {
            return Err(SessionError::AlreadyAttached(key));
        }

        let session = Arc::new(Session::new(self.sessions.key_generator.generate(), info));
        let encoded = session.encode()?;

        self.attach_session(Arc::clone(&session))?;
        if let Err(err) = self.sessions.registry.register(self) {
            self.set_session(None);
            return Err(err.into());
        }

        if let Err(err) = manager.on_session_created(self).await {
            self.sessions.registry.deregister(self, false);
            self.set_session(None);
            return Err(SessionError::Manager(err));
        }

        debug!(connection = %self.id, session = %session.key, "Session created");

        self.write(build::session_created(&encoded)).await?;
        Ok(session)
    }

    /// Close the attached session and notify the client.
    ///
    /// The session is destroyed if this was its last connection. Closing a
    /// connection without a session does nothing.
    pub async fn close_session(self: &Arc<Self>) -> Result<(), SessionError> {
        if !self.sessions.enabled() {
            return Err(SessionError::Disabled);
        }
        if self.sessions.detach(self, true).await.is_none() {
            return Ok(());
        }

        self.write(build::session_closed()).await?;
        Ok(())
    }

    /// Send a signal to the client.
    pub async fn signal(&self, name: &[u8], payload: &Payload) -> Result<(), SocketError> {
        let frame = build::signal(name, payload)
            .map_err(|err| SocketError::Abnormal(err.to_string()))?;
        self.write(frame).await
    }

    /// Close the underlying socket. The connection's worker then tears the
    /// connection down.
    pub async fn close(&self) {
        if !self.active.swap(false, Ordering::AcqRel) {
            return;
        }
        if let Err(err) = self.socket.close().await {
            warn!(connection = %self.id, error = %err, "Failed to close socket");
        }
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("info", &self.info)
            .field("session", &self.session_key())
            .field("active", &self.is_active())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{Message, MessageType};
    use crate::session::JsonSession;
    use crate::testutil;

    #[tokio::test]
    async fn test_create_session_notifies_client() {
        let (conn, mut client) = testutil::connection(1);

        let session = conn.create_session(None).await.unwrap();
        assert_eq!(conn.session_key(), Some(session.key.clone()));
        assert_eq!(conn.sessions.registry.session_connections_num(&session.key), Some(1));

        let msg = client.next_message().await.unwrap().unwrap();
        assert_eq!(msg.kind(), MessageType::SessionCreated);
        let json: JsonSession = serde_json::from_slice(msg.payload()).unwrap();
        assert_eq!(json.key, session.key);
    }

    #[tokio::test]
    async fn test_create_session_twice_fails() {
        let (conn, _client) = testutil::connection(1);
        let session = conn.create_session(None).await.unwrap();

        match conn.create_session(None).await {
            Err(SessionError::AlreadyAttached(key)) => assert_eq!(key, session.key),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_close_session_detaches_and_notifies() {
        let (conn, mut client) = testutil::connection(1);
        let session = conn.create_session(None).await.unwrap();
        let _ = client.next_message().await;

        conn.close_session().await.unwrap();
        assert!(!conn.has_session());
        assert_eq!(conn.sessions.registry.session_connections_num(&session.key), None);

        let msg = client.next_message().await.unwrap().unwrap();
        assert_eq!(msg.kind(), MessageType::SessionClosed);
    }

    #[tokio::test]
    async fn test_close_session_without_session_is_noop() {
        let (conn, mut client) = testutil::connection(1);
        conn.close_session().await.unwrap();

        conn.close().await;
        assert!(client.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_signal_reaches_client() {
        let (conn, mut client) = testutil::connection(1);
        conn.signal(b"tick", &Payload::utf8("1")).await.unwrap();

        let msg: Message<Bytes> = client.next_message().await.unwrap().unwrap();
        assert_eq!(msg.kind(), MessageType::SignalUtf8);
        assert_eq!(msg.name(), b"tick");
        assert_eq!(msg.payload(), b"1");
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let (conn, _client) = testutil::connection(1);
        conn.close().await;
        conn.close().await;
        assert!(!conn.is_active());
    }
}
