use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use bytes::Bytes;
use dashmap::DashMap;
use futures::FutureExt;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::connection::{Connection, ConnectionId, ConnectionInfo};
use crate::error::{ServerError, SessionError, SocketError, TransportError};
use crate::message::{BufferPool, Message, MessageType};
use crate::server::config::ServerOptions;
use crate::server::handler::{self, ServerImplementation};
use crate::server::session::{handle_session_closure, handle_session_restore};
use crate::server::shutdown::{ShutdownCoordinator, ShutdownPhase};
use crate::session::{SessionContext, SessionRegistry};
use crate::transport::{Socket, Transport};

/// State shared by the server, its acceptor and every connection worker.
struct ServerInner {
    implementation: Arc<dyn ServerImplementation>,
    sessions: Arc<SessionContext>,
    shutdown: Arc<ShutdownCoordinator>,
    pool: BufferPool,
    accept_conf: Bytes,
    read_timeout: Duration,
    connections: DashMap<ConnectionId, Arc<Connection>, ahash::RandomState>,
    next_id: AtomicU64,
}

/// A server accepting connections from a transport and dispatching their
/// messages to a [`ServerImplementation`].
pub struct Server<T: Transport> {
    inner: Arc<ServerInner>,
    transport: Arc<T>,
}

impl<T: Transport> Server<T> {
    /// Create a server and hand its acceptor to `transport`.
    pub fn new(
        implementation: Arc<dyn ServerImplementation>,
        options: ServerOptions,
        transport: T,
    ) -> Result<Self, ServerError> {
        let sessions = Arc::new(SessionContext {
            registry: SessionRegistry::new(options.max_session_connections),
            manager: options.session_manager.clone(),
            key_generator: Arc::clone(&options.session_key_generator),
            info_parser: options.session_info_parser.clone(),
        });

        let inner = Arc::new(ServerInner {
            implementation,
            sessions,
            shutdown: Arc::new(ShutdownCoordinator::new()),
            pool: BufferPool::new(options.message_pool_capacity, options.message_buffer_size),
            accept_conf: options.server_config().to_frame(),
            read_timeout: options.read_timeout,
            connections: DashMap::default(),
            next_id: AtomicU64::new(1),
        });

        let transport = Arc::new(transport);
        transport.initialize(Acceptor {
            inner: Arc::clone(&inner),
        })?;

        info!(
            sessions_enabled = inner.sessions.enabled(),
            max_session_connections = options.max_session_connections,
            message_buffer_size = options.message_buffer_size,
            "Server initialized"
        );

        Ok(Self { inner, transport })
    }

    /// Serve connections until the transport stops.
    pub async fn run(&self) -> Result<(), ServerError> {
        info!(address = ?self.transport.address().map(|url| url.to_string()), "Server running");
        self.transport.serve().await?;
        info!("Transport stopped serving");
        Ok(())
    }

    /// Shut the server down gracefully.
    ///
    /// New connections and new operations are refused right away; the call
    /// then waits for in-flight operations, stops the transport and closes
    /// the remaining connections.
    pub async fn shutdown(&self) -> Result<(), ServerError> {
        info!(
            current_ops = self.inner.shutdown.current_ops(),
            "Shutting down server"
        );
        self.inner.shutdown.drain().await;
        self.transport.shutdown().await?;
        self.inner.shutdown.mark_stopped();

        let connections: Vec<_> = self
            .inner
            .connections
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        for connection in connections {
            connection.close().await;
        }

        info!("Server stopped");
        Ok(())
    }

    pub fn address(&self) -> Option<Url> {
        self.transport.address()
    }

    pub fn transport(&self) -> &Arc<T> {
        &self.transport
    }

    pub fn phase(&self) -> ShutdownPhase {
        self.inner.shutdown.phase()
    }

    /// The pool message buffers are taken from while frames are handled.
    pub fn buffer_pool(&self) -> &BufferPool {
        &self.inner.pool
    }

    pub fn connections_num(&self) -> usize {
        self.inner.connections.len()
    }

    pub fn active_sessions_num(&self) -> usize {
        self.inner.sessions.registry.active_sessions_num()
    }

    /// Number of connections holding `key`, or `None` for an inactive session.
    pub fn session_connections_num(&self, key: &str) -> Option<usize> {
        self.inner.sessions.registry.session_connections_num(key)
    }

    pub fn session_connections(&self, key: &str) -> Vec<Arc<Connection>> {
        self.inner.sessions.registry.session_connections(key)
    }

    /// Close a session on every connection holding it.
    ///
    /// Returns the outcome per connection.
    pub async fn close_session(
        &self,
        key: &str,
    ) -> Result<Vec<(ConnectionId, Result<(), SessionError>)>, SessionError> {
        if !self.inner.sessions.enabled() {
            return Err(SessionError::Disabled);
        }

        let mut results = Vec::new();
        for connection in self.session_connections(key) {
            let result = connection.close_session().await;
            if let Err(err) = &result {
                warn!(
                    connection = %connection.id(),
                    session = %key,
                    error = %err,
                    "Failed to close session on connection"
                );
            }
            results.push((connection.id(), result));
        }
        Ok(results)
    }
}

impl<T: Transport> fmt::Debug for Server<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Server")
            .field("phase", &self.phase())
            .field("connections", &self.connections_num())
            .field("sessions", &self.inner.sessions)
            .finish()
    }
}

/// Hands accepted sockets to the server.
#[derive(Clone)]
pub struct Acceptor {
    inner: Arc<ServerInner>,
}

impl Acceptor {
    /// Whether new connections must be refused.
    pub fn is_shutting_down(&self) -> bool {
        self.inner.shutdown.is_shutting_down()
    }

    /// How long a socket may go without receiving anything from its peer
    /// before the transport drops it. Zero disables the timeout.
    pub fn read_timeout(&self) -> Duration {
        self.inner.read_timeout
    }

    /// Register a new connection and start serving it.
    pub fn accept(
        &self,
        info: ConnectionInfo,
        socket: Arc<dyn Socket>,
    ) -> Result<Arc<Connection>, TransportError> {
        if self.is_shutting_down() {
            return Err(TransportError::Unavailable);
        }

        let id = ConnectionId(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        let info = ConnectionInfo {
            remote_addr: info.remote_addr.or_else(|| socket.remote_addr()),
            ..info
        };
        let connection = Arc::new(Connection::new(
            id,
            info,
            socket,
            Arc::clone(&self.inner.sessions),
        ));
        self.inner.connections.insert(id, Arc::clone(&connection));

        info!(
            connection = %id,
            user_agent = ?connection.info().user_agent,
            remote_addr = ?connection.info().remote_addr,
            "Client connected"
        );

        tokio::spawn(serve_connection(
            Arc::clone(&self.inner),
            Arc::clone(&connection),
        ));
        Ok(connection)
    }
}

impl fmt::Debug for Acceptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Acceptor")
            .field("shutting_down", &self.is_shutting_down())
            .field("read_timeout", &self.inner.read_timeout)
            .finish()
    }
}

/// Worker for one connection: announce the configuration, handle frames
/// serially until the socket closes, then tear the connection down.
async fn serve_connection(inner: Arc<ServerInner>, connection: Arc<Connection>) {
    let id = connection.id();

    let reason = match connection.write(inner.accept_conf.clone()).await {
        Ok(()) => {
            let connected = AssertUnwindSafe(inner.implementation.on_client_connected(&connection))
                .catch_unwind()
                .await;
            if connected.is_err() {
                error!(connection = %id, "Connect handler panicked");
            }
            read_loop(&inner, &connection).await
        }
        Err(err) => {
            warn!(connection = %id, error = %err, "Failed to send server configuration");
            Some(err)
        }
    };

    inner.connections.remove(&id);
    inner.sessions.detach(&connection, false).await;

    let disconnected = AssertUnwindSafe(
        inner
            .implementation
            .on_client_disconnected(&connection, reason.as_ref()),
    )
    .catch_unwind()
    .await;
    if disconnected.is_err() {
        error!(connection = %id, "Disconnect handler panicked");
    }

    connection.close().await;

    match reason {
        None => info!(connection = %id, "Client disconnected"),
        Some(err) => info!(connection = %id, error = %err, "Client connection lost"),
    }
}

/// Returns the reason the connection ended, `None` for a clean close.
async fn read_loop(inner: &ServerInner, connection: &Arc<Connection>) -> Option<SocketError> {
    let id = connection.id();

    loop {
        let frame = match connection.socket().read().await {
            Ok(frame) => frame,
            Err(SocketError::Closed) => return None,
            Err(err @ SocketError::WrongMessageType(_)) => {
                warn!(connection = %id, error = %err, "Dropped unreadable frame");
                continue;
            }
            Err(err) => return Some(err),
        };

        // Idle connections hold no buffer
        let mut buffer = inner.pool.acquire();
        if let Err(err) = buffer.fill(&frame) {
            warn!(connection = %id, error = %err, "Dropped oversized frame");
            continue;
        }

        let message = match Message::parse(buffer) {
            Ok(message) => message,
            Err(err) => {
                warn!(connection = %id, error = %err, "Failed to parse message");
                continue;
            }
        };

        match handle_message(inner, connection, message).await {
            Ok(()) => {}
            Err(ServerError::Socket(err)) if err.is_close() => return None,
            Err(ServerError::Socket(err)) => return Some(err),
            Err(err @ ServerError::SessionLimitRace { .. }) => {
                error!(
                    connection = %id,
                    error = %err,
                    "Session registry invariant violated, closing connection"
                );
                return None;
            }
            Err(err) => {
                warn!(connection = %id, error = %err, "Failed to handle message");
            }
        }
    }
}

async fn handle_message(
    inner: &ServerInner,
    connection: &Arc<Connection>,
    message: Message,
) -> Result<(), ServerError> {
    match message.kind() {
        MessageType::SignalBinary | MessageType::SignalUtf8 => {
            let Some(_op) = inner.shutdown.begin_op() else {
                debug!(connection = %connection.id(), "Dropped signal during shutdown");
                return Ok(());
            };
            handler::handle_signal(inner.implementation.as_ref(), connection, message).await;
            Ok(())
        }
        MessageType::RequestBinary | MessageType::RequestUtf8 => {
            let Some(_op) = inner.shutdown.begin_op() else {
                return handler::refuse(connection, message).await;
            };
            handler::handle_request(inner.implementation.as_ref(), connection, message).await
        }
        MessageType::RestoreSession => {
            let Some(_op) = inner.shutdown.begin_op() else {
                return handler::refuse(connection, message).await;
            };
            handle_session_restore(&inner.sessions, connection, message).await
        }
        MessageType::CloseSession => {
            let Some(_op) = inner.shutdown.begin_op() else {
                return handler::refuse(connection, message).await;
            };
            handle_session_closure(&inner.sessions, connection, message).await
        }
        kind => {
            warn!(connection = %connection.id(), ?kind, "Unexpected message type from client");
            Ok(())
        }
    }
}
