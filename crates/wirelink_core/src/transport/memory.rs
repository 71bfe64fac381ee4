use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tracing::debug;
use url::Url;

use crate::connection::ConnectionInfo;
use crate::error::{ParseError, SocketError, TransportError};
use crate::message::Message;
use crate::server::Acceptor;
use crate::transport::{Socket, Transport};

/// A transport connecting in-process clients through channels.
///
/// Used to embed a server and to drive it in tests.
pub struct MemoryTransport {
    acceptor: Mutex<Option<Acceptor>>,
    stopped: watch::Sender<bool>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self {
            acceptor: Mutex::new(None),
            stopped: watch::Sender::new(false),
        }
    }

    /// Open a new client connection.
    pub fn connect(&self) -> Result<MemoryClient, TransportError> {
        self.connect_with(ConnectionInfo::default())
    }

    /// Open a new client connection reporting `info` to the server.
    pub fn connect_with(&self, info: ConnectionInfo) -> Result<MemoryClient, TransportError> {
        if *self.stopped.borrow() {
            return Err(TransportError::Closed);
        }
        let acceptor = self.acceptor.lock().clone().ok_or(TransportError::Closed)?;
        if acceptor.is_shutting_down() {
            return Err(TransportError::Unavailable);
        }

        let (socket, client) = memory_pair(info.remote_addr);
        let connection = acceptor.accept(info, Arc::new(socket))?;
        debug!(connection = %connection.id(), "Memory client connected");
        Ok(client)
    }
}

impl Default for MemoryTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for MemoryTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryTransport")
            .field("initialized", &self.acceptor.lock().is_some())
            .field("stopped", &*self.stopped.borrow())
            .finish()
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    fn initialize(&self, acceptor: Acceptor) -> Result<(), TransportError> {
        *self.acceptor.lock() = Some(acceptor);
        Ok(())
    }

    async fn serve(&self) -> Result<(), TransportError> {
        let mut stopped = self.stopped.subscribe();
        stopped
            .wait_for(|stopped| *stopped)
            .await
            .map_err(|_| TransportError::Closed)?;
        Ok(())
    }

    async fn shutdown(&self) -> Result<(), TransportError> {
        self.stopped.send_replace(true);
        Ok(())
    }

    fn address(&self) -> Option<Url> {
        Url::parse("memory://local").ok()
    }
}

/// Server half of an in-memory connection.
pub struct MemorySocket {
    inbound: tokio::sync::Mutex<mpsc::UnboundedReceiver<Result<Bytes, SocketError>>>,
    outbound: Mutex<Option<mpsc::UnboundedSender<Bytes>>>,
    closed: watch::Sender<bool>,
    remote_addr: Option<SocketAddr>,
}

#[async_trait]
impl Socket for MemorySocket {
    async fn read(&self) -> Result<Bytes, SocketError> {
        let mut closed = self.closed.subscribe();
        if *closed.borrow_and_update() {
            return Err(SocketError::Closed);
        }

        let mut inbound = self.inbound.lock().await;
        tokio::select! {
            frame = inbound.recv() => frame.unwrap_or(Err(SocketError::Closed)),
            _ = closed.wait_for(|closed| *closed) => Err(SocketError::Closed),
        }
    }

    async fn write(&self, frame: Bytes) -> Result<(), SocketError> {
        let sender = self.outbound.lock().clone().ok_or(SocketError::Closed)?;
        sender.send(frame).map_err(|_| SocketError::Closed)
    }

    async fn close(&self) -> Result<(), SocketError> {
        self.outbound.lock().take();
        self.closed.send_replace(true);
        Ok(())
    }

    fn remote_addr(&self) -> Option<SocketAddr> {
        self.remote_addr
    }
}

/// Client half of an in-memory connection.
#[derive(Debug)]
pub struct MemoryClient {
    outbound: Option<mpsc::UnboundedSender<Result<Bytes, SocketError>>>,
    inbound: mpsc::UnboundedReceiver<Bytes>,
}

impl MemoryClient {
    /// Send a raw frame to the server.
    pub fn send(&self, frame: Bytes) -> Result<(), SocketError> {
        let sender = self.outbound.as_ref().ok_or(SocketError::Closed)?;
        sender.send(Ok(frame)).map_err(|_| SocketError::Closed)
    }

    /// Next raw frame from the server, or `None` once the server closed the
    /// connection.
    pub async fn recv(&mut self) -> Option<Bytes> {
        self.inbound.recv().await
    }

    /// Next frame from the server, parsed.
    pub async fn next_message(&mut self) -> Option<Result<Message<Bytes>, ParseError>> {
        self.recv().await.map(Message::parse)
    }

    /// Close the client side. The server sees a clean close.
    pub fn close(&mut self) {
        self.outbound.take();
    }

    /// Drop the connection as if the link failed. The server's next read
    /// fails with [`SocketError::Abnormal`].
    pub fn abort(&mut self, reason: impl Into<String>) {
        if let Some(sender) = self.outbound.take() {
            let _ = sender.send(Err(SocketError::Abnormal(reason.into())));
        }
    }
}

/// Create a connected socket and client pair.
pub(crate) fn memory_pair(remote_addr: Option<SocketAddr>) -> (MemorySocket, MemoryClient) {
    let (client_tx, server_rx) = mpsc::unbounded_channel();
    let (server_tx, client_rx) = mpsc::unbounded_channel();

    let socket = MemorySocket {
        inbound: tokio::sync::Mutex::new(server_rx),
        outbound: Mutex::new(Some(server_tx)),
        closed: watch::Sender::new(false),
        remote_addr,
    };
    let client = MemoryClient {
        outbound: Some(client_tx),
        inbound: client_rx,
    };
    (socket, client)
}
