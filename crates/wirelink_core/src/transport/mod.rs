//! The boundary between the server core and a concrete network transport.
//!
//! A [`Transport`] accepts connections and hands each one to the server as a
//! [`Socket`] through the [`Acceptor`] it was initialized with.

mod memory;

use std::net::SocketAddr;

use async_trait::async_trait;
use bytes::Bytes;
use url::Url;

use crate::error::{SocketError, TransportError};

pub use crate::server::Acceptor;
pub use memory::{MemoryClient, MemorySocket, MemoryTransport};

#[cfg(test)]
pub(crate) use memory::memory_pair;

/// A bidirectional channel of complete binary frames.
///
/// Reads and writes are synchronized independently, so a connection can be
/// read from and written to at the same time.
#[async_trait]
pub trait Socket: Send + Sync + 'static {
    /// Wait for the next complete frame.
    ///
    /// Returns [`SocketError::Closed`] once the peer closed the connection.
    /// Transports that detect dead peers report it as
    /// [`SocketError::Abnormal`].
    async fn read(&self) -> Result<Bytes, SocketError>;

    /// Write a complete frame.
    async fn write(&self, frame: Bytes) -> Result<(), SocketError>;

    /// Close the socket. Pending and future reads fail with `Closed`.
    async fn close(&self) -> Result<(), SocketError>;

    fn remote_addr(&self) -> Option<SocketAddr>;
}

/// A source of client connections.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Hand the transport the acceptor for new connections.
    ///
    /// Called once by the server before [`Transport::serve`].
    fn initialize(&self, acceptor: Acceptor) -> Result<(), TransportError>;

    /// Accept connections until the transport is shut down.
    async fn serve(&self) -> Result<(), TransportError>;

    /// Stop accepting connections.
    async fn shutdown(&self) -> Result<(), TransportError>;

    /// Where clients can reach the transport, if known.
    fn address(&self) -> Option<Url>;
}
