//! Session and message core of a bidirectional request/signal protocol.
//!
//! Clients keep a long-lived connection open, send requests that are answered
//! with a correlated reply, send fire-and-forget signals, and can attach to a
//! session that survives the connection and can be shared by several of them.

pub mod connection;
pub mod error;
pub mod message;
pub mod payload;
pub mod server;
pub mod session;
pub mod transport;

#[cfg(test)]
mod testutil;

pub use connection::{Connection, ConnectionId, ConnectionInfo};
pub use error::{
    BuildError, HandlerError, ParseError, RegistryError, ReplyError, ServerError, SessionError,
    SocketError, TransportError,
};
pub use message::{Identifier, Message, MessageType};
pub use payload::{Encoding, Payload};
pub use server::{Server, ServerImplementation, ServerOptions, ShutdownPhase};
pub use session::{InMemorySessionManager, Session, SessionInfo, SessionManager};
