use thiserror::Error;

use crate::message::MessageType;

/// Errors that can occur while parsing a raw frame into a [`Message`](crate::message::Message).
///
/// Parsing never looks at payload contents, only at the frame layout.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum ParseError {
    /// The frame contains no bytes at all.
    #[error("empty frame")]
    Empty,

    /// The leading type byte does not name a known message type.
    #[error("unknown message type: {0}")]
    UnknownType(u8),

    /// The message is well-formed but not of the type the caller expected.
    #[error("unexpected message type: {0:?}")]
    UnexpectedType(MessageType),

    /// The frame is shorter than the minimum length of its message type.
    #[error("invalid {kind:?} message, too short ({len} < {min})")]
    TooShort {
        kind: MessageType,
        len: usize,
        min: usize,
    },

    /// The frame is too short to hold the name its header declares.
    #[error("invalid {kind:?} message, too short for full name ({name_len})")]
    TooShortForName { kind: MessageType, name_len: usize },

    /// An error reply declares an empty error code.
    #[error("invalid error reply, missing error code")]
    MissingErrorCode,
}

/// Errors that can occur while serializing an outbound frame.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum BuildError {
    /// Names are length-prefixed by a single byte.
    #[error("name too long ({0} > 255 bytes)")]
    NameTooLong(usize),

    /// Error codes must hold between 1 and 255 bytes.
    #[error("invalid error code length: {0}")]
    InvalidErrorCode(usize),

    /// Session keys must not be empty.
    #[error("empty session key")]
    EmptySessionKey,
}

/// Errors returned by the session registry.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum RegistryError {
    /// The session already holds the maximum number of connections.
    #[error("max connections reached for session '{key}' ({max})")]
    MaxConnectionsReached { key: String, max: usize },

    /// The connection has no session attached.
    #[error("connection has no session attached")]
    NoSession,
}

/// Errors returned by the server-side session API of a connection.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SessionError {
    /// Sessions are disabled on this server.
    #[error("sessions are disabled")]
    Disabled,

    /// The connection already holds a session.
    #[error("connection already has session '{0}' attached")]
    AlreadyAttached(String),

    /// Registering the session failed.
    #[error(transparent)]
    Registry(#[from] RegistryError),

    /// The session could not be encoded for the client.
    #[error("failed to encode session: {0}")]
    Encode(#[from] serde_json::Error),

    /// The session manager rejected the operation.
    #[error("session manager failed: {0}")]
    Manager(#[source] anyhow::Error),

    /// Writing the session notification to the client failed.
    #[error(transparent)]
    Socket(#[from] SocketError),
}

/// Errors surfaced to a requester as a typed failure reply.
///
/// Every variant maps to exactly one reply message type; see
/// [`ReplyError::message_type`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum ReplyError {
    /// Application-defined failure carrying a code and a message.
    #[error("{code}: {message}")]
    Request { code: String, message: String },

    /// The server is shutting down and refuses new work.
    #[error("server is shutting down")]
    Shutdown,

    /// Internal server error. Details are only logged server-side.
    #[error("internal server error")]
    Internal,

    /// No session exists for the requested key.
    #[error("session not found")]
    SessionNotFound,

    /// The session already holds the maximum number of connections.
    #[error("max session connections reached")]
    MaxSessionConnectionsReached,

    /// Sessions are disabled on this server.
    #[error("sessions are disabled")]
    SessionsDisabled,

    /// The request violated the protocol.
    #[error("protocol error")]
    Protocol,
}

impl ReplyError {
    /// The message type this error is sent as.
    pub fn message_type(&self) -> MessageType {
        match self {
            ReplyError::Request { .. } => MessageType::ErrorReply,
            ReplyError::Shutdown => MessageType::ReplyShutdown,
            ReplyError::Internal => MessageType::ReplyInternalError,
            ReplyError::SessionNotFound => MessageType::SessionNotFound,
            ReplyError::MaxSessionConnectionsReached => MessageType::MaxSessionConnsReached,
            ReplyError::SessionsDisabled => MessageType::SessionsDisabled,
            ReplyError::Protocol => MessageType::ReplyProtocolError,
        }
    }

    /// Map a special reply type back to its error.
    ///
    /// Returns `None` for `ErrorReply` (which needs its code and message) and
    /// for every non-error type.
    pub fn from_message_type(kind: MessageType) -> Option<Self> {
        match kind {
            MessageType::ReplyShutdown => Some(ReplyError::Shutdown),
            MessageType::ReplyInternalError => Some(ReplyError::Internal),
            MessageType::SessionNotFound => Some(ReplyError::SessionNotFound),
            MessageType::MaxSessionConnsReached => Some(ReplyError::MaxSessionConnectionsReached),
            MessageType::SessionsDisabled => Some(ReplyError::SessionsDisabled),
            MessageType::ReplyProtocolError => Some(ReplyError::Protocol),
            _ => None,
        }
    }
}

/// Errors returned by application request handlers.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum HandlerError {
    /// A failure the client is allowed to see.
    #[error("{code}: {message}")]
    Request { code: String, message: String },

    /// A failure whose details stay on the server.
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl HandlerError {
    pub fn request(code: impl Into<String>, message: impl Into<String>) -> Self {
        HandlerError::Request {
            code: code.into(),
            message: message.into(),
        }
    }
}

/// Errors reported by a socket.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum SocketError {
    /// The peer closed the connection cleanly.
    #[error("connection closed")]
    Closed,

    /// The connection was lost or failed.
    #[error("connection lost: {0}")]
    Abnormal(String),

    /// The peer sent a message the transport cannot carry as a frame.
    #[error("unexpected socket message type: {0}")]
    WrongMessageType(String),

    /// The incoming frame does not fit into a message buffer.
    #[error("frame too large ({len} > {capacity} bytes)")]
    FrameTooLarge { len: usize, capacity: usize },
}

impl SocketError {
    /// Whether the error represents a clean close rather than a failure.
    pub fn is_close(&self) -> bool {
        matches!(self, SocketError::Closed)
    }
}

/// Errors that can occur in a transport implementation.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum TransportError {
    /// The transport could not bind or listen.
    #[error("failed to listen: {0}")]
    Listen(#[from] std::io::Error),

    /// The transport refused a connection because the server is shutting down.
    #[error("server is shutting down")]
    Unavailable,

    /// The transport was stopped.
    #[error("transport closed")]
    Closed,
}

/// Errors that can occur while running the server.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ServerError {
    /// The transport failed to serve or to shut down.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// The number of connections for a session was exceeded after it was
    /// checked. Indicates a broken registration discipline.
    #[error("session '{key}' exceeded its connection limit after the limit check")]
    SessionLimitRace { key: String },

    /// Writing a reply to the client failed.
    #[error(transparent)]
    Socket(#[from] SocketError),

    /// A frame could not be built.
    #[error(transparent)]
    Build(#[from] BuildError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reply_error_type_mapping() {
        let errors = [
            ReplyError::Shutdown,
            ReplyError::Internal,
            ReplyError::SessionNotFound,
            ReplyError::MaxSessionConnectionsReached,
            ReplyError::SessionsDisabled,
            ReplyError::Protocol,
        ];
        for err in errors {
            let kind = err.message_type();
            assert_eq!(ReplyError::from_message_type(kind), Some(err));
        }
    }

    #[test]
    fn test_request_error_needs_payload() {
        let err = ReplyError::Request {
            code: "E".into(),
            message: "m".into(),
        };
        assert_eq!(err.message_type(), MessageType::ErrorReply);
        assert_eq!(ReplyError::from_message_type(MessageType::ErrorReply), None);
        assert_eq!(ReplyError::from_message_type(MessageType::ReplyBinary), None);
    }

    #[test]
    fn test_socket_close_detection() {
        assert!(SocketError::Closed.is_close());
        assert!(!SocketError::Abnormal("reset".into()).is_close());
    }
}
