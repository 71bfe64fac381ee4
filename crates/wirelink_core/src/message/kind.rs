use crate::error::ParseError;
use crate::payload::Encoding;

/// type(1)
pub const MIN_LEN_SESSION_CLOSED: usize = 1;

/// type(1) + session(min 1)
pub const MIN_LEN_SESSION_CREATED: usize = 2;

/// type(1) + name length(1)
pub const MIN_LEN_SIGNAL: usize = 2;

/// type(1) + identifier(8)
pub const MIN_LEN_REPLY: usize = 9;

/// type(1) + identifier(8)
pub const MIN_LEN_CLOSE_SESSION: usize = 9;

/// type(1) + identifier(8) + key(min 1)
pub const MIN_LEN_RESTORE_SESSION: usize = 10;

/// type(1) + identifier(8) + name length(1)
pub const MIN_LEN_REQUEST: usize = 10;

/// type(1) + identifier(8) + code length(1) + code(min 1)
pub const MIN_LEN_ERROR_REPLY: usize = 11;

/// type(1) + major(1) + minor(1) + read timeout(4) + buffer size(4)
pub const MIN_LEN_ACCEPT_CONF: usize = 11;

/// The closed set of message types, tagged by the leading frame byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageType {
    ErrorReply = 0,
    ReplyShutdown = 1,
    ReplyInternalError = 2,
    SessionNotFound = 3,
    MaxSessionConnsReached = 4,
    SessionsDisabled = 5,
    ReplyProtocolError = 6,

    SessionCreated = 21,
    SessionClosed = 22,
    AcceptConf = 23,

    CloseSession = 31,
    RestoreSession = 32,

    SignalBinary = 63,
    SignalUtf8 = 64,

    RequestBinary = 127,
    RequestUtf8 = 128,

    ReplyBinary = 191,
    ReplyUtf8 = 192,
}

impl MessageType {
    /// The smallest well-formed frame for this type.
    pub fn min_len(self) -> usize {
        match self {
            MessageType::ErrorReply => MIN_LEN_ERROR_REPLY,
            MessageType::ReplyShutdown
            | MessageType::ReplyInternalError
            | MessageType::SessionNotFound
            | MessageType::MaxSessionConnsReached
            | MessageType::SessionsDisabled
            | MessageType::ReplyProtocolError
            | MessageType::ReplyBinary
            | MessageType::ReplyUtf8 => MIN_LEN_REPLY,
            MessageType::SessionCreated => MIN_LEN_SESSION_CREATED,
            MessageType::SessionClosed => MIN_LEN_SESSION_CLOSED,
            MessageType::AcceptConf => MIN_LEN_ACCEPT_CONF,
            MessageType::CloseSession => MIN_LEN_CLOSE_SESSION,
            MessageType::RestoreSession => MIN_LEN_RESTORE_SESSION,
            MessageType::SignalBinary | MessageType::SignalUtf8 => MIN_LEN_SIGNAL,
            MessageType::RequestBinary | MessageType::RequestUtf8 => MIN_LEN_REQUEST,
        }
    }

    /// Whether frames of this type carry an 8-byte correlation identifier.
    pub fn has_identifier(self) -> bool {
        !matches!(
            self,
            MessageType::SessionCreated
                | MessageType::SessionClosed
                | MessageType::AcceptConf
                | MessageType::SignalBinary
                | MessageType::SignalUtf8
        )
    }

    /// Whether frames of this type carry a length-prefixed name.
    pub fn has_name(self) -> bool {
        matches!(
            self,
            MessageType::SignalBinary
                | MessageType::SignalUtf8
                | MessageType::RequestBinary
                | MessageType::RequestUtf8
        )
    }

    /// The encoding of the payload carried by this type.
    pub fn encoding(self) -> Encoding {
        match self {
            MessageType::SignalUtf8
            | MessageType::RequestUtf8
            | MessageType::ReplyUtf8
            | MessageType::SessionCreated
            | MessageType::RestoreSession
            | MessageType::ErrorReply => Encoding::Utf8,
            _ => Encoding::Binary,
        }
    }

    /// Whether this type is a reply to a request (success or failure).
    pub fn is_reply(self) -> bool {
        matches!(
            self,
            MessageType::ErrorReply
                | MessageType::ReplyShutdown
                | MessageType::ReplyInternalError
                | MessageType::SessionNotFound
                | MessageType::MaxSessionConnsReached
                | MessageType::SessionsDisabled
                | MessageType::ReplyProtocolError
                | MessageType::ReplyBinary
                | MessageType::ReplyUtf8
        )
    }

    pub fn request(encoding: Encoding) -> Self {
        match encoding {
            Encoding::Binary => MessageType::RequestBinary,
            Encoding::Utf8 => MessageType::RequestUtf8,
        }
    }

    pub fn signal(encoding: Encoding) -> Self {
        match encoding {
            Encoding::Binary => MessageType::SignalBinary,
            Encoding::Utf8 => MessageType::SignalUtf8,
        }
    }

    pub fn reply(encoding: Encoding) -> Self {
        match encoding {
            Encoding::Binary => MessageType::ReplyBinary,
            Encoding::Utf8 => MessageType::ReplyUtf8,
        }
    }
}

impl TryFrom<u8> for MessageType {
    type Error = ParseError;

    fn try_from(byte: u8) -> Result<Self, Self::Error> {
        let kind = match byte {
            0 => MessageType::ErrorReply,
            1 => MessageType::ReplyShutdown,
            2 => MessageType::ReplyInternalError,
            3 => MessageType::SessionNotFound,
            4 => MessageType::MaxSessionConnsReached,
            5 => MessageType::SessionsDisabled,
            6 => MessageType::ReplyProtocolError,
            21 => MessageType::SessionCreated,
            22 => MessageType::SessionClosed,
            23 => MessageType::AcceptConf,
            31 => MessageType::CloseSession,
            32 => MessageType::RestoreSession,
            63 => MessageType::SignalBinary,
            64 => MessageType::SignalUtf8,
            127 => MessageType::RequestBinary,
            128 => MessageType::RequestUtf8,
            191 => MessageType::ReplyBinary,
            192 => MessageType::ReplyUtf8,
            other => return Err(ParseError::UnknownType(other)),
        };
        Ok(kind)
    }
}

impl From<MessageType> for u8 {
    fn from(kind: MessageType) -> Self {
        kind as u8
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_byte_conversion() {
        assert_eq!(MessageType::try_from(127), Ok(MessageType::RequestBinary));
        assert_eq!(u8::from(MessageType::ReplyUtf8), 192);
        assert_eq!(MessageType::try_from(7), Err(ParseError::UnknownType(7)));
        assert_eq!(MessageType::try_from(255), Err(ParseError::UnknownType(255)));
    }

    #[test]
    fn test_identifier_bearing_types() {
        assert!(MessageType::RequestUtf8.has_identifier());
        assert!(MessageType::CloseSession.has_identifier());
        assert!(!MessageType::SignalBinary.has_identifier());
        assert!(!MessageType::SessionCreated.has_identifier());
    }

    #[test]
    fn test_encoding_selects_variant() {
        assert_eq!(MessageType::request(Encoding::Utf8), MessageType::RequestUtf8);
        assert_eq!(MessageType::signal(Encoding::Binary), MessageType::SignalBinary);
        assert_eq!(MessageType::reply(Encoding::Utf8), MessageType::ReplyUtf8);
        assert_eq!(MessageType::ReplyUtf8.encoding(), Encoding::Utf8);
        assert_eq!(MessageType::ReplyBinary.encoding(), Encoding::Binary);
    }
}
