//! Frame serialization, one builder per message type.

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{BuildError, ReplyError};
use crate::message::{Identifier, MessageType};
use crate::payload::Payload;

fn name_len(name: &[u8]) -> Result<u8, BuildError> {
    u8::try_from(name.len()).map_err(|_| BuildError::NameTooLong(name.len()))
}

fn with_identifier(kind: MessageType, identifier: Identifier, extra: usize) -> BytesMut {
    let mut buf = BytesMut::with_capacity(9 + extra);
    buf.put_u8(kind.into());
    buf.put_slice(identifier.as_bytes());
    buf
}

/// `[type][identifier][name length][name][payload]`
pub fn request(identifier: Identifier, name: &[u8], payload: &Payload) -> Result<Bytes, BuildError> {
    let len = name_len(name)?;
    let kind = MessageType::request(payload.encoding);

    let mut buf = with_identifier(kind, identifier, 1 + name.len() + payload.data.len());
    buf.put_u8(len);
    buf.put_slice(name);
    buf.put_slice(&payload.data);
    Ok(buf.freeze())
}

/// `[type][name length][name][payload]`
pub fn signal(name: &[u8], payload: &Payload) -> Result<Bytes, BuildError> {
    let len = name_len(name)?;
    let kind = MessageType::signal(payload.encoding);

    let mut buf = BytesMut::with_capacity(2 + name.len() + payload.data.len());
    buf.put_u8(kind.into());
    buf.put_u8(len);
    buf.put_slice(name);
    buf.put_slice(&payload.data);
    Ok(buf.freeze())
}

/// `[type][identifier][payload]`
pub fn reply(identifier: Identifier, payload: &Payload) -> Bytes {
    let kind = MessageType::reply(payload.encoding);
    let mut buf = with_identifier(kind, identifier, payload.data.len());
    buf.put_slice(&payload.data);
    buf.freeze()
}

/// `[type][identifier][code length][code][message]`
pub fn error_reply(identifier: Identifier, code: &str, message: &str) -> Result<Bytes, BuildError> {
    if code.is_empty() || code.len() > usize::from(u8::MAX) {
        return Err(BuildError::InvalidErrorCode(code.len()));
    }

    let mut buf = with_identifier(
        MessageType::ErrorReply,
        identifier,
        1 + code.len() + message.len(),
    );
    buf.put_u8(code.len() as u8);
    buf.put_slice(code.as_bytes());
    buf.put_slice(message.as_bytes());
    Ok(buf.freeze())
}

/// Serialize any failure reply.
pub fn failure(identifier: Identifier, error: &ReplyError) -> Result<Bytes, BuildError> {
    match error {
        ReplyError::Request { code, message } => error_reply(identifier, code, message),
        other => Ok(with_identifier(other.message_type(), identifier, 0).freeze()),
    }
}

/// `[type][session json]`
pub fn session_created(session: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(1 + session.len());
    buf.put_u8(MessageType::SessionCreated.into());
    buf.put_slice(session);
    buf.freeze()
}

/// `[type]`
pub fn session_closed() -> Bytes {
    Bytes::from_static(&[MessageType::SessionClosed as u8])
}

/// `[type][identifier][key]`
pub fn restore_session(identifier: Identifier, key: &[u8]) -> Result<Bytes, BuildError> {
    if key.is_empty() {
        return Err(BuildError::EmptySessionKey);
    }
    let mut buf = with_identifier(MessageType::RestoreSession, identifier, key.len());
    buf.put_slice(key);
    Ok(buf.freeze())
}

/// `[type][identifier]`
pub fn close_session(identifier: Identifier) -> Bytes {
    with_identifier(MessageType::CloseSession, identifier, 0).freeze()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Message;

    #[test]
    fn test_name_too_long() {
        let name = vec![b'n'; 256];
        assert_eq!(
            request(Identifier::default(), &name, &Payload::default()),
            Err(BuildError::NameTooLong(256))
        );
        assert_eq!(
            signal(&name, &Payload::default()),
            Err(BuildError::NameTooLong(256))
        );
    }

    #[test]
    fn test_reply_encoding() {
        let id = Identifier::from(7);
        let msg = Message::parse(reply(id, &Payload::utf8("ok"))).unwrap();
        assert_eq!(msg.kind(), MessageType::ReplyUtf8);
        assert_eq!(msg.identifier(), Some(id));
        assert_eq!(msg.payload(), b"ok");

        let msg = Message::parse(reply(id, &Payload::default())).unwrap();
        assert_eq!(msg.kind(), MessageType::ReplyBinary);
        assert!(msg.payload().is_empty());
    }

    #[test]
    fn test_failure_frames() {
        let id = Identifier::from(9);

        let frame = failure(id, &ReplyError::SessionNotFound).unwrap();
        assert_eq!(frame.len(), 9);
        let msg = Message::parse(frame).unwrap();
        assert_eq!(msg.kind(), MessageType::SessionNotFound);
        assert_eq!(msg.identifier(), Some(id));

        let err = ReplyError::Request {
            code: "NOPE".into(),
            message: "not allowed".into(),
        };
        let msg = Message::parse(failure(id, &err).unwrap()).unwrap();
        assert_eq!(msg.kind(), MessageType::ErrorReply);
        assert_eq!(msg.name(), b"NOPE");
        assert_eq!(msg.payload(), b"not allowed");
    }

    #[test]
    fn test_error_code_bounds() {
        let id = Identifier::default();
        assert_eq!(error_reply(id, "", "m"), Err(BuildError::InvalidErrorCode(0)));
        let code = "c".repeat(256);
        assert_eq!(
            error_reply(id, &code, "m"),
            Err(BuildError::InvalidErrorCode(256))
        );
    }

    #[test]
    fn test_session_frames() {
        let id = Identifier::from(3);
        let msg = Message::parse(restore_session(id, b"key").unwrap()).unwrap();
        assert_eq!(msg.kind(), MessageType::RestoreSession);
        assert_eq!(msg.payload(), b"key");
        assert_eq!(
            restore_session(id, b""),
            Err(BuildError::EmptySessionKey)
        );

        let msg = Message::parse(close_session(id)).unwrap();
        assert_eq!(msg.kind(), MessageType::CloseSession);

        let msg = Message::parse(session_created(b"{}")).unwrap();
        assert_eq!(msg.payload(), b"{}");

        let msg = Message::parse(session_closed()).unwrap();
        assert_eq!(msg.kind(), MessageType::SessionClosed);
    }
}
