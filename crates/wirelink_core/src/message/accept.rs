use std::time::Duration;

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::ParseError;
use crate::message::{MIN_LEN_ACCEPT_CONF, Message, MessageType};

pub const PROTOCOL_MAJOR: u8 = 2;
pub const PROTOCOL_MINOR: u8 = 0;

/// Server parameters announced to every client right after it is accepted.
///
/// Wire layout after the type byte: `[major][minor][read timeout ms: u32 BE]
/// [message buffer size: u32 BE][sub-protocol name]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub major_version: u8,
    pub minor_version: u8,
    pub read_timeout: Duration,
    pub message_buffer_size: u32,
    pub sub_protocol: Option<Bytes>,
}

impl ServerConfig {
    pub fn to_frame(&self) -> Bytes {
        let sub_protocol = self.sub_protocol.as_deref().unwrap_or_default();
        let timeout_ms = u32::try_from(self.read_timeout.as_millis()).unwrap_or(u32::MAX);

        let mut buf = BytesMut::with_capacity(MIN_LEN_ACCEPT_CONF + sub_protocol.len());
        buf.put_u8(MessageType::AcceptConf.into());
        buf.put_u8(self.major_version);
        buf.put_u8(self.minor_version);
        buf.put_u32(timeout_ms);
        buf.put_u32(self.message_buffer_size);
        buf.put_slice(sub_protocol);
        buf.freeze()
    }

    /// Decode the configuration carried by an `AcceptConf` message.
    pub fn from_message<B: AsRef<[u8]>>(msg: &Message<B>) -> Result<Self, ParseError> {
        if msg.kind() != MessageType::AcceptConf {
            return Err(ParseError::UnexpectedType(msg.kind()));
        }

        // Length was validated when the message was parsed
        let mut data = msg.payload();
        let major_version = data.get_u8();
        let minor_version = data.get_u8();
        let read_timeout = Duration::from_millis(u64::from(data.get_u32()));
        let message_buffer_size = data.get_u32();
        let sub_protocol = (!data.is_empty()).then(|| Bytes::copy_from_slice(data));

        Ok(Self {
            major_version,
            minor_version,
            read_timeout,
            message_buffer_size,
            sub_protocol,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accept_conf_round_trip() {
        let conf = ServerConfig {
            major_version: PROTOCOL_MAJOR,
            minor_version: PROTOCOL_MINOR,
            read_timeout: Duration::from_secs(60),
            message_buffer_size: 8192,
            sub_protocol: Some(Bytes::from_static(b"chat.v1")),
        };

        let msg = Message::parse(conf.to_frame()).unwrap();
        assert_eq!(msg.kind(), MessageType::AcceptConf);
        assert_eq!(ServerConfig::from_message(&msg).unwrap(), conf);
    }

    #[test]
    fn test_accept_conf_without_sub_protocol() {
        let conf = ServerConfig {
            major_version: 2,
            minor_version: 1,
            read_timeout: Duration::from_millis(1500),
            message_buffer_size: 1024,
            sub_protocol: None,
        };

        let frame = conf.to_frame();
        assert_eq!(frame.len(), MIN_LEN_ACCEPT_CONF);
        let msg = Message::parse(frame).unwrap();
        assert_eq!(ServerConfig::from_message(&msg).unwrap(), conf);
    }
}
