//! Binary message framing.
//!
//! Every frame starts with a type byte followed by a fixed, type-specific
//! header and an opaque payload:
//!
//! ```text
//! [type: 1][identifier: 8, if any][name length: 1, if any][name][payload]
//! ```
//!
//! Parsing never copies: a [`Message`] keeps its buffer and exposes the name
//! and payload as slices into it. Dropping the message releases the buffer.

mod accept;
pub mod build;
mod kind;
mod parse;
mod pool;

use std::fmt;
use std::ops::Range;

pub use accept::{PROTOCOL_MAJOR, PROTOCOL_MINOR, ServerConfig};
pub use kind::*;
pub use pool::{BufferPool, PooledBuffer};

use crate::error::ParseError;
use crate::payload::{Encoding, Payload};
use parse::Layout;

/// An 8-byte token correlating a request with its reply.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Identifier(pub [u8; 8]);

impl Identifier {
    pub fn as_bytes(&self) -> &[u8; 8] {
        &self.0
    }
}

impl From<u64> for Identifier {
    fn from(value: u64) -> Self {
        Identifier(value.to_be_bytes())
    }
}

impl fmt::Debug for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Identifier({self})")
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

/// A parsed protocol message backed by its frame buffer.
pub struct Message<B = PooledBuffer> {
    buffer: B,
    kind: MessageType,
    identifier: Option<Identifier>,
    name: Range<usize>,
    payload: Range<usize>,
}

impl<B: AsRef<[u8]>> Message<B> {
    /// Parse a frame. On failure the buffer is dropped, which releases it.
    pub fn parse(buffer: B) -> Result<Self, ParseError> {
        let Layout {
            kind,
            identifier,
            name,
            payload,
        } = Layout::parse(buffer.as_ref())?;

        Ok(Self {
            buffer,
            kind,
            identifier,
            name,
            payload,
        })
    }

    pub fn kind(&self) -> MessageType {
        self.kind
    }

    /// The correlation identifier, present on request and reply types.
    pub fn identifier(&self) -> Option<Identifier> {
        self.identifier
    }

    /// The endpoint name of a request or signal, or the code of an error reply.
    pub fn name(&self) -> &[u8] {
        &self.buffer.as_ref()[self.name.clone()]
    }

    /// The name as UTF-8, if it is valid UTF-8.
    pub fn name_str(&self) -> Option<&str> {
        std::str::from_utf8(self.name()).ok()
    }

    pub fn payload(&self) -> &[u8] {
        &self.buffer.as_ref()[self.payload.clone()]
    }

    pub fn encoding(&self) -> Encoding {
        self.kind.encoding()
    }

    /// Copy the payload out of the buffer together with its encoding tag.
    pub fn to_payload(&self) -> Payload {
        Payload::new(self.encoding(), bytes::Bytes::copy_from_slice(self.payload()))
    }

    /// Release the message and its buffer.
    pub fn close(self) {}
}

impl<B: AsRef<[u8]>> fmt::Debug for Message<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Message")
            .field("kind", &self.kind)
            .field("identifier", &self.identifier)
            .field("name", &String::from_utf8_lossy(self.name()))
            .field("payload_len", &self.payload.len())
            .finish()
    }
}
