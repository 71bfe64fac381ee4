use std::ops::Range;

use crate::error::ParseError;
use crate::message::{Identifier, MessageType};

/// Offsets of the fields of a validated frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Layout {
    pub kind: MessageType,
    pub identifier: Option<Identifier>,
    pub name: Range<usize>,
    pub payload: Range<usize>,
}

impl Layout {
    /// Validate `data` against the layout of its declared type.
    ///
    /// Frame: `[type][identifier: 8, if any][name length: 1, if any][name][payload]`.
    /// Error replies reuse the name slot for their error code.
    pub fn parse(data: &[u8]) -> Result<Self, ParseError> {
        let Some(&type_byte) = data.first() else {
            return Err(ParseError::Empty);
        };
        let kind = MessageType::try_from(type_byte)?;

        let min = kind.min_len();
        if data.len() < min {
            return Err(ParseError::TooShort {
                kind,
                len: data.len(),
                min,
            });
        }

        let mut offset = 1;

        let identifier = if kind.has_identifier() {
            let mut id = [0u8; 8];
            id.copy_from_slice(&data[1..9]);
            offset = 9;
            Some(Identifier(id))
        } else {
            None
        };

        let name = if kind.has_name() || kind == MessageType::ErrorReply {
            let name_len = usize::from(data[offset]);
            if name_len == 0 && kind == MessageType::ErrorReply {
                return Err(ParseError::MissingErrorCode);
            }
            let start = offset + 1;
            // The payload is optional but the name must fit entirely
            if data.len() < start + name_len {
                return Err(ParseError::TooShortForName { kind, name_len });
            }
            offset = start + name_len;
            start..offset
        } else {
            offset..offset
        };

        Ok(Layout {
            kind,
            identifier,
            name,
            payload: offset..data.len(),
        })
    }
}
