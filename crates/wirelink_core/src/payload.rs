use bytes::Bytes;

/// Encoding tag carried alongside a payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Encoding {
    #[default]
    Binary,
    Utf8,
}

/// An opaque application payload.
///
/// The core never interprets the bytes; the encoding only selects the message
/// type a payload travels in.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Payload {
    pub encoding: Encoding,
    pub data: Bytes,
}

impl Payload {
    pub fn new(encoding: Encoding, data: impl Into<Bytes>) -> Self {
        Self {
            encoding,
            data: data.into(),
        }
    }

    pub fn binary(data: impl Into<Bytes>) -> Self {
        Self::new(Encoding::Binary, data)
    }

    pub fn utf8(data: impl Into<String>) -> Self {
        Self::new(Encoding::Utf8, Bytes::from(data.into()))
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}
