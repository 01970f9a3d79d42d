//! Frame structure and serialization

use bytes::{BufMut, Bytes, BytesMut};
use serde::{de::DeserializeOwned, Serialize};
use crate::ProtocolError;

/// Marker that opens every frame.
///
/// `0xC0`, `0xC1`, `0xFE` and `0xFF` never occur in well-formed UTF-8, so
/// ordinary text written to the same channel cannot reproduce it.
pub const MAGIC: [u8; 4] = [0xC0, 0xC1, 0xFE, 0xFF];

/// Size of the big-endian length field following the marker
pub const LENGTH_SIZE: usize = 4;

/// Marker plus length field
pub const HEADER_SIZE: usize = MAGIC.len() + LENGTH_SIZE;

/// Largest payload the length field can describe
pub const MAX_PAYLOAD_SIZE: usize = u32::MAX as usize;

/// One self-delimiting unit of output: `MAGIC || len (u32 BE) || UTF-8 payload`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    payload: String,
}

impl Frame {
    /// Create a frame around a text payload
    pub fn new(payload: impl Into<String>) -> Result<Self, ProtocolError> {
        let payload = payload.into();
        if payload.len() > MAX_PAYLOAD_SIZE {
            return Err(ProtocolError::FrameTooLarge {
                size: payload.len(),
                max: MAX_PAYLOAD_SIZE,
            });
        }
        Ok(Self { payload })
    }

    /// Create a frame carrying the JSON encoding of `value`
    pub fn json<T: Serialize + ?Sized>(value: &T) -> Result<Self, ProtocolError> {
        Self::new(serde_json::to_string(value)?)
    }

    /// Borrow the payload text
    pub fn payload(&self) -> &str {
        &self.payload
    }

    /// Take the payload text
    pub fn into_payload(self) -> String {
        self.payload
    }

    /// Byte length of the UTF-8 payload, i.e. the value of the length field
    pub fn payload_size(&self) -> usize {
        self.payload.len()
    }

    /// Total number of bytes `encode` produces
    pub fn encoded_len(&self) -> usize {
        HEADER_SIZE + self.payload.len()
    }

    /// Serialize to one contiguous buffer
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.encoded_len());
        buf.put_slice(&MAGIC);
        // Checked against MAX_PAYLOAD_SIZE in `new`.
        buf.put_u32(self.payload.len() as u32);
        buf.put_slice(self.payload.as_bytes());
        buf.freeze()
    }

    /// Decode the payload as a JSON document
    pub fn parse_json<T: DeserializeOwned>(&self) -> Result<T, ProtocolError> {
        Ok(serde_json::from_str(&self.payload)?)
    }
}

/// Encode `text` as a frame in one step
pub fn encode(text: &str) -> Result<Bytes, ProtocolError> {
    Ok(Frame::new(text)?.encode())
}
