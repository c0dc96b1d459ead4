//! The payload module contains the wire-level building blocks shared by every
//! decoding unit: the raw payload and its routing context, the bounds-checked
//! cursor, numeric field codecs, the common device header and the decoded
//! record produced by a unit.

pub mod codec;
pub mod cursor;
pub mod header;
pub mod record;

pub use cursor::{ByteCursor, Endianness};
pub use header::{HeaderFields, HEADER_LENGTH};
pub use record::{AnnotatedValue, DecodedRecord, FieldValue};

use crate::util::hex::format_hex_spaced;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Immutable payload bytes as received from the radio.
///
/// Cloning is cheap, so a payload can be handed to a sandbox worker thread
/// without copying.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RawPayload(Bytes);

impl RawPayload {
    pub fn new(bytes: impl Into<Bytes>) -> Self {
        Self(bytes.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn cursor(&self) -> ByteCursor<'_> {
        ByteCursor::new(&self.0)
    }

    /// Upper-case, space separated hex dump (`"11 32 0C"`).
    pub fn to_hex_spaced(&self) -> String {
        format_hex_spaced(&self.0)
    }
}

impl From<&[u8]> for RawPayload {
    fn from(data: &[u8]) -> Self {
        Self(Bytes::copy_from_slice(data))
    }
}

impl From<Vec<u8>> for RawPayload {
    fn from(data: Vec<u8>) -> Self {
        Self(Bytes::from(data))
    }
}

/// Routing metadata accompanying a payload. Read-only during a decode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DecodeContext {
    /// Port/channel discriminator used to select a layout branch.
    pub port: u8,
    /// Opaque device identifier (sensor EUI); never parsed from the payload.
    pub device_id: String,
}

impl DecodeContext {
    pub fn new(port: u8, device_id: impl Into<String>) -> Self {
        Self {
            port,
            device_id: device_id.into(),
        }
    }
}
