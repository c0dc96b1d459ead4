//! Two-byte device header shared by the sensor families.
//!
//! ```text
//! byte 0: [base id : 4][major version : 4]
//! byte 1: [minor version : 4][product/feature bitmask : 4]
//! ```

use crate::error::CursorError;
use crate::payload::codec::{bit_set, high_nibble, low_nibble};
use crate::payload::cursor::ByteCursor;
use serde::Serialize;

pub const HEADER_LENGTH: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct HeaderFields {
    pub base_id: u8,
    pub major_version: u8,
    pub minor_version: u8,
    /// Feature bitmask; each bit gates one optional field group.
    pub product_version: u8,
}

impl HeaderFields {
    pub fn parse(cursor: &mut ByteCursor<'_>) -> Result<Self, CursorError> {
        let bytes = cursor.read_bytes(HEADER_LENGTH)?;
        Ok(Self {
            base_id: high_nibble(bytes[0]),
            major_version: low_nibble(bytes[0]),
            minor_version: high_nibble(bytes[1]),
            product_version: low_nibble(bytes[1]),
        })
    }

    pub fn has_feature(&self, bit: u8) -> bool {
        bit_set(self.product_version, bit)
    }
}
