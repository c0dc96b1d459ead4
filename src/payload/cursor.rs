//! # Byte Cursor
//!
//! Sequential, bounds-checked reader over an immutable payload. Every read
//! either consumes exactly the field's width or fails without moving the
//! cursor, so a failed read never leaves a half-consumed field behind.
//!
//! ```rust
//! use mioty_payload::payload::{ByteCursor, Endianness};
//!
//! let data = [0x11, 0x32, 0x0C, 0x1C];
//! let mut cursor = ByteCursor::new(&data);
//! assert_eq!(cursor.read_u8().unwrap(), 0x11);
//! cursor.skip(1).unwrap();
//! assert_eq!(cursor.read_u16(Endianness::Big).unwrap(), 3100);
//! assert_eq!(cursor.remaining(), 0);
//! ```

use crate::error::CursorError;
use crate::payload::codec::twos_complement;
use serde::{Deserialize, Serialize};

/// Byte order of a multi-byte field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Endianness {
    Little,
    #[default]
    Big,
}

/// Bounds-checked sequential reader.
#[derive(Debug, Clone)]
pub struct ByteCursor<'a> {
    data: &'a [u8],
    offset: usize,
}

impl<'a> ByteCursor<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, offset: 0 }
    }

    /// Current read position.
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Total payload length.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Bytes left between the current position and the end of the payload.
    pub fn remaining(&self) -> usize {
        self.data.len() - self.offset
    }

    pub fn is_exhausted(&self) -> bool {
        self.remaining() == 0
    }

    fn ensure(&self, needed: usize) -> Result<(), CursorError> {
        if needed > self.remaining() {
            return Err(CursorError::OutOfBounds {
                offset: self.offset,
                needed,
                available: self.remaining(),
            });
        }
        Ok(())
    }

    /// Consume `count` bytes and return them as a slice.
    pub fn read_bytes(&mut self, count: usize) -> Result<&'a [u8], CursorError> {
        self.ensure(count)?;
        let bytes = &self.data[self.offset..self.offset + count];
        self.offset += count;
        Ok(bytes)
    }

    /// Advance past `count` bytes without decoding them.
    pub fn skip(&mut self, count: usize) -> Result<(), CursorError> {
        self.ensure(count)?;
        self.offset += count;
        Ok(())
    }

    /// Look at the next byte without consuming it.
    pub fn peek_u8(&self) -> Result<u8, CursorError> {
        self.ensure(1)?;
        Ok(self.data[self.offset])
    }

    /// Read an unsigned integer of `width` bytes (1..=8).
    pub fn read_uint(&mut self, width: usize, endian: Endianness) -> Result<u64, CursorError> {
        debug_assert!((1..=8).contains(&width), "unsupported width {width}");
        let bytes = self.read_bytes(width)?;
        let value = match endian {
            Endianness::Big => bytes.iter().fold(0u64, |acc, &b| (acc << 8) | u64::from(b)),
            Endianness::Little => bytes
                .iter()
                .rev()
                .fold(0u64, |acc, &b| (acc << 8) | u64::from(b)),
        };
        Ok(value)
    }

    /// Read a two's-complement signed integer of `width` bytes (1..=8).
    pub fn read_int(&mut self, width: usize, endian: Endianness) -> Result<i64, CursorError> {
        let raw = self.read_uint(width, endian)?;
        Ok(twos_complement(raw, (width * 8) as u32))
    }

    pub fn read_u8(&mut self) -> Result<u8, CursorError> {
        Ok(self.read_bytes(1)?[0])
    }

    pub fn read_u16(&mut self, endian: Endianness) -> Result<u16, CursorError> {
        Ok(self.read_uint(2, endian)? as u16)
    }

    pub fn read_u32(&mut self, endian: Endianness) -> Result<u32, CursorError> {
        Ok(self.read_uint(4, endian)? as u32)
    }

    /// Read a 64-bit unsigned integer as two 32-bit halves.
    ///
    /// Little-endian payloads carry the low word first (`low + high * 2^32`),
    /// big-endian payloads the high word first (`high * 2^32 + low`). The
    /// integer result is exact over the whole `u64` range; converting it to
    /// `f64` for a measurement loses precision above 2^53.
    pub fn read_u64(&mut self, endian: Endianness) -> Result<u64, CursorError> {
        self.ensure(8)?;
        let first = u64::from(self.read_u32(endian)?);
        let second = u64::from(self.read_u32(endian)?);
        let (low, high) = match endian {
            Endianness::Little => (first, second),
            Endianness::Big => (second, first),
        };
        Ok((high << 32) | low)
    }

    pub fn read_i8(&mut self) -> Result<i8, CursorError> {
        Ok(self.read_u8()? as i8)
    }

    pub fn read_i16(&mut self, endian: Endianness) -> Result<i16, CursorError> {
        Ok(self.read_u16(endian)? as i16)
    }

    pub fn read_i32(&mut self, endian: Endianness) -> Result<i32, CursorError> {
        Ok(self.read_u32(endian)? as i32)
    }

    pub fn read_i64(&mut self, endian: Endianness) -> Result<i64, CursorError> {
        Ok(self.read_u64(endian)? as i64)
    }

    /// Restore a position previously returned by [`ByteCursor::offset`].
    pub(crate) fn rewind_to(&mut self, offset: usize) {
        debug_assert!(offset <= self.data.len());
        self.offset = offset.min(self.data.len());
    }
}
