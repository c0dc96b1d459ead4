//! # Decode Error Handling
//!
//! This module defines the error and warning types produced while decoding a
//! payload. Errors end a decode (`DecodeOutcome::Failure`); warnings travel
//! alongside a successful measurement list.

use serde::Serialize;
use std::time::Duration;
use thiserror::Error;

/// Represents the different ways a decode can fail.
#[derive(Debug, Clone, PartialEq, Error, Serialize)]
pub enum DecodeError {
    /// The payload carried no bytes at all.
    #[error("Empty payload")]
    EmptyPayload,

    /// A mandatory field's bytes are not available.
    #[error("Truncated payload: field '{field}' at offset {offset} needs {needed} bytes, {available} available")]
    TruncatedPayload {
        field: String,
        offset: usize,
        needed: usize,
        available: usize,
    },

    /// No layout branch matches the header version and port.
    #[error("Unsupported version {major}.{minor} on port {port}")]
    UnsupportedVersion { major: u8, minor: u8, port: u8 },

    /// The decoding unit raised an error while running.
    #[error("Decoding unit fault: {0}")]
    UnitFault(String),

    /// The decoding unit exceeded its execution budget.
    #[error("Decoding unit '{unit}' exceeded its budget of {budget:?}")]
    Timeout { unit: String, budget: Duration },

    /// No decoding unit is assigned to the device.
    #[error("No decoding unit assigned to device {0}")]
    UnrecognizedDevice(String),

    /// A layout description is structurally invalid.
    #[error("Invalid layout: {0}")]
    InvalidLayout(String),

    /// A decoding unit could not be loaded.
    #[error("Invalid decoding unit: {0}")]
    InvalidUnit(String),

    /// A registry operation referenced a unit that is not registered.
    #[error("Unknown decoding unit: {0}")]
    UnknownUnit(String),
}

impl DecodeError {
    /// Short machine-readable name of the error kind.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::EmptyPayload => "EmptyPayload",
            Self::TruncatedPayload { .. } => "TruncatedPayload",
            Self::UnsupportedVersion { .. } => "UnsupportedVersion",
            Self::UnitFault(_) => "UnitFault",
            Self::Timeout { .. } => "Timeout",
            Self::UnrecognizedDevice(_) => "UnrecognizedDevice",
            Self::InvalidLayout(_) => "InvalidLayout",
            Self::InvalidUnit(_) => "InvalidUnit",
            Self::UnknownUnit(_) => "UnknownUnit",
        }
    }
}

/// Non-fatal conditions recorded during a successful decode.
#[derive(Debug, Clone, PartialEq, Error, Serialize)]
pub enum DecodeWarning {
    /// An optional field group was announced but its bytes are missing.
    #[error("Optional group '{group}' omitted ({fields:?}): needs {needed} bytes, {available} available")]
    OptionalFieldOmitted {
        group: String,
        fields: Vec<String>,
        needed: usize,
        available: usize,
    },

    /// Bytes left over after the last declared group.
    #[error("{count} trailing bytes ignored")]
    TrailingBytes { count: usize },

    /// The device has no unit assigned; the payload was passed through raw.
    #[error("No decoding unit assigned to device {0}, reporting raw payload")]
    UnrecognizedDevice(String),

    /// A warning reported by the decoding unit itself.
    #[error("{0}")]
    Unit(String),

    /// A field decoded to null and was dropped.
    #[error("Field '{0}' is null and was dropped")]
    NullField(String),
}

/// Errors raised by the bounds-checked byte cursor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum CursorError {
    #[error("Read of {needed} bytes at offset {offset} exceeds payload ({available} bytes left)")]
    OutOfBounds {
        offset: usize,
        needed: usize,
        available: usize,
    },
}

impl CursorError {
    /// Attach the name of the field being read when the cursor ran out.
    pub fn into_truncated(self, field: &str) -> DecodeError {
        match self {
            CursorError::OutOfBounds {
                offset,
                needed,
                available,
            } => DecodeError::TruncatedPayload {
                field: field.to_string(),
                offset,
                needed,
                available,
            },
        }
    }
}

/// Errors raised while loading engine configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid configuration: {0}")]
    Json(#[from] serde_json::Error),
}
