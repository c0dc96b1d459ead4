//! # Utility Modules
//!
//! Hex parsing/formatting and logging helpers shared by the engine and the
//! command-line tool.

pub mod hex;
pub mod logging;

pub use hex::{format_hex_spaced, parse_payload_hex, HexError};
pub use logging::{log_payload_hex, LogThrottle};
