//! # Hex Utilities
//!
//! Parsing of operator-supplied payload hex (CLI arguments, batch files) and
//! the spaced upper-case form used for raw passthrough values and log dumps.
//!
//! ```rust
//! use mioty_payload::util::hex::{format_hex_spaced, parse_payload_hex};
//!
//! let bytes = parse_payload_hex("0x11 32:0c-1c").unwrap();
//! assert_eq!(bytes, vec![0x11, 0x32, 0x0C, 0x1C]);
//! assert_eq!(format_hex_spaced(&bytes), "11 32 0C 1C");
//! ```

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum HexError {
    #[error("Invalid hex character: {0}")]
    InvalidCharacter(char),

    #[error("Odd number of hex characters: {0}")]
    OddLength(usize),

    #[error("Empty hex string")]
    EmptyString,
}

/// Parse payload hex. Whitespace, `:`, `-` and `,` separators and `0x`
/// prefixes are ignored; anything else that is not a hex digit is rejected.
pub fn parse_payload_hex(input: &str) -> Result<Vec<u8>, HexError> {
    let mut digits = String::with_capacity(input.len());
    for token in input.split(|c: char| c.is_whitespace() || matches!(c, ':' | '-' | ',')) {
        let token = token
            .strip_prefix("0x")
            .or_else(|| token.strip_prefix("0X"))
            .unwrap_or(token);
        if let Some(bad) = token.chars().find(|c| !c.is_ascii_hexdigit()) {
            return Err(HexError::InvalidCharacter(bad));
        }
        digits.push_str(token);
    }

    if digits.is_empty() {
        return Err(HexError::EmptyString);
    }
    if digits.len() % 2 != 0 {
        return Err(HexError::OddLength(digits.len()));
    }
    // Only hex digits remain, so decoding cannot fail past this point.
    hex::decode(&digits).map_err(|_| HexError::OddLength(digits.len()))
}

/// `"11 32 0C"`: upper case, one space between bytes.
pub fn format_hex_spaced(data: &[u8]) -> String {
    data.iter()
        .map(|b| format!("{b:02X}"))
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_separators_and_prefixes() {
        assert_eq!(parse_payload_hex("11320C1C").unwrap(), vec![0x11, 0x32, 0x0C, 0x1C]);
        assert_eq!(parse_payload_hex("0x11, 0x32").unwrap(), vec![0x11, 0x32]);
        assert_eq!(parse_payload_hex(" de:ad-be ef\n").unwrap(), vec![0xDE, 0xAD, 0xBE, 0xEF]);
    }

    #[test]
    fn test_parse_errors() {
        assert_eq!(parse_payload_hex(""), Err(HexError::EmptyString));
        assert_eq!(parse_payload_hex("  "), Err(HexError::EmptyString));
        assert_eq!(parse_payload_hex("123"), Err(HexError::OddLength(3)));
        assert_eq!(parse_payload_hex("GG"), Err(HexError::InvalidCharacter('G')));
    }

    #[test]
    fn test_format_spaced() {
        assert_eq!(format_hex_spaced(&[0x0a, 0xff]), "0A FF");
        assert_eq!(format_hex_spaced(&[]), "");
    }
}
