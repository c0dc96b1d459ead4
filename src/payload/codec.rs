//! # Field Codecs
//!
//! Stateless numeric transforms applied to values already read from the
//! cursor: sign conversion for arbitrary bit widths, fixed-point scaling and
//! packed-field extraction.

/// Interpret the low `bits` bits of `raw` as a two's-complement integer.
///
/// `bits` must be in `1..=64`; bits above the declared width are ignored.
pub fn twos_complement(raw: u64, bits: u32) -> i64 {
    debug_assert!((1..=64).contains(&bits), "bit width {bits} out of range");
    if bits >= 64 {
        return raw as i64;
    }
    let value = raw & ((1u64 << bits) - 1);
    if value & (1u64 << (bits - 1)) != 0 {
        (i128::from(value) - (1i128 << bits)) as i64
    } else {
        value as i64
    }
}

/// Inverse of [`twos_complement`]: encode `value` into the low `bits` bits.
pub fn to_twos_complement(value: i64, bits: u32) -> u64 {
    debug_assert!((1..=64).contains(&bits), "bit width {bits} out of range");
    if bits >= 64 {
        return value as u64;
    }
    (value as u64) & ((1u64 << bits) - 1)
}

/// Fixed-point conversion `raw / divisor - offset`.
///
/// `divisor` is validated non-zero when a layout is built.
pub fn scale(raw: f64, divisor: f64, offset: f64) -> f64 {
    raw / divisor - offset
}

/// Extract a packed sub-field: `(byte >> shift) & mask`.
pub fn extract_bits(byte: u8, shift: u8, mask: u8) -> u8 {
    (byte >> shift) & mask
}

pub fn high_nibble(byte: u8) -> u8 {
    extract_bits(byte, 4, 0x0F)
}

pub fn low_nibble(byte: u8) -> u8 {
    extract_bits(byte, 0, 0x0F)
}

/// Test bit `n` of a feature bitmask.
pub fn bit_set(mask: u8, n: u8) -> bool {
    n < 8 && mask & (1 << n) != 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_twos_complement_widths() {
        assert_eq!(twos_complement(0xFF, 8), -1);
        assert_eq!(twos_complement(0x7F, 8), 127);
        assert_eq!(twos_complement(0x80, 8), -128);
        assert_eq!(twos_complement(0x8000, 16), -32768);
        assert_eq!(twos_complement(0xFFFF_FFFE, 32), -2);
        assert_eq!(twos_complement(0x0F, 4), -1);
        assert_eq!(twos_complement(0x07, 4), 7);
        assert_eq!(twos_complement(u64::MAX, 64), -1);
        assert_eq!(twos_complement(1u64 << 62, 63), -(1i64 << 62));
    }

    #[test]
    fn test_twos_complement_ignores_upper_bits() {
        assert_eq!(twos_complement(0xAB_FF, 8), -1);
    }

    #[test]
    fn test_encode_inverse() {
        assert_eq!(to_twos_complement(-1, 8), 0xFF);
        assert_eq!(to_twos_complement(-32768, 16), 0x8000);
        assert_eq!(to_twos_complement(5, 16), 5);
    }

    #[test]
    fn test_scale() {
        // 0.1 degree resolution biased by 100
        assert!((scale(1234.0, 10.0, 100.0) - 23.4).abs() < 1e-9);
        assert_eq!(scale(3100.0, 1000.0, 0.0), 3.1);
        assert_eq!(scale(0.0, 10.0, 100.0), -100.0);
    }

    #[test]
    fn test_nibbles_and_bits() {
        assert_eq!(high_nibble(0x32), 3);
        assert_eq!(low_nibble(0x32), 2);
        assert_eq!(extract_bits(0b1011_0000, 5, 0b11), 0b01);
        assert!(bit_set(0b0000_0100, 2));
        assert!(!bit_set(0b0000_0100, 1));
        assert!(!bit_set(0xFF, 9));
    }
}
