//! Byte-level helpers shared by the decoders.

use std::fmt::Write;

/// Read a big-endian u16, or `None` when the slice is too short.
#[inline]
pub fn read_u16(data: &[u8], pos: usize) -> Option<u16> {
    let bytes = data.get(pos..pos.checked_add(2)?)?;
    Some(u16::from_be_bytes([bytes[0], bytes[1]]))
}

/// Read a big-endian u32, or `None` when the slice is too short.
#[inline]
pub fn read_u32(data: &[u8], pos: usize) -> Option<u32> {
    let bytes = data.get(pos..pos.checked_add(4)?)?;
    Some(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

/// Lowercase hex rendering used for opaque metadata.
pub fn to_hex(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        let _ = write!(out, "{b:02x}");
    }
    out
}

const BASE32_DIGITS: &[u8; 32] = b"0123456789ABCDEFGHIJKLMNOPQRSTUV";

/// Parse Kindle base32 encoding (0-9A-V) to number.
#[inline]
pub fn parse_base32(s: &[u8]) -> usize {
    let mut result = 0usize;
    for &b in s {
        let val = match b {
            b'0'..=b'9' => (b - b'0') as usize,
            b'A'..=b'V' => (b - b'A') as usize + 10,
            b'a'..=b'v' => (b - b'a') as usize + 10,
            _ => continue,
        };
        result = result.wrapping_mul(32).wrapping_add(val);
    }
    result
}

/// Kindle base32 encoding, zero-padded to at least `width` digits.
pub fn to_base32_padded(mut value: usize, width: usize) -> String {
    let mut digits = Vec::new();
    while value > 0 {
        digits.push(BASE32_DIGITS[value % 32]);
        value /= 32;
    }
    while digits.len() < width {
        digits.push(b'0');
    }
    digits.iter().rev().map(|&b| b as char).collect()
}
