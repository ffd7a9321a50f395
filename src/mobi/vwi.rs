//! Variable-width integers used by INDX/TAGX data and text record trailers.
//!
//! Each byte contributes its low 7 bits, most significant first. The byte
//! with the high bit set is the last one of the value.

use crate::error::{MalformedInput, Result};

/// Longest encoding accepted by [`decode`] (35 bits).
pub const MAX_LEN: usize = 5;

/// Decode a forward variable-width integer at `offset`.
///
/// Returns the value and the number of bytes consumed.
pub fn decode(buf: &[u8], offset: usize) -> Result<(u64, usize)> {
    let mut value: u64 = 0;
    for (consumed, &byte) in buf.iter().skip(offset).take(MAX_LEN).enumerate() {
        value = (value << 7) | u64::from(byte & 0x7F);
        if byte & 0x80 != 0 {
            return Ok((value, consumed + 1));
        }
    }
    Err(MalformedInput::Varint { offset }.into())
}

/// Encode a value, high bit set on the final byte.
pub fn encode(value: u64) -> Vec<u8> {
    if value == 0 {
        return vec![0x80];
    }

    let mut result = Vec::new();
    let mut v = value;
    while v > 0 {
        result.push((v & 0x7F) as u8);
        v >>= 7;
    }

    // Set high bit on first byte (which becomes last after reverse)
    if let Some(first) = result.first_mut() {
        *first |= 0x80;
    }

    result.reverse();
    result
}

/// Size of one trailing entry, read from the last four bytes of a record.
///
/// The window is scanned left to right and a byte with the high bit set
/// restarts the accumulator.
pub fn trailing_entry_size(record: &[u8]) -> usize {
    let tail = &record[record.len().saturating_sub(4)..];
    let mut num = 0usize;
    for &b in tail {
        if b & 0x80 != 0 {
            num = 0;
        }
        num = (num << 7) | (b & 0x7F) as usize;
    }
    num
}
