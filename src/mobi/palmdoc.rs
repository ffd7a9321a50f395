//! PalmDOC LZ77 decompression.
//!
//! - `0x01..=0x08`: copy the next n bytes literally
//! - `0x00`, `0x09..=0x7F`: literal byte
//! - `0x80..=0xBF`: back-reference combined with the next byte,
//!   distance = `(code & 0x3FFF) >> 3`, length = `(code & 7) + 3`
//! - `0xC0..=0xFF`: space followed by `byte ^ 0x80`

use tracing::debug;

use super::text::TextDecoder;
use crate::error::Result;

#[derive(Debug, Default)]
pub struct PalmDocReader;

impl TextDecoder for PalmDocReader {
    fn unpack(&mut self, chunk: &[u8]) -> Result<Vec<u8>> {
        Ok(decompress(chunk))
    }
}

pub fn decompress(input: &[u8]) -> Vec<u8> {
    let mut output = Vec::with_capacity(input.len() * 2);
    let mut i = 0;

    while i < input.len() {
        let c = input[i];
        i += 1;

        match c {
            1..=8 => {
                let end = (i + c as usize).min(input.len());
                output.extend_from_slice(&input[i..end]);
                i = end;
            }
            0x00 | 0x09..=0x7F => output.push(c),
            0xC0..=0xFF => {
                output.push(b' ');
                output.push(c ^ 0x80);
            }
            _ => {
                let Some(&next) = input.get(i) else {
                    debug!("palmdoc: back-reference cut off at end of record");
                    break;
                };
                i += 1;

                let code = (u16::from(c) << 8) | u16::from(next);
                let distance = ((code & 0x3FFF) >> 3) as usize;
                let length = ((code & 7) + 3) as usize;

                if distance == 0 || distance > output.len() {
                    debug!(distance, have = output.len(), "palmdoc: skipping bad back-reference");
                    continue;
                }
                // Source and destination may overlap, so copy forward one byte at a time.
                for _ in 0..length {
                    let byte = output[output.len() - distance];
                    output.push(byte);
                }
            }
        }
    }

    output
}
