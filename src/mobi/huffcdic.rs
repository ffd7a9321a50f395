//! HUFF/CDIC decompression for MOBI files
//!
//! Some MOBI files use Huffman compression instead of PalmDOC LZ77.
//! The HUFF section holds the code tables and one or more CDIC sections
//! hold the phrase dictionary. A phrase is either literal text or itself
//! Huffman-coded, in which case it is expanded on first use and cached.

use tracing::trace;

use super::text::TextDecoder;
use crate::error::{MalformedInput, Result};
use crate::util::read_u32;

const HUFF_MAGIC: &[u8; 8] = b"HUFF\x00\x00\x00\x18";
const CDIC_MAGIC: &[u8; 8] = b"CDIC\x00\x00\x00\x10";

/// Nesting limit for phrases that expand into other phrases.
const MAX_DEPTH: usize = 32;

#[derive(Debug, Clone)]
enum Phrase {
    /// Still compressed.
    Raw(Vec<u8>),
    /// Being expanded further up the call stack.
    Resolving,
    /// Literal, or already expanded.
    Resolved(Vec<u8>),
}

fn malformed(msg: impl Into<String>) -> crate::error::Error {
    MalformedInput::HuffmanDict(msg.into()).into()
}

/// HUFF/CDIC decompressor
#[derive(Debug)]
pub struct HuffCdicReader {
    /// dict1: 256 entries of (codelen, term, maxcode)
    dict1: Vec<(u32, bool, u64)>,
    /// mincode for each code length (0-32)
    mincode: Vec<u64>,
    /// maxcode for each code length (0-32)
    maxcode: Vec<u64>,
    phrases: Vec<Phrase>,
}

impl HuffCdicReader {
    /// Create a reader from the HUFF section and its CDIC sections.
    pub fn new(huff: &[u8], cdics: &[&[u8]]) -> Result<Self> {
        let mut reader = Self {
            dict1: Vec::with_capacity(256),
            mincode: Vec::with_capacity(33),
            maxcode: Vec::with_capacity(33),
            phrases: Vec::new(),
        };

        reader.load_huff(huff)?;
        for cdic in cdics {
            reader.load_cdic(cdic)?;
        }

        Ok(reader)
    }

    fn load_huff(&mut self, huff: &[u8]) -> Result<()> {
        if huff.len() < 16 || &huff[0..8] != HUFF_MAGIC {
            return Err(malformed("invalid HUFF header"));
        }

        let off1 = read_u32(huff, 8).unwrap_or(0) as usize;
        let off2 = read_u32(huff, 12).unwrap_or(0) as usize;

        for i in 0..256 {
            let v = read_u32(huff, off1 + i * 4).ok_or_else(|| malformed("dict1 truncated"))?;

            let codelen = v & 0x1f;
            let term = v & 0x80 != 0;
            if codelen == 0 {
                return Err(malformed(format!("dict1 entry {i} has zero code length")));
            }
            if codelen <= 8 && !term {
                return Err(malformed(format!("dict1 entry {i} is short but not terminal")));
            }
            let maxcode = ((u64::from(v >> 8) + 1) << (32 - codelen)) - 1;
            self.dict1.push((codelen, term, maxcode));
        }

        // dict2 interleaves 32 (mincode, maxcode) pairs for code lengths 1..=32.
        self.mincode.push(0);
        self.maxcode.push((1u64 << 32) - 1);
        for codelen in 1..=32u32 {
            let pos = off2 + (codelen as usize - 1) * 8;
            let min = read_u32(huff, pos).ok_or_else(|| malformed("dict2 truncated"))?;
            let max = read_u32(huff, pos + 4).ok_or_else(|| malformed("dict2 truncated"))?;
            self.mincode.push(u64::from(min) << (32 - codelen));
            self.maxcode.push(((u64::from(max) + 1) << (32 - codelen)) - 1);
        }

        Ok(())
    }

    fn load_cdic(&mut self, cdic: &[u8]) -> Result<()> {
        if cdic.len() < 16 || &cdic[0..8] != CDIC_MAGIC {
            return Err(malformed("invalid CDIC header"));
        }

        let phrases = read_u32(cdic, 8).unwrap_or(0) as usize;
        let bits = read_u32(cdic, 12).unwrap_or(0);
        let room = phrases.saturating_sub(self.phrases.len());
        let n = if bits >= usize::BITS { room } else { room.min(1 << bits) };

        for i in 0..n {
            let off_pos = 16 + i * 2;
            let off = cdic
                .get(off_pos..off_pos + 2)
                .map(|b| u16::from_be_bytes([b[0], b[1]]) as usize)
                .ok_or_else(|| malformed("CDIC offset table truncated"))?;

            let blen = cdic
                .get(16 + off..18 + off)
                .map(|b| u16::from_be_bytes([b[0], b[1]]))
                .ok_or_else(|| malformed(format!("CDIC entry {i} out of bounds")))?;

            let start = 18 + off;
            let end = (start + (blen & 0x7fff) as usize).min(cdic.len());
            let slice = cdic[start..end].to_vec();

            self.phrases.push(if blen & 0x8000 != 0 {
                Phrase::Resolved(slice)
            } else {
                Phrase::Raw(slice)
            });
        }

        trace!(loaded = n, total = self.phrases.len(), "CDIC section loaded");
        Ok(())
    }

    pub fn phrase_count(&self) -> usize {
        self.phrases.len()
    }

    /// Decompress a text record
    pub fn decompress(&mut self, data: &[u8]) -> Result<Vec<u8>> {
        let mut result = Vec::new();
        self.unpack_into(data, &mut result, 0)?;
        Ok(result)
    }

    fn unpack_into(&mut self, data: &[u8], output: &mut Vec<u8>, depth: usize) -> Result<()> {
        if depth > MAX_DEPTH {
            return Err(malformed("phrase nesting too deep"));
        }

        let mut bits_left = data.len() as i64 * 8;

        // Pad data for safe reading
        let mut padded = Vec::with_capacity(data.len() + 8);
        padded.extend_from_slice(data);
        padded.extend_from_slice(&[0u8; 8]);

        let mut pos = 0usize;
        let mut x = read_u64_be(&padded, pos);
        let mut n: i32 = 32;

        loop {
            if n <= 0 {
                pos += 4;
                x = read_u64_be(&padded, pos);
                n += 32;
            }

            let code = (x >> n) & 0xFFFF_FFFF;

            let (mut codelen, term, mut maxcode) = self.dict1[(code >> 24) as usize];
            if !term {
                while code < self.mincode[codelen as usize] {
                    codelen += 1;
                    if codelen > 32 {
                        return Err(malformed("code longer than 32 bits"));
                    }
                }
                maxcode = self.maxcode[codelen as usize];
            }

            n -= codelen as i32;
            bits_left -= i64::from(codelen);
            if bits_left < 0 {
                break;
            }

            let r = maxcode
                .checked_sub(code)
                .map(|d| (d >> (32 - codelen)) as usize)
                .ok_or_else(|| malformed("code above maxcode"))?;

            let len = self.phrases.len();
            let phrase = self
                .phrases
                .get_mut(r)
                .ok_or_else(|| malformed(format!("phrase {r} out of bounds (len {len})")))?;

            match std::mem::replace(phrase, Phrase::Resolving) {
                Phrase::Resolved(bytes) => {
                    output.extend_from_slice(&bytes);
                    self.phrases[r] = Phrase::Resolved(bytes);
                }
                Phrase::Raw(packed) => {
                    let mut expanded = Vec::new();
                    if let Err(e) = self.unpack_into(&packed, &mut expanded, depth + 1) {
                        self.phrases[r] = Phrase::Raw(packed);
                        return Err(e);
                    }
                    output.extend_from_slice(&expanded);
                    self.phrases[r] = Phrase::Resolved(expanded);
                }
                Phrase::Resolving => {
                    return Err(malformed(format!("phrase {r} refers to itself")));
                }
            }
        }

        Ok(())
    }
}

impl TextDecoder for HuffCdicReader {
    fn unpack(&mut self, chunk: &[u8]) -> Result<Vec<u8>> {
        self.decompress(chunk)
    }
}

fn read_u64_be(data: &[u8], pos: usize) -> u64 {
    match data.get(pos..pos + 8) {
        Some(b) => u64::from_be_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]]),
        None => 0,
    }
}
