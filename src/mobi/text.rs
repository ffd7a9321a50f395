//! Text record decoding: codec selection, trailer trimming and concatenation.

use tracing::{debug, trace};

use super::headers::{Compression, MobiHeader};
use super::huffcdic::HuffCdicReader;
use super::palmdoc::PalmDocReader;
use super::pdb::{PalmDb, SectionMap};
use super::vwi;
use crate::error::{Error, Result};

/// A byte-stream transform applied to one text record at a time.
pub trait TextDecoder {
    fn unpack(&mut self, chunk: &[u8]) -> Result<Vec<u8>>;
}

/// Identity codec for `compression == 1`.
#[derive(Debug, Default)]
pub struct Uncompressed;

impl TextDecoder for Uncompressed {
    fn unpack(&mut self, chunk: &[u8]) -> Result<Vec<u8>> {
        Ok(chunk.to_vec())
    }
}

/// Strip the trailing entries and multibyte overlap described by `flags`.
///
/// Bit 0 marks the multibyte overlap, which is removed last. Every other
/// set bit adds one size-prefixed trailing entry.
pub fn trim_trailing_entries(record: &[u8], flags: u16) -> &[u8] {
    let multibyte = flags & 1 != 0;
    let mut trailers = 0;
    let mut f = flags;
    while f > 1 {
        if f & 2 != 0 {
            trailers += 1;
        }
        f >>= 1;
    }

    let mut data = record;
    for _ in 0..trailers {
        let num = vwi::trailing_entry_size(data);
        // A zero-size entry trims nothing rather than emptying the record
        data = &data[..data.len().saturating_sub(num)];
    }
    if multibyte && let Some(&last) = data.last() {
        let num = (last & 3) as usize + 1;
        data = &data[..data.len().saturating_sub(num)];
    }
    data
}

/// Build the codec named by the header, loading Huffman tables if needed.
pub fn decoder_for(
    db: &PalmDb,
    header: &MobiHeader,
    sections: &mut SectionMap,
) -> Result<Box<dyn TextDecoder>> {
    match header.compression {
        Compression::None => Ok(Box::new(Uncompressed)),
        Compression::PalmDoc => Ok(Box::new(PalmDocReader)),
        Compression::Huffman => {
            let huff_index = header
                .huff_offset
                .ok_or(Error::MissingTable("HUFF"))?;
            let huff = db.section(huff_index)?;
            sections.describe(huff_index, "Huffman Compression Seed");

            let mut cdics = Vec::new();
            for i in 1..header.huff_count {
                let index = huff_index + i;
                cdics.push(db.section(index)?);
                sections.describe(index, format!("Huffman CDIC Compression Seed {i}"));
            }
            debug!(cdic_sections = cdics.len(), "loading Huffman dictionary");
            Ok(Box::new(HuffCdicReader::new(huff, &cdics)?))
        }
        Compression::Unknown(n) => Err(Error::UnsupportedFormat(format!(
            "invalid compression type 0x{n:04x}"
        ))),
    }
}

/// Decompress every text record of a book and concatenate the result.
pub fn decode_text(db: &PalmDb, header: &MobiHeader, sections: &mut SectionMap) -> Result<Vec<u8>> {
    let mut decoder = decoder_for(db, header, sections)?;
    let flags = header.trailing_flags;

    let mut raw = Vec::new();
    for i in 0..header.records {
        let index = header.start + 1 + i;
        let record = db.section(index)?;
        let trimmed = trim_trailing_entries(record, flags);
        trace!(index, len = record.len(), trimmed = trimmed.len(), "text record");
        raw.extend_from_slice(&decoder.unpack(trimmed)?);
        sections.describe(index, header.text_section_label(i + 1));
    }
    Ok(raw)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_flags() {
        assert_eq!(trim_trailing_entries(b"hello", 0), b"hello");
    }

    #[test]
    fn test_multibyte_only() {
        // Last byte 0x01 means two overlap bytes, including itself
        assert_eq!(trim_trailing_entries(b"hello\x01", 1), b"hell");
    }

    #[test]
    fn test_one_trailer() {
        // Trailer "xy\x83": its size byte says three bytes including itself
        assert_eq!(trim_trailing_entries(b"textxy\x83", 0b10), b"text");
    }

    #[test]
    fn test_two_trailers_then_multibyte() {
        let mut record = b"body".to_vec();
        record.push(0x00); // overlap marker: one byte
        record.extend_from_slice(&[b'a', 0x82]);
        record.extend_from_slice(&[b'b', b'c', 0x83]);
        assert_eq!(trim_trailing_entries(&record, 0b111), b"body");
    }

    #[test]
    fn test_zero_size_trailer_is_noop() {
        assert_eq!(trim_trailing_entries(b"abc\x80", 0b10), b"abc\x80");
    }

    #[test]
    fn test_oversized_trailer_empties_record() {
        assert_eq!(trim_trailing_entries(b"a\xff", 0b10), b"");
    }

    #[test]
    fn test_uncompressed_identity() {
        let mut codec = Uncompressed;
        assert_eq!(codec.unpack(b"<p>x</p>").unwrap(), b"<p>x</p>");
    }
}
