//! Palm database container: the 78-byte header and section offset table.

use std::borrow::Cow;
use std::ops::Range;

use crate::error::{Error, MalformedInput, Result};
use crate::util::{read_u16, read_u32};

const HEADER_LEN: usize = 78;
const ENTRY_LEN: usize = 8;

/// A loaded Palm database. Owns the whole file buffer.
#[derive(Debug)]
pub struct PalmDb {
    data: Vec<u8>,
    name: String,
    ident: [u8; 8],
    /// Section start offsets followed by a sentinel equal to the file length.
    offsets: Vec<usize>,
}

impl PalmDb {
    pub fn parse(data: Vec<u8>) -> Result<Self> {
        if data.len() < HEADER_LEN {
            return Err(MalformedInput::Truncated {
                what: "palm database header",
                offset: 0,
                needed: HEADER_LEN,
                available: data.len(),
            }
            .into());
        }

        let mut ident = [0u8; 8];
        ident.copy_from_slice(&data[0x3C..0x44]);
        if &ident != b"BOOKMOBI" && &ident != b"TEXtREAd" {
            return Err(Error::UnsupportedFormat(format!(
                "unknown book type: {}",
                String::from_utf8_lossy(&ident)
            )));
        }

        // Bytes 0-31: Database name (null-terminated)
        let name_end = data[..32].iter().position(|&b| b == 0).unwrap_or(32);
        let (name, _, _) = encoding_rs::WINDOWS_1252.decode(&data[..name_end]);
        let name = name.into_owned();

        let count = read_u16(&data, 76).unwrap_or(0) as usize;
        let table_end = HEADER_LEN + count * ENTRY_LEN;
        if data.len() < table_end {
            return Err(MalformedInput::Truncated {
                what: "section table",
                offset: HEADER_LEN,
                needed: count * ENTRY_LEN,
                available: data.len() - HEADER_LEN,
            }
            .into());
        }

        let mut offsets = Vec::with_capacity(count + 1);
        for i in 0..count {
            let offset = read_u32(&data, HEADER_LEN + i * ENTRY_LEN).unwrap_or(0) as usize;
            if offset > data.len() {
                return Err(MalformedInput::Truncated {
                    what: "section",
                    offset,
                    needed: offset,
                    available: data.len(),
                }
                .into());
            }
            if offsets.last().is_some_and(|&prev| offset < prev) {
                return Err(MalformedInput::Header(format!(
                    "section {i} starts before section {}",
                    i - 1
                ))
                .into());
            }
            offsets.push(offset);
        }
        offsets.push(data.len());

        Ok(Self {
            data,
            name,
            ident,
            offsets,
        })
    }

    /// Database name from the first 32 header bytes.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn ident(&self) -> &[u8; 8] {
        &self.ident
    }

    pub fn ident_str(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.ident)
    }

    pub fn is_bookmobi(&self) -> bool {
        &self.ident == b"BOOKMOBI"
    }

    pub fn section_count(&self) -> usize {
        self.offsets.len() - 1
    }

    pub fn section_range(&self, index: usize) -> Result<Range<usize>> {
        if index >= self.section_count() {
            return Err(Error::IndexOutOfRange {
                what: "section",
                index,
                len: self.section_count(),
            });
        }
        Ok(self.offsets[index]..self.offsets[index + 1])
    }

    pub fn section(&self, index: usize) -> Result<&[u8]> {
        let range = self.section_range(index)?;
        Ok(&self.data[range])
    }

    pub fn section_len(&self, index: usize) -> Result<usize> {
        self.section_range(index).map(|r| r.len())
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }
}

/// Human-readable descriptions of sections, used only for diagnostics.
#[derive(Debug, Clone, Default)]
#[cfg_attr(feature = "cli", derive(serde::Serialize))]
pub struct SectionMap {
    notes: Vec<Option<String>>,
}

impl SectionMap {
    pub fn new(count: usize) -> Self {
        Self {
            notes: vec![None; count],
        }
    }

    pub fn describe(&mut self, index: usize, note: impl Into<String>) {
        if let Some(slot) = self.notes.get_mut(index) {
            *slot = Some(note.into());
        }
    }

    pub fn get(&self, index: usize) -> Option<&str> {
        self.notes.get(index).and_then(|n| n.as_deref())
    }

    pub fn is_described(&self, index: usize) -> bool {
        self.get(index).is_some()
    }

    pub fn len(&self) -> usize {
        self.notes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.notes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, Option<&str>)> {
        self.notes.iter().enumerate().map(|(i, n)| (i, n.as_deref()))
    }
}
