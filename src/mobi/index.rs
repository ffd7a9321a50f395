//! Tagged index tables (INDX, TAGX, IDXT, CTOC)
//!
//! Every structural table in a MOBI book uses the same layout:
//! - a type 0 header section carrying the TAGX tag definitions
//! - `count` type 1 data sections, each with an IDXT offset table
//! - `nctoc` CTOC sections holding strings referenced by offset
//!
//! Consumers: NCX, KF8 skeleton/fragment/guide tables, dictionaries.

use std::collections::BTreeMap;
use std::ops::Range;

use tracing::{debug, warn};

use super::headers::Codec;
use super::pdb::{PalmDb, SectionMap};
use super::vwi;
use crate::error::{MalformedInput, Result};
use crate::util::{read_u16, read_u32, to_hex};

/// Values per tag id, in tag-table order.
pub type TagMap = BTreeMap<u8, Vec<u64>>;

/// Parsed INDX header: the 13 words following the magic.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "cli", derive(serde::Serialize))]
pub struct IndxHeader {
    /// Header length; the TAGX block starts here.
    pub len: u32,
    pub nul1: u32,
    pub index_type: u32,
    pub gen_: u32,
    /// IDXT offset in data sections.
    pub idxt_start: u32,
    /// Data section count (header) or entry count (data section).
    pub count: u32,
    pub code: u32,
    pub lng: u32,
    pub total: u32,
    pub ordt: u32,
    pub ligt: u32,
    pub nligt: u32,
    pub nctoc: u32,
}

impl IndxHeader {
    const WORDS: usize = 13;

    pub fn parse(data: &[u8]) -> Result<Self> {
        if !data.starts_with(b"INDX") {
            return Err(MalformedInput::Index(format!(
                "index section is not INDX: {}",
                to_hex(&data[..data.len().min(4)])
            ))
            .into());
        }
        let needed = 4 + 4 * Self::WORDS;
        if data.len() < needed {
            return Err(MalformedInput::Truncated {
                what: "INDX header",
                offset: 0,
                needed,
                available: data.len(),
            }
            .into());
        }

        let mut w = [0u32; Self::WORDS];
        for (i, word) in w.iter_mut().enumerate() {
            *word = read_u32(data, 4 + 4 * i).unwrap_or(0);
        }
        let [len, nul1, index_type, gen_, idxt_start, count, code, lng, total, ordt, ligt, nligt, nctoc] =
            w;
        Ok(Self {
            len,
            nul1,
            index_type,
            gen_,
            idxt_start,
            count,
            code,
            lng,
            total,
            ordt,
            ligt,
            nligt,
            nctoc,
        })
    }
}

/// TAGX entry: defines how to interpret index entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "cli", derive(serde::Serialize))]
pub struct TagDef {
    pub tag: u8,
    pub values_per_entry: u8,
    pub mask: u8,
    pub end_flag: u8,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "cli", derive(serde::Serialize))]
pub struct TagTable {
    pub control_byte_count: usize,
    pub tags: Vec<TagDef>,
}

impl TagTable {
    /// Read the TAGX block at `start`. A missing block yields an empty table.
    pub fn parse(data: &[u8], start: usize) -> Self {
        let Some(block) = data.get(start..) else {
            return Self::default();
        };
        if !block.starts_with(b"TAGX") {
            debug!(start, "no TAGX block");
            return Self::default();
        }
        let first_entry = read_u32(block, 4).unwrap_or(0) as usize;
        let control_byte_count = read_u32(block, 8).unwrap_or(0) as usize;

        let tags = block
            .get(12..first_entry.min(block.len()))
            .unwrap_or_default()
            .chunks_exact(4)
            .map(|c| TagDef {
                tag: c[0],
                values_per_entry: c[1],
                mask: c[2],
                end_flag: c[3],
            })
            .collect();
        Self {
            control_byte_count,
            tags,
        }
    }

    pub fn has_tag(&self, tag: u8) -> bool {
        self.tags.iter().any(|t| t.tag == tag)
    }
}

/// Decode the tag map of one entry.
///
/// Control bytes start at `start`; values follow them. If `end` is known,
/// unconsumed non-zero bytes before it are reported as a warning.
pub fn get_tag_map(table: &TagTable, data: &[u8], start: usize, end: Option<usize>) -> Result<TagMap> {
    enum Count {
        Values(u64),
        Bytes(u64),
    }

    let mut pending = Vec::new();
    let mut control_index = 0;
    let mut pos = start + table.control_byte_count;

    // First pass: which tags are present and how many values each carries
    for def in &table.tags {
        if def.end_flag == 0x01 {
            control_index += 1;
            continue;
        }
        let byte_pos = start + control_index;
        let control = *data.get(byte_pos).ok_or(MalformedInput::Truncated {
            what: "index control byte",
            offset: byte_pos,
            needed: 1,
            available: data.len().saturating_sub(byte_pos),
        })?;

        let value = control & def.mask;
        if value == 0 {
            continue;
        }
        let count = if value == def.mask {
            if def.mask.count_ones() > 1 {
                // Length in bytes of the following values, not a count
                let (len, consumed) = vwi::decode(data, pos)?;
                pos += consumed;
                Count::Bytes(len)
            } else {
                Count::Values(1)
            }
        } else {
            Count::Values(u64::from(value >> def.mask.trailing_zeros()))
        };
        pending.push((def.tag, count, def.values_per_entry));
    }

    // Second pass: read the values
    let mut map = TagMap::new();
    for (tag, count, per_entry) in pending {
        let mut values = Vec::new();
        match count {
            Count::Values(n) => {
                for _ in 0..n * u64::from(per_entry) {
                    let (v, consumed) = vwi::decode(data, pos)?;
                    pos += consumed;
                    values.push(v);
                }
            }
            Count::Bytes(n) => {
                let mut total = 0u64;
                while total < n {
                    let (v, consumed) = vwi::decode(data, pos)?;
                    pos += consumed;
                    total += consumed as u64;
                    values.push(v);
                }
                if total != n {
                    warn!(tag, expected = n, consumed = total, "tag value length mismatch");
                }
            }
        }
        map.insert(tag, values);
    }

    if let Some(end) = end
        && pos < end
        && let Some(rest) = data.get(pos..end)
        && rest.iter().any(|&b| b != 0)
    {
        warn!(bytes = %to_hex(rest), "unprocessed index bytes left");
    }
    Ok(map)
}

/// String table addressed by byte offset. Section `k` adds `k * 0x10000`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Ctoc {
    strings: BTreeMap<usize, Vec<u8>>,
}

impl Ctoc {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add the strings of one CTOC section at `base`.
    pub fn read_section(&mut self, data: &[u8], base: usize) {
        let mut offset = 0;
        while offset < data.len() {
            if data[offset] == 0 {
                break;
            }
            let key = offset;
            let Ok((len, consumed)) = vwi::decode(data, offset) else {
                warn!(offset, "unterminated CTOC length");
                break;
            };
            offset += consumed;
            let end = offset.saturating_add(len as usize).min(data.len());
            self.strings.insert(base + key, data[offset..end].to_vec());
            offset = end;
        }
    }

    pub fn get(&self, offset: usize) -> Option<&[u8]> {
        self.strings.get(&offset).map(Vec::as_slice)
    }

    pub fn text(&self, offset: usize, codec: Codec) -> Option<String> {
        self.get(offset).map(|b| codec.decode(b).into_owned())
    }

    pub fn len(&self) -> usize {
        self.strings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strings.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, &[u8])> {
        self.strings.iter().map(|(k, v)| (*k, v.as_slice()))
    }
}

/// One type 1 data section with its IDXT entry boundaries.
#[derive(Debug, Clone)]
pub struct IndexSection<'a> {
    pub header: IndxHeader,
    data: &'a [u8],
    /// Entry start offsets followed by the IDXT position.
    positions: Vec<usize>,
}

impl<'a> IndexSection<'a> {
    pub fn parse(data: &'a [u8]) -> Result<Self> {
        let header = IndxHeader::parse(data)?;
        let idxt = header.idxt_start as usize;
        let count = header.count as usize;

        let mut positions = Vec::with_capacity(count + 1);
        for j in 0..count {
            let at = idxt + 4 + 2 * j;
            let pos = read_u16(data, at).ok_or(MalformedInput::Truncated {
                what: "IDXT",
                offset: at,
                needed: 2,
                available: data.len().saturating_sub(at),
            })?;
            positions.push(pos as usize);
        }
        // The last entry ends before the IDXT tag (possibly after zero fill)
        positions.push(idxt);
        Ok(Self {
            header,
            data,
            positions,
        })
    }

    pub fn data(&self) -> &'a [u8] {
        self.data
    }

    pub fn entry_count(&self) -> usize {
        self.positions.len() - 1
    }

    pub fn entry_start(&self, j: usize) -> Option<usize> {
        (j < self.entry_count()).then(|| self.positions[j])
    }

    pub fn entry_range(&self, j: usize) -> Option<Range<usize>> {
        (j < self.entry_count()).then(|| self.positions[j]..self.positions[j + 1])
    }

    /// Length-prefixed entry name at `start`, clamped to the section.
    pub fn name_at(&self, start: usize) -> &'a [u8] {
        let Some(&len) = self.data.get(start) else {
            return &[];
        };
        let from = (start + 1).min(self.data.len());
        let to = (start + 1 + len as usize).min(self.data.len());
        &self.data[from..to]
    }

    pub fn entries(&self, table: &TagTable) -> Result<Vec<IndexEntry>> {
        let mut out = Vec::with_capacity(self.entry_count());
        for j in 0..self.entry_count() {
            let (start, end) = (self.positions[j], self.positions[j + 1]);
            let name = self.name_at(start);
            let tags = get_tag_map(table, self.data, start + 1 + name.len(), Some(end))?;
            out.push(IndexEntry {
                name: name.to_vec(),
                tags,
            });
        }
        Ok(out)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexEntry {
    pub name: Vec<u8>,
    pub tags: TagMap,
}

impl IndexEntry {
    pub fn tag(&self, tag: u8) -> Option<&[u64]> {
        self.tags.get(&tag).map(Vec::as_slice)
    }

    pub fn value(&self, tag: u8, i: usize) -> Option<u64> {
        self.tag(tag).and_then(|v| v.get(i).copied())
    }

    pub fn first(&self, tag: u8) -> Option<u64> {
        self.value(tag, 0)
    }
}

/// A fully decoded index table.
#[derive(Debug, Clone, Default)]
pub struct TaggedIndex {
    pub header: IndxHeader,
    pub tag_table: TagTable,
    pub entries: Vec<IndexEntry>,
    pub ctoc: Ctoc,
}

/// Read the index whose header section is `first`, labelling its sections.
pub fn read_index(
    db: &PalmDb,
    first: usize,
    label: &str,
    sections: &mut SectionMap,
) -> Result<TaggedIndex> {
    let data = db.section(first)?;
    sections.describe(first, format!("{label} Main INDX section"));
    let header = IndxHeader::parse(data)?;
    if header.index_type != 0 {
        return Err(MalformedInput::Index(format!(
            "{label} header section {first} is type {}, not 0",
            header.index_type
        ))
        .into());
    }

    let count = header.count as usize;
    let mut ctoc = Ctoc::new();
    let ctoc_first = first + count + 1;
    for j in 0..header.nctoc as usize {
        let index = ctoc_first + j;
        let cdata = db.section(index)?;
        sections.describe(index, format!("{label} CTOC Data {j}"));
        ctoc.read_section(cdata, j * 0x10000);
    }

    let tag_table = TagTable::parse(data, header.len as usize);

    let mut entries = Vec::new();
    for i in 1..=count {
        let index = first + i;
        sections.describe(index, format!("{label} Extra {i} INDX section"));
        let section = IndexSection::parse(db.section(index)?)?;
        if section.header.index_type != 1 {
            warn!(index, kind = section.header.index_type, "{label} data section is not type 1");
        }
        entries.extend(section.entries(&tag_table)?);
    }

    debug!(
        label,
        entries = entries.len(),
        ctoc = ctoc.len(),
        "read index"
    );
    Ok(TaggedIndex {
        header,
        tag_table,
        entries,
        ctoc,
    })
}

fn required(entry: &IndexEntry, tag: u8, i: usize, what: &str) -> Result<u64> {
    entry.value(tag, i).ok_or_else(|| {
        MalformedInput::Index(format!(
            "{what} entry {:?} lacks tag {tag} value {i}",
            String::from_utf8_lossy(&entry.name)
        ))
        .into()
    })
}

/// One KF8 output file: the literal shell its fragments are spliced into.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "cli", derive(serde::Serialize))]
pub struct SkeletonEntry {
    pub file_number: usize,
    pub name: String,
    pub fragment_count: usize,
    pub start: usize,
    pub length: usize,
}

impl SkeletonEntry {
    pub fn from_index(index: &TaggedIndex, codec: Codec) -> Result<Vec<Self>> {
        index
            .entries
            .iter()
            .enumerate()
            .map(|(file_number, e)| {
                Ok(Self {
                    file_number,
                    name: codec.decode(&e.name).into_owned(),
                    fragment_count: required(e, 1, 0, "skeleton")? as usize,
                    start: required(e, 6, 0, "skeleton")? as usize,
                    length: required(e, 6, 1, "skeleton")? as usize,
                })
            })
            .collect()
    }

    pub fn end(&self) -> usize {
        self.start + self.length
    }
}

/// A slice of raw markup spliced into a skeleton.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "cli", derive(serde::Serialize))]
pub struct FragmentEntry {
    /// Insert position in raw-markup coordinates.
    pub insert_position: usize,
    /// Selector text from the CTOC, e.g. `P-//*[@aid='0']`.
    pub selector: String,
    pub file_number: usize,
    pub sequence_number: usize,
    pub start_offset: usize,
    pub length: usize,
}

impl FragmentEntry {
    pub fn from_index(index: &TaggedIndex, codec: Codec) -> Result<Vec<Self>> {
        let mut out = Vec::with_capacity(index.entries.len());
        for e in &index.entries {
            let name = String::from_utf8_lossy(&e.name);
            let insert_position = name.trim().parse::<usize>().map_err(|_| {
                MalformedInput::Index(format!("fragment insert position {name:?} is not a number"))
            })?;
            let ctoc_offset = required(e, 2, 0, "fragment")? as usize;
            let selector = index.ctoc.text(ctoc_offset, codec).unwrap_or_else(|| {
                warn!(ctoc_offset, "fragment selector missing from CTOC");
                String::new()
            });
            out.push(Self {
                insert_position,
                selector,
                file_number: required(e, 3, 0, "fragment")? as usize,
                sequence_number: required(e, 4, 0, "fragment")? as usize,
                start_offset: required(e, 6, 0, "fragment")? as usize,
                length: required(e, 6, 1, "fragment")? as usize,
            });
        }
        Ok(out)
    }

    /// The aid value embedded in the selector.
    pub fn aid(&self) -> &str {
        let s = self.selector.as_str();
        if s.len() > 14 {
            s.get(12..s.len() - 2).unwrap_or("")
        } else {
            ""
        }
    }
}

/// A `<guide>` reference: type, title and the fragment it points at.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "cli", derive(serde::Serialize))]
pub struct GuideEntry {
    pub ref_type: String,
    pub title: String,
    pub fragment: Option<usize>,
}

impl GuideEntry {
    pub fn from_index(index: &TaggedIndex, codec: Codec) -> Result<Vec<Self>> {
        let mut out = Vec::with_capacity(index.entries.len());
        for e in &index.entries {
            let title_offset = required(e, 1, 0, "guide")? as usize;
            let title = index.ctoc.text(title_offset, codec).unwrap_or_else(|| {
                warn!(title_offset, "guide title missing from CTOC");
                String::new()
            });
            let fragment = e.first(6).or_else(|| e.first(3)).map(|v| v as usize);
            out.push(Self {
                ref_type: codec.decode(&e.name).into_owned(),
                title,
                fragment,
            });
        }
        Ok(out)
    }
}
