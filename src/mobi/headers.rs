//! MOBI header (text record 0 of each book) and its field layout table.

use std::borrow::Cow;
use std::fmt;

use tracing::debug;

use super::exth::{Exth, Metadata};
use super::language;
use super::pdb::PalmDb;
use crate::error::{Error, MalformedInput, Result};
use crate::util::{read_u16, read_u32, to_hex};

pub const NULL_INDEX: u32 = 0xFFFFFFFF;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    None,
    PalmDoc,
    Huffman,
    Unknown(u16),
}

impl Compression {
    fn from_u16(value: u16) -> Self {
        match value {
            1 => Compression::None,
            2 => Compression::PalmDoc,
            0x4448 => Compression::Huffman, // "DH"
            n => Compression::Unknown(n),
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Compression::None => "No compression",
            Compression::PalmDoc => "Palmdoc compression",
            Compression::Huffman => "Huffdic compression",
            Compression::Unknown(_) => "Unknown compression",
        }
    }
}

/// Text encoding of a book. Codepages other than UTF-8 decode as CP1252.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Codec {
    #[default]
    Cp1252,
    Utf8,
}

impl Codec {
    pub fn from_codepage(codepage: u32) -> Self {
        match codepage {
            65001 => Codec::Utf8,
            _ => Codec::Cp1252,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Codec::Cp1252 => "windows-1252",
            Codec::Utf8 => "utf-8",
        }
    }

    pub fn decode<'a>(&self, bytes: &'a [u8]) -> Cow<'a, str> {
        let encoding = match self {
            Codec::Cp1252 => encoding_rs::WINDOWS_1252,
            Codec::Utf8 => encoding_rs::UTF_8,
        };
        let (text, _) = encoding.decode_without_bom_handling(bytes);
        text
    }
}

// ============================================================================
// Field layout table
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    U16,
    U32,
    Bytes4,
}

impl FieldKind {
    pub fn width(&self) -> usize {
        match self {
            FieldKind::U16 => 2,
            FieldKind::U32 | FieldKind::Bytes4 => 4,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldValue {
    U16(u16),
    U32(u32),
    Bytes4([u8; 4]),
}

impl FieldValue {
    pub fn as_u32(&self) -> Option<u32> {
        match *self {
            FieldValue::U16(v) => Some(u32::from(v)),
            FieldValue::U32(v) => Some(v),
            FieldValue::Bytes4(_) => None,
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::U16(v) => write!(f, "0x{v:04X} {v:10}"),
            FieldValue::U32(v) => write!(f, "0x{v:08X} {v:10}"),
            FieldValue::Bytes4(b) => write!(f, "{:>10} ", String::from_utf8_lossy(b)),
        }
    }
}

/// Header layout selected by version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Layout {
    PalmDoc,
    Mobi6,
    Kf8,
}

impl Layout {
    const fn bit(self) -> u8 {
        match self {
            Layout::PalmDoc => 1,
            Layout::Mobi6 => 2,
            Layout::Kf8 => 4,
        }
    }
}

const PALM: u8 = 1;
const M6: u8 = 2;
const K8: u8 = 4;
const MOBI: u8 = M6 | K8;
const ALL: u8 = PALM | MOBI;

/// One fixed-offset field of the record 0 header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeaderField {
    pub name: &'static str,
    pub offset: usize,
    pub kind: FieldKind,
    layouts: u8,
}

impl HeaderField {
    const fn new(name: &'static str, offset: usize, kind: FieldKind, layouts: u8) -> Self {
        Self {
            name,
            offset,
            kind,
            layouts,
        }
    }

    pub fn applies_to(&self, layout: Layout) -> bool {
        self.layouts & layout.bit() != 0
    }

    pub fn read(&self, data: &[u8]) -> Option<FieldValue> {
        match self.kind {
            FieldKind::U16 => read_u16(data, self.offset).map(FieldValue::U16),
            FieldKind::U32 => read_u32(data, self.offset).map(FieldValue::U32),
            FieldKind::Bytes4 => {
                let b = data.get(self.offset..self.offset + 4)?;
                Some(FieldValue::Bytes4([b[0], b[1], b[2], b[3]]))
            }
        }
    }

    /// Numeric value, or `None` for missing or non-numeric fields.
    pub fn read_u32(&self, data: &[u8]) -> Option<u32> {
        self.read(data).and_then(|v| v.as_u32())
    }

    /// Pointer value relative to the header section, `None` when absent.
    fn read_index(&self, data: &[u8], start: usize) -> Option<usize> {
        self.read_u32(data)
            .filter(|&v| v != NULL_INDEX)
            .map(|v| v as usize + start)
    }
}

use FieldKind::{Bytes4, U16, U32};

pub const COMPRESSION: HeaderField = HeaderField::new("compression_type", 0x00, U16, ALL);
pub const TEXT_RECORDS: HeaderField = HeaderField::new("text_records", 0x08, U16, ALL);
pub const CRYPTO_TYPE: HeaderField = HeaderField::new("crypto_type", 0x0C, U16, MOBI);
pub const MAGIC: HeaderField = HeaderField::new("magic", 0x10, Bytes4, MOBI);
pub const HEADER_LENGTH: HeaderField = HeaderField::new("header_length", 0x14, U32, MOBI);
pub const BOOK_TYPE: HeaderField = HeaderField::new("type", 0x18, U32, MOBI);
pub const CODEPAGE: HeaderField = HeaderField::new("codepage", 0x1C, U32, MOBI);
pub const UNIQUE_ID: HeaderField = HeaderField::new("unique_id", 0x20, U32, MOBI);
pub const VERSION: HeaderField = HeaderField::new("version", 0x24, U32, MOBI);
pub const ORTH_INDEX: HeaderField = HeaderField::new("metaorthindex", 0x28, U32, MOBI);
pub const INFL_INDEX: HeaderField = HeaderField::new("metainflindex", 0x2C, U32, MOBI);
pub const FIRST_NONTEXT: HeaderField = HeaderField::new("first_nontext", 0x50, U32, MOBI);
pub const TITLE_OFFSET: HeaderField = HeaderField::new("title_offset", 0x54, U32, MOBI);
pub const TITLE_LENGTH: HeaderField = HeaderField::new("title_length", 0x58, U32, MOBI);
pub const LANGUAGE_CODE: HeaderField = HeaderField::new("language_code", 0x5C, U32, MOBI);
pub const DICT_IN_LANG: HeaderField = HeaderField::new("dict_in_lang", 0x60, U32, MOBI);
pub const DICT_OUT_LANG: HeaderField = HeaderField::new("dict_out_lang", 0x64, U32, MOBI);
pub const MIN_VERSION: HeaderField = HeaderField::new("min_version", 0x68, U32, MOBI);
pub const FIRST_RESOURCE: HeaderField = HeaderField::new("first_resc_offset", 0x6C, U32, MOBI);
pub const HUFF_OFFSET: HeaderField = HeaderField::new("huff_offset", 0x70, U32, MOBI);
pub const HUFF_COUNT: HeaderField = HeaderField::new("huff_num", 0x74, U32, MOBI);
pub const EXTH_FLAGS: HeaderField = HeaderField::new("exth_flags", 0x80, U32, MOBI);
pub const FDST_OFFSET: HeaderField = HeaderField::new("fdst_offset", 0xC0, U32, K8);
pub const FDST_COUNT: HeaderField = HeaderField::new("fdst_flow_count", 0xC4, U32, K8);
pub const TRAILING_FLAGS: HeaderField = HeaderField::new("traildata_flags", 0xF2, U16, MOBI);
pub const NCX_INDEX: HeaderField = HeaderField::new("ncx_index", 0xF4, U32, MOBI);
pub const FRAGMENT_INDEX: HeaderField = HeaderField::new("fragment_index", 0xF8, U32, K8);
pub const SKELETON_INDEX: HeaderField = HeaderField::new("skeleton_index", 0xFC, U32, K8);
pub const GUIDE_INDEX: HeaderField = HeaderField::new("guide_index", 0x104, U32, K8);

/// Every known field in offset order. Fields shared by several layouts
/// appear once; offsets reused with a different meaning appear per layout.
pub static HEADER_FIELDS: &[HeaderField] = &[
    COMPRESSION,
    HeaderField::new("fill0", 0x02, U16, ALL),
    HeaderField::new("text_length", 0x04, U32, ALL),
    TEXT_RECORDS,
    HeaderField::new("max_section_size", 0x0A, U16, ALL),
    HeaderField::new("read_pos", 0x0C, U32, PALM),
    CRYPTO_TYPE,
    HeaderField::new("fill1", 0x0E, U16, MOBI),
    MAGIC,
    HEADER_LENGTH,
    BOOK_TYPE,
    CODEPAGE,
    UNIQUE_ID,
    VERSION,
    ORTH_INDEX,
    INFL_INDEX,
    HeaderField::new("index_names", 0x30, U32, MOBI),
    HeaderField::new("index_keys", 0x34, U32, MOBI),
    HeaderField::new("extra_index0", 0x38, U32, MOBI),
    HeaderField::new("extra_index1", 0x3C, U32, MOBI),
    HeaderField::new("extra_index2", 0x40, U32, MOBI),
    HeaderField::new("extra_index3", 0x44, U32, MOBI),
    HeaderField::new("extra_index4", 0x48, U32, MOBI),
    HeaderField::new("extra_index5", 0x4C, U32, MOBI),
    FIRST_NONTEXT,
    TITLE_OFFSET,
    TITLE_LENGTH,
    LANGUAGE_CODE,
    DICT_IN_LANG,
    DICT_OUT_LANG,
    MIN_VERSION,
    FIRST_RESOURCE,
    HUFF_OFFSET,
    HUFF_COUNT,
    HeaderField::new("huff_tbl_offset", 0x78, U32, MOBI),
    HeaderField::new("huff_tbl_len", 0x7C, U32, MOBI),
    EXTH_FLAGS,
    HeaderField::new("fill3_a", 0x84, U32, MOBI),
    HeaderField::new("fill3_b", 0x88, U32, MOBI),
    HeaderField::new("fill3_c", 0x8C, U32, MOBI),
    HeaderField::new("fill3_d", 0x90, U32, MOBI),
    HeaderField::new("fill3_e", 0x94, U32, MOBI),
    HeaderField::new("fill3_f", 0x98, U32, MOBI),
    HeaderField::new("fill3_g", 0x9C, U32, MOBI),
    HeaderField::new("fill3_h", 0xA0, U32, MOBI),
    HeaderField::new("unknown0", 0xA4, U32, MOBI),
    HeaderField::new("drm_offset", 0xA8, U32, MOBI),
    HeaderField::new("drm_count", 0xAC, U32, MOBI),
    HeaderField::new("drm_size", 0xB0, U32, MOBI),
    HeaderField::new("drm_flags", 0xB4, U32, MOBI),
    HeaderField::new("fill4_a", 0xB8, U32, MOBI),
    HeaderField::new("fill4_b", 0xBC, U32, MOBI),
    HeaderField::new("first_content", 0xC0, U16, M6),
    FDST_OFFSET,
    HeaderField::new("last_content", 0xC2, U16, M6),
    HeaderField::new("unknown_c4", 0xC4, U32, M6),
    FDST_COUNT,
    HeaderField::new("fcis_offset", 0xC8, U32, MOBI),
    HeaderField::new("fcis_count", 0xCC, U32, MOBI),
    HeaderField::new("flis_offset", 0xD0, U32, MOBI),
    HeaderField::new("flis_count", 0xD4, U32, MOBI),
    HeaderField::new("unknown1", 0xD8, U32, MOBI),
    HeaderField::new("unknown2", 0xDC, U32, MOBI),
    HeaderField::new("srcs_offset", 0xE0, U32, MOBI),
    HeaderField::new("srcs_count", 0xE4, U32, MOBI),
    HeaderField::new("unknown3", 0xE8, U32, MOBI),
    HeaderField::new("unknown4", 0xEC, U32, MOBI),
    HeaderField::new("fill5", 0xF0, U16, MOBI),
    TRAILING_FLAGS,
    NCX_INDEX,
    HeaderField::new("unknown5", 0xF8, U32, M6),
    FRAGMENT_INDEX,
    HeaderField::new("unknown6", 0xFC, U32, M6),
    SKELETON_INDEX,
    HeaderField::new("datp_offset", 0x100, U32, MOBI),
    HeaderField::new("unknown7", 0x104, U32, M6),
    GUIDE_INDEX,
    HeaderField::new("unknown_108", 0x108, U32, MOBI),
    HeaderField::new("unknown_10c", 0x10C, U32, MOBI),
    HeaderField::new("unknown_110", 0x110, U32, MOBI),
    HeaderField::new("unknown_114", 0x114, U32, MOBI),
    HeaderField::new("unknown_118", 0x118, U32, MOBI),
    HeaderField::new("unknown_11c", 0x11C, U32, MOBI),
    HeaderField::new("unknown_120", 0x120, U32, MOBI),
    HeaderField::new("unknown_124", 0x124, U32, MOBI),
    HeaderField::new("unknown_128", 0x128, U32, MOBI),
    HeaderField::new("unknown_12c", 0x12C, U32, MOBI),
    HeaderField::new("unknown_130", 0x130, U32, MOBI),
    HeaderField::new("unknown_134", 0x134, U32, MOBI),
    HeaderField::new("unknown_138", 0x138, U32, MOBI),
];

// ============================================================================
// MobiHeader
// ============================================================================

/// Header of one book inside the container.
///
/// Index pointers are already converted to absolute section numbers;
/// `None` stands for the `0xFFFFFFFF` sentinel.
#[derive(Debug, Clone)]
pub struct MobiHeader {
    /// Section holding this header.
    pub start: usize,
    /// Raw bytes of the header section.
    pub data: Vec<u8>,
    /// PalmDOC header without a MOBI block.
    pub palm: bool,
    pub compression: Compression,
    pub records: usize,
    /// Declared MOBI header length, excluding the 16-byte PalmDOC prefix.
    pub length: usize,
    pub book_type: u32,
    pub codepage: u32,
    pub codec: Codec,
    pub unique_id: u32,
    pub version: u32,
    pub title: String,
    pub exth: Option<Exth>,
    pub crypto_type: u16,
    pub trailing_flags: u16,
    pub first_nontext: usize,
    pub first_resource: usize,
    pub huff_offset: Option<usize>,
    pub huff_count: usize,
    pub print_replica: bool,
    pub ncx_index: Option<usize>,
    pub orth_index: Option<usize>,
    pub infl_index: Option<usize>,
    pub skeleton_index: Option<usize>,
    pub fragment_index: Option<usize>,
    pub guide_index: Option<usize>,
    pub fdst_index: Option<usize>,
    pub fdst_count: u32,
}

impl MobiHeader {
    /// Parse the header stored in section `start`.
    pub fn parse(db: &PalmDb, start: usize) -> Result<Self> {
        let data = db.section(start)?.to_vec();

        let palm = if data.len() > 20 && &data[16..20] == b"MOBI" {
            false
        } else if db.ident() == b"TEXtREAd" {
            true
        } else {
            return Err(Error::UnsupportedFormat("Unknown File Format".into()));
        };

        if data.len() < 16 {
            return Err(MalformedInput::Truncated {
                what: "record 0 header",
                offset: 0,
                needed: 16,
                available: data.len(),
            }
            .into());
        }

        let records = TEXT_RECORDS.read_u32(&data).unwrap_or(0) as usize;
        let compression = Compression::from_u16(COMPRESSION.read_u32(&data).unwrap_or(0) as u16);
        if let Compression::Unknown(n) = compression {
            return Err(Error::UnsupportedFormat(format!(
                "invalid compression type: 0x{n:04x}"
            )));
        }

        let mut header = Self {
            start,
            palm,
            compression,
            records,
            length: data.len() - 16,
            book_type: 3,
            codepage: 1252,
            codec: Codec::Cp1252,
            unique_id: 0,
            version: 0,
            title: db.name().to_string(),
            exth: None,
            crypto_type: 0,
            trailing_flags: 0,
            first_nontext: start + records + 1,
            first_resource: start + records + 1,
            huff_offset: None,
            huff_count: 0,
            print_replica: false,
            ncx_index: None,
            orth_index: None,
            infl_index: None,
            skeleton_index: None,
            fragment_index: None,
            guide_index: None,
            fdst_index: None,
            fdst_count: 0,
            data: Vec::new(),
        };

        if palm {
            header.data = data;
            return Ok(header);
        }

        header.parse_mobi(db, &data);
        header.data = data;
        debug!(
            start,
            version = header.version,
            codec = header.codec.name(),
            kf8 = header.is_kf8(),
            "parsed MOBI header"
        );
        Ok(header)
    }

    fn parse_mobi(&mut self, db: &PalmDb, data: &[u8]) {
        let start = self.start;

        self.length = HEADER_LENGTH.read_u32(data).unwrap_or(0) as usize;
        self.book_type = BOOK_TYPE.read_u32(data).unwrap_or(0);
        self.codepage = CODEPAGE.read_u32(data).unwrap_or(1252);
        self.codec = Codec::from_codepage(self.codepage);
        self.unique_id = UNIQUE_ID.read_u32(data).unwrap_or(0);
        self.version = VERSION.read_u32(data).unwrap_or(0);

        let toff = TITLE_OFFSET.read_u32(data).unwrap_or(0) as usize;
        let tlen = TITLE_LENGTH.read_u32(data).unwrap_or(0) as usize;
        let tstart = toff.min(data.len());
        let tend = toff.saturating_add(tlen).min(data.len());
        self.title = self.codec.decode(&data[tstart..tend]).into_owned();

        if EXTH_FLAGS.read_u32(data).unwrap_or(0) & 0x40 != 0 {
            let exth_offset = self.length + 16;
            if exth_offset < data.len() {
                self.exth = Some(Exth::parse(&data[exth_offset..]));
            }
        }

        self.crypto_type = CRYPTO_TYPE.read_u32(data).unwrap_or(0) as u16;

        if let Some(idx) = FIRST_RESOURCE.read_index(data, start) {
            self.first_resource = idx;
        }
        if let Some(idx) = FIRST_NONTEXT.read_index(data, start) {
            self.first_nontext = idx;
        }

        self.huff_offset = HUFF_OFFSET.read_index(data, start);
        self.huff_count = HUFF_COUNT.read_u32(data).unwrap_or(0) as usize;

        if db.is_bookmobi()
            && self.length >= 0xE4
            && MIN_VERSION.read_u32(data).unwrap_or(0) >= 5
        {
            self.trailing_flags = TRAILING_FLAGS.read_u32(data).unwrap_or(0) as u16;
        }

        self.print_replica = db
            .section(start + 1)
            .is_ok_and(|text| text.starts_with(b"%MOP"));
        if self.print_replica {
            return;
        }

        if self.version < 8 {
            self.orth_index = ORTH_INDEX.read_index(data, start);
            self.infl_index = INFL_INDEX.read_index(data, start);
        }

        // Older headers stop before the NCX pointer.
        if self.length + 16 < 0xF8 {
            return;
        }

        self.ncx_index = NCX_INDEX.read_index(data, start);

        if self.is_kf8() {
            self.skeleton_index = SKELETON_INDEX.read_index(data, start);
            self.fragment_index = FRAGMENT_INDEX.read_index(data, start);
            self.guide_index = GUIDE_INDEX.read_index(data, start);

            // KF8 books do not carry Mobipocket dictionary indexes.
            self.orth_index = None;
            self.infl_index = None;

            self.fdst_count = FDST_COUNT.read_u32(data).unwrap_or(0);
            self.fdst_index = if self.fdst_count <= 1 {
                None
            } else {
                FDST_OFFSET.read_index(data, start)
            };
        }
    }

    pub fn is_kf8(&self) -> bool {
        self.start != 0 || self.version == 8
    }

    pub fn is_encrypted(&self) -> bool {
        self.crypto_type != 0
    }

    pub fn is_dictionary(&self) -> bool {
        self.orth_index.is_some()
    }

    pub fn has_ncx(&self) -> bool {
        self.ncx_index.is_some()
    }

    pub fn layout(&self) -> Layout {
        match self.version {
            0 => Layout::PalmDoc,
            v if v < 8 => Layout::Mobi6,
            _ => Layout::Kf8,
        }
    }

    pub fn language(&self) -> &'static str {
        language::from_locale(LANGUAGE_CODE.read_u32(&self.data).unwrap_or(0))
    }

    fn dict_language(&self, field: HeaderField) -> Option<&'static str> {
        if !self.is_dictionary() {
            return None;
        }
        let code = field.read_u32(&self.data)?;
        (code & 0xFF != 0).then(|| language::from_locale(code))
    }

    pub fn dict_in_language(&self) -> Option<&'static str> {
        self.dict_language(DICT_IN_LANG)
    }

    pub fn dict_out_language(&self) -> Option<&'static str> {
        self.dict_language(DICT_OUT_LANG)
    }

    /// EXTH records followed by the header-derived basics.
    pub fn metadata(&self) -> Metadata {
        let mut meta = self
            .exth
            .as_ref()
            .map(|e| e.metadata(self.codec))
            .unwrap_or_default();

        meta.set("Language", vec![self.language().to_string()]);
        meta.set("Title", vec![self.title.clone()]);
        meta.set("Codec", vec![self.codec.name().to_string()]);
        meta.set("UniqueID", vec![self.unique_id.to_string()]);
        if let Some(lang) = self.dict_in_language() {
            meta.set("DictInLanguage", vec![lang.to_string()]);
        }
        if let Some(lang) = self.dict_out_language() {
            meta.set("DictOutLanguage", vec![lang.to_string()]);
        }
        meta
    }

    /// Description used for this book's text sections.
    pub fn text_section_label(&self, n: usize) -> String {
        if self.is_kf8() {
            format!("KF8 Text Section {n}")
        } else if self.version == 0 {
            format!("PalmDOC Text Section {n}")
        } else {
            format!("Mobipocket Text Section {n}")
        }
    }

    /// Fields present inside the declared header length, in offset order.
    pub fn fields(&self) -> Vec<(&'static HeaderField, FieldValue)> {
        let layout = self.layout();
        let limit = self.length + 16;
        HEADER_FIELDS
            .iter()
            .filter(|f| f.applies_to(layout) && f.offset < limit)
            .filter_map(|f| f.read(&self.data).map(|v| (f, v)))
            .collect()
    }

    /// Human-readable dump of the header fields and EXTH block.
    pub fn describe(&self) -> Vec<String> {
        let mut lines = vec![
            format!(
                "Dumping section {}, Mobipocket Header version: {}, total length {}",
                self.start,
                self.version,
                self.length + 16
            ),
            format!("Codec: {}", self.codec.name()),
            format!("Title: {}", self.title),
            self.compression.label().to_string(),
            "     Offset  Value Hex Dec        Description".to_string(),
        ];
        for (field, value) in self.fields() {
            lines.push(format!(
                "0x{:03X} ({:3}) {} {}",
                field.offset, field.offset, value, field.name
            ));
        }

        if let Some(exth) = &self.exth {
            lines.push(format!(
                "EXTH metadata, offset {}, padded length {}",
                self.length + 16,
                exth.raw.len()
            ));
            lines.extend(exth.describe(self.codec));

            let extra_start = (self.length + 16 + exth.raw.len()).min(self.data.len());
            let title_offset = TITLE_OFFSET.read_u32(&self.data).unwrap_or(0) as usize;
            if title_offset > extra_start && title_offset <= self.data.len() {
                lines.push(format!(
                    "Extra data between EXTH and Title, length {}",
                    title_offset - extra_start
                ));
                lines.push(to_hex(&self.data[extra_start..title_offset]));
            }
        }
        lines
    }
}
