//! EXTH extended metadata and the ordered metadata map built from it.

use tracing::warn;

use super::headers::Codec;
use crate::util::{read_u32, to_hex};

/// How the payload of a known EXTH id is rendered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExthKind {
    /// Text in the book codepage.
    Text(&'static str),
    /// Big-endian integer of 1, 2 or 4 bytes, rendered in decimal.
    Value(&'static str),
    /// Opaque bytes, rendered as hex.
    Hex(&'static str),
    Unknown,
}

impl ExthKind {
    pub fn of(id: u32) -> Self {
        use ExthKind::*;
        match id {
            1 => Text("Drm Server Id"),
            2 => Text("Drm Commerce Id"),
            3 => Text("Drm Ebookbase Book Id"),
            100 => Text("Creator"),
            101 => Text("Publisher"),
            102 => Text("Imprint"),
            103 => Text("Description"),
            104 => Text("ISBN"),
            105 => Text("Subject"),
            106 => Text("Published"),
            107 => Text("Review"),
            108 => Text("Contributor"),
            109 => Text("Rights"),
            110 => Text("SubjectCode"),
            111 => Text("Type"),
            112 => Text("Source"),
            113 => Text("ASIN"),
            114 => Text("versionNumber"),
            117 => Text("Adult"),
            118 => Text("Price"),
            119 => Text("Currency"),
            122 => Text("fixed-layout"),
            123 => Text("book-type"),
            124 => Text("orientation-lock"),
            126 => Text("original-resolution"),
            127 => Text("zero-gutter"),
            128 => Text("zero-margin"),
            129 => Text("K8(129)_Masthead/Cover_Image"),
            132 => Text("RegionMagnification"),
            200 => Text("DictShortName"),
            208 => Text("Watermark"),
            501 => Text("Document Type"),
            502 => Text("last_update_time"),
            503 => Text("Updated_Title"),
            504 => Text("ASIN_(504)"),
            508 => Text("Title file-as"),
            517 => Text("Creator file-as"),
            522 => Text("Publisher file-as"),
            524 => Text("Language_(524)"),
            525 => Text("primary-writing-mode"),
            527 => Text("page-progression-direction"),
            528 => Text("Unknown_Logical_Value_(528)"),
            529 => Text("Original_Source_Description_(529)"),
            534 => Text("Unknown_(534)"),
            535 => Text("Kindlegen_BuildRev_Number"),
            536 => Text("Unknown_(536)"),
            538 => Text("Image_Size_(538)"),
            539 => Text("Mimetype_(539)"),
            542 => Text("Unknown_(542)"),
            543 => Text("Unknown_(543)"),

            115 => Value("sample"),
            116 => Value("StartOffset"),
            121 => Value("K8(121)_Boundary_Section"),
            125 => Value("K8(125)_Count_of_Resources_Fonts_Images"),
            131 => Value("K8(131)_Unidentified_Count"),
            201 => Value("CoverOffset"),
            202 => Value("ThumbOffset"),
            203 => Value("Has Fake Cover"),
            204 => Value("Creator Software"),
            205 => Value("Creator Major Version"),
            206 => Value("Creator Minor Version"),
            207 => Value("Creator Build Number"),
            401 => Value("Clipping Limit"),
            402 => Value("Publisher Limit"),
            404 => Value("Text to Speech Disabled"),
            406 => Value("Rental_Indicator"),

            209 => Hex("Tamper Proof Keys (hex)"),
            300 => Hex("Font Signature (hex)"),
            403 => Hex("Unknown_(403) (hex)"),
            405 => Hex("Unknown_(405) (hex)"),
            407 => Hex("Unknown_(407) (hex)"),
            450 => Hex("Unknown_(450) (hex)"),
            451 => Hex("Unknown_(451) (hex)"),
            452 => Hex("Unknown_(452) (hex)"),
            453 => Hex("Unknown_(453) (hex)"),

            _ => Unknown,
        }
    }
}

/// One raw EXTH record in file order.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "cli", derive(serde::Serialize))]
pub struct ExthRecord {
    pub id: u32,
    pub data: Vec<u8>,
}

impl ExthRecord {
    /// Integer payload for value ids: 1, 2 or 4 bytes.
    pub fn int_value(&self) -> Option<u32> {
        match self.data.as_slice() {
            [b] => Some(u32::from(*b)),
            [a, b] => Some(u32::from(u16::from_be_bytes([*a, *b]))),
            [a, b, c, d] => Some(u32::from_be_bytes([*a, *b, *c, *d])),
            _ => None,
        }
    }
}

/// Parsed EXTH block. The padded raw bytes are kept alongside the records.
#[derive(Debug, Clone, Default)]
pub struct Exth {
    pub raw: Vec<u8>,
    pub records: Vec<ExthRecord>,
}

impl Exth {
    /// Parse an EXTH block starting at its magic.
    pub fn parse(block: &[u8]) -> Self {
        if !block.starts_with(b"EXTH") {
            warn!("EXTH block does not start with its magic");
        }

        let declared = read_u32(block, 4).unwrap_or(0) as usize;
        let padded = (declared + 3) & !3;
        let raw = block[..padded.min(block.len())].to_vec();
        let count = read_u32(&raw, 8).unwrap_or(0);

        let mut records = Vec::new();
        let mut pos = 12;
        for i in 0..count {
            let (Some(id), Some(size)) = (read_u32(&raw, pos), read_u32(&raw, pos + 4)) else {
                warn!(record = i, count, "EXTH record table truncated");
                break;
            };
            let size = size as usize;
            if size < 8 || pos + size > raw.len() {
                warn!(id, size, "EXTH record runs past the block");
                break;
            }
            records.push(ExthRecord {
                id,
                data: raw[pos + 8..pos + size].to_vec(),
            });
            pos += size;
        }

        Self { raw, records }
    }

    pub fn get(&self, id: u32) -> impl Iterator<Item = &ExthRecord> {
        self.records.iter().filter(move |r| r.id == id)
    }

    fn last_int(&self, id: u32) -> Option<u32> {
        self.get(id).filter_map(ExthRecord::int_value).last()
    }

    /// KF8 boundary section from EXTH 121.
    pub fn boundary_section(&self) -> Option<u32> {
        self.last_int(121).filter(|&v| v != super::headers::NULL_INDEX)
    }

    pub fn cover_offset(&self) -> Option<u32> {
        self.last_int(201).filter(|&v| v != super::headers::NULL_INDEX)
    }

    pub fn start_offsets(&self) -> Vec<u32> {
        self.get(116).filter_map(ExthRecord::int_value).collect()
    }

    /// Render every record into the ordered metadata map.
    pub fn metadata(&self, codec: Codec) -> Metadata {
        let mut meta = Metadata::new();
        for record in &self.records {
            let (name, value) = render(record, codec);
            meta.add(name, value);
        }
        meta
    }

    /// One line per record, for the verbose header dump.
    pub fn describe(&self, codec: Codec) -> Vec<String> {
        let mut lines = vec!["Key Size Description                    Value".to_string()];
        for r in &self.records {
            let size = r.data.len();
            let line = match ExthKind::of(r.id) {
                ExthKind::Text(name) => {
                    format!("{:>3} {:>4} {:<30} {}", r.id, size, name, codec.decode(&r.data))
                }
                ExthKind::Value(name) => match (r.int_value(), size) {
                    (Some(v), 1) => format!("{:>3} byte {:<30} {v}", r.id, name),
                    (Some(v), 2) => format!("{:>3} word {:<30} 0x{v:04X} ({v})", r.id, name),
                    (Some(v), _) => format!("{:>3} long {:<30} 0x{v:08X} ({v})", r.id, name),
                    (None, _) => format!(
                        "{:>3} {:>4} {:<30} (0x{})",
                        r.id,
                        size,
                        format!("Bad size for {name}"),
                        to_hex(&r.data)
                    ),
                },
                ExthKind::Hex(name) => {
                    format!("{:>3} {:>4} {:<30} 0x{}", r.id, size, name, to_hex(&r.data))
                }
                ExthKind::Unknown => format!(
                    "{:>3} {:>4} {:<30} 0x{}",
                    r.id,
                    size,
                    format!("Unknown EXTH ID {}", r.id),
                    to_hex(&r.data)
                ),
            };
            lines.push(line);
        }
        lines
    }
}

fn render(record: &ExthRecord, codec: Codec) -> (String, String) {
    match ExthKind::of(record.id) {
        ExthKind::Text(name) => (name.to_string(), codec.decode(&record.data).into_owned()),
        ExthKind::Value(name) => {
            let value = match record.int_value() {
                Some(v) => v.to_string(),
                None => to_hex(&record.data),
            };
            (name.to_string(), value)
        }
        ExthKind::Hex(name) => (name.to_string(), to_hex(&record.data)),
        ExthKind::Unknown => (format!("{} (hex)", record.id), to_hex(&record.data)),
    }
}

/// Ordered multi-map of metadata names to values.
///
/// Keys keep their first-insertion order and a key may carry several values.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "cli", derive(serde::Serialize))]
pub struct Metadata {
    entries: Vec<(String, Vec<String>)>,
}

impl Metadata {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a value, creating the key if needed.
    pub fn add(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        match self.entries.iter_mut().find(|(k, _)| *k == name) {
            Some((_, values)) => values.push(value.into()),
            None => self.entries.push((name, vec![value.into()])),
        }
    }

    /// Replace all values of a key.
    pub fn set(&mut self, name: impl Into<String>, values: Vec<String>) {
        let name = name.into();
        match self.entries.iter_mut().find(|(k, _)| *k == name) {
            Some((_, existing)) => *existing = values,
            None => self.entries.push((name, values)),
        }
    }

    pub fn get(&self, name: &str) -> Option<&[String]> {
        self.entries
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_slice())
    }

    pub fn first(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(|v| v.first()).map(String::as_str)
    }

    pub fn contains_key(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exth(records: &[(u32, &[u8])]) -> Vec<u8> {
        let mut body = Vec::new();
        for (id, data) in records {
            body.extend_from_slice(&id.to_be_bytes());
            body.extend_from_slice(&(8 + data.len() as u32).to_be_bytes());
            body.extend_from_slice(data);
        }
        let mut out = Vec::new();
        out.extend_from_slice(b"EXTH");
        out.extend_from_slice(&(12 + body.len() as u32).to_be_bytes());
        out.extend_from_slice(&(records.len() as u32).to_be_bytes());
        out.extend_from_slice(&body);
        while out.len() % 4 != 0 {
            out.push(0);
        }
        out
    }

    #[test]
    fn test_repeated_subject_keeps_order() {
        let block = exth(&[(105, b"Fiction"), (100, b"Someone"), (105, b"Adventure")]);
        let meta = Exth::parse(&block).metadata(Codec::Utf8);

        assert_eq!(
            meta.get("Subject").unwrap(),
            &["Fiction".to_string(), "Adventure".to_string()]
        );
        assert_eq!(meta.keys().collect::<Vec<_>>(), vec!["Subject", "Creator"]);
    }

    #[test]
    fn test_value_widths() {
        let block = exth(&[
            (115, &[1]),
            (203, &[0, 7]),
            (201, &42u32.to_be_bytes()),
            (116, &[1, 2, 3]),
        ]);
        let meta = Exth::parse(&block).metadata(Codec::Cp1252);
        assert_eq!(meta.first("sample"), Some("1"));
        assert_eq!(meta.first("Has Fake Cover"), Some("7"));
        assert_eq!(meta.first("CoverOffset"), Some("42"));
        assert_eq!(meta.first("StartOffset"), Some("010203"));
    }

    #[test]
    fn test_unknown_id_is_kept_as_hex() {
        let block = exth(&[(999, &[0xde, 0xad])]);
        let meta = Exth::parse(&block).metadata(Codec::Utf8);
        assert_eq!(meta.first("999 (hex)"), Some("dead"));
    }

    #[test]
    fn test_hex_ids() {
        let block = exth(&[(209, &[0x01, 0xab])]);
        let meta = Exth::parse(&block).metadata(Codec::Utf8);
        assert_eq!(meta.first("Tamper Proof Keys (hex)"), Some("01ab"));
    }

    #[test]
    fn test_cp1252_text() {
        let block = exth(&[(100, b"Caf\xe9")]);
        let meta = Exth::parse(&block).metadata(Codec::Cp1252);
        assert_eq!(meta.first("Creator"), Some("Café"));
    }

    #[test]
    fn test_typed_accessors() {
        let block = exth(&[
            (121, &12u32.to_be_bytes()),
            (116, &0xFFFF_FFFFu32.to_be_bytes()),
            (116, &9u32.to_be_bytes()),
        ]);
        let exth = Exth::parse(&block);
        assert_eq!(exth.boundary_section(), Some(12));
        assert_eq!(exth.cover_offset(), None);
        assert_eq!(exth.start_offsets(), vec![0xFFFF_FFFF, 9]);
    }

    #[test]
    fn test_truncated_record_stops_parsing() {
        let mut block = exth(&[(100, b"Name"), (101, b"Pub")]);
        // Claim a third record that is not there.
        block[8..12].copy_from_slice(&3u32.to_be_bytes());
        let exth = Exth::parse(&block);
        assert_eq!(exth.records.len(), 2);
    }

    #[test]
    fn test_describe_lines() {
        let block = exth(&[(100, b"Author"), (999, &[1])]);
        let lines = Exth::parse(&block).describe(Codec::Utf8);
        assert_eq!(lines.len(), 3);
        assert!(lines[1].contains("Creator"));
        assert!(lines[2].contains("Unknown EXTH ID 999"));
    }

    #[test]
    fn test_metadata_set_replaces() {
        let mut meta = Metadata::new();
        meta.add("Title", "a");
        meta.add("Title", "b");
        meta.set("Title", vec!["c".into()]);
        assert_eq!(meta.get("Title").unwrap(), &["c".to_string()]);
        assert_eq!(meta.len(), 1);
    }
}
