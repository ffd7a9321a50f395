//! Classification of the sections that follow the text records.
//!
//! Sections are sniffed against an ordered list of magic tags; images are
//! detected last. A section that fails to decode is reported and kept raw
//! so the rest of the book still unpacks.

use std::io::Read;

use flate2::read::ZlibDecoder;
use tracing::{debug, info, warn};

use super::pagemap::PageMap;
use super::pdb::{PalmDb, SectionMap};
use crate::error::{Error, MalformedInput, Result};
use crate::util::{read_u32, to_hex};

/// End-of-file marker record.
pub const EOF_RECORD: &[u8] = b"\xe9\x8e\r\n";

/// Separator between the Mobipocket and KF8 halves of a combination file.
pub const BOUNDARY: &[u8] = b"BOUNDARY";

/// Number of leading font bytes covered by XOR obfuscation.
const FONT_XOR_EXTENT: usize = 1040;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "cli", derive(serde::Serialize))]
pub enum ImageFormat {
    Jpeg,
    Png,
    Gif,
    Bmp,
    Tiff,
}

impl ImageFormat {
    /// Sniff the image format from its leading bytes.
    pub fn detect(data: &[u8]) -> Option<Self> {
        if data.starts_with(&[0xFF, 0xD8, 0xFF])
            || data.get(6..10).is_some_and(|m| m == b"JFIF" || m == b"Exif")
        {
            Some(Self::Jpeg)
        } else if data.starts_with(&[0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A]) {
            Some(Self::Png)
        } else if data.starts_with(b"GIF87a") || data.starts_with(b"GIF89a") {
            Some(Self::Gif)
        } else if data.starts_with(b"MM") || data.starts_with(b"II") {
            Some(Self::Tiff)
        } else if data.starts_with(b"BM") {
            Some(Self::Bmp)
        } else {
            None
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            Self::Jpeg => "jpeg",
            Self::Png => "png",
            Self::Gif => "gif",
            Self::Bmp => "bmp",
            Self::Tiff => "tiff",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "cli", derive(serde::Serialize))]
pub enum ResourceKind {
    /// FLIS, FCIS, FDST or DATP bookkeeping.
    Skipped(String),
    /// Zipped kindlegen sources.
    SourceArchive,
    /// Kindlegen build log.
    BuildLog,
    Font { ext: &'static str, obfuscated: bool },
    FailedFont,
    Resc,
    PageMap,
    Container,
    Boundary,
    EndOfFile,
    Image { format: ImageFormat },
    Unknown,
}

/// One classified section.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "cli", derive(serde::Serialize))]
pub struct Resource {
    pub section: usize,
    pub kind: ResourceKind,
    /// Output file name for extracted payloads.
    pub name: Option<String>,
    #[cfg_attr(feature = "cli", serde(skip))]
    pub data: Vec<u8>,
}

impl Resource {
    /// True for payloads that would be written out as files.
    pub fn is_extractable(&self) -> bool {
        matches!(
            self.kind,
            ResourceKind::Font { .. } | ResourceKind::FailedFont | ResourceKind::Image { .. }
        )
    }
}

/// Result of scanning a range of sections.
#[derive(Debug, Default)]
pub struct ResourceScan {
    pub resources: Vec<Resource>,
    pub page_map: Option<PageMap>,
    pub issues: Vec<Error>,
}

struct FontHeader {
    flags: u32,
    data_start: usize,
    xor_len: usize,
    xor_start: usize,
}

impl FontHeader {
    fn parse(data: &[u8]) -> Option<Self> {
        Some(Self {
            flags: read_u32(data, 8)?,
            data_start: read_u32(data, 12)? as usize,
            xor_len: read_u32(data, 16)? as usize,
            xor_start: read_u32(data, 20)? as usize,
        })
    }
}

/// Decode a FONT section into `(extension, obfuscated, payload)`.
pub fn decode_font(data: &[u8]) -> Result<(&'static str, bool, Vec<u8>)> {
    let header = FontHeader::parse(data).ok_or(MalformedInput::Truncated {
        what: "font header",
        offset: 4,
        needed: 20,
        available: data.len().saturating_sub(4),
    })?;
    let mut font = data
        .get(header.data_start..)
        .ok_or(MalformedInput::Truncated {
            what: "font data",
            offset: header.data_start,
            needed: 0,
            available: data.len(),
        })?
        .to_vec();

    let obfuscated = header.flags & 0x0002 != 0;
    if obfuscated {
        let key = data
            .get(header.xor_start..header.xor_start + header.xor_len)
            .filter(|k| !k.is_empty())
            .ok_or_else(|| MalformedInput::Header(format!("font XOR key of {} bytes", header.xor_len)))?;
        let extent = font.len().min(FONT_XOR_EXTENT);
        for (i, b) in font[..extent].iter_mut().enumerate() {
            *b ^= key[i % key.len()];
        }
    }
    if header.flags & 0x0001 != 0 {
        let mut inflated = Vec::new();
        ZlibDecoder::new(font.as_slice()).read_to_end(&mut inflated)?;
        font = inflated;
    }

    let ext = match font.get(..4) {
        Some(b"\0\x01\0\0" | b"true" | b"ttcf") => ".ttf",
        Some(b"OTTO") => ".otf",
        other => {
            warn!(header = %to_hex(other.unwrap_or_default()), "unknown font header");
            ".dat"
        }
    };
    Ok((ext, obfuscated && ext != ".dat", font))
}

/// Classify one section by its content.
fn classify(index: usize, data: &[u8], keep_raw: bool, scan: &mut ResourceScan) -> (ResourceKind, Option<String>, Vec<u8>) {
    let tag = data.get(..4).unwrap_or(data);
    match tag {
        b"FLIS" | b"FCIS" | b"FDST" | b"DATP" => {
            let kept = if keep_raw { data.to_vec() } else { Vec::new() };
            return (
                ResourceKind::Skipped(String::from_utf8_lossy(tag).into_owned()),
                None,
                kept,
            );
        }
        b"SRCS" => {
            info!(section = index, "kindlegen source archive");
            return (
                ResourceKind::SourceArchive,
                Some("kindlegensrc.zip".into()),
                data.get(16..).unwrap_or_default().to_vec(),
            );
        }
        b"CMET" => {
            info!(section = index, "kindlegen build log");
            return (
                ResourceKind::BuildLog,
                Some("kindlegenbuild.log".into()),
                data.get(10..).unwrap_or_default().to_vec(),
            );
        }
        b"FONT" => {
            let name = format!("font{index:05}");
            return match decode_font(data) {
                Ok((ext, obfuscated, font)) => {
                    debug!(section = index, %name, ext, "font");
                    (ResourceKind::Font { ext, obfuscated }, Some(format!("{name}{ext}")), font)
                }
                Err(e) => {
                    warn!(section = index, error = %e, "failed to extract font");
                    scan.issues.push(e);
                    (ResourceKind::FailedFont, Some(format!("{name}.failed")), data.to_vec())
                }
            };
        }
        b"RESC" => {
            let kept = if keep_raw {
                data.get(4..).unwrap_or_default().to_vec()
            } else {
                Vec::new()
            };
            return (ResourceKind::Resc, Some(format!("resc{index:05}.dat")), kept);
        }
        b"PAGE" => {
            match PageMap::parse(data) {
                Ok(map) => scan.page_map = Some(map),
                Err(e) => {
                    warn!(section = index, error = %e, "unreadable page map");
                    scan.issues.push(e);
                }
            }
            return (ResourceKind::PageMap, None, Vec::new());
        }
        b"CONT" => return (ResourceKind::Container, None, Vec::new()),
        _ => {}
    }

    if data == BOUNDARY {
        return (ResourceKind::Boundary, None, Vec::new());
    }
    if data == EOF_RECORD {
        return (ResourceKind::EndOfFile, None, Vec::new());
    }
    if let Some(format) = ImageFormat::detect(data) {
        let name = format!("image{index:05}.{}", format.extension());
        debug!(section = index, %name, "image");
        return (ResourceKind::Image { format }, Some(name), data.to_vec());
    }

    warn!(section = index, "section does not contain a recognised resource");
    let kept = if keep_raw { data.to_vec() } else { Vec::new() };
    (ResourceKind::Unknown, Some(format!("unknown{index:05}.dat")), kept)
}

fn section_label(kind: &ResourceKind, name: Option<&str>, data: &[u8]) -> String {
    match kind {
        ResourceKind::Skipped(tag) => format!("Type {tag}"),
        ResourceKind::SourceArchive => "Zipped Source Files".into(),
        ResourceKind::BuildLog => "Kindlegen log".into(),
        ResourceKind::Font { .. } | ResourceKind::FailedFont => {
            format!("Font {}", name.unwrap_or_default())
        }
        ResourceKind::Resc => "Mysterious RESC data".into(),
        ResourceKind::PageMap => "Page Map".into(),
        ResourceKind::Container => "Container Header".into(),
        ResourceKind::Boundary => "Mobi/KF8 Boundary Section".into(),
        ResourceKind::EndOfFile => "End Of File".into(),
        ResourceKind::Image { .. } => format!("Image {}", name.unwrap_or_default()),
        ResourceKind::Unknown => mysterious_label(data),
    }
}

/// Label of a section nothing else recognised.
pub fn mysterious_label(data: &[u8]) -> String {
    let head = data.get(..4).unwrap_or(data);
    format!(
        "Mysterious Section, first four bytes '{}' ({})",
        String::from_utf8_lossy(head),
        to_hex(head)
    )
}

/// Classify sections `range` of `db`, labelling each in `sections`.
pub fn scan_resources(
    db: &PalmDb,
    range: std::ops::Range<usize>,
    keep_raw: bool,
    sections: &mut SectionMap,
) -> ResourceScan {
    let mut scan = ResourceScan::default();
    for index in range {
        let data = match db.section(index) {
            Ok(data) => data,
            Err(e) => {
                warn!(section = index, error = %e, "unreadable section");
                scan.issues.push(e);
                continue;
            }
        };
        let (kind, name, payload) = classify(index, data, keep_raw, &mut scan);
        sections.describe(index, section_label(&kind, name.as_deref(), data));
        scan.resources.push(Resource {
            section: index,
            kind,
            name,
            data: payload,
        });
    }
    debug!(
        resources = scan.resources.len(),
        issues = scan.issues.len(),
        "resource scan"
    );
    scan
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use flate2::Compression;
    use flate2::write::ZlibEncoder;

    use super::*;

    const TTF: &[u8] = b"\0\x01\0\0font tables follow";

    fn font_section(payload: &[u8], flags: u32, key: &[u8]) -> Vec<u8> {
        let xor_start = 24;
        let data_start = xor_start + key.len();
        let mut out = b"FONT".to_vec();
        out.extend_from_slice(&(TTF.len() as u32).to_be_bytes());
        out.extend_from_slice(&flags.to_be_bytes());
        out.extend_from_slice(&(data_start as u32).to_be_bytes());
        out.extend_from_slice(&(key.len() as u32).to_be_bytes());
        out.extend_from_slice(&(xor_start as u32).to_be_bytes());
        out.extend_from_slice(key);
        out.extend_from_slice(payload);
        out
    }

    fn zlib(data: &[u8]) -> Vec<u8> {
        let mut enc = ZlibEncoder::new(Vec::new(), Compression::default());
        enc.write_all(data).unwrap();
        enc.finish().unwrap()
    }

    #[test]
    fn test_plain_font() {
        let (ext, obfuscated, font) = decode_font(&font_section(TTF, 0, &[])).unwrap();
        assert_eq!(ext, ".ttf");
        assert!(!obfuscated);
        assert_eq!(font, TTF);
    }

    #[test]
    fn test_obfuscated_compressed_font() {
        let key = [0x5Au8, 0xA5, 0x3C];
        let mut payload = zlib(TTF);
        for (i, b) in payload.iter_mut().enumerate().take(FONT_XOR_EXTENT) {
            *b ^= key[i % key.len()];
        }
        let (ext, obfuscated, font) = decode_font(&font_section(&payload, 3, &key)).unwrap();
        assert_eq!(ext, ".ttf");
        assert!(obfuscated);
        assert_eq!(font, TTF);
    }

    #[test]
    fn test_zero_length_key_fails() {
        assert!(decode_font(&font_section(TTF, 2, &[])).is_err());
    }

    #[test]
    fn test_otf_and_unknown_font() {
        let (ext, _, _) = decode_font(&font_section(b"OTTOdata", 0, &[])).unwrap();
        assert_eq!(ext, ".otf");
        let (ext, _, _) = decode_font(&font_section(b"wOFFdata", 0, &[])).unwrap();
        assert_eq!(ext, ".dat");
    }

    #[test]
    fn test_image_detection() {
        assert_eq!(ImageFormat::detect(&[0xFF, 0xD8, 0xFF, 0xE0]), Some(ImageFormat::Jpeg));
        assert_eq!(ImageFormat::detect(b"GIF89a..."), Some(ImageFormat::Gif));
        assert_eq!(
            ImageFormat::detect(&[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A]),
            Some(ImageFormat::Png)
        );
        assert_eq!(ImageFormat::detect(b"BM\0\0"), Some(ImageFormat::Bmp));
        assert_eq!(ImageFormat::detect(b"XXXX"), None);
    }

    #[test]
    fn test_classify_order() {
        let mut scan = ResourceScan::default();
        let (kind, name, _) = classify(7, b"FDST\0\0\0\x0c", false, &mut scan);
        assert_eq!(kind, ResourceKind::Skipped("FDST".into()));
        assert_eq!(name, None);

        let (kind, _, data) = classify(8, b"SRCS0123456789abPK\x03\x04", false, &mut scan);
        assert_eq!(kind, ResourceKind::SourceArchive);
        assert_eq!(data, b"PK\x03\x04");

        assert_eq!(classify(9, EOF_RECORD, false, &mut scan).0, ResourceKind::EndOfFile);
        assert_eq!(classify(10, BOUNDARY, false, &mut scan).0, ResourceKind::Boundary);

        let (kind, name, data) = classify(11, b"????", false, &mut scan);
        assert_eq!(kind, ResourceKind::Unknown);
        assert_eq!(name.as_deref(), Some("unknown00011.dat"));
        assert!(data.is_empty());
        assert_eq!(mysterious_label(b"????"), "Mysterious Section, first four bytes '????' (3f3f3f3f)");
    }

    #[test]
    fn test_corrupt_font_is_kept_raw() {
        let section = font_section(b"not zlib at all", 1, &[]);
        let mut scan = ResourceScan::default();
        let (kind, name, data) = classify(4, &section, false, &mut scan);
        assert_eq!(kind, ResourceKind::FailedFont);
        assert_eq!(name.as_deref(), Some("font00004.failed"));
        assert_eq!(data, section);
        assert_eq!(scan.issues.len(), 1);
    }
}
