//! Book-level driver: one pass over the container per embedded header.

use std::collections::BTreeSet;
use std::fs;
use std::path::Path;

use tracing::{debug, info, warn};

use super::dictionary::{PositionMap, position_map};
use super::exth::Metadata;
use super::headers::MobiHeader;
use super::kf8::{GuideReference, Kf8Book};
use super::legacy::{insert_anchors, link_positions};
use super::ncx::{NcxEntry, TocNode, build_toc, read_ncx};
use super::pagemap::PageMap;
use super::pdb::{PalmDb, SectionMap};
use super::replica::Replica;
use super::resources::{BOUNDARY, Resource, ResourceKind, mysterious_label, scan_resources};
use super::text::decode_text;
use crate::error::{Error, Result};
use crate::options::UnpackOptions;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "cli", derive(serde::Serialize))]
pub enum BookKind {
    PalmDoc,
    Mobipocket { version: u32 },
    Kf8,
    PrintReplica,
}

impl BookKind {
    fn of(header: &MobiHeader) -> Self {
        if header.is_kf8() {
            Self::Kf8
        } else if header.print_replica {
            Self::PrintReplica
        } else if header.version == 0 {
            Self::PalmDoc
        } else {
            Self::Mobipocket {
                version: header.version,
            }
        }
    }

    fn header_label(&self) -> String {
        match self {
            Self::PalmDoc => "PalmDoc Header".into(),
            Self::Mobipocket { version } => format!("Mobipocket {version} Header"),
            Self::Kf8 => "KF8 Header".into(),
            Self::PrintReplica => "Print Replica Header".into(),
        }
    }
}

/// Undecoded payloads kept for diagnostics.
#[derive(Debug, Clone, Default)]
pub struct RawIntermediates {
    /// Bytes of the header section.
    pub header: Vec<u8>,
    /// `(file name, payload)` of bookkeeping and unrecognised sections.
    pub sections: Vec<(String, Vec<u8>)>,
}

/// Everything decoded from one header of the container.
#[derive(Debug)]
#[cfg_attr(feature = "cli", derive(serde::Serialize))]
pub struct BookPart {
    pub kind: BookKind,
    #[cfg_attr(feature = "cli", serde(skip))]
    pub header: MobiHeader,
    pub metadata: Metadata,
    /// Decompressed text records, untouched.
    #[cfg_attr(feature = "cli", serde(skip))]
    pub raw_markup: Vec<u8>,
    pub resources: Vec<Resource>,
    pub ncx: Vec<NcxEntry>,
    pub toc: Vec<TocNode>,
    pub kf8: Option<Kf8Book>,
    pub guide: Vec<GuideReference>,
    pub replica: Option<Replica>,
    #[cfg_attr(feature = "cli", serde(skip))]
    pub position_map: PositionMap,
    /// Legacy markup with dictionary entries and filepos anchors spliced in.
    #[cfg_attr(feature = "cli", serde(skip))]
    pub annotated_markup: Option<Vec<u8>>,
    pub page_map: Option<PageMap>,
    #[cfg_attr(feature = "cli", serde(serialize_with = "issue_strings"))]
    pub issues: Vec<Error>,
    #[cfg_attr(feature = "cli", serde(skip))]
    pub raw: Option<RawIntermediates>,
}

#[cfg(feature = "cli")]
fn issue_strings<S: serde::Serializer>(issues: &[Error], s: S) -> std::result::Result<S::Ok, S::Error> {
    s.collect_seq(issues.iter().map(ToString::to_string))
}

impl BookPart {
    /// Text resources extracted as files: images and fonts.
    pub fn extracted(&self) -> impl Iterator<Item = &Resource> {
        self.resources.iter().filter(|r| r.is_extractable())
    }

    fn raw_header_name(&self) -> &'static str {
        match self.kind {
            BookKind::Kf8 => "header_K8.dat",
            BookKind::PrintReplica => "header_PR.dat",
            _ => "header.dat",
        }
    }
}

/// A decoded container.
#[derive(Debug)]
#[cfg_attr(feature = "cli", derive(serde::Serialize))]
pub struct Unpacked {
    pub ident: String,
    pub name: String,
    /// Base name used for files written by [`Unpacked::write_raw`].
    pub basename: String,
    pub section_count: usize,
    /// Section holding the `BOUNDARY` marker of a combination file.
    pub boundary: Option<usize>,
    pub parts: Vec<BookPart>,
    pub sections: SectionMap,
}

impl Unpacked {
    pub fn is_combination(&self) -> bool {
        self.boundary.is_some()
    }

    /// The KF8 part, if the container has one.
    pub fn kf8(&self) -> Option<&BookPart> {
        self.parts.iter().find(|p| p.kind == BookKind::Kf8)
    }

    /// Write raw markup, header sections and kept payloads under `dir`.
    pub fn write_raw(&self, dir: impl AsRef<Path>) -> Result<()> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir)?;
        for part in &self.parts {
            let (subdir, ext) = match part.kind {
                BookKind::Kf8 => (Some("mobi8"), "rawml"),
                BookKind::PrintReplica => (None, "rawpr"),
                _ => (Some("mobi7"), "rawml"),
            };
            let target = match subdir {
                Some(sub) => dir.join(sub),
                None => dir.to_path_buf(),
            };
            fs::create_dir_all(&target)?;
            fs::write(target.join(format!("{}.{ext}", self.basename)), &part.raw_markup)?;
            fs::write(dir.join(part.raw_header_name()), &part.header.data)?;

            if let Some(raw) = &part.raw {
                for (name, data) in &raw.sections {
                    fs::write(dir.join(name), data)?;
                }
            }
            debug!(dir = %target.display(), kind = ?part.kind, "wrote raw intermediates");
        }
        Ok(())
    }
}

/// Read and unpack the book at `path`.
pub fn unpack_file(path: impl AsRef<Path>, options: &UnpackOptions) -> Result<Unpacked> {
    let path = path.as_ref();
    let mut unpacked = unpack(fs::read(path)?, options)?;
    if let Some(stem) = path.file_stem() {
        unpacked.basename = stem.to_string_lossy().into_owned();
    }
    Ok(unpacked)
}

/// Section index of the `BOUNDARY` marker, if any.
fn find_boundary(db: &PalmDb) -> Option<usize> {
    (0..db.section_count()).find(|&i| db.section(i).is_ok_and(|data| data == BOUNDARY))
}

fn ncx_or_empty(
    db: &PalmDb,
    header: &MobiHeader,
    sections: &mut SectionMap,
    issues: &mut Vec<Error>,
) -> Vec<NcxEntry> {
    read_ncx(db, header, sections).unwrap_or_else(|e| {
        warn!(error = %e, "could not read NCX index");
        issues.push(e);
        Vec::new()
    })
}

/// Unpack a complete container held in memory.
pub fn unpack(data: Vec<u8>, options: &UnpackOptions) -> Result<Unpacked> {
    let db = PalmDb::parse(data)?;
    let mut sections = SectionMap::new(db.section_count());
    info!(
        ident = %db.ident_str(),
        sections = db.section_count(),
        "palm database"
    );

    let first = MobiHeader::parse(&db, 0)?;
    let mut boundary = None;
    let mut headers = Vec::with_capacity(2);
    if first.is_kf8() {
        info!("unpacking a KF8 book");
        headers.push(first);
    } else if let Some(i) = find_boundary(&db) {
        let declared = first.exth.as_ref().and_then(|e| e.boundary_section());
        debug!(boundary = i, ?declared, "combination file");
        sections.describe(i, "Mobi/KF8 Boundary Section");
        let second = MobiHeader::parse(&db, i + 1)?;
        info!(version = first.version, "unpacking a combination Mobipocket/KF8 book");
        boundary = Some(i);
        headers.push(first);
        headers.push(second);
    } else {
        info!(version = first.version, "unpacking a Mobipocket book");
        headers.push(first);
    }

    let mut parts = Vec::with_capacity(headers.len());
    for header in headers {
        parts.push(unpack_part(&db, header, boundary, options, &mut sections)?);
    }

    if options.verbose {
        for (i, note) in sections.iter() {
            info!("section {i:4}: {}", note.unwrap_or(""));
        }
    }

    Ok(Unpacked {
        ident: db.ident_str().into_owned(),
        name: db.name().to_string(),
        basename: "book".to_string(),
        section_count: db.section_count(),
        boundary,
        parts,
        sections,
    })
}

/// Decode one header and everything it owns.
fn unpack_part(
    db: &PalmDb,
    header: MobiHeader,
    boundary: Option<usize>,
    options: &UnpackOptions,
    sections: &mut SectionMap,
) -> Result<BookPart> {
    let kind = BookKind::of(&header);
    sections.describe(header.start, kind.header_label());
    if header.is_encrypted() {
        return Err(Error::UnsupportedFormat("book is encrypted".into()));
    }

    info!(
        version = header.version,
        codec = header.codec.name(),
        title = %header.title,
        compression = header.compression.label(),
        "processing {}",
        kind.header_label()
    );
    if options.verbose {
        for line in header.describe() {
            info!("{line}");
        }
    }

    let metadata = header.metadata();
    let raw_markup = decode_text(db, &header, sections)?;
    debug!(len = raw_markup.len(), "raw markup");

    // The first half of a combination file ends at the boundary
    let end = match boundary {
        Some(b) if header.first_resource < b => b,
        _ => db.section_count(),
    };
    let keep_raw = options.write_raw_intermediates;
    let scan = scan_resources(db, header.first_resource..end, keep_raw, sections);
    let mut issues = scan.issues;

    let mut part = BookPart {
        kind,
        header,
        metadata,
        raw_markup,
        resources: scan.resources,
        ncx: Vec::new(),
        toc: Vec::new(),
        kf8: None,
        guide: Vec::new(),
        replica: None,
        position_map: PositionMap::new(),
        annotated_markup: None,
        page_map: scan.page_map,
        issues: Vec::new(),
        raw: None,
    };

    match kind {
        BookKind::PrintReplica => {
            info!("print replica ebook detected");
            let (replica, issue) = Replica::parse(&part.raw_markup);
            if let Some(e) = issue {
                warn!(error = %e, "error processing print replica");
                issues.push(e);
            }
            part.replica = Some(replica);
        }
        BookKind::Kf8 => {
            let book = match Kf8Book::build(db, &part.header, &part.raw_markup, sections, &mut issues) {
                Ok(book) => Some(book),
                Err(e) => {
                    warn!(error = %e, "could not rebuild KF8 parts");
                    issues.push(e);
                    None
                }
            };
            if let Some(book) = &book {
                part.guide = book.guide_references();
                if part.guide.is_empty() {
                    part.guide.extend(book.start_reference(&part.metadata));
                }
            }
            part.ncx = ncx_or_empty(db, &part.header, sections, &mut issues);
            part.toc = build_toc(&part.ncx, |entry| {
                let (Some(book), Some((row, off))) = (&book, entry.pos_fid) else {
                    return String::new();
                };
                match book.id_tag_by_pos_fid(row as usize, off as usize) {
                    Ok((filename, id)) if id.is_empty() => format!("Text/{filename}"),
                    Ok((filename, id)) => format!("Text/{filename}#{id}"),
                    Err(e) => {
                        warn!(entry = entry.num, error = %e, "unresolvable NCX target");
                        issues.push(e);
                        String::new()
                    }
                }
            });
            part.kf8 = book;
        }
        BookKind::PalmDoc | BookKind::Mobipocket { .. } => {
            part.ncx = ncx_or_empty(db, &part.header, sections, &mut issues);
            part.toc = build_toc(&part.ncx, |entry| format!("#filepos{}", entry.pos));
            if part.header.is_dictionary() {
                match position_map(db, &part.header, sections, &mut issues) {
                    Ok(map) => part.position_map = map,
                    Err(e) => {
                        warn!(error = %e, "could not read dictionary index");
                        issues.push(e);
                    }
                }
            }
            let positions: BTreeSet<usize> = link_positions(&part.raw_markup, &part.ncx);
            part.annotated_markup = Some(insert_anchors(
                &part.raw_markup,
                &positions,
                part.position_map.clone(),
            ));
        }
    }

    let mut raw = keep_raw.then(|| RawIntermediates {
        header: part.header.data.clone(),
        sections: Vec::new(),
    });
    if let Some(raw) = raw.as_mut() {
        let suffix = if kind == BookKind::Kf8 { "_K8" } else { "" };
        for res in part.resources.iter().filter(|r| !r.data.is_empty()) {
            let name = match &res.kind {
                ResourceKind::Skipped(tag) => format!("{tag}{:05}{suffix}.dat", res.section),
                ResourceKind::Resc | ResourceKind::Unknown => res.name.clone().unwrap_or_default(),
                _ => continue,
            };
            raw.sections.push((name, res.data.clone()));
        }
    }

    // Whatever is left between the header and the end of this book
    let start = part.header.start;
    let end = match boundary {
        Some(b) if start < b => b,
        _ => db.section_count(),
    };
    for i in start..end {
        if sections.is_described(i) {
            continue;
        }
        let data = db.section(i)?;
        let (label, file) = if data.starts_with(b"INDX") {
            ("Unknown INDX section".to_string(), format!("Unknown{i:05}(INDX).dat"))
        } else {
            (mysterious_label(data), format!("unknown{i:05}.dat"))
        };
        debug!(section = i, %label, "undescribed section");
        sections.describe(i, label);
        if let Some(raw) = raw.as_mut() {
            raw.sections.push((file, data.to_vec()));
        }
    }

    part.issues = issues;
    part.raw = raw;
    Ok(part)
}
