//! KF8 reassembly: flows, per-file parts, and position lookups.
//!
//! The raw markup of a KF8 book is split by the FDST table into flows.
//! Flow 0 holds every skeleton followed by its fragments; each output
//! file is rebuilt by splicing the fragments back into its skeleton.

use bstr::ByteSlice;
use memchr::memmem;
use tracing::{debug, warn};

use super::exth::Metadata;
use super::headers::{Codec, MobiHeader};
use super::index::{FragmentEntry, GuideEntry, SkeletonEntry, read_index};
use super::patterns::{IMAGE_TAG_RE, SVG_TAG_RE, TAG_ID_RE, TAG_NAME_RE, aid_tag_re, ascii_view};
use super::pdb::{PalmDb, SectionMap};
use crate::error::{Error, Result};
use crate::util::{parse_base32, read_u32};

/// Standard OPF guide reference types.
const GUIDE_TYPES: &[&str] = &[
    "cover",
    "title-page",
    "toc",
    "index",
    "glossary",
    "acknowledgements",
    "bibliography",
    "colophon",
    "copyright-page",
    "dedication",
    "epigraph",
    "foreward",
    "loi",
    "lot",
    "notes",
    "preface",
    "text",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "cli", derive(serde::Serialize))]
pub enum FlowKind {
    Css,
    Svg,
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "cli", derive(serde::Serialize))]
pub enum FlowFormat {
    /// Spliced into the XHTML text.
    Inline,
    /// Written as its own file.
    File { dir: &'static str, filename: String },
}

/// A trailing piece of raw markup: stylesheet, SVG image, or unknown.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "cli", derive(serde::Serialize))]
pub struct Flow {
    pub index: usize,
    pub kind: FlowKind,
    /// `None` for flow 0 and for unclassified data.
    pub format: Option<FlowFormat>,
    #[cfg_attr(feature = "cli", serde(skip))]
    pub data: Vec<u8>,
}

impl Flow {
    /// Classify flow `index` by sniffing its content.
    pub fn classify(index: usize, data: &[u8]) -> Self {
        let view = ascii_view(data);
        if let Some(svg) = SVG_TAG_RE.find(&view) {
            if IMAGE_TAG_RE.is_match(&view) {
                // An SVG that pulls in a raster image only renders inline
                return Self {
                    index,
                    kind: FlowKind::Svg,
                    format: Some(FlowFormat::Inline),
                    data: data[svg.start()..].to_vec(),
                };
            }
            return Self {
                index,
                kind: FlowKind::Svg,
                format: Some(FlowFormat::File {
                    dir: "Images",
                    filename: format!("svgimg{index:04}.svg"),
                }),
                data: data.to_vec(),
            };
        }

        if memmem::find(data, b"[CDATA[").is_some() {
            let mut inline = b"<style type=\"text/css\">\n".to_vec();
            inline.extend_from_slice(data);
            inline.extend_from_slice(b"\n</style>\n");
            return Self {
                index,
                kind: FlowKind::Css,
                format: Some(FlowFormat::Inline),
                data: inline,
            };
        }

        Self {
            index,
            kind: FlowKind::Css,
            format: Some(FlowFormat::File {
                dir: "Styles",
                filename: format!("style{index:04}.css"),
            }),
            data: data.to_vec(),
        }
    }
}

/// One reconstructed XHTML file.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "cli", derive(serde::Serialize))]
pub struct Part {
    pub skeleton: usize,
    pub dir: &'static str,
    pub filename: String,
    /// Start of the skeleton in raw-markup coordinates.
    pub start: usize,
    /// End of the last fragment in raw-markup coordinates.
    pub end: usize,
    pub aid: String,
    #[cfg_attr(feature = "cli", serde(skip))]
    pub data: Vec<u8>,
}

/// Where a raw-markup position falls relative to a fragment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placement {
    In,
    Before,
}

/// A resolved `<guide>` reference.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "cli", derive(serde::Serialize))]
pub struct GuideReference {
    pub ref_type: String,
    pub title: String,
    pub href: String,
}

/// Reassembled KF8 book.
#[derive(Debug, Clone, Default)]
#[cfg_attr(feature = "cli", derive(serde::Serialize))]
pub struct Kf8Book {
    pub skeletons: Vec<SkeletonEntry>,
    pub fragments: Vec<FragmentEntry>,
    pub guide: Vec<GuideEntry>,
    /// Flow boundaries closed by the raw markup length.
    pub flow_table: Vec<usize>,
    pub parts: Vec<Part>,
    pub flows: Vec<Flow>,
    #[cfg_attr(feature = "cli", serde(skip))]
    codec: Codec,
}

/// Python-style `find`: -1 when absent.
fn find_or_neg(hay: &[u8], byte: u8) -> isize {
    hay.find_byte(byte).map_or(-1, |p| p as isize)
}

fn rfind_or_neg(hay: &[u8], byte: u8) -> isize {
    hay.rfind_byte(byte).map_or(-1, |p| p as isize)
}

/// `data[start..end]` clamped to the data length.
fn clamped(data: &[u8], start: usize, end: usize) -> &[u8] {
    let end = end.min(data.len());
    &data[start.min(end)..end]
}

/// Start and end (`>`) of the first tag carrying `aid`, or `(0, 0)`.
fn locate_aid_tag(skeleton: &[u8], aid: &str) -> (isize, isize) {
    let Some(re) = aid_tag_re(aid) else {
        return (0, 0);
    };
    let view = ascii_view(skeleton);
    match re.find(&view) {
        Some(m) => {
            let plt = m.start();
            let pgt = skeleton
                .get(plt + 1..)
                .and_then(|rest| rest.find_byte(b'>'))
                .map_or(-1, |p| (plt + 1 + p) as isize);
            (plt as isize, pgt)
        }
        None => (0, 0),
    }
}

/// Tags of `block` from last to first.
fn reverse_tags(block: &[u8]) -> impl Iterator<Item = &[u8]> {
    let mut end = block.len();
    std::iter::from_fn(move || {
        let pgt = block[..end].rfind_byte(b'>')?;
        let plt = block[..pgt].rfind_byte(b'<')?;
        end = plt;
        Some(&block[plt..=pgt])
    })
}

fn read_fdst(db: &PalmDb, header: &MobiHeader, raw_len: usize, sections: &mut SectionMap) -> Option<Vec<usize>> {
    let index = header.fdst_index?;
    let data = db.section(index).ok()?;
    if !data.starts_with(b"FDST") {
        return None;
    }
    let count = read_u32(data, 0x08)? as usize;
    let mut table = Vec::with_capacity(count + 1);
    for j in 0..count {
        table.push(read_u32(data, 12 + 8 * j)? as usize);
    }
    table.push(raw_len);
    sections.describe(index, "KF8 FDST INDX");
    debug!(flows = count, "FDST section map");
    Some(table)
}

impl Kf8Book {
    /// Read the KF8 tables and rebuild parts and flows from `raw`.
    ///
    /// Non-fatal problems are appended to `issues`.
    pub fn build(
        db: &PalmDb,
        header: &MobiHeader,
        raw: &[u8],
        sections: &mut SectionMap,
        issues: &mut Vec<Error>,
    ) -> Result<Self> {
        let codec = header.codec;
        let skeletons = match header.skeleton_index {
            Some(i) => SkeletonEntry::from_index(&read_index(db, i, "KF8 Skeleton", sections)?, codec)?,
            None => Vec::new(),
        };
        let fragments = match header.fragment_index {
            Some(i) => FragmentEntry::from_index(
                &read_index(db, i, "KF8 Fragment", sections)?,
                codec,
            )?,
            None => Vec::new(),
        };
        let guide = match header.guide_index {
            Some(i) => GuideEntry::from_index(
                &read_index(db, i, "KF8 Other (<guide> elements)", sections)?,
                codec,
            )?,
            None => Vec::new(),
        };
        debug!(
            skeletons = skeletons.len(),
            fragments = fragments.len(),
            guide = guide.len(),
            "KF8 tables"
        );

        let mut book = Self {
            skeletons,
            fragments,
            guide,
            flow_table: Vec::new(),
            parts: Vec::new(),
            flows: Vec::new(),
            codec,
        };

        let mut trailing = None;
        book.flow_table = match read_fdst(db, header, raw.len(), sections) {
            Some(table) => table,
            None if header.fdst_count > 1 => {
                warn!("KF8 book with missing FDST info");
                issues.push(Error::MissingTable("FDST"));
                let body_end = book.body_end().min(raw.len());
                trailing = Some(raw[body_end..].to_vec());
                vec![0, body_end]
            }
            None => vec![0, raw.len()],
        };

        book.build_parts(raw, issues);
        if let Some(rest) = trailing.filter(|r| !r.is_empty()) {
            let index = book.flows.len();
            book.flows.push(Flow {
                index,
                kind: FlowKind::Unknown,
                format: None,
                data: rest,
            });
        }
        Ok(book)
    }

    /// End of the text covered by skeletons and their fragments.
    fn body_end(&self) -> usize {
        let mut frag = 0;
        let mut end = 0;
        for skel in &self.skeletons {
            let frags = self.fragments.iter().skip(frag).take(skel.fragment_count);
            end = end.max(skel.end() + frags.map(|f| f.length).sum::<usize>());
            frag += skel.fragment_count;
        }
        end
    }

    fn build_parts(&mut self, raw: &[u8], issues: &mut Vec<Error>) {
        self.flows = self
            .flow_table
            .windows(2)
            .map(|w| clamped(raw, w[0], w[1]).to_vec())
            .enumerate()
            .map(|(index, data)| Flow {
                index,
                kind: FlowKind::Unknown,
                format: None,
                data,
            })
            .collect();
        let text = match self.flows.first_mut() {
            Some(flow) => std::mem::take(&mut flow.data),
            None => Vec::new(),
        };

        let mut frag_ptr = 0;
        'skeletons: for skel in &self.skeletons {
            let skel_pos = skel.start;
            let mut base = skel.end();
            let mut skeleton = clamped(&text, skel_pos, base).to_vec();
            let mut filename = format!("part{:04}.xhtml", skel.file_number);
            let mut aid = String::new();

            for i in 0..skel.fragment_count {
                if frag_ptr >= self.fragments.len() {
                    warn!(skeleton = %skel.name, fragment = frag_ptr, "fragment table too short");
                    issues.push(Error::IndexOutOfRange {
                        what: "fragment",
                        index: frag_ptr,
                        len: self.fragments.len(),
                    });
                    continue 'skeletons;
                }
                let frag = &mut self.fragments[frag_ptr];
                aid = frag.aid().to_string();
                if i == 0 {
                    filename = format!("part{:04}.xhtml", frag.file_number);
                }
                let piece = clamped(&text, base, base + frag.length);

                let mut insert = (frag.insert_position.saturating_sub(skel_pos)).min(skeleton.len());
                let (head, tail) = skeleton.split_at(insert);
                if find_or_neg(tail, b'>') < find_or_neg(tail, b'<')
                    || rfind_or_neg(head, b'>') < rfind_or_neg(head, b'<')
                {
                    // Incomplete tag on either side of the insert point
                    debug!(skeleton = %skel.name, "fragment insert position inside a tag");
                    let (bp, ep) = locate_aid_tag(&skeleton, &aid);
                    if bp != ep {
                        let actual = (ep + 1 + frag.start_offset as isize).max(0) as usize;
                        if actual != insert {
                            warn!(
                                from = insert + skel_pos,
                                to = actual + skel_pos,
                                "fixed corrupt fragment table insert position"
                            );
                            insert = actual.min(skeleton.len());
                            frag.insert_position = actual + skel_pos;
                        }
                    }
                }

                skeleton.splice(insert..insert, piece.iter().copied());
                base += frag.length;
                frag_ptr += 1;
            }

            self.parts.push(Part {
                skeleton: skel.file_number,
                dir: "Text",
                filename,
                start: skel_pos,
                end: base,
                aid,
                data: skeleton,
            });
        }

        for flow in self.flows.iter_mut().skip(1) {
            *flow = Flow::classify(flow.index, &flow.data);
        }
        debug!(parts = self.parts.len(), flows = self.flows.len(), "rebuilt KF8 parts");
    }

    /// Part containing raw-markup position `pos`.
    pub fn file_info(&self, pos: usize) -> Option<&Part> {
        self.parts.iter().find(|p| pos >= p.start && pos < p.end)
    }

    /// Sequence number and selector of the fragment at or after `pos`.
    pub fn fragment_info(&self, pos: usize) -> Option<(usize, Placement, &str)> {
        for frag in &self.fragments {
            if pos >= frag.insert_position && pos < frag.insert_position + frag.length {
                return Some((frag.sequence_number, Placement::In, frag.selector.as_str()));
            }
            if pos < frag.insert_position {
                return Some((frag.sequence_number, Placement::Before, frag.selector.as_str()));
            }
        }
        None
    }

    /// Nearest `id` or `name` anchor at or before `pos`; empty for the
    /// top of the file.
    pub fn id_tag(&self, pos: usize) -> String {
        let Some(part) = self.file_info(pos) else {
            warn!(pos, "no file contains position");
            return String::new();
        };
        let block = part.data.as_slice();
        let npos = (pos - part.start) as isize;
        let rest = block.get(npos as usize..).unwrap_or_default();
        let pgt = find_or_neg(rest, b'>');
        let plt = find_or_neg(rest, b'<');
        let pgt = if pgt < 0 { -1 } else { pgt + npos };
        let plt = if plt < 0 { -1 } else { plt + npos };
        // Inside a tag: search up to the end of it
        let npos = if plt == npos || pgt < plt { pgt + 1 } else { npos };
        let block = &block[..(npos.max(0) as usize).min(block.len())];

        for tag in reverse_tags(block) {
            let view = ascii_view(tag);
            let caps = TAG_ID_RE.captures(&view).or_else(|| TAG_NAME_RE.captures(&view));
            if let Some(m) = caps.and_then(|c| c.get(1)) {
                return self.codec.decode(&tag[m.start()..m.end()]).into_owned();
            }
        }
        debug!(pos, "no id before position, linking to top of file");
        String::new()
    }

    /// Resolve a `kindle:pos:fid` target to `(filename, anchor)`.
    pub fn id_tag_by_pos_fid(&self, row: usize, offset: usize) -> Result<(String, String)> {
        let frag = self.fragments.get(row).ok_or(Error::IndexOutOfRange {
            what: "fragment",
            index: row,
            len: self.fragments.len(),
        })?;
        let mut pos = frag.insert_position + offset;
        if self.file_info(pos).is_none() {
            let skel = self.skeletons.get(frag.file_number).ok_or(Error::IndexOutOfRange {
                what: "skeleton",
                index: frag.file_number,
                len: self.skeletons.len(),
            })?;
            warn!(pos, "link to position does not exist, retargeting to top of target");
            pos = skel.start;
        }
        let filename = self
            .file_info(pos)
            .map(|p| p.filename.clone())
            .unwrap_or_default();
        Ok((filename, self.id_tag(pos)))
    }

    /// Resolve a `kindle:pos:fid:XXXX:off:YYYYYYYYYY` link.
    ///
    /// `None` when `link` is not in that form.
    pub fn resolve_link(&self, link: &str) -> Option<Result<(String, String)>> {
        let rest = link.strip_prefix("kindle:pos:fid:")?;
        let (fid, off) = rest.split_once(":off:")?;
        Some(self.id_tag_by_pos_fid(parse_base32(fid.as_bytes()), parse_base32(off.as_bytes())))
    }

    fn href(&self, pos: usize) -> Option<String> {
        let part = self.file_info(pos)?;
        let id = self.id_tag(pos);
        Some(if id.is_empty() {
            format!("{}/{}", part.dir, part.filename)
        } else {
            format!("{}/{}#{}", part.dir, part.filename, id)
        })
    }

    /// Guide references resolved to part files.
    pub fn guide_references(&self) -> Vec<GuideReference> {
        let mut out = Vec::new();
        for entry in &self.guide {
            let mut ref_type = entry.ref_type.clone();
            if ref_type == "thumbimagestandard" {
                continue;
            }
            if !GUIDE_TYPES.contains(&ref_type.as_str()) && !ref_type.starts_with("other.") {
                ref_type = if ref_type == "start" {
                    "text".to_string()
                } else {
                    format!("other.{ref_type}")
                };
            }
            let Some(frag) = entry.fragment.and_then(|f| self.fragments.get(f)) else {
                warn!(%ref_type, "guide entry points at a missing fragment");
                continue;
            };
            let Some(href) = self.href(frag.insert_position) else {
                warn!(%ref_type, pos = frag.insert_position, "guide target outside every part");
                continue;
            };
            out.push(GuideReference {
                ref_type,
                title: entry.title.clone(),
                href,
            });
        }
        out
    }

    /// Start reference from the last `StartOffset`, used when the guide
    /// table is empty.
    pub fn start_reference(&self, metadata: &Metadata) -> Option<GuideReference> {
        if !self.guide.is_empty() {
            return None;
        }
        let last = metadata.get("StartOffset")?.last()?;
        let mut pos: u64 = last.parse().ok()?;
        if pos == 0xFFFF_FFFF {
            pos = 0;
        }
        let (seq, _, _) = self.fragment_info(pos as usize)?;
        let (filename, id) = self.id_tag_by_pos_fid(seq, 0).ok()?;
        let href = if id.is_empty() {
            format!("Text/{filename}")
        } else {
            format!("Text/{filename}#{id}")
        };
        Some(GuideReference {
            ref_type: "text".to_string(),
            title: String::new(),
            href,
        })
    }
}
