//! NCX (table of contents) index entries and the TOC hierarchy.

use std::collections::HashMap;

use tracing::{debug, warn};

use super::headers::{Codec, MobiHeader};
use super::index::{TaggedIndex, read_index};
use super::pdb::{PalmDb, SectionMap};
use crate::error::Result;
use crate::util::to_base32_padded;

/// One navigation point. Numeric fields are -1 when the tag is absent.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "cli", derive(serde::Serialize))]
pub struct NcxEntry {
    pub num: usize,
    pub name: String,
    pub pos: i64,
    pub len: u64,
    pub text_offset: i64,
    pub text: String,
    pub level: i64,
    pub kind_offset: i64,
    pub kind: String,
    /// KF8 `(fragment row, offset)` link target.
    pub pos_fid: Option<(u64, u64)>,
    pub parent: i64,
    pub first_child: i64,
    pub last_child: i64,
}

impl NcxEntry {
    pub fn from_index(index: &TaggedIndex, codec: Codec) -> Vec<Self> {
        let text_of = |offset: u64, fallback: &str| {
            index
                .ctoc
                .text(offset as usize, codec)
                .unwrap_or_else(|| fallback.to_string())
        };
        let signed = |v: Option<u64>| v.map_or(-1, |v| v as i64);

        index
            .entries
            .iter()
            .enumerate()
            .map(|(num, e)| {
                let text_offset = e.first(3);
                let kind_offset = e.first(5);
                Self {
                    num,
                    name: codec.decode(&e.name).into_owned(),
                    pos: signed(e.first(1)),
                    len: e.first(2).unwrap_or(0),
                    text_offset: signed(text_offset),
                    text: text_offset.map_or_else(|| "Unknown Text".into(), |o| text_of(o, "Unknown Text")),
                    level: signed(e.first(4)),
                    kind_offset: signed(kind_offset),
                    kind: kind_offset.map_or_else(|| "Unknown Kind".into(), |o| text_of(o, "Unknown Kind")),
                    pos_fid: e.first(6).map(|row| (row, e.value(6, 1).unwrap_or(0))),
                    parent: signed(e.first(21)),
                    first_child: signed(e.first(22)),
                    last_child: signed(e.first(23)),
                }
            })
            .collect()
    }

    /// `kindle:pos:fid:XXXX:off:YYYYYYYYYY` form of the KF8 target.
    pub fn kindle_pos_fid(&self) -> Option<String> {
        self.pos_fid.map(|(row, off)| {
            format!(
                "kindle:pos:fid:{}:off:{}",
                to_base32_padded(row as usize, 4),
                to_base32_padded(off as usize, 10)
            )
        })
    }
}

/// Read the NCX of a book, or an empty list when it has none.
pub fn read_ncx(db: &PalmDb, header: &MobiHeader, sections: &mut SectionMap) -> Result<Vec<NcxEntry>> {
    let Some(first) = header.ncx_index else {
        debug!("no NCX index");
        return Ok(Vec::new());
    };

    if !header.is_kf8()
        && (first <= header.start + header.records || first + 2 > db.section_count())
    {
        warn!(
            records = header.records,
            index = first,
            sections = db.section_count(),
            "incorrect NCX index section number"
        );
        return Ok(Vec::new());
    }

    let index = read_index(db, first, "NCX", sections)?;
    let entries = NcxEntry::from_index(&index, header.codec);
    if (entries.len() as u32) < index.header.total {
        warn!(found = entries.len(), declared = index.header.total, "missing NCX entries");
    }
    Ok(entries)
}

/// A TOC node with its resolved link target.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "cli", derive(serde::Serialize))]
pub struct TocNode {
    pub title: String,
    pub href: String,
    pub children: Vec<TocNode>,
}

/// Build the TOC hierarchy from NCX parent links.
///
/// `href_fn` produces the link target of each entry, so legacy books can
/// use `filepos` anchors and KF8 books part filenames.
pub fn build_toc<F>(ncx: &[NcxEntry], mut href_fn: F) -> Vec<TocNode>
where
    F: FnMut(&NcxEntry) -> String,
{
    let mut nodes: Vec<Option<TocNode>> = ncx
        .iter()
        .map(|entry| {
            Some(TocNode {
                title: entry.text.clone(),
                href: href_fn(entry),
                children: Vec::new(),
            })
        })
        .collect();

    let mut roots = Vec::new();
    let mut children: HashMap<usize, Vec<usize>> = HashMap::new();
    for (i, entry) in ncx.iter().enumerate() {
        match usize::try_from(entry.parent) {
            Ok(parent) if parent < ncx.len() && parent != i => {
                children.entry(parent).or_default().push(i)
            }
            _ => roots.push(i),
        }
    }

    fn take(
        idx: usize,
        nodes: &mut [Option<TocNode>],
        children: &HashMap<usize, Vec<usize>>,
    ) -> Option<TocNode> {
        let mut node = nodes[idx].take()?;
        for &child in children.get(&idx).map(Vec::as_slice).unwrap_or_default() {
            if let Some(c) = take(child, nodes, children) {
                node.children.push(c);
            }
        }
        Some(node)
    }

    roots
        .into_iter()
        .filter_map(|i| take(i, &mut nodes, &children))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mobi::index::fixtures::*;
    use crate::mobi::index::{IndexSection, IndxHeader, TagTable};

    fn entry(num: usize, text: &str, parent: i64) -> NcxEntry {
        NcxEntry {
            num,
            name: format!("{num:03}"),
            pos: num as i64 * 100,
            len: 100,
            text_offset: -1,
            text: text.to_string(),
            level: if parent < 0 { 0 } else { 1 },
            kind_offset: -1,
            kind: "Unknown Kind".into(),
            pos_fid: None,
            parent,
            first_child: -1,
            last_child: -1,
        }
    }

    fn tagged(records: &[Vec<u8>]) -> TaggedIndex {
        let header = IndxHeader::parse(&records[0]).unwrap();
        let tag_table = TagTable::parse(&records[0], header.len as usize);
        let entries = IndexSection::parse(&records[1]).unwrap().entries(&tag_table).unwrap();
        let mut ctoc = crate::mobi::index::Ctoc::new();
        if let Some(c) = records.get(2) {
            ctoc.read_section(c, 0);
        }
        TaggedIndex {
            header,
            tag_table,
            entries,
            ctoc,
        }
    }

    #[test]
    fn test_flat_toc() {
        let ncx = vec![entry(0, "One", -1), entry(1, "Two", -1)];
        let toc = build_toc(&ncx, |e| format!("#filepos{}", e.pos));
        assert_eq!(toc.len(), 2);
        assert_eq!(toc[1].href, "#filepos100");
        assert!(toc[0].children.is_empty());
    }

    #[test]
    fn test_nested_toc() {
        let ncx = vec![
            entry(0, "Part", -1),
            entry(1, "Chapter 1", 0),
            entry(2, "Chapter 2", 0),
            entry(3, "Appendix", -1),
        ];
        let toc = build_toc(&ncx, |_| String::new());
        assert_eq!(toc.len(), 2);
        assert_eq!(toc[0].children.len(), 2);
        assert_eq!(toc[0].children[1].title, "Chapter 2");
        assert_eq!(toc[1].title, "Appendix");
    }

    #[test]
    fn test_self_parent_is_root() {
        let ncx = vec![entry(0, "Loop", 0)];
        assert_eq!(build_toc(&ncx, |_| String::new()).len(), 1);
    }

    #[test]
    fn test_from_index() {
        let mut b = IndxBuilder::new(
            vec![tag(1, 1, 0x01), tag(3, 1, 0x02), tag(4, 1, 0x04), tag(6, 2, 0x08), tag(21, 1, 0x10), END],
            1,
        );
        let chapter = b.ctoc_string(b"Chapter");
        b.entry(b"000", tag_bytes(0x0F, &[0, chapter, 0, 3, 40]));
        b.entry(b"001", tag_bytes(0x15, &[500, 1, 0]));
        let index = tagged(&b.build());

        let ncx = NcxEntry::from_index(&index, Codec::Utf8);
        assert_eq!(ncx[0].text, "Chapter");
        assert_eq!(ncx[0].pos_fid, Some((3, 40)));
        assert_eq!(
            ncx[0].kindle_pos_fid().as_deref(),
            Some("kindle:pos:fid:0003:off:0000000018")
        );
        assert_eq!(ncx[0].parent, -1);

        assert_eq!(ncx[1].pos, 500);
        assert_eq!(ncx[1].text, "Unknown Text");
        assert_eq!(ncx[1].kind, "Unknown Kind");
        assert_eq!(ncx[1].level, 1);
        assert_eq!(ncx[1].parent, 0);
    }
}
