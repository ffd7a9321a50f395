//! Synthetic Palm database, MOBI header, EXTH, INDX and FDST writers.

#![allow(dead_code)]

use std::io::Write;

use flate2::Compression;
use flate2::write::ZlibEncoder;
use mobi_unpack::mobi::vwi;

pub const NULL: u32 = 0xFFFF_FFFF;
pub const EOF_RECORD: &[u8] = b"\xe9\x8e\r\n";
pub const PNG: &[u8] = &[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 0, 0, 0, 13];
pub const TTF: &[u8] = b"\0\x01\0\0synthetic font tables";

/// Assemble a Palm database from its sections.
pub fn palm_db(ident: &[u8; 8], name: &str, sections: &[Vec<u8>]) -> Vec<u8> {
    let mut out = vec![0u8; 78];
    let n = name.len().min(31);
    out[..n].copy_from_slice(&name.as_bytes()[..n]);
    out[0x3C..0x44].copy_from_slice(ident);
    out[76..78].copy_from_slice(&(sections.len() as u16).to_be_bytes());

    let mut offset = 78 + 8 * sections.len() + 2;
    for (i, s) in sections.iter().enumerate() {
        out.extend_from_slice(&(offset as u32).to_be_bytes());
        out.extend_from_slice(&((2 * i) as u32).to_be_bytes());
        offset += s.len();
    }
    out.extend_from_slice(&[0, 0]);
    for s in sections {
        out.extend_from_slice(s);
    }
    out
}

/// EXTH block with the given `(id, payload)` records.
pub fn exth(records: &[(u32, Vec<u8>)]) -> Vec<u8> {
    let body: usize = records.iter().map(|(_, d)| d.len() + 8).sum();
    let mut out = b"EXTH".to_vec();
    out.extend_from_slice(&((12 + body) as u32).to_be_bytes());
    out.extend_from_slice(&(records.len() as u32).to_be_bytes());
    for (id, data) in records {
        out.extend_from_slice(&id.to_be_bytes());
        out.extend_from_slice(&((data.len() + 8) as u32).to_be_bytes());
        out.extend_from_slice(data);
    }
    while out.len() % 4 != 0 {
        out.push(0);
    }
    out
}

/// Record 0 of a book: PalmDOC prefix, MOBI header, EXTH and title.
///
/// Index pointers are written as given, so KF8 halves of combination
/// files take offsets relative to their own header section.
#[derive(Debug, Clone)]
pub struct HeaderBuilder {
    pub compression: u16,
    pub records: u16,
    pub crypto: u16,
    pub version: u32,
    pub codepage: u32,
    pub unique_id: u32,
    pub language: u32,
    pub title: String,
    pub exth: Vec<(u32, Vec<u8>)>,
    pub first_nontext: u32,
    pub first_resource: u32,
    pub orth: u32,
    pub infl: u32,
    pub ncx: u32,
    pub fragment: u32,
    pub skeleton: u32,
    pub guide: u32,
    pub fdst: u32,
    pub fdst_count: u32,
}

impl HeaderBuilder {
    pub fn mobi(version: u32, records: u16) -> Self {
        Self {
            compression: 1,
            records,
            crypto: 0,
            version,
            codepage: 65001,
            unique_id: 4242,
            language: 9 | (1 << 10),
            title: "Synthetic Book".into(),
            exth: Vec::new(),
            first_nontext: u32::from(records) + 1,
            first_resource: u32::from(records) + 1,
            orth: NULL,
            infl: NULL,
            ncx: NULL,
            fragment: NULL,
            skeleton: NULL,
            guide: NULL,
            fdst: NULL,
            fdst_count: 0,
        }
    }

    pub fn build(&self) -> Vec<u8> {
        let length: usize = 0x108;
        let mut h = vec![0u8; 16 + length];
        let put16 = |h: &mut Vec<u8>, at: usize, v: u16| h[at..at + 2].copy_from_slice(&v.to_be_bytes());
        let put32 = |h: &mut Vec<u8>, at: usize, v: u32| h[at..at + 4].copy_from_slice(&v.to_be_bytes());

        put16(&mut h, 0x00, self.compression);
        put16(&mut h, 0x08, self.records);
        put16(&mut h, 0x0A, 4096);
        put16(&mut h, 0x0C, self.crypto);
        h[0x10..0x14].copy_from_slice(b"MOBI");
        put32(&mut h, 0x14, length as u32);
        put32(&mut h, 0x18, 2);
        put32(&mut h, 0x1C, self.codepage);
        put32(&mut h, 0x20, self.unique_id);
        put32(&mut h, 0x24, self.version);
        put32(&mut h, 0x28, self.orth);
        put32(&mut h, 0x2C, self.infl);
        for at in (0x30..0x50).step_by(4) {
            put32(&mut h, at, NULL);
        }
        put32(&mut h, 0x50, self.first_nontext);
        put32(&mut h, 0x5C, self.language);
        put32(&mut h, 0x68, 6);
        put32(&mut h, 0x6C, self.first_resource);
        put32(&mut h, 0x70, NULL);
        put32(&mut h, 0x80, if self.exth.is_empty() { 0 } else { 0x40 });
        put32(&mut h, 0xC0, self.fdst);
        put32(&mut h, 0xC4, self.fdst_count);
        put32(&mut h, 0xF4, self.ncx);
        put32(&mut h, 0xF8, self.fragment);
        put32(&mut h, 0xFC, self.skeleton);
        put32(&mut h, 0x100, NULL);
        put32(&mut h, 0x104, self.guide);

        if !self.exth.is_empty() {
            h.extend(exth(&self.exth));
        }
        let title_offset = h.len();
        h.extend_from_slice(self.title.as_bytes());
        h.extend_from_slice(&[0, 0]);
        put32(&mut h, 0x54, title_offset as u32);
        put32(&mut h, 0x58, self.title.len() as u32);
        h
    }
}

/// TAGX tag definition `(tag, values per entry, mask, end flag)`.
pub type Tag = (u8, u8, u8, u8);

pub const END: Tag = (0, 0, 0, 1);

/// Control byte followed by the encoded tag values.
pub fn tag_bytes(control: u8, values: &[u64]) -> Vec<u8> {
    let mut out = vec![control];
    for &v in values {
        out.extend(vwi::encode(v));
    }
    out
}

/// Writer for a single-data-section INDX table with an optional CTOC.
pub struct IndxBuilder {
    tags: Vec<Tag>,
    entries: Vec<(Vec<u8>, Vec<u8>)>,
    ctoc: Vec<u8>,
}

const INDX_HEADER_LEN: usize = 192;

fn indx_header(kind: u32, idxt: u32, count: u32, total: u32, nctoc: u32) -> Vec<u8> {
    let mut h = b"INDX".to_vec();
    for word in [INDX_HEADER_LEN as u32, 0, kind, 0, idxt, count, 65001, 0, total, 0, 0, 0, nctoc] {
        h.extend_from_slice(&word.to_be_bytes());
    }
    h.resize(INDX_HEADER_LEN, 0);
    h
}

impl IndxBuilder {
    pub fn new(tags: &[Tag]) -> Self {
        Self {
            tags: tags.to_vec(),
            entries: Vec::new(),
            ctoc: Vec::new(),
        }
    }

    pub fn entry(&mut self, name: &[u8], tag_data: Vec<u8>) -> &mut Self {
        self.entries.push((name.to_vec(), tag_data));
        self
    }

    /// Append a CTOC string and return its offset.
    pub fn ctoc_string(&mut self, s: &[u8]) -> u64 {
        let offset = self.ctoc.len() as u64;
        self.ctoc.extend(vwi::encode(s.len() as u64));
        self.ctoc.extend_from_slice(s);
        offset
    }

    /// Header section, data section and CTOC section when strings exist.
    pub fn build(&self) -> Vec<Vec<u8>> {
        let nctoc = u32::from(!self.ctoc.is_empty());
        let mut header = indx_header(0, 0, 1, self.entries.len() as u32, nctoc);
        header.extend_from_slice(b"TAGX");
        header.extend_from_slice(&(12 + 4 * self.tags.len() as u32).to_be_bytes());
        header.extend_from_slice(&1u32.to_be_bytes());
        for &(tag, vpe, mask, end) in &self.tags {
            header.extend_from_slice(&[tag, vpe, mask, end]);
        }

        let mut body = Vec::new();
        let mut offsets = Vec::new();
        for (name, data) in &self.entries {
            offsets.push((INDX_HEADER_LEN + body.len()) as u16);
            body.push(name.len() as u8);
            body.extend_from_slice(name);
            body.extend_from_slice(data);
        }
        let idxt = INDX_HEADER_LEN + body.len();
        let mut record = indx_header(1, idxt as u32, self.entries.len() as u32, 0, 0);
        record.extend(body);
        record.extend_from_slice(b"IDXT");
        for o in offsets {
            record.extend_from_slice(&o.to_be_bytes());
        }
        while record.len() % 4 != 0 {
            record.push(0);
        }

        let mut out = vec![header, record];
        if !self.ctoc.is_empty() {
            let mut ctoc = self.ctoc.clone();
            while ctoc.len() % 4 != 0 {
                ctoc.push(0);
            }
            out.push(ctoc);
        }
        out
    }
}

/// FDST section for flows `[start, end)`.
pub fn fdst(flows: &[(u32, u32)]) -> Vec<u8> {
    let mut out = b"FDST".to_vec();
    out.extend_from_slice(&12u32.to_be_bytes());
    out.extend_from_slice(&(flows.len() as u32).to_be_bytes());
    for &(start, end) in flows {
        out.extend_from_slice(&start.to_be_bytes());
        out.extend_from_slice(&end.to_be_bytes());
    }
    out
}

/// FONT section, zlib-compressed and optionally XOR-obfuscated.
pub fn font_section(font: &[u8], key: &[u8]) -> Vec<u8> {
    let mut enc = ZlibEncoder::new(Vec::new(), Compression::default());
    enc.write_all(font).unwrap();
    let mut payload = enc.finish().unwrap();

    let mut flags = 1u32;
    if !key.is_empty() {
        flags |= 2;
        for (i, b) in payload.iter_mut().enumerate().take(1040) {
            *b ^= key[i % key.len()];
        }
    }

    let xor_start = 24u32;
    let data_start = xor_start + key.len() as u32;
    let mut out = b"FONT".to_vec();
    for word in [font.len() as u32, flags, data_start, key.len() as u32, xor_start] {
        out.extend_from_slice(&word.to_be_bytes());
    }
    out.extend_from_slice(key);
    out.extend_from_slice(&payload);
    out
}

pub const SKELETON: &[u8] = b"<html><head></head><body aid=\"0\"></body></html>";
pub const FRAGMENT: &[u8] = b"<p id=\"intro\">Hello KF8</p>";
pub const STYLESHEET: &[u8] = b"p { color: red }";

/// Insert position of [`FRAGMENT`]: right after the `<body>` tag.
pub const INSERT_AT: u64 = 33;

/// Skeleton and fragment tables of a one-file KF8 book.
pub fn kf8_tables() -> (Vec<Vec<u8>>, Vec<Vec<u8>>) {
    let mut skel = IndxBuilder::new(&[(1, 1, 0x01, 0), (6, 2, 0x02, 0), END]);
    skel.entry(b"SKEL0000000000", tag_bytes(0x03, &[1, 0, SKELETON.len() as u64]));

    let mut frag = IndxBuilder::new(&[
        (2, 1, 0x01, 0),
        (3, 1, 0x02, 0),
        (4, 1, 0x04, 0),
        (6, 2, 0x08, 0),
        END,
    ]);
    let selector = frag.ctoc_string(b"P-//*[@aid='0']");
    frag.entry(
        format!("{INSERT_AT:010}").as_bytes(),
        tag_bytes(0x0F, &[selector, 0, 0, 0, FRAGMENT.len() as u64]),
    );
    (skel.build(), frag.build())
}

/// NCX with one entry pointing at fragment 0, offset 0.
pub fn kf8_ncx() -> Vec<Vec<u8>> {
    let mut ncx = IndxBuilder::new(&[
        (1, 1, 0x01, 0),
        (3, 1, 0x02, 0),
        (4, 1, 0x04, 0),
        (6, 2, 0x08, 0),
        END,
    ]);
    let title = ncx.ctoc_string(b"Introduction");
    ncx.entry(b"000", tag_bytes(0x0F, &[INSERT_AT, title, 0, 0, 0]));
    ncx.build()
}

/// Raw markup of the one-file KF8 book: body flow then a stylesheet flow.
pub fn kf8_markup() -> Vec<u8> {
    [SKELETON, FRAGMENT, STYLESHEET].concat()
}

/// A standalone KF8 book with an NCX, image, font and trailing records.
pub fn kf8_book() -> Vec<u8> {
    palm_db(b"BOOKMOBI", "Synthetic_KF8", &kf8_sections())
}

/// Sections of a KF8 book, pointers relative to the first one.
///
/// 0 header, 1 text, 2-3 skeleton, 4-6 fragment, 7-9 NCX, 10 FDST,
/// 11 image, 12 font, 13 FLIS, 14 EOF.
pub fn kf8_sections() -> Vec<Vec<u8>> {
    let markup = kf8_markup();
    let body_end = (SKELETON.len() + FRAGMENT.len()) as u32;

    let mut header = HeaderBuilder::mobi(8, 1);
    header.skeleton = 2;
    header.fragment = 4;
    header.ncx = 7;
    header.fdst = 10;
    header.fdst_count = 2;
    header.first_nontext = 2;
    header.first_resource = 11;
    header.exth = vec![
        (100, b"Ada Author".to_vec()),
        (116, (INSERT_AT as u32).to_be_bytes().to_vec()),
    ];

    let (skel, frag) = kf8_tables();
    let mut sections = vec![header.build(), markup.clone()];
    sections.extend(skel);
    sections.extend(frag);
    sections.extend(kf8_ncx());
    sections.push(fdst(&[(0, body_end), (body_end, markup.len() as u32)]));
    sections.push(PNG.to_vec());
    sections.push(font_section(TTF, &[0x11, 0x22, 0x33, 0x44]));
    sections.push(b"FLIS\0\0\0\x08".to_vec());
    sections.push(EOF_RECORD.to_vec());
    sections
}

/// A Mobipocket book with one uncompressed text record.
pub fn mobi_book(text: &[u8], trailing: &[Vec<u8>]) -> Vec<u8> {
    let mut header = HeaderBuilder::mobi(6, 1);
    header.first_resource = 2;
    let mut sections = vec![header.build(), text.to_vec()];
    sections.extend(trailing.iter().cloned());
    palm_db(b"BOOKMOBI", "Synthetic_Mobi", &sections)
}
