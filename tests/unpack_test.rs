//! End-to-end tests over synthetic containers.

mod common;

use common::*;
use mobi_unpack::mobi::kf8::{FlowFormat, FlowKind, Placement};
use mobi_unpack::mobi::ResourceKind;
use mobi_unpack::{BookKind, Error, UnpackOptions, unpack, unpack_file};
use tempfile::TempDir;

const HELLO: &[u8] = b"<html><body>Hello</body></html>";

#[test]
fn test_hello_mobi() {
    let data = mobi_book(HELLO, &[EOF_RECORD.to_vec()]);
    let book = unpack(data, &UnpackOptions::default()).expect("unpack hello");

    assert_eq!(book.ident, "BOOKMOBI");
    assert_eq!(book.section_count, 3);
    assert!(!book.is_combination());
    assert_eq!(book.parts.len(), 1);

    let part = &book.parts[0];
    assert_eq!(part.kind, BookKind::Mobipocket { version: 6 });
    assert_eq!(part.raw_markup, HELLO);
    assert_eq!(part.annotated_markup.as_deref(), Some(HELLO));
    assert_eq!(part.extracted().count(), 0);
    assert!(part.ncx.is_empty());
    assert!(part.issues.is_empty());

    let keys: Vec<&str> = part.metadata.keys().collect();
    assert_eq!(keys, vec!["Language", "Title", "Codec", "UniqueID"]);
    assert_eq!(part.metadata.first("Title"), Some("Synthetic Book"));
    assert_eq!(part.metadata.first("Codec"), Some("utf-8"));

    assert_eq!(book.sections.get(0), Some("Mobipocket 6 Header"));
    assert_eq!(book.sections.get(1), Some("Mobipocket Text Section 1"));
    assert_eq!(book.sections.get(2), Some("End Of File"));
}

#[test]
fn test_palmdoc_title_from_database_name() {
    let mut record0 = vec![0u8; 16];
    record0[1] = 1;
    record0[4..8].copy_from_slice(&(HELLO.len() as u32).to_be_bytes());
    record0[9] = 1;
    record0[10..12].copy_from_slice(&4096u16.to_be_bytes());
    let data = palm_db(b"TEXtREAd", "Plain Reading", &[record0, HELLO.to_vec()]);

    let book = unpack(data, &UnpackOptions::default()).expect("unpack palmdoc");
    let part = &book.parts[0];
    assert_eq!(part.kind, BookKind::PalmDoc);
    assert_eq!(part.metadata.first("Title"), Some("Plain Reading"));
    assert_eq!(part.raw_markup, HELLO);
    assert_eq!(book.sections.get(0), Some("PalmDoc Header"));
}

#[test]
fn test_encrypted_book_is_rejected() {
    let mut header = HeaderBuilder::mobi(6, 1);
    header.crypto = 2;
    let data = palm_db(b"BOOKMOBI", "Locked", &[header.build(), HELLO.to_vec()]);

    let err = unpack(data, &UnpackOptions::default()).unwrap_err();
    assert!(matches!(err, Error::UnsupportedFormat(ref msg) if msg.contains("encrypted")));
}

#[test]
fn test_unknown_identity_is_rejected() {
    let data = palm_db(b"DATAXXXX", "Other", &[vec![0; 16]]);
    assert!(matches!(
        unpack(data, &UnpackOptions::default()),
        Err(Error::UnsupportedFormat(_))
    ));
}

#[test]
fn test_filepos_anchor_inserted() {
    let head = "<html><body><a filepos=0000000000>next</a>";
    let target = head.len();
    let text = format!("<html><body><a filepos={target:010}>next</a><p>Target</p></body></html>");
    let data = mobi_book(text.as_bytes(), &[EOF_RECORD.to_vec()]);

    let book = unpack(data, &UnpackOptions::default()).expect("unpack legacy");
    let annotated = book.parts[0].annotated_markup.clone().expect("annotated markup");
    let anchor = format!("<a id=\"filepos{target}\" />");
    assert_eq!(&annotated[target..target + anchor.len()], anchor.as_bytes());
    assert_eq!(annotated.len(), text.len() + anchor.len());
}

#[test]
fn test_corrupt_ncx_is_not_fatal() {
    let mut header = HeaderBuilder::mobi(6, 1);
    header.first_resource = 2;
    header.ncx = 2;
    let sections = [
        header.build(),
        HELLO.to_vec(),
        b"XXXXnot an index".to_vec(),
        vec![0; 8],
        EOF_RECORD.to_vec(),
    ];
    let data = palm_db(b"BOOKMOBI", "Broken NCX", &sections);

    let book = unpack(data, &UnpackOptions::default()).expect("unpack despite bad NCX");
    let part = &book.parts[0];
    assert_eq!(part.raw_markup, HELLO);
    assert_eq!(part.annotated_markup.as_deref(), Some(HELLO));
    assert!(part.ncx.is_empty());
    assert!(part.toc.is_empty());
    assert_eq!(part.issues.len(), 1);
    assert!(matches!(part.issues[0], Error::Malformed(_)));
}

#[test]
fn test_corrupt_font_does_not_stop_scan() {
    let mut font = b"FONT".to_vec();
    for word in [100u32, 1, 24, 0, 0] {
        font.extend_from_slice(&word.to_be_bytes());
    }
    font.extend_from_slice(b"this is not a zlib stream");
    let data = mobi_book(HELLO, &[font, PNG.to_vec(), EOF_RECORD.to_vec()]);

    let book = unpack(data, &UnpackOptions::default()).expect("unpack with bad font");
    let part = &book.parts[0];
    let kinds: Vec<&ResourceKind> = part.resources.iter().map(|r| &r.kind).collect();
    assert_eq!(kinds[0], &ResourceKind::FailedFont);
    assert!(matches!(kinds[1], ResourceKind::Image { .. }));
    assert_eq!(kinds[2], &ResourceKind::EndOfFile);
    assert_eq!(part.resources[0].name.as_deref(), Some("font00002.failed"));
    assert_eq!(part.issues.len(), 1);
}

#[test]
fn test_kf8_book() {
    let book = unpack(kf8_book(), &UnpackOptions::default()).expect("unpack kf8");
    assert_eq!(book.parts.len(), 1);
    let part = book.kf8().expect("kf8 part");
    assert_eq!(part.kind, BookKind::Kf8);
    assert_eq!(part.raw_markup, kf8_markup());
    assert!(part.issues.is_empty(), "issues: {:?}", part.issues);
    assert_eq!(part.metadata.first("Creator"), Some("Ada Author"));

    let kf8 = part.kf8.as_ref().expect("kf8 tables");
    assert_eq!(kf8.flow_table.len(), 3);
    assert_eq!(kf8.parts.len(), 1);
    let file = &kf8.parts[0];
    assert_eq!(file.filename, "part0000.xhtml");
    assert_eq!(
        file.data,
        b"<html><head></head><body aid=\"0\"><p id=\"intro\">Hello KF8</p></body></html>".to_vec()
    );
    assert_eq!(file.aid, "0");

    assert_eq!(kf8.flows.len(), 2);
    let css = &kf8.flows[1];
    assert_eq!(css.kind, FlowKind::Css);
    assert_eq!(
        css.format,
        Some(FlowFormat::File {
            dir: "Styles",
            filename: "style0001.css".into()
        })
    );
    assert_eq!(css.data, STYLESHEET);

    assert_eq!(
        kf8.fragment_info(INSERT_AT as usize),
        Some((0, Placement::In, "P-//*[@aid='0']"))
    );

    assert_eq!(part.ncx.len(), 1);
    assert_eq!(part.ncx[0].text, "Introduction");
    assert_eq!(part.toc[0].href, "Text/part0000.xhtml#intro");

    assert_eq!(part.guide.len(), 1);
    assert_eq!(part.guide[0].ref_type, "text");
    assert_eq!(part.guide[0].href, "Text/part0000.xhtml#intro");

    let kinds: Vec<&ResourceKind> = part.resources.iter().map(|r| &r.kind).collect();
    assert!(matches!(kinds[0], ResourceKind::Image { .. }));
    assert_eq!(
        kinds[1],
        &ResourceKind::Font {
            ext: ".ttf",
            obfuscated: true
        }
    );
    assert_eq!(part.resources[1].data, TTF);
    assert_eq!(kinds[2], &ResourceKind::Skipped("FLIS".into()));
    assert_eq!(part.extracted().count(), 2);

    assert_eq!(book.sections.get(0), Some("KF8 Header"));
    assert_eq!(book.sections.get(2), Some("KF8 Skeleton Main INDX section"));
    assert_eq!(book.sections.get(6), Some("KF8 Fragment CTOC Data 0"));
    assert_eq!(book.sections.get(10), Some("KF8 FDST INDX"));
    assert_eq!(book.sections.get(12), Some("Font font00012.ttf"));
    assert!(book.sections.iter().all(|(_, note)| note.is_some()));
}

#[test]
fn test_combination_file() {
    let mut header = HeaderBuilder::mobi(6, 1);
    header.first_resource = 2;
    header.exth = vec![(121, 3u32.to_be_bytes().to_vec())];
    let mut sections = vec![
        header.build(),
        HELLO.to_vec(),
        PNG.to_vec(),
        b"BOUNDARY".to_vec(),
    ];
    sections.extend(kf8_sections());
    let data = palm_db(b"BOOKMOBI", "Combined", &sections);

    let book = unpack(data, &UnpackOptions::default()).expect("unpack combination");
    assert!(book.is_combination());
    assert_eq!(book.boundary, Some(3));
    assert_eq!(book.parts.len(), 2);

    let mobi = &book.parts[0];
    assert_eq!(mobi.kind, BookKind::Mobipocket { version: 6 });
    assert_eq!(mobi.resources.len(), 1);
    assert_eq!(mobi.raw_markup, HELLO);

    let kf8 = &book.parts[1];
    assert_eq!(kf8.kind, BookKind::Kf8);
    assert_eq!(kf8.header.start, 4);
    assert_eq!(kf8.raw_markup, kf8_markup());
    assert_eq!(kf8.toc[0].href, "Text/part0000.xhtml#intro");
    assert_eq!(kf8.resources.first().map(|r| r.section), Some(15));

    assert_eq!(book.sections.get(3), Some("Mobi/KF8 Boundary Section"));
    assert_eq!(book.sections.get(4), Some("KF8 Header"));
    assert_eq!(book.sections.get(5), Some("KF8 Text Section 1"));
}

#[test]
fn test_write_raw_intermediates() {
    let options = UnpackOptions::new().with_raw_intermediates(true);
    let book = unpack(kf8_book(), &options).expect("unpack kf8");
    let dir = TempDir::new().expect("temp dir");
    book.write_raw(dir.path()).expect("write raw");

    let rawml = std::fs::read(dir.path().join("mobi8/book.rawml")).expect("rawml");
    assert_eq!(rawml, kf8_markup());
    assert!(dir.path().join("header_K8.dat").exists());
    let flis = std::fs::read(dir.path().join("FLIS00013_K8.dat")).expect("FLIS payload");
    assert!(flis.starts_with(b"FLIS"));
}

#[test]
fn test_unpack_file_uses_stem() {
    let dir = TempDir::new().expect("temp dir");
    let path = dir.path().join("novel.azw3");
    std::fs::write(&path, kf8_book()).expect("write book");

    let book = unpack_file(&path, &UnpackOptions::default()).expect("unpack file");
    assert_eq!(book.basename, "novel");
    assert_eq!(book.name, "Synthetic_KF8");
}

#[test]
fn test_missing_file() {
    let err = unpack_file("/nonexistent/book.mobi", &UnpackOptions::default()).unwrap_err();
    assert!(matches!(err, Error::Io(_)));
}
