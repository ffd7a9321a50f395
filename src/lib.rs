//! # mobi-unpack
//!
//! Decoder for Kindle ebook containers: Mobipocket (including PalmDOC and
//! dictionaries), KF8 (AZW3), combination Mobipocket/KF8 files and Print
//! Replica (AZW4).
//!
//! ## Features
//!
//! - Palm database sectioning and MOBI/EXTH header parsing
//! - PalmDOC and HUFF/CDIC text decompression
//! - INDX/TAGX index tables: NCX, KF8 skeleton/fragment/guide, dictionaries
//! - KF8 reassembly of per-file XHTML parts, stylesheets and SVG flows
//! - Image, font, page map and auxiliary section extraction
//!
//! ## Quick Start
//!
//! ```no_run
//! use mobi_unpack::{UnpackOptions, unpack_file};
//!
//! let book = unpack_file("book.azw3", &UnpackOptions::default()).unwrap();
//! for part in &book.parts {
//!     println!("{:?}: {:?}", part.kind, part.metadata.first("Title"));
//!     if let Some(kf8) = &part.kf8 {
//!         for file in &kf8.parts {
//!             println!("  {}/{} ({} bytes)", file.dir, file.filename, file.data.len());
//!         }
//!     }
//! }
//! ```
//!
//! Problems that only affect one resource or table are logged through
//! `tracing` and collected in [`BookPart::issues`]; only an unreadable
//! container, an unsupported format or encryption abort the unpack.

pub mod error;
pub mod mobi;
pub mod options;
pub(crate) mod util;

pub use error::{Error, MalformedInput, Result};
pub use mobi::{BookKind, BookPart, Metadata, Unpacked, unpack, unpack_file};
pub use options::UnpackOptions;
