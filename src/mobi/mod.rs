//! Mobipocket, KF8 and Print Replica decoding.

pub mod dictionary;
pub mod exth;
pub mod headers;
pub mod huffcdic;
pub mod index;
pub mod kf8;
pub mod language;
pub mod legacy;
pub mod ncx;
pub mod pagemap;
pub mod palmdoc;
mod patterns;
pub mod pdb;
pub mod replica;
pub mod resources;
pub mod text;
mod unpack;
pub mod vwi;

pub use exth::Metadata;
pub use headers::{Codec, Compression, MobiHeader};
pub use kf8::{Flow, FlowFormat, FlowKind, GuideReference, Kf8Book, Part};
pub use ncx::{NcxEntry, TocNode};
pub use pdb::{PalmDb, SectionMap};
pub use resources::{Resource, ResourceKind};
pub use unpack::{BookKind, BookPart, RawIntermediates, Unpacked, unpack, unpack_file};
