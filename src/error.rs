//! Error types for mobi-unpack operations.

use thiserror::Error;

/// Errors that can occur while unpacking a Mobipocket/KF8 container.
#[derive(Error, Debug)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Not a Palm/MOBI identity, an encrypted book, or an unknown codec.
    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("Malformed input: {0}")]
    Malformed(#[from] MalformedInput),

    #[error("{what} index {index} out of range (len {len})")]
    IndexOutOfRange {
        what: &'static str,
        index: usize,
        len: usize,
    },

    #[error("Missing required table: {0}")]
    MissingTable(&'static str),
}

/// Corrupt structures found while decoding.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MalformedInput {
    #[error("variable-width integer at offset {offset} does not terminate")]
    Varint { offset: usize },

    #[error("Huffman dictionary: {0}")]
    HuffmanDict(String),

    #[error("inflection rule: {0}")]
    InflectionRule(String),

    #[error("header: {0}")]
    Header(String),

    #[error("index: {0}")]
    Index(String),

    #[error("{what} truncated at offset {offset}: need {needed} bytes, have {available}")]
    Truncated {
        what: &'static str,
        offset: usize,
        needed: usize,
        available: usize,
    },
}

pub type Result<T> = std::result::Result<T, Error>;
