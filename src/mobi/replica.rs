//! Print Replica (`%MOP`) container: tables of PDF and data pieces.

use std::ops::Range;

use tracing::{debug, warn};

use crate::error::{Error, MalformedInput};
use crate::util::read_u32;

/// One embedded piece; piece 0 of every table is a PDF.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "cli", derive(serde::Serialize))]
pub struct ReplicaPiece {
    pub table: usize,
    pub index: usize,
    pub offset: usize,
    pub length: usize,
}

impl ReplicaPiece {
    pub fn is_pdf(&self) -> bool {
        self.index == 0
    }

    /// Output name relative to `basename`: `.001.pdf` or `.001.002.data`.
    pub fn filename(&self, basename: &str) -> String {
        if self.is_pdf() {
            format!("{basename}.{:03}.pdf", self.table + 1)
        } else {
            format!("{basename}.{:03}.{:03}.data", self.table + 1, self.index)
        }
    }

    pub fn range(&self) -> Range<usize> {
        self.offset..self.offset + self.length
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "cli", derive(serde::Serialize))]
pub struct Replica {
    pub pieces: Vec<ReplicaPiece>,
}

impl Replica {
    /// Parse the piece tables of `raw`.
    ///
    /// Problems end the scan early; pieces parsed so far are kept and the
    /// problem is returned alongside.
    pub fn parse(raw: &[u8]) -> (Self, Option<Error>) {
        let mut replica = Self::default();
        let truncated = |offset: usize| -> Error {
            MalformedInput::Truncated {
                what: "print replica table",
                offset,
                needed: 4,
                available: raw.len().saturating_sub(offset),
            }
            .into()
        };

        let Some(tables) = read_u32(raw, 0x04) else {
            return (replica, Some(truncated(0x04)));
        };
        let tables = tables as usize;
        let mut entry = 8 + 4 * tables;
        for table in 0..tables {
            let Some(count) = read_u32(raw, 0x08 + 4 * table) else {
                return (replica, Some(truncated(0x08 + 4 * table)));
            };
            for index in 0..count as usize {
                let (Some(offset), Some(length)) = (read_u32(raw, entry), read_u32(raw, entry + 4)) else {
                    return (replica, Some(truncated(entry)));
                };
                entry += 8;
                let piece = ReplicaPiece {
                    table,
                    index,
                    offset: offset as usize,
                    length: length as usize,
                };
                if piece.range().end > raw.len() {
                    warn!(table, index, offset, length, "print replica piece past end of data");
                    return (
                        replica,
                        Some(Error::IndexOutOfRange {
                            what: "print replica offset",
                            index: piece.range().end,
                            len: raw.len(),
                        }),
                    );
                }
                replica.pieces.push(piece);
            }
        }
        debug!(tables, pieces = replica.pieces.len(), "print replica");
        (replica, None)
    }

    /// Bytes of `piece` within the raw markup it was parsed from.
    pub fn data<'a>(&self, raw: &'a [u8], piece: &ReplicaPiece) -> &'a [u8] {
        raw.get(piece.range()).unwrap_or_default()
    }
}
