//! Filepos anchors for Mobipocket (pre-KF8) markup.
//!
//! Legacy links address byte positions in the decompressed text with
//! `filepos=NNNNN`. Every referenced position gets an
//! `<a id="fileposNNNNN" />` target spliced in at exactly that byte.

use std::collections::BTreeSet;

use tracing::debug;

use super::dictionary::PositionMap;
use super::ncx::NcxEntry;
use super::patterns::{FILEPOS_RE, ascii_view};

/// Byte positions referenced by `filepos=` links or by NCX entries.
pub fn link_positions(raw: &[u8], ncx: &[NcxEntry]) -> BTreeSet<usize> {
    let view = ascii_view(raw);
    let mut positions: BTreeSet<usize> = FILEPOS_RE
        .captures_iter(&view)
        .filter_map(|caps| caps[1].parse().ok())
        .collect();
    positions.extend(ncx.iter().filter(|e| e.pos > 0).map(|e| e.pos as usize));
    debug!(targets = positions.len(), "filepos link targets");
    positions
}

/// Splice the dictionary markup of `position_map` and a filepos anchor for
/// every link target into `raw`.
///
/// Positions of 0 or past the end of the text are left out.
pub fn insert_anchors(raw: &[u8], positions: &BTreeSet<usize>, mut position_map: PositionMap) -> Vec<u8> {
    for &pos in positions {
        position_map
            .entry(pos)
            .or_default()
            .extend_from_slice(format!("<a id=\"filepos{pos}\" />").as_bytes());
    }

    let extra: usize = position_map.values().map(Vec::len).sum();
    let mut out = Vec::with_capacity(raw.len() + extra);
    let mut last = 0;
    for (&pos, markup) in &position_map {
        if pos == 0 || pos > raw.len() {
            continue;
        }
        out.extend_from_slice(&raw[last..pos]);
        out.extend_from_slice(markup);
        last = pos;
    }
    out.extend_from_slice(&raw[last..]);
    out
}
