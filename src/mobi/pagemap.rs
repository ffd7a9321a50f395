//! Print page map (`PAGE` section): page labels and their text offsets.

use std::sync::LazyLock;

use regex_lite::Regex;
use tracing::{debug, warn};

use crate::error::{MalformedInput, Result};
use crate::util::{read_u16, read_u32};

/// `(start,type,value)` tuples of the page-name string.
static NAME_TUPLE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\(([^\)]*)\)").unwrap());

const ROMAN: &[(&str, u32)] = &[
    ("m", 1000),
    ("cm", 900),
    ("d", 500),
    ("cd", 400),
    ("c", 100),
    ("xc", 90),
    ("l", 50),
    ("xl", 40),
    ("x", 10),
    ("ix", 9),
    ("v", 5),
    ("iv", 4),
    ("i", 1),
];

/// Lowercase Roman numeral; empty for 0.
pub fn int_to_roman(mut n: u32) -> String {
    let mut out = String::new();
    for &(letters, value) in ROMAN {
        while n >= value {
            n -= value;
            out.push_str(letters);
        }
    }
    out
}

/// Page labels and the raw-markup offset each page starts at.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "cli", derive(serde::Serialize))]
pub struct PageMap {
    pub names: Vec<Option<String>>,
    pub offsets: Vec<u32>,
}

fn truncated(offset: usize, needed: usize, available: usize) -> MalformedInput {
    MalformedInput::Truncated {
        what: "page map",
        offset,
        needed,
        available,
    }
}

impl PageMap {
    pub fn parse(data: &[u8]) -> Result<Self> {
        let rev_len = read_u32(data, 0x10).ok_or_else(|| truncated(0x10, 4, data.len()))? as usize;
        let ptr = 0x14 + rev_len;
        let field = |i: usize| read_u16(data, ptr + 2 * i).ok_or_else(|| truncated(ptr, 8, data.len()));
        let (name_len, count, bits) = (field(1)? as usize, field(2)? as usize, field(3)?);

        let names_start = ptr + 8;
        let names = data
            .get(names_start..names_start + name_len)
            .ok_or_else(|| truncated(names_start, name_len, data.len()))?;
        let offsets_start = names_start + name_len;
        let width = if bits == 16 { 2 } else { 4 };

        let mut offsets = Vec::with_capacity(count);
        for i in 0..count {
            let at = offsets_start + i * width;
            let value = if width == 2 {
                read_u16(data, at).map(u32::from)
            } else {
                read_u32(data, at)
            };
            offsets.push(value.ok_or_else(|| truncated(at, width, data.len()))?);
        }

        let names = parse_names(count, &String::from_utf8_lossy(names));
        debug!(pages = count, bits, "page map");
        Ok(Self { names, offsets })
    }

    pub fn len(&self) -> usize {
        self.offsets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.offsets.is_empty()
    }

    /// `(name, offset)` for every labelled page.
    pub fn pages(&self) -> impl Iterator<Item = (&str, u32)> {
        self.names
            .iter()
            .zip(&self.offsets)
            .filter_map(|(n, &o)| n.as_deref().filter(|n| !n.is_empty()).map(|n| (n, o)))
    }
}

/// Expand `(start,type,value)` tuples into one label per page.
///
/// Later tuples overwrite the labels of earlier ones from their start
/// page onwards.
fn parse_names(count: usize, spec: &str) -> Vec<Option<String>> {
    let mut names = vec![None; count];
    for caps in NAME_TUPLE_RE.captures_iter(spec) {
        let mut fields = caps[1].splitn(3, ',');
        let (Some(start), Some(kind), Some(value)) = (fields.next(), fields.next(), fields.next()) else {
            warn!(tuple = &caps[1], "malformed page name tuple");
            continue;
        };
        let Ok(start) = start.trim().parse::<usize>() else {
            warn!(tuple = &caps[1], "bad page start");
            continue;
        };
        let first = start.saturating_sub(1);

        match kind {
            "r" | "a" => {
                let Ok(mut n) = value.trim().parse::<u32>() else {
                    warn!(tuple = &caps[1], "bad page number");
                    continue;
                };
                for slot in names.iter_mut().skip(first) {
                    *slot = Some(if kind == "r" { int_to_roman(n) } else { n.to_string() });
                    n += 1;
                }
            }
            "c" => {
                let mut rest = value;
                for slot in names.iter_mut().skip(first) {
                    // The last custom name repeats for the remaining pages
                    let name = match rest.split_once('|') {
                        Some((name, tail)) => {
                            rest = tail;
                            name
                        }
                        None => rest,
                    };
                    *slot = Some(name.to_string());
                }
            }
            other => warn!(kind = other, "unknown page numbering type"),
        }
    }
    names
}
