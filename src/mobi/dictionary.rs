//! Mobipocket dictionary support: orthographic index entries and
//! inflection rules, expressed as markup keyed by raw-markup position.

use std::collections::BTreeMap;

use tracing::{debug, info, warn};

use super::headers::MobiHeader;
use super::index::{IndexSection, IndxHeader, TagMap, TagTable, get_tag_map};
use super::pdb::{PalmDb, SectionMap};
use super::vwi;
use crate::error::{Error, MalformedInput, Result};

/// Markup to insert into the raw text, by byte position.
pub type PositionMap = BTreeMap<usize, Vec<u8>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    InsertStart,
    InsertEnd,
    DeleteEnd,
    DeleteStart,
}

fn rule_error(msg: impl Into<String>) -> Error {
    MalformedInput::InflectionRule(msg.into()).into()
}

/// Apply one inflection rule to a headword.
///
/// Bytes 0x01-0x04 select the edit mode, 0x0A-0x13 move the cursor back
/// from the word end, and anything above 0x13 is a character inserted or
/// deleted at the cursor.
pub fn apply_inflection_rule(headword: &[u8], rule: &[u8]) -> Result<Vec<u8>> {
    let mut word = headword.to_vec();
    let mut mode: Option<Mode> = None;
    let mut position = word.len();

    for &byte in rule {
        match byte {
            0x0A..=0x13 => {
                if !matches!(mode, Some(Mode::InsertEnd | Mode::DeleteEnd)) {
                    mode = Some(Mode::InsertEnd);
                    position = word.len();
                }
                position = position
                    .checked_sub(usize::from(byte - 0x0A))
                    .ok_or_else(|| rule_error("cursor moved before word start"))?;
            }
            0x14.. => {
                let Some(m) = mode else {
                    return Err(rule_error(format!("unexpected first byte {byte}")));
                };
                match m {
                    Mode::InsertStart => {
                        word.insert(position.min(word.len()), byte);
                        position += 1;
                    }
                    Mode::InsertEnd => word.insert(position.min(word.len()), byte),
                    Mode::DeleteEnd => {
                        position = position
                            .checked_sub(1)
                            .filter(|&p| p < word.len())
                            .ok_or_else(|| rule_error("delete past word start"))?;
                        let deleted = word.remove(position);
                        if deleted != byte {
                            return Err(rule_error(format!(
                                "delete expected {:?}, found {:?}",
                                byte as char, deleted as char
                            )));
                        }
                    }
                    Mode::DeleteStart => {
                        if position >= word.len() {
                            return Err(rule_error("delete past word end"));
                        }
                        let deleted = word.remove(position);
                        if deleted != byte {
                            return Err(rule_error(format!(
                                "delete expected {:?}, found {:?}",
                                byte as char, deleted as char
                            )));
                        }
                    }
                }
            }
            0x01 | 0x04 => {
                if !matches!(mode, Some(Mode::InsertStart | Mode::DeleteStart)) {
                    position = 0;
                }
                mode = Some(if byte == 0x01 {
                    Mode::InsertStart
                } else {
                    Mode::DeleteStart
                });
            }
            0x02 | 0x03 => {
                if !matches!(mode, Some(Mode::InsertEnd | Mode::DeleteEnd)) {
                    position = word.len();
                }
                mode = Some(if byte == 0x02 {
                    Mode::InsertEnd
                } else {
                    Mode::DeleteEnd
                });
            }
            _ => return Err(rule_error(format!("mode {byte:#x} is not implemented"))),
        }
    }
    Ok(word)
}

/// Inflection index: rule table, group entries and rule names.
struct Inflection<'a> {
    table: TagTable,
    section: IndexSection<'a>,
    names: &'a [u8],
}

impl<'a> Inflection<'a> {
    fn load(db: &'a PalmDb, first: usize, sections: &mut SectionMap) -> Result<Option<Self>> {
        let data = db.section(first)?;
        sections.describe(first, "Dictionary Inflection Main INDX section");
        let header = IndxHeader::parse(data)?;
        let count = header.count as usize;
        let table = TagTable::parse(data, header.len as usize);

        let section = IndexSection::parse(db.section(first + 1)?)?;
        sections.describe(first + 1, "Dictionary Inflection Data section");
        let names = db.section(first + 1 + count)?;
        sections.describe(first + 1 + count, "Dictionary Inflection Names section");

        if count != 1 {
            warn!(count, "multiple inflection index sections are not supported");
            return Ok(None);
        }
        if table.has_tag(0x07) {
            warn!("dictionary uses the obsolete inflection rule scheme");
            return Ok(None);
        }
        Ok(Some(Self {
            table,
            section,
            names,
        }))
    }

    fn rule_name(&self, offset: usize) -> &'a [u8] {
        match vwi::decode(self.names, offset) {
            Ok((len, consumed)) => {
                let from = (offset + consumed).min(self.names.len());
                let to = from.saturating_add(len as usize).min(self.names.len());
                &self.names[from..to]
            }
            Err(_) => &[],
        }
    }

    /// `<idx:infl>` groups for a headword, or nothing when a group lacks
    /// the name or rule tags.
    fn groups(&self, headword: &[u8], group_list: &[u64], issues: &mut Vec<Error>) -> Result<Vec<u8>> {
        let data = self.section.data();
        let mut out = Vec::new();

        for &group in group_list {
            let group = group as usize;
            let offset = self.section.entry_start(group).ok_or_else(|| {
                MalformedInput::Index(format!("inflection group {group} out of range"))
            })?;
            let next = self.section.entry_start(group + 1);
            if data.get(offset) != Some(&0) {
                debug!(offset, "inflection group does not start with a zero byte");
            }
            let tags = get_tag_map(&self.table, data, offset + 1, next)?;
            let (Some(names), Some(rules)) = (tags.get(&0x05), tags.get(&0x1A)) else {
                warn!(group, "inflection group lacks tag 0x05 or 0x1a");
                return Ok(Vec::new());
            };

            out.extend_from_slice(b"<idx:infl>");
            for (&name_offset, &rule_index) in names.iter().zip(rules) {
                let name = self.rule_name(name_offset as usize);
                let Some(rule_start) = self.section.entry_start(rule_index as usize) else {
                    warn!(rule_index, "inflection rule out of range");
                    continue;
                };
                let rule = self.section.name_at(rule_start);
                match apply_inflection_rule(headword, rule) {
                    Ok(inflected) => {
                        out.extend_from_slice(b"  <idx:iform name=\"");
                        out.extend_from_slice(name);
                        out.extend_from_slice(b"\" value=\"");
                        out.extend_from_slice(&inflected);
                        out.extend_from_slice(b"\"/>");
                    }
                    Err(e) => {
                        warn!(
                            headword = %String::from_utf8_lossy(headword),
                            error = %e,
                            "inflection rule failed"
                        );
                        issues.push(e);
                    }
                }
            }
            out.extend_from_slice(b"</idx:infl>");
        }
        Ok(out)
    }
}

fn append(map: &mut PositionMap, pos: usize, markup: &[u8]) {
    map.entry(pos).or_default().extend_from_slice(markup);
}

fn prepend(map: &mut PositionMap, pos: usize, markup: &[u8]) {
    let slot = map.entry(pos).or_default();
    slot.splice(0..0, markup.iter().copied());
}

/// Build the dictionary entry markup of a legacy Mobipocket dictionary.
pub fn position_map(
    db: &PalmDb,
    header: &MobiHeader,
    sections: &mut SectionMap,
    issues: &mut Vec<Error>,
) -> Result<PositionMap> {
    let mut map = PositionMap::new();
    let Some(orth) = header.orth_index else {
        return Ok(map);
    };
    info!("document contains orthographic index, handle as dictionary");

    let inflection = match header.infl_index {
        Some(first) => Inflection::load(db, first, sections)?,
        None => None,
    };

    let data = db.section(orth)?;
    sections.describe(orth, "Dictionary Orthographic Main INDX section");
    let orth_header = IndxHeader::parse(data)?;
    let table = TagTable::parse(data, orth_header.len as usize);
    let has_entry_length = table.has_tag(0x02);
    if !has_entry_length {
        info!("index doesn't contain entry length tags");
    }

    for i in 1..=orth_header.count as usize {
        let index = orth + i;
        sections.describe(index, format!("Dictionary Orthographic Extra {i} INDX section"));
        let section = IndexSection::parse(db.section(index)?)?;

        for j in 0..section.entry_count() {
            let Some(range) = section.entry_range(j) else {
                continue;
            };
            let word = section.name_at(range.start);
            let tags: TagMap = get_tag_map(
                &table,
                section.data(),
                range.start + 1 + word.len(),
                Some(range.end),
            )?;
            let Some(&start) = tags.get(&0x01).and_then(|v| v.first()) else {
                continue;
            };
            let start = start as usize;

            let groups = match (&inflection, tags.get(&0x2A)) {
                (Some(infl), Some(list)) => infl.groups(word, list, issues)?,
                _ => Vec::new(),
            };

            if has_entry_length {
                let mut ml = b"<idx:entry scriptable=\"yes\"><idx:orth value=\"".to_vec();
                ml.extend_from_slice(word);
                ml.extend_from_slice(b"\">");
                ml.extend(groups);
                ml.extend_from_slice(b"</idx:orth>");
                append(&mut map, start, &ml);

                match tags.get(&0x02).and_then(|v| v.first()) {
                    Some(&len) => prepend(&mut map, start + len as usize, b"</idx:entry>"),
                    None => warn!(start, "dictionary entry lacks a length"),
                }
            } else {
                let mut ml = b"<idx:entry>\n<idx:orth value=\"".to_vec();
                ml.extend_from_slice(word);
                ml.extend_from_slice(b"\">\n");
                ml.extend(groups);
                ml.extend_from_slice(b"</idx:entry>\n");
                append(&mut map, start, &ml);
            }
        }
    }
    debug!(positions = map.len(), "dictionary position map");
    Ok(map)
}
