//! Cross-reference table loading.
//!
//! A document's object table is assembled by walking the update chain from
//! the `startxref` offset backwards through `/Prev` links. Each link is
//! either a classic `xref` table (pre-1.5 files, read only) or a
//! cross-reference stream (`/Type /XRef`). Entries from newer updates shadow
//! older ones, and so do trailer fields.

use std::collections::{BTreeMap, HashMap};

use log::{debug, warn};

use crate::error::{Error, Result};
use crate::lexer::{self, Token};
use crate::object::{ContextId, Object, StreamKind};
use crate::parser;

/// How many trailing bytes to scan for the `startxref` keyword.
const STARTXREF_WINDOW: usize = 2048;

/// Maximum `/Prev` chain length before the walk aborts.
const MAX_PREV_DEPTH: usize = 100;

/// Generation number marking object 0, the permanent free-list head.
pub const FREE_HEAD_GENERATION: u16 = 65535;

/// Slot state of one object number.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Usage {
    /// Free slot; `next_free` is the number of the next free slot, 0 ends
    /// the chain.
    Free {
        /// Next free object number.
        next_free: u32,
    },
    /// Live object stored as an inline `N G obj` record.
    InUse {
        /// Byte offset of the record from the start of the file.
        offset: u64,
    },
    /// Live object packed inside an object stream.
    InUseCompressed {
        /// Object number of the containing object stream.
        container: u32,
        /// Zero-based slot index within the container.
        index: u16,
    },
}

/// One cross-reference entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct XRefEntry {
    /// Object number.
    pub number: u32,
    /// Generation number. Always 0 for compressed entries.
    pub generation: u16,
    /// Slot state.
    pub usage: Usage,
}

/// Merged result of walking the whole update chain.
#[derive(Debug, Default)]
pub struct XRefTable {
    /// Entries by object number; newest update wins.
    pub entries: BTreeMap<u32, XRefEntry>,
    /// Merged trailer dictionary; newest update wins per key.
    pub trailer: HashMap<String, Object>,
}

/// Find the offset announced by the `startxref` keyword near the end of the
/// file.
pub fn find_startxref(bytes: &[u8]) -> Result<u64> {
    let window_start = bytes.len().saturating_sub(STARTXREF_WINDOW);
    let window = &bytes[window_start..];
    let at = window
        .windows(b"startxref".len())
        .rposition(|w| w == b"startxref")
        .ok_or_else(|| Error::syntax(bytes.len(), "missing startxref"))?;
    let after = &window[at + b"startxref".len()..];
    match lexer::token(after) {
        Ok((_, Token::Integer(offset))) if offset >= 0 => Ok(offset as u64),
        _ => Err(Error::syntax(
            window_start + at,
            "startxref not followed by an offset",
        )),
    }
}

impl XRefTable {
    /// Load the full table of a file: locate `startxref`, then walk the
    /// `/Prev` chain merging every update section.
    pub fn load(bytes: &[u8], ctx: ContextId) -> Result<(XRefTable, u64)> {
        let start = find_startxref(bytes)?;
        let mut table = XRefTable::default();
        let mut next = Some(start);
        let mut depth = 0;

        while let Some(offset) = next {
            if depth >= MAX_PREV_DEPTH {
                warn!("cross-reference chain exceeds {} sections, stopping", MAX_PREV_DEPTH);
                break;
            }
            depth += 1;
            debug!("reading cross-reference section at offset {}", offset);
            let section = parse_section(bytes, offset as usize, ctx)?;

            next = section
                .trailer
                .get("Prev")
                .and_then(Object::as_integer)
                .filter(|&p| p >= 0)
                .map(|p| p as u64);

            for (number, entry) in section.entries {
                table.entries.entry(number).or_insert(entry);
            }
            for (key, value) in section.trailer {
                table.trailer.entry(key).or_insert(value);
            }
        }

        table.trailer.remove("Prev");
        Ok((table, start))
    }
}

/// Parse one update section, classic or stream, at the given offset.
fn parse_section(bytes: &[u8], offset: usize, ctx: ContextId) -> Result<XRefTable> {
    if offset >= bytes.len() {
        return Err(Error::syntax(offset, "cross-reference offset past end of file"));
    }
    let at = lexer::skip_ws(&bytes[offset..]);
    if at.starts_with(b"xref") {
        parse_classic_section(bytes, offset, ctx)
    } else {
        parse_stream_section(bytes, offset, ctx)
    }
}

fn expect_integer(source_len: usize, input: &[u8]) -> Result<(&[u8], i64)> {
    match lexer::token(input) {
        Ok((rest, Token::Integer(n))) => Ok((rest, n)),
        _ => Err(Error::syntax(source_len - input.len(), "expected integer")),
    }
}

/// Classic `xref` table: subsection headers `start count` followed by fixed
/// 20-byte entries, then `trailer <<...>>`.
fn parse_classic_section(bytes: &[u8], offset: usize, ctx: ContextId) -> Result<XRefTable> {
    let mut input = lexer::skip_ws(&bytes[offset..]);
    if !input.starts_with(b"xref") {
        return Err(Error::syntax(offset, "expected xref keyword"));
    }
    input = &input[b"xref".len()..];

    let mut table = XRefTable::default();
    loop {
        let peek = lexer::skip_ws(input);
        if peek.starts_with(b"trailer") {
            input = &peek[b"trailer".len()..];
            break;
        }
        let (rest, start) = expect_integer(bytes.len(), peek)?;
        let (rest, count) = expect_integer(bytes.len(), rest)?;
        if start < 0 || count < 0 {
            return Err(Error::syntax(bytes.len() - rest.len(), "negative subsection header"));
        }
        input = rest;

        for i in 0..count as u32 {
            let (rest, field1) = expect_integer(bytes.len(), input)?;
            let (rest, generation) = expect_integer(bytes.len(), rest)?;
            let rest = lexer::skip_ws(rest);
            let kind = *rest
                .first()
                .ok_or_else(|| Error::syntax(bytes.len(), "truncated xref entry"))?;
            input = &rest[1..];

            let number = start as u32 + i;
            let generation = generation.clamp(0, u16::MAX as i64) as u16;
            let usage = match kind {
                b'n' => Usage::InUse {
                    offset: field1.max(0) as u64,
                },
                b'f' => Usage::Free {
                    next_free: field1.clamp(0, u32::MAX as i64) as u32,
                },
                other => {
                    return Err(Error::syntax(
                        bytes.len() - input.len(),
                        format!("unknown xref entry kind {:?}", other as char),
                    ));
                },
            };
            table.entries.insert(
                number,
                XRefEntry {
                    number,
                    generation,
                    usage,
                },
            );
        }
    }

    let (_, trailer) = parser::parse_object_in(input, ctx)
        .map_err(|e| parser::to_syntax(bytes.len(), e))?;
    match trailer {
        Object::Dictionary(dict) => {
            table.trailer = dict;
            Ok(table)
        },
        other => Err(Error::syntax(
            bytes.len() - input.len(),
            format!("trailer is {}", other.type_name()),
        )),
    }
}

/// Big-endian integer of `width` bytes; width 0 yields the default.
fn read_field(row: &[u8], pos: &mut usize, width: usize, default: u64) -> u64 {
    if width == 0 {
        return default;
    }
    let mut value = 0u64;
    for &byte in &row[*pos..*pos + width] {
        value = value << 8 | byte as u64;
    }
    *pos += width;
    value
}

/// Cross-reference stream: an indirect stream object with `/Type /XRef`,
/// whose decoded body holds fixed-width binary rows described by `/W` and
/// `/Index`.
fn parse_stream_section(bytes: &[u8], offset: usize, ctx: ContextId) -> Result<XRefTable> {
    let (_, _, object) = parser::parse_indirect(bytes, offset, ctx)?;
    let (dict, data, kind) = match object {
        Object::Stream { dict, data, kind } => (dict, data, kind),
        other => {
            return Err(Error::syntax(
                offset,
                format!("expected cross-reference stream, found {}", other.type_name()),
            ));
        },
    };
    if kind != StreamKind::XRef {
        return Err(Error::syntax(offset, "stream at startxref is not /Type /XRef"));
    }

    let widths: Vec<usize> = dict
        .get("W")
        .and_then(Object::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Object::as_integer)
                .map(|n| n.max(0) as usize)
                .collect()
        })
        .filter(|w: &Vec<usize>| w.len() == 3)
        .ok_or_else(|| Error::syntax(offset, "cross-reference stream missing /W"))?;
    let row_len: usize = widths.iter().sum();
    if row_len == 0 || row_len > 16 {
        return Err(Error::syntax(offset, "implausible /W widths"));
    }

    let size = dict
        .get("Size")
        .and_then(Object::as_integer)
        .filter(|&n| n >= 0)
        .ok_or_else(|| Error::syntax(offset, "cross-reference stream missing /Size"))?;

    let index: Vec<(u32, u32)> = match dict.get("Index").and_then(Object::as_array) {
        Some(items) => {
            let numbers: Vec<i64> = items.iter().filter_map(Object::as_integer).collect();
            if numbers.len() != items.len() || numbers.len() % 2 != 0 {
                return Err(Error::syntax(offset, "malformed /Index"));
            }
            numbers
                .chunks(2)
                .map(|pair| (pair[0].max(0) as u32, pair[1].max(0) as u32))
                .collect()
        },
        None => vec![(0, size as u32)],
    };

    let body = crate::filters::decode_stream_body(&dict, &data)?;

    let mut table = XRefTable::default();
    let mut pos = 0;
    for (start, count) in index {
        for number in start..start.saturating_add(count) {
            if pos + row_len > body.len() {
                return Err(Error::syntax(offset, "cross-reference stream body too short"));
            }
            let row = &body[pos..pos + row_len];
            pos += row_len;

            let mut at = 0;
            let kind = read_field(row, &mut at, widths[0], 1);
            let f1 = read_field(row, &mut at, widths[1], 0);
            let f2 = read_field(row, &mut at, widths[2], 0);

            let (generation, usage) = match kind {
                0 => (f2 as u16, Usage::Free {
                    next_free: f1 as u32,
                }),
                1 => (f2 as u16, Usage::InUse { offset: f1 }),
                2 => (0, Usage::InUseCompressed {
                    container: f1 as u32,
                    index: f2 as u16,
                }),
                other => {
                    debug!("ignoring cross-reference row of unknown type {}", other);
                    continue;
                },
            };
            table.entries.insert(
                number,
                XRefEntry {
                    number,
                    generation,
                    usage,
                },
            );
        }
    }

    table.trailer = dict;
    Ok(table)
}

/// Rebuild the free-list chain in ascending number order.
///
/// Every free entry is linked to the next free number, the last one closes
/// the chain at 0, and object 0 is (re)pinned as the permanent head with
/// generation 65535.
pub fn relink_free_list(entries: &mut BTreeMap<u32, XRefEntry>) {
    let free: Vec<u32> = entries
        .iter()
        .filter(|(_, e)| matches!(e.usage, Usage::Free { .. }))
        .map(|(&n, _)| n)
        .collect();

    for window in free.windows(2) {
        if let Some(entry) = entries.get_mut(&window[0]) {
            entry.usage = Usage::Free {
                next_free: window[1],
            };
        }
    }
    if let Some(&last) = free.last() {
        if let Some(entry) = entries.get_mut(&last) {
            entry.usage = Usage::Free { next_free: 0 };
        }
    }

    let head_next = free.iter().copied().find(|&n| n != 0).unwrap_or(0);
    entries.insert(
        0,
        XRefEntry {
            number: 0,
            generation: FREE_HEAD_GENERATION,
            usage: Usage::Free {
                next_free: head_next,
            },
        },
    );
}
