//! Serialization and the write engine.
//!
//! A write pass walks the object table in number order and decides each
//! slot's fate exactly once: inline record, packed into an object stream, or
//! free. The pass builds the whole output in memory and touches no document
//! state; `Document` commits the outcome only after the bytes are safely on
//! their way.

use std::collections::{BTreeMap, HashMap};

use log::debug;
use uuid::Uuid;

use crate::document::Document;
use crate::error::{Error, Result};
use crate::filters;
use crate::object::{Object, ObjectRef, StreamKind};
use crate::objstm::ObjectStreamBuilder;
use crate::xref::{FREE_HEAD_GENERATION, Usage, XRefEntry, relink_free_list};

/// How a document is serialized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SaveMode {
    /// Full rewrite: one garbage-free revision, everything repacked.
    #[default]
    Standard,
    /// Append-only update: original bytes kept verbatim, only dirty objects
    /// written after them.
    Incremental,
    /// Reserved; always fails with [`Error::Unsupported`].
    Linearized,
}

/// Binary marker line advertising 8-bit content, written after the header.
const BINARY_MARKER: &[u8] = b"%\xE2\xE3\xCF\xD3\n";

/// Result of a successful write pass, applied to the document afterwards.
pub(crate) struct WriteOutcome {
    pub buf: Vec<u8>,
    pub entries: BTreeMap<u32, XRefEntry>,
    pub trailer: HashMap<String, Object>,
    pub start_xref: u64,
    pub next_number: u32,
}

/// Serialize one direct object into `out`.
///
/// Dictionaries come out with sorted keys so output is deterministic;
/// streams get their `/Length` recomputed from the actual body.
pub fn serialize_object(object: &Object, out: &mut Vec<u8>) {
    match object {
        Object::Null => out.extend_from_slice(b"null"),
        Object::Boolean(true) => out.extend_from_slice(b"true"),
        Object::Boolean(false) => out.extend_from_slice(b"false"),
        Object::Integer(i) => out.extend_from_slice(i.to_string().as_bytes()),
        Object::Real(r) => write_real(*r, out),
        Object::String(s) => write_string(s, out),
        Object::Name(n) => write_name(n, out),
        Object::Array(items) => {
            out.push(b'[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(b' ');
                }
                serialize_object(item, out);
            }
            out.push(b']');
        },
        Object::Dictionary(dict) => write_dict(dict, out),
        Object::Stream { dict, data, .. } => {
            let mut dict = dict.clone();
            dict.insert("Length".to_string(), Object::Integer(data.len() as i64));
            write_dict(&dict, out);
            out.extend_from_slice(b"\nstream\n");
            out.extend_from_slice(data);
            out.extend_from_slice(b"\nendstream");
        },
        Object::Reference(r) => {
            out.extend_from_slice(format!("{} {} R", r.number, r.generation).as_bytes());
        },
    }
}

/// Reals print with up to five decimals, trailing zeros trimmed.
fn write_real(value: f64, out: &mut Vec<u8>) {
    if !value.is_finite() {
        out.push(b'0');
        return;
    }
    let mut text = format!("{:.5}", value);
    while text.ends_with('0') {
        text.pop();
    }
    if text.ends_with('.') {
        text.pop();
    }
    out.extend_from_slice(text.as_bytes());
}

/// Printable strings go out literal with escapes; anything else as hex.
fn write_string(bytes: &[u8], out: &mut Vec<u8>) {
    let printable = bytes
        .iter()
        .all(|&b| (0x20..0x7F).contains(&b) || matches!(b, b'\n' | b'\r' | b'\t'));
    if printable {
        out.push(b'(');
        for &b in bytes {
            match b {
                b'(' => out.extend_from_slice(b"\\("),
                b')' => out.extend_from_slice(b"\\)"),
                b'\\' => out.extend_from_slice(b"\\\\"),
                b'\n' => out.extend_from_slice(b"\\n"),
                b'\r' => out.extend_from_slice(b"\\r"),
                b'\t' => out.extend_from_slice(b"\\t"),
                other => out.push(other),
            }
        }
        out.push(b')');
    } else {
        out.push(b'<');
        for &b in bytes {
            out.extend_from_slice(format!("{:02X}", b).as_bytes());
        }
        out.push(b'>');
    }
}

fn write_name(name: &str, out: &mut Vec<u8>) {
    out.push(b'/');
    for &b in name.as_bytes() {
        let regular =
            (0x21..0x7F).contains(&b) && !crate::lexer::is_delimiter(b) && b != b'#';
        if regular {
            out.push(b);
        } else {
            out.extend_from_slice(format!("#{:02X}", b).as_bytes());
        }
    }
}

fn write_dict(dict: &HashMap<String, Object>, out: &mut Vec<u8>) {
    let mut keys: Vec<&String> = dict.keys().collect();
    keys.sort();
    out.extend_from_slice(b"<<");
    for key in keys {
        out.push(b' ');
        write_name(key, out);
        out.push(b' ');
        serialize_object(&dict[key], out);
    }
    out.extend_from_slice(b" >>");
}

/// Write one inline record `N G obj ... endobj`.
fn write_record(buf: &mut Vec<u8>, number: u32, generation: u16, payload: &Object) {
    buf.extend_from_slice(format!("{} {} obj\n", number, generation).as_bytes());
    serialize_object(payload, buf);
    buf.extend_from_slice(b"\nendobj\n");
}

/// Entry point for the write engine.
pub(crate) fn write(doc: &mut Document, mode: SaveMode) -> Result<WriteOutcome> {
    match mode {
        SaveMode::Linearized => Err(Error::Unsupported("linearized serialization".to_string())),
        SaveMode::Standard => write_standard(doc),
        SaveMode::Incremental => {
            if doc.source.is_none() {
                debug!("incremental save of a fresh document falls back to a full write");
                write_standard(doc)
            } else {
                write_incremental(doc)
            }
        },
    }
}

fn trailer_pointer(trailer: &HashMap<String, Object>, key: &str) -> Option<u32> {
    trailer.get(key).and_then(Object::as_reference).map(|r| r.number)
}

/// Flush a packer: allocate a container number, write the container record,
/// register every member slot.
fn flush_packer(
    buf: &mut Vec<u8>,
    entries: &mut BTreeMap<u32, XRefEntry>,
    alloc: &mut u32,
    packer: &ObjectStreamBuilder,
) -> Result<()> {
    if packer.is_empty() {
        return Ok(());
    }
    let container = *alloc;
    *alloc += 1;
    for (index, member) in packer.numbers().enumerate() {
        entries.insert(member, XRefEntry {
            number: member,
            generation: 0,
            usage: Usage::InUseCompressed {
                container,
                index: index as u16,
            },
        });
    }
    let offset = buf.len() as u64;
    write_record(buf, container, 0, &packer.build()?);
    entries.insert(container, XRefEntry {
        number: container,
        generation: 0,
        usage: Usage::InUse { offset },
    });
    Ok(())
}

/// Encode the cross-reference stream rows (`/W [1 4 2]`) and the matching
/// `/Index` run list for a set of entries.
///
/// The four-byte offset field cannot address past 4 GiB; larger offsets
/// fail instead of emitting a corrupt row.
fn encode_rows(entries: &BTreeMap<u32, XRefEntry>) -> Result<(Vec<Object>, Vec<u8>)> {
    let mut index = Vec::new();
    let mut rows = Vec::new();
    let mut run_start: Option<(u32, u32)> = None;

    for (&number, entry) in entries {
        match run_start {
            Some((start, count)) if start + count == number => {
                run_start = Some((start, count + 1));
            },
            Some((start, count)) => {
                index.push(Object::Integer(start as i64));
                index.push(Object::Integer(count as i64));
                run_start = Some((number, 1));
            },
            None => run_start = Some((number, 1)),
        }

        let (kind, f1, f2): (u8, u32, u16) = match entry.usage {
            Usage::Free { next_free } => (0, next_free, entry.generation),
            Usage::InUse { offset } => {
                let offset = u32::try_from(offset).map_err(|_| {
                    Error::Unsupported("cross-reference offsets beyond 4 GiB".to_string())
                })?;
                (1, offset, entry.generation)
            },
            Usage::InUseCompressed { container, index } => (2, container, index),
        };
        rows.push(kind);
        rows.extend_from_slice(&f1.to_be_bytes());
        rows.extend_from_slice(&f2.to_be_bytes());
    }
    if let Some((start, count)) = run_start {
        index.push(Object::Integer(start as i64));
        index.push(Object::Integer(count as i64));
    }
    Ok((index, rows))
}

fn new_file_id() -> Object {
    Object::String(Uuid::new_v4().as_bytes().to_vec())
}

/// Build the cross-reference stream and the tail, appending both to `buf`.
fn write_xref_stream(
    buf: &mut Vec<u8>,
    entries: &mut BTreeMap<u32, XRefEntry>,
    alloc: &mut u32,
    trailer_fields: HashMap<String, Object>,
    prev: Option<u64>,
) -> Result<u64> {
    let xref_number = *alloc;
    *alloc += 1;
    let offset = buf.len() as u64;
    entries.insert(xref_number, XRefEntry {
        number: xref_number,
        generation: 0,
        usage: Usage::InUse { offset },
    });

    let (index, rows) = encode_rows(entries)?;
    let packed = filters::flate_encode(&rows)?;

    let mut dict = trailer_fields;
    dict.insert("Type".to_string(), Object::name("XRef"));
    dict.insert("Size".to_string(), Object::Integer(*alloc as i64));
    dict.insert(
        "W".to_string(),
        Object::Array(vec![
            Object::Integer(1),
            Object::Integer(4),
            Object::Integer(2),
        ]),
    );
    dict.insert("Index".to_string(), Object::Array(index));
    dict.insert("Filter".to_string(), Object::name("FlateDecode"));
    if let Some(prev) = prev {
        dict.insert("Prev".to_string(), Object::Integer(prev as i64));
    }

    write_record(buf, xref_number, 0, &Object::stream(dict, packed));
    buf.extend_from_slice(format!("startxref\n{}\n%%EOF\n", offset).as_bytes());
    Ok(offset)
}

fn write_standard(doc: &mut Document) -> Result<WriteOutcome> {
    let mut buf = Vec::new();
    buf.extend_from_slice(format!("%PDF-{}\n", doc.version).as_bytes());
    buf.extend_from_slice(BINARY_MARKER);

    let root = trailer_pointer(&doc.trailer, "Root");
    let info = trailer_pointer(&doc.trailer, "Info");
    let highest = doc.next_number;

    let mut alloc = highest;
    let mut entries: BTreeMap<u32, XRefEntry> = BTreeMap::new();
    let mut packer = ObjectStreamBuilder::new(None);

    for number in 1..highest {
        let old = doc.entries.get(&number).copied();
        let generation = old.map(|e| e.generation).unwrap_or(0);
        let live = doc.cache.contains_key(&number)
            || matches!(
                old,
                Some(XRefEntry {
                    usage: Usage::InUse { .. } | Usage::InUseCompressed { .. },
                    ..
                })
            );
        if !live {
            entries.insert(number, XRefEntry {
                number,
                generation,
                usage: Usage::Free { next_free: 0 },
            });
            continue;
        }

        let payload = doc.payload(number)?;

        // Old containers and cross-reference streams are file plumbing, not
        // document content; a full rewrite rebuilds its own.
        if matches!(
            payload,
            Object::Stream {
                kind: StreamKind::ObjectStream | StreamKind::XRef,
                ..
            }
        ) {
            debug!("dropping infrastructure stream {} during full rewrite", number);
            entries.insert(number, XRefEntry {
                number,
                generation,
                usage: Usage::Free { next_free: 0 },
            });
            continue;
        }

        let compressible = generation == 0
            && !matches!(payload, Object::Stream { .. })
            && Some(number) != root
            && Some(number) != info;

        if compressible {
            let mut serialized = Vec::new();
            serialize_object(&payload, &mut serialized);
            packer.push(number, serialized);
            if packer.is_full() {
                flush_packer(&mut buf, &mut entries, &mut alloc, &packer)?;
                packer = ObjectStreamBuilder::new(None);
            }
        } else {
            let offset = buf.len() as u64;
            write_record(&mut buf, number, generation, &payload);
            entries.insert(number, XRefEntry {
                number,
                generation,
                usage: Usage::InUse { offset },
            });
        }
    }
    flush_packer(&mut buf, &mut entries, &mut alloc, &packer)?;

    relink_free_list(&mut entries);

    let mut trailer_fields = HashMap::new();
    if let Some(root) = doc.trailer.get("Root") {
        trailer_fields.insert("Root".to_string(), root.clone());
    }
    if let Some(info) = doc.trailer.get("Info") {
        trailer_fields.insert("Info".to_string(), info.clone());
    }
    // A full rewrite is a new file; both halves of the identifier change.
    trailer_fields.insert(
        "ID".to_string(),
        Object::Array(vec![new_file_id(), new_file_id()]),
    );

    let start_xref = write_xref_stream(
        &mut buf,
        &mut entries,
        &mut alloc,
        trailer_fields.clone(),
        None,
    )?;
    trailer_fields.insert("Size".to_string(), Object::Integer(alloc as i64));

    Ok(WriteOutcome {
        buf,
        entries,
        trailer: trailer_fields,
        start_xref,
        next_number: alloc,
    })
}

/// Chain this update's freed slots into the existing free list by rewriting
/// the list head.
fn link_freed(doc: &Document, entries: &mut BTreeMap<u32, XRefEntry>) {
    let freed: Vec<u32> = entries
        .iter()
        .filter(|(&n, e)| n != 0 && matches!(e.usage, Usage::Free { .. }))
        .map(|(&n, _)| n)
        .collect();
    if freed.is_empty() {
        return;
    }
    let old_head = match doc.entries.get(&0) {
        Some(XRefEntry {
            usage: Usage::Free { next_free },
            ..
        }) => *next_free,
        _ => 0,
    };
    for window in freed.windows(2) {
        if let Some(entry) = entries.get_mut(&window[0]) {
            entry.usage = Usage::Free {
                next_free: window[1],
            };
        }
    }
    if let Some(entry) = entries.get_mut(freed.last().unwrap()) {
        entry.usage = Usage::Free {
            next_free: old_head,
        };
    }
    entries.insert(0, XRefEntry {
        number: 0,
        generation: FREE_HEAD_GENERATION,
        usage: Usage::Free {
            next_free: freed[0],
        },
    });
}

fn write_incremental(doc: &mut Document) -> Result<WriteOutcome> {
    let source = doc.source.clone().unwrap_or_default();
    let mut buf = source.to_vec();
    if !buf.ends_with(b"\n") {
        buf.push(b'\n');
    }

    let root = trailer_pointer(&doc.trailer, "Root");
    let info = trailer_pointer(&doc.trailer, "Info");

    let mut alloc = doc.next_number;
    let mut entries: BTreeMap<u32, XRefEntry> = BTreeMap::new();
    let mut packer = ObjectStreamBuilder::new(None);
    // One extension packer per base container an updated object came from.
    let mut extensions: BTreeMap<u32, ObjectStreamBuilder> = BTreeMap::new();

    let dirty: Vec<u32> = doc.updated.iter().copied().collect();
    for number in dirty {
        let old = doc.entries.get(&number).copied();
        let generation = old.map(|e| e.generation).unwrap_or(0);
        let deleted = !doc.cache.contains_key(&number)
            && matches!(
                old,
                Some(XRefEntry {
                    usage: Usage::Free { .. },
                    ..
                })
            );
        if deleted {
            entries.insert(number, XRefEntry {
                number,
                generation,
                usage: Usage::Free { next_free: 0 },
            });
            continue;
        }

        let payload = doc.payload(number)?;
        let compressible = generation == 0
            && !matches!(payload, Object::Stream { .. })
            && Some(number) != root
            && Some(number) != info;

        if compressible {
            let mut serialized = Vec::new();
            serialize_object(&payload, &mut serialized);
            let base = match old {
                Some(XRefEntry {
                    usage: Usage::InUseCompressed { container, .. },
                    ..
                }) => Some(container),
                _ => None,
            };
            match base {
                // Previously packed objects go into an extension of their
                // original container.
                Some(base) => {
                    let ext = extensions.entry(base).or_insert_with(|| {
                        ObjectStreamBuilder::new(Some(ObjectRef::new(base, 0, doc.context)))
                    });
                    if ext.is_full() {
                        flush_packer(&mut buf, &mut entries, &mut alloc, ext)?;
                        *ext = ObjectStreamBuilder::new(Some(ObjectRef::new(
                            base,
                            0,
                            doc.context,
                        )));
                    }
                    ext.push(number, serialized);
                },
                None => {
                    packer.push(number, serialized);
                    if packer.is_full() {
                        flush_packer(&mut buf, &mut entries, &mut alloc, &packer)?;
                        packer = ObjectStreamBuilder::new(None);
                    }
                },
            }
        } else {
            let offset = buf.len() as u64;
            write_record(&mut buf, number, generation, &payload);
            entries.insert(number, XRefEntry {
                number,
                generation,
                usage: Usage::InUse { offset },
            });
        }
    }
    flush_packer(&mut buf, &mut entries, &mut alloc, &packer)?;
    for ext in extensions.values() {
        flush_packer(&mut buf, &mut entries, &mut alloc, ext)?;
    }

    link_freed(doc, &mut entries);

    let mut trailer_fields = HashMap::new();
    if let Some(root) = doc.trailer.get("Root") {
        trailer_fields.insert("Root".to_string(), root.clone());
    }
    if let Some(info) = doc.trailer.get("Info") {
        trailer_fields.insert("Info".to_string(), info.clone());
    }
    // The first identifier half is permanent; only the second half tracks
    // the revision.
    let first_id = doc
        .trailer
        .get("ID")
        .and_then(Object::as_array)
        .and_then(|a| a.first().cloned())
        .unwrap_or_else(new_file_id);
    trailer_fields.insert(
        "ID".to_string(),
        Object::Array(vec![first_id, new_file_id()]),
    );

    let start_xref = write_xref_stream(
        &mut buf,
        &mut entries,
        &mut alloc,
        trailer_fields.clone(),
        Some(doc.source_start_xref),
    )?;
    trailer_fields.insert("Size".to_string(), Object::Integer(alloc as i64));

    let mut merged = doc.entries.clone();
    for (number, entry) in entries {
        merged.insert(number, entry);
    }

    Ok(WriteOutcome {
        buf,
        entries: merged,
        trailer: trailer_fields,
        start_xref,
        next_number: alloc,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn serialized(object: &Object) -> String {
        let mut out = Vec::new();
        serialize_object(object, &mut out);
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn test_scalars() {
        assert_eq!(serialized(&Object::Null), "null");
        assert_eq!(serialized(&Object::Boolean(true)), "true");
        assert_eq!(serialized(&Object::Integer(-42)), "-42");
    }

    #[test]
    fn test_real_trimming() {
        assert_eq!(serialized(&Object::Real(1.5)), "1.5");
        assert_eq!(serialized(&Object::Real(3.0)), "3");
        assert_eq!(serialized(&Object::Real(-0.25)), "-0.25");
        assert_eq!(serialized(&Object::Real(f64::NAN)), "0");
    }

    #[test]
    fn test_string_literal_vs_hex() {
        assert_eq!(serialized(&Object::text("Hello")), "(Hello)");
        assert_eq!(serialized(&Object::text("a(b)c")), "(a\\(b\\)c)");
        assert_eq!(serialized(&Object::String(vec![0x00, 0xFF])), "<00FF>");
    }

    #[test]
    fn test_name_escaping() {
        assert_eq!(serialized(&Object::name("Type")), "/Type");
        assert_eq!(serialized(&Object::name("A B")), "/A#20B");
        assert_eq!(serialized(&Object::name("x#y")), "/x#23y");
    }

    #[test]
    fn test_array() {
        let arr = Object::Array(vec![
            Object::Integer(1),
            Object::name("Two"),
            Object::Reference(crate::object::ObjectRef::detached(3, 0)),
        ]);
        assert_eq!(serialized(&arr), "[1 /Two 3 0 R]");
    }

    #[test]
    fn test_dict_keys_sorted() {
        let mut dict = HashMap::new();
        dict.insert("Zebra".to_string(), Object::Integer(1));
        dict.insert("Alpha".to_string(), Object::Integer(2));
        assert_eq!(serialized(&Object::Dictionary(dict)), "<< /Alpha 2 /Zebra 1 >>");
    }

    #[test]
    fn test_stream_length_recomputed() {
        let mut dict = HashMap::new();
        dict.insert("Length".to_string(), Object::Integer(999));
        let text = serialized(&Object::stream(dict, &b"abcde"[..]));
        assert!(text.starts_with("<< /Length 5 >>\nstream\nabcde"));
        assert!(text.ends_with("\nendstream"));
    }

    #[test]
    fn test_encode_rows_runs() {
        let mut entries = BTreeMap::new();
        for number in [0u32, 1, 2, 7] {
            entries.insert(number, XRefEntry {
                number,
                generation: 0,
                usage: Usage::InUse { offset: 10 },
            });
        }
        let (index, rows) = encode_rows(&entries).unwrap();
        assert_eq!(
            index,
            vec![
                Object::Integer(0),
                Object::Integer(3),
                Object::Integer(7),
                Object::Integer(1),
            ]
        );
        assert_eq!(rows.len(), 4 * 7);
        // Row layout: type(1) field1(4) field2(2), big-endian.
        assert_eq!(&rows[..7], &[1, 0, 0, 0, 10, 0, 0]);
    }

    #[test]
    fn test_encode_rows_rejects_offsets_past_four_gib() {
        let mut entries = BTreeMap::new();
        entries.insert(1, XRefEntry {
            number: 1,
            generation: 0,
            usage: Usage::InUse {
                offset: u32::MAX as u64 + 1,
            },
        });
        assert!(matches!(
            encode_rows(&entries).unwrap_err(),
            Error::Unsupported(_)
        ));
    }

    #[test]
    fn test_serialized_value_reparses() {
        let mut dict = HashMap::new();
        dict.insert("Nested".to_string(), Object::Array(vec![Object::Real(0.5)]));
        let original = Object::Dictionary(dict);
        let bytes = {
            let mut out = Vec::new();
            serialize_object(&original, &mut out);
            out
        };
        let reparsed = crate::parser::parse_object(&bytes).unwrap().1;
        assert_eq!(reparsed, original);
    }
}
