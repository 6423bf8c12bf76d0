//! The document: an owning context for one PDF file.
//!
//! A `Document` holds the merged cross-reference table, the retained source
//! bytes, and a payload cache. Objects are parsed lazily on first
//! resolution; mutations accumulate in memory and reach disk only through
//! the save family. A failed save leaves the previous file intact.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::io::Write;
use std::path::{Path, PathBuf};

use bytes::Bytes;
use log::warn;
use tempfile::NamedTempFile;

use crate::error::{Error, Result};
use crate::object::{ContextId, Object, ObjectRef, StreamKind};
use crate::objstm::ObjectStream;
use crate::parser;
use crate::writer::{self, SaveMode, WriteOutcome};
use crate::xref::{FREE_HEAD_GENERATION, Usage, XRefEntry, XRefTable};

/// Cap on `/Extends` chains during compressed-object resolution.
const MAX_EXTENDS_DEPTH: usize = 32;

/// Declared file format version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Version {
    /// Major version, the `1` of `1.7`.
    pub major: u8,
    /// Minor version.
    pub minor: u8,
}

impl Version {
    /// Build a version pair.
    pub const fn new(major: u8, minor: u8) -> Self {
        Self { major, minor }
    }
}

impl Default for Version {
    fn default() -> Self {
        Version::new(1, 7)
    }
}

impl std::fmt::Display for Version {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

/// One open PDF document.
#[derive(Debug)]
pub struct Document {
    pub(crate) context: ContextId,
    pub(crate) version: Version,
    /// Bytes of the last committed revision; `None` for fresh documents.
    pub(crate) source: Option<Bytes>,
    pub(crate) source_start_xref: u64,
    pub(crate) path: Option<PathBuf>,
    pub(crate) entries: BTreeMap<u32, XRefEntry>,
    /// Payloads resolved or registered so far, by object number.
    pub(crate) cache: HashMap<u32, Object>,
    /// Numbers dirtied since the last commit.
    pub(crate) updated: BTreeSet<u32>,
    pub(crate) trailer: HashMap<String, Object>,
    /// Next number `register` hands out; never reused, even after deletes.
    pub(crate) next_number: u32,
}

fn free_head() -> XRefEntry {
    XRefEntry {
        number: 0,
        generation: FREE_HEAD_GENERATION,
        usage: Usage::Free { next_free: 0 },
    }
}

/// Parse the `%PDF-M.m` header.
fn parse_header(bytes: &[u8]) -> Result<Version> {
    let rest = bytes
        .strip_prefix(b"%PDF-")
        .ok_or_else(|| Error::syntax(0, "missing %PDF header"))?;
    let major_len = rest.iter().take_while(|b| b.is_ascii_digit()).count();
    if major_len == 0 || rest.get(major_len) != Some(&b'.') {
        return Err(Error::syntax(5, "malformed version in header"));
    }
    let minor_start = major_len + 1;
    let minor_len = rest[minor_start..]
        .iter()
        .take_while(|b| b.is_ascii_digit())
        .count();
    if minor_len == 0 {
        return Err(Error::syntax(5, "malformed version in header"));
    }
    let digits = |slice: &[u8]| -> u8 {
        std::str::from_utf8(slice)
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(u8::MAX)
    };
    Ok(Version::new(
        digits(&rest[..major_len]),
        digits(&rest[minor_start..minor_start + minor_len]),
    ))
}

impl Document {
    /// Create an empty document declaring the given version.
    pub fn new(version: Version) -> Document {
        let mut entries = BTreeMap::new();
        entries.insert(0, free_head());
        Document {
            context: ContextId::mint(),
            version,
            source: None,
            source_start_xref: 0,
            path: None,
            entries,
            cache: HashMap::new(),
            updated: BTreeSet::new(),
            trailer: HashMap::new(),
            next_number: 1,
        }
    }

    /// Open a document from a file on disk.
    pub fn open(path: impl AsRef<Path>) -> Result<Document> {
        let bytes = std::fs::read(path.as_ref())?;
        let mut doc = Self::from_bytes(bytes)?;
        doc.path = Some(path.as_ref().to_path_buf());
        Ok(doc)
    }

    /// Open a document from an in-memory byte image.
    ///
    /// Encrypted files are rejected up front with [`Error::Unsupported`].
    pub fn from_bytes(bytes: impl Into<Bytes>) -> Result<Document> {
        let source: Bytes = bytes.into();
        let version = parse_header(&source)?;
        let context = ContextId::mint();
        let (table, start_xref) = XRefTable::load(&source, context)?;

        if table.trailer.contains_key("Encrypt") {
            return Err(Error::Unsupported("encrypted document".to_string()));
        }

        let mut entries = table.entries;
        entries.entry(0).or_insert_with(free_head);

        // The merged trailer carries the cross-reference stream's own
        // plumbing keys; only document-level fields survive.
        let mut trailer = table.trailer;
        for key in ["Type", "W", "Index", "Filter", "DecodeParms", "Length", "XRefStm"] {
            trailer.remove(key);
        }

        let from_size = trailer
            .get("Size")
            .and_then(Object::as_integer)
            .filter(|&n| n > 0)
            .map(|n| n as u32)
            .unwrap_or(0);
        let from_table = entries.keys().max().map(|&m| m + 1).unwrap_or(1);
        let next_number = from_size.max(from_table).max(1);

        Ok(Document {
            context,
            version,
            source: Some(source),
            source_start_xref: start_xref,
            path: None,
            entries,
            cache: HashMap::new(),
            updated: BTreeSet::new(),
            trailer,
            next_number,
        })
    }

    /// Declared version.
    pub fn version(&self) -> Version {
        self.version
    }

    /// Change the declared version; takes effect on the next full save.
    pub fn set_version(&mut self, version: Version) {
        self.version = version;
    }

    /// Highest object number handed out so far.
    pub fn max_number(&self) -> u32 {
        self.next_number.saturating_sub(1)
    }

    /// The trailer dictionary (root, info, identifier).
    pub fn trailer(&self) -> &HashMap<String, Object> {
        &self.trailer
    }

    /// Reference to the document catalog, if set.
    pub fn root(&self) -> Option<ObjectRef> {
        self.trailer.get("Root").and_then(Object::as_reference)
    }

    /// Point the trailer's `/Root` at the catalog object.
    pub fn set_root(&mut self, root: ObjectRef) {
        self.trailer.insert("Root".to_string(), Object::Reference(root));
    }

    /// Point the trailer's `/Info` at the information dictionary.
    pub fn set_info(&mut self, info: ObjectRef) {
        self.trailer.insert("Info".to_string(), Object::Reference(info));
    }

    /// Iterate the cross-reference entries of the last committed revision.
    pub fn xref_entries(&self) -> impl Iterator<Item = &XRefEntry> {
        self.entries.values()
    }

    /// Build a reference to an existing live object number.
    pub fn reference(&self, number: u32) -> Option<ObjectRef> {
        if let Some(entry) = self.entries.get(&number) {
            if matches!(entry.usage, Usage::Free { .. }) && !self.cache.contains_key(&number) {
                return None;
            }
            return Some(ObjectRef::new(number, entry.generation, self.context));
        }
        if self.cache.contains_key(&number) {
            return Some(ObjectRef::new(number, 0, self.context));
        }
        None
    }

    /// Add a new indirect object; returns its reference.
    ///
    /// The object stays virtual (memory only) until a write pass
    /// materializes it.
    pub fn register(&mut self, object: Object) -> ObjectRef {
        let number = self.next_number;
        self.next_number += 1;
        self.cache.insert(number, object);
        self.updated.insert(number);
        ObjectRef::new(number, 0, self.context)
    }

    fn check_reference(&self, reference: ObjectRef) -> Result<()> {
        if reference.context != self.context && reference.context != ContextId::DETACHED {
            return Err(Error::ForeignReference {
                number: reference.number,
                generation: reference.generation,
            });
        }
        let broken = Error::BrokenReference {
            number: reference.number,
            generation: reference.generation,
        };
        match self.entries.get(&reference.number) {
            Some(entry) => {
                if matches!(entry.usage, Usage::Free { .. }) && !self.cache.contains_key(&reference.number) {
                    return Err(broken);
                }
                if entry.generation != reference.generation
                    && !matches!(entry.usage, Usage::Free { .. })
                {
                    return Err(broken);
                }
            },
            None => {
                if !self.cache.contains_key(&reference.number) {
                    return Err(broken);
                }
                if reference.generation != 0 {
                    return Err(broken);
                }
            },
        }
        Ok(())
    }

    /// Resolve a reference to its payload.
    ///
    /// Lazy: the referenced bytes are parsed on first access and cached.
    /// A reference from another document fails with
    /// [`Error::ForeignReference`]; cloning is the sanctioned path across
    /// documents.
    pub fn resolve(&mut self, reference: ObjectRef) -> Result<Object> {
        self.check_reference(reference)?;
        self.payload(reference.number)
    }

    /// Resolve a value that may be a reference; direct values pass through.
    pub fn resolved(&mut self, value: &Object) -> Result<Object> {
        match value {
            Object::Reference(r) => self.resolve(*r),
            other => Ok(other.clone()),
        }
    }

    /// Replace the payload of an existing object.
    pub fn update(&mut self, reference: ObjectRef, object: Object) -> Result<()> {
        self.check_reference(reference)?;
        self.cache.insert(reference.number, object);
        self.updated.insert(reference.number);
        Ok(())
    }

    /// Remove an object, freeing its slot.
    ///
    /// The slot's generation increments so stale references can never
    /// resolve to a later occupant; numbers are not reused by `register`.
    pub fn delete(&mut self, reference: ObjectRef) -> Result<()> {
        self.check_reference(reference)?;
        let generation = self
            .entries
            .get(&reference.number)
            .map(|e| e.generation)
            .unwrap_or(reference.generation);
        self.cache.remove(&reference.number);
        self.entries.insert(reference.number, XRefEntry {
            number: reference.number,
            generation: generation.saturating_add(1),
            usage: Usage::Free { next_free: 0 },
        });
        self.updated.insert(reference.number);
        Ok(())
    }

    /// Fetch the payload of an object number, parsing lazily, without the
    /// reference validity checks of `resolve`.
    pub(crate) fn payload(&mut self, number: u32) -> Result<Object> {
        if let Some(object) = self.cache.get(&number) {
            return Ok(object.clone());
        }
        let broken = |generation| Error::BrokenReference { number, generation };
        let entry = *self
            .entries
            .get(&number)
            .ok_or_else(|| broken(0))?;
        match entry.usage {
            Usage::Free { .. } => Err(broken(entry.generation)),
            Usage::InUse { offset } => {
                let source = self.source.clone().ok_or_else(|| broken(entry.generation))?;
                let ctx = self.context;
                let (found, _, object) = parser::parse_indirect_with(
                    &source,
                    offset as usize,
                    ctx,
                    &mut |r| self.indirect_stream_length(r),
                )?;
                if found != number {
                    warn!("record at offset {} declares {} instead of {}", offset, found, number);
                }
                self.cache.insert(number, object.clone());
                Ok(object)
            },
            Usage::InUseCompressed { container, index } => {
                let object = self.compressed_payload(number, container, Some(index))?;
                self.cache.insert(number, object.clone());
                Ok(object)
            },
        }
    }

    /// Look a number up in a container stream, falling through `/Extends`
    /// links until found.
    fn compressed_payload(
        &mut self,
        number: u32,
        container: u32,
        index: Option<u16>,
    ) -> Result<Object> {
        let mut container = container;
        let mut index = index;
        for _ in 0..MAX_EXTENDS_DEPTH {
            let payload = self.payload(container)?;
            let stream = match payload {
                Object::Stream {
                    dict,
                    data,
                    kind: StreamKind::ObjectStream,
                } => ObjectStream::parse(&dict, &data, self.context)?,
                other => {
                    return Err(Error::syntax(
                        0,
                        format!("container {} is {}, not an object stream", container, other.type_name()),
                    ));
                },
            };
            let found = match index.take() {
                Some(i) => stream.object_at(i, number)?,
                None => stream.find(number)?,
            };
            if let Some(object) = found {
                return Ok(object);
            }
            match stream.extends() {
                Some(base) => container = base,
                None => break,
            }
        }
        Err(Error::BrokenReference {
            number,
            generation: 0,
        })
    }

    /// Resolve an indirect `/Length` target to a byte count.
    ///
    /// Only cached values and plain inline records are consulted; anything
    /// else (free, compressed, foreign) leaves the scan fallback in charge.
    fn indirect_stream_length(&mut self, reference: ObjectRef) -> Option<usize> {
        if reference.context != self.context && reference.context != ContextId::DETACHED {
            return None;
        }
        if let Some(object) = self.cache.get(&reference.number) {
            return object.as_integer().filter(|&n| n >= 0).map(|n| n as usize);
        }
        let entry = *self.entries.get(&reference.number)?;
        let Usage::InUse { offset } = entry.usage else {
            return None;
        };
        let source = self.source.clone()?;
        let (_, _, object) = parser::parse_indirect(&source, offset as usize, self.context).ok()?;
        let length = object.as_integer().filter(|&n| n >= 0).map(|n| n as usize);
        self.cache.insert(reference.number, object);
        length
    }

    fn commit(&mut self, outcome: WriteOutcome) {
        for (number, entry) in &outcome.entries {
            if matches!(entry.usage, Usage::Free { .. }) {
                self.cache.remove(number);
            }
        }
        self.entries = outcome.entries;
        self.trailer = outcome.trailer;
        self.source_start_xref = outcome.start_xref;
        self.next_number = outcome.next_number;
        self.source = Some(Bytes::from(outcome.buf));
        self.updated.clear();
    }

    /// Save to the backing path.
    ///
    /// The bytes land in a temporary file beside the target first; the
    /// original is replaced only after the whole write succeeded.
    pub fn save(&mut self, mode: SaveMode) -> Result<()> {
        let path = self.path.clone().ok_or_else(|| {
            Error::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "document has no backing path, use save_as",
            ))
        })?;
        self.save_as(path, mode)
    }

    /// Save to a new path, which becomes the backing path.
    pub fn save_as(&mut self, path: impl AsRef<Path>, mode: SaveMode) -> Result<()> {
        let outcome = writer::write(self, mode)?;
        let path = path.as_ref();
        let dir = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        let mut tmp = NamedTempFile::new_in(dir)?;
        tmp.write_all(&outcome.buf)?;
        tmp.persist(path).map_err(|e| Error::Io(e.error))?;
        self.path = Some(path.to_path_buf());
        self.commit(outcome);
        Ok(())
    }

    /// Save to an arbitrary writer.
    pub fn save_to(&mut self, sink: &mut impl Write, mode: SaveMode) -> Result<()> {
        let outcome = writer::write(self, mode)?;
        sink.write_all(&outcome.buf)?;
        self.commit(outcome);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_display() {
        assert_eq!(format!("{}", Version::new(1, 7)), "1.7");
        assert_eq!(format!("{}", Version::new(2, 0)), "2.0");
    }

    #[test]
    fn test_parse_header() {
        assert_eq!(parse_header(b"%PDF-1.4\nrest").unwrap(), Version::new(1, 4));
        assert_eq!(parse_header(b"%PDF-2.0").unwrap(), Version::new(2, 0));
        assert!(parse_header(b"PDF-1.4").is_err());
        assert!(parse_header(b"%PDF-x.4").is_err());
    }

    #[test]
    fn test_register_and_resolve() {
        let mut doc = Document::new(Version::default());
        let r = doc.register(Object::Integer(5));
        assert_eq!(r.number, 1);
        assert_eq!(r.generation, 0);
        assert_eq!(doc.resolve(r).unwrap(), Object::Integer(5));
    }

    #[test]
    fn test_register_numbers_are_sequential() {
        let mut doc = Document::new(Version::default());
        assert_eq!(doc.register(Object::Null).number, 1);
        assert_eq!(doc.register(Object::Null).number, 2);
        assert_eq!(doc.max_number(), 2);
    }

    #[test]
    fn test_update_replaces_payload() {
        let mut doc = Document::new(Version::default());
        let r = doc.register(Object::Integer(1));
        doc.update(r, Object::Integer(2)).unwrap();
        assert_eq!(doc.resolve(r).unwrap(), Object::Integer(2));
    }

    #[test]
    fn test_resolve_unknown_is_broken() {
        let mut doc = Document::new(Version::default());
        let bogus = ObjectRef::new(99, 0, doc.context);
        assert!(matches!(
            doc.resolve(bogus).unwrap_err(),
            Error::BrokenReference { number: 99, .. }
        ));
    }

    #[test]
    fn test_resolve_foreign_reference() {
        let mut a = Document::new(Version::default());
        let mut b = Document::new(Version::default());
        let r = b.register(Object::Integer(1));
        assert!(matches!(
            a.resolve(r).unwrap_err(),
            Error::ForeignReference { number, .. } if number == r.number
        ));
    }

    #[test]
    fn test_indirect_stream_length_resolves_before_scan() {
        // The body contains `endstream` bytes; only the referenced length
        // object cuts it at the declared 13 bytes.
        let mut buf = Vec::new();
        buf.extend_from_slice(b"%PDF-1.4\n");
        let o1 = buf.len();
        buf.extend_from_slice(
            b"1 0 obj\n<< /Length 2 0 R >>\nstream\nx endstream y\nendstream\nendobj\n",
        );
        let o2 = buf.len();
        buf.extend_from_slice(b"2 0 obj\n13\nendobj\n");
        let xref = buf.len();
        buf.extend_from_slice(b"xref\n0 3\n0000000000 65535 f \n");
        buf.extend_from_slice(format!("{:010} 00000 n \n{:010} 00000 n \n", o1, o2).as_bytes());
        buf.extend_from_slice(b"trailer\n<< /Size 3 >>\nstartxref\n");
        buf.extend_from_slice(format!("{}\n%%EOF\n", xref).as_bytes());

        let mut doc = Document::from_bytes(buf).unwrap();
        let r = doc.reference(1).unwrap();
        match doc.resolve(r).unwrap() {
            Object::Stream { data, .. } => assert_eq!(&data[..], b"x endstream y"),
            other => panic!("expected stream, got {:?}", other),
        }
    }

    #[test]
    fn test_delete_frees_and_bumps_generation() {
        let mut doc = Document::new(Version::default());
        let r = doc.register(Object::Integer(1));
        doc.delete(r).unwrap();
        assert!(matches!(
            doc.resolve(r).unwrap_err(),
            Error::BrokenReference { .. }
        ));
        let entry = doc.entries[&r.number];
        assert!(matches!(entry.usage, Usage::Free { .. }));
        assert_eq!(entry.generation, 1);
        // Deleted numbers are never handed out again.
        assert_eq!(doc.register(Object::Null).number, r.number + 1);
    }

    #[test]
    fn test_resolved_passes_direct_values() {
        let mut doc = Document::new(Version::default());
        assert_eq!(doc.resolved(&Object::Integer(3)).unwrap(), Object::Integer(3));
        let r = doc.register(Object::Boolean(true));
        assert_eq!(
            doc.resolved(&Object::Reference(r)).unwrap(),
            Object::Boolean(true)
        );
    }

    #[test]
    fn test_set_root() {
        let mut doc = Document::new(Version::default());
        let root = doc.register(Object::Dictionary(HashMap::new()));
        doc.set_root(root);
        assert_eq!(doc.root(), Some(root));
    }

    #[test]
    fn test_save_without_path_fails() {
        let mut doc = Document::new(Version::default());
        assert!(matches!(doc.save(SaveMode::Standard).unwrap_err(), Error::Io(_)));
    }

    #[test]
    fn test_linearized_rejected() {
        let mut doc = Document::new(Version::default());
        let mut sink = Vec::new();
        assert!(matches!(
            doc.save_to(&mut sink, SaveMode::Linearized).unwrap_err(),
            Error::Unsupported(_)
        ));
        assert!(sink.is_empty());
    }
}
