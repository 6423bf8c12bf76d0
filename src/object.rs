//! PDF object types.
//!
//! The object model is a closed tagged variant: every value a document can
//! hold is one of the [`Object`] cases. Composite values (arrays,
//! dictionaries, streams) may contain [`ObjectRef`] elements pointing at
//! numbered indirect objects; a reference never owns its target and is only
//! meaningful relative to one document context.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// Identity of a document context.
///
/// References are structurally equal only when they belong to the same
/// context. Ids are minted from a process-local monotonic counter; there is
/// no global mutable seed involved in hashing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContextId(u64);

impl ContextId {
    /// Context of objects parsed outside any document (content streams,
    /// standalone fragments).
    pub const DETACHED: ContextId = ContextId(0);

    pub(crate) fn mint() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        ContextId(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

/// Reference to an indirect object: `(object number, generation number)`
/// plus the owning context.
///
/// Two references are equal iff they share the context and the number pair,
/// even when they are distinct in-memory instances.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObjectRef {
    /// Object number.
    pub number: u32,
    /// Generation number.
    pub generation: u16,
    /// Owning document context.
    pub context: ContextId,
}

impl ObjectRef {
    /// Create a reference bound to a context.
    pub fn new(number: u32, generation: u16, context: ContextId) -> Self {
        Self {
            number,
            generation,
            context,
        }
    }

    /// Create a reference with no owning context.
    pub fn detached(number: u32, generation: u16) -> Self {
        Self::new(number, generation, ContextId::DETACHED)
    }
}

impl std::fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {} R", self.number, self.generation)
    }
}

/// Stream subtype, decided at parse time from the stream dictionary's
/// declared `/Type` name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StreamKind {
    /// Ordinary stream (content, images, fonts, ...).
    #[default]
    Plain,
    /// Object stream container (`/Type /ObjStm`).
    ObjectStream,
    /// Cross-reference stream (`/Type /XRef`).
    XRef,
}

impl StreamKind {
    /// Classify a stream dictionary by its `/Type` name.
    pub fn from_dict(dict: &HashMap<String, Object>) -> Self {
        match dict.get("Type").and_then(Object::as_name) {
            Some("ObjStm") => StreamKind::ObjectStream,
            Some("XRef") => StreamKind::XRef,
            _ => StreamKind::Plain,
        }
    }
}

/// A direct PDF value.
#[derive(Debug, Clone, PartialEq)]
pub enum Object {
    /// Null object.
    Null,
    /// Boolean value.
    Boolean(bool),
    /// Integer value.
    Integer(i64),
    /// Real (floating-point) value.
    Real(f64),
    /// String (byte array, escape sequences already decoded).
    String(Vec<u8>),
    /// Name (without the leading `/`, `#XX` escapes decoded).
    Name(String),
    /// Array of objects.
    Array(Vec<Object>),
    /// Dictionary of name to object.
    Dictionary(HashMap<String, Object>),
    /// Stream: dictionary plus raw byte body.
    Stream {
        /// Stream dictionary.
        dict: HashMap<String, Object>,
        /// Raw (still encoded) body bytes.
        data: bytes::Bytes,
        /// Subtype, from the dictionary's `/Type`.
        kind: StreamKind,
    },
    /// Indirect object reference.
    Reference(ObjectRef),
}

impl Object {
    /// Build a plain stream object, classifying its kind from the dictionary.
    pub fn stream(dict: HashMap<String, Object>, data: impl Into<bytes::Bytes>) -> Self {
        let kind = StreamKind::from_dict(&dict);
        Object::Stream {
            dict,
            data: data.into(),
            kind,
        }
    }

    /// Build a name object.
    pub fn name(s: impl Into<String>) -> Self {
        Object::Name(s.into())
    }

    /// Build a string object from text.
    pub fn text(s: impl AsRef<str>) -> Self {
        Object::String(s.as_ref().as_bytes().to_vec())
    }

    /// Human-readable type name, without data.
    pub fn type_name(&self) -> &'static str {
        match self {
            Object::Null => "Null",
            Object::Boolean(_) => "Boolean",
            Object::Integer(_) => "Integer",
            Object::Real(_) => "Real",
            Object::String(_) => "String",
            Object::Name(_) => "Name",
            Object::Array(_) => "Array",
            Object::Dictionary(_) => "Dictionary",
            Object::Stream { .. } => "Stream",
            Object::Reference(_) => "Reference",
        }
    }

    /// Try to cast to integer.
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Object::Integer(i) => Some(*i),
            _ => None,
        }
    }

    /// Try to cast to a number (integer or real).
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Object::Integer(i) => Some(*i as f64),
            Object::Real(r) => Some(*r),
            _ => None,
        }
    }

    /// Try to cast to name.
    pub fn as_name(&self) -> Option<&str> {
        match self {
            Object::Name(s) => Some(s),
            _ => None,
        }
    }

    /// Try to cast to string bytes.
    pub fn as_string(&self) -> Option<&[u8]> {
        match self {
            Object::String(s) => Some(s),
            _ => None,
        }
    }

    /// Try to cast to boolean.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Object::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    /// Try to cast to array.
    pub fn as_array(&self) -> Option<&[Object]> {
        match self {
            Object::Array(a) => Some(a),
            _ => None,
        }
    }

    /// Try to cast to dictionary. Stream objects expose their dictionary too.
    pub fn as_dict(&self) -> Option<&HashMap<String, Object>> {
        match self {
            Object::Dictionary(d) => Some(d),
            Object::Stream { dict, .. } => Some(dict),
            _ => None,
        }
    }

    /// Mutable dictionary access (dictionaries and streams).
    pub fn as_dict_mut(&mut self) -> Option<&mut HashMap<String, Object>> {
        match self {
            Object::Dictionary(d) => Some(d),
            Object::Stream { dict, .. } => Some(dict),
            _ => None,
        }
    }

    /// Try to cast to reference.
    pub fn as_reference(&self) -> Option<ObjectRef> {
        match self {
            Object::Reference(r) => Some(*r),
            _ => None,
        }
    }

    /// Check whether this is the null object.
    pub fn is_null(&self) -> bool {
        matches!(self, Object::Null)
    }
}
