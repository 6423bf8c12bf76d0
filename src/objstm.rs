//! Object streams (`/Type /ObjStm`).
//!
//! An object stream packs many small indirect objects into one compressed
//! stream body. The body starts with `/N` pairs of integers (object number,
//! byte offset relative to `/First`) followed by the serialized objects
//! themselves. A stream may extend another one via `/Extends`; resolution
//! falls through the chain when a number is not found locally.

use std::collections::HashMap;

use log::warn;

use crate::error::{Error, Result};
use crate::filters;
use crate::lexer::{self, Token};
use crate::object::{ContextId, Object, ObjectRef};
use crate::parser;

/// Objects per stream on the write side; a full packer rotates to a fresh
/// container.
pub const OBJECT_STREAM_CAPACITY: usize = 100;

/// Hard cap on `/N` when reading, against hostile headers.
const MAX_DECLARED_OBJECTS: i64 = 100_000;

/// A parsed object stream, ready to hand out its slots.
#[derive(Debug)]
pub struct ObjectStream {
    /// (object number, absolute offset into `body`) per slot, in slot order.
    slots: Vec<(u32, usize)>,
    /// Fully decoded body, header pairs included.
    body: Vec<u8>,
    /// Base stream this one extends, if any.
    extends: Option<u32>,
    /// Context objects parsed out of this stream belong to.
    ctx: ContextId,
}

impl ObjectStream {
    /// Parse the dictionary and raw body of a stream object known to be an
    /// object stream.
    pub fn parse(
        dict: &HashMap<String, Object>,
        data: &[u8],
        ctx: ContextId,
    ) -> Result<ObjectStream> {
        let count = dict
            .get("N")
            .and_then(Object::as_integer)
            .filter(|&n| (0..=MAX_DECLARED_OBJECTS).contains(&n))
            .ok_or_else(|| Error::syntax(0, "object stream missing or implausible /N"))?;
        let first = dict
            .get("First")
            .and_then(Object::as_integer)
            .filter(|&n| n >= 0)
            .ok_or_else(|| Error::syntax(0, "object stream missing /First"))? as usize;

        let extends = dict.get("Extends").and_then(|v| match v {
            Object::Reference(r) => Some(r.number),
            Object::Integer(n) if *n >= 0 => Some(*n as u32),
            _ => None,
        });

        let body = filters::decode_stream_body(dict, data)?;
        if first > body.len() {
            return Err(Error::syntax(0, "object stream /First past end of body"));
        }

        let mut slots = Vec::with_capacity(count as usize);
        let mut input = &body[..first];
        for _ in 0..count {
            let number = match lexer::token(input) {
                Ok((rest, Token::Integer(n))) if (0..=u32::MAX as i64).contains(&n) => {
                    input = rest;
                    n as u32
                },
                _ => return Err(Error::syntax(0, "malformed object stream header pair")),
            };
            let offset = match lexer::token(input) {
                Ok((rest, Token::Integer(n))) if n >= 0 => {
                    input = rest;
                    n as usize
                },
                _ => return Err(Error::syntax(0, "malformed object stream header pair")),
            };
            let absolute = first + offset;
            if absolute > body.len() {
                return Err(Error::syntax(0, "object stream slot offset past end of body"));
            }
            slots.push((number, absolute));
        }

        Ok(ObjectStream {
            slots,
            body,
            extends,
            ctx,
        })
    }

    /// Number of the base stream this one extends.
    pub fn extends(&self) -> Option<u32> {
        self.extends
    }

    /// Number of packed objects.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Whether the stream is empty.
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Parse the object stored under `number`, searching this stream only.
    pub fn find(&self, number: u32) -> Result<Option<Object>> {
        match self.slots.iter().find(|(n, _)| *n == number) {
            Some(&(_, offset)) => self.parse_at(offset).map(Some),
            None => Ok(None),
        }
    }

    /// Parse the object in slot `index`, verifying the expected number.
    pub fn object_at(&self, index: u16, expected: u32) -> Result<Option<Object>> {
        match self.slots.get(index as usize) {
            Some(&(number, offset)) => {
                if number != expected {
                    warn!(
                        "object stream slot {} holds {} where {} was expected",
                        index, number, expected
                    );
                    return self.find(expected);
                }
                self.parse_at(offset).map(Some)
            },
            None => self.find(expected),
        }
    }

    fn parse_at(&self, offset: usize) -> Result<Object> {
        let (_, object) = parser::parse_object_in(&self.body[offset..], self.ctx)
            .map_err(|e| parser::to_syntax(self.body.len(), e))?;
        Ok(object)
    }
}

/// Accumulates serialized objects and emits one object-stream object.
#[derive(Debug)]
pub struct ObjectStreamBuilder {
    entries: Vec<(u32, Vec<u8>)>,
    extends: Option<ObjectRef>,
}

impl ObjectStreamBuilder {
    /// Start an empty packer; `extends` names the base stream for an
    /// extension written during an incremental update.
    pub fn new(extends: Option<ObjectRef>) -> Self {
        Self {
            entries: Vec::new(),
            extends,
        }
    }

    /// Queue one serialized object body.
    pub fn push(&mut self, number: u32, serialized: Vec<u8>) {
        debug_assert!(!self.is_full());
        self.entries.push((number, serialized));
    }

    /// Whether the packer reached capacity and must be flushed.
    pub fn is_full(&self) -> bool {
        self.entries.len() >= OBJECT_STREAM_CAPACITY
    }

    /// Whether nothing has been queued.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Object numbers queued so far, in slot order.
    pub fn numbers(&self) -> impl Iterator<Item = u32> + '_ {
        self.entries.iter().map(|(n, _)| *n)
    }

    /// Build the stream object: header pairs, then the payloads, the whole
    /// body flate-compressed.
    pub fn build(&self) -> Result<Object> {
        let mut header = Vec::new();
        let mut payload = Vec::new();
        for (number, serialized) in &self.entries {
            header.extend_from_slice(format!("{} {} ", number, payload.len()).as_bytes());
            payload.extend_from_slice(serialized);
            payload.push(b'\n');
        }

        let first = header.len();
        let mut body = header;
        body.extend_from_slice(&payload);
        let packed = filters::flate_encode(&body)?;

        let mut dict = HashMap::new();
        dict.insert("Type".to_string(), Object::name("ObjStm"));
        dict.insert("N".to_string(), Object::Integer(self.entries.len() as i64));
        dict.insert("First".to_string(), Object::Integer(first as i64));
        dict.insert("Filter".to_string(), Object::name("FlateDecode"));
        if let Some(base) = self.extends {
            dict.insert("Extends".to_string(), Object::Reference(base));
        }
        Ok(Object::stream(dict, packed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(entries: &[(u32, &str)]) -> ObjectStream {
        let mut builder = ObjectStreamBuilder::new(None);
        for (number, text) in entries {
            builder.push(*number, text.as_bytes().to_vec());
        }
        let built = builder.build().unwrap();
        match built {
            Object::Stream { dict, data, .. } => {
                ObjectStream::parse(&dict, &data, ContextId::DETACHED).unwrap()
            },
            other => panic!("expected stream, got {}", other.type_name()),
        }
    }

    #[test]
    fn test_build_and_find() {
        let stream = round_trip(&[(4, "<< /Kind /A >>"), (9, "42"), (11, "(text)")]);
        assert_eq!(stream.len(), 3);
        assert_eq!(stream.find(9).unwrap(), Some(Object::Integer(42)));
        assert_eq!(stream.find(11).unwrap(), Some(Object::String(b"text".to_vec())));
        assert_eq!(stream.find(99).unwrap(), None);
    }

    #[test]
    fn test_object_at_verifies_number() {
        let stream = round_trip(&[(4, "1"), (9, "2")]);
        assert_eq!(stream.object_at(1, 9).unwrap(), Some(Object::Integer(2)));
        // Wrong expectation falls back to a search by number.
        assert_eq!(stream.object_at(0, 9).unwrap(), Some(Object::Integer(2)));
        assert_eq!(stream.object_at(7, 123).unwrap(), None);
    }

    #[test]
    fn test_extends_is_surfaced() {
        let mut builder = ObjectStreamBuilder::new(Some(ObjectRef::detached(30, 0)));
        builder.push(5, b"true".to_vec());
        let built = builder.build().unwrap();
        match built {
            Object::Stream { dict, data, .. } => {
                let stream = ObjectStream::parse(&dict, &data, ContextId::DETACHED).unwrap();
                assert_eq!(stream.extends(), Some(30));
            },
            other => panic!("expected stream, got {}", other.type_name()),
        }
    }

    #[test]
    fn test_capacity() {
        let mut builder = ObjectStreamBuilder::new(None);
        for i in 0..OBJECT_STREAM_CAPACITY as u32 {
            assert!(!builder.is_full());
            builder.push(i + 1, b"0".to_vec());
        }
        assert!(builder.is_full());
    }

    #[test]
    fn test_parse_rejects_bad_first() {
        let mut dict = HashMap::new();
        dict.insert("N".to_string(), Object::Integer(1));
        dict.insert("First".to_string(), Object::Integer(9999));
        assert!(ObjectStream::parse(&dict, b"1 0 42", ContextId::DETACHED).is_err());
    }

    #[test]
    fn test_parse_rejects_implausible_count() {
        let mut dict = HashMap::new();
        dict.insert("N".to_string(), Object::Integer(i64::MAX));
        dict.insert("First".to_string(), Object::Integer(0));
        assert!(ObjectStream::parse(&dict, b"", ContextId::DETACHED).is_err());
    }

    #[test]
    fn test_uncompressed_object_stream() {
        // No /Filter: the body is taken as-is.
        let body = b"3 0 7 3 (a) 99";
        let mut dict = HashMap::new();
        dict.insert("N".to_string(), Object::Integer(2));
        dict.insert("First".to_string(), Object::Integer(8));
        let stream = ObjectStream::parse(&dict, body, ContextId::DETACHED).unwrap();
        assert_eq!(stream.find(3).unwrap(), Some(Object::String(b"a".to_vec())));
        assert_eq!(stream.find(7).unwrap(), Some(Object::Integer(99)));
    }
}
