//! Grouping a content stream into structural constructs.
//!
//! Text blocks, local states, and marked-content sections have explicit end
//! operators and nest recursively. Paths have no end operator at all: a
//! path object runs until an operation that is neither path construction
//! nor painting appears after at least one painting operation, at which
//! point the cursor rewinds to just past the last path-related operation.
//! Inline images carry raw binary data and are cut out by scanning for
//! their terminator.

use std::collections::HashMap;

use log::warn;

use crate::error::{Error, Result};
use crate::lexer::{self, Token};
use crate::object::Object;
use crate::parser as file_parser;

use super::ops::Operation;

/// An inline image (`BI ... ID ... EI`): header entries plus the raw
/// sample data.
#[derive(Debug, Clone, PartialEq)]
pub struct InlineImage {
    /// Abbreviated image dictionary entries from between `BI` and `ID`.
    pub header: HashMap<String, Object>,
    /// Raw data between `ID` and the terminator, encoding untouched.
    pub data: Vec<u8>,
}

/// One structural element of a content stream.
#[derive(Debug, Clone, PartialEq)]
pub enum Content {
    /// Operation outside any path (state changes, text positioning at the
    /// top level, XObject paints, ...).
    Op(Operation),
    /// A path object: construction operations followed by its painting
    /// operations.
    Path(Vec<Operation>),
    /// `BT ... ET`
    Text(Vec<Content>),
    /// `q ... Q`
    LocalState(Vec<Content>),
    /// `BMC/BDC ... EMC`
    Marked {
        tag: String,
        properties: Option<Object>,
        body: Vec<Content>,
    },
    /// `BI ... ID ... EI`
    InlineImage(InlineImage),
}

/// Parse a whole content stream into its structural elements.
pub fn parse_content(data: &[u8]) -> Result<Vec<Content>> {
    ContentParser::new(data).parse_block(None)
}

/// Parse one operand: like a file-grammar value, but integers never start a
/// reference and dictionaries never grow stream bodies.
fn operand(input: &[u8]) -> nom::IResult<&[u8], Object> {
    let (rest, tok) = lexer::token(input)?;
    let fail = || nom::Err::Error(nom::error::Error::new(input, nom::error::ErrorKind::Alt));
    match tok {
        Token::Null => Ok((rest, Object::Null)),
        Token::True => Ok((rest, Object::Boolean(true))),
        Token::False => Ok((rest, Object::Boolean(false))),
        Token::Integer(i) => Ok((rest, Object::Integer(i))),
        Token::Real(r) => Ok((rest, Object::Real(r))),
        Token::LiteralString(raw) => Ok((
            rest,
            Object::String(file_parser::decode_literal_string(raw)),
        )),
        Token::HexString(raw) => Ok((rest, Object::String(file_parser::decode_hex_string(raw)))),
        Token::Name(name) => Ok((rest, Object::Name(name))),
        Token::ArrayBegin => {
            let mut input = rest;
            let mut items = Vec::new();
            loop {
                if let Ok((after, Token::ArrayEnd)) = lexer::token(input) {
                    return Ok((after, Object::Array(items)));
                }
                let (after, item) = operand(input)?;
                items.push(item);
                input = after;
            }
        },
        Token::DictBegin => {
            let mut input = rest;
            let mut dict = HashMap::new();
            loop {
                match lexer::token(input) {
                    Ok((after, Token::DictEnd)) => return Ok((after, Object::Dictionary(dict))),
                    Ok((after, Token::Name(key))) => {
                        let (after, value) = operand(after)?;
                        dict.insert(key, value);
                        input = after;
                    },
                    _ => return Err(fail()),
                }
            }
        },
        _ => Err(fail()),
    }
}

struct ContentParser<'a> {
    input: &'a [u8],
    pos: usize,
}

impl<'a> ContentParser<'a> {
    fn new(input: &'a [u8]) -> Self {
        Self { input, pos: 0 }
    }

    fn rest(&self) -> &'a [u8] {
        &self.input[self.pos..]
    }

    fn skip_ws(&mut self) {
        let rest = lexer::skip_ws(self.rest());
        self.pos = self.input.len() - rest.len();
    }

    /// Read a bare operator word at the cursor.
    fn read_word(&mut self) -> Result<String> {
        let rest = self.rest();
        let len = rest
            .iter()
            .take_while(|&&b| !lexer::is_regular_end(b))
            .count();
        if len == 0 {
            return Err(Error::syntax(
                self.pos,
                format!("unexpected delimiter {:?}", rest[0] as char),
            ));
        }
        self.pos += len;
        Ok(String::from_utf8_lossy(&rest[..len]).into_owned())
    }

    /// Collect operands up to the next operator word; `None` at end of
    /// stream.
    fn next_step(&mut self) -> Result<Option<(String, Vec<Object>)>> {
        let mut operands = Vec::new();
        loop {
            self.skip_ws();
            let Some(&byte) = self.input.get(self.pos) else {
                if !operands.is_empty() {
                    warn!("content stream ends with {} dangling operands", operands.len());
                }
                return Ok(None);
            };
            let operand_start = byte.is_ascii_digit()
                || matches!(byte, b'/' | b'(' | b'<' | b'[' | b'+' | b'-' | b'.');
            if operand_start {
                let (remaining, object) = operand(self.rest())
                    .map_err(|e| file_parser::to_syntax(self.input.len(), e))?;
                self.pos = self.input.len() - remaining.len();
                operands.push(object);
            } else {
                let word = self.read_word()?;
                match word.as_str() {
                    // Keyword operands, not operators.
                    "true" => operands.push(Object::Boolean(true)),
                    "false" => operands.push(Object::Boolean(false)),
                    "null" => operands.push(Object::Null),
                    _ => return Ok(Some((word, operands))),
                }
            }
        }
    }

    fn parse_block(&mut self, terminator: Option<&str>) -> Result<Vec<Content>> {
        let mut items = Vec::new();
        let mut path: Vec<Operation> = Vec::new();
        let mut painted = false;

        loop {
            let before = self.pos;
            let step = self.next_step()?;
            let Some((word, operands)) = step else {
                if !path.is_empty() {
                    items.push(Content::Path(path));
                }
                if let Some(t) = terminator {
                    warn!("content stream ended before {}", t);
                }
                return Ok(items);
            };

            let op = if word == "BI" {
                None
            } else {
                Some(Operation::build(&word, operands))
            };

            // Path boundary: anything that is not path-related, or a fresh
            // subpath after painting, ends the current path object. The
            // cursor rewinds so the triggering step is processed again.
            let continues_path = op
                .as_ref()
                .map(|o| o.is_path_construction() || o.is_painting())
                .unwrap_or(false);
            let starts_new_path = painted
                && op.as_ref().map(|o| o.is_path_construction()).unwrap_or(false);
            if !path.is_empty() && (!continues_path || starts_new_path) {
                self.pos = before;
                items.push(Content::Path(std::mem::take(&mut path)));
                painted = false;
                continue;
            }

            let Some(op) = op else {
                items.push(Content::InlineImage(self.parse_inline_image()?));
                continue;
            };

            if op.is_path_construction() {
                path.push(op);
                continue;
            }
            if op.is_painting() {
                painted = true;
                path.push(op);
                continue;
            }

            if terminator == Some(word.as_str()) {
                return Ok(items);
            }

            match op {
                Operation::BeginText => {
                    items.push(Content::Text(self.parse_block(Some("ET"))?));
                },
                Operation::SaveState => {
                    items.push(Content::LocalState(self.parse_block(Some("Q"))?));
                },
                Operation::BeginMarkedContent { tag, properties } => {
                    let body = self.parse_block(Some("EMC"))?;
                    items.push(Content::Marked {
                        tag,
                        properties,
                        body,
                    });
                },
                Operation::EndText | Operation::RestoreState | Operation::EndMarkedContent => {
                    return Err(Error::syntax(self.pos, format!("unbalanced {}", word)));
                },
                other => items.push(Content::Op(other)),
            }
        }
    }

    /// `BI` was consumed; parse the header pairs, then cut the raw data at
    /// the terminator: whitespace, `E`, `I`, then whitespace or end of
    /// stream. An `EI` embedded in the data without that framing is data.
    fn parse_inline_image(&mut self) -> Result<InlineImage> {
        let mut header = HashMap::new();
        loop {
            self.skip_ws();
            match self.input.get(self.pos) {
                None => {
                    return Err(Error::syntax(self.pos, "inline image header never reaches ID"));
                },
                Some(b'/') => {
                    let (remaining, key) = match lexer::token(self.rest()) {
                        Ok((remaining, Token::Name(key))) => (remaining, key),
                        _ => return Err(Error::syntax(self.pos, "bad inline image key")),
                    };
                    self.pos = self.input.len() - remaining.len();
                    let (remaining, value) = operand(self.rest())
                        .map_err(|e| file_parser::to_syntax(self.input.len(), e))?;
                    self.pos = self.input.len() - remaining.len();
                    header.insert(key, value);
                },
                Some(_) => {
                    let word = self.read_word()?;
                    if word == "ID" {
                        break;
                    }
                    return Err(Error::syntax(
                        self.pos,
                        format!("expected ID in inline image, found {}", word),
                    ));
                },
            }
        }

        // Exactly one whitespace byte separates ID from the data. It also
        // counts as the leading whitespace of a terminator that follows
        // immediately, so an empty payload still terminates.
        let scan_start = self.pos;
        if self
            .input
            .get(self.pos)
            .is_some_and(|&b| lexer::is_whitespace(b))
        {
            self.pos += 1;
        }
        let data_start = self.pos;

        let mut i = scan_start;
        while i + 2 < self.input.len() {
            let flanked = lexer::is_whitespace(self.input[i])
                && self.input[i + 1] == b'E'
                && self.input[i + 2] == b'I'
                && self
                    .input
                    .get(i + 3)
                    .map_or(true, |&b| lexer::is_whitespace(b));
            if flanked {
                // `i` sits on the separator itself when the payload is empty.
                let data = self.input[data_start..i.max(data_start)].to_vec();
                self.pos = i + 3;
                return Ok(InlineImage { header, data });
            }
            i += 1;
        }
        Err(Error::syntax(data_start, "inline image missing EI terminator"))
    }
}
