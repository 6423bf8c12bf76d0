//! File-grammar parser: direct values, indirect records, stream bodies.
//!
//! Recursive descent over the tokens produced by [`crate::lexer`]. The one
//! ambiguity in the grammar, `N1 N2 R` versus a run of integers, is resolved
//! with a three-token lookahead that rolls the cursor back when the pattern
//! does not complete.

use std::collections::HashMap;

use log::warn;
use nom::IResult;

use crate::error::{Error, Result};
use crate::lexer::{self, Token};
use crate::object::{ContextId, Object, ObjectRef};

/// Convert a nom error into a crate error carrying the absolute byte offset
/// inside `source`.
pub(crate) fn to_syntax(source_len: usize, err: nom::Err<nom::error::Error<&[u8]>>) -> Error {
    match err {
        nom::Err::Error(e) | nom::Err::Failure(e) => {
            let offset = source_len - e.input.len();
            let preview: String = String::from_utf8_lossy(&e.input[..e.input.len().min(16)])
                .chars()
                .filter(|c| !c.is_control())
                .collect();
            Error::syntax(offset, preview)
        },
        nom::Err::Incomplete(_) => Error::syntax(source_len, "unexpected end of input"),
    }
}

fn nom_fail(input: &[u8]) -> nom::Err<nom::error::Error<&[u8]>> {
    nom::Err::Error(nom::error::Error::new(input, nom::error::ErrorKind::Alt))
}

/// Decode the escape sequences of a raw literal-string body.
///
/// Handles the named escapes, 1-3 digit octal escapes, line continuations
/// (backslash before EOL), and normalizes bare CR / CRLF to LF. An unknown
/// escape drops the backslash and keeps the character.
pub fn decode_literal_string(raw: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(raw.len());
    let mut i = 0;
    while i < raw.len() {
        match raw[i] {
            b'\\' if i + 1 < raw.len() => {
                i += 1;
                match raw[i] {
                    b'n' => out.push(b'\n'),
                    b'r' => out.push(b'\r'),
                    b't' => out.push(b'\t'),
                    b'b' => out.push(0x08),
                    b'f' => out.push(0x0C),
                    b'(' => out.push(b'('),
                    b')' => out.push(b')'),
                    b'\\' => out.push(b'\\'),
                    b'\r' => {
                        // Line continuation; swallow an optional LF too.
                        if raw.get(i + 1) == Some(&b'\n') {
                            i += 1;
                        }
                    },
                    b'\n' => {},
                    b'0'..=b'7' => {
                        let mut value: u16 = 0;
                        let mut digits = 0;
                        while digits < 3 && i < raw.len() && (b'0'..=b'7').contains(&raw[i]) {
                            value = value * 8 + (raw[i] - b'0') as u16;
                            i += 1;
                            digits += 1;
                        }
                        i -= 1;
                        out.push((value & 0xFF) as u8);
                    },
                    other => out.push(other),
                }
                i += 1;
            },
            b'\\' => i += 1,
            b'\r' => {
                out.push(b'\n');
                if raw.get(i + 1) == Some(&b'\n') {
                    i += 1;
                }
                i += 1;
            },
            byte => {
                out.push(byte);
                i += 1;
            },
        }
    }
    out
}

/// Decode a hex string body: whitespace ignored, odd final digit padded
/// with zero.
pub fn decode_hex_string(raw: &[u8]) -> Vec<u8> {
    let digits: Vec<u8> = raw
        .iter()
        .copied()
        .filter(|b| b.is_ascii_hexdigit())
        .collect();
    let mut out = Vec::with_capacity((digits.len() + 1) / 2);
    for pair in digits.chunks(2) {
        let hi = (pair[0] as char).to_digit(16).unwrap_or(0) as u8;
        let lo = if pair.len() == 2 {
            (pair[1] as char).to_digit(16).unwrap_or(0) as u8
        } else {
            0
        };
        out.push(hi << 4 | lo);
    }
    out
}

/// Parse one direct object (possibly a reference or a stream) bound to the
/// given document context.
pub fn parse_object_in(input: &[u8], ctx: ContextId) -> IResult<&[u8], Object> {
    let (rest, tok) = lexer::token(input)?;
    match tok {
        Token::Null => Ok((rest, Object::Null)),
        Token::True => Ok((rest, Object::Boolean(true))),
        Token::False => Ok((rest, Object::Boolean(false))),
        Token::Real(r) => Ok((rest, Object::Real(r))),
        Token::LiteralString(raw) => Ok((rest, Object::String(decode_literal_string(raw)))),
        Token::HexString(raw) => Ok((rest, Object::String(decode_hex_string(raw)))),
        Token::Name(name) => Ok((rest, Object::Name(name))),
        Token::Integer(first) => parse_maybe_reference(rest, first, ctx),
        Token::ArrayBegin => parse_array(rest, ctx),
        Token::DictBegin => {
            let (rest, dict) = parse_dict_entries(rest, ctx)?;
            parse_maybe_stream(rest, dict, None)
        },
        _ => Err(nom_fail(input)),
    }
}

/// Parse a detached direct object (no owning document).
pub fn parse_object(input: &[u8]) -> IResult<&[u8], Object> {
    parse_object_in(input, ContextId::DETACHED)
}

/// Three-token lookahead: `first` was an integer; if `G R` follows, the three
/// tokens collapse into a reference, otherwise the cursor rolls back and
/// `first` stands alone.
fn parse_maybe_reference(rest: &[u8], first: i64, ctx: ContextId) -> IResult<&[u8], Object> {
    if (0..=u32::MAX as i64).contains(&first) {
        if let Ok((r1, Token::Integer(gen))) = lexer::token(rest) {
            if (0..=u16::MAX as i64).contains(&gen) {
                if let Ok((r2, Token::RefMarker)) = lexer::token(r1) {
                    let reference = ObjectRef::new(first as u32, gen as u16, ctx);
                    return Ok((r2, Object::Reference(reference)));
                }
            }
        }
    }
    Ok((rest, Object::Integer(first)))
}

fn parse_array(mut input: &[u8], ctx: ContextId) -> IResult<&[u8], Object> {
    let mut items = Vec::new();
    loop {
        if let Ok((rest, Token::ArrayEnd)) = lexer::token(input) {
            return Ok((rest, Object::Array(items)));
        }
        let (rest, item) = parse_object_in(input, ctx)?;
        items.push(item);
        input = rest;
    }
}

fn parse_dict_entries(mut input: &[u8], ctx: ContextId) -> IResult<&[u8], HashMap<String, Object>> {
    let mut dict = HashMap::new();
    loop {
        let (rest, tok) = lexer::token(input)?;
        match tok {
            Token::DictEnd => return Ok((rest, dict)),
            Token::Name(key) => {
                let (rest, value) = parse_object_in(rest, ctx)?;
                dict.insert(key, value);
                input = rest;
            },
            _ => return Err(nom_fail(input)),
        }
    }
}

/// After a dictionary, a `stream` keyword turns it into a stream object.
///
/// The body is taken from the direct `/Length` (or the caller-resolved
/// `length_hint` when `/Length` is indirect) when that length lands exactly
/// on `endstream`; otherwise (missing or wrong length) the body ends at the
/// first `endstream` keyword found by scanning.
fn parse_maybe_stream(
    input: &[u8],
    dict: HashMap<String, Object>,
    length_hint: Option<usize>,
) -> IResult<&[u8], Object> {
    let after_kw = match lexer::token(input) {
        Ok((rest, Token::StreamBegin)) => rest,
        _ => return Ok((input, Object::Dictionary(dict))),
    };

    // Exactly one EOL after the keyword; CRLF, LF, or a lone CR from a
    // sloppy producer.
    let body = if after_kw.starts_with(b"\r\n") {
        &after_kw[2..]
    } else if after_kw.starts_with(b"\n") || after_kw.starts_with(b"\r") {
        &after_kw[1..]
    } else {
        after_kw
    };

    let declared = length_hint.or_else(|| {
        dict.get("Length")
            .and_then(Object::as_integer)
            .filter(|&n| n >= 0)
            .map(|n| n as usize)
    });

    let data_len = match declared {
        Some(n) if n <= body.len() && matches!(lexer::token(&body[n..]), Ok((_, Token::StreamEnd))) => n,
        declared => {
            if declared.is_some() {
                warn!("stream /Length does not land on endstream, scanning for it");
            }
            let at = body
                .windows(b"endstream".len())
                .position(|w| w == b"endstream")
                .ok_or_else(|| nom_fail(input))?;
            // The EOL before the keyword belongs to the syntax, not the body.
            let mut end = at;
            if end > 0 && body[end - 1] == b'\n' {
                end -= 1;
            }
            if end > 0 && body[end - 1] == b'\r' {
                end -= 1;
            }
            end
        },
    };

    let (rest, tok) = lexer::token(&body[data_len..])?;
    if tok != Token::StreamEnd {
        return Err(nom_fail(&body[data_len..]));
    }
    Ok((rest, Object::stream(dict, body[..data_len].to_vec())))
}

/// Top-level value of an indirect record. Only here can a stream appear,
/// so only here can an indirect `/Length` be resolved through the caller.
fn parse_top_value<'a>(
    input: &'a [u8],
    ctx: ContextId,
    resolve_length: &mut dyn FnMut(ObjectRef) -> Option<usize>,
) -> IResult<&'a [u8], Object> {
    match lexer::token(input) {
        Ok((rest, Token::DictBegin)) => {
            let (rest, dict) = parse_dict_entries(rest, ctx)?;
            let hint = dict
                .get("Length")
                .and_then(Object::as_reference)
                .and_then(|r| resolve_length(r));
            parse_maybe_stream(rest, dict, hint)
        },
        _ => parse_object_in(input, ctx),
    }
}

/// Parse the indirect record `N G obj <value> endobj` starting at `offset`.
///
/// Returns the declared number pair with the contained value. Used by the
/// lazy resolution path; offsets come from the cross-reference table.
pub fn parse_indirect(source: &[u8], offset: usize, ctx: ContextId) -> Result<(u32, u16, Object)> {
    parse_indirect_with(source, offset, ctx, &mut |_| None)
}

/// Like [`parse_indirect`], with a callback that resolves an indirect
/// `/Length` reference to a byte count before the stream body is cut.
pub(crate) fn parse_indirect_with(
    source: &[u8],
    offset: usize,
    ctx: ContextId,
    resolve_length: &mut dyn FnMut(ObjectRef) -> Option<usize>,
) -> Result<(u32, u16, Object)> {
    if offset >= source.len() {
        return Err(Error::syntax(offset, "offset past end of file"));
    }
    let input = &source[offset..];
    let convert = |e| to_syntax(source.len(), e);

    let (rest, number) = match lexer::token(input).map_err(convert)? {
        (rest, Token::Integer(n)) if (0..=u32::MAX as i64).contains(&n) => (rest, n as u32),
        (rest, tok) => {
            return Err(Error::syntax(
                source.len() - rest.len(),
                format!("expected object number, found {:?}", tok),
            ));
        },
    };
    let (rest, generation) = match lexer::token(rest).map_err(convert)? {
        (rest, Token::Integer(g)) if (0..=u16::MAX as i64).contains(&g) => (rest, g as u16),
        (rest, tok) => {
            return Err(Error::syntax(
                source.len() - rest.len(),
                format!("expected generation number, found {:?}", tok),
            ));
        },
    };
    let rest = match lexer::token(rest).map_err(convert)? {
        (rest, Token::ObjBegin) => rest,
        (rest, tok) => {
            return Err(Error::syntax(
                source.len() - rest.len(),
                format!("expected obj keyword, found {:?}", tok),
            ));
        },
    };

    let (rest, value) = parse_top_value(rest, ctx, resolve_length).map_err(convert)?;

    match lexer::token(rest) {
        Ok((_, Token::ObjEnd)) => {},
        _ => {
            return Err(Error::syntax(
                source.len() - rest.len(),
                "missing endobj",
            ));
        },
    }
    Ok((number, generation, value))
}
