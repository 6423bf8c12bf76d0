//! Tokenizer shared by the file grammar and the content-stream grammar.
//!
//! Both grammars consume the same atomic tokens: numbers, literal and
//! hexadecimal strings, names, keywords, and the bracket delimiters. They
//! differ only in vocabulary, which lives in `parser` and `content`
//! respectively.
//!
//! Whitespace (space, tab, CR, LF, NUL, FF) and comments (`%` to end of
//! line) separate tokens and are skipped.

use nom::{
    IResult,
    branch::alt,
    bytes::complete::{tag, take_till, take_while},
    character::complete::{char, digit0, digit1, one_of},
    combinator::{map, opt, recognize, value},
    sequence::{pair, preceded, tuple},
};

/// Token types recognized by the tokenizer.
#[derive(Debug, PartialEq, Clone)]
pub enum Token<'a> {
    /// Integer number (`42`, `-123`).
    Integer(i64),
    /// Real number (`3.5`, `-.002`, `5.`).
    Real(f64),
    /// Raw bytes of a literal string `(...)`, escapes not yet decoded.
    LiteralString(&'a [u8]),
    /// Raw bytes of a hexadecimal string `<...>`, whitespace preserved.
    HexString(&'a [u8]),
    /// Name with `#XX` escapes decoded, leading `/` stripped.
    Name(String),
    /// `true` keyword.
    True,
    /// `false` keyword.
    False,
    /// `null` keyword.
    Null,
    /// `[`
    ArrayBegin,
    /// `]`
    ArrayEnd,
    /// `<<`
    DictBegin,
    /// `>>`
    DictEnd,
    /// `obj` keyword.
    ObjBegin,
    /// `endobj` keyword.
    ObjEnd,
    /// `stream` keyword.
    StreamBegin,
    /// `endstream` keyword.
    StreamEnd,
    /// `R` reference marker.
    RefMarker,
}

/// PDF whitespace byte (ISO 32000-1, Table 1).
pub(crate) fn is_whitespace(byte: u8) -> bool {
    matches!(byte, b'\0' | b'\t' | b'\n' | b'\x0C' | b'\r' | b' ')
}

/// PDF delimiter byte (ISO 32000-1, Table 2).
pub(crate) fn is_delimiter(byte: u8) -> bool {
    matches!(
        byte,
        b'(' | b')' | b'<' | b'>' | b'[' | b']' | b'{' | b'}' | b'/' | b'%'
    )
}

/// Whitespace or delimiter: the byte classes that end a bare token.
pub(crate) fn is_regular_end(byte: u8) -> bool {
    is_whitespace(byte) || is_delimiter(byte)
}

/// Skip whitespace and `%` comments; always succeeds.
pub fn skip_ws(mut input: &[u8]) -> &[u8] {
    loop {
        let trimmed = match input.iter().position(|&b| !is_whitespace(b)) {
            Some(n) => &input[n..],
            None => return &input[input.len()..],
        };
        if trimmed.first() == Some(&b'%') {
            let (rest, _) = take_till::<_, _, nom::error::Error<&[u8]>>(|c| {
                c == b'\r' || c == b'\n'
            })(trimmed)
            .unwrap_or((&trimmed[trimmed.len()..], trimmed));
            input = rest;
        } else {
            return trimmed;
        }
    }
}

fn fail(input: &[u8], kind: nom::error::ErrorKind) -> nom::Err<nom::error::Error<&[u8]>> {
    nom::Err::Error(nom::error::Error::new(input, kind))
}

/// An alphabetic keyword that must end at whitespace, a delimiter, or EOF.
/// Without the boundary check `endobj` would match the front of `endobjXY`.
fn bare_keyword<'a>(word: &'static [u8]) -> impl Fn(&'a [u8]) -> IResult<&'a [u8], &'a [u8]> {
    move |input: &'a [u8]| {
        let (rest, matched) = tag(word)(input)?;
        match rest.first() {
            Some(&b) if !is_regular_end(b) => Err(fail(input, nom::error::ErrorKind::Tag)),
            _ => Ok((rest, matched)),
        }
    }
}

/// Lex an integer or real number.
///
/// PDF allows a leading sign and a bare leading or trailing decimal point
/// (`.5`, `5.`, `-.002`).
fn lex_number(input: &[u8]) -> IResult<&[u8], Token<'_>> {
    let (rest, bytes) = recognize(tuple((
        opt(one_of("+-")),
        alt((
            recognize(pair(digit1, opt(pair(char('.'), digit0)))),
            recognize(pair(char('.'), digit1)),
        )),
    )))(input)?;

    // The recognized bytes are ASCII digits, sign and dot only.
    let text = std::str::from_utf8(bytes)
        .map_err(|_| fail(input, nom::error::ErrorKind::Digit))?;
    let token = if text.contains('.') {
        let real: f64 = text
            .trim_start_matches('+')
            .parse()
            .map_err(|_| fail(input, nom::error::ErrorKind::Float))?;
        Token::Real(real)
    } else {
        let int: i64 = text
            .trim_start_matches('+')
            .parse()
            .map_err(|_| fail(input, nom::error::ErrorKind::Digit))?;
        Token::Integer(int)
    };
    Ok((rest, token))
}

/// Lex a literal string enclosed in parentheses.
///
/// Tracks parenthesis depth so balanced nested parentheses stay inside the
/// string, and steps over backslash escapes (including 1-3 digit octal
/// escapes) so an escaped `)` does not close it. Escape decoding happens at
/// the parser level.
fn lex_literal_string(input: &[u8]) -> IResult<&[u8], Token<'_>> {
    let (body, _) = char('(')(input)?;
    let mut depth = 1usize;
    let mut pos = 0usize;

    while pos < body.len() {
        match body[pos] {
            b'\\' => {
                pos += 1;
                if pos < body.len() && body[pos].is_ascii_digit() {
                    // Up to three octal digits.
                    let mut digits = 0;
                    while digits < 3 && pos < body.len() && (b'0'..b'8').contains(&body[pos]) {
                        pos += 1;
                        digits += 1;
                    }
                } else {
                    pos += 1;
                }
            },
            b'(' => {
                depth += 1;
                pos += 1;
            },
            b')' => {
                depth -= 1;
                if depth == 0 {
                    return Ok((&body[pos + 1..], Token::LiteralString(&body[..pos])));
                }
                pos += 1;
            },
            _ => pos += 1,
        }
    }

    // Unbalanced parentheses.
    Err(fail(input, nom::error::ErrorKind::Tag))
}

/// Lex a hexadecimal string enclosed in single angle brackets.
fn lex_hex_string(input: &[u8]) -> IResult<&[u8], Token<'_>> {
    // `<<` opens a dictionary, not a hex string.
    if input.starts_with(b"<<") {
        return Err(fail(input, nom::error::ErrorKind::Tag));
    }
    let (rest, _) = char('<')(input)?;
    let (rest, body) = take_while(|c: u8| c.is_ascii_hexdigit() || is_whitespace(c))(rest)?;
    let (rest, _) = char('>')(rest)?;
    Ok((rest, Token::HexString(body)))
}

/// Decode `#XX` escape sequences in a raw name.
///
/// Invalid sequences keep the `#` literal, matching common reader behavior.
pub fn decode_name(raw: &[u8]) -> String {
    let mut bytes = Vec::with_capacity(raw.len());
    let mut i = 0;
    while i < raw.len() {
        if raw[i] == b'#' && i + 2 < raw.len() + 1 {
            let pair = raw.get(i + 1..i + 3);
            if let Some(hex) = pair {
                if let Ok(text) = std::str::from_utf8(hex) {
                    if let Ok(byte) = u8::from_str_radix(text, 16) {
                        bytes.push(byte);
                        i += 3;
                        continue;
                    }
                }
            }
        }
        bytes.push(raw[i]);
        i += 1;
    }
    String::from_utf8_lossy(&bytes).into_owned()
}

/// Lex a name starting with `/`.
fn lex_name(input: &[u8]) -> IResult<&[u8], Token<'_>> {
    preceded(
        char('/'),
        map(take_while(|c: u8| !is_regular_end(c)), |bytes: &[u8]| {
            Token::Name(decode_name(bytes))
        }),
    )(input)
}

/// Lex keywords and bracket delimiters.
fn lex_keyword(input: &[u8]) -> IResult<&[u8], Token<'_>> {
    alt((
        value(Token::True, bare_keyword(b"true")),
        value(Token::False, bare_keyword(b"false")),
        value(Token::Null, bare_keyword(b"null")),
        // `endstream` before `endobj` before `obj`; all share prefixes.
        value(Token::StreamEnd, bare_keyword(b"endstream")),
        value(Token::ObjEnd, bare_keyword(b"endobj")),
        value(Token::StreamBegin, bare_keyword(b"stream")),
        value(Token::ObjBegin, bare_keyword(b"obj")),
        value(Token::RefMarker, bare_keyword(b"R")),
        value(Token::DictBegin, tag(b"<<")),
        value(Token::DictEnd, tag(b">>")),
        value(Token::ArrayBegin, tag(b"[")),
        value(Token::ArrayEnd, tag(b"]")),
    ))(input)
}

/// Lex one token, skipping leading whitespace and comments.
pub fn token(input: &[u8]) -> IResult<&[u8], Token<'_>> {
    let input = skip_ws(input);
    alt((
        lex_keyword,
        lex_name,
        lex_number,
        lex_literal_string,
        lex_hex_string,
    ))(input)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_integers() {
        assert_eq!(token(b"42"), Ok((&b""[..], Token::Integer(42))));
        assert_eq!(token(b"-17"), Ok((&b""[..], Token::Integer(-17))));
        assert_eq!(token(b"+9"), Ok((&b""[..], Token::Integer(9))));
        assert_eq!(token(b"0"), Ok((&b""[..], Token::Integer(0))));
    }

    #[test]
    fn test_reals() {
        assert_eq!(token(b"1.5"), Ok((&b""[..], Token::Real(1.5))));
        assert_eq!(token(b"-.002"), Ok((&b""[..], Token::Real(-0.002))));
        assert_eq!(token(b".5"), Ok((&b""[..], Token::Real(0.5))));
        assert_eq!(token(b"5."), Ok((&b""[..], Token::Real(5.0))));
    }

    #[test]
    fn test_literal_string() {
        assert_eq!(token(b"(Hello)"), Ok((&b""[..], Token::LiteralString(b"Hello"))));
        assert_eq!(
            token(b"(a (nested) b)"),
            Ok((&b""[..], Token::LiteralString(b"a (nested) b")))
        );
        assert_eq!(
            token(b"(close \\) paren)"),
            Ok((&b""[..], Token::LiteralString(b"close \\) paren")))
        );
        assert_eq!(token(b"()"), Ok((&b""[..], Token::LiteralString(b""))));
    }

    #[test]
    fn test_literal_string_octal_escape_cannot_close() {
        // `\051` is an escaped `)`; the string must not end there.
        assert_eq!(
            token(b"(a\\051b)"),
            Ok((&b""[..], Token::LiteralString(b"a\\051b")))
        );
    }

    #[test]
    fn test_unbalanced_literal_string_fails() {
        assert!(token(b"(never closed").is_err());
    }

    #[test]
    fn test_hex_string() {
        assert_eq!(token(b"<48656C6C6F>"), Ok((&b""[..], Token::HexString(b"48656C6C6F"))));
        assert_eq!(token(b"<48 65>"), Ok((&b""[..], Token::HexString(b"48 65"))));
        assert_eq!(token(b"<>"), Ok((&b""[..], Token::HexString(b""))));
    }

    #[test]
    fn test_dict_begin_is_not_hex_string() {
        assert_eq!(token(b"<<"), Ok((&b""[..], Token::DictBegin)));
        assert_eq!(token(b">>"), Ok((&b""[..], Token::DictEnd)));
    }

    #[test]
    fn test_names() {
        assert_eq!(token(b"/Type"), Ok((&b""[..], Token::Name("Type".to_string()))));
        assert_eq!(token(b"/A#20B"), Ok((&b""[..], Token::Name("A B".to_string()))));
        assert_eq!(token(b"/A#ZZ"), Ok((&b""[..], Token::Name("A#ZZ".to_string()))));
        // Empty names are tolerated.
        assert_eq!(token(b"/ x"), Ok((&b" x"[..], Token::Name(String::new()))));
    }

    #[test]
    fn test_decode_name_edge_cases() {
        assert_eq!(decode_name(b"Plain"), "Plain");
        assert_eq!(decode_name(b"A#20B#23C"), "A B#C");
        assert_eq!(decode_name(b"A#"), "A#");
        assert_eq!(decode_name(b"A#2"), "A#2");
    }

    #[test]
    fn test_keywords() {
        assert_eq!(token(b"true"), Ok((&b""[..], Token::True)));
        assert_eq!(token(b"false"), Ok((&b""[..], Token::False)));
        assert_eq!(token(b"null"), Ok((&b""[..], Token::Null)));
        assert_eq!(token(b"obj"), Ok((&b""[..], Token::ObjBegin)));
        assert_eq!(token(b"endobj"), Ok((&b""[..], Token::ObjEnd)));
        assert_eq!(token(b"stream"), Ok((&b""[..], Token::StreamBegin)));
        assert_eq!(token(b"endstream"), Ok((&b""[..], Token::StreamEnd)));
        assert_eq!(token(b"R"), Ok((&b""[..], Token::RefMarker)));
    }

    #[test]
    fn test_keyword_boundary() {
        // A keyword glued to more regular characters is not that keyword.
        assert!(matches!(token(b"truex"), Err(_)) || !matches!(token(b"truex").unwrap().1, Token::True));
        // `R]` is a reference marker followed by an array end.
        assert_eq!(token(b"R]"), Ok((&b"]"[..], Token::RefMarker)));
    }

    #[test]
    fn test_whitespace_and_comments_skipped() {
        assert_eq!(token(b"  \r\n\t 42"), Ok((&b""[..], Token::Integer(42))));
        assert_eq!(token(b"% note\n% more\n7"), Ok((&b""[..], Token::Integer(7))));
    }

    #[test]
    fn test_token_sequence() {
        let mut input: &[u8] = b"12 0 obj << /Kind /Demo >> endobj";
        let expected = [
            Token::Integer(12),
            Token::Integer(0),
            Token::ObjBegin,
            Token::DictBegin,
            Token::Name("Kind".to_string()),
            Token::Name("Demo".to_string()),
            Token::DictEnd,
            Token::ObjEnd,
        ];
        for want in expected {
            let (rest, got) = token(input).unwrap();
            assert_eq!(got, want);
            input = rest;
        }
        assert!(skip_ws(input).is_empty());
    }
}
