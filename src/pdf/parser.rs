//! PDF object parser.
//!
//! Recursive descent over lexer tokens: read a token, decide the object kind,
//! and recurse for arrays and dictionaries. All functions return nom's
//! `IResult`.

use nom::IResult;

use super::error::{PdfError, Result};
use super::lexer::{token, Token};
use super::object::{Dictionary, Object, ObjectRef};

fn nom_error(input: &[u8], kind: nom::error::ErrorKind) -> nom::Err<nom::error::Error<&[u8]>> {
    nom::Err::Error(nom::error::Error::new(input, kind))
}

/// Decode escape sequences in PDF literal strings.
///
/// Handles `\n \r \t \b \f \( \) \\`, octal `\ddd` and line continuations.
/// Unknown escapes keep the backslash.
pub fn decode_literal_string_escapes(raw: &[u8]) -> Vec<u8> {
    let mut result = Vec::with_capacity(raw.len());
    let mut i = 0;

    while i < raw.len() {
        if raw[i] != b'\\' || i + 1 >= raw.len() {
            result.push(raw[i]);
            i += 1;
            continue;
        }

        match raw[i + 1] {
            b'n' => result.push(b'\n'),
            b'r' => result.push(b'\r'),
            b't' => result.push(b'\t'),
            b'b' => result.push(8),
            b'f' => result.push(12),
            b'(' => result.push(b'('),
            b')' => result.push(b')'),
            b'\\' => result.push(b'\\'),
            b'\n' => {},
            b'\r' => {
                if raw.get(i + 2) == Some(&b'\n') {
                    i += 1;
                }
            },
            b'0'..=b'7' => {
                let mut octal = 0u32;
                let mut len = 0;
                while len < 3 {
                    match raw.get(i + 1 + len) {
                        Some(&d) if (b'0'..=b'7').contains(&d) => {
                            octal = octal * 8 + u32::from(d - b'0');
                            len += 1;
                        },
                        _ => break,
                    }
                }
                result.push((octal & 0xFF) as u8);
                i += 1 + len;
                continue;
            },
            _ => {
                result.push(b'\\');
                i += 1;
                continue;
            },
        }
        i += 2;
    }

    result
}

/// Parse a PDF object from input bytes.
///
/// Handles primitives, arrays, dictionaries, streams and indirect references.
pub fn parse_object(input: &[u8]) -> IResult<&[u8], Object> {
    let (input, tok) = token(input)?;

    match tok {
        Token::Null => Ok((input, Object::Null)),
        Token::True => Ok((input, Object::Boolean(true))),
        Token::False => Ok((input, Object::Boolean(false))),

        Token::Integer(i) => {
            // "id gen R" is a reference; anything else is a plain integer
            if let Ok((input2, Token::Integer(gen))) = token(input) {
                if let Ok((input3, Token::R)) = token(input2) {
                    if let (Ok(id), Ok(gen)) = (u32::try_from(i), u16::try_from(gen)) {
                        return Ok((input3, Object::Reference(ObjectRef::new(id, gen))));
                    }
                }
            }
            Ok((input, Object::Integer(i)))
        },

        Token::Real(r) => Ok((input, Object::Real(r))),

        Token::LiteralString(bytes) => {
            Ok((input, Object::String(decode_literal_string_escapes(bytes))))
        },

        Token::HexString(hex_bytes) => match decode_hex(hex_bytes) {
            Ok(decoded) => Ok((input, Object::String(decoded))),
            Err(_) => Err(nom::Err::Failure(nom::error::Error::new(
                input,
                nom::error::ErrorKind::Fail,
            ))),
        },

        Token::Name(name) => Ok((input, Object::Name(name))),

        Token::ArrayStart => parse_array(input),

        Token::DictStart => {
            let (remaining, dict) = parse_dictionary(input)?;
            finish_dictionary(remaining, dict, &no_lengths)
        },

        _ => Err(nom_error(input, nom::error::ErrorKind::Tag)),
    }
}

/// Looks up the integer value of an indirect object, used for stream
/// `/Length` entries written as references.
pub type LengthResolver<'r> = dyn Fn(ObjectRef) -> Option<i64> + 'r;

fn no_lengths(_: ObjectRef) -> Option<i64> {
    None
}

/// A dictionary, or a stream if the `stream` keyword follows it.
fn finish_dictionary<'a>(
    remaining: &'a [u8],
    dict: Dictionary,
    lengths: &LengthResolver<'_>,
) -> IResult<&'a [u8], Object> {
    let Ok((stream_input, Token::StreamStart)) = token(remaining) else {
        return Ok((remaining, Object::Dictionary(dict)));
    };

    let length = match dict.get("Length") {
        Some(Object::Reference(r)) => {
            let resolved = lengths(*r);
            if resolved.is_none() {
                log::debug!("Stream /Length {} is unresolved; scanning for endstream", r);
            }
            resolved
        },
        Some(other) => other.as_integer(),
        None => None,
    };

    let (final_input, data) = parse_stream_data(stream_input, length)?;
    Ok((
        final_input,
        Object::Stream {
            dict,
            data: bytes::Bytes::from(data),
        },
    ))
}

/// Parse an indirect object definition: `id gen obj <object> endobj`.
///
/// A stream whose `/Length` is a reference falls back to scanning for
/// `endstream`; use [`parse_indirect_object_with`] to resolve it instead.
pub fn parse_indirect_object(input: &[u8]) -> IResult<&[u8], (ObjectRef, Object)> {
    parse_indirect_object_with(input, &no_lengths)
}

/// Like [`parse_indirect_object`], resolving indirect stream lengths
/// through `lengths`.
pub fn parse_indirect_object_with<'a>(
    input: &'a [u8],
    lengths: &LengthResolver<'_>,
) -> IResult<&'a [u8], (ObjectRef, Object)> {
    let (input, id) = match token(input)? {
        (rest, Token::Integer(id)) => (rest, id),
        (rest, _) => return Err(nom_error(rest, nom::error::ErrorKind::Digit)),
    };
    let (input, gen) = match token(input)? {
        (rest, Token::Integer(gen)) => (rest, gen),
        (rest, _) => return Err(nom_error(rest, nom::error::ErrorKind::Digit)),
    };
    let (input, _) = match token(input)? {
        (rest, Token::ObjStart) => (rest, ()),
        (rest, _) => return Err(nom_error(rest, nom::error::ErrorKind::Tag)),
    };

    let (input, object) = match token(input) {
        Ok((after, Token::DictStart)) => {
            let (remaining, dict) = parse_dictionary(after)?;
            finish_dictionary(remaining, dict, lengths)?
        },
        _ => parse_object(input)?,
    };

    // Lenient: a missing endobj is tolerated
    let input = match token(input) {
        Ok((rest, Token::ObjEnd)) => rest,
        _ => input,
    };

    let id = u32::try_from(id).map_err(|_| nom_error(input, nom::error::ErrorKind::Digit))?;
    let gen = u16::try_from(gen).map_err(|_| nom_error(input, nom::error::ErrorKind::Digit))?;

    Ok((input, (ObjectRef::new(id, gen), object)))
}

/// Stream data after the `stream` keyword.
///
/// Uses `length` when it is known and consistent with the data, otherwise
/// scans for `endstream`.
fn parse_stream_data(input: &[u8], length: Option<i64>) -> IResult<&[u8], Vec<u8>> {
    let input = if let Some(rest) = input.strip_prefix(b"\r\n") {
        rest
    } else if let Some(rest) = input.strip_prefix(b"\n") {
        rest
    } else if let Some(rest) = input.strip_prefix(b"\r") {
        log::warn!("Stream keyword followed by CR alone");
        rest
    } else {
        input
    };

    if let Some(length) = length {
        let length = usize::try_from(length).unwrap_or(usize::MAX);
        if length <= input.len() {
            let data = input[..length].to_vec();
            if let Ok((remaining, Token::StreamEnd)) = token(&input[length..]) {
                return Ok((remaining, data));
            }
        }
        log::debug!("Stream /Length {} does not match the data; scanning for endstream", length);
    }

    if let Some(pos) = find_endstream(input) {
        let mut data = &input[..pos];
        if let Some(stripped) = data.strip_suffix(b"\r\n") {
            data = stripped;
        } else if let Some(stripped) = data.strip_suffix(b"\n") {
            data = stripped;
        }
        let remaining = &input[pos + b"endstream".len()..];
        return Ok((remaining, data.to_vec()));
    }

    Err(nom_error(input, nom::error::ErrorKind::Eof))
}

fn find_endstream(input: &[u8]) -> Option<usize> {
    let keyword = b"endstream";
    input
        .windows(keyword.len())
        .position(|window| window == keyword)
}

/// Parse a PDF array: `[ obj1 obj2 ... objN ]`
fn parse_array(input: &[u8]) -> IResult<&[u8], Object> {
    let mut objects = Vec::new();
    let mut remaining = input;

    loop {
        let (inp, tok) = token(remaining)?;
        if tok == Token::ArrayEnd {
            return Ok((inp, Object::Array(objects)));
        }

        let (inp, obj) = parse_object(remaining)?;
        objects.push(obj);
        remaining = inp;
    }
}

/// Parse a PDF dictionary: `<< /Key1 value1 /Key2 value2 ... >>`
fn parse_dictionary(input: &[u8]) -> IResult<&[u8], Dictionary> {
    let mut dict = Dictionary::new();
    let mut remaining = input;

    loop {
        let (inp, tok) = token(remaining)?;
        match tok {
            Token::DictEnd => return Ok((inp, dict)),
            Token::Name(key) => {
                let (inp, value) = parse_object(inp)?;
                dict.insert(key, value);
                remaining = inp;
            },
            _ => return Err(nom_error(remaining, nom::error::ErrorKind::Tag)),
        }
    }
}

/// Decode a hex string to bytes. Whitespace is ignored and an odd trailing
/// digit is padded with 0.
pub fn decode_hex(hex_bytes: &[u8]) -> Result<Vec<u8>> {
    let digits: Vec<u8> = hex_bytes
        .iter()
        .filter(|c| !c.is_ascii_whitespace())
        .copied()
        .collect();

    let nibble = |c: u8| -> Result<u8> {
        match c {
            b'0'..=b'9' => Ok(c - b'0'),
            b'a'..=b'f' => Ok(c - b'a' + 10),
            b'A'..=b'F' => Ok(c - b'A' + 10),
            _ => Err(PdfError::ParseError {
                offset: 0,
                reason: format!("Invalid hex digit: {:?}", c as char),
            }),
        }
    };

    digits
        .chunks(2)
        .map(|pair| {
            let high = nibble(pair[0])?;
            let low = match pair.get(1) {
                Some(&c) => nibble(c)?,
                None => 0,
            };
            Ok(high << 4 | low)
        })
        .collect()
}
