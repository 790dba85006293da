//! Object streams (`/Type /ObjStm`, PDF 1.5+).
//!
//! The decoded data starts with `/N` pairs of integers (object number and
//! offset relative to `/First`), followed by the objects themselves.

use super::error::{PdfError, Result};
use super::filter::decode_stream;
use super::lexer::{token, Token};
use super::object::Object;
use super::parser::parse_object;

/// Objects packed in `stream`, in stream order.
///
/// Cross-reference entries address packed objects by this index. An object
/// that fails to parse is logged and left out, so indices after it would
/// shift; callers compare the object number before using an entry.
pub fn parse_object_stream(stream: &Object) -> Result<Vec<(u32, Object)>> {
    let Object::Stream { dict, data } = stream else {
        return Err(PdfError::InvalidPdf("object stream is not a stream".to_string()));
    };

    match dict.get("Type").and_then(Object::as_name) {
        Some("ObjStm") | None => {},
        Some(other) => {
            return Err(PdfError::InvalidPdf(format!("expected /Type /ObjStm, got /{}", other)))
        },
    }

    let n = dict
        .get("N")
        .and_then(Object::as_integer)
        .filter(|n| (0..=1_000_000).contains(n))
        .ok_or_else(|| PdfError::InvalidPdf("object stream has no valid /N".to_string()))?;
    let first = dict
        .get("First")
        .and_then(Object::as_integer)
        .and_then(|first| usize::try_from(first).ok())
        .ok_or_else(|| PdfError::InvalidPdf("object stream has no valid /First".to_string()))?;

    let decoded = decode_stream(dict, data)?;
    if decoded.len() < first {
        return Err(PdfError::InvalidPdf(format!(
            "object stream is {} bytes, shorter than /First {}",
            decoded.len(),
            first
        )));
    }

    let pairs = parse_pairs(&decoded[..first], n as usize)?;
    let body = &decoded[first..];

    let mut objects = Vec::with_capacity(pairs.len());
    for (id, offset) in pairs {
        let parsed = body.get(offset..).map(parse_object);
        match parsed {
            Some(Ok((_, obj))) => objects.push((id, obj)),
            _ => log::warn!("Skipping unreadable object {} at offset {} of object stream", id, offset),
        }
    }
    Ok(objects)
}

fn parse_pairs(mut input: &[u8], count: usize) -> Result<Vec<(u32, usize)>> {
    let mut pairs = Vec::with_capacity(count);
    for _ in 0..count {
        let id = next_integer(&mut input)?;
        let offset = next_integer(&mut input)?;
        match (u32::try_from(id), usize::try_from(offset)) {
            (Ok(id), Ok(offset)) => pairs.push((id, offset)),
            _ => return Err(PdfError::InvalidPdf("negative object stream entry".to_string())),
        }
    }
    Ok(pairs)
}

fn next_integer(input: &mut &[u8]) -> Result<i64> {
    match token(*input) {
        Ok((rest, Token::Integer(value))) => {
            *input = rest;
            Ok(value)
        },
        _ => Err(PdfError::InvalidPdf("malformed object stream header".to_string())),
    }
}
