//! Cross-reference reading.
//!
//! Sections are read from `startxref` back through the `/Prev` chain. A
//! section is either a classic `xref` table or a cross-reference stream
//! (`/Type /XRef`, PDF 1.5+); hybrid files point from a table's trailer to a
//! stream with `/XRefStm`. Documents without a readable chain are indexed by
//! scanning for `N G obj` headers and expanding the object streams found.

use std::collections::{BTreeMap, BTreeSet};

use lazy_static::lazy_static;

use super::error::{PdfError, Result};
use super::filter::decode_stream;
use super::lexer::{skip_ws, token, Token};
use super::object::{Dictionary, Object, ObjectRef};
use super::objstm::parse_object_stream;
use super::parser::{parse_indirect_object, parse_indirect_object_with, parse_object};

lazy_static! {
    /// Regex for finding "N G obj" patterns in PDF files
    static ref RE_OBJ_PATTERN: regex::bytes::Regex =
        regex::bytes::Regex::new(r"(\d+)\s+(\d+)\s+obj").expect("object header pattern is valid");

    /// Regex for finding "trailer <<" patterns
    static ref RE_TRAILER: regex::bytes::Regex =
        regex::bytes::Regex::new(r"trailer\s*<<").expect("trailer pattern is valid");
}

const MAX_PREV_DEPTH: u32 = 100;

/// Where an in-use object is stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum XRefEntry {
    /// Indirect object at a byte offset of the file
    Uncompressed {
        /// Byte offset of the object header
        offset: usize,
        /// Generation number
        generation: u16,
    },
    /// Object packed in an object stream
    Compressed {
        /// Object number of the object stream
        stream: u32,
        /// Position within the object stream
        index: usize,
    },
}

impl XRefEntry {
    /// Generation number; packed objects always have generation 0.
    pub fn generation(&self) -> u16 {
        match self {
            XRefEntry::Uncompressed { generation, .. } => *generation,
            XRefEntry::Compressed { .. } => 0,
        }
    }
}

/// Form of the newest cross-reference section.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum XRefFormat {
    /// Classic `xref` table with a `trailer` dictionary
    #[default]
    Table,
    /// Cross-reference stream
    Stream,
}

/// Cross-reference table merged across incremental updates.
#[derive(Debug, Clone, Default)]
pub struct CrossRefTable {
    entries: BTreeMap<u32, XRefEntry>,
    freed: BTreeSet<u32>,
    trailer: Dictionary,
    format: XRefFormat,
}

impl CrossRefTable {
    /// In-use entries by object number.
    pub fn entries(&self) -> &BTreeMap<u32, XRefEntry> {
        &self.entries
    }

    /// The newest trailer dictionary (the stream dictionary for
    /// cross-reference streams).
    pub fn trailer(&self) -> &Dictionary {
        &self.trailer
    }

    /// Form of the newest section.
    pub fn format(&self) -> XRefFormat {
        self.format
    }

    /// Merge an older section. Entries already present, and objects freed by
    /// a newer section, win.
    fn merge_older(&mut self, older: CrossRefTable) {
        for (id, entry) in older.entries {
            if !self.freed.contains(&id) {
                self.entries.entry(id).or_insert(entry);
            }
        }
        self.freed.extend(older.freed);
    }

    /// Integer value of an uncompressed object, for stream `/Length`
    /// entries given as references.
    pub fn integer_at(&self, data: &[u8], r: ObjectRef) -> Option<i64> {
        match self.entries.get(&r.id)? {
            XRefEntry::Uncompressed { offset, .. } => integer_object(data, *offset, r.id),
            XRefEntry::Compressed { .. } => None,
        }
    }
}

fn integer_object(data: &[u8], offset: usize, id: u32) -> Option<i64> {
    let (_, (found, obj)) = parse_indirect_object(data.get(offset..)?).ok()?;
    if found.id == id {
        obj.as_integer()
    } else {
        None
    }
}

/// Offset recorded after the last `startxref` keyword.
pub fn find_startxref(data: &[u8]) -> Result<usize> {
    let window_start = data.len().saturating_sub(2048);
    let tail = &data[window_start..];
    let keyword = b"startxref";

    let pos = tail
        .windows(keyword.len())
        .rposition(|w| w == keyword)
        .ok_or(PdfError::InvalidXref)?;

    let digits: String = skip_ws(&tail[pos + keyword.len()..])
        .iter()
        .take_while(|b| b.is_ascii_digit())
        .map(|&b| b as char)
        .collect();

    digits.parse().map_err(|_| PdfError::InvalidXref)
}

/// Read the cross-reference chain starting at `offset`.
pub fn read_xref_chain(data: &[u8], offset: usize) -> Result<CrossRefTable> {
    read_xref_recursive(data, offset, 0)
}

fn read_xref_recursive(data: &[u8], offset: usize, depth: u32) -> Result<CrossRefTable> {
    if depth > MAX_PREV_DEPTH {
        return Err(PdfError::InvalidPdf(format!(
            "xref /Prev chain depth exceeded {}",
            MAX_PREV_DEPTH
        )));
    }

    let mut xref = read_section(data, offset)?;

    if let Some(prev) = xref.trailer.get("Prev").and_then(Object::as_integer) {
        let prev = usize::try_from(prev).map_err(|_| PdfError::InvalidXref)?;
        log::debug!("Following /Prev {} from xref at {}", prev, offset);
        let older = read_xref_recursive(data, prev, depth + 1)?;
        xref.merge_older(older);
    }

    Ok(xref)
}

fn read_section(data: &[u8], offset: usize) -> Result<CrossRefTable> {
    let section = data.get(offset..).ok_or(PdfError::InvalidXref)?;
    if !skip_ws(section).starts_with(b"xref") {
        return read_stream_section(data, offset);
    }

    let mut table = read_table_section(data, offset)?;

    // Hybrid file: packed objects are listed only in the hidden stream
    if let Some(at) = table.trailer.get("XRefStm").and_then(Object::as_integer) {
        let hidden = usize::try_from(at)
            .map_err(|_| PdfError::InvalidXref)
            .and_then(|at| read_stream_section(data, at));
        match hidden {
            Ok(hidden) => {
                for (id, entry) in hidden.entries {
                    if !table.entries.contains_key(&id) {
                        table.freed.remove(&id);
                        table.entries.insert(id, entry);
                    }
                }
            },
            Err(e) => log::warn!("Ignoring unreadable /XRefStm at {}: {}", at, e),
        }
    }

    Ok(table)
}

/// One `xref ... trailer << >>` section.
fn read_table_section(data: &[u8], offset: usize) -> Result<CrossRefTable> {
    let section = data.get(offset..).ok_or(PdfError::InvalidXref)?;
    let section = skip_ws(section);
    let mut rest = section.strip_prefix(b"xref").ok_or(PdfError::InvalidXref)?;

    let mut xref = CrossRefTable::default();

    loop {
        rest = skip_ws(rest);
        if let Some(after) = rest.strip_prefix(b"trailer") {
            let (_, trailer) = parse_object(after).map_err(|_| PdfError::ParseError {
                offset,
                reason: "unreadable trailer dictionary".to_string(),
            })?;
            xref.trailer = match trailer {
                Object::Dictionary(dict) => dict,
                _ => return Err(PdfError::InvalidXref),
            };
            return Ok(xref);
        }

        // Subsection header: "start count"
        let (after, start) = match token(rest) {
            Ok((after, Token::Integer(n))) => (after, n),
            _ => return Err(PdfError::InvalidXref),
        };
        let (after, count) = match token(after) {
            Ok((after, Token::Integer(n))) => (after, n),
            _ => return Err(PdfError::InvalidXref),
        };
        if !(0..=1_000_000).contains(&count) || start < 0 {
            return Err(PdfError::InvalidPdf("xref subsection out of range".to_string()));
        }
        rest = after;

        for i in 0..count {
            rest = skip_ws(rest);
            let (entry, after) = parse_entry_line(rest).ok_or(PdfError::InvalidXref)?;
            rest = after;

            let id = u32::try_from(start + i).map_err(|_| PdfError::InvalidXref)?;
            match entry {
                Some(entry) => {
                    xref.entries.insert(id, entry);
                },
                None => {
                    xref.freed.insert(id);
                },
            }
        }
    }
}

/// `nnnnnnnnnn ggggg n|f`; free entries yield `None`.
fn parse_entry_line(input: &[u8]) -> Option<(Option<XRefEntry>, &[u8])> {
    let offset_end = input.iter().position(|b| !b.is_ascii_digit())?;
    let offset: usize = std::str::from_utf8(&input[..offset_end]).ok()?.parse().ok()?;

    let rest = &input[offset_end..];
    let gen_start = rest.iter().position(|b| b.is_ascii_digit())?;
    let rest = &rest[gen_start..];
    let gen_end = rest.iter().position(|b| !b.is_ascii_digit())?;
    let generation: u32 = std::str::from_utf8(&rest[..gen_end]).ok()?.parse().ok()?;

    let rest = &rest[gen_end..];
    let kind_at = rest.iter().position(|b| !matches!(b, b' ' | b'\t'))?;
    let kind = rest[kind_at];
    let rest = &rest[kind_at + 1..];

    let entry = match kind {
        b'n' => Some(XRefEntry::Uncompressed {
            offset,
            generation: u16::try_from(generation).ok()?,
        }),
        b'f' => None,
        _ => return None,
    };
    Some((entry, rest))
}

/// A cross-reference stream at `offset`.
///
/// Rows hold three big-endian fields sized by `/W`: the type (0 free,
/// 1 uncompressed, 2 packed), then offset and generation, or object stream
/// number and index. `/Index` lists the subsections, `[0 /Size]` if absent.
fn read_stream_section(data: &[u8], offset: usize) -> Result<CrossRefTable> {
    let input = data.get(offset..).ok_or(PdfError::InvalidXref)?;
    let (_, (_, object)) = parse_indirect_object(input).map_err(|_| PdfError::ParseError {
        offset,
        reason: "unreadable cross-reference stream".to_string(),
    })?;

    let Object::Stream { dict, data: raw } = object else {
        return Err(PdfError::InvalidXref);
    };
    if dict.get("Type").and_then(Object::as_name) != Some("XRef") {
        return Err(PdfError::InvalidXref);
    }

    let widths: Vec<usize> = dict
        .get("W")
        .and_then(Object::as_array)
        .map(|w| {
            w.iter()
                .filter_map(Object::as_integer)
                .filter_map(|n| usize::try_from(n).ok())
                .filter(|&n| n <= 8)
                .collect()
        })
        .unwrap_or_default();
    let [w_type, w_second, w_third] = <[usize; 3]>::try_from(widths)
        .map_err(|_| PdfError::InvalidPdf("cross-reference stream has an invalid /W".to_string()))?;
    let row_len = w_type + w_second + w_third;
    if row_len == 0 {
        return Err(PdfError::InvalidPdf("cross-reference stream rows are empty".to_string()));
    }

    let size = dict
        .get("Size")
        .and_then(Object::as_integer)
        .and_then(|s| u32::try_from(s).ok())
        .ok_or_else(|| PdfError::InvalidPdf("cross-reference stream has no /Size".to_string()))?;

    let ranges: Vec<(u32, u32)> = match dict.get("Index").and_then(Object::as_array) {
        Some(index) => index
            .chunks(2)
            .map(|pair| match pair {
                [start, count] => start
                    .as_integer()
                    .and_then(|s| u32::try_from(s).ok())
                    .zip(count.as_integer().and_then(|c| u32::try_from(c).ok()))
                    .ok_or(PdfError::InvalidXref),
                _ => Err(PdfError::InvalidXref),
            })
            .collect::<Result<_>>()?,
        None => vec![(0, size)],
    };

    let decoded = decode_stream(&dict, &raw)?;
    let mut rows = decoded.chunks_exact(row_len);
    let mut xref = CrossRefTable {
        format: XRefFormat::Stream,
        ..CrossRefTable::default()
    };

    for (start, count) in ranges {
        for i in 0..count {
            let row = rows.next().ok_or_else(|| {
                PdfError::InvalidPdf("cross-reference stream is truncated".to_string())
            })?;
            let id = start.checked_add(i).ok_or(PdfError::InvalidXref)?;

            let (kind, fields) = row.split_at(w_type);
            let (second, third) = fields.split_at(w_second);
            let kind = if w_type == 0 { 1 } else { read_be(kind) };
            let (second, third) = (read_be(second), read_be(third));

            match kind {
                0 => {
                    xref.freed.insert(id);
                },
                1 => {
                    let entry = XRefEntry::Uncompressed {
                        offset: usize::try_from(second).map_err(|_| PdfError::InvalidXref)?,
                        generation: u16::try_from(third).map_err(|_| PdfError::InvalidXref)?,
                    };
                    xref.entries.insert(id, entry);
                },
                2 => {
                    let entry = XRefEntry::Compressed {
                        stream: u32::try_from(second).map_err(|_| PdfError::InvalidXref)?,
                        index: usize::try_from(third).map_err(|_| PdfError::InvalidXref)?,
                    };
                    xref.entries.insert(id, entry);
                },
                // Unknown types are null references
                other => log::debug!("Ignoring cross-reference entry {} of type {}", id, other),
            }
        }
    }

    xref.trailer = dict;
    Ok(xref)
}

fn read_be(bytes: &[u8]) -> u64 {
    bytes.iter().fold(0, |acc, &b| (acc << 8) | u64::from(b))
}

/// Rebuild the table by scanning for object headers.
///
/// Later definitions of the same object win, and objects defined directly
/// win over packed ones. The trailer is the last `trailer` dictionary in the
/// file, else the last cross-reference stream dictionary, else a synthesized
/// one naming the catalog.
pub fn reconstruct_xref(data: &[u8]) -> Result<CrossRefTable> {
    log::info!("Reconstructing xref table by scanning {} bytes", data.len());

    let mut headers = Vec::new();
    let mut header_at = BTreeMap::new();
    for capture in RE_OBJ_PATTERN.captures_iter(data) {
        let Some(full) = capture.get(0) else { continue };

        // Headers must start a line (or the file)
        if full.start() > 0 && !data[full.start() - 1].is_ascii_whitespace() {
            continue;
        }

        let id = capture
            .get(1)
            .and_then(|m| std::str::from_utf8(m.as_bytes()).ok())
            .and_then(|s| s.parse::<u32>().ok());
        if let Some(id) = id {
            headers.push(full.start());
            header_at.insert(id, full.start());
        }
    }

    let lengths = |r: ObjectRef| {
        header_at
            .get(&r.id)
            .and_then(|&at| integer_object(data, at, r.id))
    };

    let mut xref = CrossRefTable::default();
    let mut catalog = None;
    let mut object_streams = BTreeMap::new();
    let mut stream_trailer = None;

    for start in headers {
        let Ok((_, (obj_ref, object))) = parse_indirect_object_with(&data[start..], &lengths) else {
            log::debug!("Skipping unparsable object header at {}", start);
            continue;
        };

        match type_name(&object) {
            Some("Catalog") => catalog = Some(obj_ref),
            Some("XRef") => stream_trailer = object.as_dict().cloned(),
            _ => {},
        }
        if type_name(&object) == Some("ObjStm") {
            object_streams.insert(obj_ref.id, object);
        } else {
            object_streams.remove(&obj_ref.id);
        }

        xref.entries.insert(
            obj_ref.id,
            XRefEntry::Uncompressed {
                offset: start,
                generation: obj_ref.gen,
            },
        );
    }

    for (&stream, object) in &object_streams {
        let packed = match parse_object_stream(object) {
            Ok(packed) => packed,
            Err(e) => {
                log::warn!("Skipping unreadable object stream {}: {}", stream, e);
                continue;
            },
        };
        for (index, (id, obj)) in packed.into_iter().enumerate() {
            if xref.entries.contains_key(&id) {
                continue;
            }
            if catalog.is_none() && type_name(&obj) == Some("Catalog") {
                catalog = Some(ObjectRef::new(id, 0));
            }
            xref.entries.insert(id, XRefEntry::Compressed { stream, index });
        }
    }

    if xref.entries.is_empty() {
        return Err(PdfError::InvalidPdf("no objects found while scanning".to_string()));
    }

    if let Some(found) = RE_TRAILER.find_iter(data).last() {
        let dict_start = found.end() - 2;
        if let Ok((_, Object::Dictionary(dict))) = parse_object(&data[dict_start..]) {
            xref.trailer = dict;
        }
    }
    if xref.trailer.is_empty() {
        if let Some(dict) = stream_trailer {
            xref.trailer = dict;
        }
    }

    if !xref.trailer.contains_key("Root") {
        let catalog = catalog.ok_or_else(|| {
            PdfError::InvalidPdf("document catalog not found while scanning".to_string())
        })?;
        xref.trailer.insert("Root".to_string(), Object::Reference(catalog));
    }
    for key in ["Prev", "XRefStm"] {
        xref.trailer.remove(key);
    }

    log::debug!("Reconstructed {} xref entries", xref.entries.len());
    Ok(xref)
}

fn type_name(object: &Object) -> Option<&str> {
    object.as_dict().and_then(|d| d.get("Type")).and_then(Object::as_name)
}
