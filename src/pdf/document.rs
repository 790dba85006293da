//! In-memory PDF document with incremental signing support.
//!
//! The whole file is kept as read. Objects touched by metadata or signature
//! edits are marked dirty; an incremental save appends only those objects,
//! a cross-reference section for them and a trailer pointing back at the
//! previous section with `/Prev`. Files whose newest section is a
//! cross-reference stream get a stream section in the update as well.
//!
//! Objects packed in object streams are unpacked on load. The object and
//! cross-reference streams themselves are not kept as document objects.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::fs;
use std::io::Write;
use std::path::Path;

use super::byterange::{ByteRangeCalculator, BYTE_RANGE_PLACEHOLDER};
use super::error::{PdfError, Result};
use super::object::{Dictionary, Object, ObjectRef};
use super::objstm::parse_object_stream;
use super::parser::{parse_indirect_object_with, LengthResolver};
use super::serializer::ObjectSerializer;
use super::signature::{
    SignatureField, SignatureInfo, SignatureInterface, SignatureOptions, DEFAULT_SIGNATURE_SIZE,
};
use super::xref::{
    find_startxref, read_xref_chain, reconstruct_xref, CrossRefTable, XRefEntry, XRefFormat,
};

const MAX_PAGE_TREE_DEPTH: usize = 64;

/// Annotation flags for an invisible signature widget (Print | Locked).
const SIGNATURE_WIDGET_FLAGS: i64 = 132;

/// AcroForm `/SigFlags`: SignaturesExist | AppendOnly.
const SIG_FLAGS: i64 = 3;

#[derive(Debug, Clone, Copy)]
struct PendingSignature {
    sig_id: u32,
    size: usize,
}

/// A parsed PDF document.
#[derive(Debug, Clone)]
pub struct PdfDocument {
    original: Vec<u8>,
    version: (u8, u8),
    objects: BTreeMap<u32, (u16, Object)>,
    offsets: BTreeMap<u32, XRefEntry>,
    trailer: Dictionary,
    /// Offset of the newest cross-reference section, if one was readable
    prev_xref: Option<usize>,
    xref_format: XRefFormat,
    dirty: BTreeSet<u32>,
    next_id: u32,
    pending: Option<PendingSignature>,
}

impl PdfDocument {
    /// Open a PDF file.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::load(fs::read(path)?)
    }

    /// Parse a PDF from memory.
    pub fn load(data: impl Into<Vec<u8>>) -> Result<Self> {
        let data = data.into();
        let version = parse_header(&data)?;

        let rebuild = |data: &[u8]| -> Result<(Option<usize>, CrossRefTable)> {
            Ok((None, reconstruct_xref(data)?))
        };

        let classic = find_startxref(&data)
            .and_then(|offset| Ok((Some(offset), read_xref_chain(&data, offset)?)));

        let (prev_xref, xref) = match classic {
            Ok(found) => found,
            Err(e) => {
                log::warn!("Cross-reference table unreadable ({}); scanning objects", e);
                rebuild(&data)?
            },
        };

        let mut objects = index_objects(&data, &xref);
        let (prev_xref, xref) = if has_catalog(&xref, &objects) {
            (prev_xref, xref)
        } else if prev_xref.is_some() {
            log::warn!("Document catalog not reachable through the xref table; scanning objects");
            let (prev_xref, xref) = rebuild(&data)?;
            objects = index_objects(&data, &xref);
            (prev_xref, xref)
        } else {
            (prev_xref, xref)
        };

        if !has_catalog(&xref, &objects) {
            return Err(PdfError::InvalidPdf("document catalog not found".to_string()));
        }

        let trailer = xref.trailer().clone();
        if trailer.contains_key("Encrypt") {
            return Err(PdfError::Encrypted);
        }

        objects.retain(|_, (_, obj)| !is_structural(obj));

        let max_id = xref.entries().keys().next_back().copied().unwrap_or(0);
        let size = trailer
            .get("Size")
            .and_then(Object::as_integer)
            .and_then(|s| u32::try_from(s).ok())
            .unwrap_or(0);

        log::debug!(
            "Loaded PDF {}.{} with {} objects ({} bytes)",
            version.0,
            version.1,
            objects.len(),
            data.len()
        );

        Ok(Self {
            original: data,
            version,
            offsets: xref.entries().clone(),
            objects,
            trailer,
            prev_xref,
            xref_format: xref.format(),
            dirty: BTreeSet::new(),
            next_id: size.max(max_id + 1),
            pending: None,
        })
    }

    /// PDF version from the header.
    pub fn version(&self) -> (u8, u8) {
        self.version
    }

    /// The bytes this document was loaded from (or last written as).
    pub fn as_bytes(&self) -> &[u8] {
        &self.original
    }

    /// Look up an object by number.
    pub fn get(&self, id: u32) -> Option<&Object> {
        self.objects.get(&id).map(|(_, obj)| obj)
    }

    /// Follow a reference; direct objects are returned as is.
    pub fn resolve<'a>(&'a self, obj: &'a Object) -> Option<&'a Object> {
        match obj {
            Object::Reference(r) => self.get(r.id),
            other => Some(other),
        }
    }

    fn dict(&self, id: u32) -> Option<&Dictionary> {
        self.get(id).and_then(Object::as_dict)
    }

    fn dict_mut(&mut self, id: u32) -> Result<&mut Dictionary> {
        let dict = self
            .objects
            .get_mut(&id)
            .and_then(|(_, obj)| obj.as_dict_mut())
            .ok_or(PdfError::ObjectNotFound(id, 0))?;
        self.dirty.insert(id);
        Ok(dict)
    }

    fn allocate_object_id(&mut self) -> u32 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn insert_object(&mut self, obj: Object) -> ObjectRef {
        let id = self.allocate_object_id();
        self.objects.insert(id, (0, obj));
        self.dirty.insert(id);
        ObjectRef::new(id, 0)
    }

    fn catalog_ref(&self) -> Result<ObjectRef> {
        self.trailer
            .get("Root")
            .and_then(Object::as_reference)
            .ok_or_else(|| PdfError::InvalidPdf("trailer has no /Root".to_string()))
    }

    /// Page references in document order.
    pub fn page_refs(&self) -> Result<Vec<ObjectRef>> {
        let catalog = self.catalog_ref()?;
        let root = self
            .dict(catalog.id)
            .and_then(|d| d.get("Pages"))
            .and_then(Object::as_reference)
            .ok_or_else(|| PdfError::InvalidPdf("catalog has no /Pages".to_string()))?;

        let mut pages = Vec::new();
        let mut visited = HashSet::new();
        self.collect_pages(root, 0, &mut visited, &mut pages)?;
        Ok(pages)
    }

    fn collect_pages(
        &self,
        node: ObjectRef,
        depth: usize,
        visited: &mut HashSet<u32>,
        pages: &mut Vec<ObjectRef>,
    ) -> Result<()> {
        if depth > MAX_PAGE_TREE_DEPTH || !visited.insert(node.id) {
            return Err(PdfError::InvalidPdf("page tree is cyclic or too deep".to_string()));
        }

        let dict = self
            .dict(node.id)
            .ok_or(PdfError::ObjectNotFound(node.id, node.gen))?;

        let is_leaf = dict.get("Type").and_then(Object::as_name) == Some("Page");
        let kids = dict
            .get("Kids")
            .and_then(|k| self.resolve(k))
            .and_then(Object::as_array);

        match kids {
            Some(kids) if !is_leaf => {
                for kid in kids.iter().filter_map(Object::as_reference) {
                    self.collect_pages(kid, depth + 1, visited, pages)?;
                }
            },
            _ => pages.push(node),
        }
        Ok(())
    }

    /// Number of pages.
    pub fn page_count(&self) -> Result<usize> {
        Ok(self.page_refs()?.len())
    }

    fn info(&self) -> Option<&Dictionary> {
        self.trailer
            .get("Info")
            .and_then(|info| self.resolve(info))
            .and_then(Object::as_dict)
    }

    /// `/Keywords` from the document information dictionary.
    pub fn keywords(&self) -> Option<String> {
        self.info()
            .and_then(|info| info.get("Keywords"))
            .and_then(Object::as_text)
    }

    /// Set `/Keywords`, creating the information dictionary if needed.
    pub fn set_keywords(&mut self, keywords: &str) -> Result<()> {
        let value = Object::text(keywords);

        match self.trailer.get("Info").cloned() {
            Some(Object::Reference(r)) if self.dict(r.id).is_some() => {
                self.dict_mut(r.id)?.insert("Keywords".to_string(), value);
            },
            Some(Object::Dictionary(mut inline)) => {
                inline.insert("Keywords".to_string(), value);
                let info = self.insert_object(Object::Dictionary(inline));
                self.trailer.insert("Info".to_string(), Object::Reference(info));
            },
            _ => {
                let mut info = Dictionary::new();
                info.insert("Keywords".to_string(), value);
                let info = self.insert_object(Object::Dictionary(info));
                self.trailer.insert("Info".to_string(), Object::Reference(info));
            },
        }
        Ok(())
    }

    /// Serialize the whole document as a fresh file.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let serializer = ObjectSerializer::compact();
        let mut out = format!("%PDF-{}.{}\n", self.version.0, self.version.1).into_bytes();
        out.extend_from_slice(b"%\xE2\xE3\xCF\xD3\n");

        let mut entries = Vec::with_capacity(self.objects.len());
        for (&id, (gen, obj)) in &self.objects {
            entries.push((id, out.len(), *gen));
            out.extend_from_slice(&serializer.serialize_indirect(id, *gen, obj));
        }

        let xref_offset = out.len();
        write_xref_section(&mut out, &entries, true);
        self.write_trailer(&mut out, None, xref_offset);
        Ok(out)
    }

    /// Add an invisible signature field whose value is `field`.
    ///
    /// The signature dictionary gets a zero-filled `/Contents` of the
    /// requested size and a placeholder `/ByteRange`; both are filled in by
    /// [`write_incremental`](Self::write_incremental).
    pub fn add_signature(
        &mut self,
        field: SignatureField,
        options: Option<&SignatureOptions>,
    ) -> Result<()> {
        if self.pending.is_some() {
            return Err(PdfError::InvalidPdf(
                "a signature is already waiting to be written".to_string(),
            ));
        }

        let size = options.map_or(DEFAULT_SIGNATURE_SIZE, SignatureOptions::signature_size);
        if size == 0 {
            return Err(PdfError::InvalidPdf("signature size must be positive".to_string()));
        }

        let pages = self.page_refs()?;
        let page_index = options.and_then(|o| o.page).unwrap_or(0);
        let page = *pages.get(page_index).ok_or_else(|| {
            PdfError::InvalidPdf(format!(
                "page {} out of range ({} pages)",
                page_index,
                pages.len()
            ))
        })?;
        let field_name = format!("Signature{}", self.signature_ids().len() + 1);

        let mut sig = field.to_dictionary();
        sig.insert("Contents".to_string(), Object::String(vec![0; size]));
        sig.insert(
            "ByteRange".to_string(),
            Object::Array(BYTE_RANGE_PLACEHOLDER.iter().map(|&v| Object::Integer(v)).collect()),
        );
        let sig_ref = self.insert_object(Object::Dictionary(sig));

        let mut widget = Dictionary::new();
        widget.insert("Type".to_string(), Object::name("Annot"));
        widget.insert("Subtype".to_string(), Object::name("Widget"));
        widget.insert("FT".to_string(), Object::name("Sig"));
        widget.insert("T".to_string(), Object::text(&field_name));
        widget.insert("V".to_string(), Object::Reference(sig_ref));
        widget.insert("F".to_string(), Object::Integer(SIGNATURE_WIDGET_FLAGS));
        widget.insert("Rect".to_string(), Object::Array(vec![Object::Integer(0); 4]));
        widget.insert("P".to_string(), Object::Reference(page));
        let widget_ref = self.insert_object(Object::Dictionary(widget));

        self.append_to_array_entry(page.id, "Annots", Object::Reference(widget_ref))?;

        let acroform = self.acroform_id()?;
        self.append_to_array_entry(acroform, "Fields", Object::Reference(widget_ref))?;
        self.dict_mut(acroform)?
            .insert("SigFlags".to_string(), Object::Integer(SIG_FLAGS));

        log::debug!(
            "Added signature field {} (object {}) on page {} with {} bytes reserved",
            field_name,
            sig_ref.id,
            page_index,
            size
        );

        self.pending = Some(PendingSignature {
            sig_id: sig_ref.id,
            size,
        });
        Ok(())
    }

    /// The catalog's AcroForm as an indirect object, created if missing.
    fn acroform_id(&mut self) -> Result<u32> {
        let catalog = self.catalog_ref()?.id;
        let existing = self.dict(catalog).and_then(|d| d.get("AcroForm")).cloned();

        let form = match existing {
            Some(Object::Reference(r)) if self.dict(r.id).is_some() => return Ok(r.id),
            Some(Object::Dictionary(inline)) => inline,
            _ => Dictionary::new(),
        };

        let form = self.insert_object(Object::Dictionary(form));
        self.dict_mut(catalog)?
            .insert("AcroForm".to_string(), Object::Reference(form));
        Ok(form.id)
    }

    /// Push `value` onto the array at `holder[key]`, which may be inline,
    /// indirect or absent.
    fn append_to_array_entry(&mut self, holder: u32, key: &str, value: Object) -> Result<()> {
        let existing = self
            .dict(holder)
            .ok_or(PdfError::ObjectNotFound(holder, 0))?
            .get(key)
            .cloned();

        match existing {
            Some(Object::Reference(r)) if matches!(self.get(r.id), Some(Object::Array(_))) => {
                if let Some((_, Object::Array(items))) = self.objects.get_mut(&r.id) {
                    items.push(value);
                }
                self.dirty.insert(r.id);
            },
            Some(Object::Array(mut items)) => {
                items.push(value);
                self.dict_mut(holder)?
                    .insert(key.to_string(), Object::Array(items));
            },
            _ => {
                self.dict_mut(holder)?
                    .insert(key.to_string(), Object::Array(vec![value]));
            },
        }
        Ok(())
    }

    /// Append the pending changes to the original bytes and write the result.
    ///
    /// When a signature is pending, its ByteRange is patched in place, the
    /// SHA-256 of the covered bytes is passed to `signer`, and the returned
    /// DER is written into the reserved `/Contents`. Errors from `signer`
    /// are returned unchanged. After a successful write the document
    /// reflects the new file.
    pub fn write_incremental(
        &mut self,
        output: &mut dyn Write,
        signer: &mut dyn SignatureInterface,
    ) -> Result<()> {
        let base = self.original.len();
        let mut update = Vec::new();
        if !self.original.ends_with(b"\n") && !self.original.ends_with(b"\r") {
            update.push(b'\n');
        }

        let serializer = ObjectSerializer::compact();
        let mut entries = Vec::new();
        let mut sig_span = None;

        // Without a readable previous section packed objects are written out
        // directly, since the new table cannot point into object streams
        let mut to_write = self.dirty.clone();
        if self.prev_xref.is_none() {
            to_write.extend(
                self.offsets
                    .iter()
                    .filter(|(_, entry)| matches!(entry, XRefEntry::Compressed { .. }))
                    .map(|(&id, _)| id),
            );
        }

        for &id in &to_write {
            let Some((gen, obj)) = self.objects.get(&id) else { continue };
            let offset = base + update.len();
            let bytes = serializer.serialize_indirect(id, *gen, obj);
            if self.pending.map(|p| p.sig_id) == Some(id) {
                sig_span = Some((offset, offset + bytes.len()));
            }
            update.extend_from_slice(&bytes);
            entries.push((id, offset, *gen));
        }

        // Without a readable previous table this section must index everything
        if self.prev_xref.is_none() {
            for (&id, entry) in &self.offsets {
                if let XRefEntry::Uncompressed { offset, generation } = *entry {
                    if !to_write.contains(&id) && self.objects.contains_key(&id) {
                        entries.push((id, offset, generation));
                    }
                }
            }
        }

        let xref_offset = base + update.len();
        match (self.prev_xref, self.xref_format) {
            (Some(prev), XRefFormat::Stream) => {
                self.write_xref_stream(&mut update, &entries, prev, xref_offset)
            },
            (prev, _) => {
                write_xref_section(&mut update, &entries, prev.is_none());
                self.write_trailer(&mut update, prev, xref_offset);
            },
        }

        let mut full = Vec::with_capacity(base + update.len());
        full.extend_from_slice(&self.original);
        full.extend_from_slice(&update);

        if let Some(pending) = self.pending {
            let (start, end) = sig_span.ok_or_else(|| {
                PdfError::InvalidPdf("signature dictionary was not written".to_string())
            })?;
            sign_in_place(&mut full, start, end, pending.size, signer)?;
        }

        let written = Self::load(full)?;
        output.write_all(&written.original)?;
        output.flush()?;

        log::info!(
            "Wrote incremental update of {} objects ({} bytes appended)",
            to_write.len(),
            update.len()
        );

        *self = written;
        Ok(())
    }

    fn trailer_dict(&self, size: u32, prev: Option<usize>) -> Dictionary {
        let mut trailer = Dictionary::new();
        trailer.insert("Size".to_string(), Object::Integer(i64::from(size)));
        for key in ["Root", "Info", "ID"] {
            if let Some(value) = self.trailer.get(key) {
                trailer.insert(key.to_string(), value.clone());
            }
        }
        if let Some(prev) = prev {
            trailer.insert("Prev".to_string(), Object::Integer(prev as i64));
        }
        trailer
    }

    fn write_trailer(&self, out: &mut Vec<u8>, prev: Option<usize>, xref_offset: usize) {
        let trailer = self.trailer_dict(self.next_id, prev);
        out.extend_from_slice(b"trailer\n");
        out.extend_from_slice(&ObjectSerializer::new().serialize(&Object::Dictionary(trailer)));
        out.extend_from_slice(format!("\nstartxref\n{}\n%%EOF\n", xref_offset).as_bytes());
    }

    /// Write a cross-reference stream indexing `entries` and itself.
    ///
    /// The stream takes the next free object number. Rows are
    /// `[1 offset generation]` with `/W [1 4 2]`, or `/W [1 8 2]` once
    /// offsets no longer fit in four bytes.
    fn write_xref_stream(
        &self,
        out: &mut Vec<u8>,
        entries: &[(u32, usize, u16)],
        prev: usize,
        xref_offset: usize,
    ) {
        let stream_id = self.next_id;
        let mut rows = entries.to_vec();
        rows.push((stream_id, xref_offset, 0));
        rows.sort_by_key(|&(id, _, _)| id);
        rows.dedup_by_key(|(id, _, _)| *id);

        let offset_width = if u32::try_from(xref_offset).is_ok() { 4 } else { 8 };
        let mut data = Vec::with_capacity(rows.len() * (offset_width + 3));
        let mut index: Vec<i64> = Vec::new();
        let mut last_id = None;

        for &(id, offset, gen) in &rows {
            if last_id.map_or(true, |last: u32| last + 1 != id) {
                index.extend([i64::from(id), 0]);
            }
            if let Some(count) = index.last_mut() {
                *count += 1;
            }
            last_id = Some(id);

            data.push(1);
            data.extend_from_slice(&(offset as u64).to_be_bytes()[8 - offset_width..]);
            data.extend_from_slice(&gen.to_be_bytes());
        }

        let mut dict = self.trailer_dict(stream_id + 1, Some(prev));
        dict.insert("Type".to_string(), Object::name("XRef"));
        dict.insert(
            "W".to_string(),
            Object::Array(vec![
                Object::Integer(1),
                Object::Integer(offset_width as i64),
                Object::Integer(2),
            ]),
        );
        dict.insert(
            "Index".to_string(),
            Object::Array(index.into_iter().map(Object::Integer).collect()),
        );

        let stream = Object::Stream {
            dict,
            data: bytes::Bytes::from(data),
        };
        out.extend_from_slice(&ObjectSerializer::compact().serialize_indirect(stream_id, 0, &stream));
        out.extend_from_slice(format!("startxref\n{}\n%%EOF\n", xref_offset).as_bytes());
    }

    fn signature_ids(&self) -> Vec<u32> {
        self.objects
            .iter()
            .filter(|(_, (_, obj))| {
                obj.as_dict()
                    .and_then(|d| d.get("Type"))
                    .and_then(Object::as_name)
                    == Some("Sig")
            })
            .map(|(&id, _)| id)
            .collect()
    }

    /// Signature dictionaries present in the document, by object number.
    pub fn signatures(&self) -> Vec<SignatureInfo> {
        self.signature_ids()
            .into_iter()
            .filter_map(|id| self.dict(id))
            .map(SignatureInfo::from_dictionary)
            .collect()
    }
}

/// Patch the ByteRange, compute the digest, and embed the signature.
fn sign_in_place(
    full: &mut [u8],
    sig_start: usize,
    sig_end: usize,
    size: usize,
    signer: &mut dyn SignatureInterface,
) -> Result<()> {
    let calc = ByteRangeCalculator::new(size);
    let (byte_range_rel, contents_rel) = calc
        .find_placeholders(&full[sig_start..sig_end])
        .ok_or_else(|| PdfError::InvalidPdf("signature placeholders not found".to_string()))?;
    let byte_range_at = sig_start + byte_range_rel;
    let contents_at = sig_start + contents_rel;

    let byte_range = calc.calculate_byte_range(full.len(), contents_at);
    let width = ByteRangeCalculator::format_byte_range(&BYTE_RANGE_PLACEHOLDER).len();
    let padded = ByteRangeCalculator::format_padded(&byte_range, width)?;
    full[byte_range_at..byte_range_at + width].copy_from_slice(padded.as_bytes());

    let digest = ByteRangeCalculator::digest(full, &byte_range)?;
    let signature = signer.sign(&digest)?;
    calc.insert_signature(full, contents_at, &signature)?;

    log::debug!(
        "Embedded {} byte signature over ByteRange {}",
        signature.len(),
        ByteRangeCalculator::format_byte_range(&byte_range)
    );
    Ok(())
}

/// Write `xref` with one subsection per run of consecutive object numbers.
fn write_xref_section(out: &mut Vec<u8>, entries: &[(u32, usize, u16)], free_head: bool) {
    let mut rows: Vec<(u32, String)> = entries
        .iter()
        .map(|&(id, offset, gen)| (id, format!("{:010} {:05} n \n", offset, gen)))
        .collect();
    if free_head {
        rows.push((0, "0000000000 65535 f \n".to_string()));
    }
    rows.sort_by_key(|(id, _)| *id);
    rows.dedup_by_key(|(id, _)| *id);

    out.extend_from_slice(b"xref\n");
    let mut i = 0;
    while i < rows.len() {
        let mut j = i;
        while j + 1 < rows.len() && rows[j + 1].0 == rows[j].0 + 1 {
            j += 1;
        }
        out.extend_from_slice(format!("{} {}\n", rows[i].0, j - i + 1).as_bytes());
        for (_, row) in &rows[i..=j] {
            out.extend_from_slice(row.as_bytes());
        }
        i = j + 1;
    }
}

fn parse_header(data: &[u8]) -> Result<(u8, u8)> {
    let window = &data[..data.len().min(1024)];
    let at = window
        .windows(5)
        .position(|w| w == b"%PDF-")
        .ok_or(PdfError::InvalidHeader)?;

    match data.get(at + 5..at + 8) {
        Some([major, b'.', minor]) if major.is_ascii_digit() && minor.is_ascii_digit() => {
            Ok((major - b'0', minor - b'0'))
        },
        _ => Err(PdfError::InvalidHeader),
    }
}

fn index_objects(data: &[u8], xref: &CrossRefTable) -> BTreeMap<u32, (u16, Object)> {
    let lengths = |r: ObjectRef| xref.integer_at(data, r);
    let mut object_streams: HashMap<u32, Option<Vec<(u32, Object)>>> = HashMap::new();
    let mut objects = BTreeMap::new();

    for (&id, entry) in xref.entries() {
        match *entry {
            XRefEntry::Uncompressed { offset, .. } => {
                match data.get(offset..).map(|input| parse_indirect_object_with(input, &lengths)) {
                    Some(Ok((_, (obj_ref, obj)))) if obj_ref.id == id => {
                        objects.insert(id, (obj_ref.gen, obj));
                    },
                    _ => log::warn!("Skipping unreadable object {} at offset {}", id, offset),
                }
            },
            XRefEntry::Compressed { stream, index } => {
                let packed = object_streams
                    .entry(stream)
                    .or_insert_with(|| load_object_stream(data, xref, stream, &lengths));
                let found = packed.as_deref().and_then(|packed| {
                    packed
                        .get(index)
                        .filter(|(packed_id, _)| *packed_id == id)
                        .or_else(|| packed.iter().find(|(packed_id, _)| *packed_id == id))
                });
                match found {
                    Some((_, obj)) => {
                        objects.insert(id, (0, obj.clone()));
                    },
                    None => log::warn!("Object {} not found in object stream {}", id, stream),
                }
            },
        }
    }
    objects
}

fn load_object_stream(
    data: &[u8],
    xref: &CrossRefTable,
    stream: u32,
    lengths: &LengthResolver<'_>,
) -> Option<Vec<(u32, Object)>> {
    let Some(&XRefEntry::Uncompressed { offset, .. }) = xref.entries().get(&stream) else {
        log::warn!("Object stream {} has no direct cross-reference entry", stream);
        return None;
    };

    let object = match data.get(offset..).map(|input| parse_indirect_object_with(input, lengths)) {
        Some(Ok((_, (found, object)))) if found.id == stream => object,
        _ => {
            log::warn!("Skipping unreadable object stream {} at offset {}", stream, offset);
            return None;
        },
    };

    match parse_object_stream(&object) {
        Ok(packed) => Some(packed),
        Err(e) => {
            log::warn!("Skipping object stream {}: {}", stream, e);
            None
        },
    }
}

/// Object and cross-reference streams, which are rewritten rather than kept.
fn is_structural(obj: &Object) -> bool {
    matches!(
        obj.as_dict().and_then(|d| d.get("Type")).and_then(Object::as_name),
        Some("ObjStm") | Some("XRef")
    )
}

fn has_catalog(xref: &CrossRefTable, objects: &BTreeMap<u32, (u16, Object)>) -> bool {
    xref.trailer()
        .get("Root")
        .and_then(Object::as_reference)
        .is_some_and(|r| objects.contains_key(&r.id))
}
