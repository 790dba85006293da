//! Minimal PDF document support for invisible signatures.
//!
//! Reads classic cross-reference tables and PDF 1.5 cross-reference and
//! object streams (falling back to an object scan), edits the document
//! information dictionary, adds signature fields and writes incremental
//! updates with a signed ByteRange.

pub mod byterange;
pub mod document;
pub mod error;
pub mod filter;
pub mod lexer;
pub mod object;
pub mod objstm;
pub mod parser;
pub mod serializer;
pub mod signature;
pub mod xref;

use std::io::{self, Write};

pub use document::PdfDocument;
pub use error::PdfError;
pub use object::{Dictionary, Object, ObjectRef};
pub use signature::{
    format_pdf_date, SignatureField, SignatureInfo, SignatureInterface, SignatureOptions,
    DEFAULT_SIGNATURE_SIZE, FILTER_ADOBE_PPKLITE, SUBFILTER_ADBE_PKCS7_DETACHED,
};

/// A document the signing bridge can prepare and sign.
///
/// Every method reports failures as `io::Error`. Errors returned by the
/// [`SignatureInterface`] passed to [`save_incremental`](Self::save_incremental)
/// come back out unchanged.
pub trait SignableDocument {
    /// `/Keywords` of the document information dictionary.
    fn keywords(&self) -> Option<String>;

    /// Replace `/Keywords`.
    fn set_keywords(&mut self, keywords: &str) -> io::Result<()>;

    /// Serialize the full document.
    fn save(&self) -> io::Result<Vec<u8>>;

    /// Parse `bytes` as a new document of the same kind.
    fn reload(&self, bytes: &[u8]) -> io::Result<Box<dyn SignableDocument>>;

    /// Add a signature field with a reserved, unsigned value.
    fn add_signature(
        &mut self,
        field: SignatureField,
        options: Option<&SignatureOptions>,
    ) -> io::Result<()>;

    /// Write the original bytes followed by an incremental update carrying
    /// the signature produced by `signer`.
    fn save_incremental(
        &mut self,
        output: &mut dyn Write,
        signer: &mut dyn SignatureInterface,
    ) -> io::Result<()>;
}

impl SignableDocument for PdfDocument {
    fn keywords(&self) -> Option<String> {
        PdfDocument::keywords(self)
    }

    fn set_keywords(&mut self, keywords: &str) -> io::Result<()> {
        Ok(PdfDocument::set_keywords(self, keywords)?)
    }

    fn save(&self) -> io::Result<Vec<u8>> {
        Ok(self.to_bytes()?)
    }

    fn reload(&self, bytes: &[u8]) -> io::Result<Box<dyn SignableDocument>> {
        Ok(Box::new(PdfDocument::load(bytes)?))
    }

    fn add_signature(
        &mut self,
        field: SignatureField,
        options: Option<&SignatureOptions>,
    ) -> io::Result<()> {
        Ok(PdfDocument::add_signature(self, field, options)?)
    }

    fn save_incremental(
        &mut self,
        output: &mut dyn Write,
        signer: &mut dyn SignatureInterface,
    ) -> io::Result<()> {
        Ok(self.write_incremental(output, signer)?)
    }
}
