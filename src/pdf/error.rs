//! Error types for the document collaborator.

use std::io;

/// Result type alias for document operations.
pub type Result<T> = std::result::Result<T, PdfError>;

/// Errors raised while reading, editing or writing a PDF.
#[derive(Debug, thiserror::Error)]
pub enum PdfError {
    /// IO error (also carries failures returned by the signing callback)
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Invalid PDF header
    #[error("Invalid PDF header")]
    InvalidHeader,

    /// Parse error at specific byte offset
    #[error("Parse error at byte {offset}: {reason}")]
    ParseError {
        /// Byte offset where error occurred
        offset: usize,
        /// Reason for parse failure
        reason: String,
    },

    /// Invalid cross-reference table
    #[error("Invalid cross-reference table")]
    InvalidXref,

    /// Referenced object not found
    #[error("Object not found: {0} {1} R")]
    ObjectNotFound(u32, u16),

    /// Encrypted documents cannot be signed incrementally
    #[error("Encrypted PDF documents are not supported")]
    Encrypted,

    /// The reserved signature space is too small
    #[error("Signature ({needed} bytes) exceeds the reserved space ({reserved} bytes)")]
    SignatureTooLarge {
        /// Encoded signature size
        needed: usize,
        /// Reserved size
        reserved: usize,
    },

    /// A stream filter this crate does not decode
    #[error("Unsupported stream filter: {0}")]
    UnsupportedFilter(String),

    /// Stream data could not be decoded
    #[error("Stream decode error: {0}")]
    Decode(String),

    /// Generic invalid PDF error
    #[error("Invalid PDF: {0}")]
    InvalidPdf(String),
}

impl From<PdfError> for io::Error {
    fn from(err: PdfError) -> Self {
        match err {
            PdfError::Io(e) => e,
            other => io::Error::new(io::ErrorKind::InvalidData, other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_error_passes_through_unchanged() {
        let original = io::Error::new(io::ErrorKind::Other, "!ErrorCode=1,WinErrorCode=2");
        let back: io::Error = PdfError::from(original).into();
        assert_eq!(back.kind(), io::ErrorKind::Other);
        assert_eq!(back.to_string(), "!ErrorCode=1,WinErrorCode=2");
    }

    #[test]
    fn test_other_errors_become_invalid_data() {
        let err: io::Error = PdfError::InvalidXref.into();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
        assert_eq!(err.to_string(), "Invalid cross-reference table");
    }
}
