//! ByteRange calculation for PDF signatures.
//!
//! The ByteRange is `[offset1, length1, offset2, length2]`: everything from
//! the start of the file to the `<` of the signature value, and everything
//! after its `>` to the end of the file. The signature value itself is a hex
//! string reserved at full size before the file is hashed.

use sha2::{Digest, Sha256};

use super::error::{PdfError, Result};
use super::serializer::hex_upper;

/// ByteRange written before the real offsets are known.
///
/// Each entry is wide enough for any file this crate will write, so the
/// patched array always fits in the same bytes.
pub const BYTE_RANGE_PLACEHOLDER: [i64; 4] = [0, 9_999_999_999, 9_999_999_999, 9_999_999_999];

/// Calculator for PDF signature byte ranges.
#[derive(Debug, Clone, Copy)]
pub struct ByteRangeCalculator {
    /// Bytes reserved for the DER signature
    signature_size: usize,
}

impl ByteRangeCalculator {
    /// Calculator for a signature of at most `signature_size` bytes.
    pub fn new(signature_size: usize) -> Self {
        Self { signature_size }
    }

    /// Reserved signature size in bytes.
    pub fn signature_size(&self) -> usize {
        self.signature_size
    }

    /// Length of the hex placeholder including `<` and `>`.
    pub fn placeholder_size(&self) -> usize {
        self.signature_size * 2 + 2
    }

    /// The serialized `/Contents` placeholder value.
    pub fn generate_placeholder(&self) -> String {
        format!("<{}>", "0".repeat(self.signature_size * 2))
    }

    /// ByteRange for a file of `file_size` bytes whose signature value starts
    /// at `contents_offset` (the `<`).
    pub fn calculate_byte_range(&self, file_size: usize, contents_offset: usize) -> [i64; 4] {
        let before_sig = contents_offset as i64;
        let after_sig_start = (contents_offset + self.placeholder_size()) as i64;
        let after_sig_len = file_size as i64 - after_sig_start;

        [0, before_sig, after_sig_start, after_sig_len]
    }

    /// Format a ByteRange array as a PDF array string.
    pub fn format_byte_range(byte_range: &[i64; 4]) -> String {
        format!("[{} {} {} {}]", byte_range[0], byte_range[1], byte_range[2], byte_range[3])
    }

    /// Format a ByteRange padded with spaces to exactly `width` bytes.
    pub fn format_padded(byte_range: &[i64; 4], width: usize) -> Result<String> {
        let text = Self::format_byte_range(byte_range);
        if text.len() > width {
            return Err(PdfError::InvalidPdf(format!(
                "ByteRange {} does not fit in {} bytes",
                text, width
            )));
        }
        Ok(format!("{:<width$}", text, width = width))
    }

    /// Concatenation of the two ranges.
    pub fn extract_signed_bytes(pdf_data: &[u8], byte_range: &[i64; 4]) -> Result<Vec<u8>> {
        let (first, second) = Self::ranges(pdf_data.len(), byte_range)?;

        let mut signed_bytes = Vec::with_capacity(first.len() + second.len());
        signed_bytes.extend_from_slice(&pdf_data[first]);
        signed_bytes.extend_from_slice(&pdf_data[second]);
        Ok(signed_bytes)
    }

    /// SHA-256 over the two ranges.
    pub fn digest(pdf_data: &[u8], byte_range: &[i64; 4]) -> Result<Vec<u8>> {
        let (first, second) = Self::ranges(pdf_data.len(), byte_range)?;

        let mut hasher = Sha256::new();
        hasher.update(&pdf_data[first]);
        hasher.update(&pdf_data[second]);
        Ok(hasher.finalize().to_vec())
    }

    fn ranges(
        len: usize,
        byte_range: &[i64; 4],
    ) -> Result<(std::ops::Range<usize>, std::ops::Range<usize>)> {
        let to_usize = |v: i64| {
            usize::try_from(v)
                .map_err(|_| PdfError::InvalidPdf(format!("Negative ByteRange entry: {}", v)))
        };
        let offset1 = to_usize(byte_range[0])?;
        let length1 = to_usize(byte_range[1])?;
        let offset2 = to_usize(byte_range[2])?;
        let length2 = to_usize(byte_range[3])?;

        if offset1 + length1 > len {
            return Err(PdfError::InvalidPdf(format!(
                "ByteRange first range exceeds file size: {} + {} > {}",
                offset1, length1, len
            )));
        }
        if offset2 + length2 > len {
            return Err(PdfError::InvalidPdf(format!(
                "ByteRange second range exceeds file size: {} + {} > {}",
                offset2, length2, len
            )));
        }

        Ok((offset1..offset1 + length1, offset2..offset2 + length2))
    }

    /// Check that a ByteRange covers the whole file except the signature.
    pub fn validate_byte_range(byte_range: &[i64; 4], file_size: usize) -> Result<()> {
        let [offset1, length1, offset2, length2] = *byte_range;

        if offset1 != 0 {
            return Err(PdfError::InvalidPdf(format!("ByteRange must start at 0, got {}", offset1)));
        }

        let actual_end = offset2 + length2;
        if actual_end != file_size as i64 {
            return Err(PdfError::InvalidPdf(format!(
                "ByteRange must end at file size {}, got {}",
                file_size, actual_end
            )));
        }

        if length1 > offset2 {
            return Err(PdfError::InvalidPdf(format!(
                "ByteRange first range ({}) overlaps with second range start ({})",
                length1, offset2
            )));
        }

        Ok(())
    }

    /// Locate the placeholders inside a serialized signature dictionary.
    ///
    /// Returns the offsets of the ByteRange array's `[` and of the
    /// `/Contents` value's `<`, both relative to `data`.
    pub fn find_placeholders(&self, data: &[u8]) -> Option<(usize, usize)> {
        let byte_range = format!(
            "/ByteRange {}",
            Self::format_byte_range(&BYTE_RANGE_PLACEHOLDER)
        );
        let contents = format!("/Contents {}", self.generate_placeholder());

        let byte_range_at = find(data, byte_range.as_bytes())? + "/ByteRange ".len();
        let contents_at = find(data, contents.as_bytes())? + "/Contents ".len();
        Some((byte_range_at, contents_at))
    }

    /// Write the hex signature into the reserved placeholder, zero padded.
    pub fn insert_signature(
        &self,
        pdf_data: &mut [u8],
        contents_offset: usize,
        signature: &[u8],
    ) -> Result<()> {
        if signature.len() > self.signature_size {
            return Err(PdfError::SignatureTooLarge {
                needed: signature.len(),
                reserved: self.signature_size,
            });
        }

        let end = contents_offset + self.placeholder_size();
        if end > pdf_data.len()
            || pdf_data[contents_offset] != b'<'
            || pdf_data[end - 1] != b'>'
        {
            return Err(PdfError::InvalidPdf(
                "Signature placeholder not found at the expected offset".to_string(),
            ));
        }

        let hex = hex_upper(signature);
        let value = &mut pdf_data[contents_offset + 1..end - 1];
        value[..hex.len()].copy_from_slice(hex.as_bytes());
        value[hex.len()..].fill(b'0');
        Ok(())
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}
