//! Signature field description, options and read-back.

use std::io;

use chrono::{DateTime, FixedOffset};

use super::object::{Dictionary, Object};

/// `/Filter` value for the Adobe default security handler.
pub const FILTER_ADOBE_PPKLITE: &str = "Adobe.PPKLite";

/// `/SubFilter` value for a detached PKCS#7 (CMS) signature.
pub const SUBFILTER_ADBE_PKCS7_DETACHED: &str = "adbe.pkcs7.detached";

/// Bytes reserved for the signature value when no size is requested.
pub const DEFAULT_SIGNATURE_SIZE: usize = 0x2500;

/// Values written into a new signature dictionary.
#[derive(Debug, Clone, PartialEq)]
pub struct SignatureField {
    /// `/Filter`
    pub filter: String,
    /// `/SubFilter`
    pub sub_filter: String,
    /// `/Name`
    pub name: Option<String>,
    /// `/Reason`
    pub reason: Option<String>,
    /// `/M`
    pub signing_time: Option<DateTime<FixedOffset>>,
    /// `/Location`
    pub location: Option<String>,
    /// `/ContactInfo`
    pub contact_info: Option<String>,
    /// `/Prop_Build /App` name and version
    pub build_app: Option<(String, String)>,
}

impl Default for SignatureField {
    fn default() -> Self {
        Self {
            filter: FILTER_ADOBE_PPKLITE.to_string(),
            sub_filter: SUBFILTER_ADBE_PKCS7_DETACHED.to_string(),
            name: None,
            reason: None,
            signing_time: None,
            location: None,
            contact_info: None,
            build_app: None,
        }
    }
}

impl SignatureField {
    /// Detached PKCS#7 field for the Adobe default handler.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the signer name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Set the reason for signing.
    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    /// Set the signing time.
    pub fn with_signing_time(mut self, time: DateTime<FixedOffset>) -> Self {
        self.signing_time = Some(time);
        self
    }

    /// Set the signing location.
    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }

    /// Set the contact information.
    pub fn with_contact_info(mut self, contact: impl Into<String>) -> Self {
        self.contact_info = Some(contact.into());
        self
    }

    /// Record the signing application in `/Prop_Build`.
    pub fn with_build_app(mut self, name: impl Into<String>, version: impl Into<String>) -> Self {
        self.build_app = Some((name.into(), version.into()));
        self
    }

    /// Signature dictionary entries, without `/Contents` and `/ByteRange`.
    pub(crate) fn to_dictionary(&self) -> Dictionary {
        let mut dict = Dictionary::new();
        dict.insert("Type".to_string(), Object::name("Sig"));
        dict.insert("Filter".to_string(), Object::name(&self.filter));
        dict.insert("SubFilter".to_string(), Object::name(&self.sub_filter));

        let texts = [
            ("Name", &self.name),
            ("Reason", &self.reason),
            ("Location", &self.location),
            ("ContactInfo", &self.contact_info),
        ];
        for (key, value) in texts {
            if let Some(value) = value {
                dict.insert(key.to_string(), Object::text(value));
            }
        }

        if let Some(time) = &self.signing_time {
            dict.insert("M".to_string(), Object::String(format_pdf_date(time).into_bytes()));
        }

        if let Some((name, version)) = &self.build_app {
            let mut app = Dictionary::new();
            app.insert("Name".to_string(), Object::name(name));
            app.insert("REx".to_string(), Object::text(version));
            app.insert("TrustedMode".to_string(), Object::Boolean(true));

            let mut prop_build = Dictionary::new();
            prop_build.insert("App".to_string(), Object::Dictionary(app));
            dict.insert("Prop_Build".to_string(), Object::Dictionary(prop_build));
        }

        dict
    }
}

/// Options for placing a signature.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SignatureOptions {
    /// Bytes reserved for the DER signature
    pub preferred_signature_size: Option<usize>,
    /// Zero-based page receiving the widget (first page by default)
    pub page: Option<usize>,
}

impl SignatureOptions {
    /// Default options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve `size` bytes for the signature value.
    pub fn with_preferred_signature_size(mut self, size: usize) -> Self {
        self.preferred_signature_size = Some(size);
        self
    }

    /// Put the widget on page `page` (zero-based).
    pub fn with_page(mut self, page: usize) -> Self {
        self.page = Some(page);
        self
    }

    /// Reserved size, falling back to [`DEFAULT_SIGNATURE_SIZE`].
    pub fn signature_size(&self) -> usize {
        self.preferred_signature_size.unwrap_or(DEFAULT_SIGNATURE_SIZE)
    }
}

/// Callback that turns the byte-range digest into an encoded signature.
pub trait SignatureInterface {
    /// Sign the SHA-256 digest of the signed byte ranges and return the
    /// DER-encoded signature container.
    fn sign(&mut self, digest: &[u8]) -> io::Result<Vec<u8>>;
}

impl<F> SignatureInterface for F
where
    F: FnMut(&[u8]) -> io::Result<Vec<u8>>,
{
    fn sign(&mut self, digest: &[u8]) -> io::Result<Vec<u8>> {
        self(digest)
    }
}

/// A signature found in a saved document.
#[derive(Debug, Clone, Default)]
pub struct SignatureInfo {
    /// `/Name`
    pub signer_name: Option<String>,
    /// `/M`, as written
    pub signing_time: Option<String>,
    /// `/Reason`
    pub reason: Option<String>,
    /// `/Location`
    pub location: Option<String>,
    /// `/ContactInfo`
    pub contact_info: Option<String>,
    /// `/Filter`
    pub filter: Option<String>,
    /// `/SubFilter`
    pub sub_filter: Option<String>,
    /// `/Prop_Build /App /Name`
    pub build_app_name: Option<String>,
    /// `/ByteRange`
    pub byte_range: Vec<i64>,
    /// `/Contents`, including any zero padding
    pub contents: Vec<u8>,
}

impl SignatureInfo {
    /// Read the fields of a signature dictionary.
    pub(crate) fn from_dictionary(dict: &Dictionary) -> Self {
        let text = |key: &str| dict.get(key).and_then(Object::as_text);
        let name = |key: &str| dict.get(key).and_then(Object::as_name).map(str::to_string);

        let build_app_name = dict
            .get("Prop_Build")
            .and_then(Object::as_dict)
            .and_then(|pb| pb.get("App"))
            .and_then(Object::as_dict)
            .and_then(|app| app.get("Name"))
            .and_then(|n| n.as_name().map(str::to_string).or_else(|| n.as_text()));

        let byte_range = dict
            .get("ByteRange")
            .and_then(Object::as_array)
            .map(|arr| arr.iter().filter_map(Object::as_integer).collect())
            .unwrap_or_default();

        Self {
            signer_name: text("Name"),
            signing_time: text("M"),
            reason: text("Reason"),
            location: text("Location"),
            contact_info: text("ContactInfo"),
            filter: name("Filter"),
            sub_filter: name("SubFilter"),
            build_app_name,
            byte_range,
            contents: dict
                .get("Contents")
                .and_then(Object::as_string)
                .map(<[u8]>::to_vec)
                .unwrap_or_default(),
        }
    }

    /// `/Contents` without the trailing zero padding.
    ///
    /// A DER value may itself end in zero bytes; decoders should read the
    /// padded value and stop at the end of the outer TLV.
    pub fn trimmed_contents(&self) -> &[u8] {
        let end = self
            .contents
            .iter()
            .rposition(|&b| b != 0)
            .map_or(0, |p| p + 1);
        &self.contents[..end]
    }

    /// True when the ByteRange has two ranges starting at zero.
    pub fn covers_whole_document(&self, file_size: usize) -> bool {
        match self.byte_range.as_slice() {
            [0, _, offset2, length2] => offset2 + length2 == file_size as i64,
            _ => false,
        }
    }
}

/// Format a time as a PDF date string: `D:YYYYMMDDHHmmSS+HH'mm'`.
pub fn format_pdf_date(time: &DateTime<FixedOffset>) -> String {
    let offset = time.offset().local_minus_utc();
    let sign = if offset < 0 { '-' } else { '+' };
    let offset = offset.abs();
    format!(
        "D:{}{}{:02}'{:02}'",
        time.format("%Y%m%d%H%M%S"),
        sign,
        offset / 3600,
        (offset % 3600) / 60
    )
}
