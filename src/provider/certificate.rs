//! Signer name from the card's signing certificate.

use der::{AnyRef, Decode, Tag, TagNumber, Tagged};
use x509_parser::prelude::{FromDer, GeneralName, X509Certificate};

use crate::translate::{TranslatedError, CERT_SERVICE_ERROR, CERT_SERVICE_NO_NAME};

/// otherName carrying the holder's name in JPKI signing certificates.
const JPKI_NAME_OID: &str = "1.2.392.200149.8.5.5.1";

/// Nesting allowed around the name value.
const MAX_WRAPPERS: usize = 4;

/// The name to show as the signer.
///
/// JPKI signing certificates carry the holder's registered name in a
/// subjectAltName otherName; the subject common name is used when that is
/// absent.
pub fn signer_display_name(cert_der: &[u8]) -> Result<String, TranslatedError> {
    let (_, cert) = X509Certificate::from_der(cert_der).map_err(|e| {
        TranslatedError::cert_service(
            CERT_SERVICE_ERROR,
            format!("Unreadable signing certificate: {}", e),
        )
    })?;

    if let Some(name) = registered_name(&cert) {
        return Ok(name);
    }

    let name = cert
        .subject()
        .iter_common_name()
        .next()
        .and_then(|cn| cn.as_str().ok())
        .map(str::trim)
        .filter(|cn| !cn.is_empty())
        .map(str::to_string)
        .ok_or_else(|| {
            TranslatedError::cert_service(
                CERT_SERVICE_NO_NAME,
                "The signing certificate does not name its holder",
            )
        });
    name
}

fn registered_name(cert: &X509Certificate<'_>) -> Option<String> {
    let san = cert.subject_alternative_name().ok()??;
    san.value
        .general_names
        .iter()
        .find_map(|name| match name {
            GeneralName::OtherName(oid, value) if oid.to_id_string() == JPKI_NAME_OID => {
                utf8_value(value)
            },
            _ => None,
        })
        .filter(|name| !name.trim().is_empty())
}

/// Unwrap `[0]` wrappers down to a UTF8String.
fn utf8_value(mut der: &[u8]) -> Option<String> {
    for _ in 0..MAX_WRAPPERS {
        let any = AnyRef::from_der(der).ok()?;
        match any.tag() {
            Tag::Utf8String => return std::str::from_utf8(any.value()).ok().map(str::to_string),
            Tag::ContextSpecific { number, .. } if number == TagNumber::N0 => der = any.value(),
            _ => return None,
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    const SIGNER: &[u8] = include_bytes!("../../tests/fixtures/signer.der");
    const SIGNER_SAN: &[u8] = include_bytes!("../../tests/fixtures/signer_san.der");
    const NO_NAME: &[u8] = include_bytes!("../../tests/fixtures/no_name.der");

    #[test]
    fn test_common_name() {
        assert_eq!(signer_display_name(SIGNER).unwrap(), "山田太郎");
    }

    #[test]
    fn test_registered_name_wins_over_common_name() {
        assert_eq!(signer_display_name(SIGNER_SAN).unwrap(), "公的 花子");
    }

    #[test]
    fn test_missing_name() {
        let err = signer_display_name(NO_NAME).unwrap_err();
        assert_eq!(err.code(), CERT_SERVICE_NO_NAME);
        assert_eq!(err.sub_code(), 0);
    }

    #[test]
    fn test_garbage_certificate() {
        let err = signer_display_name(b"not a certificate").unwrap_err();
        assert_eq!(err.code(), CERT_SERVICE_ERROR);
        assert_eq!(err.sub_code(), 0);
    }

    #[test]
    fn test_utf8_value_unwraps_context_tags() {
        // [0] { UTF8String "ab" }
        assert_eq!(utf8_value(&[0xA0, 0x04, 0x0C, 0x02, b'a', b'b']).as_deref(), Some("ab"));
        assert_eq!(utf8_value(&[0x0C, 0x01, b'x']).as_deref(), Some("x"));
        // PrintableString is not accepted
        assert_eq!(utf8_value(&[0x13, 0x01, b'x']), None);
    }
}
