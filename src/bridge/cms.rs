//! Detached CMS SignedData produced with the card's key.

use std::io;

use cms::cert::{CertificateChoices, IssuerAndSerialNumber};
use cms::content_info::{CmsVersion, ContentInfo};
use cms::signed_data::{
    CertificateSet, EncapsulatedContentInfo, SignedAttributes, SignedData, SignerIdentifier,
    SignerInfo, SignerInfos,
};
use der::asn1::{Null, ObjectIdentifier, OctetString, SetOfVec};
use der::{Any, Decode, Encode};
use sha2::{Digest, Sha256};
use spki::AlgorithmIdentifierOwned;
use x509_cert::attr::Attribute;
use x509_cert::Certificate;

use crate::pdf::SignatureInterface;
use crate::provider::ProviderSession;
use crate::translate::{into_boundary_error, TranslatedError};

/// id-signedData
pub const ID_SIGNED_DATA: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.113549.1.7.2");
/// id-data
pub const ID_DATA: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.113549.1.7.1");
/// id-contentType
pub const ID_CONTENT_TYPE: ObjectIdentifier =
    ObjectIdentifier::new_unwrap("1.2.840.113549.1.9.3");
/// id-messageDigest
pub const ID_MESSAGE_DIGEST: ObjectIdentifier =
    ObjectIdentifier::new_unwrap("1.2.840.113549.1.9.4");
/// id-sha256
pub const ID_SHA256: ObjectIdentifier = ObjectIdentifier::new_unwrap("2.16.840.1.101.3.4.2.1");
/// rsaEncryption
pub const RSA_ENCRYPTION: ObjectIdentifier =
    ObjectIdentifier::new_unwrap("1.2.840.113549.1.1.1");

fn encoding_error(e: der::Error) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, format!("CMS encoding failed: {}", e))
}

/// Signs PDF byte-range digests on the card.
///
/// The signing certificate is read from the session on first use unless it
/// was supplied up front. The root CA certificate is added to the
/// certificate set when the provider returns one.
pub struct CardSigner<'s, 'p> {
    session: &'s ProviderSession<'p>,
    certificate: Option<Vec<u8>>,
    failure: Option<TranslatedError>,
}

impl<'s, 'p> CardSigner<'s, 'p> {
    /// Signer over an open session.
    pub fn new(session: &'s ProviderSession<'p>) -> Self {
        Self {
            session,
            certificate: None,
            failure: None,
        }
    }

    /// Use an already-read signing certificate.
    pub fn with_certificate(mut self, certificate: Vec<u8>) -> Self {
        self.certificate = Some(certificate);
        self
    }

    /// The provider failure raised during [`sign`](SignatureInterface::sign), if any.
    pub fn take_failure(&mut self) -> Option<TranslatedError> {
        self.failure.take()
    }

    fn provider<T>(&mut self, result: Result<T, TranslatedError>) -> io::Result<T> {
        result.map_err(|e| {
            self.failure = Some(e.clone());
            into_boundary_error(e)
        })
    }

    fn signed_data(&mut self, digest: &[u8]) -> io::Result<Vec<u8>> {
        let cert_der = match self.certificate.take() {
            Some(cert) => cert,
            None => {
                let read = self.session.certificate();
                self.provider(read)?
            },
        };
        let certificate = Certificate::from_der(&cert_der).map_err(|e| {
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!("Unreadable signing certificate: {}", e),
            )
        })?;

        let root = match self.session.root_certificate() {
            Ok(der) if der == cert_der => None,
            Ok(der) => match Certificate::from_der(&der) {
                Ok(root) => Some(root),
                Err(e) => {
                    log::warn!("Ignoring unreadable root certificate: {}", e);
                    None
                },
            },
            Err(e) => {
                log::warn!("Root certificate unavailable: {}", e);
                None
            },
        };

        let signed_attrs = signed_attributes(digest).map_err(encoding_error)?;
        let to_sign = Sha256::digest(signed_attrs.to_der().map_err(encoding_error)?);
        let signed = self.session.sign(&to_sign);
        let signature = self.provider(signed)?;

        let signer_info = SignerInfo {
            version: CmsVersion::V1,
            sid: SignerIdentifier::IssuerAndSerialNumber(IssuerAndSerialNumber {
                issuer: certificate.tbs_certificate.issuer.clone(),
                serial_number: certificate.tbs_certificate.serial_number.clone(),
            }),
            digest_alg: sha256(),
            signed_attrs: Some(signed_attrs),
            signature_algorithm: AlgorithmIdentifierOwned {
                oid: RSA_ENCRYPTION,
                parameters: Some(Any::encode_from(&Null).map_err(encoding_error)?),
            },
            signature: OctetString::new(signature).map_err(encoding_error)?,
            unsigned_attrs: None,
        };

        let mut certificates = vec![CertificateChoices::Certificate(certificate)];
        certificates.extend(root.map(CertificateChoices::Certificate));

        let signed_data = SignedData {
            version: CmsVersion::V1,
            digest_algorithms: SetOfVec::try_from(vec![sha256()]).map_err(encoding_error)?,
            encap_content_info: EncapsulatedContentInfo {
                econtent_type: ID_DATA,
                econtent: None,
            },
            certificates: Some(CertificateSet(
                SetOfVec::try_from(certificates).map_err(encoding_error)?,
            )),
            crls: None,
            signer_infos: SignerInfos(
                SetOfVec::try_from(vec![signer_info]).map_err(encoding_error)?,
            ),
        };

        let content_info = ContentInfo {
            content_type: ID_SIGNED_DATA,
            content: Any::encode_from(&signed_data).map_err(encoding_error)?,
        };
        content_info.to_der().map_err(encoding_error)
    }
}

impl SignatureInterface for CardSigner<'_, '_> {
    fn sign(&mut self, digest: &[u8]) -> io::Result<Vec<u8>> {
        let der = self.signed_data(digest)?;
        log::debug!("Built CMS signature ({} bytes)", der.len());
        Ok(der)
    }
}

fn sha256() -> AlgorithmIdentifierOwned {
    AlgorithmIdentifierOwned {
        oid: ID_SHA256,
        parameters: None,
    }
}

/// contentType and messageDigest attributes over `digest`.
fn signed_attributes(digest: &[u8]) -> der::Result<SignedAttributes> {
    let content_type = Attribute {
        oid: ID_CONTENT_TYPE,
        values: SetOfVec::try_from(vec![Any::encode_from(&ID_DATA)?])?,
    };
    let message_digest = Attribute {
        oid: ID_MESSAGE_DIGEST,
        values: SetOfVec::try_from(vec![Any::encode_from(&OctetString::new(digest)?)?])?,
    };
    SetOfVec::try_from(vec![content_type, message_digest])
}
