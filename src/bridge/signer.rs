//! The signing flow.

use std::io::{self, Write};
use std::sync::Arc;

use chrono::Local;

use super::{CardSigner, ProviderBridge, SignatureRequest, DEFAULT_KEYWORD};
use crate::pdf::{SignableDocument, SignatureField, SignatureOptions};
use crate::provider::{signer_display_name, CryptoProvider, ProviderSession};
use crate::translate::{into_boundary_error, TranslatedError};

/// Failure inside the flow, before it is flattened for the boundary.
#[derive(Debug, thiserror::Error)]
enum SignError {
    #[error(transparent)]
    Provider(#[from] TranslatedError),

    #[error(transparent)]
    Document(#[from] io::Error),
}

impl From<SignError> for io::Error {
    fn from(e: SignError) -> Self {
        match e {
            SignError::Provider(e) => into_boundary_error(e),
            SignError::Document(e) => e,
        }
    }
}

/// Signs documents with the card through the vendor CSP.
///
/// The flow runs once per call with no retries:
///
/// 1. Inject [`DEFAULT_KEYWORD`] if the document has no keywords.
/// 2. Save and reload the document so the update applies to a clean file.
/// 3. Open a provider session and derive missing request values.
/// 4. Add the signature field and write the signed incremental update.
///
/// The session is closed on every path; a failing close is only logged.
pub struct CryptSignBridge {
    provider: Arc<dyn CryptoProvider>,
    application_name: Option<String>,
    application_version: Option<String>,
}

impl CryptSignBridge {
    /// Bridge over a linked provider.
    pub fn new(provider: Arc<dyn CryptoProvider>) -> Self {
        Self {
            provider,
            application_name: None,
            application_version: None,
        }
    }

    fn sign_prepared(
        &self,
        session: &ProviderSession<'_>,
        output: &mut dyn Write,
        document: &mut dyn SignableDocument,
        request: SignatureRequest,
        options: Option<&SignatureOptions>,
    ) -> Result<(), SignError> {
        let mut certificate = None;
        let name = match request.name {
            Some(name) => name,
            None => {
                let cert = session.certificate()?;
                let name = signer_display_name(&cert)?;
                certificate = Some(cert);
                name
            },
        };
        let reason = request
            .reason
            .unwrap_or_else(|| format!("{} によって署名されています。", name));
        let date = request.date.unwrap_or_else(|| Local::now().fixed_offset());

        let mut field = SignatureField::new()
            .with_name(name)
            .with_reason(reason)
            .with_signing_time(date);
        if let Some(location) = request.location {
            field = field.with_location(location);
        }
        if let Some(contact) = request.contact {
            field = field.with_contact_info(contact);
        }
        if let Some(app) = &self.application_name {
            field = field.with_build_app(app, self.application_version.as_deref().unwrap_or(""));
        }

        document.add_signature(field, options)?;

        let mut signer = CardSigner::new(session);
        if let Some(cert) = certificate {
            signer = signer.with_certificate(cert);
        }
        match document.save_incremental(output, &mut signer) {
            Ok(()) => Ok(()),
            Err(e) => match signer.take_failure() {
                Some(failure) => Err(SignError::Provider(failure)),
                None => Err(SignError::Document(e)),
            },
        }
    }

    fn run(
        &self,
        output: &mut dyn Write,
        document: &mut dyn SignableDocument,
        request: SignatureRequest,
        options: Option<&SignatureOptions>,
    ) -> Result<(), SignError> {
        if document.keywords().map_or(true, |k| k.is_empty()) {
            document.set_keywords(DEFAULT_KEYWORD)?;
        }

        let saved = document.save()?;
        let mut prepared = document.reload(&saved)?;

        let session = ProviderSession::open(self.provider.as_ref())?;
        let result = self.sign_prepared(&session, output, prepared.as_mut(), request, options);

        if let Err(e) = session.close() {
            log::warn!("Failed to release provider context: {}", e);
        }
        if result.is_ok() {
            log::info!("Document signed with the JPKI card");
        }
        result
    }
}

impl std::fmt::Debug for CryptSignBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CryptSignBridge")
            .field("application_name", &self.application_name)
            .field("application_version", &self.application_version)
            .finish_non_exhaustive()
    }
}

impl ProviderBridge for CryptSignBridge {
    fn set_application_name(&mut self, name: Option<String>) {
        self.application_name = name;
    }

    fn set_application_version(&mut self, version: Option<String>) {
        self.application_version = version;
    }

    fn add_signature(
        &self,
        output: &mut dyn Write,
        document: &mut dyn SignableDocument,
        request: SignatureRequest,
        options: Option<&SignatureOptions>,
    ) -> io::Result<()> {
        self.run(output, document, request, options).map_err(|e| {
            log::error!("Signing failed: {}", e);
            io::Error::from(e)
        })
    }
}
