//! Scoped provider context.

use super::{CryptoProvider, RawHandle};
use crate::translate::TranslatedError;

/// An acquired provider context, released exactly once.
///
/// [`close`](Self::close) releases the context and reports the result;
/// dropping an unclosed session releases it and logs any failure.
pub struct ProviderSession<'p> {
    provider: &'p dyn CryptoProvider,
    context: RawHandle,
    open: bool,
}

impl<'p> ProviderSession<'p> {
    /// Acquire a context from `provider`.
    pub fn open(provider: &'p dyn CryptoProvider) -> Result<Self, TranslatedError> {
        let context = provider.acquire_context(0)?;
        log::debug!("Acquired provider context");
        Ok(Self {
            provider,
            context,
            open: true,
        })
    }

    /// The card's signing certificate (DER).
    ///
    /// The transient key handle is destroyed whether or not the read
    /// succeeds. A read failure takes precedence over a destroy failure.
    pub fn certificate(&self) -> Result<Vec<u8>, TranslatedError> {
        let key = self.provider.get_user_key(self.context)?;
        let value = self.provider.get_certificate_value(key);
        let destroyed = self.provider.destroy_key(key);

        match (value, destroyed) {
            (Ok(cert), Ok(())) => Ok(cert),
            (Ok(_), Err(e)) => Err(e),
            (Err(e), Ok(())) => Err(e),
            (Err(e), Err(destroy_err)) => {
                log::warn!("Failed to destroy user key after read error: {}", destroy_err);
                Err(e)
            },
        }
    }

    /// Certificate of the issuing root CA (DER).
    pub fn root_certificate(&self) -> Result<Vec<u8>, TranslatedError> {
        self.provider.get_root_certificate_value(self.context)
    }

    /// Sign a SHA-256 digest with the card's private key.
    pub fn sign(&self, digest: &[u8]) -> Result<Vec<u8>, TranslatedError> {
        self.provider.sign_hash(self.context, digest)
    }

    /// Release the context.
    pub fn close(mut self) -> Result<(), TranslatedError> {
        self.open = false;
        self.provider.release_context(self.context)?;
        log::debug!("Released provider context");
        Ok(())
    }
}

impl Drop for ProviderSession<'_> {
    fn drop(&mut self) {
        if self.open {
            self.open = false;
            if let Err(e) = self.provider.release_context(self.context) {
                log::warn!("Failed to release provider context: {}", e);
            }
        }
    }
}

impl std::fmt::Debug for ProviderSession<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderSession")
            .field("open", &self.open)
            .finish_non_exhaustive()
    }
}
