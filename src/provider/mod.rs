//! Access to the card through the vendor's cryptographic service provider.
//!
//! [`CryptoProvider`] is the narrow seam between the signing flow and the
//! native CSP. [`NativeCsp`] binds it to the vendor's shared library; tests
//! substitute a software card.

pub mod certificate;
pub mod native;
pub mod session;

use crate::translate::TranslatedError;

pub use certificate::signer_display_name;
pub use native::{NativeCsp, SymbolTable};
pub use session::ProviderSession;

/// Opaque handle issued by the provider (context or key).
pub type RawHandle = i32;

/// Operations exported by the vendor's cryptographic service provider.
///
/// Every failure is already translated: it carries the CSP's error code and
/// the underlying Windows error as the sub-code.
pub trait CryptoProvider: Send + Sync {
    /// Acquire a provider context.
    fn acquire_context(&self, flags: u32) -> Result<RawHandle, TranslatedError>;

    /// Open the signing key of the inserted card.
    fn get_user_key(&self, context: RawHandle) -> Result<RawHandle, TranslatedError>;

    /// DER-encoded signing certificate bound to `key`.
    fn get_certificate_value(&self, key: RawHandle) -> Result<Vec<u8>, TranslatedError>;

    /// DER-encoded certificate of the issuing root CA.
    fn get_root_certificate_value(&self, context: RawHandle) -> Result<Vec<u8>, TranslatedError>;

    /// PKCS#1 v1.5 signature over a SHA-256 `digest`, computed on the card.
    fn sign_hash(&self, context: RawHandle, digest: &[u8]) -> Result<Vec<u8>, TranslatedError>;

    /// Release a key handle from [`get_user_key`](Self::get_user_key).
    fn destroy_key(&self, key: RawHandle) -> Result<(), TranslatedError>;

    /// Release a context from [`acquire_context`](Self::acquire_context).
    fn release_context(&self, context: RawHandle) -> Result<(), TranslatedError>;
}
