//! The bridge between the host and the loaded provider.
//!
//! A bridge runs the whole signing flow inside the loaded module. Provider
//! failures leave it as `io::Error`s carrying the error sentinel (see
//! [`crate::translate`]); document failures leave it untouched.

pub mod cms;
pub mod signer;

use std::io::{self, Write};
use std::sync::Arc;

use chrono::{DateTime, FixedOffset};

use crate::pdf::{SignableDocument, SignatureOptions};
use crate::provider::CryptoProvider;

pub use cms::CardSigner;
pub use signer::CryptSignBridge;

/// Keywords injected into documents that have none.
pub const DEFAULT_KEYWORD: &str = "地方公共団体情報システム機構が運営する公的個人認証サービス ポータルサイト https://www.jpki.go.jp/ca/ca_rules3.html から署名用認証局の自己署名証明書（バイナリ形式）をダウンロードして信頼されたルート証明機関にインストールすることで署名を検証できるようになります。 ";

/// Entry point name of [`CryptSignBridge`].
pub const CRYPT_SIGN_BRIDGE: &str = "jpki.bridge.CryptSignBridge";

/// Per-signature values supplied by the host. Absent values are derived.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SignatureRequest {
    /// Signer name (default: from the card certificate)
    pub name: Option<String>,
    /// Reason (default: "<name> によって署名されています。")
    pub reason: Option<String>,
    /// Signing time (default: now)
    pub date: Option<DateTime<FixedOffset>>,
    /// Signing location
    pub location: Option<String>,
    /// Contact information
    pub contact: Option<String>,
}

impl SignatureRequest {
    /// Request with every value derived.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the signer name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Set the reason.
    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    /// Set the signing time.
    pub fn with_date(mut self, date: DateTime<FixedOffset>) -> Self {
        self.date = Some(date);
        self
    }

    /// Set the location.
    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }

    /// Set the contact information.
    pub fn with_contact(mut self, contact: impl Into<String>) -> Self {
        self.contact = Some(contact.into());
        self
    }
}

/// A signing bridge instantiated from a loaded module.
pub trait ProviderBridge: Send {
    /// Application name recorded in the signature's build properties.
    fn set_application_name(&mut self, name: Option<String>);

    /// Application version recorded with the name.
    fn set_application_version(&mut self, version: Option<String>);

    /// Sign `document` and write the signed result to `output`.
    fn add_signature(
        &self,
        output: &mut dyn Write,
        document: &mut dyn SignableDocument,
        request: SignatureRequest,
        options: Option<&SignatureOptions>,
    ) -> io::Result<()>;
}

/// Constructor of a bridge over a linked provider.
pub type BridgeFactory = fn(Arc<dyn CryptoProvider>) -> Box<dyn ProviderBridge>;

fn crypt_sign_bridge(provider: Arc<dyn CryptoProvider>) -> Box<dyn ProviderBridge> {
    Box::new(CryptSignBridge::new(provider))
}

/// The constructor for a manifest entry point, if known.
pub fn bridge_factory(entry_point: &str) -> Option<BridgeFactory> {
    match entry_point {
        CRYPT_SIGN_BRIDGE => Some(crypt_sign_bridge),
        _ => None,
    }
}
