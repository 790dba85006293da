//! Error types for the JPKI wrapper.
//!
//! Every failure that reaches the host application is a [`JpkiError`]. Provider
//! failures carry a [`TranslatedError`] with an English and a Japanese message,
//! load failures carry a [`LoadError`], and document I/O failures keep the
//! original `std::io::Error` untouched.

use std::path::PathBuf;

use crate::translate::TranslatedError;

/// Result type alias for wrapper operations.
pub type Result<T> = std::result::Result<T, JpkiError>;

const PROVIDER_UNAVAILABLE_MESSAGE: &str =
    "JPKI user software was not found. Make sure that the JPKI user software is correctly installed.";
const PROVIDER_UNAVAILABLE_LOCALIZED: &str =
    "JPKI利用者ソフトが見つかりませんでした。JPKI利用者ソフトが正しくインストールされていることを確認してください。";

/// Errors surfaced to the host application.
#[derive(Debug, thiserror::Error)]
pub enum JpkiError {
    /// No JPKI user software installation was located
    #[error("{message}")]
    ProviderUnavailable {
        /// English message
        message: String,
        /// Japanese message
        localized_message: String,
    },

    /// The bridge module or the vendor's native library could not be loaded
    #[error("Failed to load the JPKI bridge: {0}")]
    LoadFailure(#[from] LoadError),

    /// The card or the vendor middleware reported a failure
    #[error(transparent)]
    Provider(#[from] TranslatedError),

    /// Document I/O failure unrelated to the provider
    #[error(transparent)]
    Document(std::io::Error),

    /// A boundary failure carried a malformed error sentinel
    #[error("Unrecognized error from the JPKI bridge: {0}")]
    BoundaryDecode(String),
}

impl JpkiError {
    /// The error raised when the JPKI user software is not installed.
    pub fn provider_unavailable() -> Self {
        JpkiError::ProviderUnavailable {
            message: PROVIDER_UNAVAILABLE_MESSAGE.to_string(),
            localized_message: PROVIDER_UNAVAILABLE_LOCALIZED.to_string(),
        }
    }

    /// Japanese message suitable for direct display.
    pub fn localized_message(&self) -> String {
        match self {
            JpkiError::ProviderUnavailable {
                localized_message, ..
            } => localized_message.clone(),
            JpkiError::LoadFailure(e) => {
                format!("JPKI利用者ソフトの読み込みに失敗しました。({})", e)
            },
            JpkiError::Provider(e) => e.localized_message().to_string(),
            JpkiError::Document(e) => format!("文書の読み書きに失敗しました。({})", e),
            JpkiError::BoundaryDecode(message) => {
                format!("JPKI利用者ソフトから不明なエラーが返されました。({})", message)
            },
        }
    }

    /// The translated provider error, if this is a provider failure.
    pub fn as_provider_error(&self) -> Option<&TranslatedError> {
        match self {
            JpkiError::Provider(e) => Some(e),
            _ => None,
        }
    }
}

/// Failures while loading the isolated bridge module.
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    /// The provider path handed to the loader is not a directory
    #[error("JPKI install path does not exist: {0}")]
    ProviderPathMissing(PathBuf),

    /// The embedded bundle for this architecture is unreadable (corrupted build)
    #[error("Embedded bridge bundle is corrupt: {0}")]
    CorruptBundle(String),

    /// A vendor bundle is missing or could not be opened
    #[error("Vendor bundle {path} could not be opened: {reason}")]
    BundleMissing {
        /// Archive path
        path: PathBuf,
        /// Reason reported by the archive reader
        reason: String,
    },

    /// The vendor's native shared library is missing or could not be loaded
    #[error("Native library {name} is unavailable: {reason}")]
    NativeLibraryUnavailable {
        /// Library file name
        name: String,
        /// Reason for the failure
        reason: String,
    },

    /// The native library does not export a required symbol
    #[error("Native library {library} does not export {symbol}")]
    SymbolMissing {
        /// Library file name
        library: String,
        /// Missing symbol
        symbol: String,
    },

    /// The bundle's entry point could not be resolved
    #[error("Bridge entry point not found: {0}")]
    EntryPointMissing(String),

    /// IO error while staging native files
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_unavailable_is_bilingual() {
        let err = JpkiError::provider_unavailable();
        assert!(err.to_string().contains("JPKI user software was not found"));
        assert!(err.localized_message().starts_with("JPKI利用者ソフトが見つかりませんでした"));
    }

    #[test]
    fn test_provider_error_messages() {
        let err = JpkiError::Provider(TranslatedError::new(5, 0x8010006E_u32 as i32, "native"));
        assert_eq!(err.to_string(), "The action was cancelled by the user.");
        assert_eq!(err.localized_message(), "ユーザーによって操作は取り消されました。");
        assert!(err.as_provider_error().is_some());
    }

    #[test]
    fn test_load_error_display() {
        let err = LoadError::SymbolMissing {
            library: "JPKICryptSignJNI64.dll".to_string(),
            symbol: "JPKICryptSignHash".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("JPKICryptSignJNI64.dll"));
        assert!(msg.contains("JPKICryptSignHash"));
    }

    #[test]
    fn test_error_is_send_and_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<JpkiError>();
        assert_send_sync::<LoadError>();
    }
}
