//! Translation of native provider failures.
//!
//! A provider failure is a pair of integers: the bridge's domain error code and
//! the vendor/OS status code underneath it. Well-known smart card status codes
//! map to a fixed English/Japanese message pair; anything else keeps the native
//! layer's own text.
//!
//! Failures crossing the bridge boundary travel as an `std::io::Error` whose
//! message is the sentinel `!ErrorCode=<int>,WinErrorCode=<int>`. [`encode`] and
//! [`decode`] define that wire format; [`into_boundary_error`] and
//! [`from_boundary_error`] apply it to `io::Error`.

use std::fmt;
use std::io;

use lazy_static::lazy_static;
use regex::Regex;

/// The reader or card is not ready.
pub const SCARD_E_NOT_READY: i32 = 0x8010_0010_u32 as i32;
/// The inserted card is not a recognized card type.
pub const SCARD_E_UNKNOWN_CARD: i32 = 0x8010_000D_u32 as i32;
/// PIN attempts exhausted; the card is locked.
pub const SCARD_W_CHV_BLOCKED: i32 = 0x8010_006C_u32 as i32;
/// The user cancelled the PIN dialog.
pub const SCARD_W_CANCELLED_BY_USER: i32 = 0x8010_006E_u32 as i32;

/// Domain code for certificate-service failures (no vendor sub-code).
pub const CERT_SERVICE_ERROR: i32 = 0x0100;
/// Domain code for a certificate whose subject carries no usable name.
pub const CERT_SERVICE_NO_NAME: i32 = 0x0101;

const SENTINEL_PREFIX: char = '!';

lazy_static! {
    static ref SENTINEL_PATTERN: Regex =
        Regex::new(r"^!ErrorCode=(-?[0-9]+),WinErrorCode=(-?[0-9]+)$")
            .expect("sentinel pattern is valid");
}

/// English and Japanese message for a well-known status code.
fn known_messages(sub_code: i32) -> Option<(&'static str, &'static str)> {
    match sub_code {
        SCARD_E_NOT_READY => Some((
            "The reader or smart card is not ready to accept commands.",
            "読み取り装置またはスマート カードは、コマンドを受け取る準備ができていません。",
        )),
        SCARD_E_UNKNOWN_CARD => Some((
            "The specified smart card name is not recognized.",
            "認識できないスマート カードです。",
        )),
        SCARD_W_CHV_BLOCKED => Some((
            "The card cannot be accessed because the maximum number of PIN entry attempts has been reached.",
            "パスワードの入力試行が最大回数に達したため、カードはロックされています。",
        )),
        SCARD_W_CANCELLED_BY_USER => Some((
            "The action was cancelled by the user.",
            "ユーザーによって操作は取り消されました。",
        )),
        _ => None,
    }
}

/// A provider failure with its bilingual message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranslatedError {
    code: i32,
    sub_code: i32,
    message: String,
    localized_message: String,
}

impl TranslatedError {
    /// Translate a `(code, sub_code)` pair.
    ///
    /// `native_message` is used for both languages when the sub-code is not in
    /// the table.
    pub fn new(code: i32, sub_code: i32, native_message: impl Into<String>) -> Self {
        match known_messages(sub_code) {
            Some((message, localized)) => Self {
                code,
                sub_code,
                message: message.to_string(),
                localized_message: localized.to_string(),
            },
            None => {
                let message = native_message.into();
                Self {
                    code,
                    sub_code,
                    localized_message: message.clone(),
                    message,
                }
            },
        }
    }

    /// A certificate-service failure. These carry no vendor sub-code.
    pub fn cert_service(code: i32, message: impl Into<String>) -> Self {
        Self::new(code, 0, message)
    }

    /// Domain error code reported by the bridge.
    pub fn code(&self) -> i32 {
        self.code
    }

    /// Vendor/OS status code (`0` when there is none).
    pub fn sub_code(&self) -> i32 {
        self.sub_code
    }

    /// English message.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Japanese message.
    pub fn localized_message(&self) -> &str {
        &self.localized_message
    }

    /// True when the sub-code is one of the table's well-known codes.
    pub fn is_well_known(&self) -> bool {
        known_messages(self.sub_code).is_some()
    }
}

impl fmt::Display for TranslatedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for TranslatedError {}

/// Encode a code pair into the sentinel string.
pub fn encode(code: i32, sub_code: i32) -> String {
    format!("!ErrorCode={},WinErrorCode={}", code, sub_code)
}

/// Decode a sentinel string into its code pair.
///
/// Returns `None` unless the whole message is a sentinel with two in-range
/// 32-bit integers.
pub fn decode(message: &str) -> Option<(i32, i32)> {
    let caps = SENTINEL_PATTERN.captures(message)?;
    let code = caps.get(1)?.as_str().parse::<i32>().ok()?;
    let sub_code = caps.get(2)?.as_str().parse::<i32>().ok()?;
    Some((code, sub_code))
}

/// True when a message claims to be a sentinel (leading `!`).
pub fn looks_like_sentinel(message: &str) -> bool {
    message.starts_with(SENTINEL_PREFIX)
}

/// Payload of an `io::Error` crossing the bridge boundary.
///
/// Its `Display` is exactly the sentinel; the translated error is kept as the
/// source so the native message survives for unknown codes.
#[derive(Debug)]
pub struct BoundaryError {
    sentinel: String,
    source: TranslatedError,
}

impl BoundaryError {
    /// The sentinel text.
    pub fn sentinel(&self) -> &str {
        &self.sentinel
    }
}

impl fmt::Display for BoundaryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.sentinel)
    }
}

impl std::error::Error for BoundaryError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.source)
    }
}

/// Wrap a provider failure for the trip across the bridge boundary.
pub fn into_boundary_error(error: TranslatedError) -> io::Error {
    let sentinel = encode(error.code, error.sub_code);
    io::Error::new(
        io::ErrorKind::Other,
        BoundaryError {
            sentinel,
            source: error,
        },
    )
}

/// Outcome of decoding a failure that came back across the boundary.
#[derive(Debug)]
pub enum BoundaryOutcome {
    /// A well-formed sentinel, rebuilt into a provider error
    Provider(TranslatedError),
    /// A message that starts like a sentinel but does not parse
    Malformed(String),
    /// An ordinary I/O failure, returned untouched
    Passthrough(io::Error),
}

/// Reconstruct a provider error from a boundary `io::Error`.
pub fn from_boundary_error(error: io::Error) -> BoundaryOutcome {
    let message = error.to_string();
    if !looks_like_sentinel(&message) {
        return BoundaryOutcome::Passthrough(error);
    }

    let Some((code, sub_code)) = decode(&message) else {
        log::debug!("Malformed error sentinel from bridge: {}", message);
        return BoundaryOutcome::Malformed(message);
    };

    let native_message = error
        .get_ref()
        .and_then(|inner| inner.downcast_ref::<BoundaryError>())
        .map(|boundary| boundary.source.message.clone())
        .unwrap_or_else(|| message.clone());

    BoundaryOutcome::Provider(TranslatedError::new(code, sub_code, native_message))
}
