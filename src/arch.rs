//! Process word size and the artefacts that depend on it.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

static BRIDGE_BUNDLE_32: &[u8] = include_bytes!(concat!(env!("OUT_DIR"), "/bridge32.zip"));
static BRIDGE_BUNDLE_64: &[u8] = include_bytes!(concat!(env!("OUT_DIR"), "/bridge64.zip"));

/// Word size of the running process.
///
/// The vendor middleware ships separate native binaries for each word size and
/// only the matching one can be loaded into this process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Architecture {
    /// 32-bit process
    Bits32,
    /// 64-bit process
    Bits64,
}

impl Architecture {
    /// The architecture of the running process.
    pub const fn current() -> Self {
        if cfg!(target_pointer_width = "64") {
            Architecture::Bits64
        } else {
            Architecture::Bits32
        }
    }

    /// Embedded support bundle (zip archive) for this architecture.
    pub fn embedded_bundle(self) -> &'static [u8] {
        match self {
            Architecture::Bits32 => BRIDGE_BUNDLE_32,
            Architecture::Bits64 => BRIDGE_BUNDLE_64,
        }
    }

    /// Vendor bundles installed with the JPKI user software.
    pub fn vendor_bundles(self) -> &'static [&'static str] {
        match self {
            Architecture::Bits32 => &["JPKICryptSignJNI.jar", "JPKIUserCertService.jar"],
            Architecture::Bits64 => &["JPKICryptSignJNI64.jar", "JPKIUserCertService64.jar"],
        }
    }

    /// Base name of the vendor's native CSP library.
    pub fn native_library(self) -> &'static str {
        match self {
            Architecture::Bits32 => "JPKICryptSignJNI",
            Architecture::Bits64 => "JPKICryptSignJNI64",
        }
    }

    /// Index used by the module registry.
    pub(crate) fn slot(self) -> usize {
        match self {
            Architecture::Bits32 => 0,
            Architecture::Bits64 => 1,
        }
    }
}

impl fmt::Display for Architecture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Architecture::Bits32 => write!(f, "32-bit"),
            Architecture::Bits64 => write!(f, "64-bit"),
        }
    }
}

impl FromStr for Architecture {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "32" | "x86" | "bits32" | "32-bit" => Ok(Architecture::Bits32),
            "64" | "x64" | "x86_64" | "amd64" | "bits64" | "64-bit" => Ok(Architecture::Bits64),
            other => Err(format!("unknown architecture: {}", other)),
        }
    }
}
