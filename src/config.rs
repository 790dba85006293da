//! Configuration for locating and loading the JPKI user software.

use std::env;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::arch::Architecture;

/// Default system configuration key holding the install location.
pub const DEFAULT_REGISTRY_KEY: &str = r"SOFTWARE\JPKI";
/// Default value name under [`DEFAULT_REGISTRY_KEY`].
pub const DEFAULT_REGISTRY_VALUE: &str = "InstallPath";
/// Vendor menu executable searched for on `PATH`.
pub const DEFAULT_MENU_EXECUTABLE: &str = "JPKIMenu.exe";
/// Bytes reserved for the signature container.
pub const DEFAULT_SIGNATURE_SIZE: usize = 0x2500;

/// How the vendor's native library is made loadable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum NativeLibraryStrategy {
    /// Copy the library next to the host executable and load the copy.
    #[default]
    CopyToHostDir,
    /// Load the library from the install directory.
    LoadInPlace,
}

impl std::str::FromStr for NativeLibraryStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "copy" | "copytohostdir" | "copy_to_host_dir" => Ok(NativeLibraryStrategy::CopyToHostDir),
            "inplace" | "in_place" | "loadinplace" | "load_in_place" => {
                Ok(NativeLibraryStrategy::LoadInPlace)
            },
            other => Err(format!("unknown native library strategy: {}", other)),
        }
    }
}

/// Wrapper configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WrapperConfig {
    /// Use this directory instead of locating the install.
    pub install_path_override: Option<PathBuf>,

    /// System configuration key holding the install location.
    pub registry_key: String,

    /// Value name under `registry_key`.
    pub registry_value: String,

    /// Vendor executable searched for on `PATH` as a fallback.
    pub menu_executable: String,

    /// Force an architecture instead of the running process's.
    pub architecture: Option<Architecture>,

    /// How the native library is made loadable.
    pub native_library_strategy: NativeLibraryStrategy,

    /// Directory receiving the copied native library (default: host executable dir).
    pub staging_dir: Option<PathBuf>,

    /// Bytes reserved for the signature container.
    pub preferred_signature_size: usize,
}

impl Default for WrapperConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl WrapperConfig {
    /// Create new configuration with defaults.
    pub fn new() -> Self {
        Self {
            install_path_override: None,
            registry_key: DEFAULT_REGISTRY_KEY.to_string(),
            registry_value: DEFAULT_REGISTRY_VALUE.to_string(),
            menu_executable: DEFAULT_MENU_EXECUTABLE.to_string(),
            architecture: None,
            native_library_strategy: NativeLibraryStrategy::default(),
            staging_dir: None,
            preferred_signature_size: DEFAULT_SIGNATURE_SIZE,
        }
    }

    /// Defaults overridden by `JPKI_INSTALL_PATH`, `JPKI_ARCH` and
    /// `JPKI_NATIVE_STRATEGY`.
    pub fn from_env() -> Self {
        let mut config = Self::new();

        if let Some(path) = env::var_os("JPKI_INSTALL_PATH") {
            if !path.is_empty() {
                config.install_path_override = Some(PathBuf::from(path));
            }
        }

        if let Ok(value) = env::var("JPKI_ARCH") {
            match value.parse() {
                Ok(arch) => config.architecture = Some(arch),
                Err(e) => log::warn!("Ignoring JPKI_ARCH: {}", e),
            }
        }

        if let Ok(value) = env::var("JPKI_NATIVE_STRATEGY") {
            match value.parse() {
                Ok(strategy) => config.native_library_strategy = strategy,
                Err(e) => log::warn!("Ignoring JPKI_NATIVE_STRATEGY: {}", e),
            }
        }

        config
    }

    /// Parse configuration from JSON. Missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Use a fixed install directory.
    pub fn with_install_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.install_path_override = Some(path.into());
        self
    }

    /// Set the system configuration key and value name.
    pub fn with_registry(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.registry_key = key.into();
        self.registry_value = value.into();
        self
    }

    /// Set the executable searched for on `PATH`.
    pub fn with_menu_executable(mut self, name: impl Into<String>) -> Self {
        self.menu_executable = name.into();
        self
    }

    /// Force an architecture.
    pub fn with_architecture(mut self, arch: Architecture) -> Self {
        self.architecture = Some(arch);
        self
    }

    /// Set the native library strategy.
    pub fn with_native_library_strategy(mut self, strategy: NativeLibraryStrategy) -> Self {
        self.native_library_strategy = strategy;
        self
    }

    /// Set the directory receiving the copied native library.
    pub fn with_staging_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.staging_dir = Some(dir.into());
        self
    }

    /// Set the reserved signature size.
    pub fn with_signature_size(mut self, size: usize) -> Self {
        self.preferred_signature_size = size;
        self
    }

    /// The architecture to load: the override, or the running process's.
    pub fn effective_architecture(&self) -> Architecture {
        self.architecture.unwrap_or_else(Architecture::current)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = WrapperConfig::new();
        assert_eq!(config.registry_key, r"SOFTWARE\JPKI");
        assert_eq!(config.registry_value, "InstallPath");
        assert_eq!(config.menu_executable, "JPKIMenu.exe");
        assert_eq!(config.native_library_strategy, NativeLibraryStrategy::CopyToHostDir);
        assert_eq!(config.preferred_signature_size, 0x2500);
        assert_eq!(config.effective_architecture(), Architecture::current());
    }

    #[test]
    fn test_builder() {
        let config = WrapperConfig::new()
            .with_install_path(r"C:\JPKI")
            .with_architecture(Architecture::Bits32)
            .with_native_library_strategy(NativeLibraryStrategy::LoadInPlace)
            .with_signature_size(0x4000);
        assert_eq!(config.install_path_override, Some(PathBuf::from(r"C:\JPKI")));
        assert_eq!(config.effective_architecture(), Architecture::Bits32);
        assert_eq!(config.native_library_strategy, NativeLibraryStrategy::LoadInPlace);
        assert_eq!(config.preferred_signature_size, 0x4000);
    }

    #[test]
    fn test_from_json_partial() {
        let config =
            WrapperConfig::from_json(r#"{"architecture":"Bits64","preferred_signature_size":4096}"#)
                .unwrap();
        assert_eq!(config.architecture, Some(Architecture::Bits64));
        assert_eq!(config.preferred_signature_size, 4096);
        assert_eq!(config.menu_executable, "JPKIMenu.exe");
    }

    #[test]
    fn test_from_json_rejects_garbage() {
        assert!(WrapperConfig::from_json("not json").is_err());
    }

    #[test]
    fn test_strategy_parse() {
        assert_eq!("copy".parse(), Ok(NativeLibraryStrategy::CopyToHostDir));
        assert_eq!("in_place".parse(), Ok(NativeLibraryStrategy::LoadInPlace));
        assert!("symlink".parse::<NativeLibraryStrategy>().is_err());
    }
}
