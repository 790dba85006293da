//! Locating the installed JPKI user software.
//!
//! The install directory is read from the system configuration store
//! (`HKLM\SOFTWARE\JPKI`, value `InstallPath` on Windows). When that fails the
//! process search path is scanned for the vendor menu executable. Absence is a
//! normal result, not an error.

use std::env;
use std::path::{Path, PathBuf};

use once_cell::sync::OnceCell;

use crate::config::WrapperConfig;

/// Failure reading the system configuration store.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigLookupError {
    /// The key or value does not exist
    #[error("configuration value not found")]
    NotFound,

    /// Any other lookup failure
    #[error("configuration lookup failed: {0}")]
    Other(String),
}

/// Read access to the system configuration store.
pub trait ConfigStore: Send + Sync {
    /// Read a string value under `key`.
    fn read_string(&self, key: &str, value: &str) -> Result<String, ConfigLookupError>;
}

/// Filesystem and process environment queries used while locating.
pub trait Environment: Send + Sync {
    /// True if `path` exists and is a directory.
    fn is_dir(&self, path: &Path) -> bool;

    /// Full path of `executable` on the process search path.
    fn find_on_path(&self, executable: &str) -> Option<PathBuf>;

    /// Directory containing the host executable.
    fn host_dir(&self) -> Option<PathBuf>;
}

/// The machine's configuration store (the registry on Windows).
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemConfigStore;

#[cfg(windows)]
impl ConfigStore for SystemConfigStore {
    fn read_string(&self, key: &str, value: &str) -> Result<String, ConfigLookupError> {
        use winreg::enums::HKEY_LOCAL_MACHINE;
        use winreg::RegKey;

        let map_err = |e: std::io::Error| match e.kind() {
            std::io::ErrorKind::NotFound => ConfigLookupError::NotFound,
            _ => ConfigLookupError::Other(e.to_string()),
        };

        let hklm = RegKey::predef(HKEY_LOCAL_MACHINE);
        let subkey = hklm.open_subkey(key).map_err(map_err)?;
        subkey.get_value::<String, _>(value).map_err(map_err)
    }
}

#[cfg(not(windows))]
impl ConfigStore for SystemConfigStore {
    fn read_string(&self, _key: &str, _value: &str) -> Result<String, ConfigLookupError> {
        Err(ConfigLookupError::NotFound)
    }
}

/// The real process environment.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessEnvironment;

impl Environment for ProcessEnvironment {
    fn is_dir(&self, path: &Path) -> bool {
        path.is_dir()
    }

    fn find_on_path(&self, executable: &str) -> Option<PathBuf> {
        let paths = env::var_os("PATH")?;
        env::split_paths(&paths)
            .map(|dir| dir.join(executable))
            .find(|candidate| candidate.is_file())
    }

    fn host_dir(&self) -> Option<PathBuf> {
        let exe = env::current_exe().ok()?;
        exe.parent().map(Path::to_path_buf)
    }
}

/// Finds the JPKI install directory.
pub struct ProviderLocator {
    store: Box<dyn ConfigStore>,
    environment: Box<dyn Environment>,
    install_path_override: Option<PathBuf>,
    registry_key: String,
    registry_value: String,
    menu_executable: String,
}

impl ProviderLocator {
    /// Locator over the real system store and process environment.
    pub fn new(config: &WrapperConfig) -> Self {
        Self::with_sources(config, Box::new(SystemConfigStore), Box::new(ProcessEnvironment))
    }

    /// Locator over the given store and environment.
    pub fn with_sources(
        config: &WrapperConfig,
        store: Box<dyn ConfigStore>,
        environment: Box<dyn Environment>,
    ) -> Self {
        Self {
            store,
            environment,
            install_path_override: config.install_path_override.clone(),
            registry_key: config.registry_key.clone(),
            registry_value: config.registry_value.clone(),
            menu_executable: config.menu_executable.clone(),
        }
    }

    /// The install directory, if one exists.
    pub fn locate(&self) -> Option<PathBuf> {
        if let Some(path) = &self.install_path_override {
            if self.environment.is_dir(path) {
                return Some(path.clone());
            }
            log::warn!("Configured JPKI install path is not a directory: {}", path.display());
        }

        match self.store.read_string(&self.registry_key, &self.registry_value) {
            Ok(value) => {
                let path = PathBuf::from(value.trim_end_matches('\0'));
                if self.environment.is_dir(&path) {
                    log::debug!("JPKI install path from configuration store: {}", path.display());
                    return Some(path);
                }
                log::debug!("Configured install path does not exist: {}", path.display());
            },
            Err(ConfigLookupError::NotFound) => {},
            Err(e) => log::warn!("Reading {}\\{} failed: {}", self.registry_key, self.registry_value, e),
        }

        let executable = self.environment.find_on_path(&self.menu_executable)?;
        let dir = executable.parent()?.to_path_buf();
        if self.environment.is_dir(&dir) {
            log::debug!("JPKI install path from search path: {}", dir.display());
            Some(dir)
        } else {
            None
        }
    }

    /// Directory containing the host executable.
    pub fn host_dir(&self) -> Option<PathBuf> {
        self.environment.host_dir()
    }
}

static INSTALLED_PROVIDER_PATH: OnceCell<Option<PathBuf>> = OnceCell::new();

/// The process-wide install directory, located once on first use.
pub fn installed_provider_path() -> Option<&'static Path> {
    INSTALLED_PROVIDER_PATH
        .get_or_init(|| ProviderLocator::new(&WrapperConfig::from_env()).locate())
        .as_deref()
}

/// True if the JPKI user software is installed.
pub fn is_available() -> bool {
    installed_provider_path().is_some()
}
