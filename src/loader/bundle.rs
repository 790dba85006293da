//! Bundles, unit sources and the resolver chain.
//!
//! A unit is a named blob (manifest, native library, ...) that the loader
//! resolves by name. Sources are consulted in order and the first hit wins:
//! the embedded bundle, then the vendor bundles installed with the JPKI user
//! software, then plain files in the provider and host directories.

use std::collections::HashMap;
use std::fmt;
use std::fs::File;
use std::io::{Cursor, Read};
use std::path::{Component, Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use serde::{Deserialize, Serialize};
use zip::ZipArchive;

use crate::arch::Architecture;
use crate::error::LoadError;
use crate::provider::SymbolTable;

/// Name of the manifest inside the embedded bundle.
pub const MANIFEST_NAME: &str = "bridge.json";

/// Something that can resolve units by name.
pub trait UnitSource: Send + Sync {
    /// Short description for logs.
    fn describe(&self) -> String;

    /// The unit's bytes, or `None` if this source does not have it.
    fn resolve(&self, unit: &str) -> Option<Vec<u8>>;
}

/// Description of the bridge packaged in the embedded bundle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BridgeManifest {
    /// Name of the bridge implementation to instantiate
    pub entry_point: String,

    /// Vendor archives searched after the embedded bundle
    #[serde(default)]
    pub vendor_bundles: Option<Vec<String>>,

    /// Base name of the vendor's native library
    #[serde(default)]
    pub native_library: Option<String>,

    /// Exported symbols of the native library
    pub symbols: SymbolTable,
}

impl BridgeManifest {
    /// Parse a manifest.
    pub fn from_json(json: &[u8]) -> Result<Self, LoadError> {
        serde_json::from_slice(json)
            .map_err(|e| corrupt(format!("{} is invalid: {}", MANIFEST_NAME, e)))
    }

    /// Vendor archive names, defaulting to the architecture's.
    pub fn vendor_bundles(&self, arch: Architecture) -> Vec<String> {
        match &self.vendor_bundles {
            Some(names) => names.clone(),
            None => arch.vendor_bundles().iter().map(|s| s.to_string()).collect(),
        }
    }

    /// Native library base name, defaulting to the architecture's.
    pub fn native_library(&self, arch: Architecture) -> String {
        self.native_library
            .clone()
            .unwrap_or_else(|| arch.native_library().to_string())
    }
}

fn corrupt(reason: impl fmt::Display) -> LoadError {
    log::error!("Embedded bridge bundle is corrupt: {}", reason);
    LoadError::CorruptBundle(reason.to_string())
}

/// The embedded support bundle, fully extracted into memory.
#[derive(Debug, Clone, Default)]
pub struct ModuleBundle {
    units: HashMap<String, Vec<u8>>,
}

impl ModuleBundle {
    /// Extract every file of a zip archive.
    ///
    /// Any archive error means the build itself is broken and is reported as
    /// [`LoadError::CorruptBundle`].
    pub fn extract(archive: &[u8]) -> Result<Self, LoadError> {
        let mut zip = ZipArchive::new(Cursor::new(archive)).map_err(corrupt)?;
        let mut units = HashMap::with_capacity(zip.len());

        for index in 0..zip.len() {
            let mut file = zip.by_index(index).map_err(corrupt)?;
            if file.is_dir() {
                continue;
            }
            let name = file.name().to_string();
            let mut data = Vec::with_capacity(file.size() as usize);
            file.read_to_end(&mut data)
                .map_err(|e| corrupt(format!("{}: {}", name, e)))?;
            units.insert(name, data);
        }

        log::debug!("Extracted {} units from embedded bundle", units.len());
        Ok(Self { units })
    }

    /// Number of extracted units.
    pub fn len(&self) -> usize {
        self.units.len()
    }

    /// True when the bundle holds no units.
    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    /// Unit names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<_> = self.units.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// The bundle's manifest.
    pub fn manifest(&self) -> Result<BridgeManifest, LoadError> {
        let json = self
            .units
            .get(MANIFEST_NAME)
            .ok_or_else(|| corrupt(format!("{} is missing", MANIFEST_NAME)))?;
        BridgeManifest::from_json(json)
    }
}

impl UnitSource for ModuleBundle {
    fn describe(&self) -> String {
        "embedded bundle".to_string()
    }

    fn resolve(&self, unit: &str) -> Option<Vec<u8>> {
        self.units.get(unit).cloned()
    }
}

/// A zip/jar archive installed with the JPKI user software.
pub struct VendorBundle {
    path: PathBuf,
    archive: Mutex<ZipArchive<File>>,
}

impl VendorBundle {
    /// Open the archive at `path`.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, LoadError> {
        let path = path.into();
        let missing = |reason: String| LoadError::BundleMissing {
            path: path.clone(),
            reason,
        };

        let file = File::open(&path).map_err(|e| missing(e.to_string()))?;
        let archive = ZipArchive::new(file).map_err(|e| missing(e.to_string()))?;
        Ok(Self {
            path,
            archive: Mutex::new(archive),
        })
    }

    /// Archive location.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl fmt::Debug for VendorBundle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VendorBundle").field("path", &self.path).finish()
    }
}

impl UnitSource for VendorBundle {
    fn describe(&self) -> String {
        format!("vendor bundle {}", self.path.display())
    }

    fn resolve(&self, unit: &str) -> Option<Vec<u8>> {
        let mut archive = self.archive.lock().unwrap_or_else(PoisonError::into_inner);
        let mut file = archive.by_name(unit).ok()?;
        let mut data = Vec::new();
        match file.read_to_end(&mut data) {
            Ok(_) => Some(data),
            Err(e) => {
                log::warn!("Failed to read {} from {}: {}", unit, self.path.display(), e);
                None
            },
        }
    }
}

/// Plain files under one or more directories.
#[derive(Debug, Clone)]
pub struct DirectorySource {
    roots: Vec<PathBuf>,
}

impl DirectorySource {
    /// Look in `roots`, in order.
    pub fn new(roots: Vec<PathBuf>) -> Self {
        Self { roots }
    }

    /// Path of the first existing file for `unit`.
    pub fn locate(&self, unit: &str) -> Option<PathBuf> {
        if !is_relative_unit(unit) {
            log::warn!("Refusing to resolve unit outside the search roots: {}", unit);
            return None;
        }
        self.roots
            .iter()
            .map(|root| root.join(unit))
            .find(|candidate| candidate.is_file())
    }
}

impl UnitSource for DirectorySource {
    fn describe(&self) -> String {
        let roots: Vec<_> = self.roots.iter().map(|r| r.display().to_string()).collect();
        format!("directories [{}]", roots.join(", "))
    }

    fn resolve(&self, unit: &str) -> Option<Vec<u8>> {
        let path = self.locate(unit)?;
        std::fs::read(&path)
            .map_err(|e| log::warn!("Failed to read {}: {}", path.display(), e))
            .ok()
    }
}

fn is_relative_unit(unit: &str) -> bool {
    !unit.is_empty()
        && Path::new(unit)
            .components()
            .all(|c| matches!(c, Component::Normal(_)))
}

/// Ordered unit sources; the first hit wins.
#[derive(Default)]
pub struct ResolverChain {
    sources: Vec<Box<dyn UnitSource>>,
}

impl ResolverChain {
    /// Empty chain.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a source with the lowest priority so far.
    pub fn push(&mut self, source: Box<dyn UnitSource>) {
        self.sources.push(source);
    }

    /// Builder form of [`push`](Self::push).
    pub fn with_source(mut self, source: impl UnitSource + 'static) -> Self {
        self.push(Box::new(source));
        self
    }

    /// Source descriptions, highest priority first.
    pub fn describe(&self) -> Vec<String> {
        self.sources.iter().map(|s| s.describe()).collect()
    }

    /// Resolve `unit` against each source in order.
    pub fn resolve(&self, unit: &str) -> Option<Vec<u8>> {
        self.sources.iter().find_map(|source| {
            let data = source.resolve(unit)?;
            log::debug!("Resolved {} from {}", unit, source.describe());
            Some(data)
        })
    }
}

impl fmt::Debug for ResolverChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.describe()).finish()
    }
}
