//! Isolated loading of the architecture-specific bridge module.
//!
//! A module is loaded at most once per architecture and per process. Loading
//! extracts the embedded bundle, builds the resolver chain, stages the
//! vendor's native library and links it, then resolves the manifest's entry
//! point into a bridge constructor. The resulting [`ModuleHandle`] is shared
//! by every wrapper of that architecture.

pub mod bundle;
pub mod native;

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use lazy_static::lazy_static;
use once_cell::sync::OnceCell;

use crate::arch::Architecture;
use crate::bridge::{bridge_factory, BridgeFactory, ProviderBridge};
use crate::config::{NativeLibraryStrategy, WrapperConfig};
use crate::error::LoadError;
use crate::locator::{Environment, ProcessEnvironment};
use crate::provider::{CryptoProvider, NativeCsp, SymbolTable};

pub use bundle::{
    BridgeManifest, DirectorySource, ModuleBundle, ResolverChain, UnitSource, VendorBundle,
};
pub use native::{native_library_file_name, stage_native_library};

/// Turns a staged native library into a provider.
pub trait NativeLinker: Send + Sync {
    /// Load `library` and bind `symbols`.
    fn link(
        &self,
        library: &Path,
        symbols: &SymbolTable,
    ) -> Result<Arc<dyn CryptoProvider>, LoadError>;
}

/// Links through `libloading`.
#[derive(Debug, Default, Clone, Copy)]
pub struct LibloadingLinker;

impl NativeLinker for LibloadingLinker {
    fn link(
        &self,
        library: &Path,
        symbols: &SymbolTable,
    ) -> Result<Arc<dyn CryptoProvider>, LoadError> {
        Ok(Arc::new(NativeCsp::open(library, symbols)?))
    }
}

/// Options for [`load_module`].
#[derive(Clone)]
pub struct LoaderOptions {
    /// How the native library is made loadable
    pub strategy: NativeLibraryStrategy,
    /// Overrides the host directory as the copy destination
    pub staging_dir: Option<PathBuf>,
    /// Directory of the host executable
    pub host_dir: Option<PathBuf>,
    /// Binds the staged library
    pub linker: Arc<dyn NativeLinker>,
}

impl Default for LoaderOptions {
    fn default() -> Self {
        Self::new()
    }
}

impl LoaderOptions {
    /// Copy next to the host executable and link with `libloading`.
    pub fn new() -> Self {
        Self {
            strategy: NativeLibraryStrategy::default(),
            staging_dir: None,
            host_dir: ProcessEnvironment.host_dir(),
            linker: Arc::new(LibloadingLinker),
        }
    }

    /// Options taken from a wrapper configuration.
    pub fn from_config(config: &WrapperConfig) -> Self {
        Self {
            strategy: config.native_library_strategy,
            staging_dir: config.staging_dir.clone(),
            ..Self::new()
        }
    }

    /// Set the native library strategy.
    pub fn with_strategy(mut self, strategy: NativeLibraryStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// Set the copy destination.
    pub fn with_staging_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.staging_dir = Some(dir.into());
        self
    }

    /// Set the host executable directory.
    pub fn with_host_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.host_dir = Some(dir.into());
        self
    }

    /// Use another linker.
    pub fn with_linker(mut self, linker: Arc<dyn NativeLinker>) -> Self {
        self.linker = linker;
        self
    }

    fn target_dir(&self) -> Option<&Path> {
        self.staging_dir.as_deref().or(self.host_dir.as_deref())
    }
}

impl fmt::Debug for LoaderOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoaderOptions")
            .field("strategy", &self.strategy)
            .field("staging_dir", &self.staging_dir)
            .field("host_dir", &self.host_dir)
            .finish_non_exhaustive()
    }
}

/// A loaded bridge module.
pub struct ModuleHandle {
    arch: Architecture,
    provider_path: PathBuf,
    manifest: BridgeManifest,
    chain: ResolverChain,
    native_library: PathBuf,
    provider: Arc<dyn CryptoProvider>,
    factory: BridgeFactory,
}

impl ModuleHandle {
    /// Architecture this module was built for.
    pub fn architecture(&self) -> Architecture {
        self.arch
    }

    /// Install directory the module was loaded from.
    pub fn provider_path(&self) -> &Path {
        &self.provider_path
    }

    /// The bundle manifest.
    pub fn manifest(&self) -> &BridgeManifest {
        &self.manifest
    }

    /// Resolve a unit through the module's chain.
    pub fn resolve_unit(&self, unit: &str) -> Option<Vec<u8>> {
        self.chain.resolve(unit)
    }

    /// Path the native library was loaded from.
    pub fn native_library(&self) -> &Path {
        &self.native_library
    }

    /// The linked provider.
    pub fn provider(&self) -> Arc<dyn CryptoProvider> {
        Arc::clone(&self.provider)
    }

    /// A fresh bridge over the module's provider.
    pub fn create_bridge(&self) -> Box<dyn ProviderBridge> {
        (self.factory)(self.provider())
    }
}

impl fmt::Debug for ModuleHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleHandle")
            .field("arch", &self.arch)
            .field("provider_path", &self.provider_path)
            .field("entry_point", &self.manifest.entry_point)
            .field("native_library", &self.native_library)
            .field("chain", &self.chain)
            .finish()
    }
}

/// Load the bridge module for `arch` from the install at `provider_path`.
///
/// This does the full work every time; use [`ModuleRegistry`] (or [`load`])
/// to share one handle per architecture.
pub fn load_module(
    provider_path: &Path,
    arch: Architecture,
    options: &LoaderOptions,
) -> Result<ModuleHandle, LoadError> {
    if !provider_path.is_dir() {
        return Err(LoadError::ProviderPathMissing(provider_path.to_path_buf()));
    }

    let bundle = ModuleBundle::extract(arch.embedded_bundle())?;
    let manifest = bundle.manifest()?;
    let factory = bridge_factory(&manifest.entry_point)
        .ok_or_else(|| LoadError::EntryPointMissing(manifest.entry_point.clone()))?;

    let mut chain = ResolverChain::new();
    chain.push(Box::new(bundle));
    for name in manifest.vendor_bundles(arch) {
        let path = provider_path.join(&name);
        if !path.is_file() {
            log::debug!("Vendor bundle {} not present", path.display());
            continue;
        }
        match VendorBundle::open(&path) {
            Ok(vendor) => chain.push(Box::new(vendor)),
            Err(e) => log::warn!("Skipping vendor bundle: {}", e),
        }
    }
    let mut roots = vec![provider_path.to_path_buf()];
    roots.extend(options.host_dir.clone());
    chain.push(Box::new(DirectorySource::new(roots)));

    let file_name = native_library_file_name(&manifest.native_library(arch));
    let native_library = stage_native_library(
        provider_path,
        &file_name,
        &chain,
        options.strategy,
        options.target_dir(),
    )?;
    let provider = options.linker.link(&native_library, &manifest.symbols)?;

    log::info!(
        "Loaded {} JPKI bridge from {} ({})",
        arch,
        provider_path.display(),
        native_library.display()
    );

    Ok(ModuleHandle {
        arch,
        provider_path: provider_path.to_path_buf(),
        manifest,
        chain,
        native_library,
        provider,
        factory,
    })
}

/// One lazily loaded module per architecture.
pub struct ModuleRegistry {
    slots: [OnceCell<Arc<ModuleHandle>>; 2],
    init_lock: Mutex<()>,
}

impl Default for ModuleRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ModuleRegistry {
    /// Empty registry.
    pub const fn new() -> Self {
        Self {
            slots: [OnceCell::new(), OnceCell::new()],
            init_lock: Mutex::new(()),
        }
    }

    /// The module for `arch`, if already loaded.
    pub fn get(&self, arch: Architecture) -> Option<Arc<ModuleHandle>> {
        self.slots[arch.slot()].get().cloned()
    }

    /// The module for `arch`, loading it with `init` if needed.
    ///
    /// Concurrent first callers block until one of them has finished; `init`
    /// runs at most once per successful load. A failed load leaves the slot
    /// empty so a later call can try again.
    pub fn get_or_load<F>(&self, arch: Architecture, init: F) -> Result<Arc<ModuleHandle>, LoadError>
    where
        F: FnOnce() -> Result<ModuleHandle, LoadError>,
    {
        let slot = &self.slots[arch.slot()];
        if let Some(handle) = slot.get() {
            return Ok(Arc::clone(handle));
        }

        let _guard = self.init_lock.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(handle) = slot.get() {
            return Ok(Arc::clone(handle));
        }

        let handle = Arc::new(init()?);
        // The init lock is held, so the slot is still empty
        let _ = slot.set(Arc::clone(&handle));
        Ok(handle)
    }

    /// The module for `arch`, loaded from `provider_path` if needed.
    pub fn load(
        &self,
        provider_path: &Path,
        arch: Architecture,
        options: &LoaderOptions,
    ) -> Result<Arc<ModuleHandle>, LoadError> {
        let handle = self.get_or_load(arch, || load_module(provider_path, arch, options))?;
        if handle.provider_path() != provider_path {
            log::debug!(
                "{} module already loaded from {}; ignoring {}",
                arch,
                handle.provider_path().display(),
                provider_path.display()
            );
        }
        Ok(handle)
    }
}

impl fmt::Debug for ModuleRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleRegistry")
            .field("bits32", &self.get(Architecture::Bits32))
            .field("bits64", &self.get(Architecture::Bits64))
            .finish()
    }
}

lazy_static! {
    static ref REGISTRY: ModuleRegistry = ModuleRegistry::new();
}

/// The process-wide registry.
pub fn registry() -> &'static ModuleRegistry {
    &REGISTRY
}

/// Load (or reuse) the process-wide module for `arch`.
pub fn load(
    provider_path: &Path,
    arch: Architecture,
    options: &LoaderOptions,
) -> Result<Arc<ModuleHandle>, LoadError> {
    registry().load(provider_path, arch, options)
}
