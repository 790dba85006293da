//! The host-facing entry point.

use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, FixedOffset};

use crate::bridge::{ProviderBridge, SignatureRequest};
use crate::config::WrapperConfig;
use crate::error::{JpkiError, Result};
use crate::loader::{self, LoaderOptions, ModuleHandle, ModuleRegistry};
use crate::locator::{self, ProviderLocator};
use crate::pdf::{SignableDocument, SignatureOptions};
use crate::translate::{from_boundary_error, BoundaryOutcome};

/// Signs documents with the card in the reader, through the installed JPKI
/// user software.
///
/// # Example
///
/// ```ignore
/// use jpki_wrapper::{JpkiWrapper, PdfDocument};
///
/// let mut wrapper = JpkiWrapper::new()?;
/// wrapper.set_application_name(Some("MyApp".into()));
///
/// let mut document = PdfDocument::open("contract.pdf")?;
/// let mut output = std::fs::File::create("contract-signed.pdf")?;
/// wrapper.sign(&mut output, &mut document)?;
/// ```
pub struct JpkiWrapper {
    bridge: Box<dyn ProviderBridge>,
    module: Arc<ModuleHandle>,
    config: WrapperConfig,
}

impl JpkiWrapper {
    /// True if the JPKI user software is installed.
    pub fn is_available() -> bool {
        locator::is_available()
    }

    /// Wrapper over the installed JPKI user software, configured from the
    /// environment.
    pub fn new() -> Result<Self> {
        Self::with_config(WrapperConfig::from_env())
    }

    /// Wrapper with an explicit configuration.
    pub fn with_config(config: WrapperConfig) -> Result<Self> {
        let provider_path = if config.install_path_override.is_some() {
            ProviderLocator::new(&config).locate()
        } else {
            locator::installed_provider_path().map(Path::to_path_buf)
        };
        let Some(provider_path) = provider_path else {
            log::warn!("JPKI user software not found");
            return Err(JpkiError::provider_unavailable());
        };

        let options = LoaderOptions::from_config(&config);
        Self::with_loader(&provider_path, config, &options, loader::registry())
    }

    /// Wrapper over the install at `provider_path`, loaded through `registry`.
    pub fn with_loader(
        provider_path: &Path,
        config: WrapperConfig,
        options: &LoaderOptions,
        registry: &ModuleRegistry,
    ) -> Result<Self> {
        let arch = config.effective_architecture();
        let module = registry.load(provider_path, arch, options)?;
        let bridge = module.create_bridge();
        Ok(Self {
            bridge,
            module,
            config,
        })
    }

    /// The loaded module.
    pub fn module(&self) -> &Arc<ModuleHandle> {
        &self.module
    }

    /// The configuration in use.
    pub fn config(&self) -> &WrapperConfig {
        &self.config
    }

    /// Application name recorded in signatures. `None` omits the build properties.
    pub fn set_application_name(&mut self, name: Option<String>) {
        self.bridge.set_application_name(name);
    }

    /// Application version recorded with the name.
    pub fn set_application_version(&mut self, version: Option<String>) {
        self.bridge.set_application_version(version);
    }

    /// Sign `document` and write the signed file to `output`.
    ///
    /// `None` values are derived from the card certificate and the clock.
    /// Unless `options` says otherwise, the configured signature size is reserved on the first page.
    pub fn add_signature(
        &self,
        output: &mut dyn Write,
        document: &mut dyn SignableDocument,
        name: Option<&str>,
        reason: Option<&str>,
        date: Option<DateTime<FixedOffset>>,
        location: Option<&str>,
        contact: Option<&str>,
        options: Option<&SignatureOptions>,
    ) -> Result<()> {
        let request = SignatureRequest {
            name: name.map(str::to_string),
            reason: reason.map(str::to_string),
            date,
            location: location.map(str::to_string),
            contact: contact.map(str::to_string),
        };
        self.add_signature_with(output, document, request, options)
    }

    /// Sign with every value derived.
    pub fn sign(&self, output: &mut dyn Write, document: &mut dyn SignableDocument) -> Result<()> {
        self.add_signature_with(output, document, SignatureRequest::new(), None)
    }

    /// Sign with every value derived and explicit options.
    pub fn sign_with_options(
        &self,
        output: &mut dyn Write,
        document: &mut dyn SignableDocument,
        options: &SignatureOptions,
    ) -> Result<()> {
        self.add_signature_with(output, document, SignatureRequest::new(), Some(options))
    }

    /// Sign with a prepared request.
    pub fn add_signature_with(
        &self,
        output: &mut dyn Write,
        document: &mut dyn SignableDocument,
        request: SignatureRequest,
        options: Option<&SignatureOptions>,
    ) -> Result<()> {
        let mut options = options.cloned().unwrap_or_default();
        if options.preferred_signature_size.is_none() {
            options.preferred_signature_size = Some(self.config.preferred_signature_size);
        }

        self.bridge
            .add_signature(output, document, request, Some(&options))
            .map_err(|e| match from_boundary_error(e) {
                BoundaryOutcome::Provider(e) => JpkiError::Provider(e),
                BoundaryOutcome::Malformed(message) => JpkiError::BoundaryDecode(message),
                BoundaryOutcome::Passthrough(e) => JpkiError::Document(e),
            })
    }
}

impl std::fmt::Debug for JpkiWrapper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JpkiWrapper")
            .field("module", &self.module)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
