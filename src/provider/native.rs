//! Binding to the vendor's native CSP library.
//!
//! The vendor documents only its JNI surface. This binding assumes the
//! library also exports a plain C ABI: one function per CSP operation,
//! `stdcall` on 32-bit Windows, returning the CSP error code and writing the
//! Windows error code through the last pointer. The exported names are not
//! discovered here; they are configuration, read from the `symbols` table of
//! the bridge manifest (`bundle/<arch>/bridge.json`). A vendor release that
//! renames or drops an export is fixed by editing the manifest, and a
//! manifest that names an absent export fails the load with
//! [`LoadError::SymbolMissing`].

use std::path::Path;
use std::ptr;

use libloading::Library;
use serde::{Deserialize, Serialize};

use super::{CryptoProvider, RawHandle};
use crate::error::LoadError;
use crate::translate::TranslatedError;

type AcquireContextFn = unsafe extern "system" fn(u32, *mut i32, *mut i32) -> i32;
type GetUserKeyFn = unsafe extern "system" fn(i32, *mut i32, *mut i32) -> i32;
type GetValueFn = unsafe extern "system" fn(i32, *mut u8, *mut u32, *mut i32) -> i32;
type SignHashFn =
    unsafe extern "system" fn(i32, *const u8, u32, *mut u8, *mut u32, *mut i32) -> i32;
type ReleaseFn = unsafe extern "system" fn(i32, *mut i32) -> i32;

/// Exported symbol names, as listed in the bridge manifest.
///
/// 32-bit builds of the vendor library export stdcall-decorated names.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SymbolTable {
    /// Acquire a context
    pub acquire_context: String,
    /// Open the user's signing key
    pub get_user_key: String,
    /// Read the certificate bound to a key
    pub get_certificate_value: String,
    /// Read the root CA certificate
    pub get_root_certificate_value: String,
    /// Sign a digest
    pub sign_hash: String,
    /// Release a key handle
    pub destroy_key: String,
    /// Release a context
    pub release_context: String,
}

impl SymbolTable {
    /// All names, in load order.
    pub fn names(&self) -> [&str; 7] {
        [
            &self.acquire_context,
            &self.get_user_key,
            &self.get_certificate_value,
            &self.get_root_certificate_value,
            &self.sign_hash,
            &self.destroy_key,
            &self.release_context,
        ]
    }
}

/// The vendor CSP, loaded with `libloading`.
///
/// Every call follows the same convention: the return value is the CSP's
/// error code (0 on success) and the Windows error code is written to the
/// last argument. Variable-length values are read with two calls: the first
/// with a null buffer to learn the length.
pub struct NativeCsp {
    library_name: String,
    symbols: SymbolTable,
    acquire_context: AcquireContextFn,
    get_user_key: GetUserKeyFn,
    get_certificate_value: GetValueFn,
    get_root_certificate_value: GetValueFn,
    sign_hash: SignHashFn,
    destroy_key: ReleaseFn,
    release_context: ReleaseFn,
    // Keeps the function pointers above valid
    _library: Library,
}

impl std::fmt::Debug for NativeCsp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NativeCsp")
            .field("library", &self.library_name)
            .finish_non_exhaustive()
    }
}

impl NativeCsp {
    /// Load the library at `path` and resolve every symbol in `symbols`.
    pub fn open(path: &Path, symbols: &SymbolTable) -> Result<Self, LoadError> {
        let library_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());

        log::debug!("Loading native CSP from {}", path.display());

        // SAFETY: the library is the vendor CSP from the user's JPKI
        // installation; loading it runs only its own initializers.
        let library = unsafe { Library::new(path) }.map_err(|e| {
            LoadError::NativeLibraryUnavailable {
                name: library_name.clone(),
                reason: e.to_string(),
            }
        })?;

        // SAFETY: each type alias matches the exported function's signature
        // and calling convention.
        unsafe {
            Ok(Self {
                acquire_context: resolve(&library, &library_name, &symbols.acquire_context)?,
                get_user_key: resolve(&library, &library_name, &symbols.get_user_key)?,
                get_certificate_value: resolve(
                    &library,
                    &library_name,
                    &symbols.get_certificate_value,
                )?,
                get_root_certificate_value: resolve(
                    &library,
                    &library_name,
                    &symbols.get_root_certificate_value,
                )?,
                sign_hash: resolve(&library, &library_name, &symbols.sign_hash)?,
                destroy_key: resolve(&library, &library_name, &symbols.destroy_key)?,
                release_context: resolve(&library, &library_name, &symbols.release_context)?,
                symbols: symbols.clone(),
                library_name,
                _library: library,
            })
        }
    }

    /// File name of the loaded library.
    pub fn library_name(&self) -> &str {
        &self.library_name
    }

    fn check(&self, symbol: &str, code: i32, win_error: i32) -> Result<(), TranslatedError> {
        if code == 0 {
            return Ok(());
        }
        log::debug!("{} returned {} (Windows error {:#010X})", symbol, code, win_error);
        Err(TranslatedError::new(
            code,
            win_error,
            format!("{} failed (error {}, Windows error {:#010X})", symbol, code, win_error),
        ))
    }

    fn read_value(
        &self,
        function: GetValueFn,
        symbol: &str,
        handle: RawHandle,
    ) -> Result<Vec<u8>, TranslatedError> {
        let mut len = 0u32;
        let mut win_error = 0i32;
        // SAFETY: a null buffer asks only for the length.
        let code = unsafe { function(handle, ptr::null_mut(), &mut len, &mut win_error) };
        self.check(symbol, code, win_error)?;

        let mut buf = vec![0u8; len as usize];
        // SAFETY: `buf` holds exactly `len` bytes.
        let code = unsafe { function(handle, buf.as_mut_ptr(), &mut len, &mut win_error) };
        self.check(symbol, code, win_error)?;

        buf.truncate(len as usize);
        Ok(buf)
    }
}

/// Copy a function pointer out of `library`.
unsafe fn resolve<T: Copy>(library: &Library, library_name: &str, symbol: &str) -> Result<T, LoadError> {
    library
        .get::<T>(symbol.as_bytes())
        .map(|sym| *sym)
        .map_err(|_| LoadError::SymbolMissing {
            library: library_name.to_string(),
            symbol: symbol.to_string(),
        })
}

impl CryptoProvider for NativeCsp {
    fn acquire_context(&self, flags: u32) -> Result<RawHandle, TranslatedError> {
        let mut context = 0;
        let mut win_error = 0;
        // SAFETY: both out-pointers are valid for writes.
        let code = unsafe { (self.acquire_context)(flags, &mut context, &mut win_error) };
        self.check(&self.symbols.acquire_context, code, win_error)?;
        Ok(context)
    }

    fn get_user_key(&self, context: RawHandle) -> Result<RawHandle, TranslatedError> {
        let mut key = 0;
        let mut win_error = 0;
        // SAFETY: both out-pointers are valid for writes.
        let code = unsafe { (self.get_user_key)(context, &mut key, &mut win_error) };
        self.check(&self.symbols.get_user_key, code, win_error)?;
        Ok(key)
    }

    fn get_certificate_value(&self, key: RawHandle) -> Result<Vec<u8>, TranslatedError> {
        self.read_value(self.get_certificate_value, &self.symbols.get_certificate_value, key)
    }

    fn get_root_certificate_value(&self, context: RawHandle) -> Result<Vec<u8>, TranslatedError> {
        self.read_value(
            self.get_root_certificate_value,
            &self.symbols.get_root_certificate_value,
            context,
        )
    }

    fn sign_hash(&self, context: RawHandle, digest: &[u8]) -> Result<Vec<u8>, TranslatedError> {
        let digest_len = u32::try_from(digest.len()).map_err(|_| {
            TranslatedError::new(-1, 0, format!("digest of {} bytes is too long", digest.len()))
        })?;
        let mut len = 0u32;
        let mut win_error = 0;

        // SAFETY: `digest` is valid for `digest_len` bytes; a null output
        // buffer asks only for the signature length.
        let code = unsafe {
            (self.sign_hash)(
                context,
                digest.as_ptr(),
                digest_len,
                ptr::null_mut(),
                &mut len,
                &mut win_error,
            )
        };
        self.check(&self.symbols.sign_hash, code, win_error)?;

        let mut signature = vec![0u8; len as usize];
        // SAFETY: `signature` holds exactly `len` bytes.
        let code = unsafe {
            (self.sign_hash)(
                context,
                digest.as_ptr(),
                digest_len,
                signature.as_mut_ptr(),
                &mut len,
                &mut win_error,
            )
        };
        self.check(&self.symbols.sign_hash, code, win_error)?;

        signature.truncate(len as usize);
        Ok(signature)
    }

    fn destroy_key(&self, key: RawHandle) -> Result<(), TranslatedError> {
        let mut win_error = 0;
        // SAFETY: the out-pointer is valid for writes.
        let code = unsafe { (self.destroy_key)(key, &mut win_error) };
        self.check(&self.symbols.destroy_key, code, win_error)
    }

    fn release_context(&self, context: RawHandle) -> Result<(), TranslatedError> {
        let mut win_error = 0;
        // SAFETY: the out-pointer is valid for writes.
        let code = unsafe { (self.release_context)(context, &mut win_error) };
        self.check(&self.symbols.release_context, code, win_error)
    }
}
