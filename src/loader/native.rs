//! Making the vendor's native library loadable.

use std::fs;
use std::path::{Path, PathBuf};

use crate::config::NativeLibraryStrategy;
use crate::error::LoadError;

use super::bundle::ResolverChain;

/// Platform file name for a library base name (`X.dll`, `libX.so`, ...).
pub fn native_library_file_name(base: &str) -> String {
    libloading::library_filename(base).to_string_lossy().into_owned()
}

/// Unit name under which bundles carry a native library.
pub fn native_unit_name(file_name: &str) -> String {
    format!("native/{}", file_name)
}

/// Where the native library comes from before staging.
enum NativeSource {
    File(PathBuf),
    Unit(Vec<u8>),
}

/// Resolve the native library and place it where it will be loaded from.
///
/// The library is taken from the provider directory when present, otherwise
/// from the `native/<file>` unit of the resolver chain. With
/// [`NativeLibraryStrategy::CopyToHostDir`] it is copied into `target_dir`;
/// a failed copy is logged and the original location is used instead.
pub fn stage_native_library(
    provider_dir: &Path,
    file_name: &str,
    chain: &ResolverChain,
    strategy: NativeLibraryStrategy,
    target_dir: Option<&Path>,
) -> Result<PathBuf, LoadError> {
    let source = match provider_dir.join(file_name) {
        path if path.is_file() => NativeSource::File(path),
        _ => match chain.resolve(&native_unit_name(file_name)) {
            Some(bytes) => NativeSource::Unit(bytes),
            None => {
                return Err(LoadError::NativeLibraryUnavailable {
                    name: file_name.to_string(),
                    reason: format!(
                        "not found in {} or any bundle",
                        provider_dir.display()
                    ),
                })
            },
        },
    };

    match (source, strategy) {
        (NativeSource::File(path), NativeLibraryStrategy::LoadInPlace) => Ok(path),
        (NativeSource::File(path), NativeLibraryStrategy::CopyToHostDir) => {
            let Some(dir) = target_dir else {
                log::warn!("Host directory unknown; loading {} in place", path.display());
                return Ok(path);
            };
            let dest = dir.join(file_name);
            match copy_if_changed(&path, &dest) {
                Ok(()) => Ok(dest),
                Err(e) => {
                    log::warn!(
                        "Could not copy {} to {}: {}; loading in place",
                        file_name,
                        dir.display(),
                        e
                    );
                    Ok(path)
                },
            }
        },
        (NativeSource::Unit(bytes), _) => {
            if let Some(dir) = target_dir {
                let dest = dir.join(file_name);
                match write_if_changed(&bytes, &dest) {
                    Ok(()) => return Ok(dest),
                    Err(e) => log::warn!("Could not write {}: {}", dest.display(), e),
                }
            }
            let fallback = std::env::temp_dir().join("jpki_wrapper");
            fs::create_dir_all(&fallback)?;
            let dest = fallback.join(file_name);
            write_if_changed(&bytes, &dest)?;
            Ok(dest)
        },
    }
}

/// Copy `src` to `dest` unless `dest` already has the same size and
/// modification time. The copy keeps the source's modification time.
pub fn copy_if_changed(src: &Path, dest: &Path) -> std::io::Result<()> {
    let src_meta = fs::metadata(src)?;
    let src_mtime = src_meta.modified()?;

    if let Ok(dest_meta) = fs::metadata(dest) {
        let same_mtime = dest_meta.modified().map(|t| t == src_mtime).unwrap_or(false);
        if dest_meta.len() == src_meta.len() && same_mtime {
            log::debug!("{} is up to date", dest.display());
            return Ok(());
        }
    }

    fs::copy(src, dest)?;
    fs::File::options().write(true).open(dest)?.set_modified(src_mtime)?;
    log::debug!("Copied {} to {}", src.display(), dest.display());
    Ok(())
}

fn write_if_changed(bytes: &[u8], dest: &Path) -> std::io::Result<()> {
    if let Ok(existing) = fs::read(dest) {
        if existing == bytes {
            return Ok(());
        }
    }
    fs::write(dest, bytes)?;
    log::debug!("Materialized {} ({} bytes)", dest.display(), bytes.len());
    Ok(())
}
