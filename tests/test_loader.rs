//! Module loading and the process-wide registry.

mod common;

use std::ffi::OsString;
use std::path::Path;
use std::sync::atomic::Ordering;
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::SystemTime;

use jpki_wrapper::config::NativeLibraryStrategy;
use jpki_wrapper::loader::{self, native_library_file_name, ModuleBundle, ModuleRegistry};
use jpki_wrapper::{Architecture, JpkiError, JpkiWrapper, LoadError, WrapperConfig};

use common::{fake_install, init_logging, soft_options, SoftCard, SoftLinker};

#[test]
fn test_concurrent_first_load_shares_one_handle() {
    init_logging();
    let arch = Architecture::current();
    let install = fake_install(arch);
    let linker = SoftLinker::new(Arc::new(SoftCard::new()));
    let options = soft_options(linker.clone());
    let registry = ModuleRegistry::new();
    let barrier = Barrier::new(8);

    let handles: Vec<_> = thread::scope(|s| {
        let workers: Vec<_> = (0..8)
            .map(|_| {
                s.spawn(|| {
                    barrier.wait();
                    registry.load(install.path(), arch, &options).unwrap()
                })
            })
            .collect();
        workers.into_iter().map(|w| w.join().unwrap()).collect()
    });

    assert_eq!(linker.links.load(Ordering::SeqCst), 1);
    for handle in &handles[1..] {
        assert!(Arc::ptr_eq(&handles[0], handle));
    }
    assert!(Arc::ptr_eq(&handles[0], &registry.get(arch).unwrap()));
}

/// Sorted (name, modified) pairs of every entry in `dir`.
fn dir_snapshot(dir: &Path) -> Vec<(OsString, SystemTime)> {
    let mut entries: Vec<_> = std::fs::read_dir(dir)
        .unwrap()
        .map(|entry| {
            let entry = entry.unwrap();
            (entry.file_name(), entry.metadata().unwrap().modified().unwrap())
        })
        .collect();
    entries.sort();
    entries
}

#[test]
fn test_concurrent_first_load_stages_once() {
    init_logging();
    let arch = Architecture::current();
    let install = fake_install(arch);
    let host = tempfile::tempdir().unwrap();
    let linker = SoftLinker::new(Arc::new(SoftCard::new()));
    let options = soft_options(linker.clone())
        .with_strategy(NativeLibraryStrategy::CopyToHostDir)
        .with_host_dir(host.path());
    let registry = ModuleRegistry::new();
    let barrier = Barrier::new(8);

    thread::scope(|s| {
        for _ in 0..8 {
            s.spawn(|| {
                barrier.wait();
                registry.load(install.path(), arch, &options).unwrap();
            });
        }
    });

    let file = native_library_file_name(arch.native_library());
    let staged = dir_snapshot(host.path());
    assert_eq!(staged.len(), 1);
    assert_eq!(staged[0].0, OsString::from(&file));
    // The copy carries the source's mtime
    let source_mtime = std::fs::metadata(install.path().join(&file))
        .unwrap()
        .modified()
        .unwrap();
    assert_eq!(staged[0].1, source_mtime);

    // Later callers are served from the registry and leave the directory alone
    registry.load(install.path(), arch, &options).unwrap();
    assert_eq!(dir_snapshot(host.path()), staged);
    assert_eq!(linker.links.load(Ordering::SeqCst), 1);
}

#[test]
fn test_restaging_unchanged_library_is_skipped() {
    init_logging();
    let arch = Architecture::current();
    let install = fake_install(arch);
    let host = tempfile::tempdir().unwrap();
    let options = soft_options(SoftLinker::new(Arc::new(SoftCard::new())))
        .with_strategy(NativeLibraryStrategy::CopyToHostDir)
        .with_host_dir(host.path());

    loader::load_module(install.path(), arch, &options).unwrap();
    let first = dir_snapshot(host.path());
    loader::load_module(install.path(), arch, &options).unwrap();
    assert_eq!(dir_snapshot(host.path()), first);
}

#[test]
fn test_architectures_have_separate_slots() {
    init_logging();
    let install = tempfile::tempdir().unwrap();
    for arch in [Architecture::Bits32, Architecture::Bits64] {
        let file = native_library_file_name(arch.native_library());
        std::fs::write(install.path().join(file), b"lib").unwrap();
    }
    let linker = SoftLinker::new(Arc::new(SoftCard::new()));
    let options = soft_options(linker.clone());
    let registry = ModuleRegistry::new();

    let bits32 = registry.load(install.path(), Architecture::Bits32, &options).unwrap();
    let bits64 = registry.load(install.path(), Architecture::Bits64, &options).unwrap();
    assert!(!Arc::ptr_eq(&bits32, &bits64));
    assert_eq!(bits32.architecture(), Architecture::Bits32);
    assert_eq!(bits64.architecture(), Architecture::Bits64);
    assert!(bits32.manifest().symbols.sign_hash.starts_with('_'));
    assert!(!bits64.manifest().symbols.sign_hash.starts_with('_'));
    assert_eq!(linker.links.load(Ordering::SeqCst), 2);
}

#[test]
fn test_native_library_copied_to_host_dir() {
    init_logging();
    let arch = Architecture::current();
    let install = fake_install(arch);
    let host = tempfile::tempdir().unwrap();
    let options = soft_options(SoftLinker::new(Arc::new(SoftCard::new())))
        .with_strategy(NativeLibraryStrategy::CopyToHostDir)
        .with_host_dir(host.path());

    let module = loader::load_module(install.path(), arch, &options).unwrap();
    let file = native_library_file_name(arch.native_library());
    assert_eq!(module.native_library(), host.path().join(&file));
    assert_eq!(std::fs::read(host.path().join(&file)).unwrap(), b"not really a library");
}

#[test]
fn test_vendor_bundle_supplies_native_library() {
    use std::io::Write;

    init_logging();
    let arch = Architecture::current();
    let install = tempfile::tempdir().unwrap();
    let file = native_library_file_name(arch.native_library());

    let jar = std::fs::File::create(install.path().join(arch.vendor_bundles()[0])).unwrap();
    let mut zip = zip::ZipWriter::new(jar);
    zip.start_file(format!("native/{}", file), zip::write::SimpleFileOptions::default())
        .unwrap();
    zip.write_all(b"from the vendor jar").unwrap();
    zip.finish().unwrap();

    let staging = tempfile::tempdir().unwrap();
    let options = soft_options(SoftLinker::new(Arc::new(SoftCard::new())))
        .with_staging_dir(staging.path());
    let module = loader::load_module(install.path(), arch, &options).unwrap();

    assert_eq!(module.native_library(), staging.path().join(&file));
    assert_eq!(std::fs::read(module.native_library()).unwrap(), b"from the vendor jar");
}

#[test]
fn test_embedded_bundle_matches_build() {
    let bundle = ModuleBundle::extract(Architecture::current().embedded_bundle()).unwrap();
    assert!(bundle.names().contains(&"bridge.json"));
    assert_eq!(bundle.manifest().unwrap().entry_point, "jpki.bridge.CryptSignBridge");
}

#[test]
fn test_load_failure_surfaces_as_wrapper_error() {
    init_logging();
    let install = tempfile::tempdir().unwrap();
    let registry = ModuleRegistry::new();
    let options = soft_options(SoftLinker::new(Arc::new(SoftCard::new())));

    let err = JpkiWrapper::with_loader(install.path(), WrapperConfig::new(), &options, &registry)
        .unwrap_err();
    assert!(matches!(
        err,
        JpkiError::LoadFailure(LoadError::NativeLibraryUnavailable { .. })
    ));
    assert!(err.localized_message().contains("読み込みに失敗しました"));
    assert!(registry.get(Architecture::current()).is_none());
}

#[test]
fn test_process_registry() {
    init_logging();
    let arch = Architecture::current();
    let install = fake_install(arch);
    let linker = SoftLinker::new(Arc::new(SoftCard::new()));
    let options = soft_options(linker.clone());

    let first = loader::load(install.path(), arch, &options).unwrap();
    let second = loader::load(install.path(), arch, &options).unwrap();
    assert!(Arc::ptr_eq(&first, &second));
    assert!(Arc::ptr_eq(&first, &loader::registry().get(arch).unwrap()));
    assert_eq!(linker.links.load(Ordering::SeqCst), 1);
}
