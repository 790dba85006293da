//! Provider contexts and key handles are released on every path.

mod common;

use std::sync::Arc;

use jpki_wrapper::translate::SCARD_W_CANCELLED_BY_USER;
use jpki_wrapper::{
    Architecture, JpkiWrapper, ModuleRegistry, PdfDocument, ProviderSession, TranslatedError,
    WrapperConfig,
};

use common::{build_pdf, fake_install, init_logging, soft_options, Op, SoftCard, SoftLinker};

fn sign_with_failure(op: Op) -> (Arc<SoftCard>, jpki_wrapper::Result<()>) {
    init_logging();
    let arch = Architecture::current();
    let install = fake_install(arch);
    let card = Arc::new(SoftCard::new());
    card.fail(op, TranslatedError::new(9, SCARD_W_CANCELLED_BY_USER, "injected"));

    let registry = ModuleRegistry::new();
    let wrapper = JpkiWrapper::with_loader(
        install.path(),
        WrapperConfig::new(),
        &soft_options(SoftLinker::new(card.clone())),
        &registry,
    )
    .unwrap();

    let mut document = PdfDocument::load(build_pdf(1, None)).unwrap();
    let result = wrapper.sign(&mut Vec::new(), &mut document);
    (card, result)
}

#[test]
fn test_no_leaks_whatever_fails() {
    for op in [Op::Acquire, Op::UserKey, Op::Certificate, Op::Sign, Op::DestroyKey] {
        let (card, result) = sign_with_failure(op);
        let err = result.unwrap_err();
        assert_eq!(err.as_provider_error().map(|e| e.code()), Some(9), "{op:?}");
        assert_eq!(card.open_contexts(), 0, "{op:?}");
        assert_eq!(card.open_keys(), 0, "{op:?}");
    }
}

#[test]
fn test_missing_root_certificate_still_signs() {
    let (card, result) = sign_with_failure(Op::Root);
    result.unwrap();
    assert_eq!(card.open_contexts(), 0);
}

#[test]
fn test_release_failure_is_swallowed() {
    let (card, result) = sign_with_failure(Op::Release);
    result.unwrap();
    // The release was attempted exactly once
    assert_eq!(card.contexts_released.load(std::sync::atomic::Ordering::SeqCst), 1);
}

#[test]
fn test_session_drop_releases() {
    let card = SoftCard::new();
    {
        let session = ProviderSession::open(&card).unwrap();
        assert!(!session.certificate().unwrap().is_empty());
    }
    assert_eq!(card.open_contexts(), 0);
    assert_eq!(card.open_keys(), 0);
}

#[test]
fn test_session_close_reports_failure() {
    let card = SoftCard::new();
    card.fail(Op::Release, TranslatedError::new(4, 0, "release failed"));
    let session = ProviderSession::open(&card).unwrap();
    let err = session.close().unwrap_err();
    assert_eq!(err.message(), "release failed");
    assert_eq!(card.open_contexts(), 0);
}
