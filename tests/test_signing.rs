//! End-to-end signing through the host facade with a software card.

mod common;

use std::sync::Arc;

use chrono::{FixedOffset, TimeZone};
use cms::content_info::ContentInfo;
use cms::signed_data::SignedData;
use der::asn1::OctetString;
use der::{Decode, Encode, SliceReader};
use jpki_wrapper::bridge::cms::{ID_MESSAGE_DIGEST, ID_SIGNED_DATA};
use jpki_wrapper::pdf::SignatureInfo;
use jpki_wrapper::translate::{SCARD_W_CANCELLED_BY_USER, SCARD_W_CHV_BLOCKED};
use jpki_wrapper::{
    Architecture, JpkiError, JpkiWrapper, ModuleRegistry, PdfDocument, SignatureOptions,
    TranslatedError, WrapperConfig, DEFAULT_KEYWORD,
};
use rsa::Pkcs1v15Sign;
use sha2::{Digest, Sha256};

use common::{build_pdf, fake_install, init_logging, soft_options, Op, SoftCard, SoftLinker};

struct Fixture {
    card: Arc<SoftCard>,
    wrapper: JpkiWrapper,
    _install: tempfile::TempDir,
}

fn fixture() -> Fixture {
    init_logging();
    let arch = Architecture::current();
    let install = fake_install(arch);
    let card = Arc::new(SoftCard::new());
    let options = soft_options(SoftLinker::new(card.clone()));
    let registry = ModuleRegistry::new();
    let wrapper = JpkiWrapper::with_loader(
        install.path(),
        WrapperConfig::new().with_architecture(arch),
        &options,
        &registry,
    )
    .unwrap();
    Fixture {
        card,
        wrapper,
        _install: install,
    }
}

fn only_signature(signed: &[u8]) -> SignatureInfo {
    let document = PdfDocument::load(signed.to_vec()).unwrap();
    let signatures = document.signatures();
    assert_eq!(signatures.len(), 1);
    signatures.into_iter().next().unwrap()
}

fn signed_ranges(signed: &[u8], info: &SignatureInfo) -> Vec<u8> {
    let [start1, len1, start2, len2] = <[i64; 4]>::try_from(info.byte_range.as_slice()).unwrap();
    let mut data = signed[start1 as usize..(start1 + len1) as usize].to_vec();
    data.extend_from_slice(&signed[start2 as usize..(start2 + len2) as usize]);
    data
}

/// Verify the CMS container against the software card's key.
fn verify_cms(signed: &[u8], info: &SignatureInfo, card: &SoftCard) {
    let mut reader = SliceReader::new(&info.contents).unwrap();
    let content_info = ContentInfo::decode(&mut reader).unwrap();
    assert_eq!(content_info.content_type, ID_SIGNED_DATA);

    let signed_data = SignedData::from_der(&content_info.content.to_der().unwrap()).unwrap();
    assert!(signed_data.encap_content_info.econtent.is_none());
    let signer = signed_data.signer_infos.0.get(0).unwrap();
    let attrs = signer.signed_attrs.clone().unwrap();

    let md = attrs.iter().find(|a| a.oid == ID_MESSAGE_DIGEST).unwrap();
    let md = OctetString::from_der(&md.values.get(0).unwrap().to_der().unwrap()).unwrap();
    let expected = Sha256::digest(signed_ranges(signed, info));
    assert_eq!(md.as_bytes(), expected.as_slice());

    let attrs_digest = Sha256::digest(attrs.to_der().unwrap());
    card.public_key()
        .verify(Pkcs1v15Sign::new::<Sha256>(), &attrs_digest, signer.signature.as_bytes())
        .unwrap();
}

#[test]
fn test_sign_end_to_end() {
    let mut fx = fixture();
    fx.wrapper.set_application_name(Some("TestApp".to_string()));
    fx.wrapper.set_application_version(Some("2.1".to_string()));

    let mut document = PdfDocument::load(build_pdf(1, None)).unwrap();
    let mut output = Vec::new();
    fx.wrapper.sign(&mut output, &mut document).unwrap();

    // Original (keyword-injected) bytes followed by the update
    let prepared = document.to_bytes().unwrap();
    assert!(output.starts_with(&prepared));
    assert!(output.len() > prepared.len());

    let info = only_signature(&output);
    assert_eq!(info.filter.as_deref(), Some("Adobe.PPKLite"));
    assert_eq!(info.sub_filter.as_deref(), Some("adbe.pkcs7.detached"));
    assert_eq!(info.signer_name.as_deref(), Some("山田太郎"));
    assert_eq!(info.reason.as_deref(), Some("山田太郎 によって署名されています。"));
    assert_eq!(info.build_app_name.as_deref(), Some("TestApp"));
    assert!(info.covers_whole_document(output.len()));
    assert_eq!(info.contents.len(), 0x2500);
    verify_cms(&output, &info, &fx.card);

    assert_eq!(fx.card.open_contexts(), 0);
    assert_eq!(fx.card.open_keys(), 0);
    assert_eq!(fx.card.signatures.load(std::sync::atomic::Ordering::SeqCst), 1);
}

#[test]
fn test_explicit_values() {
    let fx = fixture();
    let date = FixedOffset::east_opt(9 * 3600)
        .unwrap()
        .with_ymd_and_hms(2024, 4, 1, 10, 30, 0)
        .unwrap();
    let mut document = PdfDocument::load(build_pdf(2, Some("contract"))).unwrap();
    let mut output = Vec::new();
    fx.wrapper
        .add_signature(
            &mut output,
            &mut document,
            Some("佐藤一郎"),
            Some("承認"),
            Some(date),
            Some("東京都"),
            Some("sato@example.jp"),
            Some(&SignatureOptions::new().with_page(1).with_preferred_signature_size(0x3000)),
        )
        .unwrap();

    let info = only_signature(&output);
    assert_eq!(info.signer_name.as_deref(), Some("佐藤一郎"));
    assert_eq!(info.reason.as_deref(), Some("承認"));
    assert_eq!(info.signing_time.as_deref(), Some("D:20240401103000+09'00'"));
    assert_eq!(info.location.as_deref(), Some("東京都"));
    assert_eq!(info.contact_info.as_deref(), Some("sato@example.jp"));
    assert_eq!(info.build_app_name, None);
    assert_eq!(info.contents.len(), 0x3000);
    verify_cms(&output, &info, &fx.card);

    // The name was given, so the certificate is read only for the CMS
    assert_eq!(fx.card.keys_opened.load(std::sync::atomic::Ordering::SeqCst), 1);
    assert_eq!(fx.card.open_keys(), 0);
}

#[test]
fn test_keywords_are_never_overwritten() {
    let fx = fixture();
    let mut document = PdfDocument::load(build_pdf(1, Some("existing"))).unwrap();
    let mut output = Vec::new();
    fx.wrapper.sign(&mut output, &mut document).unwrap();

    assert_eq!(document.keywords().as_deref(), Some("existing"));
    let signed = PdfDocument::load(output).unwrap();
    assert_eq!(signed.keywords().as_deref(), Some("existing"));
}

#[test]
fn test_empty_keywords_get_default() {
    let fx = fixture();
    let mut document = PdfDocument::load(build_pdf(1, Some(""))).unwrap();
    let mut output = Vec::new();
    fx.wrapper.sign(&mut output, &mut document).unwrap();

    let signed = PdfDocument::load(output).unwrap();
    assert_eq!(signed.keywords().as_deref(), Some(DEFAULT_KEYWORD));
}

#[test]
fn test_signed_document_can_be_signed_again() {
    let fx = fixture();
    let mut document = PdfDocument::load(build_pdf(1, None)).unwrap();
    let mut first = Vec::new();
    fx.wrapper.sign(&mut first, &mut document).unwrap();

    let mut again = PdfDocument::load(first).unwrap();
    let mut second = Vec::new();
    fx.wrapper.sign(&mut second, &mut again).unwrap();

    let signed = PdfDocument::load(second.clone()).unwrap();
    let signatures = signed.signatures();
    assert_eq!(signatures.len(), 2);
    let latest = signatures
        .iter()
        .find(|s| s.covers_whole_document(second.len()))
        .unwrap();
    verify_cms(&second, latest, &fx.card);
}

#[test]
fn test_user_cancelled() {
    let fx = fixture();
    fx.card.fail(
        Op::Sign,
        TranslatedError::new(0x14, SCARD_W_CANCELLED_BY_USER, "SignHash failed"),
    );

    let mut document = PdfDocument::load(build_pdf(1, None)).unwrap();
    let mut output = Vec::new();
    let err = fx.wrapper.sign(&mut output, &mut document).unwrap_err();

    let provider = err.as_provider_error().unwrap();
    assert_eq!(provider.code(), 0x14);
    assert_eq!(provider.sub_code(), SCARD_W_CANCELLED_BY_USER);
    assert_eq!(err.localized_message(), "ユーザーによって操作は取り消されました。");
    assert_eq!(err.to_string(), "The action was cancelled by the user.");
    assert_eq!(fx.card.open_contexts(), 0);
}

#[test]
fn test_unknown_code_keeps_native_message() {
    let fx = fixture();
    fx.card.fail(Op::Acquire, TranslatedError::new(7, 1234, "reader unplugged"));

    let mut document = PdfDocument::load(build_pdf(1, None)).unwrap();
    let err = fx.wrapper.sign(&mut Vec::new(), &mut document).unwrap_err();
    match err {
        JpkiError::Provider(e) => {
            assert_eq!((e.code(), e.sub_code()), (7, 1234));
            assert_eq!(e.message(), "reader unplugged");
        },
        other => panic!("unexpected error: {other:?}"),
    }
}

#[test]
fn test_locked_card_while_reading_certificate() {
    let fx = fixture();
    fx.card.fail(
        Op::Certificate,
        TranslatedError::new(2, SCARD_W_CHV_BLOCKED, "GetCertificateValue failed"),
    );

    let mut document = PdfDocument::load(build_pdf(1, None)).unwrap();
    let err = fx.wrapper.sign(&mut Vec::new(), &mut document).unwrap_err();
    assert_eq!(err.as_provider_error().unwrap().sub_code(), SCARD_W_CHV_BLOCKED);
    assert_eq!(fx.card.open_keys(), 0);
    assert_eq!(fx.card.open_contexts(), 0);
}

#[test]
fn test_certificate_without_name() {
    init_logging();
    let arch = Architecture::current();
    let install = fake_install(arch);
    let card = Arc::new(SoftCard::with_certificate(common::ROOT_CERT.to_vec()));
    let registry = ModuleRegistry::new();
    let wrapper = JpkiWrapper::with_loader(
        install.path(),
        WrapperConfig::new(),
        &soft_options(SoftLinker::new(card.clone())),
        &registry,
    )
    .unwrap();

    let mut document = PdfDocument::load(build_pdf(1, None)).unwrap();
    let err = wrapper.sign(&mut Vec::new(), &mut document).unwrap_err();
    let provider = err.as_provider_error().unwrap();
    assert_eq!(provider.code(), jpki_wrapper::translate::CERT_SERVICE_NO_NAME);
    assert_eq!(provider.sub_code(), 0);
    assert_eq!(card.open_contexts(), 0);
}

#[test]
fn test_signature_too_large_is_a_document_error() {
    let fx = fixture();
    let mut document = PdfDocument::load(build_pdf(1, None)).unwrap();
    let err = fx
        .wrapper
        .sign_with_options(
            &mut Vec::new(),
            &mut document,
            &SignatureOptions::new().with_preferred_signature_size(16),
        )
        .unwrap_err();
    assert!(matches!(err, JpkiError::Document(_)), "{err:?}");
    assert_eq!(fx.card.open_contexts(), 0);
}
