//! PDF 1.5 files indexed by cross-reference streams with packed objects.

mod common;

use std::io;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use jpki_wrapper::pdf::xref::{find_startxref, read_xref_chain, XRefEntry, XRefFormat};
use jpki_wrapper::pdf::{Object, SignatureField};
use jpki_wrapper::{
    Architecture, JpkiWrapper, ModuleRegistry, PdfDocument, SignatureOptions, WrapperConfig,
    DEFAULT_KEYWORD,
};

use common::{build_objstm_pdf, fake_install, init_logging, soft_options, SoftCard, SoftLinker};

fn fixed_signature(_: &[u8]) -> io::Result<Vec<u8>> {
    Ok(vec![0x30, 0x03, 0x02, 0x01, 0x07])
}

#[test]
fn test_loads_packed_objects() {
    init_logging();
    for compressed in [false, true] {
        let document = PdfDocument::load(build_objstm_pdf(compressed)).unwrap();
        assert_eq!(document.version(), (1, 5));
        assert_eq!(document.page_count().unwrap(), 1);
        assert_eq!(
            document
                .get(3)
                .and_then(Object::as_dict)
                .and_then(|d| d.get("Producer"))
                .and_then(Object::as_text)
                .as_deref(),
            Some("test")
        );
        assert!(document.get(5).is_none(), "object stream kept as an object");
        assert!(document.get(6).is_none(), "xref stream kept as an object");
    }
}

#[test]
fn test_full_save_unpacks_objects() {
    let document = PdfDocument::load(build_objstm_pdf(true)).unwrap();
    let saved = document.to_bytes().unwrap();
    assert!(!saved.windows(6).any(|w| w == b"ObjStm"));

    let reloaded = PdfDocument::load(saved).unwrap();
    assert_eq!(reloaded.page_count().unwrap(), 1);
}

#[test]
fn test_incremental_update_writes_xref_stream() {
    let original = build_objstm_pdf(true);
    let mut document = PdfDocument::load(original.clone()).unwrap();
    document.set_keywords("signed").unwrap();
    document
        .add_signature(
            SignatureField::new().with_name("Signer"),
            Some(&SignatureOptions::new().with_preferred_signature_size(64)),
        )
        .unwrap();

    let mut output = Vec::new();
    document
        .write_incremental(&mut output, &mut fixed_signature)
        .unwrap();

    assert!(output.starts_with(&original));
    let update = &output[original.len()..];
    assert!(update.windows(11).any(|w| w == b"/Type /XRef"));
    assert!(!update.windows(7).any(|w| w == b"trailer"));

    let xref = read_xref_chain(&output, find_startxref(&output).unwrap()).unwrap();
    assert_eq!(xref.format(), XRefFormat::Stream);
    assert_eq!(xref.entries()[&2], XRefEntry::Compressed { stream: 5, index: 1 });
    assert!(matches!(xref.entries()[&1], XRefEntry::Uncompressed { .. }));
    assert!(matches!(xref.entries()[&3], XRefEntry::Uncompressed { .. }));

    let signed = PdfDocument::load(output.clone()).unwrap();
    assert_eq!(signed.keywords().as_deref(), Some("signed"));
    assert_eq!(signed.page_count().unwrap(), 1);
    let signatures = signed.signatures();
    assert_eq!(signatures.len(), 1);
    assert!(signatures[0].covers_whole_document(output.len()));
    assert_eq!(signatures[0].trimmed_contents(), &[0x30, 0x03, 0x02, 0x01, 0x07]);
}

#[test]
fn test_second_update_chains_xref_streams() {
    let mut document = PdfDocument::load(build_objstm_pdf(false)).unwrap();
    let mut first = Vec::new();
    document.add_signature(SignatureField::new(), None).unwrap();
    document.write_incremental(&mut first, &mut fixed_signature).unwrap();

    let mut second = Vec::new();
    document.add_signature(SignatureField::new(), None).unwrap();
    document.write_incremental(&mut second, &mut fixed_signature).unwrap();

    assert!(second.starts_with(&first));
    let reloaded = PdfDocument::load(second.clone()).unwrap();
    assert_eq!(reloaded.signatures().len(), 2);
    assert_eq!(reloaded.page_count().unwrap(), 1);
}

#[test]
fn test_sign_object_stream_document() {
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

    let mut document = PdfDocument::load(build_objstm_pdf(true)).unwrap();
    let mut output = Vec::new();
    wrapper.sign(&mut output, &mut document).unwrap();

    let signed = PdfDocument::load(output.clone()).unwrap();
    assert_eq!(signed.keywords().as_deref(), Some(DEFAULT_KEYWORD));
    let signatures = signed.signatures();
    assert_eq!(signatures.len(), 1);
    assert!(signatures[0].covers_whole_document(output.len()));
    assert_eq!(signatures[0].signer_name.as_deref(), Some("山田太郎"));
    assert_eq!(card.signatures.load(Ordering::SeqCst), 1);
    assert_eq!(card.open_contexts(), 0);
}
