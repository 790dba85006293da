//! Shared helpers for integration tests: a software card, a linker that hands
//! it out, and a small PDF builder.

#![allow(dead_code)]

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use jpki_wrapper::config::NativeLibraryStrategy;
use jpki_wrapper::loader::{native_library_file_name, LoaderOptions, NativeLinker};
use jpki_wrapper::provider::{CryptoProvider, RawHandle, SymbolTable};
use jpki_wrapper::{Architecture, LoadError, TranslatedError};
use rsa::pkcs8::DecodePrivateKey;
use rsa::{Pkcs1v15Sign, RsaPrivateKey, RsaPublicKey};
use sha2::Sha256;

pub const SIGNER_CERT: &[u8] = include_bytes!("../fixtures/signer.der");
pub const ROOT_CERT: &[u8] = include_bytes!("../fixtures/no_name.der");
pub const SIGNER_KEY: &str = include_str!("../fixtures/signer_key.pem");

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Operation a [`SoftCard`] can be told to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Acquire,
    UserKey,
    Certificate,
    Root,
    Sign,
    DestroyKey,
    Release,
}

/// A card whose private key lives in memory.
pub struct SoftCard {
    key: RsaPrivateKey,
    certificate: Vec<u8>,
    failure: Mutex<Option<(Op, TranslatedError)>>,
    pub contexts_acquired: AtomicUsize,
    pub contexts_released: AtomicUsize,
    pub keys_opened: AtomicUsize,
    pub keys_destroyed: AtomicUsize,
    pub signatures: AtomicUsize,
}

impl SoftCard {
    pub fn new() -> Self {
        Self::with_certificate(SIGNER_CERT.to_vec())
    }

    pub fn with_certificate(certificate: Vec<u8>) -> Self {
        Self {
            key: RsaPrivateKey::from_pkcs8_pem(SIGNER_KEY).unwrap(),
            certificate,
            failure: Mutex::new(None),
            contexts_acquired: AtomicUsize::new(0),
            contexts_released: AtomicUsize::new(0),
            keys_opened: AtomicUsize::new(0),
            keys_destroyed: AtomicUsize::new(0),
            signatures: AtomicUsize::new(0),
        }
    }

    /// Make `op` fail with `error` from now on.
    pub fn fail(&self, op: Op, error: TranslatedError) {
        *self.failure.lock().unwrap() = Some((op, error));
    }

    pub fn public_key(&self) -> RsaPublicKey {
        RsaPublicKey::from(&self.key)
    }

    pub fn open_contexts(&self) -> usize {
        self.contexts_acquired.load(Ordering::SeqCst) - self.contexts_released.load(Ordering::SeqCst)
    }

    pub fn open_keys(&self) -> usize {
        self.keys_opened.load(Ordering::SeqCst) - self.keys_destroyed.load(Ordering::SeqCst)
    }

    fn check(&self, op: Op) -> Result<(), TranslatedError> {
        match &*self.failure.lock().unwrap() {
            Some((failing, error)) if *failing == op => Err(error.clone()),
            _ => Ok(()),
        }
    }
}

impl CryptoProvider for SoftCard {
    fn acquire_context(&self, _flags: u32) -> Result<RawHandle, TranslatedError> {
        self.check(Op::Acquire)?;
        self.contexts_acquired.fetch_add(1, Ordering::SeqCst);
        Ok(100)
    }

    fn get_user_key(&self, context: RawHandle) -> Result<RawHandle, TranslatedError> {
        assert_eq!(context, 100);
        self.check(Op::UserKey)?;
        self.keys_opened.fetch_add(1, Ordering::SeqCst);
        Ok(200)
    }

    fn get_certificate_value(&self, key: RawHandle) -> Result<Vec<u8>, TranslatedError> {
        assert_eq!(key, 200);
        self.check(Op::Certificate)?;
        Ok(self.certificate.clone())
    }

    fn get_root_certificate_value(&self, _context: RawHandle) -> Result<Vec<u8>, TranslatedError> {
        self.check(Op::Root)?;
        Ok(ROOT_CERT.to_vec())
    }

    fn sign_hash(&self, _context: RawHandle, digest: &[u8]) -> Result<Vec<u8>, TranslatedError> {
        self.check(Op::Sign)?;
        self.signatures.fetch_add(1, Ordering::SeqCst);
        Ok(self.key.sign(Pkcs1v15Sign::new::<Sha256>(), digest).unwrap())
    }

    fn destroy_key(&self, key: RawHandle) -> Result<(), TranslatedError> {
        assert_eq!(key, 200);
        self.keys_destroyed.fetch_add(1, Ordering::SeqCst);
        self.check(Op::DestroyKey)
    }

    fn release_context(&self, context: RawHandle) -> Result<(), TranslatedError> {
        assert_eq!(context, 100);
        self.contexts_released.fetch_add(1, Ordering::SeqCst);
        self.check(Op::Release)
    }
}

/// Links every library to the same [`SoftCard`].
pub struct SoftLinker {
    pub card: Arc<SoftCard>,
    pub links: AtomicUsize,
}

impl SoftLinker {
    pub fn new(card: Arc<SoftCard>) -> Arc<Self> {
        Arc::new(Self {
            card,
            links: AtomicUsize::new(0),
        })
    }
}

impl NativeLinker for SoftLinker {
    fn link(
        &self,
        library: &Path,
        symbols: &SymbolTable,
    ) -> Result<Arc<dyn CryptoProvider>, LoadError> {
        assert!(library.is_file(), "staged library missing: {}", library.display());
        assert_eq!(symbols.names().len(), 7);
        self.links.fetch_add(1, Ordering::SeqCst);
        Ok(self.card.clone())
    }
}

/// A fake install directory holding the native library for `arch`.
pub fn fake_install(arch: Architecture) -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    let file = native_library_file_name(arch.native_library());
    std::fs::write(dir.path().join(file), b"not really a library").unwrap();
    dir
}

/// Loader options that load in place and link to `linker`.
pub fn soft_options(linker: Arc<SoftLinker>) -> LoaderOptions {
    LoaderOptions::new()
        .with_strategy(NativeLibraryStrategy::LoadInPlace)
        .with_linker(linker)
}

/// A PDF with `pages` empty pages and optional `/Keywords`.
pub fn build_pdf(pages: usize, keywords: Option<&str>) -> Vec<u8> {
    let kids: Vec<String> = (0..pages).map(|i| format!("{} 0 R", i + 4)).collect();
    let mut objects = vec![
        "<< /Type /Catalog /Pages 2 0 R >>".to_string(),
        format!("<< /Type /Pages /Kids [{}] /Count {} >>", kids.join(" "), pages),
        match keywords {
            Some(k) => format!("<< /Producer (test) /Keywords ({}) >>", k),
            None => "<< /Producer (test) >>".to_string(),
        },
    ];
    for _ in 0..pages {
        objects.push("<< /Type /Page /Parent 2 0 R /MediaBox [0 0 595 842] >>".to_string());
    }

    let mut pdf = b"%PDF-1.7\n".to_vec();
    let mut offsets = Vec::new();
    for (i, body) in objects.iter().enumerate() {
        offsets.push(pdf.len());
        pdf.extend_from_slice(format!("{} 0 obj\n{}\nendobj\n", i + 1, body).as_bytes());
    }
    let xref = pdf.len();
    pdf.extend_from_slice(format!("xref\n0 {}\n0000000000 65535 f \n", objects.len() + 1).as_bytes());
    for offset in offsets {
        pdf.extend_from_slice(format!("{:010} 00000 n \n", offset).as_bytes());
    }
    pdf.extend_from_slice(
        format!(
            "trailer\n<< /Size {} /Root 1 0 R /Info 3 0 R >>\nstartxref\n{}\n%%EOF\n",
            objects.len() + 1,
            xref
        )
        .as_bytes(),
    );
    pdf
}

fn zlib(data: &[u8]) -> Vec<u8> {
    use std::io::Write;
    let mut encoder = flate2::write::ZlibEncoder::new(Vec::new(), flate2::Compression::default());
    encoder.write_all(data).unwrap();
    encoder.finish().unwrap()
}

/// A PDF 1.5 file with one empty page. Objects 1-4 are packed in object
/// stream 5 and indexed by cross-reference stream 6. With `compressed` both
/// streams are deflated and the cross-reference rows use the PNG Up
/// predictor.
pub fn build_objstm_pdf(compressed: bool) -> Vec<u8> {
    let packed = [
        "<< /Type /Catalog /Pages 2 0 R >>",
        "<< /Type /Pages /Kids [4 0 R] /Count 1 >>",
        "<< /Producer (test) >>",
        "<< /Type /Page /Parent 2 0 R /MediaBox [0 0 595 842] >>",
    ];
    let mut header = String::new();
    let mut body = String::new();
    for (i, text) in packed.iter().enumerate() {
        header.push_str(&format!("{} {} ", i + 1, body.len()));
        body.push_str(text);
        body.push('\n');
    }
    let mut objstm = header.clone().into_bytes();
    objstm.extend_from_slice(body.as_bytes());
    let (objstm, filter) = if compressed {
        (zlib(&objstm), "/Filter /FlateDecode ")
    } else {
        (objstm, "")
    };

    let mut pdf = b"%PDF-1.5\n%\xE2\xE3\xCF\xD3\n".to_vec();
    let objstm_at = pdf.len();
    pdf.extend_from_slice(
        format!(
            "5 0 obj\n<< /Type /ObjStm /N 4 /First {} {}/Length {} >>\nstream\n",
            header.len(),
            filter,
            objstm.len()
        )
        .as_bytes(),
    );
    pdf.extend_from_slice(&objstm);
    pdf.extend_from_slice(b"\nendstream\nendobj\n");

    let xref_at = pdf.len();
    let mut rows: Vec<[u8; 5]> = vec![[0, 0, 0, 0xFF, 0xFF]];
    for index in 0..4u8 {
        rows.push([2, 0, 5, 0, index]);
    }
    for offset in [objstm_at, xref_at] {
        rows.push([1, (offset >> 8) as u8, offset as u8, 0, 0]);
    }

    let (data, params) = if compressed {
        let mut predicted = Vec::new();
        let mut previous = [0u8; 5];
        for row in &rows {
            predicted.push(2);
            predicted.extend(row.iter().zip(previous).map(|(b, up)| b.wrapping_sub(up)));
            previous = *row;
        }
        (
            zlib(&predicted),
            "/Filter /FlateDecode /DecodeParms << /Predictor 12 /Columns 5 >> ",
        )
    } else {
        (rows.concat(), "")
    };

    pdf.extend_from_slice(
        format!(
            "6 0 obj\n<< /Type /XRef /Size 7 /W [1 2 2] /Root 1 0 R /Info 3 0 R {}/Length {} >>\nstream\n",
            params,
            data.len()
        )
        .as_bytes(),
    );
    pdf.extend_from_slice(&data);
    pdf.extend_from_slice(format!("\nendstream\nendobj\nstartxref\n{}\n%%EOF\n", xref_at).as_bytes());
    pdf
}
