#![allow(unused)]

use std::path::Path;
use std::sync::Arc;

use der::pem::LineEnding;
use der::{Decode, EncodePem};
use peertls::CertificateStore;
use tempfile::TempDir;

pub fn init_log() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn open() -> (TempDir, Arc<CertificateStore>) {
    init_log();
    let dir = TempDir::new().unwrap();
    let store = CertificateStore::open(dir.path().join("store")).unwrap();
    (dir, store)
}

pub fn to_pem(der: &[u8]) -> String {
    x509_cert::Certificate::from_der(der)
        .unwrap()
        .to_pem(LineEnding::LF)
        .unwrap()
}

/// Write certificates as one PEM bundle.
pub fn write_bundle(path: &Path, ders: &[Vec<u8>]) {
    let pem: String = ders.iter().map(|d| to_pem(d)).collect();
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(path, pem).unwrap();
}
