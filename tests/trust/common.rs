#![allow(unused)]

use std::sync::Arc;

use peertls::{Certificate, CertificateChain, CertificateStore, CertifiedKey, TrustStore};
use tempfile::TempDir;

pub struct Fixture {
    pub dir: TempDir,
    pub store: Arc<CertificateStore>,
    pub trust: TrustStore,
}

pub fn fixture() -> Fixture {
    let _ = env_logger::builder().is_test(true).try_init();
    let dir = TempDir::new().unwrap();
    let store = CertificateStore::open(dir.path()).unwrap();
    let trust = TrustStore::new(store.clone());
    Fixture { dir, store, trust }
}

/// The chain of `key`. Keep it alive while using its leaf; issuer links
/// are weak.
pub fn chain(key: &CertifiedKey) -> CertificateChain {
    CertificateChain::from_der_list(&key.chain()).unwrap()
}

pub fn cert(der: &[u8]) -> Arc<Certificate> {
    Arc::new(Certificate::from_der(der).unwrap())
}
