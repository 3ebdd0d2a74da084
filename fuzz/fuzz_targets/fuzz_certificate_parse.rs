#![no_main]

use libfuzzer_sys::fuzz_target;

use peertls::{Certificate, CertificateChain};

fuzz_target!(|data: &[u8]| {
    if let Ok(cert) = Certificate::from_der(data) {
        let _ = cert.id();
        let _ = cert.alt_names();
        let _ = cert.not_after();
    }
    let _ = Certificate::load_pem_chain(data);

    // Both halves as a two element chain.
    let (a, b) = data.split_at(data.len() / 2);
    let _ = CertificateChain::from_der_list(&[a, b]);
});
