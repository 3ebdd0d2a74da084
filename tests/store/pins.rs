use std::sync::Arc;

use peertls::{Certificate, CertificateAuthority, CertificateChain, NameType};

use crate::common::*;

#[test]
fn chain_pin_shares_the_stored_issuer() {
    let (_dir, store) = open();
    let root = CertificateAuthority::generate("root").unwrap();
    let intermediate = root.issue_authority("intermediate").unwrap();
    let leaf = intermediate.issue_identity("peer").unwrap();

    let chain = CertificateChain::from_der_list(&leaf.chain()).unwrap();
    assert_eq!(chain.len(), 3);
    let ids = store.pin_certificate_chain(&chain, false);
    assert_eq!(ids.len(), 6);
    assert_eq!(store.get_pinned_certificates().len(), 3);

    let stored_leaf = store.get_certificate(chain.leaf().id()).unwrap();
    let stored_intermediate = store
        .find_certificate_by_name("intermediate", NameType::Unknown)
        .unwrap();
    assert!(Arc::ptr_eq(
        &stored_leaf.issuer().unwrap(),
        &stored_intermediate
    ));
    assert_eq!(stored_intermediate.issuer().unwrap().name(), "root");
    assert!(stored_intermediate.is_ca());
    assert!(!stored_leaf.is_ca());
}

#[test]
fn pinned_bytes_come_back_unchanged() {
    let (dir, store) = open();
    let ca = CertificateAuthority::generate("root").unwrap();
    let leaf = ca.issue_identity("peer").unwrap();
    store.pin_certificate_der(&leaf.certificate, true).unwrap();

    let cert = Certificate::from_der(&leaf.certificate).unwrap();
    let stored = store.get_certificate(cert.long_id()).unwrap();
    assert_eq!(stored.as_der(), &leaf.certificate[..]);

    let file = dir
        .path()
        .join("store")
        .join("certificates")
        .join(cert.long_id());
    assert_eq!(std::fs::read(file).unwrap(), leaf.certificate);
}

#[test]
fn issuer_found_after_late_pin() {
    let (_dir, store) = open();
    let ca = CertificateAuthority::generate("root").unwrap();
    let leaf = ca.issue_identity("peer").unwrap();

    store.pin_certificate_der(&leaf.certificate, false).unwrap();
    let lonely = store
        .find_certificate_by_name("peer", NameType::Unknown)
        .unwrap();
    assert!(lonely.issuer().is_none());

    store.pin_certificate_der(&ca.certificate_der(), false).unwrap();
    let linked = store
        .find_certificate_by_name("peer", NameType::Unknown)
        .unwrap();
    assert_eq!(linked.issuer().unwrap().name(), "root");
    assert!(store.find_issuer(&linked).is_some());
}

#[test]
fn trusted_issuers_feed_credentials() {
    let (_dir, store) = open();
    let ca = CertificateAuthority::generate("root").unwrap();
    let ids = store.pin_certificate_der(&ca.certificate_der(), false).unwrap();
    assert!(store.set_trusted_certificate(&ids[1], true));

    let key = ca.issue_identity("me").unwrap();
    let credentials = peertls::Credentials::from_certified_key(&key).with_store_issuers(&store);
    let debug = format!("{:?}", credentials);
    assert!(debug.contains("trusted_issuers: 1"), "{}", debug);
    assert!(!debug.contains("private_key"));
}
