use std::sync::Arc;

use peertls::{
    Certificate, CertificateAuthority, CertificateStore, OcspCertStatus, OcspResponse,
    RevocationList,
};

use crate::common::*;

fn revocation_list(ca: &CertificateAuthority, serials: &[&[u8]], number: u64) -> Arc<RevocationList> {
    let der = ca.issue_revocation_list(serials, number).unwrap();
    Arc::new(RevocationList::from_der(&der).unwrap())
}

#[test]
fn pinned_list_is_reloaded() {
    let (dir, store) = open();
    let ca = CertificateAuthority::generate("root").unwrap();
    let ca_cert = Certificate::from_der(&ca.certificate_der()).unwrap();
    let leaf = Certificate::from_der(&ca.issue_identity("peer").unwrap().certificate).unwrap();
    store.pin_certificate_der(&ca.certificate_der(), true).unwrap();

    store
        .pin_revocation_list(ca_cert.id(), revocation_list(&ca, &[leaf.serial()], 3))
        .unwrap();
    let stored = store.get_certificate(ca_cert.id()).unwrap();
    assert_eq!(stored.revocation_lists().len(), 1);
    assert!(leaf.is_revoked_by(&stored));

    let file = dir
        .path()
        .join("store")
        .join("crls")
        .join(ca_cert.id())
        .join("03");
    assert!(file.is_file());
    drop(stored);
    drop(store);

    let reopened = CertificateStore::open(dir.path().join("store")).unwrap();
    let stored = reopened.get_certificate(ca_cert.id()).unwrap();
    let lists = stored.revocation_lists();
    assert_eq!(lists.len(), 1);
    assert_eq!(lists[0].number(), Some(&[3u8][..]));
    assert!(leaf.is_revoked_by(&stored));
}

#[test]
fn newer_list_with_the_same_number_replaces() {
    let (_dir, store) = open();
    let ca = CertificateAuthority::generate("root").unwrap();
    let ca_cert = Certificate::from_der(&ca.certificate_der()).unwrap();
    let leaf = Certificate::from_der(&ca.issue_identity("peer").unwrap().certificate).unwrap();
    store.pin_certificate_der(&ca.certificate_der(), false).unwrap();

    store
        .pin_revocation_list(ca_cert.id(), revocation_list(&ca, &[leaf.serial()], 1))
        .unwrap();
    store
        .pin_revocation_list(ca_cert.id(), revocation_list(&ca, &[], 1))
        .unwrap();

    let stored = store.get_certificate(ca_cert.id()).unwrap();
    assert_eq!(stored.revocation_lists().len(), 1);
    assert!(!leaf.is_revoked_by(&stored));
}

#[test]
fn list_from_another_issuer_is_refused() {
    let (dir, store) = open();
    let ca = CertificateAuthority::generate("root").unwrap();
    let other = CertificateAuthority::generate("other").unwrap();
    let ca_cert = Certificate::from_der(&ca.certificate_der()).unwrap();
    store.pin_certificate_der(&ca.certificate_der(), true).unwrap();

    let result = store.pin_revocation_list(ca_cert.id(), revocation_list(&other, &[], 1));
    assert!(result.is_err());
    assert!(store
        .get_certificate(ca_cert.id())
        .unwrap()
        .revocation_lists()
        .is_empty());
    assert!(!dir.path().join("store").join("crls").join(ca_cert.id()).exists());
}

#[test]
fn list_for_an_unknown_issuer_waits_on_disk() {
    let (dir, store) = open();
    let ca = CertificateAuthority::generate("root").unwrap();
    let ca_cert = Certificate::from_der(&ca.certificate_der()).unwrap();
    let leaf = Certificate::from_der(&ca.issue_identity("peer").unwrap().certificate).unwrap();

    store
        .pin_revocation_list(ca_cert.id(), revocation_list(&ca, &[leaf.serial()], 1))
        .unwrap();
    store.pin_certificate_der(&ca.certificate_der(), true).unwrap();
    drop(store);

    let reopened = CertificateStore::open(dir.path().join("store")).unwrap();
    let stored = reopened.get_certificate(ca_cert.id()).unwrap();
    assert!(leaf.is_revoked_by(&stored));
}

#[test]
fn ocsp_response_is_reloaded() {
    let (dir, store) = open();
    let ca = CertificateAuthority::generate("root").unwrap();
    let key = ca.issue_identity("peer").unwrap();
    let leaf = Arc::new(Certificate::from_der(&key.certificate).unwrap());
    store.pin_certificate(leaf.clone(), true);

    let der = ca
        .issue_ocsp_response(leaf.serial(), OcspCertStatus::Revoked)
        .unwrap();
    assert!(leaf.set_ocsp_response(Arc::new(OcspResponse::from_der(&der).unwrap())));
    store.pin_ocsp_response(&leaf).unwrap().join().unwrap();

    let file = dir
        .path()
        .join("store")
        .join("ocsp")
        .join(leaf.id())
        .join(leaf.serial_hex());
    assert_eq!(std::fs::read(file).unwrap(), der);
    drop(store);

    let reopened = CertificateStore::open(dir.path().join("store")).unwrap();
    let stored = reopened.get_certificate(leaf.id()).unwrap();
    let response = stored.ocsp_response().unwrap();
    assert_eq!(response.status(stored.serial()), Some(OcspCertStatus::Revoked));
    assert!(stored.is_revoked_by(&stored));
}

#[test]
fn ocsp_response_for_another_certificate_is_ignored() {
    let ca = CertificateAuthority::generate("root").unwrap();
    let leaf = Certificate::from_der(&ca.issue_identity("peer").unwrap().certificate).unwrap();
    let other = Certificate::from_der(&ca.issue_identity("other").unwrap().certificate).unwrap();

    let der = ca
        .issue_ocsp_response(other.serial(), OcspCertStatus::Revoked)
        .unwrap();
    assert!(!leaf.set_ocsp_response(Arc::new(OcspResponse::from_der(&der).unwrap())));
    assert!(leaf.ocsp_response().is_none());
}
