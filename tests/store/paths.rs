use std::sync::mpsc;
use std::sync::Arc;
use std::time::Duration;

use peertls::{Certificate, CertificateAuthority, StoreEvent};

use crate::common::*;

#[test]
fn path_pin_then_unpin() {
    let (dir, store) = open();
    let events = store.subscribe();

    let ca = CertificateAuthority::generate("root").unwrap();
    let leaf = ca.issue_identity("peer").unwrap();
    let scan = dir.path().join("import");
    std::fs::create_dir_all(scan.join("nested")).unwrap();
    std::fs::write(scan.join("root.der"), ca.certificate_der()).unwrap();
    write_bundle(&scan.join("nested").join("peer.pem"), &[leaf.certificate.clone()]);
    std::fs::write(scan.join("notes.txt"), b"not a certificate").unwrap();

    let (tx, rx) = mpsc::channel();
    store
        .pin_certificate_path(scan.clone(), move |ids| tx.send(ids).unwrap())
        .join()
        .unwrap();
    let ids = rx.recv_timeout(Duration::from_secs(5)).unwrap();
    assert_eq!(ids.len(), 2);

    let path_event = events
        .try_iter()
        .find(|e| matches!(e, StoreEvent::PathPinned { .. }))
        .unwrap();
    assert_eq!(
        path_event,
        StoreEvent::PathPinned {
            path: scan.clone(),
            ids: ids.clone()
        }
    );

    let leaf_id = Certificate::from_der(&leaf.certificate).unwrap().id().to_string();
    let stored = store.get_certificate(&leaf_id).unwrap();
    assert_eq!(stored.issuer().unwrap().name(), "root");

    assert_eq!(store.unpin_certificate_path(&scan), 2);
    assert!(store.get_certificate(&leaf_id).is_none());
    assert!(store.get_pinned_certificates().is_empty());
    assert_eq!(store.unpin_certificate_path(&scan), 0);
}

#[test]
fn path_unpin_leaves_other_pins() {
    let (dir, store) = open();
    let ca = CertificateAuthority::generate("root").unwrap();
    let other = CertificateAuthority::generate("other").unwrap();

    let scan = dir.path().join("bundle.pem");
    write_bundle(&scan, &[ca.certificate_der()]);
    store.pin_certificate_path(scan.clone(), |_| {}).join().unwrap();
    let ids = store.pin_certificate_der(&other.certificate_der(), false).unwrap();

    assert_eq!(store.get_pinned_certificates().len(), 2);
    assert_eq!(store.unpin_certificate_path(&scan), 1);
    assert_eq!(store.get_pinned_certificates(), vec![ids[1].clone()]);
}

#[test]
fn path_pin_of_a_missing_path_is_empty() {
    let (dir, store) = open();
    let (tx, rx) = mpsc::channel();
    store
        .pin_certificate_path(dir.path().join("missing"), move |ids| {
            tx.send(ids).unwrap()
        })
        .join()
        .unwrap();
    assert!(rx.recv().unwrap().is_empty());
    assert!(store.get_pinned_certificates().is_empty());
}

#[test]
fn bundle_in_store_directory_loads_as_chain() {
    let (dir, store) = open();
    let ca = CertificateAuthority::generate("root").unwrap();
    let leaf = ca.issue_identity("peer").unwrap();
    let cert = Arc::new(Certificate::from_der(&leaf.certificate).unwrap());
    drop(store);

    write_bundle(
        &dir.path()
            .join("store")
            .join("certificates")
            .join(cert.long_id()),
        &leaf.chain(),
    );
    let store = peertls::CertificateStore::open(dir.path().join("store")).unwrap();
    let loaded = store.get_certificate(cert.id()).unwrap();
    assert_eq!(loaded.as_der(), &leaf.certificate[..]);
    assert_eq!(loaded.issuer().unwrap().name(), "root");
    assert_eq!(store.get_pinned_certificates().len(), 2);
}
