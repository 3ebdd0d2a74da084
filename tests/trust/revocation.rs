use std::sync::Arc;

use peertls::{CertificateAuthority, PermissionStatus, RevocationList};

use crate::common::*;

fn revocation_list(ca: &CertificateAuthority, serials: &[&[u8]]) -> Arc<RevocationList> {
    let der = ca.issue_revocation_list(serials, 1).unwrap();
    Arc::new(RevocationList::from_der(&der).unwrap())
}

#[test]
fn pinned_list_refuses_lone_and_presented_leaves() {
    let f = fixture();
    let ca = CertificateAuthority::generate("root").unwrap();
    let ca_cert = cert(&ca.certificate_der());
    let revoked = ca.issue_identity("revoked").unwrap();
    let kept = chain(&ca.issue_identity("kept").unwrap());

    f.trust
        .set_certificate_status_for(&ca_cert, PermissionStatus::Allowed, false);
    let presented = chain(&revoked);
    assert!(f.trust.is_allowed(presented.leaf(), false));

    // Pinned after the issuer was allowed.
    f.store
        .pin_revocation_list(ca_cert.id(), revocation_list(&ca, &[presented.leaf().serial()]))
        .unwrap();

    // The peer presents its own copy of the issuer.
    assert!(!f.trust.is_allowed(presented.leaf(), false));
    assert!(!f.trust.is_allowed(presented.leaf(), true));

    let lone = cert(&revoked.certificate);
    assert!(!f.trust.is_allowed(&lone, false));

    assert!(f.trust.is_allowed(kept.leaf(), false));
}

#[test]
fn pinned_list_survives_a_rebuild() {
    let f = fixture();
    let ca = CertificateAuthority::generate("root").unwrap();
    let ca_cert = cert(&ca.certificate_der());
    let peer = chain(&ca.issue_identity("peer").unwrap());

    f.trust
        .set_certificate_status_for(&ca_cert, PermissionStatus::Allowed, false);
    f.store
        .pin_revocation_list(ca_cert.id(), revocation_list(&ca, &[peer.leaf().serial()]))
        .unwrap();

    f.trust
        .set_certificate_status(ca_cert.id(), PermissionStatus::Banned);
    f.trust
        .set_certificate_status(ca_cert.id(), PermissionStatus::Allowed);
    assert!(!f.trust.is_allowed(peer.leaf(), false));
}

#[test]
fn revoked_intermediate_refuses_its_leaves() {
    let f = fixture();
    let root = CertificateAuthority::generate("root").unwrap();
    let root_cert = cert(&root.certificate_der());
    let intermediate = root.issue_authority("intermediate").unwrap();
    let peer = chain(&intermediate.issue_identity("peer").unwrap());

    f.trust
        .set_certificate_status_for(&root_cert, PermissionStatus::Allowed, false);
    assert!(f.trust.is_allowed(peer.leaf(), false));

    let intermediate_serial = peer.certificates()[1].serial().to_vec();
    f.store
        .pin_revocation_list(root_cert.id(), revocation_list(&root, &[&intermediate_serial]))
        .unwrap();
    assert!(!f.trust.is_allowed(peer.leaf(), false));
}

#[test]
fn trust_store_list_applies_to_presented_chains() {
    let f = fixture();
    let ca = CertificateAuthority::generate("root").unwrap();
    let ca_cert = cert(&ca.certificate_der());
    let revoked = chain(&ca.issue_identity("revoked").unwrap());
    let kept = chain(&ca.issue_identity("kept").unwrap());

    f.trust
        .set_certificate_status_for(&ca_cert, PermissionStatus::Allowed, false);
    f.trust
        .add_revocation_list(revocation_list(&ca, &[revoked.leaf().serial()]));

    assert!(!f.trust.is_allowed(revoked.leaf(), false));
    assert!(f.trust.is_allowed(kept.leaf(), false));

    // Lists fed to the trust store are replayed on rebuild.
    f.trust
        .set_certificate_status(ca_cert.id(), PermissionStatus::Banned);
    f.trust
        .set_certificate_status(ca_cert.id(), PermissionStatus::Allowed);
    assert!(!f.trust.is_allowed(revoked.leaf(), false));
    assert!(f.trust.is_allowed(kept.leaf(), false));
}
