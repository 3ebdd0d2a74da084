use peertls::{generate_self_signed_certificate, CertificateAuthority, PermissionStatus};

use crate::common::*;

#[test]
fn allowed_issuer_admits_its_leaves() {
    let f = fixture();
    let ca = CertificateAuthority::generate("root").unwrap();
    let peer = chain(&ca.issue_identity("peer").unwrap());

    assert!(!f.trust.is_allowed(peer.leaf(), false));
    assert!(f
        .trust
        .set_certificate_status_for(&cert(&ca.certificate_der()), PermissionStatus::Allowed, false));
    assert!(f.trust.is_allowed(peer.leaf(), false));
    assert_eq!(
        f.trust.get_certificate_status(peer.leaf().id()),
        PermissionStatus::Undefined
    );
}

#[test]
fn banned_leaf_is_refused_under_allowed_issuer() {
    let f = fixture();
    let ca = CertificateAuthority::generate("root").unwrap();
    let peer = chain(&ca.issue_identity("peer").unwrap());

    f.trust
        .set_certificate_status_for(&cert(&ca.certificate_der()), PermissionStatus::Allowed, false);
    f.trust
        .set_certificate_status(peer.leaf().id(), PermissionStatus::Banned);

    assert_eq!(
        f.trust.get_certificate_status(peer.leaf().id()),
        PermissionStatus::Banned
    );
    assert!(!f.trust.is_allowed(peer.leaf(), false));
    assert!(!f.trust.is_allowed(peer.leaf(), true));
}

#[test]
fn banned_issuer_refuses_the_whole_chain() {
    let f = fixture();
    let root = CertificateAuthority::generate("root").unwrap();
    let intermediate = root.issue_authority("intermediate").unwrap();
    let peer = chain(&intermediate.issue_identity("peer").unwrap());

    f.trust
        .set_certificate_status_for(&cert(&root.certificate_der()), PermissionStatus::Allowed, false);
    assert!(f.trust.is_allowed(peer.leaf(), false));

    let banned = peer.certificates()[1].clone();
    f.trust
        .set_certificate_status_for(&banned, PermissionStatus::Banned, false);
    assert!(!f.trust.is_allowed(peer.leaf(), false));
    assert!(!f.trust.is_allowed(peer.leaf(), true));
}

#[test]
fn public_peers_need_the_flag() {
    let f = fixture();
    let stranger = chain(&generate_self_signed_certificate("stranger").unwrap());

    assert!(!f.trust.is_allowed(stranger.leaf(), false));
    assert!(f.trust.is_allowed(stranger.leaf(), true));
}

#[test]
fn expired_leaf_is_refused() {
    let f = fixture();
    let ca = CertificateAuthority::generate("root").unwrap();
    let now = time::OffsetDateTime::now_utc();
    let key = ca
        .issue_identity_with_validity(
            "old",
            now - time::Duration::days(60),
            now - time::Duration::days(30),
        )
        .unwrap();
    let peer = chain(&key);

    f.trust
        .set_certificate_status_for(&cert(&ca.certificate_der()), PermissionStatus::Allowed, false);
    assert!(!f.trust.is_allowed(peer.leaf(), false));
}

#[test]
fn undefined_clears_and_reallow_rebuilds() {
    let f = fixture();
    let ca = CertificateAuthority::generate("root").unwrap();
    let ca_cert = cert(&ca.certificate_der());
    let peer = chain(&ca.issue_identity("peer").unwrap());

    f.trust
        .set_certificate_status_for(&ca_cert, PermissionStatus::Allowed, false);
    assert_eq!(
        f.trust.get_certificates_by_status(PermissionStatus::Allowed),
        vec![ca_cert.id().to_string()]
    );

    f.trust
        .set_certificate_status(ca_cert.id(), PermissionStatus::Banned);
    assert!(!f.trust.is_allowed(peer.leaf(), false));
    assert_eq!(
        f.trust.get_certificates_by_status(PermissionStatus::Banned),
        vec![ca_cert.id().to_string()]
    );

    f.trust
        .set_certificate_status(ca_cert.id(), PermissionStatus::Allowed);
    assert!(f.trust.is_allowed(peer.leaf(), false));

    f.trust
        .set_certificate_status(ca_cert.id(), PermissionStatus::Undefined);
    assert_eq!(
        f.trust.get_certificate_status(ca_cert.id()),
        PermissionStatus::Undefined
    );
    assert!(f
        .trust
        .get_certificates_by_status(PermissionStatus::Allowed)
        .is_empty());
    assert!(f
        .trust
        .get_certificates_by_status(PermissionStatus::Undefined)
        .is_empty());
    assert!(!f.trust.is_allowed(peer.leaf(), false));
}

#[test]
fn decisions_wait_for_unknown_certificates() {
    let f = fixture();
    let ca = CertificateAuthority::generate("root").unwrap();
    let ca_cert = cert(&ca.certificate_der());
    let peer = chain(&ca.issue_identity("peer").unwrap());

    // Decided before the store knows it.
    f.trust
        .set_certificate_status(ca_cert.id(), PermissionStatus::Allowed);
    assert_eq!(
        f.trust.get_certificate_status(ca_cert.id()),
        PermissionStatus::Allowed
    );

    f.store.pin_certificate(ca_cert.clone(), false);
    assert!(f.trust.is_allowed(peer.leaf(), false));
    assert_eq!(
        f.trust.get_certificates_by_status(PermissionStatus::Allowed),
        vec![ca_cert.id().to_string()]
    );
}

#[test]
fn status_for_pins_into_the_store() {
    let f = fixture();
    let ca = CertificateAuthority::generate("root").unwrap();
    let ca_cert = cert(&ca.certificate_der());

    f.trust
        .set_certificate_status_for(&ca_cert, PermissionStatus::Allowed, true);
    assert!(f.store.get_certificate(ca_cert.id()).is_some());
    assert!(f
        .dir
        .path()
        .join("certificates")
        .join(ca_cert.long_id())
        .exists());
}
