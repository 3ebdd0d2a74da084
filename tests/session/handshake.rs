use std::sync::Arc;

use peertls::{
    CertificateAuthority, CertificateChain, CipherSuite, Credentials, Role, Session, State,
    Verdict, VerifyFlags,
};

use crate::common::*;

#[test]
fn both_sides_reach_established() {
    let pair = pair(config());
    pair.establish();

    assert!(wait_until(WAIT, || pair.a.entered(State::Established) == 1));
    assert!(wait_until(WAIT, || pair.b.entered(State::Established) == 1));
    assert_eq!(
        pair.a.transitions(),
        vec![
            (State::Setup, State::Handshake),
            (State::Handshake, State::Established)
        ]
    );
    assert_eq!(
        pair.b.transitions(),
        vec![
            (State::Setup, State::Cookie),
            (State::Cookie, State::Handshake),
            (State::Handshake, State::Established)
        ]
    );

    let info = pair.initiator.session_info().unwrap();
    assert_eq!(Some(info), pair.responder.session_info());
    assert_eq!(info.epoch, 1);
    assert_eq!(info.cipher_suite, CipherSuite::ECDHE_ECDSA_AES128_GCM_SHA256);

    assert_eq!(pair.initiator.peer_certificate().unwrap().name(), "bob");
    assert_eq!(pair.responder.peer_certificate().unwrap().name(), "alice");
    let chain = pair.responder.peer_certificates().unwrap();
    assert_eq!(chain.len(), 2);
    assert_eq!(chain.certificates()[1].name(), "test ca");
    assert_eq!(pair.b.peers().len(), 1);
}

#[test]
fn responder_preference_picks_the_suite() {
    let config = config_builder()
        .cipher_suites(&[
            CipherSuite::ECDHE_ECDSA_AES256_GCM_SHA384,
            CipherSuite::ECDHE_ECDSA_AES128_GCM_SHA256,
        ])
        .build()
        .unwrap();
    let pair = pair(config);
    pair.establish();

    let info = pair.initiator.session_info().unwrap();
    assert_eq!(info.cipher_suite, CipherSuite::ECDHE_ECDSA_AES256_GCM_SHA384);
}

#[test]
fn initiator_refuses_untrusted_responder() {
    let ca = CertificateAuthority::generate("test ca").unwrap();
    let other = CertificateAuthority::generate("other ca").unwrap();
    let pair = pair_with(
        config(),
        credentials(&other, "alice"),
        credentials(&ca, "bob"),
        Recorder::new(),
        Recorder::new(),
    );

    assert!(pair.initiator.wait_established(WAIT).is_err());
    assert!(pair.responder.wait_established(WAIT).is_err());
    assert_eq!(pair.initiator.state(), State::Shutdown);
    assert_eq!(pair.responder.state(), State::Shutdown);
    assert!(wait_until(WAIT, || pair.a.entered(State::Shutdown) == 1));
    assert_eq!(pair.a.entered(State::Established), 0);
    assert!(wait_until(WAIT, || pair.b.entered(State::Shutdown) == 1));
    assert_eq!(pair.b.entered(State::Established), 0);
    assert!(pair.initiator.peer_certificate().is_none());
}

#[test]
fn responder_verifier_rejects() {
    let ca = CertificateAuthority::generate("test ca").unwrap();
    let reject = Recorder::with_verifier(Arc::new(
        |chain: &CertificateChain, _flags: VerifyFlags| {
            Verdict::Reject(format!("{} is not welcome", chain.leaf().name()))
        },
    ));
    let pair = pair_with(
        config(),
        credentials(&ca, "alice"),
        credentials(&ca, "bob"),
        Recorder::new(),
        reject,
    );

    let reached = pair
        .responder
        .wait_for_state(|s| s == State::Shutdown, WAIT);
    assert_eq!(reached, Some(State::Shutdown));
    assert!(wait_until(WAIT, || pair.b.entered(State::Shutdown) == 1));
    assert_eq!(pair.b.entered(State::Established), 0);
    assert!(pair.b.peers().is_empty());
    assert!(pair.to_initiator.is_shut_down());
}

#[test]
fn mismatched_key_fails_setup() {
    init_log();
    let ca = CertificateAuthority::generate("test ca").unwrap();
    let alice = ca.issue_identity("alice").unwrap();
    let bob = ca.issue_identity("bob").unwrap();
    let recorder = Recorder::new();
    let link = Link::new();

    let session = Session::new(
        Role::Initiator,
        Arc::new(config()),
        Credentials::new(alice.chain(), bob.private_key.clone()),
        link.clone(),
        recorder.clone(),
    )
    .unwrap();

    assert_eq!(
        session.wait_for_state(|s| s == State::Shutdown, WAIT),
        Some(State::Shutdown)
    );
    assert!(wait_until(WAIT, || !recorder.transitions().is_empty()));
    assert_eq!(recorder.transitions(), vec![(State::Setup, State::Shutdown)]);
    assert!(link.sent().is_empty());
}

#[test]
fn transport_below_minimum_mtu_fails_setup() {
    init_log();
    let ca = CertificateAuthority::generate("test ca").unwrap();
    let link = Link::with_max_payload(400);

    let session = Session::new(
        Role::Initiator,
        Arc::new(config()),
        credentials(&ca, "alice"),
        link.clone(),
        Recorder::new(),
    )
    .unwrap();

    assert!(session.wait_established(WAIT).is_err());
    assert_eq!(session.state(), State::Shutdown);
    assert!(link.sent().is_empty());
}

#[test]
fn lost_flights_are_retransmitted() {
    init_log();
    let ca = CertificateAuthority::generate("test ca").unwrap();
    let config = Arc::new(config());

    // The responder starts late; the first client hellos go nowhere.
    let to_responder = Link::new();
    to_responder.set_blackhole(true);
    let a = Recorder::new();
    let initiator = Session::new(
        Role::Initiator,
        config.clone(),
        credentials(&ca, "alice"),
        to_responder.clone(),
        a.clone(),
    )
    .unwrap();
    assert!(wait_until(WAIT, || to_responder.sent().len() >= 2));

    let to_initiator = Link::new();
    to_initiator.connect(initiator.inbound());
    let responder = Session::new(
        Role::Responder,
        config,
        credentials(&ca, "bob"),
        to_initiator,
        Recorder::new(),
    )
    .unwrap();
    to_responder.connect(responder.inbound());
    to_responder.set_blackhole(false);

    initiator.wait_established(WAIT).unwrap();
    responder.wait_established(WAIT).unwrap();
}

#[test]
fn trust_store_decides_on_peers() {
    let dir = tempfile::TempDir::new().unwrap();
    let store = peertls::CertificateStore::open(dir.path()).unwrap();
    let trust = Arc::new(peertls::TrustStore::new(store.clone()));

    let ca = CertificateAuthority::generate("test ca").unwrap();
    let ca_cert = Arc::new(peertls::Certificate::from_der(&ca.certificate_der()).unwrap());
    trust.set_certificate_status_for(&ca_cert, peertls::PermissionStatus::Allowed, false);

    let alice = ca.issue_identity("alice").unwrap();
    let alice_id = peertls::Certificate::from_der(&alice.certificate)
        .unwrap()
        .id()
        .to_string();
    let verifier = || -> Arc<dyn peertls::CertVerifier> {
        Arc::new(peertls::TrustStoreVerifier::new(trust.clone(), false))
    };

    let pair = pair_with(
        config(),
        Credentials::from_certified_key(&alice).with_store_issuers(&store),
        credentials(&ca, "bob"),
        Recorder::with_verifier(verifier()),
        Recorder::with_verifier(verifier()),
    );
    pair.establish();
    drop(pair);

    trust.set_certificate_status(&alice_id, peertls::PermissionStatus::Banned);
    let pair = pair_with(
        config(),
        Credentials::from_certified_key(&alice),
        credentials(&ca, "bob"),
        Recorder::with_verifier(verifier()),
        Recorder::with_verifier(verifier()),
    );
    assert_eq!(
        pair.responder
            .wait_for_state(|s| s == State::Shutdown, WAIT),
        Some(State::Shutdown)
    );
    assert_eq!(pair.b.entered(State::Established), 0);
}
