use std::sync::Arc;

use peertls::{CertificateAuthority, Error, Role, Session, State};

use crate::common::*;

#[test]
fn data_flows_both_ways() {
    let pair = pair(config());
    pair.establish();

    pair.initiator.send(b"ping").unwrap();
    pair.responder.send(b"pong").unwrap();

    assert!(wait_until(WAIT, || pair.b.data() == vec![b"ping".to_vec()]));
    assert!(wait_until(WAIT, || pair.a.data() == vec![b"pong".to_vec()]));

    // Sequence numbers carry the epoch in the top 16 bits.
    let seq = pair.b.sequences()[0];
    assert_eq!(seq >> 48, 1);
}

#[test]
fn data_sent_early_is_queued() {
    let pair = pair(config());
    for i in 0..5u8 {
        pair.initiator.send(&[i; 10]).unwrap();
    }
    pair.establish();

    let expected: Vec<Vec<u8>> = (0..5u8).map(|i| vec![i; 10]).collect();
    assert!(wait_until(WAIT, || pair.b.data() == expected));
}

#[test]
fn oversized_send_is_refused() {
    let config = config_builder().mtu(600).build().unwrap();
    let pair = pair(config);
    pair.establish();

    let max = pair.initiator.max_payload();
    assert_eq!(max, 600 - 13 - 24);
    assert!(matches!(
        pair.initiator.send(&vec![0; max + 1]),
        Err(Error::Config(_))
    ));

    pair.initiator.send(&vec![7; max]).unwrap();
    assert!(wait_until(WAIT, || pair.b.data() == vec![vec![7; max]]));
}

#[test]
fn send_queue_is_bounded() {
    init_log();
    let ca = CertificateAuthority::generate("test ca").unwrap();
    let link = Link::new();
    link.set_blackhole(true);
    let session = Session::new(
        Role::Initiator,
        Arc::new(config_builder().max_queue_tx(2).build().unwrap()),
        credentials(&ca, "alice"),
        link,
        Recorder::new(),
    )
    .unwrap();

    session.send(b"one").unwrap();
    session.send(b"two").unwrap();
    assert!(matches!(
        session.send(b"three"),
        Err(Error::TransmitQueueFull)
    ));
}

#[test]
fn initiator_rehandshake_moves_to_next_epoch() {
    let pair = pair(config());
    pair.establish();

    pair.initiator.rehandshake().unwrap();
    assert!(wait_until(WAIT, || {
        pair.initiator.session_info().map(|i| i.epoch) == Some(2)
            && pair.responder.session_info().map(|i| i.epoch) == Some(2)
    }));
    pair.establish();
    assert!(wait_until(WAIT, || pair.a.entered(State::Established) == 2));
    assert!(pair
        .a
        .transitions()
        .contains(&(State::Established, State::Handshake)));

    pair.initiator.send(b"after").unwrap();
    assert!(wait_until(WAIT, || pair.b.data() == vec![b"after".to_vec()]));
    assert_eq!(pair.b.sequences()[0] >> 48, 2);
}

#[test]
fn responder_rehandshake_moves_to_next_epoch() {
    let pair = pair(config());
    pair.establish();

    pair.responder.rehandshake().unwrap();
    assert!(wait_until(WAIT, || {
        pair.initiator.session_info().map(|i| i.epoch) == Some(2)
            && pair.responder.session_info().map(|i| i.epoch) == Some(2)
    }));
    assert!(wait_until(WAIT, || pair.b.entered(State::Established) == 2));

    pair.responder.send(b"again").unwrap();
    assert!(wait_until(WAIT, || pair.a.data() == vec![b"again".to_vec()]));
}

#[test]
fn rehandshake_needs_established() {
    init_log();
    let link = Link::new();
    let (responder, _recorder) = lone_responder(config(), link);
    assert!(responder
        .wait_for_state(|s| s == State::Cookie, WAIT)
        .is_some());
    assert!(matches!(responder.rehandshake(), Err(Error::Handshake(_))));

    responder.shutdown();
    assert!(matches!(responder.rehandshake(), Err(Error::Shutdown)));
}
