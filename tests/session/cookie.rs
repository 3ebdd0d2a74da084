use std::sync::Arc;
use std::time::{Duration, Instant};

use peertls::{CertificateAuthority, Role, Session, State};

use crate::common::*;

/// The first datagram an initiator sends: a client hello without cookie.
fn client_hello() -> Vec<u8> {
    let ca = CertificateAuthority::generate("test ca").unwrap();
    let link = Link::new();
    link.set_blackhole(true);
    let initiator = Session::new(
        Role::Initiator,
        Arc::new(config()),
        credentials(&ca, "alice"),
        link.clone(),
        Recorder::new(),
    )
    .unwrap();
    assert!(wait_until(WAIT, || !link.sent().is_empty()));
    initiator.shutdown();
    link.sent().remove(0)
}

#[test]
fn replayed_hello_is_only_challenged() {
    let hello = client_hello();
    let link = Link::new();
    let (responder, recorder) = lone_responder(config(), link.clone());

    for _ in 0..3 {
        responder.push_datagram(&hello);
    }
    assert!(wait_until(WAIT, || link.sent().len() == 3));
    assert_eq!(responder.state(), State::Cookie);
    assert_eq!(recorder.transitions(), vec![(State::Setup, State::Cookie)]);
    assert_eq!(responder.stats().cookie_bytes, 3 * hello.len() as u64);

    // Every challenge carries the same cookie.
    let sent = link.sent();
    assert_eq!(sent[0], sent[1]);
    assert_eq!(sent[1], sent[2]);
}

#[test]
fn garbage_floods_are_paused() {
    let config = config_builder()
        .flood_threshold(100)
        .flood_pause(Duration::from_millis(200))
        .build()
        .unwrap();
    let link = Link::new();
    let (responder, _recorder) = lone_responder(config, link.clone());

    let start = Instant::now();
    for _ in 0..5 {
        responder.push_datagram(&[0x42; 64]);
    }
    assert!(wait_until(WAIT, || responder.stats().cookie_bytes == 5 * 64));
    let elapsed = start.elapsed();

    // Packets two to four each pause before the next is looked at.
    assert!(elapsed >= Duration::from_millis(600), "{:?}", elapsed);
    assert!(wait_until(WAIT, || responder.stats().flood_pauses == 4));
    assert_eq!(responder.state(), State::Cookie);
    assert_eq!(responder.stats().rejected, 5);
    assert!(link.sent().is_empty());
}

#[test]
fn flood_pause_starts_at_the_threshold() {
    let config = config_builder()
        .flood_threshold(128)
        .flood_pause(Duration::from_millis(50))
        .build()
        .unwrap();
    let (responder, _recorder) = lone_responder(config, Link::new());

    responder.push_datagram(&[0x42; 64]);
    assert!(wait_until(WAIT, || responder.stats().cookie_bytes == 64));
    assert_eq!(responder.stats().flood_pauses, 0);

    // Exactly at the threshold.
    responder.push_datagram(&[0x42; 64]);
    assert!(wait_until(WAIT, || responder.stats().flood_pauses == 1));
    assert_eq!(responder.stats().cookie_bytes, 128);
}

#[test]
fn shutdown_cuts_a_flood_pause_short() {
    let config = config_builder()
        .flood_threshold(0)
        .flood_pause(Duration::from_secs(30))
        .build()
        .unwrap();
    let (responder, _recorder) = lone_responder(config, Link::new());

    responder.push_datagram(b"not a hello");
    assert!(wait_until(WAIT, || responder.stats().flood_pauses == 1));

    let start = Instant::now();
    responder.shutdown();
    assert!(start.elapsed() < Duration::from_secs(10));
    assert_eq!(responder.state(), State::Shutdown);
}

#[test]
fn unbounded_cookie_timers_wait_for_shutdown() {
    let config = config_builder()
        .cookie_timeout(Duration::MAX)
        .flood_threshold(0)
        .flood_pause(Duration::MAX)
        .build()
        .unwrap();
    let (responder, _recorder) = lone_responder(config, Link::new());

    responder.push_datagram(b"not a hello");
    assert!(wait_until(WAIT, || responder.stats().flood_pauses == 1));
    assert_eq!(responder.state(), State::Cookie);

    responder.shutdown();
    assert_eq!(responder.state(), State::Shutdown);
}

#[test]
fn full_queue_drops_the_oldest() {
    let config = config_builder()
        .max_queue_rx(4)
        .flood_threshold(0)
        .flood_pause(Duration::from_secs(30))
        .build()
        .unwrap();
    let (responder, _recorder) = lone_responder(config, Link::new());

    responder.push_datagram(b"first");
    assert!(wait_until(WAIT, || responder.stats().cookie_bytes == 5));

    // The worker is pausing; nothing is consumed.
    for i in 0..10u8 {
        responder.push_datagram(&[i; 8]);
    }
    let stats = responder.stats();
    assert_eq!(stats.rx_packets, 11);
    assert_eq!(stats.rx_dropped, 6);
}

#[test]
fn cookie_exchange_times_out() {
    let config = config_builder()
        .cookie_timeout(Duration::from_millis(200))
        .build()
        .unwrap();
    let link = Link::new();
    let (responder, recorder) = lone_responder(config, link.clone());

    assert_eq!(
        responder.wait_for_state(|s| s == State::Shutdown, WAIT),
        Some(State::Shutdown)
    );
    assert!(wait_until(WAIT, || recorder.transitions().len() == 2));
    assert_eq!(
        recorder.transitions(),
        vec![
            (State::Setup, State::Cookie),
            (State::Cookie, State::Shutdown)
        ]
    );
    assert!(link.is_shut_down());
}
