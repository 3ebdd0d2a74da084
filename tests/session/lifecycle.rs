use std::thread;
use std::time::Duration;

use peertls::{Error, State};

use crate::common::*;

#[test]
fn shutdown_is_idempotent() {
    let pair = pair(config());
    pair.establish();

    pair.initiator.shutdown();
    pair.initiator.shutdown();
    assert_eq!(pair.initiator.state(), State::Shutdown);
    assert_eq!(pair.a.entered(State::Shutdown), 1);
    assert!(pair.to_responder.is_shut_down());

    // close_notify reaches the peer.
    assert_eq!(
        pair.responder
            .wait_for_state(|s| s == State::Shutdown, WAIT),
        Some(State::Shutdown)
    );
    pair.responder.shutdown();
    assert!(wait_until(WAIT, || pair.b.entered(State::Shutdown) == 1));
    assert_eq!(
        pair.b.transitions().last(),
        Some(&(State::Established, State::Shutdown))
    );
}

#[test]
fn send_after_shutdown_fails() {
    let pair = pair(config());
    pair.establish();
    pair.responder.shutdown();

    assert!(matches!(pair.responder.send(b"late"), Err(Error::Shutdown)));
    assert!(matches!(
        pair.responder.wait_established(WAIT),
        Err(Error::Shutdown)
    ));
}

#[test]
fn dropping_the_session_shuts_it_down() {
    let pair = pair(config());
    pair.establish();

    let Pair {
        initiator,
        responder,
        to_responder,
        b,
        ..
    } = pair;
    drop(initiator);
    assert!(to_responder.is_shut_down());
    assert_eq!(
        responder.wait_for_state(|s| s == State::Shutdown, WAIT),
        Some(State::Shutdown)
    );
    assert!(wait_until(WAIT, || b.entered(State::Shutdown) == 1));
}

#[test]
fn silent_peer_is_declared_dead() {
    let config = config_builder()
        .heartbeat_interval(Some(Duration::from_millis(200)))
        .heartbeat_timeout(Duration::from_millis(100))
        .heartbeat_tries(2)
        .build()
        .unwrap();
    let pair = pair(config);
    pair.establish();

    // Heartbeats keep a healthy pair alive.
    std::thread::sleep(Duration::from_millis(700));
    assert_eq!(pair.initiator.state(), State::Established);
    assert_eq!(pair.responder.state(), State::Established);

    pair.to_responder.set_blackhole(true);
    pair.to_initiator.set_blackhole(true);
    assert_eq!(
        pair.initiator
            .wait_for_state(|s| s == State::Shutdown, WAIT),
        Some(State::Shutdown)
    );
    assert_eq!(
        pair.responder
            .wait_for_state(|s| s == State::Shutdown, WAIT),
        Some(State::Shutdown)
    );
}

#[test]
fn stats_count_traffic() {
    let config = config_builder()
        .mtu(600)
        .max_datagram_size(1000)
        .build()
        .unwrap();
    let pair = pair(config);
    pair.establish();

    pair.initiator.send(b"counted").unwrap();
    assert!(wait_until(WAIT, || !pair.b.data().is_empty()));

    pair.responder.push_datagram(&[0; 2000]);
    let stats = pair.responder.stats();
    assert_eq!(stats.rx_oversized, 1);
    assert!(stats.rx_packets >= 2);
    assert!(stats.tx_packets >= 1);
    assert!(stats.rx_bytes > 2000);
    assert!(stats.cookie_bytes > 0);

    let initiator = pair.initiator.stats();
    assert_eq!(initiator.cookie_bytes, 0);
    assert_eq!(initiator.tx_packets, pair.to_responder.sent().len() as u64);
    pair.initiator.dump_io_stats();
}

#[test]
fn unbounded_waits_do_not_overflow() {
    let pair = pair(config());
    pair.establish();

    assert_eq!(
        pair.initiator
            .wait_for_state(|s| s == State::Established, Duration::MAX),
        Some(State::Established)
    );

    thread::scope(|scope| {
        scope.spawn(|| {
            thread::sleep(Duration::from_millis(100));
            pair.responder.shutdown();
        });
        // Woken by the close_notify, not by a deadline.
        assert_eq!(
            pair.initiator
                .wait_for_state(|s| s == State::Shutdown, Duration::MAX),
            Some(State::Shutdown)
        );
    });

    assert!(matches!(
        pair.responder.wait_established(Duration::MAX),
        Err(Error::Shutdown)
    ));
}

#[test]
fn unbounded_engine_timers_still_connect() {
    let config = config_builder()
        .handshake_timeout(Duration::MAX)
        .heartbeat_interval(Some(Duration::MAX))
        .heartbeat_timeout(Duration::MAX)
        .build()
        .unwrap();
    let pair = pair(config);
    pair.establish();

    pair.initiator.send(b"ping").unwrap();
    assert!(wait_until(WAIT, || pair.b.data() == vec![b"ping".to_vec()]));
}
