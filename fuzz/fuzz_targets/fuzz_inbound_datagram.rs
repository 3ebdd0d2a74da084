#![no_main]

//! Feeds arbitrary datagrams to a responder waiting for a cookie exchange.
//!
//! Anything that is not a valid ClientHello must end as a counted rejection,
//! never a panic on the worker thread.

use std::io;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use libfuzzer_sys::fuzz_target;

use peertls::{
    generate_self_signed_certificate, Callbacks, Config, Credentials, Role, Session, Transport,
};

struct Sink;

impl Transport for Sink {
    fn send(&self, _datagram: &[u8]) -> io::Result<()> {
        Ok(())
    }

    fn max_payload(&self) -> usize {
        1400
    }
}

struct Quiet;

impl Callbacks for Quiet {}

fn responder() -> Option<&'static Session> {
    static SESSION: OnceLock<Option<Session>> = OnceLock::new();
    SESSION
        .get_or_init(|| {
            let key = generate_self_signed_certificate("fuzz").ok()?;
            let config = Config::builder()
                .flood_threshold(usize::MAX)
                .cookie_timeout(Duration::from_secs(24 * 3600))
                .build()
                .ok()?;
            Session::new(
                Role::Responder,
                Arc::new(config),
                Credentials::from_certified_key(&key),
                Arc::new(Sink),
                Arc::new(Quiet),
            )
            .ok()
        })
        .as_ref()
}

fuzz_target!(|data: &[u8]| {
    if let Some(session) = responder() {
        session.push_datagram(data);
    }
});
