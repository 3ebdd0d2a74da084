//! Shared helpers for session integration tests.

#![allow(unused)]

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use peertls::{
    CertVerifier, CertificateAuthority, CertificateChain, Config, Credentials, InboundHandle,
    Role, Session, State, Transport, TrustedIssuersOnly,
};

pub const WAIT: Duration = Duration::from_secs(10);

pub fn init_log() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Config with short retransmission timers and reproducible jitter.
pub fn config() -> Config {
    config_builder().build().unwrap()
}

pub fn config_builder() -> peertls::ConfigBuilder {
    Config::builder()
        .flight_start_rto(Duration::from_millis(100))
        .handshake_timeout(Duration::from_secs(10))
        .rng_seed(7)
}

/// One direction of an in-memory datagram path.
///
/// Datagrams sent before the far end is connected are held and delivered on
/// [`Link::connect`].
pub struct Link {
    peer: Mutex<Option<InboundHandle>>,
    pending: Mutex<Vec<Vec<u8>>>,
    sent: Mutex<Vec<Vec<u8>>>,
    max_payload: usize,
    blackhole: AtomicBool,
    shut_down: AtomicBool,
}

impl Link {
    pub fn new() -> Arc<Link> {
        Link::with_max_payload(1500)
    }

    pub fn with_max_payload(max_payload: usize) -> Arc<Link> {
        Arc::new(Link {
            peer: Mutex::new(None),
            pending: Mutex::new(Vec::new()),
            sent: Mutex::new(Vec::new()),
            max_payload,
            blackhole: AtomicBool::new(false),
            shut_down: AtomicBool::new(false),
        })
    }

    pub fn connect(&self, peer: InboundHandle) {
        let mut slot = self.peer.lock().unwrap();
        for datagram in self.pending.lock().unwrap().drain(..) {
            peer.push(&datagram);
        }
        *slot = Some(peer);
    }

    /// Silently lose everything sent from now on.
    pub fn set_blackhole(&self, on: bool) {
        self.blackhole.store(on, Ordering::SeqCst);
    }

    /// Every datagram handed to this link, lost or not.
    pub fn sent(&self) -> Vec<Vec<u8>> {
        self.sent.lock().unwrap().clone()
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::SeqCst)
    }
}

impl Transport for Link {
    fn send(&self, datagram: &[u8]) -> io::Result<()> {
        self.sent.lock().unwrap().push(datagram.to_vec());
        if self.blackhole.load(Ordering::SeqCst) {
            return Ok(());
        }
        let peer = self.peer.lock().unwrap();
        match &*peer {
            Some(handle) => handle.push(datagram),
            None => self.pending.lock().unwrap().push(datagram.to_vec()),
        }
        Ok(())
    }

    fn max_payload(&self) -> usize {
        self.max_payload
    }

    fn shutdown(&self) {
        self.shut_down.store(true, Ordering::SeqCst);
    }
}

/// Callbacks that remember everything.
pub struct Recorder {
    transitions: Mutex<Vec<(State, State)>>,
    data: Mutex<Vec<(u64, Vec<u8>)>>,
    peers: Mutex<Vec<CertificateChain>>,
    verifier: Arc<dyn CertVerifier>,
}

impl Recorder {
    pub fn new() -> Arc<Recorder> {
        Recorder::with_verifier(Arc::new(TrustedIssuersOnly))
    }

    pub fn with_verifier(verifier: Arc<dyn CertVerifier>) -> Arc<Recorder> {
        Arc::new(Recorder {
            transitions: Mutex::new(Vec::new()),
            data: Mutex::new(Vec::new()),
            peers: Mutex::new(Vec::new()),
            verifier,
        })
    }

    pub fn transitions(&self) -> Vec<(State, State)> {
        self.transitions.lock().unwrap().clone()
    }

    pub fn data(&self) -> Vec<Vec<u8>> {
        self.data.lock().unwrap().iter().map(|(_, d)| d.clone()).collect()
    }

    pub fn sequences(&self) -> Vec<u64> {
        self.data.lock().unwrap().iter().map(|(s, _)| *s).collect()
    }

    pub fn peers(&self) -> Vec<CertificateChain> {
        self.peers.lock().unwrap().clone()
    }

    pub fn entered(&self, state: State) -> usize {
        self.transitions()
            .iter()
            .filter(|(_, new)| *new == state)
            .count()
    }
}

impl peertls::Callbacks for Recorder {
    fn on_state_change(&self, old: State, new: State) {
        self.transitions.lock().unwrap().push((old, new));
    }

    fn on_data(&self, sequence: u64, data: &[u8]) {
        self.data.lock().unwrap().push((sequence, data.to_vec()));
    }

    fn on_certificates(&self, chain: &CertificateChain) {
        self.peers.lock().unwrap().push(chain.clone());
    }

    fn verifier(&self) -> Arc<dyn CertVerifier> {
        self.verifier.clone()
    }
}

/// An identity issued by `ca` that trusts `ca`.
pub fn credentials(ca: &CertificateAuthority, name: &str) -> Credentials {
    let key = ca.issue_identity(name).unwrap();
    Credentials::from_certified_key(&key).with_trusted_issuer(ca.certificate_der())
}

pub struct Pair {
    pub initiator: Session,
    pub responder: Session,
    /// Carries the initiator's datagrams.
    pub to_responder: Arc<Link>,
    /// Carries the responder's datagrams.
    pub to_initiator: Arc<Link>,
    pub a: Arc<Recorder>,
    pub b: Arc<Recorder>,
}

impl Pair {
    pub fn establish(&self) {
        self.initiator.wait_established(WAIT).unwrap();
        self.responder.wait_established(WAIT).unwrap();
    }
}

/// Two sessions of the same CA talking over in-memory links.
pub fn pair(config: Config) -> Pair {
    let ca = CertificateAuthority::generate("test ca").unwrap();
    pair_with(
        config,
        credentials(&ca, "alice"),
        credentials(&ca, "bob"),
        Recorder::new(),
        Recorder::new(),
    )
}

pub fn pair_with(
    config: Config,
    initiator: Credentials,
    responder: Credentials,
    a: Arc<Recorder>,
    b: Arc<Recorder>,
) -> Pair {
    init_log();
    let config = Arc::new(config);

    let to_initiator = Link::new();
    let responder = Session::new(
        Role::Responder,
        config.clone(),
        responder,
        to_initiator.clone(),
        b.clone(),
    )
    .unwrap();

    let to_responder = Link::new();
    to_responder.connect(responder.inbound());
    let initiator = Session::new(
        Role::Initiator,
        config,
        initiator,
        to_responder.clone(),
        a.clone(),
    )
    .unwrap();
    to_initiator.connect(initiator.inbound());

    Pair {
        initiator,
        responder,
        to_responder,
        to_initiator,
        a,
        b,
    }
}

/// A responder nobody talks to.
pub fn lone_responder(config: Config, link: Arc<Link>) -> (Session, Arc<Recorder>) {
    init_log();
    let ca = CertificateAuthority::generate("test ca").unwrap();
    let recorder = Recorder::new();
    let session = Session::new(
        Role::Responder,
        Arc::new(config),
        credentials(&ca, "bob"),
        link,
        recorder.clone(),
    )
    .unwrap();
    (session, recorder)
}

/// Poll `cond` until it holds or `timeout` passes.
pub fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if cond() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        thread::sleep(Duration::from_millis(5));
    }
}
