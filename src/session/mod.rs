//! Thread-per-session runtime around the protocol engine.
//!
//! A [`Session`] owns one worker thread that drives the lifecycle
//! `SETUP -> COOKIE (responder) -> HANDSHAKE -> ESTABLISHED -> SHUTDOWN`.
//! Inbound datagrams are pushed from the transport's thread, queued, and
//! consumed by the worker, which sleeps on a condition variable whenever it
//! has nothing to do.

use std::fmt;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use zeroize::Zeroizing;

mod fsm;
mod queue;
mod stats;
mod transport;
mod worker;

pub use fsm::State;
pub use stats::IoStats;
pub use transport::Transport;

pub use crate::engine::{Role, SessionInfo};

use crate::certificate::{Certificate, CertificateChain, CertifiedKey};
use crate::engine::payload_room;
use crate::store::CertificateStore;
use crate::trust::{CertVerifier, TrustedIssuersOnly};
use crate::{Config, Error};
use queue::InboundQueue;
use stats::Counters;
use worker::Worker;

/// Notifications from a session's worker thread.
///
/// Every method runs on the worker thread. Calling [`Session::shutdown`]
/// from a callback is allowed; it does not wait for the worker.
pub trait Callbacks: Send + Sync {
    /// Fires once per transition.
    fn on_state_change(&self, old: State, new: State) {
        let _ = (old, new);
    }

    /// A decrypted application record with its packed epoch and sequence
    /// number.
    fn on_data(&self, sequence: u64, data: &[u8]) {
        let _ = (sequence, data);
    }

    /// The peer's chain after it passed verification.
    fn on_certificates(&self, chain: &CertificateChain) {
        let _ = chain;
    }

    /// Policy for the peer's chain. Consulted once, during SETUP.
    fn verifier(&self) -> Arc<dyn CertVerifier> {
        Arc::new(TrustedIssuersOnly)
    }
}

/// Local identity of a session and the issuers it trusts.
#[derive(Clone)]
pub struct Credentials {
    pub(crate) chain: Vec<Vec<u8>>,
    pub(crate) private_key: Zeroizing<Vec<u8>>,
    pub(crate) trusted_issuers: Vec<Vec<u8>>,
}

impl Credentials {
    /// Certificate chain in DER, leaf first, and the leaf's private key as
    /// PKCS#8 (DER or PEM) or SEC1.
    pub fn new(chain: Vec<Vec<u8>>, private_key: Vec<u8>) -> Self {
        Credentials {
            chain,
            private_key: Zeroizing::new(private_key),
            trusted_issuers: Vec::new(),
        }
    }

    pub fn from_certified_key(key: &CertifiedKey) -> Self {
        Credentials::new(key.chain(), key.private_key.clone())
    }

    /// Trust chains issued by `issuer` (DER).
    pub fn with_trusted_issuer(mut self, issuer: Vec<u8>) -> Self {
        self.trusted_issuers.push(issuer);
        self
    }

    /// Trust everything the store marks as a trusted issuer.
    pub fn with_store_issuers(mut self, store: &CertificateStore) -> Self {
        self.trusted_issuers.extend(
            store
                .trusted_certificates()
                .iter()
                .map(|c| c.as_der().to_vec()),
        );
        self
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("chain", &self.chain.len())
            .field("trusted_issuers", &self.trusted_issuers.len())
            .finish_non_exhaustive()
    }
}

/// State shared between a session handle and its worker.
pub(crate) struct Shared {
    role: Role,
    config: Arc<Config>,
    transport: Arc<dyn Transport>,
    callbacks: Arc<dyn Callbacks>,
    inner: Mutex<Inner>,
    /// Signalled on new work for the worker.
    wake: Condvar,
    /// Signalled on every state transition.
    state_changed: Condvar,
    stats: Counters,
}

struct Inner {
    state: State,
    queue: InboundQueue,
    outbound: std::collections::VecDeque<Vec<u8>>,
    shutdown_requested: bool,
    rehandshake_requested: bool,
    info: Option<SessionInfo>,
    peer_chain: Option<CertificateChain>,
    max_payload: usize,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Wait on `condvar` until notified or `deadline`. Without a deadline the
    /// wait is untimed. Returns `None` once the deadline has passed.
    fn wait<'a>(
        condvar: &Condvar,
        inner: MutexGuard<'a, Inner>,
        deadline: Option<Instant>,
    ) -> Option<MutexGuard<'a, Inner>> {
        let Some(deadline) = deadline else {
            return Some(condvar.wait(inner).unwrap_or_else(PoisonError::into_inner));
        };
        let now = Instant::now();
        if now >= deadline {
            return None;
        }
        Some(
            condvar
                .wait_timeout(inner, deadline - now)
                .map(|(guard, _)| guard)
                .unwrap_or_else(|e| e.into_inner().0),
        )
    }

    fn push(&self, datagram: &[u8]) {
        Counters::add(&self.stats.rx_packets, 1);
        Counters::add(&self.stats.rx_bytes, datagram.len() as u64);

        if datagram.len() > self.config.max_datagram_size() {
            Counters::add(&self.stats.rx_oversized, 1);
            debug!("Drop oversized datagram of {} bytes", datagram.len());
            return;
        }

        let mut inner = self.lock();
        if inner.state == State::Shutdown {
            return;
        }
        let dropped = inner.queue.push(datagram.to_vec());
        drop(inner);

        if dropped > 0 {
            Counters::add(&self.stats.rx_dropped, dropped as u64);
            warn!("Inbound queue full, dropped {} datagram(s)", dropped);
        }
        self.wake.notify_one();
    }
}

/// Cheap handle for feeding inbound datagrams from a transport.
#[derive(Clone)]
pub struct InboundHandle {
    shared: Arc<Shared>,
}

impl InboundHandle {
    /// Queue a datagram for the session. Never blocks on the worker.
    pub fn push(&self, datagram: &[u8]) {
        self.shared.push(datagram);
    }
}

impl fmt::Debug for InboundHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InboundHandle")
            .field("role", &self.shared.role)
            .finish()
    }
}

/// A secure session with one peer.
pub struct Session {
    shared: Arc<Shared>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Session {
    /// Create a session and start its worker thread in SETUP.
    pub fn new(
        role: Role,
        config: Arc<Config>,
        credentials: Credentials,
        transport: Arc<dyn Transport>,
        callbacks: Arc<dyn Callbacks>,
    ) -> Result<Session, Error> {
        let mtu = config.mtu().min(transport.max_payload());
        let inner = Inner {
            state: State::Setup,
            queue: InboundQueue::new(config.max_queue_rx()),
            outbound: Default::default(),
            shutdown_requested: false,
            rehandshake_requested: false,
            info: None,
            peer_chain: None,
            max_payload: payload_room(mtu),
        };
        let shared = Arc::new(Shared {
            role,
            config,
            transport,
            callbacks,
            inner: Mutex::new(inner),
            wake: Condvar::new(),
            state_changed: Condvar::new(),
            stats: Counters::default(),
        });

        let worker = Worker::new(shared.clone(), credentials);
        let handle = thread::Builder::new()
            .name("peertls-session".into())
            .spawn(move || worker.run())?;

        Ok(Session {
            shared,
            worker: Mutex::new(Some(handle)),
        })
    }

    pub fn role(&self) -> Role {
        self.shared.role
    }

    pub fn state(&self) -> State {
        self.shared.lock().state
    }

    /// Queue an inbound datagram.
    pub fn push_datagram(&self, datagram: &[u8]) {
        self.shared.push(datagram);
    }

    /// A handle that pushes into this session without keeping it open.
    pub fn inbound(&self) -> InboundHandle {
        InboundHandle {
            shared: self.shared.clone(),
        }
    }

    /// Send application data.
    ///
    /// Data sent before ESTABLISHED is queued, up to `max_queue_tx` items.
    pub fn send(&self, data: &[u8]) -> Result<(), Error> {
        let mut inner = self.shared.lock();
        if inner.state == State::Shutdown || inner.shutdown_requested {
            return Err(Error::Shutdown);
        }
        if data.len() > inner.max_payload {
            return Err(Error::Config(format!(
                "{} bytes exceed the max payload of {}",
                data.len(),
                inner.max_payload
            )));
        }
        if inner.outbound.len() >= self.shared.config.max_queue_tx() {
            return Err(Error::TransmitQueueFull);
        }
        inner.outbound.push_back(data.to_vec());
        drop(inner);
        self.shared.wake.notify_one();
        Ok(())
    }

    /// Renegotiate keys. Only valid in ESTABLISHED.
    pub fn rehandshake(&self) -> Result<(), Error> {
        let mut inner = self.shared.lock();
        match inner.state {
            State::Established => {
                inner.rehandshake_requested = true;
                drop(inner);
                self.shared.wake.notify_one();
                Ok(())
            }
            State::Shutdown => Err(Error::Shutdown),
            state => Err(Error::Handshake(format!(
                "cannot rehandshake in {}",
                state
            ))),
        }
    }

    /// Stop the session and wait for its worker to finish.
    ///
    /// Calling it again, or after the session shut down by itself, does
    /// nothing.
    pub fn shutdown(&self) {
        {
            let mut inner = self.shared.lock();
            inner.shutdown_requested = true;
        }
        self.shared.wake.notify_all();

        let handle = self
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            if handle.thread().id() == thread::current().id() {
                // Called from a callback; the worker sees the flag on return.
                return;
            }
            if handle.join().is_err() {
                warn!("Session worker panicked");
            }
        }
    }

    /// Block until the state satisfies `pred` or `timeout` passes.
    ///
    /// Returns the matching state, or `None` on timeout.
    pub fn wait_for_state<F>(&self, pred: F, timeout: Duration) -> Option<State>
    where
        F: Fn(State) -> bool,
    {
        // An unrepresentable deadline waits forever.
        let deadline = Instant::now().checked_add(timeout);
        let mut inner = self.shared.lock();
        loop {
            if pred(inner.state) {
                return Some(inner.state);
            }
            inner = Shared::wait(&self.shared.state_changed, inner, deadline)?;
        }
    }

    /// Block until ESTABLISHED.
    pub fn wait_established(&self, timeout: Duration) -> Result<(), Error> {
        let reached = self.wait_for_state(
            |s| matches!(s, State::Established | State::Shutdown),
            timeout,
        );
        match reached {
            Some(State::Established) => Ok(()),
            Some(_) => Err(Error::Shutdown),
            None => Err(Error::Timeout("established")),
        }
    }

    /// Leaf of the peer's verified chain.
    pub fn peer_certificate(&self) -> Option<Arc<Certificate>> {
        self.shared
            .lock()
            .peer_chain
            .as_ref()
            .map(|c| c.leaf().clone())
    }

    pub fn peer_certificates(&self) -> Option<CertificateChain> {
        self.shared.lock().peer_chain.clone()
    }

    /// Parameters of the last completed handshake.
    pub fn session_info(&self) -> Option<SessionInfo> {
        self.shared.lock().info
    }

    /// Largest payload [`Session::send`] accepts.
    pub fn max_payload(&self) -> usize {
        self.shared.lock().max_payload
    }

    pub fn stats(&self) -> IoStats {
        self.shared.stats.snapshot()
    }

    /// Log the I/O counters at debug level.
    pub fn dump_io_stats(&self) {
        debug!("{:?} session: {}", self.shared.role, self.stats());
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("role", &self.shared.role)
            .field("state", &self.state())
            .finish()
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.shutdown();
    }
}
