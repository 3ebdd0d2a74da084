use std::sync::Arc;
use std::time::{Duration, Instant};

use super::fsm::{self, Input, State};
use super::stats::Counters;
use super::{Credentials, Shared};
use crate::cookie::{CookieCheck, CookieSecret};
use crate::engine::{payload_room, Engine, Event, Identity, Role};
use crate::{Error, MIN_MTU};

/// What woke the worker.
enum Work {
    Datagram(Vec<u8>),
    Outbound(Vec<u8>),
    Rehandshake,
    Timeout,
    Shutdown,
}

/// What the worker is ready to take from the shared state.
#[derive(Clone, Copy)]
enum Take {
    /// Only the oldest inbound datagram, left in the queue.
    Peek,
    Engine { established: bool, idle: bool },
}

/// The session's worker thread.
pub(crate) struct Worker {
    shared: Arc<Shared>,
    state: State,
    credentials: Option<Credentials>,
    identity: Option<Arc<Identity>>,
    mtu: usize,
    engine: Option<Engine>,
    cookie: Option<CookieSecret>,
    cookie_deadline: Option<Instant>,
    cookie_bytes: usize,
}

impl Worker {
    pub fn new(shared: Arc<Shared>, credentials: Credentials) -> Self {
        Worker {
            shared,
            state: State::Setup,
            credentials: Some(credentials),
            identity: None,
            mtu: 0,
            engine: None,
            cookie: None,
            cookie_deadline: None,
            cookie_bytes: 0,
        }
    }

    pub fn run(mut self) {
        debug!("{:?} session worker started", self.shared.role);
        loop {
            let result = match self.state {
                State::Setup => self.setup(),
                State::Cookie => self.cookie_step(),
                State::Handshake | State::Established => self.engine_step(),
                State::Shutdown => break,
            };
            if let Err(e) = result {
                self.fail(e);
            }
        }
        debug!("{:?} session worker stopped", self.shared.role);
    }

    fn setup(&mut self) -> Result<(), Error> {
        let Some(credentials) = self.credentials.take() else {
            return Err(Error::Config("credentials already consumed".into()));
        };
        let verifier = self.shared.callbacks.verifier();
        let identity = Arc::new(Identity::new(
            credentials.chain,
            &credentials.private_key,
            &credentials.trusted_issuers,
            verifier,
        )?);

        let mtu = self
            .shared
            .config
            .mtu()
            .min(self.shared.transport.max_payload());
        if mtu < MIN_MTU {
            return Err(Error::Config(format!(
                "transport payload of {} is below the minimum mtu of {}",
                mtu, MIN_MTU
            )));
        }
        self.mtu = mtu;

        match self.shared.role {
            Role::Initiator => {
                let engine = Engine::client(
                    self.shared.config.clone(),
                    identity.clone(),
                    mtu,
                    Instant::now(),
                )?;
                self.engine = Some(engine);
            }
            Role::Responder => {
                self.cookie = Some(CookieSecret::generate()?);
                self.cookie_deadline =
                    Instant::now().checked_add(self.shared.config.cookie_timeout());
            }
        }
        self.identity = Some(identity);

        self.apply(Input::CredentialsLoaded);
        self.flush();
        Ok(())
    }

    /// Wait for a client hello that proves it can receive at its address.
    fn cookie_step(&mut self) -> Result<(), Error> {
        let datagram = match self.wait_for_work(self.cookie_deadline, Take::Peek) {
            Work::Datagram(d) => d,
            Work::Timeout => {
                debug!("No valid client hello within {:?}", self.shared.config.cookie_timeout());
                self.apply(Input::Shutdown);
                return Ok(());
            }
            Work::Shutdown => {
                self.apply(Input::Shutdown);
                return Ok(());
            }
            Work::Outbound(_) | Work::Rehandshake => return Ok(()),
        };

        let Some(secret) = &self.cookie else {
            return Err(Error::Config("no cookie secret".into()));
        };
        let check = secret.check(&datagram);
        self.consume(&datagram);
        self.cookie_bytes += datagram.len();
        Counters::add(&self.shared.stats.cookie_bytes, datagram.len() as u64);

        match check {
            CookieCheck::Valid(pre) => {
                trace!("Verified cookie at message_seq {}", pre.message_seq);
                let identity = self
                    .identity
                    .clone()
                    .ok_or_else(|| Error::Config("no identity".into()))?;
                let now = Instant::now();
                let engine =
                    Engine::server(self.shared.config.clone(), identity, self.mtu, pre, now)?;
                self.engine = Some(engine);
                self.cookie = None;
                self.cookie_deadline = None;
                self.apply(Input::CookieVerified);

                // The verified hello starts the handshake proper.
                self.handle_datagram(&datagram)?;
                self.flush();
                self.drain_events();
                return Ok(());
            }
            CookieCheck::Challenge(reply) => self.send(&reply),
            CookieCheck::Garbage => {
                Counters::add(&self.shared.stats.rejected, 1);
                trace!("Drop {} byte non-hello in cookie exchange", datagram.len());
            }
        }

        if self.cookie_bytes >= self.shared.config.flood_threshold() {
            let pause = self.shared.config.flood_pause();
            Counters::add(&self.shared.stats.flood_pauses, 1);
            warn!(
                "Cookie exchange flooded with {} bytes, pausing {:?}",
                self.cookie_bytes, pause
            );
            self.pause(pause);
        }
        Ok(())
    }

    fn engine_step(&mut self) -> Result<(), Error> {
        let Some(engine) = &self.engine else {
            return Err(Error::Handshake("no engine".into()));
        };
        let deadline = engine.poll_timeout();
        let established = engine.is_established();
        let idle = established && !engine.is_handshaking();

        match self.wait_for_work(deadline, Take::Engine { established, idle }) {
            Work::Datagram(datagram) => self.handle_datagram(&datagram)?,
            Work::Outbound(data) => self.engine_mut()?.send_application_data(&data)?,
            Work::Rehandshake => {
                debug!("Local rehandshake request");
                self.engine_mut()?.request_rehandshake(Instant::now())?;
            }
            Work::Timeout => self.engine_mut()?.handle_timeout(Instant::now())?,
            Work::Shutdown => {
                self.apply(Input::Shutdown);
                return Ok(());
            }
        }
        self.flush();
        self.drain_events();
        Ok(())
    }

    fn handle_datagram(&mut self, datagram: &[u8]) -> Result<(), Error> {
        let engine = self.engine_mut()?;
        match engine.handle_datagram(datagram, Instant::now()) {
            Err(e) if !e.is_fatal() => {
                Counters::add(&self.shared.stats.rejected, 1);
                debug!("Drop datagram: {}", e);
                Ok(())
            }
            result => result,
        }
    }

    fn engine_mut(&mut self) -> Result<&mut Engine, Error> {
        self.engine
            .as_mut()
            .ok_or_else(|| Error::Handshake("no engine".into()))
    }

    /// Act on everything the engine reported.
    fn drain_events(&mut self) {
        let mut events = Vec::new();
        if let Some(engine) = &mut self.engine {
            while let Some(event) = engine.poll_event() {
                events.push(event);
            }
        }

        for event in events {
            match event {
                Event::Connected => {
                    self.publish_engine_state();
                    self.apply(Input::HandshakeComplete);
                }
                Event::Rehandshake => self.apply(Input::Rehandshake),
                Event::PeerCertificates(chain) => {
                    self.shared.lock().peer_chain = Some(chain.clone());
                    self.shared.callbacks.on_certificates(&chain);
                }
                Event::ApplicationData(sequence, data) => {
                    self.shared.callbacks.on_data(sequence, &data);
                }
                Event::Closed => {
                    debug!("Peer closed the session");
                    self.apply(Input::Closed);
                }
            }
            if self.state == State::Shutdown {
                break;
            }
        }
    }

    fn publish_engine_state(&self) {
        let Some(engine) = &self.engine else {
            return;
        };
        let mut inner = self.shared.lock();
        inner.info = engine.session_info();
        inner.max_payload = payload_room(self.mtu);
    }

    /// Abort on a fatal error.
    fn fail(&mut self, error: Error) {
        debug!("{:?} session failed: {}", self.shared.role, error);
        if let Some(engine) = &mut self.engine {
            engine.abort(&error);
        }
        self.flush();
        self.engine = None;
        self.apply(Input::Fatal);
    }

    /// Move the state machine and tell everyone who waits on it.
    fn apply(&mut self, input: Input) {
        let old = self.state;
        let new = fsm::next(old, self.shared.role, input);
        if new == old {
            return;
        }

        if new == State::Shutdown {
            self.close(input);
        }

        self.state = new;
        {
            let mut inner = self.shared.lock();
            inner.state = new;
            if new == State::Shutdown {
                inner.queue.clear();
                inner.outbound.clear();
            }
        }
        self.shared.state_changed.notify_all();

        debug!(
            "{:?} session {} -> {} on {:?}",
            self.shared.role, old, new, input
        );
        self.shared.callbacks.on_state_change(old, new);

        if new == State::Shutdown {
            debug!(
                "{:?} session I/O: {}",
                self.shared.role,
                self.shared.stats.snapshot()
            );
        }
    }

    fn close(&mut self, input: Input) {
        if input != Input::Fatal {
            if let Some(engine) = &mut self.engine {
                if engine.is_established() {
                    if let Err(e) = engine.close() {
                        debug!("Failed to queue close_notify: {}", e);
                    }
                }
            }
            self.flush();
        }
        self.engine = None;
        self.shared.transport.shutdown();
    }

    fn flush(&mut self) {
        let Some(engine) = &mut self.engine else {
            return;
        };
        while let Some(datagram) = engine.poll_datagram() {
            if let Err(e) = self.shared.transport.send(&datagram) {
                debug!("Transport send failed: {}", e);
                continue;
            }
            Counters::add(&self.shared.stats.tx_packets, 1);
            Counters::add(&self.shared.stats.tx_bytes, datagram.len() as u64);
        }
    }

    fn send(&self, datagram: &[u8]) {
        match self.shared.transport.send(datagram) {
            Ok(()) => {
                Counters::add(&self.shared.stats.tx_packets, 1);
                Counters::add(&self.shared.stats.tx_bytes, datagram.len() as u64);
            }
            Err(e) => debug!("Transport send failed: {}", e),
        }
    }

    /// Sleep until there is something to do or `deadline` passes.
    ///
    /// With [`Take::Peek`] an inbound datagram stays queued until
    /// [`Worker::consume`]. Outbound data is only taken once established,
    /// local rehandshake requests only when the engine is idle.
    fn wait_for_work(&self, deadline: Option<Instant>, take: Take) -> Work {
        let mut inner = self.shared.lock();
        loop {
            if inner.shutdown_requested {
                return Work::Shutdown;
            }
            let datagram = match take {
                Take::Peek => inner.queue.front().map(<[u8]>::to_vec),
                Take::Engine { .. } => inner.queue.pop(),
            };
            if let Some(datagram) = datagram {
                return Work::Datagram(datagram);
            }
            if let Take::Engine { established, idle } = take {
                if idle && inner.rehandshake_requested {
                    inner.rehandshake_requested = false;
                    return Work::Rehandshake;
                }
                if established {
                    if let Some(data) = inner.outbound.pop_front() {
                        return Work::Outbound(data);
                    }
                }
            }

            inner = match Shared::wait(&self.shared.wake, inner, deadline) {
                Some(inner) => inner,
                None => return Work::Timeout,
            };
        }
    }

    /// Drop the oldest queued datagram if it is still `datagram`.
    fn consume(&self, datagram: &[u8]) {
        let mut inner = self.shared.lock();
        if inner.queue.front() == Some(datagram) {
            inner.queue.pop();
        }
    }

    /// Sleep for `duration`. Only a shutdown request cuts it short.
    fn pause(&self, duration: Duration) {
        let deadline = Instant::now().checked_add(duration);
        let mut inner = self.shared.lock();
        while !inner.shutdown_requested {
            inner = match Shared::wait(&self.shared.wake, inner, deadline) {
                Some(inner) => inner,
                None => return,
            };
        }
    }
}
