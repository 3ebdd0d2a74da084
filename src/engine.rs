//! Sans-IO protocol engine owned by one session.
//!
//! The engine consumes datagrams and timer ticks and produces datagrams and
//! [`Event`]s. It never blocks and never touches a socket; the session worker
//! drives it. Handshake message processing lives in `client.rs` and
//! `server.rs` as further `impl Engine` blocks.

use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::mem;
use std::sync::Arc;
use std::time::Instant;

use zeroize::Zeroizing;

use crate::certificate::{Certificate, CertificateChain};
use crate::cookie::PreState;
use crate::crypto::{
    calculate_extended_master_secret, key_expansion, public_key_bytes, verify_data,
    verify_signature, EcdhKeyPair, RecordProtection, SigningKey, Transcript, DTLS_AEAD_OVERHEAD,
};
use crate::message::{
    parse_datagram, Alert, AlertDescription, AlertLevel, CertificateMsg, CertificateVerify,
    Finished, Fragment, Header, Heartbeat, HeartbeatKind, Insert, Message, Reassembler, Record,
};
use crate::reorder::{Delivered, ReorderBuffer};
use crate::rng::SeededRng;
use crate::timer::ExponentialBackoff;
use crate::trust::{CertVerifier, TrustList, Verdict};
use crate::types::{
    CipherSuite, ContentType, HandshakeType, HashAlgorithm, ProtocolVersion, Random,
    Sequence, SignatureScheme,
};
use crate::util::{constant_time_eq, nom_error};
use crate::window::ReplayWindow;
use crate::{Config, Error};

/// Records of the next epoch buffered until its keys are in place.
const MAX_FUTURE_RECORDS: usize = 32;

/// Size of a heartbeat request payload.
const HEARTBEAT_PAYLOAD_LEN: usize = 16;

pub(crate) const SERVER_CONTEXT: &[u8] = b"peertls server signature";
pub(crate) const CLIENT_CONTEXT: &[u8] = b"peertls client signature";
pub(crate) const SERVER_FINISHED: &str = "server finished";
pub(crate) const CLIENT_FINISHED: &str = "client finished";

/// Which side of the handshake a session plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    /// Sends the first ClientHello.
    Initiator,
    /// Answers with a cookie challenge, then the server flight.
    Responder,
}

/// Parameters negotiated by the last completed handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionInfo {
    pub version: ProtocolVersion,
    pub cipher_suite: CipherSuite,
    /// Epoch records are currently protected with.
    pub epoch: u16,
}

/// Something the session must act on.
#[derive(Debug)]
pub(crate) enum Event {
    /// A handshake completed.
    Connected,
    /// A new handshake started on an established session.
    Rehandshake,
    /// The peer's verified certificate chain.
    PeerCertificates(CertificateChain),
    /// Decrypted application record with its packed epoch and sequence.
    ApplicationData(u64, Vec<u8>),
    /// The peer sent close_notify.
    Closed,
}

/// Local credentials and the policy applied to the peer's chain.
pub(crate) struct Identity {
    pub chain: Vec<Vec<u8>>,
    pub key: SigningKey,
    pub trusted: TrustList,
    pub verifier: Arc<dyn CertVerifier>,
}

impl Identity {
    /// Parse the local chain (leaf first), private key and trusted issuers.
    ///
    /// Fails if anything does not parse or the key does not belong to the leaf.
    pub fn new(
        chain: Vec<Vec<u8>>,
        private_key: &[u8],
        trusted_issuers: &[Vec<u8>],
        verifier: Arc<dyn CertVerifier>,
    ) -> Result<Self, Error> {
        let parsed = CertificateChain::from_der_list(&chain)?;
        let key = SigningKey::load(private_key)?;
        if public_key_bytes(parsed.leaf().public_key_info())? != key.public_key().as_slice() {
            return Err(Error::Certificate(
                "private key does not match the identity certificate".into(),
            ));
        }

        let mut trusted = TrustList::new();
        for der in trusted_issuers {
            trusted.add(Arc::new(Certificate::from_der(der)?));
        }

        Ok(Identity {
            chain,
            key,
            trusted,
            verifier,
        })
    }
}

impl fmt::Debug for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Identity")
            .field("chain", &self.chain.len())
            .field("key", &self.key)
            .field("trusted", &self.trusted.len())
            .finish()
    }
}

pub(crate) struct Keys {
    pub write: RecordProtection,
    pub read: RecordProtection,
}

/// Per-epoch record state. Epoch 0 has no keys.
struct EpochState {
    keys: Option<Keys>,
    next_send: u64,
    replay: ReplayWindow,
}

impl EpochState {
    fn new(keys: Option<Keys>) -> Self {
        EpochState {
            keys,
            next_send: 0,
            replay: ReplayWindow::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum HandshakeState {
    ClientAwaitHello,
    ClientAwaitCertificate,
    ClientAwaitCertificateVerify,
    ClientAwaitFinished,
    ServerAwaitHello,
    ServerAwaitCertificate,
    ServerAwaitCertificateVerify,
    ServerAwaitFinished,
}

/// State of one handshake, initial or renegotiated.
pub(crate) struct Handshake {
    pub state: HandshakeState,
    /// Epoch the handshake messages travel in.
    pub epoch: u16,
    pub reassembler: Reassembler,
    pub next_send_seq: u16,
    pub transcript: Transcript,
    pub client_random: Random,
    pub server_random: Random,
    pub kx: EcdhKeyPair,
    pub suite: Option<CipherSuite>,
    pub master: Option<Zeroizing<Vec<u8>>>,
    pub next_keys: Option<Keys>,
    pub cookie: Vec<u8>,
    pub peer_chain: Option<CertificateChain>,
}

impl Handshake {
    pub fn new(state: HandshakeState, epoch: u16, message_seq: u16, max_len: usize) -> Self {
        Handshake {
            state,
            epoch,
            reassembler: Reassembler::new(message_seq, max_len),
            next_send_seq: message_seq,
            transcript: Transcript::default(),
            client_random: Random::generate(),
            server_random: Random::generate(),
            kx: EcdhKeyPair::generate(),
            suite: None,
            master: None,
            next_keys: None,
            cookie: Vec::new(),
            peer_chain: None,
        }
    }

    pub fn suite(&self) -> Result<CipherSuite, Error> {
        self.suite
            .ok_or_else(|| Error::Handshake("cipher suite not negotiated".into()))
    }

    pub fn hash(&self) -> Result<HashAlgorithm, Error> {
        Ok(self.suite()?.hash_algorithm())
    }

    fn master(&self) -> Result<&[u8], Error> {
        self.master
            .as_deref()
            .map(|m| m.as_slice())
            .ok_or_else(|| Error::Handshake("master secret not derived".into()))
    }

    /// Derive the master secret over the transcript so far and the keys of
    /// the next epoch.
    pub fn derive_keys(&mut self, shared_secret: &[u8], role: Role) -> Result<(), Error> {
        let suite = self.suite()?;
        let hash = suite.hash_algorithm();
        let session_hash = self.transcript.hash(hash);
        let master = calculate_extended_master_secret(shared_secret, &session_hash, hash)?;
        let block = key_expansion(&master, &self.client_random.0, &self.server_random.0, suite)?;

        let client = RecordProtection::new(&block.client_write_key, &block.client_write_iv)?;
        let server = RecordProtection::new(&block.server_write_key, &block.server_write_iv)?;
        self.next_keys = Some(match role {
            Role::Initiator => Keys {
                write: client,
                read: server,
            },
            Role::Responder => Keys {
                write: server,
                read: client,
            },
        });
        self.master = Some(master);
        Ok(())
    }

    /// verify_data over the transcript so far.
    pub fn verify_data(&self, label: &str) -> Result<Vec<u8>, Error> {
        let hash = self.hash()?;
        verify_data(self.master()?, label, &self.transcript.hash(hash), hash)
    }

    /// What a CertificateVerify signs: context string and transcript hash.
    pub fn signed_content(&self, context: &[u8]) -> Result<Vec<u8>, Error> {
        let mut signed = context.to_vec();
        signed.extend_from_slice(&self.transcript.hash(self.hash()?));
        Ok(signed)
    }
}

/// A completed handshake whose peer may still retransmit its last flight.
#[derive(Debug, Clone, Copy)]
struct Completed {
    epoch: u16,
    next_peer_seq: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Timeout {
    Disabled,
    Armed(Instant),
}

impl Timeout {
    /// Armed at `deadline`, or disabled when it is out of range.
    fn at(deadline: Option<Instant>) -> Timeout {
        deadline.map_or(Timeout::Disabled, Timeout::Armed)
    }

    fn deadline(&self) -> Option<Instant> {
        match self {
            Timeout::Disabled => None,
            Timeout::Armed(t) => Some(*t),
        }
    }
}

#[derive(Debug)]
struct SavedRecord {
    content_type: ContentType,
    epoch: u16,
    fragment: Vec<u8>,
}

/// An outstanding heartbeat request.
#[derive(Debug)]
struct PendingHeartbeat {
    payload: Vec<u8>,
    deadline: Timeout,
    tries_left: usize,
}

pub(crate) struct Engine {
    config: Arc<Config>,
    pub(crate) role: Role,
    pub(crate) identity: Arc<Identity>,
    /// Largest datagram produced, the config mtu clamped by the transport.
    mtu: usize,
    pub(crate) rng: SeededRng,

    epochs: BTreeMap<u16, EpochState>,
    read_epoch: u16,
    write_epoch: u16,
    future: Vec<Record>,

    pub(crate) handshake: Option<Handshake>,
    completed: Option<Completed>,
    established: bool,
    suite: Option<CipherSuite>,
    peer_chain: Option<CertificateChain>,

    /// Records of the last flight sent, for retransmission.
    flight: Vec<SavedRecord>,
    flight_backoff: ExponentialBackoff,
    flight_timeout: Timeout,
    connect_timeout: Timeout,
    /// Set when a datagram carried a retransmitted handshake message.
    resend_requested: bool,

    last_rx: Option<Instant>,
    pending_heartbeat: Option<PendingHeartbeat>,
    reorder: Option<ReorderBuffer>,

    queue_tx: VecDeque<Vec<u8>>,
    events: VecDeque<Event>,
}

impl Engine {
    fn new(config: Arc<Config>, role: Role, identity: Arc<Identity>, mtu: usize) -> Self {
        let mut rng = SeededRng::new(config.rng_seed());
        let flight_backoff =
            ExponentialBackoff::new(config.flight_start_rto(), config.flight_retries(), &mut rng);
        let reorder = config
            .reorder()
            .then(|| ReorderBuffer::new(config.reorder_window(), config.reorder_timeout()));

        let mut epochs = BTreeMap::new();
        epochs.insert(0, EpochState::new(None));

        Engine {
            mtu: mtu.min(config.mtu()),
            config,
            role,
            identity,
            rng,
            epochs,
            read_epoch: 0,
            write_epoch: 0,
            future: Vec::new(),
            handshake: None,
            completed: None,
            established: false,
            suite: None,
            peer_chain: None,
            flight: Vec::new(),
            flight_backoff,
            flight_timeout: Timeout::Disabled,
            connect_timeout: Timeout::Disabled,
            resend_requested: false,
            last_rx: None,
            pending_heartbeat: None,
            reorder,
            queue_tx: VecDeque::new(),
            events: VecDeque::new(),
        }
    }

    /// Start an initiator engine. The first ClientHello is queued at once.
    pub fn client(
        config: Arc<Config>,
        identity: Arc<Identity>,
        mtu: usize,
        now: Instant,
    ) -> Result<Self, Error> {
        let mut engine = Self::new(config, Role::Initiator, identity, mtu);
        engine.start_client_handshake(0, now)?;
        Ok(engine)
    }

    /// Start a responder engine after a verified cookie.
    ///
    /// Sequence numbers continue from the client hello that carried the
    /// cookie, which is expected to be fed to the engine next.
    pub fn server(
        config: Arc<Config>,
        identity: Arc<Identity>,
        mtu: usize,
        pre: PreState,
        now: Instant,
    ) -> Result<Self, Error> {
        let mut engine = Self::new(config, Role::Responder, identity, mtu);
        if let Some(state) = engine.epochs.get_mut(&0) {
            state.next_send = pre.record_seq;
        }
        engine.start_server_handshake(0, pre.message_seq, now);
        Ok(engine)
    }

    pub fn is_established(&self) -> bool {
        self.established
    }

    pub fn is_handshaking(&self) -> bool {
        self.handshake.is_some()
    }

    pub fn session_info(&self) -> Option<SessionInfo> {
        let cipher_suite = self.suite?;
        Some(SessionInfo {
            version: ProtocolVersion::DTLS1_2,
            cipher_suite,
            epoch: self.write_epoch,
        })
    }

    /// Largest plaintext that fits one datagram.
    pub fn max_payload(&self) -> usize {
        payload_room(self.mtu)
    }

    pub fn poll_datagram(&mut self) -> Option<Vec<u8>> {
        self.queue_tx.pop_front()
    }

    pub fn poll_event(&mut self) -> Option<Event> {
        self.events.pop_front()
    }

    /// Process one inbound datagram.
    ///
    /// Bad records are logged and dropped one by one. Only errors that end
    /// the session are returned, plus [`Error::Parse`] for a datagram without
    /// a single parsable record.
    pub fn handle_datagram(&mut self, datagram: &[u8], now: Instant) -> Result<(), Error> {
        let records = parse_datagram(datagram);
        if records.is_empty() {
            return Err(Error::Parse(format!(
                "no record in {} byte datagram",
                datagram.len()
            )));
        }

        self.resend_requested = false;
        for record in records {
            if let Err(e) = self.handle_record(record, now) {
                if e.is_fatal() {
                    return Err(e);
                }
                debug!("Drop record: {}", e);
            }
        }

        if mem::take(&mut self.resend_requested) {
            self.flight_resend("peer retransmission")?;
        }
        Ok(())
    }

    fn handle_record(&mut self, record: Record, now: Instant) -> Result<(), Error> {
        let seq = record.sequence;
        let epoch = seq.epoch;

        if epoch > self.read_epoch {
            if epoch == self.read_epoch + 1 && self.future.len() < MAX_FUTURE_RECORDS {
                trace!("Buffer record {} until epoch {} is active", seq, epoch);
                self.future.push(record);
                return Ok(());
            }
            return Err(Error::Record(format!(
                "record {} ahead of epoch {}",
                seq, self.read_epoch
            )));
        }

        let plaintext_only = self.read_epoch > 0;
        let Some(state) = self.epochs.get_mut(&epoch) else {
            return Err(Error::Record(format!("record {} of retired epoch", seq)));
        };

        let plaintext = match &state.keys {
            None => {
                if plaintext_only && record.content_type != ContentType::Handshake {
                    return Err(Error::Record(format!(
                        "plaintext {:?} after encryption started",
                        record.content_type
                    )));
                }
                record.fragment
            }
            Some(keys) => {
                if !state.replay.is_fresh(seq.sequence_number) {
                    return Err(Error::Record(format!("replayed record {}", seq)));
                }
                let plaintext = keys.read.decrypt(record.content_type, seq, &record.fragment)?;
                state.replay.check_and_update(seq.sequence_number);
                plaintext
            }
        };

        self.last_rx = Some(now);
        self.pending_heartbeat = None;

        match record.content_type {
            ContentType::ApplicationData => self.handle_application_data(seq, plaintext, now),
            ContentType::Handshake => {
                self.reorder_filler(seq, now);
                self.handle_handshake(epoch, &plaintext, now)
            }
            ContentType::Alert => {
                self.reorder_filler(seq, now);
                self.handle_alert(&plaintext)
            }
            ContentType::Heartbeat => {
                self.reorder_filler(seq, now);
                self.handle_heartbeat(epoch, &plaintext)
            }
            ContentType::Unknown => Err(Error::Record(format!("unknown content type in {}", seq))),
        }
    }

    fn handle_handshake(&mut self, epoch: u16, mut data: &[u8], now: Instant) -> Result<(), Error> {
        while !data.is_empty() {
            let (rest, fragment) =
                Fragment::parse(data).map_err(|e| nom_error("handshake fragment", e))?;
            data = rest;
            self.handle_fragment(epoch, fragment, now)?;
        }
        self.drive_handshake(now)
    }

    fn handle_fragment(&mut self, epoch: u16, fragment: Fragment, now: Instant) -> Result<(), Error> {
        let msg_type = fragment.header.msg_type;

        if msg_type == HandshakeType::HelloRequest {
            if self.role == Role::Initiator
                && self.established
                && self.handshake.is_none()
                && epoch == self.read_epoch
            {
                debug!("Peer requested a rehandshake in epoch {}", epoch);
                self.events.push_back(Event::Rehandshake);
                self.start_client_handshake(epoch, now)?;
            }
            return Ok(());
        }

        if let Some(hs) = &mut self.handshake {
            if hs.epoch == epoch {
                if hs.reassembler.insert(fragment)? == Insert::Old {
                    self.resend_requested = true;
                }
                return Ok(());
            }
        }

        if let Some(done) = self.completed {
            if done.epoch == epoch && fragment.header.message_seq < done.next_peer_seq {
                if !self.flight.is_empty() {
                    self.resend_requested = true;
                }
                return Ok(());
            }
        }

        if self.role == Role::Responder
            && self.established
            && self.handshake.is_none()
            && msg_type == HandshakeType::ClientHello
            && epoch == self.read_epoch
        {
            debug!("Peer started a rehandshake in epoch {}", epoch);
            self.events.push_back(Event::Rehandshake);
            self.start_server_handshake(epoch, 0, now);
            if let Some(hs) = &mut self.handshake {
                hs.reassembler.insert(fragment)?;
            }
            return Ok(());
        }

        Err(Error::Record(format!(
            "unexpected {:?} in epoch {}",
            msg_type, epoch
        )))
    }

    fn drive_handshake(&mut self, now: Instant) -> Result<(), Error> {
        loop {
            let Some(hs) = self.handshake.as_mut() else {
                return Ok(());
            };
            let Some(message) = hs.reassembler.pop() else {
                return Ok(());
            };
            trace!(
                "Received {:?} seq {} in {:?}",
                message.msg_type,
                message.message_seq,
                hs.state
            );
            match self.role {
                Role::Initiator => self.client_message(message, now)?,
                Role::Responder => self.server_message(message, now)?,
            }
        }
    }

    fn handle_alert(&mut self, data: &[u8]) -> Result<(), Error> {
        let (_, alert) = Alert::parse(data).map_err(|e| nom_error("alert", e))?;
        if alert.description == AlertDescription::CloseNotify {
            debug!("Peer sent close_notify");
            self.events.push_back(Event::Closed);
            return Ok(());
        }
        if alert.level == AlertLevel::Fatal {
            return Err(Error::Alert(alert.description));
        }
        debug!("Ignore warning alert {:?}", alert.description);
        Ok(())
    }

    fn handle_heartbeat(&mut self, epoch: u16, data: &[u8]) -> Result<(), Error> {
        if epoch == 0 {
            return Err(Error::Record("heartbeat in epoch 0".into()));
        }
        let (_, heartbeat) = Heartbeat::parse(data).map_err(|e| nom_error("heartbeat", e))?;
        match heartbeat.kind {
            HeartbeatKind::Request => {
                trace!("Answer heartbeat request");
                let response = Heartbeat {
                    kind: HeartbeatKind::Response,
                    payload: heartbeat.payload,
                };
                let mut out = Vec::new();
                response.serialize(&mut out);
                self.send_record(ContentType::Heartbeat, self.write_epoch, &out, false)
            }
            HeartbeatKind::Response => {
                trace!("Heartbeat response of {} bytes", heartbeat.payload.len());
                Ok(())
            }
        }
    }

    fn handle_application_data(
        &mut self,
        seq: Sequence,
        data: Vec<u8>,
        now: Instant,
    ) -> Result<(), Error> {
        if seq.epoch == 0 || !self.established {
            return Err(Error::Record(format!(
                "application data {} before the handshake completed",
                seq
            )));
        }

        let current = seq.epoch == self.read_epoch;
        match &mut self.reorder {
            Some(reorder) if current => {
                let delivered = reorder.insert(seq.sequence_number, Some(data), now);
                self.deliver(seq.epoch, delivered);
            }
            _ => self
                .events
                .push_back(Event::ApplicationData(seq.as_u64(), data)),
        }
        Ok(())
    }

    /// Non-application records still occupy a sequence number in the
    /// reorder buffer so they do not look like gaps.
    fn reorder_filler(&mut self, seq: Sequence, now: Instant) {
        if seq.epoch == 0 || seq.epoch != self.read_epoch {
            return;
        }
        if let Some(reorder) = &mut self.reorder {
            let delivered = reorder.insert(seq.sequence_number, None, now);
            self.deliver(seq.epoch, delivered);
        }
    }

    fn deliver(&mut self, epoch: u16, delivered: Delivered) {
        for (seq, data) in delivered {
            let packed = Sequence::new(epoch, seq).as_u64();
            self.events.push_back(Event::ApplicationData(packed, data));
        }
    }

    /// Queue one record, appending to the last datagram while it fits.
    pub(crate) fn send_record(
        &mut self,
        content_type: ContentType,
        epoch: u16,
        plaintext: &[u8],
        save: bool,
    ) -> Result<(), Error> {
        if save {
            self.flight.push(SavedRecord {
                content_type,
                epoch,
                fragment: plaintext.to_vec(),
            });
        }

        let Some(state) = self.epochs.get_mut(&epoch) else {
            return Err(Error::Crypto(format!("no write state for epoch {}", epoch)));
        };

        let overhead = if state.keys.is_some() {
            DTLS_AEAD_OVERHEAD
        } else {
            0
        };
        let wire_len = Record::HEADER_LEN + plaintext.len() + overhead;

        let can_append = self
            .queue_tx
            .back()
            .map(|b| b.len() + wire_len <= self.mtu)
            .unwrap_or(false);

        if !can_append && self.queue_tx.len() >= self.config.max_queue_tx() {
            warn!(
                "Transmit queue full (max {} datagrams)",
                self.config.max_queue_tx()
            );
            return Err(Error::TransmitQueueFull);
        }

        if state.next_send > Sequence::MAX_SEQUENCE_NUMBER {
            return Err(Error::Crypto(format!(
                "sequence numbers of epoch {} exhausted",
                epoch
            )));
        }
        let sequence = Sequence::new(epoch, state.next_send);
        state.next_send += 1;

        let fragment = match &state.keys {
            Some(keys) => keys.write.encrypt(content_type, sequence, plaintext)?,
            None => plaintext.to_vec(),
        };
        let record = Record::new(content_type, sequence, fragment);

        match self.queue_tx.back_mut() {
            Some(last) if can_append => record.serialize(last),
            _ => {
                let mut datagram = Vec::with_capacity(self.mtu);
                record.serialize(&mut datagram);
                self.queue_tx.push_back(datagram);
            }
        }
        Ok(())
    }

    fn max_fragment_body(&self, epoch: u16) -> usize {
        let overhead = if epoch > 0 { DTLS_AEAD_OVERHEAD } else { 0 };
        self.mtu
            .saturating_sub(Record::HEADER_LEN + Header::LEN + overhead)
    }

    /// Send a handshake message of the running handshake as part of the
    /// current flight.
    pub(crate) fn send_handshake(
        &mut self,
        msg_type: HandshakeType,
        body: Vec<u8>,
    ) -> Result<(), Error> {
        let hs = self.hs_mut()?;
        let message = Message::new(msg_type, hs.next_send_seq, body);
        hs.next_send_seq = hs.next_send_seq.wrapping_add(1);
        hs.transcript.push(&message.to_bytes());
        let epoch = hs.epoch;

        trace!("Send {:?} seq {}", msg_type, message.message_seq);
        for fragment in message.fragments(self.max_fragment_body(epoch)) {
            self.send_record(ContentType::Handshake, epoch, &fragment, true)?;
        }
        Ok(())
    }

    /// Certificate, CertificateVerify and Finished, shared by both roles.
    pub(crate) fn send_authentication(
        &mut self,
        context: &[u8],
        finished_label: &str,
    ) -> Result<(), Error> {
        let mut body = Vec::new();
        CertificateMsg {
            chain: self.identity.chain.clone(),
        }
        .serialize(&mut body);
        self.send_handshake(HandshakeType::Certificate, body)?;

        let signed = self.hs()?.signed_content(context)?;
        let verify = CertificateVerify {
            scheme: self.identity.key.scheme(),
            signature: self.identity.key.sign(&signed)?,
        };
        let mut body = Vec::new();
        verify.serialize(&mut body);
        self.send_handshake(HandshakeType::CertificateVerify, body)?;

        let finished = Finished {
            verify_data: self.hs()?.verify_data(finished_label)?,
        };
        let mut body = Vec::new();
        finished.serialize(&mut body);
        self.send_handshake(HandshakeType::Finished, body)
    }

    /// Parse and vet the peer's Certificate message.
    pub(crate) fn receive_certificate(&mut self, message: &Message) -> Result<(), Error> {
        let (_, msg) = CertificateMsg::parse(&message.body)
            .map_err(|e| malformed("Certificate", e))?;
        if msg.chain.is_empty() {
            return Err(Error::Handshake("peer sent no certificate".into()));
        }
        let chain = CertificateChain::from_der_list(&msg.chain)?;

        let flags = self.identity.trusted.verify(chain.leaf());
        match self.identity.verifier.verify(&chain, flags) {
            Verdict::Accept => debug!("Accepted peer {} ({:?})", chain.leaf().id(), flags),
            Verdict::Reject(reason) => return Err(Error::Rejected(reason)),
        }

        let hs = self.hs_mut()?;
        hs.transcript.push(&message.to_bytes());
        hs.peer_chain = Some(chain);
        Ok(())
    }

    pub(crate) fn receive_certificate_verify(
        &mut self,
        message: &Message,
        context: &[u8],
    ) -> Result<(), Error> {
        let (_, verify) = CertificateVerify::parse(&message.body)
            .map_err(|e| malformed("CertificateVerify", e))?;
        let hash = match verify.scheme {
            SignatureScheme::ECDSA_SECP256R1_SHA256 => HashAlgorithm::SHA256,
            SignatureScheme::ECDSA_SECP384R1_SHA384 => HashAlgorithm::SHA384,
            SignatureScheme::Unknown(v) => {
                return Err(Error::Handshake(format!(
                    "unsupported signature scheme {:04x}",
                    v
                )))
            }
        };

        let hs = self.hs_mut()?;
        let leaf = hs
            .peer_chain
            .as_ref()
            .map(|c| c.leaf().clone())
            .ok_or_else(|| Error::Handshake("CertificateVerify without certificate".into()))?;
        let signed = hs.signed_content(context)?;
        verify_signature(leaf.public_key_info(), hash, &signed, &verify.signature)
            .map_err(|e| Error::Handshake(format!("CertificateVerify: {}", e)))?;

        hs.transcript.push(&message.to_bytes());
        Ok(())
    }

    pub(crate) fn receive_finished(&mut self, message: &Message, label: &str) -> Result<(), Error> {
        let (_, finished) =
            Finished::parse(&message.body).map_err(|e| malformed("Finished", e))?;
        let hs = self.hs_mut()?;
        let expected = hs.verify_data(label)?;
        if !constant_time_eq(&expected, &finished.verify_data) {
            return Err(Error::Handshake("Finished verify_data mismatch".into()));
        }
        hs.transcript.push(&message.to_bytes());
        Ok(())
    }

    /// Move to the keys of the finished handshake.
    pub(crate) fn complete_handshake(&mut self, now: Instant) -> Result<(), Error> {
        let Some(mut hs) = self.handshake.take() else {
            return Ok(());
        };
        let keys = hs
            .next_keys
            .take()
            .ok_or_else(|| Error::Handshake("keys not derived".into()))?;
        let next_epoch = hs
            .epoch
            .checked_add(1)
            .ok_or_else(|| Error::Handshake("epochs exhausted".into()))?;

        self.completed = Some(Completed {
            epoch: hs.epoch,
            next_peer_seq: hs.reassembler.next_seq(),
        });
        self.flight_stop_resend_timers();
        if self.role == Role::Responder {
            // The initiator speaks last; nothing of ours needs resending.
            self.flight.clear();
        }

        self.suite = hs.suite;
        self.established = true;
        self.last_rx = Some(now);
        self.pending_heartbeat = None;

        if let Some(chain) = hs.peer_chain.take() {
            self.peer_chain = Some(chain.clone());
            self.events.push_back(Event::PeerCertificates(chain));
        }
        debug!("Handshake complete, moving to epoch {}", next_epoch);
        self.events.push_back(Event::Connected);

        self.activate_epoch(next_epoch, keys, now)
    }

    fn activate_epoch(&mut self, epoch: u16, keys: Keys, now: Instant) -> Result<(), Error> {
        let previous = self.read_epoch;
        if let Some(reorder) = &mut self.reorder {
            let delivered = reorder.flush();
            self.deliver(previous, delivered);
        }

        self.epochs.insert(epoch, EpochState::new(Some(keys)));
        self.read_epoch = epoch;
        self.write_epoch = epoch;
        let keep_from = epoch.saturating_sub(1);
        self.epochs.retain(|e, _| *e >= keep_from);

        for record in mem::take(&mut self.future) {
            if record.sequence.epoch != epoch {
                continue;
            }
            if let Err(e) = self.handle_record(record, now) {
                if e.is_fatal() {
                    return Err(e);
                }
                debug!("Drop buffered record: {}", e);
            }
        }
        Ok(())
    }

    pub(crate) fn flight_begin(&mut self, now: Instant) {
        self.flight_backoff.reset(&mut self.rng);
        self.flight.clear();
        self.flight_timeout = Timeout::at(self.flight_backoff.deadline(now));
    }

    fn flight_stop_resend_timers(&mut self) {
        self.flight_timeout = Timeout::Disabled;
        self.connect_timeout = Timeout::Disabled;
    }

    fn flight_resend(&mut self, reason: &str) -> Result<(), Error> {
        debug!("Resend flight of {} records: {}", self.flight.len(), reason);
        let records = mem::take(&mut self.flight);
        for entry in &records {
            self.send_record(entry.content_type, entry.epoch, &entry.fragment, false)?;
        }
        self.flight = records;
        Ok(())
    }

    pub(crate) fn arm_connect_timeout(&mut self, now: Instant) {
        self.connect_timeout = Timeout::at(now.checked_add(self.config.handshake_timeout()));
    }

    pub(crate) fn hs(&self) -> Result<&Handshake, Error> {
        self.handshake
            .as_ref()
            .ok_or_else(|| Error::Handshake("no handshake in progress".into()))
    }

    pub(crate) fn hs_mut(&mut self) -> Result<&mut Handshake, Error> {
        self.handshake
            .as_mut()
            .ok_or_else(|| Error::Handshake("no handshake in progress".into()))
    }

    pub(crate) fn config(&self) -> &Config {
        &self.config
    }

    pub(crate) fn handshake_max_len(&self) -> usize {
        self.config.max_datagram_size()
    }

    pub fn handle_timeout(&mut self, now: Instant) -> Result<(), Error> {
        if let Timeout::Armed(deadline) = self.connect_timeout {
            if now >= deadline {
                return Err(Error::Timeout("handshake"));
            }
        }

        if let Timeout::Armed(deadline) = self.flight_timeout {
            if now >= deadline {
                if !self.flight_backoff.can_retry() {
                    return Err(Error::Timeout("flight"));
                }
                self.flight_backoff.attempt(&mut self.rng);
                self.flight_timeout = Timeout::at(self.flight_backoff.deadline(now));
                self.flight_resend("flight timeout")?;
            }
        }

        if let Some(reorder) = &mut self.reorder {
            let delivered = reorder.handle_timeout(now);
            self.deliver(self.read_epoch, delivered);
        }

        self.handle_heartbeat_timeout(now)
    }

    fn heartbeat_active(&self) -> bool {
        self.established && self.handshake.is_none() && self.write_epoch > 0
    }

    fn handle_heartbeat_timeout(&mut self, now: Instant) -> Result<(), Error> {
        let Some(interval) = self.config.heartbeat_interval() else {
            return Ok(());
        };
        if !self.heartbeat_active() {
            return Ok(());
        }

        let timeout = self.config.heartbeat_timeout();
        if let Some(pending) = &mut self.pending_heartbeat {
            match pending.deadline {
                Timeout::Armed(deadline) if now >= deadline => {}
                _ => return Ok(()),
            }
            if pending.tries_left == 0 {
                return Err(Error::Timeout("heartbeat"));
            }
            pending.tries_left -= 1;
            pending.deadline = Timeout::at(now.checked_add(timeout));
            let payload = pending.payload.clone();
            debug!("Heartbeat unanswered, sending again");
            return self.send_heartbeat_request(payload);
        }

        let idle_since = self.last_rx.unwrap_or(now);
        match idle_since.checked_add(interval) {
            Some(due) if now >= due => {}
            _ => return Ok(()),
        }
        let payload: Vec<u8> = (0..HEARTBEAT_PAYLOAD_LEN)
            .map(|_| self.rng.random::<u8>())
            .collect();
        debug!("Peer idle for {:?}, sending heartbeat", now - idle_since);
        self.pending_heartbeat = Some(PendingHeartbeat {
            payload: payload.clone(),
            deadline: Timeout::at(now.checked_add(timeout)),
            tries_left: self.config.heartbeat_tries().saturating_sub(1),
        });
        self.send_heartbeat_request(payload)
    }

    fn send_heartbeat_request(&mut self, payload: Vec<u8>) -> Result<(), Error> {
        let request = Heartbeat {
            kind: HeartbeatKind::Request,
            payload,
        };
        let mut out = Vec::new();
        request.serialize(&mut out);
        self.send_record(ContentType::Heartbeat, self.write_epoch, &out, false)
    }

    /// Earliest instant [`Engine::handle_timeout`] has something to do.
    pub fn poll_timeout(&self) -> Option<Instant> {
        let mut next = earliest(self.connect_timeout.deadline(), self.flight_timeout.deadline());
        if let Some(reorder) = &self.reorder {
            next = earliest(next, reorder.deadline());
        }
        if let Some(interval) = self.config.heartbeat_interval() {
            if self.heartbeat_active() {
                let heartbeat = match &self.pending_heartbeat {
                    Some(pending) => pending.deadline.deadline(),
                    None => self.last_rx.and_then(|t| t.checked_add(interval)),
                };
                next = earliest(next, heartbeat);
            }
        }
        next
    }

    pub fn send_application_data(&mut self, data: &[u8]) -> Result<(), Error> {
        if !self.established || self.write_epoch == 0 {
            return Err(Error::Handshake("session is not established".into()));
        }
        if data.len() > self.max_payload() {
            return Err(Error::Config(format!(
                "{} bytes exceed the max payload of {}",
                data.len(),
                self.max_payload()
            )));
        }
        self.send_record(ContentType::ApplicationData, self.write_epoch, data, false)
    }

    /// Renegotiate keys on an established session.
    ///
    /// An initiator starts a new handshake right away. A responder asks the
    /// initiator to do so with a HelloRequest.
    pub fn request_rehandshake(&mut self, now: Instant) -> Result<(), Error> {
        if !self.established || self.handshake.is_some() {
            return Err(Error::Handshake(
                "rehandshake needs an established session with no handshake running".into(),
            ));
        }
        match self.role {
            Role::Initiator => {
                self.events.push_back(Event::Rehandshake);
                self.start_client_handshake(self.write_epoch, now)
            }
            Role::Responder => {
                debug!("Send HelloRequest in epoch {}", self.write_epoch);
                let request = Message::new(HandshakeType::HelloRequest, 0, Vec::new());
                for fragment in request.fragments(usize::MAX) {
                    self.send_record(ContentType::Handshake, self.write_epoch, &fragment, false)?;
                }
                Ok(())
            }
        }
    }

    /// Queue close_notify.
    pub fn close(&mut self) -> Result<(), Error> {
        let mut out = Vec::new();
        Alert::close_notify().serialize(&mut out);
        self.send_record(ContentType::Alert, self.write_epoch, &out, false)
    }

    /// Best effort fatal alert describing `error`.
    pub fn abort(&mut self, error: &Error) {
        let description = match error {
            Error::Rejected(_) | Error::Certificate(_) => AlertDescription::BadCertificate,
            Error::UnexpectedMessage(_) => AlertDescription::UnexpectedMessage,
            Error::Parse(_) => AlertDescription::DecodeError,
            Error::Crypto(_) => AlertDescription::InternalError,
            Error::Handshake(_) => AlertDescription::HandshakeFailure,
            // The peer is gone or already knows.
            _ => return,
        };
        let mut out = Vec::new();
        Alert::fatal(description).serialize(&mut out);
        if let Err(e) = self.send_record(ContentType::Alert, self.write_epoch, &out, false) {
            debug!("Failed to queue fatal alert: {}", e);
        }
    }
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("role", &self.role)
            .field("read_epoch", &self.read_epoch)
            .field("write_epoch", &self.write_epoch)
            .field("established", &self.established)
            .field("handshake", &self.handshake.as_ref().map(|h| h.state))
            .field("queue_tx", &self.queue_tx.len())
            .finish()
    }
}

/// Plaintext that fits one protected record in a datagram of `mtu` bytes.
pub(crate) fn payload_room(mtu: usize) -> usize {
    mtu.saturating_sub(Record::HEADER_LEN + DTLS_AEAD_OVERHEAD)
}

fn earliest(a: Option<Instant>, b: Option<Instant>) -> Option<Instant> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (a, None) => a,
        (None, b) => b,
    }
}

/// A complete handshake message that does not parse ends the handshake.
pub(crate) fn malformed<E: fmt::Debug>(what: &str, e: nom::Err<E>) -> Error {
    Error::Handshake(format!("malformed {}: {:?}", what, e))
}
