//! Initiator side of the handshake.
//!
//! ```text
//! ClientHello            -->
//!                        <--  HelloVerifyRequest
//! ClientHello + cookie   -->
//!                        <--  ServerHello, Certificate,
//!                             CertificateVerify, Finished
//! Certificate,
//! CertificateVerify,
//! Finished               -->
//! ```

use std::time::Instant;

use crate::engine::{
    malformed, Engine, Handshake, HandshakeState, Role, CLIENT_CONTEXT, CLIENT_FINISHED,
    SERVER_CONTEXT, SERVER_FINISHED,
};
use crate::message::{ClientHello, HelloVerifyRequest, Message, ServerHello, MAX_COOKIE_LEN};
use crate::types::{HandshakeType, ProtocolVersion};
use crate::Error;

impl Engine {
    /// Begin a handshake whose messages travel in `epoch`.
    pub(crate) fn start_client_handshake(&mut self, epoch: u16, now: Instant) -> Result<(), Error> {
        debug!("Start handshake in epoch {}", epoch);
        self.handshake = Some(Handshake::new(
            HandshakeState::ClientAwaitHello,
            epoch,
            0,
            self.handshake_max_len(),
        ));
        self.arm_connect_timeout(now);
        self.send_client_hello(now)
    }

    fn send_client_hello(&mut self, now: Instant) -> Result<(), Error> {
        let hs = self.hs()?;
        let hello = ClientHello {
            client_version: ProtocolVersion::DTLS1_2,
            random: hs.client_random,
            cookie: hs.cookie.clone(),
            cipher_suites: self.config().cipher_suites().to_vec(),
            key_share: hs.kx.public_key().to_vec(),
        };
        let mut body = Vec::new();
        hello.serialize(&mut body);

        self.flight_begin(now);
        self.send_handshake(HandshakeType::ClientHello, body)
    }

    pub(crate) fn client_message(&mut self, message: Message, now: Instant) -> Result<(), Error> {
        let state = self.hs()?.state;
        let next = match (state, message.msg_type) {
            (HandshakeState::ClientAwaitHello, HandshakeType::HelloVerifyRequest) => {
                self.receive_hello_verify_request(&message, now)?;
                HandshakeState::ClientAwaitHello
            }
            (HandshakeState::ClientAwaitHello, HandshakeType::ServerHello) => {
                self.receive_server_hello(&message)?;
                HandshakeState::ClientAwaitCertificate
            }
            (HandshakeState::ClientAwaitCertificate, HandshakeType::Certificate) => {
                self.receive_certificate(&message)?;
                HandshakeState::ClientAwaitCertificateVerify
            }
            (HandshakeState::ClientAwaitCertificateVerify, HandshakeType::CertificateVerify) => {
                self.receive_certificate_verify(&message, SERVER_CONTEXT)?;
                HandshakeState::ClientAwaitFinished
            }
            (HandshakeState::ClientAwaitFinished, HandshakeType::Finished) => {
                self.receive_finished(&message, SERVER_FINISHED)?;

                self.flight_begin(now);
                self.send_authentication(CLIENT_CONTEXT, CLIENT_FINISHED)?;
                // Our flight stays saved in case the server repeats its own.
                return self.complete_handshake(now);
            }
            (state, msg_type) => {
                return Err(Error::UnexpectedMessage(format!(
                    "{:?} while in {:?}",
                    msg_type, state
                )))
            }
        };
        self.hs_mut()?.state = next;
        Ok(())
    }

    fn receive_hello_verify_request(&mut self, message: &Message, now: Instant) -> Result<(), Error> {
        let (_, request) = HelloVerifyRequest::parse(&message.body)
            .map_err(|e| malformed("HelloVerifyRequest", e))?;
        if request.cookie.is_empty() || request.cookie.len() > MAX_COOKIE_LEN {
            return Err(Error::Handshake(format!(
                "bad cookie length {}",
                request.cookie.len()
            )));
        }

        let hs = self.hs_mut()?;
        if !hs.cookie.is_empty() {
            return Err(Error::UnexpectedMessage("second HelloVerifyRequest".into()));
        }
        trace!("Got cookie of {} bytes", request.cookie.len());
        hs.cookie = request.cookie;
        // The transcript starts over with the hello that carries the cookie.
        hs.transcript.clear();
        self.send_client_hello(now)
    }

    fn receive_server_hello(&mut self, message: &Message) -> Result<(), Error> {
        let (_, hello) =
            ServerHello::parse(&message.body).map_err(|e| malformed("ServerHello", e))?;
        if hello.server_version != ProtocolVersion::DTLS1_2 {
            return Err(Error::Handshake(format!(
                "unsupported version {:?}",
                hello.server_version
            )));
        }
        if !self.config().cipher_suites().contains(&hello.cipher_suite) {
            return Err(Error::Handshake(format!(
                "server chose {:?}, which was not offered",
                hello.cipher_suite
            )));
        }
        debug!("Server chose {:?}", hello.cipher_suite);

        let hs = self.hs_mut()?;
        hs.server_random = hello.random;
        hs.suite = Some(hello.cipher_suite);
        hs.transcript.push(&message.to_bytes());
        let shared = hs.kx.compute_shared_secret(&hello.key_share)?;
        hs.derive_keys(&shared, Role::Initiator)
    }
}
