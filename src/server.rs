//! Responder side of the handshake, from the verified client hello on.
//!
//! The cookie exchange before it is stateless and lives in `cookie.rs`.

use std::time::Instant;

use crate::engine::{
    malformed, Engine, Handshake, HandshakeState, Role, CLIENT_CONTEXT, CLIENT_FINISHED,
    SERVER_CONTEXT, SERVER_FINISHED,
};
use crate::message::{ClientHello, Message, ServerHello};
use crate::types::{HandshakeType, ProtocolVersion, Random};
use crate::Error;

impl Engine {
    /// Wait for a client hello with `message_seq` in `epoch`.
    pub(crate) fn start_server_handshake(&mut self, epoch: u16, message_seq: u16, now: Instant) {
        debug!("Start handshake in epoch {} at message_seq {}", epoch, message_seq);
        self.handshake = Some(Handshake::new(
            HandshakeState::ServerAwaitHello,
            epoch,
            message_seq,
            self.handshake_max_len(),
        ));
        self.arm_connect_timeout(now);
    }

    pub(crate) fn server_message(&mut self, message: Message, now: Instant) -> Result<(), Error> {
        let state = self.hs()?.state;
        let next = match (state, message.msg_type) {
            (HandshakeState::ServerAwaitHello, HandshakeType::ClientHello) => {
                self.receive_client_hello(&message, now)?;
                HandshakeState::ServerAwaitCertificate
            }
            (HandshakeState::ServerAwaitCertificate, HandshakeType::Certificate) => {
                self.receive_certificate(&message)?;
                HandshakeState::ServerAwaitCertificateVerify
            }
            (HandshakeState::ServerAwaitCertificateVerify, HandshakeType::CertificateVerify) => {
                self.receive_certificate_verify(&message, CLIENT_CONTEXT)?;
                HandshakeState::ServerAwaitFinished
            }
            (HandshakeState::ServerAwaitFinished, HandshakeType::Finished) => {
                self.receive_finished(&message, CLIENT_FINISHED)?;
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

    /// Answer a client hello with the whole server flight.
    fn receive_client_hello(&mut self, message: &Message, now: Instant) -> Result<(), Error> {
        let (_, hello) =
            ClientHello::parse(&message.body).map_err(|e| malformed("ClientHello", e))?;
        if hello.client_version != ProtocolVersion::DTLS1_2 {
            return Err(Error::Handshake(format!(
                "unsupported version {:?}",
                hello.client_version
            )));
        }

        // Our preference order wins.
        let suite = self
            .config()
            .cipher_suites()
            .iter()
            .find(|s| hello.cipher_suites.contains(s))
            .copied()
            .ok_or_else(|| Error::Handshake("no shared cipher suite".into()))?;
        debug!("Chose {:?}", suite);

        let hs = self.hs_mut()?;
        hs.client_random = hello.random;
        hs.server_random = Random::generate();
        hs.suite = Some(suite);
        hs.transcript.push(&message.to_bytes());
        let shared = hs.kx.compute_shared_secret(&hello.key_share)?;

        let server_hello = ServerHello {
            server_version: ProtocolVersion::DTLS1_2,
            random: hs.server_random,
            cipher_suite: suite,
            key_share: hs.kx.public_key().to_vec(),
        };
        let mut body = Vec::new();
        server_hello.serialize(&mut body);

        self.flight_begin(now);
        self.send_handshake(HandshakeType::ServerHello, body)?;
        self.hs_mut()?.derive_keys(&shared, Role::Responder)?;
        self.send_authentication(SERVER_CONTEXT, SERVER_FINISHED)
    }
}
