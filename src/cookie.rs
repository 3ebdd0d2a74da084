//! Stateless cookie exchange run by responders before committing any
//! handshake state.

use hmac::digest::KeyInit;
use hmac::{Hmac, Mac};
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::Sha256;

use crate::message::{parse_datagram, ClientHello, Fragment, HelloVerifyRequest, Message, Record};
use crate::types::{ContentType, HandshakeType, ProtocolVersion, Sequence};
use crate::util::constant_time_eq;
use crate::Error;

/// Bytes of HMAC output kept as the cookie.
const COOKIE_LEN: usize = 20;

/// Where the responder continues after a verified cookie.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub(crate) struct PreState {
    /// Record sequence number of the verified client hello.
    pub record_seq: u64,
    /// Handshake message_seq of the verified client hello.
    pub message_seq: u16,
}

#[derive(Debug, PartialEq, Eq)]
pub(crate) enum CookieCheck {
    /// The datagram carries a client hello with a valid cookie.
    Valid(PreState),
    /// A client hello without a valid cookie. Holds the
    /// HelloVerifyRequest datagram to answer with.
    Challenge(Vec<u8>),
    /// Not a client hello at all.
    Garbage,
}

/// Per-session cookie key.
pub(crate) struct CookieSecret {
    mac: Hmac<Sha256>,
}

impl CookieSecret {
    pub fn generate() -> Result<Self, Error> {
        let mut secret = [0u8; 32];
        OsRng.fill_bytes(&mut secret);
        let mac = <Hmac<Sha256> as KeyInit>::new_from_slice(&secret)
            .map_err(|_| Error::Crypto("invalid cookie secret".into()))?;
        Ok(CookieSecret { mac })
    }

    fn cookie(&self, hello: &ClientHello) -> Vec<u8> {
        let mut mac = self.mac.clone();
        mac.update(&hello.cookie_input());
        mac.finalize().into_bytes()[..COOKIE_LEN].to_vec()
    }

    /// Check the first record of `datagram`.
    ///
    /// Only an unfragmented epoch 0 client hello qualifies.
    pub fn check(&self, datagram: &[u8]) -> CookieCheck {
        let Some(record) = parse_datagram(datagram).into_iter().next() else {
            return CookieCheck::Garbage;
        };
        if record.content_type != ContentType::Handshake || record.sequence.epoch != 0 {
            return CookieCheck::Garbage;
        }
        let Ok((_, fragment)) = Fragment::parse(&record.fragment) else {
            return CookieCheck::Garbage;
        };
        let header = &fragment.header;
        if header.msg_type != HandshakeType::ClientHello
            || header.fragment_offset != 0
            || header.fragment_length != header.length
        {
            return CookieCheck::Garbage;
        }
        let Ok((_, hello)) = ClientHello::parse(&fragment.body) else {
            return CookieCheck::Garbage;
        };

        let expected = self.cookie(&hello);
        if !hello.cookie.is_empty() && constant_time_eq(&hello.cookie, &expected) {
            return CookieCheck::Valid(PreState {
                record_seq: record.sequence.sequence_number,
                message_seq: header.message_seq,
            });
        }

        trace!("Cookie challenge for record {}", record.sequence);
        let request = HelloVerifyRequest {
            server_version: ProtocolVersion::DTLS1_2,
            cookie: expected,
        };
        let mut body = Vec::new();
        request.serialize(&mut body);
        let message = Message::new(HandshakeType::HelloVerifyRequest, header.message_seq, body);

        let mut out = Vec::new();
        for fragment in message.fragments(usize::MAX) {
            Record::new(
                ContentType::Handshake,
                Sequence::new(0, record.sequence.sequence_number),
                fragment,
            )
            .serialize(&mut out);
        }
        CookieCheck::Challenge(out)
    }
}
