use thiserror::Error;

use crate::message::AlertDescription;

/// Errors produced by sessions, the certificate store and the trust store.
#[derive(Debug, Error)]
pub enum Error {
    /// Invalid configuration value.
    #[error("config error: {0}")]
    Config(String),

    /// A datagram, record or handshake message could not be parsed.
    #[error("parse error: {0}")]
    Parse(String),

    /// A record was dropped: bad MAC, replay, unknown epoch or wrong content.
    #[error("record dropped: {0}")]
    Record(String),

    /// A handshake message arrived that does not fit the current flight.
    #[error("unexpected message: {0}")]
    UnexpectedMessage(String),

    /// Key agreement, signing, or cipher failure.
    #[error("crypto error: {0}")]
    Crypto(String),

    /// Handshake could not be completed with the peer.
    #[error("handshake failure: {0}")]
    Handshake(String),

    /// A certificate could not be parsed or does not match its key.
    #[error("certificate error: {0}")]
    Certificate(String),

    /// The verification callback rejected the peer's certificate chain.
    #[error("peer certificate rejected: {0}")]
    Rejected(String),

    /// The peer sent a fatal alert.
    #[error("peer sent fatal alert: {0:?}")]
    Alert(AlertDescription),

    /// Retransmissions or heartbeat requests ran out.
    #[error("timeout: {0}")]
    Timeout(&'static str),

    /// The session is shut down and accepts no more operations.
    #[error("session is shut down")]
    Shutdown,

    /// Outbound plaintext queue is full.
    #[error("transmit queue is full")]
    TransmitQueueFull,

    /// Underlying io error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether this error ends the session.
    ///
    /// Non-fatal errors concern a single record and leave the state machine
    /// where it is.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            Error::Parse(_) | Error::Record(_) | Error::TransmitQueueFull
        )
    }
}

impl From<der::Error> for Error {
    fn from(value: der::Error) -> Self {
        Error::Certificate(value.to_string())
    }
}
