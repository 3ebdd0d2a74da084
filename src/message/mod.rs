//! Wire messages: the record layer, handshake fragments and bodies, alerts
//! and heartbeats.

mod alert;
mod certificate;
mod handshake;
mod hello;
mod record;

pub use alert::{Alert, AlertDescription, AlertLevel};
pub(crate) use alert::{Heartbeat, HeartbeatKind};
pub(crate) use certificate::{CertificateMsg, CertificateVerify, Finished};
pub(crate) use handshake::{Fragment, Header, Insert, Message, Reassembler};
pub(crate) use hello::{ClientHello, HelloVerifyRequest, ServerHello, MAX_COOKIE_LEN};
pub use record::{parse_datagram, Record};
