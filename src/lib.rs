//! Secure datagram sessions between peers, with the certificate and trust
//! stores that decide which peers are acceptable.
//!
//! * [`Session`] runs a DTLS 1.2 shaped handshake with a stateless cookie
//!   exchange, then protects application records, on its own worker thread.
//!   The datagram path is supplied through the [`Transport`] trait.
//! * [`CertificateStore`] pins certificates, revocation lists and OCSP
//!   responses under a directory and links chains between them.
//! * [`TrustStore`] keeps allow/ban decisions on top of the store and
//!   answers [`TrustStore::is_allowed`] for a peer's certificate.
//!
//! ```no_run
//! use std::sync::Arc;
//! # use peertls::*;
//! # fn run(transport: Arc<dyn Transport>, trust: Arc<TrustStore>) -> Result<(), Error> {
//! struct Peer(Arc<TrustStore>);
//!
//! impl Callbacks for Peer {
//!     fn on_data(&self, _seq: u64, data: &[u8]) {
//!         println!("got {} bytes", data.len());
//!     }
//!
//!     fn verifier(&self) -> Arc<dyn CertVerifier> {
//!         Arc::new(TrustStoreVerifier::new(self.0.clone(), false))
//!     }
//! }
//!
//! let key = generate_self_signed_certificate("alice")?;
//! let session = Session::new(
//!     Role::Initiator,
//!     Arc::new(Config::default()),
//!     Credentials::from_certified_key(&key),
//!     transport,
//!     Arc::new(Peer(trust)),
//! )?;
//! session.send(b"hello")?;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(clippy::all)]
// #![deny(missing_docs)]

#[macro_use]
extern crate log;

mod client;
mod config;
mod cookie;
mod crypto;
mod engine;
mod error;
mod reorder;
mod rng;
mod server;
mod timer;
mod util;
mod window;

pub(crate) mod message;
pub(crate) mod types;

pub mod certificate;
pub mod session;
pub mod store;
pub mod trust;

pub use config::{Config, ConfigBuilder, MIN_MTU};
pub use error::Error;

pub use certificate::{
    generate_self_signed_certificate, Certificate, CertificateAuthority, CertificateChain,
    CertifiedKey, NameType, OcspCertStatus, OcspResponse, RevocationList,
};
pub use message::AlertDescription;
pub use session::{
    Callbacks, Credentials, InboundHandle, IoStats, Role, Session, SessionInfo, State, Transport,
};
pub use store::{CertificateStore, StoreEvent};
pub use trust::{
    AcceptAll, CertVerifier, PermissionStatus, TrustList, TrustStore, TrustStoreVerifier,
    TrustedIssuersOnly, Verdict, VerifyFlags,
};
pub use types::{CipherSuite, ProtocolVersion};
