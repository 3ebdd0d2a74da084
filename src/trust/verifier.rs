use std::sync::Arc;

use super::{TrustStore, VerifyFlags};
use crate::certificate::CertificateChain;

/// Decision of a [`CertVerifier`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Accept,
    Reject(String),
}

/// Decides whether a peer's certificate chain is acceptable.
///
/// Called once per handshake with the chain the peer presented, leaf first,
/// and the flags from validating it against the session's trusted issuers.
/// A [`Verdict::Reject`] fails the handshake.
pub trait CertVerifier: Send + Sync {
    fn verify(&self, chain: &CertificateChain, flags: VerifyFlags) -> Verdict;
}

impl<F> CertVerifier for F
where
    F: Fn(&CertificateChain, VerifyFlags) -> Verdict + Send + Sync,
{
    fn verify(&self, chain: &CertificateChain, flags: VerifyFlags) -> Verdict {
        self(chain, flags)
    }
}

/// Accepts every chain. For tests and for callers that verify later.
#[derive(Debug, Clone, Copy, Default)]
pub struct AcceptAll;

impl CertVerifier for AcceptAll {
    fn verify(&self, _chain: &CertificateChain, _flags: VerifyFlags) -> Verdict {
        Verdict::Accept
    }
}

/// Accepts chains that validate against the session's trusted issuers.
#[derive(Debug, Clone, Copy, Default)]
pub struct TrustedIssuersOnly;

impl CertVerifier for TrustedIssuersOnly {
    fn verify(&self, chain: &CertificateChain, flags: VerifyFlags) -> Verdict {
        if flags.is_valid() {
            Verdict::Accept
        } else {
            Verdict::Reject(format!("{} failed validation: {:?}", chain.leaf().id(), flags))
        }
    }
}

/// Accepts chains the trust store allows.
#[derive(Debug, Clone)]
pub struct TrustStoreVerifier {
    trust: Arc<TrustStore>,
    allow_public: bool,
}

impl TrustStoreVerifier {
    pub fn new(trust: Arc<TrustStore>, allow_public: bool) -> Self {
        TrustStoreVerifier {
            trust,
            allow_public,
        }
    }
}

impl CertVerifier for TrustStoreVerifier {
    fn verify(&self, chain: &CertificateChain, _flags: VerifyFlags) -> Verdict {
        let leaf = chain.leaf();
        if self.trust.is_allowed(leaf, self.allow_public) {
            Verdict::Accept
        } else {
            Verdict::Reject(format!("{} is not allowed", leaf.id()))
        }
    }
}
