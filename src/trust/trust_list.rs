use std::fmt;
use std::ops::{BitOr, BitOrAssign};
use std::sync::Arc;
use std::time::SystemTime;

use crate::certificate::{Certificate, RevocationList, MAX_CHAIN_DEPTH};

/// Outcome of validating a chain, as a set of flags.
///
/// Empty means the chain is valid. Any failure also sets
/// [`VerifyFlags::INVALID`].
#[derive(Clone, Copy, PartialEq, Eq, Default, Hash)]
pub struct VerifyFlags(u32);

impl VerifyFlags {
    pub const NONE: VerifyFlags = VerifyFlags(0);
    pub const INVALID: VerifyFlags = VerifyFlags(1 << 0);
    /// No issuer could be found before reaching a trusted certificate.
    pub const SIGNER_NOT_FOUND: VerifyFlags = VerifyFlags(1 << 1);
    pub const SIGNER_NOT_CA: VerifyFlags = VerifyFlags(1 << 2);
    pub const SIGNATURE_FAILURE: VerifyFlags = VerifyFlags(1 << 3);
    pub const REVOKED: VerifyFlags = VerifyFlags(1 << 4);
    pub const EXPIRED: VerifyFlags = VerifyFlags(1 << 5);
    pub const NOT_ACTIVATED: VerifyFlags = VerifyFlags(1 << 6);

    const NAMES: [(VerifyFlags, &'static str); 7] = [
        (Self::INVALID, "INVALID"),
        (Self::SIGNER_NOT_FOUND, "SIGNER_NOT_FOUND"),
        (Self::SIGNER_NOT_CA, "SIGNER_NOT_CA"),
        (Self::SIGNATURE_FAILURE, "SIGNATURE_FAILURE"),
        (Self::REVOKED, "REVOKED"),
        (Self::EXPIRED, "EXPIRED"),
        (Self::NOT_ACTIVATED, "NOT_ACTIVATED"),
    ];

    pub fn bits(&self) -> u32 {
        self.0
    }

    pub fn is_valid(&self) -> bool {
        self.0 == 0
    }

    pub fn contains(&self, other: VerifyFlags) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for VerifyFlags {
    type Output = VerifyFlags;

    fn bitor(self, rhs: Self) -> Self::Output {
        VerifyFlags(self.0 | rhs.0)
    }
}

impl BitOrAssign for VerifyFlags {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl fmt::Debug for VerifyFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_valid() {
            return write!(f, "VerifyFlags(VALID)");
        }
        let names: Vec<_> = Self::NAMES
            .iter()
            .filter(|(flag, _)| self.contains(*flag))
            .map(|(_, name)| *name)
            .collect();
        write!(f, "VerifyFlags({})", names.join("|"))
    }
}

/// Aggregate set of trusted certificates and revocation lists.
///
/// Additions are incremental. Removing an anchor is only exact for that
/// anchor, so callers that need to re-admit something previously removed
/// rebuild the list from scratch.
#[derive(Debug, Default, Clone)]
pub struct TrustList {
    anchors: Vec<Arc<Certificate>>,
    crls: Vec<Arc<RevocationList>>,
}

impl TrustList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, cert: Arc<Certificate>) {
        if !self.contains(&cert) {
            self.anchors.push(cert);
        }
    }

    pub fn remove(&mut self, cert: &Certificate) -> bool {
        let before = self.anchors.len();
        self.anchors.retain(|a| !a.same_key(cert));
        before != self.anchors.len()
    }

    pub fn add_revocation_list(&mut self, crl: Arc<RevocationList>) {
        self.crls.push(crl);
    }

    pub fn clear(&mut self) {
        self.anchors.clear();
        self.crls.clear();
    }

    pub fn contains(&self, cert: &Certificate) -> bool {
        self.anchors.iter().any(|a| a.same_key(cert))
    }

    pub fn certificates(&self) -> &[Arc<Certificate>] {
        &self.anchors
    }

    pub fn len(&self) -> usize {
        self.anchors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.anchors.is_empty()
    }

    /// Validate `cert` by walking its issuers until a trusted certificate.
    pub fn verify(&self, cert: &Arc<Certificate>) -> VerifyFlags {
        self.verify_at(cert, SystemTime::now())
    }

    pub fn verify_at(&self, cert: &Arc<Certificate>, now: SystemTime) -> VerifyFlags {
        let mut flags = VerifyFlags::NONE;
        let mut current = cert.clone();

        for _ in 0..MAX_CHAIN_DEPTH {
            if now < current.not_before() {
                flags |= VerifyFlags::INVALID | VerifyFlags::NOT_ACTIVATED;
            }
            if now > current.not_after() {
                flags |= VerifyFlags::INVALID | VerifyFlags::EXPIRED;
            }

            if self.contains(&current) {
                return flags;
            }

            let Some(issuer) = self.issuer_of(&current) else {
                return flags | VerifyFlags::INVALID | VerifyFlags::SIGNER_NOT_FOUND;
            };
            if issuer.same_key(&current) {
                // Self-signed and not trusted.
                return flags | VerifyFlags::INVALID | VerifyFlags::SIGNER_NOT_FOUND;
            }

            if let Err(e) = current.verify_signed_by(&issuer) {
                debug!("Signature of {} by {}: {}", current.id(), issuer.id(), e);
                return flags | VerifyFlags::INVALID | VerifyFlags::SIGNATURE_FAILURE;
            }
            if !issuer.is_ca() {
                flags |= VerifyFlags::INVALID | VerifyFlags::SIGNER_NOT_CA;
            }
            if self.is_revoked(&current, &issuer) {
                flags |= VerifyFlags::INVALID | VerifyFlags::REVOKED;
            }

            current = issuer;
        }

        flags | VerifyFlags::INVALID | VerifyFlags::SIGNER_NOT_FOUND
    }

    fn issuer_of(&self, cert: &Arc<Certificate>) -> Option<Arc<Certificate>> {
        if let Some(issuer) = cert.issuer() {
            return Some(issuer);
        }
        if cert.is_self_issued() {
            return Some(cert.clone());
        }
        self.anchors
            .iter()
            .find(|a| cert.names_issuer(a) && cert.verify_signed_by(a).is_ok())
            .cloned()
    }

    /// Revocation by `issuer`, by a trusted copy of it, or by a list fed
    /// to this trust list. A peer presents its own copy of the issuer, which
    /// carries none of the lists attached to the trusted one.
    fn is_revoked(&self, cert: &Certificate, issuer: &Certificate) -> bool {
        cert.is_revoked_by(issuer)
            || self
                .anchors
                .iter()
                .filter(|a| a.same_key(issuer))
                .any(|a| cert.is_revoked_by(a))
            || self
                .crls
                .iter()
                .any(|crl| crl.is_issued_by(issuer) && crl.is_revoked(cert.serial()))
    }
}
