//! Allow/ban policy on top of the certificate store.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::certificate::{Certificate, RevocationList, MAX_CHAIN_DEPTH};
use crate::store::CertificateStore;
use crate::Error;

mod trust_list;
mod verifier;

pub use trust_list::{TrustList, VerifyFlags};
pub use verifier::{AcceptAll, CertVerifier, TrustStoreVerifier, TrustedIssuersOnly, Verdict};

/// Policy decision for one certificate id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PermissionStatus {
    #[default]
    Undefined,
    Allowed,
    Banned,
}

impl PermissionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PermissionStatus::Undefined => "UNDEFINED",
            PermissionStatus::Allowed => "ALLOWED",
            PermissionStatus::Banned => "BANNED",
        }
    }
}

impl FromStr for PermissionStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ALLOWED" => Ok(PermissionStatus::Allowed),
            "BANNED" => Ok(PermissionStatus::Banned),
            "UNDEFINED" => Ok(PermissionStatus::Undefined),
            _ => Err(Error::Config(format!("unknown permission status: {s}"))),
        }
    }
}

impl fmt::Display for PermissionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-certificate allow/ban decisions and the aggregate trust list built
/// from the allowed ones.
///
/// Decisions about ids the certificate store cannot resolve yet are kept
/// aside and promoted as soon as the store knows the certificate.
pub struct TrustStore {
    certs: Arc<CertificateStore>,
    inner: Mutex<TrustInner>,
}

#[derive(Default)]
struct TrustInner {
    resolved: HashMap<String, (Arc<Certificate>, bool)>,
    unresolved: HashMap<String, bool>,
    allowed: TrustList,
    crls: Vec<Arc<RevocationList>>,
}

impl TrustInner {
    fn apply(&mut self, cert: &Arc<Certificate>, allowed: bool) {
        if allowed {
            self.allowed.add(cert.clone());
        } else {
            self.allowed.remove(cert);
        }
    }

    fn rebuild(&mut self) {
        debug!("Rebuild trust list from {} entries", self.resolved.len());
        self.allowed.clear();
        for crl in &self.crls {
            self.allowed.add_revocation_list(crl.clone());
        }
        for (cert, allowed) in self.resolved.values() {
            if *allowed {
                self.allowed.add(cert.clone());
            }
        }
    }

    fn status(&self, id: &str) -> PermissionStatus {
        let allowed = match self.resolved.get(id) {
            Some((_, allowed)) => *allowed,
            None => match self.unresolved.get(id) {
                Some(allowed) => *allowed,
                None => return PermissionStatus::Undefined,
            },
        };
        if allowed {
            PermissionStatus::Allowed
        } else {
            PermissionStatus::Banned
        }
    }
}

impl TrustStore {
    pub fn new(certs: Arc<CertificateStore>) -> Self {
        TrustStore {
            certs,
            inner: Mutex::new(TrustInner::default()),
        }
    }

    pub fn certificate_store(&self) -> &Arc<CertificateStore> {
        &self.certs
    }

    fn lock(&self) -> MutexGuard<'_, TrustInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Promote unresolved decisions whose certificate the store now knows.
    fn update_known_certs(&self, inner: &mut TrustInner) {
        let ids: Vec<String> = inner.unresolved.keys().cloned().collect();
        for id in ids {
            let Some(cert) = self.certs.get_certificate(&id) else {
                continue;
            };
            if let Some(allowed) = inner.unresolved.remove(&id) {
                debug!("Resolved trust entry {}", id);
                inner.apply(&cert, allowed);
                inner.resolved.insert(id, (cert, allowed));
            }
        }
    }

    /// Set the status of a certificate id that may not be known yet.
    pub fn set_certificate_status(&self, id: &str, status: PermissionStatus) -> bool {
        self.set_status(None, id, status)
    }

    /// Pin `cert` into the certificate store, then set its status.
    pub fn set_certificate_status_for(
        &self,
        cert: &Arc<Certificate>,
        status: PermissionStatus,
        local: bool,
    ) -> bool {
        // Pinning takes the store lock; do it before taking ours.
        self.certs.pin_certificate(cert.clone(), local);
        self.set_status(Some(cert.clone()), cert.id(), status)
    }

    fn set_status(
        &self,
        cert: Option<Arc<Certificate>>,
        id: &str,
        status: PermissionStatus,
    ) -> bool {
        let mut inner = self.lock();
        self.update_known_certs(&mut inner);

        let mut dirty = false;
        match status {
            PermissionStatus::Undefined => {
                inner.unresolved.remove(id);
                dirty = inner.resolved.remove(id).is_some();
            }
            PermissionStatus::Allowed | PermissionStatus::Banned => {
                let allowed = status == PermissionStatus::Allowed;
                if let Some(entry) = inner.resolved.get_mut(id) {
                    if entry.1 != allowed {
                        entry.1 = allowed;
                        if allowed {
                            dirty = true;
                        } else {
                            let cert = entry.0.clone();
                            inner.allowed.remove(&cert);
                        }
                    }
                } else if let Some(cert) = cert.or_else(|| self.certs.get_certificate(id)) {
                    inner.unresolved.remove(id);
                    inner.apply(&cert, allowed);
                    inner.resolved.insert(id.to_string(), (cert, allowed));
                } else {
                    debug!("Trust entry {} is not resolvable yet", id);
                    inner.unresolved.insert(id.to_string(), allowed);
                }
            }
        }

        if dirty {
            inner.rebuild();
        }
        true
    }

    pub fn get_certificate_status(&self, id: &str) -> PermissionStatus {
        self.lock().status(id)
    }

    /// Ids with the given status. Nothing is stored as undefined, so asking
    /// for [`PermissionStatus::Undefined`] returns an empty list.
    pub fn get_certificates_by_status(&self, status: PermissionStatus) -> Vec<String> {
        if status == PermissionStatus::Undefined {
            return Vec::new();
        }
        let wanted = status == PermissionStatus::Allowed;
        let inner = self.lock();
        inner
            .resolved
            .iter()
            .filter(|(_, (_, allowed))| *allowed == wanted)
            .map(|(id, _)| id.clone())
            .chain(
                inner
                    .unresolved
                    .iter()
                    .filter(|(_, allowed)| **allowed == wanted)
                    .map(|(id, _)| id.clone()),
            )
            .collect()
    }

    /// Whether `cert` is acceptable.
    ///
    /// A banned certificate anywhere in the issuer chain rejects it. Otherwise
    /// it is accepted if it or an issuer is allowed, or `allow_public` is set,
    /// and its chain validates against the allowed certificates. A chain whose
    /// only fault is an unknown issuer passes when `allow_public` is set.
    pub fn is_allowed(&self, cert: &Arc<Certificate>, allow_public: bool) -> bool {
        self.certs.resolve_chain(cert);

        let mut inner = self.lock();
        self.update_known_certs(&mut inner);

        let mut allowed = allow_public;
        let mut current = Some(cert.clone());
        let mut depth = 0;
        while let Some(c) = current {
            match inner.status(c.id()) {
                PermissionStatus::Allowed => allowed = true,
                PermissionStatus::Banned => {
                    debug!("Certificate {} is banned", c.id());
                    return false;
                }
                PermissionStatus::Undefined => {}
            }
            depth += 1;
            current = c.issuer().filter(|i| !i.same_key(&c) && depth < MAX_CHAIN_DEPTH);
            if let Some(issuer) = &current {
                if self.is_revoked_by_stored(&c, issuer) {
                    debug!("Certificate {} is revoked by {}", c.id(), issuer.id());
                    return false;
                }
            }
        }

        let flags = inner.allowed.verify(cert);
        let unknown_issuer = VerifyFlags::INVALID | VerifyFlags::SIGNER_NOT_FOUND;
        if !flags.is_valid() && !(allow_public && flags == unknown_issuer) {
            warn!("Certificate {} failed validation: {:?}", cert.id(), flags);
            return false;
        }

        allowed
    }

    /// Revocation of `cert` by the stored copy of `issuer`, when the two are
    /// distinct objects.
    fn is_revoked_by_stored(&self, cert: &Certificate, issuer: &Arc<Certificate>) -> bool {
        match self.certs.get_certificate(issuer.id()) {
            Some(stored) if !Arc::ptr_eq(&stored, issuer) => cert.is_revoked_by(&stored),
            _ => false,
        }
    }

    /// Feed a revocation list to the aggregate trust list.
    pub fn add_revocation_list(&self, crl: Arc<RevocationList>) {
        let mut inner = self.lock();
        inner.crls.push(crl.clone());
        inner.allowed.add_revocation_list(crl);
    }
}

impl fmt::Debug for TrustStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.lock();
        f.debug_struct("TrustStore")
            .field("resolved", &inner.resolved.len())
            .field("unresolved", &inner.unresolved.len())
            .field("allowed", &inner.allowed.len())
            .finish()
    }
}
