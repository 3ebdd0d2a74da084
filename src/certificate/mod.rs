//! X.509 certificates as seen by the stores and the handshake.
//!
//! A [`Certificate`] keeps its raw DER next to the parsed fields the stores
//! index on. Issuer relations are weak links so a chain never keeps its
//! issuers alive on its own; whoever holds the chain (a
//! [`CertificateChain`], the certificate store, the trust store) does.

use std::fmt;
use std::sync::{Arc, Mutex, RwLock, Weak};
use std::time::SystemTime;

use der::asn1::{Ia5StringRef, ObjectIdentifier, PrintableStringRef, Utf8StringRef};
use der::{Decode, Encode};
use sha2::{Digest, Sha256};
use spki::SubjectPublicKeyInfoOwned;
use x509_cert::ext::pkix::name::GeneralName;
use x509_cert::ext::pkix::{BasicConstraints, SubjectAltName};
use x509_cert::name::Name;

use crate::crypto;
use crate::Error;

mod generate;
mod revocation;

pub use generate::{
    calculate_fingerprint, format_fingerprint, generate_self_signed_certificate,
    CertificateAuthority, CertifiedKey,
};
pub use revocation::{OcspCertStatus, OcspResponse, RevocationList};

const OID_COMMON_NAME: ObjectIdentifier = ObjectIdentifier::new_unwrap("2.5.4.3");
const OID_USER_ID: ObjectIdentifier = ObjectIdentifier::new_unwrap("0.9.2342.19200300.100.1.1");
const OID_BASIC_CONSTRAINTS: ObjectIdentifier = ObjectIdentifier::new_unwrap("2.5.29.19");
const OID_SUBJECT_ALT_NAME: ObjectIdentifier = ObjectIdentifier::new_unwrap("2.5.29.17");

/// Number of digest bytes in a short id.
const SHORT_ID_LEN: usize = 20;

/// Kind of a subject alternative name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NameType {
    Unknown,
    Rfc822,
    Dns,
    Uri,
    Ip,
}

/// One parsed certificate.
pub struct Certificate {
    der: Vec<u8>,
    id: String,
    long_id: String,
    uid: String,
    name: String,
    subject_dn: String,
    issuer_name: String,
    issuer_dn: String,
    issuer_uid: Option<String>,
    alt_names: Vec<(NameType, String)>,
    serial: Vec<u8>,
    not_before: SystemTime,
    not_after: SystemTime,
    is_ca: bool,
    spki: SubjectPublicKeyInfoOwned,
    tbs: Vec<u8>,
    signature_algorithm: ObjectIdentifier,
    signature: Vec<u8>,

    issuer: RwLock<Weak<Certificate>>,
    crls: Mutex<Vec<Arc<RevocationList>>>,
    ocsp: Mutex<Option<Arc<OcspResponse>>>,
}

impl Certificate {
    /// Parse one DER encoded certificate.
    pub fn from_der(der: &[u8]) -> Result<Certificate, Error> {
        let cert = x509_cert::Certificate::from_der(der)?;
        let tbs = &cert.tbs_certificate;

        let spki_der = tbs.subject_public_key_info.to_der()?;
        let digest = Sha256::digest(&spki_der);
        let long_id = hex::encode(digest);
        let id = hex::encode(&digest[..SHORT_ID_LEN]);

        let subject_dn = tbs.subject.to_string();
        let issuer_dn = tbs.issuer.to_string();
        let name = attribute(&tbs.subject, OID_COMMON_NAME).unwrap_or_else(|| subject_dn.clone());
        let issuer_name =
            attribute(&tbs.issuer, OID_COMMON_NAME).unwrap_or_else(|| issuer_dn.clone());
        let uid = attribute(&tbs.subject, OID_USER_ID).unwrap_or_else(|| id.clone());
        let issuer_uid = attribute(&tbs.issuer, OID_USER_ID);

        let mut is_ca = false;
        let mut alt_names = Vec::new();
        for ext in tbs.extensions.iter().flatten() {
            if ext.extn_id == OID_BASIC_CONSTRAINTS {
                is_ca = BasicConstraints::from_der(ext.extn_value.as_bytes())?.ca;
            } else if ext.extn_id == OID_SUBJECT_ALT_NAME {
                let san = SubjectAltName::from_der(ext.extn_value.as_bytes())?;
                alt_names.extend(san.0.iter().filter_map(alt_name));
            }
        }

        let signature = cert
            .signature
            .as_bytes()
            .ok_or_else(|| Error::Certificate("signature has unused bits".into()))?
            .to_vec();

        Ok(Certificate {
            der: der.to_vec(),
            id,
            long_id,
            uid,
            name,
            subject_dn,
            issuer_name,
            issuer_dn,
            issuer_uid,
            alt_names,
            serial: tbs.serial_number.as_bytes().to_vec(),
            not_before: tbs.validity.not_before.to_system_time(),
            not_after: tbs.validity.not_after.to_system_time(),
            is_ca,
            spki: tbs.subject_public_key_info.clone(),
            tbs: tbs.to_der()?,
            signature_algorithm: cert.signature_algorithm.oid,
            signature,
            issuer: RwLock::new(Weak::new()),
            crls: Mutex::new(Vec::new()),
            ocsp: Mutex::new(None),
        })
    }

    /// Parse every certificate of a PEM bundle, in file order.
    pub fn load_pem_chain(pem: &[u8]) -> Result<Vec<Certificate>, Error> {
        let parsed = x509_cert::Certificate::load_pem_chain(pem)?;
        parsed
            .iter()
            .map(|c| Certificate::from_der(&c.to_der()?))
            .collect()
    }

    pub fn as_der(&self) -> &[u8] {
        &self.der
    }

    /// Short id: first 20 bytes of the SHA-256 of the public key info, hex.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Long id: SHA-256 of the public key info, hex.
    pub fn long_id(&self) -> &str {
        &self.long_id
    }

    /// Subject `UID` attribute, or the short id when absent.
    pub fn uid(&self) -> &str {
        &self.uid
    }

    /// Subject common name, or the full subject when absent.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn subject(&self) -> &str {
        &self.subject_dn
    }

    /// Issuer common name, or the full issuer when absent.
    pub fn issuer_name(&self) -> &str {
        &self.issuer_name
    }

    pub fn issuer_dn(&self) -> &str {
        &self.issuer_dn
    }

    pub fn issuer_uid(&self) -> Option<&str> {
        self.issuer_uid.as_deref()
    }

    pub fn alt_names(&self) -> &[(NameType, String)] {
        &self.alt_names
    }

    pub fn serial(&self) -> &[u8] {
        &self.serial
    }

    pub fn serial_hex(&self) -> String {
        hex::encode(&self.serial)
    }

    pub fn is_ca(&self) -> bool {
        self.is_ca
    }

    pub fn is_self_issued(&self) -> bool {
        self.subject_dn == self.issuer_dn
    }

    pub fn not_before(&self) -> SystemTime {
        self.not_before
    }

    pub fn not_after(&self) -> SystemTime {
        self.not_after
    }

    pub fn public_key_info(&self) -> &SubjectPublicKeyInfoOwned {
        &self.spki
    }

    /// Whether both certificates carry the same key, i.e. the same ids.
    pub fn same_key(&self, other: &Certificate) -> bool {
        self.long_id == other.long_id
    }

    /// Check that `issuer`'s key signed this certificate.
    pub fn verify_signed_by(&self, issuer: &Certificate) -> Result<(), Error> {
        let hash = crypto::hash_for_signature_oid(&self.signature_algorithm).ok_or_else(|| {
            Error::Certificate(format!(
                "unsupported signature algorithm: {}",
                self.signature_algorithm
            ))
        })?;
        crypto::verify_signature(&issuer.spki, hash, &self.tbs, &self.signature)
    }

    /// Whether `issuer` names itself as this certificate's issuer.
    pub fn names_issuer(&self, issuer: &Certificate) -> bool {
        match &self.issuer_uid {
            Some(uid) => uid == issuer.uid(),
            None => self.issuer_dn == issuer.subject_dn,
        }
    }

    /// Linked issuer, if set and still alive.
    pub fn issuer(&self) -> Option<Arc<Certificate>> {
        self.issuer.read().ok()?.upgrade()
    }

    pub fn set_issuer(&self, issuer: &Arc<Certificate>) {
        if let Ok(mut link) = self.issuer.write() {
            *link = Arc::downgrade(issuer);
        }
    }

    /// Whether the chain stops here: self issued, or the issuer is linked.
    pub fn is_chain_complete(&self) -> bool {
        self.is_self_issued() || self.issuer().is_some()
    }

    /// Attach a revocation list issued by this certificate.
    ///
    /// Lists accumulate; a list with the same number replaces the old one.
    pub fn add_revocation_list(&self, crl: Arc<RevocationList>) {
        let Ok(mut crls) = self.crls.lock() else {
            return;
        };
        crls.retain(|c| c.number() != crl.number());
        crls.push(crl);
    }

    pub fn revocation_lists(&self) -> Vec<Arc<RevocationList>> {
        self.crls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    /// Cache an OCSP response about this certificate.
    ///
    /// Ignored unless the response covers this certificate's serial.
    pub fn set_ocsp_response(&self, response: Arc<OcspResponse>) -> bool {
        if response.status(&self.serial).is_none() {
            return false;
        }
        match self.ocsp.lock() {
            Ok(mut slot) => {
                *slot = Some(response);
                true
            }
            Err(_) => false,
        }
    }

    pub fn ocsp_response(&self) -> Option<Arc<OcspResponse>> {
        self.ocsp.lock().ok()?.clone()
    }

    /// Whether this certificate appears revoked, by its issuer's lists or by
    /// its cached OCSP response.
    pub fn is_revoked_by(&self, issuer: &Certificate) -> bool {
        let listed = issuer
            .revocation_lists()
            .iter()
            .any(|crl| crl.is_revoked(&self.serial));
        let ocsp = self
            .ocsp_response()
            .and_then(|r| r.status(&self.serial))
            .map(|s| s == OcspCertStatus::Revoked)
            .unwrap_or(false);
        listed || ocsp
    }
}

impl PartialEq for Certificate {
    fn eq(&self, other: &Self) -> bool {
        self.der == other.der
    }
}

impl Eq for Certificate {}

impl fmt::Debug for Certificate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Certificate")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("issuer", &self.issuer_name)
            .field("is_ca", &self.is_ca)
            .finish()
    }
}

fn attribute(name: &Name, oid: ObjectIdentifier) -> Option<String> {
    name.0
        .iter()
        .flat_map(|rdn| rdn.0.iter())
        .find(|atv| atv.oid == oid)
        .and_then(|atv| {
            if let Ok(s) = Utf8StringRef::try_from(&atv.value) {
                Some(s.to_string())
            } else if let Ok(s) = PrintableStringRef::try_from(&atv.value) {
                Some(s.to_string())
            } else if let Ok(s) = Ia5StringRef::try_from(&atv.value) {
                Some(s.to_string())
            } else {
                None
            }
        })
}

fn alt_name(name: &GeneralName) -> Option<(NameType, String)> {
    match name {
        GeneralName::Rfc822Name(s) => Some((NameType::Rfc822, s.to_string())),
        GeneralName::DnsName(s) => Some((NameType::Dns, s.to_string())),
        GeneralName::UniformResourceIdentifier(s) => Some((NameType::Uri, s.to_string())),
        GeneralName::IpAddress(octets) => {
            let bytes = octets.as_bytes();
            let ip = match bytes.len() {
                4 => <[u8; 4]>::try_from(bytes).ok().map(std::net::IpAddr::from),
                16 => <[u8; 16]>::try_from(bytes).ok().map(std::net::IpAddr::from),
                _ => None,
            }?;
            Some((NameType::Ip, ip.to_string()))
        }
        _ => None,
    }
}

/// An ordered certificate chain, leaf first.
///
/// Holds every member, so the issuer links set between consecutive members
/// stay valid for the chain's lifetime.
#[derive(Debug, Clone)]
pub struct CertificateChain(Vec<Arc<Certificate>>);

impl CertificateChain {
    /// Parse a DER list, leaf first, and link consecutive members.
    pub fn from_der_list<T: AsRef<[u8]>>(ders: &[T]) -> Result<CertificateChain, Error> {
        let certs = ders
            .iter()
            .map(|d| Certificate::from_der(d.as_ref()).map(Arc::new))
            .collect::<Result<Vec<_>, _>>()?;
        CertificateChain::from_certificates(certs)
    }

    pub fn from_certificates(certs: Vec<Arc<Certificate>>) -> Result<CertificateChain, Error> {
        if certs.is_empty() {
            return Err(Error::Certificate("empty certificate chain".into()));
        }
        for pair in certs.windows(2) {
            pair[0].set_issuer(&pair[1]);
        }
        Ok(CertificateChain(certs))
    }

    /// Collect `leaf` and the issuers reachable through its links.
    pub fn from_leaf(leaf: &Arc<Certificate>) -> CertificateChain {
        let mut certs = vec![leaf.clone()];
        let mut current = leaf.clone();
        while let Some(issuer) = current.issuer() {
            if issuer.same_key(&current) || certs.len() > MAX_CHAIN_DEPTH {
                break;
            }
            certs.push(issuer.clone());
            current = issuer;
        }
        CertificateChain(certs)
    }

    pub fn leaf(&self) -> &Arc<Certificate> {
        &self.0[0]
    }

    pub fn certificates(&self) -> &[Arc<Certificate>] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<Certificate>> {
        self.0.iter()
    }

    pub fn to_der_list(&self) -> Vec<Vec<u8>> {
        self.0.iter().map(|c| c.as_der().to_vec()).collect()
    }
}

/// Longest issuer walk before a chain is considered looping.
pub(crate) const MAX_CHAIN_DEPTH: usize = 16;
