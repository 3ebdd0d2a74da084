use std::collections::HashSet;
use std::fmt;
use std::time::{Duration, SystemTime};

use der::asn1::ObjectIdentifier;
use der::{Decode, Encode};
use sha2::{Digest, Sha256};
use x509_cert::certificate::Rfc5280;
use x509_cert::crl::CertificateList;
use x509_cert::serial_number::SerialNumber;
use x509_ocsp::{BasicOcspResponse, CertStatus, OcspResponseStatus};

use super::Certificate;
use crate::crypto;
use crate::Error;

pub(super) const OID_CRL_NUMBER: ObjectIdentifier = ObjectIdentifier::new_unwrap("2.5.29.20");

fn verify_signed(
    issuer: &Certificate,
    algorithm: &ObjectIdentifier,
    tbs: &[u8],
    signature: &[u8],
) -> Result<(), Error> {
    let hash = crypto::hash_for_signature_oid(algorithm)
        .ok_or_else(|| Error::Certificate(format!("unsupported signature algorithm: {algorithm}")))?;
    crypto::verify_signature(issuer.public_key_info(), hash, tbs, signature)
}

/// A certificate revocation list.
pub struct RevocationList {
    der: Vec<u8>,
    issuer_dn: String,
    number: Option<Vec<u8>>,
    revoked: HashSet<Vec<u8>>,
    this_update: SystemTime,
    next_update: Option<SystemTime>,
    tbs: Vec<u8>,
    signature_algorithm: ObjectIdentifier,
    signature: Vec<u8>,
}

impl RevocationList {
    pub fn from_der(der: &[u8]) -> Result<RevocationList, Error> {
        let crl = CertificateList::from_der(der)?;
        let tbs = &crl.tbs_cert_list;

        let number = tbs
            .crl_extensions
            .iter()
            .flatten()
            .find(|ext| ext.extn_id == OID_CRL_NUMBER)
            .map(|ext| SerialNumber::<Rfc5280>::from_der(ext.extn_value.as_bytes()))
            .transpose()?
            .map(|n| n.as_bytes().to_vec());

        let revoked = tbs
            .revoked_certificates
            .iter()
            .flatten()
            .map(|r| r.serial_number.as_bytes().to_vec())
            .collect();

        let signature = crl
            .signature
            .as_bytes()
            .ok_or_else(|| Error::Certificate("CRL signature has unused bits".into()))?
            .to_vec();

        Ok(RevocationList {
            der: der.to_vec(),
            issuer_dn: tbs.issuer.to_string(),
            number,
            revoked,
            this_update: tbs.this_update.to_system_time(),
            next_update: tbs.next_update.as_ref().map(|t| t.to_system_time()),
            tbs: tbs.to_der()?,
            signature_algorithm: crl.signature_algorithm.oid,
            signature,
        })
    }

    pub fn as_der(&self) -> &[u8] {
        &self.der
    }

    pub fn issuer_dn(&self) -> &str {
        &self.issuer_dn
    }

    /// CRL number extension, if present.
    pub fn number(&self) -> Option<&[u8]> {
        self.number.as_deref()
    }

    /// File name in the store: the hex CRL number, or a digest prefix of
    /// the list when it carries no number.
    pub fn file_name(&self) -> String {
        match &self.number {
            Some(n) => hex::encode(n),
            None => hex::encode(&Sha256::digest(&self.der)[..8]),
        }
    }

    pub fn is_revoked(&self, serial: &[u8]) -> bool {
        self.revoked.contains(serial)
    }

    pub fn revoked_count(&self) -> usize {
        self.revoked.len()
    }

    pub fn this_update(&self) -> SystemTime {
        self.this_update
    }

    pub fn next_update(&self) -> Option<SystemTime> {
        self.next_update
    }

    /// Whether `issuer` is named as the issuer of this list.
    pub fn is_issued_by(&self, issuer: &Certificate) -> bool {
        self.issuer_dn == issuer.subject()
    }

    pub fn verify_signed_by(&self, issuer: &Certificate) -> Result<(), Error> {
        verify_signed(issuer, &self.signature_algorithm, &self.tbs, &self.signature)
    }
}

impl fmt::Debug for RevocationList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RevocationList")
            .field("issuer", &self.issuer_dn)
            .field("number", &self.number.as_ref().map(hex::encode))
            .field("revoked", &self.revoked.len())
            .finish()
    }
}

/// Status of one certificate in an OCSP response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OcspCertStatus {
    Good,
    Revoked,
    Unknown,
}

/// A successful RFC 6960 OCSP response.
pub struct OcspResponse {
    der: Vec<u8>,
    statuses: Vec<(Vec<u8>, OcspCertStatus)>,
    produced_at: SystemTime,
    tbs: Vec<u8>,
    signature_algorithm: ObjectIdentifier,
    signature: Vec<u8>,
}

impl OcspResponse {
    pub fn from_der(der: &[u8]) -> Result<OcspResponse, Error> {
        let response = x509_ocsp::OcspResponse::from_der(der)?;
        if response.response_status != OcspResponseStatus::Successful {
            return Err(Error::Certificate(format!(
                "OCSP response status: {:?}",
                response.response_status
            )));
        }
        let bytes = response
            .response_bytes
            .as_ref()
            .ok_or_else(|| Error::Certificate("no response bytes in OCSP response".into()))?;
        let basic = BasicOcspResponse::from_der(bytes.response.as_bytes())?;
        let data = &basic.tbs_response_data;

        let statuses = data
            .responses
            .iter()
            .map(|single| {
                let status = match &single.cert_status {
                    CertStatus::Good(_) => OcspCertStatus::Good,
                    CertStatus::Revoked(_) => OcspCertStatus::Revoked,
                    CertStatus::Unknown(_) => OcspCertStatus::Unknown,
                };
                (single.cert_id.serial_number.as_bytes().to_vec(), status)
            })
            .collect();

        let produced_at = SystemTime::UNIX_EPOCH
            + Duration::from_secs(data.produced_at.0.to_unix_duration().as_secs());

        let signature = basic
            .signature
            .as_bytes()
            .ok_or_else(|| Error::Certificate("OCSP signature has unused bits".into()))?
            .to_vec();

        Ok(OcspResponse {
            der: der.to_vec(),
            statuses,
            produced_at,
            tbs: data.to_der()?,
            signature_algorithm: basic.signature_algorithm.oid,
            signature,
        })
    }

    #[cfg(test)]
    pub(crate) fn from_statuses(statuses: Vec<(Vec<u8>, OcspCertStatus)>) -> OcspResponse {
        OcspResponse {
            der: Vec::new(),
            statuses,
            produced_at: SystemTime::now(),
            tbs: Vec::new(),
            signature_algorithm: ObjectIdentifier::new_unwrap("1.2.840.10045.4.3.2"),
            signature: Vec::new(),
        }
    }

    pub fn as_der(&self) -> &[u8] {
        &self.der
    }

    /// Status of the certificate with `serial`, if this response covers it.
    pub fn status(&self, serial: &[u8]) -> Option<OcspCertStatus> {
        self.statuses
            .iter()
            .find(|(s, _)| s == serial)
            .map(|(_, status)| *status)
    }

    pub fn produced_at(&self) -> SystemTime {
        self.produced_at
    }

    pub fn verify_signed_by(&self, issuer: &Certificate) -> Result<(), Error> {
        verify_signed(issuer, &self.signature_algorithm, &self.tbs, &self.signature)
    }
}

impl fmt::Debug for OcspResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OcspResponse")
            .field("statuses", &self.statuses.len())
            .field("produced_at", &self.produced_at)
            .finish()
    }
}
