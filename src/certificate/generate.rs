//! Certificate generation for bootstrapping identities and for tests.

use std::fmt;
use std::time::{Duration, SystemTime};

use der::asn1::{BitString, ObjectIdentifier, OctetString, UtcTime};
use der::{Decode, Encode};
use rcgen::{
    BasicConstraints, Certificate as RcgenCertificate, CertificateParams, DistinguishedName,
    DnType, IsCa, KeyPair, PKCS_ECDSA_P256_SHA256,
};
use sha2::{Digest, Sha256};
use spki::AlgorithmIdentifierOwned;
use time::OffsetDateTime;
use x509_cert::certificate::Rfc5280;
use x509_cert::crl::{CertificateList, RevokedCert, TbsCertList};
use x509_cert::ext::Extension;
use x509_cert::serial_number::SerialNumber;
use x509_cert::time::Time;
use x509_ocsp::{
    BasicOcspResponse, CertId, CertStatus, OcspGeneralizedTime, ResponderId, ResponseData,
    RevokedInfo, SingleResponse,
};

use super::revocation::OID_CRL_NUMBER;
use super::OcspCertStatus;
use crate::crypto::SigningKey;
use crate::Error;

const OID_SHA256: ObjectIdentifier = ObjectIdentifier::new_unwrap("2.16.840.1.101.3.4.2.1");

/// Validity of an issued revocation list or OCSP response.
const CRL_LIFETIME: Duration = Duration::from_secs(7 * 24 * 3600);

/// Subject `UID` attribute (0.9.2342.19200300.100.1.1).
const DN_USER_ID: &[u64] = &[0, 9, 2342, 19200300, 100, 1, 1];

/// A certificate with its private key.
#[derive(Clone)]
pub struct CertifiedKey {
    /// Leaf certificate in DER format
    pub certificate: Vec<u8>,
    /// Issuers of the leaf, nearest first, DER
    pub issuers: Vec<Vec<u8>>,
    /// Private key in PKCS#8 DER format
    pub private_key: Vec<u8>,
}

impl CertifiedKey {
    /// Leaf followed by its issuers.
    pub fn chain(&self) -> Vec<Vec<u8>> {
        let mut chain = vec![self.certificate.clone()];
        chain.extend(self.issuers.iter().cloned());
        chain
    }

    /// SHA-256 of the leaf certificate.
    pub fn fingerprint(&self) -> Vec<u8> {
        calculate_fingerprint(&self.certificate)
    }

    /// The fingerprint formatted as colon separated hex, "AF:12:F6:...".
    pub fn fingerprint_str(&self) -> String {
        format_fingerprint(&self.fingerprint())
    }
}

impl fmt::Debug for CertifiedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CertifiedKey")
            .field("certificate", &self.certificate.len())
            .field("issuers", &self.issuers.len())
            .field("private_key", &self.private_key.len())
            .finish()
    }
}

fn params(common_name: &str, uid: Option<&str>, is_ca: bool) -> Result<CertificateParams, Error> {
    let key_pair = KeyPair::generate(&PKCS_ECDSA_P256_SHA256).map_err(generation_failed)?;

    let mut params = CertificateParams::new(vec![common_name.to_string()]);

    let mut distinguished_name = DistinguishedName::new();
    distinguished_name.push(DnType::CommonName, common_name.to_string());
    if let Some(uid) = uid {
        distinguished_name.push(DnType::CustomDnType(DN_USER_ID.to_vec()), uid.to_string());
    }
    params.distinguished_name = distinguished_name;

    params.is_ca = if is_ca {
        IsCa::Ca(BasicConstraints::Unconstrained)
    } else {
        IsCa::NoCa
    };
    params.key_pair = Some(key_pair);

    let not_before = OffsetDateTime::now_utc();
    params.not_before = not_before;
    params.not_after = not_before + time::Duration::days(365);

    Ok(params)
}

fn generation_failed(e: rcgen::RcgenError) -> Error {
    Error::Certificate(format!("certificate generation failed: {e}"))
}

/// Generate a self-signed identity certificate, valid for one year.
pub fn generate_self_signed_certificate(common_name: &str) -> Result<CertifiedKey, Error> {
    let cert = RcgenCertificate::from_params(params(common_name, None, true)?)
        .map_err(generation_failed)?;

    Ok(CertifiedKey {
        certificate: cert.serialize_der().map_err(generation_failed)?,
        issuers: Vec::new(),
        private_key: cert.serialize_private_key_der(),
    })
}

/// A CA able to issue identities and intermediate CAs.
pub struct CertificateAuthority {
    cert: RcgenCertificate,
    der: Vec<u8>,
    /// Issuers above this CA, nearest first.
    issuers: Vec<Vec<u8>>,
}

impl CertificateAuthority {
    /// Self-signed root.
    pub fn generate(common_name: &str) -> Result<Self, Error> {
        Self::root(params(common_name, None, true)?)
    }

    /// Self-signed root carrying a subject `UID` attribute.
    pub fn generate_with_uid(common_name: &str, uid: &str) -> Result<Self, Error> {
        Self::root(params(common_name, Some(uid), true)?)
    }

    fn root(params: CertificateParams) -> Result<Self, Error> {
        let cert = RcgenCertificate::from_params(params).map_err(generation_failed)?;
        let der = cert.serialize_der().map_err(generation_failed)?;
        Ok(CertificateAuthority {
            cert,
            der,
            issuers: Vec::new(),
        })
    }

    pub fn certificate_der(&self) -> Vec<u8> {
        self.der.clone()
    }

    pub fn private_key_der(&self) -> Vec<u8> {
        self.cert.serialize_private_key_der()
    }

    /// This CA's certificate followed by its issuers.
    pub fn chain(&self) -> Vec<Vec<u8>> {
        let mut chain = vec![self.der.clone()];
        chain.extend(self.issuers.iter().cloned());
        chain
    }

    /// Issue an intermediate CA.
    pub fn issue_authority(&self, common_name: &str) -> Result<CertificateAuthority, Error> {
        let cert = RcgenCertificate::from_params(params(common_name, None, true)?)
            .map_err(generation_failed)?;
        let der = cert
            .serialize_der_with_signer(&self.cert)
            .map_err(generation_failed)?;
        Ok(CertificateAuthority {
            cert,
            der,
            issuers: self.chain(),
        })
    }

    /// Issue an end-entity identity valid for one year.
    pub fn issue_identity(&self, common_name: &str) -> Result<CertifiedKey, Error> {
        self.issue(params(common_name, None, false)?)
    }

    /// Issue an end-entity identity with an explicit validity window.
    pub fn issue_identity_with_validity(
        &self,
        common_name: &str,
        not_before: OffsetDateTime,
        not_after: OffsetDateTime,
    ) -> Result<CertifiedKey, Error> {
        let mut params = params(common_name, None, false)?;
        params.not_before = not_before;
        params.not_after = not_after;
        self.issue(params)
    }

    /// Sign a v2 CRL revoking the certificates with the given serials.
    ///
    /// The list is valid from now for one week and carries `number` as its
    /// CRL number.
    pub fn issue_revocation_list(&self, revoked: &[&[u8]], number: u64) -> Result<Vec<u8>, Error> {
        let issuer = x509_cert::Certificate::from_der(&self.der)?.tbs_certificate.subject;
        let key = SigningKey::load(&self.private_key_der())?;
        let algorithm = AlgorithmIdentifierOwned {
            oid: key.signature_algorithm(),
            parameters: None,
        };

        let now = SystemTime::now();
        let this_update = Time::UtcTime(UtcTime::from_system_time(now)?);
        let next_update = Time::UtcTime(UtcTime::from_system_time(now + CRL_LIFETIME)?);

        let revoked_certificates = revoked
            .iter()
            .map(|serial| {
                Ok(RevokedCert {
                    serial_number: SerialNumber::new(serial)?,
                    revocation_date: this_update,
                    crl_entry_extensions: None,
                })
            })
            .collect::<Result<Vec<_>, der::Error>>()?;

        let crl_number = Extension {
            extn_id: OID_CRL_NUMBER,
            critical: false,
            extn_value: OctetString::new(SerialNumber::<Rfc5280>::from(number).to_der()?)?,
        };

        let tbs_cert_list = TbsCertList {
            version: x509_cert::Version::V2,
            signature: algorithm.clone(),
            issuer,
            this_update,
            next_update: Some(next_update),
            revoked_certificates: (!revoked_certificates.is_empty()).then_some(revoked_certificates),
            crl_extensions: Some(vec![crl_number]),
        };
        let signature = key.sign(&tbs_cert_list.to_der()?)?;

        let crl = CertificateList {
            tbs_cert_list,
            signature_algorithm: algorithm,
            signature: BitString::from_bytes(&signature)?,
        };
        Ok(crl.to_der()?)
    }

    /// Sign a successful OCSP response stating `status` for the certificate
    /// with `serial`, with this CA as responder.
    pub fn issue_ocsp_response(&self, serial: &[u8], status: OcspCertStatus) -> Result<Vec<u8>, Error> {
        let tbs = x509_cert::Certificate::from_der(&self.der)?.tbs_certificate;
        let key = SigningKey::load(&self.private_key_der())?;

        let now = SystemTime::now();
        let produced_at: OcspGeneralizedTime = UtcTime::from_system_time(now)?.into();
        let next_update: OcspGeneralizedTime =
            UtcTime::from_system_time(now + CRL_LIFETIME)?.into();

        let cert_id = CertId {
            hash_algorithm: AlgorithmIdentifierOwned {
                oid: OID_SHA256,
                parameters: None,
            },
            issuer_name_hash: OctetString::new(Sha256::digest(tbs.subject.to_der()?).to_vec())?,
            issuer_key_hash: OctetString::new(
                Sha256::digest(tbs.subject_public_key_info.subject_public_key.raw_bytes()).to_vec(),
            )?,
            serial_number: SerialNumber::new(serial)?,
        };
        let cert_status = match status {
            OcspCertStatus::Good => CertStatus::good(),
            OcspCertStatus::Revoked => CertStatus::revoked(RevokedInfo {
                revocation_time: produced_at,
                revocation_reason: None,
            }),
            OcspCertStatus::Unknown => CertStatus::unknown(),
        };

        let tbs_response_data = ResponseData {
            version: x509_ocsp::Version::V1,
            responder_id: ResponderId::ByName(tbs.subject),
            produced_at,
            responses: vec![SingleResponse {
                cert_id,
                cert_status,
                this_update: produced_at,
                next_update: Some(next_update),
                single_extensions: None,
            }],
            response_extensions: None,
        };
        let signature = key.sign(&tbs_response_data.to_der()?)?;

        let basic = BasicOcspResponse {
            tbs_response_data,
            signature_algorithm: AlgorithmIdentifierOwned {
                oid: key.signature_algorithm(),
                parameters: None,
            },
            signature: BitString::from_bytes(&signature)?,
            certs: None,
        };
        Ok(x509_ocsp::OcspResponse::successful(basic)?.to_der()?)
    }

    fn issue(&self, params: CertificateParams) -> Result<CertifiedKey, Error> {
        let cert = RcgenCertificate::from_params(params).map_err(generation_failed)?;
        Ok(CertifiedKey {
            certificate: cert
                .serialize_der_with_signer(&self.cert)
                .map_err(generation_failed)?,
            issuers: self.chain(),
            private_key: cert.serialize_private_key_der(),
        })
    }
}

impl fmt::Debug for CertificateAuthority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CertificateAuthority")
            .field("certificate", &self.der.len())
            .field("issuers", &self.issuers.len())
            .finish()
    }
}

/// SHA-256 over a DER certificate.
pub fn calculate_fingerprint(cert_der: &[u8]) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(cert_der);
    hasher.finalize().to_vec()
}

/// Format a fingerprint as a colon-separated hex string
/// Example: "AF:12:F6:..."
pub fn format_fingerprint(fingerprint: &[u8]) -> String {
    fingerprint
        .iter()
        .map(|byte| format!("{:02X}", byte))
        .collect::<Vec<String>>()
        .join(":")
}
