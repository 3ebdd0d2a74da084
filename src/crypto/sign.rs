//! ECDSA identity keys and signature verification.

use std::str;

use der::asn1::ObjectIdentifier;
use pkcs8::DecodePrivateKey;
use sha2::Digest;
use signature::hazmat::{PrehashSigner, PrehashVerifier};
use spki::SubjectPublicKeyInfoOwned;

use crate::types::{HashAlgorithm, SignatureScheme};
use crate::Error;

const OID_EC_PUBLIC_KEY: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.10045.2.1");
const OID_P256: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.10045.3.1.7");
const OID_P384: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.3.132.0.34");
const OID_ECDSA_SHA256: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.10045.4.3.2");
const OID_ECDSA_SHA384: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.10045.4.3.3");

/// Local identity signing key.
pub(crate) enum SigningKey {
    P256(p256::ecdsa::SigningKey),
    P384(p384::ecdsa::SigningKey),
}

impl std::fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SigningKey::P256(_) => f.debug_tuple("SigningKey::P256").finish(),
            SigningKey::P384(_) => f.debug_tuple("SigningKey::P384").finish(),
        }
    }
}

impl SigningKey {
    /// Load a private key in PKCS#8 DER, SEC1 DER, or either as PEM.
    pub fn load(key: &[u8]) -> Result<Self, Error> {
        if let Ok(key) = p256::ecdsa::SigningKey::from_pkcs8_der(key) {
            return Ok(SigningKey::P256(key));
        }
        if let Ok(key) = p384::ecdsa::SigningKey::from_pkcs8_der(key) {
            return Ok(SigningKey::P384(key));
        }

        // SEC1 DER (OpenSSL EC private key format).
        if let Ok(secret) = p256::SecretKey::from_sec1_der(key) {
            return Ok(SigningKey::P256(secret.into()));
        }
        if let Ok(secret) = p384::SecretKey::from_sec1_der(key) {
            return Ok(SigningKey::P384(secret.into()));
        }

        if let Ok(pem_str) = str::from_utf8(key) {
            if pem_str.contains("-----BEGIN") {
                if let Ok((_label, doc)) = pkcs8::Document::from_pem(pem_str) {
                    return Self::load(doc.as_bytes());
                }
            }
        }

        Err(Error::Certificate(
            "failed to parse private key in any supported format".into(),
        ))
    }

    pub fn scheme(&self) -> SignatureScheme {
        match self {
            SigningKey::P256(_) => SignatureScheme::ECDSA_SECP256R1_SHA256,
            SigningKey::P384(_) => SignatureScheme::ECDSA_SECP384R1_SHA384,
        }
    }

    /// X.509 signature algorithm of what [`SigningKey::sign`] produces.
    pub fn signature_algorithm(&self) -> ObjectIdentifier {
        match self {
            SigningKey::P256(_) => OID_ECDSA_SHA256,
            SigningKey::P384(_) => OID_ECDSA_SHA384,
        }
    }

    /// Uncompressed SEC1 public point.
    pub fn public_key(&self) -> Vec<u8> {
        match self {
            SigningKey::P256(key) => key
                .verifying_key()
                .to_encoded_point(false)
                .as_bytes()
                .to_vec(),
            SigningKey::P384(key) => key
                .verifying_key()
                .to_encoded_point(false)
                .as_bytes()
                .to_vec(),
        }
    }

    /// Sign `data`, returning a DER encoded signature.
    pub fn sign(&self, data: &[u8]) -> Result<Vec<u8>, Error> {
        match self {
            SigningKey::P256(key) => {
                let hash = sha2::Sha256::digest(data);
                let signature: p256::ecdsa::Signature = key
                    .sign_prehash(&hash)
                    .map_err(|_| Error::Crypto("signing failed".into()))?;
                Ok(signature.to_der().as_bytes().to_vec())
            }
            SigningKey::P384(key) => {
                let hash = sha2::Sha384::digest(data);
                let signature: p384::ecdsa::Signature = key
                    .sign_prehash(&hash)
                    .map_err(|_| Error::Crypto("signing failed".into()))?;
                Ok(signature.to_der().as_bytes().to_vec())
            }
        }
    }
}

/// Hash of an X.509 ECDSA signature algorithm.
pub(crate) fn hash_for_signature_oid(oid: &ObjectIdentifier) -> Option<HashAlgorithm> {
    if *oid == OID_ECDSA_SHA256 {
        Some(HashAlgorithm::SHA256)
    } else if *oid == OID_ECDSA_SHA384 {
        Some(HashAlgorithm::SHA384)
    } else {
        None
    }
}

/// Public point of an EC subject public key info.
pub(crate) fn public_key_bytes(spki: &SubjectPublicKeyInfoOwned) -> Result<&[u8], Error> {
    if spki.algorithm.oid != OID_EC_PUBLIC_KEY {
        return Err(Error::Certificate(format!(
            "unsupported public key algorithm: {}",
            spki.algorithm.oid
        )));
    }
    spki.subject_public_key
        .as_bytes()
        .ok_or_else(|| Error::Certificate("invalid EC subject_public_key bitstring".into()))
}

/// Verify an ECDSA signature by the key in `spki` over `data`, hashed with `hash`.
pub(crate) fn verify_signature(
    spki: &SubjectPublicKeyInfoOwned,
    hash: HashAlgorithm,
    data: &[u8],
    signature: &[u8],
) -> Result<(), Error> {
    let pubkey = public_key_bytes(spki)?;

    let curve: ObjectIdentifier = spki
        .algorithm
        .parameters
        .as_ref()
        .ok_or_else(|| Error::Certificate("missing EC curve parameter".into()))?
        .decode_as()
        .map_err(|_| Error::Certificate("invalid EC curve parameter".into()))?;

    let digest = crate::crypto::digest(hash, data);
    let failed = || Error::Crypto(format!("ECDSA signature verification failed for {hash:?}"));

    if curve == OID_P256 {
        let key = p256::ecdsa::VerifyingKey::from_sec1_bytes(pubkey)
            .map_err(|_| Error::Certificate("invalid P-256 public key".into()))?;
        let sig = p256::ecdsa::Signature::from_der(signature)
            .map_err(|_| Error::Crypto("invalid signature encoding".into()))?;
        key.verify_prehash(&digest, &sig).map_err(|_| failed())
    } else if curve == OID_P384 {
        let key = p384::ecdsa::VerifyingKey::from_sec1_bytes(pubkey)
            .map_err(|_| Error::Certificate("invalid P-384 public key".into()))?;
        let sig = p384::ecdsa::Signature::from_der(signature)
            .map_err(|_| Error::Crypto("invalid signature encoding".into()))?;
        key.verify_prehash(&digest, &sig).map_err(|_| failed())
    } else {
        Err(Error::Certificate(format!("unsupported EC curve: {curve}")))
    }
}
