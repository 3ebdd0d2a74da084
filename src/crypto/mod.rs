//! Cryptographic primitives built on the RustCrypto crates.

mod aead;
mod kx;
mod prf;
mod sign;

pub(crate) use aead::{RecordProtection, DTLS_AEAD_OVERHEAD};
pub(crate) use kx::EcdhKeyPair;
pub(crate) use prf::{calculate_extended_master_secret, key_expansion, verify_data};
pub(crate) use sign::{
    hash_for_signature_oid, public_key_bytes, verify_signature, SigningKey,
};

use sha2::{Digest, Sha256, Sha384};

use crate::types::HashAlgorithm;

pub(crate) fn digest(hash: HashAlgorithm, data: &[u8]) -> Vec<u8> {
    match hash {
        HashAlgorithm::SHA256 => Sha256::digest(data).to_vec(),
        HashAlgorithm::SHA384 => Sha384::digest(data).to_vec(),
    }
}

/// Running handshake transcript.
///
/// Kept as raw bytes since the hash is not known until the server hello
/// picks a suite.
#[derive(Default)]
pub(crate) struct Transcript(Vec<u8>);

impl Transcript {
    pub fn push(&mut self, message: &[u8]) {
        self.0.extend_from_slice(message);
    }

    pub fn clear(&mut self) {
        self.0.clear();
    }

    pub fn hash(&self, hash: HashAlgorithm) -> Vec<u8> {
        digest(hash, &self.0)
    }
}

impl std::fmt::Debug for Transcript {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Transcript").field(&self.0.len()).finish()
    }
}
