//! AES-GCM record protection.

use aes_gcm::aead::generic_array::GenericArray;
use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes128Gcm, Aes256Gcm};

use crate::types::{ContentType, Sequence};
use crate::Error;

/// Explicit nonce carried in front of every protected record.
pub(crate) const DTLS_EXPLICIT_NONCE_LEN: usize = 8;

/// GCM authentication tag length.
pub(crate) const GCM_TAG_LEN: usize = 16;

/// Overhead per protected record (explicit nonce + tag).
pub(crate) const DTLS_AEAD_OVERHEAD: usize = DTLS_EXPLICIT_NONCE_LEN + GCM_TAG_LEN;

enum GcmCipher {
    Aes128(Box<Aes128Gcm>),
    Aes256(Box<Aes256Gcm>),
}

impl GcmCipher {
    fn new(key: &[u8]) -> Result<Self, Error> {
        match key.len() {
            16 => Aes128Gcm::new_from_slice(key)
                .map(|c| GcmCipher::Aes128(Box::new(c)))
                .map_err(|_| Error::Crypto("invalid AES-128 key".into())),
            32 => Aes256Gcm::new_from_slice(key)
                .map(|c| GcmCipher::Aes256(Box::new(c)))
                .map_err(|_| Error::Crypto("invalid AES-256 key".into())),
            n => Err(Error::Crypto(format!("unsupported AES key length {n}"))),
        }
    }

    fn seal(&self, nonce: &Nonce, aad: &Aad, plaintext: &[u8]) -> Result<Vec<u8>, Error> {
        let nonce = GenericArray::from_slice(&nonce.0);
        let payload = Payload {
            msg: plaintext,
            aad: &aad.0,
        };
        match self {
            GcmCipher::Aes128(c) => c.encrypt(nonce, payload),
            GcmCipher::Aes256(c) => c.encrypt(nonce, payload),
        }
        .map_err(|_| Error::Crypto("record encryption failed".into()))
    }

    fn open(&self, nonce: &Nonce, aad: &Aad, ciphertext: &[u8]) -> Result<Vec<u8>, Error> {
        let nonce = GenericArray::from_slice(&nonce.0);
        let payload = Payload {
            msg: ciphertext,
            aad: &aad.0,
        };
        match self {
            GcmCipher::Aes128(c) => c.decrypt(nonce, payload),
            GcmCipher::Aes256(c) => c.decrypt(nonce, payload),
        }
        .map_err(|_| Error::Record("bad record mac".into()))
    }
}

/// Fixed IV portion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Iv([u8; 4]);

/// Full AEAD nonce (fixed IV + explicit nonce).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Nonce([u8; 12]);

impl Nonce {
    fn new(iv: Iv, explicit_nonce: &[u8]) -> Self {
        let mut nonce = [0u8; 12];
        nonce[..4].copy_from_slice(&iv.0);
        nonce[4..].copy_from_slice(explicit_nonce);
        Self(nonce)
    }
}

/// seq_num(8) + type(1) + version(2) + length(2)
#[derive(Debug, Clone, PartialEq, Eq)]
struct Aad([u8; 13]);

impl Aad {
    fn new(content_type: ContentType, sequence: Sequence, length: u16) -> Self {
        let mut aad = [0u8; 13];
        aad[..8].copy_from_slice(&sequence.as_u64().to_be_bytes());
        aad[8] = content_type.as_u8();
        aad[9] = 0xfe;
        aad[10] = 0xfd;
        aad[11..].copy_from_slice(&length.to_be_bytes());
        Aad(aad)
    }
}

/// Cipher and IV for one direction of one epoch.
pub(crate) struct RecordProtection {
    cipher: GcmCipher,
    iv: Iv,
}

impl RecordProtection {
    pub fn new(key: &[u8], iv: &[u8]) -> Result<Self, Error> {
        let iv: [u8; 4] = iv
            .try_into()
            .map_err(|_| Error::Crypto("fixed iv must be 4 bytes".into()))?;
        Ok(RecordProtection {
            cipher: GcmCipher::new(key)?,
            iv: Iv(iv),
        })
    }

    /// Produce the record fragment: explicit nonce followed by ciphertext and tag.
    pub fn encrypt(
        &self,
        content_type: ContentType,
        sequence: Sequence,
        plaintext: &[u8],
    ) -> Result<Vec<u8>, Error> {
        let explicit = sequence.as_u64().to_be_bytes();
        let nonce = Nonce::new(self.iv, &explicit);
        let aad = Aad::new(content_type, sequence, plaintext.len() as u16);
        let sealed = self.cipher.seal(&nonce, &aad, plaintext)?;

        let mut out = Vec::with_capacity(DTLS_EXPLICIT_NONCE_LEN + sealed.len());
        out.extend_from_slice(&explicit);
        out.extend_from_slice(&sealed);
        Ok(out)
    }

    pub fn decrypt(
        &self,
        content_type: ContentType,
        sequence: Sequence,
        fragment: &[u8],
    ) -> Result<Vec<u8>, Error> {
        let Some(plaintext_len) = fragment.len().checked_sub(DTLS_AEAD_OVERHEAD) else {
            return Err(Error::Record("protected record too short".into()));
        };
        let (explicit, ciphertext) = fragment.split_at(DTLS_EXPLICIT_NONCE_LEN);
        let nonce = Nonce::new(self.iv, explicit);
        let aad = Aad::new(content_type, sequence, plaintext_len as u16);
        self.cipher.open(&nonce, &aad, ciphertext)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aad_layout() {
        let aad = Aad::new(ContentType::ApplicationData, Sequence::new(1, 5), 300);
        assert_eq!(aad.0[..8], [0, 1, 0, 0, 0, 0, 0, 5]);
        assert_eq!(aad.0[8], 23);
        assert_eq!(aad.0[9..11], [0xfe, 0xfd]);
        assert_eq!(aad.0[11..], [0x01, 0x2c]);
    }

    #[test]
    fn tampered_record_is_rejected() {
        let p = RecordProtection::new(&[3; 16], &[1, 2, 3, 4]).unwrap();
        let seq = Sequence::new(1, 0);
        let mut fragment = p
            .encrypt(ContentType::ApplicationData, seq, b"hello")
            .unwrap();
        assert_eq!(fragment.len(), 5 + DTLS_AEAD_OVERHEAD);
        assert_eq!(
            p.decrypt(ContentType::ApplicationData, seq, &fragment).unwrap(),
            b"hello"
        );

        // Same bytes claimed under another sequence number.
        assert!(p
            .decrypt(ContentType::ApplicationData, Sequence::new(1, 1), &fragment)
            .is_err());

        let last = fragment.len() - 1;
        fragment[last] ^= 1;
        assert!(matches!(
            p.decrypt(ContentType::ApplicationData, seq, &fragment),
            Err(Error::Record(_))
        ));
    }

    #[test]
    fn short_fragment() {
        let p = RecordProtection::new(&[3; 32], &[0; 4]).unwrap();
        assert!(p
            .decrypt(ContentType::Alert, Sequence::new(1, 0), &[0; 10])
            .is_err());
    }
}
