use p256::ecdh::EphemeralSecret;
use p256::elliptic_curve::sec1::ToEncodedPoint;
use p256::PublicKey;
use rand::rngs::OsRng;
use zeroize::Zeroizing;

use crate::Error;

/// Ephemeral ECDHE P-256 key pair, used for exactly one handshake.
pub(crate) struct EcdhKeyPair {
    secret: EphemeralSecret,
    public: Vec<u8>,
}

impl EcdhKeyPair {
    pub fn generate() -> Self {
        let secret = EphemeralSecret::random(&mut OsRng);
        let public = PublicKey::from(&secret)
            .to_encoded_point(false)
            .as_bytes()
            .to_vec();
        EcdhKeyPair { secret, public }
    }

    /// Uncompressed SEC1 point.
    pub fn public_key(&self) -> &[u8] {
        &self.public
    }

    pub fn compute_shared_secret(&self, peer: &[u8]) -> Result<Zeroizing<Vec<u8>>, Error> {
        let peer = PublicKey::from_sec1_bytes(peer)
            .map_err(|_| Error::Handshake("invalid peer key share".into()))?;
        let shared = self.secret.diffie_hellman(&peer);
        Ok(Zeroizing::new(shared.raw_secret_bytes().to_vec()))
    }
}

impl std::fmt::Debug for EcdhKeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EcdhKeyPair").finish_non_exhaustive()
    }
}
