use hmac::digest::KeyInit;
use hmac::{Hmac, Mac};
use sha2::{Sha256, Sha384};
use tinyvec::ArrayVec;
use zeroize::Zeroizing;

use crate::types::{CipherSuite, HashAlgorithm};
use crate::Error;

type PrfOutput = ArrayVec<[u8; 128]>;

/// PRF for TLS 1.2 as specified in RFC 5246 Section 5.
///
/// PRF(secret, label, seed) = P_<hash>(secret, label + seed)
pub fn prf_tls12(
    secret: &[u8],
    label: &str,
    seed: &[u8],
    output_len: usize,
    hash: HashAlgorithm,
) -> Result<PrfOutput, Error> {
    if output_len > 128 || label.len() + seed.len() > 128 {
        return Err(Error::Crypto("prf input or output too long".into()));
    }
    let mut full_seed: PrfOutput = ArrayVec::default();
    full_seed.extend_from_slice(label.as_bytes());
    full_seed.extend_from_slice(seed);

    match hash {
        HashAlgorithm::SHA256 => p_hash::<Hmac<Sha256>>(secret, &full_seed, output_len),
        HashAlgorithm::SHA384 => p_hash::<Hmac<Sha384>>(secret, &full_seed, output_len),
    }
}

fn p_hash<M: Mac + KeyInit + Clone>(
    secret: &[u8],
    full_seed: &[u8],
    output_len: usize,
) -> Result<PrfOutput, Error> {
    let key = <M as KeyInit>::new_from_slice(secret)
        .map_err(|_| Error::Crypto("invalid prf secret".into()))?;
    let mut result: PrfOutput = ArrayVec::default();

    // A(1) = HMAC_hash(secret, A(0)) where A(0) = seed
    let mut mac = key.clone();
    mac.update(full_seed);
    let mut a = mac.finalize().into_bytes();

    while result.len() < output_len {
        // HMAC_hash(secret, A(i) + seed)
        let mut mac = key.clone();
        mac.update(&a);
        mac.update(full_seed);
        let output = mac.finalize().into_bytes();

        let to_copy = (output_len - result.len()).min(output.len());
        result.extend_from_slice(&output[..to_copy]);

        // A(i+1) = HMAC_hash(secret, A(i))
        let mut mac = key.clone();
        mac.update(&a);
        a = mac.finalize().into_bytes();
    }

    Ok(result)
}

/// master_secret = PRF(pre_master_secret, "extended master secret", session_hash, 48)
pub fn calculate_extended_master_secret(
    pre_master_secret: &[u8],
    session_hash: &[u8],
    hash: HashAlgorithm,
) -> Result<Zeroizing<Vec<u8>>, Error> {
    let out = prf_tls12(
        pre_master_secret,
        "extended master secret",
        session_hash,
        48,
        hash,
    )?;
    Ok(Zeroizing::new(out.to_vec()))
}

/// Write keys and fixed IVs for both directions.
pub struct KeyBlock {
    pub client_write_key: Zeroizing<Vec<u8>>,
    pub server_write_key: Zeroizing<Vec<u8>>,
    pub client_write_iv: [u8; 4],
    pub server_write_iv: [u8; 4],
}

/// Key expansion as specified in RFC 5246 Section 6.3.
pub fn key_expansion(
    master_secret: &[u8],
    client_random: &[u8],
    server_random: &[u8],
    suite: CipherSuite,
) -> Result<KeyBlock, Error> {
    let key_len = suite.key_len();
    let mut seed = Vec::with_capacity(64);
    seed.extend_from_slice(server_random);
    seed.extend_from_slice(client_random);

    let block = prf_tls12(
        master_secret,
        "key expansion",
        &seed,
        2 * key_len + 2 * 4,
        suite.hash_algorithm(),
    )?;

    let (client_key, rest) = block.split_at(key_len);
    let (server_key, rest) = rest.split_at(key_len);
    let (client_iv, server_iv) = rest.split_at(4);

    let mut out = KeyBlock {
        client_write_key: Zeroizing::new(client_key.to_vec()),
        server_write_key: Zeroizing::new(server_key.to_vec()),
        client_write_iv: [0; 4],
        server_write_iv: [0; 4],
    };
    out.client_write_iv.copy_from_slice(client_iv);
    out.server_write_iv.copy_from_slice(&server_iv[..4]);
    Ok(out)
}

/// Finished verify_data: PRF(master, label, transcript_hash)[..12]
pub fn verify_data(
    master_secret: &[u8],
    label: &str,
    transcript_hash: &[u8],
    hash: HashAlgorithm,
) -> Result<Vec<u8>, Error> {
    let out = prf_tls12(master_secret, label, transcript_hash, 12, hash)?;
    Ok(out.to_vec())
}
