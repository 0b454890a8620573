//! HMAC and the TLS 1.2 PRF.

use hmac::{Hmac, Mac};
use sha2::{Sha256, Sha384};

use crate::crypto::provider::{HmacProvider, PrfProvider};
use crate::types::HashAlgorithm;

fn hmac_once(hash: HashAlgorithm, key: &[u8], parts: &[&[u8]]) -> Result<Vec<u8>, String> {
    match hash {
        HashAlgorithm::SHA256 => {
            let mut mac = <Hmac<Sha256> as Mac>::new_from_slice(key)
                .map_err(|_| "Invalid HMAC key".to_string())?;
            for p in parts {
                mac.update(p);
            }
            Ok(mac.finalize().into_bytes().to_vec())
        }
        HashAlgorithm::SHA384 => {
            let mut mac = <Hmac<Sha384> as Mac>::new_from_slice(key)
                .map_err(|_| "Invalid HMAC key".to_string())?;
            for p in parts {
                mac.update(p);
            }
            Ok(mac.finalize().into_bytes().to_vec())
        }
        _ => Err(format!("Unsupported hash for HMAC: {:?}", hash)),
    }
}

/// P_hash from RFC 5246 section 5.
pub(super) fn p_hash(
    hash: HashAlgorithm,
    secret: &[u8],
    seed: &[u8],
    output_len: usize,
) -> Result<Vec<u8>, String> {
    let mut out = Vec::with_capacity(output_len);

    // A(1) = HMAC(secret, seed)
    let mut a = hmac_once(hash, secret, &[seed])?;

    while out.len() < output_len {
        let block = hmac_once(hash, secret, &[&a, seed])?;
        let take = (output_len - out.len()).min(block.len());
        out.extend_from_slice(&block[..take]);
        a = hmac_once(hash, secret, &[&a])?;
    }

    Ok(out)
}

#[derive(Debug)]
pub(super) struct RustCryptoPrfProvider;

impl PrfProvider for RustCryptoPrfProvider {
    fn prf_tls12(
        &self,
        hash: HashAlgorithm,
        secret: &[u8],
        label: &str,
        seed: &[u8],
        output_len: usize,
    ) -> Result<Vec<u8>, String> {
        if !label.is_ascii() {
            return Err("PRF label must be ASCII".into());
        }
        let mut full_seed = Vec::with_capacity(label.len() + seed.len());
        full_seed.extend_from_slice(label.as_bytes());
        full_seed.extend_from_slice(seed);
        p_hash(hash, secret, &full_seed, output_len)
    }
}

#[derive(Debug)]
pub(super) struct RustCryptoHmacProvider;

impl HmacProvider for RustCryptoHmacProvider {
    fn hmac(&self, hash: HashAlgorithm, key: &[u8], data: &[u8]) -> Result<Vec<u8>, String> {
        hmac_once(hash, key, &[data])
    }
}

pub(super) static PRF_PROVIDER: RustCryptoPrfProvider = RustCryptoPrfProvider;
pub(super) static HMAC_PROVIDER: RustCryptoHmacProvider = RustCryptoHmacProvider;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn p_hash_length_and_prefix() {
        let long = p_hash(HashAlgorithm::SHA256, b"secret", b"seed", 100).unwrap();
        let short = p_hash(HashAlgorithm::SHA256, b"secret", b"seed", 40).unwrap();
        assert_eq!(long.len(), 100);
        assert_eq!(&long[..40], &short[..]);
    }

    #[test]
    fn prf_label_matters() {
        let a = PRF_PROVIDER
            .prf_tls12(HashAlgorithm::SHA256, b"k", "client finished", b"h", 12)
            .unwrap();
        let b = PRF_PROVIDER
            .prf_tls12(HashAlgorithm::SHA256, b"k", "server finished", b"h", 12)
            .unwrap();
        assert_ne!(a, b);
    }
}
