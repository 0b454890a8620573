//! Key derivation helpers layered on the provider's HKDF and PRF.

use super::CryptoProvider;
use crate::types::HashAlgorithm;
use crate::Error;

/// HKDF-Expand-Label (RFC 8446 7.1).
pub(crate) fn expand_label(
    provider: &CryptoProvider,
    hash: HashAlgorithm,
    secret: &[u8],
    label: &[u8],
    context: &[u8],
    len: usize,
) -> Result<Vec<u8>, Error> {
    let full_label_len = 6 + label.len();
    if full_label_len > 255 || context.len() > 255 || len > u16::MAX as usize {
        return Err(Error::CryptoError("HKDF label out of range".into()));
    }

    let mut info = Vec::with_capacity(4 + full_label_len + context.len());
    info.extend_from_slice(&(len as u16).to_be_bytes());
    info.push(full_label_len as u8);
    info.extend_from_slice(b"tls13 ");
    info.extend_from_slice(label);
    info.push(context.len() as u8);
    info.extend_from_slice(context);

    provider
        .hkdf_provider
        .hkdf_expand(hash, secret, &info, len)
        .map_err(Error::CryptoError)
}

/// Derive-Secret (RFC 8446 7.1) given an already computed transcript hash.
pub(crate) fn derive_secret(
    provider: &CryptoProvider,
    hash: HashAlgorithm,
    secret: &[u8],
    label: &[u8],
    transcript_hash: &[u8],
) -> Result<Vec<u8>, Error> {
    expand_label(provider, hash, secret, label, transcript_hash, hash.output_len())
}

pub(crate) fn extract(
    provider: &CryptoProvider,
    hash: HashAlgorithm,
    salt: &[u8],
    ikm: &[u8],
) -> Result<Vec<u8>, Error> {
    provider
        .hkdf_provider
        .hkdf_extract(hash, salt, ikm)
        .map_err(Error::CryptoError)
}

/// The TLS 1.2 PRF.
pub(crate) fn prf(
    provider: &CryptoProvider,
    hash: HashAlgorithm,
    secret: &[u8],
    label: &str,
    seed: &[u8],
    len: usize,
) -> Result<Vec<u8>, Error> {
    provider
        .prf_provider
        .prf_tls12(hash, secret, label, seed, len)
        .map_err(Error::CryptoError)
}

pub(crate) fn hmac(
    provider: &CryptoProvider,
    hash: HashAlgorithm,
    key: &[u8],
    data: &[u8],
) -> Result<Vec<u8>, Error> {
    provider
        .hmac_provider
        .hmac(hash, key, data)
        .map_err(Error::CryptoError)
}
