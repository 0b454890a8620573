//! RustCrypto provider.
//!
//! Pure Rust backend built on crates from the
//! [RustCrypto](https://github.com/RustCrypto) organization, plus
//! `x25519-dalek`.
//!
//! # Cipher suites
//!
//! - `TLS_ECDHE_ECDSA_WITH_AES_128_GCM_SHA256` (0xC02B)
//! - `TLS_ECDHE_ECDSA_WITH_AES_256_GCM_SHA384` (0xC02C)
//! - `TLS_AES_128_GCM_SHA256` (0x1301)
//! - `TLS_AES_256_GCM_SHA384` (0x1302)
//!
//! # Key exchange groups
//!
//! - `x25519`
//! - `secp256r1`
//!
//! # Signatures
//!
//! ECDSA with P-256 and SHA-256. Private keys load from PKCS#8 DER or PEM.
//!
//! ```
//! use tlswire::Config;
//! use tlswire::crypto::rust_crypto;
//!
//! let config = Config::builder()
//!     .with_crypto_provider(rust_crypto::default_provider())
//!     .build()
//!     .unwrap();
//! # let _ = config;
//! ```

use rand::rngs::OsRng;
use rand::RngCore;

mod cipher_suite;
mod hash;
mod hkdf;
mod hmac;
mod kx_group;
mod sign;

use crate::crypto::provider::{CryptoProvider, SecureRandom};

/// The default RustCrypto-based provider.
pub fn default_provider() -> CryptoProvider {
    CryptoProvider {
        cipher_suites: cipher_suite::ALL_CIPHER_SUITES,
        kx_groups: kx_group::ALL_KX_GROUPS,
        signature_verification: &sign::SIGNATURE_VERIFIER,
        key_provider: &sign::KEY_PROVIDER,
        secure_random: &SECURE_RANDOM,
        hash_provider: &hash::HASH_PROVIDER,
        prf_provider: &hmac::PRF_PROVIDER,
        hmac_provider: &hmac::HMAC_PROVIDER,
        hkdf_provider: &hkdf::HKDF_PROVIDER,
    }
}

#[derive(Debug)]
struct OsSecureRandom;

impl SecureRandom for OsSecureRandom {
    fn fill(&self, buf: &mut [u8]) -> Result<(), String> {
        OsRng
            .try_fill_bytes(buf)
            .map_err(|e| format!("OS random failed: {e}"))
    }
}

static SECURE_RANDOM: OsSecureRandom = OsSecureRandom;
