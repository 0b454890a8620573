//! Cryptographic provider traits for pluggable crypto backends.
//!
//! The engine never calls a primitive directly. Everything goes through a
//! [`CryptoProvider`], a struct of `&'static dyn` capabilities, selected by
//! the negotiated algorithm identifier:
//!
//! - **Cipher suites** ([`SupportedCipherSuite`]): AEAD factory plus key sizes
//! - **Key exchange groups** ([`SupportedKxGroup`]): ephemeral ECDHE
//! - **Signature verification** ([`SignatureVerifier`]): verify with a cert's SPKI
//! - **Key provider** ([`KeyProvider`]): load private keys into [`SigningKey`]s
//! - **Secure random** ([`SecureRandom`])
//! - **Hash** ([`HashProvider`]): transcript hashing
//! - **PRF** ([`PrfProvider`]): the TLS 1.2 PRF
//! - **HMAC / HKDF** ([`HmacProvider`], [`HkdfProvider`])
//!
//! # Thread Safety
//!
//! All provider traits require `Send + Sync + UnwindSafe + RefUnwindSafe` so
//! a provider can be shared between sessions driven from different threads.

use std::fmt::Debug;
use std::panic::{RefUnwindSafe, UnwindSafe};
use std::sync::OnceLock;

use crate::types::{CipherSuite, HashAlgorithm, NamedGroup, SignatureScheme};

/// Marker trait for types that are safe to use in crypto provider components.
pub trait CryptoSafe: Send + Sync + Debug + UnwindSafe + RefUnwindSafe {}

impl<T: Send + Sync + Debug + UnwindSafe + RefUnwindSafe> CryptoSafe for T {}

// ============================================================================
// Instance traits (created by factories)
// ============================================================================

/// AEAD cipher operating in place.
pub trait Cipher: CryptoSafe {
    /// Encrypt `data` in place, appending the authentication tag.
    fn encrypt(&mut self, data: &mut Vec<u8>, aad: &[u8], nonce: &[u8; 12]) -> Result<(), String>;

    /// Decrypt `data` in place, verifying and removing the tag.
    fn decrypt(&mut self, data: &mut Vec<u8>, aad: &[u8], nonce: &[u8; 12]) -> Result<(), String>;

    /// Length of the authentication tag.
    fn tag_len(&self) -> usize {
        16
    }
}

/// Running hash.
pub trait HashContext: CryptoSafe {
    fn update(&mut self, data: &[u8]);

    /// Digest of everything so far, leaving the context usable.
    fn clone_and_finalize(&self) -> Vec<u8>;
}

/// A private key able to produce signatures.
///
/// This is the only view the engine has of a private key, so keys living in
/// tokens or OS key stores plug in by implementing it.
pub trait SigningKey: CryptoSafe {
    /// Sign `data`, hashing it with the scheme's hash first.
    fn sign(&self, data: &[u8]) -> Result<Vec<u8>, String>;

    /// The scheme produced by [`SigningKey::sign`].
    fn scheme(&self) -> SignatureScheme;
}

/// An ephemeral key exchange in progress.
pub trait ActiveKeyExchange: CryptoSafe {
    /// Our public key in wire encoding.
    fn pub_key(&self) -> &[u8];

    /// Complete the exchange with the peer's public key, returning the shared secret.
    fn complete(self: Box<Self>, peer_pub: &[u8]) -> Result<Vec<u8>, String>;

    fn group(&self) -> NamedGroup;
}

// ============================================================================
// Factory traits (static instances in the provider)
// ============================================================================

/// A cipher suite the provider can run.
pub trait SupportedCipherSuite: CryptoSafe {
    fn suite(&self) -> CipherSuite;

    fn hash_algorithm(&self) -> HashAlgorithm;

    /// AEAD key length.
    fn key_len(&self) -> usize;

    /// Length of the IV derived from the key schedule. 4 bytes of implicit
    /// salt for the 1.2 family, the full 12 byte IV for 1.3.
    fn fixed_iv_len(&self) -> usize;

    fn create_cipher(&self, key: &[u8]) -> Result<Box<dyn Cipher>, String>;
}

/// A key exchange group the provider can run.
pub trait SupportedKxGroup: CryptoSafe {
    fn name(&self) -> NamedGroup;

    fn start_exchange(&self) -> Result<Box<dyn ActiveKeyExchange>, String>;
}

/// Signature verification against a certificate's public key.
pub trait SignatureVerifier: CryptoSafe {
    fn verify_signature(
        &self,
        cert_der: &[u8],
        data: &[u8],
        signature: &[u8],
        scheme: SignatureScheme,
    ) -> Result<(), String>;
}

/// Private key parser.
pub trait KeyProvider: CryptoSafe {
    /// Parse a PKCS#8 DER or PEM private key.
    fn load_private_key(&self, key: &[u8]) -> Result<Box<dyn SigningKey>, String>;
}

/// Secure random number generator.
pub trait SecureRandom: CryptoSafe {
    fn fill(&self, buf: &mut [u8]) -> Result<(), String>;
}

/// Factory for hash contexts.
pub trait HashProvider: CryptoSafe {
    fn create_hash(&self, algorithm: HashAlgorithm) -> Box<dyn HashContext>;
}

/// TLS 1.2 PRF (RFC 5246 5).
pub trait PrfProvider: CryptoSafe {
    fn prf_tls12(
        &self,
        hash: HashAlgorithm,
        secret: &[u8],
        label: &str,
        seed: &[u8],
        output_len: usize,
    ) -> Result<Vec<u8>, String>;
}

/// HMAC.
pub trait HmacProvider: CryptoSafe {
    fn hmac(&self, hash: HashAlgorithm, key: &[u8], data: &[u8]) -> Result<Vec<u8>, String>;
}

/// HKDF extract and expand (RFC 5869).
pub trait HkdfProvider: CryptoSafe {
    fn hkdf_extract(&self, hash: HashAlgorithm, salt: &[u8], ikm: &[u8]) -> Result<Vec<u8>, String>;

    fn hkdf_expand(
        &self,
        hash: HashAlgorithm,
        prk: &[u8],
        info: &[u8],
        output_len: usize,
    ) -> Result<Vec<u8>, String>;
}

// ============================================================================
// Provider
// ============================================================================

/// The set of capabilities a session uses for all cryptography.
#[derive(Debug, Clone)]
pub struct CryptoProvider {
    /// Supported cipher suites in preference order, both families.
    pub cipher_suites: &'static [&'static dyn SupportedCipherSuite],

    /// Supported key exchange groups in preference order.
    pub kx_groups: &'static [&'static dyn SupportedKxGroup],

    /// Signature verification for peer certificates.
    pub signature_verification: &'static dyn SignatureVerifier,

    /// Key provider for parsing private keys.
    pub key_provider: &'static dyn KeyProvider,

    pub secure_random: &'static dyn SecureRandom,

    /// Hash provider for the transcript.
    pub hash_provider: &'static dyn HashProvider,

    /// The 1.2 family key derivation.
    pub prf_provider: &'static dyn PrfProvider,

    pub hmac_provider: &'static dyn HmacProvider,

    /// The 1.3 family key derivation.
    pub hkdf_provider: &'static dyn HkdfProvider,
}

static DEFAULT: OnceLock<CryptoProvider> = OnceLock::new();

impl CryptoProvider {
    /// Install a process wide default provider.
    ///
    /// Returns the provider back if a default was already installed.
    pub fn install_default(provider: CryptoProvider) -> Result<(), CryptoProvider> {
        DEFAULT.set(provider)
    }

    /// The installed default, if any.
    pub fn get_default() -> Option<&'static CryptoProvider> {
        DEFAULT.get()
    }

    pub(crate) fn find_suite(&self, suite: CipherSuite) -> Option<&'static dyn SupportedCipherSuite> {
        self.cipher_suites.iter().copied().find(|s| s.suite() == suite)
    }

    pub(crate) fn find_group(&self, group: NamedGroup) -> Option<&'static dyn SupportedKxGroup> {
        self.kx_groups.iter().copied().find(|g| g.name() == group)
    }

    pub(crate) fn random_bytes<const N: usize>(&self) -> Result<[u8; N], String> {
        let mut out = [0u8; N];
        self.secure_random.fill(&mut out)?;
        Ok(out)
    }

    pub(crate) fn hash(&self, alg: HashAlgorithm, data: &[u8]) -> Vec<u8> {
        let mut ctx = self.hash_provider.create_hash(alg);
        ctx.update(data);
        ctx.clone_and_finalize()
    }
}
