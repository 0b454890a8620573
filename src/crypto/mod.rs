//! Cryptographic capabilities used by the engine.

pub(crate) mod kdf;
pub mod provider;
pub mod rust_crypto;
mod verify;

pub use provider::{
    ActiveKeyExchange, Cipher, CryptoProvider, CryptoSafe, HashContext, HashProvider,
};
pub use provider::{HkdfProvider, HmacProvider, KeyProvider, PrfProvider};
pub use provider::{SecureRandom, SignatureVerifier, SigningKey};
pub use provider::{SupportedCipherSuite, SupportedKxGroup};
pub use verify::{fingerprint, AcceptAnyCertificate, CertVerifier};
pub use verify::{FingerprintVerifier, VerifyStatus};

pub use crate::types::{CipherSuite, HashAlgorithm, NamedGroup, SignatureScheme};
