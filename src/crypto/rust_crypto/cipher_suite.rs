//! AES-GCM cipher suites for both handshake families.

use aes_gcm::aead::{AeadInPlace, KeyInit};
use aes_gcm::{Aes128Gcm, Aes256Gcm, Nonce};

use crate::crypto::provider::{Cipher, SupportedCipherSuite};
use crate::types::{CipherSuite, HashAlgorithm};

enum AesGcm {
    Aes128(Box<Aes128Gcm>),
    Aes256(Box<Aes256Gcm>),
}

impl std::fmt::Debug for AesGcm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AesGcm::Aes128(_) => f.debug_tuple("AesGcm::Aes128").finish(),
            AesGcm::Aes256(_) => f.debug_tuple("AesGcm::Aes256").finish(),
        }
    }
}

impl AesGcm {
    fn new(key: &[u8]) -> Result<Self, String> {
        match key.len() {
            16 => Aes128Gcm::new_from_slice(key)
                .map(|c| AesGcm::Aes128(Box::new(c)))
                .map_err(|_| "Invalid AES-128 key".to_string()),
            32 => Aes256Gcm::new_from_slice(key)
                .map(|c| AesGcm::Aes256(Box::new(c)))
                .map_err(|_| "Invalid AES-256 key".to_string()),
            n => Err(format!("Invalid key size for AES-GCM: {}", n)),
        }
    }
}

impl Cipher for AesGcm {
    fn encrypt(&mut self, data: &mut Vec<u8>, aad: &[u8], nonce: &[u8; 12]) -> Result<(), String> {
        let nonce = Nonce::from_slice(nonce);
        match self {
            AesGcm::Aes128(c) => c.encrypt_in_place(nonce, aad, data),
            AesGcm::Aes256(c) => c.encrypt_in_place(nonce, aad, data),
        }
        .map_err(|_| "AES-GCM encryption failed".to_string())
    }

    fn decrypt(&mut self, data: &mut Vec<u8>, aad: &[u8], nonce: &[u8; 12]) -> Result<(), String> {
        if data.len() < 16 {
            return Err(format!("Ciphertext too short: {}", data.len()));
        }
        let nonce = Nonce::from_slice(nonce);
        match self {
            AesGcm::Aes128(c) => c.decrypt_in_place(nonce, aad, data),
            AesGcm::Aes256(c) => c.decrypt_in_place(nonce, aad, data),
        }
        .map_err(|_| "AES-GCM decryption failed".to_string())
    }
}

/// One AES-GCM suite: (suite, hash, key length, fixed iv length).
#[derive(Debug)]
struct GcmSuite(CipherSuite, HashAlgorithm, usize, usize);

impl SupportedCipherSuite for GcmSuite {
    fn suite(&self) -> CipherSuite {
        self.0
    }

    fn hash_algorithm(&self) -> HashAlgorithm {
        self.1
    }

    fn key_len(&self) -> usize {
        self.2
    }

    fn fixed_iv_len(&self) -> usize {
        self.3
    }

    fn create_cipher(&self, key: &[u8]) -> Result<Box<dyn Cipher>, String> {
        if key.len() != self.2 {
            return Err(format!("Key length {} for {:?}", key.len(), self.0));
        }
        Ok(Box::new(AesGcm::new(key)?))
    }
}

static TLS13_AES_128_GCM_SHA256: GcmSuite = GcmSuite(
    CipherSuite::TLS13_AES_128_GCM_SHA256,
    HashAlgorithm::SHA256,
    16,
    12,
);
static TLS13_AES_256_GCM_SHA384: GcmSuite = GcmSuite(
    CipherSuite::TLS13_AES_256_GCM_SHA384,
    HashAlgorithm::SHA384,
    32,
    12,
);
static ECDHE_ECDSA_AES128_GCM_SHA256: GcmSuite = GcmSuite(
    CipherSuite::ECDHE_ECDSA_AES128_GCM_SHA256,
    HashAlgorithm::SHA256,
    16,
    4,
);
static ECDHE_ECDSA_AES256_GCM_SHA384: GcmSuite = GcmSuite(
    CipherSuite::ECDHE_ECDSA_AES256_GCM_SHA384,
    HashAlgorithm::SHA384,
    32,
    4,
);

pub(super) static ALL_CIPHER_SUITES: &[&dyn SupportedCipherSuite] = &[
    &TLS13_AES_128_GCM_SHA256,
    &TLS13_AES_256_GCM_SHA384,
    &ECDHE_ECDSA_AES128_GCM_SHA256,
    &ECDHE_ECDSA_AES256_GCM_SHA384,
];
