//! SHA-2 transcript hashing.

use sha2::{Digest, Sha256, Sha384};

use crate::crypto::provider::{HashContext, HashProvider};
use crate::types::HashAlgorithm;

#[derive(Clone)]
enum RustCryptoHashContext {
    Sha256(Sha256),
    Sha384(Sha384),
}

impl std::fmt::Debug for RustCryptoHashContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RustCryptoHashContext::Sha256(_) => f.write_str("Sha256"),
            RustCryptoHashContext::Sha384(_) => f.write_str("Sha384"),
        }
    }
}

impl HashContext for RustCryptoHashContext {
    fn update(&mut self, data: &[u8]) {
        match self {
            RustCryptoHashContext::Sha256(ctx) => ctx.update(data),
            RustCryptoHashContext::Sha384(ctx) => ctx.update(data),
        }
    }

    fn clone_and_finalize(&self) -> Vec<u8> {
        match self {
            RustCryptoHashContext::Sha256(ctx) => ctx.clone().finalize().to_vec(),
            RustCryptoHashContext::Sha384(ctx) => ctx.clone().finalize().to_vec(),
        }
    }
}

#[derive(Debug)]
pub(super) struct RustCryptoHashProvider;

impl HashProvider for RustCryptoHashProvider {
    fn create_hash(&self, algorithm: HashAlgorithm) -> Box<dyn HashContext> {
        match algorithm {
            HashAlgorithm::SHA384 => Box::new(RustCryptoHashContext::Sha384(Sha384::new())),
            // Only the two suite hashes exist; everything negotiable maps to one of them.
            _ => Box::new(RustCryptoHashContext::Sha256(Sha256::new())),
        }
    }
}

pub(super) static HASH_PROVIDER: RustCryptoHashProvider = RustCryptoHashProvider;
