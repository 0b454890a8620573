//! HKDF for the TLS 1.3 key schedule.

use hkdf::Hkdf;
use sha2::{Sha256, Sha384};

use crate::crypto::provider::HkdfProvider;
use crate::types::HashAlgorithm;

#[derive(Debug)]
pub(super) struct RustCryptoHkdfProvider;

impl HkdfProvider for RustCryptoHkdfProvider {
    fn hkdf_extract(&self, hash: HashAlgorithm, salt: &[u8], ikm: &[u8]) -> Result<Vec<u8>, String> {
        let salt = if salt.is_empty() { None } else { Some(salt) };
        match hash {
            HashAlgorithm::SHA256 => Ok(Hkdf::<Sha256>::extract(salt, ikm).0.to_vec()),
            HashAlgorithm::SHA384 => Ok(Hkdf::<Sha384>::extract(salt, ikm).0.to_vec()),
            _ => Err(format!("Unsupported hash for HKDF: {:?}", hash)),
        }
    }

    fn hkdf_expand(
        &self,
        hash: HashAlgorithm,
        prk: &[u8],
        info: &[u8],
        output_len: usize,
    ) -> Result<Vec<u8>, String> {
        let mut output = vec![0u8; output_len];
        match hash {
            HashAlgorithm::SHA256 => Hkdf::<Sha256>::from_prk(prk)
                .map_err(|e| format!("Invalid PRK: {:?}", e))?
                .expand(info, &mut output)
                .map_err(|e| format!("HKDF expand failed: {:?}", e))?,
            HashAlgorithm::SHA384 => Hkdf::<Sha384>::from_prk(prk)
                .map_err(|e| format!("Invalid PRK: {:?}", e))?
                .expand(info, &mut output)
                .map_err(|e| format!("HKDF expand failed: {:?}", e))?,
            _ => return Err(format!("Unsupported hash for HKDF: {:?}", hash)),
        }
        Ok(output)
    }
}

pub(super) static HKDF_PROVIDER: RustCryptoHkdfProvider = RustCryptoHkdfProvider;
