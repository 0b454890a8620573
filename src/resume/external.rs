use std::fmt;

use zeroize::Zeroizing;

use crate::types::HashAlgorithm;
use crate::Error;

/// A TLS 1.3 pre-shared key agreed out of band.
///
/// A client offers it when it has no ticket to resume. A server accepts any
/// of the keys it was configured with, matched by identity.
#[derive(Clone)]
pub struct ExternalPsk {
    identity: Vec<u8>,
    key: Zeroizing<Vec<u8>>,
    hash: HashAlgorithm,
}

impl ExternalPsk {
    /// `hash` must match the hash of the negotiated cipher suite.
    pub fn new(identity: &[u8], key: &[u8], hash: HashAlgorithm) -> Result<Self, Error> {
        if identity.is_empty() || identity.len() > u16::MAX as usize {
            return Err(Error::ConfigError("psk identity length".into()));
        }
        if key.is_empty() {
            return Err(Error::ConfigError("empty psk".into()));
        }
        if hash.output_len() == 0 {
            return Err(Error::ConfigError(format!("psk hash {:?}", hash)));
        }
        Ok(ExternalPsk {
            identity: identity.to_vec(),
            key: Zeroizing::new(key.to_vec()),
            hash,
        })
    }

    pub fn identity(&self) -> &[u8] {
        &self.identity
    }

    pub fn hash(&self) -> HashAlgorithm {
        self.hash
    }

    pub(crate) fn key(&self) -> &Zeroizing<Vec<u8>> {
        &self.key
    }
}

impl fmt::Debug for ExternalPsk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExternalPsk")
            .field("identity", &String::from_utf8_lossy(&self.identity))
            .field("hash", &self.hash)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_empty_parts() {
        assert!(ExternalPsk::new(b"", &[1; 32], HashAlgorithm::SHA256).is_err());
        assert!(ExternalPsk::new(b"id", &[], HashAlgorithm::SHA256).is_err());
        assert!(ExternalPsk::new(b"id", &[1; 32], HashAlgorithm::Unknown(9)).is_err());
    }

    #[test]
    fn debug_hides_key() {
        let psk = ExternalPsk::new(b"sensor-7", &[0xAA; 32], HashAlgorithm::SHA256).unwrap();
        let shown = format!("{:?}", psk);
        assert!(shown.contains("sensor-7"));
        assert!(!shown.contains("170"));
    }
}
