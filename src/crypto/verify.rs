//! Peer certificate verification contract.
//!
//! Path validation is not done here. A [`CertVerifier`] looks at the peer's
//! chain and answers with a [`VerifyStatus`]; an empty status is a pass and
//! anything else aborts the handshake with `bad_certificate`.

use std::collections::HashSet;
use std::fmt;
use std::ops::{BitOr, BitOrAssign};

use sha2::{Digest, Sha256};

/// Bitmask of reasons a chain was rejected.
#[derive(Clone, Copy, PartialEq, Eq, Default, Hash)]
pub struct VerifyStatus(u32);

impl VerifyStatus {
    pub const INVALID: VerifyStatus = VerifyStatus(1 << 1);
    pub const REVOKED: VerifyStatus = VerifyStatus(1 << 5);
    pub const SIGNER_NOT_FOUND: VerifyStatus = VerifyStatus(1 << 6);
    pub const SIGNER_NOT_CA: VerifyStatus = VerifyStatus(1 << 7);
    pub const NOT_ACTIVATED: VerifyStatus = VerifyStatus(1 << 9);
    pub const EXPIRED: VerifyStatus = VerifyStatus(1 << 10);
    pub const SIGNATURE_FAILURE: VerifyStatus = VerifyStatus(1 << 11);
    pub const UNEXPECTED_OWNER: VerifyStatus = VerifyStatus(1 << 14);

    /// The passing status.
    pub const fn ok() -> Self {
        VerifyStatus(0)
    }

    pub fn is_ok(&self) -> bool {
        self.0 == 0
    }

    pub fn contains(&self, other: VerifyStatus) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn bits(&self) -> u32 {
        self.0
    }
}

impl BitOr for VerifyStatus {
    type Output = VerifyStatus;

    fn bitor(self, rhs: Self) -> Self::Output {
        VerifyStatus(self.0 | rhs.0)
    }
}

impl BitOrAssign for VerifyStatus {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl fmt::Debug for VerifyStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "VerifyStatus({:#06x})", self.0)
    }
}

/// Decides whether a peer's certificate chain is acceptable.
pub trait CertVerifier: Send + Sync + fmt::Debug {
    /// `chain[0]` is the leaf, DER encoded. `server_name` is the name the
    /// client asked for, when verifying a server.
    fn verify(&self, chain: &[Vec<u8>], server_name: Option<&str>) -> VerifyStatus;
}

/// Accepts any non-empty chain. The application is expected to inspect
/// [`Session::peer_certificates`](crate::Session::peer_certificates) itself.
#[derive(Debug, Default)]
pub struct AcceptAnyCertificate;

impl CertVerifier for AcceptAnyCertificate {
    fn verify(&self, chain: &[Vec<u8>], _server_name: Option<&str>) -> VerifyStatus {
        if chain.is_empty() {
            VerifyStatus::INVALID
        } else {
            VerifyStatus::ok()
        }
    }
}

/// Accepts a leaf whose SHA-256 fingerprint is in a pinned set.
#[derive(Debug, Default)]
pub struct FingerprintVerifier {
    pins: HashSet<[u8; 32]>,
}

impl FingerprintVerifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pin a DER certificate.
    pub fn pin_certificate(mut self, der: &[u8]) -> Self {
        self.pins.insert(fingerprint(der));
        self
    }

    /// Pin a raw SHA-256 fingerprint.
    pub fn pin_fingerprint(mut self, fp: [u8; 32]) -> Self {
        self.pins.insert(fp);
        self
    }
}

impl CertVerifier for FingerprintVerifier {
    fn verify(&self, chain: &[Vec<u8>], _server_name: Option<&str>) -> VerifyStatus {
        let Some(leaf) = chain.first() else {
            return VerifyStatus::INVALID;
        };
        if self.pins.contains(&fingerprint(leaf)) {
            VerifyStatus::ok()
        } else {
            VerifyStatus::INVALID | VerifyStatus::SIGNER_NOT_FOUND
        }
    }
}

/// SHA-256 over a DER certificate.
pub fn fingerprint(der: &[u8]) -> [u8; 32] {
    let mut out = [0u8; 32];
    out.copy_from_slice(&Sha256::digest(der));
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_bits() {
        let mut s = VerifyStatus::ok();
        assert!(s.is_ok());
        s |= VerifyStatus::EXPIRED;
        s |= VerifyStatus::INVALID;
        assert!(!s.is_ok());
        assert!(s.contains(VerifyStatus::EXPIRED));
        assert!(!s.contains(VerifyStatus::REVOKED));
    }

    #[test]
    fn pinned() {
        let v = FingerprintVerifier::new().pin_certificate(b"cert-a");
        assert!(v.verify(&[b"cert-a".to_vec()], None).is_ok());
        let s = v.verify(&[b"cert-b".to_vec()], None);
        assert!(s.contains(VerifyStatus::SIGNER_NOT_FOUND));
        assert!(!v.verify(&[], None).is_ok());
    }
}
