//! Ephemeral key exchange: x25519 and P-256 ECDHE.

use p256::ecdh::EphemeralSecret as P256Secret;
use p256::PublicKey as P256PublicKey;
use rand::rngs::OsRng;
use x25519_dalek::{EphemeralSecret as X25519Secret, PublicKey as X25519PublicKey};

use crate::crypto::provider::{ActiveKeyExchange, SupportedKxGroup};
use crate::types::NamedGroup;

enum EcdhKeyExchange {
    X25519 {
        secret: X25519Secret,
        public_key: Vec<u8>,
    },
    P256 {
        secret: P256Secret,
        public_key: Vec<u8>,
    },
}

impl std::fmt::Debug for EcdhKeyExchange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EcdhKeyExchange")
            .field("group", &self.group())
            .field("public_key_len", &self.pub_key().len())
            .finish_non_exhaustive()
    }
}

impl EcdhKeyExchange {
    fn new(group: NamedGroup) -> Result<Self, String> {
        match group {
            NamedGroup::X25519 => {
                let secret = X25519Secret::random_from_rng(OsRng);
                let public_key = X25519PublicKey::from(&secret).as_bytes().to_vec();
                Ok(EcdhKeyExchange::X25519 { secret, public_key })
            }
            NamedGroup::Secp256r1 => {
                let secret = P256Secret::random(&mut OsRng);
                let public_key = P256PublicKey::from(&secret).to_sec1_bytes().to_vec();
                Ok(EcdhKeyExchange::P256 { secret, public_key })
            }
            _ => Err(format!("Unsupported group: {:?}", group)),
        }
    }
}

impl ActiveKeyExchange for EcdhKeyExchange {
    fn pub_key(&self) -> &[u8] {
        match self {
            EcdhKeyExchange::X25519 { public_key, .. } => public_key,
            EcdhKeyExchange::P256 { public_key, .. } => public_key,
        }
    }

    fn complete(self: Box<Self>, peer_pub: &[u8]) -> Result<Vec<u8>, String> {
        match *self {
            EcdhKeyExchange::X25519 { secret, .. } => {
                let peer: [u8; 32] = peer_pub
                    .try_into()
                    .map_err(|_| "Invalid X25519 public key".to_string())?;
                let shared = secret.diffie_hellman(&X25519PublicKey::from(peer));
                if !shared.was_contributory() {
                    return Err("X25519 shared secret is all zeros".into());
                }
                Ok(shared.as_bytes().to_vec())
            }
            EcdhKeyExchange::P256 { secret, .. } => {
                let peer = P256PublicKey::from_sec1_bytes(peer_pub)
                    .map_err(|_| "Invalid P-256 public key".to_string())?;
                let shared = secret.diffie_hellman(&peer);
                Ok(shared.raw_secret_bytes().to_vec())
            }
        }
    }

    fn group(&self) -> NamedGroup {
        match self {
            EcdhKeyExchange::X25519 { .. } => NamedGroup::X25519,
            EcdhKeyExchange::P256 { .. } => NamedGroup::Secp256r1,
        }
    }
}

#[derive(Debug)]
struct Group(NamedGroup);

impl SupportedKxGroup for Group {
    fn name(&self) -> NamedGroup {
        self.0
    }

    fn start_exchange(&self) -> Result<Box<dyn ActiveKeyExchange>, String> {
        Ok(Box::new(EcdhKeyExchange::new(self.0)?))
    }
}

static KX_GROUP_X25519: Group = Group(NamedGroup::X25519);
static KX_GROUP_P256: Group = Group(NamedGroup::Secp256r1);

pub(super) static ALL_KX_GROUPS: &[&dyn SupportedKxGroup] = &[&KX_GROUP_X25519, &KX_GROUP_P256];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn both_sides_agree() {
        for g in ALL_KX_GROUPS {
            let a = g.start_exchange().unwrap();
            let b = g.start_exchange().unwrap();
            let a_pub = a.pub_key().to_vec();
            let b_pub = b.pub_key().to_vec();
            let s1 = a.complete(&b_pub).unwrap();
            let s2 = b.complete(&a_pub).unwrap();
            assert_eq!(s1, s2);
        }
    }

    #[test]
    fn rejects_garbage_peer_key() {
        let a = KX_GROUP_P256.start_exchange().unwrap();
        assert!(a.complete(&[4, 1, 2, 3]).is_err());
    }
}
