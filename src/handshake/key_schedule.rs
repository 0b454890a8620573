//! Key derivation for both handshake families.
//!
//! The 1.2 family runs the PRF from the pre-master secret to a master
//! secret and a key block. The 1.3 family walks the HKDF chain
//! early -> handshake -> master, deriving traffic secrets on the way.

use zeroize::Zeroizing;

use crate::crypto::kdf::{derive_secret, expand_label, extract, hmac, prf};
use crate::crypto::{CryptoProvider, SupportedCipherSuite};
use crate::record::CipherState;
use crate::types::HashAlgorithm;
use crate::Error;

pub(crate) type Secret = Zeroizing<Vec<u8>>;

const MASTER_SECRET_LEN: usize = 48;
const FINISHED12_LEN: usize = 12;

// ============================================================================
// TLS 1.2 / DTLS 1.2
// ============================================================================

/// Master secret from the pre-master secret. With extended master secret
/// the seed is the session hash, otherwise the two randoms.
pub(crate) fn master_secret(
    provider: &CryptoProvider,
    hash: HashAlgorithm,
    pre_master: &[u8],
    session_hash: Option<&[u8]>,
    client_random: &[u8; 32],
    server_random: &[u8; 32],
) -> Result<Secret, Error> {
    let secret = match session_hash {
        Some(h) => prf(provider, hash, pre_master, "extended master secret", h, MASTER_SECRET_LEN)?,
        None => {
            let mut seed = Vec::with_capacity(64);
            seed.extend_from_slice(client_random);
            seed.extend_from_slice(server_random);
            prf(provider, hash, pre_master, "master secret", &seed, MASTER_SECRET_LEN)?
        }
    };
    Ok(Zeroizing::new(secret))
}

/// Record protection for both directions of a 1.2 session.
pub(crate) struct KeyBlock {
    pub client: CipherState,
    pub server: CipherState,
}

pub(crate) fn key_block(
    provider: &CryptoProvider,
    suite: &dyn SupportedCipherSuite,
    master: &[u8],
    client_random: &[u8; 32],
    server_random: &[u8; 32],
) -> Result<KeyBlock, Error> {
    let key_len = suite.key_len();
    let iv_len = suite.fixed_iv_len();

    let mut seed = Vec::with_capacity(64);
    seed.extend_from_slice(server_random);
    seed.extend_from_slice(client_random);
    let block = Zeroizing::new(prf(
        provider,
        suite.hash_algorithm(),
        master,
        "key expansion",
        &seed,
        2 * (key_len + iv_len),
    )?);

    let (client_key, rest) = block.split_at(key_len);
    let (server_key, rest) = rest.split_at(key_len);
    let (client_iv, server_iv) = rest.split_at(iv_len);

    Ok(KeyBlock {
        client: CipherState::new(suite, client_key, client_iv, false)?,
        server: CipherState::new(suite, server_key, server_iv, false)?,
    })
}

pub(crate) fn finished12(
    provider: &CryptoProvider,
    hash: HashAlgorithm,
    master: &[u8],
    client: bool,
    transcript_hash: &[u8],
) -> Result<Vec<u8>, Error> {
    let label = if client { "client finished" } else { "server finished" };
    prf(provider, hash, master, label, transcript_hash, FINISHED12_LEN)
}

// ============================================================================
// TLS 1.3
// ============================================================================

/// The HKDF chain of one 1.3 handshake.
pub(crate) struct KeySchedule13 {
    provider: CryptoProvider,
    hash: HashAlgorithm,
    early: Secret,
    handshake: Option<Secret>,
    master: Option<Secret>,
}

impl KeySchedule13 {
    /// Start from the early secret, keyed by `psk` when resuming.
    pub fn new(provider: &CryptoProvider, hash: HashAlgorithm, psk: Option<&[u8]>) -> Result<Self, Error> {
        let zeros = vec![0u8; hash.output_len()];
        let early = extract(provider, hash, &zeros, psk.unwrap_or(&zeros))?;
        Ok(KeySchedule13 {
            provider: provider.clone(),
            hash,
            early: Zeroizing::new(early),
            handshake: None,
            master: None,
        })
    }

    fn empty_hash(&self) -> Vec<u8> {
        self.provider.hash(self.hash, &[])
    }

    fn derived(&self, secret: &[u8]) -> Result<Vec<u8>, Error> {
        derive_secret(&self.provider, self.hash, secret, b"derived", &self.empty_hash())
    }

    /// Binder over the ClientHello hashed up to its binders list. External
    /// keys and resumption keys use different labels.
    pub fn binder(&self, truncated_hello_hash: &[u8], external: bool) -> Result<Vec<u8>, Error> {
        let label: &[u8] = if external { b"ext binder" } else { b"res binder" };
        let binder_key = Zeroizing::new(derive_secret(
            &self.provider,
            self.hash,
            &self.early,
            label,
            &self.empty_hash(),
        )?);
        verify_data13(&self.provider, self.hash, &binder_key, truncated_hello_hash)
    }

    /// Mix in the (EC)DHE shared secret. Returns the client and server
    /// handshake traffic secrets.
    pub fn handshake_secrets(
        &mut self,
        shared: &[u8],
        transcript_hash: &[u8],
    ) -> Result<(Secret, Secret), Error> {
        let salt = self.derived(&self.early)?;
        let hs = Zeroizing::new(extract(&self.provider, self.hash, &salt, shared)?);
        let c = derive_secret(&self.provider, self.hash, &hs, b"c hs traffic", transcript_hash)?;
        let s = derive_secret(&self.provider, self.hash, &hs, b"s hs traffic", transcript_hash)?;
        self.handshake = Some(hs);
        Ok((Zeroizing::new(c), Zeroizing::new(s)))
    }

    /// Client and server application traffic secrets, over the transcript
    /// through the server Finished.
    pub fn application_secrets(&mut self, transcript_hash: &[u8]) -> Result<(Secret, Secret), Error> {
        let hs = self
            .handshake
            .as_ref()
            .ok_or_else(|| Error::CryptoError("handshake secret missing".into()))?;
        let salt = self.derived(hs)?;
        let zeros = vec![0u8; self.hash.output_len()];
        let master = Zeroizing::new(extract(&self.provider, self.hash, &salt, &zeros)?);
        let c = derive_secret(&self.provider, self.hash, &master, b"c ap traffic", transcript_hash)?;
        let s = derive_secret(&self.provider, self.hash, &master, b"s ap traffic", transcript_hash)?;
        self.master = Some(master);
        Ok((Zeroizing::new(c), Zeroizing::new(s)))
    }

    /// Resumption master secret, over the transcript through the client
    /// Finished.
    pub fn resumption_master(&self, transcript_hash: &[u8]) -> Result<Secret, Error> {
        let master = self
            .master
            .as_ref()
            .ok_or_else(|| Error::CryptoError("master secret missing".into()))?;
        let rms = derive_secret(&self.provider, self.hash, master, b"res master", transcript_hash)?;
        Ok(Zeroizing::new(rms))
    }
}

/// Finished (and binder) value: HMAC keyed by the secret's finished key.
pub(crate) fn verify_data13(
    provider: &CryptoProvider,
    hash: HashAlgorithm,
    secret: &[u8],
    transcript_hash: &[u8],
) -> Result<Vec<u8>, Error> {
    let finished_key = Zeroizing::new(expand_label(
        provider,
        hash,
        secret,
        b"finished",
        &[],
        hash.output_len(),
    )?);
    hmac(provider, hash, &finished_key, transcript_hash)
}

/// Record protection from a 1.3 traffic secret.
pub(crate) fn traffic_cipher(
    provider: &CryptoProvider,
    suite: &dyn SupportedCipherSuite,
    secret: &[u8],
) -> Result<CipherState, Error> {
    let hash = suite.hash_algorithm();
    let key = Zeroizing::new(expand_label(provider, hash, secret, b"key", &[], suite.key_len())?);
    let iv = Zeroizing::new(expand_label(provider, hash, secret, b"iv", &[], 12)?);
    CipherState::new(suite, &key, &iv, true)
}

/// The traffic secret following `secret` after a KeyUpdate.
pub(crate) fn next_traffic_secret(
    provider: &CryptoProvider,
    hash: HashAlgorithm,
    secret: &[u8],
) -> Result<Secret, Error> {
    let next = expand_label(provider, hash, secret, b"traffic upd", &[], hash.output_len())?;
    Ok(Zeroizing::new(next))
}

/// The PSK a NewSessionTicket stands for.
pub(crate) fn ticket_psk(
    provider: &CryptoProvider,
    hash: HashAlgorithm,
    resumption_master: &[u8],
    nonce: &[u8],
) -> Result<Secret, Error> {
    let psk = expand_label(provider, hash, resumption_master, b"resumption", nonce, hash.output_len())?;
    Ok(Zeroizing::new(psk))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::rust_crypto;
    use crate::types::CipherSuite;

    fn hex(s: &str) -> Vec<u8> {
        (0..s.len())
            .step_by(2)
            .map(|i| u8::from_str_radix(&s[i..i + 2], 16).unwrap())
            .collect()
    }

    #[test]
    fn early_secret_without_psk() {
        // RFC 8448, Simple 1-RTT Handshake.
        let p = rust_crypto::default_provider();
        let ks = KeySchedule13::new(&p, HashAlgorithm::SHA256, None).unwrap();
        assert_eq!(
            &ks.early[..],
            &hex("33ad0a1c607ec03b09e6cd9893680ce210adf300aa1f2660e1b22e10f170f92a")[..]
        );
        assert_eq!(
            ks.derived(&ks.early).unwrap(),
            hex("6f2615a108c702c5678f54fc9dbab69716c076189c48250cebeac3576c3611ba")
        );
    }

    #[test]
    fn both_sides_agree() {
        let p = rust_crypto::default_provider();
        let alg = HashAlgorithm::SHA384;
        let th = p.hash(alg, b"hello");

        let mut a = KeySchedule13::new(&p, alg, Some(&[5; 48])).unwrap();
        let mut b = KeySchedule13::new(&p, alg, Some(&[5; 48])).unwrap();
        let (ac, as_) = a.handshake_secrets(&[9; 32], &th).unwrap();
        let (bc, bs) = b.handshake_secrets(&[9; 32], &th).unwrap();
        assert_eq!(&ac[..], &bc[..]);
        assert_eq!(&as_[..], &bs[..]);
        assert_ne!(&ac[..], &as_[..]);
        assert_eq!(ac.len(), 48);

        let (ac, _) = a.application_secrets(&th).unwrap();
        let (bc, _) = b.application_secrets(&th).unwrap();
        assert_eq!(&ac[..], &bc[..]);
        assert_eq!(
            &a.resumption_master(&th).unwrap()[..],
            &b.resumption_master(&th).unwrap()[..]
        );
    }

    #[test]
    fn binder_depends_on_psk() {
        let p = rust_crypto::default_provider();
        let alg = HashAlgorithm::SHA256;
        let th = p.hash(alg, b"truncated hello");
        let a = KeySchedule13::new(&p, alg, Some(&[1; 32])).unwrap();
        let b = KeySchedule13::new(&p, alg, Some(&[2; 32])).unwrap();
        assert_ne!(a.binder(&th, false).unwrap(), b.binder(&th, false).unwrap());
        assert_eq!(a.binder(&th, false).unwrap().len(), 32);
    }

    #[test]
    fn external_binder_uses_own_label() {
        let p = rust_crypto::default_provider();
        let alg = HashAlgorithm::SHA256;
        let th = p.hash(alg, b"truncated hello");
        let ks = KeySchedule13::new(&p, alg, Some(&[1; 32])).unwrap();
        assert_ne!(ks.binder(&th, true).unwrap(), ks.binder(&th, false).unwrap());
    }

    #[test]
    fn application_secrets_need_handshake() {
        let p = rust_crypto::default_provider();
        let mut ks = KeySchedule13::new(&p, HashAlgorithm::SHA256, None).unwrap();
        assert!(ks.application_secrets(&[0; 32]).is_err());
    }

    #[test]
    fn tls12_finished_and_keys() {
        let p = rust_crypto::default_provider();
        let suite = p
            .find_suite(CipherSuite::ECDHE_ECDSA_AES256_GCM_SHA384)
            .unwrap();
        let alg = suite.hash_algorithm();
        let ms = master_secret(&p, alg, &[3; 32], None, &[1; 32], &[2; 32]).unwrap();
        assert_eq!(ms.len(), 48);
        let ems = master_secret(&p, alg, &[3; 32], Some(&[7; 48]), &[1; 32], &[2; 32]).unwrap();
        assert_ne!(&ms[..], &ems[..]);

        let c = finished12(&p, alg, &ms, true, &[0; 48]).unwrap();
        let s = finished12(&p, alg, &ms, false, &[0; 48]).unwrap();
        assert_eq!(c.len(), 12);
        assert_ne!(c, s);

        assert!(key_block(&p, suite, &ms, &[1; 32], &[2; 32]).is_ok());
    }

    #[test]
    fn key_update_changes_secret() {
        let p = rust_crypto::default_provider();
        let s = vec![4u8; 32];
        let n = next_traffic_secret(&p, HashAlgorithm::SHA256, &s).unwrap();
        assert_ne!(&n[..], &s[..]);
        let suite = p.find_suite(CipherSuite::TLS13_AES_128_GCM_SHA256).unwrap();
        assert!(traffic_cipher(&p, suite, &n).is_ok());
    }
}
