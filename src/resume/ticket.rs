use std::fmt;
use std::sync::RwLock;

use zeroize::Zeroizing;

use crate::crypto::CryptoProvider;
use crate::types::CipherSuite;
use crate::Error;

const KEY_NAME_LEN: usize = 16;
const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;

// AES-256-GCM through the provider's 1.3 suite of that cipher.
const TICKET_CIPHER: CipherSuite = CipherSuite::TLS13_AES_256_GCM_SHA384;

struct TicketKey {
    name: [u8; KEY_NAME_LEN],
    key: Zeroizing<Vec<u8>>,
}

/// Server ticket encryption key.
///
/// Owned by whoever builds the server [`Config`](crate::Config) and shared by
/// every session built from it. The key only changes on [`TicketKeys::rotate`].
///
/// Ticket layout: `key_name(16) | nonce(12) | ciphertext | tag(16)`, with the
/// key name as associated data.
pub struct TicketKeys {
    provider: CryptoProvider,
    current: RwLock<TicketKey>,
}

impl TicketKeys {
    pub fn new(provider: CryptoProvider) -> Result<Self, Error> {
        let key = Self::generate(&provider)?;
        Ok(TicketKeys {
            provider,
            current: RwLock::new(key),
        })
    }

    fn generate(provider: &CryptoProvider) -> Result<TicketKey, Error> {
        let suite = provider
            .find_suite(TICKET_CIPHER)
            .ok_or_else(|| Error::CryptoError("ticket cipher unavailable".into()))?;
        let name = provider
            .random_bytes::<KEY_NAME_LEN>()
            .map_err(Error::CryptoError)?;
        let mut key = Zeroizing::new(vec![0u8; suite.key_len()]);
        provider
            .secure_random
            .fill(&mut key)
            .map_err(Error::CryptoError)?;
        Ok(TicketKey { name, key })
    }

    /// Replace the key. Tickets sealed under the old key stop opening.
    pub fn rotate(&self) -> Result<(), Error> {
        let key = Self::generate(&self.provider)?;
        debug!("Rotate ticket key");
        *self.current.write().unwrap_or_else(|e| e.into_inner()) = key;
        Ok(())
    }

    pub(crate) fn seal(&self, plaintext: &[u8]) -> Result<Vec<u8>, Error> {
        let current = self.current.read().unwrap_or_else(|e| e.into_inner());
        let nonce = self
            .provider
            .random_bytes::<NONCE_LEN>()
            .map_err(Error::CryptoError)?;

        let mut cipher = self.cipher(&current.key)?;
        let mut data = plaintext.to_vec();
        cipher
            .encrypt(&mut data, &current.name, &nonce)
            .map_err(Error::CryptoError)?;

        let mut out = Vec::with_capacity(KEY_NAME_LEN + NONCE_LEN + data.len());
        out.extend_from_slice(&current.name);
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&data);
        Ok(out)
    }

    /// Decrypt a ticket. Anything that is not a ticket of the current key
    /// gives `None`.
    pub(crate) fn open(&self, ticket: &[u8]) -> Option<Vec<u8>> {
        if ticket.len() < KEY_NAME_LEN + NONCE_LEN + TAG_LEN {
            return None;
        }
        let (name, rest) = ticket.split_at(KEY_NAME_LEN);
        let (nonce, ciphertext) = rest.split_at(NONCE_LEN);

        let current = self.current.read().unwrap_or_else(|e| e.into_inner());
        if name != current.name {
            debug!("Ticket for unknown key name");
            return None;
        }

        let mut n = [0u8; NONCE_LEN];
        n.copy_from_slice(nonce);
        let mut cipher = self.cipher(&current.key).ok()?;
        let mut data = ciphertext.to_vec();
        match cipher.decrypt(&mut data, name, &n) {
            Ok(()) => Some(data),
            Err(_) => {
                debug!("Ticket failed to decrypt");
                None
            }
        }
    }

    fn cipher(&self, key: &[u8]) -> Result<Box<dyn crate::crypto::Cipher>, Error> {
        let suite = self
            .provider
            .find_suite(TICKET_CIPHER)
            .ok_or_else(|| Error::CryptoError("ticket cipher unavailable".into()))?;
        suite.create_cipher(key).map_err(Error::CryptoError)
    }
}

impl fmt::Debug for TicketKeys {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TicketKeys").finish_non_exhaustive()
    }
}
