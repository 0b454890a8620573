//! Per-direction record protection.
//!
//! The 1.2 family uses AES-GCM with a 4 byte implicit salt and an 8 byte
//! explicit nonce carried in the record. The 1.3 family XORs the sequence
//! number into a 12 byte IV and hides the real content type inside the
//! ciphertext.

use std::fmt;

use zeroize::Zeroizing;

use super::header::{RecordHeader, MAX_PLAINTEXT};
use crate::crypto::{Cipher, SupportedCipherSuite};
use crate::types::{ContentType, ProtocolVersion};
use crate::Error;

const TAG_LEN: usize = 16;
const EXPLICIT_NONCE_LEN: usize = 8;

pub(crate) struct CipherState {
    cipher: Box<dyn Cipher>,
    iv: Zeroizing<Vec<u8>>,
    tls13: bool,
}

impl fmt::Debug for CipherState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CipherState")
            .field("tls13", &self.tls13)
            .finish_non_exhaustive()
    }
}

impl CipherState {
    pub fn new(
        suite: &dyn SupportedCipherSuite,
        key: &[u8],
        iv: &[u8],
        tls13: bool,
    ) -> Result<Self, Error> {
        let expected_iv = if tls13 { 12 } else { 4 };
        if iv.len() != expected_iv || key.len() != suite.key_len() {
            return Err(Error::CryptoError("bad key or iv length".into()));
        }
        Ok(CipherState {
            cipher: suite.create_cipher(key).map_err(Error::CryptoError)?,
            iv: Zeroizing::new(iv.to_vec()),
            tls13,
        })
    }

    pub fn is_tls13(&self) -> bool {
        self.tls13
    }

    /// Bytes added to a plaintext by sealing.
    pub fn overhead(&self) -> usize {
        if self.tls13 {
            TAG_LEN + 1
        } else {
            TAG_LEN + EXPLICIT_NONCE_LEN
        }
    }

    /// Encrypt `plaintext` for a record with `header`, whose `length` is
    /// ignored. Returns the outer content type and the protected fragment.
    pub fn seal(
        &mut self,
        header: &RecordHeader,
        datagram: bool,
        plaintext: &[u8],
    ) -> Result<(ContentType, Vec<u8>), Error> {
        let seq = header.aead_sequence(datagram);

        if self.tls13 {
            let mut data = Vec::with_capacity(plaintext.len() + 1 + TAG_LEN);
            data.extend_from_slice(plaintext);
            data.push(header.content_type.as_u8());

            let outer = ContentType::ApplicationData;
            let aad = tls13_aad(header, datagram, outer, data.len() + TAG_LEN);
            let nonce = self.tls13_nonce(seq);
            self.cipher
                .encrypt(&mut data, &aad, &nonce)
                .map_err(Error::CryptoError)?;
            return Ok((outer, data));
        }

        let explicit = seq.to_be_bytes();
        let nonce = self.tls12_nonce(&explicit);
        let aad = tls12_aad(seq, header.content_type, header.version, plaintext.len());

        let mut data = plaintext.to_vec();
        self.cipher
            .encrypt(&mut data, &aad, &nonce)
            .map_err(Error::CryptoError)?;

        let mut fragment = Vec::with_capacity(EXPLICIT_NONCE_LEN + data.len());
        fragment.extend_from_slice(&explicit);
        fragment.extend_from_slice(&data);
        Ok((header.content_type, fragment))
    }

    /// Decrypt a record fragment. Every failure is `BadRecordMac`.
    pub fn open(
        &mut self,
        header: &RecordHeader,
        datagram: bool,
        fragment: &[u8],
    ) -> Result<(ContentType, Vec<u8>), Error> {
        let seq = header.aead_sequence(datagram);

        if self.tls13 {
            if fragment.len() < TAG_LEN + 1 {
                return Err(Error::BadRecordMac);
            }
            let aad = tls13_aad(header, datagram, header.content_type, fragment.len());
            let nonce = self.tls13_nonce(seq);
            let mut data = fragment.to_vec();
            self.cipher
                .decrypt(&mut data, &aad, &nonce)
                .map_err(|_| Error::BadRecordMac)?;

            // Strip padding, then the real content type.
            while data.last() == Some(&0) {
                data.pop();
            }
            let Some(inner) = data.pop() else {
                return Err(Error::UnexpectedMessage("record without content type".into()));
            };
            if data.len() > MAX_PLAINTEXT {
                return Err(Error::RecordOverflow);
            }
            return Ok((ContentType::from_u8(inner), data));
        }

        if fragment.len() < EXPLICIT_NONCE_LEN + TAG_LEN {
            return Err(Error::BadRecordMac);
        }
        let (explicit, ciphertext) = fragment.split_at(EXPLICIT_NONCE_LEN);
        let nonce = self.tls12_nonce(explicit);
        let plain_len = ciphertext.len() - TAG_LEN;
        let aad = tls12_aad(seq, header.content_type, header.version, plain_len);

        let mut data = ciphertext.to_vec();
        self.cipher
            .decrypt(&mut data, &aad, &nonce)
            .map_err(|_| Error::BadRecordMac)?;
        if data.len() > MAX_PLAINTEXT {
            return Err(Error::RecordOverflow);
        }
        Ok((header.content_type, data))
    }

    fn tls12_nonce(&self, explicit: &[u8]) -> [u8; 12] {
        let mut nonce = [0u8; 12];
        nonce[..4].copy_from_slice(&self.iv);
        nonce[4..].copy_from_slice(explicit);
        nonce
    }

    fn tls13_nonce(&self, seq: u64) -> [u8; 12] {
        let mut nonce = [0u8; 12];
        nonce.copy_from_slice(&self.iv);
        for (n, s) in nonce[4..].iter_mut().zip(seq.to_be_bytes()) {
            *n ^= s;
        }
        nonce
    }
}

fn tls12_aad(seq: u64, content_type: ContentType, version: ProtocolVersion, len: usize) -> [u8; 13] {
    let mut aad = [0u8; 13];
    aad[..8].copy_from_slice(&seq.to_be_bytes());
    aad[8] = content_type.as_u8();
    aad[9..11].copy_from_slice(&version.as_u16().to_be_bytes());
    aad[11..].copy_from_slice(&(len as u16).to_be_bytes());
    aad
}

/// The record header as it appears on the wire.
fn tls13_aad(header: &RecordHeader, datagram: bool, outer: ContentType, len: usize) -> Vec<u8> {
    let header = RecordHeader {
        content_type: outer,
        length: len as u16,
        ..*header
    };
    let mut aad = Vec::with_capacity(RecordHeader::len(datagram));
    header.serialize(&mut aad, datagram);
    aad
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::rust_crypto;
    use crate::types::CipherSuite;

    fn pair(suite: CipherSuite, tls13: bool) -> (CipherState, CipherState) {
        let provider = rust_crypto::default_provider();
        let s = provider.find_suite(suite).unwrap();
        let key = vec![0x42; s.key_len()];
        let iv = vec![0x24; if tls13 { 12 } else { 4 }];
        (
            CipherState::new(s, &key, &iv, tls13).unwrap(),
            CipherState::new(s, &key, &iv, tls13).unwrap(),
        )
    }

    fn header(ct: ContentType, seq: u64) -> RecordHeader {
        RecordHeader {
            content_type: ct,
            version: ProtocolVersion::Tls12,
            epoch: 0,
            sequence: seq,
            length: 0,
        }
    }

    #[test]
    fn tls12_seal_open() {
        let (mut w, mut r) = pair(CipherSuite::ECDHE_ECDSA_AES128_GCM_SHA256, false);
        let h = header(ContentType::ApplicationData, 7);
        let (outer, fragment) = w.seal(&h, false, b"hello").unwrap();
        assert_eq!(outer, ContentType::ApplicationData);
        assert_eq!(&fragment[..8], &7u64.to_be_bytes());
        assert_eq!(fragment.len(), 5 + w.overhead());

        let (ct, plain) = r.open(&h, false, &fragment).unwrap();
        assert_eq!(ct, ContentType::ApplicationData);
        assert_eq!(plain, b"hello");

        // Wrong sequence number changes the associated data.
        assert!(matches!(
            r.open(&header(ContentType::ApplicationData, 8), false, &fragment),
            Err(Error::BadRecordMac)
        ));
    }

    #[test]
    fn tls13_hides_content_type() {
        let (mut w, mut r) = pair(CipherSuite::TLS13_AES_256_GCM_SHA384, true);
        let h = header(ContentType::Handshake, 0);
        let (outer, fragment) = w.seal(&h, false, b"finished").unwrap();
        assert_eq!(outer, ContentType::ApplicationData);

        let received = RecordHeader {
            content_type: outer,
            length: fragment.len() as u16,
            ..h
        };
        let (ct, plain) = r.open(&received, false, &fragment).unwrap();
        assert_eq!(ct, ContentType::Handshake);
        assert_eq!(plain, b"finished");
    }

    #[test]
    fn tampering_is_bad_record_mac() {
        let (mut w, mut r) = pair(CipherSuite::ECDHE_ECDSA_AES256_GCM_SHA384, false);
        let h = header(ContentType::Handshake, 0);
        let (_, mut fragment) = w.seal(&h, false, b"data").unwrap();
        let last = fragment.len() - 1;
        fragment[last] ^= 1;
        assert!(matches!(r.open(&h, false, &fragment), Err(Error::BadRecordMac)));
        assert!(matches!(r.open(&h, false, &[0; 5]), Err(Error::BadRecordMac)));
    }
}
