//! Session resumption state.
//!
//! [`SessionData`] is what a client keeps to resume and what a server seals
//! into a ticket or keeps in its [`SessionStore`]. For the 1.2 family the
//! secret is the master secret. For 1.3 it is the PSK derived from the
//! resumption master secret and the ticket nonce.

mod external;
mod store;
mod ticket;

use std::fmt;

use nom::number::complete::{be_u16, be_u32, be_u64, be_u8};
use nom::IResult;
use zeroize::Zeroizing;

pub use external::ExternalPsk;
pub use store::{MemorySessionStore, SessionStore};
pub use ticket::TicketKeys;

use crate::codec::{put_u16, put_u32, put_vec16, put_vec24, put_vec8, vec16, vec24, vec8, with_len24};
use crate::message::parse_body;
use crate::types::{CipherSuite, ProtocolVersion};
use crate::Error;

#[derive(Clone)]
pub struct SessionData {
    pub(crate) version: ProtocolVersion,
    pub(crate) suite: CipherSuite,
    pub(crate) secret: Zeroizing<Vec<u8>>,
    pub(crate) ems: bool,
    pub(crate) session_id: Vec<u8>,
    pub(crate) ticket: Vec<u8>,
    /// Unix seconds.
    pub(crate) issued_at: u64,
    /// Seconds.
    pub(crate) lifetime: u32,
    pub(crate) age_add: u32,
    pub(crate) peer_chain: Vec<Vec<u8>>,
}

impl SessionData {
    pub fn version(&self) -> ProtocolVersion {
        self.version
    }

    pub fn cipher_suite(&self) -> CipherSuite {
        self.suite
    }

    pub fn session_id(&self) -> &[u8] {
        &self.session_id
    }

    /// The ticket to present, empty when resuming by session id.
    pub fn ticket(&self) -> &[u8] {
        &self.ticket
    }

    pub fn issued_at(&self) -> u64 {
        self.issued_at
    }

    pub fn lifetime(&self) -> u32 {
        self.lifetime
    }

    pub fn is_expired(&self, now_secs: u64) -> bool {
        now_secs >= self.issued_at.saturating_add(self.lifetime as u64)
            || now_secs + 60 < self.issued_at
    }

    /// Obfuscated ticket age in milliseconds, as sent in a 1.3 hello.
    pub(crate) fn obfuscated_age(&self, now_secs: u64) -> u32 {
        let age_ms = now_secs.saturating_sub(self.issued_at).saturating_mul(1000) as u32;
        age_ms.wrapping_add(self.age_add)
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, Error> {
        let mut out = Vec::new();
        put_u16(&mut out, self.version.as_u16());
        put_u16(&mut out, self.suite.as_u16());
        out.push(self.ems as u8);
        out.extend_from_slice(&self.issued_at.to_be_bytes());
        put_u32(&mut out, self.lifetime);
        put_u32(&mut out, self.age_add);
        put_vec8(&mut out, &self.secret)?;
        put_vec8(&mut out, &self.session_id)?;
        put_vec16(&mut out, &self.ticket)?;
        with_len24(&mut out, |out| {
            for cert in &self.peer_chain {
                put_vec24(out, cert)?;
            }
            Ok(())
        })?;
        Ok(out)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, Error> {
        parse_body(bytes, Self::parse)
    }

    fn parse(input: &[u8]) -> IResult<&[u8], SessionData> {
        let (input, version) = be_u16(input)?;
        let (input, suite) = be_u16(input)?;
        let (input, ems) = be_u8(input)?;
        let (input, issued_at) = be_u64(input)?;
        let (input, lifetime) = be_u32(input)?;
        let (input, age_add) = be_u32(input)?;
        let (input, secret) = vec8(input)?;
        let (input, session_id) = vec8(input)?;
        let (input, ticket) = vec16(input)?;
        let (input, mut chain) = vec24(input)?;

        let mut peer_chain = Vec::new();
        while !chain.is_empty() {
            let (rest, cert) = vec24(chain)?;
            peer_chain.push(cert.to_vec());
            chain = rest;
        }

        Ok((
            input,
            SessionData {
                version: ProtocolVersion::from_u16(version),
                suite: CipherSuite::from_u16(suite),
                secret: Zeroizing::new(secret.to_vec()),
                ems: ems != 0,
                session_id: session_id.to_vec(),
                ticket: ticket.to_vec(),
                issued_at,
                lifetime,
                age_add,
                peer_chain,
            },
        ))
    }
}

impl fmt::Debug for SessionData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionData")
            .field("version", &self.version)
            .field("suite", &self.suite)
            .field("ems", &self.ems)
            .field("session_id_len", &self.session_id.len())
            .field("ticket_len", &self.ticket.len())
            .field("issued_at", &self.issued_at)
            .field("lifetime", &self.lifetime)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
pub(crate) fn sample() -> SessionData {
    SessionData {
        version: ProtocolVersion::Tls12,
        suite: CipherSuite::ECDHE_ECDSA_AES128_GCM_SHA256,
        secret: Zeroizing::new(vec![0x11; 48]),
        ems: true,
        session_id: vec![0x22; 32],
        ticket: vec![],
        issued_at: 1_700_000_000,
        lifetime: 3600,
        age_add: 7,
        peer_chain: vec![vec![1, 2, 3], vec![4]],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serialized_form_is_stable() {
        let s = sample();
        let back = SessionData::from_bytes(&s.to_bytes().unwrap()).unwrap();
        assert_eq!(back.version, s.version);
        assert_eq!(back.suite, s.suite);
        assert_eq!(&back.secret[..], &s.secret[..]);
        assert_eq!(back.peer_chain, s.peer_chain);

        let mut bytes = s.to_bytes().unwrap();
        bytes.push(0);
        assert!(SessionData::from_bytes(&bytes).is_err());
        assert!(SessionData::from_bytes(&bytes[..10]).is_err());
    }

    #[test]
    fn expiry() {
        let s = sample();
        assert!(!s.is_expired(s.issued_at + 10));
        assert!(s.is_expired(s.issued_at + 3600));
        assert!(s.is_expired(s.issued_at - 3600));
    }

    #[test]
    fn ticket_age() {
        let s = sample();
        assert_eq!(s.obfuscated_age(s.issued_at + 2), 2007);
    }
}
