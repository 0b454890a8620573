use nom::bytes::complete::take;
use nom::error::{Error, ErrorKind};
use nom::number::complete::be_u8;
use nom::{Err, IResult};

use crate::codec::{fixed, put_u16, put_u8, put_vec16, put_vec8, vec16, vec8, with_len16};
use crate::types::{CipherSuite, ProtocolVersion};
use crate::Error as TlsError;

/// ServerHello.random of a HelloRetryRequest (SHA-256 of "HelloRetryRequest").
pub const HRR_RANDOM: [u8; 32] = [
    0xCF, 0x21, 0xAD, 0x74, 0xE5, 0x9A, 0x61, 0x11, 0xBE, 0x1D, 0x8C, 0x02, 0x1E, 0x65, 0xB8, 0x91,
    0xC2, 0xA2, 0x11, 0x16, 0x7A, 0xBB, 0x8C, 0x5E, 0x07, 0x9E, 0x09, 0xE2, 0xC8, 0xA8, 0x33, 0x9C,
];

/// Tail of a 1.3 capable server's random when it negotiates 1.2.
pub const DOWNGRADE_TLS12: [u8; 8] = *b"DOWNGRD\x01";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientHello {
    pub legacy_version: ProtocolVersion,
    pub random: [u8; 32],
    pub session_id: Vec<u8>,
    /// Present on datagram transports only.
    pub cookie: Option<Vec<u8>>,
    pub cipher_suites: Vec<CipherSuite>,
    pub compression_methods: Vec<u8>,
    /// The raw extension block, without its length prefix.
    pub extensions: Vec<u8>,
}

impl ClientHello {
    pub fn parse(input: &[u8], datagram: bool) -> IResult<&[u8], ClientHello> {
        let (input, legacy_version) = ProtocolVersion::parse(input)?;
        let (input, random) = fixed::<32>(input)?;
        let (input, session_id) = vec8(input)?;
        if session_id.len() > 32 {
            return Err(Err::Failure(Error::new(input, ErrorKind::LengthValue)));
        }
        let (input, cookie) = if datagram {
            let (input, cookie) = vec8(input)?;
            (input, Some(cookie.to_vec()))
        } else {
            (input, None)
        };

        let (input, suites) = vec16(input)?;
        if suites.is_empty() || suites.len() % 2 != 0 {
            return Err(Err::Failure(Error::new(input, ErrorKind::LengthValue)));
        }
        let mut cipher_suites = Vec::with_capacity(suites.len() / 2);
        let mut rest = suites;
        while !rest.is_empty() {
            let (r, suite) = CipherSuite::parse(rest)?;
            rest = r;
            cipher_suites.push(suite);
        }

        let (input, compression) = vec8(input)?;
        if compression.is_empty() {
            return Err(Err::Failure(Error::new(input, ErrorKind::LengthValue)));
        }

        let (input, extensions) = parse_extension_block(input)?;

        Ok((
            input,
            ClientHello {
                legacy_version,
                random,
                session_id: session_id.to_vec(),
                cookie,
                cipher_suites,
                compression_methods: compression.to_vec(),
                extensions: extensions.to_vec(),
            },
        ))
    }

    pub fn serialize(&self, output: &mut Vec<u8>) -> Result<(), TlsError> {
        put_u16(output, self.legacy_version.as_u16());
        output.extend_from_slice(&self.random);
        put_vec8(output, &self.session_id)?;
        if let Some(cookie) = &self.cookie {
            put_vec8(output, cookie)?;
        }
        with_len16(output, |output| {
            for suite in &self.cipher_suites {
                put_u16(output, suite.as_u16());
            }
            Ok(())
        })?;
        put_vec8(output, &self.compression_methods)?;
        put_vec16(output, &self.extensions)
    }
}

/// A ServerHello, which in the 1.3 family may also be a HelloRetryRequest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerHello {
    pub legacy_version: ProtocolVersion,
    pub random: [u8; 32],
    pub session_id: Vec<u8>,
    pub cipher_suite: CipherSuite,
    pub compression_method: u8,
    pub extensions: Vec<u8>,
}

impl ServerHello {
    pub fn parse(input: &[u8]) -> IResult<&[u8], ServerHello> {
        let (input, legacy_version) = ProtocolVersion::parse(input)?;
        let (input, random) = fixed::<32>(input)?;
        let (input, session_id) = vec8(input)?;
        if session_id.len() > 32 {
            return Err(Err::Failure(Error::new(input, ErrorKind::LengthValue)));
        }
        let (input, cipher_suite) = CipherSuite::parse(input)?;
        let (input, compression_method) = be_u8(input)?;
        let (input, extensions) = parse_extension_block(input)?;
        Ok((
            input,
            ServerHello {
                legacy_version,
                random,
                session_id: session_id.to_vec(),
                cipher_suite,
                compression_method,
                extensions: extensions.to_vec(),
            },
        ))
    }

    pub fn serialize(&self, output: &mut Vec<u8>) -> Result<(), TlsError> {
        put_u16(output, self.legacy_version.as_u16());
        output.extend_from_slice(&self.random);
        put_vec8(output, &self.session_id)?;
        put_u16(output, self.cipher_suite.as_u16());
        put_u8(output, self.compression_method);
        put_vec16(output, &self.extensions)
    }

    pub fn is_hello_retry_request(&self) -> bool {
        self.random == HRR_RANDOM
    }

    pub fn has_downgrade_sentinel(&self) -> bool {
        self.random[24..] == DOWNGRADE_TLS12
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HelloVerifyRequest {
    pub server_version: ProtocolVersion,
    pub cookie: Vec<u8>,
}

impl HelloVerifyRequest {
    pub fn parse(input: &[u8]) -> IResult<&[u8], HelloVerifyRequest> {
        let (input, server_version) = ProtocolVersion::parse(input)?;
        let (input, cookie) = vec8(input)?;
        Ok((
            input,
            HelloVerifyRequest {
                server_version,
                cookie: cookie.to_vec(),
            },
        ))
    }

    pub fn serialize(&self, output: &mut Vec<u8>) -> Result<(), TlsError> {
        put_u16(output, self.server_version.as_u16());
        put_vec8(output, &self.cookie)
    }
}

/// An absent extension block reads as empty.
fn parse_extension_block(input: &[u8]) -> IResult<&[u8], &[u8]> {
    if input.is_empty() {
        return Ok((input, &[]));
    }
    let (input, block) = vec16(input)?;
    if !input.is_empty() {
        let (_, trailing) = take(input.len())(input)?;
        return Err(Err::Failure(Error::new(trailing, ErrorKind::Eof)));
    }
    Ok((input, block))
}
