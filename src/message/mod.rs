//! Handshake message bodies.
//!
//! Each type parses with `nom` from a complete, reassembled body and
//! serializes into a `Vec<u8>`. Handshake headers are the business of the
//! framing layer.

mod certificate;
mod hello;
mod key_exchange;
mod ticket;

pub use certificate::{tls13_signed_content, Certificate, CertificateStatus, DigitallySigned};
pub use hello::{ClientHello, HelloVerifyRequest, ServerHello};
pub use hello::{DOWNGRADE_TLS12, HRR_RANDOM};
pub use key_exchange::{ClientKeyExchange, EcdhParams, ServerKeyExchange};
pub use ticket::{NewSessionTicket12, NewSessionTicket13};

use nom::error::{Error as NomError, ErrorKind};
use nom::number::complete::be_u8;
use nom::{Err, IResult};

use crate::codec::put_vec16;
use crate::codec::vec16;
use crate::types::{AlertDescription, AlertLevel};
use crate::Error;

/// Run `parser` over a whole message body, rejecting trailing bytes.
pub(crate) fn parse_body<'a, T>(
    input: &'a [u8],
    parser: impl FnOnce(&'a [u8]) -> IResult<&'a [u8], T>,
) -> Result<T, Error> {
    let (rest, value) = parser(input)?;
    if !rest.is_empty() {
        return Err(Error::ParseError(ErrorKind::Eof));
    }
    Ok(value)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptedExtensions {
    pub extensions: Vec<u8>,
}

impl EncryptedExtensions {
    pub fn parse(input: &[u8]) -> IResult<&[u8], EncryptedExtensions> {
        let (input, extensions) = vec16(input)?;
        Ok((
            input,
            EncryptedExtensions {
                extensions: extensions.to_vec(),
            },
        ))
    }

    pub fn serialize(&self, output: &mut Vec<u8>) -> Result<(), Error> {
        put_vec16(output, &self.extensions)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyUpdate {
    NotRequested,
    Requested,
}

impl KeyUpdate {
    pub fn parse(input: &[u8]) -> IResult<&[u8], KeyUpdate> {
        let (rest, v) = be_u8(input)?;
        let k = match v {
            0 => KeyUpdate::NotRequested,
            1 => KeyUpdate::Requested,
            _ => return Err(Err::Failure(NomError::new(input, ErrorKind::Tag))),
        };
        Ok((rest, k))
    }

    pub fn serialize(&self, output: &mut Vec<u8>) {
        output.push(match self {
            KeyUpdate::NotRequested => 0,
            KeyUpdate::Requested => 1,
        });
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Alert {
    pub level: AlertLevel,
    pub description: AlertDescription,
}

impl Alert {
    pub fn parse(input: &[u8]) -> IResult<&[u8], Alert> {
        let (input, level) = be_u8(input)?;
        let (input, description) = be_u8(input)?;
        Ok((
            input,
            Alert {
                level: AlertLevel::from_u8(level),
                description: AlertDescription::from_u8(description),
            },
        ))
    }

    pub fn serialize(&self, output: &mut Vec<u8>) {
        output.push(self.level.as_u8());
        output.push(self.description.as_u8());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_body_rejects_trailing() {
        assert!(parse_body(&[1, 0], KeyUpdate::parse).is_err());
        assert_eq!(parse_body(&[1], KeyUpdate::parse).unwrap(), KeyUpdate::Requested);
        assert!(parse_body(&[2], KeyUpdate::parse).is_err());
    }

    #[test]
    fn alert() {
        let (_, a) = Alert::parse(&[1, 100]).unwrap();
        assert_eq!(a.level, AlertLevel::Warning);
        assert_eq!(a.description, AlertDescription::NoRenegotiation);
    }
}
