use nom::error::{Error, ErrorKind};
use nom::number::complete::be_u8;
use nom::{Err, IResult};

use super::DigitallySigned;
use crate::codec::{put_u16, put_u8, put_vec8, vec8};
use crate::types::NamedGroup;
use crate::Error as TlsError;

const NAMED_CURVE: u8 = 3;

/// ECDHE parameters of a 1.2 ServerKeyExchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EcdhParams {
    pub group: NamedGroup,
    pub public: Vec<u8>,
}

impl EcdhParams {
    pub fn parse(input: &[u8]) -> IResult<&[u8], EcdhParams> {
        let (input, curve_type) = be_u8(input)?;
        if curve_type != NAMED_CURVE {
            return Err(Err::Failure(Error::new(input, ErrorKind::Tag)));
        }
        let (input, group) = NamedGroup::parse(input)?;
        let (input, public) = vec8(input)?;
        if public.is_empty() {
            return Err(Err::Failure(Error::new(input, ErrorKind::LengthValue)));
        }
        Ok((
            input,
            EcdhParams {
                group,
                public: public.to_vec(),
            },
        ))
    }

    pub fn serialize(&self, output: &mut Vec<u8>) -> Result<(), TlsError> {
        put_u8(output, NAMED_CURVE);
        put_u16(output, self.group.as_u16());
        put_vec8(output, &self.public)
    }

    /// client_random || server_random || params, the content the server signs.
    pub fn signed_content(
        &self,
        client_random: &[u8; 32],
        server_random: &[u8; 32],
    ) -> Result<Vec<u8>, TlsError> {
        let mut out = Vec::with_capacity(64 + 4 + self.public.len());
        out.extend_from_slice(client_random);
        out.extend_from_slice(server_random);
        self.serialize(&mut out)?;
        Ok(out)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerKeyExchange {
    pub params: EcdhParams,
    pub signed: DigitallySigned,
}

impl ServerKeyExchange {
    pub fn parse(input: &[u8]) -> IResult<&[u8], ServerKeyExchange> {
        let (input, params) = EcdhParams::parse(input)?;
        let (input, signed) = DigitallySigned::parse(input)?;
        Ok((input, ServerKeyExchange { params, signed }))
    }

    pub fn serialize(&self, output: &mut Vec<u8>) -> Result<(), TlsError> {
        self.params.serialize(output)?;
        self.signed.serialize(output)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientKeyExchange {
    pub public: Vec<u8>,
}

impl ClientKeyExchange {
    pub fn parse(input: &[u8]) -> IResult<&[u8], ClientKeyExchange> {
        let (input, public) = vec8(input)?;
        if public.is_empty() {
            return Err(Err::Failure(Error::new(input, ErrorKind::LengthValue)));
        }
        Ok((
            input,
            ClientKeyExchange {
                public: public.to_vec(),
            },
        ))
    }

    pub fn serialize(&self, output: &mut Vec<u8>) -> Result<(), TlsError> {
        put_vec8(output, &self.public)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SignatureScheme;

    #[test]
    fn server_key_exchange() {
        let ske = ServerKeyExchange {
            params: EcdhParams {
                group: NamedGroup::X25519,
                public: vec![5; 32],
            },
            signed: DigitallySigned {
                scheme: SignatureScheme::ECDSA_SECP256R1_SHA256,
                signature: vec![1; 70],
            },
        };
        let mut out = Vec::new();
        ske.serialize(&mut out).unwrap();
        assert_eq!(&out[..4], &[3, 0, 29, 32]);
        let (rest, parsed) = ServerKeyExchange::parse(&out).unwrap();
        assert!(rest.is_empty());
        assert_eq!(parsed, ske);

        let signed = ske.params.signed_content(&[1; 32], &[2; 32]).unwrap();
        assert_eq!(signed.len(), 64 + 4 + 32);
    }

    #[test]
    fn explicit_curves_rejected() {
        assert!(EcdhParams::parse(&[1, 0, 29, 1, 0]).is_err());
    }
}
