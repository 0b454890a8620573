use nom::number::complete::be_u32;
use nom::IResult;

use crate::codec::{put_vec16, put_vec8, vec16, vec8};
use crate::Error;

/// 1.2 family NewSessionTicket (RFC 5077).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewSessionTicket12 {
    pub lifetime_hint: u32,
    pub ticket: Vec<u8>,
}

impl NewSessionTicket12 {
    pub fn parse(input: &[u8]) -> IResult<&[u8], NewSessionTicket12> {
        let (input, lifetime_hint) = be_u32(input)?;
        let (input, ticket) = vec16(input)?;
        Ok((
            input,
            NewSessionTicket12 {
                lifetime_hint,
                ticket: ticket.to_vec(),
            },
        ))
    }

    pub fn serialize(&self, output: &mut Vec<u8>) -> Result<(), Error> {
        output.extend_from_slice(&self.lifetime_hint.to_be_bytes());
        put_vec16(output, &self.ticket)
    }
}

/// 1.3 NewSessionTicket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewSessionTicket13 {
    pub lifetime: u32,
    pub age_add: u32,
    pub nonce: Vec<u8>,
    pub ticket: Vec<u8>,
    pub extensions: Vec<u8>,
}

impl NewSessionTicket13 {
    pub fn parse(input: &[u8]) -> IResult<&[u8], NewSessionTicket13> {
        let (input, lifetime) = be_u32(input)?;
        let (input, age_add) = be_u32(input)?;
        let (input, nonce) = vec8(input)?;
        let (input, ticket) = vec16(input)?;
        let (input, extensions) = vec16(input)?;
        Ok((
            input,
            NewSessionTicket13 {
                lifetime,
                age_add,
                nonce: nonce.to_vec(),
                ticket: ticket.to_vec(),
                extensions: extensions.to_vec(),
            },
        ))
    }

    pub fn serialize(&self, output: &mut Vec<u8>) -> Result<(), Error> {
        output.extend_from_slice(&self.lifetime.to_be_bytes());
        output.extend_from_slice(&self.age_add.to_be_bytes());
        put_vec8(output, &self.nonce)?;
        put_vec16(output, &self.ticket)?;
        put_vec16(output, &self.extensions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tls13_ticket() {
        let nst = NewSessionTicket13 {
            lifetime: 21600,
            age_add: 0xDEADBEEF,
            nonce: vec![0, 1],
            ticket: vec![9; 60],
            extensions: vec![],
        };
        let mut out = Vec::new();
        nst.serialize(&mut out).unwrap();
        let (rest, parsed) = NewSessionTicket13::parse(&out).unwrap();
        assert!(rest.is_empty());
        assert_eq!(parsed, nst);
    }

    #[test]
    fn tls12_ticket_truncated() {
        let nst = NewSessionTicket12 {
            lifetime_hint: 100,
            ticket: vec![3; 10],
        };
        let mut out = Vec::new();
        nst.serialize(&mut out).unwrap();
        assert!(NewSessionTicket12::parse(&out[..out.len() - 1]).is_err());
    }
}
