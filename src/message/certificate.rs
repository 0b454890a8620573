use nom::error::{Error, ErrorKind};
use nom::number::complete::{be_u16, be_u8};
use nom::{Err, IResult};

use crate::codec::{
    put_u16, put_u8, put_vec16, put_vec24, put_vec8, vec16, vec24, vec8, with_len16, with_len24,
};
use crate::types::SignatureScheme;
use crate::Error as TlsError;

/// `status_request`, the only per-entry extension we read or write.
const STATUS_REQUEST: u16 = 5;

/// `CertificateStatusType.ocsp`
pub const STATUS_TYPE_OCSP: u8 = 1;

/// Certificate message of either family. The 1.3 form carries a request
/// context and per-entry extensions. Of those only an OCSP response on the
/// leaf is kept; the rest are skipped.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Certificate {
    pub context: Vec<u8>,
    pub chain: Vec<Vec<u8>>,
    /// 1.3 only: the stapled OCSP response of the first entry.
    pub leaf_ocsp: Option<Vec<u8>>,
}

impl Certificate {
    pub fn new(chain: Vec<Vec<u8>>) -> Self {
        Certificate {
            context: Vec::new(),
            chain,
            leaf_ocsp: None,
        }
    }

    pub fn parse(input: &[u8], tls13: bool) -> IResult<&[u8], Certificate> {
        let (input, context) = if tls13 {
            let (input, context) = vec8(input)?;
            (input, context.to_vec())
        } else {
            (input, Vec::new())
        };

        let (input, mut list) = vec24(input)?;
        let mut chain = Vec::new();
        let mut leaf_ocsp = None;
        while !list.is_empty() {
            let (rest, cert) = vec24(list)?;
            if cert.is_empty() {
                return Err(Err::Failure(Error::new(list, ErrorKind::LengthValue)));
            }
            let rest = if tls13 {
                let (rest, extensions) = vec16(rest)?;
                if chain.is_empty() {
                    leaf_ocsp = entry_ocsp(extensions)?.1;
                }
                rest
            } else {
                rest
            };
            chain.push(cert.to_vec());
            list = rest;
        }

        Ok((
            input,
            Certificate {
                context,
                chain,
                leaf_ocsp,
            },
        ))
    }

    pub fn serialize(&self, output: &mut Vec<u8>, tls13: bool) -> Result<(), TlsError> {
        if tls13 {
            put_vec8(output, &self.context)?;
        }
        with_len24(output, |output| {
            for (i, cert) in self.chain.iter().enumerate() {
                put_vec24(output, cert)?;
                if !tls13 {
                    continue;
                }
                with_len16(output, |output| {
                    let Some(ocsp) = self.leaf_ocsp.as_ref().filter(|_| i == 0) else {
                        return Ok(());
                    };
                    put_u16(output, STATUS_REQUEST);
                    with_len16(output, |output| {
                        CertificateStatus {
                            response: ocsp.clone(),
                        }
                        .serialize(output)
                    })
                })?;
            }
            Ok(())
        })
    }
}

/// The OCSP response in one entry's extension block, if any.
fn entry_ocsp(mut extensions: &[u8]) -> IResult<&[u8], Option<Vec<u8>>> {
    let mut ocsp = None;
    while !extensions.is_empty() {
        let (rest, id) = be_u16(extensions)?;
        let (rest, body) = vec16(rest)?;
        if id == STATUS_REQUEST {
            let (trailing, status) = CertificateStatus::parse(body)?;
            if !trailing.is_empty() {
                return Err(Err::Failure(Error::new(trailing, ErrorKind::Eof)));
            }
            ocsp = Some(status.response);
        }
        extensions = rest;
    }
    Ok((extensions, ocsp))
}

/// CertificateStatus (RFC 6066). A 1.2 handshake message of its own, and
/// the body of `status_request` in a 1.3 certificate entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateStatus {
    pub response: Vec<u8>,
}

impl CertificateStatus {
    pub fn parse(input: &[u8]) -> IResult<&[u8], CertificateStatus> {
        let (rest, status_type) = be_u8(input)?;
        if status_type != STATUS_TYPE_OCSP {
            return Err(Err::Failure(Error::new(input, ErrorKind::Tag)));
        }
        let (rest, response) = vec24(rest)?;
        if response.is_empty() {
            return Err(Err::Failure(Error::new(input, ErrorKind::LengthValue)));
        }
        Ok((
            rest,
            CertificateStatus {
                response: response.to_vec(),
            },
        ))
    }

    pub fn serialize(&self, output: &mut Vec<u8>) -> Result<(), TlsError> {
        put_u8(output, STATUS_TYPE_OCSP);
        put_vec24(output, &self.response)
    }
}

/// A signature with its scheme. The 1.2 ServerKeyExchange trailer and the
/// whole 1.3 CertificateVerify body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DigitallySigned {
    pub scheme: SignatureScheme,
    pub signature: Vec<u8>,
}

impl DigitallySigned {
    pub fn parse(input: &[u8]) -> IResult<&[u8], DigitallySigned> {
        let (input, scheme) = SignatureScheme::parse(input)?;
        let (input, signature) = vec16(input)?;
        Ok((
            input,
            DigitallySigned {
                scheme,
                signature: signature.to_vec(),
            },
        ))
    }

    pub fn serialize(&self, output: &mut Vec<u8>) -> Result<(), TlsError> {
        put_u16(output, self.scheme.as_u16());
        put_vec16(output, &self.signature)
    }
}

/// The content a 1.3 CertificateVerify signs.
pub fn tls13_signed_content(server: bool, transcript_hash: &[u8]) -> Vec<u8> {
    let context: &[u8] = if server {
        b"TLS 1.3, server CertificateVerify"
    } else {
        b"TLS 1.3, client CertificateVerify"
    };
    let mut out = Vec::with_capacity(64 + context.len() + 1 + transcript_hash.len());
    out.extend_from_slice(&[0x20; 64]);
    out.extend_from_slice(context);
    out.push(0);
    out.extend_from_slice(transcript_hash);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chain_both_families() {
        let cert = Certificate::new(vec![vec![1, 2, 3], vec![4, 5]]);
        for tls13 in [false, true] {
            let mut out = Vec::new();
            cert.serialize(&mut out, tls13).unwrap();
            let (rest, parsed) = Certificate::parse(&out, tls13).unwrap();
            assert!(rest.is_empty());
            assert_eq!(parsed, cert);
        }
    }

    #[test]
    fn leaf_ocsp_rides_in_tls13_entry() {
        let mut cert = Certificate::new(vec![vec![1, 2, 3], vec![4, 5]]);
        cert.leaf_ocsp = Some(vec![0x30, 0x03, 1, 2, 3]);

        let mut out = Vec::new();
        cert.serialize(&mut out, true).unwrap();
        let (_, parsed) = Certificate::parse(&out, true).unwrap();
        assert_eq!(parsed, cert);

        // The 1.2 form has no entry extensions; the staple goes separately.
        let mut out = Vec::new();
        cert.serialize(&mut out, false).unwrap();
        let (_, parsed) = Certificate::parse(&out, false).unwrap();
        assert_eq!(parsed.chain, cert.chain);
        assert_eq!(parsed.leaf_ocsp, None);
    }

    #[test]
    fn certificate_status_needs_ocsp_type() {
        let mut out = Vec::new();
        CertificateStatus {
            response: vec![9; 4],
        }
        .serialize(&mut out)
        .unwrap();
        assert_eq!(out, [1, 0, 0, 4, 9, 9, 9, 9]);
        assert!(CertificateStatus::parse(&out).is_ok());

        out[0] = 2;
        assert!(CertificateStatus::parse(&out).is_err());
        assert!(CertificateStatus::parse(&[1, 0, 0, 0]).is_err());
    }

    #[test]
    fn empty_entry_rejected() {
        // list of one zero length certificate
        let input = [0, 0, 3, 0, 0, 0];
        assert!(Certificate::parse(&input, false).is_err());
    }

    #[test]
    fn signed_content_layout() {
        let c = tls13_signed_content(true, &[0xAB; 32]);
        assert_eq!(&c[..64], &[0x20; 64]);
        assert_eq!(c.len(), 64 + 33 + 1 + 32);
        assert_eq!(c[64 + 33], 0);
    }
}
