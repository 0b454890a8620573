use nom::bytes::complete::take;
use nom::number::complete::be_u16;
use nom::IResult;

use crate::codec::{be_u48, put_u16, put_u48};
use crate::types::{ContentType, ProtocolVersion};

pub(crate) const STREAM_HEADER_LEN: usize = 5;
pub(crate) const DATAGRAM_HEADER_LEN: usize = 13;

/// Largest plaintext a record may carry.
pub(crate) const MAX_PLAINTEXT: usize = 1 << 14;

/// Largest ciphertext fragment accepted (RFC 5246 6.2.3).
pub(crate) const MAX_CIPHERTEXT: usize = MAX_PLAINTEXT + 2048;

/// Largest sequence number in a datagram record header.
pub(crate) const MAX_DATAGRAM_SEQ: u64 = (1 << 48) - 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct RecordHeader {
    pub content_type: ContentType,
    pub version: ProtocolVersion,
    /// Zero on stream transports.
    pub epoch: u16,
    /// Explicit on datagram transports, implicit (filled in by the reader)
    /// on streams.
    pub sequence: u64,
    pub length: u16,
}

impl RecordHeader {
    pub fn len(datagram: bool) -> usize {
        if datagram {
            DATAGRAM_HEADER_LEN
        } else {
            STREAM_HEADER_LEN
        }
    }

    pub fn parse(input: &[u8], datagram: bool) -> IResult<&[u8], RecordHeader> {
        let (input, content_type) = ContentType::parse(input)?;
        let (input, version) = ProtocolVersion::parse(input)?;
        let (input, epoch, sequence) = if datagram {
            let (input, epoch) = be_u16(input)?;
            let (input, sequence) = be_u48(input)?;
            (input, epoch, sequence)
        } else {
            (input, 0, 0)
        };
        let (input, length) = be_u16(input)?;
        Ok((
            input,
            RecordHeader {
                content_type,
                version,
                epoch,
                sequence,
                length,
            },
        ))
    }

    pub fn serialize(&self, output: &mut Vec<u8>, datagram: bool) {
        output.push(self.content_type.as_u8());
        put_u16(output, self.version.as_u16());
        if datagram {
            put_u16(output, self.epoch);
            put_u48(output, self.sequence);
        }
        put_u16(output, self.length);
    }

    /// The 64 bit sequence number used for nonces and associated data.
    /// Datagram records fold the epoch into the top 16 bits.
    pub fn aead_sequence(&self, datagram: bool) -> u64 {
        if datagram {
            ((self.epoch as u64) << 48) | self.sequence
        } else {
            self.sequence
        }
    }
}

/// A record as read off the wire, before decryption.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct RawRecord {
    pub header: RecordHeader,
    pub fragment: Vec<u8>,
}

impl RawRecord {
    pub fn parse(input: &[u8], datagram: bool) -> IResult<&[u8], RawRecord> {
        let (input, header) = RecordHeader::parse(input, datagram)?;
        let (input, fragment) = take(header.length as usize)(input)?;
        Ok((
            input,
            RawRecord {
                header,
                fragment: fragment.to_vec(),
            },
        ))
    }
}

/// Split one datagram into its records. A datagram ending in a truncated
/// record is discarded whole.
pub(crate) fn split_datagram(packet: &[u8]) -> Option<Vec<RawRecord>> {
    let mut records = Vec::new();
    let mut rest = packet;
    while !rest.is_empty() {
        match RawRecord::parse(rest, true) {
            Ok((r, record)) => {
                records.push(record);
                rest = r;
            }
            Err(_) => return None,
        }
    }
    Some(records)
}

#[cfg(test)]
mod tests {
    use super::*;

    const RECORD: &[u8] = &[
        0x16, // ContentType::Handshake
        0xFE, 0xFD, // DTLS 1.2
        0x00, 0x01, // epoch
        0x00, 0x00, 0x00, 0x00, 0x00, 0x05, // sequence
        0x00, 0x03, // length
        0x01, 0x02, 0x03,
    ];

    #[test]
    fn datagram_header() {
        let (rest, record) = RawRecord::parse(RECORD, true).unwrap();
        assert!(rest.is_empty());
        assert_eq!(record.header.epoch, 1);
        assert_eq!(record.header.sequence, 5);
        assert_eq!(record.header.aead_sequence(true), (1 << 48) | 5);
        assert_eq!(record.fragment, [1, 2, 3]);

        let mut out = Vec::new();
        record.header.serialize(&mut out, true);
        out.extend_from_slice(&record.fragment);
        assert_eq!(out, RECORD);
    }

    #[test]
    fn split_two_records() {
        let mut packet = RECORD.to_vec();
        packet.extend_from_slice(RECORD);
        assert_eq!(split_datagram(&packet).unwrap().len(), 2);
    }

    #[test]
    fn truncated_datagram_discarded() {
        let mut packet = RECORD.to_vec();
        packet.extend_from_slice(&RECORD[..RECORD.len() - 1]);
        assert!(split_datagram(&packet).is_none());
    }
}
