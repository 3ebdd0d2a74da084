use std::fmt;

use nom::bytes::complete::take;
use nom::number::complete::be_u16;
use nom::{Err, IResult};

use crate::types::{ContentType, ProtocolVersion, Sequence};
use crate::util::{be_u48, put_u48};

/// One record of a datagram.
#[derive(PartialEq, Eq, Default, Clone)]
pub struct Record {
    pub content_type: ContentType,
    pub version: ProtocolVersion,
    pub sequence: Sequence,
    /// Plaintext for epoch 0, explicit nonce + ciphertext otherwise.
    pub fragment: Vec<u8>,
}

impl Record {
    /// content_type(1) + version(2) + epoch(2) + seq(6) + length(2)
    pub const HEADER_LEN: usize = 13;

    pub fn new(content_type: ContentType, sequence: Sequence, fragment: Vec<u8>) -> Self {
        Record {
            content_type,
            version: ProtocolVersion::DTLS1_2,
            sequence,
            fragment,
        }
    }

    pub fn parse(input: &[u8]) -> IResult<&[u8], Record> {
        let (input, content_type) = ContentType::parse(input)?;
        let (input, version) = ProtocolVersion::parse(input)?;

        if version != ProtocolVersion::DTLS1_2 {
            return Err(Err::Failure(nom::error::Error::new(
                input,
                nom::error::ErrorKind::Tag,
            )));
        }

        let (input, epoch) = be_u16(input)?;
        let (input, sequence_number) = be_u48(input)?;
        let (input, length) = be_u16(input)?;
        let (rest, fragment) = take(length as usize)(input)?;

        Ok((
            rest,
            Record {
                content_type,
                version,
                sequence: Sequence::new(epoch, sequence_number),
                fragment: fragment.to_vec(),
            },
        ))
    }

    pub fn serialize(&self, out: &mut Vec<u8>) {
        out.push(self.content_type.as_u8());
        self.version.serialize(out);
        out.extend_from_slice(&self.sequence.epoch.to_be_bytes());
        put_u48(out, self.sequence.sequence_number);
        out.extend_from_slice(&(self.fragment.len() as u16).to_be_bytes());
        out.extend_from_slice(&self.fragment);
    }
}

impl fmt::Debug for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Record")
            .field("content_type", &self.content_type)
            .field("sequence", &self.sequence)
            .field("length", &self.fragment.len())
            .finish()
    }
}

/// Split a datagram into records.
///
/// Parsing stops at the first malformed record; records before it are kept.
pub fn parse_datagram(mut datagram: &[u8]) -> Vec<Record> {
    let mut records = Vec::new();
    while !datagram.is_empty() {
        match Record::parse(datagram) {
            Ok((rest, record)) => {
                records.push(record);
                datagram = rest;
            }
            Err(e) => {
                trace!("Stop parsing datagram: {:?}", e);
                break;
            }
        }
    }
    records
}

#[cfg(test)]
mod tests {
    use super::*;

    const RECORD: &[u8] = &[
        0x16, // ContentType::Handshake
        0xFE, 0xFD, // ProtocolVersion::DTLS1_2
        0x00, 0x01, // epoch
        0x00, 0x00, 0x00, 0x00, 0x00, 0x07, // sequence_number
        0x00, 0x03, // length
        0x01, 0x02, 0x03, // fragment
    ];

    #[test]
    fn parse_header_fields() {
        let (rest, record) = Record::parse(RECORD).unwrap();
        assert!(rest.is_empty());
        assert_eq!(record.content_type, ContentType::Handshake);
        assert_eq!(record.sequence, Sequence::new(1, 7));
        assert_eq!(record.fragment, [1, 2, 3]);

        let mut out = Vec::new();
        record.serialize(&mut out);
        assert_eq!(out, RECORD);
    }

    #[test]
    fn rejects_other_versions() {
        let mut bad = RECORD.to_vec();
        bad[2] = 0xFF;
        assert!(Record::parse(&bad).is_err());
    }

    #[test]
    fn datagram_keeps_records_before_garbage() {
        let mut datagram = RECORD.to_vec();
        datagram.extend_from_slice(RECORD);
        datagram.extend_from_slice(&[0x17, 0xFE]);
        let records = parse_datagram(&datagram);
        assert_eq!(records.len(), 2);
    }

    #[test]
    fn truncated_fragment_is_dropped() {
        let records = parse_datagram(&RECORD[..RECORD.len() - 1]);
        assert!(records.is_empty());
    }
}
