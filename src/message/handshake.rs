use std::collections::BTreeMap;

use nom::bytes::complete::take;
use nom::number::complete::{be_u16, be_u24};
use nom::IResult;

use crate::types::HandshakeType;
use crate::util::put_u24;
use crate::Error;

/// Messages further ahead than this are not buffered.
const MAX_PENDING_MESSAGES: u16 = 8;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub msg_type: HandshakeType,
    pub length: u32,
    pub message_seq: u16,
    pub fragment_offset: u32,
    pub fragment_length: u32,
}

impl Header {
    pub const LEN: usize = 12;

    pub fn parse(input: &[u8]) -> IResult<&[u8], Header> {
        let (input, msg_type) = nom::number::complete::be_u8(input)?;
        let (input, length) = be_u24(input)?;
        let (input, message_seq) = be_u16(input)?;
        let (input, fragment_offset) = be_u24(input)?;
        let (input, fragment_length) = be_u24(input)?;

        Ok((
            input,
            Header {
                msg_type: HandshakeType::from_u8(msg_type),
                length,
                message_seq,
                fragment_offset,
                fragment_length,
            },
        ))
    }

    pub fn serialize(&self, out: &mut Vec<u8>) {
        out.push(self.msg_type.as_u8());
        put_u24(out, self.length);
        out.extend_from_slice(&self.message_seq.to_be_bytes());
        put_u24(out, self.fragment_offset);
        put_u24(out, self.fragment_length);
    }
}

/// A handshake fragment as carried in one record.
#[derive(Debug, Clone)]
pub struct Fragment {
    pub header: Header,
    pub body: Vec<u8>,
}

impl Fragment {
    pub fn parse(input: &[u8]) -> IResult<&[u8], Fragment> {
        let (input, header) = Header::parse(input)?;
        let end = header.fragment_offset as u64 + header.fragment_length as u64;
        if end > header.length as u64 {
            return Err(nom::Err::Failure(nom::error::Error::new(
                input,
                nom::error::ErrorKind::Verify,
            )));
        }
        let (input, body) = take(header.fragment_length as usize)(input)?;
        Ok((
            input,
            Fragment {
                header,
                body: body.to_vec(),
            },
        ))
    }
}

/// A complete handshake message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub msg_type: HandshakeType,
    pub message_seq: u16,
    pub body: Vec<u8>,
}

impl Message {
    pub fn new(msg_type: HandshakeType, message_seq: u16, body: Vec<u8>) -> Self {
        Message {
            msg_type,
            message_seq,
            body,
        }
    }

    /// The unfragmented encoding, which is what goes into the transcript.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(Header::LEN + self.body.len());
        self.header(0, self.body.len()).serialize(&mut out);
        out.extend_from_slice(&self.body);
        out
    }

    fn header(&self, offset: usize, len: usize) -> Header {
        Header {
            msg_type: self.msg_type,
            length: self.body.len() as u32,
            message_seq: self.message_seq,
            fragment_offset: offset as u32,
            fragment_length: len as u32,
        }
    }

    /// Split into serialized fragments whose bodies are at most `max_body` bytes.
    pub fn fragments(&self, max_body: usize) -> Vec<Vec<u8>> {
        let max_body = max_body.max(1);
        if self.body.is_empty() {
            let mut out = Vec::with_capacity(Header::LEN);
            self.header(0, 0).serialize(&mut out);
            return vec![out];
        }

        self.body
            .chunks(max_body)
            .enumerate()
            .map(|(i, chunk)| {
                let mut out = Vec::with_capacity(Header::LEN + chunk.len());
                self.header(i * max_body, chunk.len()).serialize(&mut out);
                out.extend_from_slice(chunk);
                out
            })
            .collect()
    }
}

/// Outcome of feeding a fragment to the [`Reassembler`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Insert {
    /// Buffered towards a current or future message.
    Accepted,
    /// Belongs to a message that was already delivered, i.e. the peer
    /// retransmitted.
    Old,
}

#[derive(Debug)]
struct Partial {
    msg_type: HandshakeType,
    data: Vec<u8>,
    // Sorted, non-overlapping covered ranges.
    covered: Vec<(u32, u32)>,
}

impl Partial {
    fn add(&mut self, offset: u32, body: &[u8]) {
        let start = offset as usize;
        self.data[start..start + body.len()].copy_from_slice(body);

        let mut range = (offset, offset + body.len() as u32);
        let mut merged = Vec::with_capacity(self.covered.len() + 1);
        for &(s, e) in &self.covered {
            if e < range.0 || s > range.1 {
                merged.push((s, e));
            } else {
                range = (range.0.min(s), range.1.max(e));
            }
        }
        merged.push(range);
        merged.sort_unstable();
        self.covered = merged;
    }

    fn is_complete(&self) -> bool {
        self.data.is_empty() || self.covered == [(0, self.data.len() as u32)]
    }
}

/// Collects handshake fragments and hands out complete messages in
/// message_seq order.
#[derive(Debug)]
pub struct Reassembler {
    next_seq: u16,
    max_len: usize,
    pending: BTreeMap<u16, Partial>,
}

impl Reassembler {
    pub fn new(next_seq: u16, max_len: usize) -> Self {
        Reassembler {
            next_seq,
            max_len,
            pending: BTreeMap::new(),
        }
    }

    pub fn next_seq(&self) -> u16 {
        self.next_seq
    }

    pub fn insert(&mut self, fragment: Fragment) -> Result<Insert, Error> {
        let header = &fragment.header;

        if header.message_seq < self.next_seq {
            return Ok(Insert::Old);
        }
        if header.message_seq - self.next_seq >= MAX_PENDING_MESSAGES {
            return Err(Error::Record(format!(
                "handshake message_seq {} too far ahead of {}",
                header.message_seq, self.next_seq
            )));
        }
        if header.length as usize > self.max_len {
            return Err(Error::Record(format!(
                "handshake message of {} bytes exceeds {}",
                header.length, self.max_len
            )));
        }

        let partial = self
            .pending
            .entry(header.message_seq)
            .or_insert_with(|| Partial {
                msg_type: header.msg_type,
                data: vec![0; header.length as usize],
                covered: Vec::new(),
            });

        if partial.msg_type != header.msg_type || partial.data.len() != header.length as usize {
            return Err(Error::Record(format!(
                "inconsistent fragment for message_seq {}",
                header.message_seq
            )));
        }

        partial.add(header.fragment_offset, &fragment.body);
        Ok(Insert::Accepted)
    }

    /// Take the next message if all of its fragments have arrived.
    pub fn pop(&mut self) -> Option<Message> {
        let complete = self.pending.get(&self.next_seq)?.is_complete();
        if !complete {
            return None;
        }
        let partial = self.pending.remove(&self.next_seq)?;
        let message = Message::new(partial.msg_type, self.next_seq, partial.data);
        self.next_seq = self.next_seq.wrapping_add(1);
        Some(message)
    }
}
