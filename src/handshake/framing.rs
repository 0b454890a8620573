//! Handshake message framing.
//!
//! Streams carry `type(1) | length(3) | body`, and a message may span any
//! number of records. Datagrams add `message_seq(2) | fragment_offset(3) |
//! fragment_length(3)`, so every message can be cut into fragments that each
//! fit one datagram, and reassembled in any order.

use std::collections::BTreeMap;

use crate::codec::{put_u16, put_u24};
use crate::types::{HandshakeType, Mode};
use crate::Error;

pub(crate) const STREAM_HEADER_LEN: usize = 4;
pub(crate) const DATAGRAM_HEADER_LEN: usize = 12;

/// Largest handshake body we accept.
const MAX_MESSAGE_LEN: usize = 131072;

/// How far past the next expected message sequence we buffer.
const REORDER_WINDOW: u16 = 16;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct HandshakeMessage {
    pub msg_type: HandshakeType,
    /// Message sequence. Always 0 on streams.
    pub seq: u16,
    /// Epoch of the record completing the message. Always 0 on streams.
    pub epoch: u16,
    pub body: Vec<u8>,
}

/// Output of [`Framer::feed`].
#[derive(Debug, Default)]
pub(crate) struct Fed {
    pub messages: Vec<HandshakeMessage>,
    /// Lowest sequence number of a message we had already delivered.
    pub duplicate: Option<u16>,
}

#[derive(Debug)]
struct Reassembly {
    msg_type: HandshakeType,
    body: Vec<u8>,
    // Sorted, merged [start, end) ranges received so far.
    ranges: Vec<(usize, usize)>,
    epoch: u16,
}

impl Reassembly {
    fn add(&mut self, offset: usize, data: &[u8]) {
        let end = offset + data.len();
        self.body[offset..end].copy_from_slice(data);

        self.ranges.push((offset, end));
        self.ranges.sort_unstable();
        let mut merged: Vec<(usize, usize)> = Vec::with_capacity(self.ranges.len());
        for (s, e) in self.ranges.drain(..) {
            match merged.last_mut() {
                Some(last) if s <= last.1 => last.1 = last.1.max(e),
                _ => merged.push((s, e)),
            }
        }
        self.ranges = merged;
    }

    fn is_complete(&self) -> bool {
        self.body.is_empty() || self.ranges == [(0, self.body.len())]
    }
}

#[derive(Debug)]
pub(crate) struct Framer {
    mode: Mode,
    stream_buf: Vec<u8>,
    pending: BTreeMap<u16, Reassembly>,
    next_send: u16,
    next_recv: u16,
    accept_restart: bool,
}

impl Framer {
    pub fn new(mode: Mode) -> Self {
        Framer {
            mode,
            stream_buf: Vec::new(),
            pending: BTreeMap::new(),
            next_send: 0,
            next_recv: 0,
            accept_restart: false,
        }
    }

    pub fn next_recv(&self) -> u16 {
        self.next_recv
    }

    /// No partial message is buffered.
    pub fn is_empty(&self) -> bool {
        self.stream_buf.is_empty() && self.pending.is_empty()
    }

    /// Start both directions over at sequence 0, for a new handshake on an
    /// established connection.
    pub fn reset_sequences(&mut self) {
        self.next_send = 0;
        self.next_recv = 0;
        self.pending.clear();
        self.accept_restart = false;
    }

    /// Start our send sequence over while keeping receive sequencing, for a
    /// rehandshake the peer opened with a ClientHello we already took.
    pub fn reset_send(&mut self) {
        self.next_send = 0;
    }

    /// Let a peer's protected ClientHello with sequence 0 restart receive
    /// sequencing.
    pub fn set_accept_restart(&mut self, accept: bool) {
        self.accept_restart = accept;
    }

    /// Frame one outgoing message. Datagram messages are cut into fragments
    /// with at most `fragment_limit` bytes of header and body each.
    pub fn encode(
        &mut self,
        msg_type: HandshakeType,
        body: &[u8],
        fragment_limit: usize,
    ) -> (u16, Vec<Vec<u8>>) {
        if self.mode == Mode::Stream {
            let mut out = Vec::with_capacity(STREAM_HEADER_LEN + body.len());
            out.push(msg_type.as_u8());
            put_u24(&mut out, body.len() as u32);
            out.extend_from_slice(body);
            return (0, vec![out]);
        }

        // HelloRequest sits outside the sequence.
        let seq = if msg_type == HandshakeType::HelloRequest {
            0
        } else {
            let seq = self.next_send;
            self.next_send = self.next_send.wrapping_add(1);
            seq
        };

        let chunk = fragment_limit.saturating_sub(DATAGRAM_HEADER_LEN).max(1);
        let mut fragments = Vec::new();
        let mut offset = 0;
        loop {
            let len = chunk.min(body.len() - offset);
            let mut out = Vec::with_capacity(DATAGRAM_HEADER_LEN + len);
            out.push(msg_type.as_u8());
            put_u24(&mut out, body.len() as u32);
            put_u16(&mut out, seq);
            put_u24(&mut out, offset as u32);
            put_u24(&mut out, len as u32);
            out.extend_from_slice(&body[offset..offset + len]);
            fragments.push(out);
            offset += len;
            if offset >= body.len() {
                break;
            }
        }
        (seq, fragments)
    }

    /// Take the payload of one handshake record.
    pub fn feed(&mut self, epoch: u16, payload: &[u8]) -> Result<Fed, Error> {
        match self.mode {
            Mode::Stream => self.feed_stream(payload),
            Mode::Datagram => self.feed_datagram(epoch, payload),
        }
    }

    fn feed_stream(&mut self, payload: &[u8]) -> Result<Fed, Error> {
        if payload.is_empty() {
            return Err(Error::UnexpectedMessage("empty handshake record".into()));
        }
        self.stream_buf.extend_from_slice(payload);

        let mut fed = Fed::default();
        loop {
            let buf = &self.stream_buf;
            if buf.len() < STREAM_HEADER_LEN {
                break;
            }
            let len = u32::from_be_bytes([0, buf[1], buf[2], buf[3]]) as usize;
            if len > MAX_MESSAGE_LEN {
                return Err(Error::IllegalParameter(format!("handshake length {len}")));
            }
            if buf.len() < STREAM_HEADER_LEN + len {
                break;
            }
            let msg_type = HandshakeType::from_u8(buf[0]);
            let body = buf[STREAM_HEADER_LEN..STREAM_HEADER_LEN + len].to_vec();
            self.stream_buf.drain(..STREAM_HEADER_LEN + len);
            fed.messages.push(HandshakeMessage {
                msg_type,
                seq: 0,
                epoch: 0,
                body,
            });
        }
        Ok(fed)
    }

    fn feed_datagram(&mut self, epoch: u16, mut payload: &[u8]) -> Result<Fed, Error> {
        let mut fed = Fed::default();

        while !payload.is_empty() {
            if payload.len() < DATAGRAM_HEADER_LEN {
                return Err(Error::ParseIncomplete);
            }
            let msg_type = HandshakeType::from_u8(payload[0]);
            let length = u32::from_be_bytes([0, payload[1], payload[2], payload[3]]) as usize;
            let seq = u16::from_be_bytes([payload[4], payload[5]]);
            let offset = u32::from_be_bytes([0, payload[6], payload[7], payload[8]]) as usize;
            let frag_len = u32::from_be_bytes([0, payload[9], payload[10], payload[11]]) as usize;

            if payload.len() < DATAGRAM_HEADER_LEN + frag_len {
                return Err(Error::ParseIncomplete);
            }
            if length > MAX_MESSAGE_LEN || offset + frag_len > length {
                return Err(Error::IllegalParameter("handshake fragment out of range".into()));
            }
            let data = &payload[DATAGRAM_HEADER_LEN..DATAGRAM_HEADER_LEN + frag_len];
            payload = &payload[DATAGRAM_HEADER_LEN + frag_len..];

            if msg_type == HandshakeType::HelloRequest {
                if length == 0 {
                    fed.messages.push(HandshakeMessage {
                        msg_type,
                        seq,
                        epoch,
                        body: Vec::new(),
                    });
                }
                continue;
            }

            if self.accept_restart
                && epoch > 0
                && seq == 0
                && msg_type == HandshakeType::ClientHello
                && self.next_recv > 0
            {
                trace!("Peer restarts message sequence");
                self.next_recv = 0;
                self.pending.clear();
                self.accept_restart = false;
            }

            if seq < self.next_recv {
                fed.duplicate = Some(fed.duplicate.map_or(seq, |d| d.min(seq)));
                continue;
            }
            if seq - self.next_recv >= REORDER_WINDOW {
                trace!("Drop fragment of message {} beyond window", seq);
                continue;
            }

            let entry = self.pending.entry(seq).or_insert_with(|| Reassembly {
                msg_type,
                body: vec![0; length],
                ranges: Vec::new(),
                epoch,
            });
            if entry.msg_type != msg_type || entry.body.len() != length {
                return Err(Error::IllegalParameter(format!(
                    "fragments of message {seq} disagree"
                )));
            }
            entry.epoch = entry.epoch.max(epoch);
            entry.add(offset, data);
        }

        while let Some(entry) = self.pending.get(&self.next_recv) {
            if !entry.is_complete() {
                break;
            }
            let seq = self.next_recv;
            let entry = self.pending.remove(&seq).ok_or(Error::ParseIncomplete)?;
            self.next_recv = self.next_recv.wrapping_add(1);
            fed.messages.push(HandshakeMessage {
                msg_type: entry.msg_type,
                seq,
                epoch: entry.epoch,
                body: entry.body,
            });
        }

        Ok(fed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stream_message_across_records() {
        let mut tx = Framer::new(Mode::Stream);
        let mut rx = Framer::new(Mode::Stream);
        let (_, parts) = tx.encode(HandshakeType::Finished, &[9; 12], 0);
        let wire = parts.concat();

        let fed = rx.feed(0, &wire[..3]).unwrap();
        assert!(fed.messages.is_empty());
        assert!(!rx.is_empty());
        let fed = rx.feed(0, &wire[3..]).unwrap();
        assert_eq!(fed.messages.len(), 1);
        assert_eq!(fed.messages[0].msg_type, HandshakeType::Finished);
        assert_eq!(fed.messages[0].body, vec![9; 12]);
        assert!(rx.is_empty());
    }

    #[test]
    fn stream_two_messages_one_record() {
        let mut tx = Framer::new(Mode::Stream);
        let mut rx = Framer::new(Mode::Stream);
        let a = tx.encode(HandshakeType::ServerHelloDone, &[], 0).1.concat();
        let b = tx.encode(HandshakeType::Finished, &[1, 2], 0).1.concat();
        let fed = rx.feed(0, &[a, b].concat()).unwrap();
        assert_eq!(fed.messages.len(), 2);
        assert!(fed.messages[0].body.is_empty());
    }

    #[test]
    fn datagram_fragments_reassemble_out_of_order() {
        let mut tx = Framer::new(Mode::Datagram);
        let mut rx = Framer::new(Mode::Datagram);
        let body: Vec<u8> = (0..100u8).collect();
        let (seq, mut frags) = tx.encode(HandshakeType::Certificate, &body, 12 + 30);
        assert_eq!(seq, 0);
        assert_eq!(frags.len(), 4);

        frags.reverse();
        let mut got = Vec::new();
        for f in &frags {
            got.extend(rx.feed(0, f).unwrap().messages);
        }
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].body, body);
        assert_eq!(rx.next_recv(), 1);
    }

    #[test]
    fn datagram_messages_released_in_order() {
        let mut tx = Framer::new(Mode::Datagram);
        let mut rx = Framer::new(Mode::Datagram);
        let a = tx.encode(HandshakeType::ServerHello, &[1], 1000).1.concat();
        let b = tx.encode(HandshakeType::ServerHelloDone, &[], 1000).1.concat();

        assert!(rx.feed(0, &b).unwrap().messages.is_empty());
        let fed = rx.feed(0, &a).unwrap();
        let types: Vec<_> = fed.messages.iter().map(|m| m.msg_type).collect();
        assert_eq!(
            types,
            [HandshakeType::ServerHello, HandshakeType::ServerHelloDone]
        );

        let fed = rx.feed(0, &a).unwrap();
        assert!(fed.messages.is_empty());
        assert_eq!(fed.duplicate, Some(0));
    }

    #[test]
    fn fragment_beyond_message_rejected() {
        let mut rx = Framer::new(Mode::Datagram);
        // length 4, offset 2, fragment length 4
        let bad = [11, 0, 0, 4, 0, 0, 0, 0, 2, 0, 0, 4, 1, 2, 3, 4];
        assert!(rx.feed(0, &bad).is_err());
    }

    #[test]
    fn restart_only_for_protected_client_hello() {
        let mut tx = Framer::new(Mode::Datagram);
        let mut rx = Framer::new(Mode::Datagram);
        let ch = tx.encode(HandshakeType::ClientHello, &[1], 1000).1.concat();
        rx.feed(0, &ch).unwrap();
        rx.set_accept_restart(true);

        // Retransmission in epoch 0 stays a duplicate.
        assert_eq!(rx.feed(0, &ch).unwrap().duplicate, Some(0));

        let fed = rx.feed(1, &ch).unwrap();
        assert_eq!(fed.messages.len(), 1);
        assert_eq!(fed.messages[0].epoch, 1);
    }

    #[test]
    fn hello_request_outside_sequence() {
        let mut tx = Framer::new(Mode::Datagram);
        let mut rx = Framer::new(Mode::Datagram);
        let hr = tx.encode(HandshakeType::HelloRequest, &[], 1000).1.concat();
        let fed = rx.feed(1, &hr).unwrap();
        assert_eq!(fed.messages[0].msg_type, HandshakeType::HelloRequest);
        assert_eq!(rx.next_recv(), 0);
        let (seq, _) = tx.encode(HandshakeType::ClientHello, &[], 1000);
        assert_eq!(seq, 0);
    }
}
