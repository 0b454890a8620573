use crate::crypto::CryptoProvider;
use crate::types::{HandshakeType, HashAlgorithm, Mode};

/// Every handshake message of the current handshake, in wire order.
///
/// Kept as raw bytes rather than a running hash since the hash algorithm is
/// only known once the ServerHello picked a suite. Datagram messages are
/// recorded as if unfragmented: the 12 byte header with offset 0 and the
/// fragment length equal to the message length.
#[derive(Debug)]
pub(crate) struct Transcript {
    mode: Mode,
    bytes: Vec<u8>,
    last_start: usize,
}

impl Transcript {
    pub fn new(mode: Mode) -> Self {
        Transcript {
            mode,
            bytes: Vec::new(),
            last_start: 0,
        }
    }

    pub fn push(&mut self, msg_type: HandshakeType, seq: u16, body: &[u8]) {
        self.last_start = self.bytes.len();
        write_header(&mut self.bytes, self.mode, msg_type, seq, body.len());
        self.bytes.extend_from_slice(body);
    }

    pub fn hash(&self, provider: &CryptoProvider, alg: HashAlgorithm) -> Vec<u8> {
        provider.hash(alg, &self.bytes)
    }

    /// Hash of everything before the most recent message.
    pub fn hash_before_last(&self, provider: &CryptoProvider, alg: HashAlgorithm) -> Vec<u8> {
        provider.hash(alg, &self.bytes[..self.last_start])
    }

    /// Hash of the transcript with the last `cut` bytes left off.
    pub fn hash_truncated(&self, provider: &CryptoProvider, alg: HashAlgorithm, cut: usize) -> Vec<u8> {
        let end = self.bytes.len().saturating_sub(cut);
        provider.hash(alg, &self.bytes[..end])
    }

    /// Hash of the transcript followed by a message that is not part of it
    /// yet, with the last `cut` bytes of that message's body left off.
    pub fn hash_with_partial(
        &self,
        provider: &CryptoProvider,
        alg: HashAlgorithm,
        msg_type: HandshakeType,
        body: &[u8],
        cut: usize,
    ) -> Vec<u8> {
        let mut data = self.bytes.clone();
        write_header(&mut data, self.mode, msg_type, 0, body.len());
        data.extend_from_slice(&body[..body.len().saturating_sub(cut)]);
        provider.hash(alg, &data)
    }

    /// Replace everything so far (the first ClientHello) by a synthetic
    /// `message_hash` message, ahead of a HelloRetryRequest.
    pub fn replace_with_message_hash(&mut self, provider: &CryptoProvider, alg: HashAlgorithm) {
        let hash = self.hash(provider, alg);
        self.bytes.clear();
        self.bytes.push(HandshakeType::MessageHash.as_u8());
        self.bytes.extend_from_slice(&[0, 0, hash.len() as u8]);
        self.bytes.extend_from_slice(&hash);
        self.last_start = 0;
    }

    pub fn reset(&mut self) {
        self.bytes.clear();
        self.last_start = 0;
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

fn write_header(out: &mut Vec<u8>, mode: Mode, msg_type: HandshakeType, seq: u16, len: usize) {
    let len = (len as u32).to_be_bytes();
    out.push(msg_type.as_u8());
    out.extend_from_slice(&len[1..]);
    if mode == Mode::Datagram {
        out.extend_from_slice(&seq.to_be_bytes());
        out.extend_from_slice(&[0, 0, 0]);
        out.extend_from_slice(&len[1..]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::rust_crypto;

    #[test]
    fn datagram_header_is_unfragmented() {
        let mut t = Transcript::new(Mode::Datagram);
        t.push(HandshakeType::Finished, 5, &[1, 2, 3]);
        assert_eq!(t.bytes, [20, 0, 0, 3, 0, 5, 0, 0, 0, 0, 0, 3, 1, 2, 3]);
    }

    #[test]
    fn partial_hash_matches_truncated() {
        let p = rust_crypto::default_provider();
        let alg = HashAlgorithm::SHA256;
        let mut t = Transcript::new(Mode::Stream);
        t.push(HandshakeType::ServerHello, 0, &[4; 10]);
        let body = [7u8; 40];
        let before = t.hash_with_partial(&p, alg, HandshakeType::ClientHello, &body, 33);
        t.push(HandshakeType::ClientHello, 0, &body);
        assert_eq!(t.hash_truncated(&p, alg, 33), before);
        assert_ne!(t.hash(&p, alg), before);
    }

    #[test]
    fn message_hash_replacement() {
        let p = rust_crypto::default_provider();
        let alg = HashAlgorithm::SHA256;
        let mut t = Transcript::new(Mode::Stream);
        t.push(HandshakeType::ClientHello, 0, &[1; 50]);
        let ch_hash = t.hash(&p, alg);
        t.replace_with_message_hash(&p, alg);
        assert_eq!(&t.bytes[..4], &[254, 0, 0, 32]);
        assert_eq!(&t.bytes[4..], &ch_hash[..]);
    }

    #[test]
    fn hash_before_last() {
        let p = rust_crypto::default_provider();
        let alg = HashAlgorithm::SHA384;
        let mut t = Transcript::new(Mode::Stream);
        t.push(HandshakeType::ClientHello, 0, &[1; 5]);
        let h1 = t.hash(&p, alg);
        t.push(HandshakeType::Finished, 0, &[2; 12]);
        assert_eq!(t.hash_before_last(&p, alg), h1);
        assert_eq!(h1.len(), 48);
    }
}
