//! The record layer.
//!
//! Incoming bytes are split into records, checked against the replay window
//! (datagrams only), decrypted with the current read state and handed up one
//! at a time. Outgoing payloads are chunked to the maximum fragment length,
//! sealed with the current write state and queued for the transport. In
//! datagram mode several records are packed into one datagram up to the MTU.
//!
//! Cipher state changes only take effect for the next record: the session
//! processes one record, runs the handshake, and only then asks for another.

mod cipher;
mod header;

pub(crate) use cipher::CipherState;
pub(crate) use header::{split_datagram, RawRecord, RecordHeader};
pub(crate) use header::{DATAGRAM_HEADER_LEN, MAX_PLAINTEXT};

use std::collections::VecDeque;

use header::{MAX_CIPHERTEXT, MAX_DATAGRAM_SEQ};

use crate::types::{ContentType, Mode, ProtocolVersion};
use crate::window::ReplayWindow;
use crate::Error;

/// A record that passed decryption.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Plaintext {
    pub content_type: ContentType,
    pub epoch: u16,
    pub payload: Vec<u8>,
}

#[derive(Debug, Default)]
struct ReadState {
    epoch: u16,
    seq: u64,
    cipher: Option<CipherState>,
    window: ReplayWindow,
    // Peer retransmissions of the unprotected first flight.
    epoch0_window: ReplayWindow,
}

#[derive(Debug, Default)]
struct WriteEpoch {
    epoch: u16,
    seq: u64,
    cipher: Option<CipherState>,
}

#[derive(Debug, Default)]
struct WriteState {
    current: WriteEpoch,
    // Kept so a flight spanning a cipher change can be resent.
    previous: Option<WriteEpoch>,
}

#[derive(Debug)]
pub(crate) struct RecordLayer {
    mode: Mode,
    version: ProtocolVersion,
    read: ReadState,
    write: WriteState,
    max_fragment: usize,
    /// Largest plaintext we accept from the peer.
    max_plaintext_in: usize,
    mtu: usize,
    max_queue_rx: usize,
    rx_stream: Vec<u8>,
    rx_records: VecDeque<RawRecord>,
    rx_future: Vec<RawRecord>,
    tx: VecDeque<Vec<u8>>,
    tx_packing: bool,
}

impl RecordLayer {
    pub fn new(mode: Mode, max_fragment: usize, mtu: usize, max_queue_rx: usize) -> Self {
        let version = match mode {
            Mode::Stream => ProtocolVersion::Tls12,
            Mode::Datagram => ProtocolVersion::Dtls12,
        };
        RecordLayer {
            mode,
            version,
            read: ReadState::default(),
            write: WriteState::default(),
            max_fragment: max_fragment.min(MAX_PLAINTEXT),
            max_plaintext_in: MAX_PLAINTEXT,
            mtu,
            max_queue_rx,
            rx_stream: Vec::new(),
            rx_records: VecDeque::new(),
            rx_future: Vec::new(),
            tx: VecDeque::new(),
            tx_packing: false,
        }
    }

    fn datagram(&self) -> bool {
        self.mode == Mode::Datagram
    }

    pub fn read_epoch(&self) -> u16 {
        self.read.epoch
    }

    pub fn write_epoch(&self) -> u16 {
        self.write.current.epoch
    }

    pub fn is_read_protected(&self) -> bool {
        self.read.cipher.is_some()
    }

    pub fn is_write_protected(&self) -> bool {
        self.write.current.cipher.is_some()
    }

    // ========================================================================
    // Cipher changes
    // ========================================================================

    /// Start reading with `cipher` from the next record on.
    pub fn install_read(&mut self, cipher: CipherState) -> Result<(), Error> {
        let epoch = if self.datagram() {
            self.read
                .epoch
                .checked_add(1)
                .ok_or_else(|| Error::SecurityError("read epoch exhausted".into()))?
        } else {
            0
        };
        trace!("Read epoch {} -> {}", self.read.epoch, epoch);
        self.read.epoch = epoch;
        self.read.seq = 0;
        self.read.cipher = Some(cipher);
        self.read.window = ReplayWindow::new();

        if self.datagram() {
            // Records of the new epoch that arrived early go first.
            let (ready, keep): (Vec<_>, Vec<_>) = std::mem::take(&mut self.rx_future)
                .into_iter()
                .partition(|r| r.header.epoch == epoch);
            self.rx_future = keep;
            for record in ready.into_iter().rev() {
                self.rx_records.push_front(record);
            }
        }
        Ok(())
    }

    /// Start writing with `cipher` from the next record on.
    pub fn install_write(&mut self, cipher: CipherState) -> Result<(), Error> {
        let epoch = if self.datagram() {
            self.write
                .current
                .epoch
                .checked_add(1)
                .ok_or_else(|| Error::SecurityError("write epoch exhausted".into()))?
        } else {
            0
        };
        trace!("Write epoch {} -> {}", self.write.current.epoch, epoch);
        let previous = std::mem::replace(
            &mut self.write.current,
            WriteEpoch {
                epoch,
                seq: 0,
                cipher: Some(cipher),
            },
        );
        self.write.previous = Some(previous);
        Ok(())
    }

    // ========================================================================
    // Receiving
    // ========================================================================

    /// Hand received transport bytes to the layer. In datagram mode `data`
    /// is exactly one datagram.
    pub fn feed(&mut self, data: &[u8]) -> Result<(), Error> {
        if !self.datagram() {
            self.rx_stream.extend_from_slice(data);
            return Ok(());
        }

        let Some(records) = split_datagram(data) else {
            debug!("Discard malformed datagram of {} bytes", data.len());
            return Ok(());
        };
        for record in records {
            if self.rx_records.len() >= self.max_queue_rx {
                debug!("Receive queue full, drop record");
                break;
            }
            self.rx_records.push_back(record);
        }
        Ok(())
    }

    /// Whether undecoded input is waiting.
    pub fn has_pending_input(&self) -> bool {
        if self.datagram() {
            !self.rx_records.is_empty()
        } else {
            self.stream_record_ready()
        }
    }

    fn stream_record_ready(&self) -> bool {
        let buf = &self.rx_stream;
        if buf.len() < header::STREAM_HEADER_LEN {
            return false;
        }
        let len = u16::from_be_bytes([buf[3], buf[4]]) as usize;
        buf.len() >= header::STREAM_HEADER_LEN + len
    }

    /// The next record that decrypted, if any is complete.
    pub fn next_record(&mut self) -> Result<Option<Plaintext>, Error> {
        if self.datagram() {
            self.next_datagram_record()
        } else {
            self.next_stream_record()
        }
    }

    fn next_stream_record(&mut self) -> Result<Option<Plaintext>, Error> {
        if self.rx_stream.len() < header::STREAM_HEADER_LEN {
            return Ok(None);
        }
        let (_, mut header) = RecordHeader::parse(&self.rx_stream, false)?;

        if header.length as usize > MAX_CIPHERTEXT {
            return Err(Error::RecordOverflow);
        }
        let total = header::STREAM_HEADER_LEN + header.length as usize;
        if self.rx_stream.len() < total {
            return Ok(None);
        }
        if let ProtocolVersion::Unknown(v) = header.version {
            if v >> 8 != 0x03 {
                return Err(Error::ProtocolVersion);
            }
        }
        if let ContentType::Unknown(t) = header.content_type {
            return Err(Error::UnexpectedMessage(format!("record type {t}")));
        }

        let fragment: Vec<u8> = self.rx_stream.drain(..total).skip(header::STREAM_HEADER_LEN).collect();
        header.sequence = self.read.seq;

        let (content_type, payload) = match &mut self.read.cipher {
            // Middlebox compatibility CCS travels in the clear under 1.3 keys.
            Some(c) if c.is_tls13() && header.content_type == ContentType::ChangeCipherSpec => {
                (ContentType::ChangeCipherSpec, fragment)
            }
            Some(c) => {
                if c.is_tls13() && header.content_type != ContentType::ApplicationData {
                    return Err(Error::UnexpectedMessage(format!(
                        "unprotected {:?} record",
                        header.content_type
                    )));
                }
                let opened = c.open(&header, false, &fragment)?;
                self.read.seq = self
                    .read
                    .seq
                    .checked_add(1)
                    .ok_or_else(|| Error::SecurityError("read sequence exhausted".into()))?;
                opened
            }
            None => {
                self.read.seq += 1;
                (header.content_type, fragment)
            }
        };
        if payload.len() > self.max_plaintext_in {
            return Err(Error::RecordOverflow);
        }

        Ok(Some(Plaintext {
            content_type,
            epoch: 0,
            payload,
        }))
    }

    fn next_datagram_record(&mut self) -> Result<Option<Plaintext>, Error> {
        while let Some(record) = self.rx_records.pop_front() {
            let header = record.header;
            let epoch = self.read.epoch;

            if header.epoch == epoch {
                if !self.read.window.is_fresh(header.sequence) {
                    debug!("Drop replayed record epoch {} seq {}", epoch, header.sequence);
                    continue;
                }
                let opened = match &mut self.read.cipher {
                    Some(c) => c.open(&header, true, &record.fragment),
                    None => Ok((header.content_type, record.fragment)),
                };
                match opened {
                    Ok((_, payload)) if payload.len() > self.max_plaintext_in => {
                        debug!(
                            "Discard record epoch {} seq {}: {} bytes over the fragment limit",
                            epoch,
                            header.sequence,
                            payload.len()
                        );
                        continue;
                    }
                    Ok((content_type, payload)) => {
                        self.read.window.mark(header.sequence);
                        return Ok(Some(Plaintext {
                            content_type,
                            epoch,
                            payload,
                        }));
                    }
                    Err(e) => {
                        debug!("Discard record epoch {} seq {}: {}", epoch, header.sequence, e);
                        continue;
                    }
                }
            }

            if Some(header.epoch) == epoch.checked_add(1) {
                if self.rx_future.len() < self.max_queue_rx {
                    trace!("Buffer record of epoch {}", header.epoch);
                    self.rx_future.push(record);
                } else {
                    debug!("Future epoch buffer full, drop record");
                }
                continue;
            }

            if header.epoch == 0 && epoch > 0 {
                if !self.read.epoch0_window.check_and_update(header.sequence) {
                    continue;
                }
                return Ok(Some(Plaintext {
                    content_type: header.content_type,
                    epoch: 0,
                    payload: record.fragment,
                }));
            }

            trace!("Drop record of stale epoch {}", header.epoch);
        }
        Ok(None)
    }

    // ========================================================================
    // Sending
    // ========================================================================

    /// Largest payload that fits one record in one datagram under the current
    /// write state.
    pub fn datagram_payload_limit(&self) -> usize {
        let overhead = self
            .write
            .current
            .cipher
            .as_ref()
            .map(|c| c.overhead())
            .unwrap_or(0);
        self.mtu
            .saturating_sub(DATAGRAM_HEADER_LEN + overhead)
            .min(self.max_fragment)
    }

    pub fn max_fragment(&self) -> usize {
        self.max_fragment
    }

    /// Apply a negotiated maximum fragment length to both directions.
    pub fn set_fragment_limit(&mut self, len: usize) {
        debug!("Fragment limit {}", len);
        self.max_fragment = self.max_fragment.min(len);
        self.max_plaintext_in = len.min(MAX_PLAINTEXT);
    }

    /// Seal `payload` under the current write epoch, split at the maximum
    /// fragment length.
    pub fn seal(&mut self, content_type: ContentType, payload: &[u8]) -> Result<(), Error> {
        if payload.is_empty() {
            let epoch = self.write.current.epoch;
            return self.seal_one(epoch, content_type, payload);
        }
        for chunk in payload.chunks(self.max_fragment) {
            let epoch = self.write.current.epoch;
            self.seal_one(epoch, content_type, chunk)?;
        }
        Ok(())
    }

    /// Seal one record under `epoch`, which must be the current or the
    /// previous write epoch. Returns false if that epoch is gone.
    pub fn seal_in_epoch(
        &mut self,
        epoch: u16,
        content_type: ContentType,
        payload: &[u8],
    ) -> Result<bool, Error> {
        let known = self.write.current.epoch == epoch
            || self.write.previous.as_ref().map(|p| p.epoch) == Some(epoch);
        if !known {
            return Ok(false);
        }
        self.seal_one(epoch, content_type, payload)?;
        Ok(true)
    }

    fn seal_one(&mut self, epoch: u16, content_type: ContentType, payload: &[u8]) -> Result<(), Error> {
        let datagram = self.datagram();
        let version = self.version;

        let state = if self.write.current.epoch == epoch {
            &mut self.write.current
        } else {
            match self.write.previous.as_mut() {
                Some(p) if p.epoch == epoch => p,
                _ => return Err(Error::SecurityError(format!("no write state for epoch {epoch}"))),
            }
        };

        if datagram && state.seq > MAX_DATAGRAM_SEQ {
            return Err(Error::SecurityError("write sequence exhausted".into()));
        }

        let mut header = RecordHeader {
            content_type,
            version,
            epoch: state.epoch,
            sequence: state.seq,
            length: 0,
        };

        let fragment = match &mut state.cipher {
            Some(c) => {
                let (outer, fragment) = c.seal(&header, datagram, payload)?;
                header.content_type = outer;
                fragment
            }
            None => payload.to_vec(),
        };
        state.seq = state
            .seq
            .checked_add(1)
            .ok_or_else(|| Error::SecurityError("write sequence exhausted".into()))?;

        header.length = fragment.len() as u16;
        let mut record = Vec::with_capacity(RecordHeader::len(datagram) + fragment.len());
        header.serialize(&mut record, datagram);
        record.extend_from_slice(&fragment);

        self.queue(record);
        Ok(())
    }

    fn queue(&mut self, record: Vec<u8>) {
        if self.datagram() {
            if self.tx_packing {
                if let Some(last) = self.tx.back_mut() {
                    if last.len() + record.len() <= self.mtu {
                        last.extend_from_slice(&record);
                        return;
                    }
                }
            }
            self.tx.push_back(record);
            self.tx_packing = true;
        } else {
            match self.tx.back_mut() {
                Some(last) if last.len() + record.len() <= 4 * MAX_PLAINTEXT => {
                    last.extend_from_slice(&record)
                }
                _ => self.tx.push_back(record),
            }
        }
    }

    /// Close the datagram being packed.
    pub fn end_datagram(&mut self) {
        self.tx_packing = false;
    }

    pub fn front_tx(&self) -> Option<&[u8]> {
        self.tx.front().map(|v| v.as_slice())
    }

    pub fn pop_tx(&mut self) {
        self.tx.pop_front();
        if self.tx.is_empty() {
            self.tx_packing = false;
        }
    }

    pub fn has_tx(&self) -> bool {
        !self.tx.is_empty()
    }
}
