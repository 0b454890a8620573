/// Sliding anti-replay window for datagram record sequence numbers.
///
/// Tracks the highest authenticated sequence number and a 64-bit bitmap of
/// the ones just below it. One window exists per epoch. Checking and marking
/// are split so a record only enters the window after it authenticated.
#[derive(Debug, Default)]
pub struct ReplayWindow {
    max_seq: Option<u64>,
    bitmap: u64,
}

impl ReplayWindow {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `seq` would be accepted: newer than the window or inside it and unseen.
    pub fn is_fresh(&self, seq: u64) -> bool {
        let Some(max) = self.max_seq else {
            return true;
        };
        if seq > max {
            return true;
        }
        let offset = max - seq;
        offset < 64 && self.bitmap & (1 << offset) == 0
    }

    /// Record `seq` as seen. Call only after the record authenticated.
    pub fn mark(&mut self, seq: u64) {
        match self.max_seq {
            None => {
                self.max_seq = Some(seq);
                self.bitmap = 1;
            }
            Some(max) if seq > max => {
                let shift = seq - max;
                self.bitmap = if shift >= 64 { 0 } else { self.bitmap << shift };
                self.bitmap |= 1;
                self.max_seq = Some(seq);
            }
            Some(max) => {
                let offset = max - seq;
                if offset < 64 {
                    self.bitmap |= 1 << offset;
                }
            }
        }
    }

    /// Check and mark in one go. Returns false for a replay.
    pub fn check_and_update(&mut self, seq: u64) -> bool {
        if !self.is_fresh(seq) {
            return false;
        }
        self.mark(seq);
        true
    }
}
