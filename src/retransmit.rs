//! Flight retransmission for datagram transports.
//!
//! The scheduler owns no timer. It keeps the plaintext of the last flight we
//! sent and two deadlines: one for the flight, one for the whole handshake.
//! The session asks [`FlightScheduler::time_remaining`] how long the caller
//! may wait, and [`FlightScheduler::poll`] decides what happens once time
//! has moved on.
//!
//! Writing a flight does not read the clock. Timers are armed without a
//! start and anchored to the first `now` the caller hands in afterwards.

use std::time::{Duration, Instant};

use crate::types::ContentType;
use crate::Error;

/// A record payload saved for resending.
///
/// Resends are resealed under the epoch the record was first sent in, with a
/// fresh sequence number, so the bytes on the wire differ while the content
/// does not.
#[derive(Debug, Clone)]
pub(crate) struct SavedRecord {
    pub content_type: ContentType,
    pub epoch: u16,
    pub fragment: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SchedulerState {
    Idle,
    /// A flight went out and waits for the next clock reading.
    Armed,
    AwaitingReply { deadline: Instant },
    Abandoned,
}

/// What the caller must do after [`FlightScheduler::poll`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Action {
    Nothing,
    Resend,
}

/// Doubling retransmission timeout with a cap and a retry budget.
#[derive(Debug)]
pub(crate) struct Backoff {
    start_rto: Duration,
    max_rto: Duration,
    retries: usize,
    rto: Duration,
    left: usize,
}

impl Backoff {
    pub fn new(start_rto: Duration, max_rto: Duration, retries: usize) -> Self {
        Self {
            start_rto,
            max_rto,
            retries,
            rto: start_rto,
            left: retries,
        }
    }

    pub fn reset(&mut self) {
        self.rto = self.start_rto;
        self.left = self.retries;
    }

    pub fn rto(&self) -> Duration {
        self.rto
    }

    pub fn attempt(&mut self) {
        let Some(n) = self.left.checked_sub(1) else {
            return;
        };
        self.left = n;
        self.rto = (self.rto * 2).min(self.max_rto);
    }

    pub fn can_retry(&self) -> bool {
        self.left > 0
    }
}

#[derive(Debug)]
pub(crate) struct FlightScheduler {
    state: SchedulerState,
    backoff: Backoff,
    flight: Vec<SavedRecord>,
    flight_no: u8,
    handshake_timeout: Duration,
    handshake_deadline: Option<Instant>,
    handshake_started: bool,
}

impl FlightScheduler {
    pub fn new(
        start_rto: Duration,
        max_rto: Duration,
        retries: usize,
        handshake_timeout: Duration,
    ) -> Self {
        Self {
            state: SchedulerState::Idle,
            backoff: Backoff::new(start_rto, max_rto, retries),
            flight: Vec::new(),
            flight_no: 0,
            handshake_timeout,
            handshake_deadline: None,
            handshake_started: false,
        }
    }

    pub fn state(&self) -> SchedulerState {
        self.state
    }

    /// Start collecting a new flight. The previous flight is forgotten and
    /// its timer cancelled, since starting our next flight means the peer's
    /// reply arrived in full.
    pub fn flight_begin(&mut self) {
        self.flight_no = self.flight_no.wrapping_add(1);
        debug!("Begin flight {}", self.flight_no);
        self.flight.clear();
        self.backoff.reset();
        if self.state != SchedulerState::Abandoned {
            self.state = SchedulerState::Idle;
        }
        self.handshake_started = true;
    }

    pub fn save(&mut self, record: SavedRecord) {
        self.flight.push(record);
    }

    /// The flight is written. A flight that expects a reply arms the timer;
    /// a final flight (or a HelloVerifyRequest) only stays around so peer
    /// retransmissions can be answered.
    pub fn flight_end(&mut self, expect_reply: bool) {
        if self.state == SchedulerState::Abandoned {
            return;
        }
        if expect_reply {
            trace!(
                "Flight {} armed, rto {:.03}s",
                self.flight_no,
                self.backoff.rto().as_secs_f32()
            );
            self.state = SchedulerState::Armed;
        } else {
            self.state = SchedulerState::Idle;
        }
    }

    /// The handshake finished. Stop all timers but keep the last flight.
    pub fn complete(&mut self) {
        self.state = SchedulerState::Idle;
        self.handshake_deadline = None;
        self.handshake_started = false;
    }

    /// Forget everything, ahead of a renegotiation.
    pub fn restart(&mut self) {
        self.flight.clear();
        self.backoff.reset();
        self.state = SchedulerState::Idle;
        self.handshake_deadline = None;
        self.handshake_started = false;
    }

    pub fn saved(&self) -> &[SavedRecord] {
        &self.flight
    }

    /// Start the clocks that wait for a first reading.
    fn anchor(&mut self, now: Instant) {
        if self.handshake_started && self.handshake_deadline.is_none() {
            self.handshake_deadline = Some(now + self.handshake_timeout);
        }
        if self.state == SchedulerState::Armed {
            self.state = SchedulerState::AwaitingReply {
                deadline: now + self.backoff.rto(),
            };
        }
    }

    /// Advance time.
    pub fn poll(&mut self, now: Instant) -> Result<Action, Error> {
        self.anchor(now);
        if self.state == SchedulerState::Abandoned {
            return Err(Error::Timeout("handshake"));
        }

        if let Some(deadline) = self.handshake_deadline {
            if now >= deadline {
                debug!("Handshake budget of {:?} exhausted", self.handshake_timeout);
                self.state = SchedulerState::Abandoned;
                return Err(Error::Timeout("handshake"));
            }
        }

        let SchedulerState::AwaitingReply { deadline } = self.state else {
            return Ok(Action::Nothing);
        };

        if now < deadline {
            return Ok(Action::Nothing);
        }

        if !self.backoff.can_retry() {
            debug!("Flight {} abandoned after retries", self.flight_no);
            self.state = SchedulerState::Abandoned;
            return Err(Error::Timeout("flight"));
        }

        self.backoff.attempt();
        let deadline = now + self.backoff.rto();
        debug!(
            "Flight {} timeout, next rto {:.03}s",
            self.flight_no,
            self.backoff.rto().as_secs_f32()
        );
        self.state = SchedulerState::AwaitingReply { deadline };

        Ok(Action::Resend)
    }

    /// How long until [`FlightScheduler::poll`] has something to do.
    pub fn time_remaining(&mut self, now: Instant) -> Option<Duration> {
        self.anchor(now);
        let flight = match self.state {
            SchedulerState::AwaitingReply { deadline } => Some(deadline),
            SchedulerState::Abandoned => return Some(Duration::ZERO),
            SchedulerState::Idle | SchedulerState::Armed => None,
        };
        let next = match (flight, self.handshake_deadline) {
            (Some(f), Some(h)) => f.min(h),
            (Some(d), None) | (None, Some(d)) => d,
            (None, None) => return None,
        };
        Some(next.saturating_duration_since(now))
    }
}
