//! Read and write halves of an established session.
//!
//! Both halves share the session behind a mutex. Each call takes the lock
//! for as long as the session needs to make progress, so the transport must
//! be non-blocking: a `pull` that parks the reader thread would hold off the
//! writer until data arrives.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use crate::session::{Received, Session, Status, Transport};
use crate::types::{AlertDescription, AlertLevel};
use crate::Error;

type Shared<T> = Arc<Mutex<Session<T>>>;

fn lock<T: Transport>(shared: &Shared<T>) -> MutexGuard<'_, Session<T>> {
    shared.lock().unwrap_or_else(|e| e.into_inner())
}

impl<T: Transport> Session<T> {
    /// Split into halves that can be moved to different threads.
    ///
    /// Gives the session back while its handshake is not complete.
    pub fn split(self) -> Result<(SessionReader<T>, SessionWriter<T>), Session<T>> {
        if !self.is_handshake_complete() {
            return Err(self);
        }
        let shared = Arc::new(Mutex::new(self));
        let reader = SessionReader {
            shared: Arc::clone(&shared),
        };
        Ok((reader, SessionWriter { shared }))
    }
}

/// Receiving half. Also runs the timers, since resends and post-handshake
/// messages are driven by what arrives.
pub struct SessionReader<T: Transport> {
    shared: Shared<T>,
}

impl<T: Transport> SessionReader<T> {
    /// See [`Session::recv`].
    pub fn recv(&self, buf: &mut [u8]) -> Result<Received, Error> {
        lock(&self.shared).recv(buf)
    }

    /// Go along with a rehandshake the peer asked for. See
    /// [`Session::handshake`].
    pub fn handshake(&self) -> Result<Status, Error> {
        lock(&self.shared).handshake()
    }

    pub fn refuse_rehandshake(&self) -> Result<(), Error> {
        lock(&self.shared).refuse_rehandshake()
    }

    pub fn handle_timeout(&self, now: Instant) -> Result<(), Error> {
        lock(&self.shared).handle_timeout(now)
    }

    pub fn time_remaining(&self, now: Instant) -> Option<Duration> {
        lock(&self.shared).time_remaining(now)
    }

    /// Put the session back together. Fails, handing both halves back, when
    /// they come from different sessions.
    pub fn reunite(self, writer: SessionWriter<T>) -> Result<Session<T>, (Self, SessionWriter<T>)> {
        if !Arc::ptr_eq(&self.shared, &writer.shared) {
            return Err((self, writer));
        }
        drop(writer);
        match Arc::try_unwrap(self.shared) {
            Ok(mutex) => Ok(mutex.into_inner().unwrap_or_else(|e| e.into_inner())),
            Err(shared) => {
                let writer = SessionWriter {
                    shared: Arc::clone(&shared),
                };
                Err((SessionReader { shared }, writer))
            }
        }
    }
}

/// Sending half.
pub struct SessionWriter<T: Transport> {
    shared: Shared<T>,
}

impl<T: Transport> SessionWriter<T> {
    /// See [`Session::send`].
    pub fn send(&self, data: &[u8]) -> Result<usize, Error> {
        lock(&self.shared).send(data)
    }

    pub fn flush(&self) -> Result<Status, Error> {
        lock(&self.shared).flush()
    }

    pub fn send_alert(&self, level: AlertLevel, description: AlertDescription) -> Result<(), Error> {
        lock(&self.shared).send_alert(level, description)
    }

    pub fn key_update(&self, request_peer: bool) -> Result<(), Error> {
        lock(&self.shared).key_update(request_peer)
    }

    /// Send close_notify. The reader keeps working until the peer's
    /// close_notify arrives.
    pub fn bye(&self) -> Result<(), Error> {
        lock(&self.shared).bye()
    }
}
