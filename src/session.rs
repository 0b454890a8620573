//! The connection handle applications drive.
//!
//! A [`Session`] owns one handshake state machine and a [`Transport`]. Every
//! operation runs until it either finishes or would have to wait for the
//! network, in which case it returns a would-block result and the caller
//! retries once the transport is ready or [`Session::time_remaining`] ran out.
//!
//! The first fatal error is remembered. Its alert is sent best effort and
//! every later call fails with [`Error::SessionClosed`].
//!
//! Once the handshake is done, [`Session::split`] hands out halves for a
//! reader thread and a writer thread.

use std::io;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::config::Config;
use crate::crypto::VerifyStatus;
use crate::engine::Engine;
use crate::extension::{ExtContext, ExtensionRegistry};
use crate::handshake::{Client, Server};
use crate::resume::SessionData;
use crate::types::{AlertDescription, AlertLevel, CipherSuite, ProtocolVersion, Role};
use crate::Error;

/// Largest record we can receive, header and expansion included.
const READ_BUF_LEN: usize = 16384 + 2048 + 13;

/// Moves bytes between a session and the network.
///
/// `WouldBlock` and `Interrupted` are transient: the session reports
/// would-block and the call can be repeated. On a datagram transport each
/// `push` is one datagram and each `pull` returns at most one.
pub trait Transport {
    fn push(&mut self, data: &[u8]) -> io::Result<()>;

    /// Read into `buf`. `Ok(0)` on a stream transport is end of stream.
    fn pull(&mut self, buf: &mut [u8]) -> io::Result<usize>;
}

/// Outcome of [`Session::handshake`] and [`Session::flush`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Complete,
    WouldBlock,
    /// Application data arrived while a rehandshake was in progress. Read
    /// it with [`Session::recv`] and call `handshake` again.
    ApplicationData,
}

/// Outcome of [`Session::recv`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Received {
    Data(usize),
    WouldBlock,
    /// The peer asks for a new handshake. Call [`Session::handshake`] to go
    /// along or [`Session::refuse_rehandshake`] to decline.
    RehandshakeRequested,
    /// The peer sent close_notify.
    Closed,
}

enum Endpoint {
    Client(Box<Client>),
    Server(Box<Server>),
}

impl Endpoint {
    fn engine(&self) -> &Engine {
        match self {
            Endpoint::Client(c) => &c.engine,
            Endpoint::Server(s) => &s.engine,
        }
    }

    fn engine_mut(&mut self) -> &mut Engine {
        match self {
            Endpoint::Client(c) => &mut c.engine,
            Endpoint::Server(s) => &mut s.engine,
        }
    }

    fn make_progress(&mut self) -> Result<(), Error> {
        match self {
            Endpoint::Client(c) => c.make_progress(),
            Endpoint::Server(s) => s.make_progress(),
        }
    }

    /// Go along with a rehandshake the peer asked for.
    fn accept_rehandshake(&mut self) {
        match self {
            Endpoint::Client(c) => c.start_renegotiation(),
            Endpoint::Server(s) => s.accept_renegotiation(),
        }
    }

    fn cancel_rehandshake(&mut self) {
        match self {
            Endpoint::Client(c) => c.cancel_renegotiation(),
            Endpoint::Server(s) => s.cancel_renegotiation(),
        }
    }
}

/// One TLS or DTLS connection.
pub struct Session<T: Transport> {
    endpoint: Endpoint,
    transport: T,
    read_buf: Vec<u8>,
    failed: Option<Error>,
    closed: bool,
}

impl<T: Transport> Session<T> {
    /// Create a session. A server needs credentials or an external PSK in
    /// `config`.
    pub fn new(config: Arc<Config>, role: Role, transport: T, now: Instant) -> Result<Self, Error> {
        let endpoint = match role {
            Role::Client => Endpoint::Client(Box::new(Client::new(config, now))),
            Role::Server => {
                if config.credentials().is_none() && config.external_psks().is_empty() {
                    return Err(Error::ConfigError("server without credentials".into()));
                }
                Endpoint::Server(Box::new(Server::new(config, now)))
            }
        };
        Ok(Session {
            endpoint,
            transport,
            read_buf: vec![0; READ_BUF_LEN],
            failed: None,
            closed: false,
        })
    }

    pub fn role(&self) -> Role {
        self.endpoint.engine().role()
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Drive the handshake as far as the transport allows.
    ///
    /// A pending rehandshake request from the peer is accepted.
    pub fn handshake(&mut self) -> Result<Status, Error> {
        self.guard(|s| s.run_handshake())
    }

    fn run_handshake(&mut self) -> Result<Status, Error> {
        if self.endpoint.engine().rehandshake_requested {
            self.endpoint.accept_rehandshake();
        }

        loop {
            self.endpoint.make_progress()?;
            self.endpoint.engine_mut().resend_if_requested()?;
            self.flush_tx()?;

            let engine = self.endpoint.engine_mut();
            if engine.take_refused() {
                self.endpoint.cancel_rehandshake();
                return Err(Error::RehandshakeRefused);
            }
            if !engine.is_handshaking() {
                return Ok(Status::Complete);
            }
            if engine.ext.renegotiating && engine.has_app_data() {
                return Ok(Status::ApplicationData);
            }
            if engine.close_received() {
                return Err(Error::AlertReceived(AlertDescription::CloseNotify));
            }

            if !engine.process_record()? && !self.read_transport()? {
                return Ok(Status::WouldBlock);
            }
        }
    }

    /// Write application data. Datagram writes are cut to one record.
    ///
    /// Before the first handshake completes the data is queued.
    pub fn send(&mut self, data: &[u8]) -> Result<usize, Error> {
        self.guard(|s| {
            if s.closed {
                return Err(Error::SessionClosed);
            }
            let n = s.endpoint.engine_mut().send_app_data(data)?;
            s.flush_tx()?;
            Ok(n)
        })
    }

    /// Push out whatever the transport refused earlier.
    pub fn flush(&mut self) -> Result<Status, Error> {
        self.guard(|s| {
            if s.flush_tx()? {
                Ok(Status::Complete)
            } else {
                Ok(Status::WouldBlock)
            }
        })
    }

    /// Read application data.
    ///
    /// Handshake records arriving meanwhile are processed, which covers
    /// post-handshake messages and resending a final flight the peer lost.
    pub fn recv(&mut self, buf: &mut [u8]) -> Result<Received, Error> {
        self.guard(|s| s.run_recv(buf))
    }

    fn run_recv(&mut self, buf: &mut [u8]) -> Result<Received, Error> {
        loop {
            let engine = self.endpoint.engine_mut();
            if let Some(n) = engine.recv_app_data(buf) {
                return Ok(Received::Data(n));
            }
            if engine.close_received() {
                return Ok(Received::Closed);
            }
            if engine.rehandshake_requested {
                return Ok(Received::RehandshakeRequested);
            }

            if !engine.process_record()? {
                if self.read_transport()? {
                    continue;
                }
                self.flush_tx()?;
                return Ok(Received::WouldBlock);
            }

            self.endpoint.make_progress()?;
            self.endpoint.engine_mut().resend_if_requested()?;
            self.flush_tx()?;

            if self.endpoint.engine_mut().take_refused() {
                self.endpoint.cancel_rehandshake();
                return Err(Error::RehandshakeRefused);
            }
        }
    }

    /// Start a new handshake on an established 1.2 family connection.
    ///
    /// A server sends HelloRequest, a client a new ClientHello. Fails without
    /// touching the session on 1.3 ([`Error::RenegotiationAttempt`]) and
    /// when the peer never negotiated secure renegotiation
    /// ([`Error::UnsafeRenegotiation`]).
    pub fn rehandshake(&mut self) -> Result<Status, Error> {
        self.check_usable()?;
        let engine = self.endpoint.engine();
        if engine.is_tls13() {
            return Err(Error::RenegotiationAttempt);
        }
        if !engine.is_established() || engine.is_handshaking() {
            return Err(Error::UnexpectedMessage("rehandshake during handshake".into()));
        }
        if !engine.ext.secure_renegotiation {
            return Err(Error::UnsafeRenegotiation);
        }

        self.guard(|s| {
            match &mut s.endpoint {
                Endpoint::Server(server) => server.request_renegotiation()?,
                Endpoint::Client(client) => client.start_renegotiation(),
            }
            s.run_handshake()
        })
    }

    /// Decline the rehandshake the peer asked for with a warning
    /// no_renegotiation alert.
    pub fn refuse_rehandshake(&mut self) -> Result<(), Error> {
        self.guard(|s| {
            let role = s.role();
            let engine = s.endpoint.engine_mut();
            if !engine.rehandshake_requested {
                return Ok(());
            }
            if role == Role::Server {
                // The ClientHello that asked.
                engine.drop_handshake();
            }
            engine.refuse_renegotiation()?;
            s.flush_tx()?;
            Ok(())
        })
    }

    pub fn send_alert(&mut self, level: AlertLevel, description: AlertDescription) -> Result<(), Error> {
        self.guard(|s| {
            s.endpoint.engine_mut().send_alert(level, description)?;
            s.flush_tx()?;
            Ok(())
        })
    }

    /// Send close_notify. Further writes fail.
    pub fn bye(&mut self) -> Result<(), Error> {
        if self.closed {
            return Ok(());
        }
        self.guard(|s| {
            s.endpoint
                .engine_mut()
                .send_alert(AlertLevel::Warning, AlertDescription::CloseNotify)?;
            s.closed = true;
            s.flush_tx()?;
            Ok(())
        })
    }

    /// Move our 1.3 write keys forward, asking the peer to do the same when
    /// `request_peer` is set.
    pub fn key_update(&mut self, request_peer: bool) -> Result<(), Error> {
        self.check_usable()?;
        let engine = self.endpoint.engine();
        if !engine.is_tls13() || !engine.is_established() {
            return Err(Error::UnexpectedMessage("key update outside 1.3".into()));
        }
        self.guard(|s| {
            s.endpoint.engine_mut().send_key_update(request_peer)?;
            s.flush_tx()?;
            Ok(())
        })
    }

    /// Resend a lost flight or give up on the handshake once `now` passed
    /// the deadline.
    pub fn handle_timeout(&mut self, now: Instant) -> Result<(), Error> {
        self.guard(|s| {
            s.endpoint.engine_mut().handle_timeout(now)?;
            s.flush_tx()?;
            Ok(())
        })
    }

    /// How long until [`Session::handle_timeout`] has something to do.
    ///
    /// Timers of a flight written since the last call start at `now`.
    pub fn time_remaining(&mut self, now: Instant) -> Option<Duration> {
        self.endpoint.engine_mut().time_remaining(now)
    }

    pub fn version(&self) -> Option<ProtocolVersion> {
        self.endpoint.engine().version()
    }

    pub fn cipher_suite(&self) -> Option<CipherSuite> {
        self.endpoint.engine().cipher_suite()
    }

    pub fn is_handshake_complete(&self) -> bool {
        let engine = self.endpoint.engine();
        engine.is_established() && !engine.is_handshaking()
    }

    pub fn is_resumed(&self) -> bool {
        self.endpoint.engine().resumed
    }

    pub fn session_id(&self) -> &[u8] {
        &self.endpoint.engine().session_id
    }

    /// Material to resume this session later, on the client.
    pub fn session_data(&self) -> Option<&SessionData> {
        self.endpoint.engine().session_data.as_ref()
    }

    /// Offer `data` for resumption. Takes effect on a client that has not
    /// sent its ClientHello yet.
    pub fn set_resumption_data(&mut self, data: SessionData) -> Result<(), Error> {
        match &mut self.endpoint {
            Endpoint::Client(client) => {
                client.set_resumption_data(data);
                Ok(())
            }
            Endpoint::Server(_) => Err(Error::ConfigError("resumption data on a server".into())),
        }
    }

    pub fn peer_certificates(&self) -> &[Vec<u8>] {
        &self.endpoint.engine().peer_chain
    }

    /// The OCSP response the server stapled, on a client that asked for one.
    pub fn ocsp_response(&self) -> Option<&[u8]> {
        self.endpoint.engine().ocsp_response.as_deref()
    }

    /// Identity of the external PSK the handshake was keyed with.
    pub fn psk_identity(&self) -> Option<&[u8]> {
        self.endpoint.engine().psk_identity.as_deref()
    }

    pub fn peer_verify_status(&self) -> Option<VerifyStatus> {
        self.endpoint.engine().peer_status
    }

    /// Transcript hash up to, not including, the client Finished.
    pub fn handshake_hash(&self) -> &[u8] {
        &self.endpoint.engine().handshake_hash
    }

    /// The data slot of extension `id`.
    pub fn extension_data(&self, id: u16) -> Option<&[u8]> {
        self.endpoint.engine().ext.data(id)
    }

    pub fn extension_context(&self) -> &ExtContext {
        &self.endpoint.engine().ext
    }

    pub fn extension_context_mut(&mut self) -> &mut ExtContext {
        &mut self.endpoint.engine_mut().ext
    }

    /// This session's own extension registry.
    pub fn extensions_mut(&mut self) -> &mut ExtensionRegistry {
        &mut self.endpoint.engine_mut().registry
    }

    fn check_usable(&self) -> Result<(), Error> {
        if self.failed.is_some() {
            return Err(Error::SessionClosed);
        }
        Ok(())
    }

    /// Run `f`, and on a fatal error send its alert and shut the session.
    fn guard<R>(&mut self, f: impl FnOnce(&mut Self) -> Result<R, Error>) -> Result<R, Error> {
        self.check_usable()?;

        let err = match f(self) {
            Ok(v) => return Ok(v),
            Err(e) => e,
        };
        if !err.is_fatal() {
            return Err(err);
        }

        warn!("Session failed: {}", err);
        if let Some(description) = err.alert() {
            let engine = self.endpoint.engine_mut();
            if engine.send_alert(AlertLevel::Fatal, description).is_ok() {
                let _ = self.flush_tx();
            }
        }
        self.failed = Some(err.clone());
        Err(err)
    }

    /// One pull from the transport into the record layer. False when
    /// nothing arrived.
    fn read_transport(&mut self) -> Result<bool, Error> {
        let datagram = self.endpoint.engine().is_datagram();
        let n = match self.transport.pull(&mut self.read_buf) {
            Ok(0) if datagram => return Ok(false),
            Ok(0) => {
                if self.endpoint.engine().close_received() {
                    return Ok(false);
                }
                return Err(Error::Io("unexpected end of stream".into()));
            }
            Ok(n) => n,
            Err(e) if is_transient(&e) => return Ok(false),
            Err(e) => return Err(e.into()),
        };
        trace!("Pulled {} bytes", n);
        let Session {
            endpoint, read_buf, ..
        } = self;
        endpoint.engine_mut().feed(&read_buf[..n])?;
        Ok(true)
    }

    /// Push queued records. False when the transport would block.
    fn flush_tx(&mut self) -> Result<bool, Error> {
        let Session {
            endpoint,
            transport,
            ..
        } = self;
        let engine = endpoint.engine_mut();
        while let Some(data) = engine.front_tx() {
            match transport.push(data) {
                Ok(()) => engine.pop_tx(),
                Err(e) if is_transient(&e) => return Ok(false),
                Err(e) => return Err(e.into()),
            }
        }
        Ok(true)
    }
}

fn is_transient(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
    )
}
