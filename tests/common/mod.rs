//! Shared helpers for the integration tests.
//!
//! Sessions talk over an in-memory [`Wire`]. Everything a session pushes
//! lands in an outbox and only reaches the peer when the driver delivers it,
//! which is where packets get dropped, altered or reordered.

#![allow(unused)]

use std::cell::RefCell;
use std::collections::VecDeque;
use std::io;
use std::rc::Rc;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tlswire::certificate::{generate_for_names, generate_self_signed_certificate};
use tlswire::crypto::rust_crypto::default_provider;
use tlswire::{Config, ConfigBuilder, Credentials, Error, Mode, Received, Role, Session};
use tlswire::{Status, Transport};

pub fn init_log() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Called for every packet on delivery with the sender, a running packet
/// index and the bytes. Returning false drops the packet.
pub type Hook = Box<dyn FnMut(Role, usize, &mut Vec<u8>) -> bool>;

fn slot(role: Role) -> usize {
    match role {
        Role::Client => 0,
        Role::Server => 1,
    }
}

fn peer(role: Role) -> Role {
    match role {
        Role::Client => Role::Server,
        Role::Server => Role::Client,
    }
}

/// Both directions of a connection.
#[derive(Default)]
pub struct Wire {
    /// Pushed, not yet delivered. Indexed by sender.
    outbox: [Vec<Vec<u8>>; 2],
    /// Delivered, not yet pulled. Indexed by receiver.
    inbox: [VecDeque<Vec<u8>>; 2],
    /// Packets handed to `deliver`, across both directions.
    pub packets: usize,
    /// Bytes pushed per sender.
    pub bytes: [usize; 2],
    /// Non-empty batches delivered per sender. Each is one flight.
    pub flights: [usize; 2],
    /// Deliver each batch in reverse order.
    pub reverse: bool,
    pub hook: Option<Hook>,
}

impl Wire {
    /// Move everything pushed so far towards the peers.
    pub fn deliver(&mut self) -> usize {
        let mut moved = 0;
        for from in [Role::Client, Role::Server] {
            let mut batch = std::mem::take(&mut self.outbox[slot(from)]);
            if !batch.is_empty() {
                self.flights[slot(from)] += 1;
            }
            if self.reverse {
                batch.reverse();
            }
            for mut packet in batch {
                let index = self.packets;
                self.packets += 1;
                moved += 1;
                let keep = match &mut self.hook {
                    Some(hook) => hook(from, index, &mut packet),
                    None => true,
                };
                if keep {
                    self.inbox[slot(peer(from))].push_back(packet);
                }
            }
        }
        moved
    }

    /// Take what `from` pushed without delivering it.
    pub fn take_outbox(&mut self, from: Role) -> Vec<Vec<u8>> {
        std::mem::take(&mut self.outbox[slot(from)])
    }

    /// Put a packet straight into the inbox of `to`.
    pub fn inject(&mut self, to: Role, packet: Vec<u8>) {
        self.inbox[slot(to)].push_back(packet);
    }
}

/// One end of a [`Wire`].
pub struct Pipe {
    wire: Rc<RefCell<Wire>>,
    role: Role,
    mode: Mode,
}

impl Transport for Pipe {
    fn push(&mut self, data: &[u8]) -> io::Result<()> {
        let mut wire = self.wire.borrow_mut();
        wire.bytes[slot(self.role)] += data.len();
        wire.outbox[slot(self.role)].push(data.to_vec());
        Ok(())
    }

    fn pull(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut wire = self.wire.borrow_mut();
        let inbox = &mut wire.inbox[slot(self.role)];
        let Some(mut packet) = inbox.pop_front() else {
            return Err(io::ErrorKind::WouldBlock.into());
        };
        let n = packet.len().min(buf.len());
        buf[..n].copy_from_slice(&packet[..n]);
        if n < packet.len() && self.mode == Mode::Stream {
            // The rest of the stream stays for the next read.
            packet.drain(..n);
            inbox.push_front(packet);
        }
        Ok(n)
    }
}

pub fn credentials() -> Credentials {
    let cert = generate_self_signed_certificate().expect("generate certificate");
    Credentials::from_der(&cert.certificate, &cert.private_key, &default_provider())
        .expect("load credentials")
}

pub fn credentials_for(names: &[&str]) -> (Credentials, Vec<u8>) {
    let cert = generate_for_names(names).expect("generate certificate");
    let credentials = Credentials::from_der(&cert.certificate, &cert.private_key, &default_provider())
        .expect("load credentials");
    (credentials, cert.certificate)
}

pub fn server_builder(mode: Mode) -> ConfigBuilder {
    Config::builder().mode(mode).credentials(credentials())
}

pub fn client_builder(mode: Mode) -> ConfigBuilder {
    Config::builder().mode(mode)
}

#[derive(Default)]
pub struct Side {
    pub data: Vec<u8>,
    pub error: Option<Error>,
    pub closed: bool,
    pub rehandshake_requests: usize,
}

impl Side {
    fn is_reading(&self) -> bool {
        self.error.is_none() && !self.closed
    }
}

/// A client and a server joined by a wire, with a fake clock.
pub struct Pair {
    pub client: Session<Pipe>,
    pub server: Session<Pipe>,
    pub wire: Rc<RefCell<Wire>>,
    pub now: Instant,
    pub c: Side,
    pub s: Side,
    /// Decline rehandshake requests instead of going along.
    pub refuse_rehandshake: bool,
}

const MAX_ROUNDS: usize = 1000;

impl Pair {
    pub fn new(client: Config, server: Config) -> Pair {
        Pair::new_at(Arc::new(client), Arc::new(server), Instant::now())
    }

    pub fn new_at(client: Arc<Config>, server: Arc<Config>, now: Instant) -> Pair {
        init_log();
        let mode = client.mode();
        let wire = Rc::new(RefCell::new(Wire::default()));
        let pipe = |role| Pipe {
            wire: Rc::clone(&wire),
            role,
            mode,
        };
        let client = Session::new(client, Role::Client, pipe(Role::Client), now).expect("client");
        let server = Session::new(server, Role::Server, pipe(Role::Server), now).expect("server");
        Pair {
            client,
            server,
            wire,
            now,
            c: Side::default(),
            s: Side::default(),
            refuse_rehandshake: false,
        }
    }

    pub fn set_hook(&self, hook: impl FnMut(Role, usize, &mut Vec<u8>) -> bool + 'static) {
        self.wire.borrow_mut().hook = Some(Box::new(hook));
    }

    pub fn is_complete(&self) -> bool {
        self.client.is_handshake_complete() && self.server.is_handshake_complete()
    }

    /// Run until nothing moves any more. Time only advances when both peers
    /// wait on a timer.
    pub fn run(&mut self) {
        for _ in 0..MAX_ROUNDS {
            let mut moved = self.wire.borrow_mut().deliver();
            service(&mut self.client, &mut self.c, self.refuse_rehandshake);
            moved += self.wire.borrow_mut().deliver();
            service(&mut self.server, &mut self.s, self.refuse_rehandshake);
            moved += self.wire.borrow_mut().deliver();
            if moved > 0 {
                continue;
            }

            // Packets for a failed or closed peer are never read.
            let waiting = {
                let wire = self.wire.borrow();
                (self.c.is_reading() && !wire.inbox[0].is_empty())
                    || (self.s.is_reading() && !wire.inbox[1].is_empty())
            };
            if waiting {
                continue;
            }

            let busy = |session: &Session<Pipe>, side: &Side| {
                side.error.is_none() && !session.is_handshake_complete()
            };
            if !busy(&self.client, &self.c) && !busy(&self.server, &self.s) {
                return;
            }
            if !self.advance() {
                return;
            }
        }
        panic!("peers did not settle");
    }

    /// Move the clock to the next deadline and fire timers. False when no
    /// peer has a deadline.
    fn advance(&mut self) -> bool {
        let now = self.now;
        let mut wait = None;
        if self.c.error.is_none() {
            wait = self.client.time_remaining(now);
        }
        if self.s.error.is_none() {
            if let Some(w) = self.server.time_remaining(now) {
                wait = Some(wait.map_or(w, |c: Duration| c.min(w)));
            }
        }
        let Some(wait) = wait else {
            return false;
        };
        self.now += wait.max(Duration::from_millis(1));
        timeout(&mut self.client, &mut self.c, self.now);
        timeout(&mut self.server, &mut self.s, self.now);
        true
    }

    /// Handshake and assert both ends completed.
    pub fn handshake(&mut self) {
        self.run();
        assert!(self.c.error.is_none(), "client failed: {:?}", self.c.error);
        assert!(self.s.error.is_none(), "server failed: {:?}", self.s.error);
        assert!(self.is_complete(), "handshake did not complete");
    }

    pub fn client_sends(&mut self, data: &[u8]) {
        let mut off = 0;
        while off < data.len() {
            off += self.client.send(&data[off..]).expect("client send");
        }
        self.run();
    }

    pub fn server_sends(&mut self, data: &[u8]) {
        let mut off = 0;
        while off < data.len() {
            off += self.server.send(&data[off..]).expect("server send");
        }
        self.run();
    }
}

fn timeout(session: &mut Session<Pipe>, side: &mut Side, now: Instant) {
    if side.error.is_some() {
        return;
    }
    if let Err(e) = session.handle_timeout(now) {
        side.error = Some(e);
    }
}

fn service(session: &mut Session<Pipe>, side: &mut Side, refuse: bool) {
    if side.error.is_some() {
        return;
    }
    if let Err(e) = service_inner(session, side, refuse) {
        side.error = Some(e);
    }
}

fn service_inner(session: &mut Session<Pipe>, side: &mut Side, refuse: bool) -> Result<(), Error> {
    if !session.is_handshake_complete() {
        if session.handshake()? == Status::WouldBlock {
            return Ok(());
        }
    }
    if side.closed {
        return Ok(());
    }

    let mut buf = vec![0u8; 4096];
    loop {
        match session.recv(&mut buf)? {
            Received::Data(n) => side.data.extend_from_slice(&buf[..n]),
            Received::WouldBlock => return Ok(()),
            Received::Closed => {
                side.closed = true;
                return Ok(());
            }
            Received::RehandshakeRequested => {
                side.rehandshake_requests += 1;
                if refuse {
                    session.refuse_rehandshake()?;
                } else {
                    session.handshake()?;
                    return Ok(());
                }
            }
        }
    }
}

/// DTLS record header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecHdr {
    pub ctype: u8,
    pub epoch: u16,
    pub seq: u64,
}

/// Record headers of one datagram.
pub fn parse_records(datagram: &[u8]) -> Vec<RecHdr> {
    let mut out = Vec::new();
    let mut i = 0usize;
    while i + 13 <= datagram.len() {
        let ctype = datagram[i];
        let epoch = u16::from_be_bytes([datagram[i + 3], datagram[i + 4]]);
        let mut seq = [0u8; 8];
        seq[2..].copy_from_slice(&datagram[i + 5..i + 11]);
        let len = u16::from_be_bytes([datagram[i + 11], datagram[i + 12]]) as usize;
        out.push(RecHdr {
            ctype,
            epoch,
            seq: u64::from_be_bytes(seq),
        });
        i += 13 + len;
    }
    out
}

/// Handshake message types in the plaintext handshake records of a datagram.
pub fn handshake_types(datagram: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    let mut i = 0usize;
    while i + 13 <= datagram.len() {
        let ctype = datagram[i];
        let epoch = u16::from_be_bytes([datagram[i + 3], datagram[i + 4]]);
        let len = u16::from_be_bytes([datagram[i + 11], datagram[i + 12]]) as usize;
        if ctype == 22 && epoch == 0 && i + 13 < datagram.len() {
            out.push(datagram[i + 13]);
        }
        i += 13 + len;
    }
    out
}
