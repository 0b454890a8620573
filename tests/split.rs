//! Sessions split into halves driven from separate threads.

mod common;

use std::io;
use std::sync::mpsc::{self, Receiver, Sender, TryRecvError};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use tlswire::{Config, Error, Mode, ProtocolVersion, Received, Role, Session, SessionReader};
use tlswire::{SessionWriter, Status, Transport};

use common::*;

/// Non-blocking stream transport over a pair of channels.
struct Channel {
    tx: Sender<Vec<u8>>,
    rx: Receiver<Vec<u8>>,
    pending: Vec<u8>,
}

fn channels() -> (Channel, Channel) {
    let (a_tx, b_rx) = mpsc::channel();
    let (b_tx, a_rx) = mpsc::channel();
    let a = Channel {
        tx: a_tx,
        rx: a_rx,
        pending: Vec::new(),
    };
    let b = Channel {
        tx: b_tx,
        rx: b_rx,
        pending: Vec::new(),
    };
    (a, b)
}

impl Transport for Channel {
    fn push(&mut self, data: &[u8]) -> io::Result<()> {
        self.tx
            .send(data.to_vec())
            .map_err(|_| io::ErrorKind::BrokenPipe.into())
    }

    fn pull(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.pending.is_empty() {
            match self.rx.try_recv() {
                Ok(data) => self.pending = data,
                Err(TryRecvError::Empty) => return Err(io::ErrorKind::WouldBlock.into()),
                Err(TryRecvError::Disconnected) => return Ok(0),
            }
        }
        let n = self.pending.len().min(buf.len());
        buf[..n].copy_from_slice(&self.pending[..n]);
        self.pending.drain(..n);
        Ok(n)
    }
}

const ROUNDS: usize = 200;
const DEADLINE: Duration = Duration::from_secs(20);

fn connected(version: ProtocolVersion) -> (Session<Channel>, Session<Channel>) {
    init_log();
    let (a, b) = channels();
    let now = Instant::now();
    let client_config = client_builder(Mode::Stream).versions(&[version]).build().unwrap();
    let server_config = server_builder(Mode::Stream).build().unwrap();
    let mut client = Session::new(Arc::new(client_config), Role::Client, a, now).unwrap();
    let mut server = Session::new(Arc::new(server_config), Role::Server, b, now).unwrap();

    for _ in 0..ROUNDS {
        let c = client.handshake().unwrap();
        let s = server.handshake().unwrap();
        if c == Status::Complete && s == Status::Complete {
            return (client, server);
        }
    }
    panic!("handshake did not complete");
}

fn message(from: &str, i: usize) -> Vec<u8> {
    format!("{} message {:03};", from, i).into_bytes()
}

fn expected(from: &str) -> Vec<u8> {
    (0..ROUNDS).flat_map(|i| message(from, i)).collect()
}

fn spawn_writer(
    writer: SessionWriter<Channel>,
    from: &'static str,
) -> thread::JoinHandle<SessionWriter<Channel>> {
    thread::spawn(move || {
        for i in 0..ROUNDS {
            let data = message(from, i);
            let mut off = 0;
            while off < data.len() {
                off += writer.send(&data[off..]).unwrap();
            }
            if i == ROUNDS / 2 {
                writer.key_update(true).unwrap();
            }
            thread::yield_now();
        }
        writer
    })
}

fn spawn_reader(
    reader: SessionReader<Channel>,
    want: usize,
) -> thread::JoinHandle<(SessionReader<Channel>, Vec<u8>)> {
    thread::spawn(move || {
        let start = Instant::now();
        let mut data = Vec::new();
        let mut buf = [0u8; 4096];
        while data.len() < want {
            assert!(start.elapsed() < DEADLINE, "read {} of {} bytes", data.len(), want);
            match reader.recv(&mut buf).unwrap() {
                Received::Data(n) => data.extend_from_slice(&buf[..n]),
                Received::WouldBlock => thread::sleep(Duration::from_millis(1)),
                other => panic!("unexpected {:?}", other),
            }
        }
        (reader, data)
    })
}

fn both_directions(version: ProtocolVersion) {
    let (client, server) = connected(version);
    let Ok((client_reader, client_writer)) = client.split() else {
        panic!("client split");
    };
    let Ok((server_reader, server_writer)) = server.split() else {
        panic!("server split");
    };

    let client_sent = expected("client");
    let server_sent = expected("server");

    let writers = [
        spawn_writer(client_writer, "client"),
        spawn_writer(server_writer, "server"),
    ];
    let client_reading = spawn_reader(client_reader, server_sent.len());
    let server_reading = spawn_reader(server_reader, client_sent.len());

    let [client_writer, server_writer] = writers.map(|w| w.join().unwrap());
    let (client_reader, client_got) = client_reading.join().unwrap();
    let (server_reader, server_got) = server_reading.join().unwrap();

    assert_eq!(client_got, server_sent);
    assert_eq!(server_got, client_sent);

    let client = client_reader.reunite(client_writer).ok().unwrap();
    let server = server_reader.reunite(server_writer).ok().unwrap();
    assert!(client.is_handshake_complete() && server.is_handshake_complete());
}

#[test]
fn tls13_halves_on_separate_threads() {
    both_directions(ProtocolVersion::Tls13);
}

#[test]
fn tls12_halves_on_separate_threads() {
    let (client, server) = connected(ProtocolVersion::Tls12);
    let (client_reader, client_writer) = client.split().ok().unwrap();
    let (server_reader, server_writer) = server.split().ok().unwrap();

    let sending = thread::spawn(move || {
        for i in 0..ROUNDS {
            client_writer.send(&message("client", i)).unwrap();
        }
        client_writer.bye().unwrap();
        client_writer
    });
    let reading = spawn_reader(server_reader, expected("client").len());

    let client_writer = sending.join().unwrap();
    let (server_reader, got) = reading.join().unwrap();
    assert_eq!(got, expected("client"));

    // The close_notify follows the data.
    let mut buf = [0u8; 64];
    let start = Instant::now();
    loop {
        assert!(start.elapsed() < DEADLINE);
        match server_reader.recv(&mut buf).unwrap() {
            Received::Closed => break,
            Received::WouldBlock => thread::sleep(Duration::from_millis(1)),
            other => panic!("unexpected {:?}", other),
        }
    }
    assert!(matches!(client_writer.send(b"late"), Err(Error::SessionClosed)));
    drop((client_reader, server_writer));
}

#[test]
fn split_needs_a_finished_handshake() {
    let (a, _b) = channels();
    let config = Arc::new(Config::builder().build().unwrap());
    let session = Session::new(config, Role::Client, a, Instant::now()).unwrap();
    let session = session.split().err().unwrap();
    assert!(!session.is_handshake_complete());
}

#[test]
fn halves_of_different_sessions_stay_apart() {
    let (client, server) = connected(ProtocolVersion::Tls13);
    let (client_reader, client_writer) = client.split().ok().unwrap();
    let (server_reader, server_writer) = server.split().ok().unwrap();

    let (client_reader, server_writer) = client_reader.reunite(server_writer).err().unwrap();
    assert!(client_reader.reunite(client_writer).is_ok());
    assert!(server_reader.reunite(server_writer).is_ok());
}

#[test]
fn halves_are_send() {
    fn is_send<T: Send>() {}
    is_send::<SessionReader<Channel>>();
    is_send::<SessionWriter<Channel>>();
}
