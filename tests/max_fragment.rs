//! Record size limits negotiated through max_fragment_length.

mod common;

use std::cell::RefCell;
use std::rc::Rc;

use tlswire::{Mode, ProtocolVersion, Role};

use common::*;

const APPLICATION_DATA: u8 = 23;
/// Explicit nonce and tag of a 1.2 GCM record, more than 1.3 adds.
const OVERHEAD: usize = 8 + 16;

/// Content type and body length of every record in a packet.
fn records(packet: &[u8], header: usize) -> Vec<(u8, usize)> {
    let mut out = Vec::new();
    let mut i = 0;
    while i + header <= packet.len() {
        let len = u16::from_be_bytes([packet[i + header - 2], packet[i + header - 1]]) as usize;
        out.push((packet[i], len));
        i += header + len;
    }
    out
}

/// Sends 4000 bytes from the server and returns the body lengths of the
/// application data records it wrote.
fn server_records(version: ProtocolVersion, client_limit: usize) -> (Pair, Vec<usize>) {
    let mode = match version {
        ProtocolVersion::Dtls12 => Mode::Datagram,
        _ => Mode::Stream,
    };
    let header = match mode {
        Mode::Stream => 5,
        Mode::Datagram => 13,
    };
    let mut pair = Pair::new(
        client_builder(mode)
            .versions(&[version])
            .max_fragment_length(client_limit)
            .build()
            .unwrap(),
        server_builder(mode).build().unwrap(),
    );
    pair.handshake();

    let seen = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&seen);
    pair.set_hook(move |from, _, packet| {
        if from == Role::Server {
            sink.borrow_mut().extend(
                records(packet, header)
                    .into_iter()
                    .filter(|(ctype, _)| *ctype == APPLICATION_DATA)
                    .map(|(_, len)| len),
            );
        }
        true
    });

    let data: Vec<u8> = (0..4000u32).map(|i| i as u8).collect();
    pair.server_sends(&data);
    assert_eq!(pair.c.data, data);
    let lens = seen.borrow().clone();
    (pair, lens)
}

fn assert_limited(version: ProtocolVersion) {
    let (pair, lens) = server_records(version, 512);
    assert_eq!(pair.client.extension_context().negotiated_fragment_length(), Some(512));
    assert_eq!(pair.server.extension_context().negotiated_fragment_length(), Some(512));
    assert!(lens.len() >= 8, "{:?}: {} records", version, lens.len());
    for len in lens {
        assert!(len <= 512 + OVERHEAD, "{:?}: record of {} bytes", version, len);
    }
}

#[test]
fn tls12_server_honors_client_limit() {
    assert_limited(ProtocolVersion::Tls12);
}

#[test]
fn tls13_server_honors_client_limit() {
    assert_limited(ProtocolVersion::Tls13);
}

#[test]
fn dtls12_server_honors_client_limit() {
    assert_limited(ProtocolVersion::Dtls12);
}

#[test]
fn no_limit_without_request() {
    let (pair, lens) = server_records(ProtocolVersion::Tls12, 16384);
    assert_eq!(pair.server.extension_context().negotiated_fragment_length(), None);
    assert_eq!(lens.len(), 1);
    assert!(lens[0] > 4000);
}

#[test]
fn client_writes_within_its_own_limit() {
    let mut pair = Pair::new(
        client_builder(Mode::Stream)
            .versions(&[ProtocolVersion::Tls13])
            .max_fragment_length(1024)
            .build()
            .unwrap(),
        server_builder(Mode::Stream).build().unwrap(),
    );
    pair.handshake();

    let seen = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&seen);
    pair.set_hook(move |from, _, packet| {
        if from == Role::Client {
            sink.borrow_mut().extend(records(packet, 5).into_iter().map(|(_, len)| len));
        }
        true
    });
    pair.client_sends(&[7u8; 3000]);
    assert_eq!(pair.s.data, vec![7u8; 3000]);

    let lens = seen.borrow();
    assert!(lens.len() >= 3);
    assert!(lens.iter().all(|len| *len <= 1024 + OVERHEAD), "{:?}", lens);
}
