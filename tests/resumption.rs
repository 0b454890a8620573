//! Session resumption through tickets, the session cache and 1.3 psk.

mod common;

use std::sync::Arc;
use std::time::{Duration, Instant};

use tlswire::crypto::rust_crypto::default_provider;
use tlswire::{Config, MemorySessionStore, Mode, ProtocolVersion, SessionData, TicketKeys};

use common::*;

fn ticket_keys() -> Arc<TicketKeys> {
    Arc::new(TicketKeys::new(default_provider()).unwrap())
}

fn client_config(mode: Mode, version: ProtocolVersion) -> Arc<Config> {
    Arc::new(client_builder(mode).versions(&[version]).build().unwrap())
}

fn ticket_server(mode: Mode, keys: Arc<TicketKeys>) -> Arc<Config> {
    Arc::new(server_builder(mode).ticket_keys(keys).build().unwrap())
}

/// A full handshake. Returns the client's resumption data and the pair.
fn first(client: &Arc<Config>, server: &Arc<Config>, now: Instant) -> (SessionData, Pair) {
    let mut pair = Pair::new_at(Arc::clone(client), Arc::clone(server), now);
    pair.handshake();
    assert!(!pair.client.is_resumed());
    let data = pair.client.session_data().expect("session data").clone();
    (data, pair)
}

fn flights(pair: &Pair) -> usize {
    let wire = pair.wire.borrow();
    wire.flights[0] + wire.flights[1]
}

/// A handshake offering `data`.
fn again(client: &Arc<Config>, server: &Arc<Config>, data: SessionData, now: Instant) -> Pair {
    let mut pair = Pair::new_at(Arc::clone(client), Arc::clone(server), now);
    pair.client.set_resumption_data(data).unwrap();
    pair.handshake();
    assert_eq!(pair.client.is_resumed(), pair.server.is_resumed());
    pair
}

fn assert_data_flows(pair: &mut Pair) {
    pair.client_sends(b"ping");
    assert_eq!(pair.s.data, b"ping");
    pair.server_sends(b"pong");
    assert_eq!(pair.c.data, b"pong");
}

#[test]
fn tls12_ticket() {
    let client = client_config(Mode::Stream, ProtocolVersion::Tls12);
    let server = ticket_server(Mode::Stream, ticket_keys());
    let now = Instant::now();

    let (data, full) = first(&client, &server, now);
    assert_eq!(flights(&full), 4);
    assert_eq!(data.version(), ProtocolVersion::Tls12);
    assert!(!data.ticket().is_empty());

    let suite = data.cipher_suite();
    let mut pair = again(&client, &server, data, now);
    assert!(pair.client.is_resumed());
    assert_eq!(pair.client.cipher_suite(), Some(suite));
    // The abbreviated handshake saves the server its second flight.
    assert_eq!(flights(&pair), 3);
    assert_eq!(pair.wire.borrow().flights[1], 1);
    assert_data_flows(&mut pair);
}

#[test]
fn tls12_session_id() {
    let client = client_config(Mode::Stream, ProtocolVersion::Tls12);
    let store = Arc::new(MemorySessionStore::new(16));
    let server = Arc::new(
        server_builder(Mode::Stream)
            .session_store(store.clone())
            .build()
            .unwrap(),
    );
    let now = Instant::now();

    let (data, full) = first(&client, &server, now);
    assert!(data.ticket().is_empty());
    assert_eq!(data.session_id().len(), 32);
    assert_eq!(store.len(), 1);

    let id = data.session_id().to_vec();
    let mut pair = again(&client, &server, data, now);
    assert!(pair.client.is_resumed());
    assert!(flights(&pair) < flights(&full));
    assert_eq!(pair.client.session_id(), &id[..]);
    assert_eq!(pair.server.session_id(), &id[..]);
    assert_data_flows(&mut pair);
}

#[test]
fn dtls12_ticket() {
    let client = client_config(Mode::Datagram, ProtocolVersion::Dtls12);
    let server = ticket_server(Mode::Datagram, ticket_keys());
    let now = Instant::now();

    let (data, _) = first(&client, &server, now);
    let mut pair = again(&client, &server, data, now);
    assert!(pair.client.is_resumed());
    assert_data_flows(&mut pair);
}

#[test]
fn tls13_psk() {
    let client = client_config(Mode::Stream, ProtocolVersion::Tls13);
    let server = ticket_server(Mode::Stream, ticket_keys());
    let now = Instant::now();

    // The ticket arrives after the handshake and is read by recv.
    let (data, full) = first(&client, &server, now);
    assert_eq!(data.version(), ProtocolVersion::Tls13);

    let mut pair = again(&client, &server, data, now);
    assert!(pair.client.is_resumed());
    // 1.3 resumption keeps the flight count. What it saves is Certificate
    // and CertificateVerify in the server's first flight.
    assert_eq!(flights(&pair), flights(&full));
    assert!(pair.wire.borrow().bytes[1] < full.wire.borrow().bytes[1]);
    assert_data_flows(&mut pair);
}

/// Flip one byte inside the ticket of `data`.
fn tamper(data: &SessionData) -> SessionData {
    let ticket = data.ticket().to_vec();
    let mut bytes = data.to_bytes().unwrap();
    let at = bytes
        .windows(ticket.len())
        .position(|w| w == &ticket[..])
        .unwrap();
    bytes[at + ticket.len() / 2] ^= 0x01;
    SessionData::from_bytes(&bytes).unwrap()
}

#[test]
fn tampered_ticket_means_full_handshake() {
    for (version, keys) in [
        (ProtocolVersion::Tls12, ticket_keys()),
        (ProtocolVersion::Tls13, ticket_keys()),
    ] {
        let client = client_config(Mode::Stream, version);
        let server = ticket_server(Mode::Stream, keys);
        let now = Instant::now();

        let (data, _) = first(&client, &server, now);
        let mut pair = again(&client, &server, tamper(&data), now);
        assert!(!pair.client.is_resumed(), "{:?}", version);
        assert_data_flows(&mut pair);
    }
}

#[test]
fn rotated_ticket_key_means_full_handshake() {
    let keys = ticket_keys();
    let client = client_config(Mode::Stream, ProtocolVersion::Tls12);
    let server = ticket_server(Mode::Stream, Arc::clone(&keys));
    let now = Instant::now();

    let (data, _) = first(&client, &server, now);
    keys.rotate().unwrap();
    let pair = again(&client, &server, data, now);
    assert!(!pair.client.is_resumed());

    // The fresh ticket works under the new key.
    let data = pair.client.session_data().unwrap().clone();
    let pair = again(&client, &server, data, now);
    assert!(pair.client.is_resumed());
}

#[test]
fn expired_session_means_full_handshake() {
    for version in [ProtocolVersion::Tls12, ProtocolVersion::Tls13] {
        let client = client_config(Mode::Stream, version);
        let server = ticket_server(Mode::Stream, ticket_keys());
        let now = Instant::now();

        let (data, _) = first(&client, &server, now);
        // Past the default six hour lifetime.
        let later = now + Duration::from_secs(7 * 3600);
        let pair = again(&client, &server, data, later);
        assert!(!pair.client.is_resumed(), "{:?}", version);
    }
}

#[test]
fn session_data_survives_serialization() {
    let client = client_config(Mode::Stream, ProtocolVersion::Tls12);
    let server = ticket_server(Mode::Stream, ticket_keys());
    let now = Instant::now();

    let (data, _) = first(&client, &server, now);
    let restored = SessionData::from_bytes(&data.to_bytes().unwrap()).unwrap();
    let pair = again(&client, &server, restored, now);
    assert!(pair.client.is_resumed());
}

#[test]
fn data_for_other_version_is_not_offered() {
    let keys = ticket_keys();
    let client12 = client_config(Mode::Stream, ProtocolVersion::Tls12);
    let client13 = client_config(Mode::Stream, ProtocolVersion::Tls13);
    let server = ticket_server(Mode::Stream, keys);
    let now = Instant::now();

    let (data, _) = first(&client12, &server, now);
    let pair = again(&client13, &server, data, now);
    assert!(!pair.client.is_resumed());
}
