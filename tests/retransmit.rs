//! Datagram loss, reordering and retransmission.

mod common;

use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tlswire::crypto::rust_crypto::default_provider;
use tlswire::{Config, Error, Mode, Role, TicketKeys};

use common::*;

const CLIENT_HELLO: u8 = 1;
const NEW_SESSION_TICKET: u8 = 4;

fn dtls_pair(mtu: usize) -> Pair {
    Pair::new(
        client_builder(Mode::Datagram).mtu(mtu).build().unwrap(),
        server_builder(Mode::Datagram).mtu(mtu).build().unwrap(),
    )
}

/// Packets in a handshake without loss.
fn clean_packet_count(mtu: usize) -> usize {
    let mut pair = dtls_pair(mtu);
    pair.handshake();
    let n = pair.wire.borrow().packets;
    n
}

fn drop_matrix(mtu: usize, reverse: bool) {
    let n = clean_packet_count(mtu);
    assert!(n >= 6, "expected at least six flights, got {}", n);

    for k in 0..n {
        let mut pair = dtls_pair(mtu);
        pair.wire.borrow_mut().reverse = reverse;
        pair.set_hook(move |_, index, _| index != k);
        pair.handshake();

        pair.client_sends(b"after loss");
        assert_eq!(pair.s.data, b"after loss", "dropped packet {}", k);
    }
}

#[test]
fn dtls12_survives_any_single_drop() {
    drop_matrix(1150, false);
}

#[test]
fn dtls12_survives_any_single_drop_reordered() {
    drop_matrix(400, true);
}

/// Drop the first `drops` transmissions of the ClientHello.
fn drop_client_hello(pair: &Pair, drops: usize) {
    let dropped = Rc::new(Cell::new(0));
    pair.set_hook(move |from, _, packet| {
        let hello = from == Role::Client && handshake_types(packet).contains(&CLIENT_HELLO);
        if hello && dropped.get() < drops {
            dropped.set(dropped.get() + 1);
            return false;
        }
        true
    });
}

#[test]
fn first_flight_long_after_creation_survives_loss() {
    let created = Instant::now();
    let mut pair = Pair::new_at(
        Arc::new(client_builder(Mode::Datagram).build().unwrap()),
        Arc::new(server_builder(Mode::Datagram).build().unwrap()),
        created,
    );
    // The sessions sit idle for longer than the whole handshake budget.
    pair.now = created + Duration::from_secs(60);
    pair.set_hook(|_, index, _| index != 0);
    pair.handshake();

    pair.client_sends(b"late start");
    assert_eq!(pair.s.data, b"late start");
}

#[test]
fn dtls12_flight_dropped_up_to_retry_count() {
    let mut pair = dtls_pair(1150);
    drop_client_hello(&pair, 3);
    pair.handshake();
}

#[test]
fn dtls12_flight_dropped_past_retry_count() {
    let mut pair = dtls_pair(1150);
    drop_client_hello(&pair, 4);
    pair.run();

    assert!(matches!(pair.c.error, Some(Error::Timeout(_))));
    assert!(!pair.server.is_handshake_complete());
}

#[test]
fn dtls12_resend_uses_fresh_sequence_numbers() {
    let mut pair = dtls_pair(1150);
    let hellos = Rc::new(RefCell::new(Vec::new()));
    let record = Rc::clone(&hellos);
    pair.set_hook(move |from, _, packet| {
        if from != Role::Client || !handshake_types(packet).contains(&CLIENT_HELLO) {
            return true;
        }
        let mut hellos = record.borrow_mut();
        hellos.push(parse_records(packet));
        // Lose the first transmission.
        hellos.len() > 1
    });
    pair.handshake();

    let hellos = hellos.borrow();
    let (first, resent) = (&hellos[0], &hellos[1]);
    assert_eq!(first.len(), resent.len());
    for (a, b) in first.iter().zip(resent.iter()) {
        assert_eq!(a.epoch, b.epoch);
        assert!(b.seq > a.seq, "sequence must increase on resend: {:?} -> {:?}", a, b);
    }
}

#[test]
fn dtls12_small_mtu() {
    let mtu = 256;
    let mut pair = dtls_pair(mtu);
    let largest = Rc::new(Cell::new(0));
    let seen = Rc::clone(&largest);
    pair.set_hook(move |_, _, packet| {
        seen.set(seen.get().max(packet.len()));
        true
    });
    pair.handshake();
    assert!(largest.get() <= mtu, "datagram of {} bytes", largest.get());

    // Writes are cut to what fits one datagram.
    let n = pair.client.send(&[9u8; 1000]).unwrap();
    assert!(n < 1000);
    pair.run();
    assert_eq!(pair.s.data, vec![9u8; n]);
}

#[test]
fn dtls12_lost_session_ticket() {
    let keys = Arc::new(TicketKeys::new(default_provider()).unwrap());
    let mut pair = Pair::new(
        client_builder(Mode::Datagram).build().unwrap(),
        server_builder(Mode::Datagram)
            .ticket_keys(keys)
            .build()
            .unwrap(),
    );
    let dropped = Rc::new(Cell::new(false));
    let flag = Rc::clone(&dropped);
    pair.set_hook(move |from, _, packet| {
        let ticket = from == Role::Server && handshake_types(packet).contains(&NEW_SESSION_TICKET);
        if ticket && !flag.get() {
            flag.set(true);
            return false;
        }
        true
    });
    pair.handshake();
    assert!(dropped.get());

    let data = pair.client.session_data().expect("session data");
    assert!(!data.ticket().is_empty());

    pair.client.bye().unwrap();
    pair.run();
    assert!(pair.s.closed);
    pair.server.bye().unwrap();
    pair.run();
    assert!(pair.c.closed);
    assert!(pair.c.error.is_none() && pair.s.error.is_none());
}

#[test]
fn dtls12_replayed_record_is_dropped() {
    let mut pair = dtls_pair(1150);
    pair.handshake();

    pair.client.send(b"once").unwrap();
    let sent = pair.wire.borrow_mut().take_outbox(Role::Client);
    assert_eq!(sent.len(), 1);
    for _ in 0..2 {
        pair.wire.borrow_mut().inject(Role::Server, sent[0].clone());
    }
    pair.run();

    assert_eq!(pair.s.data, b"once");
    assert!(pair.s.error.is_none());
}

#[test]
fn handshake_timeout_gives_up() {
    let mut pair = Pair::new(
        client_builder(Mode::Datagram)
            .flight_retries(100)
            .build()
            .unwrap(),
        server_builder(Mode::Datagram).build().unwrap(),
    );
    // Nothing ever arrives.
    pair.set_hook(|_, _, _| false);
    pair.run();

    assert!(matches!(pair.c.error, Some(Error::Timeout(_))));
}

#[test]
fn stream_needs_no_timer_after_handshake() {
    let mut pair = Pair::new(
        Config::builder().build().unwrap(),
        server_builder(Mode::Stream).build().unwrap(),
    );
    pair.handshake();
    assert_eq!(pair.client.time_remaining(pair.now), None);
    assert_eq!(pair.server.time_remaining(pair.now), None);
}
