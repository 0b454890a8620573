//! Alert handling.

mod common;

use tlswire::{AlertDescription, AlertLevel, Error, Mode, ProtocolVersion, Role, Status};

use common::*;

fn tls12_pair(max_warnings: Option<usize>) -> Pair {
    let mut server = server_builder(Mode::Stream).versions(&[ProtocolVersion::Tls12]);
    if let Some(max) = max_warnings {
        server = server.max_warning_alerts(max);
    }
    Pair::new(
        client_builder(Mode::Stream).build().unwrap(),
        server.build().unwrap(),
    )
}

/// ClientHello followed by `count` user_canceled warnings.
fn hello_then_warnings(pair: &mut Pair, count: usize) {
    assert_eq!(pair.client.handshake().unwrap(), Status::WouldBlock);
    for _ in 0..count {
        pair.client
            .send_alert(AlertLevel::Warning, AlertDescription::UserCanceled)
            .unwrap();
    }
}

#[test]
fn warning_flood_is_fatal() {
    let mut pair = tls12_pair(None);
    hello_then_warnings(&mut pair, 100);
    pair.run();

    assert!(matches!(pair.s.error, Some(Error::TooManyWarningAlerts(65))));
    // The server answered with unexpected_message.
    assert!(matches!(
        pair.c.error,
        Some(Error::AlertReceived(AlertDescription::UnexpectedMessage))
    ));
}

#[test]
fn warnings_up_to_the_limit_are_tolerated() {
    let mut pair = tls12_pair(None);
    hello_then_warnings(&mut pair, 64);
    pair.handshake();
}

#[test]
fn warning_limit_is_configurable() {
    let mut pair = tls12_pair(Some(3));
    hello_then_warnings(&mut pair, 4);
    pair.run();

    assert!(matches!(pair.s.error, Some(Error::TooManyWarningAlerts(4))));
}

#[test]
fn tls13_ignores_user_canceled() {
    let mut pair = Pair::new(
        client_builder(Mode::Stream).build().unwrap(),
        server_builder(Mode::Stream).build().unwrap(),
    );
    pair.handshake();

    pair.client
        .send_alert(AlertLevel::Warning, AlertDescription::UserCanceled)
        .unwrap();
    pair.client_sends(b"still here");
    assert_eq!(pair.s.data, b"still here");
    assert!(pair.s.error.is_none());
}

#[test]
fn tls13_treats_other_warnings_as_fatal() {
    let mut pair = Pair::new(
        client_builder(Mode::Stream).build().unwrap(),
        server_builder(Mode::Stream).build().unwrap(),
    );
    pair.handshake();

    pair.client
        .send_alert(AlertLevel::Warning, AlertDescription::HandshakeFailure)
        .unwrap();
    pair.run();

    assert!(matches!(
        pair.s.error,
        Some(Error::AlertReceived(AlertDescription::HandshakeFailure))
    ));
    assert!(matches!(pair.server.send(b"x"), Err(Error::SessionClosed)));
}

#[test]
fn fatal_alert_during_handshake() {
    let mut pair = tls12_pair(None);
    assert_eq!(pair.client.handshake().unwrap(), Status::WouldBlock);
    pair.client
        .send_alert(AlertLevel::Fatal, AlertDescription::HandshakeFailure)
        .unwrap();
    pair.run();

    assert!(matches!(
        pair.s.error,
        Some(Error::AlertReceived(AlertDescription::HandshakeFailure))
    ));
}

#[test]
fn dtls_ignores_alerts_of_other_epochs() {
    let mut pair = Pair::new(
        client_builder(Mode::Datagram).build().unwrap(),
        server_builder(Mode::Datagram).build().unwrap(),
    );
    pair.handshake();

    // A plaintext fatal alert from epoch 0 after keys changed.
    let alert = vec![21, 0xfe, 0xfd, 0, 0, 0, 0, 0, 0, 0, 0x40, 0, 2, 2, 40];
    pair.wire.borrow_mut().inject(Role::Server, alert);
    pair.client_sends(b"ok");

    assert!(pair.s.error.is_none());
    assert_eq!(pair.s.data, b"ok");
}
