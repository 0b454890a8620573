//! Extension registry behaviour seen from the wire.

mod common;

use std::sync::Arc;

use tlswire::extension::{Applicability, ExtContext, Extension, ExtensionRegistry, MessageKind};
use tlswire::{Config, Error, Mode, ProtocolVersion, Role};

use common::*;

const STATUS_REQUEST: u16 = 5;
const ECHO: u16 = 0xfe00;

fn client_hello_record(extensions: &[(u16, &[u8])]) -> Vec<u8> {
    let mut ext = Vec::new();
    for (id, data) in extensions {
        ext.extend_from_slice(&id.to_be_bytes());
        ext.extend_from_slice(&(data.len() as u16).to_be_bytes());
        ext.extend_from_slice(data);
    }

    let mut body = vec![0x03, 0x03];
    body.extend_from_slice(&[7u8; 32]);
    body.push(0); // session id
    body.extend_from_slice(&[0x00, 0x02, 0xc0, 0x2b]);
    body.extend_from_slice(&[0x01, 0x00]);
    body.extend_from_slice(&(ext.len() as u16).to_be_bytes());
    body.extend_from_slice(&ext);

    let mut handshake = vec![1];
    handshake.extend_from_slice(&(body.len() as u32).to_be_bytes()[1..]);
    handshake.extend_from_slice(&body);

    let mut record = vec![22, 0x03, 0x03];
    record.extend_from_slice(&(handshake.len() as u16).to_be_bytes());
    record.extend_from_slice(&handshake);
    record
}

#[test]
fn duplicate_extension_is_rejected() {
    let mut pair = Pair::new(
        client_builder(Mode::Stream).build().unwrap(),
        server_builder(Mode::Stream).build().unwrap(),
    );

    // status_request: ocsp, no responders, no request extensions.
    let status: &[u8] = &[1, 0, 0, 0, 0];
    let record = client_hello_record(&[(STATUS_REQUEST, status), (STATUS_REQUEST, status)]);
    pair.wire.borrow_mut().inject(Role::Server, record);

    let err = pair.server.handshake().unwrap_err();
    assert!(matches!(err, Error::IllegalExtension(STATUS_REQUEST)));

    // A fatal illegal_parameter alert went out and nothing else.
    let sent = pair.wire.borrow_mut().take_outbox(Role::Server);
    assert_eq!(sent.len(), 1);
    let alert = &sent[0];
    assert_eq!(alert[0], 21);
    assert_eq!(&alert[5..], &[2, 47]);

    assert!(matches!(pair.server.handshake(), Err(Error::SessionClosed)));
}

#[test]
fn single_status_request_is_accepted() {
    let mut pair = Pair::new(
        client_builder(Mode::Stream).build().unwrap(),
        server_builder(Mode::Stream)
            .versions(&[ProtocolVersion::Tls12])
            .build()
            .unwrap(),
    );

    let status: &[u8] = &[1, 0, 0, 0, 0];
    let record = client_hello_record(&[(STATUS_REQUEST, status)]);
    pair.wire.borrow_mut().inject(Role::Server, record);

    pair.server.handshake().unwrap();
    let sent = pair.wire.borrow_mut().take_outbox(Role::Server);
    // ServerHello onwards, no alert.
    assert!(!sent.is_empty());
    assert_eq!(sent[0][0], 22);
}

#[derive(Debug)]
struct Echo;

impl Extension for Echo {
    fn generate(
        &self,
        ctx: &mut ExtContext,
        kind: MessageKind,
        out: &mut Vec<u8>,
    ) -> Result<bool, Error> {
        if kind == MessageKind::ClientHello {
            out.extend_from_slice(b"hello");
            return Ok(true);
        }
        match ctx.data(ECHO) {
            Some(data) => {
                out.extend_from_slice(data);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn parse(&self, ctx: &mut ExtContext, _kind: MessageKind, data: &[u8]) -> Result<(), Error> {
        ctx.set_data(ECHO, data.to_vec());
        Ok(())
    }
}

fn with_echo() -> ExtensionRegistry {
    let mut registry = ExtensionRegistry::with_builtins();
    registry
        .register(
            ECHO,
            "echo",
            Arc::new(Echo),
            Applicability::CLIENT_HELLO
                | Applicability::TLS12_SERVER_HELLO
                | Applicability::ENCRYPTED_EXTENSIONS
                | Applicability::ANY_TRANSPORT,
            false,
        )
        .unwrap();
    registry
}

fn echo_pair(mode: Mode, versions: &[ProtocolVersion]) {
    let mut pair = Pair::new(
        client_builder(mode)
            .versions(versions)
            .extensions(with_echo())
            .build()
            .unwrap(),
        server_builder(mode).extensions(with_echo()).build().unwrap(),
    );
    pair.handshake();

    assert_eq!(pair.server.extension_data(ECHO), Some(&b"hello"[..]));
    assert_eq!(pair.client.extension_data(ECHO), Some(&b"hello"[..]));
    assert!(pair.client.extension_context().was_received(ECHO));
}

#[test]
fn custom_extension_in_tls13() {
    echo_pair(Mode::Stream, &[ProtocolVersion::Tls13]);
}

#[test]
fn custom_extension_in_tls12() {
    echo_pair(Mode::Stream, &[ProtocolVersion::Tls12]);
}

#[test]
fn custom_extension_in_dtls12() {
    echo_pair(Mode::Datagram, &[ProtocolVersion::Dtls12]);
}

#[test]
fn custom_extension_unknown_to_server_is_ignored() {
    let mut pair = Pair::new(
        client_builder(Mode::Stream)
            .extensions(with_echo())
            .build()
            .unwrap(),
        server_builder(Mode::Stream).build().unwrap(),
    );
    pair.handshake();

    assert_eq!(pair.server.extension_data(ECHO), None);
    assert_eq!(pair.client.extension_data(ECHO), None);
}

#[test]
fn register_twice_needs_override() {
    let mut registry = with_echo();
    let err = registry
        .register(ECHO, "echo", Arc::new(Echo), Applicability::CLIENT_HELLO, false)
        .unwrap_err();
    assert!(matches!(err, Error::AlreadyRegistered(ECHO)));

    registry
        .register(ECHO, "echo2", Arc::new(Echo), Applicability::CLIENT_HELLO, true)
        .unwrap();
    assert_eq!(registry.name(ECHO), Some("echo2"));

    let config = Config::builder().extensions(registry).build().unwrap();
    assert!(config.extensions().contains(ECHO));
}
