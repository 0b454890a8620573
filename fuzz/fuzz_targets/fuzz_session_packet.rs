#![no_main]

//! Fuzz target for packet handling.
//!
//! Feeds arbitrary bytes to a fresh server, and to a client as the reply to
//! its ClientHello, in both transport modes. Errors are expected, panics are
//! not.

use libfuzzer_sys::fuzz_target;
use std::io;
use std::sync::Arc;
use std::time::Instant;

use tlswire::certificate::generate_self_signed_certificate;
use tlswire::crypto::rust_crypto::default_provider;
use tlswire::{Config, Credentials, Mode, Role, Session, Transport};

/// Hands out one packet and swallows everything written.
struct Once(Option<Vec<u8>>);

impl Transport for Once {
    fn push(&mut self, _: &[u8]) -> io::Result<()> {
        Ok(())
    }

    fn pull(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let Some(data) = self.0.take() else {
            return Err(io::ErrorKind::WouldBlock.into());
        };
        let n = data.len().min(buf.len());
        buf[..n].copy_from_slice(&data[..n]);
        Ok(n)
    }
}

fn drive(config: Config, role: Role, data: &[u8]) {
    let now = Instant::now();
    let Ok(mut session) = Session::new(Arc::new(config), role, Once(Some(data.to_vec())), now) else {
        return;
    };
    // A client sends its hello first and then reads the input.
    let _ = session.handshake();
    let _ = session.handle_timeout(now);
}

fuzz_target!(|data: &[u8]| {
    let Ok(cert) = generate_self_signed_certificate() else {
        return;
    };
    let Ok(credentials) = Credentials::from_der(&cert.certificate, &cert.private_key, &default_provider())
    else {
        return;
    };

    for mode in [Mode::Stream, Mode::Datagram] {
        if let Ok(config) = Config::builder()
            .mode(mode)
            .credentials(credentials.clone())
            .build()
        {
            drive(config, Role::Server, data);
        }
        if let Ok(config) = Config::builder().mode(mode).build() {
            drive(config, Role::Client, data);
        }
    }
});
