#![no_main]

//! Fuzz target for record layer parsing.
//!
//! Wraps the input in plausible record headers so the fuzzer gets past the
//! header checks quickly.
//!
//! TLS record: type(1) version(2) length(2) fragment.
//! DTLS record: type(1) version(2) epoch(2) sequence(6) length(2) fragment.

use libfuzzer_sys::fuzz_target;
use std::io;
use std::sync::Arc;
use std::time::Instant;

use tlswire::certificate::generate_self_signed_certificate;
use tlswire::crypto::rust_crypto::default_provider;
use tlswire::{Config, Credentials, Mode, Role, Session, Transport};

/// Maximum plaintext fragment.
const MAX_FRAGMENT_SIZE: usize = 16384;

struct Packets(Vec<Vec<u8>>);

impl Transport for Packets {
    fn push(&mut self, _: &[u8]) -> io::Result<()> {
        Ok(())
    }

    fn pull(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.0.is_empty() {
            return Err(io::ErrorKind::WouldBlock.into());
        }
        let data = self.0.remove(0);
        let n = data.len().min(buf.len());
        buf[..n].copy_from_slice(&data[..n]);
        Ok(n)
    }
}

fn wrap(content_type: u8, mode: Mode, fragment: &[u8]) -> Vec<u8> {
    let mut record = vec![content_type];
    match mode {
        Mode::Stream => record.extend_from_slice(&[0x03, 0x03]),
        Mode::Datagram => {
            record.extend_from_slice(&[0xfe, 0xfd]);
            record.extend_from_slice(&[0, 0]);
            record.extend_from_slice(&[0, 0, 0, 0, 0, 1]);
        }
    }
    record.extend_from_slice(&(fragment.len() as u16).to_be_bytes());
    record.extend_from_slice(fragment);
    record
}

fuzz_target!(|data: &[u8]| {
    let Ok(cert) = generate_self_signed_certificate() else {
        return;
    };
    let Ok(credentials) = Credentials::from_der(&cert.certificate, &cert.private_key, &default_provider())
    else {
        return;
    };
    let fragment = &data[..data.len().min(MAX_FRAGMENT_SIZE)];

    for mode in [Mode::Stream, Mode::Datagram] {
        let Ok(config) = Config::builder()
            .mode(mode)
            .credentials(credentials.clone())
            .build()
        else {
            continue;
        };
        let config = Arc::new(config);

        for content_type in [20u8, 21, 22, 23] {
            let packets = vec![data.to_vec(), wrap(content_type, mode, fragment)];
            let transport = Packets(packets);
            let Ok(mut session) = Session::new(Arc::clone(&config), Role::Server, transport, Instant::now())
            else {
                continue;
            };
            let _ = session.handshake();
        }
    }
});
