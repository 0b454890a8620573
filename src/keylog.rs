//! NSS key log output for external decryption tooling.
//!
//! Set `SSLKEYLOGFILE` to a path and every session using [`KeyLogFile`]
//! appends one line per exported secret:
//!
//! ```text
//! CLIENT_RANDOM <client random hex> <master secret hex>
//! CLIENT_HANDSHAKE_TRAFFIC_SECRET <client random hex> <secret hex>
//! ```

use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::sync::Mutex;

use once_cell::sync::Lazy;

pub const CLIENT_RANDOM: &str = "CLIENT_RANDOM";
pub const CLIENT_HANDSHAKE_TRAFFIC_SECRET: &str = "CLIENT_HANDSHAKE_TRAFFIC_SECRET";
pub const SERVER_HANDSHAKE_TRAFFIC_SECRET: &str = "SERVER_HANDSHAKE_TRAFFIC_SECRET";
pub const CLIENT_TRAFFIC_SECRET_0: &str = "CLIENT_TRAFFIC_SECRET_0";
pub const SERVER_TRAFFIC_SECRET_0: &str = "SERVER_TRAFFIC_SECRET_0";

/// Receiver of exported secrets.
pub trait KeyLog: Send + Sync + fmt::Debug {
    fn log(&self, label: &str, client_random: &[u8], secret: &[u8]);

    /// Lets the engine skip formatting when nothing will be written.
    fn will_log(&self, _label: &str) -> bool {
        true
    }
}

/// Discards everything.
#[derive(Debug, Default)]
pub struct NoKeyLog;

impl KeyLog for NoKeyLog {
    fn log(&self, _label: &str, _client_random: &[u8], _secret: &[u8]) {}

    fn will_log(&self, _label: &str) -> bool {
        false
    }
}

// One shared handle per process, opened on first use.
static KEYLOG_FILE: Lazy<Option<Mutex<File>>> = Lazy::new(|| {
    let path = std::env::var_os("SSLKEYLOGFILE")?;
    match OpenOptions::new().append(true).create(true).open(&path) {
        Ok(file) => {
            info!("Key log enabled: {:?}", path);
            Some(Mutex::new(file))
        }
        Err(e) => {
            warn!("Failed to open key log {:?}: {}", path, e);
            None
        }
    }
});

/// Appends to the file named by `SSLKEYLOGFILE`, if set.
#[derive(Debug, Default)]
pub struct KeyLogFile;

impl KeyLogFile {
    pub fn new() -> Self {
        KeyLogFile
    }
}

impl KeyLog for KeyLogFile {
    fn log(&self, label: &str, client_random: &[u8], secret: &[u8]) {
        let Some(file) = KEYLOG_FILE.as_ref() else {
            return;
        };
        let line = format_line(label, client_random, secret);
        let mut file = file.lock().unwrap_or_else(|e| e.into_inner());
        if let Err(e) = file.write_all(line.as_bytes()) {
            warn!("Key log write failed: {}", e);
        }
    }

    fn will_log(&self, _label: &str) -> bool {
        KEYLOG_FILE.is_some()
    }
}

pub(crate) fn format_line(label: &str, client_random: &[u8], secret: &[u8]) -> String {
    let mut line = String::with_capacity(label.len() + 2 + 2 * (client_random.len() + secret.len()));
    line.push_str(label);
    line.push(' ');
    push_hex(&mut line, client_random);
    line.push(' ');
    push_hex(&mut line, secret);
    line.push('\n');
    line
}

fn push_hex(out: &mut String, bytes: &[u8]) {
    const HEX: &[u8; 16] = b"0123456789abcdef";
    for b in bytes {
        out.push(HEX[(b >> 4) as usize] as char);
        out.push(HEX[(b & 0xf) as usize] as char);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nss_line_format() {
        let line = format_line(CLIENT_RANDOM, &[0x01, 0xab], &[0xff, 0x00]);
        assert_eq!(line, "CLIENT_RANDOM 01ab ff00\n");
    }
}
