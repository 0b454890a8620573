//! tlswire is a TLS 1.2/1.3 and DTLS 1.2 handshake and record engine.
//!
//! The engine does no I/O of its own. A [`Session`] moves bytes through a
//! caller supplied [`Transport`] and is driven by calling its operations
//! again whenever the transport is ready or a timeout passed. Time is always
//! handed in as an [`Instant`](std::time::Instant).
//!
//! ```no_run
//! # use std::sync::Arc;
//! # use std::time::Instant;
//! # use tlswire::{Config, Role, Session, Status, Transport};
//! # fn run(transport: impl Transport) -> Result<(), tlswire::Error> {
//! let config = Arc::new(Config::builder().server_name("example.com").build()?);
//! let mut session = Session::new(config, Role::Client, transport, Instant::now())?;
//! while session.handshake()? != Status::Complete {
//!     // wait for the transport, or until time_remaining() ran out
//! }
//! session.send(b"hello")?;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(clippy::all)]

#[macro_use]
extern crate log;

pub mod certificate;
mod codec;
mod config;
pub mod credentials;
pub mod crypto;
mod engine;
mod error;
pub mod extension;
mod handshake;
pub mod keylog;
mod message;
mod record;
pub mod resume;
mod retransmit;
mod rng;
mod session;
mod split;
mod time_tricks;
mod types;
mod window;

pub use config::{Config, ConfigBuilder};
pub use credentials::Credentials;
pub use error::Error;
pub use resume::{ExternalPsk, MemorySessionStore, SessionData, SessionStore, TicketKeys};
pub use session::{Received, Session, Status, Transport};
pub use split::{SessionReader, SessionWriter};
pub use types::{AlertDescription, AlertLevel, CipherSuite, ContentType, HandshakeType};
pub use types::{HashAlgorithm, Mode, NamedGroup, ProtocolVersion, PskKeyExchangeMode, Role};
pub use types::SignatureScheme;
