//! Handshake state machines.
//!
//! One machine per role, each covering the 1.2 family (stream and datagram)
//! and 1.3 over streams. The version is settled by the ServerHello and the
//! machines branch there.
//!
//! ## Full 1.2 handshake (RFC 5246, RFC 6347)
//!
//! ```text
//! Client                                               Server
//!
//! 1     ClientHello                  -------->
//!
//! 2                                  <--------   HelloVerifyRequest
//!                                                (datagram, cookie)
//!
//! 3     ClientHello + cookie         -------->
//!
//! 4                                                      ServerHello
//!                                                        Certificate
//!                                                  ServerKeyExchange
//!                                    <--------       ServerHelloDone
//!
//! 5     ClientKeyExchange
//!       [ChangeCipherSpec]
//!       Finished                     -------->
//!
//! 6                                                NewSessionTicket*
//!                                                 [ChangeCipherSpec]
//!                                    <--------              Finished
//! ```
//!
//! ## 1.3 handshake (RFC 8446)
//!
//! ```text
//! Client                                               Server
//!
//! 1     ClientHello
//!       + key_share
//!       + pre_shared_key*            -------->
//!
//! 2                                  <--------   HelloRetryRequest*
//!
//! 3                                                      ServerHello
//!                                                        + key_share
//!                                              {EncryptedExtensions}
//!                                                     {Certificate*}
//!                                               {CertificateVerify*}
//!                                    <--------            {Finished}
//!
//! 4     {Finished}                   -------->
//!
//! 5                                  <--------   [NewSessionTicket]
//! ```
//!
//! - {} denotes messages under handshake traffic keys
//! - [] denotes messages under application traffic keys

mod client;
pub(crate) mod framing;
pub(crate) mod key_schedule;
mod server;
pub(crate) mod transcript;

pub(crate) use client::Client;
pub(crate) use server::Server;
