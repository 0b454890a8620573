use thiserror::Error;

use crate::types::AlertDescription;

/// Errors surfaced by a session.
///
/// Everything except [`Error::RehandshakeRefused`] and
/// [`Error::UnsafeRenegotiation`] leaves the session permanently unusable.
/// Where the failure was detected locally the matching alert from
/// [`Error::alert`] has already been queued to the peer.
#[derive(Debug, Clone, Error)]
pub enum Error {
    /// Input ended before a complete structure could be parsed.
    #[error("parse incomplete")]
    ParseIncomplete,
    /// Malformed input.
    #[error("parse error: {0:?}")]
    ParseError(nom::error::ErrorKind),
    /// A message arrived that the current state does not accept.
    #[error("unexpected message: {0}")]
    UnexpectedMessage(String),
    /// An extension id appeared more than once in one hello.
    #[error("illegal extension: {0} repeated")]
    IllegalExtension(u16),
    /// The peer sent an extension that was not offered or not allowed here.
    #[error("unsupported extension: {0}")]
    UnsupportedExtension(u16),
    /// Registering an extension id that already has a handler.
    #[error("extension {0} already registered")]
    AlreadyRegistered(u16),
    /// A field carried a value outside what was negotiated or allowed.
    #[error("illegal parameter: {0}")]
    IllegalParameter(String),
    /// No acceptable parameters in common with the peer.
    #[error("handshake failure: {0}")]
    HandshakeFailure(String),
    /// No protocol version in common with the peer.
    #[error("protocol version not supported")]
    ProtocolVersion,
    /// Record authentication failed. All decryption failures map here.
    #[error("bad record mac")]
    BadRecordMac,
    /// A record exceeded the maximum fragment size.
    #[error("record overflow")]
    RecordOverflow,
    /// Finished, binder or signature verification failed.
    #[error("decrypt error: {0}")]
    DecryptError(String),
    /// Peer certificate was rejected by the verifier.
    #[error("certificate error: {0}")]
    CertificateError(String),
    /// Failure inside the crypto provider.
    #[error("crypto error: {0}")]
    CryptoError(String),
    /// A security check failed (downgrade sentinel, renegotiation binding).
    #[error("security error: {0}")]
    SecurityError(String),
    /// More consecutive warning alerts than the configured bound.
    #[error("too many warning alerts: {0}")]
    TooManyWarningAlerts(usize),
    /// The peer sent a fatal alert.
    #[error("fatal alert received: {0:?}")]
    AlertReceived(AlertDescription),
    /// Flight retransmission or the total handshake budget ran out.
    #[error("timeout: {0}")]
    Timeout(&'static str),
    /// Renegotiation arrived where it is never allowed.
    #[error("renegotiation attempt rejected")]
    RenegotiationAttempt,
    /// The peer answered our rehandshake with `no_renegotiation`.
    #[error("rehandshake refused by peer")]
    RehandshakeRefused,
    /// Refusing to renegotiate with a peer lacking secure renegotiation.
    #[error("peer did not negotiate secure renegotiation")]
    UnsafeRenegotiation,
    /// Too many records buffered waiting for a future epoch or reassembly.
    #[error("receive queue full")]
    ReceiveQueueFull,
    /// The session is closed or was invalidated by an earlier error.
    #[error("session closed")]
    SessionClosed,
    /// The transport failed with a non-transient error.
    #[error("transport error: {0}")]
    Io(String),
    /// Invalid configuration.
    #[error("config error: {0}")]
    ConfigError(String),

    #[error("encode error: {0}")]
    EncodeError(String),
}

impl Error {
    /// The alert description sent to the peer for this error, if any.
    pub fn alert(&self) -> Option<AlertDescription> {
        use AlertDescription as A;
        let a = match self {
            Error::ParseIncomplete | Error::ParseError(_) => A::DecodeError,
            Error::UnexpectedMessage(_) => A::UnexpectedMessage,
            Error::IllegalExtension(_) => A::IllegalParameter,
            Error::UnsupportedExtension(_) => A::UnsupportedExtension,
            Error::IllegalParameter(_) => A::IllegalParameter,
            Error::HandshakeFailure(_) => A::HandshakeFailure,
            Error::ProtocolVersion => A::ProtocolVersion,
            Error::BadRecordMac => A::BadRecordMac,
            Error::RecordOverflow => A::RecordOverflow,
            Error::DecryptError(_) => A::DecryptError,
            Error::CertificateError(_) => A::BadCertificate,
            Error::CryptoError(_) => A::InternalError,
            Error::SecurityError(_) => A::HandshakeFailure,
            Error::TooManyWarningAlerts(_) => A::UnexpectedMessage,
            Error::RenegotiationAttempt => A::UnexpectedMessage,
            Error::ReceiveQueueFull => A::InternalError,
            Error::EncodeError(_) => A::InternalError,
            Error::AlertReceived(_)
            | Error::Timeout(_)
            | Error::RehandshakeRefused
            | Error::UnsafeRenegotiation
            | Error::AlreadyRegistered(_)
            | Error::SessionClosed
            | Error::Io(_)
            | Error::ConfigError(_) => return None,
        };
        Some(a)
    }

    /// Whether this error invalidates the session.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            Error::RehandshakeRefused | Error::UnsafeRenegotiation | Error::AlreadyRegistered(_)
        )
    }
}

impl<'a> From<nom::Err<nom::error::Error<&'a [u8]>>> for Error {
    fn from(value: nom::Err<nom::error::Error<&'a [u8]>>) -> Self {
        match value {
            nom::Err::Incomplete(_) => Error::ParseIncomplete,
            nom::Err::Error(x) | nom::Err::Failure(x) => Error::ParseError(x.code),
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(value: std::io::Error) -> Self {
        Error::Io(value.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fatal_errors_carry_an_alert() {
        use AlertDescription as A;
        assert_eq!(Error::IllegalExtension(5).alert(), Some(A::IllegalParameter));
        assert_eq!(Error::BadRecordMac.alert(), Some(A::BadRecordMac));
        assert_eq!(Error::TooManyWarningAlerts(65).alert(), Some(A::UnexpectedMessage));
        assert_eq!(Error::AlertReceived(A::HandshakeFailure).alert(), None);
        assert_eq!(Error::Timeout("flight").alert(), None);
        assert_eq!(Error::EncodeError("too long".into()).alert(), Some(A::InternalError));
    }

    #[test]
    fn caller_decisions_are_not_fatal() {
        assert!(!Error::RehandshakeRefused.is_fatal());
        assert!(!Error::UnsafeRenegotiation.is_fatal());
        assert!(Error::RenegotiationAttempt.is_fatal());
        assert!(Error::SessionClosed.is_fatal());
    }

    #[test]
    fn nom_incomplete_is_not_a_parse_error() {
        let incomplete: nom::Err<nom::error::Error<&[u8]>> = nom::Err::Incomplete(nom::Needed::Unknown);
        assert!(matches!(Error::from(incomplete), Error::ParseIncomplete));
    }
}
