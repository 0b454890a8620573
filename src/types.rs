//! Wire-level enumerations shared by the record layer and both handshake
//! families.
//!
//! Every enum keeps an `Unknown` variant so that values the engine does not
//! implement still round-trip through parsing and can be reported or skipped.

use nom::number::complete::{be_u16, be_u8};
use nom::IResult;

/// Which side of the connection a session plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Client,
    Server,
}

/// Transport flavour underneath the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Mode {
    /// Reliable, ordered byte stream (TLS).
    #[default]
    Stream,
    /// Unreliable datagrams (DTLS).
    Datagram,
}

// ============================================================================
// Content Type
// ============================================================================

/// Record content types (RFC 5246 6.2.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContentType {
    ChangeCipherSpec,
    Alert,
    Handshake,
    ApplicationData,
    Unknown(u8),
}

impl ContentType {
    pub fn from_u8(value: u8) -> Self {
        match value {
            20 => ContentType::ChangeCipherSpec,
            21 => ContentType::Alert,
            22 => ContentType::Handshake,
            23 => ContentType::ApplicationData,
            _ => ContentType::Unknown(value),
        }
    }

    pub fn as_u8(&self) -> u8 {
        match self {
            ContentType::ChangeCipherSpec => 20,
            ContentType::Alert => 21,
            ContentType::Handshake => 22,
            ContentType::ApplicationData => 23,
            ContentType::Unknown(value) => *value,
        }
    }

    pub fn parse(input: &[u8]) -> IResult<&[u8], ContentType> {
        let (input, value) = be_u8(input)?;
        Ok((input, ContentType::from_u8(value)))
    }
}

// ============================================================================
// Protocol Version
// ============================================================================

/// Protocol versions as they appear on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProtocolVersion {
    /// TLS 1.2.
    Tls12,
    /// TLS 1.3.
    Tls13,
    /// DTLS 1.0. Only ever seen as a record version on an initial ClientHello.
    Dtls10,
    /// DTLS 1.2.
    Dtls12,
    Unknown(u16),
}

impl ProtocolVersion {
    pub fn from_u16(value: u16) -> Self {
        match value {
            0x0303 => ProtocolVersion::Tls12,
            0x0304 => ProtocolVersion::Tls13,
            0xFEFF => ProtocolVersion::Dtls10,
            0xFEFD => ProtocolVersion::Dtls12,
            _ => ProtocolVersion::Unknown(value),
        }
    }

    pub fn as_u16(&self) -> u16 {
        match self {
            ProtocolVersion::Tls12 => 0x0303,
            ProtocolVersion::Tls13 => 0x0304,
            ProtocolVersion::Dtls10 => 0xFEFF,
            ProtocolVersion::Dtls12 => 0xFEFD,
            ProtocolVersion::Unknown(value) => *value,
        }
    }

    pub fn parse(input: &[u8]) -> IResult<&[u8], ProtocolVersion> {
        let (input, value) = be_u16(input)?;
        Ok((input, ProtocolVersion::from_u16(value)))
    }

    /// True for the datagram variants.
    pub fn is_datagram(&self) -> bool {
        matches!(self, ProtocolVersion::Dtls10 | ProtocolVersion::Dtls12)
    }

    /// True when this version uses the TLS 1.3 handshake family.
    pub fn is_tls13(&self) -> bool {
        matches!(self, ProtocolVersion::Tls13)
    }

    /// Versions this crate can negotiate.
    pub fn is_supported(&self) -> bool {
        matches!(
            self,
            ProtocolVersion::Tls12 | ProtocolVersion::Tls13 | ProtocolVersion::Dtls12
        )
    }
}

// ============================================================================
// Handshake Type
// ============================================================================

/// Handshake message types (RFC 5246, RFC 6347, RFC 8446).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HandshakeType {
    HelloRequest,
    ClientHello,
    ServerHello,
    HelloVerifyRequest,
    NewSessionTicket,
    EncryptedExtensions,
    Certificate,
    ServerKeyExchange,
    CertificateRequest,
    ServerHelloDone,
    CertificateVerify,
    ClientKeyExchange,
    Finished,
    CertificateStatus,
    KeyUpdate,
    /// Synthetic type used in the TLS 1.3 transcript after a HelloRetryRequest.
    MessageHash,
    Unknown(u8),
}

impl HandshakeType {
    pub fn from_u8(value: u8) -> Self {
        match value {
            0 => HandshakeType::HelloRequest,
            1 => HandshakeType::ClientHello,
            2 => HandshakeType::ServerHello,
            3 => HandshakeType::HelloVerifyRequest,
            4 => HandshakeType::NewSessionTicket,
            8 => HandshakeType::EncryptedExtensions,
            11 => HandshakeType::Certificate,
            12 => HandshakeType::ServerKeyExchange,
            13 => HandshakeType::CertificateRequest,
            14 => HandshakeType::ServerHelloDone,
            15 => HandshakeType::CertificateVerify,
            16 => HandshakeType::ClientKeyExchange,
            20 => HandshakeType::Finished,
            22 => HandshakeType::CertificateStatus,
            24 => HandshakeType::KeyUpdate,
            254 => HandshakeType::MessageHash,
            _ => HandshakeType::Unknown(value),
        }
    }

    pub fn as_u8(&self) -> u8 {
        match self {
            HandshakeType::HelloRequest => 0,
            HandshakeType::ClientHello => 1,
            HandshakeType::ServerHello => 2,
            HandshakeType::HelloVerifyRequest => 3,
            HandshakeType::NewSessionTicket => 4,
            HandshakeType::EncryptedExtensions => 8,
            HandshakeType::Certificate => 11,
            HandshakeType::ServerKeyExchange => 12,
            HandshakeType::CertificateRequest => 13,
            HandshakeType::ServerHelloDone => 14,
            HandshakeType::CertificateVerify => 15,
            HandshakeType::ClientKeyExchange => 16,
            HandshakeType::Finished => 20,
            HandshakeType::CertificateStatus => 22,
            HandshakeType::KeyUpdate => 24,
            HandshakeType::MessageHash => 254,
            HandshakeType::Unknown(value) => *value,
        }
    }

    pub fn parse(input: &[u8]) -> IResult<&[u8], HandshakeType> {
        let (input, value) = be_u8(input)?;
        Ok((input, HandshakeType::from_u8(value)))
    }
}

// ============================================================================
// Alerts
// ============================================================================

/// Alert severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertLevel {
    Warning,
    Fatal,
    Unknown(u8),
}

impl AlertLevel {
    pub fn from_u8(value: u8) -> Self {
        match value {
            1 => AlertLevel::Warning,
            2 => AlertLevel::Fatal,
            _ => AlertLevel::Unknown(value),
        }
    }

    pub fn as_u8(&self) -> u8 {
        match self {
            AlertLevel::Warning => 1,
            AlertLevel::Fatal => 2,
            AlertLevel::Unknown(value) => *value,
        }
    }
}

/// Alert descriptions (RFC 8446 6, RFC 5246 7.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertDescription {
    CloseNotify,
    UnexpectedMessage,
    BadRecordMac,
    RecordOverflow,
    HandshakeFailure,
    BadCertificate,
    UnsupportedCertificate,
    CertificateRevoked,
    CertificateExpired,
    CertificateUnknown,
    IllegalParameter,
    UnknownCa,
    AccessDenied,
    DecodeError,
    DecryptError,
    ProtocolVersion,
    InsufficientSecurity,
    InternalError,
    InappropriateFallback,
    UserCanceled,
    NoRenegotiation,
    MissingExtension,
    UnsupportedExtension,
    UnrecognizedName,
    UnknownPskIdentity,
    CertificateRequired,
    NoApplicationProtocol,
    Unknown(u8),
}

impl AlertDescription {
    pub fn from_u8(value: u8) -> Self {
        match value {
            0 => AlertDescription::CloseNotify,
            10 => AlertDescription::UnexpectedMessage,
            20 => AlertDescription::BadRecordMac,
            22 => AlertDescription::RecordOverflow,
            40 => AlertDescription::HandshakeFailure,
            42 => AlertDescription::BadCertificate,
            43 => AlertDescription::UnsupportedCertificate,
            44 => AlertDescription::CertificateRevoked,
            45 => AlertDescription::CertificateExpired,
            46 => AlertDescription::CertificateUnknown,
            47 => AlertDescription::IllegalParameter,
            48 => AlertDescription::UnknownCa,
            49 => AlertDescription::AccessDenied,
            50 => AlertDescription::DecodeError,
            51 => AlertDescription::DecryptError,
            70 => AlertDescription::ProtocolVersion,
            71 => AlertDescription::InsufficientSecurity,
            80 => AlertDescription::InternalError,
            86 => AlertDescription::InappropriateFallback,
            90 => AlertDescription::UserCanceled,
            100 => AlertDescription::NoRenegotiation,
            109 => AlertDescription::MissingExtension,
            110 => AlertDescription::UnsupportedExtension,
            112 => AlertDescription::UnrecognizedName,
            115 => AlertDescription::UnknownPskIdentity,
            116 => AlertDescription::CertificateRequired,
            120 => AlertDescription::NoApplicationProtocol,
            _ => AlertDescription::Unknown(value),
        }
    }

    pub fn as_u8(&self) -> u8 {
        match self {
            AlertDescription::CloseNotify => 0,
            AlertDescription::UnexpectedMessage => 10,
            AlertDescription::BadRecordMac => 20,
            AlertDescription::RecordOverflow => 22,
            AlertDescription::HandshakeFailure => 40,
            AlertDescription::BadCertificate => 42,
            AlertDescription::UnsupportedCertificate => 43,
            AlertDescription::CertificateRevoked => 44,
            AlertDescription::CertificateExpired => 45,
            AlertDescription::CertificateUnknown => 46,
            AlertDescription::IllegalParameter => 47,
            AlertDescription::UnknownCa => 48,
            AlertDescription::AccessDenied => 49,
            AlertDescription::DecodeError => 50,
            AlertDescription::DecryptError => 51,
            AlertDescription::ProtocolVersion => 70,
            AlertDescription::InsufficientSecurity => 71,
            AlertDescription::InternalError => 80,
            AlertDescription::InappropriateFallback => 86,
            AlertDescription::UserCanceled => 90,
            AlertDescription::NoRenegotiation => 100,
            AlertDescription::MissingExtension => 109,
            AlertDescription::UnsupportedExtension => 110,
            AlertDescription::UnrecognizedName => 112,
            AlertDescription::UnknownPskIdentity => 115,
            AlertDescription::CertificateRequired => 116,
            AlertDescription::NoApplicationProtocol => 120,
            AlertDescription::Unknown(value) => *value,
        }
    }
}

// ============================================================================
// Cipher Suites
// ============================================================================

/// Cipher suites known to the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(non_camel_case_types)]
pub enum CipherSuite {
    /// TLS_ECDHE_ECDSA_WITH_AES_128_GCM_SHA256 (1.2 family).
    ECDHE_ECDSA_AES128_GCM_SHA256,
    /// TLS_ECDHE_ECDSA_WITH_AES_256_GCM_SHA384 (1.2 family).
    ECDHE_ECDSA_AES256_GCM_SHA384,
    /// TLS_AES_128_GCM_SHA256 (1.3 family).
    TLS13_AES_128_GCM_SHA256,
    /// TLS_AES_256_GCM_SHA384 (1.3 family).
    TLS13_AES_256_GCM_SHA384,
    /// Signalling value standing in for an empty `renegotiation_info`.
    EMPTY_RENEGOTIATION_INFO_SCSV,
    Unknown(u16),
}

impl CipherSuite {
    pub fn from_u16(value: u16) -> Self {
        match value {
            0xC02B => CipherSuite::ECDHE_ECDSA_AES128_GCM_SHA256,
            0xC02C => CipherSuite::ECDHE_ECDSA_AES256_GCM_SHA384,
            0x1301 => CipherSuite::TLS13_AES_128_GCM_SHA256,
            0x1302 => CipherSuite::TLS13_AES_256_GCM_SHA384,
            0x00FF => CipherSuite::EMPTY_RENEGOTIATION_INFO_SCSV,
            _ => CipherSuite::Unknown(value),
        }
    }

    pub fn as_u16(&self) -> u16 {
        match self {
            CipherSuite::ECDHE_ECDSA_AES128_GCM_SHA256 => 0xC02B,
            CipherSuite::ECDHE_ECDSA_AES256_GCM_SHA384 => 0xC02C,
            CipherSuite::TLS13_AES_128_GCM_SHA256 => 0x1301,
            CipherSuite::TLS13_AES_256_GCM_SHA384 => 0x1302,
            CipherSuite::EMPTY_RENEGOTIATION_INFO_SCSV => 0x00FF,
            CipherSuite::Unknown(value) => *value,
        }
    }

    pub fn parse(input: &[u8]) -> IResult<&[u8], CipherSuite> {
        let (input, value) = be_u16(input)?;
        Ok((input, CipherSuite::from_u16(value)))
    }

    /// True for suites that only work with the TLS 1.3 handshake.
    pub fn is_tls13(&self) -> bool {
        matches!(
            self,
            CipherSuite::TLS13_AES_128_GCM_SHA256 | CipherSuite::TLS13_AES_256_GCM_SHA384
        )
    }

    /// Hash used for the PRF, HKDF and transcript.
    pub fn hash_algorithm(&self) -> HashAlgorithm {
        match self {
            CipherSuite::ECDHE_ECDSA_AES128_GCM_SHA256 => HashAlgorithm::SHA256,
            CipherSuite::TLS13_AES_128_GCM_SHA256 => HashAlgorithm::SHA256,
            CipherSuite::ECDHE_ECDSA_AES256_GCM_SHA384 => HashAlgorithm::SHA384,
            CipherSuite::TLS13_AES_256_GCM_SHA384 => HashAlgorithm::SHA384,
            _ => HashAlgorithm::Unknown(0),
        }
    }
}

// ============================================================================
// Named Groups
// ============================================================================

/// Key exchange groups (RFC 8422, RFC 8446).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NamedGroup {
    Secp256r1,
    Secp384r1,
    X25519,
    X448,
    Unknown(u16),
}

impl NamedGroup {
    pub fn from_u16(value: u16) -> Self {
        match value {
            23 => NamedGroup::Secp256r1,
            24 => NamedGroup::Secp384r1,
            29 => NamedGroup::X25519,
            30 => NamedGroup::X448,
            _ => NamedGroup::Unknown(value),
        }
    }

    pub fn as_u16(&self) -> u16 {
        match self {
            NamedGroup::Secp256r1 => 23,
            NamedGroup::Secp384r1 => 24,
            NamedGroup::X25519 => 29,
            NamedGroup::X448 => 30,
            NamedGroup::Unknown(value) => *value,
        }
    }

    pub fn parse(input: &[u8]) -> IResult<&[u8], NamedGroup> {
        let (input, value) = be_u16(input)?;
        Ok((input, NamedGroup::from_u16(value)))
    }
}

// ============================================================================
// Hash / Signature
// ============================================================================

/// Hash algorithms driving the PRF, HKDF and transcript hash.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(non_camel_case_types)]
pub enum HashAlgorithm {
    SHA256,
    SHA384,
    Unknown(u8),
}

impl HashAlgorithm {
    /// Digest length in bytes.
    pub fn output_len(&self) -> usize {
        match self {
            HashAlgorithm::SHA256 => 32,
            HashAlgorithm::SHA384 => 48,
            HashAlgorithm::Unknown(_) => 0,
        }
    }
}

/// How a TLS 1.3 PSK is used (RFC 8446 4.2.9).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PskKeyExchangeMode {
    /// `psk_ke`: the PSK alone keys the connection. No forward secrecy.
    PskKe,
    /// `psk_dhe_ke`: the PSK and an (EC)DHE exchange.
    PskDheKe,
}

impl PskKeyExchangeMode {
    pub fn as_u8(&self) -> u8 {
        match self {
            PskKeyExchangeMode::PskKe => 0,
            PskKeyExchangeMode::PskDheKe => 1,
        }
    }
}

/// Signature schemes (RFC 8446 4.2.3). For TLS 1.2 the two bytes are the
/// (hash, signature) pair, which coincide for the ECDSA schemes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(non_camel_case_types)]
pub enum SignatureScheme {
    ECDSA_SECP256R1_SHA256,
    ECDSA_SECP384R1_SHA384,
    RSA_PSS_RSAE_SHA256,
    ED25519,
    Unknown(u16),
}

impl SignatureScheme {
    pub fn from_u16(value: u16) -> Self {
        match value {
            0x0403 => SignatureScheme::ECDSA_SECP256R1_SHA256,
            0x0503 => SignatureScheme::ECDSA_SECP384R1_SHA384,
            0x0804 => SignatureScheme::RSA_PSS_RSAE_SHA256,
            0x0807 => SignatureScheme::ED25519,
            _ => SignatureScheme::Unknown(value),
        }
    }

    pub fn as_u16(&self) -> u16 {
        match self {
            SignatureScheme::ECDSA_SECP256R1_SHA256 => 0x0403,
            SignatureScheme::ECDSA_SECP384R1_SHA384 => 0x0503,
            SignatureScheme::RSA_PSS_RSAE_SHA256 => 0x0804,
            SignatureScheme::ED25519 => 0x0807,
            SignatureScheme::Unknown(value) => *value,
        }
    }

    pub fn parse(input: &[u8]) -> IResult<&[u8], SignatureScheme> {
        let (input, value) = be_u16(input)?;
        Ok((input, SignatureScheme::from_u16(value)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_values_survive() {
        assert_eq!(ContentType::from_u8(99).as_u8(), 99);
        assert_eq!(CipherSuite::from_u16(0xABCD).as_u16(), 0xABCD);
        assert_eq!(HandshakeType::from_u8(200), HandshakeType::Unknown(200));
    }

    #[test]
    fn suite_families() {
        assert!(CipherSuite::TLS13_AES_128_GCM_SHA256.is_tls13());
        assert!(!CipherSuite::ECDHE_ECDSA_AES256_GCM_SHA384.is_tls13());
        assert_eq!(
            CipherSuite::ECDHE_ECDSA_AES256_GCM_SHA384
                .hash_algorithm()
                .output_len(),
            48
        );
    }

    #[test]
    fn version_flags() {
        assert!(ProtocolVersion::Dtls12.is_datagram());
        assert!(!ProtocolVersion::Tls13.is_datagram());
        assert!(!ProtocolVersion::Dtls10.is_supported());
    }
}
