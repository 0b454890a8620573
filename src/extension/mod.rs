//! Hello extensions.
//!
//! An [`ExtensionRegistry`] maps an extension id to an [`Extension`], the
//! pair of operations that writes the extension into an outgoing hello and
//! reads it from an incoming one. Registries are plain values: one is built
//! per [`Config`](crate::Config) with the built-ins already inserted, and each
//! session clones it, so registering a custom extension on one session never
//! affects another.
//!
//! Extensions exchange state with the handshake through an [`ExtContext`].

mod builtin;

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::ops::BitOr;
use std::sync::Arc;

use nom::number::complete::be_u16;

use crate::codec::{put_u16, vec16, with_len16};
use crate::types::{Mode, NamedGroup, ProtocolVersion, Role, SignatureScheme};
use crate::Error;

pub use builtin::{PSK_KE, PSK_KE_DHE};
pub(crate) use builtin::fragment_length_code;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ExtensionType {
    ServerName,
    MaxFragmentLength,
    StatusRequest,
    SupportedGroups,
    EcPointFormats,
    SignatureAlgorithms,
    ExtendedMasterSecret,
    SessionTicket,
    PreSharedKey,
    SupportedVersions,
    Cookie,
    PskKeyExchangeModes,
    KeyShare,
    RenegotiationInfo,
    Unknown(u16),
}

impl ExtensionType {
    pub fn from_u16(value: u16) -> Self {
        match value {
            0 => ExtensionType::ServerName,
            1 => ExtensionType::MaxFragmentLength,
            5 => ExtensionType::StatusRequest,
            10 => ExtensionType::SupportedGroups,
            11 => ExtensionType::EcPointFormats,
            13 => ExtensionType::SignatureAlgorithms,
            23 => ExtensionType::ExtendedMasterSecret,
            35 => ExtensionType::SessionTicket,
            41 => ExtensionType::PreSharedKey,
            43 => ExtensionType::SupportedVersions,
            44 => ExtensionType::Cookie,
            45 => ExtensionType::PskKeyExchangeModes,
            51 => ExtensionType::KeyShare,
            0xff01 => ExtensionType::RenegotiationInfo,
            _ => ExtensionType::Unknown(value),
        }
    }

    pub fn as_u16(&self) -> u16 {
        match self {
            ExtensionType::ServerName => 0,
            ExtensionType::MaxFragmentLength => 1,
            ExtensionType::StatusRequest => 5,
            ExtensionType::SupportedGroups => 10,
            ExtensionType::EcPointFormats => 11,
            ExtensionType::SignatureAlgorithms => 13,
            ExtensionType::ExtendedMasterSecret => 23,
            ExtensionType::SessionTicket => 35,
            ExtensionType::PreSharedKey => 41,
            ExtensionType::SupportedVersions => 43,
            ExtensionType::Cookie => 44,
            ExtensionType::PskKeyExchangeModes => 45,
            ExtensionType::KeyShare => 51,
            ExtensionType::RenegotiationInfo => 0xff01,
            ExtensionType::Unknown(value) => *value,
        }
    }
}

/// The message an extension block belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    ClientHello,
    Tls12ServerHello,
    Tls13ServerHello,
    EncryptedExtensions,
    HelloRetryRequest,
}

/// Where an extension may appear.
#[derive(Clone, Copy, PartialEq, Eq, Default)]
pub struct Applicability(u16);

impl Applicability {
    pub const CLIENT_HELLO: Applicability = Applicability(1 << 0);
    pub const TLS12_SERVER_HELLO: Applicability = Applicability(1 << 1);
    pub const TLS13_SERVER_HELLO: Applicability = Applicability(1 << 2);
    pub const ENCRYPTED_EXTENSIONS: Applicability = Applicability(1 << 3);
    pub const HELLO_RETRY_REQUEST: Applicability = Applicability(1 << 4);
    pub const STREAM: Applicability = Applicability(1 << 5);
    pub const DATAGRAM: Applicability = Applicability(1 << 6);
    /// A server may send it without the client having sent it first.
    pub const UNSOLICITED: Applicability = Applicability(1 << 7);

    pub const ANY_TRANSPORT: Applicability = Applicability((1 << 5) | (1 << 6));

    pub fn contains(&self, other: Applicability) -> bool {
        self.0 & other.0 == other.0
    }

    fn for_kind(kind: MessageKind) -> Applicability {
        match kind {
            MessageKind::ClientHello => Self::CLIENT_HELLO,
            MessageKind::Tls12ServerHello => Self::TLS12_SERVER_HELLO,
            MessageKind::Tls13ServerHello => Self::TLS13_SERVER_HELLO,
            MessageKind::EncryptedExtensions => Self::ENCRYPTED_EXTENSIONS,
            MessageKind::HelloRetryRequest => Self::HELLO_RETRY_REQUEST,
        }
    }

    fn allows(&self, kind: MessageKind, mode: Mode) -> bool {
        let transport = match mode {
            Mode::Stream => Self::STREAM,
            Mode::Datagram => Self::DATAGRAM,
        };
        self.contains(Self::for_kind(kind)) && self.contains(transport)
    }
}

impl BitOr for Applicability {
    type Output = Applicability;

    fn bitor(self, rhs: Self) -> Self::Output {
        Applicability(self.0 | rhs.0)
    }
}

impl fmt::Debug for Applicability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Applicability({:#06x})", self.0)
    }
}

/// Handshake state visible to extensions.
///
/// Built-in extensions read and write the crate-private fields. Custom
/// extensions use the per-id data slots and the accessors.
#[derive(Debug, Clone)]
pub struct ExtContext {
    pub(crate) role: Role,
    pub(crate) mode: Mode,
    pub(crate) received: BTreeSet<u16>,
    pub(crate) sent: BTreeSet<u16>,
    slots: BTreeMap<u16, Vec<u8>>,

    pub(crate) server_name: Option<String>,
    /// Client: the code asked for. Server: the code the client asked for.
    pub(crate) max_fragment: Option<u8>,
    /// Client: whether to ask for a stapled response. Server: whether the
    /// client asked.
    pub(crate) ocsp_request: bool,
    pub(crate) ocsp_staple: bool,
    /// Client: versions offered. Server: versions the client offered.
    pub(crate) versions: Vec<ProtocolVersion>,
    pub(crate) selected_version: Option<ProtocolVersion>,
    pub(crate) groups: Vec<NamedGroup>,
    pub(crate) signature_schemes: Vec<SignatureScheme>,
    pub(crate) client_shares: Vec<(NamedGroup, Vec<u8>)>,
    pub(crate) server_share: Option<(NamedGroup, Vec<u8>)>,
    pub(crate) hrr_group: Option<NamedGroup>,
    pub(crate) cookie: Option<Vec<u8>>,
    pub(crate) ems_enabled: bool,
    pub(crate) ems: bool,
    pub(crate) secure_renegotiation: bool,
    pub(crate) renegotiating: bool,
    pub(crate) client_verify_data: Vec<u8>,
    pub(crate) server_verify_data: Vec<u8>,
    pub(crate) tickets_enabled: bool,
    pub(crate) ticket: Option<Vec<u8>>,
    pub(crate) ticket_promised: bool,
    pub(crate) psk_modes: Vec<u8>,
    pub(crate) psk_identities: Vec<(Vec<u8>, u32)>,
    pub(crate) psk_binders: Vec<Vec<u8>>,
    pub(crate) psk_binder_len: usize,
    pub(crate) selected_psk: Option<u16>,
}

impl ExtContext {
    pub(crate) fn new(role: Role, mode: Mode) -> Self {
        ExtContext {
            role,
            mode,
            received: BTreeSet::new(),
            sent: BTreeSet::new(),
            slots: BTreeMap::new(),
            server_name: None,
            max_fragment: None,
            ocsp_request: false,
            ocsp_staple: false,
            versions: Vec::new(),
            selected_version: None,
            groups: Vec::new(),
            signature_schemes: Vec::new(),
            client_shares: Vec::new(),
            server_share: None,
            hrr_group: None,
            cookie: None,
            ems_enabled: false,
            ems: false,
            secure_renegotiation: false,
            renegotiating: false,
            client_verify_data: Vec::new(),
            server_verify_data: Vec::new(),
            tickets_enabled: false,
            ticket: None,
            ticket_promised: false,
            psk_modes: Vec::new(),
            psk_identities: Vec::new(),
            psk_binders: Vec::new(),
            psk_binder_len: 0,
            selected_psk: None,
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// The negotiated version, once known.
    pub fn selected_version(&self) -> Option<ProtocolVersion> {
        self.selected_version
    }

    pub fn server_name(&self) -> Option<&str> {
        self.server_name.as_deref()
    }

    /// Whether the peer's hello carried `id`.
    pub fn was_received(&self, id: u16) -> bool {
        self.received.contains(&id)
    }

    /// Whether our hello carried `id`.
    pub fn was_sent(&self, id: u16) -> bool {
        self.sent.contains(&id)
    }

    pub fn set_data(&mut self, id: u16, data: Vec<u8>) {
        self.slots.insert(id, data);
    }

    pub fn data(&self, id: u16) -> Option<&[u8]> {
        self.slots.get(&id).map(|v| v.as_slice())
    }

    pub(crate) fn slots(&self) -> &BTreeMap<u16, Vec<u8>> {
        &self.slots
    }

    /// The record size limit both hellos agreed on.
    pub fn negotiated_fragment_length(&self) -> Option<usize> {
        let id = ExtensionType::MaxFragmentLength.as_u16();
        if !self.was_sent(id) || !self.was_received(id) {
            return None;
        }
        self.max_fragment.and_then(builtin::fragment_length)
    }

    pub(crate) fn offers_tls12(&self) -> bool {
        self.versions
            .iter()
            .any(|v| matches!(v, ProtocolVersion::Tls12 | ProtocolVersion::Dtls12))
    }

    pub(crate) fn offers_tls13(&self) -> bool {
        self.versions.contains(&ProtocolVersion::Tls13)
    }

    /// Forget what one hello exchange left behind, keeping configuration
    /// and renegotiation binding.
    pub(crate) fn reset_exchange(&mut self) {
        self.received.clear();
        self.sent.clear();
        self.selected_version = None;
        self.client_shares.clear();
        self.server_share = None;
        self.hrr_group = None;
        self.cookie = None;
        self.ems = false;
        self.ticket_promised = false;
        self.psk_identities.clear();
        self.psk_binders.clear();
        self.selected_psk = None;
    }

    /// Drop what the previous ClientHello told a server, ahead of parsing
    /// the next one.
    pub(crate) fn reset_peer_offer(&mut self) {
        self.received.clear();
        self.server_name = None;
        self.max_fragment = None;
        self.ocsp_request = false;
        self.versions.clear();
        self.groups.clear();
        self.signature_schemes.clear();
        self.client_shares.clear();
        self.cookie = None;
        self.ems = false;
        self.ticket = None;
        self.psk_modes.clear();
        self.psk_identities.clear();
        self.psk_binders.clear();
    }
}

/// Writes and reads one extension.
pub trait Extension: Send + Sync + fmt::Debug {
    /// Append the extension body to `out`. Return false to leave the
    /// extension out of this message.
    fn generate(
        &self,
        ctx: &mut ExtContext,
        kind: MessageKind,
        out: &mut Vec<u8>,
    ) -> Result<bool, Error>;

    /// Consume an extension body received in `kind`.
    fn parse(&self, ctx: &mut ExtContext, kind: MessageKind, data: &[u8]) -> Result<(), Error>;
}

#[derive(Clone)]
struct Entry {
    name: &'static str,
    extension: Arc<dyn Extension>,
    applicability: Applicability,
}

impl fmt::Debug for Entry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Entry")
            .field("name", &self.name)
            .field("applicability", &self.applicability)
            .finish()
    }
}

/// Ordered table of extensions by id.
#[derive(Debug, Clone, Default)]
pub struct ExtensionRegistry {
    entries: BTreeMap<u16, Entry>,
}

impl ExtensionRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding every built-in extension.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        for (id, name, extension, applicability) in builtin::all() {
            registry.entries.insert(
                id.as_u16(),
                Entry {
                    name,
                    extension,
                    applicability,
                },
            );
        }
        registry
    }

    /// Add an extension. Replacing an id that is already present needs
    /// `allow_override`, otherwise this fails with
    /// [`Error::AlreadyRegistered`].
    pub fn register(
        &mut self,
        id: u16,
        name: &'static str,
        extension: Arc<dyn Extension>,
        applicability: Applicability,
        allow_override: bool,
    ) -> Result<(), Error> {
        if self.entries.contains_key(&id) && !allow_override {
            return Err(Error::AlreadyRegistered(id));
        }
        debug!("Register extension {} ({})", id, name);
        self.entries.insert(
            id,
            Entry {
                name,
                extension,
                applicability,
            },
        );
        Ok(())
    }

    pub fn contains(&self, id: u16) -> bool {
        self.entries.contains_key(&id)
    }

    pub fn name(&self, id: u16) -> Option<&'static str> {
        self.entries.get(&id).map(|e| e.name)
    }

    /// Build the extension block body (without its length prefix) for `kind`.
    ///
    /// A ClientHello gets every applicable extension. Server messages only
    /// answer extensions the client sent, unless flagged unsolicited.
    /// `pre_shared_key` always goes last.
    pub fn generate_all(&self, ctx: &mut ExtContext, kind: MessageKind) -> Result<Vec<u8>, Error> {
        let psk = ExtensionType::PreSharedKey.as_u16();
        let mut out = Vec::new();

        let ordered = self
            .entries
            .iter()
            .filter(|(id, _)| **id != psk)
            .chain(self.entries.get_key_value(&psk));

        for (&id, entry) in ordered {
            if !entry.applicability.allows(kind, ctx.mode) {
                continue;
            }
            if kind != MessageKind::ClientHello
                && !ctx.received.contains(&id)
                && !entry.applicability.contains(Applicability::UNSOLICITED)
            {
                continue;
            }

            let at = out.len();
            put_u16(&mut out, id);
            let present = with_len16(&mut out, |body| entry.extension.generate(ctx, kind, body))?;
            if present {
                trace!("Generate extension {} in {:?}", entry.name, kind);
                ctx.sent.insert(id);
            } else {
                out.truncate(at);
            }
        }

        Ok(out)
    }

    /// Parse an incoming extension block body and dispatch every entry.
    ///
    /// The whole block is checked for repeated ids before anything is
    /// dispatched.
    pub fn parse_all(&self, ctx: &mut ExtContext, kind: MessageKind, block: &[u8]) -> Result<(), Error> {
        let list = parse_extension_list(block)?;

        let mut seen = BTreeSet::new();
        for (id, _) in &list {
            if !seen.insert(*id) {
                return Err(Error::IllegalExtension(*id));
            }
        }

        let psk = ExtensionType::PreSharedKey.as_u16();
        if kind == MessageKind::ClientHello {
            if let Some(pos) = list.iter().position(|(id, _)| *id == psk) {
                if pos != list.len() - 1 {
                    return Err(Error::IllegalParameter("pre_shared_key not last".into()));
                }
            }
        }

        ctx.received = seen;
        for (id, data) in list {
            self.dispatch(ctx, kind, id, data)?;
        }
        Ok(())
    }

    /// Hand one received extension to its handler.
    pub fn dispatch(
        &self,
        ctx: &mut ExtContext,
        kind: MessageKind,
        id: u16,
        data: &[u8],
    ) -> Result<(), Error> {
        let from_client = kind == MessageKind::ClientHello;

        let Some(entry) = self.entries.get(&id) else {
            if from_client {
                trace!("Ignore unknown extension {}", id);
                return Ok(());
            }
            return Err(Error::UnsupportedExtension(id));
        };

        if !entry.applicability.allows(kind, ctx.mode) {
            if from_client {
                trace!("Ignore extension {} not valid in {:?}", entry.name, kind);
                return Ok(());
            }
            return Err(Error::UnsupportedExtension(id));
        }

        if !from_client
            && !ctx.sent.contains(&id)
            && !entry.applicability.contains(Applicability::UNSOLICITED)
        {
            return Err(Error::UnsupportedExtension(id));
        }

        trace!("Parse extension {} in {:?}", entry.name, kind);
        entry.extension.parse(ctx, kind, data)
    }
}

/// Split an extension block body into `(id, data)` pairs.
pub(crate) fn parse_extension_list(mut block: &[u8]) -> Result<Vec<(u16, &[u8])>, Error> {
    let mut out = Vec::new();
    while !block.is_empty() {
        let (rest, id) = be_u16(block)?;
        let (rest, data) = vec16(rest)?;
        out.push((id, data));
        block = rest;
    }
    Ok(out)
}

/// Find one extension's body in a raw block.
pub(crate) fn find_extension(block: &[u8], id: ExtensionType) -> Result<Option<&[u8]>, Error> {
    Ok(parse_extension_list(block)?
        .into_iter()
        .find(|(i, _)| *i == id.as_u16())
        .map(|(_, data)| data))
}
