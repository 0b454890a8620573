use std::sync::Arc;

use nom::combinator::all_consuming;
use nom::multi::many0;
use nom::number::complete::{be_u16, be_u32, be_u8};
use nom::sequence::tuple;
use nom::IResult;
use subtle::ConstantTimeEq;

use super::{Applicability as A, ExtContext, Extension, ExtensionType, MessageKind};
use crate::codec::{put_u16, put_u32, put_vec16, put_vec8, vec16, vec8, with_len16, with_len8};
use crate::message::parse_body;
use crate::types::{NamedGroup, ProtocolVersion, Role, SignatureScheme};
use crate::Error;

/// `psk_ke`: PSK only, no (EC)DHE.
pub const PSK_KE: u8 = 0;

/// `psk_dhe_ke`: PSK with (EC)DHE.
pub const PSK_KE_DHE: u8 = 1;

/// `CertificateStatusType.ocsp`
const STATUS_TYPE_OCSP: u8 = 1;

/// The max_fragment_length code for `len`, or None for the protocol default.
pub(crate) fn fragment_length_code(len: usize) -> Option<u8> {
    match len {
        512 => Some(1),
        1024 => Some(2),
        2048 => Some(3),
        4096 => Some(4),
        _ => None,
    }
}

/// Plaintext bytes per record for a max_fragment_length code.
pub(crate) fn fragment_length(code: u8) -> Option<usize> {
    match code {
        1..=4 => Some(256 << code),
        _ => None,
    }
}

type Builtin = (ExtensionType, &'static str, Arc<dyn Extension>, A);

pub(super) fn all() -> Vec<Builtin> {
    let hellos = A::CLIENT_HELLO | A::ANY_TRANSPORT;
    let tls12 = hellos | A::TLS12_SERVER_HELLO;
    vec![
        (
            ExtensionType::ServerName,
            "server_name",
            Arc::new(ServerName),
            tls12 | A::ENCRYPTED_EXTENSIONS,
        ),
        (
            ExtensionType::MaxFragmentLength,
            "max_fragment_length",
            Arc::new(MaxFragmentLength),
            tls12 | A::ENCRYPTED_EXTENSIONS,
        ),
        (
            ExtensionType::StatusRequest,
            "status_request",
            Arc::new(StatusRequest),
            tls12,
        ),
        (
            ExtensionType::SupportedGroups,
            "supported_groups",
            Arc::new(SupportedGroups),
            hellos,
        ),
        (
            ExtensionType::EcPointFormats,
            "ec_point_formats",
            Arc::new(EcPointFormats),
            tls12,
        ),
        (
            ExtensionType::SignatureAlgorithms,
            "signature_algorithms",
            Arc::new(SignatureAlgorithms),
            hellos,
        ),
        (
            ExtensionType::ExtendedMasterSecret,
            "extended_master_secret",
            Arc::new(ExtendedMasterSecret),
            tls12,
        ),
        (
            ExtensionType::SessionTicket,
            "session_ticket",
            Arc::new(SessionTicket),
            tls12,
        ),
        (
            ExtensionType::PreSharedKey,
            "pre_shared_key",
            Arc::new(PreSharedKey),
            A::CLIENT_HELLO | A::TLS13_SERVER_HELLO | A::STREAM,
        ),
        (
            ExtensionType::SupportedVersions,
            "supported_versions",
            Arc::new(SupportedVersions),
            hellos | A::TLS13_SERVER_HELLO | A::HELLO_RETRY_REQUEST,
        ),
        (
            ExtensionType::Cookie,
            "cookie",
            Arc::new(Cookie),
            A::CLIENT_HELLO | A::HELLO_RETRY_REQUEST | A::STREAM | A::UNSOLICITED,
        ),
        (
            ExtensionType::PskKeyExchangeModes,
            "psk_key_exchange_modes",
            Arc::new(PskKeyExchangeModes),
            A::CLIENT_HELLO | A::STREAM,
        ),
        (
            ExtensionType::KeyShare,
            "key_share",
            Arc::new(KeyShare),
            A::CLIENT_HELLO | A::TLS13_SERVER_HELLO | A::HELLO_RETRY_REQUEST | A::STREAM,
        ),
        (
            ExtensionType::RenegotiationInfo,
            "renegotiation_info",
            Arc::new(RenegotiationInfo),
            tls12,
        ),
    ]
}

fn expect_empty(data: &[u8], what: &str) -> Result<(), Error> {
    if data.is_empty() {
        Ok(())
    } else {
        Err(Error::IllegalParameter(format!("{} must be empty", what)))
    }
}

fn u16_item(input: &[u8]) -> IResult<&[u8], u16> {
    be_u16(input)
}

fn list16_u16(input: &[u8]) -> IResult<&[u8], Vec<u16>> {
    crate::codec::list16(u16_item)(input)
}

#[derive(Debug)]
struct ServerName;

impl Extension for ServerName {
    fn generate(&self, ctx: &mut ExtContext, kind: MessageKind, out: &mut Vec<u8>) -> Result<bool, Error> {
        if kind != MessageKind::ClientHello {
            // Acknowledge with an empty body.
            return Ok(ctx.server_name.is_some());
        }
        let Some(name) = &ctx.server_name else {
            return Ok(false);
        };
        with_len16(out, |out| {
            out.push(0);
            put_vec16(out, name.as_bytes())
        })?;
        Ok(true)
    }

    fn parse(&self, ctx: &mut ExtContext, kind: MessageKind, data: &[u8]) -> Result<(), Error> {
        if kind != MessageKind::ClientHello {
            return expect_empty(data, "server_name");
        }
        let names = parse_body(data, |i| {
            let (rest, list) = vec16(i)?;
            let (_, names) = all_consuming(many0(tuple((be_u8, vec16))))(list)?;
            Ok((rest, names))
        })?;
        for (name_type, host) in names {
            if name_type == 0 {
                let host = std::str::from_utf8(host)
                    .map_err(|_| Error::IllegalParameter("server_name not utf-8".into()))?;
                ctx.server_name = Some(host.to_string());
            }
        }
        Ok(())
    }
}

/// RFC 6066 max_fragment_length. The client asks for a smaller record
/// size, the server agrees by echoing the same code.
#[derive(Debug)]
struct MaxFragmentLength;

impl Extension for MaxFragmentLength {
    fn generate(&self, ctx: &mut ExtContext, _kind: MessageKind, out: &mut Vec<u8>) -> Result<bool, Error> {
        let Some(code) = ctx.max_fragment else {
            return Ok(false);
        };
        out.push(code);
        Ok(true)
    }

    fn parse(&self, ctx: &mut ExtContext, kind: MessageKind, data: &[u8]) -> Result<(), Error> {
        let code = parse_body(data, be_u8)?;
        if kind == MessageKind::ClientHello {
            if fragment_length(code).is_none() {
                return Err(Error::IllegalParameter(format!("max_fragment_length code {}", code)));
            }
            ctx.max_fragment = Some(code);
            return Ok(());
        }
        if ctx.max_fragment != Some(code) {
            return Err(Error::IllegalParameter("max_fragment_length not as requested".into()));
        }
        Ok(())
    }
}

/// RFC 6066 status_request. The client asks for a stapled OCSP response. A
/// 1.2 server that has one acknowledges with an empty body and sends it in a
/// CertificateStatus message; a 1.3 server puts it in the leaf certificate
/// entry instead.
#[derive(Debug)]
struct StatusRequest;

impl Extension for StatusRequest {
    fn generate(&self, ctx: &mut ExtContext, kind: MessageKind, out: &mut Vec<u8>) -> Result<bool, Error> {
        if kind != MessageKind::ClientHello {
            return Ok(ctx.ocsp_request && ctx.ocsp_staple);
        }
        if !ctx.ocsp_request {
            return Ok(false);
        }
        // No responder ids, no request extensions.
        out.push(STATUS_TYPE_OCSP);
        put_u16(out, 0);
        put_u16(out, 0);
        Ok(true)
    }

    fn parse(&self, ctx: &mut ExtContext, kind: MessageKind, data: &[u8]) -> Result<(), Error> {
        if kind != MessageKind::ClientHello {
            return expect_empty(data, "status_request");
        }
        let status: IResult<&[u8], u8> = be_u8(data);
        let (request, status_type) = status?;
        if status_type != STATUS_TYPE_OCSP {
            trace!("Ignore status_request of type {}", status_type);
            return Ok(());
        }
        // OCSPStatusRequest: responder ids, then request extensions. Both
        // are checked for shape and otherwise ignored.
        parse_body(request, |i| {
            let (i, responders) = vec16(i)?;
            all_consuming(many0(vec16))(responders)?;
            let (i, _extensions) = vec16(i)?;
            Ok((i, ()))
        })?;
        ctx.ocsp_request = true;
        Ok(())
    }
}

#[derive(Debug)]
struct SupportedGroups;

impl Extension for SupportedGroups {
    fn generate(&self, ctx: &mut ExtContext, _kind: MessageKind, out: &mut Vec<u8>) -> Result<bool, Error> {
        if ctx.groups.is_empty() {
            return Ok(false);
        }
        with_len16(out, |out| {
            for g in &ctx.groups {
                put_u16(out, g.as_u16());
            }
            Ok(())
        })?;
        Ok(true)
    }

    fn parse(&self, ctx: &mut ExtContext, _kind: MessageKind, data: &[u8]) -> Result<(), Error> {
        let groups = parse_body(data, list16_u16)?;
        ctx.groups = groups.into_iter().map(NamedGroup::from_u16).collect();
        Ok(())
    }
}

#[derive(Debug)]
struct EcPointFormats;

impl Extension for EcPointFormats {
    fn generate(&self, ctx: &mut ExtContext, kind: MessageKind, out: &mut Vec<u8>) -> Result<bool, Error> {
        if kind == MessageKind::ClientHello && !ctx.offers_tls12() {
            return Ok(false);
        }
        // uncompressed only
        put_vec8(out, &[0])?;
        Ok(true)
    }

    fn parse(&self, _ctx: &mut ExtContext, _kind: MessageKind, data: &[u8]) -> Result<(), Error> {
        let formats = parse_body(data, vec8)?;
        if !formats.contains(&0) {
            return Err(Error::IllegalParameter("uncompressed point format missing".into()));
        }
        Ok(())
    }
}

#[derive(Debug)]
struct SignatureAlgorithms;

impl Extension for SignatureAlgorithms {
    fn generate(&self, ctx: &mut ExtContext, _kind: MessageKind, out: &mut Vec<u8>) -> Result<bool, Error> {
        if ctx.signature_schemes.is_empty() {
            return Ok(false);
        }
        with_len16(out, |out| {
            for s in &ctx.signature_schemes {
                put_u16(out, s.as_u16());
            }
            Ok(())
        })?;
        Ok(true)
    }

    fn parse(&self, ctx: &mut ExtContext, _kind: MessageKind, data: &[u8]) -> Result<(), Error> {
        let schemes = parse_body(data, list16_u16)?;
        ctx.signature_schemes = schemes.into_iter().map(SignatureScheme::from_u16).collect();
        Ok(())
    }
}

#[derive(Debug)]
struct ExtendedMasterSecret;

impl Extension for ExtendedMasterSecret {
    fn generate(&self, ctx: &mut ExtContext, kind: MessageKind, _out: &mut Vec<u8>) -> Result<bool, Error> {
        Ok(match kind {
            MessageKind::ClientHello => ctx.ems_enabled && ctx.offers_tls12(),
            _ => ctx.ems,
        })
    }

    fn parse(&self, ctx: &mut ExtContext, _kind: MessageKind, data: &[u8]) -> Result<(), Error> {
        expect_empty(data, "extended_master_secret")?;
        ctx.ems = ctx.ems_enabled;
        Ok(())
    }
}

#[derive(Debug)]
struct SessionTicket;

impl Extension for SessionTicket {
    fn generate(&self, ctx: &mut ExtContext, kind: MessageKind, out: &mut Vec<u8>) -> Result<bool, Error> {
        if kind != MessageKind::ClientHello {
            return Ok(ctx.ticket_promised);
        }
        if !ctx.tickets_enabled || !ctx.offers_tls12() {
            return Ok(false);
        }
        if let Some(ticket) = &ctx.ticket {
            out.extend_from_slice(ticket);
        }
        Ok(true)
    }

    fn parse(&self, ctx: &mut ExtContext, kind: MessageKind, data: &[u8]) -> Result<(), Error> {
        if kind != MessageKind::ClientHello {
            expect_empty(data, "session_ticket")?;
            ctx.ticket_promised = true;
            return Ok(());
        }
        if ctx.tickets_enabled && !data.is_empty() {
            ctx.ticket = Some(data.to_vec());
        }
        Ok(())
    }
}

#[derive(Debug)]
struct PreSharedKey;

impl Extension for PreSharedKey {
    fn generate(&self, ctx: &mut ExtContext, kind: MessageKind, out: &mut Vec<u8>) -> Result<bool, Error> {
        if kind != MessageKind::ClientHello {
            let Some(index) = ctx.selected_psk else {
                return Ok(false);
            };
            put_u16(out, index);
            return Ok(true);
        }
        if ctx.psk_identities.is_empty() || !ctx.offers_tls13() {
            return Ok(false);
        }
        with_len16(out, |out| {
            for (identity, age) in &ctx.psk_identities {
                put_vec16(out, identity)?;
                put_u32(out, *age);
            }
            Ok(())
        })?;
        // Binders are filled in once the rest of the hello is known.
        let placeholder = vec![0u8; ctx.psk_binder_len];
        with_len16(out, |out| {
            for _ in &ctx.psk_identities {
                put_vec8(out, &placeholder)?;
            }
            Ok(())
        })?;
        Ok(true)
    }

    fn parse(&self, ctx: &mut ExtContext, kind: MessageKind, data: &[u8]) -> Result<(), Error> {
        if kind != MessageKind::ClientHello {
            let index = parse_body(data, be_u16)?;
            if index as usize >= ctx.psk_identities.len() {
                return Err(Error::IllegalParameter("selected psk out of range".into()));
            }
            ctx.selected_psk = Some(index);
            return Ok(());
        }
        let (identities, binders) = parse_body(data, |i| {
            let (i, ids) = vec16(i)?;
            let (_, identities) = all_consuming(many0(tuple((vec16, be_u32))))(ids)?;
            let (i, bs) = vec16(i)?;
            let (_, binders) = all_consuming(many0(vec8))(bs)?;
            Ok((i, (identities, binders)))
        })?;
        if identities.is_empty() || identities.len() != binders.len() {
            return Err(Error::IllegalParameter("psk identities and binders differ".into()));
        }
        ctx.psk_identities = identities
            .into_iter()
            .map(|(id, age)| (id.to_vec(), age))
            .collect();
        ctx.psk_binders = binders.into_iter().map(|b| b.to_vec()).collect();
        Ok(())
    }
}

#[derive(Debug)]
struct SupportedVersions;

impl Extension for SupportedVersions {
    fn generate(&self, ctx: &mut ExtContext, kind: MessageKind, out: &mut Vec<u8>) -> Result<bool, Error> {
        if kind != MessageKind::ClientHello {
            let Some(v) = ctx.selected_version else {
                return Ok(false);
            };
            put_u16(out, v.as_u16());
            return Ok(true);
        }
        if !ctx.offers_tls13() {
            return Ok(false);
        }
        with_len8(out, |out| {
            for v in &ctx.versions {
                put_u16(out, v.as_u16());
            }
            Ok(())
        })?;
        Ok(true)
    }

    fn parse(&self, ctx: &mut ExtContext, kind: MessageKind, data: &[u8]) -> Result<(), Error> {
        if kind != MessageKind::ClientHello {
            let v = ProtocolVersion::from_u16(parse_body(data, be_u16)?);
            if v != ProtocolVersion::Tls13 || !ctx.versions.contains(&v) {
                return Err(Error::IllegalParameter(format!("server selected {:?}", v)));
            }
            ctx.selected_version = Some(v);
            return Ok(());
        }
        let list = parse_body(data, |i| {
            let (rest, body) = vec8(i)?;
            let (_, versions) = all_consuming(many0(u16_item))(body)?;
            Ok((rest, versions))
        })?;
        ctx.versions = list.into_iter().map(ProtocolVersion::from_u16).collect();
        Ok(())
    }
}

#[derive(Debug)]
struct Cookie;

impl Extension for Cookie {
    fn generate(&self, ctx: &mut ExtContext, _kind: MessageKind, out: &mut Vec<u8>) -> Result<bool, Error> {
        let Some(cookie) = &ctx.cookie else {
            return Ok(false);
        };
        put_vec16(out, cookie)?;
        Ok(true)
    }

    fn parse(&self, ctx: &mut ExtContext, _kind: MessageKind, data: &[u8]) -> Result<(), Error> {
        let cookie = parse_body(data, vec16)?;
        if cookie.is_empty() {
            return Err(Error::IllegalParameter("empty cookie".into()));
        }
        ctx.cookie = Some(cookie.to_vec());
        Ok(())
    }
}

#[derive(Debug)]
struct PskKeyExchangeModes;

impl Extension for PskKeyExchangeModes {
    fn generate(&self, ctx: &mut ExtContext, _kind: MessageKind, out: &mut Vec<u8>) -> Result<bool, Error> {
        let offers_psk = ctx.tickets_enabled || !ctx.psk_identities.is_empty();
        if !ctx.offers_tls13() || !offers_psk || ctx.psk_modes.is_empty() {
            return Ok(false);
        }
        put_vec8(out, &ctx.psk_modes)?;
        Ok(true)
    }

    fn parse(&self, ctx: &mut ExtContext, _kind: MessageKind, data: &[u8]) -> Result<(), Error> {
        ctx.psk_modes = parse_body(data, vec8)?.to_vec();
        Ok(())
    }
}

#[derive(Debug)]
struct KeyShare;

impl Extension for KeyShare {
    fn generate(&self, ctx: &mut ExtContext, kind: MessageKind, out: &mut Vec<u8>) -> Result<bool, Error> {
        match kind {
            MessageKind::ClientHello => {
                if !ctx.offers_tls13() {
                    return Ok(false);
                }
                with_len16(out, |out| {
                    for (group, key) in &ctx.client_shares {
                        put_u16(out, group.as_u16());
                        put_vec16(out, key)?;
                    }
                    Ok(())
                })?;
            }
            MessageKind::HelloRetryRequest => {
                let Some(group) = ctx.hrr_group else {
                    return Ok(false);
                };
                put_u16(out, group.as_u16());
            }
            _ => {
                let Some((group, key)) = &ctx.server_share else {
                    return Ok(false);
                };
                put_u16(out, group.as_u16());
                put_vec16(out, key)?;
            }
        }
        Ok(true)
    }

    fn parse(&self, ctx: &mut ExtContext, kind: MessageKind, data: &[u8]) -> Result<(), Error> {
        match kind {
            MessageKind::ClientHello => {
                let shares = parse_body(data, |i| {
                    let (rest, body) = vec16(i)?;
                    let (_, shares) = all_consuming(many0(tuple((be_u16, vec16))))(body)?;
                    Ok((rest, shares))
                })?;
                ctx.client_shares.clear();
                for (group, key) in shares {
                    let group = NamedGroup::from_u16(group);
                    if ctx.client_shares.iter().any(|(g, _)| *g == group) {
                        return Err(Error::IllegalParameter("repeated key_share group".into()));
                    }
                    ctx.client_shares.push((group, key.to_vec()));
                }
            }
            MessageKind::HelloRetryRequest => {
                let group = NamedGroup::from_u16(parse_body(data, be_u16)?);
                let offered = ctx.client_shares.iter().any(|(g, _)| *g == group);
                if offered || !ctx.groups.contains(&group) {
                    return Err(Error::IllegalParameter("retry requested bad group".into()));
                }
                ctx.hrr_group = Some(group);
            }
            _ => {
                let (group, key) = parse_body(data, tuple((be_u16, vec16)))?;
                let group = NamedGroup::from_u16(group);
                if !ctx.client_shares.iter().any(|(g, _)| *g == group) {
                    return Err(Error::IllegalParameter("server share for group not offered".into()));
                }
                ctx.server_share = Some((group, key.to_vec()));
            }
        }
        Ok(())
    }
}

#[derive(Debug)]
struct RenegotiationInfo;

impl RenegotiationInfo {
    fn expected(ctx: &ExtContext, kind: MessageKind) -> Vec<u8> {
        if !ctx.renegotiating {
            return Vec::new();
        }
        let mut v = ctx.client_verify_data.clone();
        if kind != MessageKind::ClientHello {
            v.extend_from_slice(&ctx.server_verify_data);
        }
        v
    }
}

impl Extension for RenegotiationInfo {
    fn generate(&self, ctx: &mut ExtContext, kind: MessageKind, out: &mut Vec<u8>) -> Result<bool, Error> {
        match (ctx.role, kind) {
            (Role::Client, MessageKind::ClientHello) if ctx.offers_tls12() => {}
            (Role::Server, MessageKind::Tls12ServerHello) if ctx.secure_renegotiation => {}
            _ => return Ok(false),
        }
        put_vec8(out, &Self::expected(ctx, kind))?;
        Ok(true)
    }

    fn parse(&self, ctx: &mut ExtContext, kind: MessageKind, data: &[u8]) -> Result<(), Error> {
        let got = parse_body(data, vec8)?;
        let want = Self::expected(ctx, kind);
        if !bool::from(got.ct_eq(&want[..])) {
            return Err(Error::SecurityError("renegotiation_info mismatch".into()));
        }
        ctx.secure_renegotiation = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::super::ExtensionRegistry;
    use super::*;
    use crate::types::Mode;

    fn client_ctx() -> ExtContext {
        let mut ctx = ExtContext::new(Role::Client, Mode::Stream);
        ctx.versions = vec![ProtocolVersion::Tls13, ProtocolVersion::Tls12];
        ctx.groups = vec![NamedGroup::X25519, NamedGroup::Secp256r1];
        ctx.signature_schemes = vec![SignatureScheme::ECDSA_SECP256R1_SHA256];
        ctx.client_shares = vec![(NamedGroup::X25519, vec![7; 32])];
        ctx.server_name = Some("example.net".into());
        ctx.ems_enabled = true;
        ctx.tickets_enabled = true;
        ctx.psk_modes = vec![PSK_KE_DHE];
        ctx
    }

    #[test]
    fn client_hello_reaches_server() {
        let r = ExtensionRegistry::with_builtins();
        let mut client = client_ctx();
        let block = r.generate_all(&mut client, MessageKind::ClientHello).unwrap();

        let mut server = ExtContext::new(Role::Server, Mode::Stream);
        server.ems_enabled = true;
        server.tickets_enabled = true;
        r.parse_all(&mut server, MessageKind::ClientHello, &block)
            .unwrap();

        assert_eq!(server.server_name(), Some("example.net"));
        assert_eq!(server.versions, client.versions);
        assert_eq!(server.groups, client.groups);
        assert_eq!(server.client_shares, client.client_shares);
        assert!(server.ems);
        assert!(server.secure_renegotiation);
        assert!(server.ticket.is_none());
        assert_eq!(server.psk_modes, [PSK_KE_DHE]);
    }

    #[test]
    fn psk_goes_last() {
        let r = ExtensionRegistry::with_builtins();
        let mut client = client_ctx();
        client.psk_identities = vec![(vec![1, 2, 3], 99)];
        client.psk_binder_len = 32;
        let block = r.generate_all(&mut client, MessageKind::ClientHello).unwrap();
        let list = super::super::parse_extension_list(&block).unwrap();
        assert_eq!(list.last().unwrap().0, ExtensionType::PreSharedKey.as_u16());
        // Binders list: 2 byte length, 1 byte length, 32 placeholder bytes.
        assert_eq!(&block[block.len() - 35..block.len() - 32], &[0, 33, 32]);
        assert!(block[block.len() - 32..].iter().all(|b| *b == 0));
    }

    #[test]
    fn server_share_must_match_offer() {
        let r = ExtensionRegistry::with_builtins();
        let mut client = client_ctx();
        r.generate_all(&mut client, MessageKind::ClientHello).unwrap();

        let mut sh = Vec::new();
        put_u16(&mut sh, ExtensionType::KeyShare.as_u16());
        with_len16(&mut sh, |out| {
            put_u16(out, NamedGroup::Secp256r1.as_u16());
            put_vec16(out, &[4; 65])
        })
        .unwrap();
        assert!(matches!(
            r.parse_all(&mut client, MessageKind::Tls13ServerHello, &sh),
            Err(Error::IllegalParameter(_))
        ));
    }

    #[test]
    fn renegotiation_binding() {
        let mut ctx = ExtContext::new(Role::Server, Mode::Stream);
        ctx.renegotiating = true;
        ctx.client_verify_data = vec![1; 12];
        let ext = RenegotiationInfo;
        assert!(ext
            .parse(&mut ctx, MessageKind::ClientHello, &[0])
            .is_err());
        let mut good = Vec::new();
        put_vec8(&mut good, &[1; 12]).unwrap();
        ext.parse(&mut ctx, MessageKind::ClientHello, &good).unwrap();
        assert!(ctx.secure_renegotiation);
    }

    #[test]
    fn psk_identity_list_must_be_consumed() {
        let mut body = Vec::new();
        with_len16(&mut body, |out| {
            put_vec16(out, &[1, 2, 3])?;
            put_u32(out, 7);
            // Too short for another identity.
            out.push(0xEE);
            Ok(())
        })
        .unwrap();
        with_len16(&mut body, |out| put_vec8(out, &[0; 32])).unwrap();

        let mut ctx = ExtContext::new(Role::Server, Mode::Stream);
        assert!(matches!(
            PreSharedKey.parse(&mut ctx, MessageKind::ClientHello, &body),
            Err(Error::ParseError(_))
        ));
        assert!(ctx.psk_identities.is_empty());
    }

    #[test]
    fn key_share_list_must_be_consumed() {
        let mut body = Vec::new();
        with_len16(&mut body, |out| {
            put_u16(out, NamedGroup::X25519.as_u16());
            put_vec16(out, &[7; 32])?;
            out.extend_from_slice(&[0, 29]);
            Ok(())
        })
        .unwrap();
        let mut ctx = ExtContext::new(Role::Server, Mode::Stream);
        assert!(KeyShare
            .parse(&mut ctx, MessageKind::ClientHello, &body)
            .is_err());
    }

    #[test]
    fn max_fragment_length_is_echoed() {
        let r = ExtensionRegistry::with_builtins();
        let mut client = client_ctx();
        client.max_fragment = fragment_length_code(512);
        let block = r.generate_all(&mut client, MessageKind::ClientHello).unwrap();

        let mut server = ExtContext::new(Role::Server, Mode::Stream);
        r.parse_all(&mut server, MessageKind::ClientHello, &block)
            .unwrap();
        assert_eq!(server.max_fragment, Some(1));
        let answer = r
            .generate_all(&mut server, MessageKind::Tls12ServerHello)
            .unwrap();
        assert_eq!(server.negotiated_fragment_length(), Some(512));

        r.parse_all(&mut client, MessageKind::Tls12ServerHello, &answer)
            .unwrap();
        assert_eq!(client.negotiated_fragment_length(), Some(512));

        // An answer with another code.
        let bad = [0, 1, 0, 1, 2];
        assert!(matches!(
            r.parse_all(&mut client, MessageKind::Tls12ServerHello, &bad),
            Err(Error::IllegalParameter(_))
        ));
    }

    #[test]
    fn max_fragment_length_codes() {
        assert_eq!(fragment_length(1), Some(512));
        assert_eq!(fragment_length(4), Some(4096));
        assert_eq!(fragment_length(5), None);
        assert_eq!(fragment_length_code(16384), None);

        let mut server = ExtContext::new(Role::Server, Mode::Stream);
        assert!(matches!(
            MaxFragmentLength.parse(&mut server, MessageKind::ClientHello, &[9]),
            Err(Error::IllegalParameter(_))
        ));
    }

    #[test]
    fn status_request_needs_a_staple() {
        let r = ExtensionRegistry::with_builtins();
        let mut client = client_ctx();
        client.ocsp_request = true;
        let block = r.generate_all(&mut client, MessageKind::ClientHello).unwrap();

        let mut server = ExtContext::new(Role::Server, Mode::Stream);
        r.parse_all(&mut server, MessageKind::ClientHello, &block)
            .unwrap();
        assert!(server.ocsp_request);

        let answer = r
            .generate_all(&mut server, MessageKind::Tls12ServerHello)
            .unwrap();
        assert!(!server.was_sent(ExtensionType::StatusRequest.as_u16()));

        server.ocsp_staple = true;
        let answer_with = r
            .generate_all(&mut server, MessageKind::Tls12ServerHello)
            .unwrap();
        assert_eq!(answer_with.len(), answer.len() + 4);
        r.parse_all(&mut client, MessageKind::Tls12ServerHello, &answer_with)
            .unwrap();
        assert!(client.was_received(ExtensionType::StatusRequest.as_u16()));
    }

    #[test]
    fn status_request_of_other_type_is_ignored() {
        let mut server = ExtContext::new(Role::Server, Mode::Stream);
        StatusRequest
            .parse(&mut server, MessageKind::ClientHello, &[2, 0xAB])
            .unwrap();
        assert!(!server.ocsp_request);
        assert!(StatusRequest
            .parse(&mut server, MessageKind::ClientHello, &[1, 0, 0])
            .is_err());
    }
}
