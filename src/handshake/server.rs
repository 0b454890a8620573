// Server Handshake Flow
//
// 1.2 family, full handshake:
//
// 1. Client sends ClientHello
//    - DTLS with cookies on: a hello without a valid cookie is answered with
//      HelloVerifyRequest and nothing else is kept
// 2. Server sends ServerHello, Certificate, CertificateStatus (when the
//    client asked and we hold a response), ServerKeyExchange, ServerHelloDone
// 3. Client sends ClientKeyExchange, ChangeCipherSpec, Finished
// 4. Server sends NewSessionTicket (if promised), ChangeCipherSpec, Finished
//
// 1.2 family, abbreviated handshake (ticket or cached session id):
//
// 1. Client sends ClientHello
// 2. Server sends ServerHello, NewSessionTicket (if promised),
//    ChangeCipherSpec, Finished
// 3. Client sends ChangeCipherSpec, Finished
//
// 1.3:
//
// 1. Client sends ClientHello
//    - No key share for a group we accept: HelloRetryRequest naming one,
//      and wait for the second ClientHello
//    - A ticket or a configured external key in pre_shared_key with a
//      valid binder is accepted. Under psk_ke no key share is needed.
// 2. Server sends ServerHello, then under handshake keys EncryptedExtensions,
//    Certificate, CertificateVerify, Finished (Certificate and
//    CertificateVerify left out when a PSK was accepted)
// 3. Client sends Finished
// 4. Server sends NewSessionTicket under the application keys

use std::sync::Arc;
use std::time::Instant;

use subtle::ConstantTimeEq;
use zeroize::Zeroizing;

use super::key_schedule::{finished12, key_block, master_secret, ticket_psk, traffic_cipher};
use super::key_schedule::{verify_data13, KeySchedule13, Secret};
use crate::config::Config;
use crate::crypto::ActiveKeyExchange;
use crate::engine::Engine;
use crate::extension::{ExtensionType, MessageKind, PSK_KE_DHE};
use crate::keylog;
use crate::message::{parse_body, tls13_signed_content, Certificate, CertificateStatus, ClientHello};
use crate::message::{ClientKeyExchange, EcdhParams, EncryptedExtensions, HelloVerifyRequest};
use crate::message::{NewSessionTicket12, NewSessionTicket13, ServerHello, ServerKeyExchange};
use crate::message::{DOWNGRADE_TLS12, HRR_RANDOM};
use crate::record::CipherState;
use crate::resume::SessionData;
use crate::types::{CipherSuite, HandshakeType, NamedGroup, ProtocolVersion, PskKeyExchangeMode, Role};
use crate::Error;

pub(crate) struct Server {
    state: State,

    /// Engine in common between server and client.
    pub engine: Engine,

    random: [u8; 32],
    client_random: [u8; 32],

    /// Session id of the ClientHello, echoed in a 1.3 ServerHello.
    legacy_session_id: Vec<u8>,

    hello_retry: bool,

    /// 1.2 ECDHE group, or the 1.3 client share we answer.
    group: Option<NamedGroup>,
    peer_share: Option<Vec<u8>>,
    key_exchange: Option<Box<dyn ActiveKeyExchange>>,

    // 1.2
    master: Option<Secret>,
    read_cipher: Option<CipherState>,
    write_cipher: Option<CipherState>,

    // 1.3
    psk: Option<Secret>,
    /// The accepted PSK is used without (EC)DHE.
    psk_ke: bool,
    schedule: Option<KeySchedule13>,
    client_hs: Option<Secret>,
    client_ap: Option<Secret>,
}

impl Server {
    pub fn new(config: Arc<Config>, now: Instant) -> Server {
        Server {
            state: State::AwaitClientHello,
            engine: Engine::new(config, Role::Server, now),
            random: [0; 32],
            client_random: [0; 32],
            legacy_session_id: Vec::new(),
            hello_retry: false,
            group: None,
            peer_share: None,
            key_exchange: None,
            master: None,
            read_cipher: None,
            write_cipher: None,
            psk: None,
            psk_ke: false,
            schedule: None,
            client_hs: None,
            client_ap: None,
        }
    }

    pub fn make_progress(&mut self) -> Result<(), Error> {
        loop {
            let prev_state = self.state;

            let new_state = prev_state.make_progress(self)?;
            if prev_state != new_state {
                self.state = new_state;
                trace!("{:?} -> {:?}", prev_state, new_state);
            } else {
                break;
            }
        }
        Ok(())
    }

    /// Ask the client for a new handshake with a HelloRequest.
    pub fn request_renegotiation(&mut self) -> Result<(), Error> {
        self.engine.begin_renegotiation(true);
        self.reset_handshake();

        let engine = &mut self.engine;
        engine.flight_begin();
        engine.create_handshake(HandshakeType::HelloRequest, |_, _| Ok(()))?;
        engine.flight_end(true);

        self.state = State::AwaitClientHello;
        Ok(())
    }

    /// Answer the ClientHello the client opened a renegotiation with.
    pub fn accept_renegotiation(&mut self) {
        self.engine.begin_renegotiation(false);
        self.reset_handshake();
        self.state = State::AwaitClientHello;
    }

    pub fn cancel_renegotiation(&mut self) {
        self.engine.abort_renegotiation();
        self.state = State::Connected;
    }

    fn reset_handshake(&mut self) {
        self.hello_retry = false;
        self.group = None;
        self.peer_share = None;
        self.key_exchange = None;
        self.master = None;
        self.read_cipher = None;
        self.write_cipher = None;
        self.psk = None;
        self.psk_ke = false;
    }

    fn send_hello_verify_request(&mut self, client_random: &[u8; 32]) -> Result<(), Error> {
        let engine = &mut self.engine;
        let cookie = engine.cookie_for(client_random)?;
        debug!("Send HelloVerifyRequest");

        // The cookie exchange stays out of the transcript.
        engine.transcript.reset();
        engine.flight_begin();
        engine.create_handshake(HandshakeType::HelloVerifyRequest, |body, _| {
            HelloVerifyRequest {
                server_version: ProtocolVersion::Dtls10,
                cookie,
            }
            .serialize(body)
        })?;
        engine.flight_end(false);
        Ok(())
    }

    fn select12(&mut self, hello: &ClientHello, version: ProtocolVersion) -> Result<State, Error> {
        let engine = &mut self.engine;
        let config = Arc::clone(engine.config());

        engine.set_version(version);
        let suite = config
            .cipher_suites()
            .iter()
            .copied()
            .find(|s| !s.is_tls13() && hello.cipher_suites.contains(s))
            .ok_or_else(|| Error::HandshakeFailure("no cipher suite in common".into()))?;
        engine.set_suite(suite)?;

        let group = config
            .groups()
            .iter()
            .copied()
            .find(|g| engine.ext.groups.is_empty() || engine.ext.groups.contains(g))
            .ok_or_else(|| Error::HandshakeFailure("no group in common".into()))?;
        self.group = Some(group);

        self.client_random = hello.random;
        engine.client_random = hello.random;
        self.random = engine.rng.bytes();
        if config.versions().contains(&ProtocolVersion::Tls13) {
            self.random[24..].copy_from_slice(&DOWNGRADE_TLS12);
        }

        let ticket_ext = ExtensionType::SessionTicket.as_u16();
        engine.ext.ticket_promised =
            config.ticket_keys().is_some() && engine.ext.was_received(ticket_ext);

        let resumed = match self.try_resume12(hello) {
            Some(data) => data,
            None => {
                let engine = &mut self.engine;
                engine.session_id = if config.session_store().is_some() {
                    engine.rng.bytes::<32>().to_vec()
                } else {
                    Vec::new()
                };
                return Ok(State::SendServerHello);
            }
        };

        let engine = &mut self.engine;
        debug!("Resume {:?} session", resumed.version);
        engine.set_suite(resumed.suite)?;
        engine.session_id = hello.session_id.clone();
        engine.resumed = true;
        self.master = Some(resumed.secret);
        self.derive_keys12()?;
        Ok(State::SendResumption)
    }

    /// A 1.2 session to resume from a ticket or the session cache.
    fn try_resume12(&self, hello: &ClientHello) -> Option<SessionData> {
        let engine = &self.engine;
        let config = engine.config();
        if engine.ext.renegotiating {
            return None;
        }

        let bytes = if let Some(ticket) = &engine.ext.ticket {
            let keys = config.ticket_keys()?;
            let Some(plain) = keys.open(ticket) else {
                debug!("Ticket does not open, full handshake");
                return None;
            };
            plain
        } else if !hello.session_id.is_empty() {
            let store = config.session_store()?;
            let Some(bytes) = store.fetch(&hello.session_id) else {
                trace!("Session id not cached");
                return None;
            };
            bytes
        } else {
            return None;
        };

        let data = match SessionData::from_bytes(&bytes) {
            Ok(data) => data,
            Err(e) => {
                debug!("Stored session unreadable: {}", e);
                return None;
            }
        };

        if Some(data.version) != engine.version() {
            debug!("Session version {:?} differs, full handshake", data.version);
            return None;
        }
        if !hello.cipher_suites.contains(&data.suite) || !config.cipher_suites().contains(&data.suite)
        {
            debug!("Session suite {:?} not offered, full handshake", data.suite);
            return None;
        }
        if data.is_expired(engine.now_secs()) {
            debug!("Session expired, full handshake");
            if engine.ext.ticket.is_none() {
                if let Some(store) = config.session_store() {
                    store.delete(&hello.session_id);
                }
            }
            return None;
        }
        if data.ems != engine.ext.ems {
            debug!("Extended master secret differs from session, full handshake");
            return None;
        }
        Some(data)
    }

    fn select13(&mut self, hello: &ClientHello) -> Result<State, Error> {
        let engine = &mut self.engine;
        let config = Arc::clone(engine.config());

        if hello.compression_methods != [0] {
            return Err(Error::IllegalParameter("compression".into()));
        }

        engine.set_version(ProtocolVersion::Tls13);
        engine.ext.selected_version = Some(ProtocolVersion::Tls13);

        let suite = config
            .cipher_suites()
            .iter()
            .copied()
            .find(|s| s.is_tls13() && hello.cipher_suites.contains(s))
            .ok_or_else(|| Error::HandshakeFailure("no cipher suite in common".into()))?;

        if self.hello_retry {
            if engine.cipher_suite() != Some(suite) {
                return Err(Error::IllegalParameter("cipher suite changed after retry".into()));
            }
            if hello.random != self.client_random {
                return Err(Error::IllegalParameter("random changed after retry".into()));
            }
            let cookie_ok = match &engine.ext.cookie {
                Some(cookie) => engine.cookie_matches(&hello.random, cookie)?,
                None => false,
            };
            if !cookie_ok {
                return Err(Error::IllegalParameter("cookie mismatch".into()));
            }
        }
        engine.set_suite(suite)?;

        self.client_random = hello.random;
        engine.client_random = hello.random;
        self.legacy_session_id = hello.session_id.clone();

        let share = config.groups().iter().find_map(|g| {
            engine
                .ext
                .client_shares
                .iter()
                .find(|(cg, _)| cg == g)
                .cloned()
        });

        let have_share = share.is_some();
        if let Some((group, public)) = share {
            self.group = Some(group);
            self.peer_share = Some(public);
        }

        self.try_psk13(have_share)?;
        if have_share || self.psk_ke {
            return Ok(State::SendServerHello13);
        }

        let engine = &mut self.engine;
        if self.hello_retry {
            return Err(Error::IllegalParameter("no usable key_share after retry".into()));
        }
        let group = config
            .groups()
            .iter()
            .copied()
            .find(|g| engine.ext.groups.contains(g))
            .ok_or_else(|| Error::HandshakeFailure("no group in common".into()))?;
        engine.ext.hrr_group = Some(group);
        Ok(State::SendHelloRetryRequest)
    }

    /// Accept the first offered PSK that fits the suite: a configured
    /// external key matched by identity, or a ticket that opens.
    ///
    /// `psk_dhe_ke` is preferred and needs a key share. Without one only
    /// `psk_ke` can be used.
    fn try_psk13(&mut self, have_share: bool) -> Result<(), Error> {
        self.psk = None;
        self.psk_ke = false;
        let engine = &mut self.engine;
        if !engine.ext.was_received(ExtensionType::PreSharedKey.as_u16()) {
            return Ok(());
        }
        let config = Arc::clone(engine.config());
        let allows = |mode: PskKeyExchangeMode| {
            config.psk_modes().contains(&mode) && engine.ext.psk_modes.contains(&mode.as_u8())
        };
        let dhe = have_share && allows(PskKeyExchangeMode::PskDheKe);
        let ke = allows(PskKeyExchangeMode::PskKe);
        if !dhe && !ke {
            debug!("No psk mode in common");
            return Ok(());
        }

        let hash = engine.hash()?;
        let now = engine.now_secs();
        let keys = config.ticket_keys();
        let found = engine
            .ext
            .psk_identities
            .iter()
            .enumerate()
            .find_map(|(index, (identity, _))| {
                if let Some(psk) = config.external_psks().iter().find(|p| p.identity() == &identity[..]) {
                    return (psk.hash() == hash).then(|| (index, psk.key().clone(), true));
                }
                let plain = keys?.open(identity)?;
                let data = SessionData::from_bytes(&plain).ok()?;
                let usable = data.version == ProtocolVersion::Tls13
                    && data.suite.hash_algorithm() == hash
                    && !data.is_expired(now);
                usable.then_some((index, data.secret, false))
            });
        let Some((index, secret, external)) = found else {
            debug!("No usable psk offered, full handshake");
            return Ok(());
        };

        // The binders list: u16 length, then u8 length prefixed binders.
        let binders_len = 2 + engine
            .ext
            .psk_binders
            .iter()
            .map(|b| 1 + b.len())
            .sum::<usize>();
        let th = engine
            .transcript
            .hash_truncated(engine.provider(), hash, binders_len);
        let schedule = KeySchedule13::new(engine.provider(), hash, Some(&secret[..]))?;
        let expected = schedule.binder(&th, external)?;
        let received = engine
            .ext
            .psk_binders
            .get(index)
            .ok_or_else(|| Error::IllegalParameter("psk without binder".into()))?;
        if !bool::from(expected.ct_eq(received)) {
            return Err(Error::DecryptError("psk binder mismatch".into()));
        }

        debug!("Accept psk {}{}", index, if dhe { "" } else { " with psk_ke" });
        engine.ext.selected_psk = Some(index as u16);
        if external {
            engine.psk_identity = engine.ext.psk_identities.get(index).map(|(id, _)| id.clone());
        } else {
            engine.resumed = true;
        }
        engine.psk_authenticated = true;
        self.psk = Some(secret);
        self.psk_ke = !dhe;
        Ok(())
    }

    fn derive_keys12(&mut self) -> Result<(), Error> {
        let engine = &self.engine;
        let master = self
            .master
            .as_ref()
            .ok_or_else(|| Error::CryptoError("master secret missing".into()))?;
        let block = key_block(
            engine.provider(),
            engine.suite()?,
            master,
            &self.client_random,
            &self.random,
        )?;
        engine.log_secret(keylog::CLIENT_RANDOM, master);
        self.read_cipher = Some(block.client);
        self.write_cipher = Some(block.server);
        Ok(())
    }

    fn server_hello12(&mut self) -> Result<(), Error> {
        let engine = &mut self.engine;
        let extensions = engine
            .registry
            .generate_all(&mut engine.ext, MessageKind::Tls12ServerHello)?;
        let hello = ServerHello {
            legacy_version: engine.version().ok_or(Error::ProtocolVersion)?,
            random: self.random,
            session_id: engine.session_id.clone(),
            cipher_suite: engine
                .cipher_suite()
                .ok_or_else(|| Error::HandshakeFailure("no cipher suite".into()))?,
            compression_method: 0,
            extensions,
        };
        engine.create_handshake(HandshakeType::ServerHello, |body, _| {
            hello.serialize(body)
        })?;
        engine.apply_fragment_limit();
        Ok(())
    }

    /// Resumption material for a 1.2 session.
    fn session12(&self) -> Result<SessionData, Error> {
        let engine = &self.engine;
        let master = self
            .master
            .clone()
            .ok_or_else(|| Error::CryptoError("master secret missing".into()))?;
        Ok(SessionData {
            version: engine.version().ok_or(Error::ProtocolVersion)?,
            suite: engine
                .cipher_suite()
                .ok_or_else(|| Error::HandshakeFailure("no cipher suite".into()))?,
            secret: master,
            ems: engine.ext.ems,
            session_id: engine.session_id.clone(),
            ticket: Vec::new(),
            issued_at: engine.now_secs(),
            lifetime: engine.config().ticket_lifetime().as_secs() as u32,
            age_add: 0,
            peer_chain: Vec::new(),
        })
    }

    fn send_ticket12(&mut self) -> Result<(), Error> {
        if !self.engine.ext.ticket_promised {
            return Ok(());
        }
        let data = self.session12()?;
        let engine = &mut self.engine;
        let keys = engine
            .config()
            .ticket_keys()
            .cloned()
            .ok_or_else(|| Error::CryptoError("ticket keys missing".into()))?;
        let ticket = keys.seal(&data.to_bytes()?)?;
        let nst = NewSessionTicket12 {
            lifetime_hint: data.lifetime,
            ticket,
        };
        engine.create_handshake(HandshakeType::NewSessionTicket, |body, _| {
            nst.serialize(body)
        })
    }

    fn send_finished12(&mut self) -> Result<(), Error> {
        let master = self
            .master
            .clone()
            .ok_or_else(|| Error::CryptoError("master secret missing".into()))?;
        let engine = &mut self.engine;

        engine.send_ccs()?;
        let cipher = self
            .write_cipher
            .take()
            .ok_or_else(|| Error::CryptoError("write keys missing".into()))?;
        engine.install_write(cipher)?;

        let th = engine.transcript_hash()?;
        let verify = finished12(engine.provider(), engine.hash()?, &master, false, &th)?;
        engine.ext.server_verify_data = verify.clone();
        engine.create_handshake(HandshakeType::Finished, |body, _| {
            body.extend_from_slice(&verify);
            Ok(())
        })
    }

    fn store_session12(&mut self) -> Result<(), Error> {
        let engine = &self.engine;
        let Some(store) = engine.config().session_store().cloned() else {
            return Ok(());
        };
        if engine.session_id.is_empty() || engine.resumed {
            return Ok(());
        }
        let data = self.session12()?;
        trace!("Cache session {} bytes", data.session_id.len());
        store.store(&data.session_id, data.to_bytes()?);
        Ok(())
    }

    fn send_ticket13(&mut self, resumption_master: &[u8]) -> Result<(), Error> {
        let engine = &mut self.engine;
        let Some(keys) = engine.config().ticket_keys().cloned() else {
            return Ok(());
        };
        if !engine.ext.psk_modes.contains(&PSK_KE_DHE) {
            return Ok(());
        }

        let hash = engine.hash()?;
        let nonce = engine.rng.bytes::<8>().to_vec();
        let age_add = engine.rng.next_u32();
        let lifetime = engine.config().ticket_lifetime().as_secs() as u32;
        let psk = ticket_psk(engine.provider(), hash, resumption_master, &nonce)?;

        let data = SessionData {
            version: ProtocolVersion::Tls13,
            suite: engine
                .cipher_suite()
                .ok_or_else(|| Error::HandshakeFailure("no cipher suite".into()))?,
            secret: psk,
            ems: false,
            session_id: Vec::new(),
            ticket: Vec::new(),
            issued_at: engine.now_secs(),
            lifetime,
            age_add,
            peer_chain: Vec::new(),
        };
        let ticket = keys.seal(&data.to_bytes()?)?;
        let nst = NewSessionTicket13 {
            lifetime,
            age_add,
            nonce,
            ticket,
            extensions: Vec::new(),
        };
        debug!("Send session ticket, lifetime {}s", lifetime);
        engine.create_handshake(HandshakeType::NewSessionTicket, |body, _| {
            nst.serialize(body)
        })
    }
}

fn start_exchange(engine: &Engine, group: NamedGroup) -> Result<Box<dyn ActiveKeyExchange>, Error> {
    let kx = engine
        .provider()
        .find_group(group)
        .ok_or_else(|| Error::HandshakeFailure(format!("group {:?} unavailable", group)))?;
    kx.start_exchange().map_err(Error::CryptoError)
}

/// The version to speak, from supported_versions or the legacy field.
fn select_version(engine: &Engine, hello: &ClientHello) -> Result<ProtocolVersion, Error> {
    let sv = ExtensionType::SupportedVersions.as_u16();
    let offered = if engine.ext.was_received(sv) {
        engine.ext.versions.clone()
    } else {
        let legacy = hello.legacy_version.as_u16();
        if engine.is_datagram() {
            // DTLS versions count down.
            if legacy <= ProtocolVersion::Dtls12.as_u16() && legacy > 0xfe00 {
                vec![ProtocolVersion::Dtls12]
            } else {
                Vec::new()
            }
        } else if legacy >= ProtocolVersion::Tls12.as_u16() && legacy < 0xfe00 {
            vec![ProtocolVersion::Tls12]
        } else {
            Vec::new()
        }
    };

    let config = engine.config();
    [
        ProtocolVersion::Tls13,
        ProtocolVersion::Tls12,
        ProtocolVersion::Dtls12,
    ]
    .into_iter()
    .find(|v| config.versions().contains(v) && offered.contains(v))
    .ok_or(Error::ProtocolVersion)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    AwaitClientHello,
    SendHelloRetryRequest,
    SendServerHello,
    SendResumption,
    SendServerHello13,
    AwaitClientKeyExchange,
    AwaitChangeCipherSpec,
    AwaitFinished,
    SendFinished,
    Connected,
}

impl State {
    fn make_progress(self, server: &mut Server) -> Result<Self, Error> {
        match self {
            State::AwaitClientHello => self.await_client_hello(server),
            State::SendHelloRetryRequest => self.send_hello_retry_request(server),
            State::SendServerHello => self.send_server_hello(server),
            State::SendResumption => self.send_resumption(server),
            State::SendServerHello13 => self.send_server_hello13(server),
            State::AwaitClientKeyExchange => self.await_client_key_exchange(server),
            State::AwaitChangeCipherSpec => self.await_change_cipher_spec(server),
            State::AwaitFinished => self.await_finished(server),
            State::SendFinished => self.send_finished(server),
            State::Connected => self.connected(server),
        }
    }

    fn await_client_hello(self, server: &mut Server) -> Result<Self, Error> {
        let engine = &mut server.engine;
        let Some(msg) = engine.next_handshake(&[HandshakeType::ClientHello])? else {
            return Ok(self);
        };
        let datagram = engine.is_datagram();
        let hello = parse_body(&msg.body, |i| ClientHello::parse(i, datagram))?;

        if datagram && engine.config().dtls_cookie() && !engine.ext.renegotiating {
            let cookie = hello.cookie.as_deref().unwrap_or(&[]);
            if cookie.is_empty() || !engine.cookie_matches(&hello.random, cookie)? {
                server.send_hello_verify_request(&hello.random)?;
                return Ok(self);
            }
            trace!("ClientHello cookie verified");
        }

        engine.ext.reset_peer_offer();
        engine
            .registry
            .parse_all(&mut engine.ext, MessageKind::ClientHello, &hello.extensions)?;

        let scsv = hello
            .cipher_suites
            .contains(&CipherSuite::EMPTY_RENEGOTIATION_INFO_SCSV);
        let ri = ExtensionType::RenegotiationInfo.as_u16();
        if engine.ext.renegotiating {
            if scsv {
                return Err(Error::SecurityError("SCSV in renegotiation".into()));
            }
            if !engine.ext.was_received(ri) {
                return Err(Error::SecurityError(
                    "renegotiation without renegotiation_info".into(),
                ));
            }
        } else if scsv {
            // The SCSV stands in for an empty renegotiation_info.
            engine.ext.secure_renegotiation = true;
            engine.ext.received.insert(ri);
        }

        if !hello.compression_methods.contains(&0) {
            return Err(Error::IllegalParameter("null compression not offered".into()));
        }

        let version = select_version(engine, &hello)?;
        if engine.ext.renegotiating && engine.version() != Some(version) {
            return Err(Error::ProtocolVersion);
        }
        debug!("Selected {:?}", version);

        if version.is_tls13() {
            server.select13(&hello)
        } else {
            server.select12(&hello, version)
        }
    }

    fn send_hello_retry_request(self, server: &mut Server) -> Result<Self, Error> {
        let engine = &mut server.engine;
        let hash = engine.hash()?;
        let config = Arc::clone(engine.config());
        engine
            .transcript
            .replace_with_message_hash(config.crypto_provider(), hash);

        engine.ext.cookie = Some(engine.cookie_for(&server.client_random)?);
        let extensions = engine
            .registry
            .generate_all(&mut engine.ext, MessageKind::HelloRetryRequest)?;
        let hello = ServerHello {
            legacy_version: ProtocolVersion::Tls12,
            random: HRR_RANDOM,
            session_id: server.legacy_session_id.clone(),
            cipher_suite: engine
                .cipher_suite()
                .ok_or_else(|| Error::HandshakeFailure("no cipher suite".into()))?,
            compression_method: 0,
            extensions,
        };
        debug!("Send HelloRetryRequest for {:?}", engine.ext.hrr_group);

        engine.flight_begin();
        engine.create_handshake(HandshakeType::ServerHello, |body, _| {
            hello.serialize(body)
        })?;
        engine.flight_end(true);

        server.hello_retry = true;
        Ok(State::AwaitClientHello)
    }

    fn send_server_hello(self, server: &mut Server) -> Result<Self, Error> {
        let group = server
            .group
            .ok_or_else(|| Error::HandshakeFailure("no group".into()))?;

        server.engine.flight_begin();
        server.server_hello12()?;

        let engine = &mut server.engine;
        let chain = engine.local_chain()?;
        engine.create_handshake(HandshakeType::Certificate, |body, _| {
            Certificate::new(chain).serialize(body, false)
        })?;
        if engine.ext.was_sent(ExtensionType::StatusRequest.as_u16()) {
            if let Some(response) = engine.local_ocsp() {
                engine.create_handshake(HandshakeType::CertificateStatus, |body, _| {
                    CertificateStatus { response }.serialize(body)
                })?;
            }
        }

        let kx = start_exchange(engine, group)?;
        let params = EcdhParams {
            group,
            public: kx.pub_key().to_vec(),
        };
        let content = params.signed_content(&server.client_random, &server.random)?;
        let signed = engine.sign(&content)?;
        engine.create_handshake(HandshakeType::ServerKeyExchange, |body, _| {
            ServerKeyExchange { params, signed }.serialize(body)
        })?;
        engine.create_handshake(HandshakeType::ServerHelloDone, |_, _| Ok(()))?;
        engine.flight_end(true);

        server.key_exchange = Some(kx);
        Ok(State::AwaitClientKeyExchange)
    }

    fn send_resumption(self, server: &mut Server) -> Result<Self, Error> {
        server.engine.flight_begin();
        server.server_hello12()?;
        server.send_ticket12()?;
        server.send_finished12()?;
        server.engine.flight_end(true);
        Ok(State::AwaitChangeCipherSpec)
    }

    fn send_server_hello13(self, server: &mut Server) -> Result<Self, Error> {
        let engine = &mut server.engine;
        let hash = engine.hash()?;
        let shared = if server.psk_ke {
            engine.ext.server_share = None;
            Zeroizing::new(vec![0u8; hash.output_len()])
        } else {
            let group = server
                .group
                .ok_or_else(|| Error::HandshakeFailure("no group".into()))?;
            let peer_share = server
                .peer_share
                .take()
                .ok_or_else(|| Error::HandshakeFailure("no key_share".into()))?;
            let kx = start_exchange(engine, group)?;
            engine.ext.server_share = Some((group, kx.pub_key().to_vec()));
            Zeroizing::new(kx.complete(&peer_share).map_err(Error::IllegalParameter)?)
        };

        server.random = engine.rng.bytes();
        let extensions = engine
            .registry
            .generate_all(&mut engine.ext, MessageKind::Tls13ServerHello)?;
        let hello = ServerHello {
            legacy_version: ProtocolVersion::Tls12,
            random: server.random,
            session_id: server.legacy_session_id.clone(),
            cipher_suite: engine
                .cipher_suite()
                .ok_or_else(|| Error::HandshakeFailure("no cipher suite".into()))?,
            compression_method: 0,
            extensions,
        };

        engine.flight_begin();
        engine.create_handshake(HandshakeType::ServerHello, |body, _| {
            hello.serialize(body)
        })?;

        let suite = engine.suite()?;
        let mut schedule = KeySchedule13::new(engine.provider(), hash, server.psk.as_deref().map(|p| &p[..]))?;
        let th = engine.transcript_hash()?;
        let (client_hs, server_hs) = schedule.handshake_secrets(&shared, &th)?;
        engine.log_secret(keylog::CLIENT_HANDSHAKE_TRAFFIC_SECRET, &client_hs);
        engine.log_secret(keylog::SERVER_HANDSHAKE_TRAFFIC_SECRET, &server_hs);
        engine.install_write(traffic_cipher(engine.provider(), suite, &server_hs)?)?;

        let extensions = engine
            .registry
            .generate_all(&mut engine.ext, MessageKind::EncryptedExtensions)?;
        engine.create_handshake(HandshakeType::EncryptedExtensions, |body, _| {
            EncryptedExtensions { extensions }.serialize(body)
        })?;
        engine.apply_fragment_limit();

        if !engine.psk_authenticated {
            let mut certificate = Certificate::new(engine.local_chain()?);
            certificate.leaf_ocsp = engine.local_ocsp();
            engine.create_handshake(HandshakeType::Certificate, |body, _| {
                certificate.serialize(body, true)
            })?;

            let th = engine.transcript_hash()?;
            let signed = engine.sign(&tls13_signed_content(true, &th))?;
            engine.create_handshake(HandshakeType::CertificateVerify, |body, _| {
                signed.serialize(body)
            })?;
        }

        let th = engine.transcript_hash()?;
        let verify = verify_data13(engine.provider(), hash, &server_hs, &th)?;
        engine.ext.server_verify_data = verify.clone();
        engine.create_handshake(HandshakeType::Finished, |body, _| {
            body.extend_from_slice(&verify);
            Ok(())
        })?;

        let th = engine.transcript_hash()?;
        let (client_ap, server_ap) = schedule.application_secrets(&th)?;
        engine.log_secret(keylog::CLIENT_TRAFFIC_SECRET_0, &client_ap);
        engine.log_secret(keylog::SERVER_TRAFFIC_SECRET_0, &server_ap);
        engine.install_write_secret(server_ap)?;
        engine.install_read(traffic_cipher(engine.provider(), suite, &client_hs)?)?;
        engine.flight_end(true);

        server.schedule = Some(schedule);
        server.client_hs = Some(client_hs);
        server.client_ap = Some(client_ap);
        Ok(State::AwaitFinished)
    }

    fn await_client_key_exchange(self, server: &mut Server) -> Result<Self, Error> {
        let engine = &mut server.engine;
        let Some(msg) = engine.next_handshake(&[HandshakeType::ClientKeyExchange])? else {
            return Ok(self);
        };
        let cke = parse_body(&msg.body, ClientKeyExchange::parse)?;
        let kx = server
            .key_exchange
            .take()
            .ok_or_else(|| Error::CryptoError("key exchange missing".into()))?;
        let pre_master = Zeroizing::new(kx.complete(&cke.public).map_err(Error::IllegalParameter)?);

        let session_hash = if engine.ext.ems {
            Some(engine.transcript_hash()?)
        } else {
            None
        };
        server.master = Some(master_secret(
            engine.provider(),
            engine.hash()?,
            &pre_master,
            session_hash.as_deref(),
            &server.client_random,
            &server.random,
        )?);
        server.derive_keys12()?;
        Ok(State::AwaitChangeCipherSpec)
    }

    fn await_change_cipher_spec(self, server: &mut Server) -> Result<Self, Error> {
        let engine = &mut server.engine;
        engine.expect_ccs();
        if !engine.take_ccs() {
            return Ok(self);
        }
        let cipher = server
            .read_cipher
            .take()
            .ok_or_else(|| Error::CryptoError("read keys missing".into()))?;
        engine.install_read(cipher)?;
        Ok(State::AwaitFinished)
    }

    fn await_finished(self, server: &mut Server) -> Result<Self, Error> {
        let engine = &mut server.engine;
        let Some(msg) = engine.next_handshake(&[HandshakeType::Finished])? else {
            return Ok(self);
        };
        let th = engine.transcript_hash_before_last()?;
        let hash = engine.hash()?;

        if engine.is_tls13() {
            let client_hs = server
                .client_hs
                .take()
                .ok_or_else(|| Error::CryptoError("handshake secret missing".into()))?;
            let expected = verify_data13(engine.provider(), hash, &client_hs, &th)?;
            if !bool::from(expected.ct_eq(&msg.body)) {
                return Err(Error::DecryptError("client finished mismatch".into()));
            }
            engine.ext.client_verify_data = msg.body;
            engine.handshake_hash = th;

            let client_ap = server
                .client_ap
                .take()
                .ok_or_else(|| Error::CryptoError("application secret missing".into()))?;
            engine.install_read_secret(client_ap)?;

            let th = engine.transcript_hash()?;
            let schedule = server
                .schedule
                .take()
                .ok_or_else(|| Error::CryptoError("key schedule missing".into()))?;
            let rms = schedule.resumption_master(&th)?;
            engine.complete(false)?;
            server.send_ticket13(&rms)?;
            return Ok(State::Connected);
        }

        let master = server
            .master
            .as_ref()
            .ok_or_else(|| Error::CryptoError("master secret missing".into()))?;
        let expected = finished12(engine.provider(), hash, master, true, &th)?;
        if !bool::from(expected.ct_eq(&msg.body)) {
            return Err(Error::DecryptError("client finished mismatch".into()));
        }
        engine.ext.client_verify_data = msg.body;
        engine.handshake_hash = th;

        if engine.resumed {
            engine.complete(false)?;
            return Ok(State::Connected);
        }
        Ok(State::SendFinished)
    }

    fn send_finished(self, server: &mut Server) -> Result<Self, Error> {
        server.engine.flight_begin();
        server.send_ticket12()?;
        server.send_finished12()?;
        server.engine.flight_end(false);
        server.store_session12()?;
        server.engine.complete(true)?;
        Ok(State::Connected)
    }

    fn connected(self, server: &mut Server) -> Result<Self, Error> {
        loop {
            let engine = &mut server.engine;
            if engine.rehandshake_requested {
                return Ok(self);
            }
            let Some(msg_type) = engine.peek_handshake().map(|m| m.msg_type) else {
                return Ok(self);
            };

            match msg_type {
                HandshakeType::ClientHello if !engine.is_tls13() => {
                    if engine.ext.secure_renegotiation {
                        debug!("Client requests renegotiation");
                        engine.rehandshake_requested = true;
                        return Ok(self);
                    }
                    debug!("Refuse renegotiation from client lacking renegotiation_info");
                    engine.drop_handshake();
                    engine.refuse_renegotiation()?;
                }
                HandshakeType::KeyUpdate if engine.is_tls13() => {
                    if let Some(msg) = engine.next_handshake(&[HandshakeType::KeyUpdate])? {
                        engine.handle_key_update(&msg.body)?;
                    }
                }
                _ => {
                    engine.next_handshake(&[])?;
                }
            }
        }
    }
}
