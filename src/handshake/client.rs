// Client Handshake Flow
//
// 1.2 family, full handshake:
//
// 1. Client sends ClientHello (epoch 0)
// 2. DTLS only: server may answer with HelloVerifyRequest carrying a cookie.
//    The client resends ClientHello with the cookie and a fresh transcript.
// 3. Server sends ServerHello, Certificate, CertificateStatus (if it
//    acknowledged status_request), ServerKeyExchange, ServerHelloDone
//    - Client verifies the chain and the ECDHE parameter signature
// 4. Client sends ClientKeyExchange, ChangeCipherSpec, Finished
//    - Master secret from the ECDHE secret (session hash with EMS)
// 5. Server sends NewSessionTicket (if promised), ChangeCipherSpec, Finished
//
// 1.2 family, abbreviated handshake (session id or ticket accepted):
//
// 1. Client sends ClientHello offering the old session
// 2. Server sends ServerHello echoing our session id, NewSessionTicket (if
//    promised), ChangeCipherSpec, Finished
// 3. Client sends ChangeCipherSpec, Finished
//
// 1.3:
//
// 1. Client sends ClientHello with a key share (and a PSK when resuming)
// 2. Server may answer with HelloRetryRequest. The transcript collapses into
//    message_hash and the client sends a new ClientHello.
// 3. Server sends ServerHello
//    - Client derives handshake secrets and installs read handshake keys
// 4. Server sends EncryptedExtensions, Certificate, CertificateVerify,
//    Finished (Certificate and CertificateVerify left out when a PSK was
//    accepted, be it a ticket or an external key)
//    - Client derives application secrets and installs read application keys
// 5. Client sends Finished under the handshake write keys, then installs
//    write application keys
// 6. Post handshake the server may send NewSessionTicket and either side
//    KeyUpdate.

use std::sync::Arc;
use std::time::Instant;

use subtle::ConstantTimeEq;
use zeroize::Zeroizing;

use super::key_schedule::{finished12, key_block, master_secret, ticket_psk};
use super::key_schedule::{traffic_cipher, verify_data13, KeySchedule13, Secret};
use crate::config::Config;
use crate::crypto::ActiveKeyExchange;
use crate::engine::Engine;
use crate::extension::{find_extension, ExtensionType, MessageKind, PSK_KE};
use crate::keylog;
use crate::message::{parse_body, tls13_signed_content, Certificate, CertificateStatus, ClientHello};
use crate::message::{ClientKeyExchange, DigitallySigned, EcdhParams, EncryptedExtensions};
use crate::message::{HelloVerifyRequest, NewSessionTicket12, NewSessionTicket13};
use crate::message::{ServerHello, ServerKeyExchange};
use crate::record::CipherState;
use crate::resume::SessionData;
use crate::types::{AlertDescription, AlertLevel, CipherSuite, HandshakeType, NamedGroup};
use crate::types::{HashAlgorithm, ProtocolVersion, Role};
use crate::Error;

/// Longest ticket lifetime we honour, seven days.
const MAX_TICKET_LIFETIME: u32 = 604_800;

pub(crate) struct Client {
    state: State,

    /// Engine in common between server and client.
    pub engine: Engine,

    random: [u8; 32],
    server_random: [u8; 32],

    /// Session id sent in the ClientHello.
    session_id: Vec<u8>,

    /// Cookie from a HelloVerifyRequest.
    dtls_cookie: Option<Vec<u8>>,

    /// Session offered for resumption.
    resume: Option<SessionData>,

    /// The PSK the ClientHello carries, if any.
    offered_psk: Option<OfferedPsk>,

    key_shares: Vec<Box<dyn ActiveKeyExchange>>,
    hello_retry: bool,

    // 1.2
    server_params: Option<EcdhParams>,
    master: Option<Secret>,
    read_cipher: Option<CipherState>,
    write_cipher: Option<CipherState>,
    new_ticket: Option<NewSessionTicket12>,

    // 1.3
    schedule: Option<KeySchedule13>,
    client_hs: Option<Secret>,
    server_hs: Option<Secret>,
    client_ap: Option<Secret>,
    resumption_master: Option<Secret>,
}

impl Client {
    pub fn new(config: Arc<Config>, now: Instant) -> Client {
        Client {
            state: State::SendClientHello,
            engine: Engine::new(config, Role::Client, now),
            random: [0; 32],
            server_random: [0; 32],
            session_id: Vec::new(),
            dtls_cookie: None,
            resume: None,
            offered_psk: None,
            key_shares: Vec::new(),
            hello_retry: false,
            server_params: None,
            master: None,
            read_cipher: None,
            write_cipher: None,
            new_ticket: None,
            schedule: None,
            client_hs: None,
            server_hs: None,
            client_ap: None,
            resumption_master: None,
        }
    }

    /// Offer `data` for resumption in the next initial handshake.
    pub fn set_resumption_data(&mut self, data: SessionData) {
        self.resume = Some(data);
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

    /// Start a new handshake on the established connection.
    pub fn start_renegotiation(&mut self) {
        self.engine.begin_renegotiation(true);
        self.reset_handshake();
        self.state = State::SendClientHello;
    }

    pub fn cancel_renegotiation(&mut self) {
        self.engine.abort_renegotiation();
        self.state = State::Connected;
    }

    fn reset_handshake(&mut self) {
        self.dtls_cookie = None;
        self.resume = None;
        self.offered_psk = None;
        self.key_shares.clear();
        self.hello_retry = false;
        self.server_params = None;
        self.master = None;
        self.read_cipher = None;
        self.write_cipher = None;
        self.new_ticket = None;
    }

    /// Fresh random, key share and resumption offer for a first ClientHello.
    fn start_hello(&mut self) -> Result<(), Error> {
        let engine = &mut self.engine;
        self.random = engine.rng.bytes();
        engine.client_random = self.random;
        engine.ext.ticket = None;
        engine.ext.psk_identities.clear();
        self.offered_psk = None;
        self.session_id.clear();

        if engine.ext.offers_tls13() {
            let group = engine
                .ext
                .groups
                .first()
                .copied()
                .ok_or_else(|| Error::ConfigError("no key exchange groups".into()))?;
            self.key_shares = vec![start_exchange(engine, group)?];
            engine.ext.client_shares = self
                .key_shares
                .iter()
                .map(|k| (k.group(), k.pub_key().to_vec()))
                .collect();
        }

        if !self.offer_session() {
            self.offer_external_psk();
        }
        Ok(())
    }

    /// Offer the resumption data, if it fits this handshake. True when
    /// something was offered.
    fn offer_session(&mut self) -> bool {
        let engine = &mut self.engine;
        let Some(data) = &self.resume else {
            return false;
        };
        let config = Arc::clone(engine.config());
        let usable = config.versions().contains(&data.version)
            && config.cipher_suites().contains(&data.suite)
            && !engine.ext.renegotiating;
        if !usable {
            debug!(
                "Resumption data for {:?} {:?} not usable",
                data.version, data.suite
            );
            return false;
        }

        if data.version.is_tls13() {
            if data.ticket.is_empty() {
                return false;
            }
            let age = data.obfuscated_age(engine.now_secs());
            let hash = data.suite.hash_algorithm();
            engine.ext.psk_identities = vec![(data.ticket.clone(), age)];
            engine.ext.psk_binder_len = hash.output_len();
            self.offered_psk = Some(OfferedPsk {
                secret: data.secret.clone(),
                hash,
                external: false,
            });
        } else if !data.ticket.is_empty() {
            engine.ext.ticket = Some(data.ticket.clone());
            // Echoed back when the server accepts the ticket.
            self.session_id = engine.rng.bytes::<32>().to_vec();
        } else {
            self.session_id = data.session_id.clone();
        }
        debug!("Offer resumption of {:?} session", data.version);
        true
    }

    /// Offer the first configured external PSK.
    fn offer_external_psk(&mut self) {
        let engine = &mut self.engine;
        if !engine.ext.offers_tls13() || engine.ext.renegotiating {
            return;
        }
        let Some(psk) = engine.config().external_psks().first().cloned() else {
            return;
        };
        debug!("Offer external psk {:?}", psk);
        // External identities carry no age.
        engine.ext.psk_identities = vec![(psk.identity().to_vec(), 0)];
        engine.ext.psk_binder_len = psk.hash().output_len();
        self.offered_psk = Some(OfferedPsk {
            secret: psk.key().clone(),
            hash: psk.hash(),
            external: true,
        });
    }

    fn client_hello_body(&mut self) -> Result<Vec<u8>, Error> {
        let engine = &mut self.engine;
        let config = Arc::clone(engine.config());

        let offers12 = engine.ext.offers_tls12();
        let offers13 = engine.ext.offers_tls13();
        let cipher_suites: Vec<CipherSuite> = config
            .cipher_suites()
            .iter()
            .copied()
            .filter(|s| if s.is_tls13() { offers13 } else { offers12 })
            .collect();

        let extensions = engine
            .registry
            .generate_all(&mut engine.ext, MessageKind::ClientHello)?;

        let hello = ClientHello {
            legacy_version: if engine.is_datagram() {
                ProtocolVersion::Dtls12
            } else {
                ProtocolVersion::Tls12
            },
            random: self.random,
            session_id: self.session_id.clone(),
            cookie: if engine.is_datagram() {
                Some(self.dtls_cookie.clone().unwrap_or_default())
            } else {
                None
            },
            cipher_suites,
            compression_methods: vec![0],
            extensions,
        };
        let mut body = Vec::new();
        hello.serialize(&mut body)?;

        if !engine.ext.psk_identities.is_empty() {
            self.write_binder(&mut body)?;
        }
        Ok(body)
    }

    /// Overwrite the placeholder binder at the end of the hello.
    fn write_binder(&self, body: &mut [u8]) -> Result<(), Error> {
        let psk = self
            .offered_psk
            .as_ref()
            .ok_or_else(|| Error::CryptoError("psk identity without key".into()))?;
        let engine = &self.engine;
        let provider = engine.provider();
        let hash = psk.hash;
        let binder_len = hash.output_len();
        // binders list: u16 length, then one u8 length prefixed binder
        let binders_len = 2 + 1 + binder_len;

        let th = engine.transcript.hash_with_partial(
            provider,
            hash,
            HandshakeType::ClientHello,
            body,
            binders_len,
        );
        let schedule = KeySchedule13::new(provider, hash, Some(&psk.secret[..]))?;
        let binder = schedule.binder(&th, psk.external)?;

        let at = body.len() - binder_len;
        body[at..].copy_from_slice(&binder);
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
            &self.random,
            &self.server_random,
        )?;
        engine.log_secret(keylog::CLIENT_RANDOM, master);
        self.read_cipher = Some(block.server);
        self.write_cipher = Some(block.client);
        Ok(())
    }

    fn send_finished12(&mut self) -> Result<(), Error> {
        let master = self
            .master
            .clone()
            .ok_or_else(|| Error::CryptoError("master secret missing".into()))?;
        let engine = &mut self.engine;

        let th = engine.transcript_hash()?;
        let verify = finished12(engine.provider(), engine.hash()?, &master, true, &th)?;
        engine.handshake_hash = th;
        engine.ext.client_verify_data = verify.clone();
        engine.create_handshake(HandshakeType::Finished, |body, _| {
            body.extend_from_slice(&verify);
            Ok(())
        })
    }

    /// Resumption material after a 1.2 handshake.
    fn store_session12(&mut self) {
        let engine = &mut self.engine;
        let (ticket, lifetime) = match &self.new_ticket {
            Some(t) => (t.ticket.clone(), t.lifetime_hint),
            None => {
                // A resumed session keeps its ticket.
                let old = self.resume.as_ref().filter(|_| engine.resumed);
                let ticket = old.map(|d| d.ticket.clone()).unwrap_or_default();
                let lifetime = engine.config().ticket_lifetime().as_secs() as u32;
                (ticket, lifetime)
            }
        };
        if ticket.is_empty() && engine.session_id.is_empty() {
            return;
        }
        let (Some(version), Some(suite), Some(master)) =
            (engine.version(), engine.cipher_suite(), self.master.as_ref())
        else {
            return;
        };
        engine.session_data = Some(SessionData {
            version,
            suite,
            secret: master.clone(),
            ems: engine.ext.ems,
            session_id: engine.session_id.clone(),
            ticket,
            issued_at: engine.now_secs(),
            lifetime: if lifetime == 0 {
                engine.config().ticket_lifetime().as_secs() as u32
            } else {
                lifetime
            },
            age_add: 0,
            peer_chain: engine.peer_chain.clone(),
        });
    }

    fn handle_ticket13(&mut self, body: &[u8]) -> Result<(), Error> {
        let nst = parse_body(body, NewSessionTicket13::parse)?;
        if nst.lifetime == 0 {
            trace!("Discard ticket with zero lifetime");
            return Ok(());
        }
        let engine = &mut self.engine;
        let rms = self
            .resumption_master
            .as_ref()
            .ok_or_else(|| Error::UnexpectedMessage("ticket before handshake".into()))?;
        let psk = ticket_psk(engine.provider(), engine.hash()?, rms, &nst.nonce)?;
        let suite = engine
            .cipher_suite()
            .ok_or_else(|| Error::UnexpectedMessage("ticket before handshake".into()))?;

        debug!("Received session ticket, lifetime {}s", nst.lifetime);
        engine.session_data = Some(SessionData {
            version: ProtocolVersion::Tls13,
            suite,
            secret: psk,
            ems: false,
            session_id: Vec::new(),
            ticket: nst.ticket,
            issued_at: engine.now_secs(),
            lifetime: nst.lifetime.min(MAX_TICKET_LIFETIME),
            age_add: nst.age_add,
            peer_chain: engine.peer_chain.clone(),
        });
        Ok(())
    }
}

/// A PSK written into the ClientHello.
struct OfferedPsk {
    secret: Secret,
    hash: HashAlgorithm,
    external: bool,
}

fn start_exchange(engine: &Engine, group: NamedGroup) -> Result<Box<dyn ActiveKeyExchange>, Error> {
    let kx = engine
        .provider()
        .find_group(group)
        .ok_or_else(|| Error::IllegalParameter(format!("group {:?}", group)))?;
    kx.start_exchange().map_err(Error::CryptoError)
}

fn same_bytes(a: &[u8], b: &[u8]) -> bool {
    bool::from(a.ct_eq(b))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    SendClientHello,
    AwaitServerHello,
    AwaitCertificate,
    AwaitCertificateStatus,
    AwaitServerKeyExchange,
    AwaitServerHelloDone,
    SendClientKeyExchange,
    AwaitNewSessionTicket,
    AwaitChangeCipherSpec,
    AwaitEncryptedExtensions,
    AwaitCertificateVerify,
    AwaitFinished,
    SendFinished,
    Connected,
}

impl State {
    fn make_progress(self, client: &mut Client) -> Result<Self, Error> {
        match self {
            State::SendClientHello => self.send_client_hello(client),
            State::AwaitServerHello => self.await_server_hello(client),
            State::AwaitCertificate => self.await_certificate(client),
            State::AwaitCertificateStatus => self.await_certificate_status(client),
            State::AwaitServerKeyExchange => self.await_server_key_exchange(client),
            State::AwaitServerHelloDone => self.await_server_hello_done(client),
            State::SendClientKeyExchange => self.send_client_key_exchange(client),
            State::AwaitNewSessionTicket => self.await_new_session_ticket(client),
            State::AwaitChangeCipherSpec => self.await_change_cipher_spec(client),
            State::AwaitEncryptedExtensions => self.await_encrypted_extensions(client),
            State::AwaitCertificateVerify => self.await_certificate_verify(client),
            State::AwaitFinished => self.await_finished(client),
            State::SendFinished => self.send_finished(client),
            State::Connected => self.connected(client),
        }
    }

    fn send_client_hello(self, client: &mut Client) -> Result<Self, Error> {
        if !client.hello_retry && client.dtls_cookie.is_none() {
            client.start_hello()?;
        }
        let body = client.client_hello_body()?;

        let engine = &mut client.engine;
        engine.flight_begin();
        engine.create_handshake(HandshakeType::ClientHello, |out, _| {
            out.extend_from_slice(&body);
            Ok(())
        })?;
        engine.flight_end(true);

        Ok(State::AwaitServerHello)
    }

    fn await_server_hello(self, client: &mut Client) -> Result<Self, Error> {
        let engine = &mut client.engine;
        let Some(peek) = engine.peek_handshake() else {
            return Ok(self);
        };

        if peek.msg_type == HandshakeType::HelloVerifyRequest && engine.is_datagram() {
            let Some(msg) = engine.next_handshake(&[HandshakeType::HelloVerifyRequest])? else {
                return Ok(self);
            };
            let hvr = parse_body(&msg.body, HelloVerifyRequest::parse)?;
            if hvr.cookie.is_empty() {
                return Err(Error::IllegalParameter("empty cookie".into()));
            }
            debug!("HelloVerifyRequest with {} byte cookie", hvr.cookie.len());
            client.dtls_cookie = Some(hvr.cookie);
            engine.transcript.reset();
            return Ok(State::SendClientHello);
        }

        let hello = if peek.msg_type == HandshakeType::ServerHello {
            Some(parse_body(&peek.body, ServerHello::parse)?)
        } else {
            None
        };
        if let Some(hello) = hello.filter(|h| h.is_hello_retry_request()) {
            return handle_hello_retry(client, hello);
        }

        let Some(msg) = engine.next_handshake(&[HandshakeType::ServerHello])? else {
            return Ok(self);
        };
        let hello = parse_body(&msg.body, ServerHello::parse)?;

        if hello.session_id.len() > 32 {
            return Err(Error::IllegalParameter("session id too long".into()));
        }

        let tls13 = find_extension(&hello.extensions, ExtensionType::SupportedVersions)?.is_some();
        if tls13 {
            handle_server_hello13(client, hello)
        } else {
            handle_server_hello12(client, hello)
        }
    }

    fn await_certificate(self, client: &mut Client) -> Result<Self, Error> {
        let engine = &mut client.engine;
        let Some(msg) = engine.next_handshake(&[HandshakeType::Certificate])? else {
            return Ok(self);
        };
        let tls13 = engine.is_tls13();
        let certificate = parse_body(&msg.body, |i| Certificate::parse(i, tls13))?;
        if tls13 && !certificate.context.is_empty() {
            return Err(Error::IllegalParameter("certificate request context".into()));
        }
        trace!("Server chain of {} certificates", certificate.chain.len());
        let status_request = ExtensionType::StatusRequest.as_u16();
        if let Some(response) = certificate.leaf_ocsp {
            if !engine.ext.was_sent(status_request) {
                return Err(Error::UnsupportedExtension(status_request));
            }
            debug!("Stapled OCSP response of {} bytes", response.len());
            engine.ocsp_response = Some(response);
        }
        engine.verify_peer_chain(certificate.chain)?;

        if tls13 {
            Ok(State::AwaitCertificateVerify)
        } else if engine.ext.was_received(status_request) {
            Ok(State::AwaitCertificateStatus)
        } else {
            Ok(State::AwaitServerKeyExchange)
        }
    }

    fn await_certificate_status(self, client: &mut Client) -> Result<Self, Error> {
        let engine = &mut client.engine;
        let Some(peek) = engine.peek_handshake() else {
            return Ok(self);
        };
        // The server may acknowledge status_request and still send nothing.
        if peek.msg_type != HandshakeType::CertificateStatus {
            return Ok(State::AwaitServerKeyExchange);
        }
        let Some(msg) = engine.next_handshake(&[HandshakeType::CertificateStatus])? else {
            return Ok(self);
        };
        let status = parse_body(&msg.body, CertificateStatus::parse)?;
        debug!("Stapled OCSP response of {} bytes", status.response.len());
        engine.ocsp_response = Some(status.response);
        Ok(State::AwaitServerKeyExchange)
    }

    fn await_server_key_exchange(self, client: &mut Client) -> Result<Self, Error> {
        let engine = &mut client.engine;
        let Some(msg) = engine.next_handshake(&[HandshakeType::ServerKeyExchange])? else {
            return Ok(self);
        };
        let ske = parse_body(&msg.body, ServerKeyExchange::parse)?;
        if !engine.ext.groups.contains(&ske.params.group) {
            return Err(Error::IllegalParameter(format!(
                "server picked group {:?}",
                ske.params.group
            )));
        }

        let content = ske.params.signed_content(&client.random, &client.server_random)?;
        engine.verify_signature(&content, &ske.signed)?;

        client.server_params = Some(ske.params);
        Ok(State::AwaitServerHelloDone)
    }

    fn await_server_hello_done(self, client: &mut Client) -> Result<Self, Error> {
        let engine = &mut client.engine;
        let Some(msg) = engine.next_handshake(&[HandshakeType::ServerHelloDone])? else {
            return Ok(self);
        };
        if !msg.body.is_empty() {
            return Err(Error::ParseError(nom::error::ErrorKind::Eof));
        }
        Ok(State::SendClientKeyExchange)
    }

    fn send_client_key_exchange(self, client: &mut Client) -> Result<Self, Error> {
        let params = client
            .server_params
            .take()
            .ok_or_else(|| Error::UnexpectedMessage("no server key exchange".into()))?;

        let engine = &mut client.engine;
        engine.flight_begin();

        let kx = start_exchange(engine, params.group)?;
        let public = kx.pub_key().to_vec();
        let pre_master = Zeroizing::new(kx.complete(&params.public).map_err(Error::CryptoError)?);

        engine.create_handshake(HandshakeType::ClientKeyExchange, |body, _| {
            ClientKeyExchange { public }.serialize(body)
        })?;

        let session_hash = if engine.ext.ems {
            Some(engine.transcript_hash()?)
        } else {
            None
        };
        client.master = Some(master_secret(
            engine.provider(),
            engine.hash()?,
            &pre_master,
            session_hash.as_deref(),
            &client.random,
            &client.server_random,
        )?);
        client.derive_keys12()?;

        let engine = &mut client.engine;
        engine.send_ccs()?;
        let cipher = client
            .write_cipher
            .take()
            .ok_or_else(|| Error::CryptoError("write keys missing".into()))?;
        engine.install_write(cipher)?;
        client.send_finished12()?;
        client.engine.flight_end(true);

        if client.engine.ext.ticket_promised {
            Ok(State::AwaitNewSessionTicket)
        } else {
            Ok(State::AwaitChangeCipherSpec)
        }
    }

    fn await_new_session_ticket(self, client: &mut Client) -> Result<Self, Error> {
        let engine = &mut client.engine;
        let Some(msg) = engine.next_handshake(&[HandshakeType::NewSessionTicket])? else {
            return Ok(self);
        };
        let nst = parse_body(&msg.body, NewSessionTicket12::parse)?;
        debug!(
            "Received session ticket of {} bytes, hint {}s",
            nst.ticket.len(),
            nst.lifetime_hint
        );
        if !nst.ticket.is_empty() {
            client.new_ticket = Some(nst);
        }
        Ok(State::AwaitChangeCipherSpec)
    }

    fn await_change_cipher_spec(self, client: &mut Client) -> Result<Self, Error> {
        let engine = &mut client.engine;
        engine.expect_ccs();
        if !engine.take_ccs() {
            return Ok(self);
        }
        let cipher = client
            .read_cipher
            .take()
            .ok_or_else(|| Error::CryptoError("read keys missing".into()))?;
        engine.install_read(cipher)?;
        Ok(State::AwaitFinished)
    }

    fn await_encrypted_extensions(self, client: &mut Client) -> Result<Self, Error> {
        let engine = &mut client.engine;
        let Some(msg) = engine.next_handshake(&[HandshakeType::EncryptedExtensions])? else {
            return Ok(self);
        };
        let ee = parse_body(&msg.body, EncryptedExtensions::parse)?;
        engine
            .registry
            .parse_all(&mut engine.ext, MessageKind::EncryptedExtensions, &ee.extensions)?;
        engine.apply_fragment_limit();

        if engine.psk_authenticated {
            Ok(State::AwaitFinished)
        } else {
            Ok(State::AwaitCertificate)
        }
    }

    fn await_certificate_verify(self, client: &mut Client) -> Result<Self, Error> {
        let engine = &mut client.engine;
        let Some(msg) = engine.next_handshake(&[HandshakeType::CertificateVerify])? else {
            return Ok(self);
        };
        let signed = parse_body(&msg.body, DigitallySigned::parse)?;
        let th = engine.transcript_hash_before_last()?;
        let content = tls13_signed_content(true, &th);
        engine.verify_signature(&content, &signed)?;
        Ok(State::AwaitFinished)
    }

    fn await_finished(self, client: &mut Client) -> Result<Self, Error> {
        let engine = &mut client.engine;
        let Some(msg) = engine.next_handshake(&[HandshakeType::Finished])? else {
            return Ok(self);
        };
        let th = engine.transcript_hash_before_last()?;
        let hash = engine.hash()?;

        if engine.is_tls13() {
            let server_hs = client
                .server_hs
                .as_ref()
                .ok_or_else(|| Error::CryptoError("handshake secret missing".into()))?;
            let expected = verify_data13(engine.provider(), hash, server_hs, &th)?;
            if !same_bytes(&expected, &msg.body) {
                return Err(Error::DecryptError("server finished mismatch".into()));
            }

            let th = engine.transcript_hash()?;
            let schedule = client
                .schedule
                .as_mut()
                .ok_or_else(|| Error::CryptoError("key schedule missing".into()))?;
            let (client_ap, server_ap) = schedule.application_secrets(&th)?;
            engine.log_secret(keylog::CLIENT_TRAFFIC_SECRET_0, &client_ap);
            engine.log_secret(keylog::SERVER_TRAFFIC_SECRET_0, &server_ap);
            engine.install_read_secret(server_ap)?;
            client.client_ap = Some(client_ap);
            return Ok(State::SendFinished);
        }

        let master = client
            .master
            .as_ref()
            .ok_or_else(|| Error::CryptoError("master secret missing".into()))?;
        let expected = finished12(engine.provider(), hash, master, false, &th)?;
        if !same_bytes(&expected, &msg.body) {
            return Err(Error::DecryptError("server finished mismatch".into()));
        }
        engine.ext.server_verify_data = msg.body;

        if engine.resumed {
            return Ok(State::SendFinished);
        }
        client.store_session12();
        client.engine.complete(false)?;
        Ok(State::Connected)
    }

    fn send_finished(self, client: &mut Client) -> Result<Self, Error> {
        if !client.engine.is_tls13() {
            // Abbreviated 1.2 handshake, our flight closes it.
            let engine = &mut client.engine;
            engine.flight_begin();
            engine.send_ccs()?;
            let cipher = client
                .write_cipher
                .take()
                .ok_or_else(|| Error::CryptoError("write keys missing".into()))?;
            engine.install_write(cipher)?;
            client.send_finished12()?;
            client.engine.flight_end(false);
            client.store_session12();
            client.engine.complete(true)?;
            return Ok(State::Connected);
        }

        let engine = &mut client.engine;
        engine.flight_begin();
        let th = engine.transcript_hash()?;
        let client_hs = client
            .client_hs
            .as_ref()
            .ok_or_else(|| Error::CryptoError("handshake secret missing".into()))?;
        let verify = verify_data13(engine.provider(), engine.hash()?, client_hs, &th)?;
        engine.handshake_hash = th;
        engine.create_handshake(HandshakeType::Finished, |body, _| {
            body.extend_from_slice(&verify);
            Ok(())
        })?;

        let client_ap = client
            .client_ap
            .take()
            .ok_or_else(|| Error::CryptoError("application secret missing".into()))?;
        engine.install_write_secret(client_ap)?;

        let th = engine.transcript_hash()?;
        let schedule = client
            .schedule
            .as_ref()
            .ok_or_else(|| Error::CryptoError("key schedule missing".into()))?;
        client.resumption_master = Some(schedule.resumption_master(&th)?);
        client.schedule = None;
        client.client_hs = None;
        client.server_hs = None;

        engine.flight_end(false);
        engine.complete(false)?;
        Ok(State::Connected)
    }

    fn connected(self, client: &mut Client) -> Result<Self, Error> {
        loop {
            let engine = &mut client.engine;
            if engine.rehandshake_requested {
                return Ok(self);
            }
            let expected: &[HandshakeType] = if engine.is_tls13() {
                &[HandshakeType::NewSessionTicket, HandshakeType::KeyUpdate]
            } else {
                &[HandshakeType::HelloRequest]
            };
            let Some(msg) = engine.next_handshake(expected)? else {
                return Ok(self);
            };

            match msg.msg_type {
                HandshakeType::HelloRequest => {
                    if !msg.body.is_empty() {
                        return Err(Error::ParseError(nom::error::ErrorKind::Eof));
                    }
                    if engine.ext.secure_renegotiation {
                        debug!("Server requests renegotiation");
                        engine.rehandshake_requested = true;
                    } else {
                        debug!("Refuse renegotiation with a server lacking renegotiation_info");
                        engine.send_alert(AlertLevel::Warning, AlertDescription::NoRenegotiation)?;
                    }
                }
                HandshakeType::NewSessionTicket => client.handle_ticket13(&msg.body)?,
                HandshakeType::KeyUpdate => engine.handle_key_update(&msg.body)?,
                other => return Err(Error::UnexpectedMessage(format!("{:?}", other))),
            }
        }
    }
}

fn handle_hello_retry(client: &mut Client, hello: ServerHello) -> Result<State, Error> {
    let engine = &mut client.engine;
    if client.hello_retry || engine.is_datagram() || !engine.ext.offers_tls13() {
        return Err(Error::UnexpectedMessage("HelloRetryRequest".into()));
    }
    if !hello.cipher_suite.is_tls13()
        || !engine.config().cipher_suites().contains(&hello.cipher_suite)
    {
        return Err(Error::IllegalParameter(format!(
            "retry with cipher suite {:?}",
            hello.cipher_suite
        )));
    }
    if hello.session_id != client.session_id {
        return Err(Error::IllegalParameter("session id not echoed".into()));
    }

    engine.set_suite(hello.cipher_suite)?;
    let hash = engine.hash()?;
    let config = Arc::clone(engine.config());
    engine
        .transcript
        .replace_with_message_hash(config.crypto_provider(), hash);
    engine.next_handshake(&[HandshakeType::ServerHello])?;

    engine
        .registry
        .parse_all(&mut engine.ext, MessageKind::HelloRetryRequest, &hello.extensions)?;
    if engine.ext.selected_version != Some(ProtocolVersion::Tls13) {
        return Err(Error::IllegalParameter("retry without supported_versions".into()));
    }
    engine.set_version(ProtocolVersion::Tls13);

    let group = engine.ext.hrr_group;
    if group.is_none() && engine.ext.cookie.is_none() {
        return Err(Error::IllegalParameter("retry would not change the hello".into()));
    }
    if let Some(group) = group {
        debug!("HelloRetryRequest for group {:?}", group);
        let kx = start_exchange(engine, group)?;
        engine.ext.client_shares = vec![(group, kx.pub_key().to_vec())];
        client.key_shares = vec![kx];
    }

    // A PSK for another hash cannot be used with this suite.
    let keep_psk = client
        .offered_psk
        .as_ref()
        .map(|p| p.hash == hash)
        .unwrap_or(false);
    if !keep_psk {
        engine.ext.psk_identities.clear();
        client.offered_psk = None;
    }

    client.hello_retry = true;
    Ok(State::SendClientHello)
}

fn handle_server_hello13(client: &mut Client, hello: ServerHello) -> Result<State, Error> {
    let engine = &mut client.engine;
    engine
        .registry
        .parse_all(&mut engine.ext, MessageKind::Tls13ServerHello, &hello.extensions)?;

    if hello.legacy_version != ProtocolVersion::Tls12 {
        return Err(Error::IllegalParameter("legacy version".into()));
    }
    if hello.session_id != client.session_id {
        return Err(Error::IllegalParameter("session id not echoed".into()));
    }
    if hello.compression_method != 0 {
        return Err(Error::IllegalParameter("compression".into()));
    }
    let suite = hello.cipher_suite;
    if !suite.is_tls13() || !engine.config().cipher_suites().contains(&suite) {
        return Err(Error::IllegalParameter(format!("cipher suite {:?}", suite)));
    }
    if client.hello_retry && engine.cipher_suite() != Some(suite) {
        return Err(Error::IllegalParameter("cipher suite changed after retry".into()));
    }

    engine.set_version(ProtocolVersion::Tls13);
    engine.set_suite(suite)?;
    client.server_random = hello.random;
    let hash = engine.hash()?;

    let psk = match engine.ext.selected_psk {
        Some(index) => {
            let offered = client
                .offered_psk
                .as_ref()
                .filter(|_| index == 0)
                .ok_or_else(|| Error::IllegalParameter("psk not offered".into()))?;
            if offered.hash != hash {
                return Err(Error::IllegalParameter("psk hash differs from suite".into()));
            }
            if offered.external {
                debug!("Server accepted external psk");
                engine.psk_identity = engine.ext.psk_identities.first().map(|(id, _)| id.clone());
            } else {
                debug!("Server accepted psk");
                engine.resumed = true;
                if let Some(data) = &client.resume {
                    engine.peer_chain = data.peer_chain.clone();
                }
            }
            engine.psk_authenticated = true;
            Some(offered.secret.clone())
        }
        None => None,
    };

    let shared = match engine.ext.server_share.clone() {
        Some((group, server_public)) => {
            let pos = client
                .key_shares
                .iter()
                .position(|k| k.group() == group)
                .ok_or_else(|| Error::IllegalParameter("key_share for group not offered".into()))?;
            let kx = client.key_shares.swap_remove(pos);
            Zeroizing::new(kx.complete(&server_public).map_err(Error::CryptoError)?)
        }
        // psk_ke: the PSK alone keys the handshake.
        None if psk.is_some() && engine.ext.psk_modes.contains(&PSK_KE) => {
            debug!("No key share, psk_ke");
            Zeroizing::new(vec![0u8; hash.output_len()])
        }
        None => return Err(Error::HandshakeFailure("server sent no key_share".into())),
    };
    client.key_shares.clear();

    let mut schedule = KeySchedule13::new(engine.provider(), hash, psk.as_deref().map(|p| &p[..]))?;
    let th = engine.transcript_hash()?;
    let (client_hs, server_hs) = schedule.handshake_secrets(&shared, &th)?;
    engine.log_secret(keylog::CLIENT_HANDSHAKE_TRAFFIC_SECRET, &client_hs);
    engine.log_secret(keylog::SERVER_HANDSHAKE_TRAFFIC_SECRET, &server_hs);

    let cipher = traffic_cipher(engine.provider(), engine.suite()?, &server_hs)?;
    engine.install_read(cipher)?;
    let cipher = traffic_cipher(engine.provider(), engine.suite()?, &client_hs)?;
    engine.install_write(cipher)?;

    client.schedule = Some(schedule);
    client.client_hs = Some(client_hs);
    client.server_hs = Some(server_hs);
    Ok(State::AwaitEncryptedExtensions)
}

fn handle_server_hello12(client: &mut Client, hello: ServerHello) -> Result<State, Error> {
    let engine = &mut client.engine;
    let config = Arc::clone(engine.config());

    let version = hello.legacy_version;
    let allowed = config.versions().contains(&version)
        && !version.is_tls13()
        && version.is_datagram() == engine.is_datagram();
    if !allowed {
        return Err(Error::ProtocolVersion);
    }
    if engine.ext.offers_tls13() && hello.has_downgrade_sentinel() {
        return Err(Error::IllegalParameter("downgrade sentinel in server random".into()));
    }
    if engine.ext.renegotiating && engine.version() != Some(version) {
        return Err(Error::ProtocolVersion);
    }

    let suite = hello.cipher_suite;
    if suite.is_tls13() || !config.cipher_suites().contains(&suite) {
        return Err(Error::IllegalParameter(format!("cipher suite {:?}", suite)));
    }
    if hello.compression_method != 0 {
        return Err(Error::IllegalParameter("compression".into()));
    }

    engine
        .registry
        .parse_all(&mut engine.ext, MessageKind::Tls12ServerHello, &hello.extensions)?;
    engine.apply_fragment_limit();
    let ri = ExtensionType::RenegotiationInfo.as_u16();
    if engine.ext.renegotiating && !engine.ext.was_received(ri) {
        return Err(Error::SecurityError("renegotiation without renegotiation_info".into()));
    }

    engine.set_version(version);
    engine.set_suite(suite)?;
    client.server_random = hello.random;
    engine.session_id = hello.session_id.clone();
    // A 1.3 share we no longer need.
    client.key_shares.clear();

    let resumed = match &client.resume {
        Some(data) => {
            !data.version.is_tls13()
                && !client.session_id.is_empty()
                && hello.session_id == client.session_id
        }
        None => false,
    };
    if !resumed {
        return Ok(State::AwaitCertificate);
    }

    let Some(data) = &client.resume else {
        return Ok(State::AwaitCertificate);
    };
    if data.suite != suite {
        return Err(Error::IllegalParameter("resumed session with another suite".into()));
    }
    if data.ems != engine.ext.ems {
        return Err(Error::HandshakeFailure(
            "extended master secret differs from resumed session".into(),
        ));
    }
    debug!("Server resumed session");
    engine.resumed = true;
    engine.peer_chain = data.peer_chain.clone();
    client.master = Some(data.secret.clone());
    client.derive_keys12()?;

    if client.engine.ext.ticket_promised {
        Ok(State::AwaitNewSessionTicket)
    } else {
        Ok(State::AwaitChangeCipherSpec)
    }
}
