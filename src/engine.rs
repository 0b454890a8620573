//! State shared by the client and server handshake machines.
//!
//! The [`Engine`] owns the record layer, the handshake framer, the
//! transcript and the flight scheduler. The state machines pull complete
//! handshake messages with [`Engine::next_handshake`] and write their own with
//! [`Engine::create_handshake`]. Alerts, change_cipher_spec and application
//! data are handled here so the machines only ever see handshake messages.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use subtle::ConstantTimeEq;

use crate::config::Config;
use crate::crypto::kdf::hmac;
use crate::crypto::{CryptoProvider, SupportedCipherSuite, VerifyStatus};
use crate::extension::{fragment_length_code, ExtContext, ExtensionRegistry};
use crate::handshake::framing::{Framer, HandshakeMessage};
use crate::handshake::key_schedule::{next_traffic_secret, traffic_cipher, Secret};
use crate::handshake::transcript::Transcript;
use crate::message::{parse_body, Alert, DigitallySigned, KeyUpdate};
use crate::record::{CipherState, RecordLayer};
use crate::resume::SessionData;
use crate::retransmit::{Action, FlightScheduler, SavedRecord};
use crate::rng::SeededRng;
use crate::time_tricks::InstantExt;
use crate::types::{AlertDescription, AlertLevel, CipherSuite, ContentType, HandshakeType};
use crate::types::{HashAlgorithm, Mode, ProtocolVersion, Role, SignatureScheme};
use crate::Error;

/// Signature schemes a client offers and accepts.
pub(crate) const SIGNATURE_SCHEMES: &[SignatureScheme] = &[SignatureScheme::ECDSA_SECP256R1_SHA256];

/// Complete handshake messages waiting for the state machine.
const MAX_QUEUED_MESSAGES: usize = 32;

pub(crate) struct Engine {
    config: Arc<Config>,
    role: Role,
    mode: Mode,
    now: Instant,

    pub rng: SeededRng,
    pub registry: ExtensionRegistry,
    pub ext: ExtContext,
    pub transcript: Transcript,

    record: RecordLayer,
    framer: Framer,
    scheduler: FlightScheduler,

    /// Complete handshake messages in receive order.
    rx_handshake: VecDeque<HandshakeMessage>,
    /// Application data, the front entry possibly partially read.
    rx_app: VecDeque<Vec<u8>>,
    /// Application data written before the first handshake completed.
    tx_app: Vec<Vec<u8>>,

    ccs_pending: bool,
    ccs_expected: bool,
    close_received: bool,
    warning_alerts: usize,
    refused: bool,

    // Message sequences of the peer flight our current flight answers.
    // A retransmission of any of them means our flight got lost.
    peer_floor: u16,
    peer_flight: (u16, u16),
    resend_pending: bool,

    version: Option<ProtocolVersion>,
    suite: Option<&'static dyn SupportedCipherSuite>,
    established: bool,
    handshaking: bool,
    pub rehandshake_requested: bool,

    pub client_random: [u8; 32],
    pub resumed: bool,
    /// 1.3 handshake authenticated by a PSK instead of a certificate.
    pub psk_authenticated: bool,
    /// Identity of the external PSK in use.
    pub psk_identity: Option<Vec<u8>>,
    /// OCSP response stapled by the server.
    pub ocsp_response: Option<Vec<u8>>,
    pub session_id: Vec<u8>,
    pub peer_chain: Vec<Vec<u8>>,
    pub peer_status: Option<VerifyStatus>,
    pub handshake_hash: Vec<u8>,
    pub session_data: Option<SessionData>,

    // 1.3 application traffic secrets, kept for KeyUpdate.
    read_secret: Option<Secret>,
    write_secret: Option<Secret>,
}

impl Engine {
    pub fn new(config: Arc<Config>, role: Role, now: Instant) -> Self {
        let mode = config.mode();

        let mut ext = ExtContext::new(role, mode);
        ext.ems_enabled = config.with_extended_master_secret();
        match role {
            Role::Client => {
                ext.tickets_enabled = config.session_tickets();
                ext.server_name = config.server_name().map(|s| s.to_string());
                ext.versions = config.versions().to_vec();
                ext.groups = config.groups().to_vec();
                ext.signature_schemes = SIGNATURE_SCHEMES.to_vec();
                ext.max_fragment = fragment_length_code(config.max_fragment_length());
                ext.ocsp_request = config.ocsp_status_request();
                ext.psk_modes = config.psk_modes().iter().map(|m| m.as_u8()).collect();
            }
            Role::Server => {
                ext.tickets_enabled = config.ticket_keys().is_some();
                ext.ocsp_staple = config
                    .credentials()
                    .map(|c| c.ocsp_response().is_some())
                    .unwrap_or(false);
            }
        }

        let record = RecordLayer::new(
            mode,
            config.max_fragment_length(),
            config.mtu(),
            config.max_queue_rx(),
        );
        let scheduler = FlightScheduler::new(
            config.flight_start_rto(),
            config.flight_max_rto(),
            config.flight_retries(),
            config.handshake_timeout(),
        );

        Engine {
            rng: SeededRng::new(config.rng_seed()),
            registry: config.extensions().clone(),
            ext,
            transcript: Transcript::new(mode),
            record,
            framer: Framer::new(mode),
            scheduler,
            rx_handshake: VecDeque::new(),
            rx_app: VecDeque::new(),
            tx_app: Vec::new(),
            ccs_pending: false,
            ccs_expected: false,
            close_received: false,
            warning_alerts: 0,
            refused: false,
            peer_floor: 0,
            peer_flight: (0, 0),
            resend_pending: false,
            version: None,
            suite: None,
            established: false,
            handshaking: true,
            rehandshake_requested: false,
            client_random: [0; 32],
            resumed: false,
            psk_authenticated: false,
            psk_identity: None,
            ocsp_response: None,
            session_id: Vec::new(),
            peer_chain: Vec::new(),
            peer_status: None,
            handshake_hash: Vec::new(),
            session_data: None,
            read_secret: None,
            write_secret: None,
            config,
            role,
            mode,
            now,
        }
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    pub fn config(&self) -> &Arc<Config> {
        &self.config
    }

    pub fn provider(&self) -> &CryptoProvider {
        self.config.crypto_provider()
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn is_datagram(&self) -> bool {
        self.mode == Mode::Datagram
    }

    pub fn now(&self) -> Instant {
        self.now
    }

    pub fn now_secs(&self) -> u64 {
        self.now.to_unix_secs()
    }

    pub fn set_now(&mut self, now: Instant) {
        self.now = now;
    }

    pub fn version(&self) -> Option<ProtocolVersion> {
        self.version
    }

    pub fn set_version(&mut self, version: ProtocolVersion) {
        self.version = Some(version);
    }

    pub fn is_tls13(&self) -> bool {
        self.version.map(|v| v.is_tls13()).unwrap_or(false)
    }

    pub fn cipher_suite(&self) -> Option<CipherSuite> {
        self.suite.map(|s| s.suite())
    }

    pub fn suite(&self) -> Result<&'static dyn SupportedCipherSuite, Error> {
        self.suite
            .ok_or_else(|| Error::UnexpectedMessage("no cipher suite negotiated".into()))
    }

    pub fn set_suite(&mut self, suite: CipherSuite) -> Result<(), Error> {
        let s = self
            .provider()
            .find_suite(suite)
            .ok_or_else(|| Error::IllegalParameter(format!("cipher suite {:?}", suite)))?;
        self.suite = Some(s);
        Ok(())
    }

    pub fn hash(&self) -> Result<HashAlgorithm, Error> {
        Ok(self.suite()?.hash_algorithm())
    }

    pub fn transcript_hash(&self) -> Result<Vec<u8>, Error> {
        let hash = self.hash()?;
        Ok(self.transcript.hash(self.provider(), hash))
    }

    pub fn transcript_hash_before_last(&self) -> Result<Vec<u8>, Error> {
        let hash = self.hash()?;
        Ok(self.transcript.hash_before_last(self.provider(), hash))
    }

    pub fn is_handshaking(&self) -> bool {
        self.handshaking
    }

    pub fn is_established(&self) -> bool {
        self.established
    }

    pub fn close_received(&self) -> bool {
        self.close_received
    }

    pub fn take_refused(&mut self) -> bool {
        std::mem::take(&mut self.refused)
    }

    // ========================================================================
    // Receiving
    // ========================================================================

    pub fn feed(&mut self, data: &[u8]) -> Result<(), Error> {
        self.record.feed(data)
    }

    /// Decrypt and dispatch one record. False when no complete record is
    /// buffered.
    pub fn process_record(&mut self) -> Result<bool, Error> {
        let Some(plain) = self.record.next_record()? else {
            return Ok(false);
        };
        match plain.content_type {
            ContentType::Handshake => self.handle_handshake_record(plain.epoch, &plain.payload)?,
            ContentType::ChangeCipherSpec => self.handle_ccs(plain.epoch, &plain.payload)?,
            ContentType::Alert => self.handle_alert(plain.epoch, &plain.payload)?,
            ContentType::ApplicationData => self.handle_app_data(plain.epoch, plain.payload)?,
            ContentType::Unknown(t) => {
                if !self.is_datagram() {
                    return Err(Error::UnexpectedMessage(format!("record type {}", t)));
                }
                debug!("Discard record of unknown type {}", t);
            }
        }
        Ok(true)
    }

    fn handle_handshake_record(&mut self, epoch: u16, payload: &[u8]) -> Result<(), Error> {
        let fed = match self.framer.feed(epoch, payload) {
            Ok(fed) => fed,
            Err(e) if self.is_datagram() => {
                debug!("Discard handshake record: {}", e);
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        if let Some(seq) = fed.duplicate {
            let (start, end) = self.peer_flight;
            if self.is_datagram()
                && seq >= start
                && seq < end
                && !self.scheduler.saved().is_empty()
            {
                debug!("Peer resent message {}, resend our flight", seq);
                self.resend_pending = true;
            }
        }

        if fed.messages.is_empty() {
            return Ok(());
        }
        self.warning_alerts = 0;
        if self.rx_handshake.len() + fed.messages.len() > MAX_QUEUED_MESSAGES {
            return Err(Error::ReceiveQueueFull);
        }
        self.rx_handshake.extend(fed.messages);
        Ok(())
    }

    fn handle_ccs(&mut self, epoch: u16, payload: &[u8]) -> Result<(), Error> {
        if payload != [1] {
            if self.is_datagram() {
                debug!("Discard malformed change_cipher_spec");
                return Ok(());
            }
            return Err(Error::UnexpectedMessage("malformed change_cipher_spec".into()));
        }

        if self.is_tls13() {
            trace!("Ignore compatibility change_cipher_spec");
            return Ok(());
        }

        if self.is_datagram() {
            // Kept even if early: reordering may put it ahead of the
            // message that precedes it.
            if epoch != self.record.read_epoch() {
                trace!("Ignore change_cipher_spec of epoch {}", epoch);
                return Ok(());
            }
        } else if !self.ccs_expected || self.ccs_pending || !self.framer.is_empty() {
            return Err(Error::UnexpectedMessage("change_cipher_spec".into()));
        }

        self.ccs_pending = true;
        Ok(())
    }

    fn handle_alert(&mut self, epoch: u16, payload: &[u8]) -> Result<(), Error> {
        if self.is_datagram() && epoch != self.record.read_epoch() {
            trace!("Ignore alert of epoch {}", epoch);
            return Ok(());
        }

        let alert = match parse_body(payload, Alert::parse) {
            Ok(a) => a,
            Err(e) if self.is_datagram() => {
                debug!("Discard malformed alert: {}", e);
                return Ok(());
            }
            Err(e) => return Err(e),
        };
        debug!("Received alert {:?} {:?}", alert.level, alert.description);

        if alert.description == AlertDescription::CloseNotify {
            self.close_received = true;
            return Ok(());
        }

        let fatal = alert.level != AlertLevel::Warning
            || (self.is_tls13() && alert.description != AlertDescription::UserCanceled);
        if fatal {
            return Err(Error::AlertReceived(alert.description));
        }

        if alert.description == AlertDescription::NoRenegotiation
            && self.ext.renegotiating
            && self.handshaking
        {
            self.refused = true;
            return Ok(());
        }

        self.warning_alerts += 1;
        if self.warning_alerts > self.config.max_warning_alerts() {
            return Err(Error::TooManyWarningAlerts(self.warning_alerts));
        }
        Ok(())
    }

    fn handle_app_data(&mut self, epoch: u16, payload: Vec<u8>) -> Result<(), Error> {
        if !self.established {
            if self.is_datagram() {
                debug!("Drop application data before handshake completion");
                return Ok(());
            }
            return Err(Error::UnexpectedMessage("application data before handshake".into()));
        }
        if self.is_datagram() && epoch != self.record.read_epoch() {
            trace!("Drop application data of epoch {}", epoch);
            return Ok(());
        }
        if !payload.is_empty() {
            self.rx_app.push_back(payload);
        }
        Ok(())
    }

    // ========================================================================
    // Handshake messages
    // ========================================================================

    pub fn peek_handshake(&self) -> Option<&HandshakeMessage> {
        self.rx_handshake.front()
    }

    pub fn drop_handshake(&mut self) {
        self.rx_handshake.pop_front();
    }

    /// Take the next handshake message, which must be one of `expected`.
    ///
    /// A stray HelloRequest is skipped. The message is appended to the
    /// transcript.
    pub fn next_handshake(
        &mut self,
        expected: &[HandshakeType],
    ) -> Result<Option<HandshakeMessage>, Error> {
        loop {
            let Some(msg) = self.rx_handshake.pop_front() else {
                return Ok(None);
            };

            if self.is_datagram() && msg.epoch != self.record.read_epoch() {
                debug!("Drop {:?} of stale epoch {}", msg.msg_type, msg.epoch);
                continue;
            }

            if !expected.contains(&msg.msg_type) {
                if msg.msg_type == HandshakeType::HelloRequest {
                    trace!("Ignore HelloRequest");
                    continue;
                }
                return Err(Error::UnexpectedMessage(format!(
                    "{:?}, expected {:?}",
                    msg.msg_type, expected
                )));
            }

            trace!("Received {:?} ({} bytes)", msg.msg_type, msg.body.len());
            if self.in_transcript(msg.msg_type) {
                self.transcript.push(msg.msg_type, msg.seq, &msg.body);
            }
            return Ok(Some(msg));
        }
    }

    fn in_transcript(&self, msg_type: HandshakeType) -> bool {
        match msg_type {
            HandshakeType::HelloRequest | HandshakeType::HelloVerifyRequest => false,
            HandshakeType::NewSessionTicket | HandshakeType::KeyUpdate => !self.is_tls13(),
            _ => true,
        }
    }

    /// Write one handshake message. `f` fills in the body.
    pub fn create_handshake<F>(&mut self, msg_type: HandshakeType, f: F) -> Result<(), Error>
    where
        F: FnOnce(&mut Vec<u8>, &mut Self) -> Result<(), Error>,
    {
        let mut body = Vec::new();
        f(&mut body, self)?;

        let limit = if self.is_datagram() {
            self.record.datagram_payload_limit()
        } else {
            self.record.max_fragment()
        };
        let (seq, fragments) = self.framer.encode(msg_type, &body, limit);
        if self.in_transcript(msg_type) {
            self.transcript.push(msg_type, seq, &body);
        }
        trace!("Send {:?} ({} bytes)", msg_type, body.len());

        for fragment in fragments {
            self.seal_saved(ContentType::Handshake, &fragment)?;
        }
        Ok(())
    }

    pub fn send_ccs(&mut self) -> Result<(), Error> {
        trace!("Send change_cipher_spec");
        self.seal_saved(ContentType::ChangeCipherSpec, &[1])
    }

    fn seal_saved(&mut self, content_type: ContentType, payload: &[u8]) -> Result<(), Error> {
        self.record.seal(content_type, payload)?;
        if self.is_datagram() && self.handshaking {
            self.scheduler.save(SavedRecord {
                content_type,
                epoch: self.record.write_epoch(),
                fragment: payload.to_vec(),
            });
        }
        Ok(())
    }

    /// Mark change_cipher_spec as acceptable from the next record on.
    pub fn expect_ccs(&mut self) {
        self.ccs_expected = true;
    }

    /// Consume a received change_cipher_spec.
    pub fn take_ccs(&mut self) -> bool {
        if !self.ccs_pending {
            return false;
        }
        self.ccs_pending = false;
        self.ccs_expected = false;
        true
    }

    // ========================================================================
    // Keys
    // ========================================================================

    pub fn install_read(&mut self, cipher: CipherState) -> Result<(), Error> {
        if !self.is_datagram() && (!self.framer.is_empty() || !self.rx_handshake.is_empty()) {
            return Err(Error::UnexpectedMessage(
                "handshake message spans a key change".into(),
            ));
        }
        self.record.install_read(cipher)
    }

    pub fn install_write(&mut self, cipher: CipherState) -> Result<(), Error> {
        self.record.install_write(cipher)
    }

    /// Shrink records once both hellos agreed on max_fragment_length.
    pub fn apply_fragment_limit(&mut self) {
        if let Some(len) = self.ext.negotiated_fragment_length() {
            self.record.set_fragment_limit(len);
        }
    }

    /// Install 1.3 application keys and keep the secrets for KeyUpdate.
    pub fn install_read_secret(&mut self, secret: Secret) -> Result<(), Error> {
        let cipher = traffic_cipher(self.provider(), self.suite()?, &secret)?;
        self.install_read(cipher)?;
        self.read_secret = Some(secret);
        Ok(())
    }

    pub fn install_write_secret(&mut self, secret: Secret) -> Result<(), Error> {
        let cipher = traffic_cipher(self.provider(), self.suite()?, &secret)?;
        self.install_write(cipher)?;
        self.write_secret = Some(secret);
        Ok(())
    }

    /// Send a KeyUpdate and move our write side to the next secret.
    pub fn send_key_update(&mut self, request_peer: bool) -> Result<(), Error> {
        let update = if request_peer {
            KeyUpdate::Requested
        } else {
            KeyUpdate::NotRequested
        };
        self.create_handshake(HandshakeType::KeyUpdate, |body, _| {
            update.serialize(body);
            Ok(())
        })?;

        let hash = self.hash()?;
        let current = self
            .write_secret
            .as_ref()
            .ok_or_else(|| Error::UnexpectedMessage("key update before handshake".into()))?;
        let next = next_traffic_secret(self.provider(), hash, current)?;
        debug!("Write key updated");
        self.install_write_secret(next)
    }

    pub fn handle_key_update(&mut self, body: &[u8]) -> Result<(), Error> {
        let update = parse_body(body, KeyUpdate::parse)?;

        let hash = self.hash()?;
        let current = self
            .read_secret
            .as_ref()
            .ok_or_else(|| Error::UnexpectedMessage("key update before handshake".into()))?;
        let next = next_traffic_secret(self.provider(), hash, current)?;
        self.install_read_secret(next)?;
        debug!("Read key updated, peer {:?}", update);

        if update == KeyUpdate::Requested {
            self.send_key_update(false)?;
        }
        Ok(())
    }

    pub fn log_secret(&self, label: &str, secret: &[u8]) {
        let key_log = self.config.key_log();
        if key_log.will_log(label) {
            key_log.log(label, &self.client_random, secret);
        }
    }

    /// Stateless cookie for HelloVerifyRequest and HelloRetryRequest.
    pub fn cookie_for(&self, client_random: &[u8]) -> Result<Vec<u8>, Error> {
        hmac(
            self.provider(),
            HashAlgorithm::SHA256,
            self.config.cookie_secret(),
            client_random,
        )
    }

    pub fn cookie_matches(&self, client_random: &[u8], cookie: &[u8]) -> Result<bool, Error> {
        let expected = self.cookie_for(client_random)?;
        Ok(bool::from(expected.ct_eq(cookie)))
    }

    // ========================================================================
    // Certificates and signatures
    // ========================================================================

    pub fn verify_peer_chain(&mut self, chain: Vec<Vec<u8>>) -> Result<(), Error> {
        if chain.is_empty() {
            return Err(Error::CertificateError("empty certificate chain".into()));
        }
        let status = self
            .config
            .cert_verifier()
            .verify(&chain, self.config.server_name());
        self.peer_status = Some(status);
        self.peer_chain = chain;
        if !status.is_ok() {
            return Err(Error::CertificateError(format!("{:?}", status)));
        }
        Ok(())
    }

    pub fn verify_signature(&self, data: &[u8], signed: &DigitallySigned) -> Result<(), Error> {
        if !SIGNATURE_SCHEMES.contains(&signed.scheme) {
            return Err(Error::IllegalParameter(format!(
                "signature scheme {:?}",
                signed.scheme
            )));
        }
        let leaf = self
            .peer_chain
            .first()
            .ok_or_else(|| Error::CertificateError("no peer certificate".into()))?;
        self.provider()
            .signature_verification
            .verify_signature(leaf, data, &signed.signature, signed.scheme)
            .map_err(Error::DecryptError)
    }

    pub fn sign(&self, data: &[u8]) -> Result<DigitallySigned, Error> {
        let credentials = self
            .config
            .credentials()
            .ok_or_else(|| Error::HandshakeFailure("no server credentials".into()))?;
        let key = credentials.signing_key();
        let scheme = key.scheme();
        if !self.ext.signature_schemes.is_empty() && !self.ext.signature_schemes.contains(&scheme) {
            return Err(Error::HandshakeFailure("no common signature scheme".into()));
        }
        let signature = key.sign(data).map_err(Error::CryptoError)?;
        Ok(DigitallySigned { scheme, signature })
    }

    pub fn local_chain(&self) -> Result<Vec<Vec<u8>>, Error> {
        let credentials = self
            .config
            .credentials()
            .ok_or_else(|| Error::HandshakeFailure("no server credentials".into()))?;
        Ok(credentials.chain().to_vec())
    }

    /// Our stapled OCSP response, when the client asked for one.
    pub fn local_ocsp(&self) -> Option<Vec<u8>> {
        if !self.ext.ocsp_request {
            return None;
        }
        let credentials = self.config.credentials()?;
        credentials.ocsp_response().map(|r| r.to_vec())
    }

    // ========================================================================
    // Flights
    // ========================================================================

    pub fn flight_begin(&mut self) {
        self.scheduler.flight_begin();
        self.peer_flight = (self.peer_floor, self.framer.next_recv());
        self.resend_pending = false;
    }

    pub fn flight_end(&mut self, expect_reply: bool) {
        self.scheduler.flight_end(expect_reply && self.is_datagram());
        self.peer_floor = self.framer.next_recv();
        self.record.end_datagram();
    }

    fn flight_resend(&mut self, reason: &str) -> Result<(), Error> {
        debug!("Resend flight ({})", reason);
        let saved = self.scheduler.saved().to_vec();
        for r in saved {
            if !self.record.seal_in_epoch(r.epoch, r.content_type, &r.fragment)? {
                debug!("Epoch {} gone, skip resend of record", r.epoch);
            }
        }
        self.record.end_datagram();
        Ok(())
    }

    /// Resend our last flight if the peer showed it got lost.
    pub fn resend_if_requested(&mut self) -> Result<(), Error> {
        if std::mem::take(&mut self.resend_pending) {
            self.flight_resend("peer retransmission")?;
        }
        Ok(())
    }

    pub fn handle_timeout(&mut self, now: Instant) -> Result<(), Error> {
        self.now = now;
        match self.scheduler.poll(now)? {
            Action::Resend => self.flight_resend("timeout"),
            Action::Nothing => Ok(()),
        }
    }

    pub fn time_remaining(&mut self, now: Instant) -> Option<Duration> {
        self.now = now;
        self.scheduler.time_remaining(now)
    }

    /// The handshake is done. A final datagram flight is kept so a peer
    /// that lost it can get it resent.
    pub fn complete(&mut self, keep_flight: bool) -> Result<(), Error> {
        if keep_flight && self.is_datagram() {
            self.scheduler.complete();
        } else {
            self.scheduler.restart();
        }
        self.handshaking = false;
        self.established = true;
        self.ccs_expected = false;
        self.ext.renegotiating = false;
        if self.is_datagram() && self.role == Role::Server {
            self.framer.set_accept_restart(true);
        }

        info!(
            "Handshake complete: {:?} {:?}{}",
            self.version,
            self.cipher_suite(),
            if self.resumed { " (resumed)" } else { "" }
        );

        for data in std::mem::take(&mut self.tx_app) {
            self.send_app_data(&data)?;
        }
        Ok(())
    }

    // ========================================================================
    // Renegotiation
    // ========================================================================

    /// Reset per-handshake state for a new handshake on this connection.
    /// `reset_receive` is false when the peer's ClientHello that opened it
    /// is already queued.
    pub fn begin_renegotiation(&mut self, reset_receive: bool) {
        debug!("Begin renegotiation");
        self.ext.reset_exchange();
        self.ext.renegotiating = true;
        self.transcript.reset();
        if reset_receive {
            self.framer.reset_sequences();
        } else {
            self.framer.reset_send();
        }
        self.scheduler.restart();
        self.peer_floor = 0;
        self.peer_flight = (0, 0);
        self.ccs_pending = false;
        self.ccs_expected = false;
        self.handshaking = true;
        self.resumed = false;
        self.psk_authenticated = false;
        self.psk_identity = None;
        self.refused = false;
        self.rehandshake_requested = false;
    }

    pub fn abort_renegotiation(&mut self) {
        debug!("Renegotiation abandoned");
        self.ext.renegotiating = false;
        self.handshaking = false;
        self.scheduler.restart();
        if self.is_datagram() && self.role == Role::Server {
            self.framer.set_accept_restart(true);
        }
    }

    pub fn refuse_renegotiation(&mut self) -> Result<(), Error> {
        self.rehandshake_requested = false;
        if self.is_datagram() && self.role == Role::Server {
            self.framer.set_accept_restart(true);
        }
        self.send_alert(AlertLevel::Warning, AlertDescription::NoRenegotiation)
    }

    // ========================================================================
    // Application data and alerts
    // ========================================================================

    /// Seal application data. Datagram writes are cut to one record.
    pub fn send_app_data(&mut self, data: &[u8]) -> Result<usize, Error> {
        let n = if self.is_datagram() {
            data.len().min(self.record.datagram_payload_limit())
        } else {
            data.len()
        };
        if !self.established {
            self.tx_app.push(data[..n].to_vec());
            return Ok(n);
        }
        self.record.seal(ContentType::ApplicationData, &data[..n])?;
        if self.is_datagram() {
            self.record.end_datagram();
        }
        Ok(n)
    }

    pub fn has_app_data(&self) -> bool {
        !self.rx_app.is_empty()
    }

    pub fn recv_app_data(&mut self, buf: &mut [u8]) -> Option<usize> {
        let front = self.rx_app.front_mut()?;
        let n = front.len().min(buf.len());
        buf[..n].copy_from_slice(&front[..n]);
        if n == front.len() {
            self.rx_app.pop_front();
        } else {
            front.drain(..n);
        }
        Some(n)
    }

    pub fn send_alert(&mut self, level: AlertLevel, description: AlertDescription) -> Result<(), Error> {
        debug!("Send alert {:?} {:?}", level, description);
        let mut body = Vec::with_capacity(2);
        Alert { level, description }.serialize(&mut body);
        self.record.seal(ContentType::Alert, &body)?;
        self.record.end_datagram();
        Ok(())
    }

    // ========================================================================
    // Transmit queue
    // ========================================================================

    pub fn front_tx(&self) -> Option<&[u8]> {
        self.record.front_tx()
    }

    pub fn pop_tx(&mut self) {
        self.record.pop_tx()
    }

    pub fn has_tx(&self) -> bool {
        self.record.has_tx()
    }

    pub fn has_pending_input(&self) -> bool {
        self.record.has_pending_input()
    }
}
