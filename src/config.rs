use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::credentials::Credentials;
use crate::crypto::{rust_crypto, AcceptAnyCertificate, CertVerifier, CryptoProvider};
use crate::extension::ExtensionRegistry;
use crate::keylog::{KeyLog, KeyLogFile};
use crate::resume::{ExternalPsk, SessionStore, TicketKeys};
use crate::types::{CipherSuite, Mode, NamedGroup, ProtocolVersion, PskKeyExchangeMode};
use crate::Error;

/// Session configuration.
///
/// Cheap to clone: shared parts (credentials, stores, ticket keys, the
/// provider's capabilities) are reference counted.
#[derive(Clone)]
pub struct Config {
    mode: Mode,
    versions: Vec<ProtocolVersion>,
    cipher_suites: Vec<CipherSuite>,
    groups: Vec<NamedGroup>,
    mtu: usize,
    max_fragment_length: usize,
    max_queue_rx: usize,
    flight_start_rto: Duration,
    flight_max_rto: Duration,
    flight_retries: usize,
    handshake_timeout: Duration,
    max_warning_alerts: usize,
    dtls_cookie: bool,
    cookie_secret: [u8; 32],
    session_tickets: bool,
    ticket_lifetime: Duration,
    with_extended_master_secret: bool,
    server_name: Option<String>,
    ocsp_status_request: bool,
    external_psks: Vec<ExternalPsk>,
    psk_modes: Vec<PskKeyExchangeMode>,
    credentials: Option<Arc<Credentials>>,
    cert_verifier: Arc<dyn CertVerifier>,
    session_store: Option<Arc<dyn SessionStore>>,
    ticket_keys: Option<Arc<TicketKeys>>,
    key_log: Arc<dyn KeyLog>,
    extensions: ExtensionRegistry,
    crypto_provider: CryptoProvider,
    rng_seed: Option<u64>,
}

impl Config {
    /// Create a new configuration builder.
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder {
            mode: Mode::Stream,
            versions: None,
            cipher_suites: None,
            groups: None,
            mtu: 1150,
            max_fragment_length: 16384,
            max_queue_rx: 30,
            flight_start_rto: Duration::from_secs(1),
            flight_max_rto: Duration::from_secs(60),
            flight_retries: 3,
            handshake_timeout: Duration::from_secs(40),
            max_warning_alerts: 64,
            dtls_cookie: true,
            session_tickets: true,
            ticket_lifetime: Duration::from_secs(6 * 3600),
            with_extended_master_secret: true,
            server_name: None,
            ocsp_status_request: false,
            external_psks: Vec::new(),
            psk_modes: vec![PskKeyExchangeMode::PskDheKe],
            credentials: None,
            cert_verifier: None,
            session_store: None,
            ticket_keys: None,
            key_log: None,
            extensions: None,
            crypto_provider: None,
            rng_seed: None,
        }
    }

    /// Byte stream (TLS) or datagram (DTLS) transport.
    #[inline(always)]
    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// Protocol versions in preference order.
    ///
    /// Defaults to TLS 1.3 then TLS 1.2 for streams, DTLS 1.2 for datagrams.
    #[inline(always)]
    pub fn versions(&self) -> &[ProtocolVersion] {
        &self.versions
    }

    /// Cipher suites in preference order, both families mixed.
    #[inline(always)]
    pub fn cipher_suites(&self) -> &[CipherSuite] {
        &self.cipher_suites
    }

    /// Key exchange groups in preference order.
    #[inline(always)]
    pub fn groups(&self) -> &[NamedGroup] {
        &self.groups
    }

    /// Max transmission unit.
    ///
    /// The largest datagram we will produce. Defaults to 1150.
    #[inline(always)]
    pub fn mtu(&self) -> usize {
        self.mtu
    }

    /// Largest plaintext per record. Defaults to 16384.
    ///
    /// A client with a smaller value asks the server for it through
    /// `max_fragment_length`.
    #[inline(always)]
    pub fn max_fragment_length(&self) -> usize {
        self.max_fragment_length
    }

    /// Max amount of incoming records to buffer before dropping more input.
    ///
    /// Defaults to 30.
    #[inline(always)]
    pub fn max_queue_rx(&self) -> usize {
        self.max_queue_rx
    }

    /// Time of first retry.
    ///
    /// Every flight restarts with this value, doubled for every retry up to
    /// [`Config::flight_max_rto`]. Defaults to 1 second.
    #[inline(always)]
    pub fn flight_start_rto(&self) -> Duration {
        self.flight_start_rto
    }

    /// Cap on the doubled retry timeout. Defaults to 60 seconds.
    #[inline(always)]
    pub fn flight_max_rto(&self) -> Duration {
        self.flight_max_rto
    }

    /// Max number of retries per flight. Defaults to 3.
    #[inline(always)]
    pub fn flight_retries(&self) -> usize {
        self.flight_retries
    }

    /// Timeout for the entire handshake, regardless of flights.
    ///
    /// Defaults to 40 seconds.
    #[inline(always)]
    pub fn handshake_timeout(&self) -> Duration {
        self.handshake_timeout
    }

    /// Consecutive warning alerts tolerated before the session fails.
    ///
    /// Defaults to 64.
    #[inline(always)]
    pub fn max_warning_alerts(&self) -> usize {
        self.max_warning_alerts
    }

    /// Whether a DTLS server answers the first ClientHello with a
    /// HelloVerifyRequest. Defaults to true.
    #[inline(always)]
    pub fn dtls_cookie(&self) -> bool {
        self.dtls_cookie
    }

    #[inline(always)]
    pub(crate) fn cookie_secret(&self) -> &[u8; 32] {
        &self.cookie_secret
    }

    /// Whether a client asks for session tickets. Defaults to true.
    ///
    /// A server issues tickets whenever it has [`Config::ticket_keys`].
    #[inline(always)]
    pub fn session_tickets(&self) -> bool {
        self.session_tickets
    }

    /// Lifetime of issued tickets. Defaults to 6 hours.
    #[inline(always)]
    pub fn ticket_lifetime(&self) -> Duration {
        self.ticket_lifetime
    }

    /// Whether to offer and accept Extended Master Secret (rfc7627).
    ///
    /// Defaults to true.
    #[inline(always)]
    pub fn with_extended_master_secret(&self) -> bool {
        self.with_extended_master_secret
    }

    /// Name sent in `server_name` by a client.
    #[inline(always)]
    pub fn server_name(&self) -> Option<&str> {
        self.server_name.as_deref()
    }

    /// Certificate chain and key of a server.
    #[inline(always)]
    /// Whether a client asks for a stapled OCSP response.
    pub fn ocsp_status_request(&self) -> bool {
        self.ocsp_status_request
    }

    /// TLS 1.3 keys agreed out of band. A client offers the first.
    pub fn external_psks(&self) -> &[ExternalPsk] {
        &self.external_psks
    }

    /// PSK modes offered (client) or accepted (server).
    pub fn psk_modes(&self) -> &[PskKeyExchangeMode] {
        &self.psk_modes
    }

    pub fn credentials(&self) -> Option<&Arc<Credentials>> {
        self.credentials.as_ref()
    }

    /// Decides on the peer's certificate chain.
    ///
    /// Defaults to [`AcceptAnyCertificate`].
    #[inline(always)]
    pub fn cert_verifier(&self) -> &Arc<dyn CertVerifier> {
        &self.cert_verifier
    }

    /// Server session-id cache. No cache by default.
    #[inline(always)]
    pub fn session_store(&self) -> Option<&Arc<dyn SessionStore>> {
        self.session_store.as_ref()
    }

    /// Server ticket key. No tickets are issued without one.
    #[inline(always)]
    pub fn ticket_keys(&self) -> Option<&Arc<TicketKeys>> {
        self.ticket_keys.as_ref()
    }

    /// Secret export for traffic analysis tools.
    ///
    /// Defaults to [`KeyLogFile`], which only writes when `SSLKEYLOGFILE` is set.
    #[inline(always)]
    pub fn key_log(&self) -> &Arc<dyn KeyLog> {
        &self.key_log
    }

    /// Extensions every session starts with.
    #[inline(always)]
    pub fn extensions(&self) -> &ExtensionRegistry {
        &self.extensions
    }

    /// Cryptographic provider.
    #[inline(always)]
    pub fn crypto_provider(&self) -> &CryptoProvider {
        &self.crypto_provider
    }

    /// Seed for non-secret randomness, for reproducible tests.
    #[inline(always)]
    pub fn rng_seed(&self) -> Option<u64> {
        self.rng_seed
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("mode", &self.mode)
            .field("versions", &self.versions)
            .field("cipher_suites", &self.cipher_suites)
            .field("groups", &self.groups)
            .field("mtu", &self.mtu)
            .field("flight_retries", &self.flight_retries)
            .field("has_credentials", &self.credentials.is_some())
            .finish_non_exhaustive()
    }
}

/// Builder for [`Config`].
pub struct ConfigBuilder {
    mode: Mode,
    versions: Option<Vec<ProtocolVersion>>,
    cipher_suites: Option<Vec<CipherSuite>>,
    groups: Option<Vec<NamedGroup>>,
    mtu: usize,
    max_fragment_length: usize,
    max_queue_rx: usize,
    flight_start_rto: Duration,
    flight_max_rto: Duration,
    flight_retries: usize,
    handshake_timeout: Duration,
    max_warning_alerts: usize,
    dtls_cookie: bool,
    session_tickets: bool,
    ticket_lifetime: Duration,
    with_extended_master_secret: bool,
    server_name: Option<String>,
    ocsp_status_request: bool,
    external_psks: Vec<ExternalPsk>,
    psk_modes: Vec<PskKeyExchangeMode>,
    credentials: Option<Arc<Credentials>>,
    cert_verifier: Option<Arc<dyn CertVerifier>>,
    session_store: Option<Arc<dyn SessionStore>>,
    ticket_keys: Option<Arc<TicketKeys>>,
    key_log: Option<Arc<dyn KeyLog>>,
    extensions: Option<ExtensionRegistry>,
    crypto_provider: Option<CryptoProvider>,
    rng_seed: Option<u64>,
}

impl ConfigBuilder {
    /// Set the transport. Defaults to [`Mode::Stream`].
    pub fn mode(mut self, mode: Mode) -> Self {
        self.mode = mode;
        self
    }

    /// Set the protocol versions, most preferred first.
    pub fn versions(mut self, versions: &[ProtocolVersion]) -> Self {
        self.versions = Some(versions.to_vec());
        self
    }

    /// Set the cipher suites, most preferred first.
    ///
    /// Defaults to every suite of the crypto provider.
    pub fn cipher_suites(mut self, suites: &[CipherSuite]) -> Self {
        self.cipher_suites = Some(suites.to_vec());
        self
    }

    /// Set the key exchange groups, most preferred first.
    ///
    /// Defaults to every group of the crypto provider.
    pub fn groups(mut self, groups: &[NamedGroup]) -> Self {
        self.groups = Some(groups.to_vec());
        self
    }

    /// Set the max transmission unit (MTU). Defaults to 1150.
    pub fn mtu(mut self, mtu: usize) -> Self {
        self.mtu = mtu;
        self
    }

    /// Set the largest plaintext per record. One of 512, 1024, 2048, 4096
    /// or 16384, the default.
    pub fn max_fragment_length(mut self, len: usize) -> Self {
        self.max_fragment_length = len;
        self
    }

    /// Set the max amount of buffered incoming records. Defaults to 30.
    pub fn max_queue_rx(mut self, max_queue_rx: usize) -> Self {
        self.max_queue_rx = max_queue_rx;
        self
    }

    /// Set the time of first retry. Defaults to 1 second.
    pub fn flight_start_rto(mut self, rto: Duration) -> Self {
        self.flight_start_rto = rto;
        self
    }

    /// Set the cap on the retry timeout. Defaults to 60 seconds.
    pub fn flight_max_rto(mut self, rto: Duration) -> Self {
        self.flight_max_rto = rto;
        self
    }

    /// Set the max number of retries per flight. Defaults to 3.
    pub fn flight_retries(mut self, retries: usize) -> Self {
        self.flight_retries = retries;
        self
    }

    /// Set the timeout for the entire handshake. Defaults to 40 seconds.
    pub fn handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    /// Set how many consecutive warning alerts are tolerated. Defaults to 64.
    pub fn max_warning_alerts(mut self, max: usize) -> Self {
        self.max_warning_alerts = max;
        self
    }

    /// Set whether a DTLS server sends HelloVerifyRequest. Defaults to true.
    pub fn dtls_cookie(mut self, enabled: bool) -> Self {
        self.dtls_cookie = enabled;
        self
    }

    /// Set whether a client asks for session tickets. Defaults to true.
    pub fn session_tickets(mut self, enabled: bool) -> Self {
        self.session_tickets = enabled;
        self
    }

    /// Set the lifetime of issued tickets. Defaults to 6 hours.
    pub fn ticket_lifetime(mut self, lifetime: Duration) -> Self {
        self.ticket_lifetime = lifetime;
        self
    }

    /// Set whether to enable Extended Master Secret (rfc7627).
    ///
    /// Defaults to true.
    pub fn with_extended_master_secret(mut self, enabled: bool) -> Self {
        self.with_extended_master_secret = enabled;
        self
    }

    /// Set the name a client sends in `server_name`.
    pub fn server_name(mut self, name: impl Into<String>) -> Self {
        self.server_name = Some(name.into());
        self
    }

    /// Ask the server for a stapled OCSP response. Off by default.
    pub fn ocsp_status_request(mut self, enabled: bool) -> Self {
        self.ocsp_status_request = enabled;
        self
    }

    /// Add a TLS 1.3 key agreed out of band.
    pub fn external_psk(mut self, psk: ExternalPsk) -> Self {
        self.external_psks.push(psk);
        self
    }

    /// Set the PSK modes. Defaults to `psk_dhe_ke` alone.
    pub fn psk_modes(mut self, modes: &[PskKeyExchangeMode]) -> Self {
        self.psk_modes = modes.to_vec();
        self
    }

    /// Set the server certificate chain and key.
    pub fn credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = Some(Arc::new(credentials));
        self
    }

    /// Set the peer certificate verifier.
    pub fn cert_verifier(mut self, verifier: Arc<dyn CertVerifier>) -> Self {
        self.cert_verifier = Some(verifier);
        self
    }

    /// Set the server session-id cache.
    pub fn session_store(mut self, store: Arc<dyn SessionStore>) -> Self {
        self.session_store = Some(store);
        self
    }

    /// Set the server ticket key.
    pub fn ticket_keys(mut self, keys: Arc<TicketKeys>) -> Self {
        self.ticket_keys = Some(keys);
        self
    }

    /// Set where secrets are exported. Defaults to [`KeyLogFile`].
    pub fn key_log(mut self, key_log: Arc<dyn KeyLog>) -> Self {
        self.key_log = Some(key_log);
        self
    }

    /// Set the extension registry sessions start from.
    ///
    /// Defaults to [`ExtensionRegistry::with_builtins`].
    pub fn extensions(mut self, registry: ExtensionRegistry) -> Self {
        self.extensions = Some(registry);
        self
    }

    /// Set a custom crypto provider.
    ///
    /// If not set, the default installed with
    /// [`CryptoProvider::install_default`] is used, and failing that the
    /// RustCrypto provider.
    pub fn with_crypto_provider(mut self, provider: CryptoProvider) -> Self {
        self.crypto_provider = Some(provider);
        self
    }

    /// Seed the generator of non-secret randomness.
    pub fn rng_seed(mut self, seed: u64) -> Self {
        self.rng_seed = Some(seed);
        self
    }

    /// Build the configuration.
    ///
    /// Returns `Error::ConfigError` on inconsistent settings.
    pub fn build(self) -> Result<Config, Error> {
        let crypto_provider = self
            .crypto_provider
            .or_else(|| CryptoProvider::get_default().cloned())
            .unwrap_or_else(rust_crypto::default_provider);

        let versions = self.versions.unwrap_or_else(|| match self.mode {
            Mode::Stream => vec![ProtocolVersion::Tls13, ProtocolVersion::Tls12],
            Mode::Datagram => vec![ProtocolVersion::Dtls12],
        });
        if versions.is_empty() {
            return Err(Error::ConfigError("no protocol versions".into()));
        }
        for v in &versions {
            let ok = match self.mode {
                Mode::Stream => matches!(v, ProtocolVersion::Tls12 | ProtocolVersion::Tls13),
                Mode::Datagram => *v == ProtocolVersion::Dtls12,
            };
            if !ok {
                return Err(Error::ConfigError(format!(
                    "{:?} not available over {:?}",
                    v, self.mode
                )));
            }
        }

        let cipher_suites = self.cipher_suites.unwrap_or_else(|| {
            crypto_provider
                .cipher_suites
                .iter()
                .map(|s| s.suite())
                .collect()
        });
        if let Some(s) = cipher_suites
            .iter()
            .find(|s| crypto_provider.find_suite(**s).is_none())
        {
            return Err(Error::ConfigError(format!("provider lacks {:?}", s)));
        }
        let usable = cipher_suites.iter().any(|s| {
            versions
                .iter()
                .any(|v| s.is_tls13() == v.is_tls13())
        });
        if !usable {
            return Err(Error::ConfigError("no cipher suite for the versions".into()));
        }

        let groups = self.groups.unwrap_or_else(|| {
            crypto_provider.kx_groups.iter().map(|g| g.name()).collect()
        });
        if groups.is_empty() {
            return Err(Error::ConfigError("no key exchange groups".into()));
        }
        if let Some(g) = groups.iter().find(|g| crypto_provider.find_group(**g).is_none()) {
            return Err(Error::ConfigError(format!("provider lacks {:?}", g)));
        }

        if self.mode == Mode::Datagram && !(256..=65535).contains(&self.mtu) {
            return Err(Error::ConfigError(format!("mtu {} out of range", self.mtu)));
        }
        if !matches!(self.max_fragment_length, 512 | 1024 | 2048 | 4096 | 16384) {
            return Err(Error::ConfigError(format!(
                "max fragment length {} not one of 512, 1024, 2048, 4096, 16384",
                self.max_fragment_length
            )));
        }
        if self.psk_modes.is_empty() {
            return Err(Error::ConfigError("no psk modes".into()));
        }
        let tls13 = versions.contains(&ProtocolVersion::Tls13);
        if !self.external_psks.is_empty() && !tls13 {
            return Err(Error::ConfigError("external psk needs TLS 1.3".into()));
        }
        for psk in &self.external_psks {
            let usable = cipher_suites
                .iter()
                .any(|s| s.is_tls13() && s.hash_algorithm() == psk.hash());
            if !usable {
                return Err(Error::ConfigError(format!(
                    "no cipher suite for psk hash {:?}",
                    psk.hash()
                )));
            }
        }

        let cookie_secret = crypto_provider
            .random_bytes::<32>()
            .map_err(Error::CryptoError)?;

        Ok(Config {
            mode: self.mode,
            versions,
            cipher_suites,
            groups,
            mtu: self.mtu,
            max_fragment_length: self.max_fragment_length,
            max_queue_rx: self.max_queue_rx,
            flight_start_rto: self.flight_start_rto,
            flight_max_rto: self.flight_max_rto,
            flight_retries: self.flight_retries,
            handshake_timeout: self.handshake_timeout,
            max_warning_alerts: self.max_warning_alerts,
            dtls_cookie: self.dtls_cookie,
            cookie_secret,
            session_tickets: self.session_tickets,
            ticket_lifetime: self.ticket_lifetime,
            with_extended_master_secret: self.with_extended_master_secret,
            server_name: self.server_name,
            ocsp_status_request: self.ocsp_status_request,
            external_psks: self.external_psks,
            psk_modes: self.psk_modes,
            credentials: self.credentials,
            cert_verifier: self
                .cert_verifier
                .unwrap_or_else(|| Arc::new(AcceptAnyCertificate)),
            session_store: self.session_store,
            ticket_keys: self.ticket_keys,
            key_log: self.key_log.unwrap_or_else(|| Arc::new(KeyLogFile::new())),
            extensions: self.extensions.unwrap_or_else(ExtensionRegistry::with_builtins),
            crypto_provider,
            rng_seed: self.rng_seed,
        })
    }
}

impl Default for Config {
    fn default() -> Self {
        Config::builder()
            .build()
            .expect("Default config should always validate")
    }
}
