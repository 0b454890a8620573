//! Loading certificates and private keys by URL.
//!
//! A URL is `scheme:rest`. Anything without a registered scheme prefix is
//! treated as a file path. Applications plug in tokens or OS key stores by
//! registering another [`CredentialProvider`] under its own scheme.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::crypto::{CryptoProvider, SigningKey};
use crate::Error;

/// Resolves credential URLs of one scheme.
pub trait CredentialProvider: Send + Sync + fmt::Debug {
    /// Load a private key. `url` is passed with the scheme prefix intact.
    fn import_key(
        &self,
        url: &str,
        provider: &CryptoProvider,
    ) -> Result<Arc<dyn SigningKey>, Error>;

    /// Load a certificate chain, leaf first, as DER.
    fn import_certificate(&self, url: &str) -> Result<Vec<Vec<u8>>, Error>;
}

/// The `file:` scheme. Reads DER or PEM.
#[derive(Debug, Default)]
pub struct FileCredentials;

impl FileCredentials {
    fn read(url: &str) -> Result<Vec<u8>, Error> {
        let path = url.strip_prefix("file:").unwrap_or(url);
        std::fs::read(path).map_err(|e| Error::ConfigError(format!("{path}: {e}")))
    }
}

impl CredentialProvider for FileCredentials {
    fn import_key(
        &self,
        url: &str,
        provider: &CryptoProvider,
    ) -> Result<Arc<dyn SigningKey>, Error> {
        let bytes = Self::read(url)?;
        let key = provider
            .key_provider
            .load_private_key(&bytes)
            .map_err(Error::ConfigError)?;
        Ok(Arc::from(key))
    }

    fn import_certificate(&self, url: &str) -> Result<Vec<Vec<u8>>, Error> {
        let bytes = Self::read(url)?;
        parse_certificates(&bytes)
    }
}

/// DER is taken as a single certificate; PEM may hold a chain.
pub(crate) fn parse_certificates(bytes: &[u8]) -> Result<Vec<Vec<u8>>, Error> {
    if !bytes.starts_with(b"-----BEGIN") {
        if bytes.is_empty() {
            return Err(Error::ConfigError("empty certificate".into()));
        }
        return Ok(vec![bytes.to_vec()]);
    }

    let text = std::str::from_utf8(bytes)
        .map_err(|_| Error::ConfigError("certificate PEM is not UTF-8".into()))?;

    let mut chain = Vec::new();
    let mut rest = text;
    const END: &str = "-----END CERTIFICATE-----";
    while let Some(start) = rest.find("-----BEGIN CERTIFICATE-----") {
        let Some(end) = rest[start..].find(END) else {
            return Err(Error::ConfigError("unterminated PEM block".into()));
        };
        let block = &rest[start..start + end + END.len()];
        let (label, doc) = der::Document::from_pem(block)
            .map_err(|e| Error::ConfigError(format!("PEM: {e}")))?;
        if label != "CERTIFICATE" {
            return Err(Error::ConfigError(format!("unexpected PEM label {label}")));
        }
        chain.push(doc.as_bytes().to_vec());
        rest = &rest[start + end + END.len()..];
    }

    if chain.is_empty() {
        return Err(Error::ConfigError("no certificate in PEM".into()));
    }
    Ok(chain)
}

/// Registry of URL scheme handlers.
#[derive(Debug, Clone)]
pub struct UrlSchemes {
    handlers: BTreeMap<String, Arc<dyn CredentialProvider>>,
}

impl Default for UrlSchemes {
    fn default() -> Self {
        let mut handlers: BTreeMap<String, Arc<dyn CredentialProvider>> = BTreeMap::new();
        handlers.insert("file".into(), Arc::new(FileCredentials));
        Self { handlers }
    }
}

impl UrlSchemes {
    /// A registry knowing only `file:`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for `scheme` (without the colon).
    pub fn register(
        &mut self,
        scheme: &str,
        handler: Arc<dyn CredentialProvider>,
    ) -> Result<(), Error> {
        if self.handlers.contains_key(scheme) {
            return Err(Error::ConfigError(format!(
                "scheme {scheme} already registered"
            )));
        }
        self.handlers.insert(scheme.to_string(), handler);
        Ok(())
    }

    pub fn is_supported(&self, url: &str) -> bool {
        self.handler(url).is_ok()
    }

    fn handler(&self, url: &str) -> Result<&Arc<dyn CredentialProvider>, Error> {
        let scheme = match url.split_once(':') {
            // Windows drive letters are paths.
            Some((scheme, _)) if scheme.len() > 1 => scheme,
            _ => "file",
        };
        self.handlers
            .get(scheme)
            .ok_or_else(|| Error::ConfigError(format!("unknown URL scheme: {scheme}")))
    }

    pub fn import_private_key(
        &self,
        url: &str,
        provider: &CryptoProvider,
    ) -> Result<Arc<dyn SigningKey>, Error> {
        self.handler(url)?.import_key(url, provider)
    }

    pub fn import_certificate(&self, url: &str) -> Result<Vec<Vec<u8>>, Error> {
        self.handler(url)?.import_certificate(url)
    }
}

/// A certificate chain and the key for its leaf.
#[derive(Clone)]
pub struct Credentials {
    chain: Vec<Vec<u8>>,
    key: Arc<dyn SigningKey>,
    ocsp_response: Option<Vec<u8>>,
}

impl Credentials {
    pub fn new(chain: Vec<Vec<u8>>, key: Arc<dyn SigningKey>) -> Result<Self, Error> {
        if chain.is_empty() {
            return Err(Error::ConfigError("empty certificate chain".into()));
        }
        Ok(Self {
            chain,
            key,
            ocsp_response: None,
        })
    }

    /// From a DER certificate and a PKCS#8 DER key.
    pub fn from_der(
        certificate: &[u8],
        private_key: &[u8],
        provider: &CryptoProvider,
    ) -> Result<Self, Error> {
        let key = provider
            .key_provider
            .load_private_key(private_key)
            .map_err(Error::ConfigError)?;
        Self::new(vec![certificate.to_vec()], Arc::from(key))
    }

    pub fn from_urls(
        schemes: &UrlSchemes,
        certificate_url: &str,
        key_url: &str,
        provider: &CryptoProvider,
    ) -> Result<Self, Error> {
        let chain = schemes.import_certificate(certificate_url)?;
        let key = schemes.import_private_key(key_url, provider)?;
        Self::new(chain, key)
    }

    pub fn chain(&self) -> &[Vec<u8>] {
        &self.chain
    }

    pub fn signing_key(&self) -> &Arc<dyn SigningKey> {
        &self.key
    }

    /// Staple a DER OCSPResponse for the leaf. Sent to clients asking for
    /// it through `status_request`.
    pub fn with_ocsp_response(mut self, response: Vec<u8>) -> Result<Self, Error> {
        if response.is_empty() {
            return Err(Error::ConfigError("empty OCSP response".into()));
        }
        self.ocsp_response = Some(response);
        Ok(self)
    }

    pub fn ocsp_response(&self) -> Option<&[u8]> {
        self.ocsp_response.as_deref()
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("chain_len", &self.chain.len())
            .field("scheme", &self.key.scheme())
            .field("ocsp", &self.ocsp_response.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::certificate::generate_self_signed_certificate;
    use crate::crypto::rust_crypto;

    #[derive(Debug)]
    struct Token(Vec<u8>, Vec<u8>);

    impl CredentialProvider for Token {
        fn import_key(
            &self,
            _url: &str,
            provider: &CryptoProvider,
        ) -> Result<Arc<dyn SigningKey>, Error> {
            let key = provider
                .key_provider
                .load_private_key(&self.1)
                .map_err(Error::ConfigError)?;
            Ok(Arc::from(key))
        }

        fn import_certificate(&self, _url: &str) -> Result<Vec<Vec<u8>>, Error> {
            Ok(vec![self.0.clone()])
        }
    }

    #[test]
    fn custom_scheme() {
        let cert = generate_self_signed_certificate().unwrap();
        let provider = rust_crypto::default_provider();

        let mut schemes = UrlSchemes::new();
        let token = Arc::new(Token(cert.certificate.clone(), cert.private_key.clone()));
        schemes.register("token", token.clone()).unwrap();
        assert!(schemes.register("token", token).is_err());

        let creds = Credentials::from_urls(&schemes, "token:slot=1", "token:slot=1", &provider)
            .unwrap();
        assert_eq!(creds.chain(), &[cert.certificate]);
    }

    #[test]
    fn unknown_scheme() {
        let schemes = UrlSchemes::new();
        assert!(!schemes.is_supported("pkcs11:token=x"));
        assert!(schemes.is_supported("/etc/cert.pem"));
        assert!(schemes.is_supported("file:/etc/cert.pem"));
    }

    #[test]
    fn file_scheme_reads_der() {
        let cert = generate_self_signed_certificate().unwrap();
        let dir = std::env::temp_dir();
        let path = dir.join(format!("tlswire-cred-{}.der", std::process::id()));
        std::fs::write(&path, &cert.certificate).unwrap();

        let schemes = UrlSchemes::new();
        let url = format!("file:{}", path.display());
        let chain = schemes.import_certificate(&url).unwrap();
        assert_eq!(chain, vec![cert.certificate]);
        let _ = std::fs::remove_file(path);
    }

    #[test]
    fn pem_chain() {
        let cert = generate_self_signed_certificate().unwrap();
        let doc = der::Document::try_from(cert.certificate.as_slice()).unwrap();
        let pem = doc.to_pem("CERTIFICATE", der::pem::LineEnding::LF).unwrap();
        let doubled = format!("{pem}{pem}");
        let chain = parse_certificates(doubled.as_bytes()).unwrap();
        assert_eq!(chain.len(), 2);
        assert_eq!(chain[0], cert.certificate);
    }
}
