//! Self-signed certificate generation for tests and quick setups.

use rcgen::{Certificate as RcgenCertificate, CertificateParams, DistinguishedName, DnType};
use rcgen::{IsCa, KeyPair, PKCS_ECDSA_P256_SHA256};

use crate::Error;

/// A DER certificate with its PKCS#8 DER private key.
#[derive(Clone)]
pub struct GeneratedCertificate {
    pub certificate: Vec<u8>,
    pub private_key: Vec<u8>,
}

impl std::fmt::Debug for GeneratedCertificate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeneratedCertificate")
            .field("certificate_len", &self.certificate.len())
            .finish_non_exhaustive()
    }
}

/// Generate a P-256 self-signed certificate for `localhost`.
pub fn generate_self_signed_certificate() -> Result<GeneratedCertificate, Error> {
    generate_for_names(&["localhost"])
}

/// Generate a P-256 self-signed certificate with the given subject alt names.
pub fn generate_for_names(names: &[&str]) -> Result<GeneratedCertificate, Error> {
    let gen_err = |e: rcgen::RcgenError| Error::CertificateError(format!("generation: {e}"));

    let key_pair = KeyPair::generate(&PKCS_ECDSA_P256_SHA256).map_err(gen_err)?;

    let mut params = CertificateParams::new(names.iter().map(|n| n.to_string()).collect::<Vec<_>>());

    let mut dn = DistinguishedName::new();
    dn.push(DnType::OrganizationName, "tlswire".to_string());
    dn.push(
        DnType::CommonName,
        names.first().copied().unwrap_or("tlswire").to_string(),
    );
    params.distinguished_name = dn;
    params.is_ca = IsCa::NoCa;
    params.alg = &PKCS_ECDSA_P256_SHA256;
    params.key_pair = Some(key_pair);

    let cert = RcgenCertificate::from_params(params).map_err(gen_err)?;

    Ok(GeneratedCertificate {
        certificate: cert.serialize_der().map_err(gen_err)?,
        private_key: cert.serialize_private_key_der(),
    })
}
