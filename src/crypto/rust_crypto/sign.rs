//! ECDSA signing, key loading and certificate signature verification.

use std::str;

use der::Decode;
use p256::ecdsa::signature::hazmat::{PrehashSigner, PrehashVerifier};
use p256::ecdsa::{Signature, SigningKey, VerifyingKey};
use p256::pkcs8::DecodePrivateKey;
use sha2::{Digest, Sha256};
use spki::ObjectIdentifier;
use x509_cert::Certificate as X509Certificate;

use crate::crypto::provider::{KeyProvider, SignatureVerifier, SigningKey as SigningKeyTrait};
use crate::types::SignatureScheme;

const OID_EC_PUBLIC_KEY: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.10045.2.1");
const OID_P256: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.10045.3.1.7");

struct EcdsaP256SigningKey(SigningKey);

impl std::fmt::Debug for EcdsaP256SigningKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("EcdsaP256SigningKey").finish()
    }
}

impl SigningKeyTrait for EcdsaP256SigningKey {
    fn sign(&self, data: &[u8]) -> Result<Vec<u8>, String> {
        let hash = Sha256::digest(data);
        let signature: Signature = self
            .0
            .sign_prehash(&hash)
            .map_err(|_| "Signing failed".to_string())?;
        Ok(signature.to_der().as_bytes().to_vec())
    }

    fn scheme(&self) -> SignatureScheme {
        SignatureScheme::ECDSA_SECP256R1_SHA256
    }
}

#[derive(Debug)]
pub(super) struct RustCryptoKeyProvider;

impl KeyProvider for RustCryptoKeyProvider {
    fn load_private_key(&self, key: &[u8]) -> Result<Box<dyn SigningKeyTrait>, String> {
        if let Ok(k) = SigningKey::from_pkcs8_der(key) {
            return Ok(Box::new(EcdsaP256SigningKey(k)));
        }

        if let Ok(pem) = str::from_utf8(key) {
            if pem.contains("-----BEGIN") {
                let k = SigningKey::from_pkcs8_pem(pem)
                    .map_err(|e| format!("Failed to parse PEM private key: {e}"))?;
                return Ok(Box::new(EcdsaP256SigningKey(k)));
            }
        }

        Err("Failed to parse private key as PKCS#8 P-256".to_string())
    }
}

#[derive(Debug)]
pub(super) struct RustCryptoSignatureVerifier;

impl SignatureVerifier for RustCryptoSignatureVerifier {
    fn verify_signature(
        &self,
        cert_der: &[u8],
        data: &[u8],
        signature: &[u8],
        scheme: SignatureScheme,
    ) -> Result<(), String> {
        if scheme != SignatureScheme::ECDSA_SECP256R1_SHA256 {
            return Err(format!("Unsupported signature scheme: {:?}", scheme));
        }

        let cert = X509Certificate::from_der(cert_der)
            .map_err(|e| format!("Failed to parse certificate: {e}"))?;
        let spki = &cert.tbs_certificate.subject_public_key_info;

        if spki.algorithm.oid != OID_EC_PUBLIC_KEY {
            return Err(format!(
                "Unsupported public key algorithm: {}",
                spki.algorithm.oid
            ));
        }

        let curve: ObjectIdentifier = spki
            .algorithm
            .parameters
            .as_ref()
            .ok_or("Missing EC curve parameter in certificate")?
            .decode_as()
            .map_err(|_| "Invalid EC curve parameter in certificate".to_string())?;
        if curve != OID_P256 {
            return Err(format!("Unsupported EC curve: {}", curve));
        }

        let pubkey_bytes = spki
            .subject_public_key
            .as_bytes()
            .ok_or_else(|| "Invalid EC subject_public_key bitstring".to_string())?;

        let verifying_key = VerifyingKey::from_sec1_bytes(pubkey_bytes)
            .map_err(|_| "Invalid P-256 public key".to_string())?;
        let sig = Signature::from_der(signature).map_err(|_| "Invalid signature format".to_string())?;

        let hash = Sha256::digest(data);
        verifying_key
            .verify_prehash(&hash, &sig)
            .map_err(|_| "ECDSA signature verification failed".to_string())
    }
}

pub(super) static KEY_PROVIDER: RustCryptoKeyProvider = RustCryptoKeyProvider;
pub(super) static SIGNATURE_VERIFIER: RustCryptoSignatureVerifier = RustCryptoSignatureVerifier;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::certificate::generate_self_signed_certificate;

    #[test]
    fn sign_then_verify_with_certificate() {
        let cert = generate_self_signed_certificate().unwrap();
        let key = KEY_PROVIDER.load_private_key(&cert.private_key).unwrap();
        let sig = key.sign(b"transcript").unwrap();

        SIGNATURE_VERIFIER
            .verify_signature(&cert.certificate, b"transcript", &sig, key.scheme())
            .unwrap();

        let err = SIGNATURE_VERIFIER.verify_signature(
            &cert.certificate,
            b"other",
            &sig,
            key.scheme(),
        );
        assert!(err.is_err());
    }

    #[test]
    fn garbage_key_fails() {
        assert!(KEY_PROVIDER.load_private_key(b"nope").is_err());
    }
}
