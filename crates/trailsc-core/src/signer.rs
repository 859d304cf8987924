use std::fmt;

use rsa::pkcs1::DecodeRsaPrivateKey;
use rsa::pkcs8::DecodePublicKey;
use rsa::traits::PublicKeyParts;
use rsa::{Pkcs1v15Sign, RsaPrivateKey, RsaPublicKey};
use sha2::{Digest, Sha256};
use thiserror::Error;
use x509_parser::pem::parse_x509_pem;

#[derive(Debug, Error)]
pub enum SignError {
    #[error("signing failed: {0}")]
    Sign(#[source] rsa::Error),
    #[error("signature does not verify: {0}")]
    Verify(#[source] rsa::Error),
    #[error("leaf certificate is unusable: {0}")]
    Certificate(String),
}

/// Signs SHA-256 digests of config archives.
pub trait BundleSigner: Send + Sync + fmt::Debug {
    fn sign_digest(&self, digest: &[u8]) -> Result<Vec<u8>, SignError>;
}

/// RSA PKCS#1 v1.5 signer over SHA-256 digests.
pub struct RsaSigner {
    key: RsaPrivateKey,
}

impl RsaSigner {
    pub fn from_pkcs1_der(der: &[u8]) -> Result<Self, rsa::pkcs1::Error> {
        RsaPrivateKey::from_pkcs1_der(der).map(|key| Self { key })
    }
}

impl fmt::Debug for RsaSigner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RsaSigner")
            .field("bits", &(self.key.size() * 8))
            .finish_non_exhaustive()
    }
}

impl BundleSigner for RsaSigner {
    fn sign_digest(&self, digest: &[u8]) -> Result<Vec<u8>, SignError> {
        self.key
            .sign(Pkcs1v15Sign::new::<Sha256>(), digest)
            .map_err(SignError::Sign)
    }
}

pub fn sha256_digest(bytes: &[u8]) -> [u8; 32] {
    Sha256::digest(bytes).into()
}

/// Checks `signature` over `digest` against the public key in a PEM leaf certificate.
pub fn verify_digest(leaf_pem: &[u8], digest: &[u8], signature: &[u8]) -> Result<(), SignError> {
    let (_, pem) =
        parse_x509_pem(leaf_pem).map_err(|err| SignError::Certificate(err.to_string()))?;
    let cert = pem
        .parse_x509()
        .map_err(|err| SignError::Certificate(err.to_string()))?;
    let public_key = RsaPublicKey::from_public_key_der(cert.public_key().raw)
        .map_err(|err| SignError::Certificate(err.to_string()))?;
    public_key
        .verify(Pkcs1v15Sign::new::<Sha256>(), digest, signature)
        .map_err(SignError::Verify)
}
