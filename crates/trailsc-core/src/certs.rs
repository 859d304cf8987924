//! Loading of the signer key and certificate chain from stacked PEM blocks.
//!
//! The expected input is an unencrypted PKCS#1 private key followed by the
//! certificate chain in order: leaf, intermediates..., and optionally the
//! root. Self-signed certificates never make it into the intermediate list.

use std::io::Read;
use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use thiserror::Error;
use tracing::{debug, warn};
use x509_parser::pem::Pem;

use crate::signer::{BundleSigner, RsaSigner};

const CERTIFICATE_LABEL: &str = "CERTIFICATE";
const PEM_LINE_WIDTH: usize = 64;

#[derive(Debug, Error)]
pub enum CertError {
    #[error("no certificate input was provided")]
    MissingInput,
    #[error("failed to read certificate input: {0}")]
    Read(#[source] std::io::Error),
    #[error("failed to parse (encrypted?) private key: {0}")]
    PrivateKey(#[source] rsa::pkcs1::Error),
    #[error("certificate input contains more than one private key")]
    MultiplePrivateKeys,
    #[error("certificate input contains no private key")]
    MissingPrivateKey,
}

/// Signer plus the PEM-encoded certificates that ship with every bundle.
#[derive(Clone, Debug)]
pub struct CertificateSet {
    pub signer: Arc<dyn BundleSigner>,
    pub leaf: Vec<u8>,
    pub intermediates: Vec<Vec<u8>>,
}

impl CertificateSet {
    /// Intermediates concatenated in chain order, as written to `intermediate.pem`.
    pub fn intermediate_chain(&self) -> Vec<u8> {
        self.intermediates.concat()
    }
}

/// Parses stacked PEM blocks into a [`CertificateSet`].
///
/// Zero certificates is not an error: `leaf` and `intermediates` are left
/// empty and it is up to the caller to decide whether that is acceptable.
/// Intermediates that fail to parse as X.509 are skipped.
pub fn parse_certificates<R: Read>(input: Option<R>) -> Result<CertificateSet, CertError> {
    let mut reader = input.ok_or(CertError::MissingInput)?;
    let mut raw = Vec::new();
    reader.read_to_end(&mut raw).map_err(CertError::Read)?;

    let mut certs: Vec<Pem> = Vec::new();
    let mut signer: Option<RsaSigner> = None;
    for block in Pem::iter_from_buffer(&raw) {
        let block = match block {
            Ok(block) => block,
            Err(err) => {
                warn!(error = ?err, "skipping undecodable PEM block");
                continue;
            }
        };
        if block.label == CERTIFICATE_LABEL {
            certs.push(block);
        } else if block.label.ends_with("PRIVATE KEY") {
            if signer.is_some() {
                return Err(CertError::MultiplePrivateKeys);
            }
            signer = Some(RsaSigner::from_pkcs1_der(&block.contents).map_err(CertError::PrivateKey)?);
        } else {
            debug!(label = %block.label, "ignoring PEM block");
        }
    }
    let signer = signer.ok_or(CertError::MissingPrivateKey)?;

    let leaf = certs
        .first()
        .map(|block| encode_pem(CERTIFICATE_LABEL, &block.contents))
        .unwrap_or_default();

    let mut intermediates = Vec::new();
    for (index, block) in certs.iter().enumerate().skip(1) {
        let cert = match block.parse_x509() {
            Ok(cert) => cert,
            Err(err) => {
                debug!(index, error = ?err, "skipping malformed intermediate certificate");
                continue;
            }
        };
        if cert.issuer().to_string() == cert.subject().to_string() {
            debug!(index, subject = %cert.subject(), "omitting self-signed certificate");
            continue;
        }
        intermediates.push(encode_pem(CERTIFICATE_LABEL, &block.contents));
    }

    Ok(CertificateSet {
        signer: Arc::new(signer),
        leaf,
        intermediates,
    })
}

pub fn encode_pem(label: &str, der: &[u8]) -> Vec<u8> {
    let body = STANDARD.encode(der);
    let mut out = format!("-----BEGIN {label}-----\n");
    for line in body.as_bytes().chunks(PEM_LINE_WIDTH) {
        out.push_str(&String::from_utf8_lossy(line));
        out.push('\n');
    }
    out.push_str(&format!("-----END {label}-----\n"));
    out.into_bytes()
}
