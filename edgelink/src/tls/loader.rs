//! Certificate lookup and loading.

use std::fs;
use std::sync::Arc;

use rustls::pki_types::pem::PemObject;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use tracing::debug;

use super::key::{KeyHandle, SoftwareKey};
use crate::error::{Error, Result};

/// Location of a certificate and its key.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CertInfo {
    /// URL of the PEM certificate chain.
    pub cert_url: String,
    /// URL of the private key.
    pub key_url: String,
    /// DER encoded issuer name.
    pub issuer: Vec<u8>,
    /// Serial number.
    pub serial: Vec<u8>,
}

/// Resolves which certificate to use for a certificate type.
pub trait CertProvider: Send + Sync {
    /// Returns the certificate of `cert_type`. Empty `issuer` and `serial`
    /// select the current one.
    fn get_certificate(&self, cert_type: &str, issuer: &[u8], serial: &[u8]) -> Result<CertInfo>;
}

/// Loads certificate chains and keys from URLs.
pub trait CertLoader: Send + Sync {
    /// Loads the certificate chain at `url`, leaf first.
    fn load_cert_chain(&self, url: &str) -> Result<Vec<CertificateDer<'static>>>;

    /// Loads the private key at `url`.
    fn load_private_key(&self, url: &str) -> Result<Arc<dyn KeyHandle>>;
}

/// Loads PEM files from `file://` URLs.
#[derive(Debug, Clone, Copy, Default)]
pub struct FileCertLoader;

impl FileCertLoader {
    fn path(url: &str) -> Result<&str> {
        url.strip_prefix("file://")
            .ok_or_else(|| Error::NotSupported(format!("certificate URL {url}")))
    }
}

impl CertLoader for FileCertLoader {
    fn load_cert_chain(&self, url: &str) -> Result<Vec<CertificateDer<'static>>> {
        let pem = fs::read(Self::path(url)?)?;
        let chain = parse_certificates(&pem)?;
        if chain.is_empty() {
            return Err(Error::Certificate(format!("no certificates in {url}")));
        }
        debug!(url, len = chain.len(), "loaded certificate chain");
        Ok(chain)
    }

    fn load_private_key(&self, url: &str) -> Result<Arc<dyn KeyHandle>> {
        let pem = fs::read(Self::path(url)?)?;
        let der = PrivateKeyDer::from_pem_slice(&pem)
            .map_err(|e| Error::Certificate(format!("failed to parse private key: {e}")))?;
        Ok(Arc::new(SoftwareKey::from_der(&der)?))
    }
}

/// Parses every certificate in a PEM document.
pub(crate) fn parse_certificates(pem: &[u8]) -> Result<Vec<CertificateDer<'static>>> {
    CertificateDer::pem_slice_iter(pem)
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| Error::Certificate(format!("failed to parse certificates: {e}")))
}
