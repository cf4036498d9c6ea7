//! Private key capability and its rustls adapter.

use std::fmt;
use std::sync::Arc;

use rustls::client::ResolvesClientCert;
use rustls::pki_types::PrivateKeyDer;
use rustls::sign::{CertifiedKey, Signer, SigningKey};
use rustls::{SignatureAlgorithm, SignatureScheme};

use crate::error::{Error, Result};

/// A private key that can sign but never reveals its material.
///
/// Backed by software keys ([`SoftwareKey`]) or by hardware tokens that
/// only expose a signing operation.
pub trait KeyHandle: Send + Sync + fmt::Debug {
    /// Key algorithm.
    fn algorithm(&self) -> SignatureAlgorithm;

    /// Picks the first scheme in `offered` this key can sign with.
    fn choose_scheme(&self, offered: &[SignatureScheme]) -> Option<SignatureScheme>;

    /// Signs `message` with `scheme`.
    fn sign(&self, scheme: SignatureScheme, message: &[u8]) -> Result<Vec<u8>>;
}

/// In-memory key using the ring provider.
pub struct SoftwareKey {
    key: Arc<dyn SigningKey>,
}

impl fmt::Debug for SoftwareKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SoftwareKey")
            .field("algorithm", &self.key.algorithm())
            .finish_non_exhaustive()
    }
}

impl SoftwareKey {
    /// Wraps a PKCS#8, PKCS#1 or SEC1 private key.
    pub fn from_der(der: &PrivateKeyDer<'_>) -> Result<Self> {
        let key = rustls::crypto::ring::sign::any_supported_type(der)?;
        Ok(Self { key })
    }
}

impl KeyHandle for SoftwareKey {
    fn algorithm(&self) -> SignatureAlgorithm {
        self.key.algorithm()
    }

    fn choose_scheme(&self, offered: &[SignatureScheme]) -> Option<SignatureScheme> {
        self.key.choose_scheme(offered).map(|signer| signer.scheme())
    }

    fn sign(&self, scheme: SignatureScheme, message: &[u8]) -> Result<Vec<u8>> {
        let signer = self
            .key
            .choose_scheme(&[scheme])
            .ok_or_else(|| Error::NotSupported(format!("signature scheme {scheme:?}")))?;
        Ok(signer.sign(message)?)
    }
}

/// Exposes a [`KeyHandle`] as a rustls [`SigningKey`].
#[derive(Debug)]
struct HandleSigningKey(Arc<dyn KeyHandle>);

#[derive(Debug)]
struct HandleSigner {
    key: Arc<dyn KeyHandle>,
    scheme: SignatureScheme,
}

impl SigningKey for HandleSigningKey {
    fn choose_scheme(&self, offered: &[SignatureScheme]) -> Option<Box<dyn Signer>> {
        let scheme = self.0.choose_scheme(offered)?;
        Some(Box::new(HandleSigner {
            key: Arc::clone(&self.0),
            scheme,
        }))
    }

    fn algorithm(&self) -> SignatureAlgorithm {
        self.0.algorithm()
    }
}

impl Signer for HandleSigner {
    fn sign(&self, message: &[u8]) -> std::result::Result<Vec<u8>, rustls::Error> {
        self.key.sign(self.scheme, message).map_err(|err| match err {
            Error::Tls(err) => err,
            other => rustls::Error::General(other.to_string()),
        })
    }

    fn scheme(&self) -> SignatureScheme {
        self.scheme
    }
}

/// Always presents the same client certificate.
#[derive(Debug)]
pub(crate) struct ClientCertResolver(Arc<CertifiedKey>);

impl ClientCertResolver {
    pub(crate) fn new(
        chain: Vec<rustls::pki_types::CertificateDer<'static>>,
        key: Arc<dyn KeyHandle>,
    ) -> Self {
        Self(Arc::new(CertifiedKey::new(
            chain,
            Arc::new(HandleSigningKey(key)),
        )))
    }
}

impl ResolvesClientCert for ClientCertResolver {
    fn resolve(
        &self,
        _root_hint_subjects: &[&[u8]],
        sigschemes: &[SignatureScheme],
    ) -> Option<Arc<CertifiedKey>> {
        self.0
            .key
            .choose_scheme(sigschemes)
            .map(|_| Arc::clone(&self.0))
    }

    fn has_certs(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use rustls::pki_types::PrivatePkcs8KeyDer;

    use super::*;

    fn software_key() -> SoftwareKey {
        let pair = rcgen::KeyPair::generate().unwrap();
        let der = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(pair.serialize_der()));
        SoftwareKey::from_der(&der).unwrap()
    }

    #[test]
    fn software_key_signs_with_offered_scheme() {
        let key = software_key();
        assert_eq!(key.algorithm(), SignatureAlgorithm::ECDSA);

        let offered = [
            SignatureScheme::RSA_PSS_SHA256,
            SignatureScheme::ECDSA_NISTP256_SHA256,
        ];
        let scheme = key.choose_scheme(&offered).unwrap();
        assert_eq!(scheme, SignatureScheme::ECDSA_NISTP256_SHA256);
        assert!(!key.sign(scheme, b"hello").unwrap().is_empty());
    }

    #[test]
    fn unsupported_scheme_is_rejected() {
        let key = software_key();
        assert!(key.choose_scheme(&[SignatureScheme::ED25519]).is_none());
        assert!(matches!(
            key.sign(SignatureScheme::ED25519, b"hello"),
            Err(Error::NotSupported(_))
        ));
    }

    #[test]
    fn adapter_delegates_to_handle() {
        let handle: Arc<dyn KeyHandle> = Arc::new(software_key());
        let signing = HandleSigningKey(handle);
        let signer = signing
            .choose_scheme(&[SignatureScheme::ECDSA_NISTP256_SHA256])
            .unwrap();
        assert_eq!(signer.scheme(), SignatureScheme::ECDSA_NISTP256_SHA256);
        assert!(!signer.sign(b"payload").unwrap().is_empty());
    }
}
