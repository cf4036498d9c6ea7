//! Throwaway PKI for TLS tests.

use std::fs;
use std::path::Path;
use std::sync::Arc;

use edgelink::{CertInfo, CertProvider, Error, Result};
use rcgen::{BasicConstraints, CertificateParams, DnType, IsCa, KeyPair};
use rustls::ServerConfig;
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};
use rustls::server::WebPkiClientVerifier;

/// A CA with one server and one client certificate.
pub struct TestPki {
    pub ca_pem: String,
    ca_der: CertificateDer<'static>,
    server_chain: Vec<CertificateDer<'static>>,
    server_key: Vec<u8>,
    pub client_cert_pem: String,
    pub client_key_pem: String,
}

impl TestPki {
    /// Generates a fresh CA and certificates; the server certificate is
    /// valid for `localhost`.
    pub fn generate() -> Self {
        let ca_key = KeyPair::generate().unwrap();
        let mut ca_params = CertificateParams::new(Vec::<String>::new()).unwrap();
        ca_params.distinguished_name.push(DnType::CommonName, "edgelink test CA");
        ca_params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        let ca = ca_params.self_signed(&ca_key).unwrap();

        let server_key = KeyPair::generate().unwrap();
        let server = leaf_params("localhost")
            .signed_by(&server_key, &ca, &ca_key)
            .unwrap();

        let client_key = KeyPair::generate().unwrap();
        let client = leaf_params("node0")
            .signed_by(&client_key, &ca, &ca_key)
            .unwrap();

        Self {
            ca_pem: ca.pem(),
            ca_der: ca.der().clone(),
            server_chain: vec![server.der().clone()],
            server_key: server_key.serialize_der(),
            client_cert_pem: client.pem(),
            client_key_pem: client_key.serialize_pem(),
        }
    }

    /// Server configuration requiring a client certificate from this CA.
    pub fn server_config(&self) -> Arc<ServerConfig> {
        let provider = Arc::new(rustls::crypto::ring::default_provider());
        let mut roots = rustls::RootCertStore::empty();
        roots.add(self.ca_der.clone()).unwrap();
        let verifier = WebPkiClientVerifier::builder_with_provider(Arc::new(roots), Arc::clone(&provider))
            .build()
            .unwrap();
        let key = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(self.server_key.clone()));
        let config = ServerConfig::builder_with_provider(provider)
            .with_safe_default_protocol_versions()
            .unwrap()
            .with_client_cert_verifier(verifier)
            .with_single_cert(self.server_chain.clone(), key)
            .unwrap();
        Arc::new(config)
    }

    /// Writes the client certificate and key below `dir` and returns a
    /// provider pointing at them.
    pub fn client_provider(&self, dir: &Path, cert_type: &str) -> Arc<StaticProvider> {
        let cert = dir.join(format!("{cert_type}.pem"));
        let key = dir.join(format!("{cert_type}.key"));
        fs::write(&cert, &self.client_cert_pem).unwrap();
        fs::write(&key, &self.client_key_pem).unwrap();
        Arc::new(StaticProvider {
            cert_type: cert_type.into(),
            info: CertInfo {
                cert_url: format!("file://{}", cert.display()),
                key_url: format!("file://{}", key.display()),
                ..CertInfo::default()
            },
        })
    }
}

fn leaf_params(name: &str) -> CertificateParams {
    let mut params = CertificateParams::new(vec![name.to_owned()]).unwrap();
    params.distinguished_name.push(DnType::CommonName, name);
    params
}

/// Serves one certificate for one type.
pub struct StaticProvider {
    cert_type: String,
    info: CertInfo,
}

impl CertProvider for StaticProvider {
    fn get_certificate(&self, cert_type: &str, _issuer: &[u8], _serial: &[u8]) -> Result<CertInfo> {
        if cert_type == self.cert_type {
            Ok(self.info.clone())
        } else {
            Err(Error::Certificate(format!("no certificate of type {cert_type}")))
        }
    }
}
