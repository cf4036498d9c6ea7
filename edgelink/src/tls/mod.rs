//! TLS decorator for [`Channel`]s.
//!
//! A [`TlsChannel`] passes bytes straight through until a certificate type
//! is configured. From then on every connect runs a client handshake with
//! mandatory server verification and client authentication through a
//! [`KeyHandle`], and reads and writes go through the TLS record layer.
//!
//! The inner channel only offers exact reads, so records are pulled one at
//! a time: the 5-byte record header first, then exactly the body length it
//! announces.

mod key;
mod loader;

use std::io::{self, Read, Write};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use rustls::pki_types::ServerName;
use rustls::{ClientConfig, ClientConnection, RootCertStore};
use tracing::{debug, info, warn};

pub use self::key::{KeyHandle, SoftwareKey};
pub use self::loader::{CertInfo, CertLoader, CertProvider, FileCertLoader};
use self::key::ClientCertResolver;
use self::loader::parse_certificates;
use crate::channel::Channel;
use crate::error::{Error, Result};

/// TLS record header: content type, version, big-endian length.
const RECORD_HEADER_SIZE: usize = 5;

/// Largest record body a peer may send (2^14 plaintext plus expansion).
const MAX_RECORD_BODY: usize = 16384 + 2048;

#[derive(Default)]
struct Session {
    cert_type: String,
    config: Option<Arc<ClientConfig>>,
}

/// Channel decorator adding optional TLS.
pub struct TlsChannel {
    name: String,
    server_name: ServerName<'static>,
    root_ca: Vec<u8>,
    provider: Arc<dyn CertProvider>,
    loader: Arc<dyn CertLoader>,
    inner: Arc<dyn Channel>,
    session: Mutex<Session>,
    conn: Mutex<Option<ClientConnection>>,
    /// Held while records are produced and sent, keeping them in sequence.
    write_lock: Mutex<()>,
}

impl std::fmt::Debug for TlsChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsChannel")
            .field("name", &self.name)
            .field("cert_type", &self.cert_type())
            .finish_non_exhaustive()
    }
}

impl TlsChannel {
    /// Wraps `inner`. `root_ca` is the PEM bundle the server certificate
    /// must chain to; `server_name` is the name it must carry.
    pub fn new(
        name: impl Into<String>,
        server_name: &str,
        root_ca: impl Into<Vec<u8>>,
        provider: Arc<dyn CertProvider>,
        loader: Arc<dyn CertLoader>,
        inner: Arc<dyn Channel>,
    ) -> Result<Self> {
        let server_name = ServerName::try_from(server_name.to_owned())
            .map_err(|e| Error::Certificate(format!("invalid server name {server_name}: {e}")))?;
        Ok(Self {
            name: name.into(),
            server_name,
            root_ca: root_ca.into(),
            provider,
            loader,
            inner,
            session: Mutex::new(Session::default()),
            conn: Mutex::new(None),
            write_lock: Mutex::new(()),
        })
    }

    /// Switches to TLS with the certificate of `cert_type`, or back to
    /// passthrough when `cert_type` is empty.
    ///
    /// Setting the active type again keeps the current configuration. On
    /// failure the channel is left in passthrough mode.
    pub fn set_tls_config(&self, cert_type: &str) -> Result<()> {
        let mut session = self.session();
        if !cert_type.is_empty() && session.cert_type == cert_type && session.config.is_some() {
            return Ok(());
        }

        *session = Session::default();
        *self.conn() = None;
        if cert_type.is_empty() {
            debug!(name = %self.name, "TLS disabled");
            return Ok(());
        }

        match self.build_config(cert_type) {
            Ok(config) => {
                info!(name = %self.name, cert_type, "TLS configured");
                *session = Session {
                    cert_type: cert_type.to_owned(),
                    config: Some(config),
                };
                Ok(())
            }
            Err(err) => {
                warn!(name = %self.name, cert_type, %err, "failed to configure TLS");
                Err(err)
            }
        }
    }

    /// Active certificate type; empty in passthrough mode.
    pub fn cert_type(&self) -> String {
        self.session().cert_type.clone()
    }

    /// Returns `true` when a certificate type is configured.
    pub fn is_secure(&self) -> bool {
        self.session().config.is_some()
    }

    fn session(&self) -> MutexGuard<'_, Session> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn conn(&self) -> MutexGuard<'_, Option<ClientConnection>> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn build_config(&self, cert_type: &str) -> Result<Arc<ClientConfig>> {
        let info = self.provider.get_certificate(cert_type, &[], &[])?;
        let chain = self.loader.load_cert_chain(&info.cert_url)?;
        let key = self.loader.load_private_key(&info.key_url)?;

        let mut roots = RootCertStore::empty();
        for cert in parse_certificates(&self.root_ca)? {
            roots.add(cert)?;
        }
        if roots.is_empty() {
            return Err(Error::Certificate("no root CA certificates".into()));
        }

        let provider = Arc::new(rustls::crypto::ring::default_provider());
        let config = ClientConfig::builder_with_provider(provider)
            .with_safe_default_protocol_versions()?
            .with_root_certificates(roots)
            .with_client_cert_resolver(Arc::new(ClientCertResolver::new(chain, key)));
        Ok(Arc::new(config))
    }

    /// Reads one complete TLS record from the inner channel.
    fn read_record(&self) -> Result<Vec<u8>> {
        let mut record = vec![0u8; RECORD_HEADER_SIZE];
        self.inner.read(&mut record)?;

        let len = usize::from(u16::from_be_bytes([record[3], record[4]]));
        if len > MAX_RECORD_BODY {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("TLS record of {len} bytes"),
            )
            .into());
        }

        record.resize(RECORD_HEADER_SIZE + len, 0);
        self.inner.read(&mut record[RECORD_HEADER_SIZE..])?;
        Ok(record)
    }

    /// Feeds `record` to the connection. Alerts produced on failure are
    /// sent before the error is returned.
    fn feed(&self, conn: &mut ClientConnection, record: &[u8]) -> Result<()> {
        let mut rd = record;
        while !rd.is_empty() {
            conn.read_tls(&mut rd)?;
        }
        if let Err(err) = conn.process_new_packets() {
            if let Err(flush_err) = self.flush(conn) {
                debug!(name = %self.name, err = %flush_err, "failed to send TLS alert");
            }
            return Err(err.into());
        }
        Ok(())
    }

    /// Sends all pending TLS output. Caller holds `write_lock`.
    fn flush(&self, conn: &mut ClientConnection) -> Result<()> {
        let mut out = Vec::new();
        while conn.wants_write() {
            conn.write_tls(&mut out)?;
        }
        if !out.is_empty() {
            self.inner.write(&out)?;
        }
        Ok(())
    }

    fn handshake(&self, conn: &mut ClientConnection) -> Result<()> {
        loop {
            self.flush(conn)?;
            if !conn.is_handshaking() {
                return Ok(());
            }
            let record = self.read_record()?;
            self.feed(conn, &record)?;
        }
    }

    fn read_secure(&self, buf: &mut [u8]) -> Result<usize> {
        let mut filled = 0;
        loop {
            {
                let mut guard = self.conn();
                let conn = guard.as_mut().ok_or(Error::ConnectionReset)?;
                while filled < buf.len() {
                    match conn.reader().read(&mut buf[filled..]) {
                        // Peer sent close_notify.
                        Ok(0) => return Err(Error::ConnectionReset),
                        Ok(n) => filled += n,
                        Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                        Err(e) => return Err(e.into()),
                    }
                }
                if filled == buf.len() {
                    return Ok(filled);
                }
            }

            let record = self.read_record()?;

            let _write = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
            let mut guard = self.conn();
            let conn = guard.as_mut().ok_or(Error::ConnectionReset)?;
            self.feed(conn, &record)?;
            self.flush(conn)?;
        }
    }

    fn write_secure(&self, buf: &[u8]) -> Result<usize> {
        let _write = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);

        let mut out = Vec::new();
        {
            let mut guard = self.conn();
            let conn = guard.as_mut().ok_or(Error::ConnectionReset)?;
            let mut written = 0;
            while written < buf.len() {
                let n = conn.writer().write(&buf[written..])?;
                written += n;
                while conn.wants_write() {
                    conn.write_tls(&mut out)?;
                }
                if n == 0 {
                    return Err(io::Error::from(io::ErrorKind::WriteZero).into());
                }
            }
        }

        if !out.is_empty() {
            self.inner.write(&out)?;
        }
        Ok(buf.len())
    }
}

impl Channel for TlsChannel {
    fn connect(&self) -> Result<()> {
        let config = self.session().config.clone();
        let Some(config) = config else {
            return self.inner.connect();
        };

        *self.conn() = None;
        self.inner.connect()?;

        let _write = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut conn = ClientConnection::new(config, self.server_name.clone())?;
        if let Err(err) = self.handshake(&mut conn) {
            warn!(name = %self.name, %err, "TLS handshake failed");
            return Err(err);
        }

        *self.conn() = Some(conn);
        info!(name = %self.name, "TLS session established");
        Ok(())
    }

    fn close(&self) {
        self.inner.close();
    }

    fn is_connected(&self) -> bool {
        self.inner.is_connected()
    }

    fn read(&self, buf: &mut [u8]) -> Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        if self.is_secure() {
            self.read_secure(buf)
        } else {
            self.inner.read(buf)
        }
    }

    fn write(&self, buf: &[u8]) -> Result<usize> {
        if self.is_secure() {
            self.write_secure(buf)
        } else {
            self.inner.write(buf)
        }
    }
}
