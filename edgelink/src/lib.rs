//! Port-multiplexed, TLS-capable channel stack for edge-node agents.
//!
//! `edgelink` carries certificate-provisioning and workload-orchestration
//! traffic between a node and its management endpoint over one, often
//! unreliable, byte transport such as a hypervisor vsock or a TCP socket.
//!
//! The layers, bottom up:
//!
//! - [`Transport`]: raw byte connection ([`SocketTransport`],
//!   `VsockTransport` on Linux).
//! - [`ChannelManager`]: reconnects the transport and demultiplexes frames
//!   into per-port [`PortChannel`]s.
//! - [`TlsChannel`]: optional TLS over any [`Channel`].
//! - [`PbHandler`]: protobuf message pump driving a [`MessageHandler`].
//! - [`service`]: the certificate, workload and clock bootstrap services.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use edgelink::{ChannelManager, LinkConfig, SocketTransport};
//!
//! let config = LinkConfig::default();
//! let manager = ChannelManager::init(
//!     Arc::new(SocketTransport::new("127.0.0.1:7000")),
//!     config.clone(),
//! )?;
//! let channel = manager.create_channel(config.cert_service.open)?;
//! # let _ = channel;
//! # Ok::<(), edgelink::Error>(())
//! ```

mod channel;
mod config;
mod error;
mod manager;
mod pbhandler;
pub mod service;
mod tls;
mod transport;
#[cfg(target_os = "linux")]
mod vsock;

pub use channel::{Channel, PortChannel};
pub use config::{LinkConfig, ServicePorts};
pub use error::{Error, Result};
pub use manager::ChannelManager;
pub use pbhandler::{MessageHandler, MessageSender, PbHandler};
pub use tls::{CertInfo, CertLoader, CertProvider, FileCertLoader, KeyHandle, SoftwareKey, TlsChannel};
pub use transport::{SocketTransport, Transport};
#[cfg(target_os = "linux")]
pub use vsock::{VMADDR_CID_HOST, VsockTransport};
