//! Link configuration and JSON persistence.

use std::fs;
use std::path::Path;
use std::time::Duration;

use edgelink_proto::{CERT_OPEN_PORT, CERT_SECURE_PORT, WORKLOAD_OPEN_PORT, WORKLOAD_SECURE_PORT};
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Port pair of one logical service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServicePorts {
    /// Plain-text port used before provisioning.
    pub open: u32,
    /// TLS port used once provisioned.
    pub secure: u32,
}

/// Tunables of the channel stack.
///
/// Every field has a default, so a partial JSON document is accepted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
#[non_exhaustive]
pub struct LinkConfig {
    /// Delay between reconnect attempts, in milliseconds.
    pub reconnect_period_ms: u64,
    /// How long the manager waits for a consumer to arm a read before
    /// dropping the rest of a frame, in milliseconds.
    pub wait_read_timeout_ms: u64,
    /// Maximum number of channels per manager.
    pub max_channels: usize,
    /// Largest protobuf message a handler accepts.
    pub receive_buffer_size: usize,
    /// Largest protobuf message a handler sends.
    pub send_buffer_size: usize,
    /// Name the TLS peer certificate is verified against.
    pub server_name: String,
    /// Certificate service ports.
    pub cert_service: ServicePorts,
    /// Workload service ports.
    pub workload_service: ServicePorts,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            reconnect_period_ms: 1000,
            wait_read_timeout_ms: 5000,
            max_channels: 8,
            receive_buffer_size: 64 * 1024,
            send_buffer_size: 64 * 1024,
            server_name: "localhost".into(),
            cert_service: ServicePorts {
                open: CERT_OPEN_PORT,
                secure: CERT_SECURE_PORT,
            },
            workload_service: ServicePorts {
                open: WORKLOAD_OPEN_PORT,
                secure: WORKLOAD_SECURE_PORT,
            },
        }
    }
}

impl LinkConfig {
    /// Loads a configuration from a JSON file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let data = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&data)?)
    }

    /// Writes the configuration to a JSON file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let file = fs::File::create(path)?;
        serde_json::to_writer_pretty(file, self)?;
        Ok(())
    }

    /// Delay between reconnect attempts.
    pub const fn reconnect_period(&self) -> Duration {
        Duration::from_millis(self.reconnect_period_ms)
    }

    /// Consumer read-arming timeout.
    pub const fn wait_read_timeout(&self) -> Duration {
        Duration::from_millis(self.wait_read_timeout_ms)
    }

    /// Sets the reconnect period.
    #[must_use]
    pub fn with_reconnect_period(mut self, period: Duration) -> Self {
        self.reconnect_period_ms = u64::try_from(period.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Sets the read-arming timeout.
    #[must_use]
    pub fn with_wait_read_timeout(mut self, timeout: Duration) -> Self {
        self.wait_read_timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Sets the channel table capacity.
    #[must_use]
    pub const fn with_max_channels(mut self, max: usize) -> Self {
        self.max_channels = max;
        self
    }

    /// Sets the TLS server name.
    #[must_use]
    pub fn with_server_name(mut self, name: impl Into<String>) -> Self {
        self.server_name = name.into();
        self
    }
}
