//! Application services running on [`PbHandler`](crate::PbHandler)s.
//!
//! - [`OpenHandler`]: clock bootstrap on the open workload port.
//! - [`CertificateService`]: key and certificate provisioning.
//! - [`WorkloadService`]: instance orchestration and status reports.
//! - [`ServiceClient`]: binds a service to its open or secure port and
//!   notifies [`ConnectionSubscriber`]s.

mod certificate;
mod client;
mod open;
mod workload;

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use edgelink_proto::message::{ErrorInfo, Timestamp};

pub use self::certificate::{CertHandler, CertificateService};
pub use self::client::{ConnectionSubscriber, MAX_CONNECTION_SUBSCRIBERS, ServiceClient, TlsSettings};
pub use self::open::{ClockGate, ClockSync, OpenHandler};
pub use self::workload::{Launcher, WorkloadService};
use crate::error::{Error, Result};

/// Converts a wire timestamp to [`SystemTime`].
pub(crate) fn to_system_time(ts: Timestamp) -> Result<SystemTime> {
    let secs = u64::try_from(ts.seconds)
        .map_err(|_| Error::InvalidMessage(format!("timestamp before epoch: {}", ts.seconds)))?;
    let nanos = u32::try_from(ts.nanos)
        .ok()
        .filter(|n| *n < 1_000_000_000)
        .ok_or_else(|| Error::InvalidMessage(format!("timestamp nanos out of range: {}", ts.nanos)))?;
    Ok(UNIX_EPOCH + Duration::new(secs, nanos))
}

/// Builds the error details sent back in a response.
pub(crate) fn error_info(err: &Error) -> ErrorInfo {
    ErrorInfo {
        aos_code: err.code(),
        exit_code: 0,
        message: err.to_string(),
    }
}
