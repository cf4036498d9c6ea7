//! Wire formats for the edgelink channel stack.
//!
//! Two layers share one byte transport:
//!
//! - [`frame`]: the multiplexing frame, `[port u32][size u32][sha256 32B]`
//!   followed by the payload, all little endian.
//! - [`envelope`]: the protobuf envelope carried inside a channel,
//!   `[size u32][prost payload]`.
//!
//! [`message`] holds the protobuf messages exchanged by the application
//! services together with their fixed port numbers.

mod error;
pub mod envelope;
pub mod frame;
pub mod message;

pub use envelope::{ENVELOPE_HEADER_SIZE, encode_into, payload_len};
pub use error::{Error, Result};
pub use frame::{CHECKSUM_SIZE, FrameHeader, HEADER_SIZE, MAX_FRAME_DATA, checksum};
pub use message::{
    CERT_OPEN_PORT, CERT_SECURE_PORT, CERT_SERVICE_CERT_TYPE, WORKLOAD_CERT_TYPE,
    WORKLOAD_OPEN_PORT, WORKLOAD_SECURE_PORT,
};
