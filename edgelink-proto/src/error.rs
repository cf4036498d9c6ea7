//! Error types for wire encoding and validation.

/// Alias for `Result<T, edgelink_proto::Error>`.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors produced while encoding or validating wire data.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// A frame or envelope claims more payload than the receiver accepts.
    #[error("payload of {size} bytes exceeds limit of {max} bytes")]
    TooLarge {
        /// Claimed payload size.
        size: usize,
        /// Accepted maximum.
        max: usize,
    },

    /// Frame payload does not match the checksum carried in its header.
    #[error("checksum mismatch on port {port}")]
    Checksum {
        /// Port the corrupted frame was addressed to.
        port: u32,
    },

    /// Protobuf serialization failed.
    #[error(transparent)]
    Encode(#[from] prost::EncodeError),
}
