//! Error types for the channel stack.

/// Alias for `Result<T, edgelink::Error>`.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors returned by transports, channels, handlers and services.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// The channel table is full.
    #[error("channel table full ({capacity} channels)")]
    OutOfRange {
        /// Configured table capacity.
        capacity: usize,
    },

    /// No channel is bound to the port.
    #[error("no channel on port {0}")]
    NotFound(u32),

    /// Operation not valid in the current state.
    #[error("wrong state: {0}")]
    WrongState(&'static str),

    /// The channel was closed or the connection was reset.
    #[error("connection reset")]
    ConnectionReset,

    /// The manager is shutting down.
    #[error("channel manager stopped")]
    Shutdown,

    /// A wait timed out.
    #[error("timed out")]
    Timeout,

    /// Requested feature or URL scheme is not supported.
    #[error("not supported: {0}")]
    NotSupported(String),

    /// A received message is malformed or not expected on this service.
    #[error("invalid message: {0}")]
    InvalidMessage(String),

    /// An external collaborator (launcher, certificate handler, clock)
    /// rejected a request.
    #[error("{0}")]
    Service(String),

    /// Certificate or key material could not be obtained or parsed.
    #[error("certificate: {0}")]
    Certificate(String),

    /// Wire format violation.
    #[error(transparent)]
    Proto(#[from] edgelink_proto::Error),

    /// Protobuf payload could not be decoded.
    #[error(transparent)]
    Decode(#[from] prost::DecodeError),

    /// TLS failure.
    #[error(transparent)]
    Tls(#[from] rustls::Error),

    /// Configuration file could not be parsed.
    #[error(transparent)]
    Config(#[from] serde_json::Error),

    /// An I/O error from the transport.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Stable numeric code reported to the remote endpoint in error replies.
    pub const fn code(&self) -> i32 {
        match self {
            Self::OutOfRange { .. } => 1,
            Self::NotFound(_) => 2,
            Self::WrongState(_) => 3,
            Self::ConnectionReset | Self::Shutdown => 4,
            Self::Timeout => 5,
            Self::NotSupported(_) => 6,
            Self::InvalidMessage(_) | Self::Decode(_) | Self::Proto(_) => 7,
            Self::Certificate(_) | Self::Tls(_) => 8,
            Self::Service(_) => 9,
            Self::Config(_) | Self::Io(_) => 10,
        }
    }
}
