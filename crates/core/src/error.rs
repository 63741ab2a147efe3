//! Error types for the streaming library.

use std::fmt;

/// Errors that can occur across the streaming stack.
///
/// Variants map to specific failure modes:
///
/// - **Protocol**: [`Parse`](Self::Parse), [`Protocol`](Self::Protocol),
///   [`UnexpectedStatus`](Self::UnexpectedStatus): malformed or unexpected
///   RTSP traffic.
/// - **Transport**: [`Io`](Self::Io), [`UnknownHost`](Self::UnknownHost),
///   [`ConnectionLost`](Self::ConnectionLost).
/// - **Encoder**: [`ResourceInUse`](Self::ResourceInUse),
///   [`ConfigurationNotSupported`](Self::ConfigurationNotSupported),
///   [`StorageUnavailable`](Self::StorageUnavailable),
///   [`InvalidSurface`](Self::InvalidSurface), reported by a
///   [`FrameSource`](crate::media::FrameSource).
/// - **Session**: [`NoDestination`](Self::NoDestination),
///   [`InvalidParameter`](Self::InvalidParameter),
///   [`TrackNotFound`](Self::TrackNotFound).
/// - **Credentials**: [`Authentication`](Self::Authentication),
///   [`Forbidden`](Self::Forbidden).
#[derive(Debug, thiserror::Error)]
pub enum RtspError {
    /// Underlying I/O or socket error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Failed to parse an RTSP message (RFC 2326 §6, §7).
    #[error("RTSP parse error: {kind}")]
    Parse { kind: ParseErrorKind },

    /// The capture device is already used by someone else.
    #[error("capture device in use: {0}")]
    ResourceInUse(String),

    /// The encoder rejected the requested codec or quality.
    #[error("configuration not supported: {0}")]
    ConfigurationNotSupported(String),

    /// The encoder needs storage that is not available.
    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),

    /// The preview surface handed to the encoder is not usable.
    #[error("invalid surface: {0}")]
    InvalidSurface(String),

    /// The session destination could not be resolved.
    #[error("unknown host: {0}")]
    UnknownHost(String),

    /// A session description or stream start was requested before a
    /// destination was set.
    #[error("no destination set on session")]
    NoDestination,

    /// A URI query parameter had a value that cannot be honoured.
    #[error("invalid value {value:?} for parameter {name}")]
    InvalidParameter { name: String, value: String },

    /// The session has no track with this id.
    #[error("track not found: {0}")]
    TrackNotFound(u32),

    /// The peer sent something the protocol state machine cannot accept.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The peer answered a request with a status we do not handle.
    #[error("{method} failed with status {status}")]
    UnexpectedStatus { method: String, status: u16 },

    /// Credentials were rejected (second `401`) or missing.
    #[error("authentication failed: {0}")]
    Authentication(String),

    /// The server answered `403 Forbidden`.
    #[error("access forbidden")]
    Forbidden,

    /// Keep-alive to the remote server failed.
    #[error("connection lost")]
    ConnectionLost,

    /// The packet ring was reset while a producer was waiting on it.
    #[error("packet ring reset")]
    Interrupted,

    /// [`Server::start`](crate::Server::start) has not been called yet.
    #[error("server not started")]
    NotStarted,

    /// [`Server::start`](crate::Server::start) was called while already running.
    #[error("server already running")]
    AlreadyRunning,
}

/// Specific kind of RTSP parse failure.
#[derive(Debug)]
pub enum ParseErrorKind {
    /// Input was empty (no request or status line).
    EmptyRequest,
    /// Request line did not have the expected `Method URI Version` format.
    InvalidRequestLine,
    /// Status line did not have the expected `RTSP/1.0 Code Reason` format.
    InvalidStatusLine,
    /// A header line did not contain a colon separator.
    InvalidHeader,
}

impl fmt::Display for ParseErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyRequest => write!(f, "empty message"),
            Self::InvalidRequestLine => write!(f, "invalid request line"),
            Self::InvalidStatusLine => write!(f, "invalid status line"),
            Self::InvalidHeader => write!(f, "invalid header"),
        }
    }
}

/// Coarse error category delivered with session, server and client events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    ResourceInUse,
    ConfigurationNotSupported,
    StorageUnavailable,
    InvalidDestination,
    InvalidSurface,
    Protocol,
    Authentication,
    ConnectionLost,
    Io,
    Other,
}

impl RtspError {
    /// The event category for this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::ResourceInUse(_) => ErrorKind::ResourceInUse,
            Self::ConfigurationNotSupported(_) | Self::InvalidParameter { .. } => {
                ErrorKind::ConfigurationNotSupported
            }
            Self::StorageUnavailable(_) => ErrorKind::StorageUnavailable,
            Self::UnknownHost(_) | Self::NoDestination => ErrorKind::InvalidDestination,
            Self::InvalidSurface(_) => ErrorKind::InvalidSurface,
            Self::Parse { .. }
            | Self::Protocol(_)
            | Self::UnexpectedStatus { .. }
            | Self::TrackNotFound(_) => ErrorKind::Protocol,
            Self::Authentication(_) | Self::Forbidden => ErrorKind::Authentication,
            Self::ConnectionLost => ErrorKind::ConnectionLost,
            Self::Io(_) => ErrorKind::Io,
            Self::Interrupted | Self::NotStarted | Self::AlreadyRunning => ErrorKind::Other,
        }
    }

    pub(crate) fn invalid_parameter(name: &str, value: &str) -> Self {
        Self::InvalidParameter {
            name: name.to_string(),
            value: value.to_string(),
        }
    }
}

/// Convenience alias for `Result<T, RtspError>`.
pub type Result<T> = std::result::Result<T, RtspError>;
