//! Error types for STARTTLS negotiation and secure command exchange.

use std::io;
use std::time::Duration;

/// Result type alias for secure SMTP operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Integer sentinels reported by [`Error::status_code`].
///
/// Every negotiation checkpoint has its own value so callers that only keep
/// the number can still tell the failures apart.
pub mod status {
    /// TLS context could not be created.
    pub const CONTEXT_INIT: i32 = -100;
    /// Encrypted stream could not be created.
    pub const STREAM_CREATE: i32 = -101;
    /// System certificate store could not be enumerated.
    pub const SYSTEM_TRUST_STORE: i32 = -102;
    /// Built-in default roots could not be loaded.
    pub const DEFAULT_TRUST_STORE: i32 = -103;
    /// Transport connect step of the encrypted stream failed.
    pub const CONNECT: i32 = -104;
    /// TLS handshake failed.
    pub const HANDSHAKE: i32 = -105;
    /// Server presented no certificate.
    pub const NO_CERTIFICATE: i32 = -106;
    /// Certificate chain verification did not succeed.
    pub const VERIFY_RESULT: i32 = -107;
    /// Writing a command failed.
    pub const SEND: i32 = -200;
    /// No reply within the command timeout.
    pub const TIMEOUT: i32 = -201;
    /// Plain TCP connect did not finish in time.
    pub const CONNECT_TIMEOUT: i32 = -202;
    /// Other I/O failure.
    pub const IO: i32 = -203;
    /// Server replied with an unexpected code.
    pub const UNEXPECTED_REPLY: i32 = -300;
    /// Server reply could not be parsed.
    pub const MALFORMED_REPLY: i32 = -301;
    /// Operation called in the wrong client state.
    pub const INVALID_STATE: i32 = -302;
}

/// Broad failure category of an [`Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// TLS context, stream or trust store setup failed.
    Initialization,
    /// Transport connect, handshake or socket I/O failed.
    Connectivity,
    /// Certificate absent or chain invalid.
    Trust,
    /// Unexpected or unparsable SMTP exchange.
    Protocol,
    /// No response within the configured bound.
    Timeout,
}

/// Secure SMTP error types.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// TLS context creation failed.
    #[error("TLS context initialization failed: {0}")]
    ContextInit(#[source] io::Error),

    /// Encrypted stream creation failed.
    #[error("TLS stream creation failed: {0}")]
    StreamCreate(#[source] io::Error),

    /// Enumerating the operating system certificate store failed.
    #[error("Failed to load system trust store: {0}")]
    SystemTrustStore(#[source] io::Error),

    /// Loading the built-in default verification roots failed.
    #[error("Failed to load default verification roots: {0}")]
    DefaultTrustStore(#[source] io::Error),

    /// Connect step of the encrypted stream failed.
    #[error("TLS connect failed: {0}")]
    Connect(#[source] io::Error),

    /// TLS handshake failed.
    #[error("TLS handshake failed: {0}")]
    Handshake(#[source] io::Error),

    /// Server did not present a certificate.
    #[error("Server presented no certificate")]
    NoCertificate,

    /// Certificate chain verification did not succeed.
    #[error("Certificate verification failed: {0}")]
    Verification(String),

    /// Writing a command to the stream failed.
    #[error("Failed to send command: {0}")]
    Send(#[source] io::Error),

    /// No reply arrived within the command timeout.
    #[error("No reply within {0} seconds")]
    Timeout(u32),

    /// Plain TCP connect did not complete in time.
    #[error("Connection to {endpoint} timed out after {timeout:?}")]
    ConnectTimeout {
        /// Target `host:port`.
        endpoint: String,
        /// Configured connect timeout.
        timeout: Duration,
    },

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Server replied with a code the operation did not expect.
    #[error("Unexpected reply {code}: {message}")]
    UnexpectedReply {
        /// Reply code (e.g., 454).
        code: u16,
        /// Reply text.
        message: String,
    },

    /// Reply could not be parsed.
    #[error("Malformed reply: {0}")]
    MalformedReply(String),

    /// Operation not valid in the current client state.
    #[error("Invalid state for operation: {0}")]
    InvalidState(String),
}

impl Error {
    /// Creates an unexpected-reply error from a reply code and message.
    #[must_use]
    pub fn unexpected_reply(code: u16, message: impl Into<String>) -> Self {
        Self::UnexpectedReply {
            code,
            message: message.into(),
        }
    }

    /// Returns the failure category.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::ContextInit(_)
            | Self::StreamCreate(_)
            | Self::SystemTrustStore(_)
            | Self::DefaultTrustStore(_) => ErrorKind::Initialization,
            Self::Connect(_)
            | Self::Handshake(_)
            | Self::Send(_)
            | Self::ConnectTimeout { .. }
            | Self::Io(_) => ErrorKind::Connectivity,
            Self::NoCertificate | Self::Verification(_) => ErrorKind::Trust,
            Self::UnexpectedReply { .. } | Self::MalformedReply(_) | Self::InvalidState(_) => {
                ErrorKind::Protocol
            }
            Self::Timeout(_) => ErrorKind::Timeout,
        }
    }

    /// Returns the integer sentinel for this error (see [`status`]).
    #[must_use]
    pub const fn status_code(&self) -> i32 {
        match self {
            Self::ContextInit(_) => status::CONTEXT_INIT,
            Self::StreamCreate(_) => status::STREAM_CREATE,
            Self::SystemTrustStore(_) => status::SYSTEM_TRUST_STORE,
            Self::DefaultTrustStore(_) => status::DEFAULT_TRUST_STORE,
            Self::Connect(_) => status::CONNECT,
            Self::Handshake(_) => status::HANDSHAKE,
            Self::NoCertificate => status::NO_CERTIFICATE,
            Self::Verification(_) => status::VERIFY_RESULT,
            Self::Send(_) => status::SEND,
            Self::Timeout(_) => status::TIMEOUT,
            Self::ConnectTimeout { .. } => status::CONNECT_TIMEOUT,
            Self::Io(_) => status::IO,
            Self::UnexpectedReply { .. } => status::UNEXPECTED_REPLY,
            Self::MalformedReply(_) => status::MALFORMED_REPLY,
            Self::InvalidState(_) => status::INVALID_STATE,
        }
    }

    /// Returns true if no reply arrived within the command timeout.
    #[must_use]
    pub const fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout(_))
    }
}
