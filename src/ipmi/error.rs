//! Error taxonomy for the IPMI core.

use std::io;

use thiserror::Error;

/// Result type used across the IPMI core.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors returned by transports, decoders and repository walks.
#[derive(Debug, Error)]
pub enum Error {
    /// The native driver rejected the call itself (negative return code).
    #[error("{code} : Invalid call")]
    InvalidCall { code: i32 },

    /// The native driver failed inside the OS (positive return code).
    #[error("{code} : System error [{errno} : {message}]")]
    System { code: i32, errno: i32, message: String },

    /// Device node or process I/O failed.
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    /// The CLI tool could not be located. Transports convert this into an empty response.
    #[error("{0} not found in PATH")]
    ToolUnavailable(String),

    /// A valid response carried no bytes at all.
    #[error("Zero length response")]
    ZeroLength,

    /// The BMC answered with a non-zero completion code.
    #[error("Unexpected error code : {completion_code}")]
    CompletionCode { completion_code: u8 },

    /// Malformed or out-of-range structure during a FRU/SDR walk.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Requested transport or feature is not available on this platform.
    #[error("unsupported: {0}")]
    Unsupported(&'static str),
}

/// Coarse classification used by callers deciding whether to continue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Transport,
    Validation,
    Protocol,
    ToolUnavailable,
}

impl Error {
    pub(crate) fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::InvalidCall { .. } | Error::System { .. } | Error::Io(_) | Error::Unsupported(_) => {
                ErrorKind::Transport
            }
            Error::ToolUnavailable(_) => ErrorKind::ToolUnavailable,
            Error::ZeroLength | Error::CompletionCode { .. } => ErrorKind::Validation,
            Error::Protocol(_) => ErrorKind::Protocol,
        }
    }
}
