//! Error types for the slsk-client library.

use std::io;
use std::time::Duration;

use crate::constants::LoginRejectionReason;

/// Result type alias for slsk-client operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error types that can occur during protocol and session operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Malformed message: needed {needed} bytes, had {available}")]
    MalformedMessage { needed: usize, available: usize },

    #[error("Invalid length field: {0}")]
    InvalidLength(i32),

    #[error("Frame of {len} bytes exceeds the {max} byte limit")]
    FrameTooLarge { len: usize, max: usize },

    #[error("Unknown message code: {0}")]
    UnknownMessageCode(u32),

    #[error("Login rejected: {0}")]
    LoginRejected(LoginRejectionReason),

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Peer unreachable for token {token} after {attempts} attempts")]
    PeerUnreachable { token: i32, attempts: u32 },

    #[error("Decompression error: {0}")]
    Decompression(String),

    #[error("Compression error: {0}")]
    Compression(String),

    #[error("Invalid connection type: {0}")]
    InvalidConnectionType(String),

    #[error("Invalid user status: {0}")]
    InvalidUserStatus(i32),

    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    #[error("Config error: {0}")]
    Config(#[from] toml::de::Error),

    #[error("Protocol error: {0}")]
    Protocol(String),
}

impl Error {
    /// Whether this error leaves the byte stream in a state that cannot be
    /// resynchronized, so the owning connection must be closed.
    pub fn is_connection_fatal(&self) -> bool {
        matches!(
            self,
            Error::Io(_)
                | Error::MalformedMessage { .. }
                | Error::InvalidLength(_)
                | Error::FrameTooLarge { .. }
                | Error::ConnectionClosed
        )
    }

    pub(crate) fn underflow(needed: usize, available: usize) -> Self {
        Error::MalformedMessage { needed, available }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_classification() {
        assert!(Error::underflow(4, 1).is_connection_fatal());
        assert!(Error::InvalidLength(-1).is_connection_fatal());
        assert!(Error::ConnectionClosed.is_connection_fatal());
        assert!(Error::FrameTooLarge { len: 1 << 30, max: 1 << 24 }.is_connection_fatal());
        assert!(!Error::Decompression("bad".into()).is_connection_fatal());
        assert!(!Error::UnknownMessageCode(77).is_connection_fatal());
        assert!(
            !Error::PeerUnreachable {
                token: 1,
                attempts: 3
            }
            .is_connection_fatal()
        );
    }
}
