//! Error types for server sessions.

use thiserror::Error;

/// Errors surfaced by session management, launching, and the message channel.
#[derive(Debug, Error)]
pub enum SessionError {
    /// The server process could not be launched. Covers a spec with no
    /// runnable target, an OS-level spawn failure, and a spawn that yields
    /// no process id.
    #[error("failed to launch server: {0}")]
    Launch(String),

    /// The initialization handshake did not complete.
    #[error("server initialization failed: {0}")]
    InitializationFailed(String),

    /// The message channel is closed; no further traffic is possible.
    #[error("message channel closed")]
    ChannelClosed,

    /// The server answered a request with an error response.
    #[error("server error {code}: {message}")]
    Rpc {
        /// Numeric error code from the response.
        code: i32,
        /// Human-readable message from the response.
        message: String,
    },

    /// An incoming frame or message violated the wire format.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// A message could not be serialized or deserialized.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// An underlying I/O operation failed.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn launch_error_display() {
        let err = SessionError::Launch("tsserver: No such file or directory".to_string());
        assert_eq!(
            err.to_string(),
            "failed to launch server: tsserver: No such file or directory"
        );
    }

    #[test]
    fn initialization_failed_display() {
        let err = SessionError::InitializationFailed("no response within 30s".to_string());
        assert_eq!(
            err.to_string(),
            "server initialization failed: no response within 30s"
        );
    }

    #[test]
    fn channel_closed_display() {
        assert_eq!(SessionError::ChannelClosed.to_string(), "message channel closed");
    }

    #[test]
    fn rpc_error_display() {
        let err = SessionError::Rpc {
            code: -32601,
            message: "method not found".to_string(),
        };
        assert_eq!(err.to_string(), "server error -32601: method not found");
    }

    #[test]
    fn protocol_error_display() {
        let err = SessionError::Protocol("missing Content-Length header".to_string());
        assert_eq!(err.to_string(), "protocol error: missing Content-Length header");
    }

    #[test]
    fn serialization_error_display() {
        let err = SessionError::Serialization("expected value at line 1".to_string());
        assert_eq!(err.to_string(), "serialization error: expected value at line 1");
    }

    #[test]
    fn io_error_converts() {
        let io = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe closed");
        let err = SessionError::from(io);
        assert!(matches!(err, SessionError::Io(_)));
        assert!(err.to_string().contains("pipe closed"));
    }

    #[test]
    fn error_is_debug() {
        let err = SessionError::ChannelClosed;
        assert!(!format!("{:?}", err).is_empty());
    }
}
