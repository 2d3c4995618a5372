use std::io;
use std::time::Duration;

use thiserror::Error;

/// Result type for IPC operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur during IPC operations
#[derive(Error, Debug)]
pub enum Error {
    #[error("unsupported platform: {0}")]
    UnsupportedPlatform(&'static str),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("type hash collision: {hash} is claimed by both {existing} and {incoming}")]
    HashCollision {
        hash: String,
        existing: String,
        incoming: String,
    },

    #[error("transport I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("operation cancelled")]
    Cancelled,

    #[error("no response received")]
    NoResponse,

    #[error("invalid frame: {0}")]
    InvalidFrame(String),

    #[error("circuit breaker is open, retry after {retry_after:?}")]
    CircuitOpen { retry_after: Duration },

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("deserialization error: {0}")]
    Deserialization(String),

    #[error("unknown command type hash: {0}")]
    UnknownCommand(String),

    #[error("no handler registered for {0}")]
    HandlerNotFound(String),

    #[error("handler error: {0}")]
    Handler(String),

    #[error("command {command} failed: {message}")]
    CommandFailed { command: String, message: String },
}

impl Error {
    /// Whether the client-call pipeline retries this fault
    ///
    /// Only connection-level faults qualify. Protocol, application and
    /// configuration faults fail the call immediately, as do shutdown
    /// cancellation and an open circuit.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Error::Io(_) | Error::Timeout(_) | Error::NoResponse | Error::InvalidFrame(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(Error::Io(io::Error::from(io::ErrorKind::BrokenPipe)).is_transient());
        assert!(Error::Timeout(Duration::from_secs(1)).is_transient());
        assert!(Error::NoResponse.is_transient());

        assert!(!Error::Cancelled.is_transient());
        assert!(!Error::UnknownCommand("abc".into()).is_transient());
        assert!(
            !Error::CircuitOpen {
                retry_after: Duration::from_secs(1)
            }
            .is_transient()
        );
        assert!(!Error::Deserialization("bad".into()).is_transient());
    }

    #[test]
    fn test_command_failed_message() {
        let err = Error::CommandFailed {
            command: "Ping".into(),
            message: "boom".into(),
        };
        assert_eq!(err.to_string(), "command Ping failed: boom");
    }
}
