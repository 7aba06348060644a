//! Error types for the pool and the value transcoding layer.

use thiserror::Error;

use crate::types::{Format, Oid};

/// Boxed failure returned by an individual decode function.
pub type DecodeError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Error, Debug)]
pub enum PgError {
    /// The pool has been shut down.
    #[error("Pool closed")]
    PoolClosed,

    /// A connection was handed to a pool that did not check it out.
    #[error("Connection was not checked out from this pool")]
    InvalidRelease,

    /// Creating or talking to a single connection failed.
    #[error("Database connection error: {0}")]
    ConnectionError(String),

    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// No connection became available before the deadline.
    #[error("Timed out waiting for a pooled connection")]
    AcquireTimeout,

    #[error("Unknown type oid {}", .0.as_i32())]
    UnknownType(Oid),

    /// Neither the requested format nor the text fallback has a decoder.
    #[error("No {format:?} decoder registered for type oid {}", oid.as_i32())]
    UnsupportedFormat { oid: Oid, format: Format },

    #[error("Failed to decode type oid {} ({len} bytes): {source}", oid.as_i32())]
    DecodeError {
        oid: Oid,
        len: usize,
        #[source]
        source: DecodeError,
    },

    /// The server rejected a statement; the session itself is fine.
    #[error("Server error: {0}")]
    ServerError(String),

    /// Unexpected data from the connection layer.
    #[error("Protocol error: {0}")]
    ProtocolError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Prepared statement not found: {0}")]
    StatementNotFound(String),
}

impl PgError {
    /// Whether the error means the connection it came from can't be trusted.
    pub fn is_connection_fatal(&self) -> bool {
        matches!(
            self,
            PgError::ConnectionError(_) | PgError::IoError(_) | PgError::ProtocolError(_)
        )
    }
}

pub type PgResult<T> = std::result::Result<T, PgError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_error_carries_diagnostics() {
        let err = PgError::DecodeError {
            oid: Oid::INT4,
            len: 3,
            source: "Invalid INT4 length: 3".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("23"));
        assert!(msg.contains("3 bytes"));
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_connection_fatal_classification() {
        assert!(PgError::ConnectionError("reset".into()).is_connection_fatal());
        assert!(PgError::from(std::io::Error::other("eof")).is_connection_fatal());
        assert!(!PgError::UnknownType(Oid(9999)).is_connection_fatal());
        assert!(!PgError::PoolClosed.is_connection_fatal());
        assert!(!PgError::ServerError("syntax error".into()).is_connection_fatal());
    }
}
