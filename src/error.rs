//! # Error Handling for SoleDB
//!
//! This module defines the error types used throughout SoleDB. We use a single
//! error enum ([`Error`]) to represent all failure modes, which keeps function
//! signatures simple and lets callers match uniformly whether an operation ran
//! against the local engine or was relayed to a remote leader.
//!
//! ## Error Categories
//!
//! | Category | Variants | Typical Response |
//! |----------|----------|------------------|
//! | Caller mistake | `InvalidOperation`, `ObjectDisposed` | Fix the call site |
//! | Leader-reported | `Server` | Inspect the message, fix the SQL |
//! | Transport | `Protocol`, `Disconnected`, `Timeout`, `Cancelled` | Reconnect or retry |
//! | Environment | `Sqlite`, `Io` | Log and investigate |

use thiserror::Error;

// =============================================================================
// Error Type
// =============================================================================

/// All errors that can occur in SoleDB operations.
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Caller Mistakes (Fix the call site)
    // =========================================================================

    /// The operation is not valid in the current state.
    ///
    /// Raised for empty command text, a missing connection, or column access
    /// while the reader is not positioned on a row.
    #[error("invalid operation: {0}")]
    InvalidOperation(String),

    /// The command, reader, or connection was already disposed.
    #[error("{0} has been disposed")]
    ObjectDisposed(&'static str),

    // =========================================================================
    // Leader-Reported Failures
    // =========================================================================

    /// The leader reported a SQL or execution failure.
    ///
    /// The message text is the leader's own error string, carried verbatim
    /// across the transport. A follower observes the exact message the leader
    /// produced, so SQL mistakes read the same whether the database is local
    /// or remote.
    #[error("server error: {0}")]
    Server(String),

    // =========================================================================
    // Transport Failures
    // =========================================================================

    /// A malformed frame, an unknown message kind, or a response whose body
    /// does not match its kind.
    ///
    /// Protocol errors are fatal to the transport that observed them: the
    /// connection is torn down and every in-flight waiter is released.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The transport to the leader was lost.
    ///
    /// All in-flight waiters release with this error; subsequent operations
    /// on workers bound to the lost connection fail the same way until a new
    /// role is assigned.
    #[error("disconnected from leader")]
    Disconnected,

    /// A request did not receive its correlated reply within the command
    /// timeout. The server-side request keeps running; its late reply is
    /// dropped.
    #[error("operation timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// A wait was abandoned because the caller's cancellation trigger fired.
    #[error("operation cancelled")]
    Cancelled,

    // =========================================================================
    // Environment Errors
    // =========================================================================

    /// SQLite operation failed on the leader's own connection.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Socket or stream I/O failed.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// A `Result` type alias using [`Error`] as the error type.
pub type Result<T> = std::result::Result<T, Error>;

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    /// Error messages appear in logs and client output; keep them readable.
    #[test]
    fn test_error_display() {
        let invalid = Error::InvalidOperation("command text is empty".to_string());
        assert_eq!(
            invalid.to_string(),
            "invalid operation: command text is empty"
        );

        let disposed = Error::ObjectDisposed("Command");
        assert_eq!(disposed.to_string(), "Command has been disposed");

        let server = Error::Server("near \"NOT\": syntax error".to_string());
        assert_eq!(
            server.to_string(),
            "server error: near \"NOT\": syntax error"
        );

        let timeout = Error::Timeout(std::time::Duration::from_millis(250));
        assert!(timeout.to_string().contains("250ms"));
    }

    /// `#[from]` lets `?` convert rusqlite errors automatically.
    #[test]
    fn test_sqlite_error_conversion() {
        let sqlite_err = rusqlite::Error::InvalidParameterName("test".to_string());
        let our_err: Error = sqlite_err.into();

        assert!(matches!(our_err, Error::Sqlite(_)));
        assert!(our_err.to_string().contains("sqlite error"));
    }
}
