//! Error types

use std::io;

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by connection operations.
///
/// Transient conditions (interrupted calls, would-block on a non-blocking
/// socket, rehandshake requests) are absorbed by the retry loops and never
/// show up here. A pending non-blocking connect and an orderly remote close
/// are outcomes, not errors: see [`crate::connection::Connect`] and
/// [`crate::SendOutcome`].
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// No endpoint could be produced for the host/port pair
    #[error("failed to resolve {host}:{port}: {reason}")]
    Resolution {
        /// Host as given by the caller
        host: String,
        /// Port as given by the caller
        port: u16,
        /// Resolver diagnostic
        reason: String,
    },

    /// Every candidate endpoint refused or was unreachable
    #[error("failed to connect to {target} ({attempts} candidate(s) tried): {source}")]
    Connect {
        /// Last endpoint attempted
        target: String,
        /// Number of endpoints attempted
        attempts: usize,
        /// Diagnostic of the last attempt
        #[source]
        source: io::Error,
    },

    /// Certificate, key or trust material could not be read or parsed
    #[error("credential error: {0}")]
    Credential(String),

    /// Terminal handshake failure
    #[error("handshake failed: {reason}")]
    Handshake {
        /// Library or transport diagnostic
        reason: String,
        /// Whether the socket timeout expired before the peer answered
        timed_out: bool,
    },

    /// Terminal write failure
    #[error("send failed: {0}")]
    Send(String),

    /// Graceful close did not unwind cleanly
    #[error("close failed: {0}")]
    Close(String),

    /// Socket shutdown/close failed during teardown (all cleanup still ran)
    #[error("teardown failed: {0}")]
    Teardown(String),

    /// Invalid configuration
    #[error("configuration error: {0}")]
    Config(String),

    /// Operation issued in the wrong lifecycle state
    #[error("invalid state: expected {expected}, got {actual}")]
    InvalidState {
        /// What the operation required
        expected: String,
        /// What was found
        actual: String,
    },

    /// Raw OS failure (signal disposition, socket options)
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl Error {
    /// Name of the operation that produced this error, for log fields
    pub fn operation(&self) -> &'static str {
        match self {
            Error::Resolution { .. } => "resolve",
            Error::Connect { .. } => "connect",
            Error::Credential(_) => "credentials",
            Error::Handshake { .. } => "handshake",
            Error::Send(_) => "send",
            Error::Close(_) => "close",
            Error::Teardown(_) => "free",
            Error::Config(_) => "config",
            Error::InvalidState { .. } => "state",
            Error::Io(_) => "io",
        }
    }

    /// Whether retrying the whole operation at a higher level may succeed.
    ///
    /// Credential, configuration and state errors will fail the same way
    /// again; network-level failures may not.
    pub fn is_transient(&self) -> bool {
        match self {
            Error::Resolution { .. } | Error::Connect { .. } | Error::Send(_) => true,
            Error::Handshake { timed_out, .. } => *timed_out,
            Error::Io(e) => matches!(
                e.kind(),
                io::ErrorKind::TimedOut | io::ErrorKind::Interrupted | io::ErrorKind::WouldBlock
            ),
            _ => false,
        }
    }
}
