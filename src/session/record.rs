//! Record layer capability
//!
//! The TLS library is consumed through [`RecordLayer`]: one handshake step,
//! one record send, one close step. Each call answers with a [`Step`] that
//! separates transient outcomes (would block, interrupted, rehandshake
//! requested) from terminal ones, leaving the retry policy to
//! [`SecureSession`](super::SecureSession).

use crate::connection::Transport;
use std::io;

/// Outcome of one record-layer operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step<T> {
    /// Completed; for sends, the number of plaintext bytes accepted
    /// (zero means the peer has closed)
    Done(T),
    /// The transport would block; nothing changed
    Again,
    /// A signal interrupted the call; nothing changed
    Interrupted,
    /// The peer asked for a new handshake
    Rehandshake,
    /// The socket timeout expired; terminal
    TimedOut,
    /// Terminal failure with the library's diagnostic
    Failed(String),
}

impl<T> Step<T> {
    /// Classify an I/O error from the transport.
    ///
    /// Would-block on a socket with timeouts means the timeout expired,
    /// which is terminal.
    pub fn from_io_error(err: io::Error, has_timeouts: bool) -> Self {
        match err.kind() {
            io::ErrorKind::Interrupted => Step::Interrupted,
            io::ErrorKind::WouldBlock if !has_timeouts => Step::Again,
            io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut => Step::TimedOut,
            _ => Step::Failed(err.to_string()),
        }
    }
}

/// Which directions a close step shuts down
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseDirection {
    /// Send close_notify and wait for the peer's
    Both,
    /// Send close_notify only
    Write,
}

/// Single-step primitives of a transport-security library
pub trait RecordLayer {
    /// Whether the handshake has not completed yet
    fn is_handshaking(&self) -> bool;

    /// Advance the handshake by one step
    fn handshake_step<T: Transport>(&mut self, io: &mut T) -> Step<()>;

    /// Encrypt and send (a prefix of) `data` as one record
    fn send_record<T: Transport>(&mut self, io: &mut T, data: &[u8]) -> Step<usize>;

    /// Whether encrypted bytes are still queued for the transport
    fn wants_flush(&self) -> bool;

    /// Push queued encrypted bytes to the transport
    fn flush<T: Transport>(&mut self, io: &mut T) -> Step<()>;

    /// Advance the close handshake by one step
    fn bye<T: Transport>(&mut self, io: &mut T, how: CloseDirection) -> Step<()>;

    /// DER encoding of the peer's leaf certificate, once known
    fn peer_certificate(&self) -> Option<&[u8]> {
        None
    }

    /// Negotiated protocol version, once known
    fn protocol_version(&self) -> Option<String> {
        None
    }
}
