//! Connection management
//!
//! This module handles:
//! * Socket creation and connect (blocking iteration, resumable non-blocking)
//! * Transport abstraction over the socket handle
//! * Connection lifecycle (open, attach, connect, send, close, free)
//! * State machine enforcement

mod conn;
pub mod connector;
mod state;
pub(crate) mod transport;

pub use conn::{Connect, Connection, ConnectionConfig, ConnectionConfigBuilder, PendingConnect};
pub use connector::{ConnectMode, ConnectProgress, SocketOptions};
pub use state::ConnectionState;
pub use transport::Transport;
