//! secure-channel: a blocking TLS connection manager
//!
//! The crate establishes an encrypted, authenticated channel to a remote peer
//! over TCP and drives it through its whole lifecycle:
//!
//! * address resolution and ordered candidate iteration
//! * blocking connects, and non-blocking connects that can be resumed
//! * TLS session setup in client or server role (rustls)
//! * the handshake retry loop
//! * reliable sends with partial-write handling
//! * graceful close and forceful teardown
//!
//! Every operation that may raise the broken-pipe signal runs under a
//! [`signal::SigpipeGuard`], so the process-wide disposition is always
//! restored before the call returns.
//!
//! # Example
//!
//! ```no_run
//! # fn example() -> secure_channel::Result<()> {
//! use secure_channel::{Connection, ConnectionConfig, SendOutcome};
//!
//! let config = ConnectionConfig::builder()
//!     .ca_cert_path("/etc/secure-channel/ca.pem")
//!     .build();
//!
//! let mut conn = Connection::open_with_config("scanner.example.com", 9390, &config)?;
//! match secure_channel::sendf_markup!(conn, "<get_version name=\"{}\"/>", "a&b")? {
//!     SendOutcome::Sent => {}
//!     SendOutcome::PeerClosed => eprintln!("peer went away"),
//! }
//! conn.free()?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

pub mod client;
pub mod connection;
pub mod error;
pub mod markup;
mod metrics;
pub mod resolve;
pub mod session;
pub mod signal;

pub use client::ConnectionInfo;
pub use connection::{
    Connect, Connection, ConnectionConfig, ConnectionConfigBuilder, ConnectionState,
    PendingConnect, Transport,
};
pub use error::{Error, Result};
pub use resolve::{resolve, AddressFamily, Endpoint};
pub use session::{
    CredentialPaths, CredentialSet, EndRole, SecureSession, SendOutcome, SessionBuilder,
    SessionState,
};
