//! Secure session management
//!
//! This module handles:
//! * Credential loading (certificate/key pair, trust anchors)
//! * Reference-counted process-wide TLS library state
//! * The record-layer capability and its rustls implementation
//! * Handshake, send and close retry policies

mod credentials;
mod library;
pub mod record;
mod secure;
mod tls;

pub use credentials::{CredentialPaths, CredentialSet};
pub use library::{active_handles, LibraryHandle};
pub use record::{CloseDirection, RecordLayer, Step};
pub use secure::{EndRole, SecureSession, SendOutcome, SessionBuilder, SessionState};
pub use tls::{parse_server_name, TlsLayer};
