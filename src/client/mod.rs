//! Client entry points
//!
//! Connection URLs (`tls://host[:port]?...`) parsed into a
//! [`ConnectionConfig`](crate::ConnectionConfig) and opened in one step.

mod connection_string;

pub use connection_string::{ConnectionInfo, DEFAULT_PORT};
