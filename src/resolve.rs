//! Address resolution
//!
//! Turns a host (name or literal) and port into the ordered list of
//! [`Endpoint`]s to try. Both address families are returned in the system
//! resolver's order; nothing is connected here.

use crate::{Error, Result};
use std::fmt;
use std::net::{SocketAddr, ToSocketAddrs};

/// Address family of an endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AddressFamily {
    /// IPv4
    V4,
    /// IPv6
    V6,
}

impl fmt::Display for AddressFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::V4 => write!(f, "ipv4"),
            Self::V6 => write!(f, "ipv6"),
        }
    }
}

/// One resolved candidate to connect to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Endpoint {
    addr: SocketAddr,
}

impl Endpoint {
    /// Wrap an already-known socket address
    pub fn new(addr: SocketAddr) -> Self {
        Self { addr }
    }

    /// Socket address (address bytes and port)
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Address family
    pub fn family(&self) -> AddressFamily {
        match self.addr {
            SocketAddr::V4(_) => AddressFamily::V4,
            SocketAddr::V6(_) => AddressFamily::V6,
        }
    }

    /// Port
    pub fn port(&self) -> u16 {
        self.addr.port()
    }
}

impl From<SocketAddr> for Endpoint {
    fn from(addr: SocketAddr) -> Self {
        Self::new(addr)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.addr)
    }
}

/// Resolve `host`/`port` into an ordered, non-empty list of endpoints.
///
/// # Errors
///
/// Returns [`Error::Resolution`] carrying the resolver's diagnostic if the
/// lookup fails or yields no address.
pub fn resolve(host: &str, port: u16) -> Result<Vec<Endpoint>> {
    let host = strip_brackets(host);
    if host.is_empty() {
        return Err(Error::Resolution {
            host: host.to_string(),
            port,
            reason: "empty host".into(),
        });
    }

    let endpoints: Vec<Endpoint> = (host, port)
        .to_socket_addrs()
        .map_err(|e| Error::Resolution {
            host: host.to_string(),
            port,
            reason: e.to_string(),
        })?
        .map(Endpoint::from)
        .collect();

    if endpoints.is_empty() {
        return Err(Error::Resolution {
            host: host.to_string(),
            port,
            reason: "no addresses returned".into(),
        });
    }

    tracing::debug!(host, port, candidates = endpoints.len(), "resolved");
    Ok(endpoints)
}

/// `[::1]` style literals are accepted as well as bare `::1`
fn strip_brackets(host: &str) -> &str {
    host.strip_prefix('[')
        .and_then(|h| h.strip_suffix(']'))
        .unwrap_or(host)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_ipv4_literal() {
        let endpoints = resolve("127.0.0.1", 9390).unwrap();
        assert_eq!(endpoints.len(), 1);
        assert_eq!(endpoints[0].family(), AddressFamily::V4);
        assert_eq!(endpoints[0].port(), 9390);
        assert_eq!(endpoints[0].to_string(), "127.0.0.1:9390");
    }

    #[test]
    fn test_resolve_ipv6_literal() {
        let endpoints = resolve("::1", 443).unwrap();
        assert_eq!(endpoints[0].family(), AddressFamily::V6);

        let bracketed = resolve("[::1]", 443).unwrap();
        assert_eq!(bracketed, endpoints);
    }

    #[test]
    fn test_resolve_empty_host_fails() {
        let err = resolve("", 443).unwrap_err();
        assert!(matches!(err, Error::Resolution { .. }));
    }

    #[test]
    fn test_resolve_unknown_host_fails() {
        // .invalid is reserved and never resolves
        let err = resolve("no-such-host.invalid", 443).unwrap_err();
        match err {
            Error::Resolution { host, port, reason } => {
                assert_eq!(host, "no-such-host.invalid");
                assert_eq!(port, 443);
                assert!(!reason.is_empty());
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_address_family_display() {
        assert_eq!(AddressFamily::V4.to_string(), "ipv4");
        assert_eq!(AddressFamily::V6.to_string(), "ipv6");
    }
}
