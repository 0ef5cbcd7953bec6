//! Connection string parsing
//!
//! Supports the format:
//! * tls://host[:port][?cacert=..&cert=..&key=..&servername=..&connect_timeout=..&io_timeout=..]
//!
//! IPv6 literals go in brackets (`tls://[::1]:9390`). Timeouts are given in
//! seconds.

use crate::connection::{Connection, ConnectionConfig};
use crate::{Error, Result};
use std::path::PathBuf;
use std::time::Duration;

/// Port used when the connection string names none
pub const DEFAULT_PORT: u16 = 9390;

/// Parsed connection info
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionInfo {
    /// Host name or address literal (without brackets)
    pub host: String,
    /// Port
    pub port: u16,
    /// Path to trust anchors (from cacert param)
    pub ca_cert: Option<PathBuf>,
    /// Path to client certificate (from cert param, for mTLS)
    pub cert: Option<PathBuf>,
    /// Path to client private key (from key param, for mTLS)
    pub key: Option<PathBuf>,
    /// Certificate name override (from servername param)
    pub server_name: Option<String>,
    /// Connect timeout (from connect_timeout param)
    pub connect_timeout: Option<Duration>,
    /// Socket read/write timeout (from io_timeout param)
    pub io_timeout: Option<Duration>,
}

/// Extract a query parameter value from a query string
fn parse_query_param(query_string: &str, param: &str) -> Option<String> {
    if query_string.is_empty() {
        return None;
    }

    // Remove leading '?' if present
    let query = query_string.trim_start_matches('?');

    for pair in query.split('&') {
        if let Some((key, value)) = pair.split_once('=') {
            if key == param {
                return Some(value.to_string());
            }
        }
    }
    None
}

fn parse_seconds(query_string: &str, param: &str) -> Result<Option<Duration>> {
    match parse_query_param(query_string, param) {
        Some(value) => value
            .parse::<u64>()
            .map(|secs| Some(Duration::from_secs(secs)))
            .map_err(|_| Error::Config(format!("invalid {}: '{}'", param, value))),
        None => Ok(None),
    }
}

/// Split `host[:port]`, honouring bracketed IPv6 literals
fn split_host_port(host_port: &str) -> Result<(String, u16)> {
    let (host, port) = if let Some(rest) = host_port.strip_prefix('[') {
        let (host, after) = rest
            .split_once(']')
            .ok_or_else(|| Error::Config("unterminated IPv6 literal".into()))?;
        match after {
            "" => (host, None),
            _ => match after.strip_prefix(':') {
                Some(port) => (host, Some(port)),
                None => return Err(Error::Config("invalid text after IPv6 literal".into())),
            },
        }
    } else if let Some((host, port)) = host_port.rsplit_once(':') {
        if host.contains(':') {
            return Err(Error::Config(
                "IPv6 literals must be enclosed in brackets".into(),
            ));
        }
        (host, Some(port))
    } else {
        (host_port, None)
    };

    if host.is_empty() {
        return Err(Error::Config("connection string has no host".into()));
    }

    let port = match port {
        Some(port) => port
            .parse()
            .map_err(|_| Error::Config("invalid port".into()))?,
        None => DEFAULT_PORT,
    };
    Ok((host.to_string(), port))
}

impl ConnectionInfo {
    /// Parse connection string
    pub fn parse(s: &str) -> Result<Self> {
        let rest = s.strip_prefix("tls://").ok_or_else(|| {
            Error::Config("connection string must start with tls://".into())
        })?;

        // Split off query string before parsing host/port
        let (host_port, query_string) = match rest.find('?') {
            Some(q_pos) => rest.split_at(q_pos),
            None => (rest, ""),
        };
        let host_port = host_port.trim_end_matches('/');
        let (host, port) = split_host_port(host_port)?;

        Ok(Self {
            host,
            port,
            ca_cert: parse_query_param(query_string, "cacert").map(PathBuf::from),
            cert: parse_query_param(query_string, "cert").map(PathBuf::from),
            key: parse_query_param(query_string, "key").map(PathBuf::from),
            server_name: parse_query_param(query_string, "servername"),
            connect_timeout: parse_seconds(query_string, "connect_timeout")?,
            io_timeout: parse_seconds(query_string, "io_timeout")?,
        })
    }

    /// Convert to ConnectionConfig
    pub fn to_config(&self) -> ConnectionConfig {
        ConnectionConfig {
            ca_cert_path: self.ca_cert.clone(),
            cert_path: self.cert.clone(),
            key_path: self.key.clone(),
            server_name: self.server_name.clone(),
            connect_timeout: self.connect_timeout,
            io_timeout: self.io_timeout,
            ..ConnectionConfig::default()
        }
    }

    /// Open a connection to the parsed host and port
    pub fn open(&self) -> Result<Connection> {
        Connection::open_with_config(&self.host, self.port, &self.to_config())
    }
}

impl std::str::FromStr for ConnectionInfo {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full() {
        let info = ConnectionInfo::parse(
            "tls://scanner.local:9391?cacert=/etc/ca.pem&cert=/etc/cert.pem&key=/etc/key.pem",
        )
        .unwrap();
        assert_eq!(info.host, "scanner.local");
        assert_eq!(info.port, 9391);
        assert_eq!(info.ca_cert, Some(PathBuf::from("/etc/ca.pem")));
        assert_eq!(info.cert, Some(PathBuf::from("/etc/cert.pem")));
        assert_eq!(info.key, Some(PathBuf::from("/etc/key.pem")));
    }

    #[test]
    fn test_parse_minimal() {
        let info = ConnectionInfo::parse("tls://localhost").unwrap();
        assert_eq!(info.host, "localhost");
        assert_eq!(info.port, DEFAULT_PORT);
        assert_eq!(info.ca_cert, None);
        assert_eq!(info.server_name, None);
    }

    #[test]
    fn test_parse_trailing_slash() {
        let info = ConnectionInfo::parse("tls://localhost:1234/").unwrap();
        assert_eq!(info.port, 1234);
    }

    #[test]
    fn test_parse_ipv6() {
        let info = ConnectionInfo::parse("tls://[::1]:9400").unwrap();
        assert_eq!(info.host, "::1");
        assert_eq!(info.port, 9400);

        let info = ConnectionInfo::parse("tls://[fe80::1]").unwrap();
        assert_eq!(info.host, "fe80::1");
        assert_eq!(info.port, DEFAULT_PORT);
    }

    #[test]
    fn test_parse_ipv6_without_brackets_rejected() {
        assert!(ConnectionInfo::parse("tls://::1:9390").is_err());
        assert!(ConnectionInfo::parse("tls://[::1").is_err());
        assert!(ConnectionInfo::parse("tls://[::1]x").is_err());
    }

    #[test]
    fn test_parse_wrong_scheme() {
        let err = ConnectionInfo::parse("postgres://localhost/db").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_parse_invalid_port() {
        assert!(ConnectionInfo::parse("tls://localhost:notaport").is_err());
        assert!(ConnectionInfo::parse("tls://localhost:70000").is_err());
    }

    #[test]
    fn test_parse_empty_host() {
        assert!(ConnectionInfo::parse("tls://").is_err());
        assert!(ConnectionInfo::parse("tls://:9390").is_err());
    }

    #[test]
    fn test_parse_timeouts() {
        let info =
            ConnectionInfo::parse("tls://localhost?connect_timeout=5&io_timeout=30").unwrap();
        assert_eq!(info.connect_timeout, Some(Duration::from_secs(5)));
        assert_eq!(info.io_timeout, Some(Duration::from_secs(30)));

        assert!(ConnectionInfo::parse("tls://localhost?io_timeout=soon").is_err());
    }

    #[test]
    fn test_parse_query_param() {
        let ca = parse_query_param("?cacert=/tmp/ca.pem", "cacert");
        assert_eq!(ca, Some("/tmp/ca.pem".to_string()));

        let key = parse_query_param("?cert=/a&key=/b", "key");
        assert_eq!(key, Some("/b".to_string()));

        let missing = parse_query_param("?cert=/a", "key");
        assert_eq!(missing, None);

        let empty = parse_query_param("", "cert");
        assert_eq!(empty, None);
    }

    #[test]
    fn test_to_config_carries_everything() {
        let info = ConnectionInfo::parse(
            "tls://10.0.0.5?cacert=/ca.pem&servername=scanner.internal&io_timeout=7",
        )
        .unwrap();
        let config = info.to_config();
        assert_eq!(config.ca_cert_path, Some(PathBuf::from("/ca.pem")));
        assert_eq!(config.server_name.as_deref(), Some("scanner.internal"));
        assert_eq!(config.io_timeout, Some(Duration::from_secs(7)));
        assert_eq!(config.cert_path, None);
        assert!(!config.nodelay);
    }

    #[test]
    fn test_from_str() {
        let info: ConnectionInfo = "tls://127.0.0.1:1".parse().unwrap();
        assert_eq!(info.host, "127.0.0.1");
        assert_eq!(info.port, 1);
    }
}
