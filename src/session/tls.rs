//! rustls-backed record layer

use super::credentials::CredentialSet;
use super::record::{CloseDirection, RecordLayer, Step};
use crate::connection::Transport;
use crate::{Error, Result};
use rustls::server::WebPkiClientVerifier;
use rustls::{ClientConfig, ClientConnection, ServerConfig, ServerConnection};
use rustls_pki_types::ServerName;
use std::io::{self, Read, Write};
use std::sync::Arc;

enum TlsConnection {
    Client(ClientConnection),
    Server(ServerConnection),
}

impl TlsConnection {
    fn is_handshaking(&self) -> bool {
        match self {
            TlsConnection::Client(conn) => conn.is_handshaking(),
            TlsConnection::Server(conn) => conn.is_handshaking(),
        }
    }

    fn wants_write(&self) -> bool {
        match self {
            TlsConnection::Client(conn) => conn.wants_write(),
            TlsConnection::Server(conn) => conn.wants_write(),
        }
    }

    fn complete_io<T: Read + Write>(&mut self, io: &mut T) -> io::Result<(usize, usize)> {
        match self {
            TlsConnection::Client(conn) => conn.complete_io(io),
            TlsConnection::Server(conn) => conn.complete_io(io),
        }
    }

    fn read_tls(&mut self, io: &mut dyn Read) -> io::Result<usize> {
        match self {
            TlsConnection::Client(conn) => conn.read_tls(io),
            TlsConnection::Server(conn) => conn.read_tls(io),
        }
    }

    fn write_tls(&mut self, io: &mut dyn Write) -> io::Result<usize> {
        match self {
            TlsConnection::Client(conn) => conn.write_tls(io),
            TlsConnection::Server(conn) => conn.write_tls(io),
        }
    }

    fn process_new_packets(&mut self) -> std::result::Result<rustls::IoState, rustls::Error> {
        match self {
            TlsConnection::Client(conn) => conn.process_new_packets(),
            TlsConnection::Server(conn) => conn.process_new_packets(),
        }
    }

    fn writer(&mut self) -> rustls::Writer<'_> {
        match self {
            TlsConnection::Client(conn) => conn.writer(),
            TlsConnection::Server(conn) => conn.writer(),
        }
    }

    fn reader(&mut self) -> rustls::Reader<'_> {
        match self {
            TlsConnection::Client(conn) => conn.reader(),
            TlsConnection::Server(conn) => conn.reader(),
        }
    }

    fn send_close_notify(&mut self) {
        match self {
            TlsConnection::Client(conn) => conn.send_close_notify(),
            TlsConnection::Server(conn) => conn.send_close_notify(),
        }
    }

    fn peer_certificates(&self) -> Option<&[rustls_pki_types::CertificateDer<'static>]> {
        match self {
            TlsConnection::Client(conn) => conn.peer_certificates(),
            TlsConnection::Server(conn) => conn.peer_certificates(),
        }
    }

    fn protocol_version(&self) -> Option<rustls::ProtocolVersion> {
        match self {
            TlsConnection::Client(conn) => conn.protocol_version(),
            TlsConnection::Server(conn) => conn.protocol_version(),
        }
    }
}

/// One rustls session, client or server side
pub struct TlsLayer {
    conn: TlsConnection,
    close_notify_sent: bool,
}

impl std::fmt::Debug for TlsLayer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let side = match self.conn {
            TlsConnection::Client(_) => "client",
            TlsConnection::Server(_) => "server",
        };
        f.debug_struct("TlsLayer")
            .field("side", &side)
            .field("handshaking", &self.conn.is_handshaking())
            .field("close_notify_sent", &self.close_notify_sent)
            .finish()
    }
}

impl TlsLayer {
    /// Client session validating the server as `server_name`
    pub fn client(credentials: &CredentialSet, server_name: &str) -> Result<Self> {
        let name = parse_server_name(server_name)?;
        let config = Arc::new(client_config(credentials)?);
        let conn = ClientConnection::new(config, name)
            .map_err(|e| Error::Config(format!("failed to initialise client session: {}", e)))?;
        Ok(Self {
            conn: TlsConnection::Client(conn),
            close_notify_sent: false,
        })
    }

    /// Server session; requests a client certificate when trust anchors
    /// are configured
    pub fn server(credentials: &CredentialSet) -> Result<Self> {
        let config = Arc::new(server_config(credentials)?);
        let conn = ServerConnection::new(config)
            .map_err(|e| Error::Config(format!("failed to initialise server session: {}", e)))?;
        Ok(Self {
            conn: TlsConnection::Server(conn),
            close_notify_sent: false,
        })
    }

    /// Write queued ciphertext until none is left
    fn drain<T: Transport>(&mut self, io: &mut T) -> io::Result<()> {
        while self.conn.wants_write() {
            if self.conn.write_tls(&mut *io)? == 0 {
                return Err(io::ErrorKind::WriteZero.into());
            }
        }
        io.flush()
    }

    /// Drop application data that arrives while waiting for close_notify
    fn discard_plaintext(&mut self) {
        let mut sink = [0u8; 4096];
        while let Ok(n) = self.conn.reader().read(&mut sink) {
            if n == 0 {
                break;
            }
        }
    }
}

/// The transport accepted nothing: the zero-length result of a closed peer.
///
/// Resets and broken pipes are hard faults and stay errors.
fn is_zero_write(err: &io::Error) -> bool {
    err.kind() == io::ErrorKind::WriteZero
}

impl RecordLayer for TlsLayer {
    fn is_handshaking(&self) -> bool {
        self.conn.is_handshaking()
    }

    fn handshake_step<T: Transport>(&mut self, io: &mut T) -> Step<()> {
        if !self.conn.is_handshaking() {
            return Step::Done(());
        }
        match self.conn.complete_io(io) {
            Ok(_) if self.conn.is_handshaking() => Step::Again,
            Ok(_) => Step::Done(()),
            Err(e) => Step::from_io_error(e, io.has_timeouts()),
        }
    }

    fn send_record<T: Transport>(&mut self, io: &mut T, data: &[u8]) -> Step<usize> {
        // Queued ciphertext goes first so the plaintext buffer has room.
        match self.drain(io) {
            Ok(()) => {}
            Err(e) if is_zero_write(&e) => return Step::Done(0),
            Err(e) => return Step::from_io_error(e, io.has_timeouts()),
        }

        let accepted = match self.conn.writer().write(data) {
            Ok(n) => n,
            Err(e) => return Step::Failed(e.to_string()),
        };

        match self.drain(io) {
            Ok(()) => Step::Done(accepted),
            Err(e) if is_zero_write(&e) => Step::Done(0),
            Err(e) => match Step::<usize>::from_io_error(e, io.has_timeouts()) {
                // Accepted plaintext is owned by the session now; the rest
                // of its ciphertext goes out with the next step or flush.
                Step::Again | Step::Interrupted => Step::Done(accepted),
                other => other,
            },
        }
    }

    fn wants_flush(&self) -> bool {
        self.conn.wants_write()
    }

    fn flush<T: Transport>(&mut self, io: &mut T) -> Step<()> {
        match self.drain(io) {
            Ok(()) => Step::Done(()),
            Err(e) if is_zero_write(&e) => {
                Step::Failed(format!("peer closed the connection: {}", e))
            }
            Err(e) => Step::from_io_error(e, io.has_timeouts()),
        }
    }

    fn bye<T: Transport>(&mut self, io: &mut T, how: CloseDirection) -> Step<()> {
        if !self.close_notify_sent {
            self.conn.send_close_notify();
            self.close_notify_sent = true;
        }
        if let Err(e) = self.drain(io) {
            return Step::from_io_error(e, io.has_timeouts());
        }
        if how == CloseDirection::Write {
            return Step::Done(());
        }

        loop {
            match self.conn.read_tls(&mut *io) {
                // EOF without close_notify still ends the conversation
                Ok(0) => return Step::Done(()),
                Ok(_) => match self.conn.process_new_packets() {
                    Ok(state) => {
                        self.discard_plaintext();
                        if state.peer_has_closed() {
                            return Step::Done(());
                        }
                    }
                    Err(e) => return Step::Failed(e.to_string()),
                },
                Err(e) => return Step::from_io_error(e, io.has_timeouts()),
            }
        }
    }

    fn peer_certificate(&self) -> Option<&[u8]> {
        self.conn
            .peer_certificates()?
            .first()
            .map(|cert| cert.as_ref())
    }

    fn protocol_version(&self) -> Option<String> {
        self.conn.protocol_version().map(|v| format!("{:?}", v))
    }
}

/// Parse a host name or IP literal for SNI and certificate validation
pub fn parse_server_name(host: &str) -> Result<ServerName<'static>> {
    let trimmed = host.trim_end_matches('.');
    let trimmed = trimmed
        .strip_prefix('[')
        .and_then(|h| h.strip_suffix(']'))
        .unwrap_or(trimmed);

    if trimmed.is_empty() || trimmed.len() > 253 {
        return Err(Error::Config(format!(
            "invalid server name for TLS: '{}'",
            host
        )));
    }

    ServerName::try_from(trimmed.to_string())
        .map_err(|_| Error::Config(format!("invalid server name for TLS: '{}'", host)))
}

fn client_config(credentials: &CredentialSet) -> Result<ClientConfig> {
    let roots = credentials.root_store()?;
    let builder = ClientConfig::builder().with_root_certificates(roots);
    match credentials.identity() {
        Some((chain, key)) => builder.with_client_auth_cert(chain, key).map_err(|e| {
            Error::Credential(format!("invalid client certificate or key: {}", e))
        }),
        None => Ok(builder.with_no_client_auth()),
    }
}

fn server_config(credentials: &CredentialSet) -> Result<ServerConfig> {
    let (chain, key) = credentials.identity().ok_or_else(|| {
        Error::Credential("server role requires a certificate and private key".into())
    })?;

    let builder = ServerConfig::builder();
    let builder = match credentials.trust_anchors() {
        Some(roots) => {
            let verifier = WebPkiClientVerifier::builder(Arc::new(roots.clone()))
                .allow_unauthenticated()
                .build()
                .map_err(|e| Error::Credential(format!("invalid trust anchors: {}", e)))?;
            builder.with_client_cert_verifier(verifier)
        }
        None => builder.with_no_client_auth(),
    };

    builder
        .with_single_cert(chain, key)
        .map_err(|e| Error::Credential(format!("invalid server certificate or key: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::transport::mock::MockTransport;
    use crate::session::credentials::CredentialPaths;
    use crate::session::library::LibraryHandle;

    /// Client layer with a throwaway trust anchor; its ClientHello is queued
    fn client_layer(dir: &tempfile::TempDir) -> TlsLayer {
        let certified = rcgen::generate_simple_self_signed(vec!["localhost".into()]).unwrap();
        let ca = dir.path().join("ca.pem");
        std::fs::write(&ca, certified.cert.pem()).unwrap();
        let credentials = CredentialSet::load(&CredentialPaths {
            ca_cert: Some(ca),
            ..CredentialPaths::default()
        })
        .unwrap();
        TlsLayer::client(&credentials, "localhost").unwrap()
    }

    #[test]
    fn test_parse_server_name_valid() {
        assert!(parse_server_name("localhost").is_ok());
        assert!(parse_server_name("scanner.example.com").is_ok());
        assert!(parse_server_name("scanner.example.com.").is_ok());
    }

    #[test]
    fn test_parse_server_name_ip_literals() {
        assert!(matches!(
            parse_server_name("127.0.0.1").unwrap(),
            ServerName::IpAddress(_)
        ));
        assert!(matches!(
            parse_server_name("[::1]").unwrap(),
            ServerName::IpAddress(_)
        ));
    }

    #[test]
    fn test_parse_server_name_invalid() {
        assert!(parse_server_name("").is_err());
        assert!(parse_server_name("bad name!").is_err());
    }

    #[test]
    fn test_server_requires_identity() {
        let _library = LibraryHandle::acquire().unwrap();
        let err = TlsLayer::server(&CredentialSet::empty()).unwrap_err();
        assert!(matches!(err, Error::Credential(_)));
    }

    #[test]
    fn test_send_reset_is_failure() {
        let _library = LibraryHandle::acquire().unwrap();
        let dir = tempfile::tempdir().unwrap();

        for kind in [
            io::ErrorKind::ConnectionReset,
            io::ErrorKind::BrokenPipe,
            io::ErrorKind::ConnectionAborted,
        ] {
            let mut layer = client_layer(&dir);
            let mut io = MockTransport {
                write_error: Some(kind),
                ..MockTransport::default()
            };
            assert!(
                matches!(layer.send_record(&mut io, b"hello"), Step::Failed(_)),
                "{:?} must not read as an orderly close",
                kind
            );
        }
    }

    #[test]
    fn test_send_zero_write_is_peer_closed() {
        let _library = LibraryHandle::acquire().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let mut layer = client_layer(&dir);
        let mut io = MockTransport {
            write_closed: true,
            ..MockTransport::default()
        };
        assert_eq!(layer.send_record(&mut io, b"hello"), Step::Done(0));
    }

    #[test]
    fn test_flush_reset_is_failure() {
        let _library = LibraryHandle::acquire().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let mut layer = client_layer(&dir);
        assert!(layer.wants_flush());
        let mut io = MockTransport {
            write_error: Some(io::ErrorKind::ConnectionReset),
            ..MockTransport::default()
        };
        assert!(matches!(layer.flush(&mut io), Step::Failed(_)));
    }
}
