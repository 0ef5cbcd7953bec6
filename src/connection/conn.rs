//! Core connection type

use super::connector::{self, ConnectMode, ConnectProgress, SocketOptions};
use super::state::ConnectionState;
use super::transport::Transport;
use crate::metrics::{counters, labels};
use crate::resolve::resolve;
use crate::session::{CredentialPaths, EndRole, RecordLayer, SecureSession, SendOutcome, TlsLayer};
use crate::signal::SigpipeGuard;
use crate::{Error, Result};
use socket2::Socket;
use std::fmt;
use std::io;
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::path::PathBuf;
use std::time::Duration;

/// Connection configuration
///
/// Credential locations and socket options used by [`Connection::open_with_config`].
/// Everything is optional; the default config validates the server against
/// the platform's root certificates and uses OS socket defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectionConfig {
    /// Trust anchors for validating the server (PEM)
    pub ca_cert_path: Option<PathBuf>,
    /// Client certificate chain for mutual TLS (PEM)
    pub cert_path: Option<PathBuf>,
    /// Client private key for mutual TLS (PEM)
    pub key_path: Option<PathBuf>,
    /// Name the server certificate must match (default: the host)
    pub server_name: Option<String>,
    /// Bound for the blocking connect of each candidate
    pub connect_timeout: Option<Duration>,
    /// Read/write timeout bounding handshake, send and close
    pub io_timeout: Option<Duration>,
    /// TCP keepalive idle interval
    pub keepalive_idle: Option<Duration>,
    /// Disable Nagle's algorithm
    pub nodelay: bool,
}

impl ConnectionConfig {
    /// Create a builder for advanced configuration
    ///
    /// # Examples
    ///
    /// ```
    /// use secure_channel::ConnectionConfig;
    /// use std::time::Duration;
    ///
    /// let config = ConnectionConfig::builder()
    ///     .ca_cert_path("/etc/scanner/ca.pem")
    ///     .connect_timeout(Duration::from_secs(10))
    ///     .io_timeout(Duration::from_secs(30))
    ///     .build();
    /// assert_eq!(config.io_timeout, Some(Duration::from_secs(30)));
    /// ```
    pub fn builder() -> ConnectionConfigBuilder {
        ConnectionConfigBuilder {
            config: ConnectionConfig::default(),
        }
    }

    /// Socket options derived from the timeouts and flags
    pub fn socket_options(&self) -> SocketOptions {
        SocketOptions {
            connect_timeout: self.connect_timeout,
            io_timeout: self.io_timeout,
            keepalive_idle: self.keepalive_idle,
            nodelay: self.nodelay,
        }
    }

    /// Credential file locations
    pub fn credential_paths(&self) -> CredentialPaths {
        CredentialPaths {
            ca_cert: self.ca_cert_path.clone(),
            cert: self.cert_path.clone(),
            key: self.key_path.clone(),
        }
    }
}

/// Builder for creating `ConnectionConfig`
///
/// Provides a fluent API for credentials, timeouts and socket flags.
#[derive(Debug, Clone)]
pub struct ConnectionConfigBuilder {
    config: ConnectionConfig,
}

impl ConnectionConfigBuilder {
    /// Set the trust anchor file
    pub fn ca_cert_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.ca_cert_path = Some(path.into());
        self
    }

    /// Set the client certificate file (requires `key_path`)
    pub fn cert_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.cert_path = Some(path.into());
        self
    }

    /// Set the client private key file (requires `cert_path`)
    pub fn key_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.key_path = Some(path.into());
        self
    }

    /// Override the name used for SNI and certificate validation
    pub fn server_name(mut self, name: impl Into<String>) -> Self {
        self.config.server_name = Some(name.into());
        self
    }

    /// Set TCP connection timeout
    ///
    /// Default: None (OS connect timeout)
    pub fn connect_timeout(mut self, duration: Duration) -> Self {
        self.config.connect_timeout = Some(duration);
        self
    }

    /// Set socket read and write timeout
    ///
    /// Default: None (block indefinitely). A silent peer then makes the
    /// handshake fail with a timeout instead of hanging.
    pub fn io_timeout(mut self, duration: Duration) -> Self {
        self.config.io_timeout = Some(duration);
        self
    }

    /// Set TCP keepalive idle interval
    ///
    /// Default: None (OS default)
    pub fn keepalive_idle(mut self, duration: Duration) -> Self {
        self.config.keepalive_idle = Some(duration);
        self
    }

    /// Enable or disable `TCP_NODELAY`
    pub fn nodelay(mut self, nodelay: bool) -> Self {
        self.config.nodelay = nodelay;
        self
    }

    /// Build the configuration
    pub fn build(self) -> ConnectionConfig {
        self.config
    }
}

/// An established secure connection
///
/// Owns the socket, the session and (through the session) the credentials
/// and library reference. Fields drop in declaration order, so the socket is
/// closed first and the library released last. Dropping a connection without
/// [`close`](Connection::close) or [`free`](Connection::free) skips the
/// close_notify exchange.
pub struct Connection<T: Transport = TcpStream, L: RecordLayer = TlsLayer> {
    socket: T,
    session: SecureSession<L>,
    state: ConnectionState,
    peer: Option<SocketAddr>,
}

/// Result of [`Connection::connect`]
pub enum Connect<L: RecordLayer = TlsLayer> {
    /// Connected and handshaken
    Connected(Connection<TcpStream, L>),
    /// The connect has not resolved yet; resume once the socket is writable
    InProgress(PendingConnect<L>),
}

impl<L: RecordLayer> fmt::Debug for Connect<L> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Connect::Connected(conn) => f.debug_tuple("Connected").field(&conn.peer).finish(),
            Connect::InProgress(pending) => {
                f.debug_tuple("InProgress").field(&pending.addr).finish()
            }
        }
    }
}

/// A non-blocking connect that reported in-progress
///
/// Holds the socket and session until the connect resolves. Dropping it
/// closes the socket and releases the session.
pub struct PendingConnect<L: RecordLayer = TlsLayer> {
    socket: Socket,
    addr: SocketAddr,
    session: SecureSession<L>,
    state: ConnectionState,
}

impl<L: RecordLayer> PendingConnect<L> {
    /// Check whether the connect finished; handshake if it did.
    pub fn resume(self) -> Result<Connect<L>> {
        Connection::<TcpStream, L>::drive(self.socket, self.addr, self.session, self.state)
    }

    /// The connecting socket, for readiness polling
    pub fn socket(&self) -> &Socket {
        &self.socket
    }

    /// Address being connected to
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }
}

impl Connection {
    /// Open a client connection with the default configuration.
    ///
    /// See [`open_with_config`](Connection::open_with_config).
    pub fn open(host: &str, port: u16) -> Result<Self> {
        Self::open_with_config(host, port, &ConnectionConfig::default())
    }

    /// Resolve, connect, create a client session and handshake.
    ///
    /// Each stage's resources are released if a later stage fails.
    pub fn open_with_config(host: &str, port: u16, config: &ConnectionConfig) -> Result<Self> {
        let span = tracing::info_span!("open", host = %host, port);
        let _enter = span.enter();

        let endpoints = resolve(host, port)?;
        let socket = connector::connect_any(&endpoints, &config.socket_options())?;

        let server_name = config.server_name.as_deref().unwrap_or(host);
        let session = SecureSession::builder(EndRole::Client)
            .credential_paths(config.credential_paths())
            .server_name(server_name)
            .build()?;

        Self::attach(socket, session)
    }
}

impl<L: RecordLayer> Connection<TcpStream, L> {
    /// Connect `socket` to `addr` and handshake once connected.
    ///
    /// On a non-blocking socket this usually returns
    /// [`Connect::InProgress`]; call [`PendingConnect::resume`] once the
    /// socket reports writable.
    pub fn connect(
        socket: Socket,
        addr: SocketAddr,
        session: SecureSession<L>,
    ) -> Result<Connect<L>> {
        Self::drive(socket, addr, session, ConnectionState::Unconnected)
    }

    fn drive(
        socket: Socket,
        addr: SocketAddr,
        session: SecureSession<L>,
        mut state: ConnectionState,
    ) -> Result<Connect<L>> {
        let span = tracing::info_span!("connect", %addr, role = %session.role());
        let _enter = span.enter();

        let mode = match state {
            ConnectionState::Connecting => ConnectMode::CheckCompletion,
            _ => ConnectMode::Initiate,
        };

        match connector::connect_single(&socket, addr, mode)? {
            ConnectProgress::InProgress => {
                state.transition(ConnectionState::Connecting)?;
                tracing::debug!("connect in progress");
                Ok(Connect::InProgress(PendingConnect {
                    socket,
                    addr,
                    session,
                    state,
                }))
            }
            ConnectProgress::Connected => {
                state.transition(ConnectionState::Connected)?;
                let stream: TcpStream = socket.into();
                Self::establish(stream, session, state).map(Connect::Connected)
            }
        }
    }
}

impl<T: Transport, L: RecordLayer> Connection<T, L> {
    /// Bind a connected socket to a session and run the handshake.
    ///
    /// Used for accepted sockets (server role) and sockets connected
    /// elsewhere (client role).
    pub fn attach(socket: T, session: SecureSession<L>) -> Result<Self> {
        let span = tracing::info_span!("attach", role = %session.role());
        let _enter = span.enter();
        Self::establish(socket, session, ConnectionState::Connected)
    }

    fn establish(
        mut socket: T,
        mut session: SecureSession<L>,
        mut state: ConnectionState,
    ) -> Result<Self> {
        let peer = socket.peer_addr().ok();
        state.transition(ConnectionState::Handshaking)?;
        {
            let _guard = SigpipeGuard::new()?;
            session.handshake(&mut socket)?;
        }
        state.transition(ConnectionState::Ready)?;

        tracing::info!(
            peer = ?peer,
            role = %session.role(),
            "secure connection established"
        );
        Ok(Self {
            socket,
            session,
            state,
            peer,
        })
    }

    /// Current state
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Session role
    pub fn role(&self) -> EndRole {
        self.session.role()
    }

    /// The secure session
    pub fn session(&self) -> &SecureSession<L> {
        &self.session
    }

    /// The socket handle
    pub fn socket(&self) -> &T {
        &self.socket
    }

    /// Peer address captured when the handshake started
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer
    }

    /// Send the whole payload.
    ///
    /// [`SendOutcome::PeerClosed`] is not an error: the peer ended the
    /// conversation and the connection should be freed.
    pub fn send(&mut self, data: &[u8]) -> Result<SendOutcome> {
        if self.state != ConnectionState::Ready {
            return Err(Error::InvalidState {
                expected: ConnectionState::Ready.to_string(),
                actual: self.state.to_string(),
            });
        }
        let _guard = SigpipeGuard::new()?;
        self.session.send(&mut self.socket, data)
    }

    /// Send a string payload
    pub fn send_str(&mut self, text: &str) -> Result<SendOutcome> {
        self.send(text.as_bytes())
    }

    /// Format and send a payload; see [`sendf!`](crate::sendf) and
    /// [`sendf_markup!`](crate::sendf_markup).
    pub fn send_fmt(&mut self, args: fmt::Arguments<'_>) -> Result<SendOutcome> {
        match args.as_str() {
            Some(text) => self.send_str(text),
            None => self.send_str(&args.to_string()),
        }
    }

    /// End the conversation gracefully.
    ///
    /// Runs the bidirectional close_notify exchange, then closes the socket
    /// and releases the session and library state. The socket and session
    /// are released even if the exchange fails; that failure is reported as
    /// [`Error::Close`].
    pub fn close(self) -> Result<()> {
        let Connection {
            mut socket,
            mut session,
            mut state,
            peer,
        } = self;
        let span = tracing::info_span!("close", peer = ?peer);
        let _enter = span.enter();

        state.transition(ConnectionState::ShuttingDown)?;
        let result = match SigpipeGuard::new() {
            Ok(_guard) => session.close(&mut socket),
            Err(e) => Err(Error::Close(format!(
                "failed to suppress broken pipe signal: {}",
                e
            ))),
        };

        drop(socket);
        drop(session);
        state.transition(ConnectionState::Closed)?;

        match result {
            Ok(()) => {
                tracing::info!("connection closed");
                Ok(())
            }
            Err(e) => {
                counters::teardown_failed(labels::MODE_CLOSE);
                tracing::debug!("close failed: {}", e);
                Err(e)
            }
        }
    }

    /// Tear the connection down and release everything it owns.
    ///
    /// The socket is switched to non-blocking, close_notify is sent without
    /// waiting for an answer (failures are swallowed), both directions are
    /// shut down, then the socket, session, credentials and library
    /// reference are released in that order. Every step runs; only a failed
    /// socket shutdown is reported, as [`Error::Teardown`].
    pub fn free(self) -> Result<()> {
        let Connection {
            mut socket,
            mut session,
            mut state,
            peer,
        } = self;
        let span = tracing::info_span!("free", peer = ?peer);
        let _enter = span.enter();

        state.transition(ConnectionState::ShuttingDown)?;
        if let Err(e) = socket.set_nonblocking(true) {
            tracing::warn!("failed to set socket non-blocking: {}", e);
        }

        match SigpipeGuard::new() {
            Ok(guard) => {
                session.close_write(&mut socket);
                drop(guard);
            }
            Err(e) => tracing::warn!("skipping close_notify, broken pipe not suppressed: {}", e),
        }

        let shutdown = match socket.shutdown(Shutdown::Both) {
            Err(e) if e.kind() == io::ErrorKind::NotConnected => Ok(()),
            other => other,
        };

        drop(socket);
        drop(session);
        state.transition(ConnectionState::Closed)?;

        if let Err(e) = shutdown {
            counters::teardown_failed(labels::MODE_FREE);
            tracing::warn!("failed to shutdown socket: {}", e);
            return Err(Error::Teardown(format!("failed to shutdown socket: {}", e)));
        }
        tracing::info!("connection freed");
        Ok(())
    }
}

impl<T: Transport + fmt::Debug, L: RecordLayer + fmt::Debug> fmt::Debug for Connection<T, L> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("state", &self.state)
            .field("peer", &self.peer)
            .field("socket", &self.socket)
            .field("session", &self.session)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::transport::mock::MockTransport;
    use crate::session::record::mock::ScriptedLayer;
    use crate::session::{CredentialSet, Step};
    use std::sync::Arc;

    fn attached(
        layer: ScriptedLayer,
        socket: MockTransport,
    ) -> Connection<MockTransport, ScriptedLayer> {
        let session =
            SecureSession::from_layer(EndRole::Client, layer, Arc::new(CredentialSet::empty()))
                .unwrap();
        Connection::attach(socket, session).unwrap()
    }

    #[test]
    fn test_config_builder() {
        let config = ConnectionConfig::builder()
            .ca_cert_path("/tmp/ca.pem")
            .cert_path("/tmp/cert.pem")
            .key_path("/tmp/key.pem")
            .server_name("scanner.local")
            .connect_timeout(Duration::from_secs(5))
            .io_timeout(Duration::from_secs(30))
            .keepalive_idle(Duration::from_secs(300))
            .nodelay(true)
            .build();

        assert_eq!(config.server_name.as_deref(), Some("scanner.local"));
        let paths = config.credential_paths();
        assert_eq!(paths.ca_cert, Some(PathBuf::from("/tmp/ca.pem")));
        assert_eq!(paths.key, Some(PathBuf::from("/tmp/key.pem")));

        let options = config.socket_options();
        assert_eq!(options.connect_timeout, Some(Duration::from_secs(5)));
        assert_eq!(options.io_timeout, Some(Duration::from_secs(30)));
        assert_eq!(options.keepalive_idle, Some(Duration::from_secs(300)));
        assert!(options.nodelay);
    }

    #[test]
    fn test_config_default_is_empty() {
        let config = ConnectionConfig::default();
        assert!(config.credential_paths().is_empty());
        assert_eq!(config.socket_options(), SocketOptions::default());
    }

    #[test]
    fn test_attach_handshakes() {
        let conn = attached(ScriptedLayer::new(), MockTransport::default());
        assert_eq!(conn.state(), ConnectionState::Ready);
        assert_eq!(conn.role(), EndRole::Client);
        assert!(conn.session().is_ready());
        assert_eq!(conn.peer_addr(), Some(SocketAddr::from(([127, 0, 0, 1], 9390))));
    }

    #[test]
    fn test_attach_handshake_failure() {
        let mut layer = ScriptedLayer::new();
        layer.handshake.push_back(Step::Failed("unknown ca".into()));
        let session =
            SecureSession::from_layer(EndRole::Server, layer, Arc::new(CredentialSet::empty()))
                .unwrap();
        let err = Connection::attach(MockTransport::default(), session).unwrap_err();
        assert!(matches!(err, Error::Handshake { .. }));
    }

    #[test]
    fn test_send_fmt_and_markup() {
        let mut conn = attached(ScriptedLayer::new(), MockTransport::default());

        assert_eq!(crate::sendf!(conn, "<a>{}</a>", "x&y").unwrap(), SendOutcome::Sent);
        assert_eq!(
            crate::sendf_markup!(conn, "<a>{}</a>", "x&y").unwrap(),
            SendOutcome::Sent
        );
        assert_eq!(conn.socket().written, b"<a>x&y</a><a>x&amp;y</a>");
    }

    #[test]
    fn test_markup_named_arguments_are_escaped() {
        let mut conn = attached(ScriptedLayer::new(), MockTransport::default());
        let value = "<evil attr='x'>&";
        assert_eq!(
            crate::sendf_markup!(conn, "<a>{name}</a>", name = value).unwrap(),
            SendOutcome::Sent
        );
        assert_eq!(
            conn.socket().written,
            b"<a>&lt;evil attr=&apos;x&apos;&gt;&amp;</a>"
        );
    }

    #[test]
    fn test_markup_keeps_format_options() {
        let mut conn = attached(ScriptedLayer::new(), MockTransport::default());
        let outcome = crate::sendf!(conn, "{:.2}|{:>5}|{:03}", 1.23456, "a", 7).unwrap();
        assert_eq!(outcome, SendOutcome::Sent);
        let plain = conn.socket().written.clone();
        conn.socket.written.clear();

        let outcome = crate::sendf_markup!(conn, "{:.2}|{:>5}|{:03}", 1.23456, "a", 7).unwrap();
        assert_eq!(outcome, SendOutcome::Sent);
        assert_eq!(conn.socket().written, plain);
        assert_eq!(plain, b"1.23|    a|007");
    }

    #[test]
    fn test_send_plain_template() {
        let mut conn = attached(ScriptedLayer::new(), MockTransport::default());
        assert_eq!(crate::sendf!(conn, "<get_version/>").unwrap(), SendOutcome::Sent);
        assert_eq!(conn.socket().written, b"<get_version/>");
    }

    #[test]
    fn test_close_success() {
        let conn = attached(ScriptedLayer::new(), MockTransport::default());
        let credentials = Arc::downgrade(conn.session().credentials());
        conn.close().unwrap();
        assert!(credentials.upgrade().is_none());
    }

    #[test]
    fn test_close_reports_failure_and_releases() {
        let mut layer = ScriptedLayer::new();
        layer.byes.push_back(Step::Failed("connection reset".into()));
        let conn = attached(layer, MockTransport::default());
        let credentials = Arc::downgrade(conn.session().credentials());

        assert!(matches!(conn.close(), Err(Error::Close(_))));
        assert!(credentials.upgrade().is_none());
    }

    #[test]
    fn test_free_swallows_close_notify_failure() {
        let mut layer = ScriptedLayer::new();
        layer.byes.push_back(Step::Failed("broken pipe".into()));
        let conn = attached(layer, MockTransport::default());
        let credentials = Arc::downgrade(conn.session().credentials());

        conn.free().unwrap();
        assert!(credentials.upgrade().is_none());
    }

    #[test]
    fn test_free_not_connected_is_success() {
        let socket = MockTransport {
            shutdown_error: Some(io::ErrorKind::NotConnected),
            ..MockTransport::default()
        };
        attached(ScriptedLayer::new(), socket).free().unwrap();
    }

    #[test]
    fn test_free_reports_shutdown_failure_after_cleanup() {
        let socket = MockTransport {
            shutdown_error: Some(io::ErrorKind::PermissionDenied),
            ..MockTransport::default()
        };
        let conn = attached(ScriptedLayer::new(), socket);
        let credentials = Arc::downgrade(conn.session().credentials());

        assert!(matches!(conn.free(), Err(Error::Teardown(_))));
        assert!(credentials.upgrade().is_none());
    }
}
