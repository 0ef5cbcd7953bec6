//! Secure session
//!
//! [`SecureSession`] owns one record-layer session, the credential set it was
//! built from and a reference on the process-wide TLS library. It applies the
//! retry policy on top of the single-step [`RecordLayer`] primitives:
//!
//! * handshake: retry on would-block and interrupted, anything else is terminal
//! * send: write the unsent suffix until everything is accepted; retry on
//!   interrupted, would-block and rehandshake requests; a zero-length write
//!   means the peer closed
//! * close: bidirectional close_notify exchange, or a write-only close that
//!   never fails
//!
//! Field order matters: the layer drops before the credentials, which drop
//! before the library reference.

use super::credentials::{CredentialPaths, CredentialSet};
use super::library::LibraryHandle;
use super::record::{CloseDirection, RecordLayer, Step};
use super::tls::TlsLayer;
use crate::connection::Transport;
use crate::metrics::{counters, histograms, labels};
use crate::{Error, Result};
use sha2::{Digest, Sha256};
use std::fmt;
use std::net::Shutdown;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Instant;

/// Payload bytes shown in trace logs
const TRACE_PREVIEW: usize = 30;

const TIMED_OUT: &str = "operation timed out";

/// Which side of the handshake a session plays
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EndRole {
    /// Initiates the handshake and validates the server
    Client,
    /// Accepts the handshake; requests a client certificate when trust
    /// anchors are configured
    Server,
}

impl EndRole {
    /// Lowercase name, also used as the metrics label
    pub fn as_str(&self) -> &'static str {
        match self {
            EndRole::Client => labels::ROLE_CLIENT,
            EndRole::Server => labels::ROLE_SERVER,
        }
    }
}

impl fmt::Display for EndRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EndRole {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "client" => Ok(EndRole::Client),
            "server" => Ok(EndRole::Server),
            _ => Err(Error::Config(format!(
                "invalid end role '{}': expected client or server",
                s
            ))),
        }
    }
}

/// Non-error result of a send
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use]
pub enum SendOutcome {
    /// The whole payload was accepted
    Sent,
    /// The peer closed its side; nothing more can be sent
    PeerClosed,
}

/// Session lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Built, handshake not run yet
    Fresh,
    /// Handshake complete; record I/O allowed
    Ready,
    /// Closed, or the handshake failed
    Closed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Fresh => write!(f, "fresh"),
            SessionState::Ready => write!(f, "ready"),
            SessionState::Closed => write!(f, "closed"),
        }
    }
}

/// Builder for a rustls-backed [`SecureSession`]
///
/// # Examples
///
/// ```no_run
/// # fn example() -> secure_channel::Result<()> {
/// use secure_channel::{EndRole, SecureSession};
///
/// let session = SecureSession::builder(EndRole::Server)
///     .cert_key_paths("/etc/scanner/cert.pem", "/etc/scanner/key.pem")
///     .ca_cert_path("/etc/scanner/ca.pem")
///     .build()?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct SessionBuilder {
    role: EndRole,
    paths: CredentialPaths,
    server_name: Option<String>,
}

impl SessionBuilder {
    /// Trust anchors for validating the peer
    pub fn ca_cert_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.paths.ca_cert = Some(path.into());
        self
    }

    /// Local certificate chain and its private key
    pub fn cert_key_paths(mut self, cert: impl Into<PathBuf>, key: impl Into<PathBuf>) -> Self {
        self.paths.cert = Some(cert.into());
        self.paths.key = Some(key.into());
        self
    }

    /// Replace all credential locations at once
    pub fn credential_paths(mut self, paths: CredentialPaths) -> Self {
        self.paths = paths;
        self
    }

    /// Name the server certificate must be valid for (client role only)
    pub fn server_name(mut self, name: impl Into<String>) -> Self {
        self.server_name = Some(name.into());
        self
    }

    /// Initialize the library, load the credentials and create the session.
    ///
    /// Anything acquired before a failing step is released before the error
    /// is returned.
    ///
    /// # Errors
    ///
    /// * [`Error::Config`] for a client without a server name, or an invalid one
    /// * [`Error::Credential`] when a credential file cannot be loaded, or a
    ///   server has no certificate
    pub fn build(self) -> Result<SecureSession> {
        let server_name = match (self.role, self.server_name) {
            (EndRole::Client, None) => {
                return Err(Error::Config("client session requires a server name".into()))
            }
            (_, name) => name,
        };

        let library = LibraryHandle::acquire()?;
        let credentials = Arc::new(CredentialSet::load(&self.paths)?);
        let layer = match (self.role, server_name.as_deref()) {
            (EndRole::Client, Some(name)) => TlsLayer::client(&credentials, name)?,
            _ => TlsLayer::server(&credentials)?,
        };

        tracing::debug!(role = %self.role, "session created");
        Ok(SecureSession {
            layer,
            role: self.role,
            state: SessionState::Fresh,
            credentials,
            _library: library,
        })
    }
}

/// One transport-security session bound to a role and a credential set
pub struct SecureSession<L: RecordLayer = TlsLayer> {
    layer: L,
    role: EndRole,
    state: SessionState,
    credentials: Arc<CredentialSet>,
    _library: LibraryHandle,
}

impl SecureSession {
    /// Start building a rustls-backed session
    pub fn builder(role: EndRole) -> SessionBuilder {
        SessionBuilder {
            role,
            paths: CredentialPaths::default(),
            server_name: None,
        }
    }
}

impl<L: RecordLayer> SecureSession<L> {
    /// Wrap an already constructed record layer
    pub fn from_layer(role: EndRole, layer: L, credentials: Arc<CredentialSet>) -> Result<Self> {
        Ok(Self {
            _library: LibraryHandle::acquire()?,
            layer,
            role,
            state: SessionState::Fresh,
            credentials,
        })
    }

    /// Which side of the handshake this session plays
    pub fn role(&self) -> EndRole {
        self.role
    }

    /// Current lifecycle state
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Whether the handshake has completed
    pub fn is_ready(&self) -> bool {
        self.state == SessionState::Ready
    }

    /// Credentials the session was built from
    pub fn credentials(&self) -> &Arc<CredentialSet> {
        &self.credentials
    }

    /// The underlying record layer
    pub fn layer(&self) -> &L {
        &self.layer
    }

    /// SHA-256 of the peer's leaf certificate, once the handshake is done
    pub fn peer_certificate_fingerprint(&self) -> Option<Vec<u8>> {
        let der = self.layer.peer_certificate()?;
        Some(Sha256::digest(der).to_vec())
    }

    /// Negotiated protocol version, once the handshake is done
    pub fn protocol_version(&self) -> Option<String> {
        self.layer.protocol_version()
    }

    fn ensure_ready(&self, operation: &str) -> Result<()> {
        if self.state != SessionState::Ready {
            return Err(Error::InvalidState {
                expected: format!("ready session for {}", operation),
                actual: self.state.to_string(),
            });
        }
        Ok(())
    }

    /// Run the handshake loop to completion.
    ///
    /// Would-block and interrupted steps are retried immediately. Any other
    /// failure shuts the socket down (best effort) and is terminal; the
    /// session cannot be handshaken again.
    pub fn handshake<T: Transport>(&mut self, io: &mut T) -> Result<()> {
        if self.state != SessionState::Fresh {
            return Err(Error::InvalidState {
                expected: "fresh session for handshake".into(),
                actual: self.state.to_string(),
            });
        }

        let started = Instant::now();
        let failure = loop {
            match self.layer.handshake_step(io) {
                Step::Done(()) => break None,
                Step::Again | Step::Interrupted => continue,
                Step::Rehandshake => {
                    break Some((
                        "unexpected renegotiation request during handshake".to_string(),
                        false,
                    ))
                }
                Step::TimedOut => break Some((TIMED_OUT.to_string(), true)),
                Step::Failed(reason) => break Some((reason, false)),
            }
        };

        if let Some((reason, timed_out)) = failure {
            self.state = SessionState::Closed;
            counters::handshake_failed(self.role.as_str());
            tracing::debug!(role = %self.role, timed_out, "failed to shake hands: {}", reason);
            if let Err(e) = io.shutdown(Shutdown::Both) {
                tracing::warn!("failed to shutdown socket after handshake failure: {}", e);
            }
            return Err(Error::Handshake { reason, timed_out });
        }

        self.state = SessionState::Ready;
        let elapsed = started.elapsed().as_millis() as u64;
        histograms::handshake_duration(self.role.as_str(), elapsed);
        counters::connection_opened(self.role.as_str());
        tracing::debug!(
            role = %self.role,
            elapsed_ms = elapsed,
            version = self.layer.protocol_version().as_deref().unwrap_or("unknown"),
            "shook hands"
        );
        Ok(())
    }

    /// Send the whole payload.
    ///
    /// Returns [`SendOutcome::PeerClosed`] when the record layer reports a
    /// zero-length write. An empty payload succeeds without touching the
    /// record layer.
    pub fn send<T: Transport>(&mut self, io: &mut T, data: &[u8]) -> Result<SendOutcome> {
        self.ensure_ready("send")?;
        if data.is_empty() {
            return Ok(SendOutcome::Sent);
        }

        tracing::trace!(
            len = data.len(),
            head = %String::from_utf8_lossy(&data[..data.len().min(TRACE_PREVIEW)]),
            "send"
        );

        let mut offset = 0;
        while offset < data.len() {
            match self.layer.send_record(io, &data[offset..]) {
                Step::Done(0) => {
                    tracing::debug!(sent = offset, "peer closed connection");
                    counters::bytes_sent(offset as u64);
                    counters::peer_closed();
                    return Ok(SendOutcome::PeerClosed);
                }
                Step::Done(n) => offset += n,
                Step::Interrupted | Step::Again => continue,
                Step::Rehandshake => {
                    // The renegotiation is not driven here; the same write is
                    // simply reissued.
                    tracing::debug!("peer requested rehandshake, retrying write");
                    continue;
                }
                Step::TimedOut => {
                    counters::bytes_sent(offset as u64);
                    return Err(Error::Send(TIMED_OUT.into()));
                }
                Step::Failed(reason) => {
                    counters::bytes_sent(offset as u64);
                    return Err(Error::Send(reason));
                }
            }
        }
        counters::bytes_sent(offset as u64);

        while self.layer.wants_flush() {
            match self.layer.flush(io) {
                Step::Done(()) | Step::Again | Step::Interrupted | Step::Rehandshake => {}
                Step::TimedOut => return Err(Error::Send(TIMED_OUT.into())),
                Step::Failed(reason) => return Err(Error::Send(reason)),
            }
        }

        tracing::debug!(bytes = data.len(), "sent");
        Ok(SendOutcome::Sent)
    }

    /// Exchange close_notify with the peer.
    ///
    /// Retries on interrupted and would-block like the handshake loop.
    pub fn close<T: Transport>(&mut self, io: &mut T) -> Result<()> {
        self.ensure_ready("close")?;
        self.state = SessionState::Closed;

        loop {
            match self.layer.bye(io, CloseDirection::Both) {
                Step::Done(()) => return Ok(()),
                Step::Again | Step::Interrupted | Step::Rehandshake => continue,
                Step::TimedOut => return Err(Error::Close(TIMED_OUT.into())),
                Step::Failed(reason) => return Err(Error::Close(reason)),
            }
        }
    }

    /// Send close_notify without waiting for the peer's.
    ///
    /// Only interruptions are retried. Other failures are logged and
    /// swallowed: this commonly fails when the peer already closed first.
    pub fn close_write<T: Transport>(&mut self, io: &mut T) {
        if self.state != SessionState::Ready {
            self.state = SessionState::Closed;
            return;
        }
        self.state = SessionState::Closed;

        loop {
            match self.layer.bye(io, CloseDirection::Write) {
                Step::Done(()) => return,
                Step::Interrupted => continue,
                Step::Again => {
                    tracing::debug!("close_notify would block, giving up");
                    return;
                }
                Step::Rehandshake => return,
                Step::TimedOut => {
                    tracing::warn!("failed to send close_notify: {}", TIMED_OUT);
                    return;
                }
                Step::Failed(reason) => {
                    tracing::warn!("failed to send close_notify: {}", reason);
                    return;
                }
            }
        }
    }
}

impl<L: RecordLayer + fmt::Debug> fmt::Debug for SecureSession<L> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecureSession")
            .field("role", &self.role)
            .field("state", &self.state)
            .field("layer", &self.layer)
            .field("credentials", &self.credentials)
            .finish()
    }
}
