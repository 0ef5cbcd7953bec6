//! Socket creation and connect
//!
//! Two modes:
//! * [`connect_any`] walks the resolved candidates with blocking connects and
//!   stops at the first success.
//! * [`connect_single`] issues (or checks) one connect on a caller-provided,
//!   usually non-blocking, socket and reports whether it is still in progress.

use crate::resolve::Endpoint;
use crate::{Error, Result};
use socket2::{Domain, Protocol, SockAddr, Socket, TcpKeepalive, Type};
use std::io;
use std::net::{SocketAddr, TcpStream};
use std::time::Duration;

/// Socket-level settings applied to freshly created sockets
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SocketOptions {
    /// Bound for a blocking connect (None = OS default)
    pub connect_timeout: Option<Duration>,
    /// Read and write timeout once connected (None = block indefinitely)
    pub io_timeout: Option<Duration>,
    /// TCP keepalive idle interval (None = OS default)
    pub keepalive_idle: Option<Duration>,
    /// Disable Nagle's algorithm
    pub nodelay: bool,
}

impl SocketOptions {
    /// Apply the post-connect options to a socket
    pub fn apply(&self, socket: &Socket) -> io::Result<()> {
        socket.set_read_timeout(self.io_timeout)?;
        socket.set_write_timeout(self.io_timeout)?;
        if let Some(idle) = self.keepalive_idle {
            socket.set_tcp_keepalive(&TcpKeepalive::new().with_time(idle))?;
        }
        if self.nodelay {
            socket.set_nodelay(true)?;
        }
        Ok(())
    }
}

/// How [`connect_single`] should treat the socket
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectMode {
    /// Issue the connect
    Initiate,
    /// A previous connect reported in-progress; query its pending status
    CheckCompletion,
}

/// Non-error result of a single-endpoint connect
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectProgress {
    /// The socket is connected
    Connected,
    /// The connect has not resolved yet; check again later
    InProgress,
}

/// Create a TCP socket of the right family for `addr`
pub fn new_socket(addr: SocketAddr, nonblocking: bool) -> io::Result<Socket> {
    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
    if nonblocking {
        socket.set_nonblocking(true)?;
    }
    Ok(socket)
}

/// Try each endpoint in order with a blocking connect.
///
/// A fresh socket is created per candidate; a failed candidate's socket is
/// closed before moving on. The error after exhausting the list reflects the
/// last attempt.
pub fn connect_any(endpoints: &[Endpoint], options: &SocketOptions) -> Result<TcpStream> {
    let mut last_failure: Option<(Endpoint, io::Error)> = None;

    for endpoint in endpoints {
        match connect_endpoint(endpoint, options) {
            Ok(stream) => {
                tracing::debug!(%endpoint, "connected");
                return Ok(stream);
            }
            Err(e) => {
                tracing::debug!(%endpoint, error = %e, "connect attempt failed");
                last_failure = Some((*endpoint, e));
            }
        }
    }

    let (target, source) = match last_failure {
        Some((endpoint, e)) => (endpoint.to_string(), e),
        None => (
            "<none>".to_string(),
            io::Error::new(io::ErrorKind::NotFound, "no endpoints to try"),
        ),
    };
    Err(Error::Connect {
        target,
        attempts: endpoints.len(),
        source,
    })
}

fn connect_endpoint(endpoint: &Endpoint, options: &SocketOptions) -> io::Result<TcpStream> {
    let socket = new_socket(endpoint.addr(), false)?;
    let addr = SockAddr::from(endpoint.addr());
    match options.connect_timeout {
        Some(timeout) => socket.connect_timeout(&addr, timeout)?,
        None => socket.connect(&addr)?,
    }
    options.apply(&socket)?;
    Ok(socket.into())
}

/// Drive one connect attempt on `socket`.
///
/// With [`ConnectMode::Initiate`] the connect is issued; a non-blocking
/// socket usually answers [`ConnectProgress::InProgress`]. With
/// [`ConnectMode::CheckCompletion`] the socket's pending error is consumed:
/// none means connected (or, if the peer address is not known yet, still in
/// progress), anything else is the connect failure.
pub fn connect_single(
    socket: &Socket,
    addr: SocketAddr,
    mode: ConnectMode,
) -> Result<ConnectProgress> {
    let failed = |source: io::Error| Error::Connect {
        target: addr.to_string(),
        attempts: 1,
        source,
    };

    match mode {
        ConnectMode::Initiate => match socket.connect(&SockAddr::from(addr)) {
            Ok(()) => {}
            Err(e) if is_in_progress(&e) => return Ok(ConnectProgress::InProgress),
            Err(e) => {
                tracing::warn!(%addr, "failed to connect: {}", e);
                return Err(failed(e));
            }
        },
        ConnectMode::CheckCompletion => {
            let pending = socket.take_error().map_err(|e| {
                tracing::warn!(%addr, "failed to get socket option: {}", e);
                failed(e)
            })?;
            match pending {
                None => {}
                Some(e) if is_in_progress(&e) => return Ok(ConnectProgress::InProgress),
                Some(e) => {
                    tracing::warn!(%addr, "failed to connect (resumed): {}", e);
                    return Err(failed(e));
                }
            }
            match socket.peer_addr() {
                Ok(_) => {}
                Err(e) if e.kind() == io::ErrorKind::NotConnected => {
                    return Ok(ConnectProgress::InProgress)
                }
                Err(e) => return Err(failed(e)),
            }
        }
    }

    tracing::debug!(%addr, "connected");
    Ok(ConnectProgress::Connected)
}

fn is_in_progress(e: &io::Error) -> bool {
    #[cfg(unix)]
    if matches!(e.raw_os_error(), Some(code) if code == libc::EINPROGRESS || code == libc::EALREADY)
    {
        return true;
    }
    e.kind() == io::ErrorKind::WouldBlock
}
