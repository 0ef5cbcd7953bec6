//! Socket handle abstraction
//!
//! The lifecycle and the record layer only need a byte stream plus a few
//! socket controls. [`Transport`] names exactly those, so the retry loops can
//! be driven by an in-memory stream in tests.

use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream};

/// A connected, exclusively owned socket handle
pub trait Transport: Read + Write {
    /// Shut down one or both directions of the socket
    fn shutdown(&self, how: Shutdown) -> io::Result<()>;

    /// Switch between blocking and non-blocking mode
    fn set_nonblocking(&self, nonblocking: bool) -> io::Result<()>;

    /// Whether a read or write timeout is configured.
    ///
    /// A would-block error on a socket with timeouts means the timeout
    /// expired, not that the socket is non-blocking.
    fn has_timeouts(&self) -> bool;

    /// Address of the peer
    fn peer_addr(&self) -> io::Result<SocketAddr>;
}

impl Transport for TcpStream {
    fn shutdown(&self, how: Shutdown) -> io::Result<()> {
        TcpStream::shutdown(self, how)
    }

    fn set_nonblocking(&self, nonblocking: bool) -> io::Result<()> {
        TcpStream::set_nonblocking(self, nonblocking)
    }

    fn has_timeouts(&self) -> bool {
        matches!(self.read_timeout(), Ok(Some(_))) || matches!(self.write_timeout(), Ok(Some(_)))
    }

    fn peer_addr(&self) -> io::Result<SocketAddr> {
        TcpStream::peer_addr(self)
    }
}

/// In-memory transport for exercising the retry loops
#[cfg(test)]
pub(crate) mod mock {
    use super::*;
    use std::cell::{Cell, RefCell};

    #[derive(Debug, Default)]
    pub struct MockTransport {
        pub written: Vec<u8>,
        pub shutdowns: RefCell<Vec<Shutdown>>,
        pub nonblocking: Cell<bool>,
        pub timeouts: bool,
        pub shutdown_error: Option<io::ErrorKind>,
        /// Fail every write with this error
        pub write_error: Option<io::ErrorKind>,
        /// Accept zero bytes on every write
        pub write_closed: bool,
    }

    impl Read for MockTransport {
        fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
            Ok(0)
        }
    }

    impl Write for MockTransport {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            if let Some(kind) = self.write_error {
                return Err(io::Error::from(kind));
            }
            if self.write_closed {
                return Ok(0);
            }
            self.written.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl Transport for MockTransport {
        fn shutdown(&self, how: Shutdown) -> io::Result<()> {
            self.shutdowns.borrow_mut().push(how);
            match self.shutdown_error {
                Some(kind) => Err(io::Error::from(kind)),
                None => Ok(()),
            }
        }

        fn set_nonblocking(&self, nonblocking: bool) -> io::Result<()> {
            self.nonblocking.set(nonblocking);
            Ok(())
        }

        fn has_timeouts(&self) -> bool {
            self.timeouts
        }

        fn peer_addr(&self) -> io::Result<SocketAddr> {
            Ok(SocketAddr::from(([127, 0, 0, 1], 9390)))
        }
    }
}
