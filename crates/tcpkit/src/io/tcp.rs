//! TCP-based transport implementation

use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::time::Duration;

use super::{ReadHalf, Transport, WriteHalf};

/// TCP-based transport
///
/// Wraps a connected [`TcpStream`]. Splitting clones the socket handle: the
/// reader keeps one handle, the writer the other, and dropping both closes
/// the connection.
///
/// # Examples
///
/// ```no_run
/// use std::net::TcpStream;
/// use tcpkit::io::TcpTransport;
///
/// // Create from existing stream
/// let stream = TcpStream::connect("127.0.0.1:7879")?;
/// let transport = TcpTransport::new(stream);
/// # Ok::<(), std::io::Error>(())
/// ```
pub struct TcpTransport {
    stream: TcpStream,
}

impl TcpTransport {
    /// Create a new TCP transport from an existing stream
    pub fn new(stream: TcpStream) -> Self {
        Self { stream }
    }

    /// Connect to the given address with no connect timeout.
    ///
    /// Use [`crate::dial`] for a timeout and normalized resolution errors.
    pub fn connect(addr: impl ToSocketAddrs) -> crate::Result<Self> {
        let stream = TcpStream::connect(addr)?;
        Ok(Self::new(stream))
    }
}

impl Transport for TcpTransport {
    type Reader = TcpReader;
    type Writer = TcpWriter;

    fn peer_addr(&self) -> Option<SocketAddr> {
        self.stream.peer_addr().ok()
    }

    fn split(self) -> crate::Result<(Self::Reader, Self::Writer)> {
        // reader gets a cloned handle, writer keeps this one
        let input = self.stream.try_clone()?;
        let output = self.stream;

        Ok((TcpReader::new(input), TcpWriter::new(output)))
    }
}

/// Reading handle of a [`TcpTransport`].
pub struct TcpReader {
    stream: TcpStream,
    applied: Option<Option<Duration>>,
}

impl TcpReader {
    fn new(stream: TcpStream) -> Self {
        Self {
            stream,
            applied: None,
        }
    }
}

impl Read for TcpReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.stream.read(buf)
    }
}

impl ReadHalf for TcpReader {
    fn set_read_deadline(&mut self, timeout: Option<Duration>) -> io::Result<()> {
        // SO_RCVTIMEO is re-armed by the kernel for every recv, so the
        // option only needs touching when the value changes
        if self.applied != Some(timeout) {
            self.stream.set_read_timeout(timeout)?;
            self.applied = Some(timeout);
        }
        Ok(())
    }
}

/// Writing handle of a [`TcpTransport`].
pub struct TcpWriter {
    stream: TcpStream,
    applied: Option<Option<Duration>>,
}

impl TcpWriter {
    fn new(stream: TcpStream) -> Self {
        Self {
            stream,
            applied: None,
        }
    }
}

impl Write for TcpWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.stream.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.stream.flush()
    }
}

impl WriteHalf for TcpWriter {
    fn set_write_deadline(&mut self, timeout: Option<Duration>) -> io::Result<()> {
        if self.applied != Some(timeout) {
            self.stream.set_write_timeout(timeout)?;
            self.applied = Some(timeout);
        }
        Ok(())
    }
}
