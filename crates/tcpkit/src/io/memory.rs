//! In-memory transport implementation for testing

use std::io::{self, BufRead, Cursor, Read, Write};
use std::net::SocketAddr;
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};

use super::{ReadHalf, Transport, WriteHalf};

/// In-memory transport for testing
///
/// This transport uses channels for bidirectional communication without
/// requiring actual network connections. Every `write` call arrives at the
/// other end as one chunk, which makes it easy to exercise fragmented
/// input. Read deadlines are honoured; writes never block.
///
/// # Examples
///
/// ```
/// use tcpkit::io::InMemoryTransport;
///
/// let (client, server) = InMemoryTransport::pair();
/// // client writes -> server reads
/// // server writes -> client reads
/// ```
pub struct InMemoryTransport {
    reader: InMemoryReader,
    writer: InMemoryWriter,
}

/// Reader half of in-memory transport
///
/// Receives chunks from a channel and serves them through an internal
/// buffer. Once every sender is gone the reader reports end of stream.
pub struct InMemoryReader {
    buffer: Cursor<Vec<u8>>,
    rx: Receiver<Vec<u8>>,
    timeout: Option<Duration>,
}

/// Writer half of in-memory transport
///
/// Implements [`Write`] by sending data through a channel
pub struct InMemoryWriter {
    tx: Sender<Vec<u8>>,
}

impl InMemoryTransport {
    /// Create a connected pair of in-memory transports
    ///
    /// Returns `(client_transport, server_transport)` where data written to
    /// one can be read from the other.
    pub fn pair() -> (Self, Self) {
        let (client_tx, server_rx) = crossbeam_channel::unbounded();
        let (server_tx, client_rx) = crossbeam_channel::unbounded();

        let client = Self {
            reader: InMemoryReader::new(client_rx),
            writer: InMemoryWriter { tx: client_tx },
        };

        let server = Self {
            reader: InMemoryReader::new(server_rx),
            writer: InMemoryWriter { tx: server_tx },
        };

        (client, server)
    }

    /// Split into the raw halves without wrapping them in a stream.
    pub fn into_halves(self) -> (InMemoryReader, InMemoryWriter) {
        (self.reader, self.writer)
    }
}

impl Transport for InMemoryTransport {
    type Reader = InMemoryReader;
    type Writer = InMemoryWriter;

    fn peer_addr(&self) -> Option<SocketAddr> {
        None
    }

    fn split(self) -> crate::Result<(Self::Reader, Self::Writer)> {
        Ok(self.into_halves())
    }
}

impl InMemoryReader {
    fn new(rx: Receiver<Vec<u8>>) -> Self {
        Self {
            buffer: Cursor::new(Vec::new()),
            rx,
            timeout: None,
        }
    }
}

impl BufRead for InMemoryReader {
    fn fill_buf(&mut self) -> io::Result<&[u8]> {
        // Skip empty chunks so a zero-length write is not mistaken for EOF
        while self.buffer.position() >= self.buffer.get_ref().len() as u64 {
            let received = match self.timeout {
                Some(timeout) => self.rx.recv_timeout(timeout),
                None => self.rx.recv().map_err(|_| RecvTimeoutError::Disconnected),
            };
            match received {
                Ok(data) => self.buffer = Cursor::new(data),
                Err(RecvTimeoutError::Timeout) => {
                    return Err(io::Error::new(
                        io::ErrorKind::TimedOut,
                        "no data before deadline",
                    ));
                }
                // Channel closed, return EOF
                Err(RecvTimeoutError::Disconnected) => return Ok(&[]),
            }
        }

        self.buffer.fill_buf()
    }

    fn consume(&mut self, amt: usize) {
        self.buffer.consume(amt)
    }
}

impl Read for InMemoryReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let available = self.fill_buf()?;
        let len = std::cmp::min(available.len(), buf.len());
        buf[..len].copy_from_slice(&available[..len]);
        self.consume(len);
        Ok(len)
    }
}

impl ReadHalf for InMemoryReader {
    fn set_read_deadline(&mut self, timeout: Option<Duration>) -> io::Result<()> {
        self.timeout = timeout;
        Ok(())
    }
}

impl Write for InMemoryWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.tx
            .send(buf.to_vec())
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "channel disconnected"))?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        // No-op for channels (always immediately flushed)
        Ok(())
    }
}

impl WriteHalf for InMemoryWriter {
    fn set_write_deadline(&mut self, _timeout: Option<Duration>) -> io::Result<()> {
        // unbounded channel, sends never block
        Ok(())
    }
}
