//! Line, record and struct oriented I/O over a single connection.

use std::fmt;
use std::io::{self, BufRead, BufReader, BufWriter, Read, Write};
use std::net::SocketAddr;
use std::time::Duration;

use crate::config::StreamSettings;
use crate::io::{ReadHalf, Transport, WriteHalf};
use crate::listener::ServicingGuard;
use crate::wire::{self, ByteOrder, Wire};
use crate::{Error, Result};

/// Default end-of-line byte for [`StreamIo::read_bytes`].
pub const DEFAULT_EOL: u8 = b'\n';

/// How writes reach the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WriteMode {
    /// Every write goes straight to the connection.
    #[default]
    Direct,
    /// Writes accumulate until [`StreamIo::flush`] or [`StreamIo::close`].
    Buffered,
}

/// Outgoing half of a stream. One strategy per [`WriteMode`].
trait Outbound: Send {
    fn set_deadline(&mut self, timeout: Option<Duration>) -> io::Result<()>;
    fn write_all(&mut self, data: &[u8]) -> io::Result<()>;
    fn flush(&mut self) -> io::Result<()>;
}

struct DirectWriter<W>(W);

impl<W: WriteHalf> Outbound for DirectWriter<W> {
    fn set_deadline(&mut self, timeout: Option<Duration>) -> io::Result<()> {
        self.0.set_write_deadline(timeout)
    }

    fn write_all(&mut self, data: &[u8]) -> io::Result<()> {
        self.0.write_all(data)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

struct BufferedWriter<W: Write>(BufWriter<W>);

impl<W: WriteHalf> Outbound for BufferedWriter<W> {
    fn set_deadline(&mut self, timeout: Option<Duration>) -> io::Result<()> {
        self.0.get_mut().set_write_deadline(timeout)
    }

    fn write_all(&mut self, data: &[u8]) -> io::Result<()> {
        self.0.write_all(data)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.0.flush()
    }
}

struct Inner {
    reader: BufReader<Box<dyn ReadHalf>>,
    writer: Box<dyn Outbound>,
}

/// Buffered, deadline-aware wrapper around one connection.
///
/// Reads are always buffered. Writes are either direct or buffered
/// depending on the [`WriteMode`] chosen at construction.
///
/// Timeouts are per underlying call: each read or write system call gets the
/// full timeout, so an operation made of many calls (e.g.
/// [`read_record`](Self::read_record)) has no overall bound. A zero timeout
/// disables the deadline.
pub struct StreamIo {
    inner: Option<Inner>,
    peer: Option<SocketAddr>,
    mode: WriteMode,
    eol: u8,
    read_timeout: Duration,
    write_timeout: Duration,
    servicing: Option<ServicingGuard>,
}

impl StreamIo {
    /// Wrap a transport with direct (unbuffered) writes.
    pub fn new<T: Transport>(transport: T) -> Result<Self> {
        Self::with_mode(transport, WriteMode::Direct)
    }

    /// Wrap a transport with buffered writes; call [`flush`](Self::flush)
    /// to push data out.
    pub fn buffered<T: Transport>(transport: T) -> Result<Self> {
        Self::with_mode(transport, WriteMode::Buffered)
    }

    pub fn with_mode<T: Transport>(transport: T, mode: WriteMode) -> Result<Self> {
        let peer = transport.peer_addr();
        let (reader, writer) = transport.split()?;

        let writer: Box<dyn Outbound> = match mode {
            WriteMode::Direct => Box::new(DirectWriter(writer)),
            WriteMode::Buffered => Box::new(BufferedWriter(BufWriter::new(writer))),
        };
        let reader: Box<dyn ReadHalf> = Box::new(reader);

        Ok(Self {
            inner: Some(Inner {
                reader: BufReader::new(reader),
                writer,
            }),
            peer,
            mode,
            eol: DEFAULT_EOL,
            read_timeout: Duration::ZERO,
            write_timeout: Duration::ZERO,
            servicing: None,
        })
    }

    /// Keep `guard` until this stream is closed or dropped.
    pub(crate) fn hold_servicing(&mut self, guard: ServicingGuard) {
        self.servicing = Some(guard);
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer
    }

    pub fn write_mode(&self) -> WriteMode {
        self.mode
    }

    pub fn is_closed(&self) -> bool {
        self.inner.is_none()
    }

    pub fn eol(&self) -> u8 {
        self.eol
    }

    /// Set the delimiter used by [`read_bytes`](Self::read_bytes).
    pub fn set_eol(&mut self, eol: u8) {
        self.eol = eol;
    }

    pub fn read_timeout(&self) -> Duration {
        self.read_timeout
    }

    /// Inactivity bound for each underlying read; zero means no deadline.
    pub fn set_read_timeout(&mut self, timeout: Duration) {
        self.read_timeout = timeout;
    }

    pub fn write_timeout(&self) -> Duration {
        self.write_timeout
    }

    /// Inactivity bound for each underlying write; zero means no deadline.
    pub fn set_write_timeout(&mut self, timeout: Duration) {
        self.write_timeout = timeout;
    }

    /// Apply timeouts and EOL from loaded settings.
    pub fn configure(&mut self, settings: &StreamSettings) {
        self.set_eol(settings.eol);
        self.set_read_timeout(settings.read_timeout());
        self.set_write_timeout(settings.write_timeout());
    }

    fn reader(&mut self) -> Result<&mut BufReader<Box<dyn ReadHalf>>> {
        let timeout = deadline(self.read_timeout);
        let inner = self.inner.as_mut().ok_or(Error::NoConnection)?;
        inner.reader.get_mut().set_read_deadline(timeout)?;
        Ok(&mut inner.reader)
    }

    fn writer(&mut self) -> Result<&mut dyn Outbound> {
        let timeout = deadline(self.write_timeout);
        let inner = self.inner.as_mut().ok_or(Error::NoConnection)?;
        inner.writer.set_deadline(timeout)?;
        Ok(inner.writer.as_mut())
    }

    /// Read a single byte.
    pub fn read_byte(&mut self) -> Result<u8> {
        let mut byte = [0u8; 1];
        self.reader()?.read_exact(&mut byte)?;
        Ok(byte[0])
    }

    /// Read whatever is available, up to `buf.len()` bytes.
    ///
    /// Returns [`Error::EndOfFile`] when the peer has closed the stream.
    pub fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        let reader = self.reader()?;
        loop {
            match reader.read(buf) {
                Ok(0) => return Err(Error::EndOfFile),
                Ok(n) => return Ok(n),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Read up to and including the configured EOL byte.
    ///
    /// If the stream ends first, the bytes read so far are returned and the
    /// next call fails with [`Error::EndOfFile`].
    pub fn read_bytes(&mut self) -> Result<Vec<u8>> {
        let eol = self.eol;
        self.read_until(eol)
    }

    /// Read up to and including `\n`, whatever the configured EOL byte.
    pub fn read_string(&mut self) -> Result<String> {
        let line = self.read_until(b'\n')?;
        String::from_utf8(line).map_err(|_| Error::BadData)
    }

    fn read_until(&mut self, delimiter: u8) -> Result<Vec<u8>> {
        let mut line = Vec::new();
        match self.reader()?.read_until(delimiter, &mut line)? {
            0 => Err(Error::EndOfFile),
            _ => Ok(line),
        }
    }

    /// Discard input up to and including `marker`. An empty marker is a no-op.
    #[tracing::instrument(skip(self), level = "trace")]
    pub fn find_start(&mut self, marker: &[u8]) -> Result<()> {
        if marker.is_empty() {
            return Ok(());
        }
        let mut matcher = MarkerMatcher::new(marker);
        loop {
            let byte = self.read_byte()?;
            if let Step::Matched = matcher.feed(byte) {
                return Ok(());
            }
        }
    }

    /// Read a record delimited by `end`, optionally discarding everything up
    /// to `start` first. The end marker is not part of the result.
    ///
    /// When the end marker only partly matches, the matched bytes and the
    /// byte that broke the match are kept as payload and matching starts
    /// over.
    #[tracing::instrument(skip(self), level = "trace")]
    pub fn read_record(&mut self, start: &[u8], end: &[u8]) -> Result<Vec<u8>> {
        if end.is_empty() {
            return Err(Error::IllegalParam);
        }
        self.find_start(start)?;

        let mut record = Vec::new();
        let mut matcher = MarkerMatcher::new(end);
        loop {
            let byte = self.read_byte()?;
            match matcher.feed(byte) {
                Step::Matched => return Ok(record),
                Step::Pending => {}
                Step::Broken { held } => {
                    record.extend_from_slice(&end[..held]);
                    record.push(byte);
                }
            }
        }
    }

    /// Read exactly `len` bytes following `start` (if non-empty).
    ///
    /// A stream that ends part way through yields the shorter record.
    #[tracing::instrument(skip(self), level = "trace")]
    pub fn read_sized_record(&mut self, start: &[u8], len: usize) -> Result<Vec<u8>> {
        self.find_start(start)?;

        let mut record = vec![0u8; len];
        let filled = self.fill(&mut record)?;
        if filled == 0 && len > 0 {
            return Err(Error::EndOfFile);
        }
        record.truncate(filled);
        Ok(record)
    }

    /// Read and decode a fixed-size value.
    ///
    /// Fails with [`Error::BadData`] if the stream ends part way through.
    pub fn read_struct<T: Wire>(&mut self, order: ByteOrder) -> Result<T> {
        let mut data = vec![0u8; T::SIZE];
        if T::SIZE > 0 {
            match self.fill(&mut data)? {
                0 => return Err(Error::EndOfFile),
                n if n < T::SIZE => return Err(Error::BadData),
                _ => {}
            }
        }
        Ok(T::get(&mut data.as_slice(), order))
    }

    /// Read until `buf` is full or the stream ends, returning the count.
    fn fill(&mut self, buf: &mut [u8]) -> Result<usize> {
        let mut filled = 0;
        while filled < buf.len() {
            match self.read(&mut buf[filled..]) {
                Ok(n) => filled += n,
                Err(Error::EndOfFile) => break,
                Err(e) => return Err(e),
            }
        }
        Ok(filled)
    }

    pub fn write(&mut self, data: &[u8]) -> Result<()> {
        self.writer()?.write_all(data)?;
        Ok(())
    }

    pub fn write_byte(&mut self, byte: u8) -> Result<()> {
        self.write(&[byte])
    }

    pub fn write_string(&mut self, s: &str) -> Result<()> {
        self.write(s.as_bytes())
    }

    /// Encode `value` in `order` and send it.
    pub fn write_struct<T: Wire>(&mut self, order: ByteOrder, value: &T) -> Result<()> {
        if T::SIZE == 0 {
            return Ok(());
        }
        self.write(&wire::encode(value, order))
    }

    /// Push buffered writes to the connection. A no-op in direct mode.
    pub fn flush(&mut self) -> Result<()> {
        self.writer()?.flush()?;
        Ok(())
    }

    /// Flush any buffered writes and close the connection.
    ///
    /// Closing twice is a no-op; any other call after close fails with
    /// [`Error::NoConnection`]. A stream made from an accepted
    /// [`Connection`](crate::Connection) stops counting as serviced here.
    pub fn close(&mut self) -> Result<()> {
        let Some(mut inner) = self.inner.take() else {
            return Ok(());
        };
        let flushed = inner
            .writer
            .set_deadline(deadline(self.write_timeout))
            .and_then(|_| inner.writer.flush());
        drop(inner);
        self.servicing = None;

        let result = flushed.map_err(Error::from);
        tracing::debug!(peer = ?self.peer, outcome = ?result, "connection closed");
        result
    }
}

impl fmt::Debug for StreamIo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamIo")
            .field("peer", &self.peer)
            .field("mode", &self.mode)
            .field("eol", &self.eol)
            .field("read_timeout", &self.read_timeout)
            .field("write_timeout", &self.write_timeout)
            .field("closed", &self.is_closed())
            .finish()
    }
}

fn deadline(timeout: Duration) -> Option<Duration> {
    (!timeout.is_zero()).then_some(timeout)
}

enum Step {
    Matched,
    Pending,
    /// The match broke after `held` marker bytes had matched.
    Broken { held: usize },
}

/// Naive streaming matcher: any mismatch drops the match index back to zero.
struct MarkerMatcher<'m> {
    marker: &'m [u8],
    matched: usize,
}

impl<'m> MarkerMatcher<'m> {
    fn new(marker: &'m [u8]) -> Self {
        debug_assert!(!marker.is_empty());
        Self { marker, matched: 0 }
    }

    fn feed(&mut self, byte: u8) -> Step {
        if byte == self.marker[self.matched] {
            self.matched += 1;
            if self.matched == self.marker.len() {
                self.matched = 0;
                return Step::Matched;
            }
            return Step::Pending;
        }
        let held = self.matched;
        self.matched = 0;
        Step::Broken { held }
    }
}
