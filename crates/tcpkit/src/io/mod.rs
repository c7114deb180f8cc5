//! IO abstraction layer for connections
//!
//! This module provides an abstraction over the byte pipes a
//! [`StreamIo`](crate::StreamIo) can sit on. The core trait [`Transport`]
//! splits a connection into a read half and a write half, each of which
//! accepts a per-call deadline.
//!
//! # Examples
//!
//! ## Using TCP Transport
//!
//! ```no_run
//! use tcpkit::io::TcpTransport;
//! use tcpkit::StreamIo;
//!
//! let transport = TcpTransport::connect("127.0.0.1:7879")?;
//! let mut stream = StreamIo::new(transport)?;
//! stream.write_string("light\n")?;
//! # Ok::<(), tcpkit::Error>(())
//! ```
//!
//! ## Using In-Memory Transport for Testing
//!
//! ```
//! use tcpkit::io::InMemoryTransport;
//! use tcpkit::StreamIo;
//!
//! let (client, server) = InMemoryTransport::pair();
//! let mut client = StreamIo::new(client)?;
//! let mut server = StreamIo::new(server)?;
//! client.write_string("ping\n")?;
//! assert_eq!(server.read_string()?, "ping\n");
//! # Ok::<(), tcpkit::Error>(())
//! ```

use std::io::{Read, Write};
use std::net::SocketAddr;
use std::time::Duration;

mod memory;
mod tcp;


pub use memory::{InMemoryReader, InMemoryTransport, InMemoryWriter};
pub use tcp::{TcpReader, TcpTransport, TcpWriter};

/// Read half of a transport.
///
/// A timeout of `None` means reads block until data arrives or the
/// connection closes. An expired timeout must surface as an error of kind
/// `TimedOut` or `WouldBlock`.
pub trait ReadHalf: Read + Send + 'static {
    /// Bound the next underlying read call.
    fn set_read_deadline(&mut self, timeout: Option<Duration>) -> std::io::Result<()>;
}

/// Write half of a transport.
pub trait WriteHalf: Write + Send + 'static {
    /// Bound the next underlying write call.
    fn set_write_deadline(&mut self, timeout: Option<Duration>) -> std::io::Result<()>;
}

/// Trait for bidirectional byte transports
///
/// Implementations must provide a way to split the transport into separate
/// reader and writer halves. Both halves must be `Send + 'static` so a
/// connection can be handed to the thread that services it.
pub trait Transport: Send + 'static {
    /// The reader type
    type Reader: ReadHalf;

    /// The writer type
    type Writer: WriteHalf;

    /// Address of the remote end, if the transport has one.
    fn peer_addr(&self) -> Option<SocketAddr>;

    /// Split the transport into separate reader and writer halves
    ///
    /// - For TCP: Creates cloned handles to the same underlying socket
    /// - For in-memory: Returns the two ends of a bidirectional channel
    ///
    /// # Errors
    ///
    /// Returns an error if the transport cannot be split (e.g., socket cloning fails)
    fn split(self) -> crate::Result<(Self::Reader, Self::Writer)>;
}
