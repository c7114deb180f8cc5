//! Blocking TCP toolkit.
//!
//! * [`Listener`] binds a socket, counts connections and hands each one to a
//!   [`Handler`] on its own thread.
//! * [`StreamIo`] wraps a connection with line, marker-framed record and
//!   fixed-size struct reads and writes, each bounded by a per-call deadline.
//! * [`dial`] opens a client connection.
//! * [`Error`] is the small set of failures every socket error is mapped onto.
//!
//! ```no_run
//! use std::net::SocketAddr;
//! use tcpkit::{Listener, StreamIo};
//!
//! fn echo(_seq: u32, _peer: SocketAddr, stream: &mut StreamIo) -> tcpkit::Result<()> {
//!     loop {
//!         let line = stream.read_string()?;
//!         stream.write_string(&line)?;
//!     }
//! }
//!
//! let listener = Listener::bind("127.0.0.1:7879", None)?;
//! let err = listener.dispatch_loop(echo, None);
//! eprintln!("stopped accepting: {err}");
//! # Ok::<(), tcpkit::Error>(())
//! ```

pub mod client;
pub mod config;
pub mod error;
pub mod interface;
pub mod io;
pub mod listener;
pub mod stream;
pub mod wire;

pub use bytes;

pub use client::dial;
pub use config::{ConfigError, ServerSettings, StreamSettings};
pub use error::{Error, Result, normalize};
pub use interface::find_ipv4;
pub use listener::{Connection, Handler, Listener, Status};
pub use stream::{StreamIo, WriteMode};
pub use wire::{ByteOrder, Wire};
