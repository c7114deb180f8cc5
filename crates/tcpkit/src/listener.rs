//! Listening socket, accept loop and per-connection dispatch.

use std::fmt;
use std::net::{SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::Sender;

use crate::io::TcpTransport;
use crate::stream::{StreamIo, WriteMode};
use crate::{Error, Result};

/// Back-off between accept attempts while no connection is pending.
pub const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Lifecycle events reported to a listener's status sink.
///
/// The `Display` form is the textual status line, e.g. `Con3@127.0.0.1:50122`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Status {
    ListenerCreated,
    ListenerWaiting,
    ListenerClosed,
    Connected {
        seq: u32,
        peer: SocketAddr,
    },
    Disconnected {
        seq: u32,
        peer: SocketAddr,
        error: Option<String>,
    },
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Status::ListenerCreated => f.write_str("Listener Created"),
            Status::ListenerWaiting => f.write_str("Listener Waiting"),
            Status::ListenerClosed => f.write_str("Listener Closed"),
            Status::Connected { seq, peer } => write!(f, "Con{seq}@{peer}"),
            Status::Disconnected { seq, peer, error } => {
                let error = error.as_deref().unwrap_or("nil");
                write!(f, "Dis{seq}@{peer}({error})")
            }
        }
    }
}

/// Services one accepted connection.
///
/// Implemented for any `Fn(u32, SocketAddr, &mut StreamIo) -> Result<()>`
/// that can be shared between threads. The stream is closed after the
/// handler returns.
pub trait Handler: Send + Sync + 'static {
    fn handle(&self, seq: u32, peer: SocketAddr, stream: &mut StreamIo) -> Result<()>;
}

impl<F> Handler for F
where
    F: Fn(u32, SocketAddr, &mut StreamIo) -> Result<()> + Send + Sync + 'static,
{
    fn handle(&self, seq: u32, peer: SocketAddr, stream: &mut StreamIo) -> Result<()> {
        self(seq, peer, stream)
    }
}

#[derive(Debug, Default)]
struct Counters {
    servicing: AtomicU32,
    total: AtomicU32,
}

/// Releases one servicing slot when dropped, including during a panic.
#[derive(Debug)]
pub(crate) struct ServicingGuard(Arc<Counters>);

impl Drop for ServicingGuard {
    fn drop(&mut self) {
        self.0.servicing.fetch_sub(1, Ordering::SeqCst);
    }
}

/// A freshly accepted connection.
///
/// The listener counts it as being serviced until it is dropped, or, once
/// turned into a [`StreamIo`], until that stream is closed or dropped.
#[derive(Debug)]
pub struct Connection {
    stream: TcpStream,
    peer: SocketAddr,
    seq: u32,
    guard: ServicingGuard,
}

impl Connection {
    /// Wrap the connection, handing the servicing slot to the stream.
    pub fn into_stream_io(self, mode: WriteMode) -> Result<StreamIo> {
        let Connection { stream, guard, .. } = self;
        let mut stream = StreamIo::with_mode(TcpTransport::new(stream), mode)?;
        stream.hold_servicing(guard);
        Ok(stream)
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Position of this connection in accept order, starting at 1.
    pub fn seq(&self) -> u32 {
        self.seq
    }
}

/// Owns a bound listening socket and the bookkeeping of its connections.
///
/// All methods take `&self`, so a listener can be shared (e.g. in an `Arc`)
/// and closed from one thread while another is blocked in
/// [`accept_once`](Self::accept_once).
///
/// A status sink that is bounded and never drained will eventually stall
/// accepting and dispatching.
#[derive(Debug)]
pub struct Listener {
    socket: Mutex<Option<TcpListener>>,
    local_addr: SocketAddr,
    timeout: Mutex<Duration>,
    write_mode: WriteMode,
    counters: Arc<Counters>,
    status: Option<Sender<Status>>,
}

impl Listener {
    /// Bind to `endpoint` (`host:port`).
    #[tracing::instrument(skip(status))]
    pub fn bind(endpoint: &str, status: Option<Sender<Status>>) -> Result<Self> {
        let addrs: Vec<SocketAddr> = endpoint
            .to_socket_addrs()
            .map_err(|_| Error::UnknownHost)?
            .collect();
        if addrs.is_empty() {
            return Err(Error::UnknownHost);
        }

        let socket = TcpListener::bind(&addrs[..])?;
        socket.set_nonblocking(true)?;
        let local_addr = socket.local_addr()?;
        tracing::debug!(%local_addr, "listening");

        let listener = Self {
            socket: Mutex::new(Some(socket)),
            local_addr,
            timeout: Mutex::new(Duration::ZERO),
            write_mode: WriteMode::Direct,
            counters: Arc::default(),
            status,
        };
        listener.emit(Status::ListenerCreated);
        Ok(listener)
    }

    /// The address actually bound, useful when binding to port 0.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Deadline for each future accept; zero blocks indefinitely.
    pub fn set_timeout(&self, timeout: Duration) {
        *self.timeout.lock().unwrap_or_else(PoisonError::into_inner) = timeout;
    }

    pub fn timeout(&self) -> Duration {
        *self.timeout.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Write mode of the streams handed to handlers. Defaults to direct.
    pub fn set_write_mode(&mut self, mode: WriteMode) {
        self.write_mode = mode;
    }

    /// `(servicing, total_accepted)`. The two values are read independently.
    pub fn counts(&self) -> (u32, u32) {
        (
            self.counters.servicing.load(Ordering::SeqCst),
            self.counters.total.load(Ordering::SeqCst),
        )
    }

    /// Wait for the next connection.
    ///
    /// Fails with [`Error::Timeout`] once the accept deadline passes and with
    /// [`Error::NoConnection`] if the listener is (or gets) closed.
    pub fn accept_once(&self) -> Result<Connection> {
        let timeout = self.timeout();
        self.emit(Status::ListenerWaiting);

        let started = Instant::now();
        loop {
            if let Some((stream, peer)) = self.try_accept()? {
                stream.set_nonblocking(false)?;
                self.counters.servicing.fetch_add(1, Ordering::SeqCst);
                let seq = self.counters.total.fetch_add(1, Ordering::SeqCst) + 1;
                tracing::debug!(seq, %peer, "accepted connection");
                return Ok(Connection {
                    stream,
                    peer,
                    seq,
                    guard: ServicingGuard(Arc::clone(&self.counters)),
                });
            }

            if !timeout.is_zero() && started.elapsed() >= timeout {
                return Err(Error::Timeout);
            }
            thread::sleep(ACCEPT_POLL_INTERVAL);
        }
    }

    fn try_accept(&self) -> Result<Option<(TcpStream, SocketAddr)>> {
        let socket = self.socket.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(socket) = socket.as_ref() else {
            return Err(Error::NoConnection);
        };
        loop {
            match socket.accept() {
                Ok(accepted) => return Ok(Some(accepted)),
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => return Ok(None),
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Accept connections forever, servicing each on its own thread.
    ///
    /// Handler failures are forwarded to `errors` and never stop the loop.
    /// Returns the error that ended accepting, e.g. [`Error::NoConnection`]
    /// after [`close`](Self::close).
    pub fn dispatch_loop<H: Handler>(&self, handler: H, errors: Option<Sender<Error>>) -> Error {
        let handler = Arc::new(handler);
        loop {
            let connection = match self.accept_once() {
                Ok(connection) => connection,
                Err(e) => {
                    tracing::debug!(error = %e, "dispatch loop finished");
                    return e;
                }
            };

            let (seq, peer) = (connection.seq, connection.peer);
            let handler = Arc::clone(&handler);
            let status = self.status.clone();
            let thread_errors = errors.clone();
            let mode = self.write_mode;

            let spawned = thread::Builder::new()
                .name(format!("tcpkit-conn-{seq}"))
                .spawn(move || {
                    let outcome = service(connection, mode, handler.as_ref(), status.as_ref());
                    if let (Err(e), Some(errors)) = (outcome, thread_errors) {
                        let _ = errors.send(e);
                    }
                });
            if let Err(e) = spawned {
                // the connection went down with the closure
                tracing::warn!(seq, error = %e, "failed to spawn connection thread");
                abandon(seq, peer, Error::Io(e), self.status.as_ref(), errors.as_ref());
            }
        }
    }

    /// Accept one connection and service it on the calling thread.
    pub fn dispatch_once<H: Handler + ?Sized>(&self, handler: &H) -> Result<()> {
        let connection = self.accept_once()?;
        service(connection, self.write_mode, handler, self.status.as_ref())
    }

    /// Close the listening socket. Safe to call more than once.
    pub fn close(&self) {
        let socket = self
            .socket
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if socket.is_some() {
            tracing::debug!(local_addr = %self.local_addr, "listener closed");
        }
        self.emit(Status::ListenerClosed);
    }

    fn emit(&self, status: Status) {
        emit(self.status.as_ref(), status);
    }
}

fn emit(sink: Option<&Sender<Status>>, status: Status) {
    tracing::trace!(%status, "status");
    if let Some(sink) = sink {
        let _ = sink.send(status);
    }
}

fn service<H: Handler + ?Sized>(
    connection: Connection,
    mode: WriteMode,
    handler: &H,
    status: Option<&Sender<Status>>,
) -> Result<()> {
    let (seq, peer) = (connection.seq, connection.peer);
    let _span = tracing::debug_span!("connection", seq, %peer).entered();

    emit(status, Status::Connected { seq, peer });
    // closing the stream releases the servicing slot
    let outcome = connection.into_stream_io(mode).and_then(|mut stream| {
        let handled = handler
            .handle(seq, peer, &mut stream)
            .map_err(Error::normalized);
        let closed = stream.close();
        handled.and(closed)
    });

    if let Err(e) = &outcome {
        tracing::debug!(error = %e, "connection ended with error");
    }
    emit(
        status,
        Status::Disconnected {
            seq,
            peer,
            error: outcome.as_ref().err().map(ToString::to_string),
        },
    );
    outcome
}

/// Report a connection that was accepted but never reached its handler.
fn abandon(
    seq: u32,
    peer: SocketAddr,
    error: Error,
    status: Option<&Sender<Status>>,
    errors: Option<&Sender<Error>>,
) {
    emit(
        status,
        Status::Disconnected {
            seq,
            peer,
            error: Some(error.to_string()),
        },
    );
    if let Some(errors) = errors {
        let _ = errors.send(error);
    }
}
