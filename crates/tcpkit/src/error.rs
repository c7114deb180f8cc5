//! Error vocabulary and socket error normalization.
//!
//! Every fallible operation in this crate returns [`Error`]. Raw
//! [`io::Error`]s are converted with [`normalize`] (also reachable through
//! `From<io::Error>`, so `?` normalizes at the boundary) which maps the
//! platform error onto a small, closed set of kinds. Errors that do not map
//! onto any kind are passed through untouched as [`Error::Io`].

use std::io;

/// Result alias used throughout the crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Normalized networking errors.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A deadline elapsed before the operation completed.
    #[error("Timedout")]
    Timeout,

    /// Nothing is listening at the dialled endpoint.
    #[error("Connection refused")]
    ConnectionRefused,

    /// The host could not be resolved or reached.
    #[error("Unknown host")]
    UnknownHost,

    /// The peer reset the connection.
    #[error("Reset by peer")]
    ResetByPeer,

    /// A write hit a connection the peer has already closed.
    #[error("Broken pipe, closed remotely")]
    ClosedRemotely,

    /// The listening address is already bound.
    #[error("Address in use")]
    AddressInUse,

    /// The socket was used after it was closed.
    #[error("Connection not open")]
    NoConnection,

    /// The peer closed its side of the stream.
    #[error("End of file/data")]
    EndOfFile,

    /// Fewer bytes than a fixed-size read required were received.
    #[error("Bad data received")]
    BadData,

    /// An argument was missing or malformed.
    #[error("Illegal/missing param")]
    IllegalParam,

    /// No local interface matched the requested filter.
    #[error("Unknown interface")]
    BadInterface,

    /// The local side deliberately ended the exchange.
    #[error("Closed by user")]
    ClosedByUser,

    /// The user asked to exit.
    #[error("User exit request")]
    UserExit,

    /// An I/O error with no semantic mapping.
    #[error(transparent)]
    Io(io::Error),
}

impl Error {
    /// Run the normalizer over an [`Error::Io`] produced outside this crate,
    /// e.g. by a connection handler. Semantic kinds are returned unchanged.
    pub fn normalized(self) -> Self {
        match self {
            Error::Io(err) => normalize(err),
            other => other,
        }
    }

    /// Whether the error marks the end of a conversation rather than a fault.
    pub fn is_end_of_stream(&self) -> bool {
        matches!(self, Error::EndOfFile | Error::ClosedByUser | Error::UserExit)
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        normalize(err)
    }
}

/// Map a raw socket error onto the semantic vocabulary.
///
/// Deadline expiry is recognised before any nested layers are unwrapped.
pub fn normalize(err: io::Error) -> Error {
    if is_deadline(err.kind()) {
        return Error::Timeout;
    }

    let err = match unwrap_layer(err) {
        Layer::Nested(inner) => return normalize(inner),
        Layer::Normalized(err) => return err,
        Layer::Root(err) => err,
    };

    match err.kind() {
        io::ErrorKind::ConnectionRefused => Error::ConnectionRefused,
        io::ErrorKind::HostUnreachable | io::ErrorKind::NetworkUnreachable => Error::UnknownHost,
        io::ErrorKind::ConnectionReset => Error::ResetByPeer,
        io::ErrorKind::BrokenPipe => Error::ClosedRemotely,
        io::ErrorKind::AddrInUse => Error::AddressInUse,
        io::ErrorKind::NotConnected => Error::NoConnection,
        io::ErrorKind::UnexpectedEof => Error::EndOfFile,
        kind => {
            tracing::debug!(?kind, os_error = ?err.raw_os_error(), error = %err, "unrecognised socket error");
            Error::Io(err)
        }
    }
}

fn is_deadline(kind: io::ErrorKind) -> bool {
    // SO_RCVTIMEO/SO_SNDTIMEO expiry surfaces as EAGAIN on Unix
    matches!(kind, io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock)
}

enum Layer {
    Nested(io::Error),
    Normalized(Error),
    Root(io::Error),
}

fn unwrap_layer(err: io::Error) -> Layer {
    let wraps_known = err
        .get_ref()
        .map(|inner| inner.is::<io::Error>() || inner.is::<Error>())
        .unwrap_or(false);
    if !wraps_known {
        return Layer::Root(err);
    }

    let kind = err.kind();
    match err.into_inner() {
        Some(inner) => match inner.downcast::<io::Error>() {
            Ok(inner) => Layer::Nested(*inner),
            Err(inner) => match inner.downcast::<Error>() {
                Ok(inner) => Layer::Normalized(*inner),
                Err(inner) => Layer::Root(io::Error::new(kind, inner)),
            },
        },
        None => Layer::Root(io::Error::from(kind)),
    }
}
