use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::time::Duration;

use crate::io::TcpTransport;
use crate::stream::{StreamIo, WriteMode};
use crate::{Error, Result};

/// Connect to `endpoint` (`host:port`) and wrap the connection.
///
/// A zero `timeout` leaves the connect attempt unbounded. When the endpoint
/// resolves to several addresses each is tried in turn and the last failure
/// is returned.
#[tracing::instrument]
pub fn dial(endpoint: &str, timeout: Duration, buffered: bool) -> Result<StreamIo> {
    let addrs: Vec<SocketAddr> = endpoint
        .to_socket_addrs()
        .map_err(|e| {
            tracing::debug!(error = %e, "failed to resolve endpoint");
            Error::UnknownHost
        })?
        .collect();

    let mut last_error = Error::UnknownHost;
    for addr in addrs {
        let attempt = if timeout.is_zero() {
            TcpStream::connect(addr)
        } else {
            TcpStream::connect_timeout(&addr, timeout)
        };
        match attempt {
            Ok(stream) => {
                tracing::debug!(%addr, "connected");
                let mode = if buffered {
                    WriteMode::Buffered
                } else {
                    WriteMode::Direct
                };
                return StreamIo::with_mode(TcpTransport::new(stream), mode);
            }
            Err(e) => {
                tracing::debug!(%addr, error = %e, "connect attempt failed");
                last_error = e.into();
            }
        }
    }
    Err(last_error)
}
