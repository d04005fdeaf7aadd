//! Dialer abstraction.
//!
//! Everything in this crate opens sockets through a [`Dialer`], so a caller
//! can route connections through a SOCKS proxy (or anything else that ends
//! in a connected [`TcpStream`]) without the transport code knowing.

use std::io;
use std::net::{TcpStream, ToSocketAddrs};
use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

/// Opens TCP connections to `host:port` addresses.
///
/// The result must be a connected [`TcpStream`]: connections are closed from
/// other threads through a cloned socket handle. A proxy dialer therefore has
/// to hand back the TCP connection to the proxy (e.g. after a SOCKS
/// handshake), not an in-process stream type.
pub trait Dialer: Send + Sync {
    fn dial(&self, address: &str) -> io::Result<TcpStream>;
}

impl<D: Dialer + ?Sized> Dialer for Arc<D> {
    fn dial(&self, address: &str) -> io::Result<TcpStream> {
        (**self).dial(address)
    }
}

/// Connects directly, without a proxy.
///
/// Both timeouts are unset by default. `io_timeout` becomes the socket read
/// and write timeout, which also bounds the TLS handshake.
#[derive(Debug, Clone, Default)]
pub struct DirectDialer {
    connect_timeout: Option<Duration>,
    io_timeout: Option<Duration>,
}

impl DirectDialer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder method: bound each connection attempt.
    pub fn with_connect_timeout(self, timeout: Duration) -> Self {
        Self {
            connect_timeout: Some(timeout),
            ..self
        }
    }

    /// Builder method: bound every blocking read and write on dialed sockets.
    pub fn with_io_timeout(self, timeout: Duration) -> Self {
        Self {
            io_timeout: Some(timeout),
            ..self
        }
    }

    fn connect(&self, address: &str) -> io::Result<TcpStream> {
        let Some(timeout) = self.connect_timeout else {
            return TcpStream::connect(address);
        };

        // connect_timeout takes a single SocketAddr, so walk the resolved
        // addresses the way TcpStream::connect does.
        let mut last_err = None;
        for addr in address.to_socket_addrs()? {
            match TcpStream::connect_timeout(&addr, timeout) {
                Ok(stream) => return Ok(stream),
                Err(e) => last_err = Some(e),
            }
        }
        Err(last_err.unwrap_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("no address found for {address}"),
            )
        }))
    }
}

impl Dialer for DirectDialer {
    fn dial(&self, address: &str) -> io::Result<TcpStream> {
        let stream = self.connect(address)?;
        stream.set_read_timeout(self.io_timeout)?;
        stream.set_write_timeout(self.io_timeout)?;
        // Request/response traffic; don't batch small writes.
        if let Err(e) = stream.set_nodelay(true) {
            debug!(%address, error = %e, "failed to set TCP_NODELAY");
        }
        debug!(%address, "dialed");
        Ok(stream)
    }
}
