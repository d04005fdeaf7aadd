//! Plain TCP or pinned-TLS connections to a single server.
//!
//! [`establish_connection`] dials through a [`Dialer`] and, for TLS servers,
//! completes the handshake before returning so certificate problems surface
//! here rather than on the first read or write.
//!
//! ```text
//! establish_connection(server, dialer)
//!   → tls?      build trust pool from pinned PEM   (PinnedCertificate)
//!   → dialer.dial(address)                         (Dial)
//!   → tls?      rustls handshake + PinnedCertVerifier
//!                                                  (CertificateParse / CertificateVerification /
//!                                                   NoCertificate / Handshake)
//!   → Connection (Read + Write + close)
//! ```

use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpStream};
use std::sync::Arc;

use pinwire_core::ServerInfo;
use tracing::debug;

use crate::dialer::Dialer;
use crate::error::{Error, Result};
use crate::tls::{self, PinnedCertError, PinnedCertVerifier};

// ── Transport ────────────────────────────────────────────────────────

/// Underlying transport: plain TCP or TLS over TCP.
enum Transport {
    /// Unencrypted TCP stream.
    Plain(TcpStream),
    /// TLS-encrypted TCP stream via `rustls`.
    Tls(Box<rustls::StreamOwned<rustls::ClientConnection, TcpStream>>),
}

// ── Connection ───────────────────────────────────────────────────────

/// An established connection. The owner is responsible for calling
/// [`Connection::close`]; dropping it also releases the socket.
pub struct Connection {
    address: String,
    transport: Transport,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("address", &self.address)
            .field("tls", &self.is_tls())
            .finish()
    }
}

impl Connection {
    fn plain(address: &str, stream: TcpStream) -> Self {
        Self {
            address: address.to_string(),
            transport: Transport::Plain(stream),
        }
    }

    fn tls(address: &str, stream: rustls::StreamOwned<rustls::ClientConnection, TcpStream>) -> Self {
        Self {
            address: address.to_string(),
            transport: Transport::Tls(Box::new(stream)),
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn is_tls(&self) -> bool {
        matches!(self.transport, Transport::Tls(_))
    }

    /// Get a reference to the underlying TCP stream (regardless of TLS layer).
    fn tcp_stream(&self) -> &TcpStream {
        match &self.transport {
            Transport::Plain(s) => s,
            Transport::Tls(s) => &s.sock,
        }
    }

    /// A second handle on the socket that can shut it down from another
    /// thread, unblocking a pending read.
    pub fn shutdown_handle(&self) -> io::Result<TcpStream> {
        self.tcp_stream().try_clone()
    }

    /// Send `close_notify` (TLS) and shut the socket down in both directions.
    /// Safe to call more than once.
    pub fn close(&mut self) {
        if let Transport::Tls(stream) = &mut self.transport {
            stream.conn.send_close_notify();
            let _ = stream.flush();
        }
        let _ = self.tcp_stream().shutdown(Shutdown::Both);
        debug!(address = %self.address, "connection closed");
    }
}

impl Read for Connection {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match &mut self.transport {
            Transport::Plain(stream) => stream.read(buf),
            Transport::Tls(stream) => stream.read(buf),
        }
    }
}

impl Write for Connection {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match &mut self.transport {
            Transport::Plain(stream) => stream.write(buf),
            Transport::Tls(stream) => stream.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match &mut self.transport {
            Transport::Plain(stream) => stream.flush(),
            Transport::Tls(stream) => stream.flush(),
        }
    }
}

// ── Establishment ────────────────────────────────────────────────────

/// Connect to `server` through `dialer`.
///
/// A socket that was opened but failed the TLS handshake is shut down before
/// the error is returned.
pub fn establish_connection(server: &ServerInfo, dialer: &dyn Dialer) -> Result<Connection> {
    if server.tls {
        establish_tls(server, dialer)
    } else {
        let stream = dial(&server.address, dialer)?;
        debug!(address = %server.address, tls = false, "established connection");
        Ok(Connection::plain(&server.address, stream))
    }
}

pub(crate) fn dial(address: &str, dialer: &dyn Dialer) -> Result<TcpStream> {
    dialer.dial(address).map_err(|source| Error::Dial {
        address: address.to_string(),
        source,
    })
}

fn establish_tls(server: &ServerInfo, dialer: &dyn Dialer) -> Result<Connection> {
    let address = server.address.as_str();
    let pinned_error = |source| Error::PinnedCertificate {
        address: address.to_string(),
        source,
    };

    // Fresh trust pool per attempt.
    let pem = server
        .pinned_cert
        .as_deref()
        .filter(|pem| !pem.trim().is_empty())
        .ok_or_else(|| pinned_error(PinnedCertError::Missing))?;
    let verifier = PinnedCertVerifier::from_pem(pem).map_err(pinned_error)?;

    let config = tls::client_config(Arc::new(verifier)).map_err(|source| Error::TlsConfig {
        address: address.to_string(),
        source,
    })?;
    let name = tls::server_name(address, server.host())?;
    let mut conn =
        rustls::ClientConnection::new(Arc::new(config), name).map_err(|source| Error::TlsConfig {
            address: address.to_string(),
            source,
        })?;

    let mut sock = dial(address, dialer)?;
    if let Err(e) = tls::complete_handshake(&mut conn, &mut sock) {
        let _ = sock.shutdown(Shutdown::Both);
        return Err(tls::classify_handshake_error(address, e));
    }

    debug!(%address, tls = true, "established connection");
    Ok(Connection::tls(address, rustls::StreamOwned::new(conn, sock)))
}
