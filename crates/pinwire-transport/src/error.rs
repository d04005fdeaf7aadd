//! Error types for connection establishment and probing.

use thiserror::Error;

use crate::tls::PinnedCertError;

/// Result type alias for transport operations.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Errors surfaced by establishment, certificate download, and probing.
///
/// Every variant carries the server address so callers can tell which
/// backend and which phase failed.
#[derive(Debug, Error)]
pub enum Error {
    /// The dialer could not open a connection.
    #[error("dial {address}: {source}")]
    Dial {
        address: String,
        #[source]
        source: std::io::Error,
    },

    /// The host part of the address cannot be used as a TLS server name.
    #[error("invalid server address '{address}': {reason}")]
    InvalidAddress { address: String, reason: String },

    /// The configured pinned certificate is missing or unusable. This is a
    /// configuration problem, not a network one.
    #[error("invalid pinned certificate for {address}: {source}")]
    PinnedCertificate {
        address: String,
        #[source]
        source: PinnedCertError,
    },

    /// The server sent certificate bytes that do not parse as X.509.
    #[error("failed to parse certificate from {address}: {reason}")]
    CertificateParse { address: String, reason: String },

    /// The server chain does not verify against the pinned certificate.
    #[error("certificate from {address} does not verify against the pinned certificate: {source}")]
    CertificateVerification {
        address: String,
        #[source]
        source: rustls::Error,
    },

    /// The server completed (or aborted) a handshake without presenting a certificate.
    #[error("no certificate presented by {address}")]
    NoCertificate { address: String },

    /// The TLS handshake failed for a reason other than certificate checks.
    #[error("tls handshake with {address}: {source}")]
    Handshake {
        address: String,
        #[source]
        source: std::io::Error,
    },

    /// The rustls client configuration could not be built.
    #[error("tls configuration for {address}: {source}")]
    TlsConfig {
        address: String,
        #[source]
        source: rustls::Error,
    },

    /// Reading from or writing to an established connection failed.
    #[error("communication with {address}: {source}")]
    Io {
        address: String,
        #[source]
        source: std::io::Error,
    },

    /// The transport works but the server does not speak the expected protocol.
    #[error("{address} is not a compatible server: {reason}")]
    ProtocolCheck { address: String, reason: String },

    /// The liveness check thread could not be started.
    #[error("failed to start liveness check for {address}: {source}")]
    Spawn {
        address: String,
        #[source]
        source: std::io::Error,
    },
}

impl Error {
    /// Address of the server the error relates to.
    pub fn address(&self) -> &str {
        match self {
            Error::Dial { address, .. }
            | Error::InvalidAddress { address, .. }
            | Error::PinnedCertificate { address, .. }
            | Error::CertificateParse { address, .. }
            | Error::CertificateVerification { address, .. }
            | Error::NoCertificate { address }
            | Error::Handshake { address, .. }
            | Error::TlsConfig { address, .. }
            | Error::Io { address, .. }
            | Error::ProtocolCheck { address, .. }
            | Error::Spawn { address, .. } => address,
        }
    }

    /// Whether the server could not be reached at the transport level, as
    /// opposed to being reachable but incompatible or misconfigured.
    ///
    /// A handshake that failed on TLS protocol data (rustls reports those as
    /// `InvalidData`) reached a server that does not speak TLS; any other
    /// handshake failure is the connection itself dropping or timing out.
    pub fn is_unreachable(&self) -> bool {
        match self {
            Error::Dial { .. } | Error::Io { .. } => true,
            Error::Handshake { source, .. } => source.kind() != std::io::ErrorKind::InvalidData,
            _ => false,
        }
    }
}
