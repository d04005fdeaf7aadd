//! Server descriptors.

use std::fmt;

use serde::{Deserialize, Serialize};

/// One candidate server.
///
/// `pinned_cert` is only consulted when `tls` is set; a TLS server without a
/// pinned certificate cannot be connected to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerInfo {
    /// `host:port` as handed to the dialer.
    pub address: String,
    /// Whether the connection is wrapped in TLS.
    #[serde(default)]
    pub tls: bool,
    /// PEM-encoded certificate the server's chain must verify against.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pinned_cert: Option<String>,
}

impl ServerInfo {
    /// A plain TCP server.
    pub fn plain(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            tls: false,
            pinned_cert: None,
        }
    }

    /// A TLS server whose chain must verify against `pinned_cert`.
    pub fn tls(address: impl Into<String>, pinned_cert: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            tls: true,
            pinned_cert: Some(pinned_cert.into()),
        }
    }

    /// Short transport marker used in backend names: `s` for TLS, `p` for plain.
    pub fn transport_suffix(&self) -> &'static str {
        if self.tls { "s" } else { "p" }
    }

    /// Host part of the address, with IPv6 brackets removed.
    pub fn host(&self) -> &str {
        host_of(&self.address)
    }
}

/// Host part of a `host:port` address, with IPv6 brackets removed. An address
/// without a port is returned unchanged.
pub fn host_of(address: &str) -> &str {
    if let Some(rest) = address.strip_prefix('[') {
        return rest.split_once(']').map_or(rest, |(host, _)| host);
    }
    match address.rsplit_once(':') {
        Some((host, port)) if !host.contains(':') && port.parse::<u16>().is_ok() => host,
        _ => address,
    }
}

impl fmt::Display for ServerInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.address, self.transport_suffix())
    }
}
