//! pinwire-transport: pinned-certificate connections to untrusted-CA servers.
//!
//! Servers in this world are usually self-signed and reached by IP or onion
//! address, so the usual WebPKI rules do not apply. A TLS server is trusted
//! iff its chain verifies against a certificate pinned in configuration; the
//! hostname is never checked.
//!
//! # Architecture
//!
//! ```text
//!   ServerInfo ──register_backends──→ [Backend]  ──→ failover client
//!       │                                │
//!       │                    Backend::establish
//!       ▼                                ▼
//!   download_certificate     establish_connection ──→ Dialer::dial
//!   (accept-any, keep leaf)      │
//!                                ├── plain: TcpStream
//!                                └── tls:   rustls + PinnedCertVerifier
//!
//!   check_server ──→ establish + close ──→ race(ErrorSink, LivenessClient)
//! ```
//!
//! All I/O is blocking. The only thread spawned by this crate is the liveness
//! check worker inside [`check_server`].

pub mod backend;
pub mod connection;
pub mod dialer;
pub mod download;
pub mod error;
pub mod liveness;
pub mod probe;
pub mod tls;

#[cfg(test)]
mod testutil;

pub use backend::{Backend, register_backends};
pub use connection::{Connection, establish_connection};
pub use dialer::{Dialer, DirectDialer};
pub use download::{certificate_fingerprint, download_certificate};
pub use error::{Error, Result};
pub use liveness::VersionCheck;
pub use probe::{ErrorSink, LivenessClient, check_server};
pub use tls::{PinnedCertError, PinnedCertVerifier};
