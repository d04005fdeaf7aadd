//! One-shot certificate download for trust-on-first-use pinning.
//!
//! [`download_certificate`] completes a TLS handshake that accepts any
//! certificate, keeps the leaf, and hangs up. The result is meant to be shown
//! to the user (see [`certificate_fingerprint`]) and persisted as the pinned
//! certificate; it proves nothing about the server by itself.

use std::net::Shutdown;
use std::sync::Arc;

use pem::{EncodeConfig, LineEnding, Pem};
use pinwire_core::host_of;
use rustls::pki_types::CertificateDer;
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::connection::dial;
use crate::dialer::Dialer;
use crate::error::{Error, Result};
use crate::tls::{self, LeafCapture};

const CERTIFICATE_TAG: &str = "CERTIFICATE";

/// Fetch the leaf certificate presented at `address`, PEM-encoded.
///
/// The socket is shut down on every path.
pub fn download_certificate(address: &str, dialer: &dyn Dialer) -> Result<String> {
    let capture = Arc::new(LeafCapture::new());
    let config = tls::client_config(capture.clone()).map_err(|source| Error::TlsConfig {
        address: address.to_string(),
        source,
    })?;
    let name = tls::server_name(address, host_of(address))?;
    let mut conn =
        rustls::ClientConnection::new(Arc::new(config), name).map_err(|source| Error::TlsConfig {
            address: address.to_string(),
            source,
        })?;

    let mut sock = dial(address, dialer)?;
    let handshake = tls::complete_handshake(&mut conn, &mut sock);
    if handshake.is_ok() {
        conn.send_close_notify();
        let _ = conn.write_tls(&mut sock);
    }
    let _ = sock.shutdown(Shutdown::Both);
    handshake.map_err(|e| tls::classify_handshake_error(address, e))?;

    let leaf = capture.take().ok_or_else(|| Error::NoCertificate {
        address: address.to_string(),
    })?;
    debug!(%address, bytes = leaf.len(), "downloaded server certificate");
    leaf_to_pem(address, &[leaf])
}

/// PEM-encode the first certificate of `chain`.
pub fn leaf_to_pem(address: &str, chain: &[CertificateDer<'_>]) -> Result<String> {
    let leaf = chain.first().ok_or_else(|| Error::NoCertificate {
        address: address.to_string(),
    })?;
    let block = Pem::new(CERTIFICATE_TAG, leaf.to_vec());
    Ok(pem::encode_config(
        &block,
        EncodeConfig::new().set_line_ending(LineEnding::LF),
    ))
}

/// Lowercase hex SHA-256 of the first CERTIFICATE block in `pem_text`.
pub fn certificate_fingerprint(pem_text: &str) -> Option<String> {
    let block = pem::parse_many(pem_text)
        .ok()?
        .into_iter()
        .find(|block| block.tag() == CERTIFICATE_TAG)?;
    Some(hex::encode(Sha256::digest(block.contents())))
}
