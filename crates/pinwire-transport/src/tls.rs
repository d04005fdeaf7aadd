//! Pinned-certificate TLS verification.
//!
//! Servers identify themselves with a certificate that was pinned out of
//! band (usually self-signed), not with a public-CA certificate bound to a
//! hostname. [`PinnedCertVerifier`] replaces rustls' default verifier: the
//! presented chain must lead to the pinned certificate, and the server name
//! is never compared against the certificate.
//!
//! ```text
//! ClientConnection handshake
//!   → PinnedCertVerifier::verify_server_cert(leaf, intermediates, _name, now)
//!     → leaf is a pinned cert?       validity period only
//!     → parse every entry            (ChainError::Parse)
//!     → chain walk to pinned roots   (ChainError::Verification)
//!     → no server name check
//! ```
//!
//! The trust pool is built from the pinned PEM for each connection attempt
//! and never shared.

use std::io;
use std::net::TcpStream;
use std::sync::{Arc, Mutex};

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::client::verify_server_cert_signed_by_trust_anchor;
use rustls::crypto::{
    CryptoProvider, WebPkiSupportedAlgorithms, verify_tls12_signature, verify_tls13_signature,
};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::server::ParsedCertificate;
use rustls::{
    CertificateError, ClientConfig, ClientConnection, DigitallySignedStruct, RootCertStore,
    SignatureScheme,
};
use thiserror::Error;
use tracing::{debug, warn};
use x509_parser::prelude::{FromDer, X509Certificate};

use crate::error::Error;

/// The crypto provider used for every client and test server in this crate.
pub(crate) fn crypto_provider() -> Arc<CryptoProvider> {
    Arc::new(rustls::crypto::ring::default_provider())
}

// ── Errors ───────────────────────────────────────────────────────────

/// Why a pinned certificate could not be turned into a trust pool.
#[derive(Debug, Error)]
pub enum PinnedCertError {
    #[error("no pinned certificate configured")]
    Missing,

    #[error("malformed PEM: {0}")]
    Pem(#[source] io::Error),

    #[error("PEM contains no CERTIFICATE block")]
    NoCertificate,

    #[error("certificate cannot be used as a trust anchor: {0}")]
    TrustAnchor(#[source] rustls::Error),
}

/// Why a presented chain was rejected.
#[derive(Debug, Error)]
pub enum ChainError {
    /// Empty chain, or an entry that is not a parseable X.509 certificate.
    #[error("failed to parse certificate from server: {0}")]
    Parse(String),

    /// The chain parsed but does not lead to a pinned root (unknown issuer,
    /// expired, bad signature, ...).
    #[error("certificate verification failed: {0}")]
    Verification(#[source] rustls::Error),
}

impl From<ChainError> for rustls::Error {
    fn from(err: ChainError) -> Self {
        match err {
            ChainError::Parse(_) => {
                rustls::Error::InvalidCertificate(rustls::CertificateError::BadEncoding)
            }
            ChainError::Verification(e) => e,
        }
    }
}

// ── Trust pool ───────────────────────────────────────────────────────

/// The pinned certificates of one server, both as webpki trust anchors and
/// as the raw DER they were configured with.
#[derive(Debug, Clone)]
pub struct TrustPool {
    roots: RootCertStore,
    pinned: Vec<CertificateDer<'static>>,
}

impl TrustPool {
    pub fn len(&self) -> usize {
        self.pinned.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pinned.is_empty()
    }

    pub fn roots(&self) -> &RootCertStore {
        &self.roots
    }

    /// Whether `cert` is byte-for-byte one of the pinned certificates.
    pub fn is_pinned(&self, cert: &CertificateDer<'_>) -> bool {
        self.pinned.iter().any(|pinned| pinned.as_ref() == cert.as_ref())
    }
}

/// Build a trust pool holding exactly the CERTIFICATE blocks of `pem`.
pub fn trust_pool_from_pem(pem: &str) -> Result<TrustPool, PinnedCertError> {
    let mut reader = pem.as_bytes();
    let mut roots = RootCertStore::empty();
    let mut pinned = Vec::new();
    for cert in rustls_pemfile::certs(&mut reader) {
        let cert = cert.map_err(PinnedCertError::Pem)?;
        roots.add(cert.clone()).map_err(PinnedCertError::TrustAnchor)?;
        pinned.push(cert);
    }
    if pinned.is_empty() {
        return Err(PinnedCertError::NoCertificate);
    }
    Ok(TrustPool { roots, pinned })
}

/// Check that `now` lies inside the certificate's validity period.
fn check_validity(cert: &CertificateDer<'_>, now: UnixTime) -> Result<(), ChainError> {
    let (_, parsed) = X509Certificate::from_der(cert.as_ref())
        .map_err(|e| ChainError::Parse(format!("leaf certificate: {e}")))?;
    let now = i64::try_from(now.as_secs()).unwrap_or(i64::MAX);
    let validity = parsed.validity();

    if now < validity.not_before.timestamp() {
        return Err(ChainError::Verification(rustls::Error::InvalidCertificate(
            CertificateError::NotValidYet,
        )));
    }
    if now > validity.not_after.timestamp() {
        return Err(ChainError::Verification(rustls::Error::InvalidCertificate(
            CertificateError::Expired,
        )));
    }
    Ok(())
}

// ── PinnedCertVerifier ───────────────────────────────────────────────

/// Accepts a server chain if and only if it verifies up to a pinned root,
/// whatever name the server is reached by.
///
/// A leaf that is itself one of the pinned certificates is accepted on its
/// validity period alone. Self-signed server certificates are often marked
/// `CA:TRUE` or are X.509 v1, both of which webpki refuses as end entities.
#[derive(Debug)]
pub struct PinnedCertVerifier {
    pool: TrustPool,
    provider: Arc<CryptoProvider>,
}

impl PinnedCertVerifier {
    pub fn new(pool: TrustPool) -> Self {
        Self {
            pool,
            provider: crypto_provider(),
        }
    }

    pub fn from_pem(pem: &str) -> Result<Self, PinnedCertError> {
        Ok(Self::new(trust_pool_from_pem(pem)?))
    }

    /// Verify a DER chain as presented by a peer (leaf first) at time `now`.
    pub fn verify_chain(
        &self,
        chain: &[CertificateDer<'_>],
        now: UnixTime,
    ) -> Result<(), ChainError> {
        let (leaf, intermediates) = chain
            .split_first()
            .ok_or_else(|| ChainError::Parse("empty certificate chain".to_string()))?;
        self.verify_parts(leaf, intermediates, now)
    }

    fn verify_parts(
        &self,
        leaf: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        now: UnixTime,
    ) -> Result<(), ChainError> {
        if self.pool.is_pinned(leaf) {
            return check_validity(leaf, now);
        }

        let parsed = ParsedCertificate::try_from(leaf)
            .map_err(|e| ChainError::Parse(format!("leaf certificate: {e}")))?;
        for (i, cert) in intermediates.iter().enumerate() {
            ParsedCertificate::try_from(cert)
                .map_err(|e| ChainError::Parse(format!("chain certificate {}: {e}", i + 1)))?;
        }

        verify_server_cert_signed_by_trust_anchor(
            &parsed,
            self.pool.roots(),
            intermediates,
            now,
            self.provider.signature_verification_algorithms.all,
        )
        .map_err(ChainError::Verification)
    }
}

impl ServerCertVerifier for PinnedCertVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        match self.verify_parts(end_entity, intermediates, now) {
            Ok(()) => Ok(ServerCertVerified::assertion()),
            Err(e) => {
                warn!(error = %e, "rejected server certificate chain");
                Err(e.into())
            }
        }
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_handshake_signature(message, cert, dss, &self.provider.signature_verification_algorithms, false)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_handshake_signature(message, cert, dss, &self.provider.signature_verification_algorithms, true)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.provider
            .signature_verification_algorithms
            .supported_schemes()
    }
}

// ── Handshake signatures ─────────────────────────────────────────────

/// Check a handshake signature with rustls, falling back to the raw
/// SubjectPublicKeyInfo when webpki cannot use the certificate as an end
/// entity (X.509 v1).
fn verify_handshake_signature(
    message: &[u8],
    cert: &CertificateDer<'_>,
    dss: &DigitallySignedStruct,
    algs: &WebPkiSupportedAlgorithms,
    tls13: bool,
) -> Result<HandshakeSignatureValid, rustls::Error> {
    let checked = if tls13 {
        verify_tls13_signature(message, cert, dss, algs)
    } else {
        verify_tls12_signature(message, cert, dss, algs)
    };
    match checked {
        Ok(valid) => Ok(valid),
        Err(e) if tls13 && !allowed_in_tls13(dss.scheme) => Err(e),
        Err(e) => verify_with_public_key(message, cert, dss.scheme, dss.signature(), algs)
            .map_err(|_| e),
    }
}

fn allowed_in_tls13(scheme: SignatureScheme) -> bool {
    matches!(
        scheme,
        SignatureScheme::ECDSA_NISTP256_SHA256
            | SignatureScheme::ECDSA_NISTP384_SHA384
            | SignatureScheme::ECDSA_NISTP521_SHA512
            | SignatureScheme::RSA_PSS_SHA256
            | SignatureScheme::RSA_PSS_SHA384
            | SignatureScheme::RSA_PSS_SHA512
            | SignatureScheme::ED25519
            | SignatureScheme::ED448
    )
}

/// Verify `signature` over `message` with the certificate's public key,
/// without any other certificate checks.
fn verify_with_public_key(
    message: &[u8],
    cert: &CertificateDer<'_>,
    scheme: SignatureScheme,
    signature: &[u8],
    algs: &WebPkiSupportedAlgorithms,
) -> Result<HandshakeSignatureValid, rustls::Error> {
    let (_, parsed) = X509Certificate::from_der(cert.as_ref())
        .map_err(|_| rustls::Error::InvalidCertificate(CertificateError::BadEncoding))?;
    let public_key: &[u8] = &parsed.public_key().subject_public_key.data;

    let candidates = algs
        .mapping
        .iter()
        .find(|(candidate, _)| *candidate == scheme)
        .map(|(_, verifiers)| *verifiers)
        .unwrap_or(&[]);
    if candidates
        .iter()
        .any(|alg| alg.verify_signature(public_key, message, signature).is_ok())
    {
        debug!(?scheme, "handshake signature verified against raw public key");
        Ok(HandshakeSignatureValid::assertion())
    } else {
        Err(rustls::Error::InvalidCertificate(CertificateError::BadSignature))
    }
}

// ── LeafCapture ──────────────────────────────────────────────────────

/// Records the leaf certificate and accepts any chain.
///
/// Only used to fetch a certificate for pinning; a connection made with this
/// verifier authenticates nothing. Handshake signatures are still checked so
/// the captured certificate belongs to whoever completed the handshake.
#[derive(Debug)]
pub(crate) struct LeafCapture {
    leaf: Mutex<Option<CertificateDer<'static>>>,
    provider: Arc<CryptoProvider>,
}

impl LeafCapture {
    pub(crate) fn new() -> Self {
        Self {
            leaf: Mutex::new(None),
            provider: crypto_provider(),
        }
    }

    pub(crate) fn take(&self) -> Option<CertificateDer<'static>> {
        self.leaf.lock().ok().and_then(|mut leaf| leaf.take())
    }
}

impl ServerCertVerifier for LeafCapture {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        if let Ok(mut leaf) = self.leaf.lock() {
            *leaf = Some(end_entity.clone().into_owned());
        }
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_handshake_signature(message, cert, dss, &self.provider.signature_verification_algorithms, false)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_handshake_signature(message, cert, dss, &self.provider.signature_verification_algorithms, true)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.provider
            .signature_verification_algorithms
            .supported_schemes()
    }
}

// ── Handshake ────────────────────────────────────────────────────────

/// Client config whose only trust decision is `verifier`.
pub(crate) fn client_config(
    verifier: Arc<dyn ServerCertVerifier>,
) -> Result<ClientConfig, rustls::Error> {
    Ok(ClientConfig::builder_with_provider(crypto_provider())
        .with_safe_default_protocol_versions()?
        .dangerous()
        .with_custom_certificate_verifier(verifier)
        .with_no_client_auth())
}

/// Server name sent as SNI. Never checked against the certificate.
pub(crate) fn server_name(address: &str, host: &str) -> Result<ServerName<'static>, Error> {
    ServerName::try_from(host.to_string()).map_err(|e| Error::InvalidAddress {
        address: address.to_string(),
        reason: e.to_string(),
    })
}

/// Drive the handshake to completion so certificate checks run before any
/// application data is exchanged.
pub(crate) fn complete_handshake(
    conn: &mut ClientConnection,
    sock: &mut TcpStream,
) -> io::Result<()> {
    while conn.is_handshaking() {
        conn.complete_io(sock)?;
    }
    while conn.wants_write() {
        conn.write_tls(sock)?;
    }
    debug!(
        version = ?conn.protocol_version(),
        suite = ?conn.negotiated_cipher_suite().map(|s| s.suite()),
        "tls handshake complete"
    );
    Ok(())
}

/// Map a failed handshake onto the error taxonomy. rustls reports its own
/// errors (including those returned by our verifiers) wrapped in `io::Error`.
pub(crate) fn classify_handshake_error(address: &str, err: io::Error) -> Error {
    let tls_error = err
        .get_ref()
        .and_then(|inner| inner.downcast_ref::<rustls::Error>())
        .cloned();
    let address = address.to_string();
    match tls_error {
        Some(rustls::Error::InvalidCertificate(rustls::CertificateError::BadEncoding)) => {
            Error::CertificateParse {
                address,
                reason: "certificate is not valid X.509".to_string(),
            }
        }
        Some(rustls::Error::NoCertificatesPresented) => Error::NoCertificate { address },
        Some(source @ rustls::Error::InvalidCertificate(_)) => {
            Error::CertificateVerification { address, source }
        }
        _ => Error::Handshake {
            address,
            source: err,
        },
    }
}
