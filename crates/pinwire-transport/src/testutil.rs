//! Test fixtures: rcgen certificate hierarchies and blocking loopback servers.

use std::io::{BufRead, BufReader, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::Arc;
use std::thread;

use rcgen::{BasicConstraints, CertificateParams, DistinguishedName, DnType, IsCa, KeyPair};
use rustls::pki_types::{CertificateDer, PrivateKeyDer};

use crate::tls::crypto_provider;

/// A generated certificate together with its signing key.
pub(crate) struct Issued {
    pub cert: rcgen::Certificate,
    pub key: KeyPair,
}

impl Issued {
    pub fn pem(&self) -> String {
        self.cert.pem()
    }

    pub fn der(&self) -> CertificateDer<'static> {
        CertificateDer::from(self.cert.der().to_vec())
    }

    pub fn key_der(&self) -> PrivateKeyDer<'static> {
        PrivateKeyDer::try_from(self.key.serialize_der()).unwrap()
    }
}

fn named(common_name: &str, sans: &[&str]) -> CertificateParams {
    let mut params =
        CertificateParams::new(sans.iter().map(|s| s.to_string()).collect::<Vec<_>>()).unwrap();
    let mut dn = DistinguishedName::new();
    dn.push(DnType::CommonName, common_name);
    params.distinguished_name = dn;
    params
}

/// Self-signed CA certificate.
pub(crate) fn ca(common_name: &str) -> Issued {
    let mut params = named(common_name, &[]);
    params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
    let key = KeyPair::generate().unwrap();
    let cert = params.self_signed(&key).unwrap();
    Issued { cert, key }
}

/// Self-signed CA certificate valid only between the two given years.
pub(crate) fn ca_valid_between(common_name: &str, from_year: i32, to_year: i32) -> Issued {
    let mut params = named(common_name, &[]);
    params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
    params.not_before = rcgen::date_time_ymd(from_year, 1, 1);
    params.not_after = rcgen::date_time_ymd(to_year, 1, 1);
    let key = KeyPair::generate().unwrap();
    let cert = params.self_signed(&key).unwrap();
    Issued { cert, key }
}

/// Intermediate CA signed by `issuer`.
pub(crate) fn intermediate(issuer: &Issued, common_name: &str) -> Issued {
    let mut params = named(common_name, &[]);
    params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
    let key = KeyPair::generate().unwrap();
    let cert = params.signed_by(&key, &issuer.cert, &issuer.key).unwrap();
    Issued { cert, key }
}

/// End-entity certificate signed by `issuer`.
pub(crate) fn leaf(issuer: &Issued, sans: &[&str]) -> Issued {
    let params = named(sans.first().copied().unwrap_or("leaf"), sans);
    let key = KeyPair::generate().unwrap();
    let cert = params.signed_by(&key, &issuer.cert, &issuer.key).unwrap();
    Issued { cert, key }
}

/// End-entity certificate signed by `issuer` whose validity ended in 2001.
pub(crate) fn expired_leaf(issuer: &Issued, sans: &[&str]) -> Issued {
    let mut params = named(sans.first().copied().unwrap_or("leaf"), sans);
    params.not_before = rcgen::date_time_ymd(2000, 1, 1);
    params.not_after = rcgen::date_time_ymd(2001, 1, 1);
    let key = KeyPair::generate().unwrap();
    let cert = params.signed_by(&key, &issuer.cert, &issuer.key).unwrap();
    Issued { cert, key }
}

/// Self-signed end-entity certificate, the usual shape of a pinned server cert.
pub(crate) fn self_signed(sans: &[&str]) -> Issued {
    let params = named(sans.first().copied().unwrap_or("server"), sans);
    let key = KeyPair::generate().unwrap();
    let cert = params.self_signed(&key).unwrap();
    Issued { cert, key }
}

/// rustls server config presenting `chain` (leaf first).
pub(crate) fn server_config(
    chain: Vec<CertificateDer<'static>>,
    key: PrivateKeyDer<'static>,
) -> Arc<rustls::ServerConfig> {
    Arc::new(
        rustls::ServerConfig::builder_with_provider(crypto_provider())
            .with_safe_default_protocol_versions()
            .unwrap()
            .with_no_client_auth()
            .with_single_cert(chain, key)
            .unwrap(),
    )
}

type TlsStream = rustls::StreamOwned<rustls::ServerConnection, TcpStream>;

/// Accept TLS connections with `config`, handing each to `handle` on its own
/// thread. Returns the listening address.
fn serve_tls<H>(config: Arc<rustls::ServerConfig>, handle: H) -> SocketAddr
where
    H: Fn(TlsStream) + Clone + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind to random port");
    let addr = listener.local_addr().expect("local addr");
    thread::spawn(move || {
        while let Ok((tcp, _)) = listener.accept() {
            let config = Arc::clone(&config);
            let handle = handle.clone();
            thread::spawn(move || {
                let Ok(conn) = rustls::ServerConnection::new(config) else {
                    return;
                };
                handle(rustls::StreamOwned::new(conn, tcp));
            });
        }
    });
    addr
}

/// Start a TLS echo server presenting `chain` (leaf first). Returns its address.
pub(crate) fn spawn_tls_server(
    chain: Vec<CertificateDer<'static>>,
    key: PrivateKeyDer<'static>,
) -> SocketAddr {
    serve_tls(server_config(chain, key), |mut tls| echo(&mut tls))
}

/// Start a plain TCP echo server. Returns its address.
pub(crate) fn spawn_plain_server() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind to random port");
    let addr = listener.local_addr().expect("local addr");
    thread::spawn(move || {
        while let Ok((mut tcp, _)) = listener.accept() {
            thread::spawn(move || echo(&mut tcp));
        }
    });
    addr
}

/// Request handler for line servers: `None` hangs up without answering.
pub(crate) type LineReply = fn(&str) -> Option<String>;

/// Start a plain TCP server that answers each received line with
/// `reply(line)` followed by a newline.
pub(crate) fn spawn_line_server(reply: LineReply) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind to random port");
    let addr = listener.local_addr().expect("local addr");
    thread::spawn(move || {
        while let Ok((tcp, _)) = listener.accept() {
            thread::spawn(move || answer_lines(tcp, reply));
        }
    });
    addr
}

/// Like [`spawn_line_server`], behind TLS presenting `chain`.
pub(crate) fn spawn_tls_line_server(
    chain: Vec<CertificateDer<'static>>,
    key: PrivateKeyDer<'static>,
    reply: LineReply,
) -> SocketAddr {
    serve_tls(server_config(chain, key), move |tls| answer_lines(tls, reply))
}

/// Start a server that accepts connections and never writes or closes them.
pub(crate) fn spawn_silent_server() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind to random port");
    let addr = listener.local_addr().expect("local addr");
    thread::spawn(move || {
        let mut held = Vec::new();
        while let Ok((tcp, _)) = listener.accept() {
            held.push(tcp);
        }
    });
    addr
}

/// An address nothing listens on: bind, read the port, drop the listener.
pub(crate) fn closed_port() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind to random port");
    listener.local_addr().expect("local addr")
}

fn echo(stream: &mut (impl Read + Write)) {
    let mut buf = [0u8; 4096];
    loop {
        match stream.read(&mut buf) {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                if stream.write_all(&buf[..n]).is_err() || stream.flush().is_err() {
                    break;
                }
            }
        }
    }
}

fn answer_lines(stream: impl Read + Write, reply: LineReply) {
    let mut reader = BufReader::new(stream);
    let mut line = String::new();
    loop {
        line.clear();
        match reader.read_line(&mut line) {
            Ok(0) | Err(_) => break,
            Ok(_) => {
                let Some(mut answer) = reply(line.trim_end()) else {
                    break;
                };
                answer.push('\n');
                let stream = reader.get_mut();
                if stream.write_all(answer.as_bytes()).is_err() || stream.flush().is_err() {
                    break;
                }
            }
        }
    }
}
