//! `server.version` liveness check.
//!
//! [`VersionCheck`] is the stock [`LivenessClient`]: it opens one connection
//! over the registered backends and performs a single newline-delimited
//! JSON-RPC `server.version` exchange. A server that answers with a `result`
//! array speaks the protocol; anything else does not.

use std::io::{BufRead, BufReader, Write};
use std::net::{Shutdown, TcpStream};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use pinwire_core::ClientVersion;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, info};

use crate::backend::Backend;
use crate::connection::Connection;
use crate::error::{Error, Result};
use crate::probe::{ErrorSink, LivenessClient};

/// Protocol version requested in `server.version`.
pub const PROTOCOL_VERSION: &str = "1.4";

const VERSION_METHOD: &str = "server.version";

#[derive(Debug, Deserialize)]
struct RpcResponse {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<Value>,
}

/// Liveness client issuing one `server.version` request.
pub struct VersionCheck {
    backends: Vec<Backend>,
    on_error: ErrorSink,
    client_version: ClientVersion,
    in_flight: Mutex<Option<TcpStream>>,
    closed: AtomicBool,
}

impl VersionCheck {
    pub fn new(backends: Vec<Backend>, on_error: ErrorSink, client_version: ClientVersion) -> Self {
        Self {
            backends,
            on_error,
            client_version,
            in_flight: Mutex::new(None),
            closed: AtomicBool::new(false),
        }
    }

    fn request_line(&self) -> String {
        let request = json!({
            "id": 0,
            "method": VERSION_METHOD,
            "params": [self.client_version.to_string(), PROTOCOL_VERSION],
        });
        format!("{request}\n")
    }

    /// Open a connection on the first backend that accepts one. Failures are
    /// reported through the sink as they happen.
    fn connect(&self) -> Option<Connection> {
        for backend in &self.backends {
            match backend.establish() {
                Ok(conn) => return Some(conn),
                Err(e) => {
                    debug!(backend = %backend.name(), error = %e, "backend unavailable");
                    (self.on_error)(e);
                }
            }
        }
        None
    }

    fn track(&self, conn: &Connection) {
        let Ok(handle) = conn.shutdown_handle() else {
            return;
        };
        if let Ok(mut slot) = self.in_flight.lock() {
            *slot = Some(handle);
        }
        // close() may have run between connect and here.
        if self.closed.load(Ordering::SeqCst) {
            self.release();
        }
    }

    fn release(&self) {
        if let Ok(mut slot) = self.in_flight.lock() {
            if let Some(stream) = slot.take() {
                let _ = stream.shutdown(Shutdown::Both);
            }
        }
    }

    fn exchange(&self, conn: &mut Connection) -> std::io::Result<String> {
        conn.write_all(self.request_line().as_bytes())?;
        conn.flush()?;
        let mut line = String::new();
        BufReader::new(conn).read_line(&mut line)?;
        Ok(line)
    }

    fn interpret(address: &str, line: &str) -> Result<()> {
        let protocol_error = |reason: String| Error::ProtocolCheck {
            address: address.to_string(),
            reason,
        };

        if line.trim().is_empty() {
            return Err(protocol_error("connection closed without a response".to_string()));
        }
        let response: RpcResponse = serde_json::from_str(line)
            .map_err(|e| protocol_error(format!("malformed response: {e}")))?;

        if let Some(error) = response.error {
            return Err(protocol_error(format!("{VERSION_METHOD} rejected: {error}")));
        }
        match response.result {
            Some(Value::Array(fields)) => {
                let software = fields.first().and_then(Value::as_str).unwrap_or("unknown");
                let protocol = fields.get(1).and_then(Value::as_str).unwrap_or("unknown");
                info!(%address, %software, %protocol, "server answered {VERSION_METHOD}");
                Ok(())
            }
            Some(other) => Err(protocol_error(format!("unexpected {VERSION_METHOD} result: {other}"))),
            None => Err(protocol_error("response has neither result nor error".to_string())),
        }
    }
}

impl LivenessClient for VersionCheck {
    fn check_connection(&self) -> Result<()> {
        let Some(mut conn) = self.connect() else {
            return Err(Error::ProtocolCheck {
                address: self.backends.first().map(|b| b.server().address.clone()).unwrap_or_default(),
                reason: "no backend accepted a connection".to_string(),
            });
        };
        let address = conn.address().to_string();
        self.track(&conn);

        let outcome = match self.exchange(&mut conn) {
            Ok(line) => Self::interpret(&address, &line),
            Err(_) if self.closed.load(Ordering::SeqCst) => Err(Error::ProtocolCheck {
                address: address.clone(),
                reason: "client closed".to_string(),
            }),
            Err(source) => {
                (self.on_error)(Error::Io {
                    address: address.clone(),
                    source,
                });
                Err(Error::ProtocolCheck {
                    address: address.clone(),
                    reason: format!("{VERSION_METHOD} request did not complete"),
                })
            }
        };

        conn.close();
        if let Ok(mut slot) = self.in_flight.lock() {
            slot.take();
        }
        outcome
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::register_backends;
    use crate::dialer::{Dialer, DirectDialer};
    use crate::testutil;
    use pinwire_core::ServerInfo;
    use std::sync::Arc;
    use std::thread;
    use std::time::{Duration, Instant};

    fn dialer() -> Arc<dyn Dialer> {
        Arc::new(
            DirectDialer::new()
                .with_connect_timeout(Duration::from_secs(2))
                .with_io_timeout(Duration::from_secs(10)),
        )
    }

    fn version() -> ClientVersion {
        "pinwire/0.1.0".parse().unwrap()
    }

    /// Sink that records every reported error.
    fn recording_sink() -> (ErrorSink, Arc<Mutex<Vec<Error>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink_seen = seen.clone();
        let sink: ErrorSink = Arc::new(move |e: Error| sink_seen.lock().unwrap().push(e));
        (sink, seen)
    }

    fn client_for(servers: &[ServerInfo]) -> (VersionCheck, Arc<Mutex<Vec<Error>>>) {
        let (sink, seen) = recording_sink();
        let backends = register_backends(servers, dialer());
        (VersionCheck::new(backends, sink, version()), seen)
    }

    fn electrum_reply(line: &str) -> Option<String> {
        let request: Value = serde_json::from_str(line).ok()?;
        if request["method"] != "server.version" {
            return None;
        }
        Some(r#"{"jsonrpc":"2.0","id":0,"result":["ElectrumX 1.16.0","1.4"]}"#.to_string())
    }

    #[test]
    fn request_line_carries_client_version_and_protocol() {
        let (client, _) = client_for(&[]);
        let line = client.request_line();
        assert!(line.ends_with('\n'));
        let request: Value = serde_json::from_str(line.trim_end()).unwrap();
        assert_eq!(request["id"], 0);
        assert_eq!(request["method"], "server.version");
        assert_eq!(request["params"], json!(["pinwire/0.1.0", "1.4"]));
    }

    #[test]
    fn result_array_passes() {
        let addr = testutil::spawn_line_server(electrum_reply);
        let (client, seen) = client_for(&[ServerInfo::plain(addr.to_string())]);
        client.check_connection().unwrap();
        assert!(seen.lock().unwrap().is_empty());
    }

    #[test]
    fn result_array_passes_over_pinned_tls() {
        let cert = testutil::self_signed(&["electrum.example.org"]);
        let addr = testutil::spawn_tls_line_server(vec![cert.der()], cert.key_der(), electrum_reply);
        let (client, _) = client_for(&[ServerInfo::tls(addr.to_string(), cert.pem())]);
        client.check_connection().unwrap();
    }

    #[test]
    fn error_object_fails() {
        let addr = testutil::spawn_line_server(|_| {
            Some(r#"{"id":0,"error":{"code":-32601,"message":"unknown method"}}"#.to_string())
        });
        let (client, seen) = client_for(&[ServerInfo::plain(addr.to_string())]);
        let err = client.check_connection().unwrap_err();
        assert!(matches!(err, Error::ProtocolCheck { .. }));
        assert!(err.to_string().contains("rejected"));
        assert!(seen.lock().unwrap().is_empty());
    }

    #[test]
    fn malformed_response_fails() {
        let addr = testutil::spawn_line_server(|_| Some("HTTP/1.1 400 Bad Request".to_string()));
        let (client, _) = client_for(&[ServerInfo::plain(addr.to_string())]);
        let err = client.check_connection().unwrap_err();
        assert!(err.to_string().contains("malformed"));
    }

    #[test]
    fn echo_server_is_not_compatible() {
        let addr = testutil::spawn_plain_server();
        let (client, _) = client_for(&[ServerInfo::plain(addr.to_string())]);
        let err = client.check_connection().unwrap_err();
        assert!(matches!(err, Error::ProtocolCheck { .. }));
        assert!(!err.is_unreachable());
    }

    #[test]
    fn hang_up_without_answer_fails() {
        let addr = testutil::spawn_line_server(|_| None);
        let (client, _) = client_for(&[ServerInfo::plain(addr.to_string())]);
        let err = client.check_connection().unwrap_err();
        assert!(err.to_string().contains("without a response"));
    }

    #[test]
    fn unreachable_backend_is_reported_to_sink() {
        let addr = testutil::closed_port();
        let (client, seen) = client_for(&[ServerInfo::plain(addr.to_string())]);
        let err = client.check_connection().unwrap_err();
        assert!(matches!(err, Error::ProtocolCheck { .. }));

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert!(matches!(seen[0], Error::Dial { .. }));
    }

    #[test]
    fn falls_through_to_next_backend() {
        let dead = testutil::closed_port();
        let live = testutil::spawn_line_server(electrum_reply);
        let (client, seen) = client_for(&[
            ServerInfo::plain(dead.to_string()),
            ServerInfo::plain(live.to_string()),
        ]);
        client.check_connection().unwrap();
        assert_eq!(seen.lock().unwrap().len(), 1);
    }

    #[test]
    fn no_backends_fails() {
        let (client, _) = client_for(&[]);
        assert!(client.check_connection().is_err());
    }

    #[test]
    fn close_unblocks_pending_check() {
        let addr = testutil::spawn_silent_server();
        let (client, seen) = client_for(&[ServerInfo::plain(addr.to_string())]);
        let client = Arc::new(client);

        let worker = {
            let client = client.clone();
            thread::spawn(move || client.check_connection())
        };
        thread::sleep(Duration::from_millis(100));

        let started = Instant::now();
        client.close();
        let result = worker.join().unwrap();

        assert!(result.is_err());
        assert!(started.elapsed() < Duration::from_secs(5));
        // Closing is not a transport failure.
        assert!(seen.lock().unwrap().is_empty());
    }

    #[test]
    fn close_before_check_is_harmless() {
        let addr = testutil::spawn_line_server(electrum_reply);
        let (client, _) = client_for(&[ServerInfo::plain(addr.to_string())]);
        client.close();
        client.close();
        // The socket is shut down as soon as it is tracked.
        assert!(client.check_connection().is_err());
    }
}
