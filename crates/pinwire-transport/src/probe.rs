//! Connectivity probe: is this server reachable, and does it speak the
//! expected protocol?
//!
//! # Architecture
//!
//! ```text
//! check_server(server, dialer, build_client)
//!   → establish once, close          (failure returned immediately)
//!   → build_client(backends, on_error)
//!       ├── on_error(err)             ─┐
//!       └── thread: check_connection() ─┴→ bounded(1) slot → first result wins
//!   → client.close()
//! ```
//!
//! Both sources `try_send` into a channel of capacity one, so whichever
//! reports second is dropped without blocking. The caller never waits for the
//! losing side; closing the client is what makes it finish.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread;

use crossbeam::channel;
use pinwire_core::ServerInfo;
use tracing::debug;

use crate::backend::Backend;
use crate::dialer::Dialer;
use crate::error::{Error, Result};

/// Callback through which a client reports transport/communication errors
/// that happen outside of any particular request.
pub type ErrorSink = Arc<dyn Fn(Error) + Send + Sync>;

/// An application-level client that can confirm the remote end speaks the
/// expected protocol.
pub trait LivenessClient: Send + Sync + 'static {
    /// Issue a protocol-level request and report whether it succeeded.
    fn check_connection(&self) -> Result<()>;

    /// Release the client's connection. Must unblock a pending
    /// `check_connection`.
    fn close(&self);
}

/// Probe a single server.
///
/// `build_client` receives a one-element backend list and the error sink, and
/// returns the client whose `check_connection` confirms the protocol. The
/// first of (sink error, liveness result) decides the outcome.
pub fn check_server<C, F>(server: &ServerInfo, dialer: Arc<dyn Dialer>, build_client: F) -> Result<()>
where
    C: LivenessClient,
    F: FnOnce(Vec<Backend>, ErrorSink) -> C,
{
    let backend = Backend::new(server.clone(), dialer);

    // Plain reachability first; no race if this fails.
    let mut conn = backend.establish()?;
    conn.close();
    debug!(backend = %backend.name(), "server reachable, checking protocol");

    let (tx, rx) = channel::bounded::<Result<()>>(1);

    let sink_tx = tx.clone();
    let on_error: ErrorSink = Arc::new(move |err: Error| {
        // A full slot means the probe is already resolved.
        let _ = sink_tx.try_send(Err(err));
    });

    let client = Arc::new(build_client(vec![backend], on_error));
    let check_client = Arc::clone(&client);
    let address = server.address.clone();
    let spawned = thread::Builder::new()
        .name("pinwire-liveness".to_string())
        .spawn(move || {
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| check_client.check_connection()))
                .unwrap_or_else(|_| {
                    Err(Error::ProtocolCheck {
                        address,
                        reason: "liveness check panicked".to_string(),
                    })
                });
            let _ = tx.try_send(outcome);
        });

    let outcome = match spawned {
        // The client holds a sender through the sink, so recv only fails if
        // the client itself is gone.
        Ok(_) => rx.recv().unwrap_or_else(|_| {
            Err(Error::ProtocolCheck {
                address: server.address.clone(),
                reason: "liveness check ended without a result".to_string(),
            })
        }),
        Err(source) => Err(Error::Spawn {
            address: server.address.clone(),
            source,
        }),
    };

    client.close();
    match &outcome {
        Ok(()) => debug!(address = %server.address, "server check passed"),
        Err(e) => debug!(address = %server.address, error = %e, "server check failed"),
    }
    outcome
}
