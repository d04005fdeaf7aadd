//! Backend registration for failover clients.
//!
//! A [`Backend`] is a named capability to open a connection to one server,
//! not a live connection. A failover RPC client receives the list in
//! priority order and calls [`Backend::establish`] whenever it needs a
//! (new) connection.

use std::sync::Arc;

use pinwire_core::ServerInfo;
use tracing::debug;

use crate::connection::{Connection, establish_connection};
use crate::dialer::Dialer;
use crate::error::Result;

/// One candidate server plus the means to connect to it.
#[derive(Clone)]
pub struct Backend {
    name: String,
    server: Arc<ServerInfo>,
    dialer: Arc<dyn Dialer>,
}

impl std::fmt::Debug for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Backend").field("name", &self.name).finish()
    }
}

impl Backend {
    pub fn new(server: ServerInfo, dialer: Arc<dyn Dialer>) -> Self {
        Self {
            name: server.to_string(),
            server: Arc::new(server),
            dialer,
        }
    }

    /// Stable display name: the address plus `:s` (TLS) or `:p` (plain).
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn server(&self) -> &ServerInfo {
        &self.server
    }

    /// Open a new connection. Each call dials again.
    pub fn establish(&self) -> Result<Connection> {
        debug!(backend = %self.name, "establishing connection");
        establish_connection(&self.server, self.dialer.as_ref())
    }
}

/// Build one backend per server, in the given (failover priority) order.
/// Performs no I/O.
pub fn register_backends(servers: &[ServerInfo], dialer: Arc<dyn Dialer>) -> Vec<Backend> {
    let server_list = servers
        .iter()
        .map(|s| s.address.as_str())
        .collect::<Vec<_>>()
        .join(", ");
    debug!(servers = %server_list, count = servers.len(), "registering backends");

    servers
        .iter()
        .map(|server| Backend::new(server.clone(), Arc::clone(&dialer)))
        .collect()
}
