use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use pinwire_core::{ClientVersion, PinwireConfig, ServerInfo};
use pinwire_transport::{Dialer, DirectDialer, Error, VersionCheck, check_server};
use tracing::debug;

/// What to probe.
pub enum Target {
    Single {
        address: String,
        tls: bool,
        cert: Option<PathBuf>,
    },
    Config(PathBuf),
}

pub fn check(target: Target, dialer: DirectDialer) -> anyhow::Result<()> {
    let (servers, client) = resolve(target)?;
    let client = match client {
        Some(client) => client,
        None => default_client_version()?,
    };
    debug!(%client, count = servers.len(), "checking servers");

    let dialer: Arc<dyn Dialer> = Arc::new(dialer);
    let mut failed = 0;
    for server in &servers {
        let outcome = check_server(server, Arc::clone(&dialer), |backends, on_error| {
            VersionCheck::new(backends, on_error, client.clone())
        });
        if outcome.is_err() {
            failed += 1;
        }
        println!("{}", verdict(server, &outcome));
    }

    if failed > 0 {
        anyhow::bail!("{failed} of {} servers failed the check", servers.len());
    }
    Ok(())
}

fn resolve(target: Target) -> anyhow::Result<(Vec<ServerInfo>, Option<ClientVersion>)> {
    match target {
        Target::Single { address, tls, cert } => {
            let server = match (tls, cert) {
                (true, Some(path)) => {
                    let pem = std::fs::read_to_string(&path)
                        .with_context(|| format!("failed to read {}", path.display()))?;
                    ServerInfo::tls(address, pem)
                }
                (true, None) => anyhow::bail!("--tls requires --cert"),
                (false, _) => ServerInfo::plain(address),
            };
            Ok((vec![server], None))
        }
        Target::Config(path) => {
            let config = PinwireConfig::from_file(&path)
                .with_context(|| format!("failed to load {}", path.display()))?;
            Ok((config.servers, config.client))
        }
    }
}

fn default_client_version() -> anyhow::Result<ClientVersion> {
    let version = semver::Version::parse(env!("CARGO_PKG_VERSION"))?;
    Ok(ClientVersion::new("pinwire", version))
}

/// One line per server: unreachable servers and incompatible ones read
/// differently.
fn verdict(server: &ServerInfo, outcome: &Result<(), Error>) -> String {
    match outcome {
        Ok(()) => format!("✓ {server}  ok"),
        Err(e) if e.is_unreachable() => format!("✗ {server}  server unreachable: {e}"),
        Err(e) => format!("✗ {server}  not a compatible server: {e}"),
    }
}
