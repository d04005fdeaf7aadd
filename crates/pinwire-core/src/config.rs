//! pinwire.toml configuration parser.

use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::debug;

use crate::error::{ConfigError, ConfigResult};
use crate::server::ServerInfo;
use crate::version::ClientVersion;

/// On-disk shape of a configuration file.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawConfig {
    client: Option<ClientSection>,
    #[serde(default)]
    servers: Vec<ServerEntry>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
struct ClientSection {
    name: String,
    version: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
struct ServerEntry {
    address: String,
    #[serde(default)]
    tls: bool,
    pinned_cert: Option<String>,
    pinned_cert_file: Option<PathBuf>,
}

/// Validated configuration: the server list in failover order plus the
/// optional client identifier.
#[derive(Debug, Clone)]
pub struct PinwireConfig {
    pub client: Option<ClientVersion>,
    pub servers: Vec<ServerInfo>,
}

impl PinwireConfig {
    /// Load a config file. Relative `pinned_cert_file` paths resolve against
    /// the directory holding the config file.
    pub fn from_file(path: &Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let base_dir = path.parent().unwrap_or_else(|| Path::new("."));
        let config = Self::parse(&content, base_dir)?;
        debug!(path = %path.display(), servers = config.servers.len(), "loaded config");
        Ok(config)
    }

    /// Parse config text; relative certificate paths resolve against the
    /// current directory.
    pub fn from_toml_str(content: &str) -> ConfigResult<Self> {
        Self::parse(content, Path::new("."))
    }

    fn parse(content: &str, base_dir: &Path) -> ConfigResult<Self> {
        let raw: RawConfig = toml::from_str(content)?;

        let client = raw
            .client
            .map(|c| format!("{}/{}", c.name, c.version).parse::<ClientVersion>())
            .transpose()?;

        if raw.servers.is_empty() {
            return Err(ConfigError::Invalid("no servers configured".to_string()));
        }

        let servers = raw
            .servers
            .into_iter()
            .map(|entry| entry.resolve(base_dir))
            .collect::<ConfigResult<Vec<_>>>()?;

        Ok(Self { client, servers })
    }
}

impl ServerEntry {
    fn resolve(self, base_dir: &Path) -> ConfigResult<ServerInfo> {
        if self.address.trim().is_empty() {
            return Err(ConfigError::Invalid("server with empty address".to_string()));
        }

        let pinned_cert = match (self.pinned_cert, self.pinned_cert_file) {
            (Some(_), Some(_)) => {
                return Err(ConfigError::Invalid(format!(
                    "{}: pinned_cert and pinned_cert_file are mutually exclusive",
                    self.address
                )));
            }
            (Some(pem), None) => Some(pem),
            (None, Some(file)) => {
                let path = if file.is_absolute() {
                    file
                } else {
                    base_dir.join(file)
                };
                let pem = std::fs::read_to_string(&path)
                    .map_err(|source| ConfigError::Read { path, source })?;
                Some(pem)
            }
            (None, None) => None,
        };

        if self.tls && pinned_cert.as_deref().is_none_or(|pem| pem.trim().is_empty()) {
            return Err(ConfigError::Invalid(format!(
                "{}: tls servers need a pinned certificate",
                self.address
            )));
        }

        Ok(ServerInfo {
            address: self.address,
            tls: self.tls,
            pinned_cert,
        })
    }
}
