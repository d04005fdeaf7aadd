//! Client software identifier sent to servers during version negotiation.
//!
//! Purely informational: it has no effect on the protocol version that gets
//! negotiated. The value is passed explicitly to whatever builds a client
//! rather than living in a process-wide global.

use std::fmt;
use std::str::FromStr;

use semver::Version;

use crate::error::ConfigError;

/// `name/version`, e.g. `pinwire/0.1.0`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientVersion {
    name: String,
    version: Version,
}

impl ClientVersion {
    pub fn new(name: impl Into<String>, version: Version) -> Self {
        Self {
            name: name.into(),
            version,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn version(&self) -> &Version {
        &self.version
    }
}

impl fmt::Display for ClientVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.name, self.version)
    }
}

impl FromStr for ClientVersion {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (name, version) = s
            .split_once('/')
            .ok_or_else(|| ConfigError::Invalid(format!("client version '{s}' is not name/version")))?;
        if name.is_empty() {
            return Err(ConfigError::Invalid(format!(
                "client version '{s}' has an empty name"
            )));
        }
        let version = Version::parse(version)
            .map_err(|e| ConfigError::Invalid(format!("client version '{s}': {e}")))?;
        Ok(Self::new(name, version))
    }
}
