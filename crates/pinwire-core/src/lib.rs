//! pinwire-core: shared types for pinned-certificate server connectivity.
//!
//! - **`server`**: [`ServerInfo`], one candidate server
//! - **`version`**: [`ClientVersion`], the client identifier sent on version negotiation
//! - **`config`**: `pinwire.toml` loading and validation

pub mod config;
pub mod error;
pub mod server;
pub mod version;

pub use config::PinwireConfig;
pub use error::{ConfigError, ConfigResult};
pub use server::{ServerInfo, host_of};
pub use version::ClientVersion;
