// Server configuration.
//
// Loaded at startup from a TOML file; every field has a default, so the
// server runs with no file at all. CLI flags in `main.rs` override the
// loaded values. The moderator password is an opaque equality check — its
// storage here is deliberately plain, matching the rest of the protocol.

use std::io;

use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind address for the listening socket.
    pub address: String,
    /// Listen port.
    pub port: u16,
    /// Identity that triggers the password challenge and receives the
    /// moderator role on success.
    pub moderator_name: String,
    /// Expected answer to the password challenge.
    pub moderator_password: String,
    /// Admission cap for regular participants (the moderator is exempt).
    pub max_clients: u32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: "127.0.0.1".into(),
            port: 2024,
            moderator_name: "Admin".into(),
            moderator_password: "changeme".into(),
            max_clients: 10,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: io::Error,
    },
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },
}

impl ServerConfig {
    /// Load from a TOML file. A missing file yields the defaults; a present
    /// but unreadable or invalid file is a startup error.
    pub fn load(path: &str) -> Result<Self, ConfigError> {
        match std::fs::read_to_string(path) {
            Ok(text) => toml::from_str(&text).map_err(|source| ConfigError::Parse {
                path: path.into(),
                source,
            }),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Self::default()),
            Err(source) => Err(ConfigError::Read {
                path: path.into(),
                source,
            }),
        }
    }
}
