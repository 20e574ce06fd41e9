//! Configuration management for rcode

mod client;
mod editor;
pub mod serde_utils;

pub use client::{BackoffConfig, DiscoveryConfig, RcodeConfig, RelayKind, SshConfig, TunnelConfig};
pub use editor::{EditorProfile, VSCODE_IPC_ENV, VSCODE_SOCKET_PATTERN};

use crate::error::ConfigError;
use std::path::{Path, PathBuf};

/// Get the default configuration directory
pub fn default_config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("rcode")
}

/// Get the default configuration file path
pub fn default_config_path() -> PathBuf {
    default_config_dir().join("config.toml")
}

/// Get the default registry file path
pub fn default_registry_path() -> PathBuf {
    default_config_dir().join("registry.toml")
}

/// Get the default directory for local tunnel sockets
///
/// Prefers `$XDG_RUNTIME_DIR` (per-user, tmpfs, short path) and falls back to
/// the system temp directory.
pub fn default_runtime_dir() -> PathBuf {
    dirs::runtime_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("rcode")
}

/// Load configuration from a file
pub fn load_config<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, ConfigError> {
    if !path.exists() {
        return Err(ConfigError::NotFound(path.to_path_buf()));
    }

    let content = std::fs::read_to_string(path)
        .map_err(|e| ConfigError::Invalid(format!("Failed to read config: {}", e)))?;

    let config: T = toml::from_str(&content)?;
    Ok(config)
}

/// Load the client configuration, falling back to defaults when the file is
/// missing. An explicitly given path must exist.
pub fn load_or_default(path: Option<&Path>) -> Result<RcodeConfig, ConfigError> {
    match path {
        Some(path) => load_config(path),
        None => {
            let default_path = default_config_path();
            if default_path.exists() {
                load_config(&default_path)
            } else {
                tracing::debug!("No config at {:?}, using defaults", default_path);
                Ok(RcodeConfig::default())
            }
        }
    }
}
