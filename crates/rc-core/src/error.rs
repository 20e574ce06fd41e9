//! Core error types for rcode

use std::path::PathBuf;
use thiserror::Error;

/// Convenience alias used throughout rc-core
pub type Result<T, E = RcodeError> = std::result::Result<T, E>;

/// Process exit status for resolution failures
pub const EXIT_RESOLUTION: u8 = 1;
/// Process exit status for tunnel failures
pub const EXIT_TUNNEL: u8 = 2;
/// Process exit status when the editor could not be run to completion
pub const EXIT_INVOCATION: u8 = 3;
/// Process exit status after SIGINT/SIGTERM
pub const EXIT_INTERRUPTED: u8 = 130;

/// Top-level error type for rcode
#[derive(Error, Debug)]
pub enum RcodeError {
    /// Bad user input
    #[error("{0}")]
    Validation(String),

    /// Unknown shortcut or no recorded session
    #[error(transparent)]
    NotFound(#[from] NotFoundError),

    /// The remote host has no discoverable editor IPC socket
    #[error(
        "no active {editor} session found on '{host}'; connect to it from the editor's remote SSH window first"
    )]
    NoActiveSession { host: String, editor: String },

    /// The remote host could not be queried
    #[error("failed to query '{host}': {reason}")]
    Discovery { host: String, reason: String },

    /// The relay process failed or never became ready
    #[error("tunnel to '{host}' failed to start: {reason}")]
    TunnelStart { host: String, reason: String },

    /// The editor command could not be run to completion
    #[error("editor invocation failed: {0}")]
    Invocation(String),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Registry file error
    #[error("registry error: {0}")]
    Registry(#[from] RegistryError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Interrupted by a signal before completion
    #[error("interrupted")]
    Interrupted,
}

impl RcodeError {
    /// Exit status the CLI reports for this error
    pub fn exit_code(&self) -> u8 {
        match self {
            RcodeError::TunnelStart { .. } => EXIT_TUNNEL,
            RcodeError::Invocation(_) => EXIT_INVOCATION,
            RcodeError::Interrupted => EXIT_INTERRUPTED,
            RcodeError::Validation(_)
            | RcodeError::NotFound(_)
            | RcodeError::NoActiveSession { .. }
            | RcodeError::Discovery { .. }
            | RcodeError::Config(_)
            | RcodeError::Registry(_)
            | RcodeError::Io(_) => EXIT_RESOLUTION,
        }
    }

    /// Build a tunnel start error
    pub fn tunnel(host: impl Into<String>, reason: impl Into<String>) -> Self {
        RcodeError::TunnelStart {
            host: host.into(),
            reason: reason.into(),
        }
    }
}

/// Lookup failures in the registry
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NotFoundError {
    /// No shortcut saved under this name
    #[error("no shortcut named '{0}'")]
    Shortcut(String),

    /// `--latest` used before any remote open succeeded
    #[error("no remote session recorded yet; open a remote path once first")]
    Latest,
}

/// Configuration-related errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Config file not found
    #[error("Config file not found: {0}")]
    NotFound(PathBuf),

    /// Invalid configuration
    #[error("Invalid config: {0}")]
    Invalid(String),

    /// TOML parse error
    #[error("TOML parse error: {0}")]
    Parse(#[from] toml::de::Error),

    /// No built-in or configured editor profile with this name
    #[error("unknown editor '{0}'")]
    UnknownEditor(String),
}

/// Errors reading or writing the registry file
#[derive(Error, Debug)]
pub enum RegistryError {
    /// The file exists but is not valid
    #[error("{path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    /// TOML serialize error
    #[error("TOML serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// Filesystem failure while reading, locking or persisting
    #[error("{path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
