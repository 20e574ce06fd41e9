//! Editor profiles
//!
//! A profile tells rcode how a particular VS Code family editor is launched
//! and how its remote helper names the IPC sockets it listens on.

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Environment variable the VS Code CLI reads to find its IPC socket
pub const VSCODE_IPC_ENV: &str = "VSCODE_IPC_HOOK_CLI";

/// Socket naming pattern used by the VS Code remote server
pub const VSCODE_SOCKET_PATTERN: &str = "vscode-ipc-*.sock";

/// Launch and discovery settings for one editor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EditorProfile {
    /// Editor CLI binary (name on PATH or absolute path)
    pub binary: String,

    /// Environment variable carrying the IPC socket path
    #[serde(default = "default_ipc_env")]
    pub ipc_env: String,

    /// File name pattern of the helper's IPC sockets (a single `*` wildcard)
    #[serde(default = "default_socket_pattern")]
    pub socket_pattern: String,

    /// Directory under `$HOME` where the editor installs its remote server
    #[serde(default)]
    pub server_dir: Option<String>,
}

fn default_ipc_env() -> String {
    VSCODE_IPC_ENV.to_string()
}

fn default_socket_pattern() -> String {
    VSCODE_SOCKET_PATTERN.to_string()
}

impl EditorProfile {
    /// Visual Studio Code
    pub fn vscode() -> Self {
        Self {
            binary: "code".to_string(),
            ipc_env: default_ipc_env(),
            socket_pattern: default_socket_pattern(),
            server_dir: Some(".vscode-server".to_string()),
        }
    }

    /// Cursor
    pub fn cursor() -> Self {
        Self {
            binary: "cursor".to_string(),
            ipc_env: default_ipc_env(),
            socket_pattern: default_socket_pattern(),
            server_dir: Some(".cursor-server".to_string()),
        }
    }

    /// Look up a profile shipped with rcode
    pub fn builtin(name: &str) -> Option<Self> {
        match name {
            "code" | "vscode" => Some(Self::vscode()),
            "cursor" => Some(Self::cursor()),
            _ => None,
        }
    }

    /// Check that the profile can be safely embedded in a remote shell script
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.binary.trim().is_empty() {
            return Err(ConfigError::Invalid("editor binary must not be empty".into()));
        }
        if self.ipc_env.is_empty()
            || !self
                .ipc_env
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_')
        {
            return Err(ConfigError::Invalid(format!(
                "invalid ipc_env '{}'",
                self.ipc_env
            )));
        }
        let wildcards = self.socket_pattern.matches('*').count();
        let safe = self
            .socket_pattern
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-' | '*'));
        if wildcards > 1 || !safe || self.socket_pattern.is_empty() {
            return Err(ConfigError::Invalid(format!(
                "invalid socket_pattern '{}'",
                self.socket_pattern
            )));
        }
        Ok(())
    }

    /// Check whether a socket file name matches this profile's pattern
    pub fn matches_socket(&self, file_name: &str) -> bool {
        match self.socket_pattern.split_once('*') {
            Some((prefix, suffix)) => {
                file_name.len() >= prefix.len() + suffix.len()
                    && file_name.starts_with(prefix)
                    && file_name.ends_with(suffix)
            }
            None => file_name == self.socket_pattern,
        }
    }
}
