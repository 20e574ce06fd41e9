//! Client configuration

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use super::editor::EditorProfile;
use super::serde_utils::{duration_millis, duration_secs};
use crate::error::ConfigError;

/// Configuration for the rcode command
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RcodeConfig {
    /// Editor profile used when `--editor` is not given
    pub editor: String,

    /// Additional or overriding editor profiles, keyed by name
    pub editors: BTreeMap<String, EditorProfile>,

    /// How the system ssh client is invoked
    pub ssh: SshConfig,

    /// Tunnel supervision settings
    pub tunnel: TunnelConfig,

    /// Socket discovery settings
    pub discovery: DiscoveryConfig,

    /// Registry file location (defaults to the config directory)
    pub registry_path: Option<PathBuf>,

    /// Directory holding local tunnel sockets (defaults to the runtime directory)
    pub runtime_dir: Option<PathBuf>,
}

impl Default for RcodeConfig {
    fn default() -> Self {
        Self {
            editor: "code".to_string(),
            editors: BTreeMap::new(),
            ssh: SshConfig::default(),
            tunnel: TunnelConfig::default(),
            discovery: DiscoveryConfig::default(),
            registry_path: None,
            runtime_dir: None,
        }
    }
}

impl RcodeConfig {
    /// Resolve an editor profile by name, preferring configured profiles
    /// over built-in ones. `None` selects the configured default.
    pub fn editor_profile(&self, name: Option<&str>) -> Result<EditorProfile, ConfigError> {
        let name = name.unwrap_or(&self.editor);
        let profile = self
            .editors
            .get(name)
            .cloned()
            .or_else(|| EditorProfile::builtin(name))
            .ok_or_else(|| ConfigError::UnknownEditor(name.to_string()))?;
        profile.validate()?;
        Ok(profile)
    }

    /// Registry file path
    pub fn registry_path(&self) -> PathBuf {
        self.registry_path
            .clone()
            .unwrap_or_else(super::default_registry_path)
    }

    /// Directory for local tunnel sockets
    pub fn runtime_dir(&self) -> PathBuf {
        self.runtime_dir
            .clone()
            .unwrap_or_else(super::default_runtime_dir)
    }
}

/// Settings for the system ssh client
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SshConfig {
    /// ssh program
    pub program: String,

    /// Connection timeout passed as `-o ConnectTimeout`
    #[serde(with = "duration_secs")]
    pub connect_timeout: Duration,

    /// Extra arguments placed before the host (e.g. `-o`, `ControlMaster=auto`)
    pub options: Vec<String>,
}

impl Default for SshConfig {
    fn default() -> Self {
        Self {
            program: "ssh".to_string(),
            connect_timeout: Duration::from_secs(10),
            options: Vec::new(),
        }
    }
}

impl SshConfig {
    /// Arguments common to every ssh invocation, placed before the host.
    ///
    /// Batch mode keeps ssh from prompting on a terminal it does not own.
    pub fn base_args(&self) -> Vec<String> {
        let mut args = vec![
            "-o".to_string(),
            "BatchMode=yes".to_string(),
            "-o".to_string(),
            format!("ConnectTimeout={}", self.connect_timeout.as_secs().max(1)),
        ];
        args.extend(self.options.iter().cloned());
        args
    }
}

/// Which relay carries bytes between the local and remote sockets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelayKind {
    /// OpenSSH stream-local forwarding (`ssh -N -L local.sock:remote.sock`)
    Ssh,
    /// `socat` listening locally, piping each connection through ssh
    Socat,
}

/// Tunnel supervision settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TunnelConfig {
    /// Relay implementation
    pub relay: RelayKind,

    /// socat program used by the `socat` relay (locally and remotely)
    pub socat_program: String,

    /// How long to wait for the local socket to accept connections
    #[serde(with = "duration_millis")]
    pub ready_timeout: Duration,

    /// Readiness polling backoff
    pub backoff: BackoffConfig,

    /// Leave tunnels running for reuse by later invocations
    pub keep_warm: bool,

    /// Idle time after which a warm tunnel is torn down
    #[serde(with = "duration_secs")]
    pub warm_idle_timeout: Duration,
}

impl Default for TunnelConfig {
    fn default() -> Self {
        Self {
            relay: RelayKind::Ssh,
            socat_program: "socat".to_string(),
            ready_timeout: Duration::from_secs(2),
            backoff: BackoffConfig::default(),
            keep_warm: false,
            warm_idle_timeout: Duration::from_secs(10 * 60),
        }
    }
}

/// Exponential backoff configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackoffConfig {
    /// Initial delay
    #[serde(with = "duration_millis")]
    pub initial: Duration,

    /// Maximum delay
    #[serde(with = "duration_millis")]
    pub max: Duration,

    /// Multiplier for each retry
    pub multiplier: f64,

    /// Jitter factor (0.0 to 1.0)
    pub jitter: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial: Duration::from_millis(25),
            max: Duration::from_millis(400),
            multiplier: 2.0,
            jitter: 0.25,
        }
    }
}

/// Socket discovery settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    /// Ignore sockets not modified within this window (0 disables the filter)
    #[serde(with = "duration_secs")]
    pub max_idle_time: Duration,

    /// Probe candidates for a listener when more than one matches
    pub probe_liveness: bool,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            max_idle_time: Duration::from_secs(4 * 60 * 60),
            probe_liveness: true,
        }
    }
}
