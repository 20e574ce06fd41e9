//! Local-mode resolution
//!
//! Without a host, rcode normally just runs the editor binary. The exception
//! is a shell opened over plain SSH on a machine where the editor's remote
//! server is running: there the plain binary does not exist, but the server
//! ships a `remote-cli` that can talk to the editor through one of the IPC
//! sockets in the user's runtime directory. The same selection rules as for
//! remote discovery pick that socket.

use std::ffi::OsString;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::config::{DiscoveryConfig, EditorProfile};
use crate::error::{RcodeError, Result};
use crate::locator::rank_candidates;
use crate::time::{current_time_secs, system_time_secs};
use crate::types::{SocketCandidate, LOCAL_HOST};

/// Facts about the machine rcode runs on
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalEnvironment {
    /// Running inside an SSH login (`SSH_CONNECTION` or `SSH_CLIENT` set)
    pub in_ssh_session: bool,
    /// Home directory, where editor servers are installed
    pub home: Option<PathBuf>,
    /// Directory holding the editor's IPC sockets
    pub ipc_dir: PathBuf,
}

impl LocalEnvironment {
    /// Inspect the current process environment
    pub fn detect() -> Self {
        let in_ssh_session = std::env::var_os("SSH_CONNECTION").is_some()
            || std::env::var_os("SSH_CLIENT").is_some();
        Self {
            in_ssh_session,
            home: dirs::home_dir(),
            ipc_dir: default_ipc_dir(),
        }
    }

    /// An environment that always resolves to the plain editor binary
    pub fn plain() -> Self {
        Self {
            in_ssh_session: false,
            home: None,
            ipc_dir: default_ipc_dir(),
        }
    }
}

/// How to run the editor locally
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalInvocation {
    pub program: OsString,
    /// `(variable, socket)` to export when talking to a remote server's socket
    pub ipc: Option<(String, PathBuf)>,
}

/// Decide how local mode runs the editor for `profile`
pub async fn resolve_local(
    env: &LocalEnvironment,
    profile: &EditorProfile,
    discovery: &DiscoveryConfig,
) -> Result<LocalInvocation> {
    let plain = LocalInvocation {
        program: OsString::from(&profile.binary),
        ipc: None,
    };

    if !env.in_ssh_session {
        return Ok(plain);
    }
    let Some(server_cli) = env
        .home
        .as_deref()
        .and_then(|home| find_server_cli(home, profile))
    else {
        return Ok(plain);
    };

    tracing::debug!("Inside an editor server session, using {:?}", server_cli);

    let candidates = list_socket_candidates(&env.ipc_dir, profile)?;
    let ranked = rank_candidates(candidates, current_time_secs(), discovery.max_idle_time);

    let mut chosen = None;
    for candidate in ranked {
        if !discovery.probe_liveness || is_listening(Path::new(&candidate.path)).await {
            chosen = Some(candidate);
            break;
        }
        tracing::debug!("Skipping dead socket {}", candidate.path);
    }

    let chosen = chosen.ok_or_else(|| RcodeError::NoActiveSession {
        host: LOCAL_HOST.to_string(),
        editor: profile.binary.clone(),
    })?;

    Ok(LocalInvocation {
        program: server_cli.into_os_string(),
        ipc: Some((profile.ipc_env.clone(), PathBuf::from(chosen.path))),
    })
}

/// Find the newest installed server's CLI under `home`.
///
/// Handles both the legacy `<server_dir>/bin/<commit>/` layout and the
/// `<server_dir>/cli/servers/<build>/server/` layout.
pub fn find_server_cli(home: &Path, profile: &EditorProfile) -> Option<PathBuf> {
    let server_dir = home.join(profile.server_dir.as_deref()?);

    let mut roots: Vec<(u64, PathBuf)> = Vec::new();
    for (parent, suffix) in [
        (server_dir.join("bin"), None),
        (server_dir.join("cli").join("servers"), Some("server")),
    ] {
        let Ok(entries) = fs::read_dir(&parent) else {
            continue;
        };
        for entry in entries.flatten() {
            let mut root = entry.path();
            if let Some(suffix) = suffix {
                root.push(suffix);
            }
            if !root.is_dir() {
                continue;
            }
            let modified = fs::metadata(&root)
                .and_then(|m| m.modified())
                .map(system_time_secs)
                .unwrap_or(0);
            roots.push((modified, root));
        }
    }

    roots.sort_by(|a, b| b.cmp(a));
    roots.into_iter().find_map(|(_, root)| {
        [
            root.join("bin").join("remote-cli").join(&profile.binary),
            root.join("bin").join(&profile.binary),
        ]
        .into_iter()
        .find(|p| p.is_file())
    })
}

/// Sockets in `dir` matching the profile's pattern
pub fn list_socket_candidates(dir: &Path, profile: &EditorProfile) -> Result<Vec<SocketCandidate>> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    let mut candidates = Vec::new();
    for entry in entries.flatten() {
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        if !profile.matches_socket(name) {
            continue;
        }
        let Ok(metadata) = entry.metadata() else {
            continue;
        };
        if !is_socket(&metadata) {
            continue;
        }
        let modified = metadata.modified().map(system_time_secs).unwrap_or(0);
        candidates.push(SocketCandidate::new(
            entry.path().to_string_lossy().into_owned(),
            modified,
        ));
    }
    Ok(candidates)
}

/// Whether a Unix socket at `path` accepts connections
#[cfg(unix)]
pub async fn is_listening(path: &Path) -> bool {
    tokio::net::UnixStream::connect(path).await.is_ok()
}

#[cfg(not(unix))]
pub async fn is_listening(_path: &Path) -> bool {
    false
}

#[cfg(unix)]
fn is_socket(metadata: &fs::Metadata) -> bool {
    use std::os::unix::fs::FileTypeExt;
    metadata.file_type().is_socket()
}

#[cfg(not(unix))]
fn is_socket(_metadata: &fs::Metadata) -> bool {
    false
}

#[cfg(unix)]
fn default_ipc_dir() -> PathBuf {
    dirs::runtime_dir().unwrap_or_else(|| {
        let uid = unsafe { libc::getuid() };
        PathBuf::from(format!("/run/user/{}", uid))
    })
}

#[cfg(not(unix))]
fn default_ipc_dir() -> PathBuf {
    std::env::temp_dir()
}
