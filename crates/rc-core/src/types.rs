//! Core domain types

use std::fmt;

/// Host value that means "this machine, no SSH hop"
pub const LOCAL_HOST: &str = "local";

/// Whether a host string refers to the local machine
pub fn is_local_host(host: &str) -> bool {
    host == LOCAL_HOST
}

/// What the user asked to open against
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    /// No host given: run the editor on this machine
    Local,
    /// An SSH alias given on the command line, with the path being opened
    Explicit { host: String, path: Option<String> },
    /// A saved shortcut name
    Shortcut(String),
    /// The most recently used remote host
    Latest,
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Target::Local => write!(f, "local"),
            Target::Explicit { host, .. } => write!(f, "{}", host),
            Target::Shortcut(name) => write!(f, "shortcut '{}'", name),
            Target::Latest => write!(f, "latest"),
        }
    }
}

/// A live editor IPC endpoint found on a remote host
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteSession {
    /// SSH alias the socket lives behind
    pub host: String,
    /// Absolute path of the IPC socket on the remote filesystem
    pub ipc_socket: String,
    /// Unix milliseconds at which the socket was selected
    pub discovered_at: u64,
}

/// One socket file matching the editor's naming pattern
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SocketCandidate {
    pub path: String,
    /// Modification time, Unix seconds
    pub modified: u64,
}

impl SocketCandidate {
    pub fn new(path: impl Into<String>, modified: u64) -> Self {
        Self {
            path: path.into(),
            modified,
        }
    }
}

/// Lifecycle of a tunnel handle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TunnelState {
    /// Relay spawned, local socket not yet accepting
    Starting,
    /// Local socket accepted a connection
    Ready,
    /// Relay terminated and socket removed (or lease released)
    Closed,
}

impl fmt::Display for TunnelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TunnelState::Starting => write!(f, "starting"),
            TunnelState::Ready => write!(f, "ready"),
            TunnelState::Closed => write!(f, "closed"),
        }
    }
}
