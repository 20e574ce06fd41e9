//! Warm tunnel pool
//!
//! Relays started with keep-warm are detached from the invocation and
//! recorded as one lease file per `(host, remote socket)` pair. Later
//! invocations reuse a lease whose relay is alive and whose socket accepts
//! connections. Leases idle longer than the pool's timeout, or whose relay
//! has died, are evicted: the relay is terminated and its socket removed.
//!
//! All pool access happens while holding the pool lock, see
//! [`WarmPool::lock`].

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{RcodeError, RegistryError, Result};
use crate::fsutil::{self, FileLock};
use crate::process::{is_process_alive, terminate};
use crate::time::{current_time_millis, elapsed_duration};

/// A detached relay kept running for reuse
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WarmLease {
    pub host: String,
    pub remote_socket: String,
    pub local_socket: PathBuf,
    pub pid: u32,
    /// Unix milliseconds of the last invocation that used the relay
    pub last_used: u64,
}

/// Directory of lease files
#[derive(Debug, Clone)]
pub struct WarmPool {
    dir: PathBuf,
    idle_timeout: Duration,
}

impl WarmPool {
    pub fn new(dir: impl Into<PathBuf>, idle_timeout: Duration) -> Self {
        Self {
            dir: dir.into(),
            idle_timeout,
        }
    }

    /// Take the pool lock. Blocks while another invocation holds it.
    pub fn lock(&self) -> Result<WarmPoolGuard<'_>> {
        fsutil::create_private_dir(&self.dir)?;
        let lock = FileLock::acquire(&self.dir.join(".lock"))?;
        Ok(WarmPoolGuard { pool: self, _lock: lock })
    }

    fn key(host: &str, remote_socket: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(host.as_bytes());
        hasher.update([0u8]);
        hasher.update(remote_socket.as_bytes());
        hex::encode(&hasher.finalize()[..8])
    }

    fn lease_path(&self, host: &str, remote_socket: &str) -> PathBuf {
        self.dir
            .join(format!("{}.toml", Self::key(host, remote_socket)))
    }

    /// File receiving the relay's stderr
    pub fn log_path(&self, host: &str, remote_socket: &str) -> PathBuf {
        self.dir
            .join(format!("{}.log", Self::key(host, remote_socket)))
    }
}

/// Exclusive access to a [`WarmPool`]
pub struct WarmPoolGuard<'a> {
    pool: &'a WarmPool,
    _lock: FileLock,
}

impl WarmPoolGuard<'_> {
    /// Tear down leases that are idle past the timeout or whose relay died.
    /// Returns how many were removed.
    pub fn evict_idle(&self) -> Result<usize> {
        let mut evicted = 0;

        for (path, lease) in self.leases()? {
            let Some(lease) = lease else {
                tracing::warn!("Removing unreadable lease {:?}", path);
                remove_if_exists(&path)?;
                evicted += 1;
                continue;
            };

            let dead = !is_process_alive(lease.pid);
            let idle = elapsed_duration(lease.last_used) > self.pool.idle_timeout;
            if dead || idle {
                tracing::info!(
                    "Evicting warm tunnel to {} (pid {}, {})",
                    lease.host,
                    lease.pid,
                    if dead { "relay exited" } else { "idle" }
                );
                self.release(&path, &lease)?;
                evicted += 1;
            }
        }
        Ok(evicted)
    }

    /// Reuse the lease for `(host, remote_socket)` if its relay is alive and
    /// listening, refreshing its last-used time. A broken lease is released.
    pub fn acquire(&self, host: &str, remote_socket: &str) -> Result<Option<WarmLease>> {
        let path = self.pool.lease_path(host, remote_socket);
        let Some(mut lease) = read_lease(&path)? else {
            return Ok(None);
        };

        if !is_process_alive(lease.pid) || !accepts_connections(&lease.local_socket) {
            tracing::debug!("Warm tunnel to {} is not usable, releasing", host);
            self.release(&path, &lease)?;
            return Ok(None);
        }

        lease.last_used = current_time_millis();
        write_lease(&path, &lease)?;
        Ok(Some(lease))
    }

    /// Persist a new lease, replacing any previous one for the same pair
    pub fn record(&self, lease: &WarmLease) -> Result<()> {
        let path = self.pool.lease_path(&lease.host, &lease.remote_socket);
        if let Some(previous) = read_lease(&path)? {
            if previous.pid != lease.pid {
                self.release(&path, &previous)?;
            }
        }
        write_lease(&path, lease)
    }

    /// All leases in the pool. `None` marks a file that failed to parse.
    pub fn leases(&self) -> Result<Vec<(PathBuf, Option<WarmLease>)>> {
        let mut out = Vec::new();
        let entries = match std::fs::read_dir(&self.pool.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(out),
            Err(e) => return Err(e.into()),
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("toml") {
                continue;
            }
            let lease = read_lease(&path).unwrap_or(None);
            out.push((path, lease));
        }
        out.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(out)
    }

    fn release(&self, path: &Path, lease: &WarmLease) -> Result<()> {
        if is_process_alive(lease.pid) {
            if let Err(e) = terminate(lease.pid) {
                tracing::warn!("Failed to stop relay pid {}: {}", lease.pid, e);
            }
        }
        remove_if_exists(&lease.local_socket)?;
        remove_if_exists(&self.pool.log_path(&lease.host, &lease.remote_socket))?;
        remove_if_exists(path)
    }
}

fn read_lease(path: &Path) -> Result<Option<WarmLease>> {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(source) => {
            return Err(RegistryError::Io {
                path: path.to_path_buf(),
                source,
            }
            .into())
        }
    };
    toml::from_str(&content).map(Some).map_err(|source| {
        RegistryError::Parse {
            path: path.to_path_buf(),
            source,
        }
        .into()
    })
}

fn write_lease(path: &Path, lease: &WarmLease) -> Result<()> {
    let content = toml::to_string_pretty(lease).map_err(RegistryError::from)?;
    fsutil::write_atomic(path, content.as_bytes()).map_err(|source| {
        RcodeError::from(RegistryError::Io {
            path: path.to_path_buf(),
            source,
        })
    })
}

fn remove_if_exists(path: &Path) -> Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

#[cfg(unix)]
fn accepts_connections(path: &Path) -> bool {
    std::os::unix::net::UnixStream::connect(path).is_ok()
}

#[cfg(not(unix))]
fn accepts_connections(_path: &Path) -> bool {
    false
}
