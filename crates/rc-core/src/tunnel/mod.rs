//! Tunnel supervision
//!
//! A tunnel is one relay process plus the local socket it listens on. The
//! supervisor picks a fresh socket path, starts the relay and polls the socket
//! until it accepts a connection. A [`TunnelHandle`] owns the relay: closing
//! or dropping it kills the process and removes the socket, so a tunnel never
//! outlives the invocation that opened it. Warm tunnels are the exception;
//! they are detached and handed to the [`WarmPool`].

mod backoff;
mod relay;
mod warm;

pub use backoff::ExponentialBackoff;
pub use relay::{relay_from_config, Relay, SocatRelay, SshForwardRelay};
pub use warm::{WarmLease, WarmPool, WarmPoolGuard};

use sha2::{Digest, Sha256};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStderr};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::config::{BackoffConfig, RcodeConfig};
use crate::error::{RcodeError, Result};
use crate::fsutil;
use crate::process::{detach_from_terminal, tie_to_parent};
use crate::time::current_time_millis;
use crate::types::{RemoteSession, TunnelState};

/// Longest socket path accepted by every supported platform (`sun_path` is
/// 104 bytes on macOS and the BSDs, 108 on Linux, including the NUL)
const MAX_SOCKET_PATH: usize = 103;

/// Lines of relay stderr kept for error messages
const STDERR_TAIL_LINES: usize = 5;

/// How long teardown waits for a killed relay to be reaped
const REAP_TIMEOUT: Duration = Duration::from_secs(1);

/// Starts relays and hands out [`TunnelHandle`]s
pub struct TunnelSupervisor {
    relay: Box<dyn Relay>,
    socket_dir: PathBuf,
    ready_timeout: Duration,
    backoff: BackoffConfig,
}

impl TunnelSupervisor {
    pub fn new(
        relay: Box<dyn Relay>,
        socket_dir: impl Into<PathBuf>,
        ready_timeout: Duration,
        backoff: BackoffConfig,
    ) -> Self {
        Self {
            relay,
            socket_dir: socket_dir.into(),
            ready_timeout,
            backoff,
        }
    }

    pub fn from_config(config: &RcodeConfig) -> Self {
        Self::new(
            relay_from_config(config),
            config.runtime_dir(),
            config.tunnel.ready_timeout,
            config.tunnel.backoff.clone(),
        )
    }

    /// Pick an unused socket path for a tunnel to `host`:
    /// `<socket_dir>/<host digest>-<pid>-<random>.sock`
    pub fn allocate_socket_path(&self, host: &str) -> Result<PathBuf> {
        fsutil::create_private_dir(&self.socket_dir)?;

        let digest = hex::encode(Sha256::digest(host.as_bytes()));
        let pid = std::process::id();
        for _ in 0..16 {
            let path = self.socket_dir.join(format!(
                "{}-{}-{:08x}.sock",
                &digest[..8],
                pid,
                rand::random::<u32>()
            ));
            if path.as_os_str().len() > MAX_SOCKET_PATH {
                return Err(RcodeError::tunnel(
                    host,
                    format!(
                        "socket path {:?} is too long; set runtime_dir to a shorter directory",
                        path
                    ),
                ));
            }
            if !path.exists() {
                return Ok(path);
            }
        }
        Err(RcodeError::tunnel(host, "could not allocate a unique socket path"))
    }

    /// Start a relay owned by the returned handle and wait for it to listen
    pub async fn open(&self, session: &RemoteSession) -> Result<TunnelHandle> {
        let host = session.host.as_str();
        let local = self.allocate_socket_path(host)?;

        let mut cmd = self.relay.command(host, &local, &session.ipc_socket)?;
        cmd.stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        tie_to_parent(&mut cmd);

        tracing::debug!("Starting relay {:?}", cmd.as_std());
        let mut child = cmd
            .spawn()
            .map_err(|e| RcodeError::tunnel(host, format!("failed to start relay: {}", e)))?;
        let pid = child.id();
        let tail = StderrTail::capture(child.stderr.take());

        let mut handle = TunnelHandle {
            host: host.to_string(),
            remote_socket: session.ipc_socket.clone(),
            local_socket: local,
            child: Some(child),
            pid,
            state: TunnelState::Starting,
            warm: false,
        };

        let ready = match handle.child.as_mut() {
            Some(child) => self.wait_ready(child, &handle.local_socket).await,
            None => Err("relay handle lost".to_string()),
        };
        match ready {
            Ok(()) => {
                handle.state = TunnelState::Ready;
                tracing::info!(
                    "Tunnel {:?} -> {}:{} ready",
                    handle.local_socket,
                    handle.host,
                    handle.remote_socket
                );
                Ok(handle)
            }
            Err(reason) => {
                handle.close().await;
                Err(RcodeError::tunnel(host, with_tail(reason, tail.finish().await)))
            }
        }
    }

    /// Reuse a warm relay for `session` or start a detached one and lease it
    pub async fn open_warm(&self, session: &RemoteSession, pool: &WarmPool) -> Result<TunnelHandle> {
        let host = session.host.as_str();
        let guard = pool.lock()?;

        match guard.evict_idle() {
            Ok(0) => {}
            Ok(n) => tracing::debug!("Evicted {} warm tunnel(s)", n),
            Err(e) => tracing::warn!("Failed to evict warm tunnels: {}", e),
        }

        if let Some(lease) = guard.acquire(host, &session.ipc_socket)? {
            tracing::info!("Reusing warm tunnel {:?} (pid {})", lease.local_socket, lease.pid);
            return Ok(TunnelHandle::leased(lease));
        }

        let local = self.allocate_socket_path(host)?;
        let log_path = pool.log_path(host, &session.ipc_socket);
        let log = std::fs::File::create(&log_path)?;

        let mut cmd = self.relay.command(host, &local, &session.ipc_socket)?;
        cmd.stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::from(log));
        detach_from_terminal(&mut cmd);

        tracing::debug!("Starting warm relay {:?}", cmd.as_std());
        let child = cmd
            .spawn()
            .map_err(|e| RcodeError::tunnel(host, format!("failed to start relay: {}", e)))?;
        // Killed on every exit path until the lease is on disk
        let mut pending = PendingRelay::new(child, local.clone());

        if let Err(reason) = self.wait_ready(pending.child_mut(), &local).await {
            pending.abort().await;
            let tail = std::fs::read_to_string(&log_path)
                .map(|s| last_lines(&s, STDERR_TAIL_LINES))
                .unwrap_or_default();
            return Err(RcodeError::tunnel(host, with_tail(reason, tail)));
        }

        let lease = WarmLease {
            host: host.to_string(),
            remote_socket: session.ipc_socket.clone(),
            local_socket: local,
            pid: pending.pid(),
            last_used: current_time_millis(),
        };
        guard.record(&lease)?;
        pending.disarm();
        tracing::info!("Warm tunnel {:?} leased (pid {})", lease.local_socket, lease.pid);

        Ok(TunnelHandle::leased(lease))
    }

    /// Poll the local socket until it accepts a connection.
    ///
    /// A second window is granted when the first expires with the relay still
    /// running. Returns the failure reason otherwise.
    async fn wait_ready(&self, child: &mut Child, local: &Path) -> std::result::Result<(), String> {
        let mut backoff = ExponentialBackoff::from_config(&self.backoff);
        let mut deadline = Instant::now() + self.ready_timeout;
        let mut extended = false;

        loop {
            match child.try_wait() {
                Ok(Some(status)) => return Err(format!("relay exited early ({})", status)),
                Ok(None) => {}
                Err(e) => return Err(format!("failed to poll relay: {}", e)),
            }

            if is_listening(local).await {
                return Ok(());
            }

            let now = Instant::now();
            if now >= deadline {
                if extended {
                    return Err(format!(
                        "local socket did not become ready within {:?}",
                        self.ready_timeout * 2
                    ));
                }
                tracing::debug!("Relay still starting, extending readiness window");
                extended = true;
                deadline = now + self.ready_timeout;
                backoff.reset();
                continue;
            }

            tokio::time::sleep(backoff.next_delay_within(deadline - now)).await;
        }
    }
}

/// A running (or closed) tunnel
#[derive(Debug)]
pub struct TunnelHandle {
    host: String,
    remote_socket: String,
    local_socket: PathBuf,
    child: Option<Child>,
    pid: Option<u32>,
    state: TunnelState,
    warm: bool,
}

impl TunnelHandle {
    fn leased(lease: WarmLease) -> Self {
        Self {
            host: lease.host,
            remote_socket: lease.remote_socket,
            local_socket: lease.local_socket,
            child: None,
            pid: Some(lease.pid),
            state: TunnelState::Ready,
            warm: true,
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn remote_socket(&self) -> &str {
        &self.remote_socket
    }

    /// Socket the editor CLI should connect to
    pub fn local_socket(&self) -> &Path {
        &self.local_socket
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn state(&self) -> TunnelState {
        self.state
    }

    /// Whether the relay belongs to the warm pool rather than this handle
    pub fn is_warm(&self) -> bool {
        self.warm
    }

    /// Stop the relay and remove the socket. Warm tunnels are left running.
    /// Safe to call more than once.
    pub async fn close(&mut self) {
        if self.state == TunnelState::Closed {
            return;
        }
        if let Some(mut child) = self.child.take() {
            if let Err(e) = child.start_kill() {
                tracing::debug!("Relay already gone: {}", e);
            }
            if tokio::time::timeout(REAP_TIMEOUT, child.wait()).await.is_err() {
                tracing::warn!("Relay pid {:?} did not exit after kill", self.pid);
            }
        }
        if !self.warm {
            remove_socket(&self.local_socket);
        }
        self.state = TunnelState::Closed;
        tracing::debug!("Tunnel {:?} closed", self.local_socket);
    }
}

impl Drop for TunnelHandle {
    fn drop(&mut self) {
        if self.state == TunnelState::Closed || self.warm {
            return;
        }
        if let Some(child) = self.child.as_mut() {
            let _ = child.start_kill();
        }
        remove_socket(&self.local_socket);
    }
}

/// A detached relay that is not yet recorded in the warm pool.
///
/// Dropping it kills the relay and removes its socket, so a cancelled or
/// failed warm open leaves nothing behind.
struct PendingRelay {
    child: Child,
    socket: PathBuf,
    armed: bool,
}

impl PendingRelay {
    fn new(child: Child, socket: PathBuf) -> Self {
        Self {
            child,
            socket,
            armed: true,
        }
    }

    fn child_mut(&mut self) -> &mut Child {
        &mut self.child
    }

    fn pid(&self) -> u32 {
        self.child.id().unwrap_or_default()
    }

    /// Kill the relay and wait briefly for it to be reaped
    async fn abort(mut self) {
        self.armed = false;
        let _ = self.child.start_kill();
        let _ = tokio::time::timeout(REAP_TIMEOUT, self.child.wait()).await;
        remove_socket(&self.socket);
    }

    /// Hand the relay over to the warm pool
    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for PendingRelay {
    fn drop(&mut self) {
        if self.armed {
            let _ = self.child.start_kill();
            remove_socket(&self.socket);
        }
    }
}

/// Last lines of a relay's stderr, collected in the background
struct StderrTail {
    lines: Arc<Mutex<VecDeque<String>>>,
    task: Option<JoinHandle<()>>,
}

impl StderrTail {
    fn capture(stderr: Option<ChildStderr>) -> Self {
        let lines = Arc::new(Mutex::new(VecDeque::new()));
        let task = stderr.map(|stderr| {
            let lines = Arc::clone(&lines);
            tokio::spawn(async move {
                let mut reader = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = reader.next_line().await {
                    tracing::debug!("relay: {}", line);
                    if let Ok(mut lines) = lines.lock() {
                        if lines.len() == STDERR_TAIL_LINES {
                            lines.pop_front();
                        }
                        lines.push_back(line);
                    }
                }
            })
        });
        Self { lines, task }
    }

    /// Wait briefly for the relay's stderr to close and return the tail
    async fn finish(mut self) -> String {
        if let Some(task) = self.task.take() {
            let _ = tokio::time::timeout(REAP_TIMEOUT, task).await;
        }
        self.lines
            .lock()
            .map(|lines| lines.iter().cloned().collect::<Vec<_>>().join("; "))
            .unwrap_or_default()
    }
}

fn with_tail(reason: String, tail: String) -> String {
    let tail = tail.trim();
    if tail.is_empty() {
        reason
    } else {
        format!("{}: {}", reason, tail)
    }
}

fn last_lines(s: &str, n: usize) -> String {
    let lines: Vec<_> = s.lines().map(str::trim).filter(|l| !l.is_empty()).collect();
    lines[lines.len().saturating_sub(n)..].join("; ")
}

fn remove_socket(path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!("Failed to remove {:?}: {}", path, e),
    }
}

#[cfg(unix)]
async fn is_listening(path: &Path) -> bool {
    tokio::net::UnixStream::connect(path).await.is_ok()
}

#[cfg(not(unix))]
async fn is_listening(_path: &Path) -> bool {
    false
}


#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;
    use crate::process::is_process_alive;
    use tempfile::TempDir;

    fn session() -> RemoteSession {
        RemoteSession {
            host: "myhost".into(),
            ipc_socket: "/run/user/1000/vscode-ipc-1.sock".into(),
            discovered_at: current_time_millis(),
        }
    }

    #[test]
    fn test_socket_paths_are_unique_and_tagged() {
        let dir = TempDir::new().unwrap();
        let sup = supervisor(FixtureRelay::listening(), dir.path(), Duration::from_secs(1));

        let a = sup.allocate_socket_path("myhost").unwrap();
        let b = sup.allocate_socket_path("myhost").unwrap();
        assert_ne!(a, b);

        let name = a.file_name().unwrap().to_str().unwrap();
        assert!(name.ends_with(".sock"));
        assert!(name.contains(&format!("-{}-", std::process::id())));
    }

    #[test]
    fn test_overlong_socket_dir_is_rejected() {
        let dir = TempDir::new().unwrap();
        let deep = dir.path().join("d".repeat(120));
        let sup = supervisor(FixtureRelay::listening(), &deep, Duration::from_secs(1));
        assert!(matches!(
            sup.allocate_socket_path("myhost"),
            Err(RcodeError::TunnelStart { .. })
        ));
    }

    #[tokio::test]
    async fn test_two_tunnels_are_independent() {
        let dir = TempDir::new().unwrap();
        let sup = supervisor(FixtureRelay::listening(), dir.path(), Duration::from_secs(1));

        let mut first = sup.open(&session()).await.unwrap();
        let mut second = sup.open(&session()).await.unwrap();
        assert_eq!(first.state(), TunnelState::Ready);
        assert_eq!(second.state(), TunnelState::Ready);
        assert_ne!(first.local_socket(), second.local_socket());

        first.close().await;
        assert_eq!(first.state(), TunnelState::Closed);
        assert!(!first.local_socket().exists());
        assert!(!is_process_alive(first.pid().unwrap()));

        assert_eq!(second.state(), TunnelState::Ready);
        assert!(second.local_socket().exists());
        assert!(is_process_alive(second.pid().unwrap()));
        second.close().await;
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let sup = supervisor(FixtureRelay::listening(), dir.path(), Duration::from_secs(1));

        let mut handle = sup.open(&session()).await.unwrap();
        handle.close().await;
        handle.close().await;
        assert_eq!(handle.state(), TunnelState::Closed);
    }

    #[tokio::test]
    async fn test_drop_tears_down() {
        let dir = TempDir::new().unwrap();
        let sup = supervisor(FixtureRelay::listening(), dir.path(), Duration::from_secs(1));

        let handle = sup.open(&session()).await.unwrap();
        let socket = handle.local_socket().to_path_buf();
        assert!(socket.exists());
        drop(handle);
        assert!(!socket.exists());
    }

    #[tokio::test]
    async fn test_early_exit_reports_stderr() {
        let dir = TempDir::new().unwrap();
        let relay = FixtureRelay::new(false, &["sh", "-c", "echo boom >&2; exit 3"]);
        let sup = supervisor(relay, dir.path(), Duration::from_secs(2));

        let err = sup.open(&session()).await.unwrap_err();
        match err {
            RcodeError::TunnelStart { host, reason } => {
                assert_eq!(host, "myhost");
                assert!(reason.contains("exited early"), "{}", reason);
                assert!(reason.contains("boom"), "{}", reason);
            }
            other => panic!("expected tunnel error, got {:?}", other),
        }
        let leftovers: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
        assert!(leftovers.is_empty());
    }

    #[tokio::test]
    async fn test_never_ready_times_out() {
        let dir = TempDir::new().unwrap();
        let relay = FixtureRelay::new(false, &["sleep", "30"]);
        let sup = supervisor(relay, dir.path(), Duration::from_millis(100));

        let started = std::time::Instant::now();
        let err = sup.open(&session()).await.unwrap_err();
        assert!(matches!(err, RcodeError::TunnelStart { .. }));
        assert!(err.to_string().contains("did not become ready"));
        // Both windows elapse before giving up
        assert!(started.elapsed() >= Duration::from_millis(200));
    }

    #[tokio::test]
    async fn test_spawn_failure() {
        let dir = TempDir::new().unwrap();
        let relay = FixtureRelay::new(false, &["/nonexistent/relay-binary"]);
        let sup = supervisor(relay, dir.path(), Duration::from_millis(100));

        let err = sup.open(&session()).await.unwrap_err();
        assert!(err.to_string().contains("failed to start relay"));
    }

    /// A relay that never listens and writes its pid to `pid_file`
    fn silent_relay(pid_file: &Path) -> FixtureRelay {
        let script = format!("echo $$ > '{}'; exec sleep 30", pid_file.display());
        FixtureRelay::new(false, &["sh", "-c", script.as_str()])
    }

    async fn read_pid(pid_file: &Path) -> u32 {
        for _ in 0..200 {
            if let Ok(s) = std::fs::read_to_string(pid_file) {
                if let Ok(pid) = s.trim().parse() {
                    return pid;
                }
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("relay never wrote {:?}", pid_file);
    }

    /// Gone or a zombie awaiting its reaper
    fn has_exited(pid: u32) -> bool {
        match std::fs::read_to_string(format!("/proc/{}/stat", pid)) {
            Ok(stat) => stat
                .rsplit(')')
                .next()
                .map(|rest| rest.trim_start().starts_with('Z'))
                .unwrap_or(false),
            Err(_) => !is_process_alive(pid),
        }
    }

    async fn wait_exited(pid: u32) -> bool {
        for _ in 0..200 {
            if has_exited(pid) {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        false
    }

    fn sockets_in(dir: &Path) -> Vec<PathBuf> {
        std::fs::read_dir(dir)
            .unwrap()
            .filter_map(|e| e.ok().map(|e| e.path()))
            .filter(|p| p.extension().is_some_and(|ext| ext == "sock"))
            .collect()
    }

    #[tokio::test]
    async fn test_cancelled_open_kills_relay() {
        let dir = TempDir::new().unwrap();
        let pid_file = dir.path().join("relay.pid");
        let sup = supervisor(silent_relay(&pid_file), dir.path(), Duration::from_secs(5));

        let result = tokio::time::timeout(Duration::from_millis(300), sup.open(&session())).await;
        assert!(result.is_err());

        let pid = read_pid(&pid_file).await;
        assert!(wait_exited(pid).await, "relay {} still running", pid);
        assert!(sockets_in(dir.path()).is_empty());
    }

    #[tokio::test]
    async fn test_cancelled_warm_open_kills_relay() {
        let dir = TempDir::new().unwrap();
        let pid_file = dir.path().join("relay.pid");
        let sup = supervisor(silent_relay(&pid_file), dir.path(), Duration::from_secs(5));
        let pool = WarmPool::new(dir.path().join("warm"), Duration::from_secs(600));

        let result =
            tokio::time::timeout(Duration::from_millis(300), sup.open_warm(&session(), &pool)).await;
        assert!(result.is_err());

        let pid = read_pid(&pid_file).await;
        assert!(wait_exited(pid).await, "warm relay {} still running", pid);
        assert!(sockets_in(dir.path()).is_empty());
        assert!(pool.lock().unwrap().leases().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_failed_warm_open_kills_relay() {
        let dir = TempDir::new().unwrap();
        let pid_file = dir.path().join("relay.pid");
        let sup = supervisor(silent_relay(&pid_file), dir.path(), Duration::from_millis(300));
        let pool = WarmPool::new(dir.path().join("warm"), Duration::from_secs(600));

        let err = sup.open_warm(&session(), &pool).await.unwrap_err();
        assert!(matches!(err, RcodeError::TunnelStart { .. }));

        let pid = read_pid(&pid_file).await;
        assert!(wait_exited(pid).await);
        assert!(pool.lock().unwrap().leases().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_warm_tunnel_is_reused() {
        let dir = TempDir::new().unwrap();
        let sup = supervisor(FixtureRelay::listening(), dir.path(), Duration::from_secs(1));
        let pool = WarmPool::new(dir.path().join("warm"), Duration::from_secs(600));

        let mut first = sup.open_warm(&session(), &pool).await.unwrap();
        assert!(first.is_warm());
        first.close().await;
        // Closing a warm handle leaves the relay running
        assert!(first.local_socket().exists());
        assert!(is_process_alive(first.pid().unwrap()));

        let second = sup.open_warm(&session(), &pool).await.unwrap();
        assert_eq!(second.local_socket(), first.local_socket());
        assert_eq!(second.pid(), first.pid());

        let guard = pool.lock().unwrap();
        assert_eq!(guard.leases().unwrap().len(), 1);
        crate::process::terminate(first.pid().unwrap()).unwrap();
    }
}
