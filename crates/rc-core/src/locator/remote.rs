//! Remote command execution over the system ssh client
//!
//! Discovery needs two things from a remote host: a listing of the editor's
//! IPC sockets with their modification times, and optionally a probe telling
//! whether a socket still has a listener. Both are short shell scripts run
//! through one `ssh <host> sh -c '<script>'` each.

use async_trait::async_trait;
use std::borrow::Cow;
use std::process::Stdio;

use tokio::process::Command;

use crate::config::{EditorProfile, SshConfig};
use crate::error::{RcodeError, Result};
use crate::types::SocketCandidate;

/// Output of a remote command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecOutput {
    /// Exit status, `None` if terminated by a signal
    pub status: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl ExecOutput {
    pub fn success(&self) -> bool {
        self.status == Some(0)
    }
}

/// Something that can run a POSIX shell script on a host
#[async_trait]
pub trait RemoteShell: Send + Sync {
    /// Run `script` with `sh -c` on `host` and collect its output.
    ///
    /// Errors are reserved for failing to start the transport at all; a
    /// script that runs and fails is reported through `ExecOutput::status`.
    async fn run(&self, host: &str, script: &str) -> Result<ExecOutput>;
}

/// [`RemoteShell`] backed by the installed OpenSSH client
///
/// Authentication, jump hosts, multiplexing and every other connection detail
/// come from the user's `~/.ssh/config`.
#[derive(Debug, Clone)]
pub struct SshShell {
    config: SshConfig,
}

impl SshShell {
    pub fn new(config: SshConfig) -> Self {
        Self { config }
    }

    fn command(&self, host: &str, script: &str) -> Command {
        let mut cmd = Command::new(&self.config.program);
        cmd.args(self.config.base_args())
            .arg("-T")
            .arg("--")
            .arg(host)
            .arg(format!("sh -c {}", shell_quote(script)));
        cmd
    }
}

#[async_trait]
impl RemoteShell for SshShell {
    async fn run(&self, host: &str, script: &str) -> Result<ExecOutput> {
        tracing::debug!("ssh {}: {}", host, script.lines().next().unwrap_or_default());

        let output = self
            .command(host, script)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| RcodeError::Discovery {
                host: host.to_string(),
                reason: format!("failed to run {}: {}", self.config.program, e),
            })?;

        Ok(ExecOutput {
            status: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

/// Quote a string for the remote POSIX shell
pub fn shell_quote(s: &str) -> String {
    shell_escape::unix::escape(Cow::Borrowed(s)).into_owned()
}

/// Script listing the profile's IPC sockets in the remote runtime directory.
///
/// The first line is the remote clock (so idle filtering is immune to skew
/// between the two machines); each following line is `<mtime> <path>`.
/// GNU and BSD `stat` are both handled.
pub fn listing_script(profile: &EditorProfile) -> String {
    format!(
        r#"dir="${{XDG_RUNTIME_DIR:-/run/user/$(id -u)}}"
date +%s
for f in "$dir"/{pattern}; do
  [ -S "$f" ] || continue
  m=$(stat -c %Y "$f" 2>/dev/null || stat -f %m "$f" 2>/dev/null) || continue
  printf "%s %s\n" "$m" "$f"
done"#,
        pattern = profile.socket_pattern
    )
}

/// Script exiting 0 when something is listening on `socket`.
///
/// Hosts without `socat` cannot be probed; the socket is then assumed live.
pub fn probe_script(socket: &str) -> String {
    format!(
        "command -v socat >/dev/null 2>&1 || exit 0\nexec socat -u OPEN:/dev/null {}",
        shell_quote(&format!("UNIX-CONNECT:{}", socket))
    )
}

/// Parse the output of [`listing_script`] into the remote clock and the
/// candidates. Malformed lines are skipped.
pub fn parse_listing(stdout: &str) -> (Option<u64>, Vec<SocketCandidate>) {
    let mut lines = stdout.lines().map(str::trim).filter(|l| !l.is_empty());
    let now = lines.next().and_then(|l| l.parse::<u64>().ok());

    let candidates = lines
        .filter_map(|line| {
            let (mtime, path) = line.split_once(' ')?;
            let modified = mtime.parse::<u64>().ok()?;
            let path = path.trim();
            if path.is_empty() {
                return None;
            }
            Some(SocketCandidate::new(path, modified))
        })
        .collect();

    (now, candidates)
}
