//! Relay commands
//!
//! A relay is an external process that listens on a local Unix socket and
//! carries every connection to a socket on the remote host. The supervisor
//! only needs the command line; it owns spawning, readiness and teardown.

use std::path::Path;

use tokio::process::Command;

use crate::config::{RcodeConfig, RelayKind, SshConfig};
use crate::error::{RcodeError, Result};
use crate::locator::remote::shell_quote;

/// Builds the command that forwards `local` to `remote` on `host`
pub trait Relay: Send + Sync {
    fn command(&self, host: &str, local: &Path, remote: &str) -> Result<Command>;
}

/// OpenSSH stream-local forwarding: `ssh -N -L <local>:<remote> <host>`
#[derive(Debug, Clone)]
pub struct SshForwardRelay {
    ssh: SshConfig,
}

impl SshForwardRelay {
    pub fn new(ssh: SshConfig) -> Self {
        Self { ssh }
    }
}

impl Relay for SshForwardRelay {
    fn command(&self, host: &str, local: &Path, remote: &str) -> Result<Command> {
        let local = local.to_str().ok_or_else(|| {
            RcodeError::tunnel(host, format!("local socket path {:?} is not UTF-8", local))
        })?;
        // `-L` splits its argument on ':'
        for path in [local, remote] {
            if path.contains(':') {
                return Err(RcodeError::tunnel(
                    host,
                    format!("cannot forward '{}': path contains ':'", path),
                ));
            }
        }

        let mut cmd = Command::new(&self.ssh.program);
        cmd.arg("-N")
            .args(["-o", "ExitOnForwardFailure=yes"])
            .args(["-o", "StreamLocalBindUnlink=yes"])
            .args(["-o", "StreamLocalBindMask=0177"])
            .args(self.ssh.base_args())
            .arg("-L")
            .arg(format!("{}:{}", local, remote))
            .arg("--")
            .arg(host);
        Ok(cmd)
    }
}

/// `socat` listening locally and running one `ssh host socat` per connection
#[derive(Debug, Clone)]
pub struct SocatRelay {
    ssh: SshConfig,
    socat: String,
}

impl SocatRelay {
    pub fn new(ssh: SshConfig, socat: impl Into<String>) -> Self {
        Self {
            ssh,
            socat: socat.into(),
        }
    }

    fn remote_command(&self, host: &str, remote: &str) -> String {
        let remote_socat = format!(
            "{} STDIO {}",
            self.socat,
            shell_quote(&format!("UNIX-CONNECT:{}", remote))
        );

        let mut words: Vec<String> = vec![shell_quote(&self.ssh.program)];
        words.extend(self.ssh.base_args().iter().map(|a| shell_quote(a)));
        words.push("-T".into());
        words.push("--".into());
        words.push(shell_quote(host));
        words.push(shell_quote(&remote_socat));
        words.join(" ")
    }
}

impl Relay for SocatRelay {
    fn command(&self, host: &str, local: &Path, remote: &str) -> Result<Command> {
        let local = local.to_str().ok_or_else(|| {
            RcodeError::tunnel(host, format!("local socket path {:?} is not UTF-8", local))
        })?;

        let mut cmd = Command::new(&self.socat);
        cmd.arg(format!(
            "UNIX-LISTEN:{},fork,umask=0077",
            socat_escape(local)
        ))
        .arg(format!(
            "SYSTEM:{}",
            socat_escape(&self.remote_command(host, remote))
        ));
        Ok(cmd)
    }
}

/// Escape characters socat treats as address syntax
fn socat_escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        if matches!(c, '\\' | ':' | ',' | '!' | '"' | '\'' | '(' | ')' | '[' | ']' | '{' | '}') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// The relay selected by `tunnel.relay`
pub fn relay_from_config(config: &RcodeConfig) -> Box<dyn Relay> {
    match config.tunnel.relay {
        RelayKind::Ssh => Box::new(SshForwardRelay::new(config.ssh.clone())),
        RelayKind::Socat => Box::new(SocatRelay::new(
            config.ssh.clone(),
            config.tunnel.socat_program.clone(),
        )),
    }
}
