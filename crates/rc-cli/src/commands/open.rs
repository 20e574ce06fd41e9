//! Open command: resolve, tunnel, run the editor, tear down

use std::ffi::OsStr;
use std::path::Path;

use tokio::process::Command;

use rc_core::config::RcodeConfig;
use rc_core::error::{RcodeError, Result};
use rc_core::locator::{resolve_local, LocalEnvironment, RemoteShell, SshShell};
use rc_core::types::LOCAL_HOST;
use rc_core::{Located, RegistryStore, SessionLocator, Target, TunnelSupervisor, WarmPool};

/// A parsed request to open paths
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenRequest {
    pub target: Target,
    /// Paths handed to the editor unchanged
    pub paths: Vec<String>,
    /// Save `(host, first path)` under this shortcut name
    pub save_as: Option<String>,
    pub editor: Option<String>,
    pub keep_warm: bool,
}

/// Everything an open needs, built once per invocation
pub struct OpenContext {
    pub config: RcodeConfig,
    pub registry: RegistryStore,
    pub shell: Box<dyn RemoteShell>,
    pub supervisor: TunnelSupervisor,
    pub local_env: LocalEnvironment,
    /// Profile used when `--editor` is not given (the `rcursor` binary)
    pub default_editor: Option<String>,
}

impl OpenContext {
    pub fn from_config(config: RcodeConfig, default_editor: Option<&str>) -> Self {
        Self {
            registry: Self::registry_for(&config),
            shell: Box::new(SshShell::new(config.ssh.clone())),
            supervisor: TunnelSupervisor::from_config(&config),
            local_env: LocalEnvironment::detect(),
            default_editor: default_editor.map(str::to_string),
            config,
        }
    }

    pub fn registry_for(config: &RcodeConfig) -> RegistryStore {
        RegistryStore::new(config.registry_path())
    }

    fn warm_pool(&self) -> WarmPool {
        WarmPool::new(
            self.config.runtime_dir().join("warm"),
            self.config.tunnel.warm_idle_timeout,
        )
    }
}

/// Run one open request. Returns the editor's exit status.
pub async fn open_command(ctx: &OpenContext, request: &OpenRequest) -> Result<u8> {
    let editor = request
        .editor
        .as_deref()
        .or(ctx.default_editor.as_deref());
    let profile = ctx.config.editor_profile(editor)?;

    let locator = SessionLocator::new(
        &ctx.registry,
        ctx.shell.as_ref(),
        &profile,
        &ctx.config.discovery,
    );
    let located = locator.locate_for(&request.target, &request.paths).await?;

    match located {
        Located::Local { path } => {
            save_shortcut(ctx, request, LOCAL_HOST, path.as_deref())?;

            let invocation = resolve_local(&ctx.local_env, &profile, &ctx.config.discovery).await?;
            let args = editor_args(&request.paths, path);
            let ipc = invocation
                .ipc
                .as_ref()
                .map(|(var, socket)| (var.as_str(), socket.as_path()));
            run_editor(&invocation.program, &args, ipc).await
        }
        Located::Remote { session, path } => {
            save_shortcut(ctx, request, &session.host, path.as_deref())?;

            let keep_warm = request.keep_warm || ctx.config.tunnel.keep_warm;
            let mut tunnel = if keep_warm {
                ctx.supervisor.open_warm(&session, &ctx.warm_pool()).await?
            } else {
                ctx.supervisor.open(&session).await?
            };

            let args = editor_args(&request.paths, path);
            let result = run_editor(
                OsStr::new(&profile.binary),
                &args,
                Some((profile.ipc_env.as_str(), tunnel.local_socket())),
            )
            .await;

            tunnel.close().await;
            result
        }
    }
}

fn save_shortcut(
    ctx: &OpenContext,
    request: &OpenRequest,
    host: &str,
    path: Option<&str>,
) -> Result<()> {
    let Some(name) = &request.save_as else {
        return Ok(());
    };
    let path = path.ok_or_else(|| {
        RcodeError::Validation(format!("shortcut '{}' needs a path to save", name))
    })?;
    ctx.registry.save(name, host, path)?;
    tracing::info!("Saved shortcut '{}' -> {}:{}", name, host, path);
    Ok(())
}

/// The user's paths, or the path remembered with the target when none were
/// given
fn editor_args(paths: &[String], remembered: Option<String>) -> Vec<String> {
    if paths.is_empty() {
        remembered.into_iter().collect()
    } else {
        paths.to_vec()
    }
}

/// Run the editor CLI with inherited stdio and wait for it.
///
/// `ipc` names the environment variable and socket the CLI should talk to.
pub async fn run_editor(program: &OsStr, args: &[String], ipc: Option<(&str, &Path)>) -> Result<u8> {
    let mut cmd = Command::new(program);
    cmd.args(args).kill_on_drop(true);
    if let Some((var, socket)) = ipc {
        cmd.env(var, socket);
    }

    tracing::debug!("Running {:?} {:?}", program, args);
    let status = cmd.status().await.map_err(|e| {
        RcodeError::Invocation(format!("failed to run {}: {}", display(program), e))
    })?;

    match status.code() {
        Some(code) => Ok((code & 0xff) as u8),
        None => Err(RcodeError::Invocation(format!(
            "{} was terminated ({})",
            display(program),
            status
        ))),
    }
}

fn display(program: &OsStr) -> String {
    program.to_string_lossy().into_owned()
}
