//! Argument parsing and process entry point

use std::ffi::OsString;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::{CommandFactory, FromArgMatches, Parser};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use rc_core::config;
use rc_core::error::{RcodeError, EXIT_INTERRUPTED, EXIT_RESOLUTION};
use rc_core::Target;

use crate::commands::{self, OpenContext, OpenRequest};
use crate::output::print_error;

#[derive(Parser, Debug)]
#[command(name = "rcode")]
#[command(author, version, about = "Open local or remote paths in your desktop editor, across SSH")]
#[command(after_help = "With one argument, PATH is opened locally. With two or more, the first is \
the SSH host and the rest are paths on it.")]
pub struct Cli {
    /// [HOST] PATH...
    #[arg(value_name = "ARGS")]
    pub args: Vec<String>,

    /// Open on the most recently used remote host
    #[arg(short = 'l', long, conflicts_with = "open_shortcut")]
    pub latest: bool,

    /// Open on the host (and path) saved under NAME (also `-os NAME`)
    #[arg(long, value_name = "NAME")]
    pub open_shortcut: Option<String>,

    /// Save the host and first path under NAME (also `-sn NAME`)
    #[arg(long, value_name = "NAME")]
    pub shortcut_name: Option<String>,

    /// Editor profile to use (code, cursor, or one from the config file)
    #[arg(short, long, value_name = "NAME")]
    pub editor: Option<String>,

    /// Leave the tunnel running so later invocations can reuse it
    #[arg(long)]
    pub keep_warm: bool,

    /// List saved shortcuts and the latest host
    #[arg(long, conflicts_with_all = ["latest", "open_shortcut", "shortcut_name", "forget"])]
    pub list_shortcuts: bool,

    /// Remove a saved shortcut
    #[arg(long, value_name = "NAME", conflicts_with_all = ["latest", "open_shortcut", "shortcut_name"])]
    pub forget: Option<String>,

    /// Path to configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long)]
    pub quiet: bool,
}

/// What an invocation asks for
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    Open(OpenRequest),
    ListShortcuts,
    Forget(String),
}

impl Cli {
    /// Interpret positionals and flags
    pub fn request(&self) -> Result<Request, RcodeError> {
        if self.list_shortcuts {
            return Ok(Request::ListShortcuts);
        }
        if let Some(name) = &self.forget {
            return Ok(Request::Forget(name.clone()));
        }

        let (target, paths) = if self.latest {
            (Target::Latest, self.args.clone())
        } else if let Some(name) = &self.open_shortcut {
            if name.trim().is_empty() {
                return Err(RcodeError::Validation("shortcut name must not be empty".into()));
            }
            (Target::Shortcut(name.clone()), self.args.clone())
        } else {
            match self.args.as_slice() {
                [] => (Target::Local, Vec::new()),
                [path] => (Target::Local, vec![path.clone()]),
                [host, paths @ ..] => (
                    Target::Explicit {
                        host: host.clone(),
                        path: paths.first().cloned(),
                    },
                    paths.to_vec(),
                ),
            }
        };

        Ok(Request::Open(OpenRequest {
            target,
            paths,
            save_as: self.shortcut_name.clone(),
            editor: self.editor.clone(),
            keep_warm: self.keep_warm,
        }))
    }
}

/// Rewrite the single-dash long flags older releases accepted into the
/// spelling clap understands. Arguments after `--` are left alone.
pub fn normalize_legacy_flags<I>(args: I) -> Vec<OsString>
where
    I: IntoIterator<Item = OsString>,
{
    let mut out = Vec::new();
    let mut passthrough = false;

    for arg in args {
        if passthrough {
            out.push(arg);
            continue;
        }
        let Some(s) = arg.to_str() else {
            out.push(arg);
            continue;
        };
        if s == "--" {
            passthrough = true;
            out.push(arg);
            continue;
        }

        let (flag, value) = match s.split_once('=') {
            Some((flag, value)) => (flag, Some(value)),
            None => (s, None),
        };
        let renamed = match flag {
            "-sn" | "--shortcut_name" => Some("--shortcut-name"),
            "-os" | "--open_shortcut" => Some("--open-shortcut"),
            _ => None,
        };
        match (renamed, value) {
            (Some(flag), Some(value)) => out.push(format!("{}={}", flag, value).into()),
            (Some(flag), None) => out.push(flag.into()),
            (None, _) => out.push(arg),
        }
    }
    out
}

/// Parse `args` for the binary called `bin_name`
pub fn parse_args<I>(bin_name: &'static str, args: I) -> Result<Cli, clap::Error>
where
    I: IntoIterator<Item = OsString>,
{
    let matches = Cli::command()
        .name(bin_name)
        .bin_name(bin_name)
        .try_get_matches_from(normalize_legacy_flags(args))?;
    Cli::from_arg_matches(&matches)
}

fn init_logging(cli: &Cli) {
    let log_level = match (cli.quiet, cli.verbose) {
        (true, _) => "error",
        (false, 0) => "warn",
        (false, 1) => "info",
        (false, 2) => "debug",
        (false, _) => "trace",
    };

    let _ = tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| log_level.into()),
        ))
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .try_init();
}

/// Run the command line of `bin_name`, defaulting to the `default_editor`
/// profile when neither `--editor` nor the config picks one.
pub fn run_main(bin_name: &'static str, default_editor: Option<&str>) -> ExitCode {
    let cli = match parse_args(bin_name, std::env::args_os()) {
        Ok(cli) => cli,
        Err(e) => {
            let _ = e.print();
            return if e.use_stderr() {
                ExitCode::from(EXIT_RESOLUTION)
            } else {
                ExitCode::SUCCESS
            };
        }
    };

    init_logging(&cli);

    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            print_error(&format!("failed to start runtime: {}", e));
            return ExitCode::from(EXIT_RESOLUTION);
        }
    };

    match runtime.block_on(run(cli, default_editor)) {
        Ok(code) => ExitCode::from(code),
        Err(err) => {
            print_error(&error_message(&err));
            ExitCode::from(exit_code(&err))
        }
    }
}

async fn run(cli: Cli, default_editor: Option<&str>) -> Result<u8> {
    let request = cli.request()?;
    let config = config::load_or_default(cli.config.as_deref()).map_err(RcodeError::from)?;

    match request {
        Request::ListShortcuts => {
            commands::list_shortcuts_command(&OpenContext::registry_for(&config))?;
            Ok(0)
        }
        Request::Forget(name) => {
            commands::forget_command(&OpenContext::registry_for(&config), &name)?;
            Ok(0)
        }
        Request::Open(request) => {
            let ctx = OpenContext::from_config(config, default_editor);
            tokio::select! {
                result = commands::open_command(&ctx, &request) => Ok(result?),
                signal = shutdown_signal() => {
                    tracing::info!("Received {}, tearing down", signal);
                    Err(RcodeError::Interrupted.into())
                }
            }
        }
    }
}

/// Resolves when SIGINT or SIGTERM arrives
async fn shutdown_signal() -> &'static str {
    let ctrl_c = async {
        if tokio::signal::ctrl_c().await.is_err() {
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => "SIGINT",
        _ = terminate => "SIGTERM",
    }
}

/// One-line message for the terminal
pub fn error_message(err: &anyhow::Error) -> String {
    match err.downcast_ref::<RcodeError>() {
        // Already includes its cause
        Some(e) => e.to_string(),
        None => format!("{:#}", err),
    }
}

/// Process exit status for a failed invocation
pub fn exit_code(err: &anyhow::Error) -> u8 {
    match err.downcast_ref::<RcodeError>() {
        Some(RcodeError::Interrupted) => EXIT_INTERRUPTED,
        Some(e) => e.exit_code(),
        None => EXIT_RESOLUTION,
    }
}
