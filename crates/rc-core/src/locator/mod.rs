//! Session discovery
//!
//! Turns a [`Target`] into either "run locally" or a concrete remote host plus
//! the path of the editor IPC socket that belongs to the live session there.

pub mod local;
pub mod remote;

pub use local::{resolve_local, LocalEnvironment, LocalInvocation};
pub use remote::{ExecOutput, RemoteShell, SshShell};

use std::time::Duration;

use crate::config::{DiscoveryConfig, EditorProfile};
use crate::error::{RcodeError, Result};
use crate::registry::RegistryStore;
use crate::time::{current_time_millis, current_time_secs};
use crate::types::{is_local_host, RemoteSession, SocketCandidate, Target};

/// Outcome of resolving a target
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Located {
    /// Run the editor on this machine
    Local { path: Option<String> },
    /// Tunnel to `session` and open `path` there
    Remote {
        session: RemoteSession,
        path: Option<String>,
    },
}

/// Resolves targets against the registry and the remote host
pub struct SessionLocator<'a> {
    registry: &'a RegistryStore,
    shell: &'a dyn RemoteShell,
    profile: &'a EditorProfile,
    discovery: &'a DiscoveryConfig,
}

impl<'a> SessionLocator<'a> {
    pub fn new(
        registry: &'a RegistryStore,
        shell: &'a dyn RemoteShell,
        profile: &'a EditorProfile,
        discovery: &'a DiscoveryConfig,
    ) -> Self {
        Self {
            registry,
            shell,
            profile,
            discovery,
        }
    }

    /// Resolve `target` to a local marker or a live remote session.
    ///
    /// A successful remote resolution records the latest pointer; failures
    /// leave it untouched.
    pub async fn locate(&self, target: &Target) -> Result<Located> {
        self.locate_for(target, &[]).await
    }

    /// Like [`locate`](Self::locate), for an invocation opening `paths`. The
    /// first of them replaces the path stored with a shortcut or the latest
    /// pointer.
    pub async fn locate_for(&self, target: &Target, paths: &[String]) -> Result<Located> {
        let (host, stored) = match target {
            Target::Local => {
                return Ok(Located::Local {
                    path: paths.first().cloned(),
                })
            }
            Target::Explicit { host, path } => (host.clone(), path.clone()),
            Target::Shortcut(name) => {
                let entry = self.registry.lookup(name)?;
                tracing::debug!("Shortcut '{}' -> {}:{}", name, entry.host, entry.path);
                (entry.host, Some(entry.path))
            }
            Target::Latest => {
                let latest = self.registry.latest()?;
                tracing::debug!("Latest session host is {}", latest.host);
                (latest.host, latest.path)
            }
        };

        let path = paths.first().cloned().or(stored);

        if host.trim().is_empty() {
            return Err(RcodeError::Validation("host must not be empty".into()));
        }
        if is_local_host(&host) {
            return Ok(Located::Local { path });
        }

        let socket = self.discover(&host).await?;
        tracing::info!("Selected {} on {}", socket.path, host);

        self.registry.record_latest(&host, path.as_deref())?;

        Ok(Located::Remote {
            session: RemoteSession {
                host,
                ipc_socket: socket.path,
                discovered_at: current_time_millis(),
            },
            path,
        })
    }

    async fn discover(&self, host: &str) -> Result<SocketCandidate> {
        let output = self
            .shell
            .run(host, &remote::listing_script(self.profile))
            .await?;
        if !output.success() {
            let stderr = output.stderr.trim();
            return Err(RcodeError::Discovery {
                host: host.to_string(),
                reason: if stderr.is_empty() {
                    format!("listing exited with status {:?}", output.status)
                } else {
                    last_line(stderr).to_string()
                },
            });
        }

        let (remote_now, candidates) = remote::parse_listing(&output.stdout);
        tracing::debug!("{} candidate socket(s) on {}", candidates.len(), host);

        let now = remote_now.unwrap_or_else(current_time_secs);
        let ranked = rank_candidates(candidates, now, self.discovery.max_idle_time);

        let no_session = || RcodeError::NoActiveSession {
            host: host.to_string(),
            editor: self.profile.binary.clone(),
        };

        if !self.discovery.probe_liveness {
            return ranked.into_iter().next().ok_or_else(no_session);
        }

        for candidate in ranked {
            let probe = self
                .shell
                .run(host, &remote::probe_script(&candidate.path))
                .await?;
            if probe.success() {
                return Ok(candidate);
            }
            tracing::debug!("Skipping dead socket {} on {}", candidate.path, host);
        }
        Err(no_session())
    }
}

/// Drop candidates idle for longer than `max_idle` (zero disables the filter)
/// and order the rest by modification time descending, then by path
/// descending.
pub fn rank_candidates(
    mut candidates: Vec<SocketCandidate>,
    now: u64,
    max_idle: Duration,
) -> Vec<SocketCandidate> {
    if !max_idle.is_zero() {
        let cutoff = now.saturating_sub(max_idle.as_secs());
        candidates.retain(|c| c.modified >= cutoff);
    }
    candidates.sort_by(|a, b| {
        b.modified
            .cmp(&a.modified)
            .then_with(|| b.path.cmp(&a.path))
    });
    candidates
}

fn last_line(s: &str) -> &str {
    s.lines().last().unwrap_or(s).trim()
}


#[cfg(test)]
mod tests {
    use super::test_support::FakeShell;
    use super::*;
    use crate::error::NotFoundError;
    use tempfile::TempDir;

    const NOW: u64 = 1_700_000_000;

    struct Fixture {
        _dir: TempDir,
        registry: RegistryStore,
        profile: EditorProfile,
        discovery: DiscoveryConfig,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = TempDir::new().unwrap();
            let registry = RegistryStore::new(dir.path().join("registry.toml"));
            Self {
                _dir: dir,
                registry,
                profile: EditorProfile::vscode(),
                discovery: DiscoveryConfig::default(),
            }
        }

        fn locator<'a>(&'a self, shell: &'a FakeShell) -> SessionLocator<'a> {
            SessionLocator::new(&self.registry, shell, &self.profile, &self.discovery)
        }
    }

    fn explicit(host: &str) -> Target {
        Target::Explicit {
            host: host.into(),
            path: Some("/srv/app".into()),
        }
    }

    fn sock(name: &str, modified: u64) -> SocketCandidate {
        SocketCandidate::new(format!("/run/user/1000/vscode-ipc-{}.sock", name), modified)
    }

    #[test]
    fn test_rank_orders_by_mtime_then_path() {
        let ranked = rank_candidates(
            vec![sock("a", NOW - 10), sock("c", NOW - 5), sock("b", NOW - 5)],
            NOW,
            Duration::ZERO,
        );
        let names: Vec<_> = ranked.iter().map(|c| c.path.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "/run/user/1000/vscode-ipc-c.sock",
                "/run/user/1000/vscode-ipc-b.sock",
                "/run/user/1000/vscode-ipc-a.sock",
            ]
        );
    }

    #[test]
    fn test_rank_drops_idle_candidates() {
        let ranked = rank_candidates(
            vec![sock("old", NOW - 5 * 3600), sock("new", NOW - 60)],
            NOW,
            Duration::from_secs(4 * 3600),
        );
        assert_eq!(ranked, vec![sock("new", NOW - 60)]);
    }

    #[tokio::test]
    async fn test_single_candidate_selected_and_latest_recorded() {
        let fx = Fixture::new();
        let shell = FakeShell::with_candidates(NOW, vec![sock("only", NOW - 30)]);

        let located = fx.locator(&shell).locate(&explicit("myhost")).await.unwrap();
        match located {
            Located::Remote { session, path } => {
                assert_eq!(session.host, "myhost");
                assert_eq!(session.ipc_socket, sock("only", 0).path);
                assert_eq!(path.as_deref(), Some("/srv/app"));
            }
            other => panic!("expected remote, got {:?}", other),
        }
        // Listing plus one probe
        assert_eq!(shell.call_count(), 2);

        let latest = fx.registry.latest().unwrap();
        assert_eq!(latest.host, "myhost");
        assert_eq!(latest.path.as_deref(), Some("/srv/app"));
    }

    #[tokio::test]
    async fn test_zero_candidates_leaves_latest_untouched() {
        let fx = Fixture::new();
        fx.registry.record_latest("previous", None).unwrap();
        let shell = FakeShell::with_candidates(NOW, vec![]);

        let err = fx.locator(&shell).locate(&explicit("myhost")).await.unwrap_err();
        assert!(matches!(
            err,
            RcodeError::NoActiveSession { ref host, .. } if host == "myhost"
        ));
        assert_eq!(fx.registry.latest().unwrap().host, "previous");
    }

    #[tokio::test]
    async fn test_greatest_mtime_selected_repeatably() {
        let fx = Fixture::new();
        let shell = FakeShell::with_candidates(
            NOW,
            vec![sock("a", NOW - 300), sock("b", NOW - 10), sock("c", NOW - 100)],
        );
        let locator = fx.locator(&shell);

        for _ in 0..3 {
            match locator.locate(&explicit("myhost")).await.unwrap() {
                Located::Remote { session, .. } => {
                    assert_eq!(session.ipc_socket, sock("b", 0).path)
                }
                other => panic!("expected remote, got {:?}", other),
            }
        }
    }

    #[tokio::test]
    async fn test_dead_candidates_are_skipped() {
        let fx = Fixture::new();
        let mut shell = FakeShell::with_candidates(
            NOW,
            vec![sock("newest", NOW - 1), sock("older", NOW - 50)],
        );
        shell.live = Some([sock("older", 0).path].into_iter().collect());

        match fx.locator(&shell).locate(&explicit("myhost")).await.unwrap() {
            Located::Remote { session, .. } => {
                assert_eq!(session.ipc_socket, sock("older", 0).path)
            }
            other => panic!("expected remote, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_all_dead_candidates_is_no_session() {
        let fx = Fixture::new();
        let mut shell =
            FakeShell::with_candidates(NOW, vec![sock("a", NOW - 1), sock("b", NOW - 2)]);
        shell.live = Some(Default::default());

        let err = fx.locator(&shell).locate(&explicit("myhost")).await.unwrap_err();
        assert!(matches!(err, RcodeError::NoActiveSession { .. }));
        assert!(fx.registry.latest().is_err());
    }

    #[tokio::test]
    async fn test_single_dead_candidate_is_no_session() {
        let fx = Fixture::new();
        fx.registry.record_latest("previous", None).unwrap();
        let mut shell = FakeShell::with_candidates(NOW, vec![sock("stale", NOW - 5)]);
        shell.live = Some(Default::default());

        let err = fx.locator(&shell).locate(&explicit("myhost")).await.unwrap_err();
        assert!(matches!(err, RcodeError::NoActiveSession { .. }));
        assert_eq!(shell.call_count(), 2);
        assert_eq!(fx.registry.latest().unwrap().host, "previous");
    }

    #[tokio::test]
    async fn test_probing_disabled_takes_first_candidate() {
        let mut fx = Fixture::new();
        fx.discovery.probe_liveness = false;
        let mut shell = FakeShell::with_candidates(NOW, vec![sock("stale", NOW - 5)]);
        shell.live = Some(Default::default());

        assert!(matches!(
            fx.locator(&shell).locate(&explicit("myhost")).await.unwrap(),
            Located::Remote { .. }
        ));
        assert_eq!(shell.call_count(), 1);
    }

    #[tokio::test]
    async fn test_listing_failure_is_discovery_error() {
        let fx = Fixture::new();
        let mut shell = FakeShell::with_candidates(NOW, vec![]);
        shell.listing_status = Some(255);

        let err = fx.locator(&shell).locate(&explicit("nohost")).await.unwrap_err();
        match err {
            RcodeError::Discovery { host, reason } => {
                assert_eq!(host, "nohost");
                assert!(reason.contains("Could not resolve hostname"));
            }
            other => panic!("expected discovery error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_shortcut_target() {
        let fx = Fixture::new();
        fx.registry.save("abc", "myhost", "/home/u/proj").unwrap();
        let shell = FakeShell::with_candidates(NOW, vec![sock("x", NOW)]);

        match fx
            .locator(&shell)
            .locate(&Target::Shortcut("abc".into()))
            .await
            .unwrap()
        {
            Located::Remote { session, path } => {
                assert_eq!(session.host, "myhost");
                assert_eq!(path.as_deref(), Some("/home/u/proj"));
            }
            other => panic!("expected remote, got {:?}", other),
        }
        assert_eq!(shell.calls.lock().unwrap()[0].0, "myhost");
    }

    #[tokio::test]
    async fn test_unknown_shortcut_and_missing_latest() {
        let fx = Fixture::new();
        let shell = FakeShell::with_candidates(NOW, vec![sock("x", NOW)]);
        let locator = fx.locator(&shell);

        assert!(matches!(
            locator.locate(&Target::Shortcut("nope".into())).await,
            Err(RcodeError::NotFound(NotFoundError::Shortcut(_)))
        ));
        assert!(matches!(
            locator.locate(&Target::Latest).await,
            Err(RcodeError::NotFound(NotFoundError::Latest))
        ));
        assert_eq!(shell.call_count(), 0);
    }

    #[tokio::test]
    async fn test_latest_target_reuses_host_and_path() {
        let fx = Fixture::new();
        fx.registry.record_latest("myhost", Some("/a")).unwrap();
        let shell = FakeShell::with_candidates(NOW, vec![sock("x", NOW)]);

        match fx.locator(&shell).locate(&Target::Latest).await.unwrap() {
            Located::Remote { session, path } => {
                assert_eq!(session.host, "myhost");
                assert_eq!(path.as_deref(), Some("/a"));
            }
            other => panic!("expected remote, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_given_paths_replace_stored_path() {
        let fx = Fixture::new();
        fx.registry.save("abc", "myhost", "/home/u/proj").unwrap();
        let shell = FakeShell::with_candidates(NOW, vec![sock("x", NOW)]);

        let located = fx
            .locator(&shell)
            .locate_for(&Target::Shortcut("abc".into()), &["/etc/hosts".to_string()])
            .await
            .unwrap();
        assert!(matches!(
            located,
            Located::Remote { path: Some(ref p), .. } if p == "/etc/hosts"
        ));
        assert_eq!(fx.registry.latest().unwrap().path.as_deref(), Some("/etc/hosts"));
    }

    #[tokio::test]
    async fn test_local_targets_make_no_remote_calls() {
        let fx = Fixture::new();
        fx.registry.save("here", "local", "/tmp/x").unwrap();
        let shell = FakeShell::with_candidates(NOW, vec![sock("x", NOW)]);
        let locator = fx.locator(&shell);

        assert_eq!(
            locator.locate(&Target::Local).await.unwrap(),
            Located::Local { path: None }
        );
        assert_eq!(
            locator.locate(&Target::Shortcut("here".into())).await.unwrap(),
            Located::Local {
                path: Some("/tmp/x".into())
            }
        );
        assert_eq!(shell.call_count(), 0);
        assert!(fx.registry.latest().is_err());
    }
}
