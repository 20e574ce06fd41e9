//! Shortcut registry and latest-session pointer
//!
//! Persisted as a single TOML file:
//!
//! ```toml
//! [latest]
//! host = "devbox"
//! timestamp = 1700000000000
//! path = "/home/me/project"
//!
//! [shortcuts.proj]
//! host = "devbox"
//! path = "/home/me/project"
//! ```
//!
//! Every mutation takes the registry lock, re-reads the file, applies the
//! change and atomically replaces the file before returning, so concurrent
//! invocations never lose each other's writes or observe a torn file.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};

use crate::error::{NotFoundError, RcodeError, RegistryError, Result};
use crate::fsutil::{self, FileLock};
use crate::time::current_time_millis;

/// A named `(host, path)` pair
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShortcutEntry {
    pub name: String,
    pub host: String,
    pub path: String,
}

/// The most recently resolved remote host
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LatestSessionPointer {
    pub host: String,
    /// Unix milliseconds of the resolution
    pub timestamp: u64,
    /// Path opened with it, reused by `--latest` without paths
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct StoredShortcut {
    host: String,
    path: String,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct RegistryFile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    latest: Option<LatestSessionPointer>,
    #[serde(default)]
    shortcuts: BTreeMap<String, StoredShortcut>,
}

/// File-backed registry store
#[derive(Debug, Clone)]
pub struct RegistryStore {
    path: PathBuf,
}

impl RegistryStore {
    /// Create a store backed by `path`. The file is created on first write.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Path of the registry file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Save or overwrite a shortcut
    pub fn save(&self, name: &str, host: &str, path: &str) -> Result<()> {
        if name.trim().is_empty() {
            return Err(RcodeError::Validation(
                "shortcut name must not be empty".into(),
            ));
        }
        if host.trim().is_empty() {
            return Err(RcodeError::Validation(
                "shortcut host must not be empty".into(),
            ));
        }

        self.mutate(|file| {
            let previous = file.shortcuts.insert(
                name.to_string(),
                StoredShortcut {
                    host: host.to_string(),
                    path: path.to_string(),
                },
            );
            if previous.is_some() {
                tracing::debug!("Overwriting shortcut '{}'", name);
            }
            Ok(())
        })
    }

    /// Look up a shortcut by name
    pub fn lookup(&self, name: &str) -> Result<ShortcutEntry> {
        let file = self.load()?;
        file.shortcuts
            .get(name)
            .map(|s| ShortcutEntry {
                name: name.to_string(),
                host: s.host.clone(),
                path: s.path.clone(),
            })
            .ok_or_else(|| NotFoundError::Shortcut(name.to_string()).into())
    }

    /// Remove a shortcut, returning what was stored
    pub fn forget(&self, name: &str) -> Result<ShortcutEntry> {
        self.mutate(|file| {
            file.shortcuts
                .remove(name)
                .map(|s| ShortcutEntry {
                    name: name.to_string(),
                    host: s.host,
                    path: s.path,
                })
                .ok_or_else(|| NotFoundError::Shortcut(name.to_string()).into())
        })
    }

    /// All shortcuts, sorted by name
    pub fn shortcuts(&self) -> Result<Vec<ShortcutEntry>> {
        let file = self.load()?;
        Ok(file
            .shortcuts
            .into_iter()
            .map(|(name, s)| ShortcutEntry {
                name,
                host: s.host,
                path: s.path,
            })
            .collect())
    }

    /// Overwrite the latest-session pointer
    pub fn record_latest(&self, host: &str, path: Option<&str>) -> Result<()> {
        let pointer = LatestSessionPointer {
            host: host.to_string(),
            timestamp: current_time_millis(),
            path: path.map(str::to_string),
        };
        self.mutate(|file| {
            file.latest = Some(pointer);
            Ok(())
        })
    }

    /// The latest-session pointer
    pub fn latest(&self) -> Result<LatestSessionPointer> {
        self.load()?
            .latest
            .ok_or_else(|| NotFoundError::Latest.into())
    }

    fn load(&self) -> Result<RegistryFile, RegistryError> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(RegistryFile::default()),
            Err(source) => {
                return Err(RegistryError::Io {
                    path: self.path.clone(),
                    source,
                })
            }
        };

        toml::from_str(&content).map_err(|source| RegistryError::Parse {
            path: self.path.clone(),
            source,
        })
    }

    fn persist(&self, file: &RegistryFile) -> Result<(), RegistryError> {
        let content = toml::to_string_pretty(file)?;
        fsutil::write_atomic(&self.path, content.as_bytes()).map_err(|source| {
            RegistryError::Io {
                path: self.path.clone(),
                source,
            }
        })
    }

    /// Read-modify-write under the registry lock. Nothing is written when `f`
    /// fails.
    fn mutate<T>(&self, f: impl FnOnce(&mut RegistryFile) -> Result<T>) -> Result<T> {
        let lock_path = fsutil::lock_path_for(&self.path);
        let _lock = FileLock::acquire(&lock_path).map_err(|source| RegistryError::Io {
            path: lock_path.clone(),
            source,
        })?;

        let mut file = self.load()?;
        let value = f(&mut file)?;
        self.persist(&file)?;
        Ok(value)
    }
}
