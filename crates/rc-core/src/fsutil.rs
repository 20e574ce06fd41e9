//! Filesystem helpers for state shared between concurrent invocations
//!
//! Writers take an advisory lock on a sibling `.lock` file (the data file
//! itself is replaced by rename on every write, so it cannot carry the lock)
//! and publish new contents with write-temp-then-rename.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

/// Exclusive lock held until dropped
#[derive(Debug)]
pub struct FileLock {
    // Closing the descriptor releases the lock.
    _file: File,
    path: PathBuf,
}

impl FileLock {
    /// Block until an exclusive lock on `path` is held, creating the file and
    /// its parent directory if needed.
    pub fn acquire(path: &Path) -> io::Result<Self> {
        if let Some(parent) = path.parent() {
            create_private_dir(parent)?;
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;

        lock_exclusive(&file)?;
        tracing::trace!("Acquired lock {:?}", path);

        Ok(Self {
            _file: file,
            path: path.to_path_buf(),
        })
    }

    /// Path of the lock file
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Lock file path for a data file (`registry.toml` → `registry.toml.lock`)
pub fn lock_path_for(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".lock");
    path.with_file_name(name)
}

/// Create a directory (and parents) readable only by the current user
pub fn create_private_dir(dir: &Path) -> io::Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        fs::DirBuilder::new().recursive(true).mode(0o700).create(dir)
    }

    #[cfg(not(unix))]
    {
        fs::create_dir_all(dir)
    }
}

/// Replace `path` with `contents` atomically.
///
/// The data is written to a temp file in the same directory, fsynced, renamed
/// over `path`, and the directory is fsynced so the rename survives a crash.
/// Readers see either the old or the new file, never a partial one.
pub fn write_atomic(path: &Path, contents: &[u8]) -> io::Result<()> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    create_private_dir(&parent)?;

    let mut temp = tempfile::NamedTempFile::new_in(&parent)?;
    temp.write_all(contents)?;
    temp.as_file().sync_all()?;
    temp.persist(path).map_err(|e| e.error)?;

    #[cfg(unix)]
    File::open(&parent)?.sync_all()?;

    Ok(())
}

#[cfg(unix)]
fn lock_exclusive(file: &File) -> io::Result<()> {
    use std::os::unix::io::AsRawFd;

    loop {
        let result = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX) };
        if result == 0 {
            return Ok(());
        }
        let err = io::Error::last_os_error();
        if err.kind() != io::ErrorKind::Interrupted {
            return Err(err);
        }
    }
}

#[cfg(not(unix))]
fn lock_exclusive(_file: &File) -> io::Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;
    use tempfile::TempDir;

    #[test]
    fn test_lock_path_for() {
        assert_eq!(
            lock_path_for(Path::new("/a/b/registry.toml")),
            PathBuf::from("/a/b/registry.toml.lock")
        );
    }

    #[test]
    fn test_acquire_creates_parent() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("x.lock");
        let lock = FileLock::acquire(&path).unwrap();
        assert!(path.exists());
        assert_eq!(lock.path(), path.as_path());
    }

    #[test]
    fn test_write_atomic_replaces_contents() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state").join("data.toml");

        write_atomic(&path, b"first").unwrap();
        write_atomic(&path, b"second").unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap(), "second");
        // Only the data file remains; no temp files are left behind
        let entries: Vec<_> = fs::read_dir(path.parent().unwrap())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(entries, vec![std::ffi::OsString::from("data.toml")]);
    }

    #[test]
    fn test_lock_is_exclusive_across_threads() {
        let dir = TempDir::new().unwrap();
        let path = Arc::new(dir.path().join("x.lock"));
        let inside = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let path = Arc::clone(&path);
                let inside = Arc::clone(&inside);
                std::thread::spawn(move || {
                    let _lock = FileLock::acquire(&path).unwrap();
                    assert_eq!(inside.fetch_add(1, Ordering::SeqCst), 0);
                    std::thread::sleep(Duration::from_millis(20));
                    inside.fetch_sub(1, Ordering::SeqCst);
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }
    }
}
