//! Advisory `flock` locks on sibling `.lock` files.
//!
//! Every `facegate` invocation is its own process, so the in-process mutexes
//! around the stores and the camera only cover threads of one run. These locks
//! extend the same guarantees across processes. A lock is released when the
//! [`FileLock`] is dropped.

use std::ffi::OsString;
use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

use tracing::trace;

use crate::errors::{AppError, AppResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    Shared,
    Exclusive,
}

#[derive(Debug)]
pub struct FileLock {
    file: File,
    path: PathBuf,
}

impl FileLock {
    /// Blocks until the lock is granted.
    pub fn acquire(path: &Path, mode: LockMode) -> AppResult<Self> {
        let file = open_lock_file(path)?;
        flock(&file, mode, false).map_err(|source| lock_error(path, source))?;
        trace!(path = %path.display(), ?mode, "acquired file lock");
        Ok(Self {
            file,
            path: path.to_path_buf(),
        })
    }

    /// Exclusive lock without waiting. `Ok(None)` when another holder has it.
    pub fn try_exclusive(path: &Path) -> AppResult<Option<Self>> {
        let file = open_lock_file(path)?;
        match flock(&file, LockMode::Exclusive, true) {
            Ok(()) => Ok(Some(Self {
                file,
                path: path.to_path_buf(),
            })),
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => Ok(None),
            Err(source) => Err(lock_error(path, source)),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        if let Err(err) = unlock(&self.file) {
            trace!(path = %self.path.display(), "failed to release file lock: {err}");
        }
    }
}

/// `gallery.json` → `gallery.json.lock`.
pub fn lock_path_for(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(OsString::from)
        .unwrap_or_else(|| OsString::from("facegate"));
    name.push(".lock");
    path.with_file_name(name)
}

fn lock_error(path: &Path, source: io::Error) -> AppError {
    AppError::Lock {
        path: path.to_path_buf(),
        source,
    }
}

fn open_lock_file(path: &Path) -> AppResult<File> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|source| lock_error(path, source))?;
    }

    let mut options = OpenOptions::new();
    options.read(true).write(true).create(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o644);
    }
    match options.open(path) {
        Ok(file) => Ok(file),
        // Lock files left by another user can still be locked through a
        // read-only descriptor.
        Err(err) if err.kind() == io::ErrorKind::PermissionDenied => {
            File::open(path).map_err(|source| lock_error(path, source))
        }
        Err(source) => Err(lock_error(path, source)),
    }
}

#[cfg(unix)]
fn flock(file: &File, mode: LockMode, non_blocking: bool) -> io::Result<()> {
    use std::os::unix::io::AsRawFd;

    let mut operation = match mode {
        LockMode::Shared => libc::LOCK_SH,
        LockMode::Exclusive => libc::LOCK_EX,
    };
    if non_blocking {
        operation |= libc::LOCK_NB;
    }
    loop {
        let result = unsafe { libc::flock(file.as_raw_fd(), operation) };
        if result == 0 {
            return Ok(());
        }
        let err = io::Error::last_os_error();
        match err.raw_os_error() {
            Some(libc::EINTR) => continue,
            Some(libc::EWOULDBLOCK) => return Err(io::Error::from(io::ErrorKind::WouldBlock)),
            _ => return Err(err),
        }
    }
}

#[cfg(unix)]
fn unlock(file: &File) -> io::Result<()> {
    use std::os::unix::io::AsRawFd;

    if unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_UN) } == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

#[cfg(not(unix))]
fn flock(_file: &File, _mode: LockMode, _non_blocking: bool) -> io::Result<()> {
    Ok(())
}

#[cfg(not(unix))]
fn unlock(_file: &File) -> io::Result<()> {
    Ok(())
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::thread;
    use std::time::Duration;
    use tempfile::TempDir;

    #[test]
    fn lock_file_sits_next_to_the_guarded_file() {
        assert_eq!(
            lock_path_for(Path::new("/var/lib/facegate/gallery.json")),
            PathBuf::from("/var/lib/facegate/gallery.json.lock")
        );
    }

    #[test]
    fn exclusive_holder_blocks_a_second_try() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("video0.lock");

        let held = FileLock::try_exclusive(&path).unwrap().expect("free lock");
        assert!(FileLock::try_exclusive(&path).unwrap().is_none());

        drop(held);
        assert!(FileLock::try_exclusive(&path).unwrap().is_some());
    }

    #[test]
    fn shared_holders_coexist_but_exclude_writers() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("registry.json.lock");

        let first = FileLock::acquire(&path, LockMode::Shared).unwrap();
        let second = FileLock::acquire(&path, LockMode::Shared).unwrap();
        assert!(FileLock::try_exclusive(&path).unwrap().is_none());
        drop((first, second));
        assert!(FileLock::try_exclusive(&path).unwrap().is_some());
    }

    #[test]
    fn blocking_acquire_waits_for_release() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("gallery.json.lock");
        let held = FileLock::acquire(&path, LockMode::Exclusive).unwrap();

        let (tx, rx) = mpsc::channel();
        let waiter = {
            let path = path.clone();
            thread::spawn(move || {
                let _lock = FileLock::acquire(&path, LockMode::Exclusive).unwrap();
                tx.send(()).unwrap();
            })
        };

        assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
        drop(held);
        rx.recv_timeout(Duration::from_secs(5)).unwrap();
        waiter.join().unwrap();
    }
}
