//! Exclusive locking for snapshot files.
//!
//! The file-backed store rewrites its snapshot wholesale on close; two
//! processes sharing one snapshot would silently clobber each other's
//! assignments. An exclusive lock on a `.lock` sibling of the snapshot
//! rejects the second opener up front.
//!
//! # Safety
//! - Lock is released when `SnapshotLock` is dropped
//! - Lock file is created if it doesn't exist
//! - Non-blocking lock attempt with a clear error on failure

use std::fs::{File, OpenOptions};
use std::io::{Error as IoError, ErrorKind, Result as IoResult};
use std::path::{Path, PathBuf};

/// Exclusive lock guarding one snapshot file.
///
/// Held for the lifetime of this struct and automatically released when
/// dropped.
#[derive(Debug)]
pub struct SnapshotLock {
    _file: File,
    path: PathBuf,
}

impl SnapshotLock {
    /// Attempt to acquire an exclusive lock for the snapshot at `snapshot_path`.
    ///
    /// # Errors
    /// - `ErrorKind::WouldBlock` if another process holds the lock
    /// - `ErrorKind::PermissionDenied` if we don't have write access
    pub fn acquire(snapshot_path: &Path) -> IoResult<Self> {
        let mut lock_path = snapshot_path.as_os_str().to_owned();
        lock_path.push(".lock");
        let lock_path = PathBuf::from(lock_path);

        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .open(&lock_path)?;

        Self::try_lock(&file)?;

        Ok(Self {
            _file: file,
            path: lock_path,
        })
    }

    /// Returns the path to the lock file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[cfg(unix)]
    fn try_lock(file: &File) -> IoResult<()> {
        use std::os::unix::io::AsRawFd;

        // Non-blocking exclusive lock
        let fd = file.as_raw_fd();
        let result = unsafe { libc::flock(fd, libc::LOCK_EX | libc::LOCK_NB) };

        if result != 0 {
            let errno = std::io::Error::last_os_error();
            if errno.raw_os_error() == Some(libc::EWOULDBLOCK) {
                return Err(IoError::new(
                    ErrorKind::WouldBlock,
                    "snapshot is locked by another process",
                ));
            }
            return Err(errno);
        }

        Ok(())
    }

    #[cfg(windows)]
    fn try_lock(file: &File) -> IoResult<()> {
        use std::os::windows::io::AsRawHandle;
        use windows_sys::Win32::Foundation::HANDLE;
        use windows_sys::Win32::Storage::FileSystem::{
            LockFileEx, LOCKFILE_EXCLUSIVE_LOCK, LOCKFILE_FAIL_IMMEDIATELY,
        };

        let handle = file.as_raw_handle() as HANDLE;
        let result = unsafe {
            let mut overlapped = std::mem::zeroed::<windows_sys::Win32::System::IO::OVERLAPPED>();
            LockFileEx(
                handle,
                LOCKFILE_EXCLUSIVE_LOCK | LOCKFILE_FAIL_IMMEDIATELY,
                0,
                1,
                0,
                &mut overlapped,
            )
        };

        if result == 0 {
            let err = std::io::Error::last_os_error();
            return Err(IoError::new(
                ErrorKind::WouldBlock,
                format!("snapshot is locked by another process: {err}"),
            ));
        }

        Ok(())
    }

    #[cfg(not(any(unix, windows)))]
    fn try_lock(_file: &File) -> IoResult<()> {
        Err(IoError::new(
            ErrorKind::Unsupported,
            "file locking not supported on this platform",
        ))
    }
}

impl Drop for SnapshotLock {
    fn drop(&mut self) {
        // Lock is released when the file handle closes; no explicit unlock.
    }
}
