//! Advisory lock serializing read-modify-write cycles on the job file.
//!
//! `flock` on unix, `LockFileEx` on windows. The lock is advisory: it only
//! excludes other holders of the same lock file, which is every producer and
//! consumer going through [`super::JobQueueStore`].

use std::fs::{self, File, OpenOptions};
use std::path::Path;
use std::sync::Arc;

use crate::error::{VaultError, VaultResult};

/// A file-backed exclusive lock over one job directory.
#[derive(Debug, Clone)]
pub struct QueueLock {
    file: Arc<File>,
}

/// Holds the queue lock until dropped.
#[derive(Debug)]
pub struct QueueLockGuard {
    file: Arc<File>,
}

impl QueueLock {
    /// Opens or creates the lock file at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`VaultError::IoFailure`] if the file cannot be opened or its
    /// directory cannot be created.
    pub fn open(path: &Path) -> VaultResult<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| VaultError::io("Failed to create lock directory", e))?;
        }
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .map_err(|e| VaultError::io(format!("Failed to open lock '{}'", path.display()), e))?;
        Ok(Self {
            file: Arc::new(file),
        })
    }

    /// Blocks until the lock is held.
    ///
    /// # Errors
    ///
    /// Returns [`VaultError::IoFailure`] if the OS call fails.
    pub fn lock(&self) -> VaultResult<QueueLockGuard> {
        sys::lock_exclusive(&self.file).map_err(|e| VaultError::io("Failed to lock job queue", e))?;
        Ok(QueueLockGuard {
            file: Arc::clone(&self.file),
        })
    }

    /// Takes the lock if nobody else holds it.
    ///
    /// # Errors
    ///
    /// Returns [`VaultError::IoFailure`] if the OS call fails for a reason
    /// other than contention.
    pub fn try_lock(&self) -> VaultResult<Option<QueueLockGuard>> {
        let acquired = sys::try_lock_exclusive(&self.file)
            .map_err(|e| VaultError::io("Failed to lock job queue", e))?;
        Ok(acquired.then(|| QueueLockGuard {
            file: Arc::clone(&self.file),
        }))
    }
}

impl Drop for QueueLockGuard {
    fn drop(&mut self) {
        if let Err(e) = sys::unlock(&self.file) {
            tracing::warn!("failed to release job queue lock: {e}");
        }
    }
}

#[cfg(unix)]
mod sys {
    use std::fs::File;
    use std::io;
    use std::os::raw::c_int;
    use std::os::unix::io::AsRawFd;

    const LOCK_EX: c_int = 2;
    const LOCK_NB: c_int = 4;
    const LOCK_UN: c_int = 8;

    extern "C" {
        fn flock(fd: c_int, operation: c_int) -> c_int;
    }

    fn call(file: &File, operation: c_int) -> io::Result<()> {
        // SAFETY: the descriptor is owned by `file` and outlives the call.
        if unsafe { flock(file.as_raw_fd(), operation) } == 0 {
            Ok(())
        } else {
            Err(io::Error::last_os_error())
        }
    }

    pub(super) fn lock_exclusive(file: &File) -> io::Result<()> {
        call(file, LOCK_EX)
    }

    pub(super) fn try_lock_exclusive(file: &File) -> io::Result<bool> {
        match call(file, LOCK_EX | LOCK_NB) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(false),
            Err(e) => Err(e),
        }
    }

    pub(super) fn unlock(file: &File) -> io::Result<()> {
        call(file, LOCK_UN)
    }
}

#[cfg(windows)]
mod sys {
    use std::fs::File;
    use std::io;
    use std::os::windows::io::AsRawHandle;

    type Handle = *mut std::ffi::c_void;

    #[repr(C)]
    struct Overlapped {
        internal: usize,
        internal_high: usize,
        offset: u32,
        offset_high: u32,
        h_event: Handle,
    }

    const LOCKFILE_FAIL_IMMEDIATELY: u32 = 0x1;
    const LOCKFILE_EXCLUSIVE_LOCK: u32 = 0x2;
    const ERROR_LOCK_VIOLATION: i32 = 33;

    extern "system" {
        fn LockFileEx(
            h_file: Handle,
            flags: u32,
            reserved: u32,
            bytes_to_lock_low: u32,
            bytes_to_lock_high: u32,
            overlapped: *mut Overlapped,
        ) -> i32;
        fn UnlockFileEx(
            h_file: Handle,
            reserved: u32,
            bytes_to_unlock_low: u32,
            bytes_to_unlock_high: u32,
            overlapped: *mut Overlapped,
        ) -> i32;
    }

    fn lock_file(file: &File, flags: u32) -> io::Result<()> {
        // SAFETY: a zeroed OVERLAPPED is valid for a synchronous handle.
        let mut overlapped: Overlapped = unsafe { std::mem::zeroed() };
        let handle = file.as_raw_handle() as Handle;
        let result = unsafe {
            LockFileEx(handle, LOCKFILE_EXCLUSIVE_LOCK | flags, 0, 1, 0, &mut overlapped)
        };
        if result != 0 {
            Ok(())
        } else {
            Err(io::Error::last_os_error())
        }
    }

    pub(super) fn lock_exclusive(file: &File) -> io::Result<()> {
        lock_file(file, 0)
    }

    pub(super) fn try_lock_exclusive(file: &File) -> io::Result<bool> {
        match lock_file(file, LOCKFILE_FAIL_IMMEDIATELY) {
            Ok(()) => Ok(true),
            Err(e) if e.raw_os_error() == Some(ERROR_LOCK_VIOLATION) => Ok(false),
            Err(e) => Err(e),
        }
    }

    pub(super) fn unlock(file: &File) -> io::Result<()> {
        // SAFETY: see `lock_file`.
        let mut overlapped: Overlapped = unsafe { std::mem::zeroed() };
        let handle = file.as_raw_handle() as Handle;
        if unsafe { UnlockFileEx(handle, 0, 1, 0, &mut overlapped) } != 0 {
            Ok(())
        } else {
            Err(io::Error::last_os_error())
        }
    }
}
