//! Advisory lock on the data directory.
//!
//! Only one process may write `issues.bin`: the daemon takes the lock for its
//! whole lifetime, and the `load`, `reindex` and `clear` commands take it for
//! the duration of the command. Read-only commands don't lock.

use std::fs::{File, OpenOptions};
use std::io;
use std::path::Path;

#[cfg(unix)]
use std::os::unix::io::AsRawFd;

const LOCK_FILE_NAME: &str = "issue-index.lock";

/// A held file lock that releases on drop
pub struct DataDirLock {
    #[allow(dead_code)]
    file: File,
}

impl DataDirLock {
    /// Lock `data_path`, creating it if needed. Fails right away if another
    /// process holds the lock.
    pub fn try_acquire(data_path: &Path) -> io::Result<Self> {
        std::fs::create_dir_all(data_path)?;

        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .open(data_path.join(LOCK_FILE_NAME))?;

        Self::try_lock_exclusive(&file)?;

        Ok(DataDirLock { file })
    }

    #[cfg(unix)]
    fn try_lock_exclusive(file: &File) -> io::Result<()> {
        let fd = file.as_raw_fd();
        let result = unsafe { libc::flock(fd, libc::LOCK_EX | libc::LOCK_NB) };
        if result != 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::WouldBlock
                || err.raw_os_error() == Some(libc::EWOULDBLOCK)
            {
                return Err(io::Error::new(
                    io::ErrorKind::WouldBlock,
                    "data directory is locked by another process, use the daemon's HTTP API instead",
                ));
            }
            return Err(err);
        }
        Ok(())
    }

    #[cfg(not(unix))]
    fn try_lock_exclusive(_file: &File) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(unix)]
impl Drop for DataDirLock {
    fn drop(&mut self) {
        let fd = self.file.as_raw_fd();
        unsafe { libc::flock(fd, libc::LOCK_UN) };
    }
}
