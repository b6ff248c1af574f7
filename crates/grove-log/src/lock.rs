//! POSIX advisory file locking.
//!
//! Writers take an exclusive lock on a fixed byte range of the log
//! file for the duration of a commit; catch-up readers take a shared
//! lock on the same range. Locks are advisory: every grove process
//! must go through this module for the protocol to hold.
//!
//! Open-file-description locks (`F_OFD_SETLK*`) are used rather than
//! classic per-process record locks. Classic `fcntl` locks are owned
//! by the process, so closing *any* descriptor for the file drops all
//! of the process's locks on it; blob readers open and close handles
//! freely, which would silently release a commit lock mid-append. OFD
//! locks are owned by the open file description and are immune to
//! that, and they also conflict between two handles inside one
//! process, which is exactly the cross-instance exclusion the commit
//! protocol needs.

use std::fs::File;
use std::os::fd::AsRawFd;

use grove_common::constants::{LOCK_RANGE_LEN, LOCK_RANGE_START};

use crate::error::{LogError, LogResult};

fn flock_for(lock_type: i32) -> libc::flock {
    // l_pid must be zero for OFD locks.
    libc::flock {
        l_type: lock_type as i16,
        l_whence: libc::SEEK_SET as i16,
        l_start: LOCK_RANGE_START as libc::off_t,
        l_len: LOCK_RANGE_LEN as libc::off_t,
        l_pid: 0,
    }
}

/// Acquires a lock of the given type, blocking until granted.
fn lock_wait(file: &File, lock_type: i32) -> LogResult<()> {
    let flock = flock_for(lock_type);
    nix::fcntl::fcntl(
        file.as_raw_fd(),
        nix::fcntl::FcntlArg::F_OFD_SETLKW(&flock),
    )
    .map_err(|e| LogError::lock_failed(e.to_string()))?;
    Ok(())
}

/// Attempts a lock of the given type without blocking.
///
/// Returns `Ok(true)` if granted, `Ok(false)` if a conflicting lock is
/// held elsewhere.
fn lock_try(file: &File, lock_type: i32) -> LogResult<bool> {
    let flock = flock_for(lock_type);
    match nix::fcntl::fcntl(file.as_raw_fd(), nix::fcntl::FcntlArg::F_OFD_SETLK(&flock)) {
        Ok(_) => Ok(true),
        Err(nix::errno::Errno::EACCES | nix::errno::Errno::EAGAIN) => Ok(false),
        Err(e) => Err(LogError::lock_failed(e.to_string())),
    }
}

/// Takes the exclusive commit lock, blocking until granted.
pub fn lock_exclusive(file: &File) -> LogResult<()> {
    lock_wait(file, libc::F_WRLCK)
}

/// Attempts the exclusive commit lock without blocking.
pub fn try_lock_exclusive(file: &File) -> LogResult<bool> {
    lock_try(file, libc::F_WRLCK)
}

/// Takes a shared catch-up lock, blocking until granted.
pub fn lock_shared(file: &File) -> LogResult<()> {
    lock_wait(file, libc::F_RDLCK)
}

/// Releases any lock held through this file handle.
pub fn unlock(file: &File) -> LogResult<()> {
    lock_wait(file, libc::F_UNLCK)
}
