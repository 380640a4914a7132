// Copyright 2024-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! System abstraction for the connection plane, so the notifier can run
//! against fake filesystems and fake inotify descriptors in tests.

use std::ffi::CString;
use std::io;
use std::os::fd::{AsRawFd, BorrowedFd, FromRawFd, OwnedFd};
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::FileTypeExt;
use std::path::Path;
use std::sync::{Arc, LazyLock, RwLock};

/// Identifier of a single inotify watch, paired with the FD it was added on.
pub type WatchHandle = i32;

pub const IN_CREATE: u32 = libc::IN_CREATE;
pub const IN_MOVED_TO: u32 = libc::IN_MOVED_TO;
pub const IN_DELETE_SELF: u32 = libc::IN_DELETE_SELF;
pub const IN_MOVE_SELF: u32 = libc::IN_MOVE_SELF;
pub const IN_IGNORED: u32 = libc::IN_IGNORED;
pub const IN_ISDIR: u32 = libc::IN_ISDIR;

/// Replaceable seam over the filesystem predicates and the raw inotify
/// syscalls. The returned `OwnedFd` closes the descriptor on drop, so every
/// init has exactly one matching close.
pub trait ComSal: Send + Sync {
    fn is_directory_existing(&self, path: &Path) -> bool;
    fn is_socket_existing(&self, path: &Path) -> bool;
    fn inotify_init_nonblocking(&self) -> io::Result<OwnedFd>;
    fn inotify_add_watch(&self, fd: BorrowedFd<'_>, path: &Path, mask: u32)
        -> io::Result<WatchHandle>;
    fn inotify_rm_watch(&self, fd: BorrowedFd<'_>, watch: WatchHandle) -> io::Result<()>;
}

/// Production implementation on top of the kernel.
pub struct SystemSal;

impl ComSal for SystemSal {
    fn is_directory_existing(&self, path: &Path) -> bool {
        std::fs::metadata(path).map(|m| m.is_dir()).unwrap_or(false)
    }

    fn is_socket_existing(&self, path: &Path) -> bool {
        std::fs::metadata(path)
            .map(|m| m.file_type().is_socket())
            .unwrap_or(false)
    }

    fn inotify_init_nonblocking(&self) -> io::Result<OwnedFd> {
        let fd = unsafe { libc::inotify_init1(libc::IN_NONBLOCK) };
        if fd < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(unsafe { OwnedFd::from_raw_fd(fd) })
    }

    fn inotify_add_watch(
        &self,
        fd: BorrowedFd<'_>,
        path: &Path,
        mask: u32,
    ) -> io::Result<WatchHandle> {
        let c_path = CString::new(path.as_os_str().as_bytes())
            .map_err(|_| io::Error::from(io::ErrorKind::InvalidInput))?;
        let watch = unsafe { libc::inotify_add_watch(fd.as_raw_fd(), c_path.as_ptr(), mask) };
        if watch < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(watch)
    }

    fn inotify_rm_watch(&self, fd: BorrowedFd<'_>, watch: WatchHandle) -> io::Result<()> {
        if unsafe { libc::inotify_rm_watch(fd.as_raw_fd(), watch) } < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }
}

static INSTANCE: LazyLock<RwLock<Arc<dyn ComSal>>> =
    LazyLock::new(|| RwLock::new(Arc::new(SystemSal)));

/// Current process-wide SAL instance.
#[allow(clippy::unwrap_used)]
pub fn instance() -> Arc<dyn ComSal> {
    INSTANCE.read().unwrap().clone()
}

/// Replaces the process-wide SAL instance, returning the previous one.
/// Callers observe either the old or the new implementation, never a mix.
#[allow(clippy::unwrap_used)]
pub fn replace(sal: Arc<dyn ComSal>) -> Arc<dyn ComSal> {
    std::mem::replace(&mut *INSTANCE.write().unwrap(), sal)
}
