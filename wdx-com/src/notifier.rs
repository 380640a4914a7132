// Copyright 2024-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! One-shot notification for the appearance of a filesystem entry.
//!
//! A [`FileNotifier`] waits until a named path exists as a directory or as a
//! socket, watching the parent directory with inotify. When the parent itself
//! does not exist yet, a nested notifier first waits for the parent, which
//! recurses up to the filesystem root. `wait` consumes the notifier, so a
//! satisfied or failed notifier cannot rearm; callers build a fresh one.

use std::os::fd::{AsFd, AsRawFd, OwnedFd};
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::io::unix::AsyncFd;
use tracing::debug;

use crate::error::NotifierError;
use crate::sal::{
    self, ComSal, WatchHandle, IN_CREATE, IN_DELETE_SELF, IN_IGNORED, IN_ISDIR, IN_MOVED_TO,
    IN_MOVE_SELF,
};

/// The kind of filesystem entry a notifier waits for. inotify does not
/// distinguish sockets from other non-directory entries, so `Socket` targets
/// are additionally re-checked through the SAL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    Directory,
    Socket,
}

const EVENT_BUFFER_SIZE: usize = 16 * 1024;
// wd (i32) + mask (u32) + cookie (u32) + len (u32)
const EVENT_HEADER_LEN: usize = 16;
const WATCH_EVENTS: u32 = IN_CREATE | IN_MOVED_TO | IN_DELETE_SELF | IN_MOVE_SELF;

pub struct FileNotifier {
    sal: Arc<dyn ComSal>,
    kind: FileKind,
    path: PathBuf,
    dir: PathBuf,
    leaf: Vec<u8>,
    fd: AsyncFd<OwnedFd>,
    watch: Option<WatchHandle>,
    buffer: Vec<u8>,
}

impl FileNotifier {
    /// Creates a notifier using the process-wide SAL instance.
    ///
    /// Fails if the inotify descriptor cannot be set up or if the target path
    /// has no usable parent/leaf split.
    pub fn new(kind: FileKind, path: impl Into<PathBuf>) -> Result<Self, NotifierError> {
        Self::with_sal(kind, path, sal::instance())
    }

    pub fn with_sal(
        kind: FileKind,
        path: impl Into<PathBuf>,
        sal: Arc<dyn ComSal>,
    ) -> Result<Self, NotifierError> {
        let path = path.into();
        if !path.is_absolute() {
            return Err(NotifierError::InvalidTarget(format!(
                "path {} is not absolute",
                path.display()
            )));
        }
        let leaf = match path.file_name() {
            Some(name) if !name.is_empty() => name.as_bytes().to_vec(),
            _ => {
                return Err(NotifierError::InvalidTarget(format!(
                    "path {} has no watchable leaf name",
                    path.display()
                )))
            }
        };
        let dir = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("/"));

        let fd = sal.inotify_init_nonblocking().map_err(NotifierError::Init)?;
        let fd = AsyncFd::new(fd).map_err(NotifierError::Init)?;

        Ok(FileNotifier {
            sal,
            kind,
            path,
            dir,
            leaf,
            fd,
            watch: None,
            buffer: Vec::new(),
        })
    }

    /// Waits until the target exists with the requested kind.
    ///
    /// Resolves `Ok(())` exactly when the target appeared, or an error when
    /// the watch cannot be satisfied anymore (the watched directory vanished,
    /// watch registration failed, or no watchable ancestor exists). Either
    /// way the notifier is consumed.
    pub async fn wait(mut self) -> Result<(), NotifierError> {
        // The parent must exist before a watch can be registered on it.
        if !self.sal.is_directory_existing(&self.dir) {
            if self.dir == Path::new("/") {
                // Stop recursion on failure for the root directory.
                return Err(NotifierError::NoWatchableDirectory(self.path.clone()));
            }
            let nested =
                FileNotifier::with_sal(FileKind::Directory, self.dir.clone(), self.sal.clone())?;
            Box::pin(nested.wait()).await?;
        }

        let watch = self
            .sal
            .inotify_add_watch(self.fd.get_ref().as_fd(), &self.dir, WATCH_EVENTS)
            .map_err(|source| NotifierError::AddWatch {
                path: self.dir.clone(),
                source,
            })?;
        self.watch = Some(watch);

        // Someone may have created the file between the parent check and the
        // watch registration.
        if self.is_file_existing() {
            return Ok(());
        }

        loop {
            self.read_events().await?;
            if self.process_buffer()? {
                return Ok(());
            }
        }
    }

    fn is_file_existing(&self) -> bool {
        match self.kind {
            FileKind::Directory => self.sal.is_directory_existing(&self.path),
            FileKind::Socket => self.sal.is_socket_existing(&self.path),
        }
    }

    async fn read_events(&mut self) -> Result<(), NotifierError> {
        loop {
            let mut guard = self.fd.readable().await.map_err(NotifierError::Read)?;
            let mut chunk = [0u8; EVENT_BUFFER_SIZE];
            let read = guard.try_io(|inner| {
                let n = unsafe {
                    libc::read(
                        inner.get_ref().as_raw_fd(),
                        chunk.as_mut_ptr().cast(),
                        chunk.len(),
                    )
                };
                if n < 0 {
                    Err(std::io::Error::last_os_error())
                } else {
                    Ok(n as usize)
                }
            });
            match read {
                Ok(Ok(n)) => {
                    debug!(bytes = n, "got inotify event data");
                    self.buffer.extend_from_slice(&chunk[..n]);
                    return Ok(());
                }
                Ok(Err(e)) => return Err(NotifierError::Read(e)),
                // Spurious readiness, wait again.
                Err(_would_block) => continue,
            }
        }
    }

    /// Consumes complete events from the buffer, keeping a partial tail for
    /// the next read. Returns true when an event satisfied the wait.
    fn process_buffer(&mut self) -> Result<bool, NotifierError> {
        let mut offset = 0;
        let mut satisfied = false;

        while !satisfied && self.buffer.len() - offset >= EVENT_HEADER_LEN {
            let header = &self.buffer[offset..offset + EVENT_HEADER_LEN];
            #[allow(clippy::unwrap_used)]
            let mask = u32::from_ne_bytes(header[4..8].try_into().unwrap());
            #[allow(clippy::unwrap_used)]
            let name_len = u32::from_ne_bytes(header[12..16].try_into().unwrap()) as usize;
            let event_len = EVENT_HEADER_LEN + name_len;
            if self.buffer.len() - offset < event_len {
                // Event not complete yet.
                break;
            }

            let name_bytes = &self.buffer[offset + EVENT_HEADER_LEN..offset + event_len];
            // The kernel pads the name with NULs up to the reported length.
            let name = match name_bytes.iter().position(|&b| b == 0) {
                Some(end) => &name_bytes[..end],
                None => name_bytes,
            };

            let result = self.process_event(mask, name);
            offset += event_len;
            match result {
                Ok(matched) => satisfied = matched,
                Err(e) => {
                    self.buffer.drain(..offset);
                    return Err(e);
                }
            }
        }

        self.buffer.drain(..offset);
        Ok(satisfied)
    }

    fn process_event(&self, mask: u32, name: &[u8]) -> Result<bool, NotifierError> {
        if mask & (IN_DELETE_SELF | IN_MOVE_SELF | IN_IGNORED) != 0 {
            // The watched directory is no longer the place where the expected
            // file will pop up.
            return Err(NotifierError::WatchInvalidated(self.path.clone()));
        }
        if mask & (IN_CREATE | IN_MOVED_TO) == 0 {
            return Ok(false);
        }
        if name.is_empty() || name != self.leaf.as_slice() {
            return Ok(false);
        }
        let is_directory_event = mask & IN_ISDIR != 0;
        let matched = match self.kind {
            FileKind::Directory => is_directory_event,
            FileKind::Socket => !is_directory_event && self.sal.is_socket_existing(&self.path),
        };
        if matched {
            debug!(path = %self.path.display(), "got event matching requested file");
        }
        Ok(matched)
    }
}

impl Drop for FileNotifier {
    fn drop(&mut self) {
        // The watch is paired with the descriptor; release it before the
        // `OwnedFd` closes on drop.
        if let Some(watch) = self.watch.take() {
            let _ = self.sal.inotify_rm_watch(self.fd.get_ref().as_fd(), watch);
        }
    }
}
