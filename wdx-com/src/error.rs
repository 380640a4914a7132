// Copyright 2024-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Failures of the file-availability notifier. None of these are fatal to a
/// client session; the session rebuilds its notifier after a backoff.
#[derive(Debug, Error)]
pub enum NotifierError {
    #[error("failed to set up file notifier: init failed: {0}")]
    Init(#[source] io::Error),
    #[error("failed to set up file notifier: cannot watch {path}: {source}")]
    AddWatch {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to set up file notifier: no watchable directory for {0}")]
    NoWatchableDirectory(PathBuf),
    #[error("watch for file {0} is no longer valid")]
    WatchInvalidated(PathBuf),
    #[error("failed to read inotify events: {0}")]
    Read(#[source] io::Error),
    #[error("invalid watch target: {0}")]
    InvalidTarget(String),
}

/// Socket I/O and framing failures on the message channel.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("socket i/o failed: {0}")]
    Io(#[from] io::Error),
    #[error("adapter is not connected")]
    NotConnected,
    #[error("connection closed by peer")]
    Closed,
}
