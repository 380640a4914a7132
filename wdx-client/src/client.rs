// Copyright 2024-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Client daemon contract.

use thiserror::Error;

use wdx_com::{ProtectedAdapter, StopToken};

use crate::args::ClientOption;

pub const SUCCESS_EXIT_STATUS: i32 = 0;
pub const GENERAL_ERROR_EXIT_STATUS: i32 = 1;
pub const INIT_FAILS_EXIT_STATUS: i32 = 2;
pub const CLIENT_SETUP_FAILS_EXIT_STATUS: i32 = 3;

/// Failure of a client's backend initialization.
#[derive(Debug, Error)]
pub enum InitError {
    /// The backend is temporarily unreachable (typically the server is not
    /// running right now); initialization is retried with backoff.
    #[error("backend temporarily unavailable: {0}")]
    Transient(String),
    /// Initialization cannot succeed; the daemon exits.
    #[error("initialization failed: {0}")]
    Fatal(String),
}

/// Arguments to [`Client::init`].
pub struct InitArgs {
    /// Shared adapter for the backend connection. It is safe to keep for the
    /// lifetime of the daemon; it survives reconnects.
    pub backend: ProtectedAdapter,
    /// Token to request daemon shutdown.
    pub stop: StopToken,
}

/// A provider daemon for the parameter service.
///
/// `init` runs on every (re)connect to the backend; register providers
/// there. Registered providers are unregistered automatically by the server
/// when the connection closes, so there is nothing to undo on shutdown.
pub trait Client: Send {
    /// Name of this client, used for logging and the help text.
    fn name(&self) -> String;

    /// Additional command line options beyond the standard set.
    fn additional_options(&self) -> Vec<ClientOption> {
        Vec::new()
    }

    /// Application lifecycle initialization against a connected backend.
    fn init(&mut self, args: InitArgs) -> Result<(), InitError>;
}
