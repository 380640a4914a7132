// Copyright 2024-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::path::PathBuf;

/// Well-known location of the parameter service backend socket. The socket is
/// created and owned by the server; clients connect.
pub const DEFAULT_SOCKET_PATH: &str = "/var/run/wdx/paramd.sock";

/// Resolves a configured socket path, falling back to the well-known default
/// when the configuration is empty.
pub fn socket_path_or_default(configured: &str) -> PathBuf {
    if configured.is_empty() {
        PathBuf::from(DEFAULT_SOCKET_PATH)
    } else {
        PathBuf::from(configured)
    }
}
