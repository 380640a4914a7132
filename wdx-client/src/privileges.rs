// Copyright 2024-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Privilege drop for daemons started as root.

use nix::unistd::{setgid, setuid, Group, User};
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum PermissionError {
    #[error("unknown user \"{0}\"")]
    UnknownUser(String),
    #[error("unknown group \"{0}\"")]
    UnknownGroup(String),
    #[error("failed to drop privileges: {0}")]
    Drop(#[source] nix::Error),
}

/// Drops to the given user and group. The group changes first; changing the
/// user first would take away the right to do so. Empty names leave the
/// respective id untouched.
pub fn drop_privileges(user: &str, group: &str) -> Result<(), PermissionError> {
    if !group.is_empty() {
        let resolved = Group::from_name(group)
            .map_err(PermissionError::Drop)?
            .ok_or_else(|| PermissionError::UnknownGroup(group.to_string()))?;
        setgid(resolved.gid).map_err(PermissionError::Drop)?;
        info!(group = %group, "dropped group privileges");
    }
    if !user.is_empty() {
        let resolved = User::from_name(user)
            .map_err(PermissionError::Drop)?
            .ok_or_else(|| PermissionError::UnknownUser(user.to_string()))?;
        setuid(resolved.uid).map_err(PermissionError::Drop)?;
        info!(user = %user, "dropped user privileges");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_names_are_reported() {
        assert!(matches!(
            drop_privileges("no-such-user-xyzzy", ""),
            Err(PermissionError::UnknownUser(_))
        ));
        assert!(matches!(
            drop_privileges("", "no-such-group-xyzzy"),
            Err(PermissionError::UnknownGroup(_))
        ));
    }

    #[test]
    fn empty_names_are_a_no_op() {
        drop_privileges("", "").unwrap();
    }
}
