// Copyright 2024-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

pub mod authenticator;
pub mod url_patterns;

pub use authenticator::Authenticator;

use crate::http::BoxRequest;

/// Identity of an authenticated caller, handed to the stages behind the
/// authenticator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticationInfo {
    pub user_name: String,
}

/// Outcome of a backend authentication attempt.
#[derive(Debug, Clone, Default)]
pub struct AuthResult {
    pub user_name: String,
    pub success: bool,
    pub expired: bool,
    pub token: String,
    pub token_expires_in: u32,
}

/// Backend validating `user`/`password` pairs. The call may block for the
/// duration of the backend exchange; it is synchronous from the handler
/// chain's perspective.
pub trait PasswordBackend: Send + Sync {
    fn authenticate(&self, user: &str, password: &str) -> AuthResult;
}

/// Backend validating bearer tokens. `remaining_time` receives the remaining
/// validity of the presented token in seconds.
pub trait TokenBackend: Send + Sync {
    fn authenticate(&self, token: &str, remaining_time: &mut u32) -> AuthResult;
}

/// Settings source for the authenticator.
pub trait AuthSettings: Send + Sync {
    /// Semicolon-separated list of URL patterns that may pass without
    /// credentials.
    fn unauthenticated_urls(&self) -> String;
}

/// Handler stage behind the authenticator; receives the request together
/// with the authenticated identity.
pub trait AuthenticatedRequestHandler: Send + Sync {
    fn handle(&self, request: BoxRequest, auth: AuthenticationInfo);
}
