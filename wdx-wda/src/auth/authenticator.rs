// Copyright 2024-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Authentication stage of the handler chain.
//!
//! Parses the `Authorization` header, dispatches to the password or token
//! backend, and either forwards the request with an
//! [`AuthenticationInfo`](super::AuthenticationInfo) or answers a structured
//! 401. Requests without credentials may still pass when their path matches a
//! configured unauthenticated-URL pattern.

use std::sync::Arc;

use http::{HeaderMap, Method, StatusCode};
use thiserror::Error;
use tracing::{info, warn};

use super::url_patterns;
use super::{
    AuthResult, AuthSettings, AuthenticatedRequestHandler, AuthenticationInfo, PasswordBackend,
    TokenBackend,
};
use crate::http::cors;
use crate::http::request::{BoxRequest, Request};
use crate::http::response::{append_header, Response};
use crate::http::RequestHandler;

const AUTHORIZATION_HEADER: &str = "authorization";
const MAX_AUTHORIZATION_HEADER_LENGTH: usize = 4096;
const MAX_BASIC_AUTHORIZATION_LENGTH: usize = 512;

const AUTH_METHODS_HEADER: &str = "WAGO-WDX-Auth-Methods";
const AUTH_METHODS_VALUE: &str = "Password, WDXToken, OAuth2";
const AUTHENTICATE_HEADER: &str = "WWW-Authenticate";
const NO_AUTH_POPUP_HEADER: &str = "WAGO-WDX-No-Auth-Popup";
const NO_AUTH_POPUP_ON: &str = "true";
const NO_AUTH_POPUP_OFF: &str = "false";
const BASIC_SCHEME: &str = "Basic";
const BEARER_SCHEME: &str = "Bearer";
const EXPOSE_HEADER: &str = "Access-Control-Expose-Headers";
const EXPOSE_HEADER_VALUE: &str = "WWW-Authenticate, WAGO-WDX-Auth-Methods";
const TOKEN_TYPE_HEADER: &str = "WAGO-WDX-Auth-Token-Type";
const TOKEN_HEADER: &str = "WAGO-WDX-Auth-Token";
const TOKEN_EXPIRATION_HEADER: &str = "WAGO-WDX-Auth-Token-Expiration";
const PASSWORD_EXPIRED_HEADER: &str = "WAGO-WDX-Auth-Password-Expired";

#[derive(Debug, Error)]
enum AuthParseError {
    #[error("header \"Authorization\" too long, exceeds {MAX_AUTHORIZATION_HEADER_LENGTH} bytes")]
    HeaderTooLong,
    #[error("basic authorization too long, exceeds {MAX_BASIC_AUTHORIZATION_LENGTH} bytes")]
    BasicTooLong,
    #[error("empty basic authentication")]
    EmptyBasic,
    #[error("invalid basic authentication")]
    InvalidBasic,
    #[error("empty token authentication")]
    EmptyToken,
}

enum AuthOutcome {
    /// No authentication information was presented at all.
    NoAuthInfo,
    /// The backend accepted the credentials.
    Authenticated(AuthResult),
    /// Credentials were presented but did not hold up (backend rejection or
    /// an unknown scheme).
    Rejected,
}

pub struct Authenticator {
    settings: Arc<dyn AuthSettings>,
    password_backend: Arc<dyn PasswordBackend>,
    token_backend: Option<Arc<dyn TokenBackend>>,
    service_base: String,
    realm: String,
    next: Arc<dyn AuthenticatedRequestHandler>,
}

impl Authenticator {
    pub fn new(
        settings: Arc<dyn AuthSettings>,
        password_backend: Arc<dyn PasswordBackend>,
        token_backend: Option<Arc<dyn TokenBackend>>,
        service_base: impl Into<String>,
        next: Arc<dyn AuthenticatedRequestHandler>,
    ) -> Self {
        let service_base = service_base.into();
        let realm = service_base.trim_start_matches('/').to_string();
        Authenticator {
            settings,
            password_backend,
            token_backend,
            service_base,
            realm,
            next,
        }
    }

    fn authenticate(&self, request: &mut dyn Request) -> Result<AuthOutcome, AuthParseError> {
        let Some(header) = request.header(AUTHORIZATION_HEADER).map(str::to_owned) else {
            info!(
                path = request.uri().path(),
                "request does not contain auth information"
            );
            return Ok(AuthOutcome::NoAuthInfo);
        };
        if header.is_empty() {
            return Ok(AuthOutcome::NoAuthInfo);
        }

        // Limit header length for security reasons.
        if header.len() > MAX_AUTHORIZATION_HEADER_LENGTH {
            return Err(AuthParseError::HeaderTooLong);
        }

        let trimmed = header.trim_start();
        if let Some(rest) = strip_scheme(trimmed, BASIC_SCHEME) {
            if rest.len() > MAX_BASIC_AUTHORIZATION_LENGTH {
                return Err(AuthParseError::BasicTooLong);
            }
            let (user, password) = extract_user_and_password(rest)?;
            info!(user = %user, "tried authentication for user");
            let result = self.password_backend.authenticate(&user, &password);
            if result.success && result.expired {
                request.add_response_header(PASSWORD_EXPIRED_HEADER, "true");
            }
            return Ok(if result.success {
                AuthOutcome::Authenticated(result)
            } else {
                AuthOutcome::Rejected
            });
        }

        if let Some(backend) = &self.token_backend {
            if let Some(rest) = strip_scheme(trimmed, BEARER_SCHEME) {
                let token = extract_token(rest)?;
                info!("tried authentication with token");
                let mut remaining_time = 0;
                let result = backend.authenticate(&token, &mut remaining_time);
                return Ok(if result.success {
                    AuthOutcome::Authenticated(result)
                } else {
                    AuthOutcome::Rejected
                });
            }
        }

        warn!("scheme for authentication unknown");
        Ok(AuthOutcome::Rejected)
    }

    fn allow_unauthenticated(&self, request: &dyn Request) -> bool {
        // OPTIONS requests must always pass to support CORS preflight.
        if request.method() == Method::OPTIONS {
            return true;
        }

        let urls = self.settings.unauthenticated_urls();
        if urls.is_empty() {
            return false;
        }

        let Some(service_uri) = request.uri().path().strip_prefix(&self.service_base) else {
            return false;
        };
        let service_uri = match service_uri.find('?') {
            Some(query) => &service_uri[..query],
            None => service_uri,
        };

        urls.split(';')
            .filter(|template| !template.is_empty())
            .any(|template| url_patterns::matches(template, service_uri))
    }

    fn respond_unauthorized(&self, mut request: BoxRequest) {
        warn!("necessary authentication failed");

        let mut headers = HeaderMap::new();
        append_header(&mut headers, AUTH_METHODS_HEADER, AUTH_METHODS_VALUE);

        // WWW-Authenticate response header (see RFC 7617), suppressed when
        // the client asked for no popup.
        let popup_header = request.header(NO_AUTH_POPUP_HEADER).map(str::to_owned);
        match popup_header.as_deref() {
            Some(NO_AUTH_POPUP_ON) => {}
            other => {
                if let Some(value) = other {
                    if value != NO_AUTH_POPUP_OFF {
                        info!(
                            value = %value,
                            "unknown value for no-auth-popup header, using default \"false\""
                        );
                    }
                }
                append_header(
                    &mut headers,
                    AUTHENTICATE_HEADER,
                    &format!(
                        "{BASIC_SCHEME} realm=\"{realm}\", {BEARER_SCHEME} realm=\"{realm}\"",
                        realm = self.realm
                    ),
                );
            }
        }

        // Do not spoiler possible methods/routes, therefore mirror the
        // request method as the allowed method.
        let method = request.method().clone();
        cors::add_cors_response_headers(request.as_mut(), &[method], "", "");
        // Expose the negotiation headers independently of the CORS request.
        request.add_response_header(EXPOSE_HEADER, EXPOSE_HEADER_VALUE);

        request.respond(Response::with_headers(StatusCode::UNAUTHORIZED, headers));
    }

    fn respond_internal_error(&self, mut request: BoxRequest) {
        // Same method mirroring as on the 401 path.
        let method = request.method().clone();
        cors::add_cors_response_headers(request.as_mut(), &[method], "", "");
        request.respond(Response::head(StatusCode::INTERNAL_SERVER_ERROR));
    }
}

impl RequestHandler for Authenticator {
    fn handle(&self, mut request: BoxRequest) {
        let outcome = match self.authenticate(request.as_mut()) {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(error = %e, "internal server error on authentication request handling");
                self.respond_internal_error(request);
                return;
            }
        };

        match outcome {
            AuthOutcome::Authenticated(result) => {
                if !result.token.is_empty() {
                    // Hand the token to the client for subsequent API use.
                    request.add_response_header(TOKEN_TYPE_HEADER, BEARER_SCHEME);
                    request.add_response_header(TOKEN_HEADER, &result.token);
                    request.add_response_header(
                        TOKEN_EXPIRATION_HEADER,
                        &result.token_expires_in.to_string(),
                    );
                    // Avoid caching of token answers, per RFC 6749 §5.1.
                    request.add_response_header("Cache-Control", "no-store");
                    request.add_response_header("Pragma", "no-cache");
                }
                info!(
                    path = request.uri().path(),
                    "let authenticated request pass"
                );
                self.next.handle(
                    request,
                    AuthenticationInfo {
                        user_name: result.user_name,
                    },
                );
            }
            AuthOutcome::Rejected => self.respond_unauthorized(request),
            AuthOutcome::NoAuthInfo => {
                if self.allow_unauthenticated(request.as_ref()) {
                    info!(
                        path = request.uri().path(),
                        "let unauthenticated request pass"
                    );
                    self.next.handle(
                        request,
                        AuthenticationInfo {
                            user_name: "unknown".to_string(),
                        },
                    );
                } else {
                    self.respond_unauthorized(request);
                }
            }
        }
    }
}

/// Strips a case-insensitive scheme prefix followed by one space. Returns the
/// remainder after the scheme.
fn strip_scheme<'a>(header: &'a str, scheme: &str) -> Option<&'a str> {
    if header.len() <= scheme.len() || !header.is_char_boundary(scheme.len()) {
        return None;
    }
    let (candidate, rest) = header.split_at(scheme.len());
    if candidate.eq_ignore_ascii_case(scheme) && rest.starts_with(' ') {
        Some(rest)
    } else {
        None
    }
}

fn extract_user_and_password(rest: &str) -> Result<(String, String), AuthParseError> {
    let encoded = rest.trim_matches([' ', '\n', '\r', '\t']);
    if encoded.is_empty() {
        return Err(AuthParseError::EmptyBasic);
    }
    let decoded =
        wdx_common::base64::decode(encoded).map_err(|_| AuthParseError::InvalidBasic)?;
    let decoded = String::from_utf8(decoded).map_err(|_| AuthParseError::InvalidBasic)?;
    match decoded.split_once(':') {
        Some((user, password)) => Ok((user.to_string(), password.to_string())),
        None => Err(AuthParseError::InvalidBasic),
    }
}

fn extract_token(rest: &str) -> Result<String, AuthParseError> {
    let token = rest.trim_matches([' ', '\n', '\r', '\t']);
    if token.is_empty() {
        return Err(AuthParseError::EmptyToken);
    }
    Ok(token.to_string())
}
