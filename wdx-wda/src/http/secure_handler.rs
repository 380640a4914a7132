// Copyright 2024-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::sync::Arc;

use http::StatusCode;
use tracing::warn;

use super::request::BoxRequest;
use super::response::Response;
use super::RequestHandler;

/// Transport security gate at the head of the handler chain.
///
/// Plain-HTTP requests are turned away with 426 unless they come from the
/// local host and local HTTP is explicitly allowed.
pub struct SecureHandler {
    next: Arc<dyn RequestHandler>,
    allow_local_http: bool,
}

impl SecureHandler {
    pub fn new(next: Arc<dyn RequestHandler>, allow_local_http: bool) -> Self {
        SecureHandler {
            next,
            allow_local_http,
        }
    }
}

impl RequestHandler for SecureHandler {
    fn handle(&self, request: BoxRequest) {
        if request.is_https() || (self.allow_local_http && request.is_localhost()) {
            self.next.handle(request);
        } else {
            warn!(path = %request.uri().path(), "got request via unsecured HTTP");
            request.respond(Response::head(StatusCode::UPGRADE_REQUIRED));
        }
    }
}
