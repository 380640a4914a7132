// Copyright 2024-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

pub mod operations;

use std::collections::HashMap;
use std::sync::Arc;

use http::Method;
use tracing::debug;

use crate::auth::{AuthenticatedRequestHandler, AuthenticationInfo};
use crate::http::request::BoxRequest;
use crate::http::{cors, Request};

/// Body of a REST operation: receives the request and the authenticated
/// identity and must respond.
pub type OperationBody = Arc<dyn Fn(BoxRequest, AuthenticationInfo) + Send + Sync>;

/// One routable REST operation: the method set it serves and its body. The
/// method set also feeds `Allow` and the CORS method headers.
pub struct Operation {
    methods: Vec<Method>,
    body: OperationBody,
}

impl Operation {
    pub fn new(methods: Vec<Method>, body: OperationBody) -> Self {
        Operation { methods, body }
    }

    /// An operation that is routed but not built yet.
    pub fn unimplemented(methods: Vec<Method>) -> Self {
        Operation {
            methods,
            body: Arc::new(|request, _auth| operations::not_implemented(request)),
        }
    }

    pub fn methods(&self) -> &[Method] {
        &self.methods
    }
}

/// Final stage of the handler chain: resolves the request path to an
/// operation and applies the generic fallbacks (redirects, 404/405/406/415,
/// OPTIONS preflight) before invoking the operation body.
pub struct OperationDispatcher {
    service_base: String,
    routes: HashMap<String, Operation>,
    cors_allowed_headers: String,
    cors_exposed_headers: String,
}

impl OperationDispatcher {
    pub fn new(
        service_base: impl Into<String>,
        cors_allowed_headers: impl Into<String>,
        cors_exposed_headers: impl Into<String>,
    ) -> Self {
        OperationDispatcher {
            service_base: service_base.into(),
            routes: HashMap::new(),
            cors_allowed_headers: cors_allowed_headers.into(),
            cors_exposed_headers: cors_exposed_headers.into(),
        }
    }

    /// Registers an operation under a path relative to the service base.
    pub fn route(mut self, path: impl Into<String>, operation: Operation) -> Self {
        self.routes.insert(path.into(), operation);
        self
    }
}

impl AuthenticatedRequestHandler for OperationDispatcher {
    fn handle(&self, mut request: BoxRequest, auth: AuthenticationInfo) {
        let Some(path) = request
            .uri()
            .path()
            .strip_prefix(&self.service_base)
            .map(str::to_owned)
        else {
            operations::not_found(request);
            return;
        };

        // Canonical paths only; everything else redirects first.
        if path.len() > 1 && path.ends_with('/') {
            operations::redirect_trailing_slash(request);
            return;
        }
        if path.bytes().any(|b| b.is_ascii_uppercase()) {
            operations::redirect_to_lowercase(request);
            return;
        }

        let Some(operation) = self.routes.get(&path) else {
            operations::not_found(request);
            return;
        };

        if request.method() == Method::OPTIONS {
            cors::add_cors_response_headers(
                request.as_mut(),
                operation.methods(),
                &self.cors_allowed_headers,
                &self.cors_exposed_headers,
            );
            let response = cors::options_response(request.as_mut(), operation.methods());
            request.respond(response);
            return;
        }

        if !operation.methods().contains(request.method()) {
            operations::method_not_allowed(request, operation.methods());
            return;
        }

        if let Some(accept) = request.header("accept") {
            let content_type = request.serializer().content_type().to_owned();
            if !accept_matches(accept, &content_type) {
                operations::not_acceptable(request);
                return;
            }
        }

        if !request.body().is_empty() {
            let expected = request.serializer().content_type().to_owned();
            let declared = request.content_type().map(str::to_owned);
            if declared.as_deref() != Some(expected.as_str()) {
                operations::not_supported_content_type(request);
                return;
            }
        }

        debug!(path = %path, "dispatching operation");
        (operation.body)(request, auth);
    }
}

/// Whether an `Accept` header admits the serializer's media type. Media type
/// parameters are ignored; `*/*` and a matching `type/*` are accepted.
fn accept_matches(accept: &str, content_type: &str) -> bool {
    let expected_type = content_type.split('/').next().unwrap_or("");
    accept.split(',').any(|entry| {
        let media = entry.split(';').next().unwrap_or("").trim();
        media == "*/*" || media == content_type || media == format!("{expected_type}/*")
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::Response;
    use crate::test_utils::{RequestBuilder, ResponseSlot};
    use http::StatusCode;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn auth() -> AuthenticationInfo {
        AuthenticationInfo {
            user_name: "admin".to_string(),
        }
    }

    fn dispatcher() -> OperationDispatcher {
        OperationDispatcher::new("/wda", "Content-Type, Authorization", "")
            .route(
                "/parameters",
                Operation::new(
                    vec![Method::GET, Method::PUT, Method::OPTIONS],
                    Arc::new(|request, auth| {
                        let mut response = Response::head(StatusCode::OK);
                        response.set_body("text/plain", auth.user_name);
                        request.respond(response);
                    }),
                ),
            )
            .route("/devices", Operation::unimplemented(vec![Method::GET]))
    }

    fn respond(request_uri: &str, method: Method) -> ResponseSlot {
        let (request, slot) = RequestBuilder::new(method, request_uri).build();
        dispatcher().handle(request, auth());
        slot
    }

    #[test]
    fn routes_to_the_operation_body() {
        let slot = respond("/wda/parameters", Method::GET);
        let response = slot.take().unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.body(), b"admin");
    }

    #[test]
    fn unknown_paths_are_not_found() {
        let slot = respond("/wda/missing", Method::GET);
        assert_eq!(slot.take().unwrap().status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn foreign_prefixes_are_not_found() {
        let slot = respond("/other/parameters", Method::GET);
        assert_eq!(slot.take().unwrap().status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn trailing_slash_redirects_and_keeps_the_query() {
        let (request, slot) =
            RequestBuilder::new(Method::GET, "/wda/parameters/?depth=1").build();
        dispatcher().handle(request, auth());
        let response = slot.take().unwrap();
        assert_eq!(response.status(), StatusCode::MOVED_PERMANENTLY);
        assert_eq!(
            response.header("Location"),
            Some("/wda/parameters?depth=1")
        );
    }

    #[test]
    fn non_get_redirects_use_307() {
        let (request, slot) = RequestBuilder::new(Method::PUT, "/wda/parameters/").build();
        dispatcher().handle(request, auth());
        let response = slot.take().unwrap();
        assert_eq!(response.status(), StatusCode::TEMPORARY_REDIRECT);
        assert_eq!(response.header("Location"), Some("/wda/parameters"));
    }

    #[test]
    fn uppercase_paths_redirect_to_lowercase() {
        let slot = respond("/wda/Parameters", Method::GET);
        let response = slot.take().unwrap();
        assert_eq!(response.status(), StatusCode::MOVED_PERMANENTLY);
        assert_eq!(response.header("Location"), Some("/wda/parameters"));
    }

    #[test]
    fn unsupported_methods_get_405_with_allow() {
        let slot = respond("/wda/parameters", Method::DELETE);
        let response = slot.take().unwrap();
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(response.header("Allow"), Some("GET, PUT, OPTIONS"));
    }

    #[test]
    fn options_preflight_bypasses_the_operation() {
        let (request, slot) = RequestBuilder::new(Method::OPTIONS, "/wda/parameters")
            .header("Origin", "https://panel.local")
            .build();
        dispatcher().handle(request, auth());
        let response = slot.take().unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        assert_eq!(response.header("Allow"), Some("GET, PUT, OPTIONS"));
        assert_eq!(
            response.header("Access-Control-Allow-Origin"),
            Some("https://panel.local")
        );
        assert_eq!(
            response.header("Access-Control-Allow-Methods"),
            Some("GET, PUT, OPTIONS")
        );
        assert_eq!(response.header("Access-Control-Max-Age"), Some("86400"));
        assert_eq!(
            response.header("Access-Control-Allow-Credentials"),
            Some("true")
        );
        assert_eq!(response.header("Vary"), Some("Origin"));
    }

    #[test]
    fn unacceptable_accept_header_is_406() {
        let (request, slot) = RequestBuilder::new(Method::GET, "/wda/parameters")
            .header("Accept", "text/html")
            .build();
        dispatcher().handle(request, auth());
        assert_eq!(slot.take().unwrap().status(), StatusCode::NOT_ACCEPTABLE);
    }

    #[test]
    fn wildcard_accept_headers_pass() {
        let (request, slot) = RequestBuilder::new(Method::GET, "/wda/parameters")
            .header("Accept", "text/html, */*;q=0.1")
            .build();
        dispatcher().handle(request, auth());
        assert_eq!(slot.take().unwrap().status(), StatusCode::OK);
    }

    #[test]
    fn mismatched_request_body_content_type_is_415() {
        let (request, slot) = RequestBuilder::new(Method::PUT, "/wda/parameters")
            .header("Content-Type", "text/xml")
            .body("<parameter/>")
            .build();
        dispatcher().handle(request, auth());
        assert_eq!(
            slot.take().unwrap().status(),
            StatusCode::UNSUPPORTED_MEDIA_TYPE
        );
    }

    #[test]
    fn matching_request_body_content_type_passes() {
        let (request, slot) = RequestBuilder::new(Method::PUT, "/wda/parameters")
            .header("Content-Type", "application/vnd.api+json")
            .body("{}")
            .build();
        dispatcher().handle(request, auth());
        assert_eq!(slot.take().unwrap().status(), StatusCode::OK);
    }

    #[test]
    fn unimplemented_routes_answer_501() {
        let slot = respond("/wda/devices", Method::GET);
        assert_eq!(slot.take().unwrap().status(), StatusCode::NOT_IMPLEMENTED);
    }

    #[test]
    fn operation_bodies_see_the_authenticated_user() {
        let forwarded = Arc::new(AtomicUsize::new(0));
        let seen = forwarded.clone();
        let dispatcher = OperationDispatcher::new("/wda", "", "").route(
            "/whoami",
            Operation::new(
                vec![Method::GET],
                Arc::new(move |request, auth| {
                    assert_eq!(auth.user_name, "admin");
                    seen.fetch_add(1, Ordering::SeqCst);
                    request.respond(Response::head(StatusCode::OK));
                }),
            ),
        );
        let (request, slot) = RequestBuilder::new(Method::GET, "/wda/whoami").build();
        dispatcher.handle(request, auth());
        assert_eq!(forwarded.load(Ordering::SeqCst), 1);
        assert_eq!(slot.take().unwrap().status(), StatusCode::OK);
    }
}
