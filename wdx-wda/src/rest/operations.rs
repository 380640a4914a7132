// Copyright 2024-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Generic REST operations: redirects and the canned error responses.

use http::header::HeaderMap;
use http::{Method, StatusCode};
use tracing::debug;

use crate::http::cors;
use crate::http::request::{BoxRequest, Request};
use crate::http::response::{append_header, Response};

/// Redirect target for a request, keeping the query string.
fn location(path: String, request: &dyn Request) -> String {
    match request.uri().query() {
        Some(query) => format!("{path}?{query}"),
        None => path,
    }
}

/// 301 for GET; 307 otherwise, as a client may always use a GET when
/// following a 308 redirect.
fn redirect_status(request: &dyn Request) -> StatusCode {
    if request.method() == Method::GET {
        StatusCode::MOVED_PERMANENTLY
    } else {
        StatusCode::TEMPORARY_REDIRECT
    }
}

fn redirect(request: BoxRequest, new_path: String) {
    let status = redirect_status(request.as_ref());
    let target = location(new_path, request.as_ref());
    let mut headers = HeaderMap::new();
    append_header(&mut headers, "Location", &target);
    request.respond(Response::with_headers(status, headers));
}

pub fn redirect_trailing_slash(request: BoxRequest) {
    debug!("operation called: redirect_trailing_slash");
    let mut path = request.uri().path().to_string();
    path.pop();
    redirect(request, path);
}

pub fn redirect_to_lowercase(request: BoxRequest) {
    debug!("operation called: redirect_to_lowercase");
    let path = request.uri().path().to_ascii_lowercase();
    redirect(request, path);
}

fn error_response(request: BoxRequest, status: StatusCode, message: String) {
    let mut response = Response::head(status);
    let content_type = request.serializer().content_type().to_owned();
    response.set_body(&content_type, message);
    request.respond(response);
}

pub fn not_found(request: BoxRequest) {
    debug!("operation called: not_found");
    let message = format!("No resource found at \"{}\".", request.uri().path());
    error_response(request, StatusCode::NOT_FOUND, message);
}

pub fn not_implemented(request: BoxRequest) {
    debug!("operation called: not_implemented");
    let message = format!(
        "URL endpoint \"{}\" is not implemented yet.",
        request.uri().path()
    );
    error_response(request, StatusCode::NOT_IMPLEMENTED, message);
}

pub fn not_acceptable(request: BoxRequest) {
    let accept = request.header("accept").unwrap_or("").to_owned();
    let supported = request.serializer().content_type().to_owned();
    let message = format!(
        "Requested content type \"{accept}\" is not supported. Only \"{supported}\" is supported."
    );
    error_response(request, StatusCode::NOT_ACCEPTABLE, message);
}

pub fn not_supported_content_type(request: BoxRequest) {
    let content_type = request.content_type().unwrap_or("").to_owned();
    let supported = request.serializer().content_type().to_owned();
    let message = format!(
        "Content type \"{content_type}\" is not supported. Only \"{supported}\" is supported."
    );
    error_response(request, StatusCode::UNSUPPORTED_MEDIA_TYPE, message);
}

pub fn method_not_allowed(mut request: BoxRequest, allowed_methods: &[Method]) {
    let message = format!(
        "Method \"{}\" is not allowed on this resource.",
        request.method()
    );
    request.add_response_header("Allow", &cors::allow_header_value(allowed_methods));
    error_response(request, StatusCode::METHOD_NOT_ALLOWED, message);
}

/// Generic HEAD operation: 200 with the default content type and no body.
pub fn head(request: BoxRequest) {
    debug!("operation called: head");
    let mut response = Response::head(StatusCode::OK);
    let content_type = request.serializer().content_type().to_owned();
    response.set_header("Content-Type", &content_type);
    request.respond(response);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::RequestBuilder;

    #[test]
    fn not_found_names_the_path() {
        let (request, slot) = RequestBuilder::new(Method::GET, "/wda/gone").build();
        not_found(request);
        let response = slot.take().unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(
            std::str::from_utf8(response.body()).unwrap(),
            "No resource found at \"/wda/gone\"."
        );
        assert_eq!(
            response.header("Content-Type"),
            Some("application/vnd.api+json")
        );
    }

    #[test]
    fn method_not_allowed_populates_allow() {
        let (request, slot) = RequestBuilder::new(Method::PATCH, "/wda/parameters").build();
        method_not_allowed(request, &[Method::GET, Method::PUT]);
        let response = slot.take().unwrap();
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(response.header("Allow"), Some("GET, PUT"));
    }

    #[test]
    fn head_has_content_type_but_no_body() {
        let (request, slot) = RequestBuilder::new(Method::HEAD, "/wda/parameters").build();
        head(request);
        let response = slot.take().unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(!response.has_content());
        assert_eq!(
            response.header("Content-Type"),
            Some("application/vnd.api+json")
        );
    }

    #[test]
    fn redirects_depend_on_the_method() {
        let (request, slot) = RequestBuilder::new(Method::GET, "/wda/x/").build();
        redirect_trailing_slash(request);
        assert_eq!(slot.take().unwrap().status(), StatusCode::MOVED_PERMANENTLY);

        let (request, slot) = RequestBuilder::new(Method::POST, "/wda/x/").build();
        redirect_trailing_slash(request);
        assert_eq!(
            slot.take().unwrap().status(),
            StatusCode::TEMPORARY_REDIRECT
        );
    }
}
