// Copyright 2024-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! CORS helpers, per the WHATWG Fetch standard.

use http::{Method, StatusCode};

use super::request::Request;
use super::response::Response;

/// Builds the response for a CORS preflight: `204 No Content` with `Allow`
/// derived from the operation's declared method set. The CORS headers proper
/// come from [`add_cors_response_headers`], which only acts when the request
/// actually carries an `Origin`.
pub fn options_response(request: &mut dyn Request, allowed_methods: &[Method]) -> Response {
    request.add_response_header("Allow", &allow_header_value(allowed_methods));
    Response::head(StatusCode::NO_CONTENT)
}

/// Adds the permitted-origin headers to the eventual response of `request`,
/// if and only if the request carries an `Origin` header.
pub fn add_cors_response_headers(
    request: &mut dyn Request,
    allowed_methods: &[Method],
    allowed_headers: &str,
    exposed_headers: &str,
) {
    let Some(origin) = request.header("origin").map(str::to_owned) else {
        return;
    };

    request.add_response_header("Vary", "Origin");
    request.add_response_header("Access-Control-Allow-Origin", &origin);
    request.add_response_header("Access-Control-Max-Age", "86400");
    request.add_response_header("Access-Control-Allow-Credentials", "true");
    request.add_response_header(
        "Access-Control-Allow-Methods",
        &allow_header_value(allowed_methods),
    );
    if !allowed_headers.is_empty() {
        request.add_response_header("Access-Control-Allow-Headers", allowed_headers);
    }
    if !exposed_headers.is_empty() {
        request.add_response_header("Access-Control-Expose-Headers", exposed_headers);
    }
}

/// Comma-separated method list for `Allow` and
/// `Access-Control-Allow-Methods`.
pub fn allow_header_value(allowed_methods: &[Method]) -> String {
    allowed_methods
        .iter()
        .map(Method::as_str)
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::RequestBuilder;
    use http::Method;

    #[test]
    fn allow_header_lists_methods_in_order() {
        assert_eq!(
            allow_header_value(&[Method::GET, Method::PUT, Method::OPTIONS]),
            "GET, PUT, OPTIONS"
        );
        assert_eq!(allow_header_value(&[]), "");
    }

    #[test]
    fn options_response_is_no_content_with_allow() {
        let (mut request, slot) = RequestBuilder::new(Method::OPTIONS, "/wda/parameters")
            .header("Origin", "https://device.local")
            .build_concrete();

        let response = options_response(&mut *request, &[Method::GET, Method::OPTIONS]);
        assert_eq!(response.status(), StatusCode::NO_CONTENT);

        let request: crate::http::BoxRequest = request;
        request.respond(response);
        let response = slot.take().unwrap();
        assert_eq!(response.header("Allow"), Some("GET, OPTIONS"));
    }

    #[test]
    fn cors_headers_require_an_origin() {
        let (mut request, slot) =
            RequestBuilder::new(Method::GET, "/wda/parameters").build_concrete();
        add_cors_response_headers(&mut *request, &[Method::GET], "Content-Type", "");

        let request: crate::http::BoxRequest = request;
        request.respond(Response::head(StatusCode::OK));
        let response = slot.take().unwrap();
        assert!(response.header("Access-Control-Allow-Origin").is_none());
        assert!(response.header("Vary").is_none());
    }

    #[test]
    fn cors_headers_echo_the_origin() {
        let (mut request, slot) = RequestBuilder::new(Method::GET, "/wda/parameters")
            .header("Origin", "https://device.local")
            .build_concrete();
        add_cors_response_headers(
            &mut *request,
            &[Method::GET, Method::PUT],
            "Content-Type, Authorization",
            "WAGO-WDX-Auth-Token",
        );

        let request: crate::http::BoxRequest = request;
        request.respond(Response::head(StatusCode::OK));
        let response = slot.take().unwrap();
        assert_eq!(
            response.header("Access-Control-Allow-Origin"),
            Some("https://device.local")
        );
        assert_eq!(response.header("Vary"), Some("Origin"));
        assert_eq!(response.header("Access-Control-Max-Age"), Some("86400"));
        assert_eq!(
            response.header("Access-Control-Allow-Credentials"),
            Some("true")
        );
        assert_eq!(
            response.header("Access-Control-Allow-Methods"),
            Some("GET, PUT")
        );
        assert_eq!(
            response.header("Access-Control-Allow-Headers"),
            Some("Content-Type, Authorization")
        );
        assert_eq!(
            response.header("Access-Control-Expose-Headers"),
            Some("WAGO-WDX-Auth-Token")
        );
    }
}
