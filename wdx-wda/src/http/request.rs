// Copyright 2024-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Abstract HTTP request/response pair handed through the handler chain.
//!
//! A request is answered at most once: `respond` consumes the boxed request,
//! so a second response is unrepresentable. A request dropped without a
//! response is a bug in some stage; the framework still guarantees the caller
//! a 500 (see [`ServedRequest`]).

use http::header::HeaderMap;
use http::{Method, StatusCode, Uri};
use tracing::error;

use super::response::{append_header, Response};

/// Names the default media type for responses produced on this request.
pub trait Serializer: Send + Sync {
    fn content_type(&self) -> &str;
}

/// JSON:API flavoured default serializer of the REST layer.
pub struct JsonApiSerializer;

pub const JSON_API_CONTENT_TYPE: &str = "application/vnd.api+json";

impl Serializer for JsonApiSerializer {
    fn content_type(&self) -> &str {
        JSON_API_CONTENT_TYPE
    }
}

pub type BoxRequest = Box<dyn Request>;

pub trait Request: Send {
    fn method(&self) -> &Method;
    fn uri(&self) -> &Uri;
    fn headers(&self) -> &HeaderMap;
    fn body(&self) -> &[u8];

    /// Whether the request arrived over TLS.
    fn is_https(&self) -> bool;
    /// Whether the peer is the local host.
    fn is_localhost(&self) -> bool;

    fn serializer(&self) -> &dyn Serializer;

    /// Case-insensitive single-header lookup.
    fn header(&self, name: &str) -> Option<&str> {
        self.headers().get(name).and_then(|v| v.to_str().ok())
    }

    fn has_header(&self, name: &str) -> bool {
        self.headers().contains_key(name)
    }

    fn content_type(&self) -> Option<&str> {
        self.header("content-type")
    }

    /// Adds a header to the eventual response, whichever stage produces it.
    fn add_response_header(&mut self, name: &str, value: &str);

    /// Emits the response. Consumes the request; responding twice is
    /// unrepresentable.
    fn respond(self: Box<Self>, response: Response);
}

/// Callback delivering the final response to the HTTP server layer.
pub type Responder = Box<dyn FnOnce(Response) + Send>;

/// Framework-owned request implementation.
///
/// Carries the parsed request data, the accumulated response headers and the
/// single-shot responder. If a handler chain stage drops the request without
/// responding, the drop guard answers 500 so the caller never hangs on a
/// request that silently disappeared.
pub struct ServedRequest {
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Vec<u8>,
    https: bool,
    localhost_peer: bool,
    serializer: Box<dyn Serializer>,
    response_headers: HeaderMap,
    responder: Option<Responder>,
    assert_on_drop: bool,
}

impl ServedRequest {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        method: Method,
        uri: Uri,
        headers: HeaderMap,
        body: Vec<u8>,
        https: bool,
        localhost_peer: bool,
        serializer: Box<dyn Serializer>,
        responder: Responder,
    ) -> Self {
        ServedRequest {
            method,
            uri,
            headers,
            body,
            https,
            localhost_peer,
            serializer,
            response_headers: HeaderMap::new(),
            responder: Some(responder),
            assert_on_drop: cfg!(debug_assertions),
        }
    }

    /// Disarms the debug assertion of the drop guard, for tests that
    /// exercise the framework's 500-on-leak guarantee on purpose.
    pub fn tolerate_drop(&mut self) {
        self.assert_on_drop = false;
    }
}

impl Request for ServedRequest {
    fn method(&self) -> &Method {
        &self.method
    }

    fn uri(&self) -> &Uri {
        &self.uri
    }

    fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    fn body(&self) -> &[u8] {
        &self.body
    }

    fn is_https(&self) -> bool {
        self.https
    }

    fn is_localhost(&self) -> bool {
        self.localhost_peer
    }

    fn serializer(&self) -> &dyn Serializer {
        self.serializer.as_ref()
    }

    fn add_response_header(&mut self, name: &str, value: &str) {
        append_header(&mut self.response_headers, name, value);
    }

    fn respond(mut self: Box<Self>, mut response: Response) {
        for (name, value) in &self.response_headers {
            response.headers_mut().append(name.clone(), value.clone());
        }
        if let Some(responder) = self.responder.take() {
            responder(response);
        }
    }
}

impl Drop for ServedRequest {
    fn drop(&mut self) {
        if let Some(responder) = self.responder.take() {
            if self.assert_on_drop && !std::thread::panicking() {
                debug_assert!(false, "request dropped without a response");
            }
            error!(
                path = %self.uri.path(),
                "request dropped without a response, answering 500"
            );
            responder(Response::head(StatusCode::INTERNAL_SERVER_ERROR));
        }
    }
}
