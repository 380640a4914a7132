// Copyright 2024-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Test doubles for the handler chain: buildable requests with recordable
//! responses, recording next-stages and static authentication backends.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use http::header::HeaderMap;
use http::{Method, StatusCode, Uri};

use crate::auth::{
    AuthResult, AuthSettings, AuthenticatedRequestHandler, AuthenticationInfo, PasswordBackend,
    TokenBackend,
};
use crate::http::request::{BoxRequest, Responder, Serializer, ServedRequest};
use crate::http::response::{append_header, Response};
use crate::http::RequestHandler;

/// Slot receiving the response of a built test request.
#[derive(Clone, Default)]
pub struct ResponseSlot(Arc<Mutex<Option<Response>>>);

impl ResponseSlot {
    #[allow(clippy::unwrap_used)]
    pub fn take(&self) -> Option<Response> {
        self.0.lock().unwrap().take()
    }

    #[allow(clippy::unwrap_used)]
    pub fn is_empty(&self) -> bool {
        self.0.lock().unwrap().is_none()
    }
}

pub struct StaticSerializer(pub String);

impl Serializer for StaticSerializer {
    fn content_type(&self) -> &str {
        &self.0
    }
}

/// Builder for requests entering the chain under test. Defaults to an HTTPS
/// request from a remote peer with a JSON:API serializer.
pub struct RequestBuilder {
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Vec<u8>,
    https: bool,
    localhost: bool,
    content_type: String,
    tolerate_drop: bool,
}

impl RequestBuilder {
    #[allow(clippy::unwrap_used)]
    pub fn new(method: Method, uri: &str) -> Self {
        RequestBuilder {
            method,
            uri: uri.parse().unwrap(),
            headers: HeaderMap::new(),
            body: Vec::new(),
            https: true,
            localhost: false,
            content_type: crate::http::request::JSON_API_CONTENT_TYPE.to_string(),
            tolerate_drop: false,
        }
    }

    pub fn header(mut self, name: &str, value: &str) -> Self {
        append_header(&mut self.headers, name, value);
        self
    }

    pub fn body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    pub fn plain_http(mut self) -> Self {
        self.https = false;
        self
    }

    pub fn localhost(mut self) -> Self {
        self.localhost = true;
        self
    }

    pub fn serializer_content_type(mut self, content_type: &str) -> Self {
        self.content_type = content_type.to_string();
        self
    }

    /// Marks the request as one that is expected to be dropped unanswered,
    /// disarming the drop-guard assertion so the framework's 500 fallback can
    /// be observed.
    pub fn tolerate_drop(mut self) -> Self {
        self.tolerate_drop = true;
        self
    }

    pub fn build(self) -> (BoxRequest, ResponseSlot) {
        let (request, slot) = self.build_concrete();
        (request, slot)
    }

    pub fn build_concrete(self) -> (Box<ServedRequest>, ResponseSlot) {
        let slot = ResponseSlot::default();
        let sink = slot.0.clone();
        let responder: Responder = Box::new(move |response| {
            #[allow(clippy::unwrap_used)]
            let mut slot = sink.lock().unwrap();
            assert!(slot.is_none(), "request responded more than once");
            *slot = Some(response);
        });
        let mut request = ServedRequest::new(
            self.method,
            self.uri,
            self.headers,
            self.body,
            self.https,
            self.localhost,
            Box::new(StaticSerializer(self.content_type)),
            responder,
        );
        if self.tolerate_drop {
            request.tolerate_drop();
        }
        (Box::new(request), slot)
    }
}

/// Next stage recording how often it was reached; answers 200.
pub struct RecordingHandler {
    count: AtomicUsize,
}

impl RecordingHandler {
    pub fn new() -> Arc<Self> {
        Arc::new(RecordingHandler {
            count: AtomicUsize::new(0),
        })
    }

    pub fn count(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }
}

impl RequestHandler for RecordingHandler {
    fn handle(&self, request: BoxRequest) {
        self.count.fetch_add(1, Ordering::SeqCst);
        request.respond(Response::head(StatusCode::OK));
    }
}

/// Authenticated next stage recording the forwarded identity; answers 200.
pub struct RecordingAuthHandler {
    count: AtomicUsize,
    last_user: Mutex<Option<String>>,
}

impl RecordingAuthHandler {
    pub fn new() -> Arc<Self> {
        Arc::new(RecordingAuthHandler {
            count: AtomicUsize::new(0),
            last_user: Mutex::new(None),
        })
    }

    pub fn count(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }

    #[allow(clippy::unwrap_used)]
    pub fn last_user(&self) -> Option<String> {
        self.last_user.lock().unwrap().clone()
    }
}

impl AuthenticatedRequestHandler for RecordingAuthHandler {
    fn handle(&self, request: BoxRequest, auth: AuthenticationInfo) {
        self.count.fetch_add(1, Ordering::SeqCst);
        #[allow(clippy::unwrap_used)]
        {
            *self.last_user.lock().unwrap() = Some(auth.user_name);
        }
        request.respond(Response::head(StatusCode::OK));
    }
}

/// Stage that leaks the request on purpose, to exercise the framework's
/// 500-on-drop guarantee.
pub struct DroppingHandler;

impl RequestHandler for DroppingHandler {
    fn handle(&self, request: BoxRequest) {
        drop(request);
    }
}

impl AuthenticatedRequestHandler for DroppingHandler {
    fn handle(&self, request: BoxRequest, _auth: AuthenticationInfo) {
        drop(request);
    }
}

/// Password backend accepting exactly one user/password pair.
pub struct StaticPasswordBackend {
    pub user: String,
    pub password: String,
    pub result: AuthResult,
    pub attempts: Mutex<Vec<(String, String)>>,
}

impl StaticPasswordBackend {
    pub fn accepting(user: &str, password: &str, result: AuthResult) -> Arc<Self> {
        Arc::new(StaticPasswordBackend {
            user: user.to_string(),
            password: password.to_string(),
            result,
            attempts: Mutex::new(Vec::new()),
        })
    }

    /// A backend that rejects every attempt.
    pub fn rejecting() -> Arc<Self> {
        Self::accepting("", "", AuthResult::default())
    }
}

impl PasswordBackend for StaticPasswordBackend {
    fn authenticate(&self, user: &str, password: &str) -> AuthResult {
        #[allow(clippy::unwrap_used)]
        self.attempts
            .lock()
            .unwrap()
            .push((user.to_string(), password.to_string()));
        if !self.user.is_empty() && user == self.user && password == self.password {
            self.result.clone()
        } else {
            AuthResult::default()
        }
    }
}

/// Token backend accepting exactly one token.
pub struct StaticTokenBackend {
    pub token: String,
    pub result: AuthResult,
    pub remaining_time: u32,
}

impl StaticTokenBackend {
    pub fn accepting(token: &str, result: AuthResult, remaining_time: u32) -> Arc<Self> {
        Arc::new(StaticTokenBackend {
            token: token.to_string(),
            result,
            remaining_time,
        })
    }
}

impl TokenBackend for StaticTokenBackend {
    fn authenticate(&self, token: &str, remaining_time: &mut u32) -> AuthResult {
        if token == self.token {
            *remaining_time = self.remaining_time;
            self.result.clone()
        } else {
            AuthResult::default()
        }
    }
}

/// Settings source with a fixed unauthenticated-URL list.
pub struct StaticSettings(pub String);

impl StaticSettings {
    pub fn with_urls(urls: &str) -> Arc<Self> {
        Arc::new(StaticSettings(urls.to_string()))
    }

    pub fn empty() -> Arc<Self> {
        Arc::new(StaticSettings(String::new()))
    }
}

impl AuthSettings for StaticSettings {
    fn unauthenticated_urls(&self) -> String {
        self.0.clone()
    }
}
