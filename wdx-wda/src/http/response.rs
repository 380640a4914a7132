// Copyright 2024-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use http::header::{HeaderMap, HeaderName, HeaderValue};
use http::StatusCode;
use tracing::warn;

/// An HTTP response as produced by the handler chain: status, headers and an
/// optional body. Request-level response headers accumulated during handling
/// are merged in when the request responds.
#[derive(Debug, Clone)]
pub struct Response {
    status: StatusCode,
    headers: HeaderMap,
    body: Vec<u8>,
}

impl Response {
    /// A header-only response.
    pub fn head(status: StatusCode) -> Self {
        Response {
            status,
            headers: HeaderMap::new(),
            body: Vec::new(),
        }
    }

    pub fn with_headers(status: StatusCode, headers: HeaderMap) -> Self {
        Response {
            status,
            headers,
            body: Vec::new(),
        }
    }

    pub fn set_body(&mut self, content_type: &str, body: impl Into<Vec<u8>>) {
        self.set_header("Content-Type", content_type);
        self.body = body.into();
    }

    pub fn set_header(&mut self, name: &str, value: &str) {
        append_header(&mut self.headers, name, value);
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    pub fn has_content(&self) -> bool {
        !self.body.is_empty()
    }
}

/// Appends a header, dropping (and logging) values that are not legal HTTP
/// header material instead of failing the response.
pub(crate) fn append_header(headers: &mut HeaderMap, name: &str, value: &str) {
    let name = match HeaderName::from_bytes(name.as_bytes()) {
        Ok(name) => name,
        Err(_) => {
            warn!(header = name, "dropping response header with invalid name");
            return;
        }
    };
    let value = match HeaderValue::from_str(value) {
        Ok(value) => value,
        Err(_) => {
            warn!(header = %name, "dropping response header with invalid value");
            return;
        }
    };
    headers.append(name, value);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn head_response_has_no_content() {
        let response = Response::head(StatusCode::NO_CONTENT);
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        assert!(!response.has_content());
    }

    #[test]
    fn body_setting_stamps_the_content_type() {
        let mut response = Response::head(StatusCode::NOT_FOUND);
        response.set_body("text/plain", "missing");
        assert_eq!(response.header("Content-Type"), Some("text/plain"));
        assert_eq!(response.body(), b"missing");
    }

    #[test]
    fn invalid_header_material_is_dropped() {
        let mut response = Response::head(StatusCode::OK);
        response.set_header("bad header name", "x");
        response.set_header("X-Ok", "bad\nvalue");
        assert!(response.headers().is_empty());
    }
}
