// Copyright 2024-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

pub mod cors;
pub mod request;
pub mod response;
pub mod secure_handler;

pub use request::{BoxRequest, Request, Responder, Serializer, ServedRequest};
pub use response::Response;
pub use secure_handler::SecureHandler;

/// One stage of the request handler chain. A stage either responds on the
/// request or forwards it to the next stage.
pub trait RequestHandler: Send + Sync {
    fn handle(&self, request: BoxRequest);
}
