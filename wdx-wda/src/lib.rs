// Copyright 2024-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Web data access layer of the parameter service.
//!
//! Incoming HTTP requests travel through a chain of handler stages; each
//! stage owns its successor and consumes the request by move, so a request is
//! answered exactly once: a stage either responds or forwards, never both.
//! The chain is transport security gating, then authentication, then
//! operation dispatch.

pub mod auth;
pub mod http;
pub mod rest;
pub mod test_utils;
