// Copyright 2024-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Connection plane for parameter service clients.
//!
//! A client session binds a framed message [`adapter`](crate::adapter) to an
//! AF_UNIX endpoint, waits for the server socket to appear using the
//! [`notifier`](crate::notifier), connects, and transparently reconnects when
//! the server goes away. All asynchronous work runs on the shared reactor
//! owned by the [`Driver`](crate::driver::Driver).

pub mod adapter;
pub mod client;
pub mod driver;
pub mod endpoint;
pub mod error;
pub mod notifier;
pub mod sal;

pub use adapter::{AdapterState, MessageAdapter, MessageHandler, ProtectedAdapter};
pub use client::{BackendClient, SessionState};
pub use driver::{Driver, StopToken};
pub use error::{NotifierError, TransportError};
pub use notifier::{FileKind, FileNotifier};
