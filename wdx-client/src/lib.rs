// Copyright 2024-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Scaffold for parameter service client daemons.
//!
//! A daemon implements the [`Client`](crate::client::Client) trait and hands
//! itself to [`run_client`](crate::main_loop::run_client), which parses the
//! command line, sets up logging, tracing and privileges, connects to the
//! backend socket and drives the worker loop until a shutdown signal.

pub mod args;
pub mod client;
pub mod log;
pub mod main_loop;
pub mod optparse;
pub mod privileges;
pub mod trace;

pub use args::{Arguments, ClientOption, LogChannel, LogLevel, TracerKind};
pub use client::{Client, InitArgs, InitError};
pub use main_loop::run_client;
