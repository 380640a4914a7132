// Copyright 2024-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Trace-mark framework for client daemons.
//!
//! Trace points are grouped into routes (a bitmask per route); a route's
//! marks only reach the tracer while the route is activated. Tracers are
//! process-wide and replaceable: stream tracers print timestamped lines, the
//! kernel tracer writes into the tracefs `trace_marker` so marks interleave
//! with kernel events. The passive kernel variant never toggles `tracing_on`,
//! for systems where tracing is driven externally.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::error;

/// Human-readable channel number of a route mask: index of its lowest bit,
/// one-based.
fn channel_number(route: u32) -> u32 {
    if route == 0 {
        0
    } else {
        route.trailing_zeros() + 1
    }
}

pub trait Tracer: Send + Sync {
    fn trace(&self, route: u32, marker: &str);
    fn start(&self);
    fn stop(&self);
}

/// Tracer printing `seconds.micros   CHN nn: marker` lines to a stream.
pub struct StreamTracer {
    stream: Mutex<Box<dyn Write + Send>>,
    started: AtomicBool,
}

impl StreamTracer {
    pub fn stdout() -> Self {
        Self::new(Box::new(std::io::stdout()))
    }

    pub fn stderr() -> Self {
        Self::new(Box::new(std::io::stderr()))
    }

    pub fn new(stream: Box<dyn Write + Send>) -> Self {
        StreamTracer {
            stream: Mutex::new(stream),
            started: AtomicBool::new(false),
        }
    }
}

impl Tracer for StreamTracer {
    fn trace(&self, route: u32, marker: &str) {
        if !self.started.load(Ordering::Acquire) {
            return;
        }
        let micros = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_micros() as u64)
            .unwrap_or(0);
        #[allow(clippy::unwrap_used)]
        let mut stream = self.stream.lock().unwrap();
        let _ = writeln!(
            stream,
            "{}.{:06}   CHN {:2}: {marker}",
            micros / 1_000_000,
            micros % 1_000_000,
            channel_number(route)
        );
    }

    fn start(&self) {
        self.started.store(true, Ordering::Release);
    }

    fn stop(&self) {
        self.started.store(false, Ordering::Release);
    }
}

/// Tracer writing marks into the kernel trace buffer.
pub struct KernelTracer {
    passive: bool,
    trace_on: Mutex<File>,
    marker: Mutex<File>,
    started: AtomicBool,
}

impl KernelTracer {
    pub fn new() -> std::io::Result<Self> {
        Self::with_mode(false)
    }

    /// A passive tracer writes marks but never starts or stops the kernel's
    /// own event tracing.
    pub fn passive() -> std::io::Result<Self> {
        Self::with_mode(true)
    }

    fn with_mode(passive: bool) -> std::io::Result<Self> {
        let tracing_dir = find_tracing_dir().ok_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::NotFound, "no tracefs mount found")
        })?;
        let trace_on = OpenOptions::new()
            .write(true)
            .open(tracing_dir.join("tracing_on"))?;
        let marker = OpenOptions::new()
            .write(true)
            .open(tracing_dir.join("trace_marker"))?;
        Ok(KernelTracer {
            passive,
            trace_on: Mutex::new(trace_on),
            marker: Mutex::new(marker),
            started: AtomicBool::new(false),
        })
    }
}

impl Tracer for KernelTracer {
    fn trace(&self, route: u32, marker: &str) {
        if !self.started.load(Ordering::Acquire) {
            return;
        }
        let line = format!("CHN {:02}: {marker}", channel_number(route));
        #[allow(clippy::unwrap_used)]
        let mut file = self.marker.lock().unwrap();
        if file.write_all(line.as_bytes()).is_err() && !self.passive {
            error!("kernel tracer failed to write trace marker");
        }
    }

    fn start(&self) {
        if !self.passive {
            #[allow(clippy::unwrap_used)]
            let mut file = self.trace_on.lock().unwrap();
            if file.write_all(b"1").is_err() {
                error!("kernel tracer failed to start trace");
                return;
            }
        }
        self.started.store(true, Ordering::Release);
    }

    fn stop(&self) {
        self.started.store(false, Ordering::Release);
        if !self.passive {
            #[allow(clippy::unwrap_used)]
            let mut file = self.trace_on.lock().unwrap();
            if file.write_all(b"0").is_err() {
                error!("kernel tracer failed to stop trace");
            }
        }
    }
}

/// Locates the kernel tracing directory from the mount table: a tracefs
/// mount directly, or the `tracing` directory of a debugfs mount.
fn find_tracing_dir() -> Option<PathBuf> {
    let mounts = std::fs::read_to_string("/proc/mounts").ok()?;
    let mut debugfs = None;
    for line in mounts.lines() {
        let mut fields = line.split_whitespace();
        let _device = fields.next();
        let (Some(mount_point), Some(fs_type)) = (fields.next(), fields.next()) else {
            continue;
        };
        match fs_type {
            "tracefs" => return Some(PathBuf::from(mount_point)),
            "debugfs" => debugfs = Some(PathBuf::from(mount_point).join("tracing")),
            _ => {}
        }
    }
    debugfs
}

/// Tracer and route-activation state. The process-wide entry points below
/// delegate to one static registry; tests use their own.
#[derive(Default)]
pub struct Registry {
    tracer: RwLock<Option<Arc<dyn Tracer>>>,
    active_routes: AtomicU32,
}

impl Registry {
    pub const fn new() -> Self {
        Registry {
            tracer: RwLock::new(None),
            active_routes: AtomicU32::new(0),
        }
    }

    #[allow(clippy::unwrap_used)]
    pub fn set_tracer(&self, tracer: Option<Arc<dyn Tracer>>) {
        *self.tracer.write().unwrap() = tracer;
    }

    #[allow(clippy::unwrap_used)]
    fn tracer(&self) -> Option<Arc<dyn Tracer>> {
        self.tracer.read().unwrap().clone()
    }

    pub fn activate_routes(&self, routes: u32) {
        self.active_routes.fetch_or(routes, Ordering::SeqCst);
    }

    pub fn deactivate_routes(&self, routes: u32) {
        self.active_routes.fetch_and(!routes, Ordering::SeqCst);
    }

    pub fn is_route_active(&self, route: u32) -> bool {
        self.active_routes.load(Ordering::SeqCst) & route != 0
    }

    pub fn start_channel(&self, route: u32) {
        if self.is_route_active(route) {
            if let Some(tracer) = self.tracer() {
                tracer.start();
            }
        }
    }

    pub fn stop_channel(&self, route: u32) {
        if self.is_route_active(route) {
            if let Some(tracer) = self.tracer() {
                tracer.stop();
            }
        }
    }

    /// Emits one trace mark on a route, if the route is active.
    pub fn set_marker(&self, route: u32, marker: &str) {
        if self.is_route_active(route) {
            if let Some(tracer) = self.tracer() {
                tracer.trace(route, marker);
            }
        }
    }
}

static REGISTRY: Registry = Registry::new();

/// Replaces the process-wide tracer. `None` disables tracing.
pub fn set_tracer(tracer: Option<Arc<dyn Tracer>>) {
    REGISTRY.set_tracer(tracer);
}

/// Enables trace marks for the given routes.
pub fn activate_routes(routes: u32) {
    REGISTRY.activate_routes(routes);
}

pub fn deactivate_routes(routes: u32) {
    REGISTRY.deactivate_routes(routes);
}

pub fn is_route_active(route: u32) -> bool {
    REGISTRY.is_route_active(route)
}

pub fn start_channel(route: u32) {
    REGISTRY.start_channel(route);
}

pub fn stop_channel(route: u32) {
    REGISTRY.stop_channel(route);
}

pub fn set_marker(route: u32, marker: &str) {
    REGISTRY.set_marker(route, marker);
}
