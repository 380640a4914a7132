// Copyright 2024-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Reactor facade driven by the daemon's worker threads.
//!
//! All asynchronous work of the connection plane runs on one shared tokio
//! runtime. Any number of OS threads may call [`Driver::run`] concurrently;
//! each parks on the stop future while the runtime workers execute the actual
//! completions. [`Driver::stop`] wakes every parked caller, and every backoff
//! sleep in the client session races the same token, so stopping interrupts
//! a pending sleep no later than its expiry.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::runtime::{Builder, Handle, Runtime};
use tokio::sync::Notify;
use tracing::debug;

/// Soft-cancellation token shared by the driver and the client sessions.
#[derive(Clone, Default)]
pub struct StopToken {
    stopped: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl StopToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop(&self) {
        self.stopped.store(true, Ordering::Release);
        self.notify.notify_waiters();
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    /// Resolves once the token is stopped.
    pub async fn cancelled(&self) {
        loop {
            if self.is_stopped() {
                return;
            }
            let notified = self.notify.notified();
            tokio::pin!(notified);
            // Register the waiter, then re-check; a `stop` in between would
            // otherwise be missed.
            notified.as_mut().enable();
            if self.is_stopped() {
                return;
            }
            notified.await;
        }
    }

    /// Sleeps for `duration` unless the token is stopped first. Returns false
    /// when woken by `stop`.
    pub async fn sleep(&self, duration: Duration) -> bool {
        tokio::select! {
            _ = tokio::time::sleep(duration) => !self.is_stopped(),
            _ = self.cancelled() => false,
        }
    }
}

/// Interval a `run` call parks for before handing control back to its caller,
/// which keeps idle callers from busy-waiting.
const RUN_PARK_INTERVAL: Duration = Duration::from_millis(100);

/// Owns the shared runtime. `worker_count` additional runtime workers (0..8)
/// serve the scheduled completions; scheduling is safe for concurrent use and
/// each completion runs on the first worker to pick it up.
pub struct Driver {
    runtime: Runtime,
    stop: StopToken,
}

impl Driver {
    pub fn new(worker_count: usize) -> std::io::Result<Self> {
        let runtime = Builder::new_multi_thread()
            .worker_threads(worker_count.max(1))
            .thread_name("wdx-com-worker")
            .enable_io()
            .enable_time()
            .build()?;
        Ok(Driver {
            runtime,
            stop: StopToken::new(),
        })
    }

    pub fn handle(&self) -> Handle {
        self.runtime.handle().clone()
    }

    pub fn stop_token(&self) -> StopToken {
        self.stop.clone()
    }

    /// Drives the reactor once. Returns quickly (at most ~100 ms) so callers
    /// can interleave their own shutdown checks; returns false once the
    /// driver was stopped.
    pub fn run(&self) -> bool {
        if self.stop.is_stopped() {
            return false;
        }
        self.runtime.block_on(async {
            tokio::select! {
                _ = self.stop.cancelled() => false,
                _ = tokio::time::sleep(RUN_PARK_INTERVAL) => true,
            }
        })
    }

    /// Drives work with an upper bound of `timeout_ms` milliseconds. Returns
    /// false once the driver was stopped.
    pub fn run_once(&self, timeout_ms: u64) -> bool {
        if self.stop.is_stopped() {
            return false;
        }
        self.runtime.block_on(async {
            tokio::select! {
                _ = self.stop.cancelled() => false,
                _ = tokio::time::sleep(Duration::from_millis(timeout_ms)) => true,
            }
        })
    }

    /// Causes current and future `run` iterations to exit.
    pub fn stop(&self) {
        debug!("driver stop requested");
        self.stop.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[test]
    fn run_returns_false_after_stop() {
        let driver = Driver::new(0).unwrap();
        assert!(driver.run_once(10));
        driver.stop();
        assert!(!driver.run());
        assert!(!driver.run_once(1000));
    }

    #[test]
    fn stop_wakes_a_parked_run_call() {
        let driver = Arc::new(Driver::new(0).unwrap());
        let parked = driver.clone();
        let started = Instant::now();

        let runner = std::thread::spawn(move || while parked.run() {});
        std::thread::sleep(Duration::from_millis(50));
        driver.stop();
        runner.join().unwrap();

        // Well below an un-interrupted multi-iteration park.
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[test]
    fn concurrent_run_callers_are_allowed() {
        let driver = Arc::new(Driver::new(2).unwrap());
        let mut workers = Vec::new();
        for _ in 0..4 {
            let shared = driver.clone();
            workers.push(std::thread::spawn(move || while shared.run() {}));
        }
        std::thread::sleep(Duration::from_millis(50));
        driver.stop();
        for worker in workers {
            worker.join().unwrap();
        }
    }

    #[test]
    fn stop_token_sleep_is_interruptible() {
        let driver = Driver::new(0).unwrap();
        let token = driver.stop_token();
        let waker = token.clone();

        let handle = driver.handle();
        let slept = handle.spawn(async move { token.sleep(Duration::from_secs(30)).await });
        std::thread::sleep(Duration::from_millis(20));
        waker.stop();

        let result = handle.block_on(slept).unwrap();
        assert!(!result);
    }
}
