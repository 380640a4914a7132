// Copyright 2024-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Main loop of a parameter service client daemon.

use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::signal::unix::{signal, SignalKind};
use tracing::{error, info, warn};

use wdx_com::adapter::MessageHandler;
use wdx_com::client::ConnectNotifier;
use wdx_com::endpoint::socket_path_or_default;
use wdx_com::{BackendClient, Driver, StopToken};

use crate::args::{Arguments, TracerKind};
use crate::client::{
    Client, InitArgs, InitError, CLIENT_SETUP_FAILS_EXIT_STATUS, GENERAL_ERROR_EXIT_STATUS,
    INIT_FAILS_EXIT_STATUS, SUCCESS_EXIT_STATUS,
};
use crate::{log, privileges, trace};

const INIT_RETRY_DELAY: Duration = Duration::from_millis(100);
const MAX_INIT_RETRY_DELAY: Duration = Duration::from_secs(10);

/// Runs a client daemon to completion and returns its exit status.
///
/// `argv` is the full command line including the program name.
pub fn run_client(client: Box<dyn Client>, argv: &[String]) -> i32 {
    let name = client.name();
    let additional_options = client.additional_options();
    let arguments = match Arguments::from_args(&name, argv, &additional_options) {
        Ok(arguments) => arguments,
        Err(e) => {
            eprintln!("Failed to setup client: {e}");
            return CLIENT_SETUP_FAILS_EXIT_STATUS;
        }
    };

    log::init_logging(arguments.log_channel(), arguments.log_level());

    if arguments.has_parse_error() {
        let message = format!(
            "Failed to parse commandline arguments: {}",
            arguments.parse_error()
        );
        error!("{message}");
        eprintln!("{message}");
        return GENERAL_ERROR_EXIT_STATUS;
    }
    if arguments.help_requested() {
        println!("{}", arguments.help());
        return SUCCESS_EXIT_STATUS;
    }

    match setup_tracer(arguments.tracer()) {
        Ok(()) => trace::activate_routes(arguments.trace_routes()),
        Err(e) => {
            error!(error = %e, "failed to set up tracer");
            return GENERAL_ERROR_EXIT_STATUS;
        }
    }

    if !arguments.user().is_empty() && arguments.user() != "root" {
        if let Err(e) = privileges::drop_privileges(arguments.user(), arguments.group()) {
            error!(error = %e, "failed to drop privileges");
            return GENERAL_ERROR_EXIT_STATUS;
        }
    }

    let driver = match Driver::new(usize::from(arguments.worker_count())) {
        Ok(driver) => Arc::new(driver),
        Err(e) => {
            error!(error = %e, "failed to set up reactor");
            return INIT_FAILS_EXIT_STATUS;
        }
    };
    install_signal_handlers(&driver);

    let endpoint = socket_path_or_default(arguments.backend_socket());
    let session = BackendClient::new(name.clone(), endpoint, &driver);
    let exit_status = Arc::new(AtomicI32::new(SUCCESS_EXIT_STATUS));
    let client = Arc::new(Mutex::new(client));

    // The connect notification fires on the initial connect and after every
    // reconnect; initialization is retried until the server accepts it.
    let reconnect_client = client.clone();
    let stop = driver.stop_token();
    let handle = driver.handle();
    let adapter_slot: Arc<Mutex<Option<wdx_com::ProtectedAdapter>>> =
        Arc::new(Mutex::new(None));
    let init_slot = adapter_slot.clone();
    let init_exit = exit_status.clone();
    let on_connect: ConnectNotifier = Arc::new(move || {
        let client = reconnect_client.clone();
        let stop = stop.clone();
        let slot = init_slot.clone();
        let exit = init_exit.clone();
        handle.spawn(async move {
            // The notification can beat the return of do_connect; wait for
            // the adapter wrapper to be published.
            let adapter = loop {
                #[allow(clippy::unwrap_used)]
                let published = slot.lock().unwrap().clone();
                if let Some(adapter) = published {
                    break adapter;
                }
                if !stop.sleep(Duration::from_millis(10)).await {
                    return;
                }
            };
            initialize_client(client, adapter, stop, exit).await;
        });
    });
    let on_message: MessageHandler = Arc::new(|result| {
        if let Err(e) = result {
            warn!(error = %e, "backend message delivery failed");
        }
    });

    let adapter = session.do_connect(on_connect, on_message);
    #[allow(clippy::unwrap_used)]
    {
        *adapter_slot.lock().unwrap() = Some(adapter);
    }

    // Additional worker threads drive the reactor next to the main thread.
    let mut workers = Vec::new();
    for i in 0..arguments.worker_count() {
        let worker_driver = driver.clone();
        let builder = std::thread::Builder::new().name(format!("worker_{i}"));
        match builder.spawn(move || while worker_driver.run() {}) {
            Ok(worker) => workers.push(worker),
            Err(e) => warn!(error = %e, "failed to spawn worker thread"),
        }
    }

    while driver.run() {}

    for worker in workers {
        let _ = worker.join();
    }

    if let Some(e) = session.take_terminal_error() {
        error!(error = %e, "backend connection failed permanently");
        exit_status
            .compare_exchange(
                SUCCESS_EXIT_STATUS,
                INIT_FAILS_EXIT_STATUS,
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .ok();
    }

    info!(client = %name, "client daemon shut down");
    exit_status.load(Ordering::SeqCst)
}

fn setup_tracer(kind: TracerKind) -> std::io::Result<()> {
    match kind {
        TracerKind::None => trace::set_tracer(None),
        TracerKind::Stdout => trace::set_tracer(Some(Arc::new(trace::StreamTracer::stdout()))),
        TracerKind::Stderr => trace::set_tracer(Some(Arc::new(trace::StreamTracer::stderr()))),
        TracerKind::Ktrace => trace::set_tracer(Some(Arc::new(trace::KernelTracer::new()?))),
        TracerKind::KtracePassive => {
            trace::set_tracer(Some(Arc::new(trace::KernelTracer::passive()?)))
        }
    }
    Ok(())
}

/// SIGINT/SIGTERM request shutdown and wake the driver; nothing else runs in
/// signal context.
fn install_signal_handlers(driver: &Arc<Driver>) {
    let stop = driver.stop_token();
    driver.handle().spawn(async move {
        let mut interrupt = match signal(SignalKind::interrupt()) {
            Ok(signal) => signal,
            Err(e) => {
                warn!(error = %e, "failed to install SIGINT handler");
                return;
            }
        };
        let mut terminate = match signal(SignalKind::terminate()) {
            Ok(signal) => signal,
            Err(e) => {
                warn!(error = %e, "failed to install SIGTERM handler");
                return;
            }
        };
        tokio::select! {
            _ = interrupt.recv() => {}
            _ = terminate.recv() => {}
        }
        info!("shutdown requested by signal");
        stop.stop();
    });
}

/// Runs the client's initialization, retrying with growing backoff while the
/// backend is temporarily unavailable. A fatal error stops the daemon with
/// the init-failure exit status.
async fn initialize_client(
    client: Arc<Mutex<Box<dyn Client>>>,
    adapter: wdx_com::ProtectedAdapter,
    stop: StopToken,
    exit_status: Arc<AtomicI32>,
) {
    let mut retry_delay = INIT_RETRY_DELAY;
    loop {
        if stop.is_stopped() {
            return;
        }
        trace::start_channel(crate::args::TRACE_ROUTE_LIFETIME_MGMT);
        trace::set_marker(crate::args::TRACE_ROUTE_LIFETIME_MGMT, "client: do initialization");
        let result = {
            #[allow(clippy::unwrap_used)]
            let mut client = client.lock().unwrap();
            client.init(InitArgs {
                backend: adapter.clone(),
                stop: stop.clone(),
            })
        };
        match result {
            Ok(()) => {
                trace::set_marker(
                    crate::args::TRACE_ROUTE_LIFETIME_MGMT,
                    "client: initialization done",
                );
                trace::stop_channel(crate::args::TRACE_ROUTE_LIFETIME_MGMT);
                info!("parameter service client initialized");
                return;
            }
            Err(InitError::Transient(reason)) => {
                // The server is expected to come back; keep trying with an
                // incrementing delay.
                trace::set_marker(
                    crate::args::TRACE_ROUTE_LIFETIME_MGMT,
                    "client: initialization failed",
                );
                info!(reason = %reason, "backend not ready for initialization, retrying");
                if !stop.sleep(retry_delay).await {
                    return;
                }
                retry_delay = (retry_delay * 2).min(MAX_INIT_RETRY_DELAY);
            }
            Err(InitError::Fatal(reason)) => {
                trace::set_marker(
                    crate::args::TRACE_ROUTE_LIFETIME_MGMT,
                    "client: initialization failed permanently",
                );
                trace::stop_channel(crate::args::TRACE_ROUTE_LIFETIME_MGMT);
                error!(reason = %reason, "failed to initialize client");
                exit_status.store(INIT_FAILS_EXIT_STATUS, Ordering::SeqCst);
                stop.stop();
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::args::ClientOption;
    use std::sync::atomic::AtomicUsize;

    fn argv(args: &[&str]) -> Vec<String> {
        std::iter::once("testclient")
            .chain(args.iter().copied())
            .map(str::to_string)
            .collect()
    }

    struct TestClient {
        inits: Arc<AtomicUsize>,
        result: fn(&InitArgs) -> Result<(), InitError>,
        options: Vec<ClientOption>,
    }

    impl TestClient {
        fn boxed(result: fn(&InitArgs) -> Result<(), InitError>) -> (Box<Self>, Arc<AtomicUsize>) {
            let inits = Arc::new(AtomicUsize::new(0));
            (
                Box::new(TestClient {
                    inits: inits.clone(),
                    result,
                    options: Vec::new(),
                }),
                inits,
            )
        }
    }

    impl Client for TestClient {
        fn name(&self) -> String {
            "Test Client".to_string()
        }

        fn additional_options(&self) -> Vec<ClientOption> {
            self.options.clone()
        }

        fn init(&mut self, args: InitArgs) -> Result<(), InitError> {
            self.inits.fetch_add(1, Ordering::SeqCst);
            (self.result)(&args)
        }
    }

    #[test]
    fn help_request_exits_successfully() {
        let (client, _) = TestClient::boxed(|_| Ok(()));
        assert_eq!(run_client(client, &argv(&["--help"])), 0);
    }

    #[test]
    fn parse_errors_exit_with_the_general_error_status() {
        let (client, _) = TestClient::boxed(|_| Ok(()));
        assert_eq!(
            run_client(client, &argv(&["--log-level", "chatty"])),
            GENERAL_ERROR_EXIT_STATUS
        );
    }

    #[test]
    fn bad_additional_options_exit_with_the_setup_status() {
        let (mut client, _) = TestClient::boxed(|_| Ok(()));
        client.options = vec![ClientOption {
            short: 'x',
            long: "lowercase".to_string(),
            help: "Invalid.".to_string(),
        }];
        assert_eq!(
            run_client(client, &argv(&[])),
            CLIENT_SETUP_FAILS_EXIT_STATUS
        );
    }

    #[test]
    fn successful_init_can_request_shutdown() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("paramd.sock");
        let _listener = std::os::unix::net::UnixListener::bind(&path).unwrap();

        let (client, inits) = TestClient::boxed(|args| {
            // The daemon under test stops itself once initialized.
            args.stop.stop();
            Ok(())
        });
        let status = run_client(
            client,
            &argv(&["--backend-socket", path.to_str().unwrap()]),
        );
        assert_eq!(status, SUCCESS_EXIT_STATUS);
        assert_eq!(inits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn fatal_init_exits_with_the_init_failure_status() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("paramd.sock");
        let _listener = std::os::unix::net::UnixListener::bind(&path).unwrap();

        let (client, inits) = TestClient::boxed(|_| {
            Err(InitError::Fatal("provider registration refused".to_string()))
        });
        let status = run_client(
            client,
            &argv(&["--backend-socket", path.to_str().unwrap()]),
        );
        assert_eq!(status, INIT_FAILS_EXIT_STATUS);
        assert_eq!(inits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn transient_init_failures_are_retried() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("paramd.sock");
        let _listener = std::os::unix::net::UnixListener::bind(&path).unwrap();

        static ATTEMPTS: AtomicUsize = AtomicUsize::new(0);
        let (client, inits) = TestClient::boxed(|args| {
            if ATTEMPTS.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(InitError::Transient("server still starting".to_string()))
            } else {
                args.stop.stop();
                Ok(())
            }
        });
        let status = run_client(
            client,
            &argv(&["--backend-socket", path.to_str().unwrap()]),
        );
        assert_eq!(status, SUCCESS_EXIT_STATUS);
        assert_eq!(inits.load(Ordering::SeqCst), 3);
    }
}
