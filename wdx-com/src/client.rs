// Copyright 2024-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Auto-reconnecting client session for the parameter service backend.
//!
//! The session owns the shared message adapter and drives the connect cycle:
//! wait for the server socket to appear, connect, serve the receive loop, and
//! when the transport dies, close, back off and start over. User code keeps a
//! [`ProtectedAdapter`] across all of that; a restart never invalidates it.

use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use tokio::net::UnixStream;
use tokio::runtime::Handle;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::adapter::{MessageAdapter, MessageHandler, ProtectedAdapter};
use crate::driver::{Driver, StopToken};
use crate::error::TransportError;
use crate::notifier::{FileKind, FileNotifier};
use crate::sal::{self, ComSal};

/// Invoked on every transition into `Connected`: the initial connect and each
/// successful reconnect.
pub type ConnectNotifier = Arc<dyn Fn() + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    AwaitingSocket,
    Connecting,
    Connected,
    Reconnecting,
}

/// Backoff while rebuilding a failed socket notifier.
const SOCKET_WAIT_BACKOFF: Duration = Duration::from_millis(100);
/// Retry delay after a refused connect; the server was killed or died.
const CONNECT_REFUSED_BACKOFF: Duration = Duration::from_secs(1);
/// Grace period before reconnecting, so a dying server can clean up.
const SERVER_CLEANUP_BACKOFF: Duration = Duration::from_secs(1);

pub struct BackendClient {
    name: String,
    endpoint: PathBuf,
    handle: Handle,
    stop: StopToken,
    sal: Arc<dyn ComSal>,
    adapter: Arc<Mutex<MessageAdapter>>,
    state: Arc<StdMutex<SessionState>>,
    connected: Arc<AtomicBool>,
    terminal_error: Arc<StdMutex<Option<TransportError>>>,
    cycle: StdMutex<Option<JoinHandle<()>>>,
}

impl BackendClient {
    pub fn new(name: impl Into<String>, endpoint: impl Into<PathBuf>, driver: &Driver) -> Self {
        Self::with_parts(
            name,
            endpoint,
            driver.handle(),
            driver.stop_token(),
            sal::instance(),
        )
    }

    pub fn with_parts(
        name: impl Into<String>,
        endpoint: impl Into<PathBuf>,
        handle: Handle,
        stop: StopToken,
        sal: Arc<dyn ComSal>,
    ) -> Self {
        BackendClient {
            name: name.into(),
            endpoint: endpoint.into(),
            handle,
            stop,
            sal,
            adapter: Arc::new(Mutex::new(MessageAdapter::new(
                MessageAdapter::DEFAULT_MAX_FRAME_LENGTH,
            ))),
            state: Arc::new(StdMutex::new(SessionState::Disconnected)),
            connected: Arc::new(AtomicBool::new(false)),
            terminal_error: Arc::new(StdMutex::new(None)),
            cycle: StdMutex::new(None),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    #[allow(clippy::unwrap_used)]
    pub fn state(&self) -> SessionState {
        *self.state.lock().unwrap()
    }

    /// Terminal connect error, if the cycle gave up (anything other than a
    /// refused connect while the socket exists).
    #[allow(clippy::unwrap_used)]
    pub fn take_terminal_error(&self) -> Option<TransportError> {
        self.terminal_error.lock().unwrap().take()
    }

    /// Schedules the connect cycle and returns the shared adapter wrapper
    /// immediately. `on_connect` fires on every transition into `Connected`;
    /// `on_message` serves the receive loop for the lifetime of the session,
    /// across reconnects.
    pub fn do_connect(
        &self,
        on_connect: ConnectNotifier,
        on_message: MessageHandler,
    ) -> ProtectedAdapter {
        let ctx = CycleContext {
            name: self.name.clone(),
            endpoint: self.endpoint.clone(),
            sal: self.sal.clone(),
            adapter: self.adapter.clone(),
            state: self.state.clone(),
            connected: self.connected.clone(),
            terminal_error: self.terminal_error.clone(),
            stop: self.stop.clone(),
            on_connect,
            on_message,
        };
        let task = self.handle.spawn(connect_cycle(ctx));
        #[allow(clippy::unwrap_used)]
        {
            *self.cycle.lock().unwrap() = Some(task);
        }
        ProtectedAdapter::new(self.adapter.clone())
    }
}

struct CycleContext {
    name: String,
    endpoint: PathBuf,
    sal: Arc<dyn ComSal>,
    adapter: Arc<Mutex<MessageAdapter>>,
    state: Arc<StdMutex<SessionState>>,
    connected: Arc<AtomicBool>,
    terminal_error: Arc<StdMutex<Option<TransportError>>>,
    stop: StopToken,
    on_connect: ConnectNotifier,
    on_message: MessageHandler,
}

impl CycleContext {
    fn set_state(&self, state: SessionState) {
        #[allow(clippy::unwrap_used)]
        {
            *self.state.lock().unwrap() = state;
        }
    }
}

async fn connect_cycle(ctx: CycleContext) {
    loop {
        if ctx.stop.is_stopped() {
            break;
        }

        if !ctx.sal.is_socket_existing(&ctx.endpoint) && !wait_for_socket(&ctx).await {
            break;
        }

        ctx.set_state(SessionState::Connecting);
        match UnixStream::connect(&ctx.endpoint).await {
            Ok(stream) => {
                info!(connection = %ctx.name, "connection established");
                let mut disconnected = install_connection(&ctx, stream).await;
                ctx.connected.store(true, Ordering::Release);
                ctx.set_state(SessionState::Connected);
                (ctx.on_connect)();

                let receive_failed = tokio::select! {
                    _ = ctx.stop.cancelled() => false,
                    result = disconnected.changed() => result.is_ok(),
                };
                ctx.connected.store(false, Ordering::Release);

                ctx.set_state(SessionState::Reconnecting);
                {
                    let mut adapter = ctx.adapter.lock().await;
                    adapter.close().await;
                    adapter.reinit();
                }
                if !receive_failed && ctx.stop.is_stopped() {
                    break;
                }
                // Avoid a fast re-connect to a dying server.
                if !ctx.stop.sleep(SERVER_CLEANUP_BACKOFF).await {
                    break;
                }
            }
            Err(e) if e.kind() == io::ErrorKind::ConnectionRefused => {
                // Should only happen when the server was killed or died.
                info!(connection = %ctx.name, "connection refused: try again in 1 second");
                if !ctx.stop.sleep(CONNECT_REFUSED_BACKOFF).await {
                    break;
                }
            }
            Err(e) => {
                error!(connection = %ctx.name, error = %e, "failed to establish connection");
                #[allow(clippy::unwrap_used)]
                {
                    *ctx.terminal_error.lock().unwrap() = Some(TransportError::Io(e));
                }
                ctx.stop.stop();
                break;
            }
        }
    }
    ctx.set_state(SessionState::Disconnected);
}

/// Waits until the server socket exists, rebuilding the notifier after a
/// short backoff whenever it fails. Returns false when stopped.
async fn wait_for_socket(ctx: &CycleContext) -> bool {
    ctx.set_state(SessionState::AwaitingSocket);
    loop {
        if ctx.stop.is_stopped() {
            return false;
        }
        let notifier = match FileNotifier::with_sal(
            FileKind::Socket,
            ctx.endpoint.clone(),
            ctx.sal.clone(),
        ) {
            Ok(notifier) => notifier,
            Err(e) => {
                warn!(error = %e, "failed to build socket notifier, try again after short time");
                if !ctx.stop.sleep(SOCKET_WAIT_BACKOFF).await {
                    return false;
                }
                continue;
            }
        };
        info!(path = %ctx.endpoint.display(), "created notifier to wait for socket");

        tokio::select! {
            _ = ctx.stop.cancelled() => return false,
            result = notifier.wait() => match result {
                Ok(()) => return true,
                Err(e) => {
                    warn!(
                        error = %e,
                        path = %ctx.endpoint.display(),
                        "socket notifier failed, try again after short time"
                    );
                    if !ctx.stop.sleep(SOCKET_WAIT_BACKOFF).await {
                        return false;
                    }
                }
            },
        }
    }
}

/// Attaches the stream to the shared adapter and arms the receive loop. The
/// returned watch flips when the receive loop dies.
async fn install_connection(ctx: &CycleContext, stream: UnixStream) -> watch::Receiver<bool> {
    let (disconnect_tx, disconnect_rx) = watch::channel(false);
    let mut adapter = ctx.adapter.lock().await;
    adapter.attach(stream);
    let user_handler = ctx.on_message.clone();
    let handler: MessageHandler = Arc::new(move |result| {
        let failed = result.is_err();
        user_handler(result);
        if failed {
            let _ = disconnect_tx.send(true);
        }
    });
    adapter.receive(handler);
    disconnect_rx
}
