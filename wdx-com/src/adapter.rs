// Copyright 2024-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Framed message transport over an AF_UNIX stream socket.
//!
//! Messages travel as a fixed 4-byte little-endian length header followed by
//! an opaque payload. The adapter owns the socket; the client session and any
//! number of [`ProtectedAdapter`] holders share it behind one protection
//! mutex, so restarts never invalidate outstanding wrappers.

use std::sync::Arc;

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use tokio::io::AsyncWriteExt;
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::UnixStream;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::codec::{FramedRead, FramedWrite, LengthDelimitedCodec};
use tracing::debug;

use crate::error::TransportError;

/// Callback invoked for every fully assembled inbound message, or once with
/// an error when the read loop dies.
pub type MessageHandler = Arc<dyn Fn(Result<Bytes, TransportError>) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdapterState {
    Fresh,
    Connected,
    Closing,
    Reusable,
}

pub struct MessageAdapter {
    max_frame_length: usize,
    state: AdapterState,
    writer: Option<FramedWrite<OwnedWriteHalf, LengthDelimitedCodec>>,
    reader: Option<FramedRead<OwnedReadHalf, LengthDelimitedCodec>>,
    receive_task: Option<JoinHandle<()>>,
}

impl MessageAdapter {
    pub const DEFAULT_MAX_FRAME_LENGTH: usize = 16 * 1024 * 1024;

    pub fn new(max_frame_length: usize) -> Self {
        MessageAdapter {
            max_frame_length,
            state: AdapterState::Fresh,
            writer: None,
            reader: None,
            receive_task: None,
        }
    }

    pub fn state(&self) -> AdapterState {
        self.state
    }

    fn codec(&self) -> LengthDelimitedCodec {
        LengthDelimitedCodec::builder()
            .length_field_length(4)
            .little_endian()
            .max_frame_length(self.max_frame_length)
            .new_codec()
    }

    /// Takes ownership of a connected stream. The read half feeds the receive
    /// loop, the write half serves outbound messages.
    pub fn attach(&mut self, stream: UnixStream) {
        let (read_half, write_half) = stream.into_split();
        self.reader = Some(FramedRead::new(read_half, self.codec()));
        self.writer = Some(FramedWrite::new(write_half, self.codec()));
        self.state = AdapterState::Connected;
    }

    /// Sends one length-prefixed message.
    pub async fn send(&mut self, message: Bytes) -> Result<(), TransportError> {
        let writer = self.writer.as_mut().ok_or(TransportError::NotConnected)?;
        writer.send(message).await.map_err(TransportError::Io)
    }

    /// Starts the asynchronous read loop. For each complete frame the handler
    /// gets `Ok(payload)`; the loop ends with a single `Err` callback when
    /// the transport fails or the peer closes the connection. Frames larger
    /// than the configured maximum surface as an error, never as a partial
    /// message.
    pub fn receive(&mut self, on_message: MessageHandler) {
        let Some(mut reader) = self.reader.take() else {
            on_message(Err(TransportError::NotConnected));
            return;
        };
        self.receive_task = Some(tokio::spawn(async move {
            loop {
                match reader.next().await {
                    Some(Ok(frame)) => on_message(Ok(frame.freeze())),
                    Some(Err(e)) => {
                        on_message(Err(TransportError::Io(e)));
                        break;
                    }
                    None => {
                        on_message(Err(TransportError::Closed));
                        break;
                    }
                }
            }
        }));
    }

    /// Releases the socket resources. Completion of the returned future is
    /// the "closed" notification.
    pub async fn close(&mut self) {
        self.state = AdapterState::Closing;
        if let Some(task) = self.receive_task.take() {
            task.abort();
            let _ = task.await;
        }
        if let Some(mut writer) = self.writer.take() {
            let _ = writer.get_mut().shutdown().await;
        }
        self.reader = None;
        self.state = AdapterState::Reusable;
        debug!("adapter closed");
    }

    /// Prepares the adapter for a fresh connect after a close.
    pub fn reinit(&mut self) {
        self.writer = None;
        self.reader = None;
        self.receive_task = None;
        self.state = AdapterState::Fresh;
    }
}

/// Shared handle on the adapter, carrying the protection mutex. All
/// concurrent users go through this wrapper; operations on it serialize with
/// the client session's own state machine.
#[derive(Clone)]
pub struct ProtectedAdapter {
    inner: Arc<Mutex<MessageAdapter>>,
}

impl ProtectedAdapter {
    pub(crate) fn new(inner: Arc<Mutex<MessageAdapter>>) -> Self {
        ProtectedAdapter { inner }
    }

    pub async fn send(&self, message: Bytes) -> Result<(), TransportError> {
        self.inner.lock().await.send(message).await
    }

    pub async fn state(&self) -> AdapterState {
        self.inner.lock().await.state()
    }

    /// Locks the adapter for a compound operation.
    pub async fn lock(&self) -> tokio::sync::MutexGuard<'_, MessageAdapter> {
        self.inner.lock().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;
    use tokio::io::AsyncReadExt;
    use tokio::time::timeout;

    fn connected_pair() -> (UnixStream, UnixStream) {
        UnixStream::pair().unwrap()
    }

    fn collecting_handler() -> (MessageHandler, Arc<StdMutex<Vec<Result<Bytes, String>>>>) {
        let seen: Arc<StdMutex<Vec<Result<Bytes, String>>>> = Arc::new(StdMutex::new(Vec::new()));
        let sink = seen.clone();
        let handler: MessageHandler = Arc::new(move |result| {
            sink.lock()
                .unwrap()
                .push(result.map_err(|e| e.to_string()));
        });
        (handler, seen)
    }

    #[tokio::test]
    async fn send_writes_little_endian_length_prefix() {
        let (local, remote) = connected_pair();
        let mut adapter = MessageAdapter::new(MessageAdapter::DEFAULT_MAX_FRAME_LENGTH);
        adapter.attach(local);

        adapter.send(Bytes::from_static(b"hello")).await.unwrap();

        let mut wire = vec![0u8; 9];
        let mut remote = remote;
        remote.read_exact(&mut wire).await.unwrap();
        assert_eq!(&wire[..4], &5u32.to_le_bytes());
        assert_eq!(&wire[4..], b"hello");
    }

    #[tokio::test]
    async fn receive_reassembles_frames_in_order() {
        let (local, remote) = connected_pair();
        let mut adapter = MessageAdapter::new(MessageAdapter::DEFAULT_MAX_FRAME_LENGTH);
        adapter.attach(local);

        let (handler, seen) = collecting_handler();
        adapter.receive(handler);

        let mut sender = MessageAdapter::new(MessageAdapter::DEFAULT_MAX_FRAME_LENGTH);
        sender.attach(remote);
        sender.send(Bytes::from_static(b"first")).await.unwrap();
        sender.send(Bytes::from_static(b"second")).await.unwrap();

        timeout(Duration::from_secs(5), async {
            while seen.lock().unwrap().len() < 2 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        let seen = seen.lock().unwrap();
        assert_eq!(seen[0].as_ref().unwrap().as_ref(), b"first");
        assert_eq!(seen[1].as_ref().unwrap().as_ref(), b"second");
    }

    #[tokio::test]
    async fn peer_close_surfaces_exactly_one_error() {
        let (local, remote) = connected_pair();
        let mut adapter = MessageAdapter::new(MessageAdapter::DEFAULT_MAX_FRAME_LENGTH);
        adapter.attach(local);

        let (handler, seen) = collecting_handler();
        adapter.receive(handler);
        drop(remote);

        timeout(Duration::from_secs(5), async {
            while seen.lock().unwrap().is_empty() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert!(seen[0].is_err());
    }

    #[tokio::test]
    async fn oversized_frame_is_rejected() {
        let (local, remote) = connected_pair();
        // Tight bound so the inbound frame exceeds it.
        let mut adapter = MessageAdapter::new(8);
        adapter.attach(local);

        let (handler, seen) = collecting_handler();
        adapter.receive(handler);

        let mut sender = MessageAdapter::new(MessageAdapter::DEFAULT_MAX_FRAME_LENGTH);
        sender.attach(remote);
        sender
            .send(Bytes::from_static(b"way too large for the bound"))
            .await
            .unwrap();

        timeout(Duration::from_secs(5), async {
            while seen.lock().unwrap().is_empty() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        assert!(seen.lock().unwrap()[0].is_err());
    }

    #[tokio::test]
    async fn close_and_reinit_allow_a_fresh_attach() {
        let (local, _remote) = connected_pair();
        let mut adapter = MessageAdapter::new(MessageAdapter::DEFAULT_MAX_FRAME_LENGTH);
        assert_eq!(adapter.state(), AdapterState::Fresh);

        adapter.attach(local);
        assert_eq!(adapter.state(), AdapterState::Connected);

        adapter.close().await;
        assert_eq!(adapter.state(), AdapterState::Reusable);

        adapter.reinit();
        assert_eq!(adapter.state(), AdapterState::Fresh);

        let (local2, _remote2) = connected_pair();
        adapter.attach(local2);
        assert_eq!(adapter.state(), AdapterState::Connected);
    }

    #[tokio::test]
    async fn send_without_attach_is_an_error() {
        let mut adapter = MessageAdapter::new(MessageAdapter::DEFAULT_MAX_FRAME_LENGTH);
        let result = adapter.send(Bytes::from_static(b"nope")).await;
        assert!(matches!(result, Err(TransportError::NotConnected)));
    }
}
