//! In-process transport over a pair of channels.

use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use async_trait::async_trait;
use bytes::Bytes;
use container_relay_core::{
    ClientFrame, CloseReason, ServerMessage, Transport, TransportError, TransportEvent,
    TransportEvents,
};
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

/// What the client side receives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    Message(ServerMessage),
    Closed(CloseReason),
}

/// Server side of an in-process connection.
pub struct ChannelTransport {
    tx: mpsc::UnboundedSender<Delivery>,
    connected: Arc<AtomicBool>,
    closed: AtomicBool,
}

/// Client side of an in-process connection.
///
/// Dropping it counts as a disconnect.
pub struct ClientEnd {
    frames: Option<mpsc::UnboundedSender<TransportEvent>>,
    inbox: mpsc::UnboundedReceiver<Delivery>,
    connected: Arc<AtomicBool>,
}

/// Create a connected transport, its inbound event stream and the client end.
#[must_use]
pub fn channel_pair() -> (ChannelTransport, TransportEvents, ClientEnd) {
    let (frames_tx, frames_rx) = mpsc::unbounded_channel();
    let (inbox_tx, inbox_rx) = mpsc::unbounded_channel();
    let connected = Arc::new(AtomicBool::new(true));

    let transport = ChannelTransport {
        tx: inbox_tx,
        connected: Arc::clone(&connected),
        closed: AtomicBool::new(false),
    };
    let client = ClientEnd {
        frames: Some(frames_tx),
        inbox: inbox_rx,
        connected,
    };

    (
        transport,
        UnboundedReceiverStream::new(frames_rx).boxed(),
        client,
    )
}

#[async_trait]
impl Transport for ChannelTransport {
    async fn send(&self, msg: ServerMessage) -> Result<(), TransportError> {
        if !self.is_connected() {
            return Err(TransportError::Disconnected);
        }
        self.tx
            .send(Delivery::Message(msg))
            .map_err(|_| TransportError::Disconnected)
    }

    async fn close(&self, reason: CloseReason) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let _ = self.tx.send(Delivery::Closed(reason));
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst) && !self.closed.load(Ordering::SeqCst)
    }
}

impl ClientEnd {
    fn push(&self, frame: ClientFrame) -> bool {
        self.frames
            .as_ref()
            .is_some_and(|tx| tx.send(TransportEvent::Frame(frame)).is_ok())
    }

    /// Send a text frame. Returns `false` once the server side is gone.
    pub fn send_text(&self, text: impl Into<String>) -> bool {
        self.push(ClientFrame::Text(text.into()))
    }

    /// Send a binary frame. Returns `false` once the server side is gone.
    pub fn send_binary(&self, data: impl Into<Bytes>) -> bool {
        self.push(ClientFrame::Binary(data.into()))
    }

    /// Receive the next delivery; `None` after the transport is dropped.
    pub async fn recv(&mut self) -> Option<Delivery> {
        self.inbox.recv().await
    }

    /// Leave without waiting for the session to close.
    pub fn disconnect(&mut self) {
        self.connected.store(false, Ordering::SeqCst);
        if let Some(tx) = self.frames.take() {
            let _ = tx.send(TransportEvent::Disconnected);
        }
    }
}

impl Drop for ClientEnd {
    fn drop(&mut self) {
        self.disconnect();
    }
}
