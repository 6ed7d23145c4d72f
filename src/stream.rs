//! Push stream transports for real-time chatroom updates.
//!
//! A [`ChatStreamFactory`] opens one subscription per call and hands back a
//! handle for tearing it down plus a channel of [`StreamEvent`]s. The
//! WebSocket implementation talks to the backend; the channel implementation
//! backs mock mode and tests, where pushes are injected by hand through a
//! [`StreamHandle`].

use crate::types::chat::{Chatroom, SessionId};
use crate::wire;
use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use log::{debug, error, info, trace, warn};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio::net::TcpStream;
use tokio::sync::{Mutex, mpsc};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

const EVENT_CHANNEL_CAPACITY: usize = 100;

/// An event produced by a push subscription.
#[derive(Debug, Clone)]
pub enum StreamEvent {
    /// The subscription is established.
    Connected,
    /// A JSON frame carrying changed rooms for the subscribed session.
    Rooms(Bytes),
    /// The subscription hit an error; the server side is no longer trusted.
    Error(String),
    /// The subscription ended.
    Disconnected,
}

/// An open push subscription.
#[async_trait]
pub trait ChatStream: Send + Sync {
    /// Closes the subscription.
    async fn disconnect(&self);
}

/// A factory responsible for opening push subscriptions.
#[async_trait]
pub trait ChatStreamFactory: Send + Sync {
    /// Opens a subscription for the session and returns it, along with the
    /// stream of events.
    async fn subscribe(
        &self,
        session: &SessionId,
    ) -> Result<(Arc<dyn ChatStream>, mpsc::Receiver<StreamEvent>)>;
}

type RawWs = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<RawWs, Message>;
type WsStream = SplitStream<RawWs>;

/// WebSocket-backed push subscription
pub struct WebSocketChatStream {
    ws_sink: Arc<Mutex<Option<WsSink>>>,
}

#[async_trait]
impl ChatStream for WebSocketChatStream {
    async fn disconnect(&self) {
        if let Some(mut sink) = self.ws_sink.lock().await.take() {
            let _ = sink.close().await;
        }
    }
}

/// Factory for WebSocket push subscriptions
pub struct WebSocketStreamFactory {
    url: String,
}

impl WebSocketStreamFactory {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

#[async_trait]
impl ChatStreamFactory for WebSocketStreamFactory {
    async fn subscribe(
        &self,
        session: &SessionId,
    ) -> Result<(Arc<dyn ChatStream>, mpsc::Receiver<StreamEvent>)> {
        let url = format!("{}?session={}", self.url, urlencoding::encode(session));
        info!(target: "Chat/Stream", "Dialing {}", self.url);

        let (ws, _response) = connect_async(&url)
            .await
            .map_err(|e| anyhow::anyhow!("WebSocket connect failed: {}", e))?;
        let (sink, stream) = ws.split();

        let (event_tx, event_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);

        let chat_stream = Arc::new(WebSocketChatStream {
            ws_sink: Arc::new(Mutex::new(Some(sink))),
        });

        tokio::task::spawn(read_pump(stream, event_tx.clone()));

        let _ = event_tx.send(StreamEvent::Connected).await;

        Ok((chat_stream, event_rx))
    }
}

async fn read_pump(mut stream: WsStream, event_tx: mpsc::Sender<StreamEvent>) {
    loop {
        match stream.next().await {
            Some(Ok(msg)) => {
                if msg.is_text() || msg.is_binary() {
                    let data = msg.into_data();
                    trace!(target: "Chat/Stream", "<-- push frame: {} bytes", data.len());
                    if event_tx.send(StreamEvent::Rooms(data)).await.is_err() {
                        warn!(target: "Chat/Stream", "Event receiver dropped, closing read pump");
                        return;
                    }
                } else if msg.is_close() {
                    trace!(target: "Chat/Stream", "Received close frame");
                    break;
                }
            }
            Some(Err(e)) => {
                error!(target: "Chat/Stream", "Error reading from websocket: {e}");
                let _ = event_tx.send(StreamEvent::Error(e.to_string())).await;
                break;
            }
            None => {
                trace!(target: "Chat/Stream", "Websocket stream ended");
                break;
            }
        }
    }

    let _ = event_tx.send(StreamEvent::Disconnected).await;
}

#[derive(Default)]
struct ChannelState {
    sender: Mutex<Option<mpsc::Sender<StreamEvent>>>,
    subscribes: AtomicUsize,
    failing: AtomicBool,
}

/// Control handle for a [`ChannelStreamFactory`]. Lets mock mode and tests
/// inject events into whichever subscription is currently open.
#[derive(Clone, Default)]
pub struct StreamHandle {
    state: Arc<ChannelState>,
}

impl StreamHandle {
    /// Deliver a rooms frame built from domain rooms. Returns false when no
    /// subscription is listening.
    pub async fn push_rooms(&self, rooms: &[Chatroom]) -> bool {
        match wire::encode_stream_payload(rooms) {
            Ok(payload) => self.push_raw(payload).await,
            Err(e) => {
                warn!(target: "Chat/Stream", "Failed to encode rooms frame: {e}");
                false
            }
        }
    }

    /// Deliver a raw frame exactly as given.
    pub async fn push_raw(&self, payload: Vec<u8>) -> bool {
        self.send(StreamEvent::Rooms(Bytes::from(payload))).await
    }

    /// Deliver a subscription error.
    pub async fn push_error(&self, message: &str) -> bool {
        self.send(StreamEvent::Error(message.to_string())).await
    }

    /// End the current subscription from the server side.
    pub async fn drop_subscription(&self) -> bool {
        let closed = self.send(StreamEvent::Disconnected).await;
        *self.state.sender.lock().await = None;
        closed
    }

    /// Number of subscribe attempts so far, failed ones included.
    pub fn subscribe_count(&self) -> usize {
        self.state.subscribes.load(Ordering::SeqCst)
    }

    /// While set, subscribe attempts are refused.
    pub fn set_failing(&self, failing: bool) {
        self.state.failing.store(failing, Ordering::SeqCst);
    }

    async fn send(&self, event: StreamEvent) -> bool {
        let guard = self.state.sender.lock().await;
        match guard.as_ref() {
            Some(sender) => sender.send(event).await.is_ok(),
            None => false,
        }
    }
}

/// In-memory push subscription handed out by [`ChannelStreamFactory`]
pub struct ChannelChatStream {
    state: Arc<ChannelState>,
    sender: mpsc::Sender<StreamEvent>,
}

#[async_trait]
impl ChatStream for ChannelChatStream {
    async fn disconnect(&self) {
        let mut guard = self.state.sender.lock().await;
        // Only clear the registration if it is still ours; a newer
        // subscription may have replaced it.
        if guard
            .as_ref()
            .is_some_and(|current| current.same_channel(&self.sender))
        {
            *guard = None;
        }
    }
}

/// Factory for in-memory push subscriptions, used in mock mode and tests
#[derive(Default)]
pub struct ChannelStreamFactory {
    state: Arc<ChannelState>,
}

impl ChannelStreamFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn handle(&self) -> StreamHandle {
        StreamHandle {
            state: self.state.clone(),
        }
    }
}

#[async_trait]
impl ChatStreamFactory for ChannelStreamFactory {
    async fn subscribe(
        &self,
        session: &SessionId,
    ) -> Result<(Arc<dyn ChatStream>, mpsc::Receiver<StreamEvent>)> {
        self.state.subscribes.fetch_add(1, Ordering::SeqCst);
        if self.state.failing.load(Ordering::SeqCst) {
            return Err(anyhow::anyhow!("subscription refused"));
        }
        debug!(target: "Chat/Stream", "Opening channel subscription for session {session}");

        let (event_tx, event_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        *self.state.sender.lock().await = Some(event_tx.clone());

        let stream = Arc::new(ChannelChatStream {
            state: self.state.clone(),
            sender: event_tx.clone(),
        });

        let _ = event_tx.send(StreamEvent::Connected).await;

        Ok((stream, event_rx))
    }
}
