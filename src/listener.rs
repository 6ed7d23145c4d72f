//! Real-time listener driving push frames into the cache.
//!
//! One listener runs per active session. It owns the push subscription for
//! its lifetime: frames are decoded, reconciled into the cache and announced
//! on the event bus. Subscription failures schedule exactly one reconnect a
//! fixed delay ahead; a further failure while that retry is pending replaces
//! the armed timer instead of stacking a second one. Shutdown cancels any
//! pending retry, tears the subscription down and clears the session's
//! cache.

use crate::reconcile::Reconciler;
use crate::stream::{ChatStreamFactory, StreamEvent};
use crate::types::chat::SessionId;
use crate::types::events::{EventBus, ListenerStateChange, RoomsUpdate};
use bytes::Bytes;
use log::{debug, info, warn};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{Notify, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Duration, Instant, sleep_until};

/// Delay between a lost subscription and the reconnect attempt.
pub const RETRY_DELAY: Duration = Duration::from_millis(3000);

/// Lifecycle of the push subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerState {
    Disconnected,
    Connecting,
    Connected,
    RetryPending,
}

pub struct ChatListener {
    session: SessionId,
    factory: Arc<dyn ChatStreamFactory>,
    reconciler: Arc<Reconciler>,
    event_bus: Arc<EventBus>,
    state_tx: watch::Sender<ListenerState>,
    shutdown_notifier: Notify,
    is_running: AtomicBool,
}

impl ChatListener {
    pub fn new(
        session: SessionId,
        factory: Arc<dyn ChatStreamFactory>,
        reconciler: Arc<Reconciler>,
        event_bus: Arc<EventBus>,
    ) -> Arc<Self> {
        Arc::new(Self {
            session,
            factory,
            reconciler,
            event_bus,
            state_tx: watch::channel(ListenerState::Disconnected).0,
            shutdown_notifier: Notify::new(),
            is_running: AtomicBool::new(true),
        })
    }

    /// Watch the listener's lifecycle state.
    pub fn state(&self) -> watch::Receiver<ListenerState> {
        self.state_tx.subscribe()
    }

    pub fn spawn(self: &Arc<Self>) -> JoinHandle<()> {
        let listener = self.clone();
        tokio::spawn(async move { listener.run().await })
    }

    /// Signal the listener to stop. Callers keep the [`JoinHandle`] from
    /// [`spawn`](Self::spawn) to await completion.
    pub fn shutdown(&self) {
        self.is_running.store(false, Ordering::Relaxed);
        self.shutdown_notifier.notify_waiters();
    }

    async fn run(self: Arc<Self>) {
        info!(target: "Chat/Listener", "Listener started for session {}", self.session);

        'outer: while self.is_running.load(Ordering::Relaxed) {
            self.set_state(ListenerState::Connecting);

            let (stream, mut events) = match self.factory.subscribe(&self.session).await {
                Ok(pair) => pair,
                Err(e) => {
                    warn!(target: "Chat/Listener", "Subscribe failed: {e:#}");
                    if !self.wait_retry(None).await {
                        break 'outer;
                    }
                    continue 'outer;
                }
            };

            // Registered before the running re-check: notify_waiters only
            // reaches futures that already exist, so a shutdown landing
            // between the two must find this one armed.
            let notified = self.shutdown_notifier.notified();
            tokio::pin!(notified);

            if !self.is_running.load(Ordering::Relaxed) {
                stream.disconnect().await;
                break 'outer;
            }

            loop {
                tokio::select! {
                    biased;
                    _ = &mut notified => {
                        stream.disconnect().await;
                        break 'outer;
                    }
                    event = events.recv() => match event {
                        Some(StreamEvent::Connected) => {
                            self.set_state(ListenerState::Connected);
                        }
                        Some(StreamEvent::Rooms(payload)) => self.handle_frame(&payload),
                        Some(StreamEvent::Error(message)) => {
                            warn!(target: "Chat/Listener", "Stream error: {message}");
                            stream.disconnect().await;
                            if !self.wait_retry(Some(&mut events)).await {
                                break 'outer;
                            }
                            continue 'outer;
                        }
                        Some(StreamEvent::Disconnected) | None => {
                            debug!(target: "Chat/Listener", "Subscription ended");
                            stream.disconnect().await;
                            if !self.wait_retry(None).await {
                                break 'outer;
                            }
                            continue 'outer;
                        }
                    }
                }
            }
        }

        self.teardown();
        info!(target: "Chat/Listener", "Listener stopped for session {}", self.session);
    }

    /// Decode one push frame and fold it into the cache. Malformed or empty
    /// frames are logged and dropped; they never take the subscription down.
    fn handle_frame(&self, payload: &Bytes) {
        if payload.is_empty() {
            debug!(target: "Chat/Listener", "Ignoring empty push frame");
            return;
        }

        let rooms = match crate::wire::decode_stream_payload(payload) {
            Ok(rooms) => rooms,
            Err(e) => {
                warn!(target: "Chat/Listener", "Discarding malformed push frame: {e}");
                return;
            }
        };
        if rooms.is_empty() {
            debug!(target: "Chat/Listener", "Push frame carried no rooms");
            return;
        }

        match self.reconciler.apply(&self.session, rooms) {
            Some(snapshot) => {
                let _ = self.event_bus.rooms_updated.send(Arc::new(RoomsUpdate {
                    session: self.session.clone(),
                    rooms: snapshot,
                }));
            }
            None => {
                debug!(target: "Chat/Listener", "Reconciliation in flight, push frame dropped");
            }
        }
    }

    /// Wait out the retry window. While `events` is still open it keeps
    /// being drained so that a further error re-arms the deadline rather
    /// than queueing a second reconnect behind the first.
    ///
    /// Returns false when shutdown interrupted the wait.
    async fn wait_retry(&self, mut events: Option<&mut mpsc::Receiver<StreamEvent>>) -> bool {
        self.set_state(ListenerState::RetryPending);

        // Same ordering as the run loop: arm the waiter, then read the flag.
        let notified = self.shutdown_notifier.notified();
        tokio::pin!(notified);

        if !self.is_running.load(Ordering::Relaxed) {
            return false;
        }
        debug!(
            target: "Chat/Listener",
            "Reconnecting in {} ms", RETRY_DELAY.as_millis()
        );

        let mut deadline = Instant::now() + RETRY_DELAY;
        loop {
            tokio::select! {
                biased;
                _ = &mut notified => return false,
                _ = sleep_until(deadline) => return true,
                event = recv_or_never(&mut events) => match event {
                    Some(StreamEvent::Error(message)) => {
                        debug!(
                            target: "Chat/Listener",
                            "Stream error during retry window, rearming timer: {message}"
                        );
                        deadline = Instant::now() + RETRY_DELAY;
                    }
                    // Stale events from the dead subscription carry nothing
                    // actionable.
                    Some(_) => {}
                    None => events = None,
                }
            }
        }
    }

    fn teardown(&self) {
        self.reconciler.cache().clear(&self.session);
        self.set_state(ListenerState::Disconnected);
        let _ = self.event_bus.rooms_updated.send(Arc::new(RoomsUpdate {
            session: self.session.clone(),
            rooms: self.reconciler.cache().snapshot(&self.session),
        }));
    }

    fn set_state(&self, state: ListenerState) {
        if self.state_tx.send_replace(state) != state {
            debug!(target: "Chat/Listener", "State -> {state:?}");
            let _ = self
                .event_bus
                .listener_state
                .send(Arc::new(ListenerStateChange {
                    session: self.session.clone(),
                    state,
                }));
        }
    }
}

async fn recv_or_never(
    events: &mut Option<&mut mpsc::Receiver<StreamEvent>>,
) -> Option<StreamEvent> {
    match events {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}
