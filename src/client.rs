//! Client facade tying the backend, cache and listener together.
//!
//! One [`ChatClient`] serves one signed-in user. Starting a session spawns
//! the real-time listener and polls the backend for the first snapshot;
//! every chat operation afterwards goes through the [`ChatApi`] seam and
//! folds its result back into the session cache, so the snapshot handed to
//! the UI is always ahead of or equal to what the server confirmed.

use crate::api::http::HttpChatApi;
use crate::api::mock::MockChatApi;
use crate::api::{ApiError, ChatApi};
use crate::cache::ChatroomCache;
use crate::config::ChatConfig;
use crate::draft::{DraftError, DraftStore, PendingDraft};
use crate::listener::ChatListener;
use crate::net::UreqHttpClient;
use crate::reconcile::{self, Reconciler};
use crate::stream::{ChannelStreamFactory, ChatStreamFactory, StreamHandle, WebSocketStreamFactory};
use crate::types::chat::{ChatMessage, Chatroom, Participant, RoomId, SessionId, UserId};
use crate::types::events::{EventBus, RoomsUpdate};
use chrono::Utc;
use log::{debug, info, warn};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("No active chat session")]
    NoActiveSession,
    #[error("A chat session is already active")]
    SessionAlreadyActive,
    #[error(transparent)]
    Api(#[from] ApiError),
    #[error(transparent)]
    Draft(#[from] DraftError),
}

pub type Result<T> = std::result::Result<T, ClientError>;

struct ActiveSession {
    id: SessionId,
    listener: Arc<ChatListener>,
    join: JoinHandle<()>,
}

pub struct ChatClient {
    config: ChatConfig,
    api: Arc<dyn ChatApi>,
    stream_factory: Arc<dyn ChatStreamFactory>,
    cache: Arc<ChatroomCache>,
    reconciler: Arc<Reconciler>,
    event_bus: Arc<EventBus>,
    drafts: DraftStore,
    session: Mutex<Option<ActiveSession>>,
}

impl ChatClient {
    pub fn new(
        config: ChatConfig,
        api: Arc<dyn ChatApi>,
        stream_factory: Arc<dyn ChatStreamFactory>,
    ) -> Self {
        let cache = Arc::new(ChatroomCache::new());
        let drafts = DraftStore::new(config.draft_path.clone());
        Self {
            reconciler: Arc::new(Reconciler::new(cache.clone())),
            cache,
            event_bus: Arc::new(EventBus::new()),
            drafts,
            session: Mutex::new(None),
            api,
            stream_factory,
            config,
        }
    }

    /// Wire up a client from configuration. In mock mode the returned
    /// [`StreamHandle`] injects push frames into the in-memory stream; in
    /// network mode there is nothing to inject into and it is `None`.
    pub fn from_config(config: ChatConfig) -> (Self, Option<StreamHandle>) {
        if config.use_mock_api {
            info!(target: "Chat/Client", "Serving chat from the in-memory mock backend");
            let api = Arc::new(MockChatApi::new(config.current_user_id.clone()));
            let factory = ChannelStreamFactory::new();
            let handle = factory.handle();
            (Self::new(config, api, Arc::new(factory)), Some(handle))
        } else {
            let http = Arc::new(UreqHttpClient::new());
            let api = Arc::new(HttpChatApi::new(http, config.api_base_url.clone()));
            let factory = Arc::new(WebSocketStreamFactory::new(config.stream_url.clone()));
            (Self::new(config, api, factory), None)
        }
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.event_bus
    }

    pub fn api(&self) -> Arc<dyn ChatApi> {
        self.api.clone()
    }

    pub fn current_user_id(&self) -> &str {
        &self.config.current_user_id
    }

    /// Begin a session: spawn the push listener and poll the backend for
    /// the first snapshot. A failed first poll is not fatal, the stream
    /// converges the cache once it delivers.
    pub async fn start_session(&self, session: impl Into<SessionId>) -> Result<()> {
        let session = session.into();
        {
            let mut guard = self.session.lock().await;
            if guard.is_some() {
                return Err(ClientError::SessionAlreadyActive);
            }
            let listener = ChatListener::new(
                session.clone(),
                self.stream_factory.clone(),
                self.reconciler.clone(),
                self.event_bus.clone(),
            );
            let join = listener.spawn();
            *guard = Some(ActiveSession {
                id: session.clone(),
                listener,
                join,
            });
        }
        info!(target: "Chat/Client", "Session {session} started");

        if let Err(e) = self.refresh().await {
            warn!(
                target: "Chat/Client",
                "Initial poll failed, waiting for the stream to catch up: {e}"
            );
        }
        Ok(())
    }

    /// End the session. The listener tears the subscription down, cancels
    /// any pending reconnect and clears the session's cache before this
    /// returns.
    pub async fn end_session(&self) -> Result<()> {
        let active = self
            .session
            .lock()
            .await
            .take()
            .ok_or(ClientError::NoActiveSession)?;
        info!(target: "Chat/Client", "Ending session {}", active.id);

        active.listener.shutdown();
        if let Err(e) = active.join.await {
            warn!(target: "Chat/Client", "Listener task ended abnormally: {e}");
        }
        Ok(())
    }

    /// Current render snapshot. Empty when no session is active.
    pub async fn rooms(&self) -> Arc<[Chatroom]> {
        match self.session.lock().await.as_ref() {
            Some(active) => self.cache.snapshot(&active.id),
            None => Arc::from(Vec::new()),
        }
    }

    /// Poll the backend for every visible room and reconcile the result
    /// into the cache. Returns false when the snapshot was dropped because
    /// another reconciliation was already in flight.
    pub async fn refresh(&self) -> Result<bool> {
        let session = self.require_session().await?;

        let ids = self.api.list_room_ids(&session).await?;
        let mut rooms = Vec::with_capacity(ids.len());
        for id in &ids {
            rooms.push(self.api.get_room(id).await?);
        }

        match self.reconciler.apply(&session, rooms) {
            Some(snapshot) => {
                self.publish_rooms(&session, snapshot);
                Ok(true)
            }
            None => {
                debug!(target: "Chat/Client", "Poll dropped, reconciliation already in flight");
                Ok(false)
            }
        }
    }

    /// Send a message as the current user and fold it into the cache right
    /// away, without waiting for the next sync.
    pub async fn send_message(&self, room_id: &str, body: &str) -> Result<ChatMessage> {
        let session = self.require_session().await?;
        let message = self
            .api
            .send_message(room_id, &self.config.current_user_id, body)
            .await?;

        let snapshot = self
            .cache
            .update(&session, |cached| {
                reconcile::apply_sent_message(cached, &message)
            });
        self.publish_rooms(&session, snapshot);
        let _ = self.event_bus.message_sent.send(Arc::new(message.clone()));
        Ok(message)
    }

    pub async fn update_message(
        &self,
        room_id: &str,
        message_id: &str,
        body: &str,
    ) -> Result<ChatMessage> {
        let session = self.require_session().await?;
        let message = self.api.update_message(room_id, message_id, body).await?;
        self.fold_in_room(&session, room_id).await;
        Ok(message)
    }

    pub async fn delete_message(&self, room_id: &str, message_id: &str) -> Result<()> {
        let session = self.require_session().await?;
        self.api.delete_message(room_id, message_id).await?;

        // The merge only ever adds messages, so removals are applied to the
        // cache directly instead of waiting for a sync that cannot carry
        // an absence.
        let snapshot = self.cache.update(&session, |cached| {
            reconcile::apply_deleted_message(cached, room_id, message_id, Utc::now())
        });
        self.publish_rooms(&session, snapshot);
        Ok(())
    }

    pub async fn create_room(&self, participant_ids: &[UserId]) -> Result<RoomId> {
        let session = self.require_session().await?;
        let room_id = self.api.create_room(participant_ids).await?;
        self.fold_in_room(&session, &room_id).await;
        Ok(room_id)
    }

    pub async fn add_participant(&self, room_id: &str, participant: Participant) -> Result<()> {
        let session = self.require_session().await?;
        self.api.add_participant(room_id, participant).await?;
        self.fold_in_room(&session, room_id).await;
        Ok(())
    }

    pub async fn remove_participant(&self, room_id: &str, user_id: &str) -> Result<()> {
        let session = self.require_session().await?;
        self.api.remove_participant(room_id, user_id).await?;
        self.fold_in_room(&session, room_id).await;
        Ok(())
    }

    /// Persist the composer text so it survives the session ending.
    pub async fn stash_draft(&self, room_id: &str, body: &str) -> Result<()> {
        let draft = PendingDraft {
            room_id: room_id.to_string(),
            body: body.to_string(),
            created_at: Utc::now(),
        };
        self.drafts.save(&draft).await?;
        debug!(target: "Chat/Client", "Draft stashed for room {room_id}");
        Ok(())
    }

    /// Hand back the stashed draft, if any, clearing it in the process.
    pub async fn take_draft(&self) -> Result<Option<PendingDraft>> {
        let draft = self.drafts.load().await?;
        if draft.is_some() {
            self.drafts.clear().await?;
        }
        Ok(draft)
    }

    async fn require_session(&self) -> Result<SessionId> {
        self.session
            .lock()
            .await
            .as_ref()
            .map(|s| s.id.clone())
            .ok_or(ClientError::NoActiveSession)
    }

    /// Re-fetch one room after a mutation and reconcile it in. The mutation
    /// itself already succeeded, so failures here only cost freshness and
    /// are logged rather than surfaced.
    async fn fold_in_room(&self, session: &SessionId, room_id: &str) {
        match self.api.get_room(room_id).await {
            Ok(room) => {
                if let Some(snapshot) = self.reconciler.apply(session, vec![room]) {
                    self.publish_rooms(session, snapshot);
                }
            }
            Err(e) => {
                warn!(
                    target: "Chat/Client",
                    "Failed to refresh chatroom {room_id} after mutation: {e}"
                );
            }
        }
    }

    fn publish_rooms(&self, session: &SessionId, rooms: Arc<[Chatroom]>) {
        let _ = self.event_bus.rooms_updated.send(Arc::new(RoomsUpdate {
            session: session.clone(),
            rooms,
        }));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_client() -> (ChatClient, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let config = ChatConfig {
            use_mock_api: true,
            current_user_id: "me".to_string(),
            draft_path: dir.path().join("draft.json"),
            ..Default::default()
        };
        (ChatClient::from_config(config).0, dir)
    }

    #[tokio::test]
    async fn test_operations_require_active_session() {
        let (client, _dir) = make_client();

        assert!(matches!(
            client.send_message("room-1", "hi").await,
            Err(ClientError::NoActiveSession)
        ));
        assert!(matches!(
            client.refresh().await,
            Err(ClientError::NoActiveSession)
        ));
        assert!(client.rooms().await.is_empty());
    }

    #[tokio::test]
    async fn test_second_session_rejected_while_one_is_active() {
        let (client, _dir) = make_client();

        client.start_session("session-1").await.unwrap();
        assert!(matches!(
            client.start_session("session-2").await,
            Err(ClientError::SessionAlreadyActive)
        ));

        client.end_session().await.unwrap();
        assert!(matches!(
            client.end_session().await,
            Err(ClientError::NoActiveSession)
        ));
    }
}
