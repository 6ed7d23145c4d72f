//! Backend seam for every chat operation.
//!
//! [`ChatApi`] is the one trait the client and the demo talk to; it is
//! implemented by [`http::HttpChatApi`] against the real REST backend and by
//! [`mock::MockChatApi`] entirely in memory. A configuration flag decides
//! which one gets wired in, nothing else changes.

pub mod http;
pub mod mock;

use crate::types::chat::{ChatMessage, Chatroom, Participant, RoomId, SessionId, UserId};
use crate::wire::ValidationError;
use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("chatroom not found: {0}")]
    RoomNotFound(RoomId),
    #[error("message {message_id} not found in chatroom {room_id}")]
    MessageNotFound { room_id: RoomId, message_id: String },
    #[error("participant {user_id} not found in chatroom {room_id}")]
    ParticipantNotFound { room_id: RoomId, user_id: UserId },
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("backend request failed with status {0}")]
    Status(u16),
    #[error("transport error: {0}")]
    Transport(anyhow::Error),
}

pub type Result<T> = std::result::Result<T, ApiError>;

#[async_trait]
pub trait ChatApi: Send + Sync {
    /// Ids of every chatroom visible to the session, most recently updated
    /// first.
    async fn list_room_ids(&self, session: &SessionId) -> Result<Vec<RoomId>>;

    /// Full state of one chatroom.
    async fn get_room(&self, room_id: &str) -> Result<Chatroom>;

    /// Create a chatroom for the given accounts and return its id.
    async fn create_room(&self, participant_ids: &[UserId]) -> Result<RoomId>;

    /// Append a message to a chatroom on behalf of `sender_id`.
    async fn send_message(&self, room_id: &str, sender_id: &str, body: &str)
    -> Result<ChatMessage>;

    /// Replace the body of an existing message, marking it edited.
    async fn update_message(
        &self,
        room_id: &str,
        message_id: &str,
        body: &str,
    ) -> Result<ChatMessage>;

    /// Remove a message from a chatroom.
    async fn delete_message(&self, room_id: &str, message_id: &str) -> Result<()>;

    /// Add an account to a chatroom's roster, replacing any entry with the
    /// same id.
    async fn add_participant(&self, room_id: &str, participant: Participant) -> Result<()>;

    /// Drop an account from a chatroom's roster.
    async fn remove_participant(&self, room_id: &str, user_id: &str) -> Result<()>;
}
