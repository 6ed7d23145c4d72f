//! In-memory [`ChatApi`] backend for offline development and tests.
//!
//! Behaves like the real backend as far as the client can tell: mutations
//! bump the owning room's `updated_at` and keep the room list ordered, the
//! unread counter follows who sent the message, and every returned room is
//! a fresh clone so callers can never reach into the stored state.

use super::{ApiError, ChatApi, Result};
use crate::reconcile::sort_rooms;
use crate::types::chat::{ChatMessage, Chatroom, Participant, RoomId, SessionId, UserId};
use async_trait::async_trait;
use chrono::Utc;
use rand::RngCore;
use tokio::sync::RwLock;

fn fresh_id(prefix: &str) -> String {
    let mut raw = [0u8; 8];
    rand::rng().fill_bytes(&mut raw);
    format!("{}-{}", prefix, hex::encode(raw))
}

fn find_room_mut<'a>(rooms: &'a mut [Chatroom], room_id: &str) -> Result<&'a mut Chatroom> {
    rooms
        .iter_mut()
        .find(|r| r.id == room_id)
        .ok_or_else(|| ApiError::RoomNotFound(room_id.to_string()))
}

/// Mock backend serving a single signed-in account.
pub struct MockChatApi {
    current_user_id: UserId,
    rooms: RwLock<Vec<Chatroom>>,
}

impl MockChatApi {
    pub fn new(current_user_id: impl Into<UserId>) -> Self {
        Self {
            current_user_id: current_user_id.into(),
            rooms: RwLock::new(Vec::new()),
        }
    }

    /// Insert a prebuilt room, keeping the list ordered. Fixture helper for
    /// tests and demo setups that need specific timestamps.
    pub async fn seed_room(&self, room: Chatroom) {
        let mut rooms = self.rooms.write().await;
        rooms.retain(|r| r.id != room.id);
        rooms.push(room);
        sort_rooms(&mut rooms);
    }
}

#[async_trait]
impl ChatApi for MockChatApi {
    // The mock serves exactly one account, so the session token is not
    // interpreted.
    async fn list_room_ids(&self, _session: &SessionId) -> Result<Vec<RoomId>> {
        let rooms = self.rooms.read().await;
        Ok(rooms.iter().map(|r| r.id.clone()).collect())
    }

    async fn get_room(&self, room_id: &str) -> Result<Chatroom> {
        let rooms = self.rooms.read().await;
        rooms
            .iter()
            .find(|r| r.id == room_id)
            .cloned()
            .ok_or_else(|| ApiError::RoomNotFound(room_id.to_string()))
    }

    async fn create_room(&self, participant_ids: &[UserId]) -> Result<RoomId> {
        let room = Chatroom {
            id: fresh_id("room"),
            participants: participant_ids
                .iter()
                .map(|id| Participant::from_id(id.clone()))
                .collect(),
            messages: Vec::new(),
            updated_at: Utc::now(),
            unread_count: 0,
            is_group: participant_ids.len() > 2,
        };
        let id = room.id.clone();

        let mut rooms = self.rooms.write().await;
        rooms.push(room);
        sort_rooms(&mut rooms);
        Ok(id)
    }

    async fn send_message(
        &self,
        room_id: &str,
        sender_id: &str,
        body: &str,
    ) -> Result<ChatMessage> {
        let mut rooms = self.rooms.write().await;
        let room = find_room_mut(&mut rooms, room_id)?;

        let message = ChatMessage {
            id: fresh_id("msg"),
            room_id: room_id.to_string(),
            sender_id: sender_id.to_string(),
            body: body.to_string(),
            sent_at: Utc::now(),
            is_edited: false,
        };
        room.messages.push(message.clone());
        room.updated_at = message.sent_at;
        // Your own messages are read by definition; anyone else's add to
        // the counter.
        if sender_id == self.current_user_id {
            room.unread_count = 0;
        } else {
            room.unread_count += 1;
        }

        sort_rooms(&mut rooms);
        Ok(message)
    }

    async fn update_message(
        &self,
        room_id: &str,
        message_id: &str,
        body: &str,
    ) -> Result<ChatMessage> {
        let mut rooms = self.rooms.write().await;
        let room = find_room_mut(&mut rooms, room_id)?;

        let message = room
            .messages
            .iter_mut()
            .find(|m| m.id == message_id)
            .ok_or_else(|| ApiError::MessageNotFound {
                room_id: room_id.to_string(),
                message_id: message_id.to_string(),
            })?;
        message.body = body.to_string();
        message.is_edited = true;
        let updated = message.clone();
        room.updated_at = Utc::now();

        sort_rooms(&mut rooms);
        Ok(updated)
    }

    async fn delete_message(&self, room_id: &str, message_id: &str) -> Result<()> {
        let mut rooms = self.rooms.write().await;
        let room = find_room_mut(&mut rooms, room_id)?;

        let before = room.messages.len();
        room.messages.retain(|m| m.id != message_id);
        if room.messages.len() == before {
            return Err(ApiError::MessageNotFound {
                room_id: room_id.to_string(),
                message_id: message_id.to_string(),
            });
        }
        room.updated_at = Utc::now();

        sort_rooms(&mut rooms);
        Ok(())
    }

    async fn add_participant(&self, room_id: &str, participant: Participant) -> Result<()> {
        let mut rooms = self.rooms.write().await;
        let room = find_room_mut(&mut rooms, room_id)?;

        // Upsert keeps participant ids unique within the room.
        if let Some(existing) = room.participants.iter_mut().find(|p| p.id == participant.id) {
            *existing = participant;
        } else {
            room.participants.push(participant);
        }
        room.updated_at = Utc::now();

        sort_rooms(&mut rooms);
        Ok(())
    }

    async fn remove_participant(&self, room_id: &str, user_id: &str) -> Result<()> {
        let mut rooms = self.rooms.write().await;
        let room = find_room_mut(&mut rooms, room_id)?;

        let before = room.participants.len();
        room.participants.retain(|p| p.id != user_id);
        if room.participants.len() == before {
            return Err(ApiError::ParticipantNotFound {
                room_id: room_id.to_string(),
                user_id: user_id.to_string(),
            });
        }
        room.updated_at = Utc::now();

        sort_rooms(&mut rooms);
        Ok(())
    }
}
