//! Chatroom and message state structures

use chrono::{DateTime, Utc};

/// Unique identifier of a chatroom.
pub type RoomId = String;
/// Unique identifier of a user account.
pub type UserId = String;
/// Opaque session token identifying the signed-in user.
pub type SessionId = String;

/// A user taking part in a chatroom
#[derive(Debug, Clone, PartialEq)]
pub struct Participant {
    /// Account identifier
    pub id: UserId,
    /// Display name shown in the room header and message list
    pub display_name: String,
    /// Login handle, if the account has one
    pub username: Option<String>,
    /// Profile picture URL, if the account set one
    pub avatar_url: Option<String>,
    /// Whether the user currently has an open session
    pub is_online: bool,
}

impl Participant {
    /// Create a participant whose display name is derived from the account id,
    /// the way the backend seeds accounts that never picked one.
    pub fn from_id(id: impl Into<UserId>) -> Self {
        let id = id.into();
        let display_name = id.split('@').next().unwrap_or(&id).to_string();

        Self {
            id,
            display_name,
            username: None,
            avatar_url: None,
            is_online: false,
        }
    }
}

/// A chat message
#[derive(Debug, Clone, PartialEq)]
pub struct ChatMessage {
    /// Unique message ID
    pub id: String,
    /// Chatroom this message belongs to
    pub room_id: RoomId,
    /// Account that sent the message
    pub sender_id: UserId,
    /// Message text content
    pub body: String,
    /// When the message was sent
    pub sent_at: DateTime<Utc>,
    /// Whether the body was edited after sending
    pub is_edited: bool,
}

/// A chatroom/conversation
#[derive(Debug, Clone, PartialEq)]
pub struct Chatroom {
    /// Unique identifier
    pub id: RoomId,
    /// Users taking part in the conversation
    pub participants: Vec<Participant>,
    /// Messages in this chatroom
    pub messages: Vec<ChatMessage>,
    /// Time of the last activity in the room
    pub updated_at: DateTime<Utc>,
    /// Number of messages the current user has not read yet
    pub unread_count: u32,
    /// Whether this is a group conversation
    pub is_group: bool,
}

impl Chatroom {
    /// Look up a participant by account id.
    pub fn participant(&self, user_id: &str) -> Option<&Participant> {
        self.participants.iter().find(|p| p.id == user_id)
    }

    /// Look up a message by id.
    pub fn message(&self, message_id: &str) -> Option<&ChatMessage> {
        self.messages.iter().find(|m| m.id == message_id)
    }

    /// Messages in display order: ascending by send time, with the message id
    /// as secondary sort key for stable ordering of equal timestamps.
    pub fn sorted_messages(&self) -> Vec<ChatMessage> {
        let mut messages = self.messages.clone();
        messages.sort_by(|a, b| a.sent_at.cmp(&b.sent_at).then_with(|| a.id.cmp(&b.id)));
        messages
    }

    /// The most recent message, for chat list previews.
    pub fn latest_message(&self) -> Option<&ChatMessage> {
        self.messages
            .iter()
            .max_by(|a, b| a.sent_at.cmp(&b.sent_at).then_with(|| a.id.cmp(&b.id)))
    }

    /// Title for chat list display: the other participants' display names,
    /// with a fallback to the room id for rooms whose roster is still empty.
    pub fn title(&self, viewer_id: &str) -> String {
        let names: Vec<&str> = self
            .participants
            .iter()
            .filter(|p| p.id != viewer_id)
            .map(|p| p.display_name.as_str())
            .collect();

        if names.is_empty() {
            self.id.clone()
        } else {
            names.join(", ")
        }
    }
}
