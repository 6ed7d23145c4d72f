//! Wire payloads for the chat backend.
//!
//! The backend speaks snake_case JSON over both the REST endpoints and the
//! push stream. Payload structs here mirror that JSON exactly; conversion
//! into the domain types in [`crate::types::chat`] validates every field and
//! reports the first violation instead of letting half-decoded rooms into
//! the cache.

use crate::types::chat::{ChatMessage, Chatroom, Participant, RoomId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("malformed chat payload: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("field `{0}` must not be empty")]
    EmptyField(&'static str),
    #[error("field `{field}` holds an invalid timestamp `{value}`")]
    BadTimestamp { field: &'static str, value: String },
    #[error("duplicate participant `{0}` in chatroom")]
    DuplicateParticipant(String),
}

pub type Result<T> = std::result::Result<T, ValidationError>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParticipantPayload {
    pub id: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
    #[serde(default)]
    pub is_online: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessagePayload {
    pub id: String,
    pub room_id: String,
    pub sent_by: String,
    #[serde(default)]
    pub body: String,
    pub sent_at: String,
    #[serde(default)]
    pub is_edited: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoomPayload {
    pub id: String,
    #[serde(default)]
    pub participants: Vec<ParticipantPayload>,
    #[serde(default)]
    pub messages: Vec<MessagePayload>,
    pub updated_at: String,
    #[serde(default)]
    pub unread_count: u32,
    #[serde(default)]
    pub is_group: bool,
}

/// Reference to a chatroom as returned by room-creation endpoints. Depending
/// on backend version the response is either the bare id or an object
/// carrying one; both collapse to a [`RoomId`] here so nothing downstream
/// ever sees the union.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RoomRef {
    Id(String),
    Object { id: String },
}

impl RoomRef {
    pub fn into_room_id(self) -> Result<RoomId> {
        let id = match self {
            RoomRef::Id(id) => id,
            RoomRef::Object { id } => id,
        };
        required("id", &id)?;
        Ok(id)
    }
}

/// One frame of the push stream: the rooms that changed since the last frame.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StreamPayload {
    #[serde(default)]
    pub rooms: Vec<RoomPayload>,
}

fn required(field: &'static str, value: &str) -> Result<()> {
    if value.is_empty() {
        Err(ValidationError::EmptyField(field))
    } else {
        Ok(())
    }
}

fn parse_timestamp(field: &'static str, value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| ValidationError::BadTimestamp {
            field,
            value: value.to_string(),
        })
}

impl TryFrom<ParticipantPayload> for Participant {
    type Error = ValidationError;

    fn try_from(payload: ParticipantPayload) -> Result<Self> {
        required("id", &payload.id)?;

        // Accounts that never picked a display name fall back to the id prefix.
        let display_name = if payload.display_name.is_empty() {
            Participant::from_id(payload.id.clone()).display_name
        } else {
            payload.display_name
        };

        Ok(Participant {
            id: payload.id,
            display_name,
            username: payload.username,
            avatar_url: payload.avatar_url,
            is_online: payload.is_online,
        })
    }
}

impl TryFrom<MessagePayload> for ChatMessage {
    type Error = ValidationError;

    fn try_from(payload: MessagePayload) -> Result<Self> {
        required("id", &payload.id)?;
        required("room_id", &payload.room_id)?;
        required("sent_by", &payload.sent_by)?;
        let sent_at = parse_timestamp("sent_at", &payload.sent_at)?;

        Ok(ChatMessage {
            id: payload.id,
            room_id: payload.room_id,
            sender_id: payload.sent_by,
            body: payload.body,
            sent_at,
            is_edited: payload.is_edited,
        })
    }
}

impl TryFrom<RoomPayload> for Chatroom {
    type Error = ValidationError;

    fn try_from(payload: RoomPayload) -> Result<Self> {
        required("id", &payload.id)?;
        let updated_at = parse_timestamp("updated_at", &payload.updated_at)?;

        // Participant ids are unique within a room; a duplicate rejects the
        // whole payload.
        let mut seen = HashSet::new();
        let mut participants = Vec::with_capacity(payload.participants.len());
        for entry in payload.participants {
            let participant = Participant::try_from(entry)?;
            if !seen.insert(participant.id.clone()) {
                return Err(ValidationError::DuplicateParticipant(participant.id));
            }
            participants.push(participant);
        }
        let messages = payload
            .messages
            .into_iter()
            .map(ChatMessage::try_from)
            .collect::<Result<Vec<_>>>()?;

        Ok(Chatroom {
            id: payload.id,
            participants,
            messages,
            updated_at,
            unread_count: payload.unread_count,
            is_group: payload.is_group,
        })
    }
}

impl From<&Participant> for ParticipantPayload {
    fn from(participant: &Participant) -> Self {
        Self {
            id: participant.id.clone(),
            display_name: participant.display_name.clone(),
            username: participant.username.clone(),
            avatar_url: participant.avatar_url.clone(),
            is_online: participant.is_online,
        }
    }
}

impl From<&ChatMessage> for MessagePayload {
    fn from(message: &ChatMessage) -> Self {
        Self {
            id: message.id.clone(),
            room_id: message.room_id.clone(),
            sent_by: message.sender_id.clone(),
            body: message.body.clone(),
            sent_at: message.sent_at.to_rfc3339(),
            is_edited: message.is_edited,
        }
    }
}

impl From<&Chatroom> for RoomPayload {
    fn from(room: &Chatroom) -> Self {
        Self {
            id: room.id.clone(),
            participants: room.participants.iter().map(Into::into).collect(),
            messages: room.messages.iter().map(Into::into).collect(),
            updated_at: room.updated_at.to_rfc3339(),
            unread_count: room.unread_count,
            is_group: room.is_group,
        }
    }
}

pub fn decode_room(bytes: &[u8]) -> Result<Chatroom> {
    let payload: RoomPayload = serde_json::from_slice(bytes)?;
    payload.try_into()
}

pub fn decode_message(bytes: &[u8]) -> Result<ChatMessage> {
    let payload: MessagePayload = serde_json::from_slice(bytes)?;
    payload.try_into()
}

pub fn decode_room_ref(bytes: &[u8]) -> Result<RoomId> {
    let payload: RoomRef = serde_json::from_slice(bytes)?;
    payload.into_room_id()
}

pub fn decode_room_ids(bytes: &[u8]) -> Result<Vec<RoomId>> {
    let payload: Vec<RoomRef> = serde_json::from_slice(bytes)?;
    payload.into_iter().map(RoomRef::into_room_id).collect()
}

/// Decode one push frame into domain rooms. A single invalid room rejects
/// the whole frame so the cache never absorbs a partially valid delta.
pub fn decode_stream_payload(bytes: &[u8]) -> Result<Vec<Chatroom>> {
    let payload: StreamPayload = serde_json::from_slice(bytes)?;
    payload.rooms.into_iter().map(Chatroom::try_from).collect()
}

pub fn encode_stream_payload(rooms: &[Chatroom]) -> Result<Vec<u8>> {
    let payload = StreamPayload {
        rooms: rooms.iter().map(Into::into).collect(),
    };
    Ok(serde_json::to_vec(&payload)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn message_json() -> serde_json::Value {
        serde_json::json!({
            "id": "msg-1",
            "room_id": "room-1",
            "sent_by": "user-1",
            "body": "hello",
            "sent_at": "2025-03-01T10:15:00Z",
            "is_edited": false,
        })
    }

    fn room_json() -> serde_json::Value {
        serde_json::json!({
            "id": "room-1",
            "participants": [
                { "id": "user-1", "display_name": "Amelie", "is_online": true },
                { "id": "user-2", "display_name": "" },
            ],
            "messages": [message_json()],
            "updated_at": "2025-03-01T10:15:00Z",
            "unread_count": 2,
            "is_group": false,
        })
    }

    #[test]
    fn test_decode_room_maps_wire_fields() {
        let bytes = serde_json::to_vec(&room_json()).unwrap();
        let room = decode_room(&bytes).unwrap();

        assert_eq!(room.id, "room-1");
        assert_eq!(room.unread_count, 2);
        assert_eq!(room.messages.len(), 1);
        assert_eq!(room.messages[0].sender_id, "user-1");
        assert_eq!(
            room.messages[0].sent_at,
            Utc.with_ymd_and_hms(2025, 3, 1, 10, 15, 0).unwrap()
        );
    }

    #[test]
    fn test_decode_room_missing_collections_default_empty() {
        let bytes = serde_json::to_vec(&serde_json::json!({
            "id": "room-9",
            "updated_at": "2025-03-01T10:15:00Z",
        }))
        .unwrap();

        let room = decode_room(&bytes).unwrap();
        assert!(room.participants.is_empty());
        assert!(room.messages.is_empty());
        assert_eq!(room.unread_count, 0);
        assert!(!room.is_group);
    }

    #[test]
    fn test_missing_sender_field_names_the_field() {
        let mut json = message_json();
        json.as_object_mut().unwrap().remove("sent_by");
        let bytes = serde_json::to_vec(&json).unwrap();

        let err = decode_message(&bytes).unwrap_err();
        assert!(err.to_string().contains("sent_by"), "got: {err}");
    }

    #[test]
    fn test_empty_id_rejected() {
        let mut json = message_json();
        json["id"] = serde_json::json!("");
        let bytes = serde_json::to_vec(&json).unwrap();

        let err = decode_message(&bytes).unwrap_err();
        assert!(matches!(err, ValidationError::EmptyField("id")));
    }

    #[test]
    fn test_invalid_timestamp_rejected() {
        let mut json = message_json();
        json["sent_at"] = serde_json::json!("yesterday-ish");
        let bytes = serde_json::to_vec(&json).unwrap();

        let err = decode_message(&bytes).unwrap_err();
        assert!(matches!(
            err,
            ValidationError::BadTimestamp { field: "sent_at", .. }
        ));
    }

    #[test]
    fn test_empty_display_name_falls_back_to_id_prefix() {
        let bytes = serde_json::to_vec(&room_json()).unwrap();
        let room = decode_room(&bytes).unwrap();

        assert_eq!(room.participant("user-2").unwrap().display_name, "user-2");
    }

    #[test]
    fn test_duplicate_participant_id_rejected() {
        let mut json = room_json();
        json["participants"] = serde_json::json!([
            { "id": "user-1", "display_name": "Amelie" },
            { "id": "user-1", "display_name": "Amelie again" },
        ]);
        let bytes = serde_json::to_vec(&json).unwrap();

        let err = decode_room(&bytes).unwrap_err();
        assert!(matches!(err, ValidationError::DuplicateParticipant(id) if id == "user-1"));
    }

    #[test]
    fn test_room_ref_accepts_bare_id() {
        let id = decode_room_ref(br#""room-7""#).unwrap();
        assert_eq!(id, "room-7");
    }

    #[test]
    fn test_room_ref_accepts_object_shape() {
        let id = decode_room_ref(br#"{"id":"room-7","unread_count":3}"#).unwrap();
        assert_eq!(id, "room-7");
    }

    #[test]
    fn test_room_ref_empty_id_rejected() {
        let err = decode_room_ref(br#"{"id":""}"#).unwrap_err();
        assert!(matches!(err, ValidationError::EmptyField("id")));
    }

    #[test]
    fn test_decode_room_ids_mixed_shapes() {
        let ids = decode_room_ids(br#"["room-1",{"id":"room-2"}]"#).unwrap();
        assert_eq!(ids, vec!["room-1".to_string(), "room-2".to_string()]);
    }

    #[test]
    fn test_stream_payload_single_bad_room_rejects_frame() {
        let bytes = serde_json::to_vec(&serde_json::json!({
            "rooms": [
                room_json(),
                { "id": "", "updated_at": "2025-03-01T10:15:00Z" },
            ],
        }))
        .unwrap();

        assert!(decode_stream_payload(&bytes).is_err());
    }

    #[test]
    fn test_stream_payload_roundtrip() {
        let bytes = serde_json::to_vec(&room_json()).unwrap();
        let room = decode_room(&bytes).unwrap();

        let encoded = encode_stream_payload(std::slice::from_ref(&room)).unwrap();
        let decoded = decode_stream_payload(&encoded).unwrap();
        assert_eq!(decoded, vec![room]);
    }
}
