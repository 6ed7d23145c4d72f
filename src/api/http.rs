//! [`ChatApi`] implementation against the REST backend.
//!
//! Endpoints live under `{base_url}/chatrooms`. Requests and responses are
//! the snake_case JSON payloads from [`crate::wire`]; decoding runs through
//! the same validation as the push stream, so a room is either fully valid
//! or the operation fails.

use super::{ApiError, ChatApi, Result};
use crate::net::{HttpClient, HttpRequest, HttpResponse};
use crate::types::chat::{ChatMessage, Chatroom, Participant, RoomId, SessionId, UserId};
use crate::wire::{self, ParticipantPayload, ValidationError};
use async_trait::async_trait;
use log::debug;
use serde::Serialize;
use std::sync::Arc;

#[derive(Serialize)]
struct CreateRoomBody<'a> {
    participant_ids: &'a [UserId],
}

#[derive(Serialize)]
struct SendMessageBody<'a> {
    sent_by: &'a str,
    body: &'a str,
}

#[derive(Serialize)]
struct UpdateMessageBody<'a> {
    body: &'a str,
}

pub struct HttpChatApi {
    http: Arc<dyn HttpClient>,
    base_url: String,
}

impl HttpChatApi {
    pub fn new(http: Arc<dyn HttpClient>, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self { http, base_url }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse> {
        debug!(target: "Chat/Api", "{} {}", request.method, request.url);
        self.http
            .execute(request)
            .await
            .map_err(ApiError::Transport)
    }

    fn encode<T: Serialize>(body: &T) -> Result<Vec<u8>> {
        let bytes = serde_json::to_vec(body).map_err(ValidationError::from)?;
        Ok(bytes)
    }
}

#[async_trait]
impl ChatApi for HttpChatApi {
    async fn list_room_ids(&self, session: &SessionId) -> Result<Vec<RoomId>> {
        let url = format!(
            "{}?session={}",
            self.url("/chatrooms"),
            urlencoding::encode(session)
        );
        let response = self.execute(HttpRequest::get(url)).await?;
        if !response.is_success() {
            return Err(ApiError::Status(response.status_code));
        }
        Ok(wire::decode_room_ids(&response.body)?)
    }

    async fn get_room(&self, room_id: &str) -> Result<Chatroom> {
        let url = self.url(&format!("/chatrooms/{}", urlencoding::encode(room_id)));
        let response = self.execute(HttpRequest::get(url)).await?;
        match response.status_code {
            404 => Err(ApiError::RoomNotFound(room_id.to_string())),
            _ if !response.is_success() => Err(ApiError::Status(response.status_code)),
            _ => Ok(wire::decode_room(&response.body)?),
        }
    }

    async fn create_room(&self, participant_ids: &[UserId]) -> Result<RoomId> {
        let body = Self::encode(&CreateRoomBody { participant_ids })?;
        let response = self
            .execute(HttpRequest::post(self.url("/chatrooms")).with_json(body))
            .await?;
        if !response.is_success() {
            return Err(ApiError::Status(response.status_code));
        }
        // Older backend versions return the bare id, newer ones the room
        // object; the wire union covers both.
        Ok(wire::decode_room_ref(&response.body)?)
    }

    async fn send_message(
        &self,
        room_id: &str,
        sender_id: &str,
        body: &str,
    ) -> Result<ChatMessage> {
        let url = self.url(&format!(
            "/chatrooms/{}/messages",
            urlencoding::encode(room_id)
        ));
        let payload = Self::encode(&SendMessageBody {
            sent_by: sender_id,
            body,
        })?;
        let response = self
            .execute(HttpRequest::post(url).with_json(payload))
            .await?;
        match response.status_code {
            404 => Err(ApiError::RoomNotFound(room_id.to_string())),
            _ if !response.is_success() => Err(ApiError::Status(response.status_code)),
            _ => Ok(wire::decode_message(&response.body)?),
        }
    }

    async fn update_message(
        &self,
        room_id: &str,
        message_id: &str,
        body: &str,
    ) -> Result<ChatMessage> {
        let url = self.url(&format!(
            "/chatrooms/{}/messages/{}",
            urlencoding::encode(room_id),
            urlencoding::encode(message_id)
        ));
        let payload = Self::encode(&UpdateMessageBody { body })?;
        let response = self
            .execute(HttpRequest::put(url).with_json(payload))
            .await?;
        match response.status_code {
            404 => Err(ApiError::MessageNotFound {
                room_id: room_id.to_string(),
                message_id: message_id.to_string(),
            }),
            _ if !response.is_success() => Err(ApiError::Status(response.status_code)),
            _ => Ok(wire::decode_message(&response.body)?),
        }
    }

    async fn delete_message(&self, room_id: &str, message_id: &str) -> Result<()> {
        let url = self.url(&format!(
            "/chatrooms/{}/messages/{}",
            urlencoding::encode(room_id),
            urlencoding::encode(message_id)
        ));
        let response = self.execute(HttpRequest::delete(url)).await?;
        match response.status_code {
            404 => Err(ApiError::MessageNotFound {
                room_id: room_id.to_string(),
                message_id: message_id.to_string(),
            }),
            _ if !response.is_success() => Err(ApiError::Status(response.status_code)),
            _ => Ok(()),
        }
    }

    async fn add_participant(&self, room_id: &str, participant: Participant) -> Result<()> {
        let url = self.url(&format!(
            "/chatrooms/{}/participants/{}",
            urlencoding::encode(room_id),
            urlencoding::encode(&participant.id)
        ));
        let payload = Self::encode(&ParticipantPayload::from(&participant))?;
        let response = self.execute(HttpRequest::put(url).with_json(payload)).await?;
        match response.status_code {
            404 => Err(ApiError::RoomNotFound(room_id.to_string())),
            _ if !response.is_success() => Err(ApiError::Status(response.status_code)),
            _ => Ok(()),
        }
    }

    async fn remove_participant(&self, room_id: &str, user_id: &str) -> Result<()> {
        let url = self.url(&format!(
            "/chatrooms/{}/participants/{}",
            urlencoding::encode(room_id),
            urlencoding::encode(user_id)
        ));
        let response = self.execute(HttpRequest::delete(url)).await?;
        match response.status_code {
            404 => Err(ApiError::ParticipantNotFound {
                room_id: room_id.to_string(),
                user_id: user_id.to_string(),
            }),
            _ if !response.is_success() => Err(ApiError::Status(response.status_code)),
            _ => Ok(()),
        }
    }
}
