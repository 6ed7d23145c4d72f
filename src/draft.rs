//! Persistence for an interrupted message draft.
//!
//! When a session ends while the user has text in the composer, the draft is
//! written to disk and handed back the next time a session starts. At most
//! one draft is kept.

use crate::types::chat::RoomId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::io;
use std::path::PathBuf;
use thiserror::Error;
use tokio::fs;

#[derive(Debug, Error)]
pub enum DraftError {
    #[error("Serialization error: {0}")]
    Serialization(String),
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

pub type Result<T> = std::result::Result<T, DraftError>;

/// A composer draft that outlived its session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingDraft {
    pub room_id: RoomId,
    pub body: String,
    pub created_at: DateTime<Utc>,
}

pub struct DraftStore {
    path: PathBuf,
}

impl DraftStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub async fn load(&self) -> Result<Option<PendingDraft>> {
        match fs::read(&self.path).await {
            Ok(data) => serde_json::from_slice(&data)
                .map(Some)
                .map_err(|e| DraftError::Serialization(e.to_string())),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(DraftError::Io(e)),
        }
    }

    pub async fn save(&self, draft: &PendingDraft) -> Result<()> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).await?;
        }
        let data = serde_json::to_vec_pretty(draft)
            .map_err(|e| DraftError::Serialization(e.to_string()))?;
        fs::write(&self.path, data).await.map_err(DraftError::Io)
    }

    pub async fn clear(&self) -> Result<()> {
        fs::remove_file(&self.path)
            .await
            .or_else(|e| {
                if e.kind() == io::ErrorKind::NotFound {
                    Ok(())
                } else {
                    Err(e)
                }
            })
            .map_err(DraftError::from)
    }
}
