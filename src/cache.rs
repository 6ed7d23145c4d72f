//! Session-keyed chatroom cache.
//!
//! The cache is the single source the UI renders from. Each session maps to
//! one immutable snapshot (`Arc<[Chatroom]>`); writers build a new snapshot
//! and swap it in, so readers never observe a half-applied merge and can
//! keep rendering an old snapshot for free.

use crate::types::chat::Chatroom;
use dashmap::DashMap;
use std::sync::Arc;

#[derive(Debug, Default)]
pub struct ChatroomCache {
    rooms: DashMap<String, Arc<[Chatroom]>>,
}

impl ChatroomCache {
    pub fn new() -> Self {
        Self {
            rooms: DashMap::new(),
        }
    }

    /// Current snapshot for a session. Unknown sessions read as empty.
    pub fn snapshot(&self, session: &str) -> Arc<[Chatroom]> {
        self.rooms
            .get(session)
            .map(|entry| entry.value().clone())
            .unwrap_or_else(|| Arc::from(Vec::new()))
    }

    /// Replace the session's snapshot with whatever `f` builds from the
    /// current one. The entry stays locked while `f` runs, so concurrent
    /// updates to the same session serialize instead of clobbering each
    /// other.
    pub fn update<F>(&self, session: &str, f: F) -> Arc<[Chatroom]>
    where
        F: FnOnce(&[Chatroom]) -> Vec<Chatroom>,
    {
        let mut entry = self
            .rooms
            .entry(session.to_string())
            .or_insert_with(|| Arc::from(Vec::new()));
        let next: Arc<[Chatroom]> = Arc::from(f(entry.value()));
        *entry.value_mut() = next.clone();
        next
    }

    /// Forget everything cached for a session.
    pub fn clear(&self, session: &str) {
        self.rooms.remove(session);
    }
}
