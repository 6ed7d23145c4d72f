//! Merging of chatroom snapshots into the local cache.
//!
//! Push frames and poll responses both arrive as lists of rooms that may
//! overlap what is already cached. The merge here is pure: callers hand in
//! the cached list and the incoming list and get back the next snapshot.
//! [`Reconciler`] wraps the merge with the single cache write and the
//! at-most-one-in-flight guard shared by the poll and push paths.

use crate::cache::ChatroomCache;
use crate::types::chat::{ChatMessage, Chatroom};
use chrono::{DateTime, Utc};
use log::debug;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Merge an incoming list of rooms into the cached list.
///
/// Rooms only present in the cache are carried over untouched. Rooms only
/// present in the incoming list are adopted as delivered. For rooms present
/// in both, scalar fields come from the incoming copy and the message lists
/// are merged with [`merge_messages`]. An incoming list naming the same
/// room more than once collapses into a single entry, each later copy
/// merged over the one before it. The result is ordered with
/// [`sort_rooms`].
pub fn merge_room_lists(cached: &[Chatroom], incoming: Vec<Chatroom>) -> Vec<Chatroom> {
    let mut remaining: HashMap<&str, &Chatroom> =
        cached.iter().map(|room| (room.id.as_str(), room)).collect();

    let mut merged: Vec<Chatroom> = Vec::with_capacity(cached.len() + incoming.len());
    for mut room in incoming {
        // The output must never carry one room id twice; a duplicate
        // entry would shadow its twin on the next merge.
        if let Some(at) = merged.iter().position(|r| r.id == room.id) {
            room.messages = merge_messages(room.messages, &merged[at].messages);
            merged[at] = room;
            continue;
        }
        if let Some(previous) = remaining.remove(room.id.as_str()) {
            room.messages = merge_messages(room.messages, &previous.messages);
        }
        merged.push(room);
    }

    // Rooms the incoming list did not mention survive as-is.
    merged.extend(remaining.into_values().cloned());

    sort_rooms(&mut merged);
    merged
}

/// Merge two message lists into one, deduplicated by message id. When both
/// lists carry the same id the incoming copy wins, so server-side edits
/// replace the cached body. The result is ascending by send time with the
/// id as tie-break.
pub fn merge_messages(incoming: Vec<ChatMessage>, cached: &[ChatMessage]) -> Vec<ChatMessage> {
    let mut seen = HashSet::with_capacity(incoming.len() + cached.len());
    let mut combined = Vec::with_capacity(incoming.len() + cached.len());

    for message in incoming.into_iter().chain(cached.iter().cloned()) {
        if seen.insert(message.id.clone()) {
            combined.push(message);
        }
    }

    combined.sort_by(|a, b| a.sent_at.cmp(&b.sent_at).then_with(|| a.id.cmp(&b.id)));
    combined
}

/// Order rooms the way the chat list renders them: most recently updated
/// first, with the room id as tie-break for equal timestamps.
pub fn sort_rooms(rooms: &mut [Chatroom]) {
    rooms.sort_by(|a, b| b.updated_at.cmp(&a.updated_at).then_with(|| a.id.cmp(&b.id)));
}

/// Fold a locally sent message into the cached snapshot before the next
/// sync confirms it. Resets the room's unread count, since sending implies
/// the user is looking at the conversation.
pub fn apply_sent_message(cached: &[Chatroom], message: &ChatMessage) -> Vec<Chatroom> {
    let mut rooms = cached.to_vec();
    if let Some(room) = rooms.iter_mut().find(|r| r.id == message.room_id) {
        if room.message(&message.id).is_none() {
            room.messages.push(message.clone());
            room.messages
                .sort_by(|a, b| a.sent_at.cmp(&b.sent_at).then_with(|| a.id.cmp(&b.id)));
        }
        room.unread_count = 0;
        room.updated_at = room.updated_at.max(message.sent_at);
        sort_rooms(&mut rooms);
    }
    rooms
}

/// Drop a deleted message from the cached snapshot. The merge keeps every
/// message it has ever seen, so deletions have to be applied directly
/// rather than waiting for a sync that can only add.
pub fn apply_deleted_message(
    cached: &[Chatroom],
    room_id: &str,
    message_id: &str,
    deleted_at: DateTime<Utc>,
) -> Vec<Chatroom> {
    let mut rooms = cached.to_vec();
    if let Some(room) = rooms.iter_mut().find(|r| r.id == room_id) {
        room.messages.retain(|m| m.id != message_id);
        room.updated_at = room.updated_at.max(deleted_at);
        sort_rooms(&mut rooms);
    }
    rooms
}

/// Applies merges to the cache, one at a time.
///
/// The poll and push paths share one `Reconciler`, so a push frame landing
/// while a poll is being folded in is dropped instead of interleaving. The
/// next frame carries cumulative state again, so nothing is lost.
pub struct Reconciler {
    cache: Arc<ChatroomCache>,
    in_flight: AtomicBool,
}

impl Reconciler {
    pub fn new(cache: Arc<ChatroomCache>) -> Self {
        Self {
            cache,
            in_flight: AtomicBool::new(false),
        }
    }

    pub fn cache(&self) -> &Arc<ChatroomCache> {
        &self.cache
    }

    /// Merge `incoming` into the session's cached rooms and return the new
    /// snapshot, or `None` when another reconciliation is still in flight.
    pub fn apply(&self, session: &str, incoming: Vec<Chatroom>) -> Option<Arc<[Chatroom]>> {
        if self.in_flight.swap(true, Ordering::SeqCst) {
            debug!(
                target: "Chat/Reconcile",
                "reconciliation already in flight for session {session}, dropping snapshot"
            );
            return None;
        }
        let _guard = scopeguard::guard((), |_| {
            self.in_flight.store(false, Ordering::SeqCst);
        });

        let snapshot = self
            .cache
            .update(session, |cached| merge_room_lists(cached, incoming));
        Some(snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    fn make_message(id: &str, room_id: &str, sent_at_secs: i64) -> ChatMessage {
        ChatMessage {
            id: id.to_string(),
            room_id: room_id.to_string(),
            sender_id: "user-1".to_string(),
            body: format!("Message {}", id),
            sent_at: ts(sent_at_secs),
            is_edited: false,
        }
    }

    fn make_room(id: &str, updated_secs: i64, messages: Vec<ChatMessage>) -> Chatroom {
        Chatroom {
            id: id.to_string(),
            participants: Vec::new(),
            messages,
            updated_at: ts(updated_secs),
            unread_count: 0,
            is_group: false,
        }
    }

    #[test]
    fn test_incoming_copy_wins_for_duplicate_message_ids() {
        let cached = vec![make_message("m1", "room-1", 1000)];
        let mut edited = make_message("m1", "room-1", 1000);
        edited.body = "edited".to_string();
        edited.is_edited = true;

        let merged = merge_messages(vec![edited], &cached);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].body, "edited");
        assert!(merged[0].is_edited);
    }

    #[test]
    fn test_merged_messages_sorted_ascending() {
        let cached = vec![make_message("m1", "room-1", 1000)];
        let incoming = vec![
            make_message("m3", "room-1", 3000),
            make_message("m2", "room-1", 2000),
        ];

        let merged = merge_messages(incoming, &cached);
        let ids: Vec<&str> = merged.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["m1", "m2", "m3"]);
    }

    #[test]
    fn test_merged_messages_each_id_exactly_once() {
        let cached = vec![
            make_message("m1", "room-1", 1000),
            make_message("m2", "room-1", 2000),
        ];
        let incoming = vec![
            make_message("m2", "room-1", 2000),
            make_message("m3", "room-1", 3000),
        ];

        let merged = merge_messages(incoming, &cached);
        let mut ids: Vec<&str> = merged.iter().map(|m| m.id.as_str()).collect();
        ids.dedup();
        assert_eq!(ids, vec!["m1", "m2", "m3"]);
    }

    #[test]
    fn test_equal_timestamps_ordered_by_id() {
        let incoming = vec![
            make_message("b", "room-1", 1000),
            make_message("a", "room-1", 1000),
        ];

        let merged = merge_messages(incoming, &[]);
        assert_eq!(merged[0].id, "a");
        assert_eq!(merged[1].id, "b");
    }

    #[test]
    fn test_overlapping_room_merges_messages_and_takes_incoming_scalars() {
        let cached = vec![make_room(
            "room-1",
            1000,
            vec![make_message("m1", "room-1", 1000)],
        )];
        let mut incoming_room = make_room(
            "room-1",
            2000,
            vec![
                make_message("m2", "room-1", 2000),
                make_message("m1", "room-1", 1000),
            ],
        );
        incoming_room.unread_count = 4;

        let merged = merge_room_lists(&cached, vec![incoming_room]);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].updated_at, ts(2000));
        assert_eq!(merged[0].unread_count, 4);

        let ids: Vec<&str> = merged[0].messages.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["m1", "m2"]);
    }

    #[test]
    fn test_rooms_absent_from_incoming_survive() {
        let cached = vec![
            make_room("room-1", 1000, vec![make_message("m1", "room-1", 1000)]),
            make_room("room-2", 2000, Vec::new()),
        ];
        let incoming = vec![make_room("room-2", 3000, Vec::new())];

        let merged = merge_room_lists(&cached, incoming);
        assert_eq!(merged.len(), 2);

        let survivor = merged.iter().find(|r| r.id == "room-1").unwrap();
        assert_eq!(survivor.messages.len(), 1);
        assert_eq!(survivor.updated_at, ts(1000));
    }

    #[test]
    fn test_new_rooms_adopted_with_message_order_as_delivered() {
        // Brand-new rooms are taken as-is; ordering is applied on display.
        let incoming = vec![make_room(
            "room-1",
            1000,
            vec![
                make_message("m2", "room-1", 2000),
                make_message("m1", "room-1", 1000),
            ],
        )];

        let merged = merge_room_lists(&[], incoming);
        assert_eq!(merged[0].messages[0].id, "m2");
        assert_eq!(merged[0].messages[1].id, "m1");
    }

    #[test]
    fn test_same_room_twice_in_one_list_folds_into_one_entry() {
        let cached = vec![make_room(
            "room-1",
            500,
            vec![make_message("m0", "room-1", 500)],
        )];
        let incoming = vec![
            make_room("room-1", 1000, vec![make_message("m1", "room-1", 1000)]),
            make_room("room-1", 2000, vec![make_message("m2", "room-1", 2000)]),
        ];

        let merged = merge_room_lists(&cached, incoming);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].updated_at, ts(2000));

        let ids: Vec<&str> = merged[0].messages.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["m0", "m1", "m2"]);
    }

    #[test]
    fn test_no_message_lost_after_a_list_with_repeated_room_ids() {
        let incoming = vec![
            make_room("room-1", 1000, vec![make_message("m1", "room-1", 1000)]),
            make_room("room-1", 2000, vec![make_message("m2", "room-1", 2000)]),
        ];
        let first = merge_room_lists(&[], incoming);

        let followup = vec![make_room(
            "room-1",
            3000,
            vec![make_message("m3", "room-1", 3000)],
        )];
        let second = merge_room_lists(&first, followup);

        assert_eq!(second.len(), 1);
        let ids: Vec<&str> = second[0].messages.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["m1", "m2", "m3"]);
    }

    #[test]
    fn test_rooms_sorted_most_recent_first() {
        let incoming = vec![
            make_room("room-1", 1000, Vec::new()),
            make_room("room-3", 3000, Vec::new()),
            make_room("room-2", 2000, Vec::new()),
        ];

        let merged = merge_room_lists(&[], incoming);
        let ids: Vec<&str> = merged.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["room-3", "room-2", "room-1"]);
    }

    #[test]
    fn test_rooms_with_equal_updated_at_ordered_by_id() {
        let incoming = vec![
            make_room("room-b", 1000, Vec::new()),
            make_room("room-a", 1000, Vec::new()),
        ];

        let merged = merge_room_lists(&[], incoming);
        assert_eq!(merged[0].id, "room-a");
        assert_eq!(merged[1].id, "room-b");
    }

    #[test]
    fn test_merge_is_idempotent() {
        let cached = vec![make_room(
            "room-1",
            1000,
            vec![make_message("m1", "room-1", 1000)],
        )];
        let incoming = vec![make_room(
            "room-1",
            2000,
            vec![make_message("m2", "room-1", 2000)],
        )];

        let once = merge_room_lists(&cached, incoming.clone());
        let twice = merge_room_lists(&once, incoming);
        assert_eq!(once, twice);
    }

    #[test]
    fn test_apply_sent_message_appends_and_moves_room_front() {
        let cached = vec![
            make_room("room-2", 2000, Vec::new()),
            make_room("room-1", 1000, {
                let mut room = vec![make_message("m1", "room-1", 1000)];
                room[0].sender_id = "other".to_string();
                room
            }),
        ];
        let sent = make_message("m2", "room-1", 3000);

        let rooms = apply_sent_message(&cached, &sent);
        assert_eq!(rooms[0].id, "room-1");
        assert_eq!(rooms[0].messages.last().unwrap().id, "m2");
        assert_eq!(rooms[0].unread_count, 0);
        assert_eq!(rooms[0].updated_at, ts(3000));
    }

    #[test]
    fn test_apply_sent_message_does_not_duplicate() {
        let sent = make_message("m1", "room-1", 1000);
        let cached = vec![make_room("room-1", 1000, vec![sent.clone()])];

        let rooms = apply_sent_message(&cached, &sent);
        assert_eq!(rooms[0].messages.len(), 1);
    }

    #[test]
    fn test_apply_sent_message_unknown_room_leaves_cache_alone() {
        let cached = vec![make_room("room-1", 1000, Vec::new())];
        let sent = make_message("m1", "room-9", 2000);

        let rooms = apply_sent_message(&cached, &sent);
        assert_eq!(rooms, cached);
    }

    #[test]
    fn test_apply_deleted_message_removes_it() {
        let cached = vec![make_room(
            "room-1",
            1000,
            vec![
                make_message("m1", "room-1", 1000),
                make_message("m2", "room-1", 2000),
            ],
        )];

        let rooms = apply_deleted_message(&cached, "room-1", "m1", ts(3000));
        assert_eq!(rooms[0].messages.len(), 1);
        assert_eq!(rooms[0].messages[0].id, "m2");
        assert_eq!(rooms[0].updated_at, ts(3000));
    }

    #[test]
    fn test_reconciler_applies_and_returns_snapshot() {
        let reconciler = Reconciler::new(Arc::new(ChatroomCache::new()));
        let snapshot = reconciler
            .apply("session-1", vec![make_room("room-1", 1000, Vec::new())])
            .unwrap();

        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].id, "room-1");
    }

    #[test]
    fn test_apply_dropped_while_another_is_in_flight() {
        let reconciler = Reconciler::new(Arc::new(ChatroomCache::new()));
        reconciler.in_flight.store(true, Ordering::SeqCst);

        let dropped = reconciler.apply("session-1", vec![make_room("room-1", 1000, Vec::new())]);
        assert!(dropped.is_none());
        assert!(reconciler.cache().snapshot("session-1").is_empty());
    }

    #[test]
    fn test_in_flight_flag_released_after_apply() {
        let reconciler = Reconciler::new(Arc::new(ChatroomCache::new()));

        assert!(
            reconciler
                .apply("session-1", vec![make_room("room-1", 1000, Vec::new())])
                .is_some()
        );
        assert!(
            reconciler
                .apply("session-1", vec![make_room("room-2", 2000, Vec::new())])
                .is_some()
        );
        assert_eq!(reconciler.cache().snapshot("session-1").len(), 2);
    }
}
