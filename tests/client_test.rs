use chrono::{TimeZone, Utc};
use std::sync::Arc;
use std::time::Duration;
use unimarket_chat::api::mock::MockChatApi;
use unimarket_chat::stream::{ChannelStreamFactory, StreamHandle};
use unimarket_chat::types::chat::{ChatMessage, Chatroom, Participant};
use unimarket_chat::{ChatClient, ChatConfig};

const SESSION: &str = "session-1";

struct Harness {
    client: ChatClient,
    api: Arc<MockChatApi>,
    handle: StreamHandle,
    _dir: tempfile::TempDir,
}

fn make_harness() -> Harness {
    let _ = env_logger::builder().is_test(true).try_init();

    let dir = tempfile::tempdir().unwrap();
    let config = ChatConfig {
        use_mock_api: true,
        current_user_id: "me".to_string(),
        draft_path: dir.path().join("draft.json"),
        ..Default::default()
    };

    let api = Arc::new(MockChatApi::new(config.current_user_id.clone()));
    let factory = ChannelStreamFactory::new();
    let handle = factory.handle();
    let client = ChatClient::new(config, api.clone(), Arc::new(factory));

    Harness {
        client,
        api,
        handle,
        _dir: dir,
    }
}

fn make_room(id: &str, minute: u32) -> Chatroom {
    let at = Utc.with_ymd_and_hms(2025, 6, 1, 12, minute, 0).unwrap();
    Chatroom {
        id: id.to_string(),
        participants: vec![Participant::from_id("me"), Participant::from_id("peer-1")],
        messages: vec![ChatMessage {
            id: format!("{id}-m1"),
            room_id: id.to_string(),
            sender_id: "peer-1".to_string(),
            body: "opening offer".to_string(),
            sent_at: at,
            is_edited: false,
        }],
        updated_at: at,
        unread_count: 0,
        is_group: false,
    }
}

async fn settle() {
    tokio::time::sleep(Duration::from_millis(10)).await;
}

#[tokio::test(start_paused = true)]
async fn test_start_session_pulls_the_first_snapshot() {
    let harness = make_harness();
    harness.api.seed_room(make_room("room-old", 0)).await;
    harness.api.seed_room(make_room("room-new", 30)).await;

    harness.client.start_session(SESSION).await.unwrap();

    let rooms = harness.client.rooms().await;
    assert_eq!(rooms.len(), 2);
    assert_eq!(rooms[0].id, "room-new");
    assert_eq!(rooms[1].id, "room-old");

    harness.client.end_session().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_push_frame_converges_into_the_snapshot() {
    let harness = make_harness();
    let mut rooms_rx = harness.client.events().rooms_updated.subscribe();

    harness.client.start_session(SESSION).await.unwrap();
    settle().await;

    assert!(harness.handle.push_rooms(&[make_room("room-7", 0)]).await);
    settle().await;

    let rooms = harness.client.rooms().await;
    assert_eq!(rooms.len(), 1);
    assert_eq!(rooms[0].id, "room-7");
    assert_eq!(rooms[0].messages.len(), 1);

    // Last broadcast carries the converged snapshot.
    let last = std::iter::from_fn(|| rooms_rx.try_recv().ok())
        .last()
        .expect("push should publish a rooms update");
    assert_eq!(last.session, SESSION);
    assert_eq!(last.rooms.len(), 1);

    harness.client.end_session().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_sent_message_is_visible_without_waiting_for_sync() {
    let harness = make_harness();
    harness.api.seed_room(make_room("room-1", 0)).await;
    harness.client.start_session(SESSION).await.unwrap();

    let mut rooms_rx = harness.client.events().rooms_updated.subscribe();
    let mut sent_rx = harness.client.events().message_sent.subscribe();

    let sent = harness
        .client
        .send_message("room-1", "deal, see you at 6")
        .await
        .unwrap();
    assert_eq!(sent.sender_id, "me");

    // No settle: the optimistic fold happens before send_message returns.
    let rooms = harness.client.rooms().await;
    assert_eq!(rooms[0].id, "room-1");
    assert!(rooms[0].message(&sent.id).is_some());
    assert_eq!(rooms[0].unread_count, 0);

    assert_eq!(rooms_rx.try_recv().unwrap().rooms[0].id, "room-1");
    assert_eq!(sent_rx.try_recv().unwrap().id, sent.id);

    harness.client.end_session().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_deleted_message_leaves_the_snapshot() {
    let harness = make_harness();
    harness.api.seed_room(make_room("room-1", 0)).await;
    harness.client.start_session(SESSION).await.unwrap();

    harness
        .client
        .delete_message("room-1", "room-1-m1")
        .await
        .unwrap();

    let rooms = harness.client.rooms().await;
    assert_eq!(rooms.len(), 1);
    assert!(rooms[0].messages.is_empty());

    harness.client.end_session().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_update_message_shows_the_edit() {
    let harness = make_harness();
    harness.api.seed_room(make_room("room-1", 0)).await;
    harness.client.start_session(SESSION).await.unwrap();

    harness
        .client
        .update_message("room-1", "room-1-m1", "opening offer, negotiable")
        .await
        .unwrap();

    let rooms = harness.client.rooms().await;
    let message = rooms[0].message("room-1-m1").expect("message should stay");
    assert!(message.is_edited);
    assert_eq!(message.body, "opening offer, negotiable");

    harness.client.end_session().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_created_room_shows_up_right_away() {
    let harness = make_harness();
    harness.client.start_session(SESSION).await.unwrap();
    assert!(harness.client.rooms().await.is_empty());

    let room_id = harness
        .client
        .create_room(&["me".to_string(), "seller-9".to_string()])
        .await
        .unwrap();

    let rooms = harness.client.rooms().await;
    assert_eq!(rooms.len(), 1);
    assert_eq!(rooms[0].id, room_id);
    assert!(rooms[0].participant("seller-9").is_some());

    harness.client.end_session().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_end_session_blanks_the_snapshot() {
    let harness = make_harness();
    harness.api.seed_room(make_room("room-1", 0)).await;
    harness.client.start_session(SESSION).await.unwrap();
    assert_eq!(harness.client.rooms().await.len(), 1);

    harness.client.end_session().await.unwrap();
    assert!(harness.client.rooms().await.is_empty());

    // A fresh session starts from the backend again, not from stale cache.
    harness.client.start_session(SESSION).await.unwrap();
    assert_eq!(harness.client.rooms().await.len(), 1);
    harness.client.end_session().await.unwrap();
}

#[tokio::test]
async fn test_draft_survives_until_taken() {
    let harness = make_harness();

    harness
        .client
        .stash_draft("room-1", "would you take 50?")
        .await
        .unwrap();

    let draft = harness
        .client
        .take_draft()
        .await
        .unwrap()
        .expect("draft should be there");
    assert_eq!(draft.room_id, "room-1");
    assert_eq!(draft.body, "would you take 50?");

    assert!(harness.client.take_draft().await.unwrap().is_none());
}
