use log::{error, info, warn};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use unimarket_chat::api::ChatApi;
use unimarket_chat::stream::StreamHandle;
use unimarket_chat::types::chat::{Chatroom, RoomId, SessionId};
use unimarket_chat::{ChatClient, ChatConfig};

// Demo client for the campus marketplace chat.
//
// Usage:
//   cargo run                                        # talk to a live backend
//   cargo run -- --mock                              # in-memory backend with a scripted seller
//   cargo run -- -a http://host:8080 -s ws://host:8080/stream
//   cargo run -- --session buyer-7 --user student-7

fn main() {
    let args: Vec<String> = std::env::args().collect();
    let api_url = parse_arg(&args, "--api-url", "-a");
    let stream_url = parse_arg(&args, "--stream-url", "-s");
    let session = parse_arg(&args, "--session", "-n").unwrap_or_else(|| "demo-session".to_string());
    let user = parse_arg(&args, "--user", "-u");
    let mock = has_flag(&args, "--mock", "-m");

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format(|buf, record| {
            use std::io::Write;
            writeln!(
                buf,
                "{} [{:<5}] [{}] - {}",
                chrono::Local::now().format("%H:%M:%S"),
                record.level(),
                record.target(),
                record.args()
            )
        })
        .init();

    let mut config = ChatConfig::from_env();
    if let Some(url) = api_url {
        config.api_base_url = url;
    }
    if let Some(url) = stream_url {
        config.stream_url = url;
    }
    if let Some(user) = user {
        config.current_user_id = user;
    }
    if mock {
        config.use_mock_api = true;
    }

    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .expect("Failed to build tokio runtime");

    rt.block_on(async move {
        let (client, handle) = ChatClient::from_config(config);
        let client = Arc::new(client);

        let mut rooms_rx = client.events().rooms_updated.subscribe();
        let mut state_rx = client.events().listener_state.subscribe();

        match client.take_draft().await {
            Ok(Some(draft)) => {
                info!(
                    "Recovered unsent draft for room {}: {:?}",
                    draft.room_id, draft.body
                );
            }
            Ok(None) => {}
            Err(e) => warn!("Failed to read the stashed draft: {e}"),
        }

        if let Err(e) = client.start_session(session.clone()).await {
            error!("Failed to start session: {e}");
            return;
        }

        // In mock mode, seed a listing conversation and let a scripted
        // seller answer over the push stream.
        if let Some(handle) = handle {
            match seed_marketplace(&client).await {
                Ok(room_id) => {
                    tokio::spawn(run_scripted_seller(
                        client.api(),
                        handle,
                        session.clone(),
                        room_id,
                    ));
                }
                Err(e) => error!("Failed to seed the mock backend: {e}"),
            }
        }

        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    info!("Interrupt received, ending session");
                    break;
                }
                update = rooms_rx.recv() => match update {
                    Ok(update) => print_rooms(client.current_user_id(), &update.rooms),
                    Err(RecvError::Lagged(n)) => warn!("Dropped {n} room updates"),
                    Err(RecvError::Closed) => break,
                },
                change = state_rx.recv() => {
                    if let Ok(change) = change {
                        info!("Listener is now {:?}", change.state);
                    }
                }
            }
        }

        if let Err(e) = client.end_session().await {
            error!("Failed to end session: {e}");
        }
    });
}

fn print_rooms(viewer: &str, rooms: &[Chatroom]) {
    info!("----------------------------------------");
    info!("{} chatroom(s):", rooms.len());
    for room in rooms {
        let unread = if room.unread_count > 0 {
            format!(" ({} unread)", room.unread_count)
        } else {
            String::new()
        };
        match room.latest_message() {
            Some(message) => info!(
                "  {}{}: <{}> {}",
                room.title(viewer),
                unread,
                message.sender_id,
                message.body
            ),
            None => info!("  {}{}: no messages yet", room.title(viewer), unread),
        }
    }
    info!("----------------------------------------");
}

async fn seed_marketplace(client: &ChatClient) -> unimarket_chat::client::Result<RoomId> {
    let buyer = client.current_user_id().to_string();
    let room_id = client
        .create_room(&[buyer, "seller-42".to_string()])
        .await?;
    client
        .send_message(&room_id, "Hi! Is the desk lamp still available?")
        .await?;
    Ok(room_id)
}

/// Plays the other side of the conversation: mutates the mock backend as
/// the seller, then pushes the changed rooms through the stream handle the
/// way the real backend would.
async fn run_scripted_seller(
    api: Arc<dyn ChatApi>,
    handle: StreamHandle,
    session: String,
    room_id: RoomId,
) {
    const SCRIPT: [&str; 3] = [
        "Yes, it is! 60 or best offer.",
        "I can meet by the library after 6.",
        "Sounds good, see you then.",
    ];

    for line in SCRIPT {
        tokio::time::sleep(Duration::from_secs(4)).await;
        if let Err(e) = api.send_message(&room_id, "seller-42", line).await {
            error!("Scripted seller failed to send: {e}");
            return;
        }
        match fetch_rooms(api.as_ref(), &session).await {
            Ok(rooms) => {
                handle.push_rooms(&rooms).await;
            }
            Err(e) => error!("Scripted seller failed to read rooms back: {e}"),
        }
    }
}

async fn fetch_rooms(
    api: &dyn ChatApi,
    session: &SessionId,
) -> unimarket_chat::api::Result<Vec<Chatroom>> {
    let ids = api.list_room_ids(session).await?;
    let mut rooms = Vec::with_capacity(ids.len());
    for id in &ids {
        rooms.push(api.get_room(id).await?);
    }
    Ok(rooms)
}

/// Parse a CLI argument by its long and short flags.
/// Supports: --flag VALUE, -f VALUE, --flag=VALUE
fn parse_arg(args: &[String], long: &str, short: &str) -> Option<String> {
    let long_prefix = format!("{}=", long);
    let mut iter = args.iter().skip(1); // Skip program name
    while let Some(arg) = iter.next() {
        if arg == long || arg == short {
            return iter.next().cloned();
        }
        if let Some(value) = arg.strip_prefix(&long_prefix) {
            return Some(value.to_string());
        }
    }
    None
}

fn has_flag(args: &[String], long: &str, short: &str) -> bool {
    args.iter().skip(1).any(|arg| arg == long || arg == short)
}
