use crate::listener::ListenerState;
use crate::types::chat::{ChatMessage, Chatroom, SessionId};
use std::sync::Arc;
use tokio::sync::broadcast;

// The size of the broadcast channel buffer.
const CHANNEL_CAPACITY: usize = 100;

/// Published after every cache mutation, carrying the full render snapshot.
#[derive(Debug, Clone)]
pub struct RoomsUpdate {
    pub session: SessionId,
    pub rooms: Arc<[Chatroom]>,
}

/// Published whenever the real-time listener moves between lifecycle states.
#[derive(Debug, Clone)]
pub struct ListenerStateChange {
    pub session: SessionId,
    pub state: ListenerState,
}

// Macro to generate EventBus fields and constructor
macro_rules! define_event_bus {
    ($(($field:ident, $type:ty)),* $(,)?) => {
        /// Typed event bus that provides separate broadcast channels for each event type.
        #[derive(Debug)]
        pub struct EventBus {
            $(
                pub $field: broadcast::Sender<$type>,
            )*
        }

        impl EventBus {
            pub fn new() -> Self {
                Self {
                    $(
                        $field: broadcast::channel(CHANNEL_CAPACITY).0,
                    )*
                }
            }
        }
    };
}

// Define the EventBus structure and implementation using the macro
define_event_bus! {
    // Cache events
    (rooms_updated, Arc<RoomsUpdate>),
    (message_sent, Arc<ChatMessage>),

    // Listener lifecycle events
    (listener_state, Arc<ListenerStateChange>),
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
