// Domain types live under types/, with the event bus kept alongside them.
pub mod types {
    pub mod chat;
    pub mod events;

    pub use chat::*;
}

pub mod api;
pub mod cache;
pub mod client;
pub mod config;
pub mod draft;
pub mod listener;
pub mod net;
pub mod reconcile;
pub mod stream;
pub mod wire;

pub use client::ChatClient;
pub use config::ChatConfig;
