use crate::types::chat::UserId;
use std::env;
use std::path::PathBuf;

#[derive(Clone, Debug)]
pub struct ChatConfig {
    /// Base URL of the REST backend.
    pub api_base_url: String,
    /// WebSocket endpoint of the push stream.
    pub stream_url: String,
    /// Serve every chat operation from the in-memory backend instead of the
    /// network.
    pub use_mock_api: bool,
    /// Account the client acts as.
    pub current_user_id: UserId,
    /// Where the composer draft is persisted between sessions.
    pub draft_path: PathBuf,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            api_base_url: "http://localhost:8080/api".to_string(),
            stream_url: "ws://localhost:8080/ws/chat".to_string(),
            use_mock_api: false,
            current_user_id: String::new(),
            draft_path: PathBuf::from("unimarket-chat-draft.json"),
        }
    }
}

impl ChatConfig {
    /// Defaults overlaid with the `UNIMARKET_CHAT_*` environment variables.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(url) = env::var("UNIMARKET_CHAT_API_URL") {
            config.api_base_url = url;
        }
        if let Ok(url) = env::var("UNIMARKET_CHAT_STREAM_URL") {
            config.stream_url = url;
        }
        if let Ok(flag) = env::var("UNIMARKET_CHAT_MOCK") {
            config.use_mock_api = parse_flag(&flag);
        }
        if let Ok(user) = env::var("UNIMARKET_CHAT_USER") {
            config.current_user_id = user;
        }
        if let Ok(path) = env::var("UNIMARKET_CHAT_DRAFT_PATH") {
            config.draft_path = PathBuf::from(path);
        }
        config
    }
}

fn parse_flag(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_flag_accepts_common_truthy_values() {
        assert!(parse_flag("1"));
        assert!(parse_flag("true"));
        assert!(parse_flag("YES"));
        assert!(parse_flag(" on "));
        assert!(!parse_flag("0"));
        assert!(!parse_flag("false"));
        assert!(!parse_flag(""));
    }
}
