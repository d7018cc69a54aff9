//! Chat configuration

use serde::{Deserialize, Serialize};

/// Configuration for the chat core
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ChatConfig {
    /// First message posted when a conversation is created (default: "Welcome!")
    pub welcome_text: String,

    /// When the initiator is not an admin, post the welcome message as the admin
    /// participant instead (default: true)
    pub welcome_from_admin: bool,

    /// Buffered emissions per live feed before the producer waits (default: 16)
    pub feed_capacity: usize,

    /// Fire the notification sink for new unread messages (default: true)
    pub notify_new_messages: bool,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            welcome_text: "Welcome!".to_string(),
            welcome_from_admin: true,
            feed_capacity: 16,
            notify_new_messages: true,
        }
    }
}

impl ChatConfig {
    /// Parse a JSON document; missing keys fall back to defaults
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_json_uses_defaults() {
        let config = ChatConfig::from_json(r#"{ "welcomeText": "Hello from the gallery" }"#)
            .expect("Failed to parse config");

        assert_eq!(config.welcome_text, "Hello from the gallery");
        assert_eq!(config.feed_capacity, 16);
        assert!(config.notify_new_messages);
    }
}
