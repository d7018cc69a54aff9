//! Chat domain types and public data structures

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Participant role as reported by the user directory
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Role {
    Admin,
    Other(String),
}

impl Role {
    pub fn as_str(&self) -> &str {
        match self {
            Role::Admin => "admin",
            Role::Other(role) => role,
        }
    }

    pub fn is_admin(&self) -> bool {
        matches!(self, Role::Admin)
    }
}

impl From<String> for Role {
    fn from(value: String) -> Self {
        if value.eq_ignore_ascii_case("admin") {
            Role::Admin
        } else {
            Role::Other(value)
        }
    }
}

impl From<Role> for String {
    fn from(role: Role) -> Self {
        role.as_str().to_string()
    }
}

/// A known user, as far as chat is concerned
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    pub id: String,
    pub name: String,
    pub email: String,
    pub role: Role,
}

/// Two-party conversation, normalized for clients
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub id: String,
    pub participants: Vec<String>,
    /// Snapshot taken at creation, not authoritative
    pub roles: Vec<String>,
    pub last_message: Option<String>,
    pub last_message_id: Option<String>,
    pub last_message_read_by: Option<Vec<String>>,
    pub created_at: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
    pub initiated_by: String,
}

impl Conversation {
    pub fn has_participant(&self, user_id: &str) -> bool {
        self.participants.iter().any(|p| p == user_id)
    }

    /// The participant that is not `user_id`
    pub fn other_participant(&self, user_id: &str) -> Option<&str> {
        self.participants
            .iter()
            .find(|p| p.as_str() != user_id)
            .map(String::as_str)
    }

    /// Participant ids in canonical (sorted) order
    pub fn participant_pair(&self) -> (String, String) {
        let mut sorted = self.participants.clone();
        sorted.sort();
        let second = sorted.pop().unwrap_or_default();
        let first = sorted.pop().unwrap_or_default();
        (first, second)
    }
}

/// A message inside a conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    pub conversation_id: String,
    pub sender_id: String,
    pub text: String,
    pub timestamp: DateTime<Utc>,
    pub read_by: Vec<String>,
}

impl Message {
    pub fn is_read_by(&self, user_id: &str) -> bool {
        self.read_by.iter().any(|id| id == user_id)
    }
}

/// What the notification sink is told about a newly arrived unread message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationSummary {
    pub conversation_id: String,
    pub from_id: Option<String>,
    pub from_name: Option<String>,
    pub last_message: Option<String>,
    pub last_updated: DateTime<Utc>,
    /// Unread conversations for the current user, this one included
    pub unread_count: usize,
}

/// Result of starting (or resuming) a conversation
#[derive(Debug, Clone, PartialEq)]
pub struct StartedConversation {
    pub conversation_id: String,
    /// `false` when an existing conversation was reused
    pub created: bool,
    pub welcome: Option<Message>,
}
