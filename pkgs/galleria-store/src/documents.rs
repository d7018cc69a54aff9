//! Document shapes exposed by the store and its change feed

use serde::{Deserialize, Serialize};

/// Conversation document (`conversations/{id}`)
///
/// Timestamps are store-native epoch milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationDoc {
    pub id: String,
    /// Always two ids, sorted
    pub participants: Vec<String>,
    pub roles: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_message_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_message_read_by: Option<Vec<String>>,
    pub last_updated: i64,
    pub created_at: i64,
    pub initiated_by: String,
}

impl ConversationDoc {
    pub fn has_participant(&self, user_id: &str) -> bool {
        self.participants.iter().any(|p| p == user_id)
    }
}

/// Message document (`conversations/{id}/messages/{message_id}`)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageDoc {
    pub id: String,
    pub conversation_id: String,
    pub sender_id: String,
    pub text: String,
    pub timestamp: i64,
    /// Readers in the order their receipts were recorded
    pub read_by: Vec<String>,
}

/// Input for creating a conversation
#[derive(Debug, Clone)]
pub struct NewConversation {
    /// `None` lets the store assign a uuid
    pub id: Option<String>,
    pub participants: [String; 2],
    pub roles: Vec<String>,
    pub initiated_by: String,
}

/// Change notification published after every committed write
#[derive(Debug, Clone, PartialEq)]
pub enum StoreChange {
    ConversationUpserted {
        conversation_id: String,
        participants: Vec<String>,
    },
    MessageAppended {
        conversation_id: String,
        participants: Vec<String>,
        message_id: String,
    },
    MessageRead {
        conversation_id: String,
        participants: Vec<String>,
        message_id: String,
        user_id: String,
    },
}

impl StoreChange {
    pub fn conversation_id(&self) -> &str {
        match self {
            StoreChange::ConversationUpserted {
                conversation_id, ..
            }
            | StoreChange::MessageAppended {
                conversation_id, ..
            }
            | StoreChange::MessageRead {
                conversation_id, ..
            } => conversation_id,
        }
    }

    pub fn participants(&self) -> &[String] {
        match self {
            StoreChange::ConversationUpserted { participants, .. }
            | StoreChange::MessageAppended { participants, .. }
            | StoreChange::MessageRead { participants, .. } => participants,
        }
    }

    /// Whether this change can alter the conversation list of `user_id`
    pub fn touches_user(&self, user_id: &str) -> bool {
        self.participants().iter().any(|p| p == user_id)
    }
}
