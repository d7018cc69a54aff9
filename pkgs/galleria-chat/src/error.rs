//! Error types for chat operations

use std::fmt;

use galleria_store::StoreError;
use thiserror::Error;

/// Kind of record a [`ChatError::NotFound`] refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resource {
    Conversation,
    Message,
    Participant,
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Resource::Conversation => write!(f, "Conversation"),
            Resource::Message => write!(f, "Message"),
            Resource::Participant => write!(f, "Participant"),
        }
    }
}

/// Errors that can occur in chat operations
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ChatError {
    /// Store unreachable or failing. Safe to retry; never retried automatically.
    #[error("Store unavailable: {0}")]
    TransientStore(String),
    #[error("{kind} not found: {id}")]
    NotFound { kind: Resource, id: String },
    /// Rejected before any store call
    #[error("Invalid input: {0}")]
    Validation(String),
    #[error("No authenticated user")]
    Unauthenticated,
    #[error("Live subscription closed")]
    SubscriptionClosed,
    #[error("Invalid stored data: {0}")]
    InvalidData(String),
}

impl ChatError {
    pub fn validation(message: impl Into<String>) -> Self {
        ChatError::Validation(message.into())
    }

    pub fn not_found(kind: Resource, id: impl Into<String>) -> Self {
        ChatError::NotFound {
            kind,
            id: id.into(),
        }
    }

    /// Whether the caller may retry the same operation later
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ChatError::TransientStore(_) | ChatError::SubscriptionClosed
        )
    }
}

impl From<StoreError> for ChatError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Database(e) => ChatError::TransientStore(e.to_string()),
            StoreError::ConversationNotFound(id) => {
                ChatError::not_found(Resource::Conversation, id)
            }
            StoreError::MessageNotFound { message_id, .. } => {
                ChatError::not_found(Resource::Message, message_id)
            }
            err @ StoreError::NotParticipant { .. } => ChatError::Validation(err.to_string()),
            StoreError::InvalidDocument(reason) => ChatError::Validation(reason),
            StoreError::Serialization(e) => ChatError::InvalidData(e.to_string()),
            StoreError::InvalidPath => ChatError::Validation("invalid database path".to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, ChatError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_errors_map_to_taxonomy() {
        let err: ChatError = StoreError::ConversationNotFound("chat__a__b".to_string()).into();
        assert_eq!(err, ChatError::not_found(Resource::Conversation, "chat__a__b"));
        assert!(!err.is_transient());

        let err: ChatError = StoreError::MessageNotFound {
            conversation_id: "chat__a__b".to_string(),
            message_id: "m1".to_string(),
        }
        .into();
        assert_eq!(err.to_string(), "Message not found: m1");

        let err: ChatError = StoreError::InvalidDocument("same user".to_string()).into();
        assert!(matches!(err, ChatError::Validation(_)));

        let err: ChatError = StoreError::NotParticipant {
            conversation_id: "chat__a__b".to_string(),
            user_id: "c".to_string(),
        }
        .into();
        assert_eq!(
            err,
            ChatError::validation("c is not a participant of conversation chat__a__b")
        );
    }
}
