//! Error types for store operations

use sea_orm::DbErr;
use thiserror::Error;

/// Errors that can occur while reading or writing the conversation store
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] DbErr),
    #[error("Conversation not found: {0}")]
    ConversationNotFound(String),
    #[error("Message {message_id} not found in conversation {conversation_id}")]
    MessageNotFound {
        conversation_id: String,
        message_id: String,
    },
    #[error("{user_id} is not a participant of conversation {conversation_id}")]
    NotParticipant {
        conversation_id: String,
        user_id: String,
    },
    #[error("Invalid document: {0}")]
    InvalidDocument(String),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Invalid database path")]
    InvalidPath,
}

impl StoreError {
    /// Whether retrying the same operation later may succeed
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Database(_))
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;
