//! Galleria Store - system of record for gallery chat
//!
//! This crate provides SQLite-based persistent storage for two-party conversations
//! using Sea-ORM, and publishes a live change feed so readers can keep projections
//! of the data up to date.
//!
//! # Architecture
//!
//! - **ConversationStore**: conversations, messages and read receipts, plus the
//!   `broadcast` change feed every committed write is published on
//! - **Documents**: store-native document shapes (`ConversationDoc`, `MessageDoc`)
//!   with epoch-millisecond timestamps, and the `StoreChange` notifications
//!
//! # Database Schema
//!
//! - `conversations`: sorted participant pair, role snapshot, cached last-message
//!   fields (`last_message`, `last_message_id`, `last_message_read_by`)
//! - `messages`: sender, text and store-assigned timestamp per conversation
//! - `message_receipts`: one row per (message, reader); inserts ignore duplicates,
//!   so a message's readers only ever grow
//!
//! # Example Usage
//!
//! ```rust,no_run
//! use galleria_store::{ConversationStore, NewConversation, StoreConfig};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = ConversationStore::with_config(StoreConfig {
//!     db_path: "galleria-chat.db".into(),
//!     ..Default::default()
//! })
//! .await?;
//!
//! let mut changes = store.changes();
//!
//! let (id, _created) = store
//!     .create_conversation_if_absent(NewConversation {
//!         id: Some("chat__u1__u2".to_string()),
//!         participants: ["u1".to_string(), "u2".to_string()],
//!         roles: vec!["artist".to_string(), "admin".to_string()],
//!         initiated_by: "u1".to_string(),
//!     })
//!     .await?;
//!
//! store.append_message(&id, "u2", "Welcome!").await?;
//! let change = changes.recv().await?;
//! assert_eq!(change.conversation_id(), id);
//! # Ok(())
//! # }
//! ```

pub mod conversation_store;
pub mod documents;
pub mod entities;
pub mod error;
pub mod migration;

pub use conversation_store::ConversationStore;
pub use documents::{ConversationDoc, MessageDoc, NewConversation, StoreChange};
pub use error::{Result, StoreError};

/// Configuration for the persistence layer
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Path to the SQLite database file
    pub db_path: std::path::PathBuf,

    /// Connection pool size (default: 1, which serializes writers)
    pub max_connections: u32,

    /// Capacity of the change feed before slow subscribers start lagging (default: 256)
    pub change_buffer: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            db_path: std::path::PathBuf::from("galleria-chat.db"),
            max_connections: 1,
            change_buffer: 256,
        }
    }
}
