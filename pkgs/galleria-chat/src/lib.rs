//! Galleria Chat - real-time two-party chat between gallery users
//!
//! # Architecture
//!
//! - **ConversationRepository**: store access and live feeds. [`StoreRepository`]
//!   is the SQLite-backed implementation on top of `galleria-store`
//! - **ConversationService**: deterministic conversation ids, start-or-resume with
//!   a welcome message, send and read-receipt validation, unread counting
//! - **ChatController**: the view state of a chat screen, kept current by one
//!   conversation-list feed and one message feed
//!
//! # Example Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use galleria_chat::{
//!     ChatConfig, ChatController, ConversationService, LogNotificationSink, StaticDirectory,
//!     StaticIdentity, StoreRepository,
//! };
//! use galleria_store::ConversationStore;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = Arc::new(ConversationStore::new("galleria-chat.db".into()).await?);
//! let directory = StaticDirectory::from_json(r#"[
//!     {"id": "u1", "name": "Ada", "email": "ada@example.com", "role": "artist"},
//!     {"id": "u2", "name": "Gallery", "email": "admin@example.com", "role": "admin"}
//! ]"#)?;
//!
//! let service = Arc::new(ConversationService::new(
//!     Arc::new(StoreRepository::new(store)),
//!     Arc::new(directory),
//! ));
//! let mut controller = ChatController::new(
//!     service,
//!     Arc::new(StaticIdentity::signed_in("u1")),
//!     Arc::new(LogNotificationSink),
//!     ChatConfig::default(),
//! );
//!
//! controller.start().await?;
//! let started = controller.start_conversation("u2").await?;
//! println!("conversation {}", started.conversation_id);
//! # Ok(())
//! # }
//! ```

pub mod collaborators;
pub mod config;
pub mod controller;
pub mod error;
pub mod feed;
pub mod model;
pub mod repository;
pub mod service;

pub use collaborators::{
    IdentityProvider, LogNotificationSink, NotificationSink, ParticipantDirectory,
    RecordingNotificationSink, StaticDirectory, StaticIdentity,
};
pub use config::ChatConfig;
pub use controller::{ChatController, ChatState, ListStatus};
pub use error::{ChatError, Resource, Result};
pub use feed::{FeedEvent, LiveFeed};
pub use model::{
    Conversation, ConversationSummary, Message, Participant, Role, StartedConversation,
};
pub use repository::{ConversationRepository, CreatedConversation, StoreRepository};
pub use service::{
    conversation_id_for, has_unread, unread_count_for, ConversationService,
    CONVERSATION_NAMESPACE, ID_DELIMITER,
};
