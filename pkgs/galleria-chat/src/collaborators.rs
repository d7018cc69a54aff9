//! Interfaces to the rest of the application: who is signed in, who exists,
//! and where new-message alerts go.

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::info;

use crate::error::Result;
use crate::model::{ConversationSummary, Participant};

/// Source of the currently authenticated user
pub trait IdentityProvider: Send + Sync {
    fn current_user(&self) -> Option<String>;
}

/// Read-only directory of known users
#[async_trait]
pub trait ParticipantDirectory: Send + Sync {
    async fn list_users(&self) -> Result<Vec<Participant>>;

    async fn find(&self, user_id: &str) -> Result<Option<Participant>> {
        Ok(self
            .list_users()
            .await?
            .into_iter()
            .find(|user| user.id == user_id))
    }
}

/// Receives "new message" alerts. Rendering is up to the implementor.
pub trait NotificationSink: Send + Sync {
    fn on_new_unread_message(&self, summary: ConversationSummary);
}

/// Fixed identity, e.g. from a command-line flag or an already bootstrapped session
#[derive(Debug, Clone, Default)]
pub struct StaticIdentity(Option<String>);

impl StaticIdentity {
    pub fn signed_in(user_id: impl Into<String>) -> Self {
        Self(Some(user_id.into()))
    }

    pub fn signed_out() -> Self {
        Self(None)
    }
}

impl IdentityProvider for StaticIdentity {
    fn current_user(&self) -> Option<String> {
        self.0.clone()
    }
}

/// In-memory directory
#[derive(Debug, Clone, Default)]
pub struct StaticDirectory {
    users: Vec<Participant>,
}

impl StaticDirectory {
    pub fn new(users: Vec<Participant>) -> Self {
        Self { users }
    }

    /// Load a JSON array of `{id, name, email, role}` records
    pub fn from_json(json: &str) -> std::result::Result<Self, serde_json::Error> {
        Ok(Self::new(serde_json::from_str(json)?))
    }
}

#[async_trait]
impl ParticipantDirectory for StaticDirectory {
    async fn list_users(&self) -> Result<Vec<Participant>> {
        Ok(self.users.clone())
    }
}

/// Writes alerts to the log
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotificationSink;

impl NotificationSink for LogNotificationSink {
    fn on_new_unread_message(&self, summary: ConversationSummary) {
        info!(
            conversation_id = %summary.conversation_id,
            from = summary.from_name.as_deref().or(summary.from_id.as_deref()).unwrap_or("unknown"),
            unread = summary.unread_count,
            "New unread message"
        );
    }
}

/// Keeps every alert it receives
#[derive(Debug, Default)]
pub struct RecordingNotificationSink {
    received: Mutex<Vec<ConversationSummary>>,
}

impl RecordingNotificationSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn received(&self) -> Vec<ConversationSummary> {
        self.received.lock().clone()
    }
}

impl NotificationSink for RecordingNotificationSink {
    fn on_new_unread_message(&self, summary: ConversationSummary) {
        self.received.lock().push(summary);
    }
}
