//! Conversation repository - bridge between the chat domain and the store
//!
//! The repository owns the translation from store documents to domain types and
//! starts the live feeds. Store-native timestamps (epoch milliseconds) are turned
//! into `DateTime<Utc>` here and never travel further.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use galleria_store::{ConversationDoc, ConversationStore, MessageDoc, NewConversation};
use tracing::{debug, info, instrument};

use crate::error::{ChatError, Result};
use crate::feed::LiveFeed;
use crate::model::{Conversation, Message};
use crate::service::conversation_id_for;

/// Outcome of a create-if-absent call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatedConversation {
    pub id: String,
    /// `false` when the conversation already existed
    pub created: bool,
}

/// Store access as seen by the service and the controller
#[async_trait]
pub trait ConversationRepository: Send + Sync + 'static {
    /// Live list of the user's conversations, most recently updated first
    fn subscribe_conversations(&self, user_id: &str) -> LiveFeed<Vec<Conversation>>;

    /// Live list of a conversation's messages, oldest first
    fn subscribe_messages(&self, conversation_id: &str) -> LiveFeed<Vec<Message>>;

    /// One-shot form of [`Self::subscribe_conversations`]
    async fn conversations_for(&self, user_id: &str) -> Result<Vec<Conversation>>;

    /// One-shot form of [`Self::subscribe_messages`]
    async fn messages(&self, conversation_id: &str) -> Result<Vec<Message>>;

    /// Any conversation between the two users, whatever its id scheme
    async fn find_conversation_between(
        &self,
        user_a: &str,
        user_b: &str,
    ) -> Result<Option<Conversation>>;

    /// Create the canonical conversation for a pair unless it exists
    async fn create_conversation_if_absent(
        &self,
        participant_a: &str,
        participant_b: &str,
        roles: Vec<String>,
    ) -> Result<CreatedConversation>;

    /// Create a conversation under a store-assigned id
    async fn create_conversation_with_generated_id(
        &self,
        initiator: &str,
        other: &str,
        roles: Vec<String>,
    ) -> Result<CreatedConversation>;

    async fn append_message(
        &self,
        conversation_id: &str,
        sender_id: &str,
        text: &str,
    ) -> Result<Message>;

    async fn mark_read(&self, conversation_id: &str, message_id: &str, user_id: &str)
        -> Result<()>;
}

/// Repository backed by [`ConversationStore`]
#[derive(Clone)]
pub struct StoreRepository {
    store: Arc<ConversationStore>,
    feed_capacity: usize,
}

impl StoreRepository {
    pub fn new(store: Arc<ConversationStore>) -> Self {
        Self {
            store,
            feed_capacity: 16,
        }
    }

    pub fn with_feed_capacity(mut self, capacity: usize) -> Self {
        self.feed_capacity = capacity.max(1);
        self
    }

    pub fn store(&self) -> &Arc<ConversationStore> {
        &self.store
    }
}

#[async_trait]
impl ConversationRepository for StoreRepository {
    fn subscribe_conversations(&self, user_id: &str) -> LiveFeed<Vec<Conversation>> {
        debug!("Subscribing to conversations of {}", user_id);

        let changes = self.store.changes();
        let store = self.store.clone();
        let user = user_id.to_string();
        let filter_user = user.clone();

        LiveFeed::spawn(
            self.feed_capacity,
            changes,
            move |change| change.touches_user(&filter_user),
            move || load_conversations(store.clone(), user.clone()),
        )
    }

    fn subscribe_messages(&self, conversation_id: &str) -> LiveFeed<Vec<Message>> {
        debug!("Subscribing to messages of {}", conversation_id);

        let changes = self.store.changes();
        let store = self.store.clone();
        let id = conversation_id.to_string();
        let filter_id = id.clone();

        LiveFeed::spawn(
            self.feed_capacity,
            changes,
            move |change| change.conversation_id() == filter_id,
            move || load_messages(store.clone(), id.clone()),
        )
    }

    async fn conversations_for(&self, user_id: &str) -> Result<Vec<Conversation>> {
        load_conversations(self.store.clone(), user_id.to_string()).await
    }

    async fn messages(&self, conversation_id: &str) -> Result<Vec<Message>> {
        load_messages(self.store.clone(), conversation_id.to_string()).await
    }

    async fn find_conversation_between(
        &self,
        user_a: &str,
        user_b: &str,
    ) -> Result<Option<Conversation>> {
        // Canonical id first, then any store-assigned conversation for the pair
        let canonical = conversation_id_for(user_a, user_b)?;
        let doc = match self.store.get_conversation(&canonical).await? {
            Some(doc) if is_between(&doc, user_a, user_b) => Some(doc),
            _ => self.store.find_by_participants(user_a, user_b).await?,
        };

        match doc {
            Some(doc) => Ok(Some(resolve_conversation(&self.store, doc).await?)),
            None => Ok(None),
        }
    }

    #[instrument(skip(self, roles))]
    async fn create_conversation_if_absent(
        &self,
        participant_a: &str,
        participant_b: &str,
        roles: Vec<String>,
    ) -> Result<CreatedConversation> {
        let id = conversation_id_for(participant_a, participant_b)?;

        if let Some(existing) = self.store.get_conversation(&id).await? {
            if !is_between(&existing, participant_a, participant_b) {
                return Err(ChatError::InvalidData(format!(
                    "conversation {} belongs to {:?}",
                    id, existing.participants
                )));
            }
            debug!("Conversation '{}' exists, reusing it", id);
            return Ok(CreatedConversation { id, created: false });
        }

        let (id, created) = self
            .store
            .create_conversation_if_absent(NewConversation {
                id: Some(id),
                participants: [participant_a.to_string(), participant_b.to_string()],
                roles,
                initiated_by: participant_a.to_string(),
            })
            .await?;

        Ok(CreatedConversation { id, created })
    }

    #[instrument(skip(self, roles))]
    async fn create_conversation_with_generated_id(
        &self,
        initiator: &str,
        other: &str,
        roles: Vec<String>,
    ) -> Result<CreatedConversation> {
        let (id, created) = self
            .store
            .create_conversation_if_absent(NewConversation {
                id: None,
                participants: [initiator.to_string(), other.to_string()],
                roles,
                initiated_by: initiator.to_string(),
            })
            .await?;

        info!("Created conversation '{}' with store-assigned id", id);
        Ok(CreatedConversation { id, created })
    }

    async fn append_message(
        &self,
        conversation_id: &str,
        sender_id: &str,
        text: &str,
    ) -> Result<Message> {
        let doc = self
            .store
            .append_message(conversation_id, sender_id, text)
            .await?;
        message_from_doc(doc)
    }

    async fn mark_read(
        &self,
        conversation_id: &str,
        message_id: &str,
        user_id: &str,
    ) -> Result<()> {
        self.store
            .mark_read(conversation_id, message_id, user_id)
            .await?;
        Ok(())
    }
}

async fn load_conversations(
    store: Arc<ConversationStore>,
    user_id: String,
) -> Result<Vec<Conversation>> {
    let docs = store.conversations_for(&user_id).await?;

    let mut conversations = Vec::with_capacity(docs.len());
    for doc in docs {
        conversations.push(resolve_conversation(&store, doc).await?);
    }

    Ok(dedup_by_pair(conversations))
}

async fn load_messages(
    store: Arc<ConversationStore>,
    conversation_id: String,
) -> Result<Vec<Message>> {
    store
        .messages(&conversation_id)
        .await?
        .into_iter()
        .map(message_from_doc)
        .collect()
}

/// Whether `doc` is the conversation between exactly these two users
fn is_between(doc: &ConversationDoc, user_a: &str, user_b: &str) -> bool {
    let mut stored: Vec<&str> = doc.participants.iter().map(String::as_str).collect();
    let mut requested = vec![user_a, user_b];
    stored.sort_unstable();
    requested.sort_unstable();
    stored == requested
}

/// Normalize a conversation document. The cached last-message fields on the
/// document may lag, so they are replaced with the latest message itself.
async fn resolve_conversation(
    store: &ConversationStore,
    doc: ConversationDoc,
) -> Result<Conversation> {
    let latest = store.latest_message(&doc.id).await?;
    conversation_from_doc(doc, latest)
}

pub(crate) fn conversation_from_doc(
    doc: ConversationDoc,
    latest: Option<MessageDoc>,
) -> Result<Conversation> {
    let (last_message, last_message_id, last_message_read_by) = match latest {
        Some(message) => (Some(message.text), Some(message.id), Some(message.read_by)),
        None => (doc.last_message, doc.last_message_id, doc.last_message_read_by),
    };

    Ok(Conversation {
        created_at: timestamp(doc.created_at)?,
        last_updated: timestamp(doc.last_updated)?,
        id: doc.id,
        participants: doc.participants,
        roles: doc.roles,
        last_message,
        last_message_id,
        last_message_read_by,
        initiated_by: doc.initiated_by,
    })
}

pub(crate) fn message_from_doc(doc: MessageDoc) -> Result<Message> {
    Ok(Message {
        timestamp: timestamp(doc.timestamp)?,
        id: doc.id,
        conversation_id: doc.conversation_id,
        sender_id: doc.sender_id,
        text: doc.text,
        read_by: doc.read_by,
    })
}

fn timestamp(millis: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp_millis(millis)
        .ok_or_else(|| ChatError::InvalidData(format!("timestamp out of range: {}", millis)))
}

/// Keep one conversation per participant pair. The canonical id wins; otherwise
/// the most recently updated one. Input order (newest first) is preserved.
pub(crate) fn dedup_by_pair(conversations: Vec<Conversation>) -> Vec<Conversation> {
    let mut winners: HashMap<(String, String), usize> = HashMap::new();

    for (index, conversation) in conversations.iter().enumerate() {
        let pair = conversation.participant_pair();
        let canonical = conversation_id_for(&pair.0, &pair.1)
            .map(|id| id == conversation.id)
            .unwrap_or(false);

        match winners.get(&pair) {
            None => {
                winners.insert(pair, index);
            }
            Some(&current) => {
                let current_is_canonical = conversation_id_for(&pair.0, &pair.1)
                    .map(|id| id == conversations[current].id)
                    .unwrap_or(false);
                if canonical && !current_is_canonical {
                    winners.insert(pair, index);
                }
            }
        }
    }

    if winners.len() == conversations.len() {
        return conversations;
    }

    debug!(
        "Dropped {} duplicate conversations from list",
        conversations.len() - winners.len()
    );

    let keep: std::collections::HashSet<usize> = winners.into_values().collect();
    conversations
        .into_iter()
        .enumerate()
        .filter(|(index, _)| keep.contains(index))
        .map(|(_, conversation)| conversation)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conv(id: &str, a: &str, b: &str, updated: i64) -> Conversation {
        conversation_from_doc(
            ConversationDoc {
                id: id.to_string(),
                participants: vec![a.to_string(), b.to_string()],
                roles: vec![],
                last_message: None,
                last_message_id: None,
                last_message_read_by: None,
                last_updated: updated,
                created_at: updated,
                initiated_by: a.to_string(),
            },
            None,
        )
        .unwrap()
    }

    #[test]
    fn test_latest_message_overrides_cached_fields() {
        let doc = ConversationDoc {
            id: "chat__u1__u2".to_string(),
            participants: vec!["u1".to_string(), "u2".to_string()],
            roles: vec![],
            last_message: Some("stale".to_string()),
            last_message_id: Some("m1".to_string()),
            last_message_read_by: Some(vec!["u1".to_string()]),
            last_updated: 1_700_000_000_000,
            created_at: 1_700_000_000_000,
            initiated_by: "u1".to_string(),
        };
        let latest = MessageDoc {
            id: "m2".to_string(),
            conversation_id: "chat__u1__u2".to_string(),
            sender_id: "u2".to_string(),
            text: "fresh".to_string(),
            timestamp: 1_700_000_000_500,
            read_by: vec!["u2".to_string()],
        };

        let conversation = conversation_from_doc(doc, Some(latest)).unwrap();
        assert_eq!(conversation.last_message.as_deref(), Some("fresh"));
        assert_eq!(conversation.last_message_id.as_deref(), Some("m2"));
        assert_eq!(
            conversation.last_message_read_by,
            Some(vec!["u2".to_string()])
        );
        assert_eq!(
            conversation.last_updated.to_rfc3339(),
            "2023-11-14T22:13:20+00:00"
        );
    }

    #[test]
    fn test_dedup_prefers_canonical_id() {
        let list = vec![
            conv("0b6f-generated", "admin", "u7", 300),
            conv("chat__u1__u2", "u1", "u2", 200),
            conv("chat__admin__u7", "u7", "admin", 100),
        ];

        let ids: Vec<String> = dedup_by_pair(list).into_iter().map(|c| c.id).collect();
        assert_eq!(ids, vec!["chat__u1__u2", "chat__admin__u7"]);
    }

    #[test]
    fn test_is_between_ignores_order_only() {
        let doc = ConversationDoc {
            id: "chat__u1__u2".to_string(),
            participants: vec!["u2".to_string(), "u1".to_string()],
            roles: vec![],
            last_message: None,
            last_message_id: None,
            last_message_read_by: None,
            last_updated: 0,
            created_at: 0,
            initiated_by: "u2".to_string(),
        };

        assert!(is_between(&doc, "u1", "u2"));
        assert!(is_between(&doc, "u2", "u1"));
        assert!(!is_between(&doc, "u1", "u3"));
    }

    #[test]
    fn test_dedup_keeps_newest_generated_id() {
        let list = vec![
            conv("generated-new", "admin", "u7", 300),
            conv("generated-old", "admin", "u7", 100),
        ];

        let ids: Vec<String> = dedup_by_pair(list).into_iter().map(|c| c.id).collect();
        assert_eq!(ids, vec!["generated-new"]);
    }
}
