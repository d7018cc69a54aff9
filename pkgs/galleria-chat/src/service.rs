//! Conversation service - chat rules the store cannot enforce on its own

use std::sync::Arc;

use tracing::{debug, info, instrument, warn};

use crate::collaborators::ParticipantDirectory;
use crate::error::{ChatError, Resource, Result};
use crate::model::{Conversation, Message, Participant, StartedConversation};
use crate::repository::ConversationRepository;

/// Prefix of every canonical conversation id
pub const CONVERSATION_NAMESPACE: &str = "chat";

/// Separator between the namespace and the two participant ids
pub const ID_DELIMITER: &str = "__";

/// Canonical id of the conversation between two users.
///
/// The ids are sorted first, so the argument order does not matter. The same
/// user twice, an empty id, or an id containing [`ID_DELIMITER`] has no
/// canonical conversation and is rejected.
pub fn conversation_id_for(user_a: &str, user_b: &str) -> Result<String> {
    if user_a.is_empty() || user_b.is_empty() {
        return Err(ChatError::validation("participant id must not be empty"));
    }
    if let Some(id) = [user_a, user_b].into_iter().find(|id| id.contains(ID_DELIMITER)) {
        return Err(ChatError::validation(format!(
            "participant id {} must not contain '{}'",
            id, ID_DELIMITER
        )));
    }
    if user_a == user_b {
        return Err(ChatError::validation(format!(
            "cannot start a conversation between {} and themselves",
            user_a
        )));
    }

    let (first, second) = if user_a < user_b {
        (user_a, user_b)
    } else {
        (user_b, user_a)
    };

    Ok(format!(
        "{}{}{}{}{}",
        CONVERSATION_NAMESPACE, ID_DELIMITER, first, ID_DELIMITER, second
    ))
}

/// Whether the latest message of `conversation` is still unread by `user_id`
pub fn has_unread(user_id: &str, conversation: &Conversation) -> bool {
    conversation
        .last_message_read_by
        .as_ref()
        .is_some_and(|readers| !readers.iter().any(|id| id == user_id))
}

/// Number of conversations whose latest message `user_id` has not read
pub fn unread_count_for(user_id: &str, conversations: &[Conversation]) -> usize {
    conversations
        .iter()
        .filter(|conversation| has_unread(user_id, conversation))
        .count()
}

/// Trimmed message text, or a validation error when nothing is left
pub fn validate_text(text: &str) -> Result<&str> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(ChatError::validation("message text must not be empty"));
    }
    Ok(trimmed)
}

/// Conversation service
pub struct ConversationService<R: ConversationRepository> {
    repository: Arc<R>,
    directory: Arc<dyn ParticipantDirectory>,
}

impl<R: ConversationRepository> ConversationService<R> {
    /// Create a new conversation service
    pub fn new(repository: Arc<R>, directory: Arc<dyn ParticipantDirectory>) -> Self {
        Self {
            repository,
            directory,
        }
    }

    pub fn repository(&self) -> &Arc<R> {
        &self.repository
    }

    /// Look up a participant in the directory
    pub async fn participant(&self, user_id: &str) -> Result<Participant> {
        self.directory
            .find(user_id)
            .await?
            .ok_or_else(|| ChatError::not_found(Resource::Participant, user_id))
    }

    /// Admin that should post the welcome message on behalf of a non-admin
    /// initiator, if `other_user` is one
    pub async fn admin_welcome_sender(
        &self,
        current_user: &str,
        other_user: &str,
    ) -> Result<Option<String>> {
        let current = self.participant(current_user).await?;
        if current.role.is_admin() {
            return Ok(None);
        }

        let other = self.participant(other_user).await?;
        Ok(other.role.is_admin().then_some(other.id))
    }

    /// Resume the conversation between `current_user` and `other_user`, or create
    /// it and post the welcome message.
    ///
    /// `known` is the caller's in-memory conversation list; it is consulted before
    /// the store. `welcome_sender` overrides who posts the welcome message and
    /// must be one of the two participants.
    #[instrument(skip(self, welcome_text, known))]
    pub async fn start_conversation(
        &self,
        current_user: &str,
        other_user: &str,
        welcome_text: &str,
        welcome_sender: Option<&str>,
        known: &[Conversation],
    ) -> Result<StartedConversation> {
        conversation_id_for(current_user, other_user)?;
        let welcome_text = validate_text(welcome_text)?;
        let sender = welcome_sender.unwrap_or(current_user);
        if sender != current_user && sender != other_user {
            return Err(ChatError::validation(format!(
                "welcome sender {} is not a participant",
                sender
            )));
        }

        if let Some(existing) = known
            .iter()
            .find(|c| c.has_participant(current_user) && c.has_participant(other_user))
        {
            debug!("Reusing known conversation '{}'", existing.id);
            return Ok(StartedConversation {
                conversation_id: existing.id.clone(),
                created: false,
                welcome: None,
            });
        }

        if let Some(existing) = self
            .repository
            .find_conversation_between(current_user, other_user)
            .await?
        {
            debug!("Reusing stored conversation '{}'", existing.id);
            return Ok(StartedConversation {
                conversation_id: existing.id,
                created: false,
                welcome: None,
            });
        }

        let current = self.participant(current_user).await?;
        let other = self.participant(other_user).await?;
        let roles = vec![current.role.as_str().to_string(), other.role.as_str().to_string()];

        let created = self
            .repository
            .create_conversation_if_absent(current_user, other_user, roles)
            .await?;

        if !created.created {
            // Lost the race to a concurrent caller; it posts the welcome message
            return Ok(StartedConversation {
                conversation_id: created.id,
                created: false,
                welcome: None,
            });
        }

        let welcome = self
            .repository
            .append_message(&created.id, sender, welcome_text)
            .await?;

        info!(
            "Started conversation '{}' between {} and {}",
            created.id, current_user, other_user
        );

        Ok(StartedConversation {
            conversation_id: created.id,
            created: true,
            welcome: Some(welcome),
        })
    }

    /// Admin-initiated conversation under a store-assigned id. Reuses any
    /// existing conversation for the pair.
    #[instrument(skip(self, welcome_text))]
    pub async fn start_admin_conversation(
        &self,
        admin_id: &str,
        other_user: &str,
        welcome_text: &str,
    ) -> Result<StartedConversation> {
        conversation_id_for(admin_id, other_user)?;
        let welcome_text = validate_text(welcome_text)?;

        let admin = self.participant(admin_id).await?;
        if !admin.role.is_admin() {
            warn!("{} tried to open an admin conversation", admin_id);
            return Err(ChatError::validation(format!("{} is not an admin", admin_id)));
        }
        let other = self.participant(other_user).await?;

        if let Some(existing) = self
            .repository
            .find_conversation_between(admin_id, other_user)
            .await?
        {
            return Ok(StartedConversation {
                conversation_id: existing.id,
                created: false,
                welcome: None,
            });
        }

        let roles = vec![admin.role.as_str().to_string(), other.role.as_str().to_string()];
        let created = self
            .repository
            .create_conversation_with_generated_id(admin_id, other_user, roles)
            .await?;

        let welcome = self
            .repository
            .append_message(&created.id, admin_id, welcome_text)
            .await?;

        Ok(StartedConversation {
            conversation_id: created.id,
            created: true,
            welcome: Some(welcome),
        })
    }

    /// Validate and append a message. Senders outside the conversation are
    /// rejected by the store with a validation error.
    pub async fn send_message(
        &self,
        conversation_id: &str,
        sender_id: &str,
        text: &str,
    ) -> Result<Message> {
        if conversation_id.is_empty() {
            return Err(ChatError::validation("conversation id must not be empty"));
        }
        if sender_id.is_empty() {
            return Err(ChatError::validation("sender id must not be empty"));
        }
        let text = validate_text(text)?;

        self.repository
            .append_message(conversation_id, sender_id, text)
            .await
    }

    /// Record a read receipt for one of the conversation's participants
    pub async fn mark_read(
        &self,
        conversation_id: &str,
        message_id: &str,
        user_id: &str,
    ) -> Result<()> {
        if user_id.is_empty() {
            return Err(ChatError::validation("reader id must not be empty"));
        }

        self.repository
            .mark_read(conversation_id, message_id, user_id)
            .await
    }
}
