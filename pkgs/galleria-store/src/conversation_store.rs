//! Conversation store - conversations, messages and read receipts

use crate::documents::{ConversationDoc, MessageDoc, NewConversation, StoreChange};
use crate::entities::{conversations, message_receipts, messages};
use crate::error::{Result, StoreError};
use crate::StoreConfig;
use chrono::Utc;
use sea_orm::sea_query::OnConflict;
use sea_orm::*;
use sea_orm_migration::MigratorTrait;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicI64, Ordering};
use tokio::sync::broadcast;
use tracing::{debug, info, instrument};

/// Store clock. Every call returns a value strictly greater than the previous one,
/// so messages appended in sequence never share a timestamp.
#[derive(Debug)]
struct ServerClock {
    last: AtomicI64,
}

impl ServerClock {
    fn starting_after(millis: i64) -> Self {
        Self {
            last: AtomicI64::new(millis),
        }
    }

    fn now_millis(&self) -> i64 {
        let wall = Utc::now().timestamp_millis();
        let mut prev = self.last.load(Ordering::Acquire);
        loop {
            let next = wall.max(prev + 1);
            match self
                .last
                .compare_exchange_weak(prev, next, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => return next,
                Err(actual) => prev = actual,
            }
        }
    }
}

/// Conversation store
pub struct ConversationStore {
    pub(crate) db: DatabaseConnection,
    changes: broadcast::Sender<StoreChange>,
    clock: ServerClock,
}

impl ConversationStore {
    /// Create a new conversation store with default config
    pub async fn new(db_path: PathBuf) -> Result<Self> {
        Self::with_config(StoreConfig {
            db_path,
            ..Default::default()
        })
        .await
    }

    /// Create a conversation store with custom config
    pub async fn with_config(config: StoreConfig) -> Result<Self> {
        let db_path_str = config
            .db_path
            .to_str()
            .ok_or(StoreError::InvalidPath)?
            .replace("\\", "/");

        let db_url = format!("sqlite:{}?mode=rwc", db_path_str);

        // A single writer keeps read-modify-write transactions serialized on SQLite
        let mut options = ConnectOptions::new(db_url);
        options
            .max_connections(config.max_connections.max(1))
            .sqlx_logging(false);

        let db = Database::connect(options).await?;

        let store = Self::open(db, config.change_buffer).await?;
        info!("Conversation store initialized at {}", config.db_path.display());
        Ok(store)
    }

    /// Create a conversation store with an existing database connection
    pub async fn with_connection(db: DatabaseConnection) -> Result<Self> {
        let store = Self::open(db, StoreConfig::default().change_buffer).await?;
        info!("Conversation store initialized with existing connection");
        Ok(store)
    }

    async fn open(db: DatabaseConnection, change_buffer: usize) -> Result<Self> {
        crate::migration::Migrator::up(&db, None).await?;

        let newest = messages::Entity::find()
            .order_by_desc(messages::Column::Timestamp)
            .one(&db)
            .await?
            .map(|m| m.timestamp)
            .unwrap_or(0);

        let (changes, _) = broadcast::channel(change_buffer.max(1));

        Ok(Self {
            db,
            changes,
            clock: ServerClock::starting_after(newest),
        })
    }

    /// Subscribe to committed changes
    pub fn changes(&self) -> broadcast::Receiver<StoreChange> {
        self.changes.subscribe()
    }

    /// Number of live change subscribers
    pub fn subscriber_count(&self) -> usize {
        self.changes.receiver_count()
    }

    fn publish(&self, change: StoreChange) {
        // No receivers is not an error: nobody is listening yet
        let _ = self.changes.send(change);
    }

    /// Get a single conversation by ID
    pub async fn get_conversation(&self, id: &str) -> Result<Option<ConversationDoc>> {
        let conv = conversations::Entity::find_by_id(id.to_string())
            .one(&self.db)
            .await?;

        conv.map(model_to_conversation).transpose()
    }

    /// Find the most recently updated conversation between two users, whatever its id scheme
    pub async fn find_by_participants(
        &self,
        user_a: &str,
        user_b: &str,
    ) -> Result<Option<ConversationDoc>> {
        let (first, second) = sorted_pair(user_a, user_b);

        let conv = conversations::Entity::find()
            .filter(conversations::Column::ParticipantA.eq(first))
            .filter(conversations::Column::ParticipantB.eq(second))
            .order_by_desc(conversations::Column::LastUpdated)
            .one(&self.db)
            .await?;

        conv.map(model_to_conversation).transpose()
    }

    /// All conversations that include `user_id`, most recently updated first
    pub async fn conversations_for(&self, user_id: &str) -> Result<Vec<ConversationDoc>> {
        let convs = conversations::Entity::find()
            .filter(
                Condition::any()
                    .add(conversations::Column::ParticipantA.eq(user_id))
                    .add(conversations::Column::ParticipantB.eq(user_id)),
            )
            .order_by_desc(conversations::Column::LastUpdated)
            .order_by_asc(conversations::Column::Id)
            .all(&self.db)
            .await?;

        convs.into_iter().map(model_to_conversation).collect()
    }

    /// Insert a conversation unless one with the same id already exists.
    ///
    /// Returns the conversation id and whether this call created it. Two callers
    /// racing on the same canonical id both succeed and exactly one row is written.
    #[instrument(skip(self, new), fields(initiated_by = %new.initiated_by))]
    pub async fn create_conversation_if_absent(
        &self,
        new: NewConversation,
    ) -> Result<(String, bool)> {
        let [a, b] = &new.participants;
        if a.is_empty() || b.is_empty() {
            return Err(StoreError::InvalidDocument(
                "participant ids must not be empty".to_string(),
            ));
        }
        if a == b {
            return Err(StoreError::InvalidDocument(format!(
                "conversation needs two distinct participants, got {} twice",
                a
            )));
        }

        let (first, second) = sorted_pair(a, b);
        let id = new
            .id
            .clone()
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let now = self.clock.now_millis();

        let model = conversations::ActiveModel {
            id: Set(id.clone()),
            participant_a: Set(first.to_string()),
            participant_b: Set(second.to_string()),
            roles_json: Set(serde_json::to_string(&new.roles)?),
            last_message: Set(None),
            last_message_id: Set(None),
            last_message_read_by: Set(None),
            last_updated: Set(now),
            created_at: Set(now),
            initiated_by: Set(new.initiated_by.clone()),
        };

        let inserted = conversations::Entity::insert(model)
            .on_conflict(
                OnConflict::column(conversations::Column::Id)
                    .do_nothing()
                    .to_owned(),
            )
            .exec_without_returning(&self.db)
            .await?;

        let created = inserted > 0;
        if created {
            info!("Created conversation '{}'", id);
            self.publish(StoreChange::ConversationUpserted {
                conversation_id: id.clone(),
                participants: vec![first.to_string(), second.to_string()],
            });
        } else {
            debug!("Conversation '{}' already exists", id);
        }

        Ok((id, created))
    }

    /// Append a message and refresh the parent's cached last-message fields.
    ///
    /// Both writes commit in one transaction.
    #[instrument(skip(self, text))]
    pub async fn append_message(
        &self,
        conversation_id: &str,
        sender_id: &str,
        text: &str,
    ) -> Result<MessageDoc> {
        let txn = self.db.begin().await?;

        let conv = conversations::Entity::find_by_id(conversation_id.to_string())
            .one(&txn)
            .await?
            .ok_or_else(|| StoreError::ConversationNotFound(conversation_id.to_string()))?;
        require_participant(&conv, sender_id)?;

        let message_id = uuid::Uuid::new_v4().to_string();
        let timestamp = self.clock.now_millis();

        messages::Entity::insert(messages::ActiveModel {
            id: Set(message_id.clone()),
            conversation_id: Set(conversation_id.to_string()),
            sender_id: Set(sender_id.to_string()),
            text: Set(text.to_string()),
            timestamp: Set(timestamp),
        })
        .exec_without_returning(&txn)
        .await?;

        message_receipts::Entity::insert(message_receipts::ActiveModel {
            message_id: Set(message_id.clone()),
            user_id: Set(sender_id.to_string()),
            read_at: Set(timestamp),
        })
        .exec_without_returning(&txn)
        .await?;

        let participants = vec![conv.participant_a.clone(), conv.participant_b.clone()];
        let read_by = vec![sender_id.to_string()];

        let mut active: conversations::ActiveModel = conv.into();
        active.last_message = Set(Some(text.to_string()));
        active.last_message_id = Set(Some(message_id.clone()));
        active.last_message_read_by = Set(Some(serde_json::to_string(&read_by)?));
        active.last_updated = Set(timestamp);
        active.update(&txn).await?;

        txn.commit().await?;

        debug!("Stored message {} in {}", message_id, conversation_id);
        self.publish(StoreChange::MessageAppended {
            conversation_id: conversation_id.to_string(),
            participants,
            message_id: message_id.clone(),
        });

        Ok(MessageDoc {
            id: message_id,
            conversation_id: conversation_id.to_string(),
            sender_id: sender_id.to_string(),
            text: text.to_string(),
            timestamp,
            read_by,
        })
    }

    /// Get a message by ID
    pub async fn message(&self, message_id: &str) -> Result<Option<MessageDoc>> {
        let Some(model) = messages::Entity::find_by_id(message_id.to_string())
            .one(&self.db)
            .await?
        else {
            return Ok(None);
        };

        let mut readers = self.readers_for(&[model.id.clone()]).await?;
        let read_by = readers.remove(&model.id).unwrap_or_default();
        Ok(Some(model_to_message(model, read_by)))
    }

    /// The most recent message of a conversation
    pub async fn latest_message(&self, conversation_id: &str) -> Result<Option<MessageDoc>> {
        let Some(model) = messages::Entity::find()
            .filter(messages::Column::ConversationId.eq(conversation_id))
            .order_by_desc(messages::Column::Timestamp)
            .order_by_desc(messages::Column::Id)
            .one(&self.db)
            .await?
        else {
            return Ok(None);
        };

        let mut readers = self.readers_for(&[model.id.clone()]).await?;
        let read_by = readers.remove(&model.id).unwrap_or_default();
        Ok(Some(model_to_message(model, read_by)))
    }

    /// All messages of a conversation, oldest first
    pub async fn messages(&self, conversation_id: &str) -> Result<Vec<MessageDoc>> {
        if conversations::Entity::find_by_id(conversation_id.to_string())
            .one(&self.db)
            .await?
            .is_none()
        {
            return Err(StoreError::ConversationNotFound(conversation_id.to_string()));
        }

        let models = messages::Entity::find()
            .filter(messages::Column::ConversationId.eq(conversation_id))
            .order_by_asc(messages::Column::Timestamp)
            .order_by_asc(messages::Column::Id)
            .all(&self.db)
            .await?;

        let ids: Vec<String> = models.iter().map(|m| m.id.clone()).collect();
        let mut readers = self.readers_for(&ids).await?;

        Ok(models
            .into_iter()
            .map(|m| {
                let read_by = readers.remove(&m.id).unwrap_or_default();
                model_to_message(m, read_by)
            })
            .collect())
    }

    /// Record that `user_id` has read a message.
    ///
    /// Receipts are a set: repeated calls are no-ops. When the message is the
    /// latest in its conversation the reader is also added to the conversation's
    /// `last_message_read_by`. Returns whether anything changed.
    #[instrument(skip(self))]
    pub async fn mark_read(
        &self,
        conversation_id: &str,
        message_id: &str,
        user_id: &str,
    ) -> Result<bool> {
        let txn = self.db.begin().await?;

        let conv = conversations::Entity::find_by_id(conversation_id.to_string())
            .one(&txn)
            .await?
            .ok_or_else(|| StoreError::ConversationNotFound(conversation_id.to_string()))?;
        require_participant(&conv, user_id)?;

        let message = messages::Entity::find_by_id(message_id.to_string())
            .filter(messages::Column::ConversationId.eq(conversation_id))
            .one(&txn)
            .await?
            .ok_or_else(|| StoreError::MessageNotFound {
                conversation_id: conversation_id.to_string(),
                message_id: message_id.to_string(),
            })?;

        let inserted = message_receipts::Entity::insert(message_receipts::ActiveModel {
            message_id: Set(message.id.clone()),
            user_id: Set(user_id.to_string()),
            read_at: Set(self.clock.now_millis()),
        })
        .on_conflict(
            OnConflict::columns([
                message_receipts::Column::MessageId,
                message_receipts::Column::UserId,
            ])
            .do_nothing()
            .to_owned(),
        )
        .exec_without_returning(&txn)
        .await?;

        let latest_id = messages::Entity::find()
            .filter(messages::Column::ConversationId.eq(conversation_id))
            .order_by_desc(messages::Column::Timestamp)
            .order_by_desc(messages::Column::Id)
            .one(&txn)
            .await?
            .map(|m| m.id);

        let participants = vec![conv.participant_a.clone(), conv.participant_b.clone()];
        let mut conversation_changed = false;

        if latest_id.as_deref() == Some(message_id) {
            let mut read_by = parse_ids(conv.last_message_read_by.as_deref())?.unwrap_or_default();
            if !read_by.iter().any(|id| id == user_id) {
                read_by.push(user_id.to_string());
                let mut active: conversations::ActiveModel = conv.into();
                active.last_message_read_by = Set(Some(serde_json::to_string(&read_by)?));
                active.update(&txn).await?;
                conversation_changed = true;
            }
        }

        txn.commit().await?;

        let changed = inserted > 0 || conversation_changed;
        if changed {
            debug!("Marked message {} as read by {}", message_id, user_id);
            self.publish(StoreChange::MessageRead {
                conversation_id: conversation_id.to_string(),
                participants,
                message_id: message_id.to_string(),
                user_id: user_id.to_string(),
            });
        }

        Ok(changed)
    }

    /// Number of conversations in the store
    pub async fn conversation_count(&self) -> Result<u64> {
        Ok(conversations::Entity::find().count(&self.db).await?)
    }

    async fn readers_for(&self, message_ids: &[String]) -> Result<HashMap<String, Vec<String>>> {
        if message_ids.is_empty() {
            return Ok(HashMap::new());
        }

        let receipts = message_receipts::Entity::find()
            .filter(message_receipts::Column::MessageId.is_in(message_ids.iter().cloned()))
            .order_by_asc(message_receipts::Column::ReadAt)
            .order_by_asc(message_receipts::Column::UserId)
            .all(&self.db)
            .await?;

        let mut readers: HashMap<String, Vec<String>> = HashMap::new();
        for receipt in receipts {
            readers
                .entry(receipt.message_id)
                .or_default()
                .push(receipt.user_id);
        }
        Ok(readers)
    }
}

fn require_participant(conv: &conversations::Model, user_id: &str) -> Result<()> {
    if conv.participant_a == user_id || conv.participant_b == user_id {
        return Ok(());
    }
    Err(StoreError::NotParticipant {
        conversation_id: conv.id.clone(),
        user_id: user_id.to_string(),
    })
}

fn sorted_pair<'a>(a: &'a str, b: &'a str) -> (&'a str, &'a str) {
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}

fn parse_ids(json: Option<&str>) -> Result<Option<Vec<String>>> {
    json.map(serde_json::from_str::<Vec<String>>)
        .transpose()
        .map_err(StoreError::from)
}

/// Convert Sea-ORM model to ConversationDoc
fn model_to_conversation(model: conversations::Model) -> Result<ConversationDoc> {
    Ok(ConversationDoc {
        participants: vec![model.participant_a, model.participant_b],
        roles: serde_json::from_str(&model.roles_json)?,
        last_message_read_by: parse_ids(model.last_message_read_by.as_deref())?,
        id: model.id,
        last_message: model.last_message,
        last_message_id: model.last_message_id,
        last_updated: model.last_updated,
        created_at: model.created_at,
        initiated_by: model.initiated_by,
    })
}

fn model_to_message(model: messages::Model, read_by: Vec<String>) -> MessageDoc {
    MessageDoc {
        id: model.id,
        conversation_id: model.conversation_id,
        sender_id: model.sender_id,
        text: model.text,
        timestamp: model.timestamp,
        read_by,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clock_is_strictly_increasing() {
        let clock = ServerClock::starting_after(0);
        let mut prev = clock.now_millis();
        for _ in 0..1000 {
            let next = clock.now_millis();
            assert!(next > prev);
            prev = next;
        }
    }

    #[test]
    fn test_clock_resumes_after_seed() {
        let far_future = Utc::now().timestamp_millis() + 60_000;
        let clock = ServerClock::starting_after(far_future);
        assert_eq!(clock.now_millis(), far_future + 1);
    }

    #[test]
    fn test_sorted_pair() {
        assert_eq!(sorted_pair("u2", "u1"), ("u1", "u2"));
        assert_eq!(sorted_pair("u1", "u2"), ("u1", "u2"));
    }
}
