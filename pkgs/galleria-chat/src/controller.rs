//! Chat view-state controller
//!
//! Holds everything a chat screen renders in one [`ChatState`] published over a
//! `tokio::sync::watch` channel. Two live feeds update it: the current user's
//! conversation list, and the messages of the open conversation. Each feed is
//! forwarded by its own task, and a feed is always shut down before its
//! replacement starts.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;

use chrono::Utc;
use futures::future::join_all;
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, error, info, warn};

use crate::collaborators::{IdentityProvider, NotificationSink};
use crate::config::ChatConfig;
use crate::error::{ChatError, Result};
use crate::feed::LiveFeed;
use crate::model::{Conversation, ConversationSummary, Message, StartedConversation};
use crate::repository::ConversationRepository;
use crate::service::{has_unread, unread_count_for, validate_text, ConversationService};

/// Conversation list subscription status
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ListStatus {
    #[default]
    Unsubscribed,
    Subscribing,
    Live,
    /// The feed could not produce a list. Calling `start` again retries.
    Failed,
}

/// Everything a chat screen needs to render
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChatState {
    pub list_status: ListStatus,
    /// Most recently updated first
    pub conversations: Vec<Conversation>,
    /// Revision of the list feed emission `conversations` came from
    pub conversations_revision: u64,
    pub unread_count: usize,
    pub active_conversation: Option<Conversation>,
    /// Messages of the active conversation, oldest first
    pub messages: Vec<Message>,
    pub loading: bool,
    pub last_error: Option<ChatError>,
}

/// A feed forwarding task. Dropping it cancels the task.
struct FeedTask {
    guard: DropGuard,
    handle: JoinHandle<()>,
}

impl FeedTask {
    fn spawn<F, Fut>(run: F) -> Self
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let token = CancellationToken::new();
        let handle = tokio::spawn(run(token.clone()));
        Self {
            guard: token.drop_guard(),
            handle,
        }
    }

    /// Cancel and wait until the task has stopped writing state
    async fn shutdown(self) {
        self.guard.disarm().cancel();
        if let Err(e) = self.handle.await {
            if e.is_panic() {
                error!("Feed task panicked: {}", e);
            }
        }
    }
}

/// Chat view-state controller
pub struct ChatController<R: ConversationRepository> {
    service: Arc<ConversationService<R>>,
    identity: Arc<dyn IdentityProvider>,
    notifications: Arc<dyn NotificationSink>,
    config: ChatConfig,
    state: Arc<watch::Sender<ChatState>>,
    current_user: Option<String>,
    list_task: Option<FeedTask>,
    message_task: Option<FeedTask>,
    /// (message id, reader) pairs with a receipt requested or written
    requested_reads: Mutex<HashSet<(String, String)>>,
}

impl<R: ConversationRepository> ChatController<R> {
    pub fn new(
        service: Arc<ConversationService<R>>,
        identity: Arc<dyn IdentityProvider>,
        notifications: Arc<dyn NotificationSink>,
        config: ChatConfig,
    ) -> Self {
        let (state, _) = watch::channel(ChatState::default());

        Self {
            service,
            identity,
            notifications,
            config,
            state: Arc::new(state),
            current_user: None,
            list_task: None,
            message_task: None,
            requested_reads: Mutex::new(HashSet::new()),
        }
    }

    /// Snapshot of the current state
    pub fn state(&self) -> ChatState {
        self.state.borrow().clone()
    }

    /// Receiver that is notified on every state change
    pub fn watch(&self) -> watch::Receiver<ChatState> {
        self.state.subscribe()
    }

    pub fn unread_count(&self) -> usize {
        self.state.borrow().unread_count
    }

    pub fn current_user(&self) -> Option<&str> {
        self.current_user.as_deref()
    }

    pub fn service(&self) -> &Arc<ConversationService<R>> {
        &self.service
    }

    /// Subscribe to the signed-in user's conversation list, replacing any
    /// previous subscription
    pub async fn start(&mut self) -> Result<()> {
        let Some(user) = self.identity.current_user() else {
            self.stop().await;
            return self.fail(ChatError::Unauthenticated);
        };

        if let Some(task) = self.list_task.take() {
            task.shutdown().await;
        }
        if self.current_user.as_deref() != Some(user.as_str()) {
            if let Some(task) = self.message_task.take() {
                task.shutdown().await;
            }
            self.requested_reads.lock().clear();
            self.state.send_modify(|state| {
                state.active_conversation = None;
                state.messages.clear();
            });
        }

        info!("Subscribing to conversations of {}", user);
        self.state.send_modify(|state| {
            state.list_status = ListStatus::Subscribing;
            state.conversations.clear();
            state.conversations_revision = 0;
            state.unread_count = 0;
            state.loading = true;
            state.last_error = None;
        });

        let feed = self.service.repository().subscribe_conversations(&user);
        let forwarder = ListForwarder {
            service: self.service.clone(),
            state: self.state.clone(),
            notifications: self
                .config
                .notify_new_messages
                .then(|| self.notifications.clone()),
            user: user.clone(),
        };

        self.list_task = Some(FeedTask::spawn(move |token| forwarder.run(feed, token)));
        self.current_user = Some(user);
        Ok(())
    }

    /// Make `conversation` the active one and follow its messages
    pub async fn open_conversation(&mut self, conversation: Conversation) -> Result<()> {
        if let Some(task) = self.message_task.take() {
            task.shutdown().await;
        }

        let conversation_id = conversation.id.clone();
        debug!("Opening conversation '{}'", conversation_id);

        self.requested_reads.lock().clear();
        self.state.send_modify(|state| {
            state.active_conversation = Some(conversation);
            state.messages.clear();
            state.loading = true;
        });

        let feed = self.service.repository().subscribe_messages(&conversation_id);
        let state = self.state.clone();
        self.message_task = Some(FeedTask::spawn(move |token| {
            forward_messages(feed, state, conversation_id, token)
        }));
        Ok(())
    }

    /// Leave the active conversation. The list feed keeps running.
    pub async fn close_conversation(&mut self) {
        if let Some(task) = self.message_task.take() {
            task.shutdown().await;
        }

        self.state.send_modify(|state| {
            state.active_conversation = None;
            state.messages.clear();
            state.loading = false;
        });
    }

    /// Send a message to the active conversation.
    ///
    /// The list entry is patched right away. If the write fails the patch is
    /// rolled back, unless a newer list emission has replaced it already.
    pub async fn send(&self, text: &str) -> Result<Message> {
        let Some(user) = self.current_user.clone() else {
            return self.fail(ChatError::Unauthenticated);
        };
        let text = match validate_text(text) {
            Ok(text) => text,
            Err(e) => return self.fail(e),
        };
        let active_id = self
            .state
            .borrow()
            .active_conversation
            .as_ref()
            .map(|c| c.id.clone());
        let Some(active_id) = active_id else {
            return self.fail(ChatError::validation("no conversation is open"));
        };

        let mut previous: Option<Conversation> = None;
        let mut patched_revision = 0;
        self.state.send_modify(|state| {
            patched_revision = state.conversations_revision;
            if let Some(entry) = state.conversations.iter_mut().find(|c| c.id == active_id) {
                previous = Some(entry.clone());
                entry.last_message = Some(text.to_string());
                entry.last_message_read_by = Some(vec![user.clone()]);
                entry.last_updated = Utc::now();
                sort_conversations(&mut state.conversations);
                state.unread_count = unread_count_for(&user, &state.conversations);
            }
        });

        match self.service.send_message(&active_id, &user, text).await {
            Ok(message) => Ok(message),
            Err(err) => {
                warn!("Failed to send message to '{}': {}", active_id, err);
                self.state.send_modify(|state| {
                    if let Some(previous) = previous {
                        if state.conversations_revision == patched_revision {
                            if let Some(entry) =
                                state.conversations.iter_mut().find(|c| c.id == previous.id)
                            {
                                *entry = previous;
                            }
                            sort_conversations(&mut state.conversations);
                            state.unread_count = unread_count_for(&user, &state.conversations);
                        }
                    }
                    state.last_error = Some(err.clone());
                });
                Err(err)
            }
        }
    }

    /// Write a read receipt for every message of the active conversation that
    /// `user_id` has not read yet. Returns the number of receipts written.
    pub async fn mark_visible_messages_read(&self, user_id: &str) -> Result<usize> {
        let (conversation_id, pending) = {
            let state = self.state.borrow();
            let Some(active) = state.active_conversation.as_ref() else {
                return Ok(0);
            };

            let mut requested = self.requested_reads.lock();
            let pending: Vec<String> = state
                .messages
                .iter()
                .filter(|message| !message.is_read_by(user_id))
                .filter(|message| requested.insert((message.id.clone(), user_id.to_string())))
                .map(|message| message.id.clone())
                .collect();

            (active.id.clone(), pending)
        };

        if pending.is_empty() {
            return Ok(0);
        }
        debug!(
            "Marking {} messages in '{}' read by {}",
            pending.len(),
            conversation_id,
            user_id
        );

        let results = join_all(pending.iter().map(|message_id| {
            self.service
                .mark_read(&conversation_id, message_id, user_id)
        }))
        .await;

        let mut written = 0;
        let mut first_error = None;
        for (message_id, result) in pending.into_iter().zip(results) {
            match result {
                Ok(()) => written += 1,
                Err(err) => {
                    // Forget the request so the next call retries it
                    self.requested_reads
                        .lock()
                        .remove(&(message_id, user_id.to_string()));
                    first_error.get_or_insert(err);
                }
            }
        }

        match first_error {
            Some(err) => self.fail(err),
            None => Ok(written),
        }
    }

    /// Start or resume a conversation with `other_user` as the signed-in user.
    /// Conversations already in the list are reused without a store lookup.
    pub async fn start_conversation(&self, other_user: &str) -> Result<StartedConversation> {
        let Some(user) = self.current_user.clone() else {
            return self.fail(ChatError::Unauthenticated);
        };

        let result = async {
            let welcome_sender = if self.config.welcome_from_admin {
                self.service.admin_welcome_sender(&user, other_user).await?
            } else {
                None
            };
            let known = self.state.borrow().conversations.clone();

            self.service
                .start_conversation(
                    &user,
                    other_user,
                    &self.config.welcome_text,
                    welcome_sender.as_deref(),
                    &known,
                )
                .await
        }
        .await;

        match result {
            Ok(started) => Ok(started),
            Err(err) => self.fail(err),
        }
    }

    /// Tear down both feeds and reset the state
    pub async fn stop(&mut self) {
        if let Some(task) = self.message_task.take() {
            task.shutdown().await;
        }
        if let Some(task) = self.list_task.take() {
            task.shutdown().await;
        }

        self.current_user = None;
        self.requested_reads.lock().clear();
        self.state.send_replace(ChatState::default());
        debug!("Chat controller stopped");
    }

    fn fail<T>(&self, err: ChatError) -> Result<T> {
        warn!("Chat operation failed: {}", err);
        self.state
            .send_modify(|state| state.last_error = Some(err.clone()));
        Err(err)
    }
}

fn sort_conversations(conversations: &mut [Conversation]) {
    conversations.sort_by(|a, b| {
        b.last_updated
            .cmp(&a.last_updated)
            .then_with(|| a.id.cmp(&b.id))
    });
}

/// Moves conversation list emissions into the state and raises alerts
struct ListForwarder<R: ConversationRepository> {
    service: Arc<ConversationService<R>>,
    state: Arc<watch::Sender<ChatState>>,
    notifications: Option<Arc<dyn NotificationSink>>,
    user: String,
}

impl<R: ConversationRepository> ListForwarder<R> {
    async fn run(self, mut feed: LiveFeed<Vec<Conversation>>, token: CancellationToken) {
        // last_message_id per conversation as of the previous emission
        let mut baseline: Option<HashMap<String, Option<String>>> = None;

        loop {
            let next = tokio::select! {
                _ = token.cancelled() => break,
                next = feed.next_event() => next,
            };

            let event = match next {
                Some(Ok(event)) => event,
                Some(Err(err)) => {
                    error!("Conversation list for {} failed: {}", self.user, err);
                    self.state.send_modify(|state| {
                        if state.list_status != ListStatus::Live {
                            state.list_status = ListStatus::Failed;
                        }
                        state.loading = false;
                        state.last_error = Some(err);
                    });
                    continue;
                }
                None => {
                    warn!("Conversation list feed for {} closed", self.user);
                    self.state.send_modify(|state| {
                        state.list_status = ListStatus::Failed;
                        state.loading = false;
                        state.last_error = Some(ChatError::SubscriptionClosed);
                    });
                    break;
                }
            };

            let conversations = event.value;
            let unread_count = unread_count_for(&self.user, &conversations);
            let active_id = self
                .state
                .borrow()
                .active_conversation
                .as_ref()
                .map(|c| c.id.clone());

            let arrived: Vec<Conversation> = match &baseline {
                None => Vec::new(),
                Some(previous) => conversations
                    .iter()
                    .filter(|c| c.last_message_id.is_some())
                    .filter(|c| previous.get(&c.id) != Some(&c.last_message_id))
                    .filter(|c| has_unread(&self.user, c))
                    .filter(|c| active_id.as_deref() != Some(c.id.as_str()))
                    .cloned()
                    .collect(),
            };
            baseline = Some(
                conversations
                    .iter()
                    .map(|c| (c.id.clone(), c.last_message_id.clone()))
                    .collect(),
            );

            self.state.send_modify(|state| {
                if let Some(active) = state.active_conversation.as_mut() {
                    if let Some(fresh) = conversations.iter().find(|c| c.id == active.id) {
                        *active = fresh.clone();
                    }
                }
                state.conversations = conversations;
                state.conversations_revision = event.revision;
                state.unread_count = unread_count;
                state.list_status = ListStatus::Live;
                if state.active_conversation.is_none() {
                    state.loading = false;
                }
            });

            if let Some(sink) = &self.notifications {
                for conversation in arrived {
                    sink.on_new_unread_message(self.summary(conversation, unread_count).await);
                }
            }
        }

        debug!("Conversation list forwarding for {} stopped", self.user);
    }

    async fn summary(
        &self,
        conversation: Conversation,
        unread_count: usize,
    ) -> ConversationSummary {
        let from_id = conversation.other_participant(&self.user).map(str::to_string);
        let from_name = match &from_id {
            Some(id) => self.service.participant(id).await.ok().map(|p| p.name),
            None => None,
        };

        ConversationSummary {
            conversation_id: conversation.id,
            from_id,
            from_name,
            last_message: conversation.last_message,
            last_updated: conversation.last_updated,
            unread_count,
        }
    }
}

async fn forward_messages(
    mut feed: LiveFeed<Vec<Message>>,
    state: Arc<watch::Sender<ChatState>>,
    conversation_id: String,
    token: CancellationToken,
) {
    loop {
        let next = tokio::select! {
            _ = token.cancelled() => break,
            next = feed.next_event() => next,
        };

        let update = match next {
            Some(Ok(event)) => Ok(event.value),
            Some(Err(err)) => {
                error!("Message feed for '{}' failed: {}", conversation_id, err);
                Err(err)
            }
            None => {
                warn!("Message feed for '{}' closed", conversation_id);
                Err(ChatError::SubscriptionClosed)
            }
        };
        let closed = matches!(update, Err(ChatError::SubscriptionClosed));

        // Late emissions for a conversation that is no longer open are dropped
        state.send_if_modified(|state| {
            let is_active = state
                .active_conversation
                .as_ref()
                .is_some_and(|c| c.id == conversation_id);
            if !is_active {
                return false;
            }

            match update {
                Ok(messages) => state.messages = messages,
                Err(err) => state.last_error = Some(err),
            }
            state.loading = false;
            true
        });

        if closed {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    fn conversation(id: &str, minutes_ago: i64) -> Conversation {
        let at = Utc::now() - Duration::minutes(minutes_ago);
        Conversation {
            id: id.to_string(),
            participants: vec!["u1".to_string(), "u2".to_string()],
            roles: vec![],
            last_message: None,
            last_message_id: None,
            last_message_read_by: None,
            created_at: at,
            last_updated: at,
            initiated_by: "u1".to_string(),
        }
    }

    #[test]
    fn test_sort_newest_first() {
        let mut list = vec![
            conversation("old", 30),
            conversation("new", 1),
            conversation("mid", 10),
        ];
        sort_conversations(&mut list);

        let ids: Vec<&str> = list.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["new", "mid", "old"]);
    }

    #[tokio::test]
    async fn test_feed_task_shutdown_waits_for_task() {
        let (tx, mut rx) = tokio::sync::mpsc::channel::<&'static str>(1);

        let task = FeedTask::spawn(move |token| async move {
            token.cancelled().await;
            let _ = tx.send("stopped").await;
        });
        task.shutdown().await;

        assert_eq!(rx.recv().await, Some("stopped"));
    }
}
