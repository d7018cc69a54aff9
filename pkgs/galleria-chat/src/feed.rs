//! Live feeds: a query re-run every time the store publishes a relevant change
//!
//! A [`LiveFeed`] is the subscription handle. It yields an initial snapshot and
//! then one fresh snapshot per relevant change. Dropping the handle (or calling
//! [`LiveFeed::unsubscribe`]) stops the background task.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use futures::Stream;
use galleria_store::StoreChange;
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, warn};

use crate::error::Result;

/// One emission of a live feed
#[derive(Debug, Clone, PartialEq)]
pub struct FeedEvent<T> {
    /// Position in this feed's arrival order, starting at 1
    pub revision: u64,
    pub value: T,
}

/// Owned handle to a running feed
pub struct LiveFeed<T> {
    rx: mpsc::Receiver<Result<FeedEvent<T>>>,
    _guard: DropGuard,
}

impl<T: Send + 'static> LiveFeed<T> {
    /// Start a feed.
    ///
    /// `changes` must be subscribed before the first `load` so nothing committed
    /// between the snapshot and the listen is missed. Every repository builds
    /// its feeds through here.
    pub fn spawn<R, L, Fut>(
        capacity: usize,
        mut changes: broadcast::Receiver<StoreChange>,
        relevant: R,
        load: L,
    ) -> Self
    where
        R: Fn(&StoreChange) -> bool + Send + Sync + 'static,
        L: Fn() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T>> + Send,
    {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let token = CancellationToken::new();
        let cancelled = token.clone();

        tokio::spawn(async move {
            let mut revision = 0u64;

            loop {
                let event = tokio::select! {
                    _ = cancelled.cancelled() => break,
                    loaded = load() => {
                        revision += 1;
                        loaded.map(|value| FeedEvent { revision, value })
                    }
                };

                tokio::select! {
                    _ = cancelled.cancelled() => break,
                    sent = tx.send(event) => {
                        if sent.is_err() {
                            break;
                        }
                    }
                }

                if !wait_for_change(&mut changes, &relevant, &cancelled).await {
                    break;
                }
            }

            debug!("Live feed stopped after {} emissions", revision);
        });

        Self {
            rx,
            _guard: token.drop_guard(),
        }
    }
}

impl<T> LiveFeed<T> {
    /// Next emission, or `None` once the feed has stopped
    pub async fn next_event(&mut self) -> Option<Result<FeedEvent<T>>> {
        self.rx.recv().await
    }

    /// Stop the feed. Equivalent to dropping the handle.
    pub fn unsubscribe(self) {}
}

impl<T> Stream for LiveFeed<T> {
    type Item = Result<FeedEvent<T>>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().rx.poll_recv(cx)
    }
}

/// Wait until a relevant change arrives, then drain whatever else is already queued
/// so a burst of writes costs one reload. Returns `false` when the feed should stop.
async fn wait_for_change<R>(
    changes: &mut broadcast::Receiver<StoreChange>,
    relevant: &R,
    cancelled: &CancellationToken,
) -> bool
where
    R: Fn(&StoreChange) -> bool,
{
    loop {
        let received = tokio::select! {
            _ = cancelled.cancelled() => return false,
            received = changes.recv() => received,
        };

        match received {
            Ok(change) if relevant(&change) => break,
            Ok(_) => continue,
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!("Live feed lagged behind by {} changes, reloading", skipped);
                break;
            }
            Err(broadcast::error::RecvError::Closed) => return false,
        }
    }

    loop {
        match changes.try_recv() {
            Ok(_) | Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
            Err(broadcast::error::TryRecvError::Empty) => return true,
            Err(broadcast::error::TryRecvError::Closed) => return false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn appended(conversation_id: &str) -> StoreChange {
        StoreChange::MessageAppended {
            conversation_id: conversation_id.to_string(),
            participants: vec!["u1".to_string(), "u2".to_string()],
            message_id: "m".to_string(),
        }
    }

    #[tokio::test]
    async fn test_feed_reloads_only_on_relevant_changes() {
        let (tx, rx) = broadcast::channel(16);
        let loads = Arc::new(AtomicUsize::new(0));
        let counter = loads.clone();

        let mut feed = LiveFeed::spawn(
            4,
            rx,
            |change| change.conversation_id() == "a",
            move || {
                let counter = counter.clone();
                async move { Ok(counter.fetch_add(1, Ordering::SeqCst) + 1) }
            },
        );

        let first = feed.next_event().await.unwrap().unwrap();
        assert_eq!(first, FeedEvent { revision: 1, value: 1 });

        tx.send(appended("b")).unwrap();
        tx.send(appended("a")).unwrap();

        let second = feed.next_event().await.unwrap().unwrap();
        assert_eq!(second.revision, 2);
        assert_eq!(loads.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_dropping_feed_stops_producer() {
        let (tx, rx) = broadcast::channel(16);

        let mut feed = LiveFeed::spawn(4, rx, |_| true, || async { Ok(()) });
        feed.next_event().await.unwrap().unwrap();
        assert_eq!(tx.receiver_count(), 1);

        feed.unsubscribe();

        tokio::time::timeout(std::time::Duration::from_secs(2), async {
            while tx.receiver_count() > 0 {
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("feed task did not stop");
    }
}
