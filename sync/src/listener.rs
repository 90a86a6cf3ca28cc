//! Forwarding of change-feed events to a session.

use crate::backend::{ChangeFeed, FeedFilter};
use crate::error::Result;
use async_trait::async_trait;
use std::sync::{Arc, Weak};
use tokio::task::JoinHandle;
use tote_engine::ChangeEvent;

/// Receiver of remote change notifications.
#[async_trait]
pub trait ChangeTarget: Send + Sync {
    async fn on_remote_change(&self, event: ChangeEvent);
}

/// A live change-feed subscription bound to one target.
///
/// The listener holds its target weakly, so a session that owns its listener
/// can still be dropped. Stopping or dropping the listener unsubscribes.
pub struct RealtimeListener {
    feed: Arc<dyn ChangeFeed>,
    subscription_id: Option<String>,
    task: Option<JoinHandle<()>>,
}

impl RealtimeListener {
    pub async fn spawn<T>(
        feed: Arc<dyn ChangeFeed>,
        filter: FeedFilter,
        target: Weak<T>,
    ) -> Result<Self>
    where
        T: ChangeTarget + 'static,
    {
        let table = filter.table;
        let owner = filter.owner_id.clone();
        let mut subscription = feed.subscribe(filter).await?;
        let subscription_id = subscription.id.clone();
        tracing::info!(%table, %owner, subscription = %subscription_id, "Listening for remote changes");

        let task = tokio::spawn(async move {
            while let Some(event) = subscription.events.recv().await {
                let Some(target) = target.upgrade() else {
                    break;
                };
                tracing::debug!(table = %event.table, kind = ?event.kind, "Remote change");
                target.on_remote_change(event).await;
            }
        });

        Ok(Self {
            feed,
            subscription_id: Some(subscription_id),
            task: Some(task),
        })
    }

    pub fn subscription_id(&self) -> Option<&str> {
        self.subscription_id.as_deref()
    }

    /// Unsubscribe and stop forwarding.
    pub async fn stop(mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
        if let Some(id) = self.subscription_id.take() {
            if let Err(e) = self.feed.unsubscribe(&id).await {
                tracing::warn!(subscription = %id, error = %e, "Failed to unsubscribe");
            } else {
                tracing::info!(subscription = %id, "Stopped listening for remote changes");
            }
        }
    }
}

impl Drop for RealtimeListener {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
        let Some(id) = self.subscription_id.take() else {
            return;
        };
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                let feed = Arc::clone(&self.feed);
                runtime.spawn(async move {
                    if let Err(e) = feed.unsubscribe(&id).await {
                        tracing::warn!(subscription = %id, error = %e, "Failed to unsubscribe");
                    }
                });
            }
            Err(_) => {
                tracing::warn!(subscription = %id, "Listener dropped outside a runtime");
            }
        }
    }
}

impl std::fmt::Debug for RealtimeListener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RealtimeListener")
            .field("subscription_id", &self.subscription_id)
            .finish()
    }
}
