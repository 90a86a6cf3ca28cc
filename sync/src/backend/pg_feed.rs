//! Change feed over PostgreSQL `LISTEN/NOTIFY`.
//!
//! Table triggers publish a JSON payload on [`NOTIFY_CHANNEL`] for every
//! insert, update and delete. One listener connection receives them and fans
//! them out to subscriptions through a [`FeedHub`].

use super::{ChangeFeed, FeedFilter, FeedHub, Subscription};
use crate::error::Result;
use async_trait::async_trait;
use sqlx::postgres::PgListener;
use sqlx::PgPool;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tote_engine::ChangeEvent;

/// Notification channel the table triggers publish on.
pub const NOTIFY_CHANNEL: &str = "tote_changes";

/// Pause before retrying after a listener error.
const RETRY_DELAY: Duration = Duration::from_secs(1);

/// Realtime feed driven by a dedicated listener connection.
#[derive(Debug)]
pub struct PgFeed {
    hub: Arc<FeedHub>,
    task: JoinHandle<()>,
}

impl PgFeed {
    /// Connect a listener and start forwarding notifications.
    pub async fn start(pool: &PgPool) -> Result<Self> {
        let mut listener = PgListener::connect_with(pool).await?;
        listener.listen(NOTIFY_CHANNEL).await?;
        tracing::info!(channel = NOTIFY_CHANNEL, "Listening for remote changes");

        let hub = Arc::new(FeedHub::new());
        let task = tokio::spawn(forward(listener, hub.clone()));

        Ok(Self { hub, task })
    }

    pub fn hub(&self) -> Arc<FeedHub> {
        self.hub.clone()
    }
}

async fn forward(mut listener: PgListener, hub: Arc<FeedHub>) {
    loop {
        match listener.recv().await {
            Ok(notification) => match serde_json::from_str::<ChangeEvent>(notification.payload()) {
                Ok(event) => {
                    hub.publish(&event);
                }
                Err(e) => {
                    tracing::warn!(payload = notification.payload(), error = %e, "Ignoring malformed change notification");
                }
            },
            Err(e) => {
                // PgListener reconnects on the next recv
                tracing::warn!(error = %e, "Change listener error");
                tokio::time::sleep(RETRY_DELAY).await;
            }
        }
    }
}

impl Drop for PgFeed {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[async_trait]
impl ChangeFeed for PgFeed {
    async fn subscribe(&self, filter: FeedFilter) -> Result<Subscription> {
        Ok(self.hub.register(filter))
    }

    async fn unsubscribe(&self, subscription_id: &str) -> Result<()> {
        self.hub.unregister(subscription_id);
        Ok(())
    }
}
