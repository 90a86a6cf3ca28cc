//! In-process change feed fan-out.
//!
//! Tracks active subscriptions and delivers each change event to every
//! subscription whose filter matches it.

use super::{ChangeFeed, FeedFilter, Subscription};
use crate::error::Result;
use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::mpsc;
use tote_engine::{ChangeEvent, OwnerId};

/// Sender for change events.
type EventSender = mpsc::UnboundedSender<ChangeEvent>;

#[derive(Debug)]
struct Subscriber {
    filter: FeedFilter,
    sender: EventSender,
}

/// Thread-safe subscription registry, shareable via `Arc`.
#[derive(Debug, Default)]
pub struct FeedHub {
    subscribers: DashMap<String, Subscriber>,
    /// Index of subscription ids by owner for efficient delivery.
    by_owner: DashMap<OwnerId, Vec<String>>,
}

impl FeedHub {
    pub fn new() -> Self {
        Self {
            subscribers: DashMap::new(),
            by_owner: DashMap::new(),
        }
    }

    /// Register a subscription and return it.
    pub fn register(&self, filter: FeedFilter) -> Subscription {
        let id = uuid::Uuid::new_v4().to_string();
        let (sender, events) = mpsc::unbounded_channel();

        self.by_owner
            .entry(filter.owner_id.clone())
            .or_default()
            .push(id.clone());

        tracing::debug!(subscription = %id, table = %filter.table, owner = %filter.owner_id, "Change feed subscription registered");
        self.subscribers
            .insert(id.clone(), Subscriber { filter, sender });

        Subscription { id, events }
    }

    /// Remove a subscription.
    pub fn unregister(&self, subscription_id: &str) {
        if let Some((_, sub)) = self.subscribers.remove(subscription_id) {
            if let Some(mut ids) = self.by_owner.get_mut(&sub.filter.owner_id) {
                ids.retain(|id| id != subscription_id);
                if ids.is_empty() {
                    drop(ids);
                    self.by_owner.remove(&sub.filter.owner_id);
                }
            }
            tracing::debug!(subscription = %subscription_id, "Change feed subscription removed");
        }
    }

    /// Deliver an event to matching subscriptions.
    ///
    /// Returns the number of subscriptions that received it.
    pub fn publish(&self, event: &ChangeEvent) -> usize {
        let ids = match self.by_owner.get(&event.owner_id) {
            Some(ids) => ids.clone(),
            None => return 0,
        };

        let mut delivered = 0;
        for id in ids {
            if let Some(sub) = self.subscribers.get(&id) {
                if sub.filter.matches(event) && sub.sender.send(event.clone()).is_ok() {
                    delivered += 1;
                }
            }
        }

        tracing::trace!(table = %event.table, owner = %event.owner_id, delivered, "Published change event");
        delivered
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }
}

#[async_trait]
impl ChangeFeed for FeedHub {
    async fn subscribe(&self, filter: FeedFilter) -> Result<Subscription> {
        Ok(self.register(filter))
    }

    async fn unsubscribe(&self, subscription_id: &str) -> Result<()> {
        self.unregister(subscription_id);
        Ok(())
    }
}
