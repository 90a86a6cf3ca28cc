//! Remote collaborators of the reconciliation layer.
//!
//! The managed backend is reached through three capability traits:
//! - [`RemoteCollection`] - list/upsert/delete over cart and favorite rows
//! - [`CatalogLookup`] - product data used to hydrate cart rows
//! - [`ChangeFeed`] - push notifications of remote mutations

mod feed;
mod memory;
mod pg_feed;
mod postgres;

pub use feed::FeedHub;
pub use memory::{BackendCall, MemoryBackend};
pub use pg_feed::{PgFeed, NOTIFY_CHANNEL};
pub use postgres::{create_pool, run_migrations, PgBackend};

use crate::error::Result;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;
use tote_engine::{
    CartRow, CatalogProduct, ChangeEvent, FavoriteRow, OwnerId, ProductId, RowMatcher, Table,
};

/// Row-level access to the remote cart and favorites collections.
#[async_trait]
pub trait RemoteCollection: Send + Sync {
    /// All cart rows of one owner.
    async fn list_cart(&self, owner_id: &str) -> Result<Vec<CartRow>>;

    /// Insert or update by `(owner_id, product_id, variant)`. Returns the stored row.
    async fn upsert_cart(&self, row: &CartRow) -> Result<CartRow>;

    /// Delete matching cart rows. Returns the number deleted.
    async fn delete_cart(&self, matcher: &RowMatcher) -> Result<u64>;

    async fn list_favorites(&self, owner_id: &str) -> Result<Vec<FavoriteRow>>;

    /// Insert or keep by `(owner_id, product_id)`.
    async fn upsert_favorite(&self, row: &FavoriteRow) -> Result<FavoriteRow>;

    async fn delete_favorites(&self, matcher: &RowMatcher) -> Result<u64>;
}

/// Catalog lookups for hydrating cart rows.
#[async_trait]
pub trait CatalogLookup: Send + Sync {
    async fn list_by_ids(&self, ids: &[ProductId]) -> Result<Vec<CatalogProduct>>;
}

/// Scope of a change feed subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedFilter {
    pub table: Table,
    pub owner_id: OwnerId,
}

impl FeedFilter {
    pub fn new(table: Table, owner_id: impl Into<OwnerId>) -> Self {
        Self {
            table,
            owner_id: owner_id.into(),
        }
    }

    pub fn matches(&self, event: &ChangeEvent) -> bool {
        event.table == self.table && event.owner_id == self.owner_id
    }
}

/// An active subscription. Events arrive on `events` until unsubscribed.
#[derive(Debug)]
pub struct Subscription {
    pub id: String,
    pub events: mpsc::UnboundedReceiver<ChangeEvent>,
}

/// Push notifications of remote mutations.
#[async_trait]
pub trait ChangeFeed: Send + Sync {
    async fn subscribe(&self, filter: FeedFilter) -> Result<Subscription>;

    /// Stop delivering to a subscription. Unknown ids are ignored.
    async fn unsubscribe(&self, subscription_id: &str) -> Result<()>;
}

/// The remote capabilities a session is built on.
#[derive(Clone)]
pub struct Backends {
    pub remote: Arc<dyn RemoteCollection>,
    pub catalog: Arc<dyn CatalogLookup>,
    pub feed: Arc<dyn ChangeFeed>,
}

impl Backends {
    pub fn memory(backend: Arc<MemoryBackend>) -> Self {
        Self {
            remote: backend.clone(),
            catalog: backend.clone(),
            feed: backend,
        }
    }

    pub fn postgres(backend: PgBackend, feed: Arc<PgFeed>) -> Self {
        let backend = Arc::new(backend);
        Self {
            remote: backend.clone(),
            catalog: backend,
            feed,
        }
    }
}
