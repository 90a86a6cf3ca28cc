//! In-memory backend.
//!
//! Implements every remote capability in process. Used by tests and for
//! running sessions without a database. Records each call, can inject
//! failures and latency, and publishes change events like the real backend.

use super::{CatalogLookup, ChangeFeed, FeedFilter, FeedHub, RemoteCollection, Subscription};
use crate::error::{Result, SyncError};
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tote_engine::{
    CartRow, CatalogProduct, ChangeEvent, ChangeKind, FavoriteRow, ProductId, RowMatcher, Table,
};

/// A recorded backend call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendCall {
    ListCart(String),
    UpsertCart(CartRow),
    DeleteCart(RowMatcher),
    ListFavorites(String),
    UpsertFavorite(FavoriteRow),
    DeleteFavorites(RowMatcher),
    ListProducts(Vec<ProductId>),
}

impl BackendCall {
    pub fn is_write(&self) -> bool {
        matches!(
            self,
            BackendCall::UpsertCart(_)
                | BackendCall::DeleteCart(_)
                | BackendCall::UpsertFavorite(_)
                | BackendCall::DeleteFavorites(_)
        )
    }
}

/// In-process stand-in for the managed backend.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    cart: Mutex<Vec<CartRow>>,
    favorites: Mutex<Vec<FavoriteRow>>,
    products: DashMap<ProductId, CatalogProduct>,
    feed: Arc<FeedHub>,
    calls: Mutex<Vec<BackendCall>>,
    next_row: AtomicU64,
    fail_writes: AtomicUsize,
    fail_reads: AtomicUsize,
    latency: Mutex<Duration>,
    silent: AtomicBool,
}

fn take_one(counter: &AtomicUsize) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn new_shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// The change feed this backend publishes to.
    pub fn feed(&self) -> Arc<FeedHub> {
        self.feed.clone()
    }

    pub fn insert_product(&self, product: CatalogProduct) {
        self.products.insert(product.id.clone(), product);
    }

    /// Insert a cart row directly, as another device would, and publish it.
    pub fn seed_cart_row(&self, row: CartRow) -> CartRow {
        self.store_cart_row(row)
    }

    /// Fail the next `n` writes.
    pub fn fail_next_writes(&self, n: usize) {
        self.fail_writes.store(n, Ordering::SeqCst);
    }

    /// Fail the next `n` reads.
    pub fn fail_next_reads(&self, n: usize) {
        self.fail_reads.store(n, Ordering::SeqCst);
    }

    /// Delay every call by `latency`.
    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock().unwrap_or_else(|e| e.into_inner()) = latency;
    }

    /// Stop publishing change events for writes made through this backend.
    pub fn silence_feed(&self, silent: bool) {
        self.silent.store(silent, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<BackendCall> {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).clear();
    }

    /// Rows passed to `upsert_cart`, in call order.
    pub fn cart_upserts(&self) -> Vec<CartRow> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                BackendCall::UpsertCart(row) => Some(row),
                _ => None,
            })
            .collect()
    }

    pub fn favorite_upserts(&self) -> Vec<FavoriteRow> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                BackendCall::UpsertFavorite(row) => Some(row),
                _ => None,
            })
            .collect()
    }

    pub fn write_count(&self) -> usize {
        self.calls().iter().filter(|c| c.is_write()).count()
    }

    /// Stored cart rows of one owner.
    pub fn cart_rows(&self, owner_id: &str) -> Vec<CartRow> {
        self.cart
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|r| r.owner_id == owner_id)
            .cloned()
            .collect()
    }

    pub fn favorite_rows(&self, owner_id: &str) -> Vec<FavoriteRow> {
        self.favorites
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|r| r.owner_id == owner_id)
            .cloned()
            .collect()
    }

    async fn enter(&self, call: BackendCall) -> Result<()> {
        let latency = *self.latency.lock().unwrap_or_else(|e| e.into_inner());
        let is_write = call.is_write();
        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(call);

        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        let failing = if is_write {
            take_one(&self.fail_writes)
        } else {
            take_one(&self.fail_reads)
        };
        if failing {
            let kind = if is_write { "write" } else { "read" };
            return Err(SyncError::Backend(format!("injected {kind} failure")));
        }
        Ok(())
    }

    fn publish(&self, table: Table, kind: ChangeKind, owner_id: &str) {
        if !self.silent.load(Ordering::SeqCst) {
            self.feed.publish(&ChangeEvent::new(table, kind, owner_id));
        }
    }

    fn row_id(&self) -> String {
        format!("row-{}", self.next_row.fetch_add(1, Ordering::SeqCst) + 1)
    }

    fn store_cart_row(&self, row: CartRow) -> CartRow {
        let key = row.key();
        let (stored, kind) = {
            let mut rows = self.cart.lock().unwrap_or_else(|e| e.into_inner());
            match rows
                .iter_mut()
                .find(|r| r.owner_id == row.owner_id && r.key() == key)
            {
                Some(existing) => {
                    existing.quantity = row.quantity;
                    (existing.clone(), ChangeKind::Update)
                }
                None => {
                    let stored = CartRow {
                        id: Some(self.row_id()),
                        ..row
                    };
                    rows.push(stored.clone());
                    (stored, ChangeKind::Insert)
                }
            }
        };
        self.publish(Table::CartLines, kind, &stored.owner_id);
        stored
    }
}

#[async_trait]
impl RemoteCollection for MemoryBackend {
    async fn list_cart(&self, owner_id: &str) -> Result<Vec<CartRow>> {
        self.enter(BackendCall::ListCart(owner_id.to_string()))
            .await?;
        Ok(self.cart_rows(owner_id))
    }

    async fn upsert_cart(&self, row: &CartRow) -> Result<CartRow> {
        self.enter(BackendCall::UpsertCart(row.clone())).await?;
        Ok(self.store_cart_row(row.clone()))
    }

    async fn delete_cart(&self, matcher: &RowMatcher) -> Result<u64> {
        self.enter(BackendCall::DeleteCart(matcher.clone())).await?;
        let removed: Vec<CartRow> = {
            let mut rows = self.cart.lock().unwrap_or_else(|e| e.into_inner());
            let (removed, kept): (Vec<CartRow>, Vec<CartRow>) =
                rows.drain(..).partition(|r| matcher.matches_cart(r));
            *rows = kept;
            removed
        };
        for row in &removed {
            self.publish(Table::CartLines, ChangeKind::Delete, &row.owner_id);
        }
        Ok(removed.len() as u64)
    }

    async fn list_favorites(&self, owner_id: &str) -> Result<Vec<FavoriteRow>> {
        self.enter(BackendCall::ListFavorites(owner_id.to_string()))
            .await?;
        Ok(self.favorite_rows(owner_id))
    }

    async fn upsert_favorite(&self, row: &FavoriteRow) -> Result<FavoriteRow> {
        self.enter(BackendCall::UpsertFavorite(row.clone())).await?;
        let (stored, inserted) = {
            let mut rows = self.favorites.lock().unwrap_or_else(|e| e.into_inner());
            match rows
                .iter()
                .find(|r| r.owner_id == row.owner_id && r.product_id == row.product_id)
            {
                Some(existing) => (existing.clone(), false),
                None => {
                    let stored = FavoriteRow {
                        id: Some(self.row_id()),
                        ..row.clone()
                    };
                    rows.push(stored.clone());
                    (stored, true)
                }
            }
        };
        if inserted {
            self.publish(Table::Favorites, ChangeKind::Insert, &stored.owner_id);
        }
        Ok(stored)
    }

    async fn delete_favorites(&self, matcher: &RowMatcher) -> Result<u64> {
        self.enter(BackendCall::DeleteFavorites(matcher.clone()))
            .await?;
        let removed: Vec<FavoriteRow> = {
            let mut rows = self.favorites.lock().unwrap_or_else(|e| e.into_inner());
            let (removed, kept): (Vec<FavoriteRow>, Vec<FavoriteRow>) =
                rows.drain(..).partition(|r| matcher.matches_favorite(r));
            *rows = kept;
            removed
        };
        for row in &removed {
            self.publish(Table::Favorites, ChangeKind::Delete, &row.owner_id);
        }
        Ok(removed.len() as u64)
    }
}

#[async_trait]
impl CatalogLookup for MemoryBackend {
    async fn list_by_ids(&self, ids: &[ProductId]) -> Result<Vec<CatalogProduct>> {
        self.enter(BackendCall::ListProducts(ids.to_vec())).await?;
        Ok(ids
            .iter()
            .filter_map(|id| self.products.get(id).map(|p| p.value().clone()))
            .collect())
    }
}

#[async_trait]
impl ChangeFeed for MemoryBackend {
    async fn subscribe(&self, filter: FeedFilter) -> Result<Subscription> {
        Ok(self.feed.register(filter))
    }

    async fn unsubscribe(&self, subscription_id: &str) -> Result<()> {
        self.feed.unregister(subscription_id);
        Ok(())
    }
}
