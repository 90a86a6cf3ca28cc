//! Storage strategies behind the sessions.
//!
//! A session talks to exactly one store at a time: a guest store backed by
//! local storage, or an account store backed by the remote collection. The
//! session swaps stores explicitly on login and logout.

use crate::backend::{CatalogLookup, RemoteCollection};
use crate::error::{Result, SyncError};
use crate::local::{keys, LocalStorage};
use async_trait::async_trait;
use futures::future::try_join_all;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use tote_engine::{
    hydrate, Cart, CartLine, CartRow, FavoriteRow, FavoriteSet, GuestCartSnapshot,
    GuestFavoritesSnapshot, OwnerId, ProductId, RowMatcher,
};

/// Which backing a session is using.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Identity not known yet
    Unresolved,
    Guest,
    Account,
}

impl Mode {
    fn to_u8(self) -> u8 {
        match self {
            Mode::Unresolved => 0,
            Mode::Guest => 1,
            Mode::Account => 2,
        }
    }

    fn from_u8(value: u8) -> Self {
        match value {
            1 => Mode::Guest,
            2 => Mode::Account,
            _ => Mode::Unresolved,
        }
    }
}

/// Current mode shared between a session and its stores.
///
/// Guest stores consult the gate on every write, so a write issued through a
/// stale guest handle after login is refused.
#[derive(Debug, Clone, Default)]
pub struct ModeGate(Arc<AtomicU8>);

impl ModeGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> Mode {
        Mode::from_u8(self.0.load(Ordering::SeqCst))
    }

    pub fn set(&self, mode: Mode) {
        self.0.store(mode.to_u8(), Ordering::SeqCst);
    }

    pub fn allows_local_writes(&self) -> bool {
        self.current() != Mode::Account
    }
}

pub(crate) fn load_guest_cart(storage: &dyn LocalStorage) -> Result<Vec<CartLine>> {
    let Some(json) = storage.get(keys::CART)? else {
        return Ok(Vec::new());
    };
    match GuestCartSnapshot::from_json(&json).and_then(GuestCartSnapshot::into_cart) {
        Ok(cart) => Ok(cart.lines().to_vec()),
        Err(e) => {
            tracing::warn!(error = %e, "Discarding unreadable guest cart");
            Ok(Vec::new())
        }
    }
}

pub(crate) fn load_guest_favorites(storage: &dyn LocalStorage) -> Result<FavoriteSet> {
    let Some(json) = storage.get(keys::FAVORITES)? else {
        return Ok(FavoriteSet::new());
    };
    match GuestFavoritesSnapshot::from_json(&json) {
        Ok(snapshot) => Ok(snapshot.into_set()),
        Err(e) => {
            tracing::warn!(error = %e, "Discarding unreadable guest favorites");
            Ok(FavoriteSet::new())
        }
    }
}

// ============================================================================
// Cart stores
// ============================================================================

/// Persistence strategy for cart lines.
#[async_trait]
pub trait CartStore: Send + Sync {
    fn mode(&self) -> Mode;

    /// Whether writes must be confirmed by re-fetching from the store.
    fn confirms_by_refetch(&self) -> bool {
        self.mode() == Mode::Account
    }

    async fn load(&self) -> Result<Vec<CartLine>>;

    /// Persist `line`. `cart` is the cart as it stands after the write;
    /// stores that persist whole carts write it instead.
    async fn save_line(&self, line: &CartLine, cart: &Cart) -> Result<()>;

    /// Delete `line`. `cart` is the cart after the removal.
    async fn delete_line(&self, line: &CartLine, cart: &Cart) -> Result<()>;

    async fn clear(&self) -> Result<()>;
}

/// Guest cart persisted in local storage.
pub struct GuestStore {
    storage: Arc<dyn LocalStorage>,
    gate: ModeGate,
}

impl GuestStore {
    pub fn new(storage: Arc<dyn LocalStorage>, gate: ModeGate) -> Self {
        Self { storage, gate }
    }

    fn persist(&self, cart: &Cart) -> Result<()> {
        if !self.gate.allows_local_writes() {
            tracing::warn!("Refusing guest cart write after switching to account mode");
            return Err(SyncError::ModeChanged);
        }
        let json = GuestCartSnapshot::from_cart(cart).to_json()?;
        self.storage.set(keys::CART, &json)
    }
}

#[async_trait]
impl CartStore for GuestStore {
    fn mode(&self) -> Mode {
        Mode::Guest
    }

    async fn load(&self) -> Result<Vec<CartLine>> {
        load_guest_cart(self.storage.as_ref())
    }

    async fn save_line(&self, _line: &CartLine, cart: &Cart) -> Result<()> {
        self.persist(cart)
    }

    async fn delete_line(&self, _line: &CartLine, cart: &Cart) -> Result<()> {
        self.persist(cart)
    }

    async fn clear(&self) -> Result<()> {
        if !self.gate.allows_local_writes() {
            return Err(SyncError::ModeChanged);
        }
        self.storage.remove(keys::CART)
    }
}

/// Account cart stored in the remote collection.
pub struct AccountStore {
    account_id: OwnerId,
    remote: Arc<dyn RemoteCollection>,
    catalog: Arc<dyn CatalogLookup>,
}

impl AccountStore {
    pub fn new(
        account_id: impl Into<OwnerId>,
        remote: Arc<dyn RemoteCollection>,
        catalog: Arc<dyn CatalogLookup>,
    ) -> Self {
        Self {
            account_id: account_id.into(),
            remote,
            catalog,
        }
    }

    pub fn account_id(&self) -> &str {
        &self.account_id
    }

    /// Upsert each line under this account. Returns the number written.
    pub async fn migrate(&self, lines: &[CartLine]) -> Result<usize> {
        let writes = lines.iter().map(|line| {
            let row = CartRow {
                id: None,
                ..CartRow::from_line(self.account_id.clone(), line)
            };
            async move { self.remote.upsert_cart(&row).await }
        });
        let written = try_join_all(writes).await?;
        Ok(written.len())
    }
}

#[async_trait]
impl CartStore for AccountStore {
    fn mode(&self) -> Mode {
        Mode::Account
    }

    async fn load(&self) -> Result<Vec<CartLine>> {
        let rows = self.remote.list_cart(&self.account_id).await?;
        if rows.is_empty() {
            return Ok(Vec::new());
        }

        let mut seen = HashSet::new();
        let ids: Vec<ProductId> = rows
            .iter()
            .filter(|r| seen.insert(r.product_id.as_str()))
            .map(|r| r.product_id.clone())
            .collect();
        let products = self.catalog.list_by_ids(&ids).await?;

        Ok(hydrate(&rows, &products))
    }

    async fn save_line(&self, line: &CartLine, _cart: &Cart) -> Result<()> {
        let row = CartRow::from_line(self.account_id.clone(), line);
        self.remote.upsert_cart(&row).await?;
        Ok(())
    }

    async fn delete_line(&self, line: &CartLine, _cart: &Cart) -> Result<()> {
        let matcher = RowMatcher::for_line(self.account_id.clone(), line);
        let deleted = self.remote.delete_cart(&matcher).await?;
        tracing::debug!(account = %self.account_id, key = %line.key(), deleted, "Deleted cart row");
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        self.remote
            .delete_cart(&RowMatcher::Owner {
                owner_id: self.account_id.clone(),
            })
            .await?;
        Ok(())
    }
}

// ============================================================================
// Favorite stores
// ============================================================================

/// Persistence strategy for favorites.
#[async_trait]
pub trait FavoriteStore: Send + Sync {
    fn mode(&self) -> Mode;

    fn confirms_by_refetch(&self) -> bool {
        self.mode() == Mode::Account
    }

    async fn load(&self) -> Result<FavoriteSet>;

    /// Record `product_id` as liked. `set` is the set after the change.
    async fn put(&self, product_id: &str, set: &FavoriteSet) -> Result<()>;

    /// Record `product_id` as not liked. `set` is the set after the change.
    async fn delete(&self, product_id: &str, set: &FavoriteSet) -> Result<()>;
}

pub struct GuestFavorites {
    storage: Arc<dyn LocalStorage>,
    gate: ModeGate,
}

impl GuestFavorites {
    pub fn new(storage: Arc<dyn LocalStorage>, gate: ModeGate) -> Self {
        Self { storage, gate }
    }

    fn persist(&self, set: &FavoriteSet) -> Result<()> {
        if !self.gate.allows_local_writes() {
            tracing::warn!("Refusing guest favorites write after switching to account mode");
            return Err(SyncError::ModeChanged);
        }
        let json = GuestFavoritesSnapshot::from_set(set).to_json()?;
        self.storage.set(keys::FAVORITES, &json)
    }
}

#[async_trait]
impl FavoriteStore for GuestFavorites {
    fn mode(&self) -> Mode {
        Mode::Guest
    }

    async fn load(&self) -> Result<FavoriteSet> {
        load_guest_favorites(self.storage.as_ref())
    }

    async fn put(&self, _product_id: &str, set: &FavoriteSet) -> Result<()> {
        self.persist(set)
    }

    async fn delete(&self, _product_id: &str, set: &FavoriteSet) -> Result<()> {
        self.persist(set)
    }
}

pub struct AccountFavorites {
    account_id: OwnerId,
    remote: Arc<dyn RemoteCollection>,
}

impl AccountFavorites {
    pub fn new(account_id: impl Into<OwnerId>, remote: Arc<dyn RemoteCollection>) -> Self {
        Self {
            account_id: account_id.into(),
            remote,
        }
    }

    /// Upsert each product id under this account. Returns the number written.
    pub async fn migrate(&self, set: &FavoriteSet) -> Result<usize> {
        let writes = set.ids().iter().map(|product_id| {
            let row = FavoriteRow::new(self.account_id.clone(), product_id.clone());
            async move { self.remote.upsert_favorite(&row).await }
        });
        let written = try_join_all(writes).await?;
        Ok(written.len())
    }
}

#[async_trait]
impl FavoriteStore for AccountFavorites {
    fn mode(&self) -> Mode {
        Mode::Account
    }

    async fn load(&self) -> Result<FavoriteSet> {
        let rows = self.remote.list_favorites(&self.account_id).await?;
        Ok(FavoriteSet::from_ids(rows.into_iter().map(|r| r.product_id)))
    }

    async fn put(&self, product_id: &str, _set: &FavoriteSet) -> Result<()> {
        let row = FavoriteRow::new(self.account_id.clone(), product_id);
        self.remote.upsert_favorite(&row).await?;
        Ok(())
    }

    async fn delete(&self, product_id: &str, _set: &FavoriteSet) -> Result<()> {
        self.remote
            .delete_favorites(&RowMatcher::Product {
                owner_id: self.account_id.clone(),
                product_id: product_id.to_string(),
            })
            .await?;
        Ok(())
    }
}
