//! Favorites session.
//!
//! Same two-mode structure as the cart, over a set of product ids. Every
//! toggle is confirmed: guest toggles persist locally, account toggles write
//! remotely and re-fetch.

use crate::backend::{Backends, FeedFilter};
use crate::config::SessionSettings;
use crate::error::{Result, SyncError};
use crate::events::SessionEvent;
use crate::identity::{IdentityAware, IdentityState};
use crate::listener::{ChangeTarget, RealtimeListener};
use crate::local::{self, keys, LocalStorage};
use crate::session::SessionCore;
use crate::store::{load_guest_favorites, AccountFavorites, FavoriteStore, GuestFavorites, Mode};
use async_trait::async_trait;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, Weak};
use tokio::sync::{broadcast, watch};
use tote_engine::{ChangeEvent, FavoriteSet, MutationKind, Owner, ProductId, SyncPhase, Table};

/// Handle to a favorites session. Cheap to clone.
#[derive(Clone)]
pub struct FavoritesSession {
    inner: Arc<FavoritesInner>,
}

struct FavoritesInner {
    core: SessionCore,
    backends: Backends,
    storage: Arc<dyn LocalStorage>,
    set: Mutex<FavoriteSet>,
    store: RwLock<Option<Arc<dyn FavoriteStore>>>,
    this: Weak<FavoritesInner>,
}

impl FavoritesSession {
    pub fn new(
        backends: Backends,
        storage: Arc<dyn LocalStorage>,
        settings: SessionSettings,
    ) -> Self {
        let inner = Arc::new_cyclic(|this| FavoritesInner {
            core: SessionCore::new("favorites", settings),
            backends,
            storage,
            set: Mutex::new(FavoriteSet::new()),
            store: RwLock::new(None),
            this: this.clone(),
        });
        Self { inner }
    }

    pub async fn bootstrap(&self, identity: &IdentityState) -> Result<bool> {
        self.inner.bootstrap(identity).await
    }

    pub async fn bootstrap_from(
        &self,
        identity: &mut watch::Receiver<IdentityState>,
    ) -> Result<bool> {
        let state = identity
            .wait_for(IdentityState::is_resolved)
            .await
            .map_err(|_| SyncError::IdentityUnresolved)?
            .clone();
        self.bootstrap(&state).await
    }

    /// Flip membership of `product_id`. Returns whether it is now a favorite.
    pub async fn toggle(&self, product_id: &str) -> Result<bool> {
        self.inner.toggle(product_id).await
    }

    pub fn is_favorite(&self, product_id: &str) -> bool {
        self.inner.set().contains(product_id)
    }

    pub fn ids(&self) -> Vec<ProductId> {
        self.inner.set().ids().to_vec()
    }

    pub fn len(&self) -> usize {
        self.inner.set().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.set().is_empty()
    }

    /// Whether favorites are being re-fetched.
    pub fn is_loading(&self) -> bool {
        self.inner.core.phase() == SyncPhase::Resyncing
    }

    /// Switch to `account_id`, pushing guest favorites to it first.
    ///
    /// Returns the number of product ids migrated.
    pub async fn login(&self, account_id: &str) -> Result<usize> {
        let first = self.inner.core.begin_bootstrap();
        let result = self.inner.login(account_id).await;
        if result.is_err() && first {
            self.inner.core.reset_bootstrap();
        }
        result
    }

    pub async fn logout(&self) -> Result<()> {
        self.inner.logout().await
    }

    pub async fn resync(&self) -> Result<usize> {
        let _op = self.inner.core.acquire().await?;
        let store = self.inner.store()?;
        self.inner.refetch(store.as_ref()).await
    }

    /// Handle a change made elsewhere. Returns whether a re-fetch ran.
    pub async fn on_remote_change(&self, event: ChangeEvent) -> bool {
        self.inner.handle_remote_change(event).await
    }

    pub async fn apply_identity(&self, identity: &IdentityState) -> Result<()> {
        match identity {
            IdentityState::Unresolved => Ok(()),
            IdentityState::Guest => match self.mode() {
                Mode::Account => self.logout().await,
                Mode::Guest => Ok(()),
                Mode::Unresolved => self.bootstrap(identity).await.map(|_| ()),
            },
            IdentityState::Account(id) => self.login(id).await.map(|_| ()),
        }
    }

    pub fn phase(&self) -> SyncPhase {
        self.inner.core.phase()
    }

    pub fn mode(&self) -> Mode {
        self.inner.core.mode()
    }

    pub fn events(&self) -> broadcast::Receiver<SessionEvent> {
        self.inner.core.events.subscribe()
    }

    pub fn is_listening(&self) -> bool {
        self.inner.core.is_listening()
    }
}

impl std::fmt::Debug for FavoritesSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FavoritesSession")
            .field("mode", &self.mode())
            .field("phase", &self.phase())
            .field("ids", &self.len())
            .finish()
    }
}

#[async_trait]
impl IdentityAware for FavoritesSession {
    async fn apply_identity(&self, identity: &IdentityState) -> Result<()> {
        FavoritesSession::apply_identity(self, identity).await
    }
}

impl FavoritesInner {
    fn set(&self) -> MutexGuard<'_, FavoriteSet> {
        self.set.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn store(&self) -> Result<Arc<dyn FavoriteStore>> {
        self.store
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or(SyncError::IdentityUnresolved)
    }

    fn set_store(&self, store: Arc<dyn FavoriteStore>) {
        *self.store.write().unwrap_or_else(PoisonError::into_inner) = Some(store);
    }

    async fn refetch(&self, store: &dyn FavoriteStore) -> Result<usize> {
        self.core.enter(SyncPhase::Resyncing)?;
        let loaded = store.load().await;
        self.core.settle();

        let loaded = loaded.map_err(|e| {
            tracing::warn!(error = %e, "Favorites refetch failed");
            e
        })?;
        let count = loaded.len();
        *self.set() = loaded;

        self.core.clear_owed_resync();
        self.core
            .events
            .emit(SessionEvent::FavoritesResynced { count });
        Ok(count)
    }

    async fn toggle(&self, product_id: &str) -> Result<bool> {
        if product_id.is_empty() {
            return Err(tote_engine::Error::EmptyProductId.into());
        }
        let _op = self.core.acquire().await?;
        let store = self.store()?;

        let mut next = self.set().clone();
        let liked = next.toggle(product_id);

        self.core.enter(SyncPhase::Mutating)?;
        let written = if liked {
            store.put(product_id, &next).await
        } else {
            store.delete(product_id, &next).await
        };
        if let Err(e) = written {
            self.core.settle();
            tracing::warn!(kind = %MutationKind::Toggle, %product_id, error = %e, "Favorite toggle failed");
            return Err(e);
        }

        if store.confirms_by_refetch() {
            self.refetch(store.as_ref()).await?;
        } else {
            *self.set() = next;
            self.core.enter(SyncPhase::Idle)?;
        }

        tracing::debug!(%product_id, liked, "Toggled favorite");
        Ok(self.set().contains(product_id))
    }

    async fn bootstrap(&self, identity: &IdentityState) -> Result<bool> {
        if !identity.is_resolved() || !self.core.begin_bootstrap() {
            return Ok(false);
        }

        let hydrated = match identity {
            IdentityState::Account(id) => self.login(id).await.map(|_| ()),
            _ => {
                let _op = self.core.acquire_queued().await;
                self.enter_guest()
            }
        };
        if let Err(e) = hydrated {
            self.core.reset_bootstrap();
            return Err(e);
        }
        Ok(true)
    }

    fn enter_guest(&self) -> Result<()> {
        self.core.gate.set(Mode::Guest);
        let token = local::guest_token(self.storage.as_ref())?;
        self.core.switch_to(Owner::Guest(token));
        self.set_store(Arc::new(GuestFavorites::new(
            Arc::clone(&self.storage),
            self.core.gate.clone(),
        )));
        *self.set() = load_guest_favorites(self.storage.as_ref())?;
        Ok(())
    }

    async fn login(&self, account_id: &str) -> Result<usize> {
        if account_id.trim().is_empty() {
            return Err(SyncError::IdentityUnresolved);
        }
        let _op = self.core.acquire_queued().await;
        if self.core.account_id().as_deref() == Some(account_id) {
            return Ok(0);
        }
        if let Some(listener) = self.core.take_listener() {
            listener.stop().await;
        }

        let account = AccountFavorites::new(account_id, Arc::clone(&self.backends.remote));
        let migrated = if self.core.mode() == Mode::Account {
            0
        } else {
            self.migrate(&account, account_id).await?
        };

        self.core.switch_to(Owner::Account(account_id.to_string()));
        let store: Arc<dyn FavoriteStore> = Arc::new(account);
        self.set_store(Arc::clone(&store));
        if migrated > 0 {
            self.core.events.emit(SessionEvent::Migrated { lines: migrated });
        }

        let refetched = self.refetch(store.as_ref()).await;
        self.listen(account_id).await;
        refetched?;
        Ok(migrated)
    }

    async fn migrate(&self, account: &AccountFavorites, account_id: &str) -> Result<usize> {
        let guest = load_guest_favorites(self.storage.as_ref())?;
        if guest.is_empty() {
            return Ok(0);
        }

        self.core.enter(SyncPhase::Mutating)?;
        let migrated = account.migrate(&guest).await.and_then(|migrated| {
            self.storage.remove(keys::FAVORITES)?;
            Ok(migrated)
        });
        match migrated {
            Ok(migrated) => {
                tracing::info!(account = %account_id, ids = migrated, "Migrated guest favorites");
                Ok(migrated)
            }
            Err(e) => {
                self.core.settle();
                tracing::warn!(account = %account_id, error = %e, "Guest favorites migration failed");
                Err(e)
            }
        }
    }

    async fn listen(&self, account_id: &str) {
        let filter = FeedFilter::new(Table::Favorites, account_id);
        match RealtimeListener::spawn(Arc::clone(&self.backends.feed), filter, self.this.clone())
            .await
        {
            Ok(listener) => {
                if let Some(previous) = self.core.install_listener(listener) {
                    previous.stop().await;
                }
            }
            Err(e) => {
                tracing::warn!(account = %account_id, error = %e, "Realtime favorite updates unavailable");
            }
        }
    }

    async fn logout(&self) -> Result<()> {
        let _op = self.core.acquire_queued().await;
        if let Some(listener) = self.core.take_listener() {
            listener.stop().await;
        }
        self.core.clear_owed_resync();
        self.enter_guest()
    }

    async fn handle_remote_change(&self, event: ChangeEvent) -> bool {
        if self.core.mode() != Mode::Account || event.table != Table::Favorites {
            return false;
        }
        let Some(_op) = self.core.try_acquire() else {
            tracing::debug!(kind = ?event.kind, "Remote favorites change deferred");
            self.core.owe_resync();
            self.core.events.emit(SessionEvent::RemoteChangeDeferred);
            return false;
        };
        let Ok(store) = self.store() else {
            return false;
        };
        match self.refetch(store.as_ref()).await {
            Ok(_) => true,
            Err(e) => {
                tracing::warn!(error = %e, "Favorites refetch after remote change failed");
                false
            }
        }
    }
}

#[async_trait]
impl ChangeTarget for FavoritesInner {
    async fn on_remote_change(&self, event: ChangeEvent) {
        self.handle_remote_change(event).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;
    use crate::local::MemoryStorage;

    fn session() -> (FavoritesSession, Arc<MemoryBackend>, Arc<MemoryStorage>) {
        let backend = MemoryBackend::new_shared();
        let storage = Arc::new(MemoryStorage::new());
        let session = FavoritesSession::new(
            Backends::memory(backend.clone()),
            storage.clone(),
            SessionSettings::default(),
        );
        (session, backend, storage)
    }

    #[tokio::test]
    async fn guest_toggle_flips_membership() {
        let (favorites, backend, storage) = session();
        favorites.bootstrap(&IdentityState::Guest).await.unwrap();

        assert!(favorites.toggle("p1").await.unwrap());
        assert!(favorites.is_favorite("p1"));
        assert!(!favorites.toggle("p1").await.unwrap());
        assert!(favorites.is_empty());

        assert!(storage.get(keys::FAVORITES).unwrap().is_some());
        assert!(backend.calls().is_empty());
    }

    #[tokio::test]
    async fn empty_product_id_is_rejected() {
        let (favorites, _, _) = session();
        favorites.bootstrap(&IdentityState::Guest).await.unwrap();
        assert!(favorites.toggle("").await.is_err());
    }

    #[tokio::test]
    async fn account_toggle_writes_then_refetches() {
        let (favorites, backend, _) = session();
        favorites.login("acct-1").await.unwrap();
        backend.clear_calls();

        assert!(favorites.toggle("p1").await.unwrap());
        assert_eq!(backend.favorite_rows("acct-1").len(), 1);
        assert!(matches!(
            backend.calls().last(),
            Some(crate::backend::BackendCall::ListFavorites(_))
        ));

        assert!(!favorites.toggle("p1").await.unwrap());
        assert!(backend.favorite_rows("acct-1").is_empty());
        assert!(!favorites.is_loading());
    }
}
