//! Cart reconciliation session.
//!
//! A [`CartSession`] owns the in-memory cart and keeps it consistent with
//! whichever store is active:
//!
//! - **Guest**: lines live in local storage; every mutation is applied in
//!   memory and persisted synchronously.
//! - **Account**: lines live in the remote collection. Adds, removes and
//!   clears are written, then the whole cart is re-fetched (confirmed).
//!   Quantity changes are applied in memory and written after a quiet
//!   period (optimistic-debounced).
//!
//! Mutations are serialized by one operation gate. Remote changes made by
//! other devices arrive through a [`RealtimeListener`] and trigger a
//! re-fetch unless local work is in flight.

use crate::backend::{Backends, FeedFilter};
use crate::config::SessionSettings;
use crate::debounce::DebounceScheduler;
use crate::error::{Result, SyncError};
use crate::events::SessionEvent;
use crate::identity::{IdentityAware, IdentityState};
use crate::listener::{ChangeTarget, RealtimeListener};
use crate::local::{self, keys, LocalStorage};
use crate::session::SessionCore;
use crate::store::{load_guest_cart, AccountStore, CartStore, GuestStore, Mode};
use async_trait::async_trait;
use rust_decimal::Decimal;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, Weak};
use tokio::sync::{broadcast, watch};
use tote_engine::{
    AddOutcome, Cart, CartLine, ChangeEvent, LineInput, LineKey, MutationKind, MutationPolicy,
    Owner, OwnerId, SyncPhase, Table, Totals,
};

/// Handle to a cart session. Cheap to clone.
#[derive(Clone)]
pub struct CartSession {
    inner: Arc<CartInner>,
}

struct CartInner {
    core: SessionCore,
    backends: Backends,
    storage: Arc<dyn LocalStorage>,
    cart: Mutex<Cart>,
    store: RwLock<Option<Arc<dyn CartStore>>>,
    debounce: DebounceScheduler<LineKey>,
    /// Keys whose optimistic quantity has not been written yet
    unflushed: Mutex<HashSet<LineKey>>,
    cart_open: AtomicBool,
    this: Weak<CartInner>,
}

impl CartSession {
    /// Create a session. It holds no lines until [`bootstrap`](Self::bootstrap)
    /// or [`login`](Self::login) resolves an identity.
    pub fn new(
        backends: Backends,
        storage: Arc<dyn LocalStorage>,
        settings: SessionSettings,
    ) -> Self {
        let inner = Arc::new_cyclic(|this| CartInner {
            core: SessionCore::new("cart", settings),
            backends,
            storage,
            cart: Mutex::new(Cart::new()),
            store: RwLock::new(None),
            debounce: DebounceScheduler::new(),
            unflushed: Mutex::new(HashSet::new()),
            cart_open: AtomicBool::new(false),
            this: this.clone(),
        });
        Self { inner }
    }

    /// Hydrate for a resolved identity. Only the first call does any work.
    ///
    /// Returns whether this call hydrated the cart.
    pub async fn bootstrap(&self, identity: &IdentityState) -> Result<bool> {
        self.inner.bootstrap(identity).await
    }

    /// Wait until the identity is resolved, then [`bootstrap`](Self::bootstrap).
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

    /// Add `input.quantity` of a product, merging with an existing line.
    pub async fn add_item(&self, input: LineInput) -> Result<AddOutcome> {
        self.inner.add_item(input).await
    }

    /// Set a line's quantity. Quantities below one remove the line.
    pub async fn update_quantity(
        &self,
        product_id: &str,
        variant: Option<&str>,
        quantity: i64,
    ) -> Result<()> {
        if quantity < 1 {
            return self.remove_item(product_id, variant).await;
        }
        self.inner
            .update_quantity(LineKey::new(product_id, variant), quantity)
            .await
    }

    /// Remove a line. Removing a missing line is a no-op.
    pub async fn remove_item(&self, product_id: &str, variant: Option<&str>) -> Result<()> {
        self.inner
            .remove_item(LineKey::new(product_id, variant))
            .await
    }

    /// Remove every line. The previous cart is restored if the store fails.
    pub async fn clear_cart(&self) -> Result<()> {
        self.inner.clear_cart().await
    }

    /// Switch to `account_id`, pushing any guest lines to it first.
    ///
    /// Returns the number of guest lines migrated.
    pub async fn login(&self, account_id: &str) -> Result<usize> {
        let first = self.inner.core.begin_bootstrap();
        let result = self.inner.login(account_id).await;
        if result.is_err() && first {
            self.inner.core.reset_bootstrap();
        }
        result
    }

    /// Return to guest mode.
    pub async fn logout(&self) -> Result<()> {
        self.inner.logout().await
    }

    /// Re-fetch from the active store, replacing in-memory state.
    pub async fn resync(&self) -> Result<Totals> {
        let _op = self.inner.core.acquire().await?;
        let store = self.inner.store()?;
        self.inner.refetch(store.as_ref()).await
    }

    /// Handle a change made elsewhere. Returns whether a re-fetch ran.
    pub async fn on_remote_change(&self, event: ChangeEvent) -> bool {
        self.inner.handle_remote_change(event).await
    }

    /// Bring the session in line with an identity published by auth.
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

    pub fn items(&self) -> Vec<CartLine> {
        self.inner.cart().lines().to_vec()
    }

    pub fn totals(&self) -> Totals {
        self.inner.cart().totals()
    }

    pub fn count(&self) -> u64 {
        self.inner.cart().count()
    }

    pub fn total(&self) -> Decimal {
        self.inner.cart().total()
    }

    pub fn phase(&self) -> SyncPhase {
        self.inner.core.phase()
    }

    /// Phase transitions taken since creation.
    pub fn transitions(&self) -> u64 {
        self.inner.core.transitions()
    }

    pub fn mode(&self) -> Mode {
        self.inner.core.mode()
    }

    pub fn owner(&self) -> Option<Owner> {
        self.inner.core.owner()
    }

    pub fn account_id(&self) -> Option<OwnerId> {
        self.inner.core.account_id()
    }

    pub fn events(&self) -> broadcast::Receiver<SessionEvent> {
        self.inner.core.events.subscribe()
    }

    pub fn is_cart_open(&self) -> bool {
        self.inner.cart_open.load(Ordering::SeqCst)
    }

    pub fn set_cart_open(&self, open: bool) {
        self.inner.cart_open.store(open, Ordering::SeqCst);
    }

    /// Whether debounced quantity writes are waiting to fire.
    pub fn has_pending_writes(&self) -> bool {
        self.inner.has_unflushed() || self.inner.debounce.has_pending()
    }

    /// Whether a realtime subscription is active.
    pub fn is_listening(&self) -> bool {
        self.inner.core.is_listening()
    }
}

impl std::fmt::Debug for CartSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CartSession")
            .field("mode", &self.mode())
            .field("phase", &self.phase())
            .field("lines", &self.inner.cart().len())
            .finish()
    }
}

#[async_trait]
impl IdentityAware for CartSession {
    async fn apply_identity(&self, identity: &IdentityState) -> Result<()> {
        CartSession::apply_identity(self, identity).await
    }
}

impl CartInner {
    fn cart(&self) -> MutexGuard<'_, Cart> {
        self.cart.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn snapshot(&self) -> Cart {
        self.cart().clone()
    }

    fn commit(&self, cart: Cart) {
        *self.cart() = cart;
    }

    fn unflushed(&self) -> MutexGuard<'_, HashSet<LineKey>> {
        self.unflushed.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn has_unflushed(&self) -> bool {
        !self.unflushed().is_empty()
    }

    /// Forget every unwritten quantity and stop its timer.
    fn discard_unflushed(&self) -> HashSet<LineKey> {
        self.debounce.cancel_all();
        std::mem::take(&mut *self.unflushed())
    }

    fn store(&self) -> Result<Arc<dyn CartStore>> {
        self.store
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or(SyncError::IdentityUnresolved)
    }

    fn set_store(&self, store: Arc<dyn CartStore>) {
        *self.store.write().unwrap_or_else(PoisonError::into_inner) = Some(store);
    }

    fn open_cart(&self) {
        self.cart_open.store(true, Ordering::SeqCst);
        self.core.events.emit(SessionEvent::CartOpened);
    }

    fn fail(&self, kind: MutationKind, error: &SyncError) {
        self.core.settle();
        tracing::warn!(%kind, error = %error, "Cart mutation failed");
    }

    /// Reload from `store` and replace in-memory state. Caller holds the gate.
    ///
    /// Unwritten optimistic quantities are written first so the reload
    /// cannot revert them.
    async fn refetch(&self, store: &dyn CartStore) -> Result<Totals> {
        self.flush_unflushed(store).await?;
        self.core.enter(SyncPhase::Resyncing)?;

        let lines = match store.load().await {
            Ok(lines) => lines,
            Err(e) => {
                self.core.settle();
                tracing::warn!(error = %e, "Cart refetch failed");
                return Err(e);
            }
        };

        let (totals, rejected) = {
            let mut cart = self.cart();
            let rejected = cart.replace_valid(lines);
            (cart.totals(), rejected)
        };
        self.core.settle();
        for e in rejected {
            tracing::warn!(error = %e, "Skipping invalid cart line");
        }

        self.core.clear_owed_resync();
        tracing::debug!(count = totals.count, total = %totals.total, "Cart resynced");
        self.core.events.emit(SessionEvent::Resynced { totals });
        Ok(totals)
    }

    /// Finish a successful write: re-fetch for remote stores, commit for local ones.
    async fn confirm(&self, store: &dyn CartStore, next: Cart) -> Result<()> {
        if store.confirms_by_refetch() {
            self.refetch(store).await?;
        } else {
            self.commit(next);
            self.core.enter(SyncPhase::Idle)?;
        }
        Ok(())
    }

    async fn add_item(&self, input: LineInput) -> Result<AddOutcome> {
        input.validate()?;
        let _op = self.core.acquire().await?;
        let store = self.store()?;

        let mut next = self.snapshot();
        let outcome = next.add(input)?;
        let Some(line) = next.get(&outcome.key).cloned() else {
            return Ok(outcome);
        };

        self.core.enter(SyncPhase::Mutating)?;
        if let Err(e) = store.save_line(&line, &next).await {
            self.fail(MutationKind::Add, &e);
            return Err(e);
        }
        self.confirm(store.as_ref(), next).await?;

        tracing::debug!(key = %outcome.key, quantity = outcome.quantity, created = outcome.created, "Added to cart");
        self.open_cart();
        Ok(outcome)
    }

    async fn update_quantity(&self, key: LineKey, quantity: i64) -> Result<()> {
        let _op = self.core.acquire().await?;
        let store = self.store()?;

        let account_mode = store.mode() == Mode::Account;
        match MutationKind::UpdateQuantity.policy(account_mode) {
            MutationPolicy::OptimisticDebounced => {
                let applied = self.cart().set_quantity(&key, quantity).is_some();
                if applied {
                    self.unflushed().insert(key.clone());
                    self.schedule_write(key);
                } else {
                    tracing::debug!(key = %key, "Quantity change for absent line ignored");
                }
                Ok(())
            }
            MutationPolicy::Confirmed => {
                let mut next = self.snapshot();
                let Some(line) = next.set_quantity(&key, quantity).cloned() else {
                    tracing::debug!(key = %key, "Quantity change for absent line ignored");
                    return Ok(());
                };

                self.core.enter(SyncPhase::Mutating)?;
                if let Err(e) = store.save_line(&line, &next).await {
                    self.fail(MutationKind::UpdateQuantity, &e);
                    return Err(e);
                }
                self.confirm(store.as_ref(), next).await
            }
        }
    }

    fn schedule_write(&self, key: LineKey) {
        let this = self.this.clone();
        let task_key = key.clone();
        self.debounce
            .schedule(key, self.core.settings.debounce, move || async move {
                if let Some(inner) = this.upgrade() {
                    inner.flush_quantity(task_key).await;
                }
            });
    }

    /// Write the current quantity of `key`. Runs when its debounce timer fires.
    async fn flush_quantity(&self, key: LineKey) {
        let _op = self.core.acquire_queued().await;
        let Ok(store) = self.store() else {
            return;
        };
        if store.mode() != Mode::Account {
            tracing::debug!(key = %key, "Dropping debounced write after leaving account mode");
            return;
        }
        if !self.unflushed().remove(&key) {
            tracing::debug!(key = %key, "Quantity already written");
            return;
        }

        let (line, cart) = {
            let cart = self.cart();
            match cart.get(&key) {
                Some(line) => (line.clone(), cart.clone()),
                None => {
                    tracing::debug!(key = %key, "Line removed before debounced write");
                    return;
                }
            }
        };

        if let Err(e) = self.core.enter(SyncPhase::Mutating) {
            tracing::warn!(error = %e, "Skipping debounced write");
            return;
        }

        match store.save_line(&line, &cart).await {
            Ok(()) => {
                tracing::debug!(key = %key, quantity = line.quantity, "Debounced quantity written");
                if !self.has_unflushed() && self.core.take_owed_resync() {
                    if let Err(e) = self.refetch(store.as_ref()).await {
                        tracing::warn!(error = %e, "Deferred cart resync failed");
                    }
                } else {
                    self.core.settle();
                }
            }
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "Debounced quantity write failed; resyncing");
                self.core.events.emit(SessionEvent::SyncFailed {
                    kind: MutationKind::UpdateQuantity,
                    message: e.user_message().to_string(),
                });
                if let Err(e) = self.refetch(store.as_ref()).await {
                    tracing::warn!(error = %e, "Cart resync after failed write also failed");
                }
            }
        }
    }

    /// Write every unflushed quantity now, cancelling its timer. Caller holds
    /// the gate. A failed write is reported and left to the following reload.
    async fn flush_unflushed(&self, store: &dyn CartStore) -> Result<()> {
        if store.mode() != Mode::Account {
            return Ok(());
        }
        let keys: Vec<LineKey> = self.unflushed().drain().collect();
        if keys.is_empty() {
            return Ok(());
        }
        if self.core.phase() == SyncPhase::Idle {
            self.core.enter(SyncPhase::Mutating)?;
        }

        for key in keys {
            self.debounce.cancel(&key);
            let (line, cart) = {
                let cart = self.cart();
                match cart.get(&key) {
                    Some(line) => (line.clone(), cart.clone()),
                    None => continue,
                }
            };
            match store.save_line(&line, &cart).await {
                Ok(()) => {
                    tracing::debug!(key = %key, quantity = line.quantity, "Quantity written ahead of reload");
                }
                Err(e) => {
                    tracing::warn!(key = %key, error = %e, "Early quantity write failed");
                    self.core.events.emit(SessionEvent::SyncFailed {
                        kind: MutationKind::UpdateQuantity,
                        message: e.user_message().to_string(),
                    });
                }
            }
        }
        Ok(())
    }

    async fn remove_item(&self, key: LineKey) -> Result<()> {
        let _op = self.core.acquire().await?;
        let store = self.store()?;
        self.debounce.cancel(&key);
        self.unflushed().remove(&key);

        let mut next = self.snapshot();
        let Some(line) = next.remove(&key) else {
            tracing::debug!(key = %key, "Remove of absent line ignored");
            return Ok(());
        };

        self.core.enter(SyncPhase::Mutating)?;
        if let Err(e) = store.delete_line(&line, &next).await {
            self.fail(MutationKind::Remove, &e);
            return Err(e);
        }

        // Drop the local preview before confirming.
        self.commit(next.clone());
        self.confirm(store.as_ref(), next).await?;
        tracing::debug!(key = %key, "Removed from cart");
        Ok(())
    }

    async fn clear_cart(&self) -> Result<()> {
        let _op = self.core.acquire().await?;
        let store = self.store()?;
        let discarded = self.discard_unflushed();

        self.core.enter(SyncPhase::Mutating)?;
        let previous = std::mem::take(&mut *self.cart());

        if let Err(e) = store.clear().await {
            self.commit(previous);
            for key in discarded {
                self.unflushed().insert(key.clone());
                self.schedule_write(key);
            }
            self.fail(MutationKind::Clear, &e);
            return Err(e);
        }
        self.confirm(store.as_ref(), Cart::new()).await?;
        tracing::debug!(lines = previous.len(), "Cart cleared");
        Ok(())
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

    /// Switch to guest mode and hydrate from local storage. Caller holds the gate.
    fn enter_guest(&self) -> Result<()> {
        self.core.gate.set(Mode::Guest);
        let token = local::guest_token(self.storage.as_ref())?;
        self.core.switch_to(Owner::Guest(token));
        self.set_store(Arc::new(GuestStore::new(
            Arc::clone(&self.storage),
            self.core.gate.clone(),
        )));

        let lines = load_guest_cart(self.storage.as_ref())?;
        let (totals, rejected) = {
            let mut cart = self.cart();
            let rejected = cart.replace_valid(lines);
            (cart.totals(), rejected)
        };
        for e in rejected {
            tracing::warn!(error = %e, "Skipping invalid guest cart line");
        }
        tracing::debug!(count = totals.count, "Cart hydrated from local storage");
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

        self.discard_unflushed();
        if let Some(listener) = self.core.take_listener() {
            listener.stop().await;
        }

        let account = AccountStore::new(
            account_id,
            Arc::clone(&self.backends.remote),
            Arc::clone(&self.backends.catalog),
        );
        // Local storage is only readable while not in account mode.
        let migrated = if self.core.mode() == Mode::Account {
            0
        } else {
            self.migrate(&account).await?
        };

        self.core.switch_to(Owner::Account(account_id.to_string()));
        let store: Arc<dyn CartStore> = Arc::new(account);
        self.set_store(Arc::clone(&store));
        if migrated > 0 {
            self.core.events.emit(SessionEvent::Migrated { lines: migrated });
        }

        let refetched = self.refetch(store.as_ref()).await;
        self.listen(account_id).await;
        refetched?;
        Ok(migrated)
    }

    /// Push guest lines to `account` once, then clear them locally.
    async fn migrate(&self, account: &AccountStore) -> Result<usize> {
        let lines = load_guest_cart(self.storage.as_ref())?;
        if lines.is_empty() {
            return Ok(0);
        }

        self.core.enter(SyncPhase::Mutating)?;
        let migrated = match account.migrate(&lines).await {
            Ok(migrated) => migrated,
            Err(e) => {
                self.core.settle();
                tracing::warn!(account = %account.account_id(), error = %e, "Guest cart migration failed");
                return Err(e);
            }
        };
        if let Err(e) = self.storage.remove(keys::CART) {
            self.core.settle();
            return Err(e);
        }

        tracing::info!(account = %account.account_id(), lines = migrated, "Migrated guest cart");
        Ok(migrated)
    }

    async fn listen(&self, account_id: &str) {
        let filter = FeedFilter::new(Table::CartLines, account_id);
        match RealtimeListener::spawn(Arc::clone(&self.backends.feed), filter, self.this.clone())
            .await
        {
            Ok(listener) => {
                if let Some(previous) = self.core.install_listener(listener) {
                    previous.stop().await;
                }
            }
            Err(e) => {
                tracing::warn!(account = %account_id, error = %e, "Realtime cart updates unavailable");
            }
        }
    }

    async fn logout(&self) -> Result<()> {
        let _op = self.core.acquire_queued().await;
        self.discard_unflushed();
        if let Some(listener) = self.core.take_listener() {
            listener.stop().await;
        }
        self.core.clear_owed_resync();
        self.enter_guest()
    }

    async fn handle_remote_change(&self, event: ChangeEvent) -> bool {
        if self.core.mode() != Mode::Account || event.table != Table::CartLines {
            return false;
        }
        if self.has_unflushed() {
            self.defer(&event);
            return false;
        }
        let Some(_op) = self.core.try_acquire() else {
            self.defer(&event);
            return false;
        };

        let Ok(store) = self.store() else {
            return false;
        };
        match self.refetch(store.as_ref()).await {
            Ok(_) => true,
            Err(e) => {
                tracing::warn!(error = %e, "Cart refetch after remote change failed");
                false
            }
        }
    }

    fn defer(&self, event: &ChangeEvent) {
        tracing::debug!(kind = ?event.kind, "Remote cart change deferred while local work is in flight");
        self.core.owe_resync();
        self.core.events.emit(SessionEvent::RemoteChangeDeferred);
    }
}

#[async_trait]
impl ChangeTarget for CartInner {
    async fn on_remote_change(&self, event: ChangeEvent) {
        self.handle_remote_change(event).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;
    use crate::local::MemoryStorage;

    fn guest_session() -> (CartSession, Arc<MemoryStorage>) {
        let backend = MemoryBackend::new_shared();
        let storage = Arc::new(MemoryStorage::new());
        let session = CartSession::new(
            Backends::memory(backend),
            storage.clone(),
            SessionSettings::default(),
        );
        (session, storage)
    }

    fn bag(id: &str, price: i64) -> LineInput {
        LineInput::new(id, Decimal::new(price, 0))
    }

    #[tokio::test]
    async fn operations_before_identity_are_refused() {
        let (session, _) = guest_session();
        let result = session.add_item(bag("p1", 100_000)).await;
        assert!(matches!(result, Err(SyncError::IdentityUnresolved)));
        assert_eq!(session.mode(), Mode::Unresolved);
    }

    #[tokio::test]
    async fn bootstrap_runs_once() {
        let (session, _) = guest_session();
        assert!(!session.bootstrap(&IdentityState::Unresolved).await.unwrap());
        assert!(session.bootstrap(&IdentityState::Guest).await.unwrap());
        assert!(!session.bootstrap(&IdentityState::Guest).await.unwrap());
        assert_eq!(session.mode(), Mode::Guest);
    }

    #[tokio::test]
    async fn guest_add_opens_cart_and_persists() {
        let (session, storage) = guest_session();
        session.bootstrap(&IdentityState::Guest).await.unwrap();
        let mut events = session.events();

        session.add_item(bag("p1", 100_000).with_quantity(2)).await.unwrap();
        session.add_item(bag("p2", 250_000)).await.unwrap();

        assert_eq!(session.count(), 3);
        assert_eq!(session.total(), Decimal::new(450_000, 0));
        assert!(session.is_cart_open());
        assert!(storage.get(keys::CART).unwrap().is_some());
        assert_eq!(session.phase(), SyncPhase::Idle);

        let mut opened = 0;
        while let Ok(event) = events.try_recv() {
            if event == SessionEvent::CartOpened {
                opened += 1;
            }
        }
        assert_eq!(opened, 2);
    }

    #[tokio::test]
    async fn guest_state_survives_restart() {
        let (session, storage) = guest_session();
        session.bootstrap(&IdentityState::Guest).await.unwrap();
        session
            .add_item(bag("p1", 100_000).with_variant("red"))
            .await
            .unwrap();

        let restarted = CartSession::new(
            Backends::memory(MemoryBackend::new_shared()),
            storage,
            SessionSettings::default(),
        );
        restarted.bootstrap(&IdentityState::Guest).await.unwrap();
        assert_eq!(restarted.items().len(), 1);
        assert_eq!(restarted.items()[0].variant.as_deref(), Some("red"));
    }

    #[tokio::test]
    async fn guest_quantity_floor_and_idempotent_remove() {
        let (session, _) = guest_session();
        session.bootstrap(&IdentityState::Guest).await.unwrap();
        session.add_item(bag("p1", 100_000)).await.unwrap();

        session.update_quantity("p1", None, 4).await.unwrap();
        assert_eq!(session.count(), 4);

        session.update_quantity("p1", Some(""), 0).await.unwrap();
        assert!(session.items().is_empty());

        session.remove_item("p1", None).await.unwrap();
        session.remove_item("p1", None).await.unwrap();
        assert!(session.items().is_empty());
    }

    #[tokio::test]
    async fn cart_open_flag_can_be_reset() {
        let (session, _) = guest_session();
        session.bootstrap(&IdentityState::Guest).await.unwrap();
        session.add_item(bag("p1", 1)).await.unwrap();
        session.set_cart_open(false);
        assert!(!session.is_cart_open());
    }
}
