//! Cart session behaviour against the in-memory backend.
//!
//! Timers run on tokio's paused clock, so debounce windows elapse instantly.

use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;
use tote_engine::{CartRow, CatalogProduct, LineInput, SyncPhase};
use tote_sync::local::keys;
use tote_sync::{
    Backends, BusyPolicy, CartSession, IdentityState, LocalStorage, MemoryBackend, MemoryStorage,
    Mode, SessionEvent, SessionSettings, SyncError,
};

const DEBOUNCE: Duration = Duration::from_millis(600);

struct Harness {
    backend: Arc<MemoryBackend>,
    storage: Arc<MemoryStorage>,
    cart: CartSession,
}

fn harness_with(settings: SessionSettings) -> Harness {
    let backend = MemoryBackend::new_shared();
    for (id, name, price) in [
        ("p1", "Lotus Tote", 150_000),
        ("p2", "Saigon Clutch", 100_000),
        ("p3", "Hue Crossbody", 250_000),
    ] {
        backend.insert_product(CatalogProduct {
            id: id.into(),
            name: name.into(),
            price: Decimal::new(price, 0),
            sale_price: None,
            images: vec![format!("{id}.jpg")],
        });
    }
    let storage = Arc::new(MemoryStorage::new());
    let cart = CartSession::new(
        Backends::memory(backend.clone()),
        storage.clone(),
        settings,
    );
    Harness {
        backend,
        storage,
        cart,
    }
}

fn harness() -> Harness {
    harness_with(SessionSettings {
        debounce: DEBOUNCE,
        busy_policy: BusyPolicy::Queue,
    })
}

fn bag(id: &str, price: i64) -> LineInput {
    LineInput::new(id, Decimal::new(price, 0))
}

fn row(owner: &str, product: &str, quantity: u32) -> CartRow {
    CartRow {
        id: None,
        owner_id: owner.into(),
        product_id: product.into(),
        variant: String::new(),
        quantity,
    }
}

fn drain(events: &mut tokio::sync::broadcast::Receiver<SessionEvent>) -> Vec<SessionEvent> {
    let mut seen = Vec::new();
    while let Ok(event) = events.try_recv() {
        seen.push(event);
    }
    seen
}

// ============================================================================
// End-to-end scenarios
// ============================================================================

#[tokio::test(start_paused = true)]
async fn guest_cart_migrates_on_login() {
    let h = harness();
    h.cart.bootstrap(&IdentityState::Guest).await.unwrap();

    h.cart
        .add_item(bag("p1", 150_000).with_variant("red"))
        .await
        .unwrap();
    assert_eq!(h.cart.count(), 1);
    assert_eq!(h.cart.total(), Decimal::new(150_000, 0));

    h.cart
        .add_item(bag("p1", 150_000).with_variant("red").with_quantity(2))
        .await
        .unwrap();
    assert_eq!(h.cart.count(), 3);
    assert_eq!(h.cart.total(), Decimal::new(450_000, 0));
    assert!(h.backend.calls().is_empty());

    let migrated = h.cart.login("acct-1").await.unwrap();
    assert_eq!(migrated, 1);

    let upserts = h.backend.cart_upserts();
    assert_eq!(upserts.len(), 1);
    assert_eq!(upserts[0].owner_id, "acct-1");
    assert_eq!(upserts[0].product_id, "p1");
    assert_eq!(upserts[0].variant, "red");
    assert_eq!(upserts[0].quantity, 3);

    let items = h.cart.items();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].quantity, 3);
    assert_eq!(items[0].variant.as_deref(), Some("red"));
    assert_eq!(items[0].display_name, "Lotus Tote");
    assert!(items[0].remote_row_id.is_some());
    assert_eq!(h.cart.total(), Decimal::new(450_000, 0));
    assert_eq!(h.cart.mode(), Mode::Account);
}

#[tokio::test(start_paused = true)]
async fn migration_happens_exactly_once() {
    let h = harness();
    h.cart.bootstrap(&IdentityState::Guest).await.unwrap();
    h.cart.add_item(bag("p1", 150_000)).await.unwrap();
    h.cart.add_item(bag("p2", 100_000)).await.unwrap();

    assert_eq!(h.cart.login("acct-1").await.unwrap(), 2);
    assert_eq!(h.backend.cart_upserts().len(), 2);
    assert!(h.storage.get(keys::CART).unwrap().is_none());

    h.cart.logout().await.unwrap();
    assert!(h.cart.items().is_empty());
    assert_eq!(h.cart.mode(), Mode::Guest);

    assert_eq!(h.cart.login("acct-1").await.unwrap(), 0);
    assert_eq!(h.backend.cart_upserts().len(), 2);
    assert_eq!(h.cart.items().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn repeated_login_is_a_no_op() {
    let h = harness();
    h.cart.login("acct-1").await.unwrap();
    h.backend.clear_calls();

    assert_eq!(h.cart.login("acct-1").await.unwrap(), 0);
    assert!(h.backend.calls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn failed_migration_keeps_guest_cart() {
    let h = harness();
    h.cart.bootstrap(&IdentityState::Guest).await.unwrap();
    h.cart.add_item(bag("p1", 150_000)).await.unwrap();

    h.backend.fail_next_writes(1);
    assert!(h.cart.login("acct-1").await.is_err());
    assert_eq!(h.cart.mode(), Mode::Guest);
    assert!(h.storage.get(keys::CART).unwrap().is_some());
    assert_eq!(h.cart.phase(), SyncPhase::Idle);

    assert_eq!(h.cart.login("acct-1").await.unwrap(), 1);
    assert_eq!(h.cart.items().len(), 1);
}

// ============================================================================
// Mode isolation
// ============================================================================

#[tokio::test(start_paused = true)]
async fn account_mode_never_writes_local_storage() {
    let h = harness();
    h.backend.seed_cart_row(row("acct-1", "p2", 1));
    h.cart.login("acct-1").await.unwrap();
    let writes = h.storage.write_count();

    h.cart.add_item(bag("p1", 150_000)).await.unwrap();
    h.cart.update_quantity("p2", None, 4).await.unwrap();
    tokio::time::sleep(DEBOUNCE * 2).await;
    h.cart.remove_item("p1", None).await.unwrap();
    h.cart.clear_cart().await.unwrap();

    assert_eq!(h.storage.write_count(), writes);
}

#[tokio::test(start_paused = true)]
async fn guest_mode_never_calls_the_backend() {
    let h = harness();
    h.cart.bootstrap(&IdentityState::Guest).await.unwrap();

    h.cart.add_item(bag("p1", 150_000)).await.unwrap();
    h.cart.update_quantity("p1", None, 3).await.unwrap();
    assert!(!h.cart.has_pending_writes());
    h.cart.remove_item("p1", None).await.unwrap();
    h.cart.add_item(bag("p2", 100_000)).await.unwrap();
    h.cart.clear_cart().await.unwrap();

    assert!(h.backend.calls().is_empty());
    assert!(h.storage.get(keys::CART).unwrap().is_none());
}

// ============================================================================
// Debounced quantity writes
// ============================================================================

#[tokio::test(start_paused = true)]
async fn rapid_quantity_changes_write_once() {
    let h = harness();
    h.backend.seed_cart_row(row("acct-1", "p2", 1));
    h.cart.login("acct-1").await.unwrap();
    h.backend.clear_calls();

    h.cart.update_quantity("p2", None, 5).await.unwrap();
    h.cart.update_quantity("p2", None, 2).await.unwrap();
    assert_eq!(h.cart.count(), 2);
    assert!(h.cart.has_pending_writes());
    assert!(h.backend.cart_upserts().is_empty());

    tokio::time::sleep(DEBOUNCE * 2).await;

    let upserts = h.backend.cart_upserts();
    assert_eq!(upserts.len(), 1);
    assert_eq!(upserts[0].quantity, 2);
    assert!(!h.cart.has_pending_writes());
    assert_eq!(h.backend.cart_rows("acct-1")[0].quantity, 2);
}

#[tokio::test(start_paused = true)]
async fn failed_debounced_write_resyncs() {
    let h = harness();
    h.backend.seed_cart_row(row("acct-1", "p2", 1));
    h.cart.login("acct-1").await.unwrap();
    let mut events = h.cart.events();

    h.backend.fail_next_writes(1);
    h.cart.update_quantity("p2", None, 4).await.unwrap();
    assert_eq!(h.cart.count(), 4);

    tokio::time::sleep(DEBOUNCE * 2).await;

    assert_eq!(h.cart.count(), 1);
    assert!(drain(&mut events)
        .iter()
        .any(|e| matches!(e, SessionEvent::SyncFailed { .. })));
}

#[tokio::test(start_paused = true)]
async fn remove_cancels_pending_quantity_write() {
    let h = harness();
    h.backend.seed_cart_row(row("acct-1", "p2", 1));
    h.cart.login("acct-1").await.unwrap();
    h.backend.clear_calls();

    h.cart.update_quantity("p2", None, 3).await.unwrap();
    h.cart.remove_item("p2", None).await.unwrap();
    tokio::time::sleep(DEBOUNCE * 2).await;

    assert!(h.backend.cart_upserts().is_empty());
    assert!(h.backend.cart_rows("acct-1").is_empty());
    assert!(h.cart.items().is_empty());
}

#[tokio::test(start_paused = true)]
async fn quantity_below_one_removes_remotely() {
    let h = harness();
    h.backend.seed_cart_row(row("acct-1", "p2", 2));
    h.cart.login("acct-1").await.unwrap();

    h.cart.update_quantity("p2", None, 0).await.unwrap();
    assert!(h.cart.items().is_empty());
    assert!(h.backend.cart_rows("acct-1").is_empty());
    assert!(!h.cart.has_pending_writes());
}

#[tokio::test(start_paused = true)]
async fn quantity_change_for_missing_line_is_ignored() {
    let h = harness();
    h.cart.login("acct-1").await.unwrap();
    h.backend.clear_calls();

    h.cart.update_quantity("p9", None, 3).await.unwrap();
    tokio::time::sleep(DEBOUNCE * 2).await;

    assert!(h.backend.calls().is_empty());
    assert!(h.cart.items().is_empty());
}

fn remote_quantity(h: &Harness, product: &str) -> Option<u32> {
    h.backend
        .cart_rows("acct-1")
        .into_iter()
        .find(|r| r.product_id == product)
        .map(|r| r.quantity)
}

fn local_quantity(h: &Harness, product: &str) -> Option<u32> {
    h.cart
        .items()
        .into_iter()
        .find(|l| l.product_id == product)
        .map(|l| l.quantity)
}

fn upserts_for(h: &Harness, product: &str) -> Vec<u32> {
    h.backend
        .cart_upserts()
        .into_iter()
        .filter(|r| r.product_id == product)
        .map(|r| r.quantity)
        .collect()
}

#[tokio::test(start_paused = true)]
async fn add_keeps_pending_quantity_of_other_line() {
    let h = harness();
    h.backend.seed_cart_row(row("acct-1", "p1", 1));
    h.cart.login("acct-1").await.unwrap();
    h.backend.clear_calls();

    h.cart.update_quantity("p1", None, 5).await.unwrap();
    h.cart.add_item(bag("p2", 100_000)).await.unwrap();

    assert_eq!(local_quantity(&h, "p1"), Some(5));
    assert_eq!(remote_quantity(&h, "p1"), Some(5));
    assert!(!h.cart.has_pending_writes());

    tokio::time::sleep(DEBOUNCE * 2).await;

    assert_eq!(local_quantity(&h, "p1"), Some(5));
    assert_eq!(remote_quantity(&h, "p1"), Some(5));
    assert_eq!(upserts_for(&h, "p1"), vec![5]);
    assert_eq!(h.cart.count(), 6);
}

#[tokio::test(start_paused = true)]
async fn resync_writes_pending_quantity_first() {
    let h = harness();
    h.backend.seed_cart_row(row("acct-1", "p1", 1));
    h.cart.login("acct-1").await.unwrap();
    h.backend.clear_calls();

    h.cart.update_quantity("p1", None, 7).await.unwrap();
    let totals = h.cart.resync().await.unwrap();

    assert_eq!(totals.count, 7);
    assert_eq!(remote_quantity(&h, "p1"), Some(7));

    tokio::time::sleep(DEBOUNCE * 2).await;

    assert_eq!(local_quantity(&h, "p1"), Some(7));
    assert_eq!(upserts_for(&h, "p1"), vec![7]);
}

#[tokio::test(start_paused = true)]
async fn remove_keeps_pending_quantity_of_other_line() {
    let h = harness();
    h.backend.seed_cart_row(row("acct-1", "p1", 1));
    h.backend.seed_cart_row(row("acct-1", "p2", 1));
    h.cart.login("acct-1").await.unwrap();

    h.cart.update_quantity("p1", None, 3).await.unwrap();
    h.cart.remove_item("p2", None).await.unwrap();
    tokio::time::sleep(DEBOUNCE * 2).await;

    assert_eq!(local_quantity(&h, "p1"), Some(3));
    assert_eq!(remote_quantity(&h, "p1"), Some(3));
    assert_eq!(remote_quantity(&h, "p2"), None);
}

#[tokio::test(start_paused = true)]
async fn clear_discards_pending_quantity_writes() {
    let h = harness();
    h.backend.seed_cart_row(row("acct-1", "p1", 1));
    h.backend.seed_cart_row(row("acct-1", "p2", 1));
    h.cart.login("acct-1").await.unwrap();
    h.backend.clear_calls();

    h.cart.update_quantity("p1", None, 4).await.unwrap();
    h.cart.clear_cart().await.unwrap();
    tokio::time::sleep(DEBOUNCE * 2).await;

    assert!(h.cart.items().is_empty());
    assert!(h.backend.cart_rows("acct-1").is_empty());
    assert!(h.backend.cart_upserts().is_empty());
}

#[tokio::test(start_paused = true)]
async fn failed_write_does_not_revert_other_pending_line() {
    let h = harness();
    h.backend.seed_cart_row(row("acct-1", "p1", 1));
    h.backend.seed_cart_row(row("acct-1", "p2", 1));
    h.cart.login("acct-1").await.unwrap();

    h.cart.update_quantity("p1", None, 4).await.unwrap();
    tokio::time::sleep(DEBOUNCE / 2).await;
    h.cart.update_quantity("p2", None, 6).await.unwrap();

    // p1 fires first and fails; the reload that follows must keep p2.
    h.backend.fail_next_writes(1);
    tokio::time::sleep(DEBOUNCE * 2).await;

    assert_eq!(local_quantity(&h, "p1"), Some(1));
    assert_eq!(remote_quantity(&h, "p1"), Some(1));
    assert_eq!(local_quantity(&h, "p2"), Some(6));
    assert_eq!(remote_quantity(&h, "p2"), Some(6));
    assert!(!h.cart.has_pending_writes());
}

// ============================================================================
// Confirmed writes and rollback
// ============================================================================

#[tokio::test(start_paused = true)]
async fn account_add_walks_the_phase_machine() {
    let h = harness();
    h.backend.silence_feed(true);
    h.cart.login("acct-1").await.unwrap();
    let mut events = h.cart.events();

    h.cart.add_item(bag("p1", 150_000)).await.unwrap();

    let phases: Vec<SyncPhase> = drain(&mut events)
        .into_iter()
        .filter_map(|e| match e {
            SessionEvent::PhaseChanged(phase) => Some(phase),
            _ => None,
        })
        .collect();
    assert_eq!(
        phases,
        vec![SyncPhase::Mutating, SyncPhase::Resyncing, SyncPhase::Idle]
    );
}

#[tokio::test(start_paused = true)]
async fn failed_add_leaves_cart_unchanged() {
    let h = harness();
    h.cart.login("acct-1").await.unwrap();
    h.cart.add_item(bag("p1", 150_000)).await.unwrap();

    h.backend.fail_next_writes(1);
    let result = h.cart.add_item(bag("p2", 100_000)).await;
    assert!(matches!(result, Err(SyncError::Backend(_))));
    assert_eq!(h.cart.items().len(), 1);
    assert_eq!(h.cart.phase(), SyncPhase::Idle);
}

#[tokio::test(start_paused = true)]
async fn failed_refetch_is_reported_and_recoverable() {
    let h = harness();
    h.backend.silence_feed(true);
    h.cart.login("acct-1").await.unwrap();

    h.backend.fail_next_reads(1);
    assert!(h.cart.add_item(bag("p1", 150_000)).await.is_err());
    assert!(h.cart.items().is_empty());

    h.cart.resync().await.unwrap();
    assert_eq!(h.cart.items().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn failed_clear_restores_previous_cart() {
    let h = harness();
    h.cart.login("acct-1").await.unwrap();
    h.cart.add_item(bag("p1", 150_000)).await.unwrap();
    h.cart.add_item(bag("p2", 100_000)).await.unwrap();

    h.backend.fail_next_writes(1);
    assert!(h.cart.clear_cart().await.is_err());
    assert_eq!(h.cart.items().len(), 2);
    assert_eq!(h.cart.total(), Decimal::new(250_000, 0));

    h.cart.clear_cart().await.unwrap();
    assert!(h.cart.items().is_empty());
    assert!(h.backend.cart_rows("acct-1").is_empty());
}

#[tokio::test(start_paused = true)]
async fn invalid_remote_line_is_skipped() {
    let h = harness();
    h.backend.insert_product(CatalogProduct {
        id: "p4".into(),
        name: "Mispriced Satchel".into(),
        price: Decimal::new(-1, 0),
        sale_price: None,
        images: Vec::new(),
    });
    h.backend.seed_cart_row(row("acct-1", "p1", 2));
    h.backend.seed_cart_row(row("acct-1", "p4", 1));

    h.cart.login("acct-1").await.unwrap();
    assert_eq!(h.cart.items().len(), 1);
    assert_eq!(h.cart.count(), 2);

    h.cart.add_item(bag("p2", 100_000)).await.unwrap();
    assert_eq!(h.cart.count(), 3);
}

#[tokio::test(start_paused = true)]
async fn remove_prefers_row_id() {
    let h = harness();
    h.backend.seed_cart_row(row("acct-1", "p2", 1));
    h.cart.login("acct-1").await.unwrap();
    h.backend.clear_calls();

    h.cart.remove_item("p2", None).await.unwrap();
    h.cart.remove_item("p2", None).await.unwrap();

    let deletes: Vec<_> = h
        .backend
        .calls()
        .into_iter()
        .filter(|c| c.is_write())
        .collect();
    assert_eq!(deletes.len(), 1);
    assert!(matches!(
        &deletes[0],
        tote_sync::backend::BackendCall::DeleteCart(tote_engine::RowMatcher::RowId { .. })
    ));
}

// ============================================================================
// Busy policies
// ============================================================================

#[tokio::test(start_paused = true)]
async fn reject_policy_reports_busy() {
    let h = harness_with(SessionSettings {
        debounce: DEBOUNCE,
        busy_policy: BusyPolicy::Reject,
    });
    h.cart.login("acct-1").await.unwrap();
    h.backend.set_latency(Duration::from_millis(100));

    let first = tokio::spawn({
        let cart = h.cart.clone();
        async move { cart.add_item(bag("p1", 150_000)).await }
    });
    tokio::time::sleep(Duration::from_millis(10)).await;

    let second = h.cart.add_item(bag("p2", 100_000)).await;
    assert!(matches!(second, Err(SyncError::Busy)));

    first.await.unwrap().unwrap();
    assert_eq!(h.cart.items().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn queue_policy_runs_every_call() {
    let h = harness();
    h.cart.login("acct-1").await.unwrap();
    h.backend.set_latency(Duration::from_millis(100));

    let first = tokio::spawn({
        let cart = h.cart.clone();
        async move { cart.add_item(bag("p1", 150_000)).await }
    });
    tokio::time::sleep(Duration::from_millis(10)).await;

    h.cart.add_item(bag("p2", 100_000)).await.unwrap();
    first.await.unwrap().unwrap();

    assert_eq!(h.cart.items().len(), 2);
    assert_eq!(h.cart.count(), 2);
}

// ============================================================================
// Bootstrap
// ============================================================================

#[tokio::test(start_paused = true)]
async fn bootstrap_waits_for_identity() {
    let h = harness();
    h.backend.seed_cart_row(row("acct-1", "p3", 2));
    let identity = tote_sync::IdentityHandle::new();
    let mut rx = identity.subscribe();

    let pending = tokio::spawn({
        let cart = h.cart.clone();
        async move { cart.bootstrap_from(&mut rx).await }
    });
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(h.cart.mode(), Mode::Unresolved);
    assert!(h.backend.calls().is_empty());

    identity.login("acct-1");
    assert!(pending.await.unwrap().unwrap());
    assert_eq!(h.cart.count(), 2);
    assert_eq!(h.cart.total(), Decimal::new(500_000, 0));
}

#[tokio::test(start_paused = true)]
async fn failed_first_login_allows_guest_fallback() {
    let h = harness();
    let earlier = CartSession::new(
        Backends::memory(h.backend.clone()),
        h.storage.clone(),
        SessionSettings {
            debounce: DEBOUNCE,
            busy_policy: BusyPolicy::Queue,
        },
    );
    earlier.bootstrap(&IdentityState::Guest).await.unwrap();
    earlier.add_item(bag("p1", 150_000)).await.unwrap();

    h.backend.fail_next_writes(1);
    let account = IdentityState::Account("acct-1".into());
    assert!(h.cart.apply_identity(&account).await.is_err());
    assert_eq!(h.cart.mode(), Mode::Unresolved);

    h.cart.apply_identity(&IdentityState::Guest).await.unwrap();
    assert_eq!(h.cart.mode(), Mode::Guest);
    assert_eq!(h.cart.items().len(), 1);
    h.cart.add_item(bag("p2", 100_000)).await.unwrap();
    assert_eq!(h.cart.count(), 2);

    h.cart.apply_identity(&account).await.unwrap();
    assert_eq!(h.cart.mode(), Mode::Account);
    assert_eq!(h.backend.cart_rows("acct-1").len(), 2);
}

#[tokio::test(start_paused = true)]
async fn guest_bootstrap_fails_open_on_corrupt_storage() {
    let h = harness();
    h.storage.set(keys::CART, "{not json").unwrap();

    assert!(h.cart.bootstrap(&IdentityState::Guest).await.unwrap());
    assert!(h.cart.items().is_empty());
}
