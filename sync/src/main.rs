//! Tote Sync - headless cart and favorites session.
//!
//! Connects to PostgreSQL, follows the configured identity and logs what the
//! sessions observe until interrupted.

use std::sync::Arc;
use tote_sync::backend::{create_pool, run_migrations};
use tote_sync::{
    follow_identity, Backends, CartSession, Config, FavoritesSession, FileStorage,
    IdentityAware, IdentityHandle, PgBackend, PgFeed, SessionEvent,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tote_sync=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    dotenvy::dotenv().ok();
    let config = Config::from_env()?;

    let pool = create_pool(&config.database_url).await?;

    tracing::info!("Running database migrations...");
    run_migrations(&pool).await?;

    let feed = Arc::new(PgFeed::start(&pool).await?);
    let backends = Backends::postgres(PgBackend::new(pool), feed);
    let storage = Arc::new(FileStorage::open(&config.storage_path));

    let cart = CartSession::new(backends.clone(), storage.clone(), config.session);
    let favorites = FavoritesSession::new(backends, storage, config.session);

    let mut cart_events = cart.events();
    tokio::spawn(async move {
        while let Ok(event) = cart_events.recv().await {
            match event {
                SessionEvent::Resynced { totals } => {
                    tracing::info!(count = totals.count, total = %totals.total, "Cart");
                }
                SessionEvent::SyncFailed { kind, message } => {
                    tracing::warn!(%kind, %message, "Cart sync failed");
                }
                other => tracing::debug!(event = ?other, "Cart event"),
            }
        }
    });

    let mut favorite_events = favorites.events();
    tokio::spawn(async move {
        while let Ok(event) = favorite_events.recv().await {
            if let SessionEvent::FavoritesResynced { count } = event {
                tracing::info!(count, "Favorites");
            }
        }
    });

    let identity = IdentityHandle::new();
    let sessions: Vec<Arc<dyn IdentityAware>> =
        vec![Arc::new(cart.clone()), Arc::new(favorites.clone())];
    let follower = follow_identity(identity.subscribe(), sessions);

    match &config.account_id {
        Some(account_id) => identity.login(account_id.clone()),
        None => identity.resolve_guest(),
    }

    tokio::signal::ctrl_c().await?;
    tracing::info!(
        lines = cart.items().len(),
        favorites = favorites.len(),
        "Shutting down"
    );
    follower.abort();

    Ok(())
}
