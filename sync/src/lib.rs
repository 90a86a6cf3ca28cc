//! # Tote Sync
//!
//! Async cart and favorites reconciliation for the Tote storefront.
//!
//! Sessions keep an in-memory cart (or favorites set) consistent with one of
//! two stores: local storage for guests, the remote collection for signed-in
//! accounts. Logging in migrates guest data to the account exactly once.
//!
//! ```text
//! IdentityHandle --watch--> follow_identity --> CartSession / FavoritesSession
//!                                                  |            |
//!                                     GuestStore (LocalStorage) |
//!                                     AccountStore (RemoteCollection + CatalogLookup)
//!                                                  ^
//!                          ChangeFeed --> RealtimeListener
//! ```
//!
//! The pure data model and its invariants live in `tote-engine`.

pub mod backend;
pub mod cart;
pub mod config;
pub mod debounce;
pub mod error;
pub mod events;
pub mod favorites;
pub mod identity;
pub mod listener;
pub mod local;
mod session;
pub mod store;

pub use backend::{
    Backends, CatalogLookup, ChangeFeed, FeedFilter, FeedHub, MemoryBackend, PgBackend, PgFeed,
    RemoteCollection, Subscription,
};
pub use cart::CartSession;
pub use config::{BusyPolicy, Config, ConfigError, SessionSettings};
pub use debounce::DebounceScheduler;
pub use error::{Result, SyncError};
pub use events::{EventBus, SessionEvent};
pub use favorites::FavoritesSession;
pub use identity::{follow_identity, IdentityAware, IdentityHandle, IdentityState};
pub use listener::{ChangeTarget, RealtimeListener};
pub use local::{FileStorage, LocalStorage, MemoryStorage};
pub use store::{Mode, ModeGate};
