//! # Tote Engine
//!
//! Deterministic cart and favorites state for the Tote storefront.
//!
//! This crate holds the pure half of the cart reconciliation layer: the data
//! model, its invariants, aggregates and the phase machine that the async
//! `tote-sync` crate drives. It performs no IO of any kind.
//!
//! ## Design Principles
//!
//! - **No IO**: storage, network and timers live in `tote-sync`
//! - **Invariants in types**: a [`Cart`] can never hold two lines with the
//!   same [`LineKey`] or a line with zero quantity
//! - **Testable**: every rule here is exercised without mocks
//!
//! ## Core Concepts
//!
//! ### Lines and keys
//!
//! A [`CartLine`] is one purchasable selection. Lines are identified by a
//! [`LineKey`] of product id plus variant, where "no variant" and the empty
//! variant are the same key.
//!
//! ### Aggregates
//!
//! [`Cart::count`] and [`Cart::total`] are computed from the lines on every
//! call; there is no cached aggregate to drift.
//!
//! ### Phases and policies
//!
//! Every mutation moves a [`PhaseMachine`] through
//! `Idle -> Mutating -> Resyncing -> Idle`. Each [`MutationKind`] is bound
//! to a [`MutationPolicy`]: confirmed round trips for adds, removals and
//! clears, optimistic debounced writes for quantity steppers.
//!
//! ## Quick Start
//!
//! ```rust
//! use rust_decimal::Decimal;
//! use tote_engine::{Cart, LineInput, LineKey};
//!
//! let mut cart = Cart::new();
//! let input = LineInput::new("p1", Decimal::new(150_000, 0))
//!     .with_variant("red")
//!     .with_quantity(1);
//! cart.add(input.clone()).unwrap();
//! cart.add(input.with_quantity(2)).unwrap();
//!
//! assert_eq!(cart.count(), 3);
//! assert_eq!(cart.total(), Decimal::new(450_000, 0));
//! assert_eq!(cart.get(&LineKey::new("p1", Some("red"))).unwrap().quantity, 3);
//! ```
//!
//! ## Persistence
//!
//! Guest carts are persisted with [`GuestCartSnapshot`] and guest favorites
//! with [`GuestFavoritesSnapshot`]. Remote rows use [`CartRow`] and
//! [`FavoriteRow`].

pub mod cart;
pub mod catalog;
pub mod error;
pub mod favorites;
pub mod line;
pub mod phase;
pub mod record;
pub mod snapshot;

// Re-export main types at crate root
pub use cart::{AddOutcome, Cart, Totals};
pub use catalog::{hydrate, CatalogProduct, UNKNOWN_PRODUCT_NAME};
pub use error::Error;
pub use favorites::FavoriteSet;
pub use line::{CartLine, LineInput, LineKey};
pub use phase::{MutationKind, MutationPolicy, PhaseMachine, SyncPhase};
pub use record::{CartRow, ChangeEvent, ChangeKind, FavoriteRow, Owner, RowMatcher, Table};
pub use snapshot::{GuestCartSnapshot, GuestFavoritesSnapshot, SNAPSHOT_FORMAT_VERSION};

/// Type aliases for clarity
pub type ProductId = String;
pub type RowId = String;
pub type OwnerId = String;
pub type Quantity = u32;
