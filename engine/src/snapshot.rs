//! Snapshot types for persisting guest state to local storage.
//!
//! Guest carts and favorites never leave the device. They are written as
//! versioned JSON documents; the flat array layout of older clients is still
//! accepted on read.

use crate::{error::Result, Cart, CartLine, Error, FavoriteSet, ProductId};
use serde::{Deserialize, Serialize};

/// Version of the snapshot format for future compatibility.
pub const SNAPSHOT_FORMAT_VERSION: u32 = 1;

/// Persisted guest cart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GuestCartSnapshot {
    /// Snapshot format version
    pub format_version: u32,
    /// Lines in cart order
    pub lines: Vec<CartLine>,
}

/// Persisted guest favorites.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GuestFavoritesSnapshot {
    pub format_version: u32,
    pub product_ids: Vec<ProductId>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum CartLayout {
    Versioned(GuestCartSnapshot),
    Legacy(Vec<CartLine>),
}

#[derive(Deserialize)]
#[serde(untagged)]
enum FavoritesLayout {
    Versioned(GuestFavoritesSnapshot),
    Legacy(Vec<ProductId>),
}

fn check_version(format_version: u32) -> Result<()> {
    if format_version > SNAPSHOT_FORMAT_VERSION {
        return Err(Error::InvalidSnapshot(format!(
            "unsupported snapshot format version: {} (max supported: {})",
            format_version, SNAPSHOT_FORMAT_VERSION
        )));
    }
    Ok(())
}

impl GuestCartSnapshot {
    /// Snapshot the current cart.
    pub fn from_cart(cart: &Cart) -> Self {
        Self {
            format_version: SNAPSHOT_FORMAT_VERSION,
            lines: cart.lines().to_vec(),
        }
    }

    /// Rebuild a cart, enforcing its invariants.
    pub fn into_cart(self) -> Result<Cart> {
        Cart::from_lines(self.lines)
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| Error::InvalidSnapshot(e.to_string()))
    }

    /// Deserialize from JSON, accepting the legacy bare-array layout.
    pub fn from_json(json: &str) -> Result<Self> {
        let layout: CartLayout =
            serde_json::from_str(json).map_err(|e| Error::InvalidSnapshot(e.to_string()))?;

        let snapshot = match layout {
            CartLayout::Versioned(snapshot) => snapshot,
            CartLayout::Legacy(lines) => Self {
                format_version: SNAPSHOT_FORMAT_VERSION,
                lines,
            },
        };
        check_version(snapshot.format_version)?;
        Ok(snapshot)
    }
}

impl GuestFavoritesSnapshot {
    pub fn from_set(set: &FavoriteSet) -> Self {
        Self {
            format_version: SNAPSHOT_FORMAT_VERSION,
            product_ids: set.ids().to_vec(),
        }
    }

    pub fn into_set(self) -> FavoriteSet {
        FavoriteSet::from_ids(self.product_ids)
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| Error::InvalidSnapshot(e.to_string()))
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let layout: FavoritesLayout =
            serde_json::from_str(json).map_err(|e| Error::InvalidSnapshot(e.to_string()))?;

        let snapshot = match layout {
            FavoritesLayout::Versioned(snapshot) => snapshot,
            FavoritesLayout::Legacy(product_ids) => Self {
                format_version: SNAPSHOT_FORMAT_VERSION,
                product_ids,
            },
        };
        check_version(snapshot.format_version)?;
        Ok(snapshot)
    }
}
