//! Remote record shapes and change notifications.

use crate::{CartLine, LineKey, OwnerId, ProductId, Quantity, RowId};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Who a remote row belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "lowercase")]
pub enum Owner {
    /// An authenticated account
    Account(OwnerId),
    /// An anonymous session token
    Guest(OwnerId),
}

impl Owner {
    pub fn id(&self) -> &OwnerId {
        match self {
            Owner::Account(id) | Owner::Guest(id) => id,
        }
    }

    pub fn is_account(&self) -> bool {
        matches!(self, Owner::Account(_))
    }
}

impl fmt::Display for Owner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Owner::Account(id) => write!(f, "account:{id}"),
            Owner::Guest(id) => write!(f, "guest:{id}"),
        }
    }
}

/// A row of the remote cart collection.
///
/// The conflict key for upserts is `(owner_id, product_id, variant)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CartRow {
    /// Row identifier assigned by the backend
    #[serde(default)]
    pub id: Option<RowId>,
    pub owner_id: OwnerId,
    pub product_id: ProductId,
    /// Variant column, empty for none
    #[serde(default)]
    pub variant: String,
    pub quantity: Quantity,
}

impl CartRow {
    /// Row carrying `line` for `owner_id`.
    pub fn from_line(owner_id: impl Into<OwnerId>, line: &CartLine) -> Self {
        Self {
            id: line.remote_row_id.clone(),
            owner_id: owner_id.into(),
            product_id: line.product_id.clone(),
            variant: line.variant.clone().unwrap_or_default(),
            quantity: line.quantity,
        }
    }

    pub fn key(&self) -> LineKey {
        LineKey::new(self.product_id.clone(), Some(&self.variant))
    }
}

/// A row of the remote favorites collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FavoriteRow {
    #[serde(default)]
    pub id: Option<RowId>,
    pub owner_id: OwnerId,
    pub product_id: ProductId,
}

impl FavoriteRow {
    pub fn new(owner_id: impl Into<OwnerId>, product_id: impl Into<ProductId>) -> Self {
        Self {
            id: None,
            owner_id: owner_id.into(),
            product_id: product_id.into(),
        }
    }
}

/// Selects remote rows for deletion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "by", rename_all = "camelCase")]
pub enum RowMatcher {
    /// A single row by its identifier
    RowId { id: RowId },
    /// The cart row for one key of one owner
    Line { owner_id: OwnerId, key: LineKey },
    /// The favorite row for one product of one owner
    Product {
        owner_id: OwnerId,
        product_id: ProductId,
    },
    /// Every row of one owner
    Owner { owner_id: OwnerId },
}

impl RowMatcher {
    /// Match the row behind `line`, preferring its row id when known.
    pub fn for_line(owner_id: impl Into<OwnerId>, line: &CartLine) -> Self {
        match &line.remote_row_id {
            Some(id) => RowMatcher::RowId { id: id.clone() },
            None => RowMatcher::Line {
                owner_id: owner_id.into(),
                key: line.key(),
            },
        }
    }

    pub fn matches_cart(&self, row: &CartRow) -> bool {
        match self {
            RowMatcher::RowId { id } => row.id.as_ref() == Some(id),
            RowMatcher::Line { owner_id, key } => {
                row.owner_id == *owner_id && row.key() == *key
            }
            RowMatcher::Product {
                owner_id,
                product_id,
            } => row.owner_id == *owner_id && row.product_id == *product_id,
            RowMatcher::Owner { owner_id } => row.owner_id == *owner_id,
        }
    }

    pub fn matches_favorite(&self, row: &FavoriteRow) -> bool {
        match self {
            RowMatcher::RowId { id } => row.id.as_ref() == Some(id),
            RowMatcher::Line { .. } => false,
            RowMatcher::Product {
                owner_id,
                product_id,
            } => row.owner_id == *owner_id && row.product_id == *product_id,
            RowMatcher::Owner { owner_id } => row.owner_id == *owner_id,
        }
    }
}

/// Remote collections that publish changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Table {
    CartLines,
    Favorites,
}

impl Table {
    pub fn as_str(&self) -> &'static str {
        match self {
            Table::CartLines => "cart_lines",
            Table::Favorites => "favorites",
        }
    }
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of remote mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

/// A change notification from the remote change feed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeEvent {
    pub table: Table,
    #[serde(alias = "op")]
    pub kind: ChangeKind,
    #[serde(alias = "owner")]
    pub owner_id: OwnerId,
}

impl ChangeEvent {
    pub fn new(table: Table, kind: ChangeKind, owner_id: impl Into<OwnerId>) -> Self {
        Self {
            table,
            kind,
            owner_id: owner_id.into(),
        }
    }
}
