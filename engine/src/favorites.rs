//! Favorites - the liked-products set.

use crate::ProductId;
use serde::{Deserialize, Serialize};

/// Insertion-ordered set of liked product ids.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FavoriteSet {
    ids: Vec<ProductId>,
}

impl FavoriteSet {
    pub fn new() -> Self {
        Self { ids: Vec::new() }
    }

    /// Build a set, dropping duplicates and empty ids.
    pub fn from_ids(ids: impl IntoIterator<Item = ProductId>) -> Self {
        let mut set = Self::new();
        set.replace_all(ids);
        set
    }

    pub fn contains(&self, product_id: &str) -> bool {
        self.ids.iter().any(|id| id == product_id)
    }

    /// Insert an id. Returns false if it was already present.
    pub fn insert(&mut self, product_id: impl Into<ProductId>) -> bool {
        let product_id = product_id.into();
        if product_id.is_empty() || self.contains(&product_id) {
            return false;
        }
        self.ids.push(product_id);
        true
    }

    /// Remove an id. Returns false if it was absent.
    pub fn remove(&mut self, product_id: &str) -> bool {
        let before = self.ids.len();
        self.ids.retain(|id| id != product_id);
        self.ids.len() != before
    }

    /// Flip membership and return the new membership.
    pub fn toggle(&mut self, product_id: &str) -> bool {
        if self.remove(product_id) {
            false
        } else {
            self.insert(product_id)
        }
    }

    pub fn replace_all(&mut self, ids: impl IntoIterator<Item = ProductId>) {
        self.ids.clear();
        for id in ids {
            self.insert(id);
        }
    }

    pub fn clear(&mut self) {
        self.ids.clear();
    }

    pub fn ids(&self) -> &[ProductId] {
        &self.ids
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}
