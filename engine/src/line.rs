//! Cart line types.

use crate::{error::Result, Error, ProductId, Quantity, RowId};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Normalize a variant so that "no variant" and the empty variant collapse.
pub fn normalize_variant(variant: Option<&str>) -> Option<String> {
    match variant {
        Some(v) if !v.is_empty() => Some(v.to_string()),
        _ => None,
    }
}

/// Uniqueness key of a cart line: product id plus normalized variant.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LineKey {
    /// Product identifier
    pub product_id: ProductId,
    /// Variant, empty when the product has none
    variant: String,
}

impl LineKey {
    /// Create a key, normalizing the variant.
    pub fn new(product_id: impl Into<ProductId>, variant: Option<&str>) -> Self {
        Self {
            product_id: product_id.into(),
            variant: variant.unwrap_or_default().to_string(),
        }
    }

    /// The variant, or `None` when the product has none.
    pub fn variant(&self) -> Option<&str> {
        if self.variant.is_empty() {
            None
        } else {
            Some(&self.variant)
        }
    }

    /// The variant as stored remotely (empty string for none).
    pub fn variant_column(&self) -> &str {
        &self.variant
    }
}

impl fmt::Display for LineKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.variant() {
            Some(v) => write!(f, "{}/{}", self.product_id, v),
            None => f.write_str(&self.product_id),
        }
    }
}

/// One purchasable selection in the cart.
///
/// Field aliases accept the flat layout older guest carts were saved with
/// (`id`, `color`, `price`, `name`, `image`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CartLine {
    /// Catalog product identifier
    #[serde(alias = "id")]
    pub product_id: ProductId,
    /// Identifier of the backing remote row, once synced
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_row_id: Option<RowId>,
    /// Variant such as a color
    #[serde(default, alias = "color", skip_serializing_if = "Option::is_none")]
    pub variant: Option<String>,
    /// Number of units, always at least one
    pub quantity: Quantity,
    /// Effective catalog price at the time the line was added or re-fetched
    #[serde(alias = "price")]
    pub unit_price: Decimal,
    /// Product name for rendering
    #[serde(default, alias = "name")]
    pub display_name: String,
    /// Primary product image
    #[serde(default, alias = "image")]
    pub image_url: String,
}

impl CartLine {
    /// The uniqueness key of this line.
    pub fn key(&self) -> LineKey {
        LineKey::new(self.product_id.clone(), self.variant.as_deref())
    }

    /// Whether this line belongs to `key`.
    pub fn matches(&self, key: &LineKey) -> bool {
        self.product_id == key.product_id
            && self.variant.as_deref().unwrap_or_default() == key.variant_column()
    }

    /// `quantity * unit_price`.
    pub fn line_total(&self) -> Decimal {
        self.unit_price * Decimal::from(self.quantity)
    }

    /// Normalize the variant and check field invariants.
    pub(crate) fn normalized(mut self) -> Result<Self> {
        if self.product_id.is_empty() {
            return Err(Error::EmptyProductId);
        }
        if self.quantity == 0 {
            return Err(Error::InvalidQuantity(0));
        }
        if self.unit_price.is_sign_negative() && !self.unit_price.is_zero() {
            return Err(Error::NegativePrice(self.product_id));
        }
        self.variant = normalize_variant(self.variant.as_deref());
        Ok(self)
    }
}

/// Arguments of an add-to-cart request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineInput {
    pub product_id: ProductId,
    pub variant: Option<String>,
    pub unit_price: Decimal,
    pub display_name: String,
    pub image_url: String,
    /// Units to add (defaults to 1)
    pub quantity: Quantity,
}

impl LineInput {
    /// Create an input for one unit of a product at `unit_price`.
    pub fn new(product_id: impl Into<ProductId>, unit_price: Decimal) -> Self {
        Self {
            product_id: product_id.into(),
            variant: None,
            unit_price,
            display_name: String::new(),
            image_url: String::new(),
            quantity: 1,
        }
    }

    pub fn with_variant(mut self, variant: impl Into<String>) -> Self {
        self.variant = normalize_variant(Some(&variant.into()));
        self
    }

    pub fn with_quantity(mut self, quantity: Quantity) -> Self {
        self.quantity = quantity;
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = name.into();
        self
    }

    pub fn with_image(mut self, image_url: impl Into<String>) -> Self {
        self.image_url = image_url.into();
        self
    }

    /// The key this input targets.
    pub fn key(&self) -> LineKey {
        LineKey::new(self.product_id.clone(), self.variant.as_deref())
    }

    /// Check the input can become a line.
    pub fn validate(&self) -> Result<()> {
        if self.product_id.is_empty() {
            return Err(Error::EmptyProductId);
        }
        if self.quantity == 0 {
            return Err(Error::InvalidQuantity(0));
        }
        if self.unit_price.is_sign_negative() && !self.unit_price.is_zero() {
            return Err(Error::NegativePrice(self.product_id.clone()));
        }
        Ok(())
    }

    /// Build a fresh line holding `quantity` units.
    pub fn into_line(self, quantity: Quantity) -> CartLine {
        CartLine {
            product_id: self.product_id,
            remote_row_id: None,
            variant: normalize_variant(self.variant.as_deref()),
            quantity,
            unit_price: self.unit_price,
            display_name: self.display_name,
            image_url: self.image_url,
        }
    }
}
