//! Catalog data used to hydrate remote cart rows.

use crate::{CartLine, CartRow, ProductId};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Display name for rows whose product is missing from the catalog.
pub const UNKNOWN_PRODUCT_NAME: &str = "Unknown Product";

/// A product as returned by the catalog lookup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogProduct {
    pub id: ProductId,
    pub name: String,
    /// List price
    pub price: Decimal,
    /// Sale price, if the product is discounted
    #[serde(default)]
    pub sale_price: Option<Decimal>,
    #[serde(default)]
    pub images: Vec<String>,
}

impl CatalogProduct {
    /// Sale price when set and positive, list price otherwise.
    pub fn effective_price(&self) -> Decimal {
        match self.sale_price {
            Some(sale) if sale > Decimal::ZERO => sale,
            _ => self.price,
        }
    }

    /// First image, or empty.
    pub fn primary_image(&self) -> &str {
        self.images.first().map(String::as_str).unwrap_or_default()
    }
}

/// Join remote cart rows with catalog products into cart lines.
///
/// Rows keep their order. Rows whose quantity is zero are skipped.
pub fn hydrate(rows: &[CartRow], products: &[CatalogProduct]) -> Vec<CartLine> {
    let by_id: HashMap<&str, &CatalogProduct> =
        products.iter().map(|p| (p.id.as_str(), p)).collect();

    rows.iter()
        .filter(|row| row.quantity > 0)
        .map(|row| {
            let product = by_id.get(row.product_id.as_str());
            CartLine {
                product_id: row.product_id.clone(),
                remote_row_id: row.id.clone(),
                variant: row.key().variant().map(str::to_string),
                quantity: row.quantity,
                unit_price: product.map_or(Decimal::ZERO, |p| p.effective_price()),
                display_name: product
                    .map_or_else(|| UNKNOWN_PRODUCT_NAME.to_string(), |p| p.name.clone()),
                image_url: product
                    .map(|p| p.primary_image().to_string())
                    .unwrap_or_default(),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn product(id: &str, price: i64, sale: Option<i64>) -> CatalogProduct {
        CatalogProduct {
            id: id.into(),
            name: format!("Bag {id}"),
            price: Decimal::new(price, 0),
            sale_price: sale.map(|s| Decimal::new(s, 0)),
            images: vec![format!("https://cdn.example/{id}.jpg")],
        }
    }

    fn row(product_id: &str, variant: &str, quantity: u32) -> CartRow {
        CartRow {
            id: Some(format!("row-{product_id}")),
            owner_id: "acct-1".into(),
            product_id: product_id.into(),
            variant: variant.into(),
            quantity,
        }
    }

    #[test]
    fn effective_price_prefers_sale() {
        assert_eq!(
            product("p1", 200, Some(150)).effective_price(),
            Decimal::new(150, 0)
        );
        assert_eq!(product("p1", 200, None).effective_price(), Decimal::new(200, 0));
        // a zero sale price counts as no sale
        assert_eq!(
            product("p1", 200, Some(0)).effective_price(),
            Decimal::new(200, 0)
        );
    }

    #[test]
    fn hydrate_joins_rows() {
        let rows = vec![row("p1", "red", 2), row("p2", "", 1)];
        let products = vec![product("p2", 300, None), product("p1", 200, Some(150))];

        let lines = hydrate(&rows, &products);

        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].product_id, "p1");
        assert_eq!(lines[0].variant.as_deref(), Some("red"));
        assert_eq!(lines[0].unit_price, Decimal::new(150, 0));
        assert_eq!(lines[0].remote_row_id.as_deref(), Some("row-p1"));
        assert_eq!(lines[1].variant, None);
        assert_eq!(lines[1].image_url, "https://cdn.example/p2.jpg");
    }

    #[test]
    fn hydrate_missing_product() {
        let lines = hydrate(&[row("ghost", "", 1)], &[]);
        assert_eq!(lines[0].display_name, UNKNOWN_PRODUCT_NAME);
        assert_eq!(lines[0].unit_price, Decimal::ZERO);
        assert_eq!(lines[0].image_url, "");
    }

    #[test]
    fn hydrate_skips_empty_rows() {
        let lines = hydrate(&[row("p1", "", 0)], &[product("p1", 1, None)]);
        assert!(lines.is_empty());
    }
}
