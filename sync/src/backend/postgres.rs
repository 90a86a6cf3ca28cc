//! PostgreSQL implementation of the remote collections and catalog.

use super::{CatalogLookup, RemoteCollection};
use crate::error::Result;
use async_trait::async_trait;
use rust_decimal::Decimal;
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Row};
use tote_engine::{CartRow, CatalogProduct, FavoriteRow, ProductId, RowMatcher};

/// Create a new database connection pool.
pub async fn create_pool(database_url: &str) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(database_url)
        .await?;
    Ok(pool)
}

/// Run database migrations.
pub async fn run_migrations(pool: &PgPool) -> Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

/// A stored cart row from the database.
#[derive(Debug)]
struct StoredCartRow {
    id: String,
    owner_id: String,
    product_id: String,
    variant: String,
    quantity: i32,
    updated_at: chrono::DateTime<chrono::Utc>,
}

impl<'r> sqlx::FromRow<'r, PgRow> for StoredCartRow {
    fn from_row(row: &'r PgRow) -> std::result::Result<Self, sqlx::Error> {
        Ok(StoredCartRow {
            id: row.try_get("id")?,
            owner_id: row.try_get("owner_id")?,
            product_id: row.try_get("product_id")?,
            variant: row.try_get("variant")?,
            quantity: row.try_get("quantity")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

impl StoredCartRow {
    /// Convert database row to an engine row.
    fn to_row(&self) -> CartRow {
        CartRow {
            id: Some(self.id.clone()),
            owner_id: self.owner_id.clone(),
            product_id: self.product_id.clone(),
            variant: self.variant.clone(),
            quantity: u32::try_from(self.quantity).unwrap_or(0),
        }
    }
}

#[derive(Debug)]
struct StoredFavorite {
    id: String,
    owner_id: String,
    product_id: String,
}

impl<'r> sqlx::FromRow<'r, PgRow> for StoredFavorite {
    fn from_row(row: &'r PgRow) -> std::result::Result<Self, sqlx::Error> {
        Ok(StoredFavorite {
            id: row.try_get("id")?,
            owner_id: row.try_get("owner_id")?,
            product_id: row.try_get("product_id")?,
        })
    }
}

impl From<StoredFavorite> for FavoriteRow {
    fn from(stored: StoredFavorite) -> Self {
        FavoriteRow {
            id: Some(stored.id),
            owner_id: stored.owner_id,
            product_id: stored.product_id,
        }
    }
}

#[derive(Debug)]
struct StoredProduct {
    id: String,
    name: String,
    price: Decimal,
    sale_price: Option<Decimal>,
    images: Vec<String>,
}

impl<'r> sqlx::FromRow<'r, PgRow> for StoredProduct {
    fn from_row(row: &'r PgRow) -> std::result::Result<Self, sqlx::Error> {
        Ok(StoredProduct {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            price: row.try_get("price")?,
            sale_price: row.try_get("sale_price")?,
            images: row.try_get("images")?,
        })
    }
}

impl From<StoredProduct> for CatalogProduct {
    fn from(stored: StoredProduct) -> Self {
        CatalogProduct {
            id: stored.id,
            name: stored.name,
            price: stored.price,
            sale_price: stored.sale_price,
            images: stored.images,
        }
    }
}

/// Remote collections backed by PostgreSQL.
#[derive(Debug, Clone)]
pub struct PgBackend {
    pool: PgPool,
}

impl PgBackend {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl RemoteCollection for PgBackend {
    async fn list_cart(&self, owner_id: &str) -> Result<Vec<CartRow>> {
        let stored = sqlx::query_as::<_, StoredCartRow>(
            r#"
            SELECT id::text AS id, owner_id, product_id, variant, quantity, updated_at
            FROM cart_lines
            WHERE owner_id = $1
            ORDER BY created_at ASC, id ASC
            "#,
        )
        .bind(owner_id)
        .fetch_all(&self.pool)
        .await?;

        tracing::debug!(
            owner = %owner_id,
            rows = stored.len(),
            latest = ?stored.iter().map(|r| r.updated_at).max(),
            "Listed cart rows"
        );
        Ok(stored.iter().map(StoredCartRow::to_row).collect())
    }

    async fn upsert_cart(&self, row: &CartRow) -> Result<CartRow> {
        let quantity = i32::try_from(row.quantity).unwrap_or(i32::MAX);
        let stored = sqlx::query_as::<_, StoredCartRow>(
            r#"
            INSERT INTO cart_lines (owner_id, product_id, variant, quantity)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (owner_id, product_id, variant) DO UPDATE SET
                quantity = EXCLUDED.quantity,
                updated_at = now()
            RETURNING id::text AS id, owner_id, product_id, variant, quantity, updated_at
            "#,
        )
        .bind(&row.owner_id)
        .bind(&row.product_id)
        .bind(&row.variant)
        .bind(quantity)
        .fetch_one(&self.pool)
        .await?;

        Ok(stored.to_row())
    }

    async fn delete_cart(&self, matcher: &RowMatcher) -> Result<u64> {
        let result = match matcher {
            RowMatcher::RowId { id } => {
                sqlx::query("DELETE FROM cart_lines WHERE id::text = $1")
                    .bind(id)
                    .execute(&self.pool)
                    .await?
            }
            RowMatcher::Line { owner_id, key } => {
                sqlx::query(
                    "DELETE FROM cart_lines WHERE owner_id = $1 AND product_id = $2 AND variant = $3",
                )
                .bind(owner_id)
                .bind(&key.product_id)
                .bind(key.variant_column())
                .execute(&self.pool)
                .await?
            }
            RowMatcher::Product {
                owner_id,
                product_id,
            } => {
                sqlx::query("DELETE FROM cart_lines WHERE owner_id = $1 AND product_id = $2")
                    .bind(owner_id)
                    .bind(product_id)
                    .execute(&self.pool)
                    .await?
            }
            RowMatcher::Owner { owner_id } => {
                sqlx::query("DELETE FROM cart_lines WHERE owner_id = $1")
                    .bind(owner_id)
                    .execute(&self.pool)
                    .await?
            }
        };

        Ok(result.rows_affected())
    }

    async fn list_favorites(&self, owner_id: &str) -> Result<Vec<FavoriteRow>> {
        let stored = sqlx::query_as::<_, StoredFavorite>(
            r#"
            SELECT id::text AS id, owner_id, product_id
            FROM favorites
            WHERE owner_id = $1
            ORDER BY created_at ASC, id ASC
            "#,
        )
        .bind(owner_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(stored.into_iter().map(FavoriteRow::from).collect())
    }

    async fn upsert_favorite(&self, row: &FavoriteRow) -> Result<FavoriteRow> {
        let stored = sqlx::query_as::<_, StoredFavorite>(
            r#"
            INSERT INTO favorites (owner_id, product_id)
            VALUES ($1, $2)
            ON CONFLICT (owner_id, product_id) DO UPDATE SET
                product_id = EXCLUDED.product_id
            RETURNING id::text AS id, owner_id, product_id
            "#,
        )
        .bind(&row.owner_id)
        .bind(&row.product_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(stored.into())
    }

    async fn delete_favorites(&self, matcher: &RowMatcher) -> Result<u64> {
        let result = match matcher {
            RowMatcher::RowId { id } => {
                sqlx::query("DELETE FROM favorites WHERE id::text = $1")
                    .bind(id)
                    .execute(&self.pool)
                    .await?
            }
            RowMatcher::Product {
                owner_id,
                product_id,
            } => {
                sqlx::query("DELETE FROM favorites WHERE owner_id = $1 AND product_id = $2")
                    .bind(owner_id)
                    .bind(product_id)
                    .execute(&self.pool)
                    .await?
            }
            RowMatcher::Owner { owner_id } => {
                sqlx::query("DELETE FROM favorites WHERE owner_id = $1")
                    .bind(owner_id)
                    .execute(&self.pool)
                    .await?
            }
            // favorites have no variant column
            RowMatcher::Line { .. } => return Ok(0),
        };

        Ok(result.rows_affected())
    }
}

#[async_trait]
impl CatalogLookup for PgBackend {
    async fn list_by_ids(&self, ids: &[ProductId]) -> Result<Vec<CatalogProduct>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let stored = sqlx::query_as::<_, StoredProduct>(
            r#"
            SELECT id, name, price, sale_price, images
            FROM products
            WHERE id = ANY($1)
            "#,
        )
        .bind(ids)
        .fetch_all(&self.pool)
        .await?;

        Ok(stored.into_iter().map(CatalogProduct::from).collect())
    }
}
