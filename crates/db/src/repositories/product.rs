use async_trait::async_trait;
use chrono::Utc;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use tastebud_core::domain::product::{Category, Product, ProductId, StoreId};
use tastebud_core::errors::StoreError;
use tastebud_core::recommendations::ProductCatalog;

use super::{format_timestamp, parse_decimal, RepositoryError};
use crate::DbPool;

const PRODUCT_COLUMNS: &str =
    "id, name, price, image_ref, category, store_id, store_name, available";

pub struct SqlProductRepository {
    pool: DbPool,
}

impl SqlProductRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub async fn save(&self, product: &Product) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO product (
                id, name, price, image_ref, category, store_id, store_name, available, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                price = excluded.price,
                image_ref = excluded.image_ref,
                category = excluded.category,
                store_id = excluded.store_id,
                store_name = excluded.store_name,
                available = excluded.available,
                updated_at = excluded.updated_at",
        )
        .bind(&product.id.0)
        .bind(&product.name)
        .bind(product.price.to_string())
        .bind(&product.image_ref)
        .bind(product.category.as_str())
        .bind(&product.store_id.0)
        .bind(&product.store_name)
        .bind(product.available)
        .bind(format_timestamp(Utc::now()))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn fetch(&self, id: &ProductId) -> Result<Option<Product>, RepositoryError> {
        let row = sqlx::query(&format!("SELECT {PRODUCT_COLUMNS} FROM product WHERE id = ?"))
            .bind(&id.0)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(product_from_row).transpose()
    }

    pub async fn list(
        &self,
        category: Option<&Category>,
        available_only: bool,
    ) -> Result<Vec<Product>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {PRODUCT_COLUMNS} FROM product
             WHERE (? IS NULL OR category = ?) AND (? = 0 OR available = 1)
             ORDER BY id ASC"
        ))
        .bind(category.map(Category::as_str))
        .bind(category.map(Category::as_str))
        .bind(available_only)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(product_from_row).collect()
    }
}

fn product_from_row(row: &SqliteRow) -> Result<Product, RepositoryError> {
    let price: String = row.try_get("price")?;
    let category: String = row.try_get("category")?;

    Ok(Product {
        id: ProductId(row.try_get("id")?),
        name: row.try_get("name")?,
        price: parse_decimal("price", &price)?,
        image_ref: row.try_get("image_ref")?,
        category: Category::parse(&category)
            .map_err(|error| RepositoryError::Decode(error.to_string()))?,
        store_id: StoreId(row.try_get("store_id")?),
        store_name: row.try_get("store_name")?,
        available: row.try_get("available")?,
    })
}

#[async_trait]
impl ProductCatalog for SqlProductRepository {
    async fn find_by_id(&self, product_id: &ProductId) -> Result<Option<Product>, StoreError> {
        Ok(self.fetch(product_id).await?)
    }

    async fn find_available_by_category(
        &self,
        category: &Category,
    ) -> Result<Vec<Product>, StoreError> {
        Ok(self.list(Some(category), true).await?)
    }

    async fn list_available(&self) -> Result<Vec<Product>, StoreError> {
        Ok(self.list(None, true).await?)
    }
}
