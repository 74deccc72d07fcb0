use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use tastebud_core::domain::product::{Category, ProductId, StoreId};
use tastebud_core::domain::recommendation::{Recommendation, RecommendationId, RecommendationType};
use tastebud_core::domain::user::UserId;
use tastebud_core::errors::StoreError;
use tastebud_core::recommendations::RecommendationStore;

use super::{
    format_timestamp, parse_decimal, parse_optional_timestamp, parse_timestamp, parse_u32,
    sort_key, RepositoryError,
};
use crate::DbPool;

const RECOMMENDATION_COLUMNS: &str = "id, user_id, product_id, predicted_score,
    recommendation_type, product_name, category, price, image_ref, store_id, store_name,
    times_shown, was_accepted, shown_at, accepted_at, generated_at";

const INSERT_RECOMMENDATION: &str = "INSERT INTO recommendation (
        id, user_id, product_id, predicted_score, score_rank, recommendation_type,
        product_name, category, price, image_ref, store_id, store_name,
        times_shown, was_accepted, shown_at, accepted_at, generated_at
    ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)";

pub struct SqlRecommendationRepository {
    pool: DbPool,
}

impl SqlRecommendationRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Inserts every row in one transaction; a failure leaves nothing behind.
    pub async fn insert_batch(&self, rows: &[Recommendation]) -> Result<(), RepositoryError> {
        if rows.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await?;
        for row in rows {
            sqlx::query(INSERT_RECOMMENDATION)
                .bind(&row.id.0)
                .bind(&row.user_id.0)
                .bind(&row.product_id.0)
                .bind(row.predicted_score.to_string())
                .bind(sort_key(row.predicted_score))
                .bind(row.recommendation_type.as_str())
                .bind(&row.product_name)
                .bind(row.category.as_str())
                .bind(row.price.to_string())
                .bind(&row.image_ref)
                .bind(&row.store_id.0)
                .bind(&row.store_name)
                .bind(i64::from(row.times_shown))
                .bind(row.was_accepted)
                .bind(row.shown_at.map(format_timestamp))
                .bind(row.accepted_at.map(format_timestamp))
                .bind(format_timestamp(row.generated_at))
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;

        Ok(())
    }

    /// Writes the feedback columns of an existing row. Returns whether a row matched.
    pub async fn update_feedback(&self, row: &Recommendation) -> Result<bool, RepositoryError> {
        let result = sqlx::query(
            "UPDATE recommendation
             SET times_shown = ?, was_accepted = ?, shown_at = ?, accepted_at = ?
             WHERE id = ?",
        )
        .bind(i64::from(row.times_shown))
        .bind(row.was_accepted)
        .bind(row.shown_at.map(format_timestamp))
        .bind(row.accepted_at.map(format_timestamp))
        .bind(&row.id.0)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    pub async fn fetch(
        &self,
        id: &RecommendationId,
    ) -> Result<Option<Recommendation>, RepositoryError> {
        let row = sqlx::query(&format!(
            "SELECT {RECOMMENDATION_COLUMNS} FROM recommendation WHERE id = ?"
        ))
        .bind(&id.0)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(recommendation_from_row).transpose()
    }

    pub async fn list_by_user(
        &self,
        user_id: &UserId,
        limit: Option<usize>,
    ) -> Result<Vec<Recommendation>, RepositoryError> {
        // SQLite treats a negative LIMIT as unbounded.
        let limit = limit.map(|limit| i64::try_from(limit).unwrap_or(i64::MAX)).unwrap_or(-1);
        let rows = sqlx::query(&format!(
            "SELECT {RECOMMENDATION_COLUMNS} FROM recommendation
             WHERE user_id = ?
             ORDER BY score_rank DESC, generated_at ASC, id ASC
             LIMIT ?"
        ))
        .bind(&user_id.0)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(recommendation_from_row).collect()
    }

    pub async fn contains(
        &self,
        user_id: &UserId,
        product_id: &ProductId,
    ) -> Result<bool, RepositoryError> {
        let found: i64 = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM recommendation WHERE user_id = ? AND product_id = ?)",
        )
        .bind(&user_id.0)
        .bind(&product_id.0)
        .fetch_one(&self.pool)
        .await?;

        Ok(found != 0)
    }

    pub async fn purge_before(
        &self,
        user_id: &UserId,
        cutoff: DateTime<Utc>,
    ) -> Result<u64, RepositoryError> {
        let result = sqlx::query("DELETE FROM recommendation WHERE user_id = ? AND generated_at < ?")
            .bind(&user_id.0)
            .bind(format_timestamp(cutoff))
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }

    pub async fn count_rows(&self) -> Result<u64, RepositoryError> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM recommendation").fetch_one(&self.pool).await?;
        Ok(count.max(0) as u64)
    }
}

fn recommendation_from_row(row: &SqliteRow) -> Result<Recommendation, RepositoryError> {
    let predicted_score: String = row.try_get("predicted_score")?;
    let recommendation_type: String = row.try_get("recommendation_type")?;
    let category: String = row.try_get("category")?;
    let price: String = row.try_get("price")?;

    Ok(Recommendation {
        id: RecommendationId(row.try_get("id")?),
        user_id: UserId(row.try_get("user_id")?),
        product_id: ProductId(row.try_get("product_id")?),
        predicted_score: parse_decimal("predicted_score", &predicted_score)?,
        recommendation_type: RecommendationType::parse(&recommendation_type).ok_or_else(|| {
            RepositoryError::Decode(format!("unknown recommendation type `{recommendation_type}`"))
        })?,
        product_name: row.try_get("product_name")?,
        category: Category::parse(&category)
            .map_err(|error| RepositoryError::Decode(error.to_string()))?,
        price: parse_decimal("price", &price)?,
        image_ref: row.try_get("image_ref")?,
        store_id: StoreId(row.try_get("store_id")?),
        store_name: row.try_get("store_name")?,
        times_shown: parse_u32("times_shown", row.try_get("times_shown")?)?,
        was_accepted: row.try_get("was_accepted")?,
        shown_at: parse_optional_timestamp("shown_at", row.try_get("shown_at")?)?,
        accepted_at: parse_optional_timestamp("accepted_at", row.try_get("accepted_at")?)?,
        generated_at: parse_timestamp("generated_at", row.try_get("generated_at")?)?,
    })
}

#[async_trait]
impl RecommendationStore for SqlRecommendationRepository {
    async fn exists(&self, user_id: &UserId, product_id: &ProductId) -> Result<bool, StoreError> {
        Ok(self.contains(user_id, product_id).await?)
    }

    async fn save_all(&self, recommendations: Vec<Recommendation>) -> Result<(), StoreError> {
        Ok(self.insert_batch(&recommendations).await?)
    }

    async fn save(&self, recommendation: Recommendation) -> Result<bool, StoreError> {
        Ok(self.update_feedback(&recommendation).await?)
    }

    async fn find_by_id(
        &self,
        id: &RecommendationId,
    ) -> Result<Option<Recommendation>, StoreError> {
        Ok(self.fetch(id).await?)
    }

    async fn top_for_user(
        &self,
        user_id: &UserId,
        limit: usize,
    ) -> Result<Vec<Recommendation>, StoreError> {
        Ok(self.list_by_user(user_id, Some(limit)).await?)
    }

    async fn list_for_user(&self, user_id: &UserId) -> Result<Vec<Recommendation>, StoreError> {
        Ok(self.list_by_user(user_id, None).await?)
    }

    async fn delete_generated_before(
        &self,
        user_id: &UserId,
        cutoff: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        Ok(self.purge_before(user_id, cutoff).await?)
    }

    async fn count(&self) -> Result<u64, StoreError> {
        Ok(self.count_rows().await?)
    }
}
