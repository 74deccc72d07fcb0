use async_trait::async_trait;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use tastebud_core::domain::behavior::BehaviorProfile;
use tastebud_core::domain::product::{Category, ProductId, StoreId};
use tastebud_core::domain::user::UserId;
use tastebud_core::errors::StoreError;
use tastebud_core::recommendations::{BehaviorProfileStore, SimilarUser, SimilarityIndex};

use super::{
    format_timestamp, parse_decimal, parse_timestamp, parse_u32, sort_key, RepositoryError,
};
use crate::DbPool;

const PROFILE_COLUMNS: &str = "user_id, product_id, product_name, category, store_id, store_name,
    purchase_count, total_spent, average_quantity, is_favorite, affinity_score, preferred_hour,
    last_purchase_at, created_at, updated_at";

pub struct SqlBehaviorProfileRepository {
    pool: DbPool,
}

impl SqlBehaviorProfileRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub async fn upsert(&self, profile: &BehaviorProfile) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO behavior_profile (
                user_id, product_id, product_name, category, store_id, store_name,
                purchase_count, total_spent, average_quantity, is_favorite, affinity_score,
                affinity_rank, preferred_hour, last_purchase_at, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(user_id, product_id) DO UPDATE SET
                product_name = excluded.product_name,
                category = excluded.category,
                store_id = excluded.store_id,
                store_name = excluded.store_name,
                purchase_count = excluded.purchase_count,
                total_spent = excluded.total_spent,
                average_quantity = excluded.average_quantity,
                is_favorite = excluded.is_favorite,
                affinity_score = excluded.affinity_score,
                affinity_rank = excluded.affinity_rank,
                preferred_hour = excluded.preferred_hour,
                last_purchase_at = excluded.last_purchase_at,
                updated_at = excluded.updated_at",
        )
        .bind(&profile.user_id.0)
        .bind(&profile.product_id.0)
        .bind(&profile.product_name)
        .bind(profile.category.as_str())
        .bind(&profile.store_id.0)
        .bind(&profile.store_name)
        .bind(i64::from(profile.purchase_count))
        .bind(profile.total_spent.to_string())
        .bind(profile.average_quantity.map(|average| average.to_string()))
        .bind(profile.is_favorite)
        .bind(profile.affinity_score.to_string())
        .bind(sort_key(profile.affinity_score))
        .bind(i64::from(profile.preferred_hour))
        .bind(format_timestamp(profile.last_purchase_at))
        .bind(format_timestamp(profile.created_at))
        .bind(format_timestamp(profile.updated_at))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn fetch(
        &self,
        user_id: &UserId,
        product_id: &ProductId,
    ) -> Result<Option<BehaviorProfile>, RepositoryError> {
        let row = sqlx::query(&format!(
            "SELECT {PROFILE_COLUMNS} FROM behavior_profile WHERE user_id = ? AND product_id = ?"
        ))
        .bind(&user_id.0)
        .bind(&product_id.0)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(profile_from_row).transpose()
    }

    pub async fn list_by_user(
        &self,
        user_id: &UserId,
        favorites_only: bool,
    ) -> Result<Vec<BehaviorProfile>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {PROFILE_COLUMNS} FROM behavior_profile
             WHERE user_id = ? AND (? = 0 OR is_favorite = 1)
             ORDER BY affinity_rank DESC, product_id ASC"
        ))
        .bind(&user_id.0)
        .bind(favorites_only)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(profile_from_row).collect()
    }

    pub async fn list_by_category(
        &self,
        user_id: &UserId,
        category: &Category,
    ) -> Result<Vec<BehaviorProfile>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {PROFILE_COLUMNS} FROM behavior_profile
             WHERE user_id = ? AND category = ?
             ORDER BY purchase_count DESC, product_id ASC"
        ))
        .bind(&user_id.0)
        .bind(category.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(profile_from_row).collect()
    }

    pub async fn list_by_hour(
        &self,
        user_id: &UserId,
        hour: u8,
    ) -> Result<Vec<BehaviorProfile>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {PROFILE_COLUMNS} FROM behavior_profile
             WHERE user_id = ? AND preferred_hour = ?
             ORDER BY affinity_rank DESC, product_id ASC"
        ))
        .bind(&user_id.0)
        .bind(i64::from(hour))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(profile_from_row).collect()
    }

    /// The target's profiles plus every other profile sharing a product or category with them.
    pub async fn similarity_candidates(
        &self,
        user_id: &UserId,
    ) -> Result<Vec<BehaviorProfile>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {PROFILE_COLUMNS} FROM behavior_profile
             WHERE user_id = ?
                OR product_id IN (SELECT product_id FROM behavior_profile WHERE user_id = ?)
                OR category IN (SELECT category FROM behavior_profile WHERE user_id = ?)"
        ))
        .bind(&user_id.0)
        .bind(&user_id.0)
        .bind(&user_id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(profile_from_row).collect()
    }

    async fn count_rows(&self, sql: &str) -> Result<u64, RepositoryError> {
        let count: i64 = sqlx::query_scalar(sql).fetch_one(&self.pool).await?;
        Ok(count.max(0) as u64)
    }
}

fn profile_from_row(row: &SqliteRow) -> Result<BehaviorProfile, RepositoryError> {
    let category: String = row.try_get("category")?;
    let total_spent: String = row.try_get("total_spent")?;
    let average_quantity: Option<String> = row.try_get("average_quantity")?;
    let affinity_score: String = row.try_get("affinity_score")?;
    let preferred_hour: i64 = row.try_get("preferred_hour")?;

    Ok(BehaviorProfile {
        user_id: UserId(row.try_get("user_id")?),
        product_id: ProductId(row.try_get("product_id")?),
        product_name: row.try_get("product_name")?,
        category: Category::parse(&category)
            .map_err(|error| RepositoryError::Decode(error.to_string()))?,
        store_id: StoreId(row.try_get("store_id")?),
        store_name: row.try_get("store_name")?,
        purchase_count: parse_u32("purchase_count", row.try_get("purchase_count")?)?,
        total_spent: parse_decimal("total_spent", &total_spent)?,
        average_quantity: average_quantity
            .map(|value| parse_decimal("average_quantity", &value))
            .transpose()?,
        is_favorite: row.try_get("is_favorite")?,
        affinity_score: parse_decimal("affinity_score", &affinity_score)?,
        preferred_hour: u8::try_from(preferred_hour).map_err(|_| {
            RepositoryError::Decode(format!("invalid `preferred_hour`: {preferred_hour}"))
        })?,
        last_purchase_at: parse_timestamp("last_purchase_at", row.try_get("last_purchase_at")?)?,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
        updated_at: parse_timestamp("updated_at", row.try_get("updated_at")?)?,
    })
}

#[async_trait]
impl BehaviorProfileStore for SqlBehaviorProfileRepository {
    async fn find_profile(
        &self,
        user_id: &UserId,
        product_id: &ProductId,
    ) -> Result<Option<BehaviorProfile>, StoreError> {
        Ok(self.fetch(user_id, product_id).await?)
    }

    async fn save_profile(&self, profile: BehaviorProfile) -> Result<(), StoreError> {
        Ok(self.upsert(&profile).await?)
    }

    async fn find_profiles_by_user(
        &self,
        user_id: &UserId,
    ) -> Result<Vec<BehaviorProfile>, StoreError> {
        Ok(self.list_by_user(user_id, false).await?)
    }

    async fn find_favorites_by_user(
        &self,
        user_id: &UserId,
    ) -> Result<Vec<BehaviorProfile>, StoreError> {
        Ok(self.list_by_user(user_id, true).await?)
    }

    async fn find_by_user_and_category(
        &self,
        user_id: &UserId,
        category: &Category,
    ) -> Result<Vec<BehaviorProfile>, StoreError> {
        Ok(self.list_by_category(user_id, category).await?)
    }

    async fn find_by_user_and_hour(
        &self,
        user_id: &UserId,
        hour: u8,
    ) -> Result<Vec<BehaviorProfile>, StoreError> {
        Ok(self.list_by_hour(user_id, hour).await?)
    }

    async fn find_similar_users(
        &self,
        user_id: &UserId,
        min_matches: u32,
    ) -> Result<Vec<SimilarUser>, StoreError> {
        let candidates = self.similarity_candidates(user_id).await?;
        let index = SimilarityIndex::build(&candidates);
        Ok(index.similar_to(user_id, min_matches))
    }

    async fn count_profiles(&self) -> Result<u64, StoreError> {
        Ok(self.count_rows("SELECT COUNT(*) FROM behavior_profile").await?)
    }

    async fn count_users(&self) -> Result<u64, StoreError> {
        Ok(self.count_rows("SELECT COUNT(DISTINCT user_id) FROM behavior_profile").await?)
    }
}
