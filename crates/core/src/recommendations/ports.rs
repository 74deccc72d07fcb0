//! Persistence boundary consumed by the recommendation engine.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::behavior::BehaviorProfile;
use crate::domain::product::{Category, Product, ProductId};
use crate::domain::recommendation::{Recommendation, RecommendationId};
use crate::domain::user::UserId;
use crate::errors::StoreError;
use crate::recommendations::types::SimilarUser;

#[async_trait]
pub trait BehaviorProfileStore: Send + Sync {
    async fn find_profile(
        &self,
        user_id: &UserId,
        product_id: &ProductId,
    ) -> Result<Option<BehaviorProfile>, StoreError>;

    /// Inserts or replaces the profile keyed by (user, product).
    async fn save_profile(&self, profile: BehaviorProfile) -> Result<(), StoreError>;

    /// All profiles of the user, highest affinity first.
    async fn find_profiles_by_user(
        &self,
        user_id: &UserId,
    ) -> Result<Vec<BehaviorProfile>, StoreError>;

    /// Favorite profiles of the user, highest affinity first.
    async fn find_favorites_by_user(
        &self,
        user_id: &UserId,
    ) -> Result<Vec<BehaviorProfile>, StoreError>;

    /// Profiles of the user in one category, most purchased first.
    async fn find_by_user_and_category(
        &self,
        user_id: &UserId,
        category: &Category,
    ) -> Result<Vec<BehaviorProfile>, StoreError>;

    /// Profiles whose preferred hour is `hour`, highest affinity first.
    async fn find_by_user_and_hour(
        &self,
        user_id: &UserId,
        hour: u8,
    ) -> Result<Vec<BehaviorProfile>, StoreError>;

    async fn find_similar_users(
        &self,
        user_id: &UserId,
        min_matches: u32,
    ) -> Result<Vec<SimilarUser>, StoreError>;

    async fn count_profiles(&self) -> Result<u64, StoreError>;

    async fn count_users(&self) -> Result<u64, StoreError>;
}

#[async_trait]
pub trait RecommendationStore: Send + Sync {
    async fn exists(&self, user_id: &UserId, product_id: &ProductId) -> Result<bool, StoreError>;

    async fn save_all(&self, recommendations: Vec<Recommendation>) -> Result<(), StoreError>;

    /// Persists feedback changes on an existing row.
    ///
    /// Returns `false` and writes nothing when the row is gone.
    async fn save(&self, recommendation: Recommendation) -> Result<bool, StoreError>;

    async fn find_by_id(&self, id: &RecommendationId)
        -> Result<Option<Recommendation>, StoreError>;

    /// Up to `limit` rows ordered by predicted score, highest first.
    async fn top_for_user(
        &self,
        user_id: &UserId,
        limit: usize,
    ) -> Result<Vec<Recommendation>, StoreError>;

    async fn list_for_user(&self, user_id: &UserId) -> Result<Vec<Recommendation>, StoreError>;

    /// Hard-deletes the user's rows generated before `cutoff`, returning how many were removed.
    async fn delete_generated_before(
        &self,
        user_id: &UserId,
        cutoff: DateTime<Utc>,
    ) -> Result<u64, StoreError>;

    async fn count(&self) -> Result<u64, StoreError>;
}

#[async_trait]
pub trait ProductCatalog: Send + Sync {
    async fn find_by_id(&self, product_id: &ProductId) -> Result<Option<Product>, StoreError>;

    async fn find_available_by_category(
        &self,
        category: &Category,
    ) -> Result<Vec<Product>, StoreError>;

    async fn list_available(&self) -> Result<Vec<Product>, StoreError>;
}
