use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use tastebud_core::domain::behavior::BehaviorProfile;
use tastebud_core::domain::product::{Category, Product, ProductId};
use tastebud_core::domain::recommendation::{Recommendation, RecommendationId};
use tastebud_core::domain::user::UserId;
use tastebud_core::errors::StoreError;
use tastebud_core::recommendations::{
    BehaviorProfileStore, ProductCatalog, RecommendationStore, SimilarUser, SimilarityIndex,
};

fn by_affinity(a: &BehaviorProfile, b: &BehaviorProfile) -> Ordering {
    b.affinity_score.cmp(&a.affinity_score).then_with(|| a.product_id.cmp(&b.product_id))
}

#[derive(Default)]
pub struct InMemoryBehaviorProfileStore {
    profiles: RwLock<HashMap<(UserId, ProductId), BehaviorProfile>>,
}

impl InMemoryBehaviorProfileStore {
    async fn user_profiles(
        &self,
        user_id: &UserId,
        keep: impl Fn(&BehaviorProfile) -> bool,
    ) -> Vec<BehaviorProfile> {
        let profiles = self.profiles.read().await;
        let mut matching = profiles
            .values()
            .filter(|profile| &profile.user_id == user_id && keep(profile))
            .cloned()
            .collect::<Vec<_>>();
        matching.sort_by(by_affinity);
        matching
    }
}

#[async_trait]
impl BehaviorProfileStore for InMemoryBehaviorProfileStore {
    async fn find_profile(
        &self,
        user_id: &UserId,
        product_id: &ProductId,
    ) -> Result<Option<BehaviorProfile>, StoreError> {
        let profiles = self.profiles.read().await;
        Ok(profiles.get(&(user_id.clone(), product_id.clone())).cloned())
    }

    async fn save_profile(&self, profile: BehaviorProfile) -> Result<(), StoreError> {
        let mut profiles = self.profiles.write().await;
        profiles.insert((profile.user_id.clone(), profile.product_id.clone()), profile);
        Ok(())
    }

    async fn find_profiles_by_user(
        &self,
        user_id: &UserId,
    ) -> Result<Vec<BehaviorProfile>, StoreError> {
        Ok(self.user_profiles(user_id, |_| true).await)
    }

    async fn find_favorites_by_user(
        &self,
        user_id: &UserId,
    ) -> Result<Vec<BehaviorProfile>, StoreError> {
        Ok(self.user_profiles(user_id, |profile| profile.is_favorite).await)
    }

    async fn find_by_user_and_category(
        &self,
        user_id: &UserId,
        category: &Category,
    ) -> Result<Vec<BehaviorProfile>, StoreError> {
        let mut matching = self.user_profiles(user_id, |profile| &profile.category == category).await;
        matching.sort_by(|a, b| {
            b.purchase_count.cmp(&a.purchase_count).then_with(|| a.product_id.cmp(&b.product_id))
        });
        Ok(matching)
    }

    async fn find_by_user_and_hour(
        &self,
        user_id: &UserId,
        hour: u8,
    ) -> Result<Vec<BehaviorProfile>, StoreError> {
        Ok(self.user_profiles(user_id, |profile| profile.preferred_hour == hour).await)
    }

    async fn find_similar_users(
        &self,
        user_id: &UserId,
        min_matches: u32,
    ) -> Result<Vec<SimilarUser>, StoreError> {
        let profiles = self.profiles.read().await;
        let index = SimilarityIndex::build(profiles.values());
        Ok(index.similar_to(user_id, min_matches))
    }

    async fn count_profiles(&self) -> Result<u64, StoreError> {
        Ok(self.profiles.read().await.len() as u64)
    }

    async fn count_users(&self) -> Result<u64, StoreError> {
        let profiles = self.profiles.read().await;
        let users = profiles.keys().map(|(user_id, _)| user_id).collect::<HashSet<_>>();
        Ok(users.len() as u64)
    }
}

/// Rows are kept in insertion order; nothing prevents two rows for the same product.
#[derive(Default)]
pub struct InMemoryRecommendationStore {
    rows: RwLock<Vec<Recommendation>>,
}

impl InMemoryRecommendationStore {
    async fn sorted_for_user(&self, user_id: &UserId) -> Vec<Recommendation> {
        let rows = self.rows.read().await;
        let mut matching =
            rows.iter().filter(|row| &row.user_id == user_id).cloned().collect::<Vec<_>>();
        matching.sort_by(|a, b| b.predicted_score.cmp(&a.predicted_score));
        matching
    }
}

#[async_trait]
impl RecommendationStore for InMemoryRecommendationStore {
    async fn exists(&self, user_id: &UserId, product_id: &ProductId) -> Result<bool, StoreError> {
        let rows = self.rows.read().await;
        Ok(rows.iter().any(|row| &row.user_id == user_id && &row.product_id == product_id))
    }

    async fn save_all(&self, recommendations: Vec<Recommendation>) -> Result<(), StoreError> {
        self.rows.write().await.extend(recommendations);
        Ok(())
    }

    async fn save(&self, recommendation: Recommendation) -> Result<bool, StoreError> {
        let mut rows = self.rows.write().await;
        let Some(existing) = rows.iter_mut().find(|row| row.id == recommendation.id) else {
            return Ok(false);
        };
        *existing = recommendation;
        Ok(true)
    }

    async fn find_by_id(
        &self,
        id: &RecommendationId,
    ) -> Result<Option<Recommendation>, StoreError> {
        let rows = self.rows.read().await;
        Ok(rows.iter().find(|row| &row.id == id).cloned())
    }

    async fn top_for_user(
        &self,
        user_id: &UserId,
        limit: usize,
    ) -> Result<Vec<Recommendation>, StoreError> {
        let mut rows = self.sorted_for_user(user_id).await;
        rows.truncate(limit);
        Ok(rows)
    }

    async fn list_for_user(&self, user_id: &UserId) -> Result<Vec<Recommendation>, StoreError> {
        Ok(self.sorted_for_user(user_id).await)
    }

    async fn delete_generated_before(
        &self,
        user_id: &UserId,
        cutoff: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        let mut rows = self.rows.write().await;
        let before = rows.len();
        rows.retain(|row| !(&row.user_id == user_id && row.generated_at < cutoff));
        Ok((before - rows.len()) as u64)
    }

    async fn count(&self) -> Result<u64, StoreError> {
        Ok(self.rows.read().await.len() as u64)
    }
}

#[derive(Default)]
pub struct InMemoryProductCatalog {
    products: RwLock<HashMap<ProductId, Product>>,
}

impl InMemoryProductCatalog {
    pub async fn save(&self, product: Product) {
        self.products.write().await.insert(product.id.clone(), product);
    }

    pub async fn remove(&self, product_id: &ProductId) -> Option<Product> {
        self.products.write().await.remove(product_id)
    }

    async fn available(&self, keep: impl Fn(&Product) -> bool) -> Vec<Product> {
        let products = self.products.read().await;
        let mut matching = products
            .values()
            .filter(|product| product.available && keep(product))
            .cloned()
            .collect::<Vec<_>>();
        matching.sort_by(|a, b| a.id.cmp(&b.id));
        matching
    }
}

#[async_trait]
impl ProductCatalog for InMemoryProductCatalog {
    async fn find_by_id(&self, product_id: &ProductId) -> Result<Option<Product>, StoreError> {
        Ok(self.products.read().await.get(product_id).cloned())
    }

    async fn find_available_by_category(
        &self,
        category: &Category,
    ) -> Result<Vec<Product>, StoreError> {
        Ok(self.available(|product| &product.category == category).await)
    }

    async fn list_available(&self) -> Result<Vec<Product>, StoreError> {
        Ok(self.available(|_| true).await)
    }
}
